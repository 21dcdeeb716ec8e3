use log::debug;
use rand::{seq::SliceRandom, Rng};

use crate::config::SettingsStore;

/// Body used when an attachment has no caption and the generic pool is empty
pub const FALLBACK_BODY: &str = "LOVE!";

/// Caption for `identifier`: its own message if it has one, otherwise a random generic one
pub fn compose_body<R: Rng + ?Sized>(
    identifier: &str,
    settings: &SettingsStore,
    rng: &mut R,
) -> String {
    if let Some(text) = settings.message_for(identifier) {
        debug!("Using caption associated with {identifier:?}");
        return text.to_string();
    }
    let generic = settings.generic_captions();
    match generic.choose(rng) {
        Some(text) => text.to_string(),
        None => {
            debug!("No generic captions configured, using fallback");
            FALLBACK_BODY.to_string()
        }
    }
}
