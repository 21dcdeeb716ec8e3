mod cli;
mod composer;
pub mod config;
mod history;
mod logging;
pub mod mail;
mod selector;
mod units;
mod utils;

use std::path::Path;

use log::{info, warn};
use rand::Rng;

pub use cli::{Cli, CommonArgs, LogLevel};
pub use composer::{compose_body, FALLBACK_BODY};
pub use history::{HistoryLog, LogEntry, MAIL_ENTRY_PREFIX};
pub use logging::init_logging;
pub use selector::{list_candidates, select_attachment, Attachment};
pub use units::Days;
pub use utils::make_single_line;

use crate::{
    config::{SettingsStore, SUBJECT_TAG},
    mail::{GoodMorningMail, Mailer, SmtpMailer},
};

/// What a single run ended up doing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Mail sent with the named attachment
    Sent(String),
    /// Dry run picked the named attachment without sending
    Previewed(String),
    /// No images to choose from, nothing was sent
    NoCandidates,
    /// The mailer reported a failure, nothing was recorded
    SendFailed,
}

/// Sends one good morning mail, or only prints it with `--dry-run`
///
/// A dry run writes no files, not even the default settings on a first run.
pub fn run(cli: Cli) -> anyhow::Result<RunOutcome> {
    let config_path = cli.common.get_config_path();
    let mut settings = if cli.dry_run {
        SettingsStore::load_or_default(&config_path)?
    } else {
        SettingsStore::load_from(&config_path)?
    };
    let mut history = HistoryLog::load(&cli.common.history_path, settings.max_days_to_log())?;
    let mut rng = rand::thread_rng();

    if cli.dry_run {
        return match generate_mail(&settings, &history, &cli.images, &mut rng)? {
            Some(mail) => {
                println!("Subject: {}", mail.subject);
                if let Some(attachment) = &mail.attachment {
                    println!("Attachment: {}", attachment.path.display());
                }
                let to: Vec<_> = mail.to.iter().map(|a| a.email.as_str()).collect();
                println!("To: {}", to.join(", "));
                println!("{}", mail.body);
                Ok(RunOutcome::Previewed(
                    mail.attachment.map(|a| a.name).unwrap_or_default(),
                ))
            }
            None => Ok(RunOutcome::NoCandidates),
        };
    }

    let mailer = SmtpMailer::from_settings(&settings);
    send_good_morning(&mut settings, &mut history, &cli.images, &mailer, &mut rng)
}

/// Picks an image and caption and builds the mail, or `None` if there are no images
pub fn generate_mail<R: Rng + ?Sized>(
    settings: &SettingsStore,
    history: &HistoryLog,
    images_dir: &Path,
    rng: &mut R,
) -> anyhow::Result<Option<GoodMorningMail>> {
    let candidates = list_candidates(images_dir)?;
    let Some(attachment) = select_attachment(candidates, |name| history.was_mailed(name), rng)
    else {
        return Ok(None);
    };
    info!("Selected attachment {attachment}");
    let body = compose_body(&attachment.name, settings, rng);
    let subject = format!("Good Morning {}", settings.value(SUBJECT_TAG));
    Ok(Some(GoodMorningMail::from_settings(
        subject,
        body,
        Some(attachment),
        settings,
    )))
}

/// Sends one good morning mail and records it
///
/// The history and subject counter are only touched after the mailer reports
/// success. A failed send leaves no trace.
pub fn send_good_morning<M: Mailer, R: Rng + ?Sized>(
    settings: &mut SettingsStore,
    history: &mut HistoryLog,
    images_dir: &Path,
    mailer: &M,
    rng: &mut R,
) -> anyhow::Result<RunOutcome> {
    let Some(mail) = generate_mail(settings, history, images_dir, rng)? else {
        warn!("No images found in {images_dir:?}. Nothing sent");
        return Ok(RunOutcome::NoCandidates);
    };
    if !mailer.send(&mail) {
        warn!("Sending {:?} failed. Nothing recorded", mail.subject);
        return Ok(RunOutcome::SendFailed);
    }
    let name = mail.attachment.map(|a| a.name).unwrap_or_default();
    history.record_mailed(&name)?;

    let current = settings.value(SUBJECT_TAG).to_string();
    match next_subject_tag(&current) {
        Some(next) => settings.set(SUBJECT_TAG, next),
        None => warn!("{SUBJECT_TAG} {current:?} is not a number, leaving it unchanged"),
    }
    settings.save()?;
    Ok(RunOutcome::Sent(name))
}

fn next_subject_tag(current: &str) -> Option<String> {
    let n: i64 = current.trim().parse().ok()?;
    Some(n.checked_add(1)?.to_string())
}
