//! Persisted settings, recipient addresses and captions.
//!
//! The store is a JSON document with three sections (`settings`, `addresses` and
//! `messages`). It is not safe for concurrent use: the program is expected to run
//! once per scheduled invocation.

use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
};

use anyhow::Context;
use log::{debug, info, warn};
use serde::{de::DeserializeOwned, Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::Days;

pub const SMTP_HOST: &str = "smtp_host";
pub const SUBJECT_TAG: &str = "subject_tag";
pub const SENDER_USER: &str = "sender_user";
pub const SENDER_NAME: &str = "sender_name";
pub const SENDER_EMAIL: &str = "sender_email";
pub const SENDER_PSWD: &str = "sender_pswd";
pub const MAX_DAYS_TO_LOG: &str = "max_days_to_log";

/// Identifier prefix given to captions that are not tied to an attachment
pub const GENERIC_MESSAGE_PREFIX: &str = "_GENERIC_MESSAGE_";

const DEFAULT_SENDER_NAME: &str = "Good Morning Helper";
const DEFAULT_SENDER_EMAIL: &str = match option_env!("GOOD_MORNING_SENDER_EMAIL") {
    Some(email) => email,
    None => "goodmorninghelper@gmail.com",
};
const DEFAULT_SENDER_PSWD: &str = match option_env!("GOOD_MORNING_SENDER_PSWD") {
    Some(pswd) => pswd,
    None => "goodmorning",
};

/// Built-in value of a recognized setting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettingDefault {
    pub key: &'static str,
    pub value: &'static str,
    /// Written as blank in a freshly generated file so it is not exposed to the user
    pub hide_from_user: bool,
}

pub const SETTING_DEFAULTS: &[SettingDefault] = &[
    SettingDefault {
        key: SMTP_HOST,
        value: "smtp.gmail.com",
        hide_from_user: false,
    },
    SettingDefault {
        key: SUBJECT_TAG,
        value: "1",
        hide_from_user: false,
    },
    SettingDefault {
        key: SENDER_USER,
        value: "goodmorninghelper",
        hide_from_user: true,
    },
    SettingDefault {
        key: SENDER_NAME,
        value: DEFAULT_SENDER_NAME,
        hide_from_user: true,
    },
    SettingDefault {
        key: SENDER_EMAIL,
        value: DEFAULT_SENDER_EMAIL,
        hide_from_user: true,
    },
    SettingDefault {
        key: SENDER_PSWD,
        value: DEFAULT_SENDER_PSWD,
        hide_from_user: true,
    },
    SettingDefault {
        key: MAX_DAYS_TO_LOG,
        value: "100",
        hide_from_user: false,
    },
];

pub fn setting_default(key: &str) -> Option<&'static SettingDefault> {
    SETTING_DEFAULTS.iter().find(|default| default.key == key)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    #[serde(default, deserialize_with = "lenient_string")]
    pub name: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub email: String,
}

impl Address {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }
}

/// Caption text keyed by the file name of the attachment it belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageAssociation {
    pub assoc_file: String,
    pub text: String,
}

impl MessageAssociation {
    pub fn is_generic(&self) -> bool {
        self.assoc_file.starts_with(GENERIC_MESSAGE_PREFIX)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ConfigFile {
    #[serde(default, deserialize_with = "lenient_records")]
    settings: Vec<SettingRecord>,
    #[serde(default, deserialize_with = "lenient_records")]
    addresses: Vec<Address>,
    #[serde(default, deserialize_with = "lenient_records")]
    messages: Vec<MessageRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SettingRecord {
    #[serde(default, deserialize_with = "lenient_string")]
    key: String,
    #[serde(default, deserialize_with = "lenient_string")]
    value: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct MessageRecord {
    #[serde(
        default,
        deserialize_with = "lenient_optional_string",
        skip_serializing_if = "Option::is_none"
    )]
    assoc_file: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    text: String,
}

/// Accepts numbers and booleans written without quotes, `null` reads as empty
fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Null => Ok(String::new()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected a string, found {other}"
        ))),
    }
}

fn lenient_optional_string<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    lenient_string(deserializer).map(|s| Some(s).filter(|s| !s.is_empty()))
}

/// Reads a section record by record, dropping the ones that can't be read
fn lenient_records<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let records = match Value::deserialize(deserializer)? {
        Value::Array(records) => records,
        Value::Null => Vec::new(),
        other => {
            warn!("Ignoring settings section that is not a list: {other}");
            Vec::new()
        }
    };
    Ok(records
        .into_iter()
        .filter_map(|record| match T::deserialize(&record) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("Ignoring unreadable settings record {record}: {e}");
                None
            }
        })
        .collect())
}

#[derive(Debug)]
pub struct SettingsStore {
    path: PathBuf,
    /// In file order
    settings: Vec<(String, String)>,
    addresses: Vec<Address>,
    messages: Vec<MessageAssociation>,
}

impl SettingsStore {
    /// Loads the store at `path`, generating a default one first if none exists
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            info!("No settings found at {path:?}. Generating defaults");
            write_file(path, &default_file())
                .with_context(|| format!("Failed to generate default settings at {path:?}"))?;
        }
        Self::read(path)
    }

    /// Like [`SettingsStore::load_from`] but a missing file is only generated in
    /// memory. Nothing is written until [`SettingsStore::save`] is called.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            info!("No settings found at {path:?}. Using defaults");
            return Ok(Self::from_file(path.to_path_buf(), default_file()));
        }
        Self::read(path)
    }

    fn read(path: &Path) -> anyhow::Result<Self> {
        debug!("Loading settings from: {path:?}");
        let file_contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read contents of {path:?}"))?;
        let file: ConfigFile = serde_json::from_str(&file_contents)
            .with_context(|| format!("Failed to parse contents of {path:?}"))?;
        Ok(Self::from_file(path.to_path_buf(), file))
    }

    fn from_file(path: PathBuf, file: ConfigFile) -> Self {
        let mut result = Self {
            path,
            settings: Vec::new(),
            addresses: Vec::new(),
            messages: Vec::new(),
        };

        for SettingRecord { key, value } in file.settings {
            if key.is_empty() {
                warn!("Ignoring setting without a key (value: {value:?})");
                continue;
            }
            let value = match setting_default(&key) {
                Some(default) if value.is_empty() => default.value.to_string(),
                _ => value,
            };
            if result.get_stored(&key).is_some() {
                warn!("Setting {key:?} given more than once, the last value wins");
            }
            result.set(key, value);
        }

        result.addresses = file
            .addresses
            .into_iter()
            .filter(|address| {
                let keep = !address.name.is_empty() && !address.email.is_empty();
                if !keep {
                    warn!("Ignoring incomplete address: {address:?}");
                }
                keep
            })
            .collect();

        // Synthetic generic ids must not collide with identifiers given in the file
        let reserved: HashSet<String> = file
            .messages
            .iter()
            .filter_map(|message| message.assoc_file.clone())
            .filter(|assoc_file| !assoc_file.is_empty())
            .collect();
        for MessageRecord { assoc_file, text } in file.messages {
            if text.is_empty() {
                continue;
            }
            match assoc_file.filter(|f| !f.is_empty()) {
                Some(assoc_file) => {
                    result.add_message(Some(assoc_file), text);
                }
                None => result.push_generic(text, &reserved),
            }
        }
        result
    }

    /// Value of `key`, with recognized keys falling back to their default when blank
    pub fn get(&self, key: &str) -> Option<&str> {
        let stored = self.get_stored(key);
        match stored {
            Some(value) if !value.is_empty() => Some(value),
            _ => setting_default(key).map(|default| default.value).or(stored),
        }
    }

    fn get_stored(&self, key: &str) -> Option<&str> {
        self.settings
            .iter()
            .find(|(stored_key, _)| stored_key == key)
            .map(|(_, value)| value.as_str())
    }

    /// Replaces the value of `key` in place, new keys go at the end
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self
            .settings
            .iter_mut()
            .find(|(stored_key, _)| *stored_key == key)
        {
            Some((_, stored)) => *stored = value,
            None => self.settings.push((key, value)),
        }
    }

    /// Shorthand for recognized keys which always have a value
    pub fn value(&self, key: &str) -> &str {
        self.get(key).unwrap_or_default()
    }

    pub fn max_days_to_log(&self) -> Days {
        let raw = self.value(MAX_DAYS_TO_LOG);
        match raw.parse() {
            Ok(days) => days,
            Err(e) => {
                let default = setting_default(MAX_DAYS_TO_LOG)
                    .and_then(|default| default.value.parse().ok())
                    .unwrap_or_else(|| Days::from(100));
                warn!("Invalid {MAX_DAYS_TO_LOG} {raw:?}, keeping {default} days. {e:#}");
                default
            }
        }
    }

    pub fn addresses(&self) -> &[Address] {
        &self.addresses
    }

    pub fn add_address(&mut self, address: Address) {
        self.addresses.push(address);
    }

    pub fn messages(&self) -> &[MessageAssociation] {
        &self.messages
    }

    /// Caption explicitly associated with `assoc_file`
    pub fn message_for(&self, assoc_file: &str) -> Option<&str> {
        self.messages
            .iter()
            .find(|message| message.assoc_file == assoc_file)
            .map(|message| message.text.as_str())
    }

    /// All captions in the generic pool, in stored order
    pub fn generic_captions(&self) -> Vec<&str> {
        self.messages
            .iter()
            .filter(|message| message.is_generic())
            .map(|message| message.text.as_str())
            .collect()
    }

    /// Adds a caption. Without an attachment name it joins the generic pool.
    ///
    /// Returns false if `assoc_file` already has a caption, in which case the
    /// existing one is kept.
    pub fn add_message(&mut self, assoc_file: Option<String>, text: impl Into<String>) -> bool {
        match assoc_file.filter(|f| !f.is_empty()) {
            Some(assoc_file) => {
                if self.message_for(&assoc_file).is_some() {
                    warn!("Duplicate caption for {assoc_file:?} ignored");
                    return false;
                }
                self.messages.push(MessageAssociation {
                    assoc_file,
                    text: text.into(),
                });
            }
            None => self.push_generic(text.into(), &HashSet::new()),
        }
        true
    }

    fn push_generic(&mut self, text: String, reserved: &HashSet<String>) {
        let used: HashSet<&str> = self
            .messages
            .iter()
            .map(|message| message.assoc_file.as_str())
            .collect();
        let mut n = 1;
        let assoc_file = loop {
            let id = format!("{GENERIC_MESSAGE_PREFIX}{n}");
            if !used.contains(id.as_str()) && !reserved.contains(&id) {
                break id;
            }
            n += 1;
        };
        self.messages.push(MessageAssociation { assoc_file, text });
    }

    pub fn save(&self) -> anyhow::Result<()> {
        debug!("Saving settings to: {:?}", self.path);
        let settings = self
            .settings
            .iter()
            .map(|(key, value)| {
                let value = match setting_default(key) {
                    Some(default)
                        if value.is_empty()
                            || (default.hide_from_user && value == default.value) =>
                    {
                        default.value.to_string()
                    }
                    _ => value.clone(),
                };
                SettingRecord {
                    key: key.clone(),
                    value,
                }
            })
            .collect();
        let messages = self
            .messages
            .iter()
            .map(|message| MessageRecord {
                assoc_file: (!message.is_generic()).then(|| message.assoc_file.clone()),
                text: message.text.clone(),
            })
            .collect();
        let file = ConfigFile {
            settings,
            addresses: self.addresses.clone(),
            messages,
        };
        write_file(&self.path, &file)
    }
}

/// Contents of a freshly generated settings file. Hidden defaults are left blank
fn default_file() -> ConfigFile {
    ConfigFile {
        settings: SETTING_DEFAULTS
            .iter()
            .map(|default| SettingRecord {
                key: default.key.to_string(),
                value: if default.hide_from_user {
                    String::new()
                } else {
                    default.value.to_string()
                },
            })
            .collect(),
        addresses: vec![Address::new(DEFAULT_SENDER_NAME, DEFAULT_SENDER_EMAIL)],
        messages: vec![MessageRecord {
            assoc_file: Some("good-morning.jpg".to_string()),
            text: "\nGood morning sweetie! I hope your day goes well... I'll talk to you later.\n\
                   With all my heart,\n\
                   Your Good Morning Helper\n"
                .to_string(),
        }],
    }
}

fn write_file(path: &Path, file: &ConfigFile) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory for {path:?}"))?;
    }
    let contents = serde_json::to_string_pretty(file).context("Failed to serialize settings")?;
    fs::write(path, contents).with_context(|| format!("Failed to write settings to {path:?}"))
}
