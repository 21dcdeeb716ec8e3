use std::{
    fs::{self, File},
    io::{self, BufRead, BufReader, Write},
    path::{Path, PathBuf},
};

use anyhow::Context;
use chrono::{Local, NaiveDateTime, Timelike};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::{utils::make_single_line, Days};

/// Prefix on a stored value that marks the entry as a mailed attachment
pub const MAIL_ENTRY_PREFIX: &str = "[MAILED_ITEM] ";

const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One line of the history file as it is stored on disk
#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry {
    #[serde(default)]
    date: String,
    #[serde(default)]
    value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub date: NaiveDateTime,
    pub value: String,
    pub is_mail_entry: bool,
}

impl LogEntry {
    fn new(date: NaiveDateTime, stored_value: &str) -> Self {
        match stored_value.strip_prefix(MAIL_ENTRY_PREFIX) {
            Some(value) => Self::mailed(date, value),
            None => Self {
                date,
                value: stored_value.to_string(),
                is_mail_entry: false,
            },
        }
    }

    fn mailed(date: NaiveDateTime, value: &str) -> Self {
        Self {
            date,
            value: value.to_string(),
            is_mail_entry: true,
        }
    }

    fn stored_value(&self) -> String {
        if self.is_mail_entry {
            format!("{MAIL_ENTRY_PREFIX}{}", self.value)
        } else {
            self.value.clone()
        }
    }
}

impl From<&LogEntry> for StoredEntry {
    fn from(entry: &LogEntry) -> Self {
        Self {
            date: entry.date.format(DATE_FORMAT).to_string(),
            value: entry.stored_value(),
        }
    }
}

/// Append-only record of what was mailed, stored as JSON lines
///
/// Mailed entries older than the retention window are dropped when the log is
/// loaded. Every append rewrites the file with the retained entries.
#[derive(Debug)]
pub struct HistoryLog {
    path: PathBuf,
    entries: Vec<LogEntry>,
}

impl HistoryLog {
    pub fn load(path: &Path, max_days: Days) -> anyhow::Result<Self> {
        Self::load_at(path, max_days, now())
    }

    /// Same as [`HistoryLog::load`] but with retention measured from `now`
    pub fn load_at(path: &Path, max_days: Days, now: NaiveDateTime) -> anyhow::Result<Self> {
        debug!("Loading history from: {path:?}");
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No history found at {path:?}. Starting empty");
                return Ok(Self {
                    path: path.to_path_buf(),
                    entries: Vec::new(),
                });
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to open history at {path:?}"))
            }
        };

        // `None` means the cutoff is before the earliest representable date
        let cutoff = now.checked_sub_signed(max_days.as_duration());
        let mut entries = Vec::new();
        for (line_no, line) in BufReader::new(file).lines().enumerate() {
            let line = line.with_context(|| format!("Failed to read history at {path:?}"))?;
            if line.trim().is_empty() {
                continue;
            }
            let stored: StoredEntry = match serde_json::from_str(&line) {
                Ok(stored) => stored,
                Err(e) => {
                    warn!("Skipping unreadable history line {}: {e}", line_no + 1);
                    continue;
                }
            };
            let date = match NaiveDateTime::parse_from_str(&stored.date, DATE_FORMAT) {
                Ok(date) => date,
                Err(e) => {
                    warn!(
                        "Invalid date {:?} on history line {}, using now. {e}",
                        stored.date,
                        line_no + 1
                    );
                    now
                }
            };
            let entry = LogEntry::new(date, &stored.value);
            if entry.is_mail_entry && cutoff.is_some_and(|cutoff| entry.date < cutoff) {
                debug!("Pruning expired mail entry: {:?}", entry.value);
                continue;
            }
            entries.push(entry);
        }
        debug!("Loaded {} history entries", entries.len());
        Ok(Self {
            path: path.to_path_buf(),
            entries,
        })
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    /// Appends a free-form entry and persists
    pub fn log(&mut self, message: &str) -> anyhow::Result<()> {
        debug!("History: {}", make_single_line(message));
        self.entries.push(LogEntry {
            date: now(),
            value: message.to_string(),
            is_mail_entry: false,
        });
        self.save()
    }

    /// Records that the attachment `identifier` was mailed and persists
    pub fn record_mailed(&mut self, identifier: &str) -> anyhow::Result<()> {
        debug!("Recording {identifier:?} as mailed");
        self.entries.push(LogEntry::mailed(now(), identifier));
        self.save()
    }

    pub fn was_mailed(&self, identifier: &str) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.is_mail_entry && entry.value == identifier)
    }

    fn save(&self) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory for {:?}", self.path))?;
        }
        let mut file = File::create(&self.path)
            .with_context(|| format!("Failed to create history file {:?}", self.path))?;
        for entry in &self.entries {
            let line = serde_json::to_string(&StoredEntry::from(entry))
                .context("Failed to serialize history entry")?;
            writeln!(file, "{line}")
                .with_context(|| format!("Failed to write to file: {:?}", self.path))?;
        }
        Ok(())
    }
}

fn now() -> NaiveDateTime {
    // Whole seconds only, matching what survives a round trip through the file
    let now = Local::now().naive_local();
    now.with_nanosecond(0).unwrap_or(now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn history_path(dir: &TempDir) -> PathBuf {
        dir.path().join("history.jsonl")
    }

    fn date(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, DATE_FORMAT).unwrap()
    }

    #[test]
    fn missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let log = HistoryLog::load(&history_path(&dir), Days::from(100)).unwrap();
        assert!(log.entries().is_empty());
        assert!(!log.was_mailed("a.jpg"));
    }

    #[test]
    fn recorded_entry_survives_reload() {
        let dir = TempDir::new().unwrap();
        let path = history_path(&dir);
        let mut log = HistoryLog::load(&path, Days::from(100)).unwrap();
        log.record_mailed("a.jpg").unwrap();
        assert!(log.was_mailed("a.jpg"));
        assert!(!log.was_mailed("b.jpg"));

        let reloaded = HistoryLog::load(&path, Days::from(100)).unwrap();
        assert!(reloaded.was_mailed("a.jpg"));
        assert_eq!(reloaded.entries(), log.entries());
    }

    #[test]
    fn free_form_entries_are_not_mail_entries() {
        let dir = TempDir::new().unwrap();
        let path = history_path(&dir);
        let mut log = HistoryLog::load(&path, Days::from(100)).unwrap();
        log.log("a.jpg").unwrap();
        assert!(!log.was_mailed("a.jpg"));

        let raw = fs::read_to_string(&path).unwrap();
        assert!(!raw.contains(MAIL_ENTRY_PREFIX));
    }

    #[test]
    fn marker_is_stored_and_stripped() {
        let dir = TempDir::new().unwrap();
        let path = history_path(&dir);
        let mut log = HistoryLog::load(&path, Days::from(100)).unwrap();
        log.record_mailed("a.jpg").unwrap();

        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains("[MAILED_ITEM] a.jpg"));
        assert_eq!(log.entries()[0].value, "a.jpg");
    }

    #[test]
    fn retention_prunes_only_old_mail_entries() {
        let dir = TempDir::new().unwrap();
        let path = history_path(&dir);
        fs::write(
            &path,
            concat!(
                r#"{"date":"2026-01-01 08:00:00","value":"[MAILED_ITEM] old.jpg"}"#,
                "\n",
                r#"{"date":"2026-01-01 08:00:00","value":"old free-form note"}"#,
                "\n",
                r#"{"date":"2026-01-25 08:00:00","value":"[MAILED_ITEM] recent.jpg"}"#,
                "\n",
            ),
        )
        .unwrap();

        let log =
            HistoryLog::load_at(&path, Days::from(10), date("2026-02-01 08:00:00")).unwrap();
        assert!(!log.was_mailed("old.jpg"));
        assert!(log.was_mailed("recent.jpg"));
        assert!(log
            .entries()
            .iter()
            .any(|entry| entry.value == "old free-form note"));
        assert_eq!(log.entries().len(), 2);
    }

    #[test]
    fn bad_dates_default_to_now_and_bad_lines_are_skipped() {
        let dir = TempDir::new().unwrap();
        let path = history_path(&dir);
        fs::write(
            &path,
            concat!(
                r#"{"date":"yesterday-ish","value":"[MAILED_ITEM] a.jpg"}"#,
                "\n",
                "this is not json\n",
                "\n",
                r#"{"value":"[MAILED_ITEM] b.jpg"}"#,
                "\n",
            ),
        )
        .unwrap();

        let now = date("2026-10-16 07:00:00");
        let log = HistoryLog::load_at(&path, Days::from(1), now).unwrap();
        assert!(log.was_mailed("a.jpg"));
        assert!(log.was_mailed("b.jpg"));
        assert!(log.entries().iter().all(|entry| entry.date == now));
    }

    #[test]
    fn huge_retention_keeps_everything() {
        let dir = TempDir::new().unwrap();
        let path = history_path(&dir);
        fs::write(
            &path,
            r#"{"date":"1970-01-01 00:00:00","value":"[MAILED_ITEM] ancient.jpg"}"#,
        )
        .unwrap();
        let log = HistoryLog::load(&path, Days::from(u32::MAX)).unwrap();
        assert!(log.was_mailed("ancient.jpg"));
    }
}
