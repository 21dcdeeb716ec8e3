use std::path::PathBuf;

use clap::{Args, Parser, ValueEnum};
use log::LevelFilter;

#[derive(Parser, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default)]
#[command(
    author,
    version,
    about,
    long_about = "Sends a good morning mail with a random, not recently sent, image attached."
)]
pub struct Cli {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Folder holding the images to choose from
    #[arg(long, value_name = "PATH", default_value = "Images")]
    pub images: PathBuf,

    /// Pick the image and caption and print them without sending or updating any files
    #[arg(long)]
    pub dry_run: bool,
}

/// Options shared by the sender and the fetcher
#[derive(Args, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default)]
pub struct CommonArgs {
    /// Specify settings file to use
    ///
    /// If not specified uses `config.json` in the working directory. A file
    /// with default settings is created if it does not exist.
    #[arg(long = "config", short, value_name = "PATH")]
    pub config_filename: Option<String>,

    /// History file recording which images were already sent
    #[arg(long = "history", value_name = "PATH", default_value = "history.jsonl")]
    pub history_path: PathBuf,

    /// Set logging level to use
    #[arg(long, short, value_enum, default_value_t = LogLevel::Info)]
    pub log_level: LogLevel,
}

impl CommonArgs {
    pub fn get_config_path(&self) -> PathBuf {
        match self.config_filename.as_ref() {
            Some(val) => PathBuf::from(val),
            None => PathBuf::from("config.json"),
        }
    }
}

/// Exists to provide better help messages variants copied from LevelFilter as
/// that's the type that is actually needed
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug, Default)]
pub enum LogLevel {
    /// Nothing emitted in this mode
    #[default]
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(value: LogLevel) -> Self {
        match value {
            LogLevel::Off => LevelFilter::Off,
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
        }
    }
}
