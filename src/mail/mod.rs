mod fetch;
mod import;
mod pop3;
mod smtp;

pub use fetch::{ImapFetcher, RawMessage};
pub use import::{import_messages, subject_contains, ImportSummary};
pub use pop3::{Pop3Fetcher, Pop3Stream};
pub use smtp::{GoodMorningMail, Mailer, SmtpMailer};
