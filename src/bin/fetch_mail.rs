use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use good_morning::{
    config::{SettingsStore, SENDER_PSWD, SENDER_USER},
    init_logging,
    mail::{import_messages, subject_contains, ImapFetcher, Pop3Fetcher, RawMessage},
    CommonArgs, HistoryLog,
};
use log::{info, warn};

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug, Default)]
enum Protocol {
    /// Download the whole maildrop and filter locally
    Pop3,
    /// Search the mailbox on the server
    #[default]
    Imap,
}

impl Protocol {
    fn default_host(self) -> &'static str {
        match self {
            Protocol::Pop3 => "pop.gmail.com",
            Protocol::Imap => "imap.gmail.com",
        }
    }

    fn default_port(self) -> u16 {
        match self {
            Protocol::Pop3 => 995,
            Protocol::Imap => 993,
        }
    }
}

#[derive(Parser, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default)]
#[command(author, version, about)]
/// Fetches earlier good morning mails and adds their captions and images to the settings
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[arg(long, value_enum, default_value_t = Protocol::Imap)]
    protocol: Protocol,

    /// Server to fetch from [default: pop.gmail.com or imap.gmail.com]
    #[arg(long)]
    host: Option<String>,

    /// Server port [default: 995 for POP3, 993 for IMAP]
    #[arg(long)]
    port: Option<u16>,

    /// Connect without TLS
    #[arg(long)]
    no_tls: bool,

    /// IMAP only, POP3 always reads the whole maildrop
    #[arg(long, default_value = "INBOX")]
    mailbox: String,

    /// Only fetch mails whose subject contains this text
    #[arg(long, default_value = "Good Morning", conflicts_with = "all")]
    subject: String,

    /// Fetch every mail in the mailbox instead of searching by subject
    #[arg(long)]
    all: bool,

    /// Folder to save attached images into
    #[arg(long, value_name = "PATH", default_value = "Images")]
    images: PathBuf,
}

impl Cli {
    fn host(&self) -> &str {
        self.host
            .as_deref()
            .unwrap_or_else(|| self.protocol.default_host())
    }

    fn port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.protocol.default_port())
    }
}

fn fetch_imap(cli: &Cli, settings: &SettingsStore) -> anyhow::Result<Vec<RawMessage>> {
    let mut fetcher = ImapFetcher::connect(
        cli.host(),
        cli.port(),
        !cli.no_tls,
        settings.value(SENDER_USER),
        settings.value(SENDER_PSWD),
    )?;
    fetcher.select_mailbox(&cli.mailbox)?;
    let messages = if cli.all {
        fetcher.list_all()?
    } else {
        fetcher.search_by_subject(&cli.subject)?
    };
    if let Err(e) = fetcher.logout() {
        warn!("{e:?}");
    }
    Ok(messages)
}

fn fetch_pop3(cli: &Cli, settings: &SettingsStore) -> anyhow::Result<Vec<RawMessage>> {
    let mut fetcher = Pop3Fetcher::connect(
        cli.host(),
        cli.port(),
        !cli.no_tls,
        settings.value(SENDER_USER),
        settings.value(SENDER_PSWD),
    )?;
    let messages = fetcher.list_all()?;
    if let Err(e) = fetcher.logout() {
        warn!("{e:?}");
    }
    if cli.all {
        return Ok(messages);
    }
    Ok(messages
        .into_iter()
        .filter(|message| subject_contains(message, &cli.subject))
        .collect())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _handle = init_logging(cli.common.log_level.into(), "fetch_mail")?;

    let mut settings = SettingsStore::load_from(&cli.common.get_config_path())?;
    let messages = match cli.protocol {
        Protocol::Imap => fetch_imap(&cli, &settings)?,
        Protocol::Pop3 => fetch_pop3(&cli, &settings)?,
    };
    println!("{:?} found {} messages", cli.protocol, messages.len());

    let summary = import_messages(&messages, &mut settings, &cli.images)?;
    settings.save()?;
    info!("Import finished: {summary:?}");
    println!(
        "Added {} captions and {} images ({} messages skipped)",
        summary.captions_added, summary.attachments_saved, summary.skipped
    );

    let mut history = HistoryLog::load(&cli.common.history_path, settings.max_days_to_log())?;
    history.log(&format!(
        "Imported {} captions and {} images from {}/{}",
        summary.captions_added,
        summary.attachments_saved,
        cli.host(),
        cli.mailbox
    ))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use rstest::rstest;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn defaults() {
        let cli = Cli::parse_from(["fetch_mail"]);
        assert_eq!(cli.protocol, Protocol::Imap);
        assert_eq!(cli.host(), "imap.gmail.com");
        assert_eq!(cli.port(), 993);
        assert!(!cli.no_tls);
        assert_eq!(cli.mailbox, "INBOX");
        assert_eq!(cli.subject, "Good Morning");
        assert!(!cli.all);
    }

    #[rstest]
    #[case(&["fetch_mail", "--protocol", "pop3"], Protocol::Pop3, "pop.gmail.com", 995)]
    #[case(&["fetch_mail", "--protocol", "imap"], Protocol::Imap, "imap.gmail.com", 993)]
    #[case(
        &["fetch_mail", "--protocol", "pop3", "--host", "pop.example.com", "--port", "110"],
        Protocol::Pop3,
        "pop.example.com",
        110
    )]
    #[case(&["fetch_mail", "--port", "143"], Protocol::Imap, "imap.gmail.com", 143)]
    fn server_follows_protocol(
        #[case] args: &[&str],
        #[case] protocol: Protocol,
        #[case] host: &str,
        #[case] port: u16,
    ) {
        let cli = Cli::parse_from(args);
        assert_eq!(cli.protocol, protocol);
        assert_eq!(cli.host(), host);
        assert_eq!(cli.port(), port);
    }
}
