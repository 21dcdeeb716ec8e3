use anyhow::Context;
use imap::{ClientBuilder, ConnectionMode};
use log::{debug, info};

/// A message as downloaded from the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub seq: u32,
    pub body: Vec<u8>,
}

/// Read-only IMAP session used to pull old good morning mails
pub struct ImapFetcher {
    session: imap::Session<imap::Connection>,
}

impl ImapFetcher {
    pub fn connect(
        host: &str,
        port: u16,
        use_tls: bool,
        username: &str,
        password: &str,
    ) -> anyhow::Result<Self> {
        info!("Connecting to {host}:{port} (tls: {use_tls})");
        let mode = if use_tls {
            ConnectionMode::Tls
        } else {
            ConnectionMode::Plaintext
        };
        let client = ClientBuilder::new(host, port)
            .mode(mode)
            .connect()
            .with_context(|| format!("Failed to connect to {host}:{port}"))?;
        let session = client
            .login(username, password)
            .map_err(|(e, _client)| e)
            .with_context(|| format!("Failed to log in to {host} as {username:?}"))?;
        debug!("Logged in to {host}");
        Ok(Self { session })
    }

    /// Selects `mailbox` and returns how many messages it holds
    pub fn select_mailbox(&mut self, mailbox: &str) -> anyhow::Result<u32> {
        let selected = self
            .session
            .select(mailbox)
            .with_context(|| format!("Failed to select mailbox {mailbox:?}"))?;
        debug!("Mailbox {mailbox:?} has {} messages", selected.exists);
        Ok(selected.exists)
    }

    /// Messages in the selected mailbox whose subject contains `subject`
    pub fn search_by_subject(&mut self, subject: &str) -> anyhow::Result<Vec<RawMessage>> {
        self.fetch_matching(&subject_query(subject))
    }

    pub fn list_all(&mut self) -> anyhow::Result<Vec<RawMessage>> {
        self.fetch_matching("ALL")
    }

    fn fetch_matching(&mut self, query: &str) -> anyhow::Result<Vec<RawMessage>> {
        debug!("Searching with {query:?}");
        let mut seqs: Vec<u32> = self
            .session
            .search(query)
            .with_context(|| format!("Failed to search with {query:?}"))?
            .into_iter()
            .collect();
        if seqs.is_empty() {
            return Ok(Vec::new());
        }
        seqs.sort_unstable();
        let seq_set = seqs
            .iter()
            .map(|seq| seq.to_string())
            .collect::<Vec<_>>()
            .join(",");
        let fetches = self
            .session
            .fetch(seq_set, "RFC822")
            .context("Failed to fetch messages")?;
        let messages: Vec<RawMessage> = fetches
            .iter()
            .filter_map(|fetch| {
                fetch.body().map(|body| RawMessage {
                    seq: fetch.message,
                    body: body.to_vec(),
                })
            })
            .collect();
        debug!("Fetched {} of {} matching messages", messages.len(), seqs.len());
        Ok(messages)
    }

    pub fn logout(mut self) -> anyhow::Result<()> {
        self.session.logout().context("Failed to log out")
    }
}

/// IMAP `SUBJECT` search key with `subject` as a quoted string
fn subject_query(subject: &str) -> String {
    let escaped = subject.replace('\\', "\\\\").replace('"', "\\\"");
    format!("SUBJECT \"{escaped}\"")
}
