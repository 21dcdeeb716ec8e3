use std::{
    io::{self, BufRead, BufReader, Read, Write},
    net::TcpStream,
    time::Duration,
};

use anyhow::{bail, Context};
use log::{debug, info};
use native_tls::{TlsConnector, TlsStream};

use super::RawMessage;

const TIMEOUT: Duration = Duration::from_secs(60);

/// TCP connection to a POP3 server, optionally wrapped in TLS
pub enum Pop3Stream {
    Tls(TlsStream<TcpStream>),
    Plain(TcpStream),
}

impl Read for Pop3Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Tls(stream) => stream.read(buf),
            Self::Plain(stream) => stream.read(buf),
        }
    }
}

impl Write for Pop3Stream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Tls(stream) => stream.write(buf),
            Self::Plain(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Tls(stream) => stream.flush(),
            Self::Plain(stream) => stream.flush(),
        }
    }
}

/// POP3 session that downloads every message in the maildrop without deleting any
pub struct Pop3Fetcher<S: Read + Write = Pop3Stream> {
    stream: BufReader<S>,
}

impl Pop3Fetcher {
    pub fn connect(
        host: &str,
        port: u16,
        use_tls: bool,
        username: &str,
        password: &str,
    ) -> anyhow::Result<Self> {
        info!("Connecting to {host}:{port} (tls: {use_tls})");
        let tcp = TcpStream::connect((host, port))
            .with_context(|| format!("Failed to connect to {host}:{port}"))?;
        tcp.set_read_timeout(Some(TIMEOUT))
            .context("Failed to set read timeout")?;
        let stream = if use_tls {
            let connector = TlsConnector::new().context("Failed to create TLS connector")?;
            let tls = connector
                .connect(host, tcp)
                .map_err(|e| anyhow::anyhow!("TLS handshake with {host} failed: {e}"))?;
            Pop3Stream::Tls(tls)
        } else {
            Pop3Stream::Plain(tcp)
        };
        Self::login(stream, username, password)
            .with_context(|| format!("Failed to log in to {host} as {username:?}"))
    }
}

impl<S: Read + Write> Pop3Fetcher<S> {
    /// Reads the server greeting and authenticates with USER/PASS
    pub fn login(stream: S, username: &str, password: &str) -> anyhow::Result<Self> {
        let mut fetcher = Self {
            stream: BufReader::new(stream),
        };
        let greeting = fetcher.read_status().context("No greeting from server")?;
        debug!("Server greeting: {greeting}");
        fetcher.command(&format!("USER {username}"))?;
        fetcher
            .command(&format!("PASS {password}"))
            .context("Password rejected")?;
        debug!("Logged in as {username:?}");
        Ok(fetcher)
    }

    /// Number of messages in the maildrop
    pub fn message_count(&mut self) -> anyhow::Result<u32> {
        let stat = self.command("STAT")?;
        parse_stat(&stat)
    }

    pub fn list_all(&mut self) -> anyhow::Result<Vec<RawMessage>> {
        let count = self.message_count()?;
        debug!("Maildrop has {count} messages");
        let mut messages = Vec::with_capacity(count as usize);
        for seq in 1..=count {
            self.command(&format!("RETR {seq}"))
                .with_context(|| format!("Failed to retrieve message {seq}"))?;
            let body = read_multiline(&mut self.stream)
                .with_context(|| format!("Failed to read message {seq}"))?;
            messages.push(RawMessage { seq, body });
        }
        debug!("Fetched {} messages", messages.len());
        Ok(messages)
    }

    pub fn logout(mut self) -> anyhow::Result<()> {
        self.command("QUIT").context("Failed to log out")?;
        Ok(())
    }

    /// Sends one command and returns the text after `+OK`
    fn command(&mut self, command: &str) -> anyhow::Result<String> {
        let verb = command.split(' ').next().unwrap_or_default();
        debug!("> {verb}");
        let stream = self.stream.get_mut();
        stream
            .write_all(format!("{command}\r\n").as_bytes())
            .and_then(|()| stream.flush())
            .with_context(|| format!("Failed to send {verb}"))?;
        self.read_status()
            .with_context(|| format!("{verb} was refused"))
    }

    fn read_status(&mut self) -> anyhow::Result<String> {
        let mut line = String::new();
        let read = self
            .stream
            .read_line(&mut line)
            .context("Failed to read response")?;
        if read == 0 {
            bail!("Connection closed by server");
        }
        parse_status(&line).map(str::to_string)
    }
}

/// Text after `+OK`, or an error carrying the text after `-ERR`
fn parse_status(line: &str) -> anyhow::Result<&str> {
    let line = line.trim_end_matches(['\r', '\n']);
    if let Some(rest) = line.strip_prefix("+OK") {
        Ok(rest.trim_start())
    } else if let Some(rest) = line.strip_prefix("-ERR") {
        bail!("Server error: {}", rest.trim_start())
    } else {
        bail!("Unexpected response: {line:?}")
    }
}

/// Message count from a `STAT` reply (`<count> <size>`)
fn parse_stat(reply: &str) -> anyhow::Result<u32> {
    let count = reply.split_whitespace().next().unwrap_or_default();
    count
        .parse()
        .with_context(|| format!("Invalid STAT reply {reply:?}"))
}

/// Reads a dot-terminated multi-line response, undoing dot-stuffing
fn read_multiline<R: BufRead>(reader: &mut R) -> anyhow::Result<Vec<u8>> {
    let mut body = Vec::new();
    let mut line = Vec::new();
    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line)? == 0 {
            bail!("Connection closed before the end of the message");
        }
        let content = line
            .strip_suffix(b"\n")
            .map(|l| l.strip_suffix(b"\r").unwrap_or(l))
            .unwrap_or(&line[..]);
        if content == b"." {
            return Ok(body);
        }
        let content = content.strip_prefix(b".").unwrap_or(content);
        body.extend_from_slice(content);
        body.extend_from_slice(b"\r\n");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::io::Cursor;

    /// Replays canned server replies and records what the client sent
    struct Scripted {
        replies: Cursor<Vec<u8>>,
        sent: Vec<u8>,
    }

    impl Scripted {
        fn new(replies: &str) -> Self {
            Self {
                replies: Cursor::new(replies.as_bytes().to_vec()),
                sent: Vec::new(),
            }
        }
    }

    impl Read for Scripted {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.replies.read(buf)
        }
    }

    impl Write for Scripted {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.sent.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[rstest]
    #[case("+OK ready\r\n", "ready")]
    #[case("+OK\r\n", "")]
    #[case("+OK 2 320\n", "2 320")]
    fn ok_status(#[case] line: &str, #[case] expected: &str) {
        assert_eq!(parse_status(line).unwrap(), expected);
    }

    #[rstest]
    #[case("-ERR bad password\r\n")]
    #[case("* OK IMAP4 ready\r\n")]
    #[case("")]
    fn error_status(#[case] line: &str) {
        assert!(parse_status(line).is_err());
    }

    #[rstest]
    #[case("2 320", 2)]
    #[case("0 0", 0)]
    fn stat_reply(#[case] reply: &str, #[case] expected: u32) {
        assert_eq!(parse_stat(reply).unwrap(), expected);
    }

    #[test]
    fn multiline_is_unstuffed() {
        let mut reader =
            Cursor::new(b"Subject: hi\r\n\r\n..leading dot\r\nlast\r\n.\r\n+OK\r\n".to_vec());
        let body = read_multiline(&mut reader).unwrap();
        assert_eq!(body, b"Subject: hi\r\n\r\n.leading dot\r\nlast\r\n");
    }

    #[test]
    fn multiline_without_terminator_fails() {
        let mut reader = Cursor::new(b"Subject: hi\r\n".to_vec());
        assert!(read_multiline(&mut reader).is_err());
    }

    #[test]
    fn session_fetches_every_message() {
        let server = Scripted::new(
            "+OK POP3 ready\r\n\
             +OK\r\n\
             +OK logged in\r\n\
             +OK 2 40\r\n\
             +OK message follows\r\nSubject: one\r\n\r\nfirst\r\n.\r\n\
             +OK message follows\r\nSubject: two\r\n\r\nsecond\r\n.\r\n\
             +OK bye\r\n",
        );
        let mut fetcher = Pop3Fetcher::login(server, "user", "secret").unwrap();
        let messages = fetcher.list_all().unwrap();

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].seq, 1);
        assert_eq!(messages[0].body, b"Subject: one\r\n\r\nfirst\r\n");
        assert_eq!(messages[1].body, b"Subject: two\r\n\r\nsecond\r\n");

        let sent = String::from_utf8(fetcher.stream.get_ref().sent.clone()).unwrap();
        assert_eq!(
            sent,
            "USER user\r\nPASS secret\r\nSTAT\r\nRETR 1\r\nRETR 2\r\n"
        );
        fetcher.logout().unwrap();
    }

    #[test]
    fn rejected_password_fails_login() {
        let server = Scripted::new("+OK POP3 ready\r\n+OK\r\n-ERR invalid credentials\r\n");
        assert!(Pop3Fetcher::login(server, "user", "wrong").is_err());
    }
}
