//! Turns fetched good morning mails into captions and images for future runs.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::Context;
use log::{debug, info, warn};
use mailparse::{DispositionType, MailHeaderMap, ParsedMail};

use crate::{config::SettingsStore, mail::RawMessage, utils::make_single_line};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ImportSummary {
    pub captions_added: usize,
    pub attachments_saved: usize,
    pub skipped: usize,
}

/// The parts of a good morning mail worth keeping
#[derive(Debug, Default, PartialEq, Eq)]
struct ImportedMail {
    subject: String,
    text: Option<String>,
    attachments: Vec<(String, Vec<u8>)>,
}

fn parse_message(raw: &[u8]) -> anyhow::Result<ImportedMail> {
    let parsed = mailparse::parse_mail(raw).context("Failed to parse message")?;
    let mut result = ImportedMail {
        subject: parsed.headers.get_first_value("Subject").unwrap_or_default(),
        ..Default::default()
    };
    collect_parts(&parsed, &mut result)?;
    Ok(result)
}

fn collect_parts(part: &ParsedMail, result: &mut ImportedMail) -> anyhow::Result<()> {
    if !part.subparts.is_empty() {
        for subpart in &part.subparts {
            collect_parts(subpart, result)?;
        }
        return Ok(());
    }
    let disposition = part.get_content_disposition();
    let filename = disposition
        .params
        .get("filename")
        .or_else(|| part.ctype.params.get("name"))
        .and_then(|name| sanitize_filename(name));
    match filename {
        Some(filename) if disposition.disposition != DispositionType::Inline
            || !part.ctype.mimetype.starts_with("text/") =>
        {
            let content = part
                .get_body_raw()
                .with_context(|| format!("Failed to decode attachment {filename:?}"))?;
            result.attachments.push((filename, content));
        }
        _ => {
            if result.text.is_none() && part.ctype.mimetype == "text/plain" {
                let text = part.get_body().context("Failed to decode text body")?;
                let text = text.trim();
                if !text.is_empty() {
                    result.text = Some(text.to_string());
                }
            }
        }
    }
    Ok(())
}

/// Keeps only the final path component so a mail can't write outside the image directory
fn sanitize_filename(name: &str) -> Option<String> {
    Path::new(name.trim())
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .filter(|name| !name.is_empty())
}

/// Whether the `Subject` header of `message` contains `needle`, ignoring case
///
/// Used where the server can't search, such as POP3.
pub fn subject_contains(message: &RawMessage, needle: &str) -> bool {
    match mailparse::parse_headers(&message.body) {
        Ok((headers, _)) => headers
            .get_first_value("Subject")
            .is_some_and(|subject| subject.to_lowercase().contains(&needle.to_lowercase())),
        Err(e) => {
            warn!("Failed to read headers of message {}: {e}", message.seq);
            false
        }
    }
}

/// Adds captions from `messages` to `settings` and saves their images into `images_dir`
///
/// Existing captions and images are never overwritten. Messages that fail to
/// parse are skipped. The caller is responsible for saving `settings`.
pub fn import_messages(
    messages: &[RawMessage],
    settings: &mut SettingsStore,
    images_dir: &Path,
) -> anyhow::Result<ImportSummary> {
    let mut summary = ImportSummary::default();
    for message in messages {
        let imported = match parse_message(&message.body) {
            Ok(imported) => imported,
            Err(e) => {
                warn!("Skipping message {}: {e:#}", message.seq);
                summary.skipped += 1;
                continue;
            }
        };
        debug!("Importing message {} {:?}", message.seq, imported.subject);

        for (filename, content) in &imported.attachments {
            if save_attachment(images_dir, filename, content)? {
                summary.attachments_saved += 1;
            }
        }

        let Some(text) = imported.text else {
            debug!("Message {} has no text body", message.seq);
            continue;
        };
        let added = match imported.attachments.first() {
            Some((filename, _)) => {
                settings.message_for(filename).is_none()
                    && settings.add_message(Some(filename.clone()), text.as_str())
            }
            None => {
                !settings.generic_captions().contains(&text.as_str())
                    && settings.add_message(None, text.as_str())
            }
        };
        if added {
            info!("Imported caption: {}", make_single_line(&text));
            summary.captions_added += 1;
        }
    }
    Ok(summary)
}

fn save_attachment(images_dir: &Path, filename: &str, content: &[u8]) -> anyhow::Result<bool> {
    let path: PathBuf = images_dir.join(filename);
    if path.exists() {
        debug!("{path:?} already exists, not overwriting");
        return Ok(false);
    }
    fs::create_dir_all(images_dir)
        .with_context(|| format!("Failed to create image directory {images_dir:?}"))?;
    fs::write(&path, content).with_context(|| format!("Failed to save attachment {path:?}"))?;
    info!("Saved attachment {path:?}");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::TempDir;

    const WITH_ATTACHMENT: &str = concat!(
        "From: Helper <helper@example.com>\r\n",
        "To: Sweetie <sweetie@example.com>\r\n",
        "Subject: Good Morning 12\r\n",
        "MIME-Version: 1.0\r\n",
        "Content-Type: multipart/mixed; boundary=\"XYZ\"\r\n",
        "\r\n",
        "--XYZ\r\n",
        "Content-Type: text/plain; charset=utf-8\r\n",
        "\r\n",
        "Rise and shine!\r\n",
        "--XYZ\r\n",
        "Content-Type: image/jpeg; name=\"sunrise.jpg\"\r\n",
        "Content-Disposition: attachment; filename=\"../../sunrise.jpg\"\r\n",
        "Content-Transfer-Encoding: base64\r\n",
        "\r\n",
        "aGVsbG8=\r\n",
        "--XYZ--\r\n",
    );

    const PLAIN: &str = concat!(
        "From: Helper <helper@example.com>\r\n",
        "Subject: Good Morning 13\r\n",
        "Content-Type: text/plain\r\n",
        "\r\n",
        "Hi!\r\n",
    );

    fn raw(seq: u32, body: &str) -> RawMessage {
        RawMessage {
            seq,
            body: body.as_bytes().to_vec(),
        }
    }

    fn store(dir: &TempDir) -> SettingsStore {
        let path = dir.path().join("config.json");
        fs::write(&path, "{}").unwrap();
        SettingsStore::load_from(&path).unwrap()
    }

    #[rstest]
    #[case("Good Morning", true)]
    #[case("good morning 12", true)]
    #[case("Good Night", false)]
    fn subject_filter(#[case] needle: &str, #[case] expected: bool) {
        assert_eq!(subject_contains(&raw(1, WITH_ATTACHMENT), needle), expected);
    }

    #[test]
    fn subject_filter_without_subject() {
        assert!(!subject_contains(&raw(1, "From: a@example.com\r\n\r\nbody"), "Good"));
    }

    #[test]
    fn parses_text_and_attachment() {
        let imported = parse_message(WITH_ATTACHMENT.as_bytes()).unwrap();
        assert_eq!(imported.subject, "Good Morning 12");
        assert_eq!(imported.text.as_deref(), Some("Rise and shine!"));
        assert_eq!(
            imported.attachments,
            vec![("sunrise.jpg".to_string(), b"hello".to_vec())]
        );
    }

    #[test]
    fn imports_associated_and_generic_captions() {
        let dir = TempDir::new().unwrap();
        let images = dir.path().join("Images");
        let mut settings = store(&dir);

        let messages = vec![
            raw(1, WITH_ATTACHMENT),
            raw(2, PLAIN),
            raw(3, PLAIN),
            raw(4, WITH_ATTACHMENT),
        ];
        let summary = import_messages(&messages, &mut settings, &images).unwrap();

        assert_eq!(
            summary,
            ImportSummary {
                captions_added: 2,
                attachments_saved: 1,
                skipped: 0,
            }
        );
        assert_eq!(settings.message_for("sunrise.jpg"), Some("Rise and shine!"));
        assert_eq!(settings.generic_captions(), vec!["Hi!"]);
        assert_eq!(fs::read(images.join("sunrise.jpg")).unwrap(), b"hello");
    }

    #[test]
    fn existing_caption_is_kept() {
        let dir = TempDir::new().unwrap();
        let mut settings = store(&dir);
        settings.add_message(Some("sunrise.jpg".to_string()), "Mine");

        import_messages(&[raw(1, WITH_ATTACHMENT)], &mut settings, dir.path()).unwrap();
        assert_eq!(settings.message_for("sunrise.jpg"), Some("Mine"));
    }

    #[test]
    fn sanitizes_filenames() {
        assert_eq!(sanitize_filename("../etc/passwd").as_deref(), Some("passwd"));
        assert_eq!(sanitize_filename("a.jpg").as_deref(), Some("a.jpg"));
        assert_eq!(sanitize_filename(".."), None);
    }
}
