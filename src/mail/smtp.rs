use std::{fs, path::Path};

use anyhow::Context;
use lettre::{
    message::{header::ContentType, Attachment as MailAttachment, Mailbox, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    Message, SmtpTransport, Transport,
};
use log::{debug, error, info};

use crate::{
    config::{Address, SettingsStore, SENDER_EMAIL, SENDER_NAME, SENDER_PSWD, SMTP_HOST},
    selector::Attachment,
    utils::make_single_line,
};

const SMTP_PORT: u16 = 587;

/// A good morning mail ready to be handed to a [`Mailer`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoodMorningMail {
    pub subject: String,
    pub body: String,
    pub attachment: Option<Attachment>,
    pub from: Address,
    pub to: Vec<Address>,
}

impl GoodMorningMail {
    pub fn new(
        subject: String,
        body: String,
        attachment: Option<Attachment>,
        from: Address,
        to: Vec<Address>,
    ) -> Self {
        Self {
            subject,
            body,
            attachment,
            from,
            to,
        }
    }

    /// Mail from the configured sender to every configured address
    pub fn from_settings(
        subject: String,
        body: String,
        attachment: Option<Attachment>,
        settings: &SettingsStore,
    ) -> Self {
        let from = Address::new(settings.value(SENDER_NAME), settings.value(SENDER_EMAIL));
        Self::new(subject, body, attachment, from, settings.addresses().to_vec())
    }

    /// Builds the MIME message, reading the attachment from disk
    pub fn to_message(&self) -> anyhow::Result<Message> {
        let mut builder = Message::builder()
            .from(mailbox(&self.from)?)
            .subject(self.subject.as_str());
        for address in &self.to {
            builder = builder.to(mailbox(address)?);
        }
        let text = SinglePart::plain(self.body.clone());
        let message = match &self.attachment {
            Some(attachment) => {
                let content = fs::read(&attachment.path)
                    .with_context(|| format!("Failed to read attachment {:?}", attachment.path))?;
                let content_type = ContentType::parse(content_type_for(&attachment.path))
                    .context("Failed to build attachment content type")?;
                let part = MailAttachment::new(attachment.name.clone()).body(content, content_type);
                builder.multipart(MultiPart::mixed().singlepart(text).singlepart(part))
            }
            None => builder.singlepart(text),
        };
        message.context("Failed to build message")
    }
}

fn mailbox(address: &Address) -> anyhow::Result<Mailbox> {
    let email: lettre::Address = address
        .email
        .parse()
        .with_context(|| format!("Invalid email address {:?}", address.email))?;
    Ok(Mailbox::new(Some(address.name.clone()), email))
}

fn content_type_for(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase());
    match extension.as_deref() {
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("bmp") => "image/bmp",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    }
}

/// Something that can deliver a [`GoodMorningMail`]
pub trait Mailer {
    /// Returns true if the mail was handed off without error
    fn send(&self, mail: &GoodMorningMail) -> bool;
}

pub struct SmtpMailer {
    host: String,
    username: String,
    password: String,
}

impl SmtpMailer {
    pub fn new(host: String, username: String, password: String) -> Self {
        Self {
            host,
            username,
            password,
        }
    }

    pub fn from_settings(settings: &SettingsStore) -> Self {
        Self::new(
            settings.value(SMTP_HOST).to_string(),
            settings.value(SENDER_EMAIL).to_string(),
            settings.value(SENDER_PSWD).to_string(),
        )
    }

    fn do_send(&self, mail: &GoodMorningMail) -> anyhow::Result<()> {
        let message = mail.to_message()?;
        let transport = SmtpTransport::starttls_relay(&self.host)
            .with_context(|| format!("Failed to create SMTP transport for {:?}", self.host))?
            .port(SMTP_PORT)
            .credentials(Credentials::new(
                self.username.clone(),
                self.password.clone(),
            ))
            .build();
        debug!("Sending {:?} via {}:{SMTP_PORT}", mail.subject, self.host);
        transport
            .send(&message)
            .context("Failed to send mail via SMTP")?;
        Ok(())
    }
}

impl Mailer for SmtpMailer {
    fn send(&self, mail: &GoodMorningMail) -> bool {
        match self.do_send(mail) {
            Ok(()) => {
                info!(
                    "Sent {:?} to {} recipient(s): {}",
                    mail.subject,
                    mail.to.len(),
                    make_single_line(&mail.body)
                );
                true
            }
            Err(e) => {
                error!("{e:?}");
                false
            }
        }
    }
}
