//! Recipient mailer.
//!
//! Loads recipients from a JSON file, wraps a single message into an HTML
//! and a plain-text body and hands it to a [`MailTransport`].  The only
//! real transport is [`MailerSend`], a single POST to the provider's
//! `/v1/email` endpoint with no retries.

use std::{
    fs,
    path::Path,
    time::Duration,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use anyhow::Context;
use log::{info, warn, error};

use crate::config::MailConfig;

pub const MAILERSEND_API_URL: &str = "https://api.mailersend.com/v1/email";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    /// Network, DNS, TLS or timeout failure.
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The provider answered with a non-2xx status.
    #[error("Mail API returned HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("API key env var `{0}` is not set")]
    MissingApiKey(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    #[serde(default)]
    pub name: String,

    pub email: String,
}

/// Sender side of every mail: who it is from and what it is about.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub from: Recipient,
    pub reply_to: Recipient,
    pub subject: String,
}

impl Envelope {
    pub fn from_config(config: &MailConfig) -> anyhow::Result<Envelope> {
        let from = config.from
            .clone()
            .context("`[mail].from` must be set to send mail")?;
        Ok(Envelope {
            reply_to: config.reply_to.clone().unwrap_or_else(|| from.clone()),
            from,
            subject: config.subject.clone(),
        })
    }
}

// request body as expected by the provider
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Email {
    pub from: Recipient,
    pub to: Vec<Recipient>,
    pub reply_to: Recipient,
    pub subject: String,
    pub html: String,
    pub text: String,
}

impl Email {
    pub fn compose(
        envelope: &Envelope,
        recipients: Vec<Recipient>,
        message: &str,
    ) -> Email {
        Email {
            from: envelope.from.clone(),
            to: recipients,
            reply_to: envelope.reply_to.clone(),
            subject: envelope.subject.clone(),
            html: format!("<p>{}</p>", escape_html(message)),
            text: message.to_string(),
        }
    }
}

// provider acknowledgment
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SendReceipt {
    pub status: u16,
    pub message_id: Option<String>,
}

#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, email: &Email) -> Result<SendReceipt, MailError>;
}

pub struct MailerSend {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
}

impl MailerSend {
    pub fn new(
        api_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Result<Self, MailError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            api_url: api_url.into(),
            api_key: api_key.into(),
        })
    }

    pub fn from_config(config: &MailConfig) -> Result<Self, MailError> {
        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| MailError::MissingApiKey(config.api_key_env.clone()))?;
        MailerSend::new(config.api_url.clone(), api_key)
    }
}

#[async_trait]
impl MailTransport for MailerSend {
    async fn send(&self, email: &Email) -> Result<SendReceipt, MailError> {
        let response = self.client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(email)
            .send()
            .await?;
        let status = response.status();
        let message_id = response.headers()
            .get("x-message-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MailError::HttpStatus {
                status: status.as_u16(),
                body,
            })
        }
        Ok(SendReceipt {
            status: status.as_u16(),
            message_id,
        })
    }
}

/// Read the recipient list, an unreadable or malformed file counts as empty.
pub fn load_recipients(file_path: impl AsRef<Path>) -> Vec<Recipient> {
    let file_path = file_path.as_ref();
    let loaded = fs::read_to_string(file_path)
        .with_context(|| format!("Failed to read `{}`", file_path.display()))
        .and_then(|contents| {
            serde_json::from_str::<Vec<Recipient>>(&contents)
                .with_context(|| format!("Malformed recipients file `{}`", file_path.display()))
        });
    match loaded {
        Ok(recipients) => recipients,

        Err(e) => {
            error!("An error occurred while loading recipients: `{e:#}`");
            Vec::new()
        }
    }
}

/// Check there is something to send before anything else is set up.
///
/// Returns the recipients, or `None` when there is no message or nobody
/// to send it to.
pub fn pending_recipients(
    recipients_path: impl AsRef<Path>,
    message: Option<&str>,
) -> Option<Vec<Recipient>> {
    if message.is_none() {
        warn!("No message to send.");
        return None
    }
    let recipients = load_recipients(recipients_path);
    if recipients.is_empty() {
        warn!("No recipients found.");
        return None
    }
    Some(recipients)
}

pub async fn deliver(
    transport: &dyn MailTransport,
    email: &Email,
) -> Result<SendReceipt, MailError> {
    let receipt = transport.send(email).await?;
    info!(
        "Mail sent to `{}` recipients, status: `{}`, message id: `{:?}`",
        email.to.len(),
        receipt.status,
        receipt.message_id
    );
    Ok(receipt)
}

/// Send `message` to everyone listed in `recipients_path`.
///
/// Returns `Ok(None)` without touching the network when there is no
/// message or no recipient.
pub async fn send_to_recipients(
    transport: &dyn MailTransport,
    envelope: &Envelope,
    recipients_path: impl AsRef<Path>,
    message: Option<&str>,
) -> Result<Option<SendReceipt>, MailError> {
    let Some(recipients) = pending_recipients(recipients_path, message) else {
        return Ok(None)
    };
    let email = Email::compose(envelope, recipients, message.unwrap_or_default());
    deliver(transport, &email).await.map(Some)
}

fn escape_html(s: &str) -> String {
    let mut escaped = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
