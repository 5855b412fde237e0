//! Transactional email through the Resend HTTP API.
//!
//! Without an API key the [`Mailer`] is disabled: sends are logged and
//! skipped.

use crate::config::EmailConfig;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("email request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("email provider returned {status}: {body}")]
    Api { status: u16, body: String },
}

/// A single outbound email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub html: String,
}

#[derive(Serialize)]
struct ResendRequest<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    html: &'a str,
}

#[derive(Clone, Debug)]
pub struct Mailer {
    client: Client,
    api_key: String,
    from: String,
    endpoint: String,
}

impl Mailer {
    /// # Errors
    ///
    /// Returns [`NotifyError::Http`] if the HTTP client cannot be built.
    pub fn new(config: &EmailConfig) -> Result<Self, NotifyError> {
        let client = Client::builder().timeout(Duration::from_secs(15)).build()?;
        Ok(Self {
            client,
            api_key: config.resend_api_key.trim().to_string(),
            from: config.from_address.clone(),
            endpoint: format!("{}/emails", config.api_base_url.trim_end_matches('/')),
        })
    }

    /// A mailer that never sends.
    pub fn disabled() -> Self {
        Self {
            client: Client::new(),
            api_key: String::new(),
            from: String::new(),
            endpoint: String::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.api_key.is_empty()
    }

    /// Sends `message`. Returns `false` when email is disabled.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError`] for transport failures and non-success
    /// responses.
    pub async fn send(&self, message: &EmailMessage) -> Result<bool, NotifyError> {
        if !self.is_enabled() {
            tracing::info!(subject = %message.subject, "email disabled, skipping send");
            return Ok(false);
        }

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&ResendRequest {
                from: &self.from,
                to: [&message.to],
                subject: &message.subject,
                html: &message.html,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Api {
                status: status.as_u16(),
                body,
            });
        }
        tracing::info!(subject = %message.subject, "email sent");
        Ok(true)
    }
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

/// "Your codexes are ready" notice sent when a run finishes.
pub fn run_finished_email(
    app_name: &str,
    to: &str,
    run_title: &str,
    codex_titles: &[String],
    failed: usize,
    run_url: &str,
) -> EmailMessage {
    let items: String = codex_titles
        .iter()
        .map(|t| format!("<li>{}</li>", escape_html(t)))
        .collect();
    let failure_note = if failed > 0 {
        format!(
            "<p>{} codex(es) could not be generated. You can retry them from the run page.</p>",
            failed
        )
    } else {
        String::new()
    };
    EmailMessage {
        to: to.to_string(),
        subject: format!("{}: your codexes for \"{}\" are ready", app_name, run_title),
        html: format!(
            "<p>Your codexes for <strong>{}</strong> are ready.</p><ul>{}</ul>{}<p><a href=\"{}\">Open them in {}</a></p>",
            escape_html(run_title),
            items,
            failure_note,
            escape_html(run_url),
            escape_html(app_name),
        ),
    }
}

/// Share link invitation.
pub fn share_link_email(
    app_name: &str,
    to: &str,
    sender_name: &str,
    codex_title: &str,
    url: &str,
    note: Option<&str>,
) -> EmailMessage {
    let note = note
        .filter(|n| !n.trim().is_empty())
        .map(|n| format!("<blockquote>{}</blockquote>", escape_html(n)))
        .unwrap_or_default();
    EmailMessage {
        to: to.to_string(),
        subject: format!("{} shared \"{}\" with you", sender_name, codex_title),
        html: format!(
            "<p>{} shared the codex <strong>{}</strong> with you on {}.</p>{}<p><a href=\"{}\">View it here</a></p>",
            escape_html(sender_name),
            escape_html(codex_title),
            escape_html(app_name),
            note,
            escape_html(url),
        ),
    }
}
