//! Outgoing email.
//!
//! [`HttpMailer`] posts to a transactional mail API
//! (`{ from, to, subject, text }` with a bearer key). Without an API URL the
//! service falls back to [`LogMailer`], which only records the message.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use crate::config::MailConfig;

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("Mail request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Mail API error: {status} - {message}")]
    Api { status: u16, message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Email {
    pub to: String,
    pub subject: String,
    pub text: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &Email) -> Result<(), MailError>;
}

#[derive(Serialize)]
struct SendBody<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    text: &'a str,
}

pub struct HttpMailer {
    http: Client,
    api_url: String,
    api_key: String,
    from: String,
}

impl HttpMailer {
    pub fn new(api_url: String, api_key: String, config: &MailConfig) -> Result<Self, MailError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(HttpMailer {
            http,
            api_url,
            api_key,
            from: config.from.clone(),
        })
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn send(&self, email: &Email) -> Result<(), MailError> {
        let response = self
            .http
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&SendBody {
                from: &self.from,
                to: [&email.to],
                subject: &email.subject,
                text: &email.text,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(MailError::Api {
                status: status.as_u16(),
                message,
            });
        }

        tracing::info!(to = %email.to, subject = %email.subject, "Email sent");
        Ok(())
    }
}

/// Development mailer.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: &Email) -> Result<(), MailError> {
        tracing::info!(
            to = %email.to,
            subject = %email.subject,
            "Mail API not configured; email logged only"
        );
        tracing::debug!(body = %email.text, "Email body");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_body_shape() {
        let body = SendBody {
            from: "Stall <a@b.example>",
            to: ["c@d.example"],
            subject: "Invoice",
            text: "Thanks",
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["to"][0], "c@d.example");
        assert_eq!(json["subject"], "Invoice");
    }

    #[tokio::test]
    async fn test_log_mailer_accepts_everything() {
        let email = Email {
            to: "c@d.example".into(),
            subject: "Hi".into(),
            text: "Body".into(),
        };
        assert!(LogMailer.send(&email).await.is_ok());
    }
}
