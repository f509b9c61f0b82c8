//! Email delivery of finished reports.
//!
//! [`Dispatcher`] wraps an [`EmailTransport`] with recipient checks and a
//! retry loop. Transient failures (network errors, 408, 429, 5xx) are
//! retried with exponential backoff; permanent ones are recorded verbatim
//! on the first occurrence. The dispatcher never fails a run: it returns a
//! [`DeliveryOutcome`] and the caller decides the report status.

mod log_transport;
mod sendgrid;

pub use log_transport::LogTransport;
pub use sendgrid::SendGridTransport;

use crate::config::DeliverySettings;
use crate::error::DeliveryError;
use async_trait::async_trait;
use chrono::Utc;
use common::model::report::{DeliveryOutcome, DeliveryStatus};
use log::{info, warn};
use regex::Regex;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    pub content: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct Email {
    pub recipients: Vec<String>,
    pub subject: String,
    pub body: String,
    pub attachment: Attachment,
}

/// Sends one message. Returns the provider's message id.
#[async_trait]
pub trait EmailTransport: Send + Sync {
    async fn send(&self, email: &Email) -> Result<String, DeliveryError>;
}

fn email_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9\-]+(\.[A-Za-z0-9\-]+)*\.[A-Za-z]{2,}$").ok()
    })
    .as_ref()
}

/// Local syntax check applied before anything is sent.
pub fn is_valid_recipient(address: &str) -> bool {
    email_re().is_some_and(|re| re.is_match(address.trim()))
}

pub struct Dispatcher {
    transport: Arc<dyn EmailTransport>,
    max_attempts: u32,
    initial_backoff: Duration,
}

impl Dispatcher {
    pub fn new(transport: Arc<dyn EmailTransport>, max_attempts: u32, initial_backoff: Duration) -> Self {
        Self {
            transport,
            max_attempts: max_attempts.max(1),
            initial_backoff,
        }
    }

    /// SendGrid when an API key is configured, otherwise the logging transport.
    pub fn from_settings(settings: &DeliverySettings) -> Result<Self, reqwest::Error> {
        let transport: Arc<dyn EmailTransport> = match &settings.sendgrid_api_key {
            Some(key) => Arc::new(SendGridTransport::new(key.clone(), settings.from_email.clone())?),
            None => {
                warn!("SENDGRID_API_KEY is not set, reports will be logged instead of emailed");
                Arc::new(LogTransport)
            }
        };
        Ok(Self::new(transport, settings.max_attempts, settings.initial_backoff))
    }

    pub async fn deliver(&self, email: &Email) -> DeliveryOutcome {
        let outcome = |status: DeliveryStatus, attempts: u32, message_id: Option<String>, error: Option<String>| DeliveryOutcome {
            recipients: email.recipients.clone(),
            status,
            attempts,
            message_id,
            error,
            at: Utc::now(),
        };

        let invalid: Vec<&str> = email
            .recipients
            .iter()
            .map(String::as_str)
            .filter(|r| !is_valid_recipient(r))
            .collect();
        if email.recipients.is_empty() || !invalid.is_empty() {
            let error = if invalid.is_empty() {
                "no recipients".to_string()
            } else {
                format!("invalid recipient address: {}", invalid.join(", "))
            };
            warn!("delivery of '{}' rejected: {}", email.subject, error);
            return outcome(DeliveryStatus::Failed, 0, None, Some(error));
        }

        let mut attempt = 0;
        let mut backoff = self.initial_backoff;
        loop {
            attempt += 1;
            match self.transport.send(email).await {
                Ok(message_id) => {
                    info!(
                        "delivered '{}' to {} recipient(s) on attempt {}",
                        email.subject,
                        email.recipients.len(),
                        attempt
                    );
                    return outcome(DeliveryStatus::Delivered, attempt, Some(message_id), None);
                }
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    warn!(
                        "delivery attempt {}/{} failed, retrying in {:?}: {}",
                        attempt, self.max_attempts, backoff, e
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                }
                Err(e) => {
                    warn!("delivery of '{}' failed after {} attempt(s): {}", email.subject, attempt, e);
                    return outcome(DeliveryStatus::Failed, attempt, None, Some(e.detail().to_string()));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct Scripted {
        replies: Mutex<Vec<Result<String, DeliveryError>>>,
        calls: Mutex<u32>,
    }

    impl Scripted {
        fn new(mut replies: Vec<Result<String, DeliveryError>>) -> Arc<Self> {
            replies.reverse();
            Arc::new(Self {
                replies: Mutex::new(replies),
                calls: Mutex::new(0),
            })
        }
    }

    #[async_trait]
    impl EmailTransport for Scripted {
        async fn send(&self, _email: &Email) -> Result<String, DeliveryError> {
            *self.calls.lock() += 1;
            self.replies
                .lock()
                .pop()
                .unwrap_or_else(|| Ok("default".to_string()))
        }
    }

    fn email(recipients: &[&str]) -> Email {
        Email {
            recipients: recipients.iter().map(|r| r.to_string()).collect(),
            subject: "Weekly".into(),
            body: "Attached".into(),
            attachment: Attachment {
                filename: "weekly.pdf".into(),
                content_type: "application/pdf".into(),
                content: b"%PDF".to_vec(),
            },
        }
    }

    #[test]
    fn recipient_syntax() {
        assert!(is_valid_recipient("ops@example.com"));
        assert!(is_valid_recipient(" first.last+tag@mail.example.co.uk "));
        assert!(!is_valid_recipient("ops@"));
        assert!(!is_valid_recipient("not an address"));
        assert!(!is_valid_recipient("a@b"));
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let transport = Scripted::new(vec![
            Err(DeliveryError::Transient("503".into())),
            Err(DeliveryError::Transient("429".into())),
            Ok("msg-1".into()),
        ]);
        let dispatcher = Dispatcher::new(transport.clone(), 3, Duration::from_millis(1));
        let outcome = dispatcher.deliver(&email(&["ops@example.com"])).await;
        assert_eq!(outcome.status, DeliveryStatus::Delivered);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.message_id.as_deref(), Some("msg-1"));
    }

    #[tokio::test]
    async fn permanent_failures_stop_immediately() {
        let transport = Scripted::new(vec![Err(DeliveryError::Permanent("sender not verified".into()))]);
        let dispatcher = Dispatcher::new(transport.clone(), 5, Duration::from_millis(1));
        let outcome = dispatcher.deliver(&email(&["ops@example.com"])).await;
        assert_eq!(outcome.status, DeliveryStatus::Failed);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.error.as_deref(), Some("sender not verified"));
        assert_eq!(*transport.calls.lock(), 1);
    }

    #[tokio::test]
    async fn invalid_recipients_are_never_sent() {
        let transport = Scripted::new(vec![]);
        let dispatcher = Dispatcher::new(transport.clone(), 3, Duration::from_millis(1));
        let outcome = dispatcher.deliver(&email(&["ops@example.com", "bogus@"])).await;
        assert_eq!(outcome.status, DeliveryStatus::Failed);
        assert_eq!(outcome.attempts, 0);
        assert_eq!(outcome.error.as_deref(), Some("invalid recipient address: bogus@"));
        assert_eq!(*transport.calls.lock(), 0);
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let transport = Scripted::new(vec![
            Err(DeliveryError::Transient("timeout".into())),
            Err(DeliveryError::Transient("timeout".into())),
        ]);
        let dispatcher = Dispatcher::new(transport.clone(), 2, Duration::from_millis(1));
        let outcome = dispatcher.deliver(&email(&["ops@example.com"])).await;
        assert_eq!(outcome.status, DeliveryStatus::Failed);
        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.error.as_deref(), Some("timeout"));
    }
}
