use super::{Email, EmailTransport};
use crate::error::DeliveryError;
use async_trait::async_trait;
use log::info;

/// Stand-in used when no mail provider is configured: logs the message and
/// reports success.
pub struct LogTransport;

#[async_trait]
impl EmailTransport for LogTransport {
    async fn send(&self, email: &Email) -> Result<String, DeliveryError> {
        info!(
            "[mail] to={} subject='{}' attachment={} ({} bytes)",
            email.recipients.join(","),
            email.subject,
            email.attachment.filename,
            email.attachment.content.len()
        );
        Ok(format!("logged-{}", uuid::Uuid::new_v4()))
    }
}
