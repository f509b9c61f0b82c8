//! SendGrid v3 mail transport.

use super::{Email, EmailTransport};
use crate::error::DeliveryError;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::time::Duration;

const SEND_URL: &str = "https://api.sendgrid.com/v3/mail/send";

pub struct SendGridTransport {
    client: reqwest::Client,
    api_key: String,
    from_email: String,
    url: String,
}

/// 408, 429 and every 5xx are worth retrying; any other rejection is final.
pub fn classify(status: StatusCode, body: &str) -> DeliveryError {
    let detail = if body.trim().is_empty() {
        format!("SendGrid responded {}", status)
    } else {
        format!("SendGrid responded {}: {}", status, body.trim())
    };
    if status == StatusCode::REQUEST_TIMEOUT || status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        DeliveryError::Transient(detail)
    } else {
        DeliveryError::Permanent(detail)
    }
}

impl SendGridTransport {
    pub fn new(api_key: String, from_email: String) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            api_key,
            from_email,
            url: SEND_URL.to_string(),
        })
    }

    /// Points the transport at another endpoint, e.g. a local mock.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn payload(&self, email: &Email) -> Value {
        let to: Vec<Value> = email.recipients.iter().map(|r| json!({ "email": r.trim() })).collect();
        json!({
            "personalizations": [{ "to": to }],
            "from": { "email": self.from_email },
            "subject": email.subject,
            "content": [{ "type": "text/plain", "value": email.body }],
            "attachments": [{
                "content": STANDARD.encode(&email.attachment.content),
                "filename": email.attachment.filename,
                "type": email.attachment.content_type,
                "disposition": "attachment",
            }],
        })
    }
}

#[async_trait]
impl EmailTransport for SendGridTransport {
    async fn send(&self, email: &Email) -> Result<String, DeliveryError> {
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&self.payload(email))
            .send()
            .await
            .map_err(|e| DeliveryError::Transient(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            let message_id = response
                .headers()
                .get("X-Message-Id")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("accepted")
                .to_string();
            return Ok(message_id);
        }
        let body = response.text().await.unwrap_or_default();
        Err(classify(status, &body))
    }
}
