//! Gmail REST API delivery.
//!
//! Maps Gmail's HTTP responses onto [`Delivery`] so the retry policy stays
//! provider-agnostic.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use super::message::{build_mime, encode_raw};
use super::{Delivery, OutgoingMessage, SendCapability};

/// Error reasons Gmail reports with a 403 when a sending quota is exhausted.
const RATE_LIMIT_REASONS: &[&str] = &["userRateLimitExceeded", "rateLimitExceeded", "quotaExceeded"];

/// Authenticated Gmail send handle.
#[derive(Clone)]
pub struct GmailCapability {
    client: Client,
    api_base: String,
    access_token: String,
}

impl GmailCapability {
    pub fn new(client: Client, api_base: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            client,
            api_base: api_base.into(),
            access_token: access_token.into(),
        }
    }

    fn send_url(&self) -> String {
        format!(
            "{}/gmail/v1/users/me/messages/send",
            self.api_base.trim_end_matches('/')
        )
    }
}

#[derive(Serialize)]
struct SendRequest<'a> {
    raw: &'a str,
}

#[derive(Deserialize)]
struct SendResponse {
    id: String,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorEnvelope {
    #[serde(default)]
    error: ErrorBody,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    errors: Vec<ErrorDetail>,
    #[serde(default)]
    details: Vec<ErrorDetail>,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    reason: Option<String>,
}

#[async_trait]
impl SendCapability for GmailCapability {
    async fn deliver(&self, message: &OutgoingMessage) -> anyhow::Result<Delivery> {
        let raw = encode_raw(&build_mime(&message.to, &message.subject, &message.body));

        let response = self
            .client
            .post(self.send_url())
            .bearer_auth(&self.access_token)
            .json(&SendRequest { raw: &raw })
            .send()
            .await;

        let response = match response {
            Ok(resp) => resp,
            Err(e) => {
                error!(to = %message.to, error = %e, is_timeout = e.is_timeout(), "gmail_send_transport_error");
                return Ok(Delivery::Rejected(format!("Unexpected error: {}", e)));
            }
        };

        let status = response.status().as_u16();

        if response.status().is_success() {
            let id = response.json::<SendResponse>().await.ok().map(|r| r.id);
            info!(to = %message.to, status_code = status, message_id = ?id, "gmail_send_accepted");
            return Ok(Delivery::Sent { id });
        }

        let body = response.text().await.unwrap_or_default();
        let delivery = classify_error(status, &body);

        error!(
            to = %message.to,
            status_code = status,
            delivery = ?delivery,
            "gmail_send_error"
        );

        Ok(delivery)
    }
}

/// Classify a non-2xx Gmail response.
fn classify_error(status: u16, body: &str) -> Delivery {
    let envelope: ErrorEnvelope = serde_json::from_str(body).unwrap_or_default();
    let message = if envelope.error.message.is_empty() {
        body.trim().to_string()
    } else {
        envelope.error.message.clone()
    };

    let quota_reason = envelope
        .error
        .errors
        .iter()
        .chain(envelope.error.details.iter())
        .filter_map(|d| d.reason.as_deref())
        .any(|reason| RATE_LIMIT_REASONS.contains(&reason));

    match status {
        429 => Delivery::RateLimited(format!("Rate limit exceeded: {}", message)),
        403 if quota_reason => Delivery::RateLimited(format!("Gmail rate limit: {}", message)),
        500 | 503 => Delivery::Transient(format!("HTTP Error {}: {}", status, message)),
        _ => Delivery::Rejected(format!("HTTP Error {}: {}", status, message)),
    }
}
