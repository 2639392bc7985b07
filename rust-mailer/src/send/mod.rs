//! Send client: one message, bounded retry, rate-limit classification.
//!
//! ## Retry Flow
//!
//! ```text
//! deliver() ─ Sent ───────────────→ SendOutcome::sent
//!           ─ RateLimited ────────→ SendOutcome::rate_limited (no retry)
//!           ─ Rejected ───────────→ SendOutcome::failed (no retry)
//!           ─ Transient ─ sleep(base · 2^n) ─→ deliver() ... up to max_attempts
//! ```
//!
//! Provider specifics live behind [`SendCapability`], so the policy here can
//! be exercised with a fake provider.

pub mod gmail;
pub mod message;

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;
use tracing::{info, warn};

pub use gmail::GmailCapability;

/// A fully rendered message for one recipient.
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingMessage {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Classified result of a single provider call.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    /// Accepted by the provider, with its message id when reported
    Sent { id: Option<String> },
    /// Server-side hiccup worth retrying
    Transient(String),
    /// Sending quota exhausted; the whole batch must pause
    RateLimited(String),
    /// Permanent failure for this message
    Rejected(String),
}

/// An authenticated handle able to deliver one message at a time.
///
/// An `Err` is an unexpected fault, not a delivery failure: it aborts the
/// whole batch.
#[async_trait]
pub trait SendCapability: Send + Sync {
    async fn deliver(&self, message: &OutgoingMessage) -> anyhow::Result<Delivery>;
}

/// Final state of a message after retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    Sent,
    RateLimited,
    Failed,
}

/// Result of [`send_email`].
#[derive(Debug, Clone, PartialEq)]
pub struct SendOutcome {
    pub status: SendStatus,
    pub error: Option<String>,
    /// Provider calls made, including the final one
    pub attempts: u32,
}

impl SendOutcome {
    fn sent(attempts: u32) -> Self {
        Self {
            status: SendStatus::Sent,
            error: None,
            attempts,
        }
    }

    fn rate_limited(message: String, attempts: u32) -> Self {
        Self {
            status: SendStatus::RateLimited,
            error: Some(message),
            attempts,
        }
    }

    fn failed(message: String, attempts: u32) -> Self {
        Self {
            status: SendStatus::Failed,
            error: Some(message),
            attempts,
        }
    }
}

/// Bounded exponential backoff for transient errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1))
    }
}

impl RetryPolicy {
    /// At least one attempt is always made.
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay slept after failed attempt `attempt` (0-based): `base · 2^attempt`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }
}

/// Send one email through `capability`, retrying transient errors.
pub async fn send_email(
    capability: &dyn SendCapability,
    policy: &RetryPolicy,
    to: &str,
    subject: &str,
    body: &str,
) -> anyhow::Result<SendOutcome> {
    let message = OutgoingMessage {
        to: to.to_string(),
        subject: subject.to_string(),
        body: body.to_string(),
    };

    let mut last_error = String::new();

    for attempt in 0..policy.max_attempts() {
        let attempts = attempt + 1;

        match capability.deliver(&message).await? {
            Delivery::Sent { id } => {
                info!(to = %to, message_id = ?id, attempts = attempts, "send_delivered");
                return Ok(SendOutcome::sent(attempts));
            }
            Delivery::RateLimited(reason) => {
                warn!(to = %to, reason = %reason, "send_rate_limited");
                return Ok(SendOutcome::rate_limited(reason, attempts));
            }
            Delivery::Rejected(reason) => {
                return Ok(SendOutcome::failed(reason, attempts));
            }
            Delivery::Transient(reason) => {
                if attempts < policy.max_attempts() {
                    let delay = policy.backoff(attempt);
                    warn!(
                        to = %to,
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        reason = %reason,
                        "send_transient_retrying"
                    );
                    sleep(delay).await;
                }
                last_error = reason;
            }
        }
    }

    Ok(SendOutcome::failed(
        format!(
            "Failed after {} attempts: {}",
            policy.max_attempts(),
            last_error
        ),
        policy.max_attempts(),
    ))
}
