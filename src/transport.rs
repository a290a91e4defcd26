//! SMS provider transport.
//!
//! `SmsTransport` is the seam between the engine and the wire. The HTTP
//! implementation posts to a provider message endpoint and normalizes
//! the provider's delivery-status vocabulary; tests use `MockTransport`.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::TransportError;

/// Provider delivery status, normalized from the provider's strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    Queued,
    Sent,
    Delivered,
    Failed,
}

impl DeliveryStatus {
    /// Normalize the provider's status vocabulary. Unknown values map
    /// to `Queued` so a new provider string never fails a send that
    /// the provider accepted.
    pub fn parse(s: &str) -> DeliveryStatus {
        match s.to_ascii_lowercase().as_str() {
            "sent" => DeliveryStatus::Sent,
            "delivered" => DeliveryStatus::Delivered,
            "failed" | "undelivered" => DeliveryStatus::Failed,
            _ => DeliveryStatus::Queued,
        }
    }
}

/// Receipt for an accepted outbound message.
#[derive(Debug, Clone)]
pub struct SendReceipt {
    /// Provider-assigned message id (SID).
    pub message_id: String,
    pub status: DeliveryStatus,
}

/// Outbound SMS delivery.
#[async_trait]
pub trait SmsTransport: Send + Sync {
    async fn send(
        &self,
        from_phone: &str,
        to_phone: &str,
        body: &str,
    ) -> Result<SendReceipt, TransportError>;
}

// ── HTTP implementation ─────────────────────────────────────────────

const SEND_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Deserialize)]
struct ProviderResponse {
    #[serde(alias = "sid", alias = "MessageSid")]
    message_id: Option<String>,
    #[serde(alias = "Status")]
    status: Option<String>,
}

/// HTTP transport for a provider message API.
pub struct HttpTransport {
    base_url: String,
    api_key: SecretString,
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(base_url: String, api_key: SecretString) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(SEND_TIMEOUT)
            .build()
            .map_err(|e| TransportError::Http(e.to_string()))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            client,
        })
    }
}

#[async_trait]
impl SmsTransport for HttpTransport {
    async fn send(
        &self,
        from_phone: &str,
        to_phone: &str,
        body: &str,
    ) -> Result<SendReceipt, TransportError> {
        let payload = serde_json::json!({
            "From": from_phone,
            "To": to_phone,
            "Body": body,
        });

        let resp = self
            .client
            .post(format!("{}/Messages.json", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout {
                        timeout: SEND_TIMEOUT,
                    }
                } else {
                    TransportError::SendFailed {
                        to: to_phone.to_string(),
                        reason: e.to_string(),
                    }
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            warn!(to = %to_phone, %status, "Provider rejected send");
            return Err(TransportError::Rejected {
                to: to_phone.to_string(),
                status: format!("{status}: {detail}"),
            });
        }

        let parsed: ProviderResponse = resp
            .json()
            .await
            .map_err(|e| TransportError::Http(format!("response parse: {e}")))?;

        let receipt = SendReceipt {
            message_id: parsed
                .message_id
                .unwrap_or_else(|| format!("local-{}", Uuid::new_v4())),
            status: parsed
                .status
                .as_deref()
                .map(DeliveryStatus::parse)
                .unwrap_or(DeliveryStatus::Queued),
        };
        debug!(to = %to_phone, message_id = %receipt.message_id, "SMS accepted by provider");
        Ok(receipt)
    }
}

// ── Mock implementation ─────────────────────────────────────────────

/// Records sends instead of delivering them. Test collaborator.
#[derive(Default)]
pub struct MockTransport {
    sent: tokio::sync::Mutex<Vec<(String, String, String)>>,
    fail_next: std::sync::atomic::AtomicBool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// (from, to, body) tuples in send order.
    pub async fn sent(&self) -> Vec<(String, String, String)> {
        self.sent.lock().await.clone()
    }

    pub async fn sent_count(&self) -> usize {
        self.sent.lock().await.len()
    }

    /// Make the next send fail with a provider rejection.
    pub fn fail_next(&self) {
        self.fail_next
            .store(true, std::sync::atomic::Ordering::SeqCst);
    }
}

#[async_trait]
impl SmsTransport for MockTransport {
    async fn send(
        &self,
        from_phone: &str,
        to_phone: &str,
        body: &str,
    ) -> Result<SendReceipt, TransportError> {
        if self.fail_next.swap(false, std::sync::atomic::Ordering::SeqCst) {
            return Err(TransportError::Rejected {
                to: to_phone.to_string(),
                status: "500: simulated".to_string(),
            });
        }
        let mut sent = self.sent.lock().await;
        sent.push((
            from_phone.to_string(),
            to_phone.to_string(),
            body.to_string(),
        ));
        Ok(SendReceipt {
            message_id: format!("MOCK-{}", sent.len()),
            status: DeliveryStatus::Queued,
        })
    }
}
