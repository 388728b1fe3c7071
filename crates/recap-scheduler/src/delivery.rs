//! Delivery fan-out for scheduled summaries.
//!
//! Channel sinks hand the summary to the chat adapter through a bounded
//! mpsc channel (the adapter side posts the embed). Webhook sinks POST the
//! summary as JSON, signed with the guild's webhook secret when one is
//! configured. Destinations are attempted in order; each outcome is
//! recorded on the execution.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use tokio::sync::mpsc;
use tracing::warn;

use recap_core::types::{ChannelDelivery, DeliveryResult, Destination, SinkKind, Summary};

type HmacSha256 = Hmac<Sha256>;

/// Signature header on signed webhook deliveries, GitHub-style.
pub const SIGNATURE_HEADER: &str = "X-Recap-Signature-256";

pub struct Deliverer {
    channel_tx: Option<mpsc::Sender<ChannelDelivery>>,
    http: reqwest::Client,
}

impl Deliverer {
    /// `channel_tx` is `None` when no chat adapter is connected; channel
    /// sinks then fail with a recorded error instead of silently dropping.
    pub fn new(channel_tx: Option<mpsc::Sender<ChannelDelivery>>) -> Self {
        Self {
            channel_tx,
            http: reqwest::Client::new(),
        }
    }

    pub async fn deliver(
        &self,
        destination: &Destination,
        summary: &Summary,
        webhook_secret: Option<&str>,
    ) -> DeliveryResult {
        let outcome = match destination.sink {
            SinkKind::Channel => self.deliver_channel(destination, summary).await,
            SinkKind::Webhook => {
                self.deliver_webhook(destination, summary, webhook_secret)
                    .await
            }
            SinkKind::Email => Err("unsupported sink kind: email".to_string()),
        };

        match outcome {
            Ok(()) => DeliveryResult {
                sink: destination.sink,
                target: destination.target.clone(),
                ok: true,
                error: None,
            },
            Err(e) => {
                warn!(sink = %destination.sink, target = %destination.target, error = %e, "delivery failed");
                DeliveryResult {
                    sink: destination.sink,
                    target: destination.target.clone(),
                    ok: false,
                    error: Some(e),
                }
            }
        }
    }

    async fn deliver_channel(
        &self,
        destination: &Destination,
        summary: &Summary,
    ) -> Result<(), String> {
        let tx = self
            .channel_tx
            .as_ref()
            .ok_or_else(|| "no chat adapter connected".to_string())?;
        tx.send(ChannelDelivery {
            channel_id: destination.target.clone(),
            summary: summary.clone(),
            format: destination.format,
        })
        .await
        .map_err(|_| "chat adapter delivery channel closed".to_string())
    }

    async fn deliver_webhook(
        &self,
        destination: &Destination,
        summary: &Summary,
        secret: Option<&str>,
    ) -> Result<(), String> {
        let body = serde_json::to_vec(summary).map_err(|e| e.to_string())?;

        let mut request = self
            .http
            .post(&destination.target)
            .header("content-type", "application/json")
            .body(body.clone());

        if let Some(secret) = secret {
            let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
                .map_err(|_| "invalid webhook secret length".to_string())?;
            mac.update(&body);
            let signature = format!("sha256={}", hex::encode(mac.finalize().into_bytes()));
            request = request.header(SIGNATURE_HEADER, signature);
        }

        let response = request.send().await.map_err(|e| e.to_string())?;
        if !response.status().is_success() {
            return Err(format!("webhook returned {}", response.status()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use recap_core::types::{GenerationMetadata, SinkFormat};

    fn summary() -> Summary {
        Summary {
            id: "s1".into(),
            channel_id: "c1".into(),
            guild_id: "g1".into(),
            start: Utc::now(),
            end: Utc::now(),
            message_count: 5,
            body: "body".into(),
            key_points: Vec::new(),
            action_items: Vec::new(),
            technical_terms: Vec::new(),
            participants: Vec::new(),
            metadata: GenerationMetadata {
                model: "m".into(),
                prompt_tokens: 0,
                completion_tokens: 0,
                duration_ms: 0,
                cost_usd: 0.0,
            },
            created_at: Utc::now(),
            warnings: Vec::new(),
        }
    }

    #[tokio::test]
    async fn channel_delivery_reaches_the_adapter() {
        let (tx, mut rx) = mpsc::channel(4);
        let deliverer = Deliverer::new(Some(tx));
        let dest = Destination {
            sink: SinkKind::Channel,
            target: "chan-9".into(),
            format: SinkFormat::Embed,
        };

        let result = deliverer.deliver(&dest, &summary(), None).await;
        assert!(result.ok);

        let delivered = rx.recv().await.unwrap();
        assert_eq!(delivered.channel_id, "chan-9");
        assert_eq!(delivered.summary.id, "s1");
    }

    #[tokio::test]
    async fn channel_delivery_without_adapter_records_failure() {
        let deliverer = Deliverer::new(None);
        let dest = Destination {
            sink: SinkKind::Channel,
            target: "chan-9".into(),
            format: SinkFormat::Embed,
        };
        let result = deliverer.deliver(&dest, &summary(), None).await;
        assert!(!result.ok);
        assert!(result.error.unwrap().contains("no chat adapter"));
    }

    #[tokio::test]
    async fn email_sink_is_rejected_explicitly() {
        let deliverer = Deliverer::new(None);
        let dest = Destination {
            sink: SinkKind::Email,
            target: "ops@example.test".into(),
            format: SinkFormat::Text,
        };
        let result = deliverer.deliver(&dest, &summary(), None).await;
        assert!(!result.ok);
        assert!(result.error.unwrap().contains("unsupported sink"));
    }
}
