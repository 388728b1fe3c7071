//! Scheduled-delivery consumer — posts scheduler-fired summaries to their
//! target channels.

use std::sync::Arc;

use serenity::builder::CreateMessage;
use serenity::model::id::ChannelId;
use tracing::{info, warn};

use recap_core::types::{ChannelDelivery, SinkFormat};

/// Background task that receives summaries from the scheduler's channel
/// sink and posts them.
///
/// Spawned once in `adapter.rs` after the serenity client is built. The
/// `Arc<Http>` is a REST client, so it keeps working across gateway
/// reconnects.
pub async fn run_delivery(
    http: Arc<serenity::http::Http>,
    mut rx: tokio::sync::mpsc::Receiver<ChannelDelivery>,
) {
    while let Some(delivery) = rx.recv().await {
        let raw_id = match delivery.channel_id.parse::<u64>() {
            Ok(id) if id != 0 => id,
            _ => {
                warn!(channel = %delivery.channel_id, "delivery skipped: bad channel id");
                continue;
            }
        };
        let channel = ChannelId::new(raw_id);

        let result = match delivery.format {
            SinkFormat::Embed => {
                let embed =
                    crate::embed::summary_embed(&delivery.summary, &delivery.channel_id);
                channel
                    .send_message(&http, CreateMessage::new().embed(embed))
                    .await
                    .map(|_| ())
            }
            SinkFormat::Text => {
                crate::send::send_chunked(&http, channel, &render_text(&delivery)).await
            }
            SinkFormat::Json => {
                let body = serde_json::to_string_pretty(&delivery.summary)
                    .unwrap_or_else(|e| format!("serialization failed: {e}"));
                crate::send::send_chunked(&http, channel, &format!("```json\n{body}\n```")).await
            }
        };

        match result {
            Ok(()) => {
                info!(channel = %delivery.channel_id, summary = %delivery.summary.id, "scheduled summary delivered")
            }
            Err(e) => {
                warn!(channel = %delivery.channel_id, error = %e, "scheduled delivery failed")
            }
        }
    }

    info!("discord delivery task exiting (channel closed)");
}

fn render_text(delivery: &ChannelDelivery) -> String {
    let summary = &delivery.summary;
    let mut out = format!(
        "**Scheduled summary** ({} – {})\n{}\n",
        summary.start.format("%Y-%m-%d %H:%M"),
        summary.end.format("%Y-%m-%d %H:%M"),
        summary.body,
    );
    for point in &summary.key_points {
        out.push_str(&format!("• {point}\n"));
    }
    out
}
