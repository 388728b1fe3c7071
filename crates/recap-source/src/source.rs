use async_trait::async_trait;
use chrono::{DateTime, Utc};

use recap_core::types::AttachmentInfo;

use crate::error::Result;

/// A platform message before filtering and normalization.
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub id: String,
    pub author_id: String,
    pub author_name: String,
    pub author_is_bot: bool,
    pub timestamp: DateTime<Utc>,
    pub content: String,
    /// Platform system message (join/leave/pin/boost announcements).
    pub is_system: bool,
    /// Mentioned users as (id, display name) so the normalizer can rewrite
    /// raw mention tokens without further lookups.
    pub mentions: Vec<(String, String)>,
    pub attachments: Vec<AttachmentInfo>,
    pub thread_id: Option<String>,
    pub reply_to: Option<String>,
}

/// Capability set the pipeline consumes from the chat platform.
///
/// Implementations must return messages in ascending (timestamp, id) order
/// and absorb the platform's rate limiting internally — callers never see a
/// rate-limit error from these methods, only added latency.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Source name for logging.
    fn name(&self) -> &str;

    /// Fetch messages in the half-open window [start, end), ascending.
    /// Truncates at `limit` when provided.
    async fn fetch_range(
        &self,
        channel_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: Option<usize>,
    ) -> Result<Vec<RawMessage>>;

    /// Whether `user_id` can read `channel_id`.
    async fn has_read_access(&self, user_id: &str, channel_id: &str) -> Result<bool>;

    /// Role names the user holds in the guild.
    async fn resolve_user_roles(&self, user_id: &str, guild_id: &str) -> Result<Vec<String>>;

    /// Human-readable channel name, for prompt context and embeds.
    async fn channel_name(&self, channel_id: &str) -> Result<String>;
}
