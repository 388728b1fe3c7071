use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{Result, SourceError};
use crate::source::{MessageSource, RawMessage};

/// In-memory message source for the test suites.
///
/// Seed channels with [`MemorySource::push`], deny access per user/channel
/// with [`MemorySource::deny_read`], and observe fetch traffic through
/// [`MemorySource::fetch_calls`].
#[derive(Default)]
pub struct MemorySource {
    channels: Mutex<HashMap<String, Vec<RawMessage>>>,
    channel_names: Mutex<HashMap<String, String>>,
    denied_reads: Mutex<HashMap<String, Vec<String>>>,
    roles: Mutex<HashMap<(String, String), Vec<String>>>,
    missing_channels: Mutex<Vec<String>>,
    fetch_calls: AtomicUsize,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, channel_id: &str, message: RawMessage) {
        self.channels
            .lock()
            .unwrap()
            .entry(channel_id.to_string())
            .or_default()
            .push(message);
    }

    pub fn set_channel_name(&self, channel_id: &str, name: &str) {
        self.channel_names
            .lock()
            .unwrap()
            .insert(channel_id.to_string(), name.to_string());
    }

    pub fn deny_read(&self, user_id: &str, channel_id: &str) {
        self.denied_reads
            .lock()
            .unwrap()
            .entry(channel_id.to_string())
            .or_default()
            .push(user_id.to_string());
    }

    pub fn set_roles(&self, user_id: &str, guild_id: &str, roles: Vec<String>) {
        self.roles
            .lock()
            .unwrap()
            .insert((user_id.to_string(), guild_id.to_string()), roles);
    }

    /// Subsequent fetches from this channel fail with `NotFound`.
    pub fn remove_channel(&self, channel_id: &str) {
        self.missing_channels
            .lock()
            .unwrap()
            .push(channel_id.to_string());
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    /// Convenience builder for a plain user message.
    pub fn message(
        id: &str,
        author_id: &str,
        author_name: &str,
        timestamp: DateTime<Utc>,
        content: &str,
    ) -> RawMessage {
        RawMessage {
            id: id.to_string(),
            author_id: author_id.to_string(),
            author_name: author_name.to_string(),
            author_is_bot: false,
            timestamp,
            content: content.to_string(),
            is_system: false,
            mentions: Vec::new(),
            attachments: Vec::new(),
            thread_id: None,
            reply_to: None,
        }
    }
}

#[async_trait]
impl MessageSource for MemorySource {
    fn name(&self) -> &str {
        "memory"
    }

    async fn fetch_range(
        &self,
        channel_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: Option<usize>,
    ) -> Result<Vec<RawMessage>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);

        if self
            .missing_channels
            .lock()
            .unwrap()
            .iter()
            .any(|c| c == channel_id)
        {
            return Err(SourceError::NotFound {
                channel_id: channel_id.to_string(),
            });
        }

        let channels = self.channels.lock().unwrap();
        let mut messages: Vec<RawMessage> = channels
            .get(channel_id)
            .map(|msgs| {
                msgs.iter()
                    .filter(|m| m.timestamp >= start && m.timestamp < end)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        messages.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
        if let Some(cap) = limit {
            messages.truncate(cap);
        }
        Ok(messages)
    }

    async fn has_read_access(&self, user_id: &str, channel_id: &str) -> Result<bool> {
        let denied = self.denied_reads.lock().unwrap();
        Ok(!denied
            .get(channel_id)
            .map(|users| users.iter().any(|u| u == user_id))
            .unwrap_or(false))
    }

    async fn resolve_user_roles(&self, user_id: &str, guild_id: &str) -> Result<Vec<String>> {
        Ok(self
            .roles
            .lock()
            .unwrap()
            .get(&(user_id.to_string(), guild_id.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn channel_name(&self, channel_id: &str) -> Result<String> {
        Ok(self
            .channel_names
            .lock()
            .unwrap()
            .get(channel_id)
            .cloned()
            .unwrap_or_else(|| format!("channel-{channel_id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[tokio::test]
    async fn fetch_filters_window_and_sorts() {
        let source = MemorySource::new();
        let base = Utc.with_ymd_and_hms(2026, 7, 1, 12, 0, 0).unwrap();
        // Inserted out of order on purpose.
        source.push("c1", MemorySource::message("m2", "u1", "Ana", base + chrono::Duration::minutes(2), "two"));
        source.push("c1", MemorySource::message("m1", "u1", "Ana", base, "one"));
        source.push("c1", MemorySource::message("m3", "u1", "Ana", base + chrono::Duration::hours(5), "outside"));

        let got = source
            .fetch_range("c1", base, base + chrono::Duration::hours(1), None)
            .await
            .unwrap();
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].id, "m1");
        assert_eq!(got[1].id, "m2");
        assert_eq!(source.fetch_calls(), 1);
    }

    #[tokio::test]
    async fn denied_users_lose_read_access() {
        let source = MemorySource::new();
        source.deny_read("u2", "c1");
        assert!(source.has_read_access("u1", "c1").await.unwrap());
        assert!(!source.has_read_access("u2", "c1").await.unwrap());
    }
}
