use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{RecapError, Result};
use crate::types::LengthProfile;

pub const DEFAULT_MIN_MESSAGES: usize = 5;
pub const DEFAULT_TEMPERATURE: f32 = 0.3;
pub const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 2048;

/// Options controlling a single summarization, also stored as a guild's
/// defaults and on scheduled tasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryOptions {
    #[serde(default)]
    pub length: LengthProfile,
    #[serde(default)]
    pub include_bots: bool,
    /// User IDs whose messages are dropped before summarization.
    #[serde(default)]
    pub excluded_users: Vec<String>,
    #[serde(default = "default_min_messages")]
    pub min_messages: usize,
    /// Opaque model identifier; `None` uses the configured default.
    pub model: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
}

impl Default for SummaryOptions {
    fn default() -> Self {
        Self {
            length: LengthProfile::default(),
            include_bots: false,
            excluded_users: Vec::new(),
            min_messages: DEFAULT_MIN_MESSAGES,
            model: None,
            temperature: DEFAULT_TEMPERATURE,
            max_output_tokens: DEFAULT_MAX_OUTPUT_TOKENS,
        }
    }
}

impl SummaryOptions {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.temperature) {
            return Err(RecapError::UserInput(format!(
                "temperature must be within 0.0-1.0, got {}",
                self.temperature
            )));
        }
        if self.min_messages == 0 {
            return Err(RecapError::UserInput(
                "min_messages must be at least 1".to_string(),
            ));
        }
        if self.max_output_tokens == 0 {
            return Err(RecapError::UserInput(
                "max_output_tokens must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// A single summarization request. Transient — never persisted directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryRequest {
    pub channel_id: String,
    pub guild_id: String,
    /// Half-open window [start, end).
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(default)]
    pub options: SummaryOptions,
}

impl SummaryRequest {
    pub fn validate(&self) -> Result<()> {
        if self.channel_id.is_empty() || self.guild_id.is_empty() {
            return Err(RecapError::UserInput(
                "channel and guild identifiers are required".to_string(),
            ));
        }
        if self.start >= self.end {
            return Err(RecapError::UserInput(format!(
                "time window start ({}) must precede end ({})",
                self.start, self.end
            )));
        }
        self.options.validate()
    }

    /// Stable hash of the request's semantic content.
    ///
    /// Built over (channel, window, canonically ordered option key/value
    /// pairs) so two requests that agree on normalized options hash
    /// identically regardless of how the options were assembled.
    pub fn fingerprint(&self) -> String {
        let mut pairs: BTreeMap<&str, String> = BTreeMap::new();
        pairs.insert("length", self.options.length.to_string());
        pairs.insert("include_bots", self.options.include_bots.to_string());
        let mut excluded = self.options.excluded_users.clone();
        excluded.sort();
        excluded.dedup();
        pairs.insert("excluded_users", excluded.join(","));
        pairs.insert("min_messages", self.options.min_messages.to_string());
        pairs.insert(
            "model",
            self.options.model.clone().unwrap_or_default(),
        );
        // Fixed precision keeps 0.3 and 0.30 equal.
        pairs.insert("temperature", format!("{:.4}", self.options.temperature));
        pairs.insert(
            "max_output_tokens",
            self.options.max_output_tokens.to_string(),
        );

        let mut hasher = Sha256::new();
        hasher.update(self.channel_id.as_bytes());
        hasher.update(b"\x1f");
        hasher.update(self.start.timestamp_millis().to_be_bytes());
        hasher.update(self.end.timestamp_millis().to_be_bytes());
        for (k, v) in &pairs {
            hasher.update(k.as_bytes());
            hasher.update(b"=");
            hasher.update(v.as_bytes());
            hasher.update(b"\x1f");
        }
        hex::encode(hasher.finalize())
    }
}

fn default_min_messages() -> usize {
    DEFAULT_MIN_MESSAGES
}
fn default_temperature() -> f32 {
    DEFAULT_TEMPERATURE
}
fn default_max_output_tokens() -> u32 {
    DEFAULT_MAX_OUTPUT_TOKENS
}
