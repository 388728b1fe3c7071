use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::request::SummaryOptions;

// ---------------------------------------------------------------------------
// Transient message records
// ---------------------------------------------------------------------------

/// A fenced code block extracted from message content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeBlock {
    /// Language tag after the opening fence, if present.
    pub language: Option<String>,
    pub code: String,
}

/// Broad classification of an attachment by content type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentKind {
    Image,
    Video,
    Audio,
    File,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentInfo {
    pub name: String,
    pub size_bytes: u64,
    pub kind: AttachmentKind,
}

/// A chat message after filtering and normalization — the only message shape
/// the prompt builder ever sees.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedMessage {
    pub id: String,
    pub author_id: String,
    pub author_name: String,
    pub author_is_bot: bool,
    pub timestamp: DateTime<Utc>,
    /// Cleaned content: mentions rewritten, code blocks extracted,
    /// whitespace collapsed.
    pub content: String,
    pub code_blocks: Vec<CodeBlock>,
    pub mentions: Vec<String>,
    pub attachments: Vec<AttachmentInfo>,
    pub thread_id: Option<String>,
    pub reply_to: Option<String>,
}

// ---------------------------------------------------------------------------
// Summary
// ---------------------------------------------------------------------------

/// Output length/detail profile for a summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LengthProfile {
    Brief,
    #[default]
    Detailed,
    Comprehensive,
}

impl std::fmt::Display for LengthProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LengthProfile::Brief => "brief",
            LengthProfile::Detailed => "detailed",
            LengthProfile::Comprehensive => "comprehensive",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for LengthProfile {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "brief" => Ok(LengthProfile::Brief),
            "detailed" => Ok(LengthProfile::Detailed),
            "comprehensive" => Ok(LengthProfile::Comprehensive),
            other => Err(format!("unknown length profile: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

/// A follow-up extracted from the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionItem {
    pub description: String,
    pub assignee: Option<String>,
    /// Free text as emitted by the model ("Friday", "2026-08-03", ...).
    pub deadline: Option<String>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub source_message_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TechnicalTerm {
    pub term: String,
    pub definition: String,
    pub source_message_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub user_id: String,
    pub name: String,
    pub message_count: usize,
    /// Notable contributions as short phrases, supplied by the model.
    #[serde(default)]
    pub contributions: Vec<String>,
}

/// Generation cost and latency accounting attached to every summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationMetadata {
    pub model: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub duration_ms: u64,
    pub cost_usd: f64,
}

/// A persisted conversation summary. Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    /// UUID v4 string — primary key.
    pub id: String,
    pub channel_id: String,
    pub guild_id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Messages that survived filtering and fed the prompt.
    pub message_count: usize,
    pub body: String,
    pub key_points: Vec<String>,
    pub action_items: Vec<ActionItem>,
    pub technical_terms: Vec<TechnicalTerm>,
    pub participants: Vec<Participant>,
    pub metadata: GenerationMetadata,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

// ---------------------------------------------------------------------------
// Guild configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PermissionConfig {
    /// Role names allowed to invoke summarize commands. Empty means any
    /// member with channel read access.
    #[serde(default)]
    pub allowed_roles: Vec<String>,
    /// When true, config and schedule mutations require guild admin.
    #[serde(default = "bool_true")]
    pub admin_only_config: bool,
}

/// Per-guild settings, one row per guild.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuildConfig {
    pub guild_id: String,
    #[serde(default)]
    pub enabled_channels: Vec<String>,
    #[serde(default)]
    pub excluded_channels: Vec<String>,
    #[serde(default)]
    pub default_options: SummaryOptions,
    #[serde(default)]
    pub permissions: PermissionConfig,
    #[serde(default)]
    pub webhook_enabled: bool,
    pub webhook_secret: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl GuildConfig {
    pub fn new(guild_id: impl Into<String>) -> Self {
        Self {
            guild_id: guild_id.into(),
            enabled_channels: Vec::new(),
            excluded_channels: Vec::new(),
            default_options: SummaryOptions::default(),
            permissions: PermissionConfig {
                allowed_roles: Vec::new(),
                admin_only_config: true,
            },
            webhook_enabled: false,
            webhook_secret: None,
            updated_at: Utc::now(),
        }
    }

    /// Enabled and excluded channel sets must be disjoint, and the default
    /// options must pass request validation.
    pub fn validate(&self) -> crate::Result<()> {
        for ch in &self.enabled_channels {
            if self.excluded_channels.contains(ch) {
                return Err(crate::RecapError::UserInput(format!(
                    "channel {ch} is both enabled and excluded"
                )));
            }
        }
        self.default_options.validate()
    }
}

fn bool_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Scheduled tasks
// ---------------------------------------------------------------------------

/// Defines when a scheduled summary runs. All times are UTC.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Schedule {
    /// Run exactly once at the given instant.
    Once { at: DateTime<Utc> },
    /// Run every day at HH:MM.
    Daily { hour: u8, minute: u8 },
    /// Run on a specific weekday (0 = Monday … 6 = Sunday) at HH:MM.
    Weekly { day: u8, hour: u8, minute: u8 },
    /// Run on a day of the month (1-31, clamped to month length) at HH:MM.
    Monthly { day: u8, hour: u8, minute: u8 },
    /// Run per a 5-field cron expression (minute hour dom month dow).
    Cron { expression: String },
}

/// Where a scheduled summary is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkKind {
    /// Post to a chat channel through the Discord adapter.
    Channel,
    /// HTTP POST to an external URL, HMAC-signed when the guild has a secret.
    Webhook,
    /// Modeled but not deliverable; see DESIGN.md.
    Email,
}

impl std::fmt::Display for SinkKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SinkKind::Channel => "channel",
            SinkKind::Webhook => "webhook",
            SinkKind::Email => "email",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SinkFormat {
    #[default]
    Embed,
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Destination {
    pub sink: SinkKind,
    /// Channel ID for channel sinks, URL for webhook sinks.
    pub target: String,
    #[serde(default)]
    pub format: SinkFormat,
}

/// A persisted recurring (or one-shot) summary job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledTask {
    /// UUID v4 string — primary key.
    pub id: String,
    /// Human-readable label, unique per guild.
    pub name: String,
    pub channel_id: String,
    pub guild_id: String,
    pub schedule: Schedule,
    /// Delivered in order on success.
    pub destinations: Vec<Destination>,
    pub options: SummaryOptions,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    /// Deactivate after this many consecutive failures.
    pub max_failures: u32,
    pub retry_delay_minutes: u32,
}

pub const DEFAULT_MAX_FAILURES: u32 = 3;
pub const DEFAULT_RETRY_DELAY_MINUTES: u32 = 5;

// ---------------------------------------------------------------------------
// Task executions
// ---------------------------------------------------------------------------

/// Lifecycle state of one scheduled execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ExecutionStatus::Pending),
            "running" => Ok(ExecutionStatus::Running),
            "completed" => Ok(ExecutionStatus::Completed),
            "failed" => Ok(ExecutionStatus::Failed),
            "cancelled" => Ok(ExecutionStatus::Cancelled),
            other => Err(format!("unknown execution status: {other}")),
        }
    }
}

/// Outcome of delivering to a single destination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryResult {
    pub sink: SinkKind,
    pub target: String,
    pub ok: bool,
    pub error: Option<String>,
}

/// A summary handed to the chat adapter for posting, used by the scheduled
/// delivery fan-out.
#[derive(Debug, Clone)]
pub struct ChannelDelivery {
    pub channel_id: String,
    pub summary: Summary,
    pub format: SinkFormat,
}

/// Append-only record of a single task run. Never updated after its status
/// reaches a terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskExecution {
    pub id: String,
    pub task_id: String,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub summary_id: Option<String>,
    pub error: Option<String>,
    #[serde(default)]
    pub deliveries: Vec<DeliveryResult>,
    pub duration_ms: u64,
}
