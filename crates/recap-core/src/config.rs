use std::collections::HashMap;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 8320;
pub const DEFAULT_BIND: &str = "127.0.0.1";

/// Top-level config (recap.toml + RECAP_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RecapConfig {
    #[serde(default)]
    pub discord: DiscordConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub limits: CommandLimitConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DiscordConfig {
    pub bot_token: String,
    /// Register slash commands globally on startup (default: true).
    #[serde(default = "bool_true")]
    pub slash_commands: bool,
}

/// Cost per 1 000 tokens for one model, used for the cost estimate attached
/// to generation metadata.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ModelRate {
    pub prompt_per_1k: f64,
    pub completion_per_1k: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// "openai", "anthropic", or "mock".
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub api_key: String,
    pub base_url: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    /// Maximum in-flight requests across the whole process.
    #[serde(default = "default_concurrency")]
    pub max_concurrent: usize,
    /// Minimum spacing between dispatches, to smooth bursts.
    #[serde(default = "default_dispatch_interval_ms")]
    pub min_dispatch_interval_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_attempt_timeout_secs")]
    pub attempt_timeout_secs: u64,
    #[serde(default = "default_total_timeout_secs")]
    pub total_timeout_secs: u64,
    /// Budget for the composed prompt, in estimated tokens.
    #[serde(default = "default_max_prompt_tokens")]
    pub max_prompt_tokens: usize,
    /// Explicit alias table: request names on the left, provider model IDs
    /// on the right. Unknown aliases fail at startup.
    #[serde(default)]
    pub model_aliases: HashMap<String, String>,
    /// Per-model cost rate table keyed by provider model ID.
    #[serde(default)]
    pub cost_rates: HashMap<String, ModelRate>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            api_key: String::new(),
            base_url: None,
            model: default_model(),
            max_concurrent: default_concurrency(),
            min_dispatch_interval_ms: default_dispatch_interval_ms(),
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            attempt_timeout_secs: default_attempt_timeout_secs(),
            total_timeout_secs: default_total_timeout_secs(),
            max_prompt_tokens: default_max_prompt_tokens(),
            model_aliases: HashMap::new(),
            cost_rates: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            pool_size: default_pool_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Longest allowed request window, in days.
    #[serde(default = "default_max_window_days")]
    pub max_window_days: i64,
    #[serde(default = "default_cache_memory_ttl_secs")]
    pub cache_memory_ttl_secs: i64,
    #[serde(default = "default_cache_memory_max")]
    pub cache_memory_max: usize,
    #[serde(default = "default_cache_store_ttl_secs")]
    pub cache_store_ttl_secs: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_window_days: default_max_window_days(),
            cache_memory_ttl_secs: default_cache_memory_ttl_secs(),
            cache_memory_max: default_cache_memory_max(),
            cache_store_ttl_secs: default_cache_store_ttl_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
    /// End-to-end budget for one scheduled execution.
    #[serde(default = "default_execution_timeout_secs")]
    pub execution_timeout_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval_secs(),
            execution_timeout_secs: default_execution_timeout_secs(),
        }
    }
}

/// One REST principal: a display name plus the guilds it may touch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrincipalConfig {
    pub name: String,
    /// Empty means access to every guild.
    #[serde(default)]
    pub guilds: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// HS256 signing secret for bearer tokens. Bearer auth is rejected
    /// when unset.
    pub jwt_secret: Option<String>,
    /// Inline API-key table: opaque key -> principal.
    #[serde(default)]
    pub api_keys: HashMap<String, PrincipalConfig>,
    /// Optional JSON file with the same key -> principal shape, merged over
    /// the inline table at startup.
    pub api_key_file: Option<String>,
    #[serde(default = "default_rest_rate_limit")]
    pub rate_limit_per_minute: usize,
    /// Windows longer than this run as a background job (202 + jobId).
    #[serde(default = "default_sync_window_hours")]
    pub sync_window_hours: i64,
    /// End-to-end budget for a synchronous REST summarize.
    #[serde(default = "default_rest_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            jwt_secret: None,
            api_keys: HashMap::new(),
            api_key_file: None,
            rate_limit_per_minute: default_rest_rate_limit(),
            sync_window_hours: default_sync_window_hours(),
            request_timeout_secs: default_rest_timeout_secs(),
        }
    }
}

/// Per-user sliding-window limits for interactive commands.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandLimitConfig {
    #[serde(default = "default_summarize_per_window")]
    pub summarize_per_window: usize,
    #[serde(default = "default_config_per_window")]
    pub config_per_window: usize,
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    /// End-to-end budget for one interactive command.
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
}

impl Default for CommandLimitConfig {
    fn default() -> Self {
        Self {
            summarize_per_window: default_summarize_per_window(),
            config_per_window: default_config_per_window(),
            window_secs: default_window_secs(),
            command_timeout_secs: default_command_timeout_secs(),
        }
    }
}

impl RecapConfig {
    /// Load config from a TOML file with RECAP_* env var overrides.
    ///
    /// Checks in order: explicit path argument, then `~/.recap/recap.toml`.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: RecapConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("RECAP_").split("_"))
            .extract()
            .map_err(|e| crate::error::RecapError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn bool_true() -> bool {
    true
}
fn default_provider() -> String {
    "openai".to_string()
}
fn default_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_concurrency() -> usize {
    4
}
fn default_dispatch_interval_ms() -> u64 {
    100
}
fn default_max_retries() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    1_000
}
fn default_attempt_timeout_secs() -> u64 {
    60
}
fn default_total_timeout_secs() -> u64 {
    180
}
fn default_max_prompt_tokens() -> usize {
    24_000
}
fn default_pool_size() -> usize {
    5
}
fn default_max_window_days() -> i64 {
    7
}
fn default_cache_memory_ttl_secs() -> i64 {
    300
}
fn default_cache_memory_max() -> usize {
    1_000
}
fn default_cache_store_ttl_secs() -> i64 {
    3_600
}
fn default_tick_interval_secs() -> u64 {
    30
}
fn default_execution_timeout_secs() -> u64 {
    300
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_rest_rate_limit() -> usize {
    100
}
fn default_sync_window_hours() -> i64 {
    48
}
fn default_rest_timeout_secs() -> u64 {
    60
}
fn default_summarize_per_window() -> usize {
    3
}
fn default_config_per_window() -> usize {
    5
}
fn default_window_secs() -> u64 {
    60
}
fn default_command_timeout_secs() -> u64 {
    30
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.recap/recap.db", home)
}
fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.recap/recap.toml", home)
}
