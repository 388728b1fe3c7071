use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecapError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    UserInput(String),

    #[error("Permission denied: {reason}")]
    Permission { reason: String },

    #[error("Only {found} messages survived filtering ({required} required)")]
    InsufficientContent { found: usize, required: usize },

    #[error("Bot cannot read channel {channel_id}")]
    ChannelAccess { channel_id: String },

    #[error("Rate limited, retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Message source unavailable: {0}")]
    SourceTransient(String),

    #[error("LLM provider unavailable: {0}")]
    LlmTransient(String),

    #[error("LLM provider refused the request: {0}")]
    LlmRefused(String),

    #[error("LLM request invalid: {0}")]
    LlmInvalid(String),

    #[error("Prompt exceeds budget even after elision ({tokens} tokens, budget {budget})")]
    PromptTooLarge { tokens: usize, budget: usize },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Store unavailable: {0}")]
    StoreTransient(String),

    #[error("Store constraint violated: {0}")]
    StoreConstraint(String),

    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    #[error("operation aborted")]
    Aborted,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RecapError {
    /// Stable error code string used in the REST error envelope and in
    /// Discord embed footers.
    pub fn code(&self) -> &'static str {
        match self {
            RecapError::Config(_) => "CONFIG_ERROR",
            RecapError::UserInput(_) => "USER_INPUT",
            RecapError::Permission { .. } => "PERMISSION_DENIED",
            RecapError::InsufficientContent { .. } => "INSUFFICIENT_CONTENT",
            RecapError::ChannelAccess { .. } => "CHANNEL_ACCESS",
            RecapError::RateLimited { .. } => "RATE_LIMITED",
            RecapError::SourceTransient(_) => "SOURCE_UNAVAILABLE",
            RecapError::LlmTransient(_) => "LLM_UNAVAILABLE",
            RecapError::LlmRefused(_) => "LLM_REFUSED",
            RecapError::LlmInvalid(_) => "LLM_INVALID",
            RecapError::PromptTooLarge { .. } => "PROMPT_TOO_LARGE",
            RecapError::NotFound { .. } => "NOT_FOUND",
            RecapError::StoreTransient(_) => "STORE_UNAVAILABLE",
            RecapError::StoreConstraint(_) => "STORE_CONSTRAINT",
            RecapError::AuthFailed(_) => "AUTH_FAILED",
            RecapError::Aborted => "ABORTED",
            RecapError::Serialization(_) => "SERIALIZATION_ERROR",
            RecapError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Seconds the caller should wait before retrying, when the error
    /// carries that hint.
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            RecapError::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            RecapError::LlmTransient(_)
            | RecapError::SourceTransient(_)
            | RecapError::StoreTransient(_) => Some(30),
            _ => None,
        }
    }

    /// Whether a caller-side retry with backoff can reasonably succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RecapError::LlmTransient(_)
                | RecapError::SourceTransient(_)
                | RecapError::StoreTransient(_)
                | RecapError::RateLimited { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, RecapError>;
