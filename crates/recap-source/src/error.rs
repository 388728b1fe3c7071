use thiserror::Error;

/// Errors that can occur at the chat-platform boundary.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The bot itself lacks read permission in the channel.
    #[error("bot cannot read channel {channel_id}")]
    ChannelAccess { channel_id: String },

    /// The channel no longer exists (or never did).
    #[error("channel not found: {channel_id}")]
    NotFound { channel_id: String },

    /// Network or platform trouble; retryable with backoff.
    #[error("message source unavailable: {0}")]
    Transient(String),
}

impl From<SourceError> for recap_core::RecapError {
    fn from(e: SourceError) -> Self {
        match e {
            SourceError::ChannelAccess { channel_id } => {
                recap_core::RecapError::ChannelAccess { channel_id }
            }
            SourceError::NotFound { channel_id } => recap_core::RecapError::NotFound {
                entity: "channel",
                id: channel_id,
            },
            SourceError::Transient(msg) => recap_core::RecapError::SourceTransient(msg),
        }
    }
}

pub type Result<T> = std::result::Result<T, SourceError>;
