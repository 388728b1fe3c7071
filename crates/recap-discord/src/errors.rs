//! Error-to-user-message translation. This module and the REST adapter are
//! the only layers that turn [`RecapError`] into user-visible text.

use recap_core::RecapError;
use uuid::Uuid;

/// A user-facing rendering of a pipeline error.
pub struct UserMessage {
    pub code: &'static str,
    pub text: String,
    /// Logged but never shown; correlates "internal error" replies.
    pub correlation_id: Option<String>,
}

pub fn user_message(error: &RecapError) -> UserMessage {
    let code = error.code();
    match error {
        RecapError::UserInput(msg) => UserMessage {
            code,
            text: format!("{msg}. Check the command options and try again."),
            correlation_id: None,
        },
        RecapError::Permission { .. } => UserMessage {
            code,
            text: "Insufficient permissions.".to_string(),
            correlation_id: None,
        },
        RecapError::InsufficientContent { found, required } => UserMessage {
            code,
            text: format!(
                "Not enough to summarize: {found} messages survived filtering, {required} required."
            ),
            correlation_id: None,
        },
        RecapError::ChannelAccess { channel_id } => UserMessage {
            code,
            text: format!("I can't read <#{channel_id}>. Grant the bot access and retry."),
            correlation_id: None,
        },
        RecapError::RateLimited { retry_after_secs } => UserMessage {
            code,
            text: format!("Slow down a little. Try again in {retry_after_secs}s."),
            correlation_id: None,
        },
        RecapError::SourceTransient(_) | RecapError::LlmTransient(_) | RecapError::StoreTransient(_) => {
            UserMessage {
                code,
                text: "The summarizer is temporarily unavailable. Try again in ~30 seconds."
                    .to_string(),
                correlation_id: None,
            }
        }
        RecapError::LlmRefused(_) | RecapError::LlmInvalid(_) => UserMessage {
            code,
            text: "The summary could not be generated for this conversation.".to_string(),
            correlation_id: None,
        },
        RecapError::PromptTooLarge { .. } => UserMessage {
            code,
            text: "That time range is too large to summarize. Narrow the window.".to_string(),
            correlation_id: None,
        },
        RecapError::NotFound { entity, id } => UserMessage {
            code,
            text: format!("{entity} `{id}` was not found."),
            correlation_id: None,
        },
        RecapError::Aborted => UserMessage {
            code,
            text: "The request was cancelled.".to_string(),
            correlation_id: None,
        },
        _ => {
            let correlation_id = Uuid::new_v4().to_string();
            UserMessage {
                code,
                text: format!("Internal error (ref `{correlation_id}`)."),
                correlation_id: Some(correlation_id),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_message_carries_the_wait() {
        let msg = user_message(&RecapError::RateLimited {
            retry_after_secs: 42,
        });
        assert_eq!(msg.code, "RATE_LIMITED");
        assert!(msg.text.contains("42s"));
    }

    #[test]
    fn internal_errors_get_a_correlation_id() {
        let msg = user_message(&RecapError::Internal("boom".into()));
        assert!(msg.correlation_id.is_some());
        assert!(msg.text.contains(msg.correlation_id.as_deref().unwrap()));
        // The raw internal detail never leaks.
        assert!(!msg.text.contains("boom"));
    }

    #[test]
    fn insufficient_content_reports_the_observed_count() {
        let msg = user_message(&RecapError::InsufficientContent {
            found: 3,
            required: 5,
        });
        assert!(msg.text.contains('3'));
        assert!(msg.text.contains('5'));
    }
}
