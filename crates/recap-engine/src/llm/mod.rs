//! LLM provider adapters and the bounded, retrying dispatch client.

pub mod anthropic;
pub mod client;
pub mod mock;
pub mod openai;
pub mod provider;

pub use anthropic::AnthropicProvider;
pub use client::{CompletionOutcome, LlmClient, LlmMetricsSnapshot};
pub use mock::MockProvider;
pub use openai::OpenAiProvider;
pub use provider::{Completion, CompletionProvider, CompletionRequest, ProviderError};
