//! `recap-engine` — the summarization pipeline and its coordinator.
//!
//! One request flows filter → prompt → LLM → parse → persist:
//!
//! - [`filter`] turns raw platform messages into normalized records;
//! - [`prompt`] composes the system/user prompt pair under a token budget;
//! - [`llm`] dispatches to a completion provider with bounded concurrency
//!   and retry;
//! - [`parser`] recovers structured sections from whatever the model sent
//!   back;
//! - [`cache`] answers repeat requests without touching the provider;
//! - [`engine::SummaryEngine`] coordinates all of it with a single-flight
//!   guarantee per request fingerprint.

pub mod cache;
pub mod engine;
pub mod filter;
pub mod llm;
pub mod parser;
pub mod prompt;

pub use cache::SummaryCache;
pub use engine::{BatchOutcome, CostEstimate, SummaryEngine};
pub use llm::{CompletionProvider, LlmClient, MockProvider};
