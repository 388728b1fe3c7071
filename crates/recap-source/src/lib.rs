//! `recap-source` — the chat-platform boundary.
//!
//! [`MessageSource`] is the capability set the summarization pipeline
//! consumes: fetch a time range of messages, check a member's read access,
//! resolve their roles. [`discord::DiscordSource`] implements it over
//! serenity's REST client; [`mock::MemorySource`] is the in-memory variant
//! the test suites drive.

pub mod discord;
pub mod error;
pub mod mock;
pub mod source;

pub use discord::DiscordSource;
pub use error::{Result, SourceError};
pub use mock::MemorySource;
pub use source::{MessageSource, RawMessage};
