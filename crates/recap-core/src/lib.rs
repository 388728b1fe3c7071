//! `recap-core` — shared types, configuration, and the error taxonomy.
//!
//! Everything that crosses a crate boundary lives here: the persisted data
//! model ([`types`]), the transient request record and its fingerprint
//! ([`request`]), the layered configuration ([`config`]), and the central
//! [`error::RecapError`] enum whose `code()` strings feed both the Discord
//! error translation and the REST error envelope.

pub mod config;
pub mod error;
pub mod request;
pub mod types;

pub use error::{RecapError, Result};
pub use request::{SummaryOptions, SummaryRequest};
