//! `recap-gateway` — authenticated REST surface plus the binary that wires
//! the whole service together.
//!
//! The HTTP layer is a thin adapter: request shapes validate strictly
//! (unknown fields rejected), authentication resolves a principal, and
//! handlers call straight into the engine, store, and scheduler. All errors
//! leave as the stable envelope `{errorCode, message, retryAfter?}`.

pub mod app;
pub mod auth;
pub mod error;
pub mod http;

pub use app::{build_router, AppState};
