//! `recap-discord` — the interactive command surface.
//!
//! Slash commands are registered on ready and dispatched from
//! `interaction_create`. Every command defers first, then runs through the
//! rate-limit and permission gates before touching the engine or scheduler.
//! Summaries post publicly as rich embeds; errors and configuration views
//! stay ephemeral.

pub mod adapter;
pub mod commands;
pub mod context;
pub mod delivery;
pub mod embed;
pub mod errors;
pub mod handler;
pub mod permissions;
pub mod ratelimit;
pub mod send;

pub use adapter::DiscordAdapter;
pub use context::BotContext;
pub use ratelimit::RateLimiter;
