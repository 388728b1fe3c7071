use std::sync::Arc;
use std::time::Duration;

use recap_engine::SummaryEngine;
use recap_scheduler::Scheduler;
use recap_source::MessageSource;
use recap_store::Store;

use crate::ratelimit::RateLimiter;

/// What the command handlers need from the application container.
///
/// The gateway binary implements this on its `AppState`; tests can provide
/// a minimal stand-in.
pub trait BotContext: Send + Sync {
    fn engine(&self) -> &Arc<SummaryEngine>;
    fn scheduler(&self) -> &Arc<Scheduler>;
    fn store(&self) -> &Arc<Store>;
    fn source(&self) -> &Arc<dyn MessageSource>;
    fn rate_limiter(&self) -> &RateLimiter;

    /// End-to-end budget for one interactive command.
    fn command_timeout(&self) -> Duration {
        Duration::from_secs(30)
    }
}
