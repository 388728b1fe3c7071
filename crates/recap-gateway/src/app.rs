use axum::{
    routing::{delete, get, post},
    Router,
};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;

use recap_core::config::RecapConfig;
use recap_core::Result;
use recap_discord::{BotContext, RateLimiter};
use recap_engine::SummaryEngine;
use recap_scheduler::Scheduler;
use recap_source::MessageSource;
use recap_store::Store;

use crate::auth::{Authenticator, PrincipalLimiter};

/// Lifecycle of a deferred (202) summarize job.
#[derive(Debug, Clone)]
pub enum JobState {
    Running,
    Done { summary_id: String },
    Failed { code: &'static str, message: String },
}

/// Central shared state — passed as `Arc<AppState>` to all handlers, and the
/// container the Discord adapter sees through [`BotContext`].
pub struct AppState {
    pub config: RecapConfig,
    pub engine: Arc<SummaryEngine>,
    pub scheduler: Arc<Scheduler>,
    pub store: Arc<Store>,
    pub source: Arc<dyn MessageSource>,
    pub authenticator: Authenticator,
    pub rest_limiter: PrincipalLimiter,
    pub command_limiter: RateLimiter,
    /// Deferred summarize jobs: job id -> state.
    pub jobs: DashMap<String, JobState>,
}

impl AppState {
    pub fn new(
        config: RecapConfig,
        engine: Arc<SummaryEngine>,
        scheduler: Arc<Scheduler>,
        store: Arc<Store>,
        source: Arc<dyn MessageSource>,
    ) -> Result<Self> {
        let authenticator = Authenticator::from_config(&config.gateway)?;
        let rest_limiter = PrincipalLimiter::new(config.gateway.rate_limit_per_minute);
        let command_limiter = RateLimiter::new(
            Duration::from_secs(config.limits.window_secs),
            config.limits.summarize_per_window,
            config.limits.config_per_window,
        );
        Ok(Self {
            config,
            engine,
            scheduler,
            store,
            source,
            authenticator,
            rest_limiter,
            command_limiter,
            jobs: DashMap::new(),
        })
    }
}

impl BotContext for AppState {
    fn engine(&self) -> &Arc<SummaryEngine> {
        &self.engine
    }

    fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    fn store(&self) -> &Arc<Store> {
        &self.store
    }

    fn source(&self) -> &Arc<dyn MessageSource> {
        &self.source
    }

    fn rate_limiter(&self) -> &RateLimiter {
        &self.command_limiter
    }

    fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.config.limits.command_timeout_secs)
    }
}

/// Assemble the full router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route("/v1/summarize", post(crate::http::summarize::summarize))
        .route("/v1/summary/{id}", get(crate::http::summarize::get_summary))
        .route("/v1/summaries", get(crate::http::summarize::list_summaries))
        .route("/v1/schedule", post(crate::http::schedule::create_schedule))
        .route(
            "/v1/schedule/{id}",
            delete(crate::http::schedule::delete_schedule),
        )
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
