use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::app::AppState;

/// GET /health — liveness probe with per-component health and the LLM
/// token/cost counters.
pub async fn health_handler(State(state): State<Arc<AppState>>) -> (StatusCode, Json<Value>) {
    let store_ok = state.store.ping().is_ok();
    let llm = state.engine.llm();
    let metrics = llm.metrics();

    let status = if store_ok { "ok" } else { "degraded" };
    let code = if store_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        code,
        Json(json!({
            "status": status,
            "componentHealth": {
                "store": if store_ok { "ok" } else { "unavailable" },
                "llm": {
                    "provider": llm.provider_name(),
                    "model": llm.default_model(),
                    "calls": metrics.calls,
                    "failures": metrics.failures,
                    "promptTokens": metrics.prompt_tokens,
                    "completionTokens": metrics.completion_tokens,
                    "costUsd": metrics.cost_usd,
                },
                "scheduler": "ok",
            },
        })),
    )
}
