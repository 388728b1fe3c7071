use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

use recap_core::types::{Destination, Schedule, SinkFormat, SinkKind};
use recap_core::{RecapError, SummaryOptions};
use recap_scheduler::NewTask;

use crate::app::AppState;
use crate::error::{ApiError, ApiResult};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ScheduleBody {
    pub name: String,
    pub channel_id: String,
    pub guild_id: String,
    pub schedule: Schedule,
    #[serde(default)]
    pub destinations: Vec<Destination>,
    #[serde(default)]
    pub options: Option<SummaryOptions>,
}

/// POST /v1/schedule — 201 + `{id, nextRun}`, 409 on a duplicate name.
pub async fn create_schedule(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<ScheduleBody>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let principal = state.authenticator.authenticate(&headers)?;
    state.rest_limiter.check(&principal.name)?;
    if !principal.may_access_guild(&body.guild_id) {
        return Err(RecapError::Permission {
            reason: "no grant for this guild".to_string(),
        }
        .into());
    }

    // Default destination: post back into the summarized channel.
    let destinations = if body.destinations.is_empty() {
        vec![Destination {
            sink: SinkKind::Channel,
            target: body.channel_id.clone(),
            format: SinkFormat::Embed,
        }]
    } else {
        body.destinations
    };

    let task = state.scheduler.create_task(NewTask {
        name: body.name,
        channel_id: body.channel_id,
        guild_id: body.guild_id,
        schedule: body.schedule,
        destinations,
        options: body.options.unwrap_or_default(),
        created_by: format!("rest:{}", principal.name),
    })?;

    info!(task_id = %task.id, principal = %principal.name, "schedule created via REST");
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "id": task.id,
            "nextRun": task.next_run,
        })),
    ))
}

/// DELETE /v1/schedule/{id} — 204 on success.
pub async fn delete_schedule(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let principal = state.authenticator.authenticate(&headers)?;
    state.rest_limiter.check(&principal.name)?;

    let task = state.store.get_task(&id).map_err(ApiError::from)?;
    if !principal.may_access_guild(&task.guild_id) {
        return Err(RecapError::Permission {
            reason: "no grant for this guild".to_string(),
        }
        .into());
    }

    state.scheduler.delete_task(&id)?;
    info!(task_id = %id, principal = %principal.name, "schedule deleted via REST");
    Ok(StatusCode::NO_CONTENT)
}
