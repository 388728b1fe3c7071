use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use recap_core::{RecapError, SummaryOptions, SummaryRequest};
use recap_store::{SummaryOrder, SummaryQuery};

use crate::app::{AppState, JobState};
use crate::auth::Principal;
use crate::error::{ApiError, ApiResult};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SummarizeBody {
    pub channel_id: String,
    pub guild_id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(default)]
    pub options: Option<SummaryOptions>,
}

/// Shared gate: authentication, then the per-principal window.
fn admit(state: &AppState, headers: &HeaderMap) -> ApiResult<Principal> {
    let principal = state.authenticator.authenticate(headers)?;
    state.rest_limiter.check(&principal.name)?;
    Ok(principal)
}

/// POST /v1/summarize — synchronous (201 + Summary) for windows inside the
/// sync budget, otherwise 202 + `{jobId}` with the work detached.
pub async fn summarize(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<SummarizeBody>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let principal = admit(&state, &headers)?;
    if !principal.may_access_guild(&body.guild_id) {
        return Err(RecapError::Permission {
            reason: format!("principal '{}' has no grant for this guild", principal.name),
        }
        .into());
    }

    let request = SummaryRequest {
        channel_id: body.channel_id,
        guild_id: body.guild_id,
        start: body.start,
        end: body.end,
        options: body.options.unwrap_or_default(),
    };
    request.validate()?;

    let window_hours = (request.end - request.start).num_hours();
    if window_hours > state.config.gateway.sync_window_hours {
        let job_id = Uuid::new_v4().to_string();
        state.jobs.insert(job_id.clone(), JobState::Running);
        info!(job_id = %job_id, principal = %principal.name, "summarize deferred to background job");

        let engine = Arc::clone(&state.engine);
        let jobs_state = Arc::clone(&state);
        let job_key = job_id.clone();
        tokio::spawn(async move {
            let cancel = CancellationToken::new();
            let outcome = engine.summarize(request, &cancel).await;
            let next = match outcome {
                Ok(summary) => JobState::Done {
                    summary_id: summary.id,
                },
                Err(e) => {
                    warn!(job_id = %job_key, error = %e, "background summarize failed");
                    JobState::Failed {
                        code: e.code(),
                        message: e.to_string(),
                    }
                }
            };
            jobs_state.jobs.insert(job_key, next);
        });

        return Ok((StatusCode::ACCEPTED, Json(json!({ "jobId": job_id }))));
    }

    let cancel = CancellationToken::new();
    let timeout = std::time::Duration::from_secs(state.config.gateway.request_timeout_secs);
    let summary = match tokio::time::timeout(
        timeout,
        state.engine.summarize_adaptive(request, &cancel),
    )
    .await
    {
        Ok(result) => result?,
        Err(_) => {
            cancel.cancel();
            return Err(RecapError::LlmTransient("request timed out".to_string()).into());
        }
    };

    Ok((
        StatusCode::CREATED,
        Json(serde_json::to_value(&summary).map_err(RecapError::from)?),
    ))
}

/// GET /v1/summary/{id} — accepts either a summary id or a deferred job id.
pub async fn get_summary(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let principal = admit(&state, &headers)?;

    // A job id resolves to its summary once the job lands.
    let id = match state.jobs.get(&id).map(|entry| entry.value().clone()) {
        Some(JobState::Running) => {
            return Ok((
                StatusCode::ACCEPTED,
                Json(json!({ "jobId": id, "status": "running" })),
            ));
        }
        Some(JobState::Failed { code, message }) => {
            return Ok((
                StatusCode::OK,
                Json(json!({ "jobId": id, "status": "failed", "errorCode": code, "message": message })),
            ));
        }
        Some(JobState::Done { summary_id }) => summary_id,
        None => id,
    };

    let summary = state.store.get_summary(&id).map_err(ApiError::from)?;
    if !principal.may_access_guild(&summary.guild_id) {
        return Err(RecapError::Permission {
            reason: "no grant for this guild".to_string(),
        }
        .into());
    }
    Ok((
        StatusCode::OK,
        Json(serde_json::to_value(&summary).map_err(RecapError::from)?),
    ))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ListQuery {
    pub channel: Option<String>,
    pub guild: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// GET /v1/summaries?channel=&guild=&limit=&offset=
pub async fn list_summaries(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Value>> {
    let principal = admit(&state, &headers)?;

    if let Some(ref guild) = query.guild {
        if !principal.may_access_guild(guild) {
            return Err(RecapError::Permission {
                reason: "no grant for this guild".to_string(),
            }
            .into());
        }
    } else if !principal.guilds.is_empty() {
        return Err(RecapError::UserInput(
            "guild query parameter is required for scoped principals".to_string(),
        )
        .into());
    }

    let criteria = SummaryQuery {
        guild_id: query.guild,
        channel_id: query.channel,
        ..Default::default()
    };
    let limit = query.limit.unwrap_or(20).clamp(1, 100);
    let offset = query.offset.unwrap_or(0);

    let items = state
        .store
        .find_summaries(&criteria, limit, offset, SummaryOrder::NewestFirst)
        .map_err(ApiError::from)?;
    let total = state.store.count_summaries(&criteria).map_err(ApiError::from)?;

    Ok(Json(json!({
        "items": serde_json::to_value(&items).map_err(RecapError::from)?,
        "total": total,
    })))
}
