use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::{error, warn};

use recap_core::RecapError;

/// REST rendering of a [`RecapError`]: status code + stable JSON envelope.
pub struct ApiError(pub RecapError);

impl From<RecapError> for ApiError {
    fn from(e: RecapError) -> Self {
        ApiError(e)
    }
}

impl From<recap_store::StoreError> for ApiError {
    fn from(e: recap_store::StoreError) -> Self {
        ApiError(e.into())
    }
}

pub fn status_for(error: &RecapError) -> StatusCode {
    match error {
        RecapError::UserInput(_) | RecapError::PromptTooLarge { .. } => StatusCode::BAD_REQUEST,
        RecapError::AuthFailed(_) => StatusCode::UNAUTHORIZED,
        RecapError::Permission { .. } | RecapError::ChannelAccess { .. } => StatusCode::FORBIDDEN,
        RecapError::NotFound { .. } => StatusCode::NOT_FOUND,
        RecapError::StoreConstraint(_) => StatusCode::CONFLICT,
        RecapError::InsufficientContent { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        RecapError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        RecapError::SourceTransient(_)
        | RecapError::LlmTransient(_)
        | RecapError::StoreTransient(_) => StatusCode::SERVICE_UNAVAILABLE,
        RecapError::LlmRefused(_) | RecapError::LlmInvalid(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            error!(error = %self.0, "request failed");
        } else {
            warn!(error = %self.0, code = self.0.code(), "request rejected");
        }

        let mut body = json!({
            "errorCode": self.0.code(),
            "message": self.0.to_string(),
        });
        if let Some(retry_after) = self.0.retry_after() {
            body["retryAfter"] = json!(retry_after);
        }
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
