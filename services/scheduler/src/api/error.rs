use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::error;

use crate::error::SchedulerError;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub message: String,
    pub code: String,
    pub request_id: String,
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: Box<ErrorBody>,
}

impl ApiError {
    fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            body: Box::new(ErrorBody {
                message: format!("ERROR: {}", message.into()),
                code: code.into(),
                request_id: "unknown".to_string(),
            }),
        }
    }

    pub fn bad_request(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, code, message)
    }

    pub fn not_found(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, code, message)
    }

    pub fn internal(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, code, message)
    }

    pub fn unauthorized(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, code, message)
    }

    pub fn forbidden(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, code, message)
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.body.request_id = request_id.into();
        self
    }
}

impl From<SchedulerError> for ApiError {
    fn from(err: SchedulerError) -> Self {
        match &err {
            SchedulerError::Invalid(_) => ApiError::bad_request("invalid_request", err.to_string()),
            SchedulerError::UnknownApi(_) => ApiError::bad_request("unknown_api", err.to_string()),
            SchedulerError::AlreadyActive(_) => {
                ApiError::bad_request("already_active", err.to_string())
            }
            SchedulerError::NotActive(_) => ApiError::bad_request("not_active", err.to_string()),
            SchedulerError::UnknownSubscription(_) => {
                ApiError::not_found("subscription_not_found", err.to_string())
            }
            SchedulerError::Forbidden(_) => ApiError::forbidden("forbidden", err.to_string()),
            SchedulerError::NoCapacity => {
                ApiError::internal("no_worker_available", "no worker available")
            }
            SchedulerError::JobMissing { .. } | SchedulerError::Registry(_) => {
                error!(error = %err, "Registry mutation failed");
                ApiError::internal("registry_failure", err.to_string())
            }
            SchedulerError::Upstream(_) => {
                error!(error = %err, "Subscription store call failed");
                ApiError::internal("upstream_failure", err.to_string())
            }
            SchedulerError::Store(_) => {
                error!(error = %err, "State store call failed");
                ApiError::internal("state_store_failure", "shared state store unavailable")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}
