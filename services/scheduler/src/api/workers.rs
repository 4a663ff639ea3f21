//! Worker-facing endpoints: heartbeat ingestion and pool status.

use axum::{
    extract::{rejection::JsonRejection, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, NaiveDateTime, Utc};
use pollmesh_id::WorkerId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::auth::{Caller, ServiceAuth};
use super::error::ApiError;
use super::request_context::RequestContext;
use crate::service::PoolStatus;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/heartbeatWorkers", post(heartbeat))
        .route("/workers", get(status))
}

#[derive(Debug, Deserialize)]
pub struct HeartbeatBody {
    #[serde(rename = "workerID")]
    pub worker_id: Option<Value>,
    pub timestamp: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct Ack {
    pub message: String,
}

/// Accepts RFC 3339, or an ISO 8601 timestamp without offset taken as UTC.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

fn parse_worker(value: &Value) -> Option<WorkerId> {
    match value {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.to_string().parse().ok(),
        _ => None,
    }
}

async fn heartbeat(
    State(state): State<AppState>,
    ctx: RequestContext,
    _service: ServiceAuth,
    body: Result<Json<HeartbeatBody>, JsonRejection>,
) -> Result<Json<Ack>, ApiError> {
    let bad_request = |code: &str, message: String| {
        ApiError::bad_request(code, message).with_request_id(&ctx.request_id)
    };

    let Json(body) = body.map_err(|e| bad_request("invalid_body", e.body_text()))?;
    let (Some(raw_worker), Some(raw_ts)) = (body.worker_id, body.timestamp) else {
        return Err(bad_request(
            "missing_fields",
            "workerID and timestamp are required".to_string(),
        ));
    };
    let worker = parse_worker(&raw_worker)
        .ok_or_else(|| bad_request("invalid_worker", format!("'{raw_worker}' is not a worker id")))?;
    let seen_at = parse_timestamp(&raw_ts)
        .ok_or_else(|| bad_request("invalid_timestamp", format!("'{raw_ts}' is not an ISO 8601 timestamp")))?;

    state
        .scheduler()
        .record_heartbeat(worker, seen_at)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(&ctx.request_id))?;

    Ok(Json(Ack {
        message: "SUCCESS: heartbeat recorded".to_string(),
    }))
}

async fn status(
    State(state): State<AppState>,
    ctx: RequestContext,
    _caller: Caller,
) -> Result<Json<PoolStatus>, ApiError> {
    let status = state
        .scheduler()
        .status()
        .await
        .map_err(|e| ApiError::from(e).with_request_id(&ctx.request_id))?;
    Ok(Json(status))
}
