//! Liveness and readiness probes.
//!
//! `/livez` and `/healthz` never touch a dependency. `/readyz` pings the
//! state store, reads the registry file and reports flagged workers.

use std::collections::BTreeMap;

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use chrono::Utc;
use pollmesh_id::WorkerId;
use serde::Serialize;

use crate::state::AppState;

const SERVICE: &str = "scheduler";

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Check {
    Ok,
    Unavailable { message: String },
}

impl From<Result<(), String>> for Check {
    fn from(result: Result<(), String>) -> Self {
        match result {
            Ok(()) => Check::Ok,
            Err(message) => Check::Unavailable { message },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Probe {
    /// "ok" or "degraded".
    pub status: String,
    pub service: String,
    pub version: String,
    pub timestamp: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub checks: BTreeMap<String, Check>,
    /// Workers currently excluded from placement.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub unhealthy_workers: Vec<WorkerId>,
}

impl Probe {
    fn new(healthy: bool) -> Self {
        Self {
            status: if healthy { "ok" } else { "degraded" }.to_string(),
            service: SERVICE.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: Utc::now().to_rfc3339(),
            checks: BTreeMap::new(),
            unhealthy_workers: Vec::new(),
        }
    }
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/livez", get(livez))
}

async fn healthz() -> Json<Probe> {
    Json(Probe::new(true))
}

async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let scheduler = state.scheduler();
    let (store, registry) = scheduler.readiness().await;
    let ready = store.is_ok() && registry.is_ok();

    let mut probe = Probe::new(ready);
    probe.checks.insert("state_store".to_string(), store.into());
    probe.checks.insert("registry".to_string(), registry.into());
    if let Ok(unhealthy) = scheduler.health().unhealthy().await {
        probe.unhealthy_workers = unhealthy.into_iter().collect();
        probe.unhealthy_workers.sort();
    }

    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(probe))
}

async fn livez() -> StatusCode {
    StatusCode::OK
}
