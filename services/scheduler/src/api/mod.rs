//! HTTP API handlers and routing.

pub mod auth;
pub mod error;
mod health;
pub mod request_context;
mod subscriptions;
mod workers;

use axum::{
    http::{header, HeaderName, Method},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::state::AppState;

/// Create the main API router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static(crate::subscriptions::API_KEY_HEADER),
        ])
        .allow_origin(Any);

    Router::new()
        // Health endpoints (no auth required)
        .merge(health::routes())
        .merge(subscriptions::routes())
        .merge(workers::routes())
        // Middleware
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        // Application state
        .with_state(state)
}
