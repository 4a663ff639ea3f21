//! Application state shared across request handlers.

use std::sync::Arc;

use crate::service::Scheduler;

/// Secrets used to authenticate callers.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// HS256 secret for end-user bearer tokens.
    pub jwt_secret: String,
    /// Shared secret expected in `x-api-key` on internal routes.
    pub internal_api_key: String,
}

/// Shared application state.
///
/// This is passed to all request handlers via Axum's state extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    scheduler: Scheduler,
    auth: AuthConfig,
}

impl AppState {
    /// Create a new application state.
    pub fn new(scheduler: Scheduler, auth: AuthConfig) -> Self {
        Self {
            inner: Arc::new(AppStateInner { scheduler, auth }),
        }
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.inner.scheduler
    }

    pub fn auth(&self) -> &AuthConfig {
        &self.inner.auth
    }
}
