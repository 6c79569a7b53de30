//! HTTP surface of the bridge.
//!
//! Every route is mounted under `/plugins/<plugin_id>`. The chat server's
//! plugin proxy authenticates users and passes the id in a header
//! (`Mattermost-User-Id` by default); the provider's Pub/Sub push and the
//! slash-command callback are unauthenticated apart from their own checks.

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::http::HeaderMap;
use tower_http::trace::TraceLayer;

use mailbridge_core::AppContext;

/// Shared state accessible by all handlers.
#[derive(Clone)]
pub struct ApiState {
    pub app: Arc<AppContext>,
}

impl ApiState {
    pub fn new(app: Arc<AppContext>) -> Self {
        Self { app }
    }

    /// The chat user id set by the plugin proxy, if any.
    pub fn authenticated_user(&self, headers: &HeaderMap) -> Option<String> {
        headers
            .get(self.app.config.server.auth_header.as_str())
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(String::from)
    }
}

/// Build the router with all routes under the configured prefix.
pub fn build_router(state: ApiState) -> Router {
    let prefix = state.app.config.route_prefix();
    Router::new()
        .nest(&prefix, handlers::routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
