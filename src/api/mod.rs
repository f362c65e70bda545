use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

use crate::engine::ApprovalEngine;

pub mod handlers;

/// Shared application state passed to handlers.
pub struct AppState {
    pub engine: Arc<ApprovalEngine>,
}

/// Build the management API router.
/// All routes are relative — the caller mounts this under `/api/v1`.
pub fn api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/approvals",
            get(handlers::list_approvals).post(handlers::create_approval),
        )
        .route("/approvals/stats", get(handlers::approval_stats))
        .route(
            "/approvals/:id",
            get(handlers::get_approval).delete(handlers::delete_approval),
        )
        .route("/approvals/:id/decision", post(handlers::decide_approval))
        .route("/approvals/:id/history", get(handlers::approval_history))
}
