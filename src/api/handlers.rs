//! Thin HTTP glue over the approval engine. The CI system creates requests,
//! humans decide them, everything else is read traffic.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::api::AppState;
use crate::errors::ApprovalError;
use crate::models::{
    ApprovalFilter, ApprovalHistoryEntry, ApprovalRequest, ApprovalSpec, ApprovalStats, Decision,
    Outcome,
};

/// POST /api/v1/approvals — register a deployment awaiting approval
pub async fn create_approval(
    State(state): State<Arc<AppState>>,
    Json(spec): Json<ApprovalSpec>,
) -> Result<(StatusCode, Json<ApprovalRequest>), ApprovalError> {
    let request = state.engine.create(spec).await?;
    Ok((StatusCode::CREATED, Json(request)))
}

/// GET /api/v1/approvals?project=&env=&status= — newest first
pub async fn list_approvals(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<ApprovalFilter>,
) -> Result<Json<Vec<ApprovalRequest>>, ApprovalError> {
    let approvals = state.engine.list(&filter).await?;
    Ok(Json(approvals))
}

/// GET /api/v1/approvals/stats — counts by status
pub async fn approval_stats(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApprovalStats>, ApprovalError> {
    let stats = state.engine.stats().await?;
    Ok(Json(stats))
}

/// GET /api/v1/approvals/:id
pub async fn get_approval(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ApprovalRequest>, ApprovalError> {
    let request = state.engine.get(&id).await?;
    Ok(Json(request))
}

/// DELETE /api/v1/approvals/:id — removes the request and its history
pub async fn delete_approval(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApprovalError> {
    state.engine.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub struct DecisionRequest {
    /// "approved" | "approve" | "rejected" | "reject"
    pub decision: String,
    pub operator: String,
    pub operator_role: Option<String>,
    pub comment: Option<String>,
}

#[derive(Serialize)]
pub struct DecisionResponse {
    pub request_id: String,
    pub status: String,
    pub approver: String,
}

/// POST /api/v1/approvals/:id/decision — approve or reject a request
pub async fn decide_approval(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(payload): Json<DecisionRequest>,
) -> Result<Json<DecisionResponse>, ApprovalError> {
    let outcome = Outcome::parse_decision(&payload.decision).ok_or_else(|| {
        ApprovalError::Validation(format!("invalid decision '{}'", payload.decision))
    })?;
    if payload.operator.trim().is_empty() {
        return Err(ApprovalError::Validation("operator is empty".into()));
    }

    let resolved = state
        .engine
        .resolve(
            &id,
            outcome,
            Decision {
                operator: payload.operator,
                operator_role: payload.operator_role,
                comment: payload.comment,
            },
        )
        .await?;

    Ok(Json(DecisionResponse {
        request_id: resolved.request_id.clone(),
        status: resolved.status.to_string(),
        approver: resolved.approver.clone().unwrap_or_default(),
    }))
}

/// GET /api/v1/approvals/:id/history — lifecycle audit trail, oldest first
pub async fn approval_history(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<ApprovalHistoryEntry>>, ApprovalError> {
    let history = state.engine.history(&id).await?;
    Ok(Json(history))
}
