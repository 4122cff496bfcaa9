use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::errors::{AppError, WorkflowError};
use crate::middleware::identity::Actor;
use crate::models::approval::{
    ChangeRequest, Decided, Decision, PendingRequest, RequestStatus, RequestType, UserId,
};
use crate::models::live::RequestDiff;
use crate::models::mutation::{MutationKind, StagedMutation};
use crate::models::notification::Notification;
use crate::workflow::BatchItem;
use crate::AppState;

// ── Request / Response DTOs ──────────────────────────────────

#[derive(Deserialize)]
pub struct SubmitRequest {
    pub date: NaiveDate,
    pub change: MutationKind,
    pub reason: Option<String>,
}

#[derive(Deserialize)]
pub struct DayParams {
    pub date: NaiveDate,
}

#[derive(Serialize)]
pub struct MyDayResponse {
    pub date: NaiveDate,
    pub pending: Vec<StagedMutation>,
    pub edit_request: Option<RequestStatus>,
    pub delete_request: Option<RequestStatus>,
}

#[derive(Deserialize)]
pub struct QueueParams {
    pub user_id: Option<UserId>,
}

#[derive(Deserialize)]
pub struct RecentParams {
    pub days: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Deserialize)]
pub struct DecisionRequest {
    pub decision: String, // "approve" | "reject"
    pub note: Option<String>,
}

#[derive(Deserialize)]
pub struct BatchDecisionRequest {
    pub ids: Vec<Uuid>,
    pub decision: String,
    pub note: Option<String>,
}

#[derive(Serialize)]
pub struct BatchDecisionResponse {
    pub results: Vec<BatchItem>,
}

#[derive(Deserialize)]
pub struct InboxParams {
    pub limit: Option<i64>,
}

fn parse_id(id_str: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(id_str).map_err(|_| {
        tracing::warn!("invalid UUID: {}", id_str);
        AppError::BadRequest(format!("invalid id '{}'", id_str))
    })
}

fn parse_decision(raw: &str) -> Result<Decision, AppError> {
    Decision::parse(raw).ok_or_else(|| {
        WorkflowError::ValidationFailed(format!(
            "decision must be 'approve' or 'reject', got '{}'",
            raw
        ))
        .into()
    })
}

// ── Submitter ────────────────────────────────────────────────

/// POST /api/v1/edit-requests: stage a change for admin approval
pub async fn submit_edit_request(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Json(body): Json<serde_json::Value>,
) -> Result<(StatusCode, Json<StagedMutation>), AppError> {
    // Parsed here rather than by the extractor so shape errors share the
    // validation error body.
    let payload: SubmitRequest = serde_json::from_value(body)
        .map_err(|e| WorkflowError::ValidationFailed(e.to_string()))?;

    let staged = state
        .workflow
        .staging
        .submit(&actor, payload.date, payload.change, payload.reason.as_deref())
        .await?;
    Ok((StatusCode::CREATED, Json(staged)))
}

/// GET /api/v1/edit-requests/mine?date=: the caller's open changes for a day
pub async fn my_day(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Query(params): Query<DayParams>,
) -> Result<Json<MyDayResponse>, AppError> {
    let staging = &state.workflow.staging;
    let pending = staging.list_pending_for(&actor, params.date).await?;
    let edit_request = staging
        .request_state(&actor, params.date, RequestType::Edit)
        .await?;
    let delete_request = staging
        .request_state(&actor, params.date, RequestType::Delete)
        .await?;

    Ok(Json(MyDayResponse {
        date: params.date,
        pending,
        edit_request,
        delete_request,
    }))
}

// ── Admin ────────────────────────────────────────────────────

/// GET /api/v1/approvals: pending requests, newest first
pub async fn list_approvals(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Query(params): Query<QueueParams>,
) -> Result<Json<Vec<PendingRequest>>, AppError> {
    let rows = state
        .workflow
        .queue
        .list_pending(&actor, params.user_id)
        .await?;
    Ok(Json(rows))
}

/// GET /api/v1/approvals/recent: recently decided requests
pub async fn list_recent_approvals(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Query(params): Query<RecentParams>,
) -> Result<Json<Vec<ChangeRequest>>, AppError> {
    let days = params.days.unwrap_or(state.config.recent_days).clamp(1, 365);
    let limit = params.limit.unwrap_or(state.config.recent_limit).clamp(1, 200);
    let rows = state
        .workflow
        .queue
        .list_recent(&actor, days, limit)
        .await?;
    Ok(Json(rows))
}

/// GET /api/v1/approvals/:id/diff: current vs proposed values
pub async fn get_approval_diff(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id_str): Path<String>,
) -> Result<Json<RequestDiff>, AppError> {
    let id = parse_id(&id_str)?;
    let diff = state.workflow.queue.get_diff(&actor, id).await?;
    Ok(Json(diff))
}

/// POST /api/v1/approvals/:id/decision: approve or reject a request
pub async fn decide_approval(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id_str): Path<String>,
    Json(payload): Json<DecisionRequest>,
) -> Result<Json<Decided>, AppError> {
    let id = parse_id(&id_str)?;
    let decision = parse_decision(&payload.decision)?;

    let decided = state
        .workflow
        .applier
        .decide(&actor, id, decision, payload.note.as_deref())
        .await?;
    Ok(Json(decided))
}

/// POST /api/v1/approvals/decisions: decide several requests, per-id results
pub async fn decide_many(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Json(payload): Json<BatchDecisionRequest>,
) -> Result<Json<BatchDecisionResponse>, AppError> {
    let decision = parse_decision(&payload.decision)?;
    actor.require_admin()?;
    if payload.ids.is_empty() {
        return Err(WorkflowError::ValidationFailed("ids cannot be empty".into()).into());
    }

    let results = state
        .workflow
        .applier
        .decide_many(&actor, &payload.ids, decision, payload.note.as_deref())
        .await;
    Ok(Json(BatchDecisionResponse { results }))
}

// ── Notifications ────────────────────────────────────────────

/// GET /api/v1/notifications: the caller's inbox
pub async fn list_notifications(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Query(params): Query<InboxParams>,
) -> Result<Json<Vec<Notification>>, AppError> {
    let limit = params.limit.unwrap_or(20).clamp(1, 100);
    let notifs = state
        .store
        .list_notifications(actor.user_id, limit)
        .await?;
    Ok(Json(notifs))
}

/// GET /api/v1/notifications/unread: count unread
pub async fn count_unread_notifications(
    State(state): State<Arc<AppState>>,
    actor: Actor,
) -> Result<Json<serde_json::Value>, AppError> {
    let count = state.store.count_unread_notifications(actor.user_id).await?;
    Ok(Json(json!({ "count": count })))
}

/// POST /api/v1/notifications/:id/read: mark as read
pub async fn mark_notification_read(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id_str): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let id = parse_id(&id_str)?;
    let updated = state
        .store
        .mark_notification_read(id, actor.user_id)
        .await?;
    if !updated {
        return Err(WorkflowError::NotFound.into());
    }
    Ok(Json(json!({ "success": true })))
}

/// POST /api/v1/notifications/read-all: mark all as read
pub async fn mark_all_notifications_read(
    State(state): State<Arc<AppState>>,
    actor: Actor,
) -> Result<Json<serde_json::Value>, AppError> {
    let updated = state
        .store
        .mark_all_notifications_read(actor.user_id)
        .await?;
    Ok(Json(json!({ "success": true, "updated": updated })))
}
