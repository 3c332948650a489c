// libs/case-management-cell/src/handlers.rs
use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use case_booking_cell::{CaseAmendment, NewCaseRequest};
use offline_sync_cell::SyncError;
use shared_models::auth::User;
use shared_models::error::AppError;
use shared_utils::extractor::require_admin;

use crate::models::{CaseListQuery, CaseWorkflowError, StatusChangeRequest};
use crate::router::CaseManagementState;

fn sync_error(e: SyncError) -> AppError {
    CaseWorkflowError::Sync(e).into()
}

// ==============================================================================
// CASE HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn create_case(
    State(state): State<CaseManagementState>,
    Extension(user): Extension<User>,
    Json(request): Json<NewCaseRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let result = state.workflow.create_case(request, &user).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "case": result.case,
            "sync": result.sync
        })),
    ))
}

pub async fn list_cases(
    State(state): State<CaseManagementState>,
    Query(query): Query<CaseListQuery>,
) -> Result<Json<Value>, AppError> {
    let cases = state.workflow.list_cases(query.country.as_deref()).await?;

    Ok(Json(json!({
        "cases": cases,
        "total": cases.len()
    })))
}

pub async fn get_case(
    State(state): State<CaseManagementState>,
    Path(case_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let case = state.workflow.get_case(case_id).await?;
    Ok(Json(json!({ "case": case })))
}

#[axum::debug_handler]
pub async fn update_case_status(
    State(state): State<CaseManagementState>,
    Extension(user): Extension<User>,
    Path(case_id): Path<Uuid>,
    Json(change): Json<StatusChangeRequest>,
) -> Result<Json<Value>, AppError> {
    let result = state.workflow.update_status(case_id, change, &user).await?;

    Ok(Json(json!({
        "success": true,
        "case": result.case,
        "sync": result.sync
    })))
}

#[axum::debug_handler]
pub async fn amend_case(
    State(state): State<CaseManagementState>,
    Extension(user): Extension<User>,
    Path(case_id): Path<Uuid>,
    Json(amendment): Json<CaseAmendment>,
) -> Result<Json<Value>, AppError> {
    let result = state.workflow.amend_case(case_id, amendment, &user).await?;

    Ok(Json(json!({
        "success": true,
        "case": result.case,
        "sync": result.sync
    })))
}

// ==============================================================================
// SYNC HANDLERS
// ==============================================================================

pub async fn sync_status(State(state): State<CaseManagementState>) -> Result<Json<Value>, AppError> {
    let status = state.workflow.storage().connection_status().await.map_err(sync_error)?;
    Ok(Json(json!(status)))
}

pub async fn flush_sync_queue(
    State(state): State<CaseManagementState>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    info!(user_id = %user.id, "Manual sync requested");
    let report = state.workflow.storage().queue().flush().await.map_err(sync_error)?;
    Ok(Json(json!(report)))
}

pub async fn probe_connection(State(state): State<CaseManagementState>) -> Json<Value> {
    let online = state.workflow.storage().probe().await;
    Json(json!({ "online": online }))
}

// Dead letters are operator tooling: administrators only

pub async fn list_dead_letters(
    State(state): State<CaseManagementState>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    require_admin(&user)?;
    let dead = state.workflow.storage().queue().dead_letters().await.map_err(sync_error)?;

    Ok(Json(json!({
        "dead_letters": dead,
        "total": dead.len()
    })))
}

pub async fn requeue_dead_letter(
    State(state): State<CaseManagementState>,
    Extension(user): Extension<User>,
    Path(item_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    require_admin(&user)?;
    let item = state
        .workflow
        .storage()
        .queue()
        .requeue_dead_letter(item_id)
        .await
        .map_err(sync_error)?;

    info!(item_id = %item_id, admin = %user.id, "Dead letter re-queued");
    Ok(Json(json!({
        "success": true,
        "item": item
    })))
}

pub async fn discard_dead_letter(
    State(state): State<CaseManagementState>,
    Extension(user): Extension<User>,
    Path(item_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    require_admin(&user)?;
    state
        .workflow
        .storage()
        .queue()
        .discard_dead_letter(item_id)
        .await
        .map_err(sync_error)?;

    info!(item_id = %item_id, admin = %user.id, "Dead letter discarded");
    Ok(StatusCode::NO_CONTENT)
}
