//! Service request routes
//!
//! Thin handlers over [`WorkflowService`](crate::workflow::WorkflowService): each
//! workflow endpoint resolves the caller to an actor and hands the event over.

use axum::extract::{Path, Query, State};
use std::sync::Arc;
use uuid::Uuid;

use crate::api::{Created, DataResponse, Json, Paginated};
use crate::app::AppState;
use crate::auth::RequireAuth;
use crate::domain::*;
use crate::error::ApiResult;
use crate::store::PageWindow;

// ============================================================================
// Requests
// ============================================================================

/// POST /service-requests
pub async fn create_request(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Json(input): Json<CreateServiceRequestInput>,
) -> ApiResult<Created<WorkflowResponse>> {
    tracing::info!(
        user_id = %auth.user_id,
        category_id = %input.category_id,
        is_emergency = input.is_emergency,
        "Creating service request"
    );
    let response = state.workflow.create_request(&auth.actor(), input).await?;
    Ok(Created(response))
}

/// GET /service-requests
pub async fn list_requests(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Query(query): Query<ServiceRequestQuery>,
) -> ApiResult<Paginated<ServiceRequest>> {
    let pagination = query.pagination();
    let (requests, total) = state
        .workflow
        .list_requests(&auth.actor(), query.status, PageWindow::from(&pagination))
        .await?;
    Ok(Paginated::new(requests, &pagination, total))
}

/// GET /service-requests/:id
pub async fn get_request(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(request_id): Path<Uuid>,
) -> ApiResult<DataResponse<ServiceRequest>> {
    let request = state.workflow.get_request(&auth.actor(), request_id).await?;
    Ok(DataResponse::new(request))
}

/// GET /service-requests/:id/history
pub async fn status_history(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(request_id): Path<Uuid>,
) -> ApiResult<DataResponse<Vec<StatusHistoryEntry>>> {
    let history = state.workflow.status_history(&auth.actor(), request_id).await?;
    Ok(DataResponse::new(history))
}

// ============================================================================
// Notes
// ============================================================================

/// GET /service-requests/:id/notes
pub async fn list_notes(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(request_id): Path<Uuid>,
) -> ApiResult<DataResponse<Vec<RequestNote>>> {
    let notes = state.workflow.list_notes(&auth.actor(), request_id).await?;
    Ok(DataResponse::new(notes))
}

/// POST /service-requests/:id/notes
pub async fn add_note(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(request_id): Path<Uuid>,
    Json(input): Json<AddNoteInput>,
) -> ApiResult<Created<RequestNote>> {
    let note = state.workflow.add_note(&auth.actor(), request_id, input).await?;
    Ok(Created(note))
}

// ============================================================================
// Workflow events
// ============================================================================

/// POST /service-requests/:id/assign
pub async fn assign_serviceman(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(request_id): Path<Uuid>,
    Json(input): Json<AssignServicemanInput>,
) -> ApiResult<Json<WorkflowResponse>> {
    let response = state
        .workflow
        .assign_serviceman(&auth.actor(), request_id, input)
        .await?;
    Ok(Json(response))
}

/// POST /service-requests/:id/reassign
pub async fn reassign_serviceman(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(request_id): Path<Uuid>,
    Json(input): Json<AssignServicemanInput>,
) -> ApiResult<Json<WorkflowResponse>> {
    let response = state
        .workflow
        .reassign_serviceman(&auth.actor(), request_id, input)
        .await?;
    Ok(Json(response))
}

/// POST /service-requests/:id/estimate
pub async fn submit_estimate(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(request_id): Path<Uuid>,
    Json(input): Json<SubmitEstimateInput>,
) -> ApiResult<Json<WorkflowResponse>> {
    let response = state
        .workflow
        .submit_estimate(&auth.actor(), request_id, input)
        .await?;
    Ok(Json(response))
}

/// POST /service-requests/:id/finalize-price
pub async fn finalize_price(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(request_id): Path<Uuid>,
    Json(input): Json<FinalizePriceInput>,
) -> ApiResult<Json<WorkflowResponse>> {
    let response = state
        .workflow
        .finalize_price(&auth.actor(), request_id, input)
        .await?;
    Ok(Json(response))
}

/// POST /service-requests/:id/authorize-work
pub async fn authorize_work(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(request_id): Path<Uuid>,
    Json(input): Json<AuthorizeWorkInput>,
) -> ApiResult<Json<WorkflowResponse>> {
    let response = state
        .workflow
        .authorize_work(&auth.actor(), request_id, input)
        .await?;
    Ok(Json(response))
}

/// POST /service-requests/:id/complete
pub async fn complete_job(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(request_id): Path<Uuid>,
    Json(input): Json<CompleteJobInput>,
) -> ApiResult<Json<WorkflowResponse>> {
    let response = state
        .workflow
        .complete_job(&auth.actor(), request_id, input)
        .await?;
    Ok(Json(response))
}

/// POST /service-requests/:id/confirm-completion
pub async fn confirm_completion(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(request_id): Path<Uuid>,
    Json(input): Json<ConfirmCompletionInput>,
) -> ApiResult<Json<WorkflowResponse>> {
    let response = state
        .workflow
        .confirm_completion(&auth.actor(), request_id, input)
        .await?;
    Ok(Json(response))
}

/// POST /service-requests/:id/review
pub async fn submit_review(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(request_id): Path<Uuid>,
    Json(input): Json<SubmitReviewInput>,
) -> ApiResult<Json<WorkflowResponse>> {
    let response = state
        .workflow
        .submit_review(&auth.actor(), request_id, input)
        .await?;
    Ok(Json(response))
}

/// POST /service-requests/:id/cancel
pub async fn cancel_request(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(request_id): Path<Uuid>,
    Json(input): Json<CancelRequestInput>,
) -> ApiResult<Json<WorkflowResponse>> {
    let response = state.workflow.cancel(&auth.actor(), request_id, input).await?;
    Ok(Json(response))
}
