use axum::extract::{Path, State};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::api::DataResponse;
use crate::app::AppState;
use crate::auth::RequireAuth;
use crate::error::{ApiError, ApiResult};

#[derive(Debug, Serialize)]
pub struct ReconcileResponse {
    pub serviceman_id: Uuid,
    pub changed: bool,
    pub is_available: bool,
}

/// POST /servicemen/:id/availability/reconcile
///
/// Recomputes the availability flag from the request table. Admin only.
pub async fn reconcile_availability(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(serviceman_id): Path<Uuid>,
) -> ApiResult<DataResponse<ReconcileResponse>> {
    if !auth.is_admin() {
        return Err(ApiError::forbidden("Only administrators can reconcile availability"));
    }

    let change = state.availability.reconcile_change(serviceman_id).await?;
    let profile = state
        .store
        .get_serviceman_profile(serviceman_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Serviceman profile {} not found", serviceman_id)))?;

    let changed = change.is_some();
    let is_available = change.map_or(profile.is_available, |c| c.is_available);

    Ok(DataResponse::new(ReconcileResponse {
        serviceman_id,
        changed,
        is_available,
    }))
}
