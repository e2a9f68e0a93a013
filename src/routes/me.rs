use axum::extract::State;
use std::sync::Arc;

use crate::api::DataResponse;
use crate::app::AppState;
use crate::auth::RequireAuth;
use crate::domain::{MeResponse, UserRole};
use crate::error::ApiResult;

/// Get current authenticated user info, with the serviceman profile when there is one
pub async fn get_me(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
) -> ApiResult<DataResponse<MeResponse>> {
    let serviceman_profile = if auth.role == UserRole::Serviceman {
        state.store.get_serviceman_profile(auth.user_id).await?
    } else {
        None
    };

    let account = &auth.account;
    Ok(DataResponse::new(MeResponse {
        id: account.id,
        role: account.role,
        full_name: account.full_name.clone(),
        email: account.email.clone(),
        serviceman_profile,
    }))
}
