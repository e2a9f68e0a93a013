//! Notification routes
//!
//! The authenticated user's in-app inbox: list, unread count, mark read.

use axum::extract::{Path, Query, State};
use std::sync::Arc;
use uuid::Uuid;

use crate::api::{DataResponse, MessageResponse, Paginated};
use crate::app::AppState;
use crate::auth::RequireAuth;
use crate::domain::{Notification, NotificationQuery, UnreadCountResponse};
use crate::error::{ApiError, ApiResult};
use crate::store::PageWindow;

/// GET /notifications
pub async fn list_notifications(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Query(query): Query<NotificationQuery>,
) -> ApiResult<Paginated<Notification>> {
    let pagination = query.pagination();
    let unread_only = query.unread_only.unwrap_or(false);

    let (notifications, total) = state
        .store
        .list_notifications(auth.user_id, unread_only, PageWindow::from(&pagination))
        .await?;

    Ok(Paginated::new(notifications, &pagination, total))
}

/// GET /notifications/unread-count
pub async fn unread_count(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
) -> ApiResult<DataResponse<UnreadCountResponse>> {
    let unread_count = state.store.unread_notification_count(auth.user_id).await?;
    Ok(DataResponse::new(UnreadCountResponse { unread_count }))
}

/// PUT /notifications/:id/read
pub async fn mark_read(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(notification_id): Path<Uuid>,
) -> ApiResult<MessageResponse> {
    let updated = state
        .store
        .mark_notification_read(auth.user_id, notification_id)
        .await?;

    if !updated {
        return Err(ApiError::not_found("Notification not found"));
    }

    Ok(MessageResponse::with_code("Notification marked as read", "NOTIFICATION_READ"))
}

/// PUT /notifications/read-all
pub async fn mark_all_read(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
) -> ApiResult<MessageResponse> {
    let count = state.store.mark_all_notifications_read(auth.user_id).await?;

    tracing::debug!(user_id = %auth.user_id, count, "Marked notifications as read");

    Ok(MessageResponse::with_code(
        format!("{} notifications marked as read", count),
        "NOTIFICATIONS_READ",
    ))
}
