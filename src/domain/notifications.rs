//! Notification domain types
//!
//! In-app notification records created at every workflow step.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::PaginationParams;

/// Notification kind
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationType {
    AdminAlert,
    General,
    ServiceAssigned,
    JobAssigned,
    PaymentRequest,
    PaymentConfirmed,
    StatusUpdate,
    JobCompleted,
    ReviewReceived,
    RequestCancelled,
}

impl std::fmt::Display for NotificationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = serde_json::to_string(self).unwrap_or_default();
        write!(f, "{}", s.trim_matches('"'))
    }
}

impl From<String> for NotificationType {
    fn from(s: String) -> Self {
        serde_json::from_str(&format!("\"{}\"", s)).unwrap_or(NotificationType::General)
    }
}

/// Who a notification is addressed to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipient {
    User(Uuid),
    /// Fan-out to every admin account
    Admins,
}

/// A notification produced by a workflow step, not yet persisted
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundNotification {
    pub recipient: Recipient,
    pub title: String,
    pub message: String,
    pub notification_type: NotificationType,
    pub service_request_id: Option<Uuid>,
}

impl OutboundNotification {
    pub fn to_user(
        user_id: Uuid,
        notification_type: NotificationType,
        title: impl Into<String>,
        message: impl Into<String>,
        service_request_id: Option<Uuid>,
    ) -> Self {
        Self {
            recipient: Recipient::User(user_id),
            title: title.into(),
            message: message.into(),
            notification_type,
            service_request_id,
        }
    }

    pub fn to_admins(
        title: impl Into<String>,
        message: impl Into<String>,
        service_request_id: Option<Uuid>,
    ) -> Self {
        Self {
            recipient: Recipient::Admins,
            title: title.into(),
            message: message.into(),
            notification_type: NotificationType::AdminAlert,
            service_request_id,
        }
    }
}

/// Persisted notification record (one per recipient)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub notification_type: NotificationType,
    pub title: String,
    pub message: String,
    pub service_request_id: Option<Uuid>,
    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(
        user_id: Uuid,
        notification_type: NotificationType,
        title: &str,
        message: &str,
        service_request_id: Option<Uuid>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            notification_type,
            title: title.to_string(),
            message: message.to_string(),
            service_request_id,
            is_read: false,
            read_at: None,
            created_at: Utc::now(),
        }
    }
}

/// Query params for listing notifications
#[derive(Debug, Clone, Deserialize, Default)]
pub struct NotificationQuery {
    #[serde(default)]
    pub unread_only: Option<bool>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

impl NotificationQuery {
    pub fn pagination(&self) -> PaginationParams {
        PaginationParams {
            page: self.page,
            per_page: self.per_page,
        }
    }
}

/// Unread count response
#[derive(Debug, Clone, Serialize)]
pub struct UnreadCountResponse {
    pub unread_count: u64,
}
