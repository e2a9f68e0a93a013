//! Notification service
//!
//! Turns workflow notifications into one in-app record per recipient, then hands each
//! record to the configured delivery channel in the background. Failures are logged
//! and swallowed: a notification problem never rolls back or fails a workflow step.

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use super::delivery::NotificationDelivery;
use crate::domain::{Notification, NotificationType, OutboundNotification, Recipient};
use crate::store::WorkflowStore;

#[derive(Clone)]
pub struct NotificationDispatcher {
    store: Arc<dyn WorkflowStore>,
    delivery: Arc<dyn NotificationDelivery>,
}

impl NotificationDispatcher {
    pub fn new(store: Arc<dyn WorkflowStore>, delivery: Arc<dyn NotificationDelivery>) -> Self {
        Self { store, delivery }
    }

    /// Create a notification for a single user
    pub async fn notify_user(
        &self,
        user_id: Uuid,
        notification_type: NotificationType,
        title: &str,
        message: &str,
        service_request_id: Option<Uuid>,
    ) -> usize {
        self.dispatch(vec![OutboundNotification::to_user(
            user_id,
            notification_type,
            title,
            message,
            service_request_id,
        )])
        .await
    }

    /// Create one ADMIN_ALERT per admin account
    pub async fn notify_admins(&self, title: &str, message: &str, service_request_id: Option<Uuid>) -> usize {
        self.dispatch(vec![OutboundNotification::to_admins(title, message, service_request_id)])
            .await
    }

    /// Persists one record per recipient and schedules delivery.
    /// Returns the number of records created.
    pub async fn dispatch(&self, outbound: Vec<OutboundNotification>) -> usize {
        if outbound.is_empty() {
            return 0;
        }

        let mut admins: Option<Vec<Uuid>> = None;
        let mut records = Vec::new();
        for notification in &outbound {
            let recipients = match notification.recipient {
                Recipient::User(user_id) => vec![user_id],
                Recipient::Admins => {
                    if admins.is_none() {
                        admins = Some(match self.store.list_admin_ids().await {
                            Ok(ids) => ids,
                            Err(e) => {
                                warn!(error = %e, title = %notification.title, "NotificationDeliveryFailure: could not resolve admins");
                                Vec::new()
                            }
                        });
                    }
                    admins.clone().unwrap_or_default()
                }
            };

            records.extend(recipients.into_iter().map(|user_id| {
                Notification::new(
                    user_id,
                    notification.notification_type,
                    &notification.title,
                    &notification.message,
                    notification.service_request_id,
                )
            }));
        }

        if let Err(e) = self.store.insert_notifications(&records).await {
            warn!(error = %e, count = records.len(), "NotificationDeliveryFailure: could not store notifications");
            return 0;
        }

        for record in &records {
            info!(
                user_id = %record.user_id,
                notification_type = %record.notification_type,
                notification_id = %record.id,
                "Notification created"
            );
        }

        let created = records.len();
        for record in records {
            let delivery = Arc::clone(&self.delivery);
            tokio::spawn(async move {
                if let Err(e) = delivery.deliver(&record).await {
                    warn!(
                        error = %e,
                        channel = delivery.name(),
                        notification_id = %record.id,
                        user_id = %record.user_id,
                        "NotificationDeliveryFailure"
                    );
                }
            });
        }

        created
    }
}
