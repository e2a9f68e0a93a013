//! Out-of-band notification delivery
//!
//! The in-app record is the source of truth; delivery (email/SMS via the worker that
//! consumes the Redis queue) is best-effort.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::domain::{Notification, NotificationType};

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("queue unavailable: {0}")]
    Queue(#[from] redis::RedisError),

    #[error("failed to encode notification: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("{0}")]
    Rejected(String),
}

#[async_trait]
pub trait NotificationDelivery: Send + Sync {
    fn name(&self) -> &'static str;

    async fn deliver(&self, notification: &Notification) -> Result<(), DeliveryError>;

    async fn health_check(&self) -> Result<(), DeliveryError> {
        Ok(())
    }
}

/// Job payload pushed onto the outbound queue
#[derive(Debug, Serialize)]
struct QueuedNotification<'a> {
    notification_id: Uuid,
    user_id: Uuid,
    notification_type: NotificationType,
    title: &'a str,
    message: &'a str,
    service_request_id: Option<Uuid>,
    queued_at: DateTime<Utc>,
}

/// Pushes notifications onto a Redis list for the delivery worker
#[derive(Clone)]
pub struct RedisQueueDelivery {
    conn: ConnectionManager,
    queue_key: String,
}

impl RedisQueueDelivery {
    pub async fn connect(redis_url: &str, queue_key: impl Into<String>) -> Result<Self> {
        let client = redis::Client::open(redis_url).context("Failed to create Redis client")?;

        let conn = ConnectionManager::new(client)
            .await
            .context("Failed to connect to Redis")?;

        let queue_key = queue_key.into();
        info!(queue = %queue_key, "Notification queue connected");

        Ok(Self { conn, queue_key })
    }
}

#[async_trait]
impl NotificationDelivery for RedisQueueDelivery {
    fn name(&self) -> &'static str {
        "redis-queue"
    }

    async fn deliver(&self, notification: &Notification) -> Result<(), DeliveryError> {
        let payload = serde_json::to_string(&QueuedNotification {
            notification_id: notification.id,
            user_id: notification.user_id,
            notification_type: notification.notification_type,
            title: &notification.title,
            message: &notification.message,
            service_request_id: notification.service_request_id,
            queued_at: Utc::now(),
        })?;

        let mut conn = self.conn.clone();
        conn.lpush::<_, _, ()>(&self.queue_key, payload).await?;

        debug!(notification_id = %notification.id, queue = %self.queue_key, "Notification queued");
        Ok(())
    }

    async fn health_check(&self) -> Result<(), DeliveryError> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

/// Logs instead of delivering; used when no queue is configured
#[derive(Debug, Clone, Copy, Default)]
pub struct LogDelivery;

#[async_trait]
impl NotificationDelivery for LogDelivery {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn deliver(&self, notification: &Notification) -> Result<(), DeliveryError> {
        info!(
            notification_id = %notification.id,
            user_id = %notification.user_id,
            notification_type = %notification.notification_type,
            title = %notification.title,
            "Notification delivery skipped (no queue configured)"
        );
        Ok(())
    }
}
