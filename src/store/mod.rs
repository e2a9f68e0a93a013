//! Persistence layer
//!
//! [`WorkflowStore`] is the seam between the workflow and its backing storage.
//! [`PgWorkflowStore`] is the production implementation; [`MemoryStore`] backs the
//! test suite and local runs without a database.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use crate::api::PaginationParams;
use crate::domain::{
    Notification, Payment, PaymentStatus, RequestNote, ServiceRequest, ServiceRequestStatus,
    ServicemanProfile, StatusHistoryEntry, UserAccount,
};
use crate::services::ratings::RatingError;
use crate::workflow::Effect;

pub use memory::MemoryStore;
pub use postgres::PgWorkflowStore;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The persisted status no longer matches the status the transition was planned from
    #[error("service request {request_id} is now {current}")]
    StatusMismatch {
        request_id: Uuid,
        current: ServiceRequestStatus,
    },

    /// Same status, but the row was updated since it was read
    #[error("service request {0} was updated since it was read")]
    Stale(Uuid),

    /// Booking fee already linked, missing, or not successful at commit time
    #[error("payment {0} cannot be linked to a service request")]
    PaymentUnavailable(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error(transparent)]
    Rating(#[from] RatingError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt row: {0}")]
    Decode(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

// ============================================================================
// Query types
// ============================================================================

/// Which requests a caller may list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestScope {
    All,
    Client(Uuid),
    /// Primary or backup slot
    Serviceman(Uuid),
}

#[derive(Debug, Clone, Copy)]
pub struct RequestFilter {
    pub scope: RequestScope,
    pub status: Option<ServiceRequestStatus>,
}

/// LIMIT/OFFSET window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    pub limit: i64,
    pub offset: i64,
}

impl From<&PaginationParams> for PageWindow {
    fn from(params: &PaginationParams) -> Self {
        Self {
            limit: params.limit() as i64,
            offset: params.offset() as i64,
        }
    }
}

// ============================================================================
// Transition commit
// ============================================================================

/// Everything one workflow step writes, applied in a single transaction
#[derive(Debug, Clone, Copy)]
pub struct TransitionCommit<'a> {
    /// `None` inserts `request` as a new row
    pub expected_status: Option<ServiceRequestStatus>,
    pub expected_updated_at: Option<DateTime<Utc>>,
    pub request: &'a ServiceRequest,
    pub history: Option<&'a StatusHistoryEntry>,
    pub note: Option<&'a RequestNote>,
    pub effects: &'a [Effect],
}

/// An availability flag actually written by reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AvailabilityChange {
    pub serviceman_id: Uuid,
    pub is_available: bool,
    pub active_jobs: i64,
}

#[derive(Debug, Clone)]
pub struct CommitOutcome {
    pub request: ServiceRequest,
    pub availability_changes: Vec<AvailabilityChange>,
    /// Set when the commit folded a review into a rating
    pub new_rating: Option<(Uuid, Decimal)>,
}

// ============================================================================
// Store trait
// ============================================================================

#[async_trait]
pub trait WorkflowStore: Send + Sync {
    async fn health_check(&self) -> StoreResult<()>;

    // Accounts
    async fn get_user(&self, id: Uuid) -> StoreResult<Option<UserAccount>>;
    async fn list_admin_ids(&self) -> StoreResult<Vec<Uuid>>;
    async fn get_serviceman_profile(&self, user_id: Uuid) -> StoreResult<Option<ServicemanProfile>>;

    // Requests
    async fn get_request(&self, id: Uuid) -> StoreResult<Option<ServiceRequest>>;
    async fn list_requests(
        &self,
        filter: RequestFilter,
        page: PageWindow,
    ) -> StoreResult<(Vec<ServiceRequest>, u64)>;

    /// Applies a planned transition atomically.
    ///
    /// Fails with [`StoreError::StatusMismatch`] or [`StoreError::Stale`] when the row
    /// moved since it was read; in that case nothing is written.
    async fn commit_transition(&self, commit: TransitionCommit<'_>) -> StoreResult<CommitOutcome>;

    /// Recomputes one serviceman's availability from their IN_PROGRESS jobs.
    /// Returns the change if the flag was written, `None` if it already matched or
    /// the user has no serviceman profile.
    async fn reconcile_availability(&self, serviceman_id: Uuid) -> StoreResult<Option<AvailabilityChange>>;

    async fn status_history(&self, request_id: Uuid) -> StoreResult<Vec<StatusHistoryEntry>>;
    async fn insert_note(&self, note: &RequestNote) -> StoreResult<()>;
    async fn list_notes(&self, request_id: Uuid, client_visible_only: bool) -> StoreResult<Vec<RequestNote>>;

    // Payments
    async fn get_payment(&self, reference: &str) -> StoreResult<Option<Payment>>;
    /// Payments linked to a request, oldest first
    async fn payments_for_request(&self, request_id: Uuid) -> StoreResult<Vec<Payment>>;
    async fn insert_payment(&self, payment: &Payment) -> StoreResult<()>;
    async fn set_payment_status(
        &self,
        reference: &str,
        status: PaymentStatus,
        paid_at: Option<DateTime<Utc>>,
    ) -> StoreResult<Payment>;

    // Notifications
    async fn insert_notifications(&self, notifications: &[Notification]) -> StoreResult<()>;
    async fn list_notifications(
        &self,
        user_id: Uuid,
        unread_only: bool,
        page: PageWindow,
    ) -> StoreResult<(Vec<Notification>, u64)>;
    async fn unread_notification_count(&self, user_id: Uuid) -> StoreResult<u64>;
    /// Returns false when the notification does not exist or belongs to someone else
    async fn mark_notification_read(&self, user_id: Uuid, notification_id: Uuid) -> StoreResult<bool>;
    async fn mark_all_notifications_read(&self, user_id: Uuid) -> StoreResult<u64>;
}
