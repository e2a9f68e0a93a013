//! Availability tracking
//!
//! A serviceman is available exactly when no non-deleted request that names them as
//! primary or backup is IN_PROGRESS. The flag is derived state: it is recomputed from
//! the request table after every transition into or out of IN_PROGRESS and after every
//! reassignment, never toggled directly.

use std::sync::Arc;

use tracing::{debug, info};
use uuid::Uuid;

use crate::store::{AvailabilityChange, StoreResult, WorkflowStore};

/// Desired availability given the number of active (IN_PROGRESS) jobs
pub fn desired_availability(active_jobs: i64) -> bool {
    active_jobs == 0
}

/// Recomputes availability flags on demand (admin reconcile endpoint, repair jobs).
/// Workflow transitions reconcile inside their own commit instead.
#[derive(Clone)]
pub struct AvailabilityTracker {
    store: Arc<dyn WorkflowStore>,
}

impl AvailabilityTracker {
    pub fn new(store: Arc<dyn WorkflowStore>) -> Self {
        Self { store }
    }

    /// Returns true when the stored flag changed. Idempotent; a no-op for users
    /// without a serviceman profile.
    pub async fn reconcile(&self, serviceman_id: Uuid) -> StoreResult<bool> {
        Ok(self.reconcile_change(serviceman_id).await?.is_some())
    }

    /// Like [`reconcile`](Self::reconcile), returning the written flag
    pub async fn reconcile_change(&self, serviceman_id: Uuid) -> StoreResult<Option<AvailabilityChange>> {
        let change = self.store.reconcile_availability(serviceman_id).await?;
        match &change {
            Some(change) => log_change(change),
            None => debug!(serviceman_id = %serviceman_id, "Availability already consistent"),
        }
        Ok(change)
    }
}

pub(crate) fn log_change(change: &AvailabilityChange) {
    info!(
        serviceman_id = %change.serviceman_id,
        is_available = change.is_available,
        active_jobs = change.active_jobs,
        "Serviceman availability updated"
    );
}
