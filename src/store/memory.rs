//! In-process store
//!
//! All state sits behind one mutex, so every commit is trivially serializable. A commit
//! stages the rows it touches and writes them back only when every effect succeeds.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use uuid::Uuid;

use super::{
    AvailabilityChange, CommitOutcome, PageWindow, RequestFilter, RequestScope, StoreError,
    StoreResult, TransitionCommit, WorkflowStore,
};
use crate::domain::{
    Notification, Payment, PaymentStatus, RequestNote, ServiceRequest, ServiceRequestStatus,
    ServicemanProfile, StatusHistoryEntry, UserAccount, UserRole,
};
use crate::services::availability::desired_availability;
use crate::services::ratings::apply_review;
use crate::workflow::Effect;

#[derive(Debug, Default)]
struct MemoryState {
    users: HashMap<Uuid, UserAccount>,
    profiles: HashMap<Uuid, ServicemanProfile>,
    requests: HashMap<Uuid, ServiceRequest>,
    history: Vec<StatusHistoryEntry>,
    notes: Vec<RequestNote>,
    payments: HashMap<String, Payment>,
    notifications: Vec<Notification>,
}

impl MemoryState {
    fn active_jobs(&self, serviceman_id: Uuid) -> i64 {
        self.requests
            .values()
            .filter(|r| !r.is_deleted && r.status == ServiceRequestStatus::InProgress)
            .filter(|r| r.is_assigned_to(serviceman_id))
            .count() as i64
    }

    fn reconcile(&mut self, serviceman_id: Uuid) -> Option<AvailabilityChange> {
        let active_jobs = self.active_jobs(serviceman_id);
        let profile = self.profiles.get_mut(&serviceman_id)?;
        let desired = desired_availability(active_jobs);
        if profile.is_available == desired {
            return None;
        }
        profile.is_available = desired;
        profile.updated_at = Utc::now();
        Some(AvailabilityChange {
            serviceman_id,
            is_available: desired,
            active_jobs,
        })
    }

    /// Copies a profile into `staged` on first touch and returns the staged copy
    fn stage_profile<'a>(
        &self,
        staged: &'a mut HashMap<Uuid, ServicemanProfile>,
        serviceman_id: Uuid,
    ) -> StoreResult<&'a mut ServicemanProfile> {
        let missing = || StoreError::NotFound(format!("serviceman profile {}", serviceman_id));
        if !staged.contains_key(&serviceman_id) {
            let profile = self.profiles.get(&serviceman_id).cloned().ok_or_else(missing)?;
            staged.insert(serviceman_id, profile);
        }
        staged.get_mut(&serviceman_id).ok_or_else(missing)
    }

    fn check_expected(&self, commit: &TransitionCommit<'_>) -> StoreResult<()> {
        let request = commit.request;
        match commit.expected_status {
            Some(expected) => {
                let existing = self
                    .requests
                    .get(&request.id)
                    .filter(|r| !r.is_deleted)
                    .ok_or_else(|| StoreError::NotFound(format!("service request {}", request.id)))?;
                if existing.status != expected {
                    return Err(StoreError::StatusMismatch {
                        request_id: request.id,
                        current: existing.status,
                    });
                }
                if commit.expected_updated_at.is_some_and(|at| at != existing.updated_at) {
                    return Err(StoreError::Stale(request.id));
                }
            }
            None => {
                if self.requests.contains_key(&request.id) {
                    return Err(StoreError::Stale(request.id));
                }
            }
        }
        Ok(())
    }

    /// Runs every fallible step against staged copies of the touched rows, then writes
    /// them back. An error leaves the state untouched.
    fn apply(&mut self, commit: TransitionCommit<'_>) -> StoreResult<CommitOutcome> {
        self.check_expected(&commit)?;
        let request = commit.request;

        let mut profiles: HashMap<Uuid, ServicemanProfile> = HashMap::new();
        let mut payments: HashMap<String, Payment> = HashMap::new();
        let mut new_rating = None;
        let mut to_reconcile = Vec::new();
        for effect in commit.effects {
            match effect {
                Effect::LinkPayment { reference } => {
                    let mut payment = self
                        .payments
                        .get(reference)
                        .filter(|p| p.service_request_id.is_none() && p.status == PaymentStatus::Successful)
                        .cloned()
                        .ok_or_else(|| StoreError::PaymentUnavailable(reference.clone()))?;
                    payment.service_request_id = Some(request.id);
                    payment.updated_at = request.updated_at;
                    payments.insert(reference.clone(), payment);
                }
                Effect::SettlePayment { reference, paid_at } => {
                    let mut payment = self
                        .payments
                        .get(reference)
                        .filter(|p| p.service_request_id == Some(request.id))
                        .cloned()
                        .ok_or_else(|| StoreError::PaymentUnavailable(reference.clone()))?;
                    payment.status = PaymentStatus::Successful;
                    payment.paid_at = payment.paid_at.or(Some(*paid_at));
                    payment.updated_at = request.updated_at;
                    payments.insert(reference.clone(), payment);
                }
                Effect::IncrementJobsCompleted { serviceman_id } => {
                    self.stage_profile(&mut profiles, *serviceman_id)?.total_jobs_completed += 1;
                }
                Effect::ApplyReview { serviceman_id, score } => {
                    let profile = self.stage_profile(&mut profiles, *serviceman_id)?;
                    let rating = apply_review(profile, *score)?;
                    new_rating = Some((*serviceman_id, rating));
                }
                Effect::ReconcileAvailability { serviceman_id } => to_reconcile.push(*serviceman_id),
            }
        }

        self.requests.insert(request.id, request.clone());
        self.profiles.extend(profiles);
        self.payments.extend(payments);

        to_reconcile.sort();
        to_reconcile.dedup();
        let availability_changes = to_reconcile
            .into_iter()
            .filter_map(|id| self.reconcile(id))
            .collect();

        if let Some(history) = commit.history {
            self.history.push(history.clone());
        }
        if let Some(note) = commit.note {
            self.notes.push(note.clone());
        }

        Ok(CommitOutcome {
            request: request.clone(),
            availability_changes,
            new_rating,
        })
    }
}

fn page<T: Clone>(items: Vec<T>, window: PageWindow) -> (Vec<T>, u64) {
    let total = items.len() as u64;
    let page = items
        .into_iter()
        .skip(window.offset.max(0) as usize)
        .take(window.limit.max(0) as usize)
        .collect();
    (page, total)
}

/// Store backed by in-process maps
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_user(&self, account: UserAccount) {
        self.state.lock().users.insert(account.id, account);
    }

    pub fn insert_profile(&self, profile: ServicemanProfile) {
        self.state.lock().profiles.insert(profile.user_id, profile);
    }

    /// Seeds a request row directly, bypassing the workflow
    pub fn insert_request(&self, request: ServiceRequest) {
        self.state.lock().requests.insert(request.id, request);
    }
}

#[async_trait]
impl WorkflowStore for MemoryStore {
    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn get_user(&self, id: Uuid) -> StoreResult<Option<UserAccount>> {
        Ok(self.state.lock().users.get(&id).cloned())
    }

    async fn list_admin_ids(&self) -> StoreResult<Vec<Uuid>> {
        let state = self.state.lock();
        let mut ids: Vec<Uuid> = state
            .users
            .values()
            .filter(|u| u.role == UserRole::Admin)
            .map(|u| u.id)
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn get_serviceman_profile(&self, user_id: Uuid) -> StoreResult<Option<ServicemanProfile>> {
        Ok(self.state.lock().profiles.get(&user_id).cloned())
    }

    async fn get_request(&self, id: Uuid) -> StoreResult<Option<ServiceRequest>> {
        Ok(self.state.lock().requests.get(&id).filter(|r| !r.is_deleted).cloned())
    }

    async fn list_requests(
        &self,
        filter: RequestFilter,
        window: PageWindow,
    ) -> StoreResult<(Vec<ServiceRequest>, u64)> {
        let state = self.state.lock();
        let mut requests: Vec<ServiceRequest> = state
            .requests
            .values()
            .filter(|r| !r.is_deleted)
            .filter(|r| match filter.scope {
                RequestScope::All => true,
                RequestScope::Client(id) => r.client_id == id,
                RequestScope::Serviceman(id) => r.is_assigned_to(id),
            })
            .filter(|r| filter.status.map_or(true, |s| r.status == s))
            .cloned()
            .collect();
        requests.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(page(requests, window))
    }

    async fn commit_transition(&self, commit: TransitionCommit<'_>) -> StoreResult<CommitOutcome> {
        self.state.lock().apply(commit)
    }

    async fn reconcile_availability(&self, serviceman_id: Uuid) -> StoreResult<Option<AvailabilityChange>> {
        Ok(self.state.lock().reconcile(serviceman_id))
    }

    async fn status_history(&self, request_id: Uuid) -> StoreResult<Vec<StatusHistoryEntry>> {
        let state = self.state.lock();
        // Newest first
        Ok(state
            .history
            .iter()
            .rev()
            .filter(|h| h.service_request_id == request_id)
            .cloned()
            .collect())
    }

    async fn insert_note(&self, note: &RequestNote) -> StoreResult<()> {
        self.state.lock().notes.push(note.clone());
        Ok(())
    }

    async fn list_notes(&self, request_id: Uuid, client_visible_only: bool) -> StoreResult<Vec<RequestNote>> {
        let state = self.state.lock();
        Ok(state
            .notes
            .iter()
            .filter(|n| n.service_request_id == request_id)
            .filter(|n| !client_visible_only || n.is_visible_to_client)
            .cloned()
            .collect())
    }

    async fn get_payment(&self, reference: &str) -> StoreResult<Option<Payment>> {
        Ok(self.state.lock().payments.get(reference).cloned())
    }

    async fn payments_for_request(&self, request_id: Uuid) -> StoreResult<Vec<Payment>> {
        let state = self.state.lock();
        let mut payments: Vec<Payment> = state
            .payments
            .values()
            .filter(|p| p.service_request_id == Some(request_id))
            .cloned()
            .collect();
        payments.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(payments)
    }

    async fn insert_payment(&self, payment: &Payment) -> StoreResult<()> {
        self.state
            .lock()
            .payments
            .insert(payment.reference.clone(), payment.clone());
        Ok(())
    }

    async fn set_payment_status(
        &self,
        reference: &str,
        status: PaymentStatus,
        paid_at: Option<DateTime<Utc>>,
    ) -> StoreResult<Payment> {
        let mut state = self.state.lock();
        let payment = state
            .payments
            .get_mut(reference)
            .ok_or_else(|| StoreError::NotFound(format!("payment {}", reference)))?;
        payment.status = status;
        payment.paid_at = paid_at.or(payment.paid_at);
        payment.updated_at = Utc::now();
        Ok(payment.clone())
    }

    async fn insert_notifications(&self, notifications: &[Notification]) -> StoreResult<()> {
        self.state.lock().notifications.extend_from_slice(notifications);
        Ok(())
    }

    async fn list_notifications(
        &self,
        user_id: Uuid,
        unread_only: bool,
        window: PageWindow,
    ) -> StoreResult<(Vec<Notification>, u64)> {
        let state = self.state.lock();
        let mut items: Vec<Notification> = state
            .notifications
            .iter()
            .filter(|n| n.user_id == user_id && (!unread_only || !n.is_read))
            .cloned()
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(page(items, window))
    }

    async fn unread_notification_count(&self, user_id: Uuid) -> StoreResult<u64> {
        let state = self.state.lock();
        Ok(state
            .notifications
            .iter()
            .filter(|n| n.user_id == user_id && !n.is_read)
            .count() as u64)
    }

    async fn mark_notification_read(&self, user_id: Uuid, notification_id: Uuid) -> StoreResult<bool> {
        let mut state = self.state.lock();
        match state
            .notifications
            .iter_mut()
            .find(|n| n.id == notification_id && n.user_id == user_id)
        {
            Some(notification) => {
                if !notification.is_read {
                    notification.is_read = true;
                    notification.read_at = Some(Utc::now());
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn mark_all_notifications_read(&self, user_id: Uuid) -> StoreResult<u64> {
        let mut state = self.state.lock();
        let now = Utc::now();
        let mut updated = 0;
        for notification in state
            .notifications
            .iter_mut()
            .filter(|n| n.user_id == user_id && !n.is_read)
        {
            notification.is_read = true;
            notification.read_at = Some(now);
            updated += 1;
        }
        Ok(updated)
    }
}
