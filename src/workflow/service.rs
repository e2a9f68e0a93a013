//! Workflow orchestration
//!
//! Each operation loads the request and its parties, asks the state machine for a
//! plan, commits the plan in one store transaction and finally hands the plan's
//! notifications to the dispatcher. Notification problems never fail an operation.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, instrument};
use uuid::Uuid;

use super::error::{WorkflowError, WorkflowResult};
use super::machine::{self, Actor, Parties, TransitionPlan, WorkflowEvent};
use crate::domain::{
    AddNoteInput, AssignServicemanInput, AuthorizeWorkInput, CancelRequestInput, CompleteJobInput,
    ConfirmCompletionInput, CreateServiceRequestInput, FinalizePriceInput, NoteType, Payment, PaymentStatus,
    RequestNote, ServiceRequest, ServiceRequestStatus, ServicemanCandidate, StatusHistoryEntry,
    SubmitEstimateInput, SubmitReviewInput, UserAccount, UserRole, WorkflowResponse,
};
use crate::services::availability;
use crate::services::notifications::NotificationDispatcher;
use crate::store::{PageWindow, RequestFilter, RequestScope, StoreError, TransitionCommit, WorkflowStore};

fn store_error(action: &'static str, err: StoreError) -> WorkflowError {
    match err {
        StoreError::StatusMismatch { current, .. } => WorkflowError::invalid_transition(action, current),
        StoreError::Stale(id) => WorkflowError::ConcurrentModification(id),
        StoreError::PaymentUnavailable(reference) => WorkflowError::payment(format!(
            "payment {} is no longer available for a new service request",
            reference
        )),
        StoreError::Rating(e) => WorkflowError::Rating(e),
        StoreError::NotFound(what) => WorkflowError::NotFound(what),
        other => WorkflowError::Store(other),
    }
}

fn as_commit(plan: &TransitionPlan) -> TransitionCommit<'_> {
    TransitionCommit {
        expected_status: plan.expected_status,
        expected_updated_at: plan.expected_updated_at,
        request: &plan.request,
        history: plan.history.as_ref(),
        note: plan.note.as_ref(),
        effects: &plan.effects,
    }
}

#[derive(Clone)]
pub struct WorkflowService {
    store: Arc<dyn WorkflowStore>,
    notifier: NotificationDispatcher,
}

impl WorkflowService {
    pub fn new(store: Arc<dyn WorkflowStore>, notifier: NotificationDispatcher) -> Self {
        Self { store, notifier }
    }

    // ========================================================================
    // Loading
    // ========================================================================

    async fn load_request(&self, id: Uuid) -> WorkflowResult<ServiceRequest> {
        self.store
            .get_request(id)
            .await?
            .ok_or_else(|| WorkflowError::not_found(format!("Service request {} not found", id)))
    }

    async fn load_user(&self, id: Uuid) -> WorkflowResult<UserAccount> {
        self.store
            .get_user(id)
            .await?
            .ok_or_else(|| WorkflowError::not_found(format!("User {} not found", id)))
    }

    async fn load_parties(&self, request: &ServiceRequest) -> WorkflowResult<Parties> {
        let client = self.load_user(request.client_id).await?;
        let serviceman = match request.serviceman_id {
            Some(id) => self.store.get_user(id).await?,
            None => None,
        };
        let backup = match request.backup_serviceman_id {
            Some(id) => self.store.get_user(id).await?,
            None => None,
        };
        Ok(Parties {
            client,
            serviceman,
            backup,
        })
    }

    async fn load_candidate(&self, id: Uuid, field: &'static str) -> WorkflowResult<ServicemanCandidate> {
        let account = self
            .store
            .get_user(id)
            .await?
            .ok_or_else(|| WorkflowError::validation(field, format!("serviceman {} does not exist", id)))?;
        let profile = self.store.get_serviceman_profile(id).await?;
        Ok(ServicemanCandidate { account, profile })
    }

    /// Whether `actor` may see `request` at all
    fn ensure_visible(actor: &Actor, request: &ServiceRequest) -> WorkflowResult<()> {
        let visible = match actor {
            Actor::System => true,
            Actor::User { role: UserRole::Admin, .. } => true,
            Actor::User { id, role: UserRole::Client } => request.client_id == *id,
            Actor::User { id, role: UserRole::Serviceman } => request.is_assigned_to(*id),
        };
        if visible {
            Ok(())
        } else {
            Err(WorkflowError::unauthorized("You do not have access to this service request"))
        }
    }

    // ========================================================================
    // Commit
    // ========================================================================

    async fn commit(&self, action: &'static str, actor: &Actor, plan: TransitionPlan) -> WorkflowResult<TransitionPlan> {
        if plan.writes_nothing() {
            self.notifier.dispatch(plan.notifications.clone()).await;
            return Ok(plan);
        }

        let outcome = self
            .store
            .commit_transition(as_commit(&plan))
            .await
            .map_err(|e| store_error(action, e))?;

        info!(
            service_request_id = %outcome.request.id,
            action = action,
            from = ?plan.expected_status,
            to = %outcome.request.status,
            actor = ?actor.id(),
            "Service request transition committed"
        );
        for change in &outcome.availability_changes {
            availability::log_change(change);
        }
        if let Some((serviceman_id, rating)) = outcome.new_rating {
            info!(serviceman_id = %serviceman_id, rating = %rating, "Serviceman rating updated");
        }

        self.notifier.dispatch(plan.notifications.clone()).await;
        Ok(plan)
    }

    async fn run(&self, request_id: Uuid, actor: &Actor, event: WorkflowEvent) -> WorkflowResult<TransitionPlan> {
        let action = event.action();
        let current = self.load_request(request_id).await?;
        let parties = self.load_parties(&current).await?;
        let plan = machine::apply(&current, actor, &parties, event, Utc::now())?;
        self.commit(action, actor, plan).await
    }

    // ========================================================================
    // Operations
    // ========================================================================

    /// Creates a request against a paid, unused booking fee
    #[instrument(skip(self, input), fields(payment_reference = %input.payment_reference))]
    pub async fn create_request(
        &self,
        actor: &Actor,
        input: CreateServiceRequestInput,
    ) -> WorkflowResult<WorkflowResponse> {
        let client_id = actor
            .id()
            .ok_or_else(|| WorkflowError::unauthorized("Only clients can create service requests"))?;
        let client = self.load_user(client_id).await?;

        let payment = self
            .store
            .get_payment(&input.payment_reference)
            .await?
            .filter(|p| p.payer_id == client.id)
            .map(|p| p.summary());

        let plan = machine::open_request(actor, &client, &input, payment.as_ref(), Utc::now())?;
        let plan = self.commit("create service request", actor, plan).await?;
        Ok(WorkflowResponse::new(
            "Service request created successfully",
            plan.request,
        ))
    }

    #[instrument(skip(self, input))]
    pub async fn assign_serviceman(
        &self,
        actor: &Actor,
        request_id: Uuid,
        input: AssignServicemanInput,
    ) -> WorkflowResult<WorkflowResponse> {
        if actor.role() != Some(UserRole::Admin) {
            return Err(WorkflowError::unauthorized("Only administrators can assign servicemen"));
        }
        let serviceman = self.load_candidate(input.serviceman_id, "serviceman_id").await?;
        let backup = match input.backup_serviceman_id {
            Some(id) => Some(self.load_candidate(id, "backup_serviceman_id").await?),
            None => None,
        };

        let event = WorkflowEvent::AssignServiceman {
            serviceman,
            backup,
            notes: input.notes,
        };
        let plan = self.run(request_id, actor, event).await?;
        Ok(WorkflowResponse::new("Serviceman assigned successfully", plan.request))
    }

    #[instrument(skip(self, input))]
    pub async fn reassign_serviceman(
        &self,
        actor: &Actor,
        request_id: Uuid,
        input: AssignServicemanInput,
    ) -> WorkflowResult<WorkflowResponse> {
        if actor.role() != Some(UserRole::Admin) {
            return Err(WorkflowError::unauthorized("Only administrators can reassign servicemen"));
        }
        let serviceman = self.load_candidate(input.serviceman_id, "serviceman_id").await?;
        let backup = match input.backup_serviceman_id {
            Some(id) => Some(self.load_candidate(id, "backup_serviceman_id").await?),
            None => None,
        };

        let event = WorkflowEvent::ReassignServiceman {
            serviceman,
            backup,
            notes: input.notes,
        };
        let plan = self.run(request_id, actor, event).await?;
        Ok(WorkflowResponse::new("Serviceman reassigned successfully", plan.request))
    }

    #[instrument(skip(self, input))]
    pub async fn submit_estimate(
        &self,
        actor: &Actor,
        request_id: Uuid,
        input: SubmitEstimateInput,
    ) -> WorkflowResult<WorkflowResponse> {
        let event = WorkflowEvent::SubmitEstimate {
            estimated_cost: input.estimated_cost,
            notes: input.notes,
        };
        let plan = self.run(request_id, actor, event).await?;
        Ok(WorkflowResponse::new(
            "Estimate submitted successfully. Admin will review and finalize the price.",
            plan.request,
        ))
    }

    #[instrument(skip(self, input))]
    pub async fn finalize_price(
        &self,
        actor: &Actor,
        request_id: Uuid,
        input: FinalizePriceInput,
    ) -> WorkflowResult<WorkflowResponse> {
        let event = WorkflowEvent::FinalizePrice {
            markup_percentage: input.markup_percentage,
            admin_notes: input.admin_notes,
        };
        let plan = self.run(request_id, actor, event).await?;
        let mut response = WorkflowResponse::new(
            "Price finalized successfully. Client has been notified.",
            plan.request,
        );
        response.pricing_breakdown = plan.pricing;
        Ok(response)
    }

    /// Automated transition fired once the gateway confirms a final-price payment.
    /// The payment is marked SUCCESSFUL in the same commit as the status change.
    #[instrument(skip(self, payment), fields(reference = %payment.reference))]
    pub async fn record_payment_verified(
        &self,
        payment: &Payment,
        paid_at: DateTime<Utc>,
    ) -> WorkflowResult<WorkflowResponse> {
        let request_id = payment.service_request_id.ok_or_else(|| {
            WorkflowError::payment(format!("payment {} is not linked to a service request", payment.reference))
        })?;
        let mut confirmed = payment.summary();
        confirmed.status = PaymentStatus::Successful;
        let event = WorkflowEvent::PaymentVerified {
            payment: confirmed,
            paid_at,
        };
        let plan = self.run(request_id, &Actor::System, event).await?;
        Ok(WorkflowResponse::new("Payment recorded", plan.request))
    }

    #[instrument(skip(self, input))]
    pub async fn authorize_work(
        &self,
        actor: &Actor,
        request_id: Uuid,
        input: AuthorizeWorkInput,
    ) -> WorkflowResult<WorkflowResponse> {
        let event = WorkflowEvent::AuthorizeWork {
            instructions: input.instructions,
        };
        let plan = self.run(request_id, actor, event).await?;
        Ok(WorkflowResponse::new(
            "Work authorized. Serviceman has been notified to begin.",
            plan.request,
        ))
    }

    #[instrument(skip(self, input))]
    pub async fn complete_job(
        &self,
        actor: &Actor,
        request_id: Uuid,
        input: CompleteJobInput,
    ) -> WorkflowResult<WorkflowResponse> {
        let event = WorkflowEvent::CompleteJob {
            completion_notes: input.completion_notes,
        };
        let plan = self.run(request_id, actor, event).await?;
        Ok(WorkflowResponse::new(
            "Job marked as complete. Admin has been notified.",
            plan.request,
        ))
    }

    #[instrument(skip(self, input))]
    pub async fn confirm_completion(
        &self,
        actor: &Actor,
        request_id: Uuid,
        input: ConfirmCompletionInput,
    ) -> WorkflowResult<WorkflowResponse> {
        let event = WorkflowEvent::ConfirmCompletion {
            message_to_client: input.message_to_client,
        };
        let plan = self.run(request_id, actor, event).await?;
        Ok(WorkflowResponse::new(
            "Client has been notified of job completion.",
            plan.request,
        ))
    }

    #[instrument(skip(self, input))]
    pub async fn submit_review(
        &self,
        actor: &Actor,
        request_id: Uuid,
        input: SubmitReviewInput,
    ) -> WorkflowResult<WorkflowResponse> {
        let event = WorkflowEvent::SubmitReview {
            rating: input.rating,
            review: input.review,
        };
        let plan = self.run(request_id, actor, event).await?;
        Ok(WorkflowResponse::new(
            "Thank you for your review! Your feedback helps us improve our service.",
            plan.request,
        ))
    }

    #[instrument(skip(self, input))]
    pub async fn cancel(
        &self,
        actor: &Actor,
        request_id: Uuid,
        input: CancelRequestInput,
    ) -> WorkflowResult<WorkflowResponse> {
        let event = WorkflowEvent::Cancel { reason: input.reason };
        let plan = self.run(request_id, actor, event).await?;
        Ok(WorkflowResponse::new("Service request cancelled", plan.request))
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub async fn get_request(&self, actor: &Actor, request_id: Uuid) -> WorkflowResult<ServiceRequest> {
        let request = self.load_request(request_id).await?;
        Self::ensure_visible(actor, &request)?;
        Ok(request)
    }

    /// Requests visible to `actor`, newest first
    pub async fn list_requests(
        &self,
        actor: &Actor,
        status: Option<ServiceRequestStatus>,
        page: PageWindow,
    ) -> WorkflowResult<(Vec<ServiceRequest>, u64)> {
        let scope = match actor {
            Actor::System | Actor::User { role: UserRole::Admin, .. } => RequestScope::All,
            Actor::User { id, role: UserRole::Client } => RequestScope::Client(*id),
            Actor::User { id, role: UserRole::Serviceman } => RequestScope::Serviceman(*id),
        };
        Ok(self.store.list_requests(RequestFilter { scope, status }, page).await?)
    }

    pub async fn status_history(&self, actor: &Actor, request_id: Uuid) -> WorkflowResult<Vec<StatusHistoryEntry>> {
        let request = self.load_request(request_id).await?;
        Self::ensure_visible(actor, &request)?;
        Ok(self.store.status_history(request_id).await?)
    }

    /// Notes on a request; clients only see notes marked visible to them
    pub async fn list_notes(&self, actor: &Actor, request_id: Uuid) -> WorkflowResult<Vec<RequestNote>> {
        let request = self.load_request(request_id).await?;
        Self::ensure_visible(actor, &request)?;
        let client_visible_only = actor.role() == Some(UserRole::Client);
        Ok(self.store.list_notes(request_id, client_visible_only).await?)
    }

    pub async fn add_note(&self, actor: &Actor, request_id: Uuid, input: AddNoteInput) -> WorkflowResult<RequestNote> {
        let request = self.load_request(request_id).await?;
        Self::ensure_visible(actor, &request)?;

        let content = input.content.trim();
        if content.is_empty() {
            return Err(WorkflowError::validation("content", "must not be empty"));
        }

        let (note_type, is_visible_to_client) = match actor.role() {
            Some(UserRole::Client) => (NoteType::Client, true),
            Some(UserRole::Serviceman) => (NoteType::Serviceman, input.is_visible_to_client.unwrap_or(true)),
            Some(UserRole::Admin) => (NoteType::Admin, input.is_visible_to_client.unwrap_or(false)),
            None => (NoteType::System, input.is_visible_to_client.unwrap_or(false)),
        };

        let now = Utc::now();
        let note = RequestNote {
            id: Uuid::new_v4(),
            service_request_id: request_id,
            created_by: actor.id(),
            note_type,
            content: content.to_string(),
            is_visible_to_client,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_note(&note).await?;
        Ok(note)
    }
}
