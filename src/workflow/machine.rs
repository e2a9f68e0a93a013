//! Service request state machine
//!
//! Every workflow step is a pure function of the persisted request, the acting user,
//! the loaded parties and the requested event. It returns a [`TransitionPlan`]: the
//! updated request plus the history row, dependent-record effects and notifications
//! the caller must apply. Nothing here touches storage.
//!
//! ```text
//! PENDING_ADMIN_ASSIGNMENT -> PENDING_ESTIMATION -> ESTIMATION_SUBMITTED
//!   -> AWAITING_CLIENT_APPROVAL -> PAYMENT_COMPLETED -> IN_PROGRESS
//!   -> COMPLETED -> CLIENT_REVIEWED
//! any non-terminal -> CANCELLED
//! ```

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use super::error::{WorkflowError, WorkflowResult};
use crate::domain::{
    booking_fee_for, default_markup_percentage, CreateServiceRequestInput, NoteType,
    NotificationType, OutboundNotification, PaymentStatus, PaymentSummary, PaymentType,
    PricingBreakdown, RequestNote, ServiceRequest, ServiceRequestStatus, ServicemanCandidate,
    StatusHistoryEntry, UserAccount, UserRole,
};

use ServiceRequestStatus as S;

/// Requests booked for a date closer than this are flagged as likely emergencies
const AUTO_EMERGENCY_WINDOW_DAYS: i64 = 2;

// ============================================================================
// Inputs
// ============================================================================

/// Who is driving a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    User { id: Uuid, role: UserRole },
    /// Automated transitions (payment gateway callbacks)
    System,
}

impl Actor {
    pub fn user(id: Uuid, role: UserRole) -> Self {
        Actor::User { id, role }
    }

    pub fn id(&self) -> Option<Uuid> {
        match self {
            Actor::User { id, .. } => Some(*id),
            Actor::System => None,
        }
    }

    pub fn role(&self) -> Option<UserRole> {
        match self {
            Actor::User { role, .. } => Some(*role),
            Actor::System => None,
        }
    }

    fn is(&self, expected: UserRole) -> bool {
        self.role() == Some(expected)
    }

    fn require(&self, expected: UserRole, msg: &str) -> WorkflowResult<Uuid> {
        match self {
            Actor::User { id, role } if *role == expected => Ok(*id),
            _ => Err(WorkflowError::unauthorized(msg)),
        }
    }
}

/// The accounts currently attached to a request
#[derive(Debug, Clone)]
pub struct Parties {
    pub client: UserAccount,
    pub serviceman: Option<UserAccount>,
    pub backup: Option<UserAccount>,
}

/// Events accepted by an existing request
#[derive(Debug, Clone)]
pub enum WorkflowEvent {
    AssignServiceman {
        serviceman: ServicemanCandidate,
        backup: Option<ServicemanCandidate>,
        notes: Option<String>,
    },
    ReassignServiceman {
        serviceman: ServicemanCandidate,
        backup: Option<ServicemanCandidate>,
        notes: Option<String>,
    },
    SubmitEstimate {
        estimated_cost: Decimal,
        notes: Option<String>,
    },
    FinalizePrice {
        markup_percentage: Option<Decimal>,
        admin_notes: Option<String>,
    },
    /// `payment` carries the gateway-confirmed status, which the commit persists
    PaymentVerified {
        payment: PaymentSummary,
        paid_at: DateTime<Utc>,
    },
    AuthorizeWork {
        instructions: Option<String>,
    },
    CompleteJob {
        completion_notes: Option<String>,
    },
    ConfirmCompletion {
        message_to_client: Option<String>,
    },
    SubmitReview {
        rating: i32,
        review: Option<String>,
    },
    Cancel {
        reason: Option<String>,
    },
}

impl WorkflowEvent {
    /// Human-readable verb used in rejection messages
    pub fn action(&self) -> &'static str {
        match self {
            WorkflowEvent::AssignServiceman { .. } => "assign serviceman",
            WorkflowEvent::ReassignServiceman { .. } => "reassign serviceman",
            WorkflowEvent::SubmitEstimate { .. } => "submit estimate",
            WorkflowEvent::FinalizePrice { .. } => "finalize price",
            WorkflowEvent::PaymentVerified { .. } => "record payment",
            WorkflowEvent::AuthorizeWork { .. } => "authorize work",
            WorkflowEvent::CompleteJob { .. } => "mark job complete",
            WorkflowEvent::ConfirmCompletion { .. } => "confirm completion",
            WorkflowEvent::SubmitReview { .. } => "submit review",
            WorkflowEvent::Cancel { .. } => "cancel",
        }
    }
}

// ============================================================================
// Outputs
// ============================================================================

/// Dependent-record changes that must commit atomically with the request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Attach a booking-fee payment to the newly created request
    LinkPayment { reference: String },
    /// Mark the request's final-price payment SUCCESSFUL
    SettlePayment { reference: String, paid_at: DateTime<Utc> },
    IncrementJobsCompleted { serviceman_id: Uuid },
    /// Fold a client's score into the serviceman's running average
    ApplyReview { serviceman_id: Uuid, score: u8 },
    ReconcileAvailability { serviceman_id: Uuid },
}

/// Everything a transition changes, computed up front
#[derive(Debug, Clone)]
pub struct TransitionPlan {
    /// Status the persisted row must still have at commit time; `None` on creation
    pub expected_status: Option<ServiceRequestStatus>,
    pub expected_updated_at: Option<DateTime<Utc>>,
    pub request: ServiceRequest,
    pub history: Option<StatusHistoryEntry>,
    pub note: Option<RequestNote>,
    pub effects: Vec<Effect>,
    pub notifications: Vec<OutboundNotification>,
    pub pricing: Option<PricingBreakdown>,
}

impl TransitionPlan {
    fn from_current(current: &ServiceRequest) -> Self {
        Self {
            expected_status: Some(current.status),
            expected_updated_at: Some(current.updated_at),
            request: current.clone(),
            history: None,
            note: None,
            effects: Vec::new(),
            notifications: Vec::new(),
            pricing: None,
        }
    }

    /// True when nothing needs to be written (notification-only steps)
    pub fn writes_nothing(&self) -> bool {
        self.history.is_none()
            && self.note.is_none()
            && self.effects.is_empty()
            && Some(self.request.status) == self.expected_status
            && Some(self.request.updated_at) == self.expected_updated_at
    }

    fn move_to(
        &mut self,
        to: ServiceRequestStatus,
        actor: &Actor,
        notes: Option<&str>,
        now: DateTime<Utc>,
    ) {
        let from = self.request.status;
        self.request.status = to;
        self.request.updated_at = now;
        self.history = Some(StatusHistoryEntry {
            id: Uuid::new_v4(),
            service_request_id: self.request.id,
            previous_status: Some(from),
            new_status: to,
            changed_by: actor.id(),
            changed_at: now,
            notes: notes.unwrap_or_default().to_string(),
            is_automated: matches!(actor, Actor::System),
        });
    }

    fn reconcile(&mut self, serviceman_ids: impl IntoIterator<Item = Uuid>) {
        for serviceman_id in serviceman_ids {
            let effect = Effect::ReconcileAvailability { serviceman_id };
            if !self.effects.contains(&effect) {
                self.effects.push(effect);
            }
        }
    }

    fn notify(&mut self, notification: OutboundNotification) {
        self.notifications.push(notification);
    }
}

// ============================================================================
// Pricing
// ============================================================================

/// `final_cost = estimate * (1 + markup / 100)`, rounded to 2 places
pub fn compute_pricing(estimate: Decimal, markup_percentage: Decimal) -> PricingBreakdown {
    let base_cost = estimate.round_dp(2);
    let hundred = Decimal::ONE_HUNDRED;
    let final_cost = (base_cost * (Decimal::ONE + markup_percentage / hundred)).round_dp(2);

    PricingBreakdown {
        base_cost,
        platform_fee: final_cost - base_cost,
        markup_percentage,
        final_cost,
    }
}

/// Formats an amount as naira with thousands separators, e.g. `₦11,000.00`
pub fn format_amount(amount: Decimal) -> String {
    let text = format!("{:.2}", amount.round_dp(2));
    let (whole, fraction) = text.split_once('.').unwrap_or((text.as_str(), "00"));
    let (sign, digits) = match whole.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", whole),
    };

    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    format!("{}₦{}.{}", sign, grouped, fraction)
}

fn with_suffix(base: String, label: &str, extra: Option<&str>) -> String {
    match extra.map(str::trim).filter(|s| !s.is_empty()) {
        Some(text) => format!("{}\n\n{}{}", base, label, text),
        None => base,
    }
}

// ============================================================================
// Creation
// ============================================================================

/// Opens a new request against a verified booking-fee payment
pub fn open_request(
    actor: &Actor,
    client: &UserAccount,
    input: &CreateServiceRequestInput,
    payment: Option<&PaymentSummary>,
    now: DateTime<Utc>,
) -> WorkflowResult<TransitionPlan> {
    let client_id = actor.require(UserRole::Client, "Only clients can create service requests")?;
    if client_id != client.id {
        return Err(WorkflowError::unauthorized("Requests can only be booked for yourself"));
    }

    if input.client_address.trim().is_empty() {
        return Err(WorkflowError::validation("client_address", "must not be empty"));
    }
    if input.service_description.trim().is_empty() {
        return Err(WorkflowError::validation("service_description", "must not be empty"));
    }

    let payment = payment.ok_or_else(|| {
        WorkflowError::payment(format!(
            "no booking fee payment found for reference {}",
            input.payment_reference
        ))
    })?;
    if payment.payment_type != PaymentType::InitialBooking {
        return Err(WorkflowError::payment(format!(
            "payment {} is a {} payment, not a booking fee",
            payment.reference, payment.payment_type
        )));
    }
    if payment.status != PaymentStatus::Successful {
        return Err(WorkflowError::payment(format!(
            "booking fee payment is {}, expected SUCCESSFUL",
            payment.status
        )));
    }
    if payment.service_request_id.is_some() {
        return Err(WorkflowError::payment(
            "booking fee payment has already been used for another service request",
        ));
    }
    let fee = booking_fee_for(input.is_emergency);
    if payment.amount != fee {
        return Err(WorkflowError::amount_mismatch(fee, payment.amount));
    }

    let days_until_booking = (input.booking_date - now.date_naive()).num_days();
    let auto_flagged_emergency = !input.is_emergency && days_until_booking < AUTO_EMERGENCY_WINDOW_DAYS;

    let request = ServiceRequest {
        id: Uuid::new_v4(),
        client_id,
        serviceman_id: None,
        backup_serviceman_id: None,
        preferred_serviceman_id: input.preferred_serviceman_id,
        category_id: input.category_id,
        booking_date: input.booking_date,
        is_emergency: input.is_emergency,
        auto_flagged_emergency,
        initial_booking_fee: fee,
        serviceman_estimated_cost: None,
        admin_markup_percentage: default_markup_percentage(),
        final_cost: None,
        status: S::PendingAdminAssignment,
        client_address: input.client_address.trim().to_string(),
        service_description: input.service_description.trim().to_string(),
        created_at: now,
        updated_at: now,
        inspection_completed_at: None,
        work_completed_at: None,
        is_deleted: false,
        deleted_at: None,
    };

    let kind = if request.is_emergency { "EMERGENCY" } else { "Normal" };
    let mut plan = TransitionPlan {
        expected_status: None,
        expected_updated_at: None,
        history: Some(StatusHistoryEntry {
            id: Uuid::new_v4(),
            service_request_id: request.id,
            previous_status: None,
            new_status: S::PendingAdminAssignment,
            changed_by: Some(client_id),
            changed_at: now,
            notes: "Service request created".to_string(),
            is_automated: false,
        }),
        note: None,
        effects: vec![Effect::LinkPayment {
            reference: payment.reference.clone(),
        }],
        notifications: Vec::new(),
        pricing: None,
        request,
    };

    let request = &plan.request;
    let admin_alert = OutboundNotification::to_admins(
        format!("New Service Request - {}", kind),
        format!(
            "{} booked a {} service request for {}.\n\nAddress: {}\nDescription: {}\nBooking fee paid: {}{}",
            client.full_name,
            kind.to_lowercase(),
            request.booking_date,
            request.client_address,
            request.service_description,
            format_amount(fee),
            if request.auto_flagged_emergency {
                "\n\nFlagged: booking date is very close, consider treating as urgent."
            } else {
                ""
            }
        ),
        Some(request.id),
    );
    let confirmation = OutboundNotification::to_user(
        client_id,
        NotificationType::StatusUpdate,
        "Service Request Received",
        format!(
            "Your booking fee of {} was received and your request has been created. An administrator will assign a serviceman shortly.",
            format_amount(fee)
        ),
        Some(request.id),
    );
    plan.notify(admin_alert);
    plan.notify(confirmation);

    Ok(plan)
}

// ============================================================================
// Transitions
// ============================================================================

/// Applies `event` to `current`, returning the plan or the reason it is rejected.
/// A rejected event never yields a partially applied plan.
pub fn apply(
    current: &ServiceRequest,
    actor: &Actor,
    parties: &Parties,
    event: WorkflowEvent,
    now: DateTime<Utc>,
) -> WorkflowResult<TransitionPlan> {
    match event {
        WorkflowEvent::AssignServiceman {
            serviceman,
            backup,
            notes,
        } => assign(current, actor, parties, serviceman, backup, notes, now),
        WorkflowEvent::ReassignServiceman {
            serviceman,
            backup,
            notes,
        } => reassign(current, actor, parties, serviceman, backup, notes, now),
        WorkflowEvent::SubmitEstimate {
            estimated_cost,
            notes,
        } => submit_estimate(current, actor, parties, estimated_cost, notes, now),
        WorkflowEvent::FinalizePrice {
            markup_percentage,
            admin_notes,
        } => finalize_price(current, actor, markup_percentage, admin_notes, now),
        WorkflowEvent::PaymentVerified { payment, paid_at } => {
            payment_verified(current, actor, parties, payment, paid_at, now)
        }
        WorkflowEvent::AuthorizeWork { instructions } => authorize_work(current, actor, parties, instructions, now),
        WorkflowEvent::CompleteJob { completion_notes } => {
            complete_job(current, actor, parties, completion_notes, now)
        }
        WorkflowEvent::ConfirmCompletion { message_to_client } => {
            confirm_completion(current, actor, parties, message_to_client)
        }
        WorkflowEvent::SubmitReview { rating, review } => submit_review(current, actor, parties, rating, review, now),
        WorkflowEvent::Cancel { reason } => cancel(current, actor, reason, now),
    }
}

fn expect_status(current: &ServiceRequest, expected: ServiceRequestStatus, action: &'static str) -> WorkflowResult<()> {
    if current.status != expected {
        return Err(WorkflowError::invalid_transition(action, current.status));
    }
    Ok(())
}

fn check_candidate(candidate: &ServicemanCandidate, field: &'static str) -> WorkflowResult<()> {
    if !candidate.account.is_serviceman() {
        return Err(WorkflowError::validation(field, "user is not a serviceman"));
    }
    match &candidate.profile {
        Some(profile) if profile.is_approved => Ok(()),
        Some(_) => Err(WorkflowError::validation(field, "serviceman has not been approved")),
        None => Err(WorkflowError::validation(field, "serviceman has no profile")),
    }
}

fn check_assignment(serviceman: &ServicemanCandidate, backup: Option<&ServicemanCandidate>) -> WorkflowResult<()> {
    check_candidate(serviceman, "serviceman_id")?;
    if let Some(backup) = backup {
        check_candidate(backup, "backup_serviceman_id")?;
        if backup.account.id == serviceman.account.id {
            return Err(WorkflowError::validation(
                "backup_serviceman_id",
                "backup serviceman must differ from the primary serviceman",
            ));
        }
    }
    Ok(())
}

fn client_contact(client: &UserAccount) -> String {
    format!(
        "Client: {}\nPhone: {}\nEmail: {}",
        client.full_name,
        client.phone_number.as_deref().unwrap_or("N/A"),
        client.email
    )
}

fn assignment_notifications(
    plan: &mut TransitionPlan,
    parties: &Parties,
    serviceman: Option<&UserAccount>,
    backup: Option<&UserAccount>,
) {
    let request_id = plan.request.id;
    let urgency = if plan.request.is_emergency { " (EMERGENCY)" } else { "" };
    let details = format!(
        "{}\nAddress: {}\nBooking date: {}\nDescription: {}",
        client_contact(&parties.client),
        plan.request.client_address,
        plan.request.booking_date,
        plan.request.service_description
    );

    if let Some(serviceman) = serviceman {
        plan.notify(OutboundNotification::to_user(
            serviceman.id,
            NotificationType::ServiceAssigned,
            format!("New Job Assigned{}", urgency),
            format!(
                "You have been assigned as the serviceman for a new job. Please inspect the site and submit your cost estimate.\n\n{}",
                details
            ),
            Some(request_id),
        ));
    }
    if let Some(backup) = backup {
        plan.notify(OutboundNotification::to_user(
            backup.id,
            NotificationType::ServiceAssigned,
            format!("Backup Assignment{}", urgency),
            format!(
                "You have been assigned as the backup serviceman for a job. Stay available in case the primary serviceman cannot complete it.\n\n{}",
                details
            ),
            Some(request_id),
        ));
    }
}

fn assign(
    current: &ServiceRequest,
    actor: &Actor,
    parties: &Parties,
    serviceman: ServicemanCandidate,
    backup: Option<ServicemanCandidate>,
    notes: Option<String>,
    now: DateTime<Utc>,
) -> WorkflowResult<TransitionPlan> {
    actor.require(UserRole::Admin, "Only administrators can assign servicemen")?;
    expect_status(current, S::PendingAdminAssignment, "assign serviceman")?;
    check_assignment(&serviceman, backup.as_ref())?;

    let mut plan = TransitionPlan::from_current(current);
    plan.request.serviceman_id = Some(serviceman.account.id);
    plan.request.backup_serviceman_id = backup.as_ref().map(|b| b.account.id);
    plan.move_to(S::PendingEstimation, actor, notes.as_deref(), now);

    assignment_notifications(&mut plan, parties, Some(&serviceman.account), backup.as_ref().map(|b| &b.account));
    plan.notify(OutboundNotification::to_user(
        current.client_id,
        NotificationType::StatusUpdate,
        "Serviceman Assigned",
        format!(
            "{} has been assigned to your service request and will contact you to inspect the job and prepare an estimate.",
            serviceman.account.full_name
        ),
        Some(current.id),
    ));

    Ok(plan)
}

fn reassign(
    current: &ServiceRequest,
    actor: &Actor,
    parties: &Parties,
    serviceman: ServicemanCandidate,
    backup: Option<ServicemanCandidate>,
    notes: Option<String>,
    now: DateTime<Utc>,
) -> WorkflowResult<TransitionPlan> {
    actor.require(UserRole::Admin, "Only administrators can reassign servicemen")?;
    let reassignable = matches!(
        current.status,
        S::PendingEstimation | S::EstimationSubmitted | S::AwaitingClientApproval | S::PaymentCompleted | S::InProgress
    );
    if !reassignable {
        return Err(WorkflowError::invalid_transition("reassign serviceman", current.status));
    }
    check_assignment(&serviceman, backup.as_ref())?;

    let new_primary = serviceman.account.id;
    let new_backup = backup.as_ref().map(|b| b.account.id);
    if current.serviceman_id == Some(new_primary) && current.backup_serviceman_id == new_backup {
        return Err(WorkflowError::validation(
            "serviceman_id",
            "these servicemen are already assigned to the request",
        ));
    }

    let previous_holders = current.assigned_servicemen();
    let mut plan = TransitionPlan::from_current(current);
    plan.request.serviceman_id = Some(new_primary);
    plan.request.backup_serviceman_id = new_backup;
    plan.request.updated_at = now;

    let new_holders = plan.request.assigned_servicemen();
    plan.reconcile(previous_holders.iter().copied().chain(new_holders.iter().copied()));

    let describe = |id: Option<Uuid>| id.map(|id| id.to_string()).unwrap_or_else(|| "none".to_string());
    let mut content = format!(
        "Assignment changed. Primary: {} -> {}. Backup: {} -> {}.",
        describe(current.serviceman_id),
        describe(Some(new_primary)),
        describe(current.backup_serviceman_id),
        describe(new_backup)
    );
    if let Some(extra) = notes.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        content.push(' ');
        content.push_str(extra);
    }
    plan.note = Some(RequestNote {
        id: Uuid::new_v4(),
        service_request_id: current.id,
        created_by: actor.id(),
        note_type: NoteType::System,
        content,
        is_visible_to_client: false,
        created_at: now,
        updated_at: now,
    });

    let primary_changed = current.serviceman_id != Some(new_primary);
    let backup_changed = current.backup_serviceman_id != new_backup;
    assignment_notifications(
        &mut plan,
        parties,
        primary_changed.then_some(&serviceman.account),
        if backup_changed { backup.as_ref().map(|b| &b.account) } else { None },
    );

    for removed in previous_holders.into_iter().filter(|id| !new_holders.contains(id)) {
        plan.notify(OutboundNotification::to_user(
            removed,
            NotificationType::StatusUpdate,
            "Assignment Removed",
            "You have been removed from a service request. No further action is needed from you on this job.",
            Some(current.id),
        ));
    }
    if primary_changed {
        plan.notify(OutboundNotification::to_user(
            current.client_id,
            NotificationType::StatusUpdate,
            "Serviceman Changed",
            format!(
                "{} is now the serviceman handling your request.",
                serviceman.account.full_name
            ),
            Some(current.id),
        ));
    }

    Ok(plan)
}

fn submit_estimate(
    current: &ServiceRequest,
    actor: &Actor,
    parties: &Parties,
    estimated_cost: Decimal,
    notes: Option<String>,
    now: DateTime<Utc>,
) -> WorkflowResult<TransitionPlan> {
    let serviceman_id = actor.require(UserRole::Serviceman, "Only servicemen can submit estimates")?;
    if current.serviceman_id != Some(serviceman_id) {
        return Err(WorkflowError::unauthorized(
            "Only the primary serviceman assigned to this request can submit an estimate",
        ));
    }
    expect_status(current, S::PendingEstimation, "submit estimate")?;
    if estimated_cost <= Decimal::ZERO {
        return Err(WorkflowError::validation("estimated_cost", "must be greater than zero"));
    }

    let estimate = estimated_cost.round_dp(2);
    let mut plan = TransitionPlan::from_current(current);
    plan.request.serviceman_estimated_cost = Some(estimate);
    plan.request.inspection_completed_at = Some(now);
    plan.move_to(S::EstimationSubmitted, actor, notes.as_deref(), now);

    let name = parties
        .serviceman
        .as_ref()
        .map(|s| s.full_name.as_str())
        .unwrap_or("The assigned serviceman");
    plan.notify(OutboundNotification::to_admins(
        "Cost Estimate Submitted",
        with_suffix(
            format!(
                "{} submitted a cost estimate of {}. Please review and add the platform fee.",
                name,
                format_amount(estimate)
            ),
            "Notes: ",
            notes.as_deref(),
        ),
        Some(current.id),
    ));

    Ok(plan)
}

fn finalize_price(
    current: &ServiceRequest,
    actor: &Actor,
    markup_percentage: Option<Decimal>,
    admin_notes: Option<String>,
    now: DateTime<Utc>,
) -> WorkflowResult<TransitionPlan> {
    actor.require(UserRole::Admin, "Only administrators can finalize pricing")?;
    expect_status(current, S::EstimationSubmitted, "finalize price")?;
    let estimate = current.serviceman_estimated_cost.ok_or_else(|| {
        WorkflowError::validation("serviceman_estimated_cost", "no serviceman estimate has been recorded")
    })?;

    let markup = markup_percentage.unwrap_or_else(default_markup_percentage);
    if markup < Decimal::ZERO || markup > Decimal::ONE_HUNDRED {
        return Err(WorkflowError::validation("markup_percentage", "must be between 0 and 100"));
    }

    let pricing = compute_pricing(estimate, markup);
    let mut plan = TransitionPlan::from_current(current);
    plan.request.admin_markup_percentage = markup;
    plan.request.final_cost = Some(pricing.final_cost);
    plan.move_to(S::AwaitingClientApproval, actor, admin_notes.as_deref(), now);

    plan.notify(OutboundNotification::to_user(
        current.client_id,
        NotificationType::PaymentRequest,
        "Price Ready for Your Approval",
        with_suffix(
            format!(
                "Your service request has been priced:\n\n- Service cost: {}\n- Platform fee ({}%): {}\n- Total amount: {}\n\nPlease review and proceed with payment to confirm the job.",
                format_amount(pricing.base_cost),
                markup.normalize(),
                format_amount(pricing.platform_fee),
                format_amount(pricing.final_cost)
            ),
            "",
            admin_notes.as_deref(),
        ),
        Some(current.id),
    ));
    plan.pricing = Some(pricing);

    Ok(plan)
}

fn payment_verified(
    current: &ServiceRequest,
    actor: &Actor,
    parties: &Parties,
    payment: PaymentSummary,
    paid_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> WorkflowResult<TransitionPlan> {
    if *actor != Actor::System {
        return Err(WorkflowError::unauthorized(
            "Payment confirmation is only accepted from the payment gateway",
        ));
    }
    expect_status(current, S::AwaitingClientApproval, "record payment")?;

    if !payment.payment_type.settles_final_price() {
        return Err(WorkflowError::payment(format!(
            "payment {} is a {} payment, not a service payment",
            payment.reference, payment.payment_type
        )));
    }
    if payment.status != PaymentStatus::Successful {
        return Err(WorkflowError::payment(format!(
            "payment {} is {}, expected SUCCESSFUL",
            payment.reference, payment.status
        )));
    }
    if payment.service_request_id != Some(current.id) {
        return Err(WorkflowError::payment(format!(
            "payment {} does not belong to this service request",
            payment.reference
        )));
    }
    if let Some(final_cost) = current.final_cost {
        if payment.amount != final_cost {
            return Err(WorkflowError::amount_mismatch(final_cost, payment.amount));
        }
    }

    let mut plan = TransitionPlan::from_current(current);
    let note = format!("Payment {} verified", payment.reference);
    plan.move_to(S::PaymentCompleted, actor, Some(&note), now);
    plan.effects.push(Effect::SettlePayment {
        reference: payment.reference.clone(),
        paid_at,
    });

    plan.notify(OutboundNotification::to_admins(
        "Client Payment Received",
        format!(
            "{} paid {} for their service request. Please authorize the serviceman to begin work.",
            parties.client.full_name,
            format_amount(payment.amount)
        ),
        Some(current.id),
    ));
    plan.notify(OutboundNotification::to_user(
        current.client_id,
        NotificationType::PaymentConfirmed,
        "Payment Confirmed",
        format!(
            "We received your payment of {}. An administrator will authorize the work shortly.",
            format_amount(payment.amount)
        ),
        Some(current.id),
    ));

    Ok(plan)
}

fn authorize_work(
    current: &ServiceRequest,
    actor: &Actor,
    parties: &Parties,
    instructions: Option<String>,
    now: DateTime<Utc>,
) -> WorkflowResult<TransitionPlan> {
    actor.require(UserRole::Admin, "Only administrators can authorize work")?;
    expect_status(current, S::PaymentCompleted, "authorize work")?;
    let serviceman_id = current
        .serviceman_id
        .ok_or_else(|| WorkflowError::validation("serviceman_id", "no serviceman assigned"))?;

    let mut plan = TransitionPlan::from_current(current);
    plan.move_to(S::InProgress, actor, instructions.as_deref(), now);
    plan.reconcile(current.assigned_servicemen());

    plan.notify(OutboundNotification::to_user(
        serviceman_id,
        NotificationType::JobAssigned,
        "Work Authorized",
        with_suffix(
            format!(
                "Payment confirmed! You are authorized to begin work.\n\n{}\nAddress: {}\nJob amount: {}",
                client_contact(&parties.client),
                current.client_address,
                current.final_cost.map(format_amount).unwrap_or_else(|| "N/A".to_string())
            ),
            "Instructions: ",
            instructions.as_deref(),
        ),
        Some(current.id),
    ));
    plan.notify(OutboundNotification::to_user(
        current.client_id,
        NotificationType::StatusUpdate,
        "Work Has Begun",
        "Your service request is now in progress. The serviceman will contact you shortly to complete the work.",
        Some(current.id),
    ));

    Ok(plan)
}

fn complete_job(
    current: &ServiceRequest,
    actor: &Actor,
    parties: &Parties,
    completion_notes: Option<String>,
    now: DateTime<Utc>,
) -> WorkflowResult<TransitionPlan> {
    let serviceman_id = actor.require(UserRole::Serviceman, "Only servicemen can complete jobs")?;
    if !current.is_assigned_to(serviceman_id) {
        return Err(WorkflowError::unauthorized("You are not assigned to this service request"));
    }
    expect_status(current, S::InProgress, "mark job complete")?;

    let mut plan = TransitionPlan::from_current(current);
    plan.request.work_completed_at = Some(now);
    plan.move_to(S::Completed, actor, completion_notes.as_deref(), now);

    // The counter belongs to the primary: it is the party rated at review time.
    if let Some(primary) = current.serviceman_id {
        plan.effects.push(Effect::IncrementJobsCompleted { serviceman_id: primary });
    }
    plan.reconcile(current.assigned_servicemen());

    let completer = [parties.serviceman.as_ref(), parties.backup.as_ref()]
        .into_iter()
        .flatten()
        .find(|account| account.id == serviceman_id)
        .map(|account| account.full_name.clone())
        .unwrap_or_else(|| "The serviceman".to_string());
    plan.notify(OutboundNotification::to_admins(
        "Job Completed",
        with_suffix(
            format!(
                "{} has marked the job as completed. Please verify and notify the client.",
                completer
            ),
            "Completion notes: ",
            completion_notes.as_deref(),
        ),
        Some(current.id),
    ));

    Ok(plan)
}

fn confirm_completion(
    current: &ServiceRequest,
    actor: &Actor,
    parties: &Parties,
    message_to_client: Option<String>,
) -> WorkflowResult<TransitionPlan> {
    actor.require(UserRole::Admin, "Only administrators can confirm completion")?;
    expect_status(current, S::Completed, "confirm completion")?;

    let mut plan = TransitionPlan::from_current(current);
    let serviceman = parties
        .serviceman
        .as_ref()
        .map(|s| s.full_name.as_str())
        .unwrap_or("N/A");
    plan.notify(OutboundNotification::to_user(
        current.client_id,
        NotificationType::JobCompleted,
        "Job Completed",
        with_suffix(
            format!(
                "Great news! Your service request has been completed successfully.\n\nServiceman: {}\n\nPlease take a moment to rate your experience.",
                serviceman
            ),
            "",
            message_to_client.as_deref(),
        ),
        Some(current.id),
    ));

    Ok(plan)
}

fn submit_review(
    current: &ServiceRequest,
    actor: &Actor,
    parties: &Parties,
    rating: i32,
    review: Option<String>,
    now: DateTime<Utc>,
) -> WorkflowResult<TransitionPlan> {
    let client_id = actor.require(UserRole::Client, "Only clients can submit reviews")?;
    if current.client_id != client_id {
        return Err(WorkflowError::unauthorized("This is not your service request"));
    }
    expect_status(current, S::Completed, "submit review")?;
    let score = u8::try_from(rating)
        .ok()
        .filter(|score| (1..=5).contains(score))
        .ok_or_else(|| WorkflowError::validation("rating", "must be between 1 and 5"))?;

    let mut plan = TransitionPlan::from_current(current);
    plan.move_to(S::ClientReviewed, actor, review.as_deref(), now);

    if let Some(serviceman_id) = current.serviceman_id {
        plan.effects.push(Effect::ApplyReview { serviceman_id, score });
        plan.notify(OutboundNotification::to_user(
            serviceman_id,
            NotificationType::ReviewReceived,
            format!("New Review - {} star{}", score, if score == 1 { "" } else { "s" }),
            with_suffix(
                format!("You received a {}-star rating from {}.", score, parties.client.full_name),
                "Review: ",
                review.as_deref(),
            ),
            Some(current.id),
        ));
    }

    let serviceman = parties
        .serviceman
        .as_ref()
        .map(|s| s.full_name.as_str())
        .unwrap_or("N/A");
    plan.notify(OutboundNotification::to_admins(
        "Client Review Submitted",
        with_suffix(
            format!(
                "{} rated serviceman {} {}/5 stars.",
                parties.client.full_name, serviceman, score
            ),
            "Review: ",
            review.as_deref(),
        ),
        Some(current.id),
    ));

    Ok(plan)
}

fn cancel(
    current: &ServiceRequest,
    actor: &Actor,
    reason: Option<String>,
    now: DateTime<Utc>,
) -> WorkflowResult<TransitionPlan> {
    if actor.is(UserRole::Client) {
        if actor.id() != Some(current.client_id) {
            return Err(WorkflowError::unauthorized("This is not your service request"));
        }
        if !matches!(current.status, S::PendingAdminAssignment | S::PendingEstimation) {
            return Err(WorkflowError::invalid_transition("cancel", current.status));
        }
    } else if !actor.is(UserRole::Admin) {
        return Err(WorkflowError::unauthorized(
            "Only administrators or the requesting client can cancel a service request",
        ));
    }
    if current.status.is_terminal() {
        return Err(WorkflowError::invalid_transition("cancel", current.status));
    }

    let mut plan = TransitionPlan::from_current(current);
    plan.move_to(S::Cancelled, actor, reason.as_deref(), now);
    if current.status == S::InProgress {
        plan.reconcile(current.assigned_servicemen());
    }

    let by = if actor.is(UserRole::Client) { "the client" } else { "an administrator" };
    let message = with_suffix(
        format!("The service request was cancelled by {}.", by),
        "Reason: ",
        reason.as_deref(),
    );
    if actor.is(UserRole::Admin) {
        plan.notify(OutboundNotification::to_user(
            current.client_id,
            NotificationType::RequestCancelled,
            "Service Request Cancelled",
            message.clone(),
            Some(current.id),
        ));
    }
    for serviceman_id in current.assigned_servicemen() {
        plan.notify(OutboundNotification::to_user(
            serviceman_id,
            NotificationType::RequestCancelled,
            "Job Cancelled",
            message.clone(),
            Some(current.id),
        ));
    }
    plan.notify(OutboundNotification::to_admins("Service Request Cancelled", message, Some(current.id)));

    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Recipient, ServicemanProfile};
    use chrono::NaiveDate;

    fn account(role: UserRole, name: &str) -> UserAccount {
        UserAccount {
            id: Uuid::new_v4(),
            role,
            full_name: name.to_string(),
            email: format!("{}@example.com", name.to_lowercase()),
            phone_number: Some("08012345678".to_string()),
        }
    }

    fn candidate(account: &UserAccount, approved: bool) -> ServicemanCandidate {
        let mut profile = ServicemanProfile::new(account.id, None);
        profile.is_approved = approved;
        ServicemanCandidate {
            account: account.clone(),
            profile: Some(profile),
        }
    }

    fn request(client: &UserAccount, status: ServiceRequestStatus) -> ServiceRequest {
        let now = Utc::now();
        ServiceRequest {
            id: Uuid::new_v4(),
            client_id: client.id,
            serviceman_id: None,
            backup_serviceman_id: None,
            preferred_serviceman_id: None,
            category_id: Uuid::new_v4(),
            booking_date: NaiveDate::from_ymd_opt(2030, 1, 15).unwrap(),
            is_emergency: false,
            auto_flagged_emergency: false,
            initial_booking_fee: Decimal::from(2000),
            serviceman_estimated_cost: None,
            admin_markup_percentage: default_markup_percentage(),
            final_cost: None,
            status,
            client_address: "12 Allen Avenue, Ikeja".to_string(),
            service_description: "Leaking kitchen pipe".to_string(),
            created_at: now,
            updated_at: now,
            inspection_completed_at: None,
            work_completed_at: None,
            is_deleted: false,
            deleted_at: None,
        }
    }

    fn parties(client: &UserAccount, serviceman: Option<&UserAccount>) -> Parties {
        Parties {
            client: client.clone(),
            serviceman: serviceman.cloned(),
            backup: None,
        }
    }

    fn admin() -> Actor {
        Actor::user(Uuid::new_v4(), UserRole::Admin)
    }

    fn booking_input(is_emergency: bool) -> CreateServiceRequestInput {
        CreateServiceRequestInput {
            payment_reference: "BOOKING-1".to_string(),
            category_id: Uuid::new_v4(),
            booking_date: NaiveDate::from_ymd_opt(2030, 1, 15).unwrap(),
            is_emergency,
            client_address: "12 Allen Avenue".to_string(),
            service_description: "Fix the sink".to_string(),
            preferred_serviceman_id: None,
        }
    }

    fn booking_payment(amount: i64) -> PaymentSummary {
        PaymentSummary {
            reference: "BOOKING-1".to_string(),
            payment_type: PaymentType::InitialBooking,
            status: PaymentStatus::Successful,
            amount: Decimal::from(amount),
            service_request_id: None,
        }
    }

    #[test]
    fn pricing_applies_markup() {
        let pricing = compute_pricing(Decimal::from(10000), default_markup_percentage());
        assert_eq!(pricing.final_cost, Decimal::new(1100000, 2));
        assert_eq!(pricing.platform_fee, Decimal::from(1000));
    }

    #[test]
    fn pricing_rounds_half_even() {
        // 0.125 * 1.00 rounds to 0.12 under banker's rounding
        let pricing = compute_pricing(Decimal::new(125, 3), Decimal::ZERO);
        assert_eq!(pricing.final_cost, Decimal::new(12, 2));
    }

    #[test]
    fn amounts_are_grouped() {
        assert_eq!(format_amount(Decimal::new(1100000, 2)), "₦11,000.00");
        assert_eq!(format_amount(Decimal::from(500)), "₦500.00");
        assert_eq!(format_amount(Decimal::from(1234567)), "₦1,234,567.00");
    }

    #[test]
    fn open_request_links_payment_and_alerts_admins() {
        let client = account(UserRole::Client, "Ada");
        let actor = Actor::user(client.id, UserRole::Client);
        let payment = booking_payment(2000);
        let plan = open_request(&actor, &client, &booking_input(false), Some(&payment), Utc::now()).unwrap();

        assert_eq!(plan.request.status, S::PendingAdminAssignment);
        assert_eq!(plan.request.initial_booking_fee, Decimal::from(2000));
        assert_eq!(plan.effects, vec![Effect::LinkPayment { reference: "BOOKING-1".to_string() }]);
        assert!(plan.notifications.iter().any(|n| n.recipient == Recipient::Admins));
        assert!(plan.notifications.iter().any(|n| n.recipient == Recipient::User(client.id)));
        assert_eq!(plan.history.as_ref().unwrap().previous_status, None);
    }

    #[test]
    fn open_request_rejects_wrong_tier() {
        let client = account(UserRole::Client, "Ada");
        let actor = Actor::user(client.id, UserRole::Client);
        let payment = booking_payment(2000);
        let err = open_request(&actor, &client, &booking_input(true), Some(&payment), Utc::now()).unwrap_err();
        match err {
            WorkflowError::PaymentValidation { expected, actual, .. } => {
                assert_eq!(expected, Some(Decimal::from(5000)));
                assert_eq!(actual, Some(Decimal::from(2000)));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn open_request_rejects_linked_or_pending_payment() {
        let client = account(UserRole::Client, "Ada");
        let actor = Actor::user(client.id, UserRole::Client);

        let mut linked = booking_payment(2000);
        linked.service_request_id = Some(Uuid::new_v4());
        assert!(matches!(
            open_request(&actor, &client, &booking_input(false), Some(&linked), Utc::now()),
            Err(WorkflowError::PaymentValidation { .. })
        ));

        let mut pending = booking_payment(2000);
        pending.status = PaymentStatus::Pending;
        assert!(matches!(
            open_request(&actor, &client, &booking_input(false), Some(&pending), Utc::now()),
            Err(WorkflowError::PaymentValidation { .. })
        ));

        assert!(matches!(
            open_request(&actor, &client, &booking_input(false), None, Utc::now()),
            Err(WorkflowError::PaymentValidation { .. })
        ));
    }

    #[test]
    fn open_request_flags_near_bookings() {
        let client = account(UserRole::Client, "Ada");
        let actor = Actor::user(client.id, UserRole::Client);
        let now = Utc::now();
        let mut input = booking_input(false);
        input.booking_date = now.date_naive();
        let plan = open_request(&actor, &client, &input, Some(&booking_payment(2000)), now).unwrap();
        assert!(plan.request.auto_flagged_emergency);
        assert!(!plan.request.is_emergency);
    }

    #[test]
    fn assign_requires_admin_and_approved_distinct_servicemen() {
        let client = account(UserRole::Client, "Ada");
        let x = account(UserRole::Serviceman, "Xavier");
        let current = request(&client, S::PendingAdminAssignment);
        let parties = parties(&client, None);

        let as_client = Actor::user(client.id, UserRole::Client);
        let event = || WorkflowEvent::AssignServiceman {
            serviceman: candidate(&x, true),
            backup: None,
            notes: None,
        };
        assert!(matches!(
            apply(&current, &as_client, &parties, event(), Utc::now()),
            Err(WorkflowError::Unauthorized(_))
        ));

        let unapproved = WorkflowEvent::AssignServiceman {
            serviceman: candidate(&x, false),
            backup: None,
            notes: None,
        };
        assert!(matches!(
            apply(&current, &admin(), &parties, unapproved, Utc::now()),
            Err(WorkflowError::Validation { field: "serviceman_id", .. })
        ));

        let same_backup = WorkflowEvent::AssignServiceman {
            serviceman: candidate(&x, true),
            backup: Some(candidate(&x, true)),
            notes: None,
        };
        assert!(matches!(
            apply(&current, &admin(), &parties, same_backup, Utc::now()),
            Err(WorkflowError::Validation { field: "backup_serviceman_id", .. })
        ));

        let plan = apply(&current, &admin(), &parties, event(), Utc::now()).unwrap();
        assert_eq!(plan.request.status, S::PendingEstimation);
        assert_eq!(plan.request.serviceman_id, Some(x.id));
        assert!(plan.notifications.iter().any(|n| n.recipient == Recipient::User(x.id)));
        assert!(plan.notifications.iter().any(|n| n.recipient == Recipient::User(client.id)));
    }

    #[test]
    fn events_from_wrong_state_are_rejected_with_current_status() {
        let client = account(UserRole::Client, "Ada");
        let current = request(&client, S::PendingAdminAssignment);
        let err = apply(
            &current,
            &admin(),
            &parties(&client, None),
            WorkflowEvent::FinalizePrice {
                markup_percentage: None,
                admin_notes: None,
            },
            Utc::now(),
        )
        .unwrap_err();

        match err {
            WorkflowError::InvalidStateTransition { current: status, .. } => {
                assert_eq!(status, S::PendingAdminAssignment)
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn estimate_must_come_from_primary_and_be_positive() {
        let client = account(UserRole::Client, "Ada");
        let x = account(UserRole::Serviceman, "Xavier");
        let y = account(UserRole::Serviceman, "Yemi");
        let mut current = request(&client, S::PendingEstimation);
        current.serviceman_id = Some(x.id);
        current.backup_serviceman_id = Some(y.id);
        let parties = parties(&client, Some(&x));

        let as_backup = Actor::user(y.id, UserRole::Serviceman);
        let event = |cost: i64| WorkflowEvent::SubmitEstimate {
            estimated_cost: Decimal::from(cost),
            notes: None,
        };
        assert!(matches!(
            apply(&current, &as_backup, &parties, event(10000), Utc::now()),
            Err(WorkflowError::Unauthorized(_))
        ));

        let as_primary = Actor::user(x.id, UserRole::Serviceman);
        assert!(matches!(
            apply(&current, &as_primary, &parties, event(0), Utc::now()),
            Err(WorkflowError::Validation { field: "estimated_cost", .. })
        ));

        let plan = apply(&current, &as_primary, &parties, event(10000), Utc::now()).unwrap();
        assert_eq!(plan.request.status, S::EstimationSubmitted);
        assert_eq!(plan.request.serviceman_estimated_cost, Some(Decimal::from(10000)));
        assert!(plan.request.final_cost.is_none());
    }

    #[test]
    fn finalize_rejects_out_of_range_markup() {
        let client = account(UserRole::Client, "Ada");
        let mut current = request(&client, S::EstimationSubmitted);
        current.serviceman_estimated_cost = Some(Decimal::from(10000));

        let err = apply(
            &current,
            &admin(),
            &parties(&client, None),
            WorkflowEvent::FinalizePrice {
                markup_percentage: Some(Decimal::from(101)),
                admin_notes: None,
            },
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, WorkflowError::Validation { field: "markup_percentage", .. }));
    }

    #[test]
    fn payment_verification_is_automated_only() {
        let client = account(UserRole::Client, "Ada");
        let mut current = request(&client, S::AwaitingClientApproval);
        current.final_cost = Some(Decimal::from(11000));
        let payment = PaymentSummary {
            reference: "SR-1".to_string(),
            payment_type: PaymentType::ServicePayment,
            status: PaymentStatus::Successful,
            amount: Decimal::from(11000),
            service_request_id: Some(current.id),
        };
        let parties = parties(&client, None);
        let paid_at = Utc::now();

        assert!(matches!(
            apply(
                &current,
                &admin(),
                &parties,
                WorkflowEvent::PaymentVerified {
                    payment: payment.clone(),
                    paid_at: Utc::now(),
                },
                Utc::now()
            ),
            Err(WorkflowError::Unauthorized(_))
        ));

        let plan = apply(
            &current,
            &Actor::System,
            &parties,
            WorkflowEvent::PaymentVerified { payment, paid_at },
            Utc::now(),
        )
        .unwrap();
        assert_eq!(
            plan.effects,
            vec![Effect::SettlePayment {
                reference: "SR-1".to_string(),
                paid_at,
            }]
        );
        let history = plan.history.unwrap();
        assert!(history.is_automated);
        assert_eq!(history.changed_by, None);
        assert_eq!(plan.request.status, S::PaymentCompleted);
    }

    #[test]
    fn completion_increments_primary_and_reconciles_both_slots() {
        let client = account(UserRole::Client, "Ada");
        let x = account(UserRole::Serviceman, "Xavier");
        let y = account(UserRole::Serviceman, "Yemi");
        let mut current = request(&client, S::InProgress);
        current.serviceman_id = Some(x.id);
        current.backup_serviceman_id = Some(y.id);

        let as_backup = Actor::user(y.id, UserRole::Serviceman);
        let plan = apply(
            &current,
            &as_backup,
            &parties(&client, Some(&x)),
            WorkflowEvent::CompleteJob { completion_notes: None },
            Utc::now(),
        )
        .unwrap();

        assert_eq!(plan.request.status, S::Completed);
        assert!(plan.request.work_completed_at.is_some());
        assert!(plan.effects.contains(&Effect::IncrementJobsCompleted { serviceman_id: x.id }));
        assert!(plan.effects.contains(&Effect::ReconcileAvailability { serviceman_id: x.id }));
        assert!(plan.effects.contains(&Effect::ReconcileAvailability { serviceman_id: y.id }));
    }

    #[test]
    fn confirm_completion_changes_nothing() {
        let client = account(UserRole::Client, "Ada");
        let current = request(&client, S::Completed);
        let plan = apply(
            &current,
            &admin(),
            &parties(&client, None),
            WorkflowEvent::ConfirmCompletion { message_to_client: None },
            Utc::now(),
        )
        .unwrap();
        assert!(plan.writes_nothing());
        assert_eq!(plan.notifications.len(), 1);
    }

    #[test]
    fn review_validates_score_and_ownership() {
        let client = account(UserRole::Client, "Ada");
        let other = account(UserRole::Client, "Bola");
        let x = account(UserRole::Serviceman, "Xavier");
        let mut current = request(&client, S::Completed);
        current.serviceman_id = Some(x.id);
        let parties = parties(&client, Some(&x));

        let review = |rating| WorkflowEvent::SubmitReview { rating, review: None };
        assert!(matches!(
            apply(&current, &Actor::user(other.id, UserRole::Client), &parties, review(5), Utc::now()),
            Err(WorkflowError::Unauthorized(_))
        ));
        let owner = Actor::user(client.id, UserRole::Client);
        assert!(matches!(
            apply(&current, &owner, &parties, review(6), Utc::now()),
            Err(WorkflowError::Validation { field: "rating", .. })
        ));
        assert!(matches!(
            apply(&current, &owner, &parties, review(0), Utc::now()),
            Err(WorkflowError::Validation { field: "rating", .. })
        ));

        let plan = apply(&current, &owner, &parties, review(4), Utc::now()).unwrap();
        assert_eq!(plan.request.status, S::ClientReviewed);
        assert_eq!(plan.effects, vec![Effect::ApplyReview { serviceman_id: x.id, score: 4 }]);
    }

    #[test]
    fn cancellation_rules() {
        let client = account(UserRole::Client, "Ada");
        let owner = Actor::user(client.id, UserRole::Client);
        let cancel = || WorkflowEvent::Cancel { reason: None };

        let early = request(&client, S::PendingEstimation);
        let plan = apply(&early, &owner, &parties(&client, None), cancel(), Utc::now()).unwrap();
        assert_eq!(plan.request.status, S::Cancelled);

        let priced = request(&client, S::AwaitingClientApproval);
        assert!(matches!(
            apply(&priced, &owner, &parties(&client, None), cancel(), Utc::now()),
            Err(WorkflowError::InvalidStateTransition { .. })
        ));
        assert!(apply(&priced, &admin(), &parties(&client, None), cancel(), Utc::now()).is_ok());

        let legacy = request(&client, S::Negotiating);
        assert!(apply(&legacy, &admin(), &parties(&client, None), cancel(), Utc::now()).is_ok());

        let done = request(&client, S::ClientReviewed);
        assert!(matches!(
            apply(&done, &admin(), &parties(&client, None), cancel(), Utc::now()),
            Err(WorkflowError::InvalidStateTransition { .. })
        ));

        let serviceman = Actor::user(Uuid::new_v4(), UserRole::Serviceman);
        assert!(matches!(
            apply(&early, &serviceman, &parties(&client, None), cancel(), Utc::now()),
            Err(WorkflowError::Unauthorized(_))
        ));
    }

    #[test]
    fn cancelling_in_progress_job_frees_servicemen() {
        let client = account(UserRole::Client, "Ada");
        let x = account(UserRole::Serviceman, "Xavier");
        let mut current = request(&client, S::InProgress);
        current.serviceman_id = Some(x.id);
        let plan = apply(
            &current,
            &admin(),
            &parties(&client, Some(&x)),
            WorkflowEvent::Cancel { reason: Some("Client moved".to_string()) },
            Utc::now(),
        )
        .unwrap();
        assert_eq!(plan.effects, vec![Effect::ReconcileAvailability { serviceman_id: x.id }]);
    }

    #[test]
    fn reassignment_reconciles_old_and_new_holders() {
        let client = account(UserRole::Client, "Ada");
        let x = account(UserRole::Serviceman, "Xavier");
        let z = account(UserRole::Serviceman, "Zainab");
        let mut current = request(&client, S::InProgress);
        current.serviceman_id = Some(x.id);

        let plan = apply(
            &current,
            &admin(),
            &parties(&client, Some(&x)),
            WorkflowEvent::ReassignServiceman {
                serviceman: candidate(&z, true),
                backup: None,
                notes: None,
            },
            Utc::now(),
        )
        .unwrap();

        assert_eq!(plan.request.status, S::InProgress);
        assert!(plan.history.is_none());
        assert!(plan.note.is_some());
        assert!(plan.effects.contains(&Effect::ReconcileAvailability { serviceman_id: x.id }));
        assert!(plan.effects.contains(&Effect::ReconcileAvailability { serviceman_id: z.id }));
    }

    #[test]
    fn legacy_statuses_accept_no_forward_events() {
        let client = account(UserRole::Client, "Ada");
        let current = request(&client, S::PaymentConfirmed);
        assert!(matches!(
            apply(
                &current,
                &admin(),
                &parties(&client, None),
                WorkflowEvent::AuthorizeWork { instructions: None },
                Utc::now()
            ),
            Err(WorkflowError::InvalidStateTransition { .. })
        ));
    }
}
