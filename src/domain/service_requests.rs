//! Service request domain types
//!
//! The service request is the central entity of the platform: a client's booked job,
//! mediated by admins, executed by an assigned serviceman.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::api::PaginationParams;

// ============================================================================
// Status
// ============================================================================

/// Lifecycle status of a service request
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceRequestStatus {
    PendingAdminAssignment,
    PendingEstimation,
    EstimationSubmitted,
    AwaitingClientApproval,
    PaymentCompleted,
    InProgress,
    Completed,
    ClientReviewed,
    Cancelled,

    // Legacy labels, kept readable but never targeted by new transitions
    AssignedToServiceman,
    ServicemanInspected,
    Negotiating,
    AwaitingPayment,
    PaymentConfirmed,
}

impl ServiceRequestStatus {
    pub const ALL: [ServiceRequestStatus; 14] = [
        Self::PendingAdminAssignment,
        Self::PendingEstimation,
        Self::EstimationSubmitted,
        Self::AwaitingClientApproval,
        Self::PaymentCompleted,
        Self::InProgress,
        Self::Completed,
        Self::ClientReviewed,
        Self::Cancelled,
        Self::AssignedToServiceman,
        Self::ServicemanInspected,
        Self::Negotiating,
        Self::AwaitingPayment,
        Self::PaymentConfirmed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PendingAdminAssignment => "PENDING_ADMIN_ASSIGNMENT",
            Self::PendingEstimation => "PENDING_ESTIMATION",
            Self::EstimationSubmitted => "ESTIMATION_SUBMITTED",
            Self::AwaitingClientApproval => "AWAITING_CLIENT_APPROVAL",
            Self::PaymentCompleted => "PAYMENT_COMPLETED",
            Self::InProgress => "IN_PROGRESS",
            Self::Completed => "COMPLETED",
            Self::ClientReviewed => "CLIENT_REVIEWED",
            Self::Cancelled => "CANCELLED",
            Self::AssignedToServiceman => "ASSIGNED_TO_SERVICEMAN",
            Self::ServicemanInspected => "SERVICEMAN_INSPECTED",
            Self::Negotiating => "NEGOTIATING",
            Self::AwaitingPayment => "AWAITING_PAYMENT",
            Self::PaymentConfirmed => "PAYMENT_CONFIRMED",
        }
    }

    /// Human readable label used in notification texts and error messages
    pub fn label(&self) -> &'static str {
        match self {
            Self::PendingAdminAssignment => "Pending Admin Assignment",
            Self::PendingEstimation => "Pending Estimation",
            Self::EstimationSubmitted => "Estimation Submitted",
            Self::AwaitingClientApproval => "Awaiting Client Approval",
            Self::PaymentCompleted => "Payment Completed",
            Self::InProgress => "In Progress",
            Self::Completed => "Completed",
            Self::ClientReviewed => "Client Reviewed",
            Self::Cancelled => "Cancelled",
            Self::AssignedToServiceman => "Assigned to Serviceman",
            Self::ServicemanInspected => "Serviceman Inspected",
            Self::Negotiating => "Negotiating",
            Self::AwaitingPayment => "Awaiting Payment",
            Self::PaymentConfirmed => "Payment Confirmed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::ClientReviewed | Self::Cancelled)
    }

    /// Position along the main lifecycle; `None` for cancelled and legacy labels
    fn stage(&self) -> Option<u8> {
        match self {
            Self::PendingAdminAssignment => Some(0),
            Self::PendingEstimation => Some(1),
            Self::EstimationSubmitted => Some(2),
            Self::AwaitingClientApproval => Some(3),
            Self::PaymentCompleted => Some(4),
            Self::InProgress => Some(5),
            Self::Completed => Some(6),
            Self::ClientReviewed => Some(7),
            _ => None,
        }
    }

    /// Whether the request has reached `other` or a later stage of the main lifecycle
    pub fn has_reached(&self, other: ServiceRequestStatus) -> bool {
        match (self.stage(), other.stage()) {
            (Some(current), Some(target)) => current >= target,
            _ => false,
        }
    }
}

impl std::fmt::Display for ServiceRequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceRequestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown service request status: {}", s))
    }
}

// ============================================================================
// Service Request
// ============================================================================

/// Service request entity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceRequest {
    pub id: Uuid,

    // Parties
    pub client_id: Uuid,
    pub serviceman_id: Option<Uuid>,
    pub backup_serviceman_id: Option<Uuid>,
    pub preferred_serviceman_id: Option<Uuid>,

    // Classification
    pub category_id: Uuid,
    pub booking_date: NaiveDate,
    pub is_emergency: bool,
    pub auto_flagged_emergency: bool,

    // Pricing
    pub initial_booking_fee: Decimal,
    pub serviceman_estimated_cost: Option<Decimal>,
    pub admin_markup_percentage: Decimal,
    pub final_cost: Option<Decimal>,

    pub status: ServiceRequestStatus,

    // Content
    pub client_address: String,
    pub service_description: String,

    // Lifecycle markers
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub inspection_completed_at: Option<DateTime<Utc>>,
    pub work_completed_at: Option<DateTime<Utc>>,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl ServiceRequest {
    /// Whether `user_id` holds the primary or backup slot
    pub fn is_assigned_to(&self, user_id: Uuid) -> bool {
        self.serviceman_id == Some(user_id) || self.backup_serviceman_id == Some(user_id)
    }

    /// Primary and backup servicemen, deduplicated
    pub fn assigned_servicemen(&self) -> Vec<Uuid> {
        let mut ids = Vec::with_capacity(2);
        for id in [self.serviceman_id, self.backup_serviceman_id].into_iter().flatten() {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        ids
    }
}

/// Default platform markup applied when the admin does not supply one
pub fn default_markup_percentage() -> Decimal {
    Decimal::new(1000, 2)
}

// ============================================================================
// Status History
// ============================================================================

/// One row per status transition (append-only)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusHistoryEntry {
    pub id: Uuid,
    pub service_request_id: Uuid,
    pub previous_status: Option<ServiceRequestStatus>,
    pub new_status: ServiceRequestStatus,
    pub changed_by: Option<Uuid>,
    pub changed_at: DateTime<Utc>,
    pub notes: String,
    pub is_automated: bool,
}

// ============================================================================
// Notes
// ============================================================================

/// Author class of a request note
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NoteType {
    Client,
    Serviceman,
    Admin,
    System,
}

impl NoteType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NoteType::Client => "CLIENT",
            NoteType::Serviceman => "SERVICEMAN",
            NoteType::Admin => "ADMIN",
            NoteType::System => "SYSTEM",
        }
    }
}

impl FromStr for NoteType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CLIENT" => Ok(NoteType::Client),
            "SERVICEMAN" => Ok(NoteType::Serviceman),
            "ADMIN" => Ok(NoteType::Admin),
            "SYSTEM" => Ok(NoteType::System),
            other => Err(format!("unknown note type: {}", other)),
        }
    }
}

/// Free-form comment on a request, independent of status history
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequestNote {
    pub id: Uuid,
    pub service_request_id: Uuid,
    pub created_by: Option<Uuid>,
    pub note_type: NoteType,
    pub content: String,
    pub is_visible_to_client: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// Inputs
// ============================================================================

/// POST /service-requests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateServiceRequestInput {
    pub payment_reference: String,
    pub category_id: Uuid,
    pub booking_date: NaiveDate,
    #[serde(default)]
    pub is_emergency: bool,
    pub client_address: String,
    pub service_description: String,
    pub preferred_serviceman_id: Option<Uuid>,
}

/// POST /service-requests/:id/assign and /reassign
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignServicemanInput {
    pub serviceman_id: Uuid,
    pub backup_serviceman_id: Option<Uuid>,
    pub notes: Option<String>,
}

/// POST /service-requests/:id/estimate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitEstimateInput {
    pub estimated_cost: Decimal,
    pub notes: Option<String>,
}

/// POST /service-requests/:id/finalize-price
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FinalizePriceInput {
    pub markup_percentage: Option<Decimal>,
    pub admin_notes: Option<String>,
}

/// POST /service-requests/:id/authorize-work
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuthorizeWorkInput {
    pub instructions: Option<String>,
}

/// POST /service-requests/:id/complete
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CompleteJobInput {
    pub completion_notes: Option<String>,
}

/// POST /service-requests/:id/confirm-completion
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConfirmCompletionInput {
    pub message_to_client: Option<String>,
}

/// POST /service-requests/:id/review
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitReviewInput {
    pub rating: i32,
    pub review: Option<String>,
}

/// POST /service-requests/:id/cancel
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CancelRequestInput {
    pub reason: Option<String>,
}

/// POST /service-requests/:id/notes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddNoteInput {
    pub content: String,
    pub is_visible_to_client: Option<bool>,
}

/// Query params for listing service requests
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ServiceRequestQuery {
    pub status: Option<ServiceRequestStatus>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

impl ServiceRequestQuery {
    pub fn pagination(&self) -> PaginationParams {
        PaginationParams {
            page: self.page,
            per_page: self.per_page,
        }
    }
}

// ============================================================================
// Responses
// ============================================================================

/// Pricing breakdown returned to the admin after finalizing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PricingBreakdown {
    pub base_cost: Decimal,
    pub platform_fee: Decimal,
    pub markup_percentage: Decimal,
    pub final_cost: Decimal,
}

/// Envelope for workflow endpoints: a message plus the updated request
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowResponse {
    pub message: String,
    pub service_request: ServiceRequest,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pricing_breakdown: Option<PricingBreakdown>,
}

impl WorkflowResponse {
    pub fn new(message: impl Into<String>, service_request: ServiceRequest) -> Self {
        Self {
            message: message.into(),
            service_request,
            pricing_breakdown: None,
        }
    }
}
