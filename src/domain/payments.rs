//! Payment ledger types
//!
//! Payments are recorded by the gateway integration; the workflow only reads their
//! status/amount and writes the request linkage.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Booking fee for a normal request
pub fn normal_booking_fee() -> Decimal {
    Decimal::new(200000, 2)
}

/// Booking fee for an emergency request
pub fn emergency_booking_fee() -> Decimal {
    Decimal::new(500000, 2)
}

/// Fee tier fixed by the emergency flag
pub fn booking_fee_for(is_emergency: bool) -> Decimal {
    if is_emergency {
        emergency_booking_fee()
    } else {
        normal_booking_fee()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentType {
    InitialBooking,
    FinalPayment,
    ServicePayment,
}

impl PaymentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentType::InitialBooking => "INITIAL_BOOKING",
            PaymentType::FinalPayment => "FINAL_PAYMENT",
            PaymentType::ServicePayment => "SERVICE_PAYMENT",
        }
    }

    /// Whether a successful payment of this type settles the final price
    pub fn settles_final_price(&self) -> bool {
        matches!(self, PaymentType::FinalPayment | PaymentType::ServicePayment)
    }
}

impl FromStr for PaymentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "INITIAL_BOOKING" => Ok(PaymentType::InitialBooking),
            "FINAL_PAYMENT" => Ok(PaymentType::FinalPayment),
            "SERVICE_PAYMENT" => Ok(PaymentType::ServicePayment),
            other => Err(format!("unknown payment type: {}", other)),
        }
    }
}

impl std::fmt::Display for PaymentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Successful,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Successful => "SUCCESSFUL",
            PaymentStatus::Failed => "FAILED",
        }
    }
}

impl FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(PaymentStatus::Pending),
            "SUCCESSFUL" => Ok(PaymentStatus::Successful),
            "FAILED" => Ok(PaymentStatus::Failed),
            other => Err(format!("unknown payment status: {}", other)),
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payment record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Payment {
    pub id: Uuid,
    /// Null for booking fees until the request is created
    pub service_request_id: Option<Uuid>,
    pub payer_id: Uuid,
    pub payment_type: PaymentType,
    pub amount: Decimal,
    pub reference: String,
    pub access_code: String,
    pub status: PaymentStatus,
    pub is_emergency: bool,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    pub fn is_successful(&self) -> bool {
        self.status == PaymentStatus::Successful
    }

    pub fn summary(&self) -> PaymentSummary {
        PaymentSummary {
            reference: self.reference.clone(),
            payment_type: self.payment_type,
            status: self.status,
            amount: self.amount,
            service_request_id: self.service_request_id,
        }
    }
}

/// The fields of a payment the workflow consumes
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaymentSummary {
    pub reference: String,
    pub payment_type: PaymentType,
    pub status: PaymentStatus,
    pub amount: Decimal,
    pub service_request_id: Option<Uuid>,
}

/// POST /payments/booking-fee
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BookingFeeInput {
    #[serde(default)]
    pub is_emergency: bool,
}

/// POST /payments/service-payment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServicePaymentInput {
    pub service_request_id: Uuid,
}

/// POST /payments/verify
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyPaymentInput {
    pub reference: String,
}

/// POST /payments/webhook, reduced to what the ledger acts on
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayWebhookEvent {
    pub event: String,
    #[serde(default)]
    pub data: GatewayWebhookData,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GatewayWebhookData {
    pub reference: Option<String>,
}

/// Result of initializing a payment with the gateway
#[derive(Debug, Clone, Serialize)]
pub struct PaymentInitialization {
    pub payment: Payment,
    pub authorization_url: String,
    pub amount: Decimal,
    pub reference: String,
    pub message: String,
}

/// Result of POST /payments/verify
#[derive(Debug, Clone, Serialize)]
pub struct PaymentVerificationResponse {
    pub status: PaymentStatus,
    pub payment: PaymentSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_request_status: Option<String>,
}
