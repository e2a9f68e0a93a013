//! Payment ledger
//!
//! Records gateway payments and reports their status/amount to the workflow. A
//! booking fee starts unlinked and is attached to a request when the request is
//! created; a service payment is tied to its request from the start.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::paystack::{GatewayCharge, GatewayStatus, PaymentGateway};
use crate::domain::{
    booking_fee_for, BookingFeeInput, Payment, PaymentInitialization, PaymentStatus, PaymentType,
    PaymentVerificationResponse, ServiceRequestStatus, ServicePaymentInput, UserAccount, UserRole,
};
use crate::store::WorkflowStore;
use crate::workflow::machine::format_amount;
use crate::workflow::{WorkflowError, WorkflowResult, WorkflowService};

#[derive(Clone)]
pub struct PaymentLedger {
    store: Arc<dyn WorkflowStore>,
    gateway: Arc<dyn PaymentGateway>,
    workflow: WorkflowService,
    frontend_url: Option<String>,
}

impl PaymentLedger {
    pub fn new(
        store: Arc<dyn WorkflowStore>,
        gateway: Arc<dyn PaymentGateway>,
        workflow: WorkflowService,
        frontend_url: Option<String>,
    ) -> Self {
        Self {
            store,
            gateway,
            workflow,
            frontend_url,
        }
    }

    fn callback_url(&self, path: &str) -> Option<String> {
        self.frontend_url
            .as_deref()
            .map(|base| format!("{}{}", base.trim_end_matches('/'), path))
    }

    pub async fn get_payment(&self, user: &UserAccount, reference: &str) -> WorkflowResult<Payment> {
        let payment = self
            .store
            .get_payment(reference)
            .await?
            .ok_or_else(|| WorkflowError::not_found(format!("Payment {} not found", reference)))?;
        if payment.payer_id != user.id && !user.is_admin() {
            return Err(WorkflowError::unauthorized("This payment belongs to another user"));
        }
        Ok(payment)
    }

    #[allow(clippy::too_many_arguments)]
    async fn start(
        &self,
        payer: &UserAccount,
        payment_type: PaymentType,
        amount: rust_decimal::Decimal,
        reference: String,
        service_request_id: Option<Uuid>,
        is_emergency: bool,
        callback_path: &str,
    ) -> WorkflowResult<PaymentInitialization> {
        let charge = GatewayCharge {
            email: payer.email.clone(),
            amount,
            reference: reference.clone(),
            callback_url: self.callback_url(callback_path),
            metadata: serde_json::json!({
                "payment_type": payment_type,
                "service_request_id": service_request_id,
                "payer_id": payer.id,
            }),
        };
        let init = self.gateway.initialize(&charge).await?;

        let now = Utc::now();
        let payment = Payment {
            id: Uuid::new_v4(),
            service_request_id,
            payer_id: payer.id,
            payment_type,
            amount,
            reference: init.reference,
            access_code: init.access_code,
            status: PaymentStatus::Pending,
            is_emergency,
            paid_at: None,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_payment(&payment).await?;

        info!(
            reference = %payment.reference,
            payment_type = %payment_type,
            amount = %amount,
            "Payment initialized"
        );

        Ok(PaymentInitialization {
            reference: payment.reference.clone(),
            amount,
            authorization_url: init.authorization_url,
            message: format!("Please complete payment of {} to proceed", format_amount(amount)),
            payment,
        })
    }

    /// Starts a booking-fee payment at the tier fixed by the emergency flag
    #[instrument(skip(self, payer), fields(payer_id = %payer.id))]
    pub async fn initialize_booking_fee(
        &self,
        payer: &UserAccount,
        input: BookingFeeInput,
    ) -> WorkflowResult<PaymentInitialization> {
        if payer.role != UserRole::Client {
            return Err(WorkflowError::unauthorized("Only clients can pay booking fees"));
        }
        let amount = booking_fee_for(input.is_emergency);
        let reference = format!("BOOKING-{}-{}", payer.id, Utc::now().timestamp_micros());
        self.start(
            payer,
            PaymentType::InitialBooking,
            amount,
            reference,
            None,
            input.is_emergency,
            "/payment/booking-callback",
        )
        .await
    }

    /// Starts the final payment for a priced request
    #[instrument(skip(self, payer), fields(payer_id = %payer.id))]
    pub async fn initialize_service_payment(
        &self,
        payer: &UserAccount,
        input: ServicePaymentInput,
    ) -> WorkflowResult<PaymentInitialization> {
        let request = self
            .store
            .get_request(input.service_request_id)
            .await?
            .ok_or_else(|| WorkflowError::not_found(format!("Service request {} not found", input.service_request_id)))?;
        if payer.role != UserRole::Client || request.client_id != payer.id {
            return Err(WorkflowError::unauthorized("Only the requesting client can pay for this service"));
        }
        if request.status != ServiceRequestStatus::AwaitingClientApproval {
            return Err(WorkflowError::invalid_transition("pay for service", request.status));
        }
        let amount = request
            .final_cost
            .ok_or_else(|| WorkflowError::validation("final_cost", "the request has not been priced"))?;
        let settled = self
            .store
            .payments_for_request(request.id)
            .await?
            .into_iter()
            .find(|p| p.payment_type.settles_final_price() && p.is_successful());
        if let Some(paid) = settled {
            return Err(WorkflowError::payment(format!(
                "service request {} is already paid by payment {}",
                request.id, paid.reference
            )));
        }

        let reference = format!("SR-{}-{}", request.id, Utc::now().timestamp_micros());
        self.start(
            payer,
            PaymentType::ServicePayment,
            amount,
            reference,
            Some(request.id),
            request.is_emergency,
            "/payment/callback",
        )
        .await
    }

    /// Confirms a payment with the gateway on behalf of its payer (or an admin)
    #[instrument(skip(self, user), fields(user_id = %user.id))]
    pub async fn verify(&self, user: &UserAccount, reference: &str) -> WorkflowResult<PaymentVerificationResponse> {
        let payment = self.get_payment(user, reference).await?;
        self.confirm(payment).await
    }

    /// Confirms a payment named by a signed gateway callback
    #[instrument(skip(self))]
    pub async fn confirm_from_gateway(&self, reference: &str) -> WorkflowResult<PaymentVerificationResponse> {
        let payment = self
            .store
            .get_payment(reference)
            .await?
            .ok_or_else(|| WorkflowError::not_found(format!("Payment {} not found", reference)))?;
        self.confirm(payment).await
    }

    /// Asks the gateway for the payment's outcome and records it. A successful
    /// final-price payment is marked SUCCESSFUL in the same commit that moves its
    /// request to PAYMENT_COMPLETED.
    async fn confirm(&self, payment: Payment) -> WorkflowResult<PaymentVerificationResponse> {
        let reference = payment.reference.clone();

        if payment.is_successful() {
            let service_request_status = if self.awaits_settlement(&payment).await? {
                let paid_at = payment.paid_at.unwrap_or_else(Utc::now);
                self.settle(&payment, paid_at).await?
            } else {
                self.linked_status(&payment).await?
            };
            return Ok(PaymentVerificationResponse {
                status: payment.status,
                payment: payment.summary(),
                service_request_status,
            });
        }

        let verification = self.gateway.verify(&reference).await?;
        let (payment, service_request_status) = match verification.status {
            GatewayStatus::Success if verification.amount != payment.amount => {
                warn!(
                    reference = %reference,
                    expected = %payment.amount,
                    actual = %verification.amount,
                    "Gateway amount does not match payment record"
                );
                self.store.set_payment_status(&reference, PaymentStatus::Failed, None).await?;
                return Err(WorkflowError::amount_mismatch(payment.amount, verification.amount));
            }
            GatewayStatus::Success if payment.payment_type.settles_final_price() && payment.service_request_id.is_some() => {
                let paid_at = verification.paid_at.unwrap_or_else(Utc::now);
                let status = self.settle(&payment, paid_at).await?;
                let settled = self
                    .store
                    .get_payment(&reference)
                    .await?
                    .ok_or_else(|| WorkflowError::not_found(format!("Payment {} not found", reference)))?;
                (settled, status)
            }
            GatewayStatus::Success => {
                let paid_at = verification.paid_at.unwrap_or_else(Utc::now);
                let payment = self
                    .store
                    .set_payment_status(&reference, PaymentStatus::Successful, Some(paid_at))
                    .await?;
                let status = self.linked_status(&payment).await?;
                (payment, status)
            }
            GatewayStatus::Failed => {
                let payment = self.store.set_payment_status(&reference, PaymentStatus::Failed, None).await?;
                let status = self.linked_status(&payment).await?;
                (payment, status)
            }
            GatewayStatus::Pending => {
                let status = self.linked_status(&payment).await?;
                (payment, status)
            }
        };

        info!(reference = %reference, status = %payment.status, "Payment verified");

        Ok(PaymentVerificationResponse {
            status: payment.status,
            payment: payment.summary(),
            service_request_status,
        })
    }

    /// A settled final-price payment whose request never left AWAITING_CLIENT_APPROVAL
    async fn awaits_settlement(&self, payment: &Payment) -> WorkflowResult<bool> {
        if !payment.payment_type.settles_final_price() {
            return Ok(false);
        }
        let Some(request_id) = payment.service_request_id else {
            return Ok(false);
        };
        Ok(self
            .store
            .get_request(request_id)
            .await?
            .is_some_and(|r| r.status == ServiceRequestStatus::AwaitingClientApproval))
    }

    /// Commits the payment together with the automated PAYMENT_COMPLETED transition.
    /// When the request already left AWAITING_CLIENT_APPROVAL the payment is still recorded.
    async fn settle(&self, payment: &Payment, paid_at: DateTime<Utc>) -> WorkflowResult<Option<String>> {
        match self.workflow.record_payment_verified(payment, paid_at).await {
            Ok(response) => Ok(Some(response.service_request.status.to_string())),
            Err(WorkflowError::InvalidStateTransition { current, .. }) => {
                warn!(
                    reference = %payment.reference,
                    status = %current,
                    "Payment settled after its request left AWAITING_CLIENT_APPROVAL"
                );
                self.store
                    .set_payment_status(&payment.reference, PaymentStatus::Successful, Some(paid_at))
                    .await?;
                Ok(Some(current.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    async fn linked_status(&self, payment: &Payment) -> WorkflowResult<Option<String>> {
        let Some(request_id) = payment.service_request_id else {
            return Ok(None);
        };
        Ok(self
            .store
            .get_request(request_id)
            .await?
            .map(|r| r.status.to_string()))
    }
}
