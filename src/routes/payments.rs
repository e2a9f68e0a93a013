//! Payment routes
//!
//! Booking fees and service payments through the gateway. Verification of a
//! final-price payment advances the linked request, whether it comes from the payer
//! or from the gateway's signed webhook.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::HeaderMap,
};
use std::sync::Arc;

use crate::api::{Created, DataResponse, Json, MessageResponse};
use crate::app::AppState;
use crate::auth::RequireAuth;
use crate::domain::{
    BookingFeeInput, GatewayWebhookEvent, PaymentInitialization, PaymentSummary,
    PaymentVerificationResponse, ServicePaymentInput, VerifyPaymentInput,
};
use crate::error::{ApiError, ApiResult};
use crate::services::paystack::{verify_webhook_signature, SIGNATURE_HEADER};

/// POST /payments/booking-fee
pub async fn initialize_booking_fee(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Json(input): Json<BookingFeeInput>,
) -> ApiResult<Created<PaymentInitialization>> {
    tracing::info!(
        user_id = %auth.user_id,
        is_emergency = input.is_emergency,
        "Initializing booking fee"
    );
    let init = state.payments.initialize_booking_fee(&auth.account, input).await?;
    Ok(Created(init))
}

/// POST /payments/service-payment
pub async fn initialize_service_payment(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Json(input): Json<ServicePaymentInput>,
) -> ApiResult<Created<PaymentInitialization>> {
    tracing::info!(
        user_id = %auth.user_id,
        service_request_id = %input.service_request_id,
        "Initializing service payment"
    );
    let init = state.payments.initialize_service_payment(&auth.account, input).await?;
    Ok(Created(init))
}

/// POST /payments/verify
pub async fn verify_payment(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Json(input): Json<VerifyPaymentInput>,
) -> ApiResult<DataResponse<PaymentVerificationResponse>> {
    let response = state.payments.verify(&auth.account, &input.reference).await?;
    Ok(DataResponse::new(response))
}

/// GET /payments/:reference
pub async fn get_payment(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(reference): Path<String>,
) -> ApiResult<DataResponse<PaymentSummary>> {
    let payment = state.payments.get_payment(&auth.account, &reference).await?;
    Ok(DataResponse::new(payment.summary()))
}

/// POST /payments/webhook
///
/// Unauthenticated; trusted only through the body signature. A `charge.success`
/// event re-verifies the payment with the gateway before anything is recorded.
pub async fn gateway_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<MessageResponse> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::forbidden("Missing webhook signature"))?;
    if !verify_webhook_signature(&state.settings.paystack_webhook_secret, &body, signature) {
        tracing::warn!("Invalid Paystack webhook signature");
        return Err(ApiError::forbidden("Invalid webhook signature"));
    }

    let event: GatewayWebhookEvent = serde_json::from_slice(&body)
        .map_err(|e| ApiError::bad_request(format!("Invalid webhook payload: {}", e)))?;

    match event.event.as_str() {
        "charge.success" => {
            let reference = event
                .data
                .reference
                .ok_or_else(|| ApiError::bad_request("Webhook payload has no reference"))?;
            let outcome = state.payments.confirm_from_gateway(&reference).await?;
            tracing::info!(
                reference = %reference,
                status = %outcome.status,
                service_request_status = ?outcome.service_request_status,
                "Payment webhook processed"
            );
        }
        other => tracing::info!(event = other, "Ignoring payment webhook event"),
    }

    Ok(MessageResponse::with_code("Webhook processed", "WEBHOOK_PROCESSED"))
}
