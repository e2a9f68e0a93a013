pub mod health;
pub mod me;
pub mod notifications;
pub mod payments;
pub mod service_requests;
pub mod servicemen;

use axum::{
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;

use crate::app::AppState;

/// Build the API router with all routes
pub fn api_router() -> Router<Arc<AppState>> {
    Router::new()
        // Public routes
        .route("/health", get(health::health_check))
        // Protected routes
        .route("/me", get(me::get_me))
        // Payments
        .route("/payments/booking-fee", post(payments::initialize_booking_fee))
        .route(
            "/payments/service-payment",
            post(payments::initialize_service_payment),
        )
        .route("/payments/verify", post(payments::verify_payment))
        .route("/payments/webhook", post(payments::gateway_webhook))
        .route("/payments/:reference", get(payments::get_payment))
        // Service requests
        .route(
            "/service-requests",
            post(service_requests::create_request).get(service_requests::list_requests),
        )
        .route("/service-requests/:id", get(service_requests::get_request))
        .route(
            "/service-requests/:id/history",
            get(service_requests::status_history),
        )
        .route(
            "/service-requests/:id/notes",
            get(service_requests::list_notes).post(service_requests::add_note),
        )
        // Workflow events
        .route(
            "/service-requests/:id/assign",
            post(service_requests::assign_serviceman),
        )
        .route(
            "/service-requests/:id/reassign",
            post(service_requests::reassign_serviceman),
        )
        .route(
            "/service-requests/:id/estimate",
            post(service_requests::submit_estimate),
        )
        .route(
            "/service-requests/:id/finalize-price",
            post(service_requests::finalize_price),
        )
        .route(
            "/service-requests/:id/authorize-work",
            post(service_requests::authorize_work),
        )
        .route(
            "/service-requests/:id/complete",
            post(service_requests::complete_job),
        )
        .route(
            "/service-requests/:id/confirm-completion",
            post(service_requests::confirm_completion),
        )
        .route(
            "/service-requests/:id/review",
            post(service_requests::submit_review),
        )
        .route(
            "/service-requests/:id/cancel",
            post(service_requests::cancel_request),
        )
        // Servicemen
        .route(
            "/servicemen/:id/availability/reconcile",
            post(servicemen::reconcile_availability),
        )
        // Notifications
        .route("/notifications", get(notifications::list_notifications))
        .route(
            "/notifications/unread-count",
            get(notifications::unread_count),
        )
        .route("/notifications/read-all", put(notifications::mark_all_read))
        .route("/notifications/:id/read", put(notifications::mark_read))
}
