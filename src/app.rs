use axum::{http::HeaderValue, Router};
use std::sync::Arc;
use tower_http::{
    cors::{AllowHeaders, AllowMethods, CorsLayer},
    trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use crate::auth::JwtVerifier;
use crate::config::Settings;
use crate::middleware::{request_id_layer, RequestSpan};
use crate::routes;
use crate::services::{
    AvailabilityTracker, NotificationDelivery, NotificationDispatcher, PaymentGateway, PaymentLedger,
};
use crate::store::WorkflowStore;
use crate::workflow::WorkflowService;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn WorkflowStore>,
    pub settings: Settings,
    pub jwt: JwtVerifier,
    pub delivery: Arc<dyn NotificationDelivery>,
    pub notifier: NotificationDispatcher,
    pub workflow: WorkflowService,
    pub payments: PaymentLedger,
    pub availability: AvailabilityTracker,
}

impl AppState {
    /// Wires the workflow collaborators around a single store
    pub fn new(
        store: Arc<dyn WorkflowStore>,
        settings: Settings,
        delivery: Arc<dyn NotificationDelivery>,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Arc<Self> {
        let jwt = JwtVerifier::new(&settings.jwt_secret, settings.jwt_issuer.as_deref());
        let notifier = NotificationDispatcher::new(store.clone(), delivery.clone());
        let workflow = WorkflowService::new(store.clone(), notifier.clone());
        let payments = PaymentLedger::new(
            store.clone(),
            gateway,
            workflow.clone(),
            Some(settings.frontend_url.clone()),
        );
        let availability = AvailabilityTracker::new(store.clone());

        Arc::new(Self {
            store,
            settings,
            jwt,
            delivery,
            notifier,
            workflow,
            payments,
            availability,
        })
    }
}

/// Build the complete application with all middleware
pub fn create_app(state: Arc<AppState>) -> Router {
    let cors = build_cors_layer(&state.settings);

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(RequestSpan::new(Level::INFO))
        .on_request(DefaultOnRequest::new().level(Level::DEBUG))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    let (set_request_id, propagate_request_id) = request_id_layer();

    Router::new()
        .merge(routes::api_router())
        // Middleware stack (applied bottom-up)
        .layer(propagate_request_id)
        .layer(trace_layer)
        .layer(set_request_id)
        .layer(cors)
        .with_state(state)
}

fn build_cors_layer(settings: &Settings) -> CorsLayer {
    let origins: Vec<HeaderValue> = settings
        .cors_allow_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    let max_age = if settings.env.is_dev() {
        std::time::Duration::from_secs(86400)
    } else {
        std::time::Duration::from_secs(3600)
    };

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(AllowMethods::list([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::PUT,
            axum::http::Method::OPTIONS,
        ]))
        .allow_headers(AllowHeaders::list([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
            axum::http::header::ACCEPT,
            axum::http::HeaderName::from_static("x-request-id"),
        ]))
        .allow_credentials(true)
        .max_age(max_age)
}
