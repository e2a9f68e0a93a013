//! Shared harness for integration tests: an in-memory store, a scripted payment
//! gateway and a delivery channel that records (or refuses) what it is given.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use uuid::Uuid;

use serviceman_backend::config::{Environment, Settings};
use serviceman_backend::domain::*;
use serviceman_backend::services::delivery::DeliveryError;
use serviceman_backend::services::paystack::{
    GatewayCharge, GatewayError, GatewayInitialization, GatewayStatus, GatewayVerification,
};
use serviceman_backend::services::{
    AvailabilityTracker, NotificationDelivery, NotificationDispatcher, PaymentGateway, PaymentLedger,
};
use serviceman_backend::store::{MemoryStore, WorkflowStore};
use serviceman_backend::workflow::{Actor, WorkflowService};

// ============================================================================
// Fakes
// ============================================================================

/// Gateway that settles every initialized charge for the charged amount, unless a
/// different settlement has been scripted for the reference
#[derive(Default)]
pub struct FakeGateway {
    charges: Mutex<HashMap<String, Decimal>>,
    settlements: Mutex<HashMap<String, (GatewayStatus, Decimal)>>,
}

impl FakeGateway {
    pub fn settle(&self, reference: &str, status: GatewayStatus, amount: Decimal) {
        self.settlements
            .lock()
            .insert(reference.to_string(), (status, amount));
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn initialize(&self, charge: &GatewayCharge) -> Result<GatewayInitialization, GatewayError> {
        self.charges
            .lock()
            .insert(charge.reference.clone(), charge.amount);
        Ok(GatewayInitialization {
            authorization_url: format!("https://checkout.test/{}", charge.reference),
            access_code: format!("ac_{}", charge.reference),
            reference: charge.reference.clone(),
        })
    }

    async fn verify(&self, reference: &str) -> Result<GatewayVerification, GatewayError> {
        let scripted = self.settlements.lock().get(reference).copied();
        let (status, amount) = match scripted {
            Some(settlement) => settlement,
            None => {
                let amount = self
                    .charges
                    .lock()
                    .get(reference)
                    .copied()
                    .ok_or_else(|| GatewayError::Rejected {
                        status: 404,
                        message: "Transaction reference not found".to_string(),
                    })?;
                (GatewayStatus::Success, amount)
            }
        };
        Ok(GatewayVerification {
            reference: reference.to_string(),
            status,
            amount,
            paid_at: Some(Utc::now()),
        })
    }
}

/// Records delivered notifications; fails every delivery when `failing` is set
#[derive(Default)]
pub struct RecordingDelivery {
    pub failing: bool,
    pub delivered: Mutex<Vec<Notification>>,
    pub attempts: Mutex<usize>,
}

impl RecordingDelivery {
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }
}

#[async_trait]
impl NotificationDelivery for RecordingDelivery {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn deliver(&self, notification: &Notification) -> Result<(), DeliveryError> {
        *self.attempts.lock() += 1;
        if self.failing {
            return Err(DeliveryError::Rejected("smtp relay refused the message".to_string()));
        }
        self.delivered.lock().push(notification.clone());
        Ok(())
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub gateway: Arc<FakeGateway>,
    pub delivery: Arc<RecordingDelivery>,
    pub workflow: WorkflowService,
    pub payments: PaymentLedger,
    pub availability: AvailabilityTracker,
    pub admin: UserAccount,
    pub client: UserAccount,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_delivery(RecordingDelivery::default())
    }

    pub fn with_delivery(delivery: RecordingDelivery) -> Self {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(FakeGateway::default());
        let delivery = Arc::new(delivery);

        let dyn_store: Arc<dyn WorkflowStore> = store.clone();
        let notifier = NotificationDispatcher::new(dyn_store.clone(), delivery.clone());
        let workflow = WorkflowService::new(dyn_store.clone(), notifier);
        let payments = PaymentLedger::new(dyn_store.clone(), gateway.clone(), workflow.clone(), None);
        let availability = AvailabilityTracker::new(dyn_store);

        let harness = Self {
            store,
            gateway,
            delivery,
            workflow,
            payments,
            availability,
            admin: account(UserRole::Admin, "Ada Admin"),
            client: account(UserRole::Client, "Chidi Client"),
        };
        harness.store.insert_user(harness.admin.clone());
        harness.store.insert_user(harness.client.clone());
        harness
    }

    pub fn admin_actor(&self) -> Actor {
        Actor::user(self.admin.id, UserRole::Admin)
    }

    pub fn client_actor(&self) -> Actor {
        Actor::user(self.client.id, UserRole::Client)
    }

    /// Adds an approved serviceman with the given history
    pub fn add_serviceman(&self, name: &str, rating: Decimal, total_jobs_completed: i32) -> UserAccount {
        let account = account(UserRole::Serviceman, name);
        let mut profile = ServicemanProfile::new(account.id, None);
        profile.is_approved = true;
        profile.rating = rating;
        profile.total_jobs_completed = total_jobs_completed;
        self.store.insert_user(account.clone());
        self.store.insert_profile(profile);
        account
    }

    pub async fn profile(&self, serviceman_id: Uuid) -> ServicemanProfile {
        self.store
            .get_serviceman_profile(serviceman_id)
            .await
            .unwrap()
            .unwrap()
    }

    pub async fn history(&self, request_id: Uuid) -> Vec<StatusHistoryEntry> {
        self.store.status_history(request_id).await.unwrap()
    }

    /// Pays a booking fee at the tier for `fee_is_emergency` and returns its reference
    pub async fn pay_booking_fee(&self, fee_is_emergency: bool) -> String {
        let init = self
            .payments
            .initialize_booking_fee(
                &self.client,
                BookingFeeInput {
                    is_emergency: fee_is_emergency,
                },
            )
            .await
            .unwrap();
        let verified = self.payments.verify(&self.client, &init.reference).await.unwrap();
        assert_eq!(verified.status, PaymentStatus::Successful);
        init.reference
    }

    pub fn booking(&self, payment_reference: String, is_emergency: bool) -> CreateServiceRequestInput {
        CreateServiceRequestInput {
            payment_reference,
            category_id: Uuid::new_v4(),
            booking_date: in_days(7),
            is_emergency,
            client_address: "12 Admiralty Way, Lekki".to_string(),
            service_description: "Kitchen sink leaking under the cabinet".to_string(),
            preferred_serviceman_id: None,
        }
    }

    /// Books and pays for a normal request, returning it in PENDING_ADMIN_ASSIGNMENT
    pub async fn open_request(&self) -> ServiceRequest {
        let reference = self.pay_booking_fee(false).await;
        self.workflow
            .create_request(&self.client_actor(), self.booking(reference, false))
            .await
            .unwrap()
            .service_request
    }

    /// Drives a fresh request to AWAITING_CLIENT_APPROVAL with the given assignment
    pub async fn priced(&self, serviceman: &UserAccount, backup: Option<&UserAccount>) -> ServiceRequest {
        let request = self.open_request().await;
        let admin = self.admin_actor();

        self.workflow
            .assign_serviceman(
                &admin,
                request.id,
                AssignServicemanInput {
                    serviceman_id: serviceman.id,
                    backup_serviceman_id: backup.map(|b| b.id),
                    notes: None,
                },
            )
            .await
            .unwrap();
        self.workflow
            .submit_estimate(
                &Actor::user(serviceman.id, UserRole::Serviceman),
                request.id,
                SubmitEstimateInput {
                    estimated_cost: Decimal::from(10000),
                    notes: None,
                },
            )
            .await
            .unwrap();
        self.workflow
            .finalize_price(&admin, request.id, FinalizePriceInput::default())
            .await
            .unwrap()
            .service_request
    }

    /// Starts the final payment for a priced request and returns its reference
    pub async fn start_service_payment(&self, request_id: Uuid) -> String {
        self.payments
            .initialize_service_payment(
                &self.client,
                ServicePaymentInput {
                    service_request_id: request_id,
                },
            )
            .await
            .unwrap()
            .reference
    }

    /// Drives a fresh request to IN_PROGRESS with the given assignment
    pub async fn in_progress(&self, serviceman: &UserAccount, backup: Option<&UserAccount>) -> ServiceRequest {
        let request = self.priced(serviceman, backup).await;
        let reference = self.start_service_payment(request.id).await;
        self.payments.verify(&self.client, &reference).await.unwrap();
        self.workflow
            .authorize_work(&self.admin_actor(), request.id, AuthorizeWorkInput::default())
            .await
            .unwrap()
            .service_request
    }

    pub async fn notifications_for(&self, user_id: Uuid) -> Vec<Notification> {
        let window = serviceman_backend::store::PageWindow { limit: 100, offset: 0 };
        self.store
            .list_notifications(user_id, false, window)
            .await
            .unwrap()
            .0
    }

    /// Waits for background deliveries to reach the channel
    pub async fn wait_for_attempts(&self, expected: usize) {
        for _ in 0..100 {
            if *self.delivery.attempts.lock() >= expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

pub fn account(role: UserRole, name: &str) -> UserAccount {
    UserAccount {
        id: Uuid::new_v4(),
        role,
        full_name: name.to_string(),
        email: format!("{}@example.com", name.to_lowercase().replace(' ', ".")),
        phone_number: Some("+2348000000000".to_string()),
    }
}

pub fn in_days(days: i64) -> NaiveDate {
    Utc::now().date_naive() + chrono::Duration::days(days)
}

pub fn test_settings() -> Settings {
    Settings {
        env: Environment::Dev,
        server_addr: "127.0.0.1:0".to_string(),
        database_url: "postgres://unused".to_string(),
        database_max_connections: 1,
        redis_url: "redis://unused".to_string(),
        notification_queue_key: "notifications:test".to_string(),
        cors_allow_origins: vec!["http://localhost:3000".to_string()],
        jwt_secret: "test-secret".to_string(),
        jwt_issuer: None,
        paystack_secret_key: "sk_test".to_string(),
        paystack_webhook_secret: "whsec_test".to_string(),
        paystack_base_url: "http://localhost:0".to_string(),
        paystack_timeout_seconds: 1,
        frontend_url: "http://localhost:3000".to_string(),
    }
}
