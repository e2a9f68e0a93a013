//! Service layer modules for workflow collaborators and external integrations.
//!
//! Contains the availability tracker, rating aggregation, notification dispatch and
//! delivery, and the payment ledger with its Paystack client.

pub mod availability;
pub mod delivery;
pub mod notifications;
pub mod payments;
pub mod paystack;
pub mod ratings;

pub use availability::AvailabilityTracker;
pub use delivery::{LogDelivery, NotificationDelivery, RedisQueueDelivery};
pub use notifications::NotificationDispatcher;
pub use payments::PaymentLedger;
pub use paystack::{PaymentGateway, PaystackClient};
