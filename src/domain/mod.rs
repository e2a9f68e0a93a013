//! Domain types and DTOs
//!
//! These types define the data structures for the service marketplace entities.

pub mod notifications;
pub mod payments;
pub mod service_requests;
pub mod users;

// Re-export commonly used types
pub use notifications::*;
pub use payments::*;
pub use service_requests::*;
pub use users::*;
