//! Service request workflow
//!
//! `machine` decides, `service` loads state, commits plans and hands notifications to
//! the dispatcher.

pub mod error;
pub mod machine;
pub mod service;

pub use error::{WorkflowError, WorkflowResult};
pub use machine::{Actor, Effect, Parties, TransitionPlan, WorkflowEvent};
pub use service::WorkflowService;
