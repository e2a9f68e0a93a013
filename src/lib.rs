//! Service marketplace backend
//!
//! Moves a service request from booking to review through an explicit state machine,
//! keeping serviceman availability, ratings, payments and notifications consistent
//! with every step.

pub mod api;
pub mod app;
pub mod auth;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod logging;
pub mod middleware;
pub mod routes;
pub mod services;
pub mod store;
pub mod workflow;
