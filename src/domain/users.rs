//! User and serviceman profile types
//!
//! Accounts and profiles are owned by the user-management side of the platform;
//! the workflow only reads roles/identity and mutates the profile counters it is
//! responsible for (availability, rating, completed jobs).

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Platform role of a user account
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserRole {
    Client,
    Serviceman,
    Admin,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Client => "CLIENT",
            UserRole::Serviceman => "SERVICEMAN",
            UserRole::Admin => "ADMIN",
        }
    }
}

impl std::fmt::Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CLIENT" => Ok(UserRole::Client),
            "SERVICEMAN" => Ok(UserRole::Serviceman),
            "ADMIN" => Ok(UserRole::Admin),
            other => Err(format!("unknown user role: {}", other)),
        }
    }
}

/// User account as seen by the workflow
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserAccount {
    pub id: Uuid,
    pub role: UserRole,
    pub full_name: String,
    pub email: String,
    pub phone_number: Option<String>,
}

impl UserAccount {
    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }

    pub fn is_serviceman(&self) -> bool {
        self.role == UserRole::Serviceman
    }
}

/// Serviceman profile (rating, job counter, availability, approval)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServicemanProfile {
    pub user_id: Uuid,
    pub category_id: Option<Uuid>,
    /// Running average, 2 decimal places
    pub rating: Decimal,
    pub total_jobs_completed: i32,
    /// Maintained by the availability tracker only
    pub is_available: bool,
    pub is_approved: bool,
    pub updated_at: DateTime<Utc>,
}

impl ServicemanProfile {
    /// Fresh profile for a newly registered serviceman
    pub fn new(user_id: Uuid, category_id: Option<Uuid>) -> Self {
        Self {
            user_id,
            category_id,
            rating: Decimal::ZERO,
            total_jobs_completed: 0,
            is_available: true,
            is_approved: false,
            updated_at: Utc::now(),
        }
    }
}

/// A serviceman account together with its profile, as loaded for assignment checks
#[derive(Debug, Clone)]
pub struct ServicemanCandidate {
    pub account: UserAccount,
    pub profile: Option<ServicemanProfile>,
}

/// Response for GET /me
#[derive(Debug, Clone, Serialize)]
pub struct MeResponse {
    pub id: Uuid,
    pub role: UserRole,
    pub full_name: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serviceman_profile: Option<ServicemanProfile>,
}
