use uuid::Uuid;

use super::Claims;
use crate::domain::{UserAccount, UserRole};
use crate::workflow::Actor;

/// Authenticated caller, resolved from the token subject to a stored account.
/// Roles come from the account row, never from the token.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: Uuid,
    pub role: UserRole,
    pub account: UserAccount,
}

impl AuthContext {
    pub fn subject(claims: &Claims) -> Result<Uuid, &'static str> {
        Uuid::parse_str(&claims.sub).map_err(|_| "Invalid user ID in token")
    }

    pub fn from_account(account: UserAccount) -> Self {
        Self {
            user_id: account.id,
            role: account.role,
            account,
        }
    }

    pub fn actor(&self) -> Actor {
        Actor::User {
            id: self.user_id,
            role: self.role,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }
}
