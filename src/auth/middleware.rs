use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;

use super::AuthContext;
use crate::app::AppState;
use crate::error::ErrorResponse;
use crate::middleware::RequestIdExt;

/// Extractor that requires an authenticated, known user
///
/// Example:
/// ```ignore
/// async fn protected_route(auth: RequireAuth) -> impl IntoResponse {
///     format!("Hello, {}", auth.account.full_name)
/// }
/// ```
#[derive(Debug, Clone)]
pub struct RequireAuth(pub AuthContext);

impl std::ops::Deref for RequireAuth {
    type Target = AuthContext;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[derive(Debug)]
pub enum AuthError {
    MissingToken,
    InvalidFormat,
    InvalidToken,
    UnknownUser,
    Unavailable,
}

#[derive(Debug)]
pub struct AuthRejection {
    error: AuthError,
    request_id: Option<String>,
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self.error {
            AuthError::MissingToken => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", "Missing authorization token"),
            AuthError::InvalidFormat => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", "Invalid authorization format"),
            AuthError::InvalidToken => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", "Invalid or expired token"),
            AuthError::UnknownUser => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", "Account not found"),
            AuthError::Unavailable => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred",
            ),
        };

        let body = ErrorResponse {
            code: code.to_string(),
            message: message.to_string(),
            details: None,
            request_id: self.request_id,
        };

        (status, Json(body)).into_response()
    }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for RequireAuth {
    type Rejection = AuthRejection;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let reject = |error| AuthRejection {
            error,
            request_id: parts.headers.request_id().map(str::to_string),
        };

        // Extract Authorization header
        let auth_header = parts
            .headers
            .get(AUTHORIZATION)
            .ok_or_else(|| reject(AuthError::MissingToken))?
            .to_str()
            .map_err(|_| reject(AuthError::InvalidFormat))?;

        // Parse Bearer token
        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or_else(|| reject(AuthError::InvalidFormat))?;

        if token.is_empty() {
            return Err(reject(AuthError::MissingToken));
        }

        let claims = state.jwt.verify_token(token).map_err(|e| {
            tracing::warn!(error = %e, "JWT verification failed");
            reject(AuthError::InvalidToken)
        })?;

        let user_id = AuthContext::subject(&claims).map_err(|e| {
            tracing::warn!(error = %e, "Failed to build auth context");
            reject(AuthError::InvalidToken)
        })?;

        let account = state
            .store
            .get_user(user_id)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, user_id = %user_id, "Failed to load authenticated user");
                reject(AuthError::Unavailable)
            })?
            .ok_or_else(|| {
                tracing::warn!(user_id = %user_id, "Token subject has no account");
                reject(AuthError::UnknownUser)
            })?;

        Ok(RequireAuth(AuthContext::from_account(account)))
    }
}
