//! Paystack client
//!
//! Amounts cross the wire in kobo (minor units). Transport failures and 5xx responses
//! are retried with exponential backoff; 4xx responses are returned immediately.
//! Webhook bodies are signed with HMAC-SHA512 over the raw bytes.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use backoff::ExponentialBackoffBuilder;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::{Client, StatusCode};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::Sha512;
use thiserror::Error;
use tracing::{debug, error, instrument, warn};

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("payment gateway unreachable: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("payment gateway rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("amount {0} cannot be charged")]
    InvalidAmount(Decimal),
}

/// Outcome of a transaction as reported by the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayStatus {
    Success,
    Failed,
    Pending,
}

#[derive(Debug, Clone)]
pub struct GatewayCharge {
    pub email: String,
    pub amount: Decimal,
    pub reference: String,
    pub callback_url: Option<String>,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayInitialization {
    pub authorization_url: String,
    pub access_code: String,
    pub reference: String,
}

#[derive(Debug, Clone)]
pub struct GatewayVerification {
    pub reference: String,
    pub status: GatewayStatus,
    pub amount: Decimal,
    pub paid_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn initialize(&self, charge: &GatewayCharge) -> Result<GatewayInitialization, GatewayError>;

    async fn verify(&self, reference: &str) -> Result<GatewayVerification, GatewayError>;
}

pub fn to_kobo(amount: Decimal) -> Option<i64> {
    if amount <= Decimal::ZERO {
        return None;
    }
    (amount * Decimal::ONE_HUNDRED).round().to_i64()
}

pub fn from_kobo(kobo: i64) -> Decimal {
    Decimal::new(kobo, 2)
}

/// Header carrying the hex HMAC-SHA512 of a webhook body
pub const SIGNATURE_HEADER: &str = "x-paystack-signature";

type HmacSha512 = Hmac<Sha512>;

/// Checks `signature` against the HMAC-SHA512 of the raw body, in constant time
pub fn verify_webhook_signature(secret: &str, body: &[u8], signature: &str) -> bool {
    let Ok(expected) = hex::decode(signature.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha512::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    status: bool,
    message: String,
    data: Option<T>,
}

#[derive(Debug, Serialize)]
struct InitializeBody<'a> {
    email: &'a str,
    amount: i64,
    reference: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    callback_url: Option<&'a str>,
    metadata: &'a serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct VerifyData {
    reference: String,
    status: String,
    amount: i64,
    paid_at: Option<DateTime<Utc>>,
}

// ============================================================================
// Client
// ============================================================================

#[derive(Clone)]
pub struct PaystackClient {
    client: Client,
    base_url: String,
    secret_key: String,
    max_retry: Duration,
}

impl PaystackClient {
    pub fn new(base_url: &str, secret_key: &str, timeout_seconds: u64) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()
            .context("Failed to create HTTP client")?;

        tracing::info!(base_url = base_url, "Paystack client initialized");

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            secret_key: secret_key.to_string(),
            max_retry: Duration::from_secs(timeout_seconds),
        })
    }

    async fn send_once<R: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<R, backoff::Error<GatewayError>> {
        let response = request
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "Paystack request failed");
                backoff::Error::transient(GatewayError::Transport(e))
            })?;

        let status = response.status();
        let envelope = response.json::<Envelope<R>>().await.map_err(|e| {
            if status.is_server_error() {
                backoff::Error::transient(GatewayError::Transport(e))
            } else {
                backoff::Error::permanent(GatewayError::Transport(e))
            }
        })?;

        match envelope.data {
            Some(data) if status.is_success() && envelope.status => Ok(data),
            _ => {
                let err = GatewayError::Rejected {
                    status: status.as_u16(),
                    message: envelope.message,
                };
                if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
                    warn!(status = %status, "Paystack temporarily unavailable");
                    Err(backoff::Error::transient(err))
                } else {
                    error!(status = %status, error = %err, "Paystack rejected request");
                    Err(backoff::Error::permanent(err))
                }
            }
        }
    }

    async fn call<R, F>(&self, build: F) -> Result<R, GatewayError>
    where
        R: DeserializeOwned,
        F: Fn() -> reqwest::RequestBuilder,
    {
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(250))
            .with_max_elapsed_time(Some(self.max_retry))
            .build();

        backoff::future::retry(policy, || self.send_once(build())).await
    }
}

#[async_trait]
impl PaymentGateway for PaystackClient {
    #[instrument(skip(self, charge), fields(reference = %charge.reference))]
    async fn initialize(&self, charge: &GatewayCharge) -> Result<GatewayInitialization, GatewayError> {
        let amount = to_kobo(charge.amount).ok_or(GatewayError::InvalidAmount(charge.amount))?;
        let url = format!("{}/transaction/initialize", self.base_url);
        let body = InitializeBody {
            email: &charge.email,
            amount,
            reference: &charge.reference,
            callback_url: charge.callback_url.as_deref(),
            metadata: &charge.metadata,
        };

        debug!(url = %url, amount_kobo = amount, "Initializing Paystack transaction");
        self.call(|| self.client.post(&url).json(&body)).await
    }

    #[instrument(skip(self))]
    async fn verify(&self, reference: &str) -> Result<GatewayVerification, GatewayError> {
        let url = format!("{}/transaction/verify/{}", self.base_url, reference);
        let data: VerifyData = self.call(|| self.client.get(&url)).await?;

        let status = match data.status.as_str() {
            "success" => GatewayStatus::Success,
            "failed" | "abandoned" | "reversed" => GatewayStatus::Failed,
            _ => GatewayStatus::Pending,
        };

        Ok(GatewayVerification {
            reference: data.reference,
            status,
            amount: from_kobo(data.amount),
            paid_at: data.paid_at,
        })
    }
}
