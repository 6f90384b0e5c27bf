//! Payment gateway client: starts and verifies the online 30% payment.
//!
//! The gateway speaks a small JSON contract:
//!
//! * `POST {base}/transaction/initialize` with `{ email, amount, reference, callback_url }`
//! * `GET  {base}/transaction/verify/{reference}`
//!
//! Both answer `{ status, message, data }` and authenticate with a bearer secret.
//!
//! ## Resilience
//!
//! * Exponential back-off is applied when the gateway is unreachable, returns
//!   a 5xx, or rate-limits, up to [`MAX_BACKOFF_SECS`] seconds and
//!   [`MAX_ATTEMPTS`] attempts.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, ServerError};

const MAX_BACKOFF_SECS: u64 = 60;
const INITIAL_BACKOFF_SECS: u64 = 2;
const MAX_ATTEMPTS: u32 = 4;

// ─────────────────────────────────────────────────────────
// Contract
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct CheckoutRequest {
    pub email: String,
    /// Minor units.
    pub amount: i64,
    pub reference: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkout {
    pub authorization_url: String,
    pub reference: String,
}

/// What the gateway knows about a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayOutcome {
    Success { amount: i64 },
    Failed { reason: String },
    /// Not finished yet; ask again later.
    Pending,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn initialize(&self, request: &CheckoutRequest) -> Result<Checkout>;
    async fn verify(&self, reference: &str) -> Result<GatewayOutcome>;
}

// ─────────────────────────────────────────────────────────
// JSON response shapes
// ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct Envelope<T> {
    pub status: bool,
    #[serde(default)]
    pub message: String,
    pub data: Option<T>,
}

#[derive(Debug, Deserialize)]
pub struct InitializeData {
    pub authorization_url: String,
    pub reference: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyData {
    pub status: String,
    #[serde(default)]
    pub amount: i64,
    pub gateway_response: Option<String>,
}

/// Map a verify payload to an outcome.
pub fn outcome_from_verify(data: &VerifyData) -> GatewayOutcome {
    match data.status.as_str() {
        "success" => GatewayOutcome::Success {
            amount: data.amount,
        },
        "failed" | "reversed" | "abandoned" => GatewayOutcome::Failed {
            reason: data
                .gateway_response
                .clone()
                .unwrap_or_else(|| data.status.clone()),
        },
        _ => GatewayOutcome::Pending,
    }
}

/// Decode a gateway reply. A body that does not match the contract is the
/// gateway's fault and surfaces as a gateway error, not a client one.
fn decode<T: DeserializeOwned>(body: Value, what: &str) -> Result<T> {
    let envelope: Envelope<T> = serde_json::from_value(body)
        .map_err(|e| ServerError::Gateway(format!("{what}: bad response: {e}")))?;
    unwrap_envelope(envelope, what)
}

fn parse_initialize(body: Value) -> Result<Checkout> {
    let data: InitializeData = decode(body, "initialize")?;
    Ok(Checkout {
        authorization_url: data.authorization_url,
        reference: data.reference,
    })
}

fn parse_verify(body: Value) -> Result<GatewayOutcome> {
    let data: VerifyData = decode(body, "verify")?;
    Ok(outcome_from_verify(&data))
}

fn unwrap_envelope<T>(envelope: Envelope<T>, what: &str) -> Result<T> {
    if !envelope.status {
        return Err(ServerError::Gateway(format!(
            "{what} rejected: {}",
            envelope.message
        )));
    }
    envelope
        .data
        .ok_or_else(|| ServerError::Gateway(format!("{what}: empty data")))
}

// ─────────────────────────────────────────────────────────
// HTTP implementation
// ─────────────────────────────────────────────────────────

pub struct HttpGateway {
    client: Client,
    base_url: String,
    secret: String,
}

impl HttpGateway {
    pub fn new(client: Client, base_url: &str, secret: &str) -> Self {
        HttpGateway {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            secret: secret.to_string(),
        }
    }

    /// Send the request built by `build`, retrying transient failures.
    async fn send_json(&self, build: impl Fn() -> RequestBuilder) -> Result<Value> {
        let mut backoff = INITIAL_BACKOFF_SECS;
        let mut attempt = 1;

        loop {
            let retry_reason = match build().bearer_auth(&self.secret).send().await {
                Err(e) if e.is_timeout() || e.is_connect() => format!("request failed: {e}"),
                Err(e) => return Err(ServerError::Gateway(e.to_string())),
                Ok(resp) => {
                    let status = resp.status();
                    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                        "rate-limited".to_string()
                    } else if status.is_server_error() {
                        format!("server error {status}")
                    } else {
                        debug!("Gateway responded {status}");
                        return resp
                            .json::<Value>()
                            .await
                            .map_err(|e| ServerError::Gateway(format!("bad response: {e}")));
                    }
                }
            };

            if attempt >= MAX_ATTEMPTS {
                return Err(ServerError::Gateway(format!(
                    "{retry_reason} (gave up after {attempt} attempts)"
                )));
            }
            warn!("Gateway {retry_reason} (will retry in {backoff}s)");
            tokio::time::sleep(Duration::from_secs(backoff)).await;
            backoff = (backoff * 2).min(MAX_BACKOFF_SECS);
            attempt += 1;
        }
    }
}

#[async_trait]
impl PaymentGateway for HttpGateway {
    async fn initialize(&self, request: &CheckoutRequest) -> Result<Checkout> {
        let url = format!("{}/transaction/initialize", self.base_url);
        let body = self
            .send_json(|| self.client.post(&url).json(request))
            .await?;
        parse_initialize(body)
    }

    async fn verify(&self, reference: &str) -> Result<GatewayOutcome> {
        let url = format!("{}/transaction/verify/{reference}", self.base_url);
        let body = self.send_json(|| self.client.get(&url)).await?;
        parse_verify(body)
    }
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────
