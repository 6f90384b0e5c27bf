//! Application configuration loaded from environment variables.

use crate::errors::{Result, ServerError};

#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SQLite database file
    pub database_url: String,
    /// Port for the REST API server
    pub api_port: u16,
    /// Base URL of the payment gateway (e.g. https://api.paystack.co)
    pub gateway_url: String,
    /// Secret key sent as a bearer token to the gateway
    pub gateway_secret: String,
    /// Where the gateway sends the student after checkout
    pub callback_url: Option<String>,
    /// How often (in seconds) to re-verify pending online payments
    pub reconcile_interval_secs: u64,
    /// Email of an admin account to create on first start
    pub bootstrap_admin_email: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Config {
            database_url: env_var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:./lapfin.db".to_string()),
            api_port: env_var("API_PORT")
                .unwrap_or_else(|_| "3001".to_string())
                .parse()
                .map_err(|_| ServerError::Config("Invalid API_PORT".to_string()))?,
            gateway_url: env_var("PAYMENT_GATEWAY_URL").map_err(|_| {
                ServerError::Config(
                    "PAYMENT_GATEWAY_URL environment variable is required".to_string(),
                )
            })?,
            gateway_secret: env_var("PAYMENT_GATEWAY_SECRET").map_err(|_| {
                ServerError::Config(
                    "PAYMENT_GATEWAY_SECRET environment variable is required".to_string(),
                )
            })?,
            callback_url: env_var("PAYMENT_CALLBACK_URL").ok(),
            reconcile_interval_secs: env_var("RECONCILE_INTERVAL_SECS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .map_err(|_| ServerError::Config("Invalid RECONCILE_INTERVAL_SECS".to_string()))?,
            bootstrap_admin_email: env_var("BOOTSTRAP_ADMIN_EMAIL")
                .ok()
                .filter(|s| !s.trim().is_empty()),
        })
    }
}

fn env_var(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| ServerError::Config(format!("Missing env var: {key}")))
}
