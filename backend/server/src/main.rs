//! Laptop financing server — entry point.
//!
//! Exposes the application workflow as an Axum REST API over SQLite and runs
//! a background reconciler that re-verifies pending online payments with the
//! payment gateway.

mod api;
mod audit;
mod auth;
mod config;
mod db;
mod errors;
mod gateway;
mod models;
mod reconciler;
mod service;

#[cfg(test)]
mod test_service;
#[cfg(test)]
mod test_support;

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use api::AppState;
use config::Config;
use gateway::{HttpGateway, PaymentGateway};
use reconciler::ReconcilerState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise structured logging (RUST_LOG controls verbosity).
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Load optional .env file (ignored if missing).
    let _ = dotenvy::dotenv();

    let config = Config::from_env().map_err(|e| anyhow::anyhow!("{e}"))?;

    // Set up the SQLite connection pool and run migrations.
    let pool = db::init_pool(&config.database_url).await?;

    if let Some(email) = &config.bootstrap_admin_email {
        if service::bootstrap_admin(&pool, email).await?.is_none() {
            info!("Admin account already present; skipping bootstrap");
        }
    }

    let client = Client::builder()
        .timeout(Duration::from_secs(30))
        .build()?;
    let gateway: Arc<dyn PaymentGateway> = Arc::new(HttpGateway::new(
        client,
        &config.gateway_url,
        &config.gateway_secret,
    ));

    // ─── Background reconciler ────────────────────────────
    let shutdown = CancellationToken::new();
    let reconciler_state = Arc::new(ReconcilerState {
        pool: pool.clone(),
        gateway: gateway.clone(),
        interval: Duration::from_secs(config.reconcile_interval_secs.max(1)),
    });
    let reconciler = tokio::spawn(reconciler::run(reconciler_state, shutdown.clone()));

    // ─── REST API ─────────────────────────────────────────
    let app = api::router(Arc::new(AppState {
        pool,
        gateway,
        callback_url: config.callback_url.clone(),
    }));

    let addr = format!("0.0.0.0:{}", config.api_port);
    info!("API listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Could not listen for shutdown signal: {e}");
                std::future::pending::<()>().await;
            }
            info!("Shutdown requested");
            signal.cancel();
        })
        .await?;

    shutdown.cancel();
    reconciler.await?;
    Ok(())
}
