//! Long-running background task that re-verifies pending online payments
//! with the gateway, so that applications complete even when the student
//! never returns to the verify endpoint.

use std::sync::Arc;
use std::time::Duration;

use lapfin_workflow::PaymentStatus;
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::db;
use crate::errors::{Result, ServerError};
use crate::gateway::PaymentGateway;
use crate::models::ActorRef;
use crate::service;

/// Maximum payments checked per pass.
const BATCH_SIZE: i64 = 50;

pub struct ReconcilerState {
    pub pool: SqlitePool,
    pub gateway: Arc<dyn PaymentGateway>,
    pub interval: Duration,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassSummary {
    pub checked: usize,
    pub verified: usize,
    pub failed: usize,
    pub errors: usize,
}

/// Run the reconciliation loop until `shutdown` is cancelled.
pub async fn run(state: Arc<ReconcilerState>, shutdown: CancellationToken) {
    info!(
        "Payment reconciler starting (interval {}s)",
        state.interval.as_secs()
    );

    loop {
        match reconcile_once(&state.pool, state.gateway.as_ref()).await {
            Ok(summary) if summary.checked > 0 => info!(
                "Reconciled {} payments → {} verified, {} failed, {} errors",
                summary.checked, summary.verified, summary.failed, summary.errors
            ),
            Ok(_) => {}
            Err(e) => error!("Reconciler pass error: {e}"),
        }

        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(state.interval) => {}
        }
    }

    info!("Payment reconciler stopped");
}

/// Perform a single pass over pending online payments.
///
/// A failure on one payment is logged and counted; the pass continues.
pub async fn reconcile_once(
    pool: &SqlitePool,
    gateway: &dyn PaymentGateway,
) -> Result<PassSummary> {
    reconcile_batch(pool, gateway, BATCH_SIZE).await
}

/// Check up to `batch` pending payments, least recently checked first. Each
/// one is stamped before the gateway call so that payments which stay pending
/// rotate to the back of the queue.
async fn reconcile_batch(
    pool: &SqlitePool,
    gateway: &dyn PaymentGateway,
    batch: i64,
) -> Result<PassSummary> {
    let pending = db::pending_final_payments(pool, batch).await?;
    let system = ActorRef::system();
    let mut summary = PassSummary::default();

    for payment in pending {
        summary.checked += 1;
        let Some(reference) = payment.reference.clone() else {
            continue;
        };

        let result: Result<PaymentStatus> = async {
            db::mark_payment_checked(pool, payment.id).await?;
            let app = db::get_application(pool, payment.application_id)
                .await?
                .ok_or_else(|| {
                    ServerError::Corrupt(format!(
                        "payment {} points at missing application {}",
                        payment.id, payment.application_id
                    ))
                })?;
            let outcome = gateway.verify(&reference).await?;
            service::settle_final_payment(pool, &system, &app, &payment, outcome).await
        }
        .await;

        match result {
            Ok(PaymentStatus::Verified) => summary.verified += 1,
            Ok(PaymentStatus::Failed) => summary.failed += 1,
            Ok(_) => {}
            Err(e) => {
                summary.errors += 1;
                warn!("Could not reconcile payment {reference}: {e}");
            }
        }
    }

    Ok(summary)
}
