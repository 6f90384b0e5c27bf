//! # Payments
//!
//! Status rules for the two payment records attached to every application.
//!
//! ```text
//! INITIAL_70:  PENDING ──► COLLECTED
//! FINAL_30:    PENDING ──► VERIFIED
//!                 ▲  └───► FAILED
//!                 └────────┘   (re-initiated)
//! ```
//!
//! `COLLECTED` and `VERIFIED` are settled: once money is in, the record
//! never moves again.

use crate::errors::PaymentError;
use crate::types::{ApplicationStatus, PaymentStatus, PaymentType};

impl PaymentType {
    /// Whether records of this type ever carry `status`.
    pub fn allows(&self, status: PaymentStatus) -> bool {
        match self {
            Self::Initial70 => matches!(status, PaymentStatus::Pending | PaymentStatus::Collected),
            Self::Final30 => matches!(
                status,
                PaymentStatus::Pending | PaymentStatus::Verified | PaymentStatus::Failed
            ),
        }
    }
}

/// Validate a payment status change and return the new status.
pub fn advance_payment(
    kind: PaymentType,
    from: PaymentStatus,
    to: PaymentStatus,
) -> Result<PaymentStatus, PaymentError> {
    for status in [from, to] {
        if !kind.allows(status) {
            return Err(PaymentError::StatusNotApplicable { kind, status });
        }
    }
    if from.is_settled() {
        return Err(PaymentError::AlreadySettled { kind, status: from });
    }

    use crate::types::PaymentStatus as P;
    let ok = match kind {
        PaymentType::Initial70 => matches!((from, to), (P::Pending, P::Collected)),
        PaymentType::Final30 => matches!(
            (from, to),
            (P::Pending, P::Verified) | (P::Pending, P::Failed) | (P::Failed, P::Pending)
        ),
    };
    if ok {
        Ok(to)
    } else {
        Err(PaymentError::InvalidTransition { kind, from, to })
    }
}

/// The online 30% may only be started once the laptop is delivered and the
/// 70% has been collected.
pub fn can_initiate_final(status: ApplicationStatus, initial: PaymentStatus) -> bool {
    status == ApplicationStatus::Delivered && initial == PaymentStatus::Collected
}
