use crate::invariants::{assert_payment_not_regressed, assert_split_is_exact};
use crate::{
    advance_payment, can_initiate_final, ApplicationStatus, PaymentError, PaymentStatus as P,
    PaymentType, PriceBreakdown,
};

#[test]
fn test_initial_payment_collects_once() {
    let status = advance_payment(PaymentType::Initial70, P::Pending, P::Collected).unwrap();
    assert_eq!(status, P::Collected);

    assert_eq!(
        advance_payment(PaymentType::Initial70, P::Collected, P::Pending),
        Err(PaymentError::AlreadySettled {
            kind: PaymentType::Initial70,
            status: P::Collected,
        })
    );
}

#[test]
fn test_initial_payment_never_verified_or_failed() {
    assert_eq!(
        advance_payment(PaymentType::Initial70, P::Pending, P::Verified),
        Err(PaymentError::StatusNotApplicable {
            kind: PaymentType::Initial70,
            status: P::Verified,
        })
    );
    assert!(!PaymentType::Initial70.allows(P::Failed));
}

#[test]
fn test_final_payment_can_retry_after_failure() {
    let failed = advance_payment(PaymentType::Final30, P::Pending, P::Failed).unwrap();
    let pending = advance_payment(PaymentType::Final30, failed, P::Pending).unwrap();
    let verified = advance_payment(PaymentType::Final30, pending, P::Verified).unwrap();
    assert_eq!(verified, P::Verified);
}

#[test]
fn test_final_payment_cannot_jump_from_failed_to_verified() {
    assert_eq!(
        advance_payment(PaymentType::Final30, P::Failed, P::Verified),
        Err(PaymentError::InvalidTransition {
            kind: PaymentType::Final30,
            from: P::Failed,
            to: P::Verified,
        })
    );
}

#[test]
fn test_settled_payments_never_regress() {
    for kind in PaymentType::ALL {
        for from in P::ALL {
            for to in P::ALL {
                if let Ok(after) = advance_payment(kind, from, to) {
                    assert_payment_not_regressed(from, after);
                }
            }
        }
    }
}

#[test]
fn test_final_initiation_requires_delivery_and_collection() {
    assert!(can_initiate_final(ApplicationStatus::Delivered, P::Collected));
    assert!(!can_initiate_final(ApplicationStatus::Delivered, P::Pending));
    assert!(!can_initiate_final(
        ApplicationStatus::DeliveryAssigned,
        P::Collected
    ));
    assert!(!can_initiate_final(ApplicationStatus::Completed, P::Collected));
}

#[test]
fn test_breakdown_split_is_exact_for_catalog_prices() {
    for total in [450_000, 612_345, 899_999, 1_250_050] {
        assert_split_is_exact(&PriceBreakdown::from_total(total).unwrap());
    }
}
