//! Error types for the workflow crate.

use thiserror::Error;

use crate::types::{ApplicationStatus, PaymentStatus, PaymentType, Role};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkflowError {
    #[error("application is already {0} and cannot change")]
    Terminal(ApplicationStatus),

    #[error("cannot move application from {from} to {to}")]
    InvalidTransition {
        from: ApplicationStatus,
        to: ApplicationStatus,
    },

    #[error("role {role} may not move application from {from} to {to}")]
    NotAuthorized {
        role: Role,
        from: ApplicationStatus,
        to: ApplicationStatus,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PricingError {
    #[error("total price must be positive, got {0}")]
    NonPositiveTotal(i64),

    #[error("price {0} is too large to split")]
    Overflow(i64),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PaymentError {
    #[error("{kind} payments never use status {status}")]
    StatusNotApplicable {
        kind: PaymentType,
        status: PaymentStatus,
    },

    #[error("{kind} payment is already {status}")]
    AlreadySettled {
        kind: PaymentType,
        status: PaymentStatus,
    },

    #[error("cannot move {kind} payment from {from} to {to}")]
    InvalidTransition {
        kind: PaymentType,
        from: PaymentStatus,
        to: PaymentStatus,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind}: {value:?}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}
