//! # Laptop Financing Workflow
//!
//! Pure rules behind a laptop financing application. Students apply, an SRC
//! officer of their university reviews, a platform admin approves, delivery
//! staff hand the laptop over against 70% of the price, and the student
//! settles the remaining 30% online.
//!
//! | Concern        | Entry Point(s)                                      |
//! |----------------|-----------------------------------------------------|
//! | Status changes | [`transition`], [`role_can_transition`], [`next_statuses`] |
//! | Price split    | [`PriceBreakdown::from_total`]                      |
//! | Payments       | [`advance_payment`], [`can_initiate_final`]         |
//! | Audit          | [`AuditAction`]                                     |
//!
//! ## Architecture
//!
//! This crate performs no I/O. The server loads the current state, asks this
//! crate whether a change is allowed, and persists the result together with
//! an audit row.

mod audit;
mod errors;
mod payments;
mod pricing;
mod types;
mod workflow;

#[cfg(test)]
mod test_payments;

pub use audit::AuditAction;
pub use errors::{ParseEnumError, PaymentError, PricingError, WorkflowError};
pub use payments::{advance_payment, can_initiate_final};
pub use pricing::{PriceBreakdown, FINAL_PERCENT, INITIAL_PERCENT};
pub use types::{ApplicationStatus, Decision, PaymentStatus, PaymentType, Role};
pub use workflow::{next_statuses, role_can_transition, transition, Transition, TRANSITIONS};
