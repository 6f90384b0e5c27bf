//! # Workflow
//!
//! The permitted status transitions, keyed by `(from, to)` and gated by the
//! acting role. Every caller that mutates an application's status goes
//! through [`transition`]; nothing else in the system writes a status.

use crate::errors::WorkflowError;
use crate::types::{ApplicationStatus, Role};

use crate::types::ApplicationStatus as S;

/// One row of the transition table.
#[derive(Debug, Clone, Copy)]
pub struct Transition {
    pub from: ApplicationStatus,
    pub to: ApplicationStatus,
    pub roles: &'static [Role],
}

const fn row(from: S, to: S, roles: &'static [Role]) -> Transition {
    Transition { from, to, roles }
}

pub const TRANSITIONS: &[Transition] = &[
    row(S::PendingSrc, S::SrcApproved, &[Role::Src]),
    row(S::PendingSrc, S::SrcRejected, &[Role::Src]),
    row(S::PendingSrc, S::Withdrawn, &[Role::Student]),
    row(S::SrcApproved, S::AdminApproved, &[Role::Admin]),
    row(S::SrcApproved, S::AdminRejected, &[Role::Admin]),
    row(S::SrcApproved, S::Withdrawn, &[Role::Student]),
    row(S::AdminApproved, S::DeliveryAssigned, &[Role::Admin]),
    row(S::DeliveryAssigned, S::Delivered, &[Role::Delivery]),
    row(
        S::Delivered,
        S::Completed,
        &[Role::Student, Role::Admin, Role::System],
    ),
];

fn find(from: ApplicationStatus, to: ApplicationStatus) -> Option<&'static Transition> {
    TRANSITIONS.iter().find(|t| t.from == from && t.to == to)
}

/// Return `true` if `role` may move an application from `from` to `to`.
pub fn role_can_transition(role: Role, from: ApplicationStatus, to: ApplicationStatus) -> bool {
    find(from, to).is_some_and(|t| t.roles.contains(&role))
}

/// Validate a requested status change and return the new status.
///
/// Checks, in order: the current status is not terminal, the pair is in the
/// table, and `role` is listed on that row.
pub fn transition(
    role: Role,
    from: ApplicationStatus,
    to: ApplicationStatus,
) -> Result<ApplicationStatus, WorkflowError> {
    if from.is_terminal() {
        return Err(WorkflowError::Terminal(from));
    }
    let row = find(from, to).ok_or(WorkflowError::InvalidTransition { from, to })?;
    if !row.roles.contains(&role) {
        return Err(WorkflowError::NotAuthorized { role, from, to });
    }
    Ok(to)
}

/// Statuses `role` may move an application to from `from`.
pub fn next_statuses(role: Role, from: ApplicationStatus) -> Vec<ApplicationStatus> {
    TRANSITIONS
        .iter()
        .filter(|t| t.from == from && t.roles.contains(&role))
        .map(|t| t.to)
        .collect()
}
