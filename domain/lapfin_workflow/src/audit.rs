//! Vocabulary of actions written to the audit log.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::ParseEnumError;
use crate::types::ApplicationStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    ApplicationCreated,
    ApplicationWithdrawn,
    SrcApproved,
    SrcRejected,
    AdminApproved,
    AdminRejected,
    DeliveryAssigned,
    DeliveryConfirmed,
    InitialPaymentCollected,
    FinalPaymentInitiated,
    FinalPaymentVerified,
    FinalPaymentFailed,
    ApplicationCompleted,
    LaptopCreated,
    LaptopUpdated,
    UniversityCreated,
    UniversityStatusChanged,
    UserCreated,
}

impl AuditAction {
    pub const ALL: [Self; 18] = [
        Self::ApplicationCreated,
        Self::ApplicationWithdrawn,
        Self::SrcApproved,
        Self::SrcRejected,
        Self::AdminApproved,
        Self::AdminRejected,
        Self::DeliveryAssigned,
        Self::DeliveryConfirmed,
        Self::InitialPaymentCollected,
        Self::FinalPaymentInitiated,
        Self::FinalPaymentVerified,
        Self::FinalPaymentFailed,
        Self::ApplicationCompleted,
        Self::LaptopCreated,
        Self::LaptopUpdated,
        Self::UniversityCreated,
        Self::UniversityStatusChanged,
        Self::UserCreated,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ApplicationCreated => "APPLICATION_CREATED",
            Self::ApplicationWithdrawn => "APPLICATION_WITHDRAWN",
            Self::SrcApproved => "SRC_APPROVED",
            Self::SrcRejected => "SRC_REJECTED",
            Self::AdminApproved => "ADMIN_APPROVED",
            Self::AdminRejected => "ADMIN_REJECTED",
            Self::DeliveryAssigned => "DELIVERY_ASSIGNED",
            Self::DeliveryConfirmed => "DELIVERY_CONFIRMED",
            Self::InitialPaymentCollected => "INITIAL_PAYMENT_COLLECTED",
            Self::FinalPaymentInitiated => "FINAL_PAYMENT_INITIATED",
            Self::FinalPaymentVerified => "FINAL_PAYMENT_VERIFIED",
            Self::FinalPaymentFailed => "FINAL_PAYMENT_FAILED",
            Self::ApplicationCompleted => "APPLICATION_COMPLETED",
            Self::LaptopCreated => "LAPTOP_CREATED",
            Self::LaptopUpdated => "LAPTOP_UPDATED",
            Self::UniversityCreated => "UNIVERSITY_CREATED",
            Self::UniversityStatusChanged => "UNIVERSITY_STATUS_CHANGED",
            Self::UserCreated => "USER_CREATED",
        }
    }

    /// The action recorded when an application enters `to`.
    pub fn for_transition(to: ApplicationStatus) -> Option<Self> {
        match to {
            ApplicationStatus::PendingSrc => None,
            ApplicationStatus::SrcApproved => Some(Self::SrcApproved),
            ApplicationStatus::SrcRejected => Some(Self::SrcRejected),
            ApplicationStatus::AdminApproved => Some(Self::AdminApproved),
            ApplicationStatus::AdminRejected => Some(Self::AdminRejected),
            ApplicationStatus::DeliveryAssigned => Some(Self::DeliveryAssigned),
            ApplicationStatus::Delivered => Some(Self::DeliveryConfirmed),
            ApplicationStatus::Completed => Some(Self::ApplicationCompleted),
            ApplicationStatus::Withdrawn => Some(Self::ApplicationWithdrawn),
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditAction {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| ParseEnumError {
                kind: "audit action",
                value: s.to_string(),
            })
    }
}
