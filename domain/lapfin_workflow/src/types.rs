//! # Types
//!
//! Shared enums used by every module of the workflow crate and by the
//! server when it stores or serializes them.
//!
//! All enums serialize as SCREAMING_SNAKE_CASE strings. [`as_str`] and
//! [`FromStr`] round-trip the same form so that database columns and JSON
//! payloads agree.
//!
//! ## Application lifecycle
//!
//! ```text
//! PENDING_SRC ──► SRC_APPROVED ──► ADMIN_APPROVED ──► DELIVERY_ASSIGNED
//!     │  └──► SRC_REJECTED  │  └──► ADMIN_REJECTED          │
//!     └──► WITHDRAWN ◄──────┘                               ▼
//!                               COMPLETED ◄── DELIVERED ◄───┘
//! ```
//!
//! [`as_str`]: ApplicationStatus::as_str

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::ParseEnumError;

/// Lifecycle status of a laptop financing application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApplicationStatus {
    /// Submitted by the student, waiting for the university SRC officer.
    PendingSrc,
    SrcApproved,
    SrcRejected,
    AdminApproved,
    AdminRejected,
    /// A delivery staff member has been assigned.
    DeliveryAssigned,
    /// Laptop handed over and the 70% collected.
    Delivered,
    /// Final 30% verified.
    Completed,
    /// Withdrawn by the student before admin approval.
    Withdrawn,
}

impl ApplicationStatus {
    pub const ALL: [Self; 9] = [
        Self::PendingSrc,
        Self::SrcApproved,
        Self::SrcRejected,
        Self::AdminApproved,
        Self::AdminRejected,
        Self::DeliveryAssigned,
        Self::Delivered,
        Self::Completed,
        Self::Withdrawn,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PendingSrc => "PENDING_SRC",
            Self::SrcApproved => "SRC_APPROVED",
            Self::SrcRejected => "SRC_REJECTED",
            Self::AdminApproved => "ADMIN_APPROVED",
            Self::AdminRejected => "ADMIN_REJECTED",
            Self::DeliveryAssigned => "DELIVERY_ASSIGNED",
            Self::Delivered => "DELIVERED",
            Self::Completed => "COMPLETED",
            Self::Withdrawn => "WITHDRAWN",
        }
    }

    /// No transition leaves a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Withdrawn | Self::SrcRejected | Self::AdminRejected
        )
    }

    /// Position along the forward lifecycle. Every permitted transition
    /// strictly increases the rank.
    pub fn rank(&self) -> u8 {
        match self {
            Self::PendingSrc => 0,
            Self::SrcApproved | Self::SrcRejected => 1,
            Self::AdminApproved | Self::AdminRejected => 2,
            Self::DeliveryAssigned => 3,
            Self::Delivered => 4,
            Self::Completed => 5,
            Self::Withdrawn => 6,
        }
    }
}

/// Actor roles. `System` is reserved for background jobs and is never
/// assigned to a user account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Student,
    Src,
    Admin,
    Delivery,
    System,
}

impl Role {
    pub const ALL: [Self; 5] = [
        Self::Student,
        Self::Src,
        Self::Admin,
        Self::Delivery,
        Self::System,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Student => "STUDENT",
            Self::Src => "SRC",
            Self::Admin => "ADMIN",
            Self::Delivery => "DELIVERY",
            Self::System => "SYSTEM",
        }
    }

    /// Whether a user account may hold this role.
    pub fn is_assignable(&self) -> bool {
        !matches!(self, Self::System)
    }
}

/// The two phases of the payment split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentType {
    /// 70% collected in person on delivery.
    #[serde(rename = "INITIAL_70")]
    Initial70,
    /// 30% paid online after delivery.
    #[serde(rename = "FINAL_30")]
    Final30,
}

impl PaymentType {
    pub const ALL: [Self; 2] = [Self::Initial70, Self::Final30];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initial70 => "INITIAL_70",
            Self::Final30 => "FINAL_30",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    /// Cash/mobile money received by delivery staff (INITIAL_70 only).
    Collected,
    /// Confirmed by the payment gateway (FINAL_30 only).
    Verified,
    /// Rejected by the payment gateway (FINAL_30 only).
    Failed,
}

impl PaymentStatus {
    pub const ALL: [Self; 4] = [Self::Pending, Self::Collected, Self::Verified, Self::Failed];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Collected => "COLLECTED",
            Self::Verified => "VERIFIED",
            Self::Failed => "FAILED",
        }
    }

    /// Money has been received and the record is final.
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Collected | Self::Verified)
    }
}

/// Outcome chosen by an SRC officer or admin when reviewing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Approve,
    Reject,
}

macro_rules! impl_str_conversions {
    ($($ty:ident => $name:literal),* $(,)?) => {
        $(
            impl fmt::Display for $ty {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    f.write_str(self.as_str())
                }
            }

            impl FromStr for $ty {
                type Err = ParseEnumError;

                fn from_str(s: &str) -> Result<Self, Self::Err> {
                    Self::ALL
                        .iter()
                        .copied()
                        .find(|v| v.as_str() == s)
                        .ok_or_else(|| ParseEnumError {
                            kind: $name,
                            value: s.to_string(),
                        })
                }
            }
        )*
    };
}

impl_str_conversions! {
    ApplicationStatus => "application status",
    Role => "role",
    PaymentType => "payment type",
    PaymentStatus => "payment status",
}
