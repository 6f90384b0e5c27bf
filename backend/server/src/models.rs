//! Row types as stored in / read from the database, and the typed views
//! built from them for the API.

use std::str::FromStr;

use lapfin_workflow::{
    ApplicationStatus, AuditAction, PaymentStatus, PaymentType, PriceBreakdown, Role,
};
use serde::{Deserialize, Serialize};

use crate::errors::{Result, ServerError};

fn parse_column<T>(value: &str, column: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e: T::Err| ServerError::Corrupt(format!("{column}: {e}")))
}

/// Current Unix time in seconds, as stored in every timestamp column.
pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

// ─────────────────────────────────────────────────────────
// Catalog
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct University {
    pub id: i64,
    pub name: String,
    pub active: bool,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Laptop {
    pub id: i64,
    pub brand: String,
    pub model: String,
    pub specs: String,
    /// Minor units.
    pub price: i64,
    pub stock: i64,
    pub active: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Laptop {
    pub fn label(&self) -> String {
        format!("{} {}", self.brand, self.model)
    }
}

// ─────────────────────────────────────────────────────────
// Users
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserRecord {
    pub id: i64,
    pub full_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub role: String,
    pub university_id: Option<i64>,
    pub student_number: Option<String>,
    pub created_at: i64,
}

/// The authenticated caller of a request.
#[derive(Debug, Clone, Serialize)]
pub struct Actor {
    pub id: i64,
    pub role: Role,
    pub full_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub university_id: Option<i64>,
    pub student_number: Option<String>,
}

impl TryFrom<UserRecord> for Actor {
    type Error = ServerError;

    fn try_from(user: UserRecord) -> Result<Self> {
        Ok(Actor {
            id: user.id,
            role: parse_column(&user.role, "users.role")?,
            full_name: user.full_name,
            email: user.email,
            phone: user.phone,
            university_id: user.university_id,
            student_number: user.student_number,
        })
    }
}

/// Identity written to the audit log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorRef {
    pub id: String,
    pub role: Role,
}

impl ActorRef {
    pub fn system() -> Self {
        ActorRef {
            id: "system".to_string(),
            role: Role::System,
        }
    }
}

impl From<&Actor> for ActorRef {
    fn from(actor: &Actor) -> Self {
        ActorRef {
            id: actor.id.to_string(),
            role: actor.role,
        }
    }
}

// ─────────────────────────────────────────────────────────
// Applications
// ─────────────────────────────────────────────────────────

/// An identity-verification document attached to an application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityDocument {
    /// e.g. `STUDENT_ID`, `NATIONAL_ID`.
    pub kind: String,
    /// Where the uploaded file lives.
    pub url: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ApplicationRecord {
    pub id: i64,
    pub reference: String,
    pub status: String,
    pub student_id: i64,
    pub student_name: String,
    pub student_email: String,
    pub student_phone: Option<String>,
    pub student_number: Option<String>,
    pub university_id: i64,
    pub laptop_id: i64,
    pub laptop_label: String,
    pub documents: String,
    pub total_price: i64,
    pub initial_amount: i64,
    pub final_amount: i64,
    pub review_note: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl ApplicationRecord {
    pub fn status(&self) -> Result<ApplicationStatus> {
        parse_column(&self.status, "applications.status")
    }

    pub fn documents(&self) -> Result<Vec<IdentityDocument>> {
        Ok(serde_json::from_str(&self.documents)?)
    }

    pub fn pricing(&self) -> PriceBreakdown {
        PriceBreakdown {
            total_price: self.total_price,
            initial_amount: self.initial_amount,
            final_amount: self.final_amount,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StudentSnapshot {
    pub id: i64,
    pub full_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub student_number: Option<String>,
    pub university_id: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApplicationSummary {
    pub id: i64,
    pub reference: String,
    pub status: ApplicationStatus,
    pub student_name: String,
    pub university_id: i64,
    pub laptop_id: i64,
    pub laptop_label: String,
    pub total_price: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl TryFrom<ApplicationRecord> for ApplicationSummary {
    type Error = ServerError;

    fn try_from(r: ApplicationRecord) -> Result<Self> {
        Ok(ApplicationSummary {
            id: r.id,
            status: r.status()?,
            reference: r.reference,
            student_name: r.student_name,
            university_id: r.university_id,
            laptop_id: r.laptop_id,
            laptop_label: r.laptop_label,
            total_price: r.total_price,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

/// Full application as returned by `GET /applications/:id`.
#[derive(Debug, Clone, Serialize)]
pub struct ApplicationView {
    pub id: i64,
    pub reference: String,
    pub status: ApplicationStatus,
    pub student: StudentSnapshot,
    pub laptop_id: i64,
    pub laptop_label: String,
    pub documents: Vec<IdentityDocument>,
    pub pricing: PriceBreakdown,
    pub review_note: Option<String>,
    pub payments: Vec<PaymentView>,
    pub delivery: Option<DeliveryRecord>,
    /// Statuses the viewing actor may move this application to.
    pub next_statuses: Vec<ApplicationStatus>,
    pub created_at: i64,
    pub updated_at: i64,
}

// ─────────────────────────────────────────────────────────
// Payments & delivery
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PaymentRecord {
    pub id: i64,
    pub application_id: i64,
    pub payment_type: String,
    pub status: String,
    pub amount: i64,
    pub collected_by: Option<i64>,
    pub reference: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub settled_at: Option<i64>,
}

impl PaymentRecord {
    pub fn kind(&self) -> Result<PaymentType> {
        parse_column(&self.payment_type, "payments.payment_type")
    }

    pub fn status(&self) -> Result<PaymentStatus> {
        parse_column(&self.status, "payments.status")
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentView {
    pub payment_type: PaymentType,
    pub status: PaymentStatus,
    pub amount: i64,
    pub collected_by: Option<i64>,
    pub reference: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub settled_at: Option<i64>,
}

impl TryFrom<PaymentRecord> for PaymentView {
    type Error = ServerError;

    fn try_from(p: PaymentRecord) -> Result<Self> {
        Ok(PaymentView {
            payment_type: p.kind()?,
            status: p.status()?,
            amount: p.amount,
            collected_by: p.collected_by,
            reference: p.reference,
            created_at: p.created_at,
            updated_at: p.updated_at,
            settled_at: p.settled_at,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DeliveryRecord {
    pub application_id: i64,
    pub delivery_user_id: i64,
    pub assigned_by: i64,
    pub address: String,
    pub scheduled_for: Option<i64>,
    pub assigned_at: i64,
    pub delivered_at: Option<i64>,
    pub notes: Option<String>,
}

// ─────────────────────────────────────────────────────────
// Audit log
// ─────────────────────────────────────────────────────────

/// An audit row about to be appended.
#[derive(Debug, Clone)]
pub struct NewAuditEntry<'a> {
    pub action: AuditAction,
    pub actor: &'a ActorRef,
    pub application_id: Option<i64>,
    pub details: serde_json::Value,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AuditRecord {
    pub id: i64,
    pub action: String,
    pub actor_id: String,
    pub actor_role: String,
    pub application_id: Option<i64>,
    pub details: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub id: i64,
    pub action: AuditAction,
    pub actor_id: String,
    pub actor_role: Role,
    pub application_id: Option<i64>,
    pub details: serde_json::Value,
    pub timestamp: i64,
}

impl TryFrom<AuditRecord> for AuditEntry {
    type Error = ServerError;

    fn try_from(r: AuditRecord) -> Result<Self> {
        Ok(AuditEntry {
            id: r.id,
            action: parse_column(&r.action, "audit_log.action")?,
            actor_role: parse_column(&r.actor_role, "audit_log.actor_role")?,
            actor_id: r.actor_id,
            application_id: r.application_id,
            details: serde_json::from_str(&r.details)?,
            timestamp: r.timestamp,
        })
    }
}

// ─────────────────────────────────────────────────────────
// Request bodies
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct NewApplication {
    pub laptop_id: i64,
    pub documents: Vec<IdentityDocument>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReviewRequest {
    pub decision: lapfin_workflow::Decision,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssignDeliveryRequest {
    pub delivery_user_id: i64,
    pub address: String,
    pub scheduled_for: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConfirmDeliveryRequest {
    pub amount_collected: i64,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewLaptop {
    pub brand: String,
    pub model: String,
    #[serde(default)]
    pub specs: String,
    pub price: i64,
    #[serde(default)]
    pub stock: i64,
    #[serde(default = "default_true")]
    pub active: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LaptopPatch {
    pub specs: Option<String>,
    pub price: Option<i64>,
    pub stock: Option<i64>,
    pub active: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewUniversity {
    pub name: String,
    #[serde(default = "default_true")]
    pub active: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UniversityPatch {
    pub active: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
    pub full_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub role: Role,
    pub university_id: Option<i64>,
    pub student_number: Option<String>,
}

fn default_true() -> bool {
    true
}

/// Returned when a student starts the online 30% payment.
#[derive(Debug, Clone, Serialize)]
pub struct FinalPaymentCheckout {
    pub reference: String,
    pub authorization_url: String,
    pub amount: i64,
}
