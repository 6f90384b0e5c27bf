//! Application workflow operations.
//!
//! Each operation loads the current state, asks `lapfin_workflow` whether the
//! requested change is allowed for the acting role, and writes the change
//! together with its audit row in one transaction. Status and payment
//! updates are conditional on the status that was read, so a concurrent
//! writer turns into [`ServerError::Stale`] instead of a double transition.
//!
//! Gateway calls are made outside any transaction.

use lapfin_workflow::{
    advance_payment, can_initiate_final, next_statuses, transition, ApplicationStatus,
    AuditAction, Decision, PaymentStatus, PaymentType, PriceBreakdown, Role,
};
use serde_json::json;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{info, warn};

use crate::db::{self, ApplicationScope};
use crate::errors::{Result, ServerError};
use crate::gateway::{CheckoutRequest, GatewayOutcome, PaymentGateway};
use crate::models::{
    now, Actor, ActorRef, ApplicationRecord, ApplicationSummary, ApplicationView,
    AssignDeliveryRequest, AuditEntry, ConfirmDeliveryRequest, DeliveryRecord,
    FinalPaymentCheckout, Laptop, LaptopPatch, NewApplication, NewAuditEntry, NewLaptop,
    NewUniversity, NewUser, PaymentRecord, PaymentView, ReviewRequest, StudentSnapshot,
    University, UserRecord,
};
use crate::audit::{self, AuditFilter};

// ─────────────────────────────────────────────────────────
// Shared helpers
// ─────────────────────────────────────────────────────────

fn require_role(actor: &Actor, roles: &[Role], what: &str) -> Result<()> {
    if roles.contains(&actor.role) {
        Ok(())
    } else {
        Err(ServerError::Forbidden(format!(
            "role {} may not {what}",
            actor.role
        )))
    }
}

fn required_text(value: &str, field: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ServerError::Validation(format!("{field} is required")));
    }
    Ok(trimmed.to_string())
}

async fn load_application(conn: &mut SqliteConnection, id: i64) -> Result<ApplicationRecord> {
    db::get_application(&mut *conn, id)
        .await?
        .ok_or_else(|| ServerError::NotFound(format!("application {id}")))
}

async fn load_payment(
    conn: &mut SqliteConnection,
    application_id: i64,
    kind: PaymentType,
) -> Result<PaymentRecord> {
    db::get_payment(&mut *conn, application_id, kind)
        .await?
        .ok_or_else(|| {
            ServerError::Corrupt(format!("application {application_id} has no {kind} payment"))
        })
}

/// Whether `actor` may see `app` at all.
async fn ensure_visible(
    conn: &mut SqliteConnection,
    actor: &Actor,
    app: &ApplicationRecord,
) -> Result<()> {
    let visible = match actor.role {
        Role::Admin | Role::System => true,
        Role::Student => app.student_id == actor.id,
        Role::Src => actor.university_id == Some(app.university_id),
        Role::Delivery => db::get_delivery(&mut *conn, app.id)
            .await?
            .is_some_and(|d| d.delivery_user_id == actor.id),
    };
    if visible {
        Ok(())
    } else {
        Err(ServerError::Forbidden(format!(
            "application {} is not visible to this user",
            app.reference
        )))
    }
}

/// Validate and persist one status change plus its audit row.
async fn apply_transition(
    conn: &mut SqliteConnection,
    app: &ApplicationRecord,
    actor: &ActorRef,
    to: ApplicationStatus,
    review_note: Option<&str>,
    details: serde_json::Value,
) -> Result<()> {
    let from = app.status()?;
    let to = transition(actor.role, from, to)?;

    if !db::update_application_status(&mut *conn, app.id, from, to, review_note).await? {
        return Err(ServerError::Stale(format!("application {}", app.reference)));
    }
    if let Some(action) = AuditAction::for_transition(to) {
        db::insert_audit(
            &mut *conn,
            &NewAuditEntry {
                action,
                actor,
                application_id: Some(app.id),
                details,
            },
        )
        .await?;
    }
    info!(
        "Application {} {} -> {} by {} {}",
        app.reference, from, to, actor.role, actor.id
    );
    Ok(())
}

/// Validate and persist one payment status change.
async fn apply_payment_change(
    conn: &mut SqliteConnection,
    payment: &PaymentRecord,
    to: PaymentStatus,
    collected_by: Option<i64>,
) -> Result<()> {
    let kind = payment.kind()?;
    let from = payment.status()?;
    let to = advance_payment(kind, from, to)?;
    if !db::update_payment_status(&mut *conn, payment.id, from, to, collected_by).await? {
        return Err(ServerError::Stale(format!(
            "{kind} payment of application {}",
            payment.application_id
        )));
    }
    Ok(())
}

async fn build_view(
    conn: &mut SqliteConnection,
    actor: &Actor,
    app: ApplicationRecord,
) -> Result<ApplicationView> {
    let status = app.status()?;
    let payments = db::get_payments(&mut *conn, app.id)
        .await?
        .into_iter()
        .map(PaymentView::try_from)
        .collect::<Result<Vec<_>>>()?;
    let delivery = db::get_delivery(&mut *conn, app.id).await?;

    Ok(ApplicationView {
        id: app.id,
        status,
        student: StudentSnapshot {
            id: app.student_id,
            full_name: app.student_name.clone(),
            email: app.student_email.clone(),
            phone: app.student_phone.clone(),
            student_number: app.student_number.clone(),
            university_id: app.university_id,
        },
        laptop_id: app.laptop_id,
        laptop_label: app.laptop_label.clone(),
        documents: app.documents()?,
        pricing: app.pricing(),
        review_note: app.review_note.clone(),
        payments,
        delivery,
        next_statuses: next_statuses(actor.role, status),
        created_at: app.created_at,
        updated_at: app.updated_at,
        reference: app.reference,
    })
}

// ─────────────────────────────────────────────────────────
// Application queries
// ─────────────────────────────────────────────────────────

pub async fn get_application(pool: &SqlitePool, actor: &Actor, id: i64) -> Result<ApplicationView> {
    let mut conn = pool.acquire().await?;
    let app = load_application(&mut conn, id).await?;
    ensure_visible(&mut conn, actor, &app).await?;
    build_view(&mut conn, actor, app).await
}

pub async fn list_applications(
    pool: &SqlitePool,
    actor: &Actor,
    status: Option<ApplicationStatus>,
) -> Result<Vec<ApplicationSummary>> {
    let scope = match actor.role {
        Role::Admin | Role::System => ApplicationScope::All,
        Role::Student => ApplicationScope::Student(actor.id),
        Role::Delivery => ApplicationScope::DeliveryUser(actor.id),
        Role::Src => ApplicationScope::University(actor.university_id.ok_or_else(|| {
            ServerError::Forbidden("SRC officer is not attached to a university".to_string())
        })?),
    };
    db::list_applications(pool, scope, status)
        .await?
        .into_iter()
        .map(ApplicationSummary::try_from)
        .collect()
}

/// Audit trail of one application, newest first.
pub async fn application_audit(
    pool: &SqlitePool,
    actor: &Actor,
    id: i64,
) -> Result<Vec<AuditEntry>> {
    {
        let mut conn = pool.acquire().await?;
        let app = load_application(&mut conn, id).await?;
        ensure_visible(&mut conn, actor, &app).await?;
    }
    audit::query(pool, &AuditFilter::for_application(id)).await
}

pub async fn audit_log(
    pool: &SqlitePool,
    actor: &Actor,
    filter: &AuditFilter,
) -> Result<Vec<AuditEntry>> {
    require_role(actor, &[Role::Admin], "read the audit log")?;
    audit::query(pool, filter).await
}

// ─────────────────────────────────────────────────────────
// Application lifecycle
// ─────────────────────────────────────────────────────────

pub async fn create_application(
    pool: &SqlitePool,
    actor: &Actor,
    request: &NewApplication,
) -> Result<ApplicationView> {
    require_role(actor, &[Role::Student], "apply for a laptop")?;
    if request.documents.is_empty() {
        return Err(ServerError::Validation(
            "at least one identity document is required".to_string(),
        ));
    }
    for doc in &request.documents {
        required_text(&doc.kind, "document kind")?;
        required_text(&doc.url, "document url")?;
    }
    let university_id = actor.university_id.ok_or_else(|| {
        ServerError::Validation("student is not attached to a university".to_string())
    })?;

    let mut tx = db::begin_write(pool).await?;

    let university = db::get_university(&mut *tx, university_id)
        .await?
        .ok_or_else(|| ServerError::NotFound(format!("university {university_id}")))?;
    if !university.active {
        return Err(ServerError::Conflict(format!(
            "{} is not currently accepting applications",
            university.name
        )));
    }

    let laptop = db::get_laptop(&mut *tx, request.laptop_id)
        .await?
        .ok_or_else(|| ServerError::NotFound(format!("laptop {}", request.laptop_id)))?;
    if !laptop.active {
        return Err(ServerError::NotFound(format!("laptop {}", laptop.id)));
    }
    if laptop.stock <= 0 {
        return Err(ServerError::Conflict(format!("{} is out of stock", laptop.label())));
    }

    if db::count_open_applications(&mut *tx, actor.id).await? > 0 {
        return Err(ServerError::Conflict(
            "student already has an application in progress".to_string(),
        ));
    }

    let pricing = PriceBreakdown::from_total(laptop.price)?;
    let (id, reference) = db::insert_application(
        &mut *tx,
        actor,
        university_id,
        &laptop,
        &request.documents,
        &pricing,
    )
    .await?;
    for kind in PaymentType::ALL {
        db::insert_payment(&mut *tx, id, kind, pricing.amount_for(kind)).await?;
    }
    db::insert_audit(
        &mut *tx,
        &NewAuditEntry {
            action: AuditAction::ApplicationCreated,
            actor: &ActorRef::from(actor),
            application_id: Some(id),
            details: json!({
                "reference": reference,
                "laptop_id": laptop.id,
                "total_price": pricing.total_price,
                "initial_amount": pricing.initial_amount,
                "final_amount": pricing.final_amount,
            }),
        },
    )
    .await?;

    let app = load_application(&mut tx, id).await?;
    let view = build_view(&mut tx, actor, app).await?;
    tx.commit().await?;

    info!("Application {reference} created by student {}", actor.id);
    Ok(view)
}

pub async fn withdraw(pool: &SqlitePool, actor: &Actor, id: i64) -> Result<ApplicationView> {
    let mut tx = db::begin_write(pool).await?;
    let app = load_application(&mut tx, id).await?;
    ensure_visible(&mut tx, actor, &app).await?;

    apply_transition(
        &mut tx,
        &app,
        &ActorRef::from(actor),
        ApplicationStatus::Withdrawn,
        None,
        json!({}),
    )
    .await?;

    let app = load_application(&mut tx, id).await?;
    let view = build_view(&mut tx, actor, app).await?;
    tx.commit().await?;
    Ok(view)
}

fn review_reason(request: &ReviewRequest) -> Result<Option<String>> {
    let reason = request
        .reason
        .as_deref()
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(str::to_string);
    if request.decision == Decision::Reject && reason.is_none() {
        return Err(ServerError::Validation(
            "a reason is required to reject an application".to_string(),
        ));
    }
    Ok(reason)
}

/// First-tier review by an SRC officer of the student's university.
pub async fn src_review(
    pool: &SqlitePool,
    actor: &Actor,
    id: i64,
    request: &ReviewRequest,
) -> Result<ApplicationView> {
    let reason = review_reason(request)?;
    let to = match request.decision {
        Decision::Approve => ApplicationStatus::SrcApproved,
        Decision::Reject => ApplicationStatus::SrcRejected,
    };

    let mut tx = db::begin_write(pool).await?;
    let app = load_application(&mut tx, id).await?;
    ensure_visible(&mut tx, actor, &app).await?;

    apply_transition(
        &mut tx,
        &app,
        &ActorRef::from(actor),
        to,
        reason.as_deref(),
        json!({ "decision": request.decision, "reason": reason }),
    )
    .await?;

    let app = load_application(&mut tx, id).await?;
    let view = build_view(&mut tx, actor, app).await?;
    tx.commit().await?;
    Ok(view)
}

/// Second-tier review by a platform admin. Approval reserves one unit of stock.
pub async fn admin_review(
    pool: &SqlitePool,
    actor: &Actor,
    id: i64,
    request: &ReviewRequest,
) -> Result<ApplicationView> {
    let reason = review_reason(request)?;
    let to = match request.decision {
        Decision::Approve => ApplicationStatus::AdminApproved,
        Decision::Reject => ApplicationStatus::AdminRejected,
    };

    let mut tx = db::begin_write(pool).await?;
    let app = load_application(&mut tx, id).await?;
    ensure_visible(&mut tx, actor, &app).await?;

    apply_transition(
        &mut tx,
        &app,
        &ActorRef::from(actor),
        to,
        reason.as_deref(),
        json!({ "decision": request.decision, "reason": reason }),
    )
    .await?;

    if to == ApplicationStatus::AdminApproved
        && !db::reserve_stock(&mut *tx, app.laptop_id).await?
    {
        return Err(ServerError::Conflict(format!(
            "{} is out of stock",
            app.laptop_label
        )));
    }

    let app = load_application(&mut tx, id).await?;
    let view = build_view(&mut tx, actor, app).await?;
    tx.commit().await?;
    Ok(view)
}

pub async fn assign_delivery(
    pool: &SqlitePool,
    actor: &Actor,
    id: i64,
    request: &AssignDeliveryRequest,
) -> Result<ApplicationView> {
    let address = required_text(&request.address, "address")?;

    let mut tx = db::begin_write(pool).await?;
    let app = load_application(&mut tx, id).await?;
    ensure_visible(&mut tx, actor, &app).await?;

    let courier = db::get_user(&mut *tx, request.delivery_user_id)
        .await?
        .ok_or_else(|| ServerError::NotFound(format!("user {}", request.delivery_user_id)))?;
    let courier = Actor::try_from(courier)?;
    if courier.role != Role::Delivery {
        return Err(ServerError::Validation(format!(
            "user {} is not delivery staff",
            courier.id
        )));
    }

    apply_transition(
        &mut tx,
        &app,
        &ActorRef::from(actor),
        ApplicationStatus::DeliveryAssigned,
        None,
        json!({
            "delivery_user_id": courier.id,
            "address": address,
            "scheduled_for": request.scheduled_for,
        }),
    )
    .await?;
    db::insert_delivery(
        &mut *tx,
        &DeliveryRecord {
            application_id: app.id,
            delivery_user_id: courier.id,
            assigned_by: actor.id,
            address,
            scheduled_for: request.scheduled_for,
            assigned_at: now(),
            delivered_at: None,
            notes: None,
        },
    )
    .await?;

    let app = load_application(&mut tx, id).await?;
    let view = build_view(&mut tx, actor, app).await?;
    tx.commit().await?;
    Ok(view)
}

/// Hand-over: the assigned delivery user collects exactly the 70% and the
/// application becomes `DELIVERED`.
pub async fn confirm_delivery(
    pool: &SqlitePool,
    actor: &Actor,
    id: i64,
    request: &ConfirmDeliveryRequest,
) -> Result<ApplicationView> {
    let mut tx = db::begin_write(pool).await?;
    let app = load_application(&mut tx, id).await?;
    ensure_visible(&mut tx, actor, &app).await?;
    transition(actor.role, app.status()?, ApplicationStatus::Delivered)?;

    if request.amount_collected != app.initial_amount {
        return Err(ServerError::Validation(format!(
            "amount collected must be exactly {}, got {}",
            app.initial_amount, request.amount_collected
        )));
    }

    let actor_ref = ActorRef::from(actor);
    apply_transition(
        &mut tx,
        &app,
        &actor_ref,
        ApplicationStatus::Delivered,
        None,
        json!({ "notes": request.notes }),
    )
    .await?;

    if !db::mark_delivered(&mut *tx, app.id, request.notes.as_deref()).await? {
        return Err(ServerError::Stale(format!("delivery of {}", app.reference)));
    }

    let initial = load_payment(&mut tx, app.id, PaymentType::Initial70).await?;
    apply_payment_change(
        &mut tx,
        &initial,
        PaymentStatus::Collected,
        Some(actor.id),
    )
    .await?;
    db::insert_audit(
        &mut *tx,
        &NewAuditEntry {
            action: AuditAction::InitialPaymentCollected,
            actor: &actor_ref,
            application_id: Some(app.id),
            details: json!({ "amount": initial.amount }),
        },
    )
    .await?;

    let app = load_application(&mut tx, id).await?;
    let view = build_view(&mut tx, actor, app).await?;
    tx.commit().await?;
    Ok(view)
}

// ─────────────────────────────────────────────────────────
// Online 30% payment
// ─────────────────────────────────────────────────────────

/// Start (or restart after a failure) the online 30% payment.
pub async fn initiate_final_payment(
    pool: &SqlitePool,
    gateway: &dyn PaymentGateway,
    callback_url: Option<&str>,
    actor: &Actor,
    id: i64,
) -> Result<FinalPaymentCheckout> {
    require_role(actor, &[Role::Student], "pay the final installment")?;

    let (app, final_payment) = {
        let mut conn = pool.acquire().await?;
        let app = load_application(&mut conn, id).await?;
        ensure_visible(&mut conn, actor, &app).await?;

        let initial = load_payment(&mut conn, app.id, PaymentType::Initial70).await?;
        if !can_initiate_final(app.status()?, initial.status()?) {
            return Err(ServerError::Conflict(
                "the final payment opens once the laptop is delivered and the initial 70% collected"
                    .to_string(),
            ));
        }
        let final_payment = load_payment(&mut conn, app.id, PaymentType::Final30).await?;
        if final_payment.status()?.is_settled() {
            return Err(ServerError::Conflict(format!(
                "final payment of {} is already settled",
                app.reference
            )));
        }
        (app, final_payment)
    };

    // A previous checkout may already have been paid; settle it before
    // replacing its reference.
    let previous = match final_payment.status()? {
        PaymentStatus::Pending => final_payment.reference.clone(),
        _ => None,
    };
    let final_payment = match previous {
        Some(previous) => {
            let outcome = gateway.verify(&previous).await?;
            if outcome == GatewayOutcome::Pending {
                final_payment
            } else {
                let status = settle_final_payment(
                    pool,
                    &ActorRef::from(actor),
                    &app,
                    &final_payment,
                    outcome,
                )
                .await?;
                if status.is_settled() {
                    return Err(ServerError::Conflict(format!(
                        "final payment of {} is already settled",
                        app.reference
                    )));
                }
                db::get_payment(pool, app.id, PaymentType::Final30)
                    .await?
                    .ok_or_else(|| {
                        ServerError::Corrupt(format!("application {id} has no FINAL_30 payment"))
                    })?
            }
        }
        None => final_payment,
    };

    let reference = format!(
        "{}-F30-{}",
        app.reference,
        chrono::Utc::now().timestamp_millis()
    );
    let checkout = gateway
        .initialize(&CheckoutRequest {
            email: app.student_email.clone(),
            amount: final_payment.amount,
            reference,
            callback_url: callback_url.map(str::to_string),
        })
        .await?;

    let mut tx = db::begin_write(pool).await?;
    let current = final_payment.status()?;
    let next = match current {
        PaymentStatus::Failed => {
            advance_payment(PaymentType::Final30, current, PaymentStatus::Pending)?
        }
        other => other,
    };
    // Another checkout may have replaced the reference while the gateway
    // call was in flight; that one stays authoritative.
    if !db::replace_payment_reference(
        &mut *tx,
        final_payment.id,
        current,
        next,
        final_payment.reference.as_deref(),
        &checkout.reference,
    )
    .await?
    {
        return Err(ServerError::Stale(format!(
            "final payment of {}",
            app.reference
        )));
    }
    db::insert_audit(
        &mut *tx,
        &NewAuditEntry {
            action: AuditAction::FinalPaymentInitiated,
            actor: &ActorRef::from(actor),
            application_id: Some(app.id),
            details: json!({ "reference": checkout.reference, "amount": final_payment.amount }),
        },
    )
    .await?;
    tx.commit().await?;

    info!(
        "Final payment {} started for application {}",
        checkout.reference, app.reference
    );
    Ok(FinalPaymentCheckout {
        reference: checkout.reference,
        authorization_url: checkout.authorization_url,
        amount: final_payment.amount,
    })
}

/// Final verdict on an online payment once the gateway has answered.
enum Settlement {
    Verified { amount: i64 },
    Failed { reason: String },
}

/// Record a gateway outcome for a pending online payment. A verified payment
/// of at least the owed amount completes the application; anything less is
/// recorded as a failure.
///
/// Returns the payment status after the outcome was applied.
pub async fn settle_final_payment(
    pool: &SqlitePool,
    actor: &ActorRef,
    app: &ApplicationRecord,
    payment: &PaymentRecord,
    outcome: GatewayOutcome,
) -> Result<PaymentStatus> {
    let settlement = match outcome {
        GatewayOutcome::Pending => return payment.status(),
        GatewayOutcome::Success { amount } if amount < payment.amount => {
            warn!(
                "Final payment for {} underpaid: {amount} < {}",
                app.reference, payment.amount
            );
            Settlement::Failed {
                reason: format!("paid {amount}, expected {}", payment.amount),
            }
        }
        GatewayOutcome::Success { amount } => Settlement::Verified { amount },
        GatewayOutcome::Failed { reason } => Settlement::Failed { reason },
    };

    let mut tx = db::begin_write(pool).await?;
    let status = match settlement {
        Settlement::Verified { amount } => {
            apply_payment_change(&mut tx, payment, PaymentStatus::Verified, None).await?;
            db::insert_audit(
                &mut *tx,
                &NewAuditEntry {
                    action: AuditAction::FinalPaymentVerified,
                    actor,
                    application_id: Some(app.id),
                    details: json!({ "reference": payment.reference, "amount": amount }),
                },
            )
            .await?;
            apply_transition(
                &mut tx,
                app,
                actor,
                ApplicationStatus::Completed,
                None,
                json!({ "reference": payment.reference }),
            )
            .await?;
            PaymentStatus::Verified
        }
        Settlement::Failed { reason } => {
            apply_payment_change(&mut tx, payment, PaymentStatus::Failed, None).await?;
            db::insert_audit(
                &mut *tx,
                &NewAuditEntry {
                    action: AuditAction::FinalPaymentFailed,
                    actor,
                    application_id: Some(app.id),
                    details: json!({ "reference": payment.reference, "reason": reason }),
                },
            )
            .await?;
            PaymentStatus::Failed
        }
    };
    tx.commit().await?;
    info!("Final payment of {} is now {status}", app.reference);
    Ok(status)
}

/// Ask the gateway about the student's pending online payment and apply the answer.
pub async fn verify_final_payment(
    pool: &SqlitePool,
    gateway: &dyn PaymentGateway,
    actor: &Actor,
    id: i64,
) -> Result<ApplicationView> {
    require_role(actor, &[Role::Student, Role::Admin], "verify payments")?;

    let (app, payment, reference) = {
        let mut conn = pool.acquire().await?;
        let app = load_application(&mut conn, id).await?;
        ensure_visible(&mut conn, actor, &app).await?;
        let payment = load_payment(&mut conn, app.id, PaymentType::Final30).await?;
        let reference = match (&payment.reference, payment.status()?) {
            (Some(reference), PaymentStatus::Pending) => reference.clone(),
            _ => {
                return Err(ServerError::Conflict(format!(
                    "application {} has no online payment awaiting verification",
                    app.reference
                )))
            }
        };
        (app, payment, reference)
    };

    let outcome = gateway.verify(&reference).await?;
    settle_final_payment(pool, &ActorRef::from(actor), &app, &payment, outcome).await?;
    get_application(pool, actor, id).await
}

// ─────────────────────────────────────────────────────────
// Catalog & accounts
// ─────────────────────────────────────────────────────────

/// Students see active laptops only while their university is active;
/// admins also see inactive ones.
pub async fn list_laptops(pool: &SqlitePool, actor: &Actor) -> Result<Vec<Laptop>> {
    if actor.role == Role::Student && !student_university_active(pool, actor).await? {
        return Ok(Vec::new());
    }
    db::list_laptops(pool, actor.role == Role::Admin).await
}

pub async fn get_laptop(pool: &SqlitePool, actor: &Actor, id: i64) -> Result<Laptop> {
    let hidden = actor.role == Role::Student && !student_university_active(pool, actor).await?;
    match db::get_laptop(pool, id).await? {
        Some(laptop) if !hidden && (laptop.active || actor.role == Role::Admin) => Ok(laptop),
        _ => Err(ServerError::NotFound(format!("laptop {id}"))),
    }
}

async fn student_university_active(pool: &SqlitePool, actor: &Actor) -> Result<bool> {
    let Some(university_id) = actor.university_id else {
        return Ok(false);
    };
    Ok(db::get_university(pool, university_id)
        .await?
        .is_some_and(|u| u.active))
}

fn validate_price_and_stock(price: Option<i64>, stock: Option<i64>) -> Result<()> {
    if price.is_some_and(|p| p <= 0) {
        return Err(ServerError::Validation("price must be positive".to_string()));
    }
    if stock.is_some_and(|s| s < 0) {
        return Err(ServerError::Validation("stock cannot be negative".to_string()));
    }
    Ok(())
}

pub async fn create_laptop(
    pool: &SqlitePool,
    actor: &Actor,
    request: &NewLaptop,
) -> Result<Laptop> {
    require_role(actor, &[Role::Admin], "manage the catalog")?;
    let laptop = NewLaptop {
        brand: required_text(&request.brand, "brand")?,
        model: required_text(&request.model, "model")?,
        specs: request.specs.trim().to_string(),
        ..request.clone()
    };
    validate_price_and_stock(Some(laptop.price), Some(laptop.stock))?;

    let mut tx = db::begin_write(pool).await?;
    let id = db::insert_laptop(&mut *tx, &laptop).await?;
    db::insert_audit(
        &mut *tx,
        &NewAuditEntry {
            action: AuditAction::LaptopCreated,
            actor: &ActorRef::from(actor),
            application_id: None,
            details: json!({
                "laptop_id": id,
                "brand": laptop.brand,
                "model": laptop.model,
                "price": laptop.price,
                "stock": laptop.stock,
            }),
        },
    )
    .await?;
    let created = db::get_laptop(&mut *tx, id)
        .await?
        .ok_or_else(|| ServerError::NotFound(format!("laptop {id}")))?;
    tx.commit().await?;
    Ok(created)
}

pub async fn update_laptop(
    pool: &SqlitePool,
    actor: &Actor,
    id: i64,
    patch: &LaptopPatch,
) -> Result<Laptop> {
    require_role(actor, &[Role::Admin], "manage the catalog")?;
    validate_price_and_stock(patch.price, patch.stock)?;

    let mut tx = db::begin_write(pool).await?;
    if !db::update_laptop(&mut *tx, id, patch).await? {
        return Err(ServerError::NotFound(format!("laptop {id}")));
    }
    db::insert_audit(
        &mut *tx,
        &NewAuditEntry {
            action: AuditAction::LaptopUpdated,
            actor: &ActorRef::from(actor),
            application_id: None,
            details: json!({ "laptop_id": id, "changes": patch }),
        },
    )
    .await?;
    let updated = db::get_laptop(&mut *tx, id)
        .await?
        .ok_or_else(|| ServerError::NotFound(format!("laptop {id}")))?;
    tx.commit().await?;
    Ok(updated)
}

pub async fn list_universities(pool: &SqlitePool) -> Result<Vec<University>> {
    db::list_universities(pool).await
}

pub async fn create_university(
    pool: &SqlitePool,
    actor: &Actor,
    request: &NewUniversity,
) -> Result<University> {
    require_role(actor, &[Role::Admin], "manage universities")?;
    let name = required_text(&request.name, "name")?;

    let mut tx = db::begin_write(pool).await?;
    if db::university_name_taken(&mut *tx, &name).await? {
        return Err(ServerError::Conflict(format!("{name} is already registered")));
    }
    let id = db::insert_university(&mut *tx, &name, request.active).await?;
    db::insert_audit(
        &mut *tx,
        &NewAuditEntry {
            action: AuditAction::UniversityCreated,
            actor: &ActorRef::from(actor),
            application_id: None,
            details: json!({ "university_id": id, "name": name, "active": request.active }),
        },
    )
    .await?;
    let created = db::get_university(&mut *tx, id)
        .await?
        .ok_or_else(|| ServerError::NotFound(format!("university {id}")))?;
    tx.commit().await?;
    Ok(created)
}

pub async fn set_university_active(
    pool: &SqlitePool,
    actor: &Actor,
    id: i64,
    active: bool,
) -> Result<University> {
    require_role(actor, &[Role::Admin], "manage universities")?;

    let mut tx = db::begin_write(pool).await?;
    if !db::set_university_active(&mut *tx, id, active).await? {
        return Err(ServerError::NotFound(format!("university {id}")));
    }
    db::insert_audit(
        &mut *tx,
        &NewAuditEntry {
            action: AuditAction::UniversityStatusChanged,
            actor: &ActorRef::from(actor),
            application_id: None,
            details: json!({ "university_id": id, "active": active }),
        },
    )
    .await?;
    let university = db::get_university(&mut *tx, id)
        .await?
        .ok_or_else(|| ServerError::NotFound(format!("university {id}")))?;
    tx.commit().await?;
    info!("University {} active={active}", university.name);
    Ok(university)
}

async fn insert_user_audited(
    conn: &mut SqliteConnection,
    actor: &ActorRef,
    request: &NewUser,
) -> Result<UserRecord> {
    let id = db::insert_user(&mut *conn, request).await?;
    db::insert_audit(
        &mut *conn,
        &NewAuditEntry {
            action: AuditAction::UserCreated,
            actor,
            application_id: None,
            details: json!({ "user_id": id, "role": request.role, "email": request.email }),
        },
    )
    .await?;
    db::get_user(&mut *conn, id)
        .await?
        .ok_or_else(|| ServerError::NotFound(format!("user {id}")))
}

pub async fn create_user(
    pool: &SqlitePool,
    actor: &Actor,
    request: &NewUser,
) -> Result<UserRecord> {
    require_role(actor, &[Role::Admin], "create accounts")?;
    if !request.role.is_assignable() {
        return Err(ServerError::Validation(format!(
            "role {} cannot be assigned",
            request.role
        )));
    }
    let user = NewUser {
        full_name: required_text(&request.full_name, "full_name")?,
        email: required_text(&request.email, "email")?.to_lowercase(),
        ..request.clone()
    };
    if !user.email.contains('@') {
        return Err(ServerError::Validation(format!("invalid email: {}", user.email)));
    }

    let mut tx = db::begin_write(pool).await?;
    if matches!(user.role, Role::Student | Role::Src) {
        let university_id = user.university_id.ok_or_else(|| {
            ServerError::Validation(format!("{} accounts need a university_id", user.role))
        })?;
        if db::get_university(&mut *tx, university_id).await?.is_none() {
            return Err(ServerError::NotFound(format!("university {university_id}")));
        }
    }
    if db::email_taken(&mut *tx, &user.email).await? {
        return Err(ServerError::Conflict(format!(
            "{} is already registered",
            user.email
        )));
    }
    let created = insert_user_audited(&mut tx, &ActorRef::from(actor), &user).await?;
    tx.commit().await?;
    Ok(created)
}

/// Create the first admin account when none exists yet.
pub async fn bootstrap_admin(pool: &SqlitePool, email: &str) -> Result<Option<UserRecord>> {
    let mut tx = db::begin_write(pool).await?;
    if db::count_users_with_role(&mut *tx, Role::Admin).await? > 0 {
        return Ok(None);
    }
    let request = NewUser {
        full_name: "Administrator".to_string(),
        email: email.trim().to_lowercase(),
        phone: None,
        role: Role::Admin,
        university_id: None,
        student_number: None,
    };
    let created = insert_user_audited(&mut tx, &ActorRef::system(), &request).await?;
    tx.commit().await?;
    info!("Bootstrap admin {} created (id {})", created.email, created.id);
    Ok(Some(created))
}
