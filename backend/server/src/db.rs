//! Database layer: migrations and queries.
//!
//! Every function takes any SQLite executor so that callers can run it
//! against the pool or inside a transaction (`&mut *tx`).

use std::str::FromStr;

use lapfin_workflow::{ApplicationStatus, PaymentStatus, PaymentType, PriceBreakdown, Role};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Executor, Sqlite, SqlitePool, Transaction};
use tracing::info;

use crate::errors::Result;
use crate::models::{
    now, Actor, ApplicationRecord, DeliveryRecord, IdentityDocument, Laptop, LaptopPatch,
    NewAuditEntry, NewLaptop, NewUser, PaymentRecord, University, UserRecord,
};

/// Establish a SQLite connection pool and run pending migrations.
pub async fn init_pool(database_url: &str) -> Result<SqlitePool> {
    init_pool_with(database_url, 5).await
}

pub async fn init_pool_with(database_url: &str, max_connections: u32) -> Result<SqlitePool> {
    let url = if database_url.starts_with("sqlite:") {
        database_url.to_string()
    } else {
        format!("sqlite:{database_url}")
    };

    // Make sure the file is created if it doesn't exist yet.
    let options = SqliteConnectOptions::from_str(&url)?
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Database migrations applied successfully");
    Ok(pool)
}

/// Begin a transaction that takes the write lock up front.
///
/// A deferred transaction that reads and then writes fails with `SQLITE_BUSY`
/// when another writer committed in between. Taking the lock at `BEGIN`
/// makes writers queue on the busy timeout instead, and the second one then
/// reads the first one's result.
pub async fn begin_write(pool: &SqlitePool) -> Result<Transaction<'static, Sqlite>> {
    Ok(pool.begin_with("BEGIN IMMEDIATE").await?)
}

// ─────────────────────────────────────────────────────────
// Universities
// ─────────────────────────────────────────────────────────

const UNIVERSITY_COLUMNS: &str = "id, name, active, created_at";

pub async fn list_universities<'e>(
    ex: impl Executor<'e, Database = Sqlite>,
) -> Result<Vec<University>> {
    let sql = format!("SELECT {UNIVERSITY_COLUMNS} FROM universities ORDER BY name ASC");
    Ok(sqlx::query_as::<_, University>(&sql).fetch_all(ex).await?)
}

pub async fn get_university<'e>(
    ex: impl Executor<'e, Database = Sqlite>,
    id: i64,
) -> Result<Option<University>> {
    let sql = format!("SELECT {UNIVERSITY_COLUMNS} FROM universities WHERE id = ?1");
    Ok(sqlx::query_as::<_, University>(&sql)
        .bind(id)
        .fetch_optional(ex)
        .await?)
}

pub async fn insert_university<'e>(
    ex: impl Executor<'e, Database = Sqlite>,
    name: &str,
    active: bool,
) -> Result<i64> {
    let id = sqlx::query("INSERT INTO universities (name, active, created_at) VALUES (?1, ?2, ?3)")
        .bind(name)
        .bind(active)
        .bind(now())
        .execute(ex)
        .await?
        .last_insert_rowid();
    Ok(id)
}

pub async fn university_name_taken<'e>(
    ex: impl Executor<'e, Database = Sqlite>,
    name: &str,
) -> Result<bool> {
    let row: Option<(i64,)> =
        sqlx::query_as("SELECT id FROM universities WHERE name = ?1 COLLATE NOCASE")
            .bind(name)
            .fetch_optional(ex)
            .await?;
    Ok(row.is_some())
}

/// Returns `false` when no university has this id.
pub async fn set_university_active<'e>(
    ex: impl Executor<'e, Database = Sqlite>,
    id: i64,
    active: bool,
) -> Result<bool> {
    let rows = sqlx::query("UPDATE universities SET active = ?1 WHERE id = ?2")
        .bind(active)
        .bind(id)
        .execute(ex)
        .await?
        .rows_affected();
    Ok(rows == 1)
}

// ─────────────────────────────────────────────────────────
// Users
// ─────────────────────────────────────────────────────────

const USER_COLUMNS: &str =
    "id, full_name, email, phone, role, university_id, student_number, created_at";

pub async fn get_user<'e>(
    ex: impl Executor<'e, Database = Sqlite>,
    id: i64,
) -> Result<Option<UserRecord>> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1");
    Ok(sqlx::query_as::<_, UserRecord>(&sql)
        .bind(id)
        .fetch_optional(ex)
        .await?)
}

pub async fn insert_user<'e>(
    ex: impl Executor<'e, Database = Sqlite>,
    user: &NewUser,
) -> Result<i64> {
    let id = sqlx::query(
        r#"
        INSERT INTO users (full_name, email, phone, role, university_id, student_number, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        "#,
    )
    .bind(&user.full_name)
    .bind(&user.email)
    .bind(&user.phone)
    .bind(user.role.as_str())
    .bind(user.university_id)
    .bind(&user.student_number)
    .bind(now())
    .execute(ex)
    .await?
    .last_insert_rowid();
    Ok(id)
}

pub async fn email_taken<'e>(
    ex: impl Executor<'e, Database = Sqlite>,
    email: &str,
) -> Result<bool> {
    let row: Option<(i64,)> =
        sqlx::query_as("SELECT id FROM users WHERE email = ?1 COLLATE NOCASE")
            .bind(email)
            .fetch_optional(ex)
            .await?;
    Ok(row.is_some())
}

pub async fn count_users_with_role<'e>(
    ex: impl Executor<'e, Database = Sqlite>,
    role: Role,
) -> Result<i64> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users WHERE role = ?1")
        .bind(role.as_str())
        .fetch_one(ex)
        .await?;
    Ok(count)
}

// ─────────────────────────────────────────────────────────
// Laptops
// ─────────────────────────────────────────────────────────

const LAPTOP_COLUMNS: &str =
    "id, brand, model, specs, price, stock, active, created_at, updated_at";

pub async fn list_laptops<'e>(
    ex: impl Executor<'e, Database = Sqlite>,
    include_inactive: bool,
) -> Result<Vec<Laptop>> {
    let sql = format!(
        "SELECT {LAPTOP_COLUMNS} FROM laptops WHERE active = 1 OR ?1 \
         ORDER BY brand ASC, model ASC, id ASC"
    );
    Ok(sqlx::query_as::<_, Laptop>(&sql)
        .bind(include_inactive)
        .fetch_all(ex)
        .await?)
}

pub async fn get_laptop<'e>(
    ex: impl Executor<'e, Database = Sqlite>,
    id: i64,
) -> Result<Option<Laptop>> {
    let sql = format!("SELECT {LAPTOP_COLUMNS} FROM laptops WHERE id = ?1");
    Ok(sqlx::query_as::<_, Laptop>(&sql)
        .bind(id)
        .fetch_optional(ex)
        .await?)
}

pub async fn insert_laptop<'e>(
    ex: impl Executor<'e, Database = Sqlite>,
    laptop: &NewLaptop,
) -> Result<i64> {
    let ts = now();
    let id = sqlx::query(
        r#"
        INSERT INTO laptops (brand, model, specs, price, stock, active, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
        "#,
    )
    .bind(&laptop.brand)
    .bind(&laptop.model)
    .bind(&laptop.specs)
    .bind(laptop.price)
    .bind(laptop.stock)
    .bind(laptop.active)
    .bind(ts)
    .execute(ex)
    .await?
    .last_insert_rowid();
    Ok(id)
}

/// Apply the fields present in `patch`. Returns `false` when the laptop does not exist.
pub async fn update_laptop<'e>(
    ex: impl Executor<'e, Database = Sqlite>,
    id: i64,
    patch: &LaptopPatch,
) -> Result<bool> {
    let rows = sqlx::query(
        r#"
        UPDATE laptops
        SET    specs      = COALESCE(?1, specs),
               price      = COALESCE(?2, price),
               stock      = COALESCE(?3, stock),
               active     = COALESCE(?4, active),
               updated_at = ?5
        WHERE  id = ?6
        "#,
    )
    .bind(&patch.specs)
    .bind(patch.price)
    .bind(patch.stock)
    .bind(patch.active)
    .bind(now())
    .bind(id)
    .execute(ex)
    .await?
    .rows_affected();
    Ok(rows == 1)
}

/// Take one unit out of stock. Returns `false` when none is left.
pub async fn reserve_stock<'e>(
    ex: impl Executor<'e, Database = Sqlite>,
    laptop_id: i64,
) -> Result<bool> {
    let rows = sqlx::query(
        "UPDATE laptops SET stock = stock - 1, updated_at = ?1 WHERE id = ?2 AND stock > 0",
    )
    .bind(now())
    .bind(laptop_id)
    .execute(ex)
    .await?
    .rows_affected();
    Ok(rows == 1)
}

// ─────────────────────────────────────────────────────────
// Applications
// ─────────────────────────────────────────────────────────

const APPLICATION_COLUMNS: &str = r#"
    id, reference, status, student_id, student_name, student_email, student_phone,
    student_number, university_id, laptop_id, laptop_label, documents, total_price,
    initial_amount, final_amount, review_note, created_at, updated_at
"#;

/// SQL list of the statuses no transition leaves.
fn terminal_status_list() -> String {
    ApplicationStatus::ALL
        .iter()
        .filter(|s| s.is_terminal())
        .map(|s| format!("'{}'", s.as_str()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Insert a new `PENDING_SRC` application and return `(id, reference)`.
///
/// The reference (`LAP-<year>-<seq>`) is computed inside the insert so that
/// concurrent submissions cannot collide.
pub async fn insert_application<'e>(
    ex: impl Executor<'e, Database = Sqlite>,
    student: &Actor,
    university_id: i64,
    laptop: &Laptop,
    documents: &[IdentityDocument],
    pricing: &PriceBreakdown,
) -> Result<(i64, String)> {
    let ts = now();
    let row: (i64, String) = sqlx::query_as(
        r#"
        INSERT INTO applications
            (reference, status, student_id, student_name, student_email, student_phone,
             student_number, university_id, laptop_id, laptop_label, documents,
             total_price, initial_amount, final_amount, created_at, updated_at)
        VALUES (
            'LAP-' || strftime('%Y', ?14, 'unixepoch') || '-' ||
                printf('%06d', (SELECT COALESCE(MAX(id), 0) + 1 FROM applications)),
            ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?14)
        RETURNING id, reference
        "#,
    )
    .bind(ApplicationStatus::PendingSrc.as_str())
    .bind(student.id)
    .bind(&student.full_name)
    .bind(&student.email)
    .bind(&student.phone)
    .bind(&student.student_number)
    .bind(university_id)
    .bind(laptop.id)
    .bind(laptop.label())
    .bind(serde_json::to_string(documents)?)
    .bind(pricing.total_price)
    .bind(pricing.initial_amount)
    .bind(pricing.final_amount)
    .bind(ts)
    .fetch_one(ex)
    .await?;
    Ok(row)
}

pub async fn get_application<'e>(
    ex: impl Executor<'e, Database = Sqlite>,
    id: i64,
) -> Result<Option<ApplicationRecord>> {
    let sql = format!("SELECT {APPLICATION_COLUMNS} FROM applications WHERE id = ?1");
    Ok(sqlx::query_as::<_, ApplicationRecord>(&sql)
        .bind(id)
        .fetch_optional(ex)
        .await?)
}

/// Number of applications by this student that have not reached a terminal status.
pub async fn count_open_applications<'e>(
    ex: impl Executor<'e, Database = Sqlite>,
    student_id: i64,
) -> Result<i64> {
    let sql = format!(
        "SELECT COUNT(*) FROM applications WHERE student_id = ?1 AND status NOT IN ({})",
        terminal_status_list()
    );
    let (count,): (i64,) = sqlx::query_as(&sql).bind(student_id).fetch_one(ex).await?;
    Ok(count)
}

/// Visibility scope for listing applications.
#[derive(Debug, Clone, Copy)]
pub enum ApplicationScope {
    All,
    Student(i64),
    University(i64),
    DeliveryUser(i64),
}

pub async fn list_applications<'e>(
    ex: impl Executor<'e, Database = Sqlite>,
    scope: ApplicationScope,
    status: Option<ApplicationStatus>,
) -> Result<Vec<ApplicationRecord>> {
    let (clause, key) = match scope {
        ApplicationScope::All => ("1 = 1", 0),
        ApplicationScope::Student(id) => ("a.student_id = ?1", id),
        ApplicationScope::University(id) => ("a.university_id = ?1", id),
        ApplicationScope::DeliveryUser(id) => (
            "a.id IN (SELECT application_id FROM deliveries WHERE delivery_user_id = ?1)",
            id,
        ),
    };
    let columns = APPLICATION_COLUMNS
        .split(',')
        .map(|c| format!("a.{}", c.trim()))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        r#"
        SELECT {columns}
        FROM   applications a
        WHERE  {clause} AND (?2 IS NULL OR a.status = ?2)
        ORDER  BY a.created_at DESC, a.id DESC
        "#
    );
    Ok(sqlx::query_as::<_, ApplicationRecord>(&sql)
        .bind(key)
        .bind(status.map(|s| s.as_str()))
        .fetch_all(ex)
        .await?)
}

/// Conditionally move an application from `from` to `to`.
///
/// Returns `false` when the stored status was no longer `from`.
pub async fn update_application_status<'e>(
    ex: impl Executor<'e, Database = Sqlite>,
    id: i64,
    from: ApplicationStatus,
    to: ApplicationStatus,
    review_note: Option<&str>,
) -> Result<bool> {
    let rows = sqlx::query(
        r#"
        UPDATE applications
        SET    status = ?1, review_note = COALESCE(?2, review_note), updated_at = ?3
        WHERE  id = ?4 AND status = ?5
        "#,
    )
    .bind(to.as_str())
    .bind(review_note)
    .bind(now())
    .bind(id)
    .bind(from.as_str())
    .execute(ex)
    .await?
    .rows_affected();
    Ok(rows == 1)
}

// ─────────────────────────────────────────────────────────
// Payments
// ─────────────────────────────────────────────────────────

const PAYMENT_COLUMNS: &str = "id, application_id, payment_type, status, amount, collected_by, \
                               reference, created_at, updated_at, settled_at";

pub async fn insert_payment<'e>(
    ex: impl Executor<'e, Database = Sqlite>,
    application_id: i64,
    kind: PaymentType,
    amount: i64,
) -> Result<()> {
    let ts = now();
    sqlx::query(
        r#"
        INSERT INTO payments (application_id, payment_type, status, amount, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?5)
        "#,
    )
    .bind(application_id)
    .bind(kind.as_str())
    .bind(PaymentStatus::Pending.as_str())
    .bind(amount)
    .bind(ts)
    .execute(ex)
    .await?;
    Ok(())
}

pub async fn get_payments<'e>(
    ex: impl Executor<'e, Database = Sqlite>,
    application_id: i64,
) -> Result<Vec<PaymentRecord>> {
    let sql = format!(
        "SELECT {PAYMENT_COLUMNS} FROM payments WHERE application_id = ?1 ORDER BY id ASC"
    );
    Ok(sqlx::query_as::<_, PaymentRecord>(&sql)
        .bind(application_id)
        .fetch_all(ex)
        .await?)
}

pub async fn get_payment<'e>(
    ex: impl Executor<'e, Database = Sqlite>,
    application_id: i64,
    kind: PaymentType,
) -> Result<Option<PaymentRecord>> {
    let sql = format!(
        "SELECT {PAYMENT_COLUMNS} FROM payments WHERE application_id = ?1 AND payment_type = ?2"
    );
    Ok(sqlx::query_as::<_, PaymentRecord>(&sql)
        .bind(application_id)
        .bind(kind.as_str())
        .fetch_optional(ex)
        .await?)
}

/// Online payments waiting on the gateway: `FINAL_30`, `PENDING`, with a
/// reference. Least recently checked first, never-checked rows leading.
pub async fn pending_final_payments<'e>(
    ex: impl Executor<'e, Database = Sqlite>,
    limit: i64,
) -> Result<Vec<PaymentRecord>> {
    let sql = format!(
        r#"
        SELECT {PAYMENT_COLUMNS}
        FROM   payments
        WHERE  payment_type = ?1 AND status = ?2 AND reference IS NOT NULL
        ORDER  BY COALESCE(last_checked_at, 0) ASC, id ASC
        LIMIT  ?3
        "#
    );
    Ok(sqlx::query_as::<_, PaymentRecord>(&sql)
        .bind(PaymentType::Final30.as_str())
        .bind(PaymentStatus::Pending.as_str())
        .bind(limit)
        .fetch_all(ex)
        .await?)
}

/// Record that the reconciler asked the gateway about this payment.
pub async fn mark_payment_checked<'e>(
    ex: impl Executor<'e, Database = Sqlite>,
    payment_id: i64,
) -> Result<()> {
    sqlx::query("UPDATE payments SET last_checked_at = ?1 WHERE id = ?2")
        .bind(now())
        .bind(payment_id)
        .execute(ex)
        .await?;
    Ok(())
}

/// Conditionally move a payment from `from` to `to`, recording who collected
/// it when given. Settled statuses stamp `settled_at`. Returns `false` when
/// the stored status was no longer `from`.
pub async fn update_payment_status<'e>(
    ex: impl Executor<'e, Database = Sqlite>,
    payment_id: i64,
    from: PaymentStatus,
    to: PaymentStatus,
    collected_by: Option<i64>,
) -> Result<bool> {
    let ts = now();
    let rows = sqlx::query(
        r#"
        UPDATE payments
        SET    status       = ?1,
               collected_by = COALESCE(?2, collected_by),
               settled_at   = ?3,
               updated_at   = ?4
        WHERE  id = ?5 AND status = ?6
        "#,
    )
    .bind(to.as_str())
    .bind(collected_by)
    .bind(to.is_settled().then_some(ts))
    .bind(ts)
    .bind(payment_id)
    .bind(from.as_str())
    .execute(ex)
    .await?
    .rows_affected();
    Ok(rows == 1)
}

/// Point an unsettled payment at a new gateway reference.
///
/// Matches only while both the status and the reference are still the ones
/// the caller read, so a concurrent checkout is never silently replaced.
/// Returns `false` otherwise.
pub async fn replace_payment_reference<'e>(
    ex: impl Executor<'e, Database = Sqlite>,
    payment_id: i64,
    from: PaymentStatus,
    to: PaymentStatus,
    previous: Option<&str>,
    reference: &str,
) -> Result<bool> {
    let rows = sqlx::query(
        r#"
        UPDATE payments
        SET    status = ?1, reference = ?2, settled_at = NULL, last_checked_at = NULL,
               updated_at = ?3
        WHERE  id = ?4 AND status = ?5 AND reference IS ?6
        "#,
    )
    .bind(to.as_str())
    .bind(reference)
    .bind(now())
    .bind(payment_id)
    .bind(from.as_str())
    .bind(previous)
    .execute(ex)
    .await?
    .rows_affected();
    Ok(rows == 1)
}

// ─────────────────────────────────────────────────────────
// Deliveries
// ─────────────────────────────────────────────────────────

pub async fn insert_delivery<'e>(
    ex: impl Executor<'e, Database = Sqlite>,
    delivery: &DeliveryRecord,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO deliveries
            (application_id, delivery_user_id, assigned_by, address, scheduled_for, assigned_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        "#,
    )
    .bind(delivery.application_id)
    .bind(delivery.delivery_user_id)
    .bind(delivery.assigned_by)
    .bind(&delivery.address)
    .bind(delivery.scheduled_for)
    .bind(delivery.assigned_at)
    .execute(ex)
    .await?;
    Ok(())
}

pub async fn get_delivery<'e>(
    ex: impl Executor<'e, Database = Sqlite>,
    application_id: i64,
) -> Result<Option<DeliveryRecord>> {
    Ok(sqlx::query_as::<_, DeliveryRecord>(
        r#"
        SELECT application_id, delivery_user_id, assigned_by, address, scheduled_for,
               assigned_at, delivered_at, notes
        FROM   deliveries
        WHERE  application_id = ?1
        "#,
    )
    .bind(application_id)
    .fetch_optional(ex)
    .await?)
}

pub async fn mark_delivered<'e>(
    ex: impl Executor<'e, Database = Sqlite>,
    application_id: i64,
    notes: Option<&str>,
) -> Result<bool> {
    let rows = sqlx::query(
        r#"
        UPDATE deliveries SET delivered_at = ?1, notes = ?2
        WHERE  application_id = ?3 AND delivered_at IS NULL
        "#,
    )
    .bind(now())
    .bind(notes)
    .bind(application_id)
    .execute(ex)
    .await?
    .rows_affected();
    Ok(rows == 1)
}

// ─────────────────────────────────────────────────────────
// Audit log writes
// ─────────────────────────────────────────────────────────

/// Append one audit row. Triggers reject any later update or delete.
pub async fn insert_audit<'e>(
    ex: impl Executor<'e, Database = Sqlite>,
    entry: &NewAuditEntry<'_>,
) -> Result<i64> {
    let id = sqlx::query(
        r#"
        INSERT INTO audit_log (action, actor_id, actor_role, application_id, details, timestamp)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        "#,
    )
    .bind(entry.action.as_str())
    .bind(&entry.actor.id)
    .bind(entry.actor.role.as_str())
    .bind(entry.application_id)
    .bind(entry.details.to_string())
    .bind(now())
    .execute(ex)
    .await?
    .last_insert_rowid();
    Ok(id)
}
