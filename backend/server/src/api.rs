//! Axum REST API: routes, handlers and response shapes.

use std::sync::Arc;

use axum::{
    async_trait,
    extract::{FromRequest, FromRequestParts, Path, Query, Request, State},
    http::{request::Parts, StatusCode},
    response::IntoResponse,
    routing::{get, patch, post},
    Json, Router,
};
use lapfin_workflow::ApplicationStatus;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sqlx::SqlitePool;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::audit::AuditFilter;
use crate::errors::{Result, ServerError};
use crate::gateway::PaymentGateway;
use crate::models::{
    Actor, ApplicationSummary, ApplicationView, AssignDeliveryRequest, AuditEntry,
    ConfirmDeliveryRequest, FinalPaymentCheckout, Laptop, LaptopPatch, NewApplication, NewLaptop,
    NewUniversity, NewUser, ReviewRequest, University, UniversityPatch, UserRecord,
};
use crate::service;

pub struct AppState {
    pub pool: SqlitePool,
    pub gateway: Arc<dyn PaymentGateway>,
    pub callback_url: Option<String>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/universities", get(list_universities).post(create_university))
        .route("/universities/:id", patch(update_university))
        .route("/users", post(create_user))
        .route("/laptops", get(list_laptops).post(create_laptop))
        .route("/laptops/:id", get(get_laptop).patch(update_laptop))
        .route("/applications", get(list_applications).post(create_application))
        .route("/applications/:id", get(get_application))
        .route("/applications/:id/withdraw", post(withdraw))
        .route("/applications/:id/src-review", post(src_review))
        .route("/applications/:id/admin-review", post(admin_review))
        .route("/applications/:id/assign-delivery", post(assign_delivery))
        .route("/applications/:id/confirm-delivery", post(confirm_delivery))
        .route(
            "/applications/:id/payments/final/initiate",
            post(initiate_final_payment),
        )
        .route(
            "/applications/:id/payments/final/verify",
            post(verify_final_payment),
        )
        .route("/applications/:id/audit", get(application_audit))
        .route("/audit-logs", get(audit_logs))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ─────────────────────────────────────────────────────────
// Request bodies
// ─────────────────────────────────────────────────────────

/// `Json` whose rejection is reported as a 400 in the API's error shape.
pub struct Body<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for Body<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = ServerError;

    async fn from_request(req: Request, state: &S) -> Result<Self> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Body(value)),
            Err(rejection) => Err(ServerError::Validation(rejection.body_text())),
        }
    }
}

/// `Path` whose rejection is reported as a 400 in the API's error shape.
pub struct ApiPath<T>(pub T);

#[async_trait]
impl<S, T> FromRequestParts<S> for ApiPath<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Send,
{
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self> {
        match Path::<T>::from_request_parts(parts, state).await {
            Ok(Path(value)) => Ok(ApiPath(value)),
            Err(rejection) => Err(ServerError::Validation(rejection.body_text())),
        }
    }
}

/// `Query` whose rejection is reported as a 400 in the API's error shape.
pub struct ApiQuery<T>(pub T);

#[async_trait]
impl<S, T> FromRequestParts<S> for ApiQuery<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self> {
        match Query::<T>::from_request_parts(parts, state).await {
            Ok(Query(value)) => Ok(ApiQuery(value)),
            Err(rejection) => Err(ServerError::Validation(rejection.body_text())),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ApplicationsQuery {
    pub status: Option<ApplicationStatus>,
}

// ─────────────────────────────────────────────────────────
// Response shapes
// ─────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Serialize)]
pub struct ApplicationsResponse {
    pub count: usize,
    pub applications: Vec<ApplicationSummary>,
}

#[derive(Serialize)]
pub struct LaptopsResponse {
    pub count: usize,
    pub laptops: Vec<Laptop>,
}

#[derive(Serialize)]
pub struct UniversitiesResponse {
    pub count: usize,
    pub universities: Vec<University>,
}

#[derive(Serialize)]
pub struct AuditLogResponse {
    pub count: usize,
    pub entries: Vec<AuditEntry>,
}

// ─────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────

/// `GET /health`
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// `GET /universities`
async fn list_universities(
    State(state): State<Arc<AppState>>,
    _actor: Actor,
) -> Result<Json<UniversitiesResponse>> {
    let universities = service::list_universities(&state.pool).await?;
    Ok(Json(UniversitiesResponse {
        count: universities.len(),
        universities,
    }))
}

/// `POST /universities`
async fn create_university(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Body(request): Body<NewUniversity>,
) -> Result<(StatusCode, Json<University>)> {
    let university = service::create_university(&state.pool, &actor, &request).await?;
    Ok((StatusCode::CREATED, Json(university)))
}

/// `PATCH /universities/:id`
async fn update_university(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    ApiPath(id): ApiPath<i64>,
    Body(patch): Body<UniversityPatch>,
) -> Result<Json<University>> {
    Ok(Json(
        service::set_university_active(&state.pool, &actor, id, patch.active).await?,
    ))
}

/// `POST /users`
async fn create_user(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Body(request): Body<NewUser>,
) -> Result<(StatusCode, Json<UserRecord>)> {
    let user = service::create_user(&state.pool, &actor, &request).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

/// `GET /laptops`
async fn list_laptops(
    State(state): State<Arc<AppState>>,
    actor: Actor,
) -> Result<Json<LaptopsResponse>> {
    let laptops = service::list_laptops(&state.pool, &actor).await?;
    Ok(Json(LaptopsResponse {
        count: laptops.len(),
        laptops,
    }))
}

/// `GET /laptops/:id`
async fn get_laptop(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<Laptop>> {
    Ok(Json(service::get_laptop(&state.pool, &actor, id).await?))
}

/// `POST /laptops`
async fn create_laptop(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Body(request): Body<NewLaptop>,
) -> Result<(StatusCode, Json<Laptop>)> {
    let laptop = service::create_laptop(&state.pool, &actor, &request).await?;
    Ok((StatusCode::CREATED, Json(laptop)))
}

/// `PATCH /laptops/:id`
async fn update_laptop(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    ApiPath(id): ApiPath<i64>,
    Body(patch): Body<LaptopPatch>,
) -> Result<Json<Laptop>> {
    Ok(Json(service::update_laptop(&state.pool, &actor, id, &patch).await?))
}

/// `GET /applications?status=`
///
/// Students see their own applications, SRC officers their university's,
/// delivery staff those assigned to them, admins everything.
async fn list_applications(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    ApiQuery(query): ApiQuery<ApplicationsQuery>,
) -> Result<Json<ApplicationsResponse>> {
    let applications = service::list_applications(&state.pool, &actor, query.status).await?;
    Ok(Json(ApplicationsResponse {
        count: applications.len(),
        applications,
    }))
}

/// `POST /applications`
async fn create_application(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Body(request): Body<NewApplication>,
) -> Result<(StatusCode, Json<ApplicationView>)> {
    let view = service::create_application(&state.pool, &actor, &request).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

/// `GET /applications/:id`
async fn get_application(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<ApplicationView>> {
    Ok(Json(service::get_application(&state.pool, &actor, id).await?))
}

/// `POST /applications/:id/withdraw`
async fn withdraw(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<ApplicationView>> {
    Ok(Json(service::withdraw(&state.pool, &actor, id).await?))
}

/// `POST /applications/:id/src-review`
async fn src_review(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    ApiPath(id): ApiPath<i64>,
    Body(request): Body<ReviewRequest>,
) -> Result<Json<ApplicationView>> {
    Ok(Json(service::src_review(&state.pool, &actor, id, &request).await?))
}

/// `POST /applications/:id/admin-review`
async fn admin_review(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    ApiPath(id): ApiPath<i64>,
    Body(request): Body<ReviewRequest>,
) -> Result<Json<ApplicationView>> {
    Ok(Json(service::admin_review(&state.pool, &actor, id, &request).await?))
}

/// `POST /applications/:id/assign-delivery`
async fn assign_delivery(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    ApiPath(id): ApiPath<i64>,
    Body(request): Body<AssignDeliveryRequest>,
) -> Result<Json<ApplicationView>> {
    Ok(Json(
        service::assign_delivery(&state.pool, &actor, id, &request).await?,
    ))
}

/// `POST /applications/:id/confirm-delivery`
async fn confirm_delivery(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    ApiPath(id): ApiPath<i64>,
    Body(request): Body<ConfirmDeliveryRequest>,
) -> Result<Json<ApplicationView>> {
    Ok(Json(
        service::confirm_delivery(&state.pool, &actor, id, &request).await?,
    ))
}

/// `POST /applications/:id/payments/final/initiate`
async fn initiate_final_payment(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<FinalPaymentCheckout>> {
    let checkout = service::initiate_final_payment(
        &state.pool,
        state.gateway.as_ref(),
        state.callback_url.as_deref(),
        &actor,
        id,
    )
    .await?;
    Ok(Json(checkout))
}

/// `POST /applications/:id/payments/final/verify`
async fn verify_final_payment(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<ApplicationView>> {
    let view =
        service::verify_final_payment(&state.pool, state.gateway.as_ref(), &actor, id).await?;
    Ok(Json(view))
}

/// `GET /applications/:id/audit`
async fn application_audit(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<AuditLogResponse>> {
    let entries = service::application_audit(&state.pool, &actor, id).await?;
    Ok(Json(AuditLogResponse {
        count: entries.len(),
        entries,
    }))
}

/// `GET /audit-logs?actor_id=&actor_role=&action=&application_id=&from=&to=&limit=&offset=`
async fn audit_logs(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    ApiQuery(filter): ApiQuery<AuditFilter>,
) -> Result<Json<AuditLogResponse>> {
    let entries = service::audit_log(&state.pool, &actor, &filter).await?;
    Ok(Json(AuditLogResponse {
        count: entries.len(),
        entries,
    }))
}
