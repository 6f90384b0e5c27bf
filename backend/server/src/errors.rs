//! Application-wide error types.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use lapfin_workflow::{PaymentError, PricingError, WorkflowError};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Database error: {0}")]
    Database(#[source] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Workflow(#[from] WorkflowError),

    #[error("{0}")]
    Payment(#[from] PaymentError),

    #[error("{0}")]
    Pricing(#[from] PricingError),

    #[error("Payment gateway error: {0}")]
    Gateway(String),

    #[error("{0}")]
    Validation(String),

    #[error("Missing or unknown actor")]
    Unauthenticated,

    #[error("{0}")]
    Forbidden(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    /// A conditional update matched no row: someone else changed the record first.
    #[error("{0} was modified concurrently; reload and retry")]
    Stale(String),

    /// Stored data that no longer parses into a domain value.
    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

pub type Result<T> = std::result::Result<T, ServerError>;

/// Primary SQLite result codes for a write lock held by another connection.
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

impl From<sqlx::Error> for ServerError {
    fn from(e: sqlx::Error) -> Self {
        if let Some(db) = e.as_database_error() {
            if db.is_unique_violation() {
                return ServerError::Conflict(format!("duplicate record: {}", db.message()));
            }
            let primary = db
                .code()
                .and_then(|c| c.parse::<i32>().ok())
                .map(|c| c & 0xff);
            if matches!(primary, Some(SQLITE_BUSY | SQLITE_LOCKED)) {
                return ServerError::Stale("record".to_string());
            }
        }
        ServerError::Database(e)
    }
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::Pricing(_) | Self::Json(_) => StatusCode::BAD_REQUEST,
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) | Self::Workflow(WorkflowError::NotAuthorized { .. }) => {
                StatusCode::FORBIDDEN
            }
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) | Self::Stale(_) | Self::Workflow(_) | Self::Payment(_) => {
                StatusCode::CONFLICT
            }
            Self::Gateway(_) => StatusCode::BAD_GATEWAY,
            Self::Database(_) | Self::Migrate(_) | Self::Config(_) | Self::Corrupt(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("request failed: {self}");
        }
        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}
