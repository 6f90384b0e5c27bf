//! Resolves the calling user from the `X-User-Id` header.
//!
//! Token issuance lives in front of this service; by the time a request
//! arrives here the header carries a verified user id.

use std::sync::Arc;

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use tracing::debug;

use crate::api::AppState;
use crate::db;
use crate::errors::ServerError;
use crate::models::Actor;

pub const USER_ID_HEADER: &str = "x-user-id";

#[async_trait]
impl FromRequestParts<Arc<AppState>> for Actor {
    type Rejection = ServerError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let id: i64 = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok())
            .ok_or(ServerError::Unauthenticated)?;

        let user = db::get_user(&state.pool, id).await?.ok_or_else(|| {
            debug!("Unknown user id {id} in {USER_ID_HEADER}");
            ServerError::Unauthenticated
        })?;
        Actor::try_from(user)
    }
}
