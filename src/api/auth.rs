//! Caller identity from upstream-gate headers.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use super::error::ApiError;
use crate::context::ActorContext;

pub const ACTOR_ID_HEADER: &str = "x-actor-id";
pub const ACTOR_PERMISSIONS_HEADER: &str = "x-actor-permissions";

impl<S: Send + Sync> FromRequestParts<S> for ActorContext {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let actor_id = parts
            .headers
            .get(ACTOR_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or(ApiError::Unauthorized("missing X-Actor-Id header"))?;
        let permissions = parts
            .headers
            .get(ACTOR_PERMISSIONS_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        Ok(ActorContext::from_header_values(actor_id, permissions))
    }
}
