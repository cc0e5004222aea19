use async_trait::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Header carrying the caller's user id, set by the authenticating gateway
/// in front of this service once it has verified the credentials.
pub const USER_ID_HEADER: &str = "x-user-id";

// ── Owner extractor ────────────────────────────────────────────────────────

/// Extractor that enforces an authenticated caller on any handler that
/// includes it as a parameter. If the request carries a non-blank
/// `X-User-Id` header the extractor succeeds; otherwise it short-circuits
/// with a 401 so the handler never runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Owner(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for Owner
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|id| !id.is_empty());

        match user_id {
            Some(id) => Ok(Owner(id.to_owned())),
            None => Err((
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": "Authentication required" })),
            )
                .into_response()),
        }
    }
}
