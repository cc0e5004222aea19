use crate::{error::ShortlyError, AppState};
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::sync::Arc;

/// GET /:code
///
/// Resolve the code (cache first, then the store), count the click and
/// answer with a permanent redirect to the original URL.
pub async fn redirect(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
) -> Result<Response, ShortlyError> {
    let target = state.service.resolve_and_record_click(&code).await?;
    Ok((StatusCode::MOVED_PERMANENTLY, [(header::LOCATION, target)]).into_response())
}

#[derive(Serialize)]
pub struct ResolveResponse {
    pub original_url: String,
}

/// GET /api/v1/redirect/:code
///
/// Same as [`redirect`] but answers with JSON, for clients that follow
/// the link themselves.
pub async fn resolve(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
) -> Result<Json<ResolveResponse>, ShortlyError> {
    let original_url = state.service.resolve_and_record_click(&code).await?;
    Ok(Json(ResolveResponse { original_url }))
}
