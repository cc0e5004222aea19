use crate::{
    analytics::MAX_LOOKBACK_HOURS,
    auth::Owner,
    error::ShortlyError,
    models::{AllocationRequest, ClickBucket, ShortLink},
    AppState,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Used when `hours` is absent or not a positive integer. Values above
/// [`MAX_LOOKBACK_HOURS`] are passed through and rejected with 400.
const DEFAULT_LOOKBACK_HOURS: u32 = 24;

// ── Response types ─────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct CreatedLink {
    pub short_code: String,
    pub original_url: String,
    pub short_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct LinkStats {
    pub short_code: String,
    pub original_url: String,
    pub click_count: i64,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl From<ShortLink> for LinkStats {
    fn from(link: ShortLink) -> Self {
        Self {
            short_code: link.code,
            original_url: link.target,
            click_count: link.click_count,
            created_at: link.created_at,
            expires_at: link.expires_at,
        }
    }
}

// ── Request types ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct UpdateExpiry {
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct AnalyticsQuery {
    pub hours: Option<String>,
}

impl AnalyticsQuery {
    /// Falls back to 24 when absent or not a positive integer.
    fn lookback_hours(&self) -> u32 {
        self.hours
            .as_deref()
            .and_then(|h| h.trim().parse::<u32>().ok())
            .filter(|h| *h > 0)
            .unwrap_or(DEFAULT_LOOKBACK_HOURS)
    }
}

// ── Handlers ───────────────────────────────────────────────────────────────

/// POST /api/v1/shorten
pub async fn shorten(
    Owner(owner): Owner,
    State(state): State<Arc<AppState>>,
    Json(mut request): Json<AllocationRequest>,
) -> Result<(StatusCode, Json<CreatedLink>), ShortlyError> {
    request.owner_id = Some(owner);
    let link = state.service.allocate_short_code(request).await?;

    Ok((
        StatusCode::CREATED,
        Json(CreatedLink {
            short_url: state.config.short_url(&link.code),
            short_code: link.code,
            original_url: link.target,
            expires_at: link.expires_at,
            created_at: link.created_at,
        }),
    ))
}

/// GET /api/v1/urls
pub async fn list_links(
    Owner(owner): Owner,
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<LinkStats>>, ShortlyError> {
    let links = state.service.list_links(&owner).await?;
    Ok(Json(links.into_iter().map(LinkStats::from).collect()))
}

/// GET /api/v1/url/:code
pub async fn stats(
    Owner(owner): Owner,
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
) -> Result<Json<LinkStats>, ShortlyError> {
    let link = state.service.get_stats(&code, &owner).await?;
    Ok(Json(link.into()))
}

/// PATCH /api/v1/url/:code
pub async fn update_expiry(
    Owner(owner): Owner,
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
    Json(body): Json<UpdateExpiry>,
) -> Result<Json<LinkStats>, ShortlyError> {
    state
        .service
        .update_expiry(&code, &owner, body.expires_at)
        .await?;
    let link = state.service.get_stats(&code, &owner).await?;
    Ok(Json(link.into()))
}

/// DELETE /api/v1/url/:code
pub async fn delete_link(
    Owner(owner): Owner,
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
) -> Result<StatusCode, ShortlyError> {
    state.service.delete_link(&code, &owner).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/url/:code/analytics?hours=N
pub async fn analytics(
    Owner(owner): Owner,
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
    Query(query): Query<AnalyticsQuery>,
) -> Result<Json<Vec<ClickBucket>>, ShortlyError> {
    let buckets = state
        .service
        .get_analytics(&code, &owner, query.lookback_hours())
        .await?;
    Ok(Json(buckets))
}
