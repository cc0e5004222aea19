use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A shortened link record from the `links` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct ShortLink {
    pub id: i64,
    pub code: String,
    pub target: String,
    pub owner_id: Option<String>,
    pub click_count: i64,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// A single click event from the `click_events` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ClickEvent {
    pub id: i64,
    pub link_id: i64,
    pub occurred_at: DateTime<Utc>,
}

/// One row of bucketed analytics output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ClickBucket {
    #[serde(rename = "time")]
    pub bucket_start: DateTime<Utc>,
    pub count: i64,
}

/// Input to the allocator. `custom_code` of `None` (or blank) means "generate one".
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AllocationRequest {
    #[serde(rename = "url")]
    pub target: String,
    #[serde(rename = "short_code", default)]
    pub custom_code: Option<String>,
    #[serde(skip)]
    pub owner_id: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Fields the store needs to insert a new row.
#[derive(Debug, Clone)]
pub struct NewLink<'a> {
    pub code: &'a str,
    pub target: &'a str,
    pub owner_id: Option<&'a str>,
    pub expires_at: Option<DateTime<Utc>>,
}
