use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Failure talking to the persistent store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The insert collided with the UNIQUE constraint on `short_code`.
    #[error("short code already exists")]
    UniqueViolation,

    #[error("database error: {0}")]
    Database(sqlx::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::UniqueViolation,
            _ => StoreError::Database(err),
        }
    }
}

/// Outcomes returned to callers of the core operations.
#[derive(Debug, thiserror::Error)]
pub enum ShortlyError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    #[error("short URL not found or expired")]
    NotFound,

    #[error("failed to generate unique short code after {attempts} attempts")]
    AllocationExhausted { attempts: usize },

    #[error("persistent store unavailable: {0}")]
    UpstreamUnavailable(#[from] StoreError),
}

pub type Result<T, E = ShortlyError> = std::result::Result<T, E>;

impl ShortlyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ShortlyError::Validation(_) => StatusCode::BAD_REQUEST,
            ShortlyError::Conflict(_) => StatusCode::CONFLICT,
            ShortlyError::NotFound => StatusCode::NOT_FOUND,
            ShortlyError::AllocationExhausted { .. } | ShortlyError::UpstreamUnavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
        }
    }
}

impl IntoResponse for ShortlyError {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self {
            ShortlyError::UpstreamUnavailable(e) => {
                tracing::error!("Store unavailable: {:?}", e);
            }
            ShortlyError::AllocationExhausted { attempts } => {
                tracing::error!("Short code space exhausted after {} attempts", attempts);
            }
            _ => {}
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
