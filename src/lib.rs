pub mod allocator;
pub mod analytics;
pub mod auth;
pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod models;
pub mod rate_limit;
pub mod resolver;
pub mod service;

pub use error::{Result, ShortlyError};

// ── Shared application state ───────────────────────────────────────────────

pub struct AppState {
    pub service: service::LinkService,
    /// Per-route-class token buckets. Owned here so they live and die with
    /// the server rather than the process.
    pub limiters: rate_limit::RateLimiters,
    pub config: config::AppConfig,
}
