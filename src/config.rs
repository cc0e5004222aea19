use crate::rate_limit::{LimiterConfig, RateLimitSettings};
use anyhow::{bail, Context, Result};
use std::str::FromStr;

/// Which key/value backend to put in front of the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheBackend {
    Memory,
    Redis(String),
    Disabled,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// SQLite connection string, e.g. "sqlite:./shortly.db"
    pub database_url: String,

    /// Host to bind the HTTP server to, e.g. "0.0.0.0"
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Public base URL used when building short links, e.g. "https://go.example.com".
    /// Never has a trailing slash.
    pub base_url: String,

    pub cache: CacheBackend,

    pub rate_limits: RateLimitSettings,
}

impl AppConfig {
    /// Load configuration from environment variables (populated by dotenvy before this is called).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let port = parse_or(&var, "PORT", 8080u16)
            .context("PORT must be a valid port number (1–65535)")?;

        let base_url = var("BASE_URL")
            .unwrap_or_else(|| format!("http://localhost:{port}"))
            .trim_end_matches('/')
            .to_owned();

        let redis_url = var("REDIS_URL").filter(|u| !u.trim().is_empty());
        let cache = match var("CACHE_BACKEND").as_deref().map(str::trim) {
            None | Some("") => match redis_url {
                Some(url) => CacheBackend::Redis(url),
                None => CacheBackend::Memory,
            },
            Some("memory") => CacheBackend::Memory,
            Some("none") => CacheBackend::Disabled,
            Some("redis") => CacheBackend::Redis(
                redis_url.context("CACHE_BACKEND=redis requires REDIS_URL to be set")?,
            ),
            Some(other) => bail!("CACHE_BACKEND must be one of memory, redis, none (got '{other}')"),
        };

        let defaults = RateLimitSettings::default();
        let rate_limits = RateLimitSettings {
            general: limiter(&var, "RATE_LIMIT", defaults.general)?,
            auth: limiter(&var, "RATE_LIMIT_AUTH", defaults.auth)?,
            shorten: limiter(&var, "RATE_LIMIT_SHORTEN", defaults.shorten)?,
            redirect: limiter(&var, "RATE_LIMIT_REDIRECT", defaults.redirect)?,
        };

        Ok(Self {
            database_url: var("DATABASE_URL").unwrap_or_else(|| "sqlite:./shortly.db".into()),
            host: var("HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port,
            base_url,
            cache,
            rate_limits,
        })
    }

    pub fn short_url(&self, code: &str) -> String {
        format!("{}/{}", self.base_url, code)
    }
}

fn parse_or<T>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} has an invalid value '{raw}'")),
        None => Ok(default),
    }
}

fn limiter(
    var: &impl Fn(&str) -> Option<String>,
    prefix: &str,
    default: LimiterConfig,
) -> Result<LimiterConfig> {
    let rate: f64 = parse_or(var, &format!("{prefix}_RPS"), default.rate_per_second)?;
    let burst: u32 = parse_or(var, &format!("{prefix}_BURST"), default.burst)?;
    if !rate.is_finite() || rate <= 0.0 {
        bail!("{prefix}_RPS must be a positive number");
    }
    if burst == 0 {
        bail!("{prefix}_BURST must be at least 1");
    }
    Ok(LimiterConfig::new(rate, burst))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<AppConfig> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.database_url, "sqlite:./shortly.db");
        assert_eq!(config.port, 8080);
        assert_eq!(config.base_url, "http://localhost:8080");
        assert_eq!(config.cache, CacheBackend::Memory);
        assert_eq!(config.rate_limits.shorten.burst, 5);
        assert_eq!(config.short_url("abc"), "http://localhost:8080/abc");
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let config = load(&[("BASE_URL", "https://go.example.com/")]).unwrap();
        assert_eq!(config.short_url("x1"), "https://go.example.com/x1");
    }

    #[test]
    fn redis_url_implies_redis_backend() {
        let config = load(&[("REDIS_URL", "redis://127.0.0.1/")]).unwrap();
        assert_eq!(config.cache, CacheBackend::Redis("redis://127.0.0.1/".into()));

        let config = load(&[("REDIS_URL", "redis://127.0.0.1/"), ("CACHE_BACKEND", "none")])
            .unwrap();
        assert_eq!(config.cache, CacheBackend::Disabled);
    }

    #[test]
    fn redis_backend_without_url_fails() {
        assert!(load(&[("CACHE_BACKEND", "redis")]).is_err());
        assert!(load(&[("CACHE_BACKEND", "memcached")]).is_err());
    }

    #[test]
    fn rate_limits_are_overridable_and_validated() {
        let config = load(&[("RATE_LIMIT_REDIRECT_RPS", "100"), ("RATE_LIMIT_REDIRECT_BURST", "200")])
            .unwrap();
        assert_eq!(config.rate_limits.redirect.rate_per_second, 100.0);
        assert_eq!(config.rate_limits.redirect.burst, 200);

        assert!(load(&[("RATE_LIMIT_RPS", "fast")]).is_err());
        assert!(load(&[("RATE_LIMIT_BURST", "0")]).is_err());
        assert!(load(&[("RATE_LIMIT_AUTH_RPS", "-1")]).is_err());
        assert!(load(&[("PORT", "99999")]).is_err());
    }
}
