use crate::{
    cache::{CacheSentinel, CachedResolution, ResolutionCache},
    db::LinkStore,
    error::{Result, ShortlyError, StoreError},
    models::{AllocationRequest, NewLink, ShortLink},
};
use base64::{engine::general_purpose::URL_SAFE, Engine as _};
use chrono::{DateTime, Duration, Utc};
use rand::{rngs::OsRng, RngCore};
use std::sync::Arc;

pub const MIN_CODE_LEN: usize = 3;
pub const MAX_CODE_LEN: usize = 20;
pub const MAX_GENERATION_ATTEMPTS: usize = 10;
const GENERATED_CODE_LEN: usize = 8;

/// Codes that would shadow routes or look official.
const RESERVED_CODES: &[&str] = &[
    "admin",
    "api",
    "www",
    "mail",
    "ftp",
    "localhost",
    "health",
    "auth",
    "login",
    "register",
    "signin",
    "signup",
    "signout",
    "logout",
    "shorten",
    "urls",
    "url",
    "stats",
    "analytics",
    "redirect",
];

/// Tolerated clock skew between caller and server for expiry timestamps.
pub fn expiry_skew() -> Duration {
    Duration::seconds(2)
}

/// Reject an expiry that lies in the past, allowing for clock skew.
pub fn validate_expiry(expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Result<()> {
    match expires_at {
        Some(at) if at < now - expiry_skew() => Err(ShortlyError::Validation(
            "expiration time cannot be in the past".into(),
        )),
        _ => Ok(()),
    }
}

pub fn is_reserved(code: &str) -> bool {
    RESERVED_CODES
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(code))
}

/// Check a caller-supplied code against the length, charset and reserved-word rules.
pub fn validate_custom_code(code: &str) -> Result<()> {
    let len = code.chars().count();
    if len < MIN_CODE_LEN {
        return Err(ShortlyError::Validation(format!(
            "short code must be at least {MIN_CODE_LEN} characters long"
        )));
    }
    if len > MAX_CODE_LEN {
        return Err(ShortlyError::Validation(format!(
            "short code must be at most {MAX_CODE_LEN} characters long"
        )));
    }
    if !code
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ShortlyError::Validation(
            "short code can only contain letters, numbers, hyphens, and underscores".into(),
        ));
    }
    if is_reserved(code) {
        return Err(ShortlyError::Validation(format!(
            "short code '{code}' is reserved and cannot be used"
        )));
    }
    Ok(())
}

/// The target must be an absolute http(s) URL.
pub fn validate_target(target: &str) -> Result<()> {
    let parsed = url::Url::parse(target)
        .map_err(|_| ShortlyError::Validation("URL must be a valid absolute URL".into()))?;
    match parsed.scheme() {
        "http" | "https" if parsed.has_host() => Ok(()),
        _ => Err(ShortlyError::Validation(
            "URL must start with http:// or https://".into(),
        )),
    }
}

/// 6 bytes from the OS CSPRNG, URL-safe base64: exactly 8 characters.
pub fn generate_code() -> String {
    let mut bytes = [0u8; 6];
    OsRng.fill_bytes(&mut bytes);
    let mut code = URL_SAFE.encode(bytes);
    code.truncate(GENERATED_CODE_LEN);
    code
}

/// Assigns unique short codes to new links.
///
/// The cache only saves store round-trips. The UNIQUE constraint on
/// `links.code` is what actually prevents two links sharing a code.
#[derive(Clone)]
pub struct ShortCodeAllocator {
    store: Arc<dyn LinkStore>,
    cache: ResolutionCache,
}

impl ShortCodeAllocator {
    pub fn new(store: Arc<dyn LinkStore>, cache: ResolutionCache) -> Self {
        Self { store, cache }
    }

    pub async fn allocate(&self, request: AllocationRequest) -> Result<ShortLink> {
        let now = Utc::now();
        let target = request.target.trim();
        validate_target(target)?;
        validate_expiry(request.expires_at, now)?;

        let custom = request
            .custom_code
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty());

        let code = match custom {
            Some(code) => {
                validate_custom_code(code)?;
                if !self.is_available(code, now).await? {
                    return Err(ShortlyError::Conflict(format!(
                        "short code '{code}' is already taken"
                    )));
                }
                code.to_owned()
            }
            None => self.generate_available_code(now).await?,
        };

        // The live lookup ignored expired rows, but they still hold the
        // UNIQUE slot; clear one out before claiming the code.
        if self.store.purge_expired_code(&code, now).await? {
            tracing::info!("Purged expired link holding code '{}'", code);
        }

        let created = self
            .store
            .create_link(NewLink {
                code: &code,
                target,
                owner_id: request.owner_id.as_deref(),
                expires_at: request.expires_at,
            })
            .await;

        let link = match created {
            Ok(link) => link,
            Err(StoreError::UniqueViolation) => {
                tracing::debug!("Lost allocation race for code '{}'", code);
                self.cache.mark(&code, CacheSentinel::Taken).await;
                return Err(ShortlyError::Conflict(format!(
                    "short code '{code}' is already taken"
                )));
            }
            Err(e) => return Err(e.into()),
        };

        self.cache.mark(&link.code, CacheSentinel::Taken).await;
        self.cache
            .store_resolution(
                &link.code,
                &CachedResolution {
                    link_id: link.id,
                    target: link.target.clone(),
                    expires_at: link.expires_at,
                },
            )
            .await;

        tracing::info!("Allocated short code '{}' -> {}", link.code, link.target);
        Ok(link)
    }

    /// Cache sentinel first, then the store. Records the verdict as a sentinel.
    pub async fn is_available(&self, code: &str, now: DateTime<Utc>) -> Result<bool> {
        if self.cache.sentinel(code).await == Some(CacheSentinel::Taken) {
            return Ok(false);
        }

        let live = self.store.find_active_link_by_code(code, now).await?;
        if live.is_some() {
            self.cache.mark(code, CacheSentinel::Taken).await;
            Ok(false)
        } else {
            self.cache.mark(code, CacheSentinel::Available).await;
            Ok(true)
        }
    }

    async fn generate_available_code(&self, now: DateTime<Utc>) -> Result<String> {
        for attempt in 1..=MAX_GENERATION_ATTEMPTS {
            let code = generate_code();
            if !is_reserved(&code) && self.is_available(&code, now).await? {
                return Ok(code);
            }
            tracing::debug!("Generated code '{}' collided (attempt {})", code, attempt);
        }
        Err(ShortlyError::AllocationExhausted {
            attempts: MAX_GENERATION_ATTEMPTS,
        })
    }
}
