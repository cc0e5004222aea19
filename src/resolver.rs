use crate::{
    allocator::validate_expiry,
    cache::{CachedResolution, ResolutionCache},
    db::LinkStore,
    error::{Result, ShortlyError},
};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Resolves short codes on the redirect path and keeps the cache honest
/// when owners change or remove links.
#[derive(Clone)]
pub struct LinkResolver {
    store: Arc<dyn LinkStore>,
    cache: ResolutionCache,
}

impl LinkResolver {
    pub fn new(store: Arc<dyn LinkStore>, cache: ResolutionCache) -> Self {
        Self { store, cache }
    }

    /// Look up the target for `code` and count the click.
    ///
    /// On a cache hit the click is recorded by a detached task: best effort,
    /// it may be lost if the process exits first. On the store path the click
    /// is recorded before returning. Click failures never fail the lookup.
    pub async fn resolve(&self, code: &str) -> Result<String> {
        let now = Utc::now();

        if let Some(cached) = self.cache.resolution(code).await {
            if !cached.is_expired_at(now) {
                tracing::debug!("Cache hit for '{}'", code);
                let store = self.store.clone();
                let code = code.to_owned();
                let link_id = cached.link_id;
                tokio::spawn(async move {
                    record_click(store.as_ref(), &code, link_id).await;
                });
                return Ok(cached.target);
            }
            tracing::debug!("Cached resolution for '{}' has expired", code);
            self.cache.evict_resolution(code).await;
        }

        let link = self
            .store
            .find_active_link_by_code(code, now)
            .await?
            .ok_or(ShortlyError::NotFound)?;

        self.cache
            .store_resolution(
                code,
                &CachedResolution {
                    link_id: link.id,
                    target: link.target.clone(),
                    expires_at: link.expires_at,
                },
            )
            .await;

        record_click(self.store.as_ref(), code, link.id).await;
        Ok(link.target)
    }

    pub async fn delete(&self, code: &str, owner_id: &str) -> Result<()> {
        if !self.store.delete_link(code, Some(owner_id)).await? {
            return Err(ShortlyError::NotFound);
        }
        self.cache.invalidate(code).await;
        tracing::info!("Deleted short code '{}'", code);
        Ok(())
    }

    pub async fn update_expiry(
        &self,
        code: &str,
        owner_id: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        validate_expiry(expires_at, Utc::now())?;
        if !self.store.update_expiry(code, owner_id, expires_at).await? {
            return Err(ShortlyError::NotFound);
        }
        self.cache.invalidate(code).await;
        tracing::info!("Updated expiry for '{}' to {:?}", code, expires_at);
        Ok(())
    }
}

// The counter and the event log are two separate writes; either may fail alone.
async fn record_click(store: &dyn LinkStore, code: &str, link_id: i64) {
    match store.increment_click_count(code).await {
        Ok(true) => {}
        Ok(false) => tracing::warn!("Click count for '{}' not updated, link is gone", code),
        Err(e) => tracing::error!("Failed to increment click count for '{}': {}", code, e),
    }
    if let Err(e) = store.append_click_event(link_id, Utc::now()).await {
        tracing::error!("Failed to record click event for '{}': {}", code, e);
    }
}
