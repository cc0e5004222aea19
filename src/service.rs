use crate::{
    allocator::ShortCodeAllocator,
    analytics::ClickAnalyticsAggregator,
    cache::ResolutionCache,
    db::LinkStore,
    error::{Result, ShortlyError},
    models::{AllocationRequest, ClickBucket, ShortLink},
    resolver::LinkResolver,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Caller-facing operations over one store and one (optional) cache.
#[derive(Clone)]
pub struct LinkService {
    store: Arc<dyn LinkStore>,
    allocator: ShortCodeAllocator,
    resolver: LinkResolver,
    analytics: ClickAnalyticsAggregator,
}

impl LinkService {
    pub fn new(store: Arc<dyn LinkStore>, cache: ResolutionCache) -> Self {
        Self {
            allocator: ShortCodeAllocator::new(store.clone(), cache.clone()),
            resolver: LinkResolver::new(store.clone(), cache),
            analytics: ClickAnalyticsAggregator::new(store.clone()),
            store,
        }
    }

    pub async fn allocate_short_code(&self, request: AllocationRequest) -> Result<ShortLink> {
        self.allocator.allocate(request).await
    }

    pub async fn resolve_and_record_click(&self, code: &str) -> Result<String> {
        self.resolver.resolve(code).await
    }

    /// Bucketed clicks for a link the owner holds. Expired links still report.
    pub async fn get_analytics(
        &self,
        code: &str,
        owner_id: &str,
        lookback_hours: u32,
    ) -> Result<Vec<ClickBucket>> {
        let link = self.get_stats(code, owner_id).await?;
        self.analytics.bucketed_counts(link.id, lookback_hours).await
    }

    pub async fn get_stats(&self, code: &str, owner_id: &str) -> Result<ShortLink> {
        self.store
            .find_link_by_code(code, Some(owner_id))
            .await?
            .ok_or(ShortlyError::NotFound)
    }

    pub async fn list_links(&self, owner_id: &str) -> Result<Vec<ShortLink>> {
        Ok(self.store.list_links_by_owner(owner_id).await?)
    }

    pub async fn delete_link(&self, code: &str, owner_id: &str) -> Result<()> {
        self.resolver.delete(code, owner_id).await
    }

    pub async fn update_expiry(
        &self,
        code: &str,
        owner_id: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        self.resolver.update_expiry(code, owner_id, expires_at).await
    }
}
