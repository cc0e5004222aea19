use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::json;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::{task::JoinHandle, time::Instant};

/// How often the background sweep wakes up.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);
/// Buckets unseen for longer than this are dropped by the sweep.
pub const IDLE_THRESHOLD: Duration = Duration::from_secs(10 * 60);

// ── Configuration ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LimiterConfig {
    pub rate_per_second: f64,
    pub burst: u32,
}

impl LimiterConfig {
    pub const fn new(rate_per_second: f64, burst: u32) -> Self {
        Self {
            rate_per_second,
            burst,
        }
    }
}

/// Which limiter a request is charged against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteClass {
    General,
    Auth,
    Shorten,
    Redirect,
}

/// One [`LimiterConfig`] per [`RouteClass`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitSettings {
    pub general: LimiterConfig,
    pub auth: LimiterConfig,
    pub shorten: LimiterConfig,
    pub redirect: LimiterConfig,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            general: LimiterConfig::new(10.0, 20),
            auth: LimiterConfig::new(5.0, 10),
            shorten: LimiterConfig::new(2.0, 5),
            redirect: LimiterConfig::new(30.0, 60),
        }
    }
}

// ── Token bucket ───────────────────────────────────────────────────────────

#[derive(Debug)]
struct ClientBucket {
    tokens: f64,
    last_refill: Instant,
    last_seen: Instant,
}

impl ClientBucket {
    fn full(burst: u32, now: Instant) -> Self {
        Self {
            tokens: f64::from(burst),
            last_refill: now,
            last_seen: now,
        }
    }

    fn try_take(&mut self, config: &LimiterConfig, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * config.rate_per_second).min(f64::from(config.burst));
        self.last_refill = now;
        self.last_seen = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

type Registry = DashMap<String, Mutex<ClientBucket>>;

/// Per-identity token buckets with a background idle sweep.
///
/// The registry is a sharded reader-writer map: lookups of known identities
/// share a read lock, while insert-if-absent and the sweep take the shard's
/// write lock. A sweep can therefore never remove a bucket between the lookup
/// and the token arithmetic of an in-flight request.
pub struct RateLimiter {
    config: LimiterConfig,
    buckets: Arc<Registry>,
    idle_threshold: Duration,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl RateLimiter {
    /// Build a limiter and start its sweep task. Must be called inside a
    /// tokio runtime.
    pub fn new(config: LimiterConfig) -> Self {
        Self::with_timing(config, SWEEP_INTERVAL, IDLE_THRESHOLD)
    }

    pub fn with_timing(config: LimiterConfig, sweep_interval: Duration, idle_threshold: Duration) -> Self {
        let buckets = Arc::new(Registry::new());
        let sweeper = tokio::spawn(sweep_loop(buckets.clone(), sweep_interval, idle_threshold));

        Self {
            config,
            buckets,
            idle_threshold,
            sweeper: Mutex::new(Some(sweeper)),
        }
    }

    pub fn config(&self) -> LimiterConfig {
        self.config
    }

    /// Spend one token for `identity`. Never blocks or queues.
    pub fn admit(&self, identity: &str) -> bool {
        let now = Instant::now();

        if let Some(bucket) = self.buckets.get(identity) {
            return bucket.lock().try_take(&self.config, now);
        }

        let bucket = self
            .buckets
            .entry(identity.to_owned())
            .or_insert_with(|| Mutex::new(ClientBucket::full(self.config.burst, now)));
        let admitted = bucket.lock().try_take(&self.config, now);
        admitted
    }

    /// Drop buckets idle for longer than the threshold. Returns how many went.
    pub fn sweep_idle(&self) -> usize {
        sweep(&self.buckets, self.idle_threshold, Instant::now())
    }

    /// Number of identities currently tracked.
    pub fn tracked(&self) -> usize {
        self.buckets.len()
    }

    /// Stop the sweep task. Admission keeps working; idle buckets stay.
    pub fn shutdown(&self) {
        if let Some(handle) = self.sweeper.lock().take() {
            handle.abort();
        }
    }
}

impl Drop for RateLimiter {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn sweep(buckets: &Registry, idle_threshold: Duration, now: Instant) -> usize {
    let before = buckets.len();
    buckets.retain(|_, bucket| {
        now.saturating_duration_since(bucket.get_mut().last_seen) <= idle_threshold
    });
    before.saturating_sub(buckets.len())
}

async fn sweep_loop(buckets: Arc<Registry>, every: Duration, idle_threshold: Duration) {
    let mut ticker = tokio::time::interval(every);
    // The first tick completes immediately.
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let removed = sweep(&buckets, idle_threshold, Instant::now());
        if removed > 0 {
            tracing::debug!("Rate limiter sweep evicted {} idle client(s)", removed);
        }
    }
}

// ── Route-class registry ───────────────────────────────────────────────────

/// The limiters of one process, one per route class.
pub struct RateLimiters {
    general: Arc<RateLimiter>,
    auth: Arc<RateLimiter>,
    shorten: Arc<RateLimiter>,
    redirect: Arc<RateLimiter>,
}

impl RateLimiters {
    pub fn new(settings: &RateLimitSettings) -> Self {
        Self {
            general: Arc::new(RateLimiter::new(settings.general)),
            auth: Arc::new(RateLimiter::new(settings.auth)),
            shorten: Arc::new(RateLimiter::new(settings.shorten)),
            redirect: Arc::new(RateLimiter::new(settings.redirect)),
        }
    }

    pub fn get(&self, class: RouteClass) -> &Arc<RateLimiter> {
        match class {
            RouteClass::General => &self.general,
            RouteClass::Auth => &self.auth,
            RouteClass::Shorten => &self.shorten,
            RouteClass::Redirect => &self.redirect,
        }
    }

    pub fn admit(&self, identity: &str, class: RouteClass) -> bool {
        self.get(class).admit(identity)
    }

    pub fn shutdown(&self) {
        for limiter in [&self.general, &self.auth, &self.shorten, &self.redirect] {
            limiter.shutdown();
        }
    }
}

// ── Middleware ─────────────────────────────────────────────────────────────

/// Reject the request with 429 when the client's bucket is empty.
pub async fn enforce(State(limiter): State<Arc<RateLimiter>>, req: Request, next: Next) -> Response {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let identity = client_identity(req.headers(), peer);

    if !limiter.admit(&identity) {
        tracing::debug!("Rate limit exceeded for {}", identity);
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({ "error": "Rate limit exceeded. Please try again later." })),
        )
            .into_response();
    }

    next.run(req).await
}

/// Determine the real client IP, preferring common proxy headers.
pub fn client_identity(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    // X-Forwarded-For can be a comma-separated list; take the first entry.
    if let Some(xff) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(ip) = xff.split(',').next().map(str::trim) {
            if !ip.is_empty() {
                return ip.to_owned();
            }
        }
    }

    if let Some(real_ip) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        let real_ip = real_ip.trim();
        if !real_ip.is_empty() {
            return real_ip.to_owned();
        }
    }

    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, middleware, routing::get, Router};
    use tower::ServiceExt;

    #[tokio::test(start_paused = true)]
    async fn burst_then_steady_refill() {
        let limiter = RateLimiter::new(LimiterConfig::new(2.0, 5));

        let admitted = (0..6).filter(|_| limiter.admit("1.2.3.4")).count();
        assert_eq!(admitted, 5);

        tokio::time::advance(Duration::from_millis(500)).await;
        assert!(limiter.admit("1.2.3.4"));
        assert!(!limiter.admit("1.2.3.4"));
    }

    #[tokio::test(start_paused = true)]
    async fn refill_is_capped_at_burst() {
        let limiter = RateLimiter::new(LimiterConfig::new(100.0, 3));
        assert!(limiter.admit("a"));
        tokio::time::advance(Duration::from_secs(60)).await;

        let admitted = (0..10).filter(|_| limiter.admit("a")).count();
        assert_eq!(admitted, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn identities_have_independent_buckets() {
        let limiter = RateLimiter::new(LimiterConfig::new(1.0, 1));
        assert!(limiter.admit("a"));
        assert!(!limiter.admit("a"));
        assert!(limiter.admit("b"));
        assert_eq!(limiter.tracked(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_bucket_is_swept_and_returns_full() {
        let limiter = RateLimiter::new(LimiterConfig::new(2.0, 5));
        for _ in 0..5 {
            assert!(limiter.admit("idle"));
        }
        assert!(!limiter.admit("idle"));

        tokio::time::advance(IDLE_THRESHOLD + Duration::from_secs(1)).await;
        assert_eq!(limiter.sweep_idle(), 1);
        assert_eq!(limiter.tracked(), 0);

        let admitted = (0..5).filter(|_| limiter.admit("idle")).count();
        assert_eq!(admitted, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn recently_seen_bucket_survives_sweep() {
        let limiter = RateLimiter::new(LimiterConfig::new(2.0, 5));
        limiter.admit("busy");
        tokio::time::advance(IDLE_THRESHOLD - Duration::from_secs(1)).await;
        assert_eq!(limiter.sweep_idle(), 0);
        assert_eq!(limiter.tracked(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn background_sweep_evicts_without_prompting() {
        let limiter = RateLimiter::new(LimiterConfig::new(2.0, 5));
        limiter.admit("ghost");

        // Ticks at 5, 10 and 15 minutes; only the third sees > 10 minutes idle.
        tokio::time::sleep(Duration::from_secs(16 * 60)).await;
        assert_eq!(limiter.tracked(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn route_classes_do_not_share_buckets() {
        let limiters = RateLimiters::new(&RateLimitSettings {
            general: LimiterConfig::new(1.0, 1),
            auth: LimiterConfig::new(1.0, 1),
            shorten: LimiterConfig::new(1.0, 1),
            redirect: LimiterConfig::new(1.0, 2),
        });

        assert!(limiters.admit("c", RouteClass::Shorten));
        assert!(!limiters.admit("c", RouteClass::Shorten));
        assert!(limiters.admit("c", RouteClass::General));
        assert!(limiters.admit("c", RouteClass::Auth));
        assert!(limiters.admit("c", RouteClass::Redirect));
        assert!(limiters.admit("c", RouteClass::Redirect));
        assert!(!limiters.admit("c", RouteClass::Redirect));
        limiters.shutdown();
    }

    #[test]
    fn client_identity_prefers_proxy_headers() {
        let peer: SocketAddr = "10.0.0.1:5555".parse().unwrap();

        let mut headers = HeaderMap::new();
        assert_eq!(client_identity(&headers, Some(peer)), "10.0.0.1");
        assert_eq!(client_identity(&headers, None), "unknown");

        headers.insert("x-real-ip", "192.0.2.7".parse().unwrap());
        assert_eq!(client_identity(&headers, Some(peer)), "192.0.2.7");

        headers.insert("x-forwarded-for", "203.0.113.9, 10.0.0.2".parse().unwrap());
        assert_eq!(client_identity(&headers, Some(peer)), "203.0.113.9");
    }

    #[tokio::test(start_paused = true)]
    async fn middleware_answers_429_when_empty() {
        let limiter = Arc::new(RateLimiter::new(LimiterConfig::new(1.0, 1)));
        let app = Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(middleware::from_fn_with_state(limiter, enforce));

        let request = || {
            axum::http::Request::builder()
                .uri("/")
                .header("x-forwarded-for", "198.51.100.1")
                .body(Body::empty())
                .unwrap()
        };

        let first = app.clone().oneshot(request()).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        let second = app.oneshot(request()).await.unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_admits_never_exceed_burst() {
        let limiter = Arc::new(RateLimiter::new(LimiterConfig::new(0.001, 10)));
        let start = Arc::new(tokio::sync::Barrier::new(64));

        let tasks: Vec<_> = (0..64)
            .map(|i| {
                let limiter = limiter.clone();
                let start = start.clone();
                tokio::spawn(async move {
                    let identity = format!("client-{}", i % 4);
                    start.wait().await;
                    let admitted = (0..5).filter(|_| limiter.admit(&identity)).count();
                    (identity, admitted)
                })
            })
            .collect();

        let mut per_client = std::collections::HashMap::new();
        for task in tasks {
            let (identity, admitted) = task.await.unwrap();
            *per_client.entry(identity).or_insert(0) += admitted;
        }

        assert_eq!(per_client.len(), 4);
        assert!(per_client.values().all(|&admitted| admitted == 10), "{per_client:?}");
        assert_eq!(limiter.tracked(), 4);
    }
}
