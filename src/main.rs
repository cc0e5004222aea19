use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use shortly::{
    cache::{KvCache, MemoryCache, RedisCache, ResolutionCache},
    config::{AppConfig, CacheBackend},
    db::{self, SqliteStore},
    handlers,
    rate_limit::{RateLimiters, RouteClass},
    service::LinkService,
    AppState,
};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// ── Entry point ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env (ignore error if file is absent, env vars may already be set)
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "shortly=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env()?;
    tracing::info!("Starting Shortly on {}:{}", config.host, config.port);
    tracing::info!("Base URL: {}", config.base_url);

    let pool = db::connect(&config.database_url)
        .await
        .with_context(|| format!("failed to open database at {}", config.database_url))?;
    let store = SqliteStore::new(pool);
    store.migrate().await.context("failed to apply migrations")?;
    tracing::info!("Database migrations applied");

    let cache = ResolutionCache::new(open_cache(&config.cache).await);
    let service = LinkService::new(Arc::new(store), cache);

    let limiters = RateLimiters::new(&config.rate_limits);
    for class in [
        RouteClass::General,
        RouteClass::Auth,
        RouteClass::Shorten,
        RouteClass::Redirect,
    ] {
        let limits = limiters.get(class).config();
        tracing::info!(
            "Rate limit {:?}: {}/s, burst {}",
            class,
            limits.rate_per_second,
            limits.burst
        );
    }

    let bind_addr = format!("{}:{}", config.host, config.port);
    let state = Arc::new(AppState {
        service,
        limiters,
        config,
    });

    let app = handlers::router(state.clone()).layer(TraceLayer::new_for_http());

    // ── Serve ──────────────────────────────────────────────────────────────
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    tracing::info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    state.limiters.shutdown();
    tracing::info!("Server stopped");
    Ok(())
}

/// Pick the cache backend. A Redis server that cannot be reached is not
/// fatal: the service runs against the store alone.
async fn open_cache(backend: &CacheBackend) -> Option<Arc<dyn KvCache>> {
    match backend {
        CacheBackend::Memory => {
            tracing::info!("Using in-process cache");
            Some(Arc::new(MemoryCache::new()))
        }
        CacheBackend::Redis(url) => match RedisCache::connect(url).await {
            Ok(cache) => {
                tracing::info!("Using Redis cache");
                Some(Arc::new(cache))
            }
            Err(e) => {
                tracing::warn!("Redis unavailable ({}), running without cache", e);
                None
            }
        },
        CacheBackend::Disabled => {
            tracing::info!("Cache disabled");
            None
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}
