use crate::{
    rate_limit::{self, RouteClass},
    AppState,
};
use axum::{
    middleware,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;

pub mod api;
pub mod redirect;

/// Build the full application router. Tracing is layered on by the caller.
pub fn router(state: Arc<AppState>) -> Router {
    let limiters = state.clone();
    let limit = move |class: RouteClass| {
        middleware::from_fn_with_state(limiters.limiters.get(class).clone(), rate_limit::enforce)
    };

    let api = Router::new()
        .route(
            "/redirect/:code",
            get(redirect::resolve).route_layer(limit(RouteClass::Redirect)),
        )
        .route(
            "/shorten",
            post(api::shorten).route_layer(limit(RouteClass::Shorten)),
        )
        .route("/urls", get(api::list_links))
        .route(
            "/url/:code",
            get(api::stats)
                .patch(api::update_expiry)
                .delete(api::delete_link),
        )
        .route("/url/:code/analytics", get(api::analytics))
        .route_layer(limit(RouteClass::General));

    Router::new()
        // Load balancer health check, never rate limited
        .route("/health", get(health))
        .nest("/api/v1", api)
        // Short-link redirect; must come LAST so the fixed paths take priority
        .route(
            "/:code",
            get(redirect::redirect).route_layer(limit(RouteClass::Redirect)),
        )
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
