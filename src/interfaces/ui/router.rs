//! Assembles the UI control-plane's axum `Router` (§4.13): HTTP POST and
//! WebSocket endpoints behind Basic auth, per-IP rate limiting, a body-size
//! cap, and response compression. Composition order mirrors the teacher's
//! `interfaces::http::router`: per-route middleware layered before
//! `with_state`, process-wide concerns layered on the assembled router.
//!
//! Prometheus metrics are served by their own listener (`metrics-exporter-
//! prometheus`'s `http-listener` feature, installed once in the supervisor
//! at startup) rather than mounted as a route here.

use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_governor::governor::GovernorConfigBuilder;
use tower_governor::GovernorLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::auth::basic_auth_middleware;
use super::compression::gzip_middleware;
use super::http::handle_procedure;
use super::ws::upgrade;
use super::UiState;

pub fn build_router(state: UiState) -> Router {
    let governor_conf = GovernorConfigBuilder::default()
        .per_second(state.config.rate_limit_per_second.max(1) as u64)
        .burst_size(state.config.rate_limit_burst.max(1))
        .use_headers()
        .finish()
        .expect("valid rate limiter configuration");

    let procedure_routes = Router::new()
        .route("/ui", post(handle_procedure))
        .route("/ui/ws", get(upgrade))
        .layer(middleware::from_fn_with_state(state.clone(), basic_auth_middleware))
        .layer(middleware::from_fn_with_state(state.clone(), gzip_middleware))
        .layer(DefaultBodyLimit::max(state.config.max_body_bytes))
        .with_state(state);

    let health_routes = Router::new().route("/health", get(health));

    Router::new()
        .merge(procedure_routes)
        .merge(health_routes)
        .layer(GovernorLayer::new(governor_conf))
        .layer(cors_layer())
        .layer(TraceLayer::new_for_http())
}

async fn health() -> &'static str {
    "ok"
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
}
