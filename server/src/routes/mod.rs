pub mod v1;

use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::infra::app_state::AppState;

async fn healthz() -> &'static str {
    "ok"
}

/// Permissive by default, narrowed to the configured origin list when
/// one is set.
fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::permissive();
    }

    let allowed: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();

    CorsLayer::new()
        .allow_origin(tower_http::cors::AllowOrigin::list(allowed))
        .allow_methods(tower_http::cors::Any)
        .allow_headers(tower_http::cors::Any)
}

pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.cors_origins);

    Router::new()
        .route("/healthz", get(healthz))
        .merge(v1::router(state.clone()))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
