use axum::http::{HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::config::Config;
use crate::handlers;
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    let cors = cors_layer(&state.config);

    Router::new()
        .route("/health", get(handlers::health::service_health))
        .route(
            "/v1/webhook/goldsky/poll-created",
            post(handlers::webhook::poll_created),
        )
        .route("/v1/webhook/health", post(handlers::webhook::webhook_health))
        .route("/v1/proof/ws", get(handlers::proof_ws::proof_session))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Cross-origin access is opt-in per origin; no configured origins means the
/// default same-origin policy stands.
fn cors_layer(config: &Config) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring unparseable allowed origin {:?}", origin);
                None
            }
        })
        .collect();

    if origins.is_empty() {
        CorsLayer::new()
    } else {
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([Method::GET, Method::POST])
            .allow_headers(Any)
    }
}
