use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::handlers::{handle_webhook, healthz, readyz};
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // Root path mirrors the cloud-function deployment.
        .route("/", post(handle_webhook))
        .route("/v1/mailgun/webhook", post(handle_webhook))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
