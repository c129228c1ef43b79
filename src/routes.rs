use axum::{Router, http::Method, routing::get};
use tower_http::cors::{Any, CorsLayer};

use crate::handler::{AppState, get_status, healthcheck, run_sync, start_sync};

pub fn routes(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/", get(healthcheck))
        .route("/status", get(get_status))
        .route("/sync", get(run_sync).post(start_sync))
        .layer(cors)
        .with_state(state)
}
