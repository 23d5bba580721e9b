//! Assembles the `axum::Router` (§4.F, §6): the WebSocket sync endpoint, the
//! three `/api/*` call endpoints, and a couple of ambient ops endpoints
//! (`/healthz`, `/metrics`) alongside the core API surface.
use std::sync::Arc;

use axum::{
    routing::{
        get,
        post,
    },
    Router,
};
use tower_http::cors::{
    Any,
    CorsLayer,
};

use crate::{
    http::{
        action,
        mutation,
        query,
    },
    state::AppState,
    ws::sync_handler,
};

pub fn router(state: Arc<AppState>) -> Router {
    let api_routes = Router::new()
        .route("/query", post(query))
        .route("/mutation", post(mutation))
        .route("/action", post(action));

    Router::new()
        .route("/api/sync", get(sync_handler))
        .nest("/api", api_routes)
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .layer(cors())
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn metrics() -> Result<String, crate::http::ApiError> {
    use prometheus::Encoder;
    let families = prometheus::gather();
    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

fn cors() -> CorsLayer {
    CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
}
