use axum::{
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{
    clear_measurement, clear_overflows, create_correlation, create_counter,
    create_delayed_channel, create_flim, create_tagger, delete_delayed_channel,
    delete_measurement, delete_tagger, get_data, get_delayed_channel, get_index,
    get_input_delay, get_measurement, get_overflows, get_tagger, get_test_signal,
    health_check, is_running, list_channels, list_taggers, set_input_delay, set_test_signal,
    set_test_signal_divider, start_measurement, start_measurement_for, stop_measurement,
    sync_tagger, wait_until_finished,
};
use crate::state::ServerState;

/// Request bodies are small JSON documents; FLIM configs are the largest
const MAX_API_BODY_SIZE: usize = 1024 * 1024;

// Catch-all handler to log missing endpoints
async fn handle_404() -> (StatusCode, Json<serde_json::Value>) {
    tracing::warn!("404 - Endpoint not found");
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({
            "error": "not_found",
            "message": "The requested API endpoint does not exist"
        })),
    )
}

pub fn create_router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/api/health", get(health_check))
        // Taggers
        .route("/api/taggers", get(list_taggers).post(create_tagger))
        .route("/api/taggers/{handle}", get(get_tagger).delete(delete_tagger))
        .route("/api/taggers/{handle}/channels", get(list_channels))
        .route(
            "/api/taggers/{handle}/test-signal",
            get(get_test_signal).put(set_test_signal),
        )
        .route(
            "/api/taggers/{handle}/input-delay",
            get(get_input_delay).put(set_input_delay),
        )
        .route(
            "/api/taggers/{handle}/test-signal-divider",
            put(set_test_signal_divider),
        )
        .route("/api/taggers/{handle}/sync", post(sync_tagger))
        .route(
            "/api/taggers/{handle}/overflows",
            get(get_overflows).delete(clear_overflows),
        )
        // Virtual channels
        .route(
            "/api/taggers/{handle}/delayed-channels",
            post(create_delayed_channel),
        )
        .route(
            "/api/channels/{handle}",
            get(get_delayed_channel).delete(delete_delayed_channel),
        )
        // Measurements
        .route("/api/taggers/{handle}/counter", post(create_counter))
        .route("/api/taggers/{handle}/correlation", post(create_correlation))
        .route("/api/taggers/{handle}/flim", post(create_flim))
        .route(
            "/api/measurements/{handle}",
            get(get_measurement).delete(delete_measurement),
        )
        .route("/api/measurements/{handle}/start", post(start_measurement))
        .route("/api/measurements/{handle}/start-for", post(start_measurement_for))
        .route("/api/measurements/{handle}/stop", post(stop_measurement))
        .route("/api/measurements/{handle}/clear", post(clear_measurement))
        .route("/api/measurements/{handle}/wait", post(wait_until_finished))
        .route("/api/measurements/{handle}/running", get(is_running))
        .route("/api/measurements/{handle}/index", get(get_index))
        .route("/api/measurements/{handle}/data", get(get_data))
        .fallback(handle_404)
        .layer(RequestBodyLimitLayer::new(MAX_API_BODY_SIZE))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

#[cfg(test)]
#[path = "router_tests.rs"]
mod router_tests;
