mod rooms;

use crate::state::AppState;
use crate::ws;
use axum::{http::HeaderValue, routing::get, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub fn create_router(state: AppState) -> Router {
    let cors = cors_layer(state.config.cors_origin.as_deref());

    Router::new()
        // Health check
        .route("/health", get(|| async { "OK" }))
        // Room inspection
        .route("/api/rooms", get(rooms::list_rooms))
        .route("/api/rooms/{room_id}", get(rooms::get_room))
        // WebSocket signaling endpoint
        .route("/ws", get(ws::handler::ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn cors_layer(origin: Option<&str>) -> CorsLayer {
    let cors = CorsLayer::new().allow_methods(Any).allow_headers(Any);

    match origin.map(HeaderValue::from_str) {
        Some(Ok(origin)) => cors.allow_origin(origin),
        Some(Err(e)) => {
            tracing::warn!("Ignoring invalid CORS origin: {}", e);
            cors.allow_origin(Any)
        }
        None => cors.allow_origin(Any),
    }
}
