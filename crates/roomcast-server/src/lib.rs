//! Roomcast Server Library
//!
//! This module exposes the server components for testing and embedding.

pub mod api;
pub mod engine;
pub mod error;
pub mod sfu;
pub mod state;
pub mod ws;

use anyhow::Result;
use engine::InProcessEngine;

/// Create and configure the server application on the in-process media engine
pub async fn create_app(config: state::Config) -> Result<(axum::Router, state::AppState)> {
    let engine = InProcessEngine::new(config.media.port_range);
    let app_state = state::AppState::new(config, &engine).await?;
    let router = api::create_router(app_state.clone());
    Ok((router, app_state))
}
