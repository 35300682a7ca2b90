//! HTTP server setup and routing

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use sqlx::SqlitePool;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::audio::Clock;
use crate::config::EngineTuning;
use crate::playback::TrackLoader;
use crate::state::SharedState;

/// Shared application context passed to all handlers
#[derive(Clone)]
pub struct AppContext {
    pub state: Arc<SharedState>,
    pub db_pool: SqlitePool,
    /// Client for rich lyric documents
    pub http: reqwest::Client,
    pub loader: Arc<TrackLoader>,
    pub clock: Arc<dyn Clock>,
    pub tuning: EngineTuning,
    pub root_folder: PathBuf,
    pub port: u16,
}

/// Build the router with every route attached
pub fn create_router(ctx: AppContext) -> Router {
    use super::handlers;

    Router::new()
        // Health check (no prefix for health endpoint)
        .route("/health", get(handlers::health))
        .nest(
            "/api/v1",
            Router::new()
                // Song catalogue
                .route("/songs", get(handlers::list_songs).post(handlers::create_song))
                .route(
                    "/songs/:key",
                    get(handlers::get_song)
                        .put(handlers::update_song)
                        .delete(handlers::delete_song),
                )
                .route("/songs/:key/rich-lyrics", get(handlers::get_rich_lyrics))
                // Session lifecycle
                .route("/session/open", post(handlers::open_session))
                .route("/session/close", post(handlers::close_session))
                .route("/session/state", get(handlers::get_session_state))
                // Transport
                .route("/session/toggle", post(handlers::toggle_play_pause))
                .route("/session/report", post(handlers::report))
                .route("/session/seek", post(handlers::seek))
                .route("/session/chapter", post(handlers::seek_to_chapter))
                .route("/session/volume", post(handlers::set_volume))
                .route("/session/mute", post(handlers::set_mute))
                .route("/session/auto-restart", post(handlers::set_auto_restart))
                // SSE events
                .route("/events", get(super::sse::event_stream)),
        )
        .with_state(ctx)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
