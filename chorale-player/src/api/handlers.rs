//! HTTP request handlers
//!
//! Session commands answer with the session snapshot taken right after the
//! command, so a client never needs a second round trip to redraw.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chorale_common::db;
use chorale_common::lyrics::format_mmss;
use chorale_common::model::{NewSong, Song, SongSummary, VoicePart};
use chorale_common::rich_lyrics::load_rich_lyrics;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::api::server::AppContext;
use crate::audio::MediaReport;
use crate::error::Error;
use crate::playback::{PlaybackSession, SessionDriver, SessionSnapshot};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: String,
    module: String,
    version: String,
    git_hash: String,
    build_timestamp: String,
    build_profile: String,
    port: u16,
    root_folder: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
}

impl StatusResponse {
    fn new(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct OpenSessionRequest {
    /// Song slug or id
    song: String,
}

/// Element state observed by the client, one entry per track
#[derive(Debug, Deserialize)]
pub struct ReportRequest {
    reports: Vec<MediaReport>,
}

#[derive(Debug, Deserialize)]
pub struct SeekRequest {
    /// Seconds
    position: f64,
}

#[derive(Debug, Deserialize)]
pub struct ChapterRequest {
    chapter_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct VolumeRequest {
    track_id: Uuid,
    /// 0.0-1.0
    volume: f32,
}

#[derive(Debug, Deserialize)]
pub struct MuteRequest {
    track_id: Uuid,
    muted: bool,
}

/// Either flag may be omitted to leave it unchanged
#[derive(Debug, Deserialize)]
pub struct AutoRestartRequest {
    #[serde(default)]
    song: Option<bool>,
    #[serde(default)]
    chapter: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct RichLyricsQuery {
    /// Seconds; defaults to the active session's position for this song
    #[serde(default)]
    position: Option<f64>,
    /// Voice part to filter the section by
    #[serde(default)]
    part: Option<String>,
}

/// Rendered rich lyric section; retrieval failures are reported inline
#[derive(Debug, Serialize, Deserialize)]
pub struct RichLyricsResponse {
    pub song_id: Uuid,
    pub position: f64,
    pub mmss: String,
    pub html: Option<String>,
    pub error: Option<String>,
}

type ApiError = (StatusCode, Json<StatusResponse>);
type ApiResult<T> = Result<Json<T>, ApiError>;

/// Map an error to its HTTP status, logging by severity
fn api_error(e: impl Into<Error>) -> ApiError {
    let e = e.into();
    let status = match &e {
        Error::Common(common) => match common {
            chorale_common::Error::NotFound(_) => StatusCode::NOT_FOUND,
            chorale_common::Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
            chorale_common::Error::Conflict(_) => StatusCode::CONFLICT,
            chorale_common::Error::RichDocumentFetch(_) => StatusCode::BAD_GATEWAY,
            chorale_common::Error::RichDocumentParse(_) => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        },
        Error::NoSession | Error::UnknownTrack(_) | Error::UnknownChapter(_) => StatusCode::NOT_FOUND,
        Error::BadRequest(_) => StatusCode::BAD_REQUEST,
        Error::InvalidState(_) | Error::PlaybackRejected { .. } | Error::Cancelled(_) => {
            StatusCode::CONFLICT
        }
        Error::Load(_) => StatusCode::BAD_GATEWAY,
        Error::Config(_) | Error::Http(_) | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    if status.is_server_error() {
        error!("Request failed: {}", e);
    } else {
        warn!("Request rejected ({}): {}", status.as_u16(), e);
    }
    (status, Json(StatusResponse::new(format!("error: {}", e))))
}

// ============================================================================
// Health
// ============================================================================

/// GET /health
pub async fn health(State(ctx): State<AppContext>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        module: "chorale-player".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: env!("GIT_HASH").to_string(),
        build_timestamp: env!("BUILD_TIMESTAMP").to_string(),
        build_profile: env!("BUILD_PROFILE").to_string(),
        port: ctx.port,
        root_folder: ctx.root_folder.display().to_string(),
    })
}

// ============================================================================
// Song Catalogue
// ============================================================================

/// GET /songs
pub async fn list_songs(State(ctx): State<AppContext>) -> ApiResult<Vec<SongSummary>> {
    db::list_songs(&ctx.db_pool).await.map(Json).map_err(api_error)
}

/// GET /songs/:key - key is a slug or an id
pub async fn get_song(State(ctx): State<AppContext>, Path(key): Path<String>) -> ApiResult<Song> {
    db::get_song(&ctx.db_pool, &key).await.map(Json).map_err(api_error)
}

/// POST /songs
pub async fn create_song(
    State(ctx): State<AppContext>,
    Json(song): Json<NewSong>,
) -> Result<(StatusCode, Json<Song>), ApiError> {
    let created = db::create_song(&ctx.db_pool, &song).await.map_err(api_error)?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// PUT /songs/:key - replaces the whole aggregate
pub async fn update_song(
    State(ctx): State<AppContext>,
    Path(key): Path<String>,
    Json(song): Json<NewSong>,
) -> ApiResult<Song> {
    let existing = db::get_song(&ctx.db_pool, &key).await.map_err(api_error)?;
    db::update_song(&ctx.db_pool, existing.id, &song)
        .await
        .map(Json)
        .map_err(api_error)
}

/// DELETE /songs/:key - also closes the session playing it
pub async fn delete_song(
    State(ctx): State<AppContext>,
    Path(key): Path<String>,
) -> ApiResult<StatusResponse> {
    let existing = db::get_song(&ctx.db_pool, &key).await.map_err(api_error)?;

    if ctx.state.close_session_for(existing.id).await {
        info!("Closed session for deleted song '{}'", existing.slug);
    }

    db::delete_song(&ctx.db_pool, existing.id).await.map_err(api_error)?;
    Ok(Json(StatusResponse::new("ok")))
}

/// GET /songs/:key/rich-lyrics?position=&part=
///
/// A document that cannot be fetched or parsed is reported in `error`
/// with a 200; only a missing song or document source is a 404.
pub async fn get_rich_lyrics(
    State(ctx): State<AppContext>,
    Path(key): Path<String>,
    Query(query): Query<RichLyricsQuery>,
) -> ApiResult<RichLyricsResponse> {
    let song = db::get_song(&ctx.db_pool, &key).await.map_err(api_error)?;
    let part = query
        .part
        .as_deref()
        .map(str::parse::<VoicePart>)
        .transpose()
        .map_err(api_error)?;

    let position = match query.position {
        Some(p) if p.is_finite() => p.max(0.0),
        Some(p) => return Err(api_error(Error::BadRequest(format!("invalid position {}", p)))),
        None => session_position_for(&ctx, song.id).await.unwrap_or(0.0),
    };

    let source = song.rich_lyrics.as_ref().ok_or_else(|| {
        api_error(chorale_common::Error::NotFound(format!(
            "rich lyrics for '{}'",
            song.slug
        )))
    })?;

    let (html, error) = match load_rich_lyrics(&ctx.http, source).await {
        Ok(document) => (document.render_at(position, part), None),
        Err(e) => {
            warn!("Rich lyrics for '{}' unavailable: {}", song.slug, e);
            (None, Some(e.to_string()))
        }
    };

    Ok(Json(RichLyricsResponse {
        song_id: song.id,
        position,
        mmss: format_mmss(position),
        html,
        error,
    }))
}

async fn session_position_for(ctx: &AppContext, song_id: Uuid) -> Option<f64> {
    let driver = ctx.state.active_session().await.ok()?;
    if driver.song_id() != song_id {
        return None;
    }
    Some(driver.snapshot().await.position)
}

// ============================================================================
// Session Lifecycle
// ============================================================================

/// POST /session/open - tears down any current session first
pub async fn open_session(
    State(ctx): State<AppContext>,
    Json(req): Json<OpenSessionRequest>,
) -> ApiResult<SessionSnapshot> {
    let song = db::get_song(&ctx.db_pool, &req.song).await.map_err(api_error)?;

    let driver = ctx
        .state
        .replace_session(song.id, |cancel| {
            SessionDriver::open(
                song,
                ctx.loader.clone(),
                ctx.clock.clone(),
                ctx.tuning.clone(),
                ctx.state.events.clone(),
                cancel,
            )
        })
        .await
        .map_err(api_error)?;

    Ok(Json(driver.snapshot().await))
}

/// POST /session/close
pub async fn close_session(State(ctx): State<AppContext>) -> Json<StatusResponse> {
    if ctx.state.close_session().await {
        Json(StatusResponse::new("closed"))
    } else {
        Json(StatusResponse::new("idle"))
    }
}

/// GET /session/state
pub async fn get_session_state(State(ctx): State<AppContext>) -> ApiResult<SessionSnapshot> {
    let driver = ctx.state.active_session().await.map_err(api_error)?;
    Ok(Json(driver.snapshot().await))
}

// ============================================================================
// Transport
// ============================================================================

/// Apply `apply` to the active session and answer with a fresh snapshot
async fn command<R>(
    ctx: &AppContext,
    apply: impl FnOnce(&mut PlaybackSession) -> crate::Result<R>,
) -> ApiResult<SessionSnapshot> {
    let driver = ctx.state.active_session().await.map_err(api_error)?;
    driver
        .with_session(|session| {
            apply(session)?;
            Ok(session.snapshot())
        })
        .await
        .map(Json)
        .map_err(api_error)
}

/// POST /session/toggle
pub async fn toggle_play_pause(State(ctx): State<AppContext>) -> ApiResult<SessionSnapshot> {
    command(&ctx, |s| s.toggle_play_pause()).await
}

/// POST /session/report
///
/// Reports are applied in order; the first one naming an unknown track
/// fails the request after the earlier ones took effect.
pub async fn report(
    State(ctx): State<AppContext>,
    Json(req): Json<ReportRequest>,
) -> ApiResult<SessionSnapshot> {
    command(&ctx, |s| {
        for r in &req.reports {
            s.apply_report(r)?;
        }
        Ok(())
    })
    .await
}

/// POST /session/seek
pub async fn seek(
    State(ctx): State<AppContext>,
    Json(req): Json<SeekRequest>,
) -> ApiResult<SessionSnapshot> {
    command(&ctx, |s| s.seek(req.position)).await
}

/// POST /session/chapter
pub async fn seek_to_chapter(
    State(ctx): State<AppContext>,
    Json(req): Json<ChapterRequest>,
) -> ApiResult<SessionSnapshot> {
    command(&ctx, |s| s.seek_to_chapter(req.chapter_id)).await
}

/// POST /session/volume
pub async fn set_volume(
    State(ctx): State<AppContext>,
    Json(req): Json<VolumeRequest>,
) -> ApiResult<SessionSnapshot> {
    command(&ctx, |s| s.set_volume(req.track_id, req.volume)).await
}

/// POST /session/mute
pub async fn set_mute(
    State(ctx): State<AppContext>,
    Json(req): Json<MuteRequest>,
) -> ApiResult<SessionSnapshot> {
    command(&ctx, |s| s.set_mute(req.track_id, req.muted)).await
}

/// POST /session/auto-restart
///
/// Enabling one flag disables the other; when both are sent as true the
/// chapter flag, applied last, wins.
pub async fn set_auto_restart(
    State(ctx): State<AppContext>,
    Json(req): Json<AutoRestartRequest>,
) -> ApiResult<SessionSnapshot> {
    command(&ctx, |s| {
        if let Some(enabled) = req.song {
            s.set_auto_restart_song(enabled)?;
        }
        if let Some(enabled) = req.chapter {
            s.set_auto_restart_chapter(enabled)?;
        }
        Ok(())
    })
    .await
}
