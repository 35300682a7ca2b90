//! Error types for chorale-player
//!
//! Component-local failures (a single track's load or play attempt) are
//! contained by the engine and surfaced as warnings or events; the variants
//! here are what reaches callers of the session and the HTTP API.

use thiserror::Error;
use uuid::Uuid;

use crate::playback::loader::LoadFailure;

/// Main error type for chorale-player
#[derive(Error, Debug)]
pub enum Error {
    /// Errors from the shared library (persistence, rich lyrics, config)
    #[error(transparent)]
    Common(#[from] chorale_common::Error),

    /// Configuration file loading errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// HTTP server errors
    #[error("HTTP server error: {0}")]
    Http(String),

    /// A track could not be fetched or decoded
    #[error("Load failure: {0}")]
    Load(#[from] LoadFailure),

    /// A track refused to start playing
    #[error("Playback rejected for track {track_id}: {reason}")]
    PlaybackRejected { track_id: Uuid, reason: String },

    /// No playback session is open
    #[error("No active playback session")]
    NoSession,

    /// Track id is not part of the active session
    #[error("Unknown track: {0}")]
    UnknownTrack(Uuid),

    /// Chapter id is not part of the active song
    #[error("Unknown chapter: {0}")]
    UnknownChapter(Uuid),

    /// Opening a session was abandoned for a newer open or a close
    #[error("Session open cancelled: {0}")]
    Cancelled(String),

    /// Invalid state for operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Invalid request
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Other errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Convenience Result type using chorale-player Error
pub type Result<T> = std::result::Result<T, Error>;
