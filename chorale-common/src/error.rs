//! Common error types for Chorale

use thiserror::Error;

/// Common result type for Chorale operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across Chorale services
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Write collided with an existing record (e.g. duplicate slug)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Rich lyric document could not be retrieved
    #[error("Could not load lyric document: {0}")]
    RichDocumentFetch(String),

    /// Rich lyric document contained no timed sections
    #[error("Lyric document has no timed sections: {0}")]
    RichDocumentParse(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}
