//! # Chorale Common Library
//!
//! Shared code for the Chorale services including:
//! - Song aggregate model (tracks, lyrics, chapters, voice parts)
//! - Database initialization and song persistence
//! - Event types (ChoraleEvent enum)
//! - Configuration loading and root folder resolution
//! - Lyric timelines and rich lyric documents

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod lyrics;
pub mod model;
pub mod rich_lyrics;

pub use error::{Error, Result};
pub use model::{ChapterKind, ChapterMarker, LyricLine, ModeCategory, Song, Track, VoicePart};
