//! # Chorale Player Library (chorale-player)
//!
//! Multi-track choir playback engine.
//!
//! **Purpose:** Load one audio track per voice part, keep the tracks aligned
//! to a single true position while playing, seeking and looping, enforce the
//! voice-part mode policy, and expose the session over HTTP/SSE.
//!
//! **Architecture:** Track loader (bounded, idempotent) feeding a synchronous
//! `PlaybackSession` driven by a periodic tick task.

pub mod api;
pub mod audio;
pub mod config;
pub mod error;
pub mod playback;
pub mod state;

pub use error::{Error, Result};
pub use state::SharedState;
