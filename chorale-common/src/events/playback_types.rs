//! Playback-related type definitions
//!
//! Supporting types for transport state and voice-part modes.

use serde::{Deserialize, Serialize};

use crate::model::{ModeCategory, VoicePart};

/// Transport state of a playback session
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    Playing,
    Paused,
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlaybackState::Playing => write!(f, "playing"),
            PlaybackState::Paused => write!(f, "paused"),
        }
    }
}

impl PlaybackState {
    pub fn from_playing(playing: bool) -> Self {
        if playing {
            PlaybackState::Playing
        } else {
            PlaybackState::Paused
        }
    }
}

/// Which category of tracks is currently allowed to be audible
///
/// `None` is the state before the listener has picked anything.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(tag = "mode", content = "part", rename_all = "snake_case")]
pub enum PlaybackMode {
    #[default]
    None,
    /// One sung part solo
    VoicePart(VoicePart),
    /// Accompaniment only
    Instrumental,
    /// Full mix only
    AllMix,
}

impl PlaybackMode {
    /// Mode selected by making a track of `part` audible
    pub fn for_part(part: VoicePart) -> Self {
        match part.category() {
            ModeCategory::VoicePart => PlaybackMode::VoicePart(part),
            ModeCategory::Instrumental => PlaybackMode::Instrumental,
            ModeCategory::AllMix => PlaybackMode::AllMix,
        }
    }

    /// Whether a track of `part` may stay audible under this mode
    pub fn admits(&self, part: VoicePart) -> bool {
        match self {
            PlaybackMode::None => true,
            PlaybackMode::VoicePart(p) => *p == part,
            PlaybackMode::Instrumental => part == VoicePart::Instrumental,
            PlaybackMode::AllMix => part == VoicePart::All,
        }
    }
}

impl std::fmt::Display for PlaybackMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlaybackMode::None => write!(f, "none"),
            PlaybackMode::VoicePart(p) => write!(f, "{}-solo", p),
            PlaybackMode::Instrumental => write!(f, "instrumental-solo"),
            PlaybackMode::AllMix => write!(f, "all-mix"),
        }
    }
}

/// Which auto-restart policy is active (at most one)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LoopPolicy {
    #[default]
    Off,
    /// Restart the song from 0 when the tracks end
    Song,
    /// Restart the current chapter when its end boundary is reached
    Chapter,
}

/// Instruction for the client element playing one track
///
/// The engine decides every cursor, gain and transport change; clients
/// apply these in `seq` order and echo the last applied `seq` in their
/// reports.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum MediaCommand {
    Play,
    Pause,
    Seek {
        /// Seconds
        position: f64,
    },
    Volume { volume: f32 },
    Mute { muted: bool },
    /// Unload the element; it is not used again
    Release,
}
