//! Event types for the Chorale event system
//!
//! Provides shared event definitions and an EventBus used by the player's
//! SSE stream.

mod playback_types;

pub use playback_types::{LoopPolicy, MediaCommand, PlaybackMode, PlaybackState};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::model::VoicePart;

type Timestamp = chrono::DateTime<chrono::Utc>;

/// Chorale event types
///
/// Events are broadcast via EventBus and serialized for SSE transmission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ChoraleEvent {
    /// A playback session was opened for a song
    SessionOpened {
        song_id: Uuid,
        title: String,
        /// Number of tracks requested
        track_count: usize,
        timestamp: Timestamp,
    },

    /// A track finished loading and joined the session
    TrackLoaded {
        track_id: Uuid,
        voice_part: VoicePart,
        /// Seconds
        duration: f64,
        timestamp: Timestamp,
    },

    /// A track failed to load; the session continues without it
    TrackLoadFailed {
        track_id: Uuid,
        voice_part: VoicePart,
        reason: String,
        timestamp: Timestamp,
    },

    /// Playback state changed (Playing ↔ Paused)
    PlaybackStateChanged {
        old_state: PlaybackState,
        new_state: PlaybackState,
        timestamp: Timestamp,
    },

    /// Position update on the UI cadence
    PlaybackPosition {
        song_id: Uuid,
        /// Seconds
        position: f64,
        /// Seconds
        duration: f64,
        playing: bool,
        timestamp: Timestamp,
    },

    /// True position entered a different chapter
    ChapterChanged {
        chapter_id: Option<Uuid>,
        title: Option<String>,
        timestamp: Timestamp,
    },

    /// Chapter loop jumped back to the chapter start
    ChapterLooped {
        chapter_id: Uuid,
        /// Seconds
        start: f64,
        timestamp: Timestamp,
    },

    /// Song auto-restarted from the beginning
    SongRestarted { song_id: Uuid, timestamp: Timestamp },

    /// Tracks reached the end with no auto-restart active
    SongEnded { song_id: Uuid, timestamp: Timestamp },

    /// Track gain changed
    VolumeChanged {
        track_id: Uuid,
        volume: f32,
        timestamp: Timestamp,
    },

    /// Track mute flag changed
    MuteChanged {
        track_id: Uuid,
        muted: bool,
        timestamp: Timestamp,
    },

    /// Voice-part mode changed
    ModeChanged {
        old_mode: PlaybackMode,
        new_mode: PlaybackMode,
        timestamp: Timestamp,
    },

    /// Loop policy changed
    LoopPolicyChanged { policy: LoopPolicy, timestamp: Timestamp },

    /// Command for the client element of one track
    TrackCommand {
        track_id: Uuid,
        /// Per-track sequence number, increasing by one per command
        seq: u64,
        command: MediaCommand,
        timestamp: Timestamp,
    },

    /// A track refused to start playing
    PlaybackRejected {
        track_id: Uuid,
        reason: String,
        timestamp: Timestamp,
    },

    /// Session was torn down
    SessionClosed { song_id: Uuid, timestamp: Timestamp },
}

impl ChoraleEvent {
    /// Get event type as string for SSE event names
    pub fn event_type(&self) -> &'static str {
        match self {
            ChoraleEvent::SessionOpened { .. } => "SessionOpened",
            ChoraleEvent::TrackLoaded { .. } => "TrackLoaded",
            ChoraleEvent::TrackLoadFailed { .. } => "TrackLoadFailed",
            ChoraleEvent::PlaybackStateChanged { .. } => "PlaybackStateChanged",
            ChoraleEvent::PlaybackPosition { .. } => "PlaybackPosition",
            ChoraleEvent::ChapterChanged { .. } => "ChapterChanged",
            ChoraleEvent::ChapterLooped { .. } => "ChapterLooped",
            ChoraleEvent::SongRestarted { .. } => "SongRestarted",
            ChoraleEvent::SongEnded { .. } => "SongEnded",
            ChoraleEvent::VolumeChanged { .. } => "VolumeChanged",
            ChoraleEvent::MuteChanged { .. } => "MuteChanged",
            ChoraleEvent::ModeChanged { .. } => "ModeChanged",
            ChoraleEvent::LoopPolicyChanged { .. } => "LoopPolicyChanged",
            ChoraleEvent::TrackCommand { .. } => "TrackCommand",
            ChoraleEvent::PlaybackRejected { .. } => "PlaybackRejected",
            ChoraleEvent::SessionClosed { .. } => "SessionClosed",
        }
    }
}

/// Broadcast bus for [`ChoraleEvent`]s
///
/// Slow subscribers lose the oldest events once `capacity` is exceeded.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ChoraleEvent>,
    capacity: usize,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<ChoraleEvent> {
        self.tx.subscribe()
    }

    /// Emit an event; `Err` when nobody is listening
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: ChoraleEvent,
    ) -> Result<usize, broadcast::error::SendError<ChoraleEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: ChoraleEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
