//! Voice-part mode manager
//!
//! Three mutually exclusive modes (voice-part solo, instrumental, all-mix)
//! plus the initial "none" state. A track becoming audible selects the mode
//! matching its voice part; every track the new mode does not admit must
//! then be silenced by the caller.

use chorale_common::events::PlaybackMode;
use chorale_common::model::VoicePart;
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct ModeManager {
    mode: PlaybackMode,
}

impl ModeManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(&self) -> PlaybackMode {
        self.mode
    }

    /// A track of `part` just became audible
    ///
    /// Returns `(old, new)` when the mode changed.
    pub fn on_audible(&mut self, part: VoicePart) -> Option<(PlaybackMode, PlaybackMode)> {
        let new_mode = PlaybackMode::for_part(part);
        if new_mode == self.mode {
            return None;
        }
        let old_mode = std::mem::replace(&mut self.mode, new_mode);
        debug!("Mode {} -> {}", old_mode, new_mode);
        Some((old_mode, new_mode))
    }

    /// Whether a track of `part` may stay audible
    pub fn admits(&self, part: VoicePart) -> bool {
        self.mode.admits(part)
    }
}
