//! Playback position authority
//!
//! Owns the song's true position. While playing it advances by elapsed
//! clock time; each tick the earliest cursor among audible, running tracks
//! may pull it back, never forward.

const CADENCE_EPSILON: f64 = 1e-6;

/// Single source of truth for the song position
#[derive(Debug, Clone)]
pub struct PositionAuthority {
    /// Seconds
    true_position: f64,
    /// Seconds
    duration: f64,
    /// Clock reading at the last advance
    last_tick: Option<f64>,
    /// Position most recently published to the UI
    ui_position: f64,
    last_ui_update: Option<f64>,
    ui_interval: f64,
}

impl PositionAuthority {
    pub fn new(duration: f64, ui_interval: f64) -> Self {
        Self {
            true_position: 0.0,
            duration: duration.max(0.0),
            last_tick: None,
            ui_position: 0.0,
            last_ui_update: None,
            ui_interval: ui_interval.max(0.0),
        }
    }

    pub fn position(&self) -> f64 {
        self.true_position
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn ui_position(&self) -> f64 {
        self.ui_position
    }

    /// Advance by clock time elapsed since the previous call
    ///
    /// When `playing` is false the clock reading is recorded but the
    /// position holds, so resuming does not jump forward.
    pub fn advance(&mut self, now: f64, playing: bool) {
        if playing {
            if let Some(last) = self.last_tick {
                let elapsed = (now - last).max(0.0);
                self.true_position = (self.true_position + elapsed).min(self.duration);
            }
        }
        self.last_tick = Some(now);
    }

    /// Pull the position back to `earliest` when that track is behind
    ///
    /// Returns the new position when a correction was applied.
    pub fn reconcile(&mut self, earliest: Option<f64>) -> Option<f64> {
        match earliest {
            Some(earliest) if earliest < self.true_position => {
                self.true_position = earliest.max(0.0);
                Some(self.true_position)
            }
            _ => None,
        }
    }

    /// Jump to `target` and restart the cadence timers
    pub fn seek(&mut self, target: f64, now: f64) {
        self.true_position = target.clamp(0.0, self.duration);
        self.last_tick = Some(now);
        self.ui_position = self.true_position;
        self.last_ui_update = None;
    }

    /// Snap to the end of the song
    pub fn finish(&mut self, now: f64) {
        self.true_position = self.duration;
        self.ui_position = self.duration;
        self.last_tick = Some(now);
    }

    /// Publish the position when the UI interval has elapsed
    pub fn take_ui_update(&mut self, now: f64) -> Option<f64> {
        let due = match self.last_ui_update {
            None => true,
            Some(last) => now - last + CADENCE_EPSILON >= self.ui_interval,
        };
        if !due {
            return None;
        }
        self.last_ui_update = Some(now);
        self.ui_position = self.true_position;
        Some(self.ui_position)
    }
}

/// Minimum of the sampled cursors, `None` when nothing was sampled
pub fn earliest_position<I>(cursors: I) -> Option<f64>
where
    I: IntoIterator<Item = f64>,
{
    cursors.into_iter().fold(None, |min, c| match min {
        Some(m) if m <= c => Some(m),
        _ => Some(c),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advances_by_elapsed_time_only_while_playing() {
        let mut auth = PositionAuthority::new(180.0, 0.1);
        auth.advance(0.0, true);
        auth.advance(0.05, true);
        auth.advance(0.10, true);
        assert!((auth.position() - 0.10).abs() < 1e-9);

        auth.advance(5.0, false);
        assert!((auth.position() - 0.10).abs() < 1e-9);

        // No catch-up for the paused stretch
        auth.advance(5.05, true);
        assert!((auth.position() - 0.15).abs() < 1e-9);
    }

    #[test]
    fn test_reconcile_is_backward_only() {
        let mut auth = PositionAuthority::new(180.0, 0.1);
        auth.seek(10.0, 0.0);

        assert_eq!(auth.reconcile(Some(12.0)), None);
        assert_eq!(auth.position(), 10.0);

        assert_eq!(auth.reconcile(Some(9.5)), Some(9.5));
        assert_eq!(auth.position(), 9.5);

        assert_eq!(auth.reconcile(None), None);
        assert_eq!(auth.position(), 9.5);
    }

    #[test]
    fn test_drift_samples_never_push_forward() {
        // Property: over arbitrary sample sequences the position only moves
        // forward by elapsed time, and samples only ever move it backward.
        let samples = [10.3, 9.7, 10.9, 8.0, 12.0, 9.99, 10.0, 30.0, 0.5];
        let mut auth = PositionAuthority::new(180.0, 0.1);
        auth.seek(10.0, 0.0);

        for sample in samples {
            let before = auth.position();
            auth.reconcile(Some(sample));
            let after = auth.position();
            if sample >= before {
                assert_eq!(after, before, "sample {} ahead moved position", sample);
            } else {
                assert!(after <= before, "sample {} behind moved position forward", sample);
                assert_eq!(after, sample);
            }
        }
    }

    #[test]
    fn test_earliest_wins() {
        assert_eq!(earliest_position([12.0, 11.8, 12.2, 11.95]), Some(11.8));
        assert_eq!(earliest_position(std::iter::empty()), None);
    }

    #[test]
    fn test_clamped_to_duration() {
        let mut auth = PositionAuthority::new(2.0, 0.1);
        auth.advance(0.0, true);
        auth.advance(5.0, true);
        assert_eq!(auth.position(), 2.0);

        auth.seek(-5.0, 5.0);
        assert_eq!(auth.position(), 0.0);
        auth.seek(500.0, 5.0);
        assert_eq!(auth.position(), 2.0);
    }

    #[test]
    fn test_ui_cadence() {
        let mut auth = PositionAuthority::new(180.0, 0.1);
        auth.advance(0.0, true);
        assert_eq!(auth.take_ui_update(0.0), Some(0.0));

        auth.advance(0.05, true);
        assert_eq!(auth.take_ui_update(0.05), None);

        auth.advance(0.10, true);
        assert!(auth.take_ui_update(0.10).is_some());

        // Seek resets the cadence so the next tick publishes
        auth.seek(60.0, 0.12);
        assert_eq!(auth.ui_position(), 60.0);
        assert_eq!(auth.take_ui_update(0.12), Some(60.0));
    }
}
