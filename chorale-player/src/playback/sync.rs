//! Track synchronizer
//!
//! Pulls tracks that run ahead of the true position back to it. Lagging
//! tracks are left alone: the position authority follows the laggard.

/// Slack for clock readings that land a hair short of the interval
const CADENCE_EPSILON: f64 = 1e-6;

/// Periodic corrective-seek policy
#[derive(Debug, Clone)]
pub struct TrackSynchronizer {
    tolerance: f64,
    interval: f64,
    last_sync: Option<f64>,
}

impl TrackSynchronizer {
    pub fn new(tolerance: f64, interval: f64) -> Self {
        Self {
            tolerance: tolerance.max(0.0),
            interval: interval.max(0.0),
            last_sync: None,
        }
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    /// True when a sync pass should run now; records the pass
    pub fn due(&mut self, now: f64) -> bool {
        match self.last_sync {
            Some(last) if now - last + CADENCE_EPSILON < self.interval => false,
            _ => {
                self.last_sync = Some(now);
                true
            }
        }
    }

    /// Restart the cadence (after a seek)
    pub fn reset(&mut self) {
        self.last_sync = None;
    }

    /// Corrective seek target for a track at `cursor`, if it needs one
    pub fn correction(&self, cursor: f64, true_position: f64) -> Option<f64> {
        if cursor - true_position > self.tolerance {
            Some(true_position)
        } else {
            None
        }
    }
}
