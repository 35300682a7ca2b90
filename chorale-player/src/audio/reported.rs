//! Client-driven media elements
//!
//! The audio itself plays in the UI client. A [`ReportedElement`] is the
//! engine's view of one client track: every control call becomes a
//! [`MediaCommand`] on the event bus, and the client's [`MediaReport`]s
//! re-anchor the cursor. Between reports the cursor extrapolates on the
//! engine clock.

use std::sync::Arc;

use chorale_common::events::{ChoraleEvent, EventBus, MediaCommand};
use tracing::debug;
use uuid::Uuid;

use super::clock::Clock;
use super::element::{ClockedElement, MediaElement, MediaReport, PlayRejected};

pub struct ReportedElement {
    track_id: Uuid,
    local: ClockedElement,
    clock: Arc<dyn Clock>,
    commands: EventBus,
    seq: u64,
}

impl ReportedElement {
    pub fn new(track_id: Uuid, clock: Arc<dyn Clock>, duration: f64, commands: EventBus) -> Self {
        Self {
            track_id,
            local: ClockedElement::new(Arc::clone(&clock), duration),
            clock,
            commands,
            seq: 0,
        }
    }

    fn send(&mut self, command: MediaCommand) {
        self.seq += 1;
        self.commands.emit_lossy(ChoraleEvent::TrackCommand {
            track_id: self.track_id,
            seq: self.seq,
            command,
            timestamp: chrono::Utc::now(),
        });
    }
}

impl MediaElement for ReportedElement {
    fn current_time(&self) -> f64 {
        self.local.current_time()
    }

    fn set_current_time(&mut self, seconds: f64) {
        self.local.set_current_time(seconds);
        let position = self.local.current_time();
        self.send(MediaCommand::Seek { position });
    }

    fn duration(&self) -> f64 {
        self.local.duration()
    }

    fn volume(&self) -> f32 {
        self.local.volume()
    }

    fn set_volume(&mut self, volume: f32) {
        self.local.set_volume(volume);
        let volume = self.local.volume();
        self.send(MediaCommand::Volume { volume });
    }

    fn muted(&self) -> bool {
        self.local.muted()
    }

    fn set_muted(&mut self, muted: bool) {
        self.local.set_muted(muted);
        self.send(MediaCommand::Mute { muted });
    }

    fn paused(&self) -> bool {
        self.local.paused()
    }

    /// Optimistic: a refusal arrives later as a report
    fn play(&mut self) -> Result<(), PlayRejected> {
        self.local.play()?;
        self.send(MediaCommand::Play);
        Ok(())
    }

    fn pause(&mut self) {
        self.local.pause();
        self.send(MediaCommand::Pause);
    }

    fn ended(&self) -> bool {
        self.local.ended()
    }

    fn release(&mut self) {
        if self.local.is_released() {
            return;
        }
        self.local.release();
        self.send(MediaCommand::Release);
    }

    /// Reports sampled before the client applied the latest command are stale
    fn observe(&mut self, report: &MediaReport) -> bool {
        if self.local.is_released() || report.seq < self.seq {
            debug!(
                "Ignoring report for {} at seq {} (sent {})",
                self.track_id, report.seq, self.seq
            );
            return false;
        }

        if report.waiting {
            self.local.stall();
        } else {
            self.local.resume_buffering();
        }

        let sampled_at = self.clock.now() - report.age_ms as f64 / 1000.0;
        let position = if report.ended {
            self.local.duration()
        } else {
            report.position
        };
        let paused = report.paused || report.ended || report.rejected.is_some();
        self.local.resync(position, sampled_at, paused);
        true
    }

    fn command_seq(&self) -> u64 {
        self.seq
    }
}
