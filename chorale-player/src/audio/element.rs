//! Media elements
//!
//! A [`MediaElement`] is one playable track: a cursor, a gain, a mute flag
//! and a play/pause state. Each element keeps its own time, so elements
//! started together drift apart when one of them stalls.

use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;

use super::clock::Clock;

/// The element refused to start (for example autoplay policy)
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("play rejected: {0}")]
pub struct PlayRejected(pub String);

/// What a client observed about one track's element
#[derive(Debug, Clone, Deserialize)]
pub struct MediaReport {
    pub track_id: Uuid,
    /// Cursor in seconds at sampling time
    pub position: f64,
    /// Last command `seq` the client had applied when sampling
    pub seq: u64,
    #[serde(default)]
    pub paused: bool,
    /// Buffering: the element wants to play but has no data
    #[serde(default)]
    pub waiting: bool,
    #[serde(default)]
    pub ended: bool,
    /// Set when the client refused the last play command
    #[serde(default)]
    pub rejected: Option<String>,
    /// How long before sending the sample was taken
    #[serde(default)]
    pub age_ms: u64,
}

/// Control surface of a single playable track
pub trait MediaElement: Send {
    /// Cursor in seconds
    fn current_time(&self) -> f64;

    /// Move the cursor; values are clamped into `[0, duration]`
    fn set_current_time(&mut self, seconds: f64);

    /// Length in seconds
    fn duration(&self) -> f64;

    fn volume(&self) -> f32;

    /// Gain in `[0, 1]`
    fn set_volume(&mut self, volume: f32);

    fn muted(&self) -> bool;

    fn set_muted(&mut self, muted: bool);

    /// True when not advancing, including after reaching the end
    fn paused(&self) -> bool;

    fn play(&mut self) -> Result<(), PlayRejected>;

    fn pause(&mut self);

    /// Cursor reached the end while playing
    fn ended(&self) -> bool;

    /// Drop the decodable handle; the element is inert afterwards
    fn release(&mut self) {}

    /// Fold in a client report; false when the element ignored it
    ///
    /// Elements that keep their own time have nothing to learn.
    fn observe(&mut self, _report: &MediaReport) -> bool {
        false
    }

    /// Sequence number of the last command sent to a client, 0 if none
    fn command_seq(&self) -> u64 {
        0
    }
}

/// Headless element whose cursor advances with a [`Clock`]
///
/// Supports injected buffering stalls and play rejection so the engine's
/// drift handling can be exercised without audio hardware.
pub struct ClockedElement {
    clock: Arc<dyn Clock>,
    duration: f64,
    rate: f64,
    /// Cursor at `anchor_time`
    anchor_position: f64,
    anchor_time: f64,
    paused: bool,
    stalled: bool,
    volume: f32,
    muted: bool,
    reject_play: Option<String>,
    released: bool,
}

impl ClockedElement {
    /// Paused element at position 0, full volume, unmuted
    pub fn new(clock: Arc<dyn Clock>, duration: f64) -> Self {
        let now = clock.now();
        Self {
            clock,
            duration: duration.max(0.0),
            rate: 1.0,
            anchor_position: 0.0,
            anchor_time: now,
            paused: true,
            stalled: false,
            volume: 1.0,
            muted: false,
            reject_play: None,
            released: false,
        }
    }

    /// Playback speed relative to the clock (1.0 = real time)
    pub fn with_rate(mut self, rate: f64) -> Self {
        self.rate = rate.max(0.0);
        self
    }

    /// Freeze the cursor as if the element ran out of buffered data
    pub fn stall(&mut self) {
        self.rebase();
        self.stalled = true;
    }

    /// Resume advancing after [`stall`](Self::stall)
    pub fn resume_buffering(&mut self) {
        self.rebase();
        self.stalled = false;
    }

    /// Make subsequent `play()` calls fail with `reason`
    pub fn reject_play(&mut self, reason: Option<&str>) {
        self.reject_play = reason.map(str::to_string);
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Re-anchor the cursor on an observation taken at clock reading `at`
    ///
    /// While advancing, the cursor extrapolates from the observation.
    pub fn resync(&mut self, position: f64, at: f64, paused: bool) {
        self.anchor_position = if position.is_finite() {
            position.clamp(0.0, self.duration)
        } else {
            self.anchor_position
        };
        self.anchor_time = at.min(self.clock.now());
        self.paused = paused;
    }

    fn advancing(&self) -> bool {
        !self.paused && !self.stalled && !self.released
    }

    fn raw_position(&self) -> f64 {
        if !self.advancing() {
            return self.anchor_position;
        }
        let elapsed = (self.clock.now() - self.anchor_time).max(0.0);
        (self.anchor_position + elapsed * self.rate).min(self.duration)
    }

    fn at_end(&self) -> bool {
        self.duration > 0.0 && self.raw_position() >= self.duration
    }

    /// Fold elapsed time into the anchor
    fn rebase(&mut self) {
        let position = self.raw_position();
        if self.advancing() && position >= self.duration {
            // Reaching the end pauses the element
            self.paused = true;
        }
        self.anchor_position = position;
        self.anchor_time = self.clock.now();
    }
}

impl MediaElement for ClockedElement {
    fn current_time(&self) -> f64 {
        self.raw_position()
    }

    fn set_current_time(&mut self, seconds: f64) {
        self.rebase();
        self.anchor_position = if seconds.is_finite() {
            seconds.clamp(0.0, self.duration)
        } else {
            0.0
        };
    }

    fn duration(&self) -> f64 {
        self.duration
    }

    fn volume(&self) -> f32 {
        self.volume
    }

    fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
    }

    fn muted(&self) -> bool {
        self.muted
    }

    fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
    }

    fn paused(&self) -> bool {
        self.paused || self.released || self.at_end()
    }

    fn play(&mut self) -> Result<(), PlayRejected> {
        if self.released {
            return Err(PlayRejected("element released".to_string()));
        }
        if let Some(reason) = &self.reject_play {
            return Err(PlayRejected(reason.clone()));
        }
        self.rebase();
        self.paused = false;
        Ok(())
    }

    fn pause(&mut self) {
        self.rebase();
        self.paused = true;
    }

    fn ended(&self) -> bool {
        !self.released && self.at_end()
    }

    fn release(&mut self) {
        self.rebase();
        self.paused = true;
        self.released = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::ManualClock;

    fn element(duration: f64) -> (Arc<ManualClock>, ClockedElement) {
        let clock = Arc::new(ManualClock::new());
        let element = ClockedElement::new(clock.clone(), duration);
        (clock, element)
    }

    #[test]
    fn test_cursor_follows_clock_while_playing() {
        let (clock, mut el) = element(10.0);
        assert!(el.paused());

        el.play().unwrap();
        clock.advance(1.5);
        assert!((el.current_time() - 1.5).abs() < 1e-9);

        el.pause();
        clock.advance(3.0);
        assert!((el.current_time() - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_stall_freezes_cursor() {
        let (clock, mut el) = element(10.0);
        el.play().unwrap();
        clock.advance(1.0);
        el.stall();
        clock.advance(2.0);
        assert!((el.current_time() - 1.0).abs() < 1e-9);
        assert!(!el.paused());

        el.resume_buffering();
        clock.advance(0.5);
        assert!((el.current_time() - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_end_pauses_and_seek_needs_play() {
        let (clock, mut el) = element(2.0);
        el.play().unwrap();
        clock.advance(5.0);
        assert_eq!(el.current_time(), 2.0);
        assert!(el.ended());
        assert!(el.paused());

        el.set_current_time(0.0);
        assert!(!el.ended());
        assert!(el.paused());
        clock.advance(1.0);
        assert_eq!(el.current_time(), 0.0);

        el.play().unwrap();
        clock.advance(1.0);
        assert!((el.current_time() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_seek_clamps() {
        let (_clock, mut el) = element(3.0);
        el.set_current_time(-2.0);
        assert_eq!(el.current_time(), 0.0);
        el.set_current_time(9.0);
        assert_eq!(el.current_time(), 3.0);
    }

    #[test]
    fn test_rejected_play_stays_paused() {
        let (_clock, mut el) = element(3.0);
        el.reject_play(Some("autoplay blocked"));
        assert_eq!(el.play(), Err(PlayRejected("autoplay blocked".to_string())));
        assert!(el.paused());
    }

    #[test]
    fn test_resync_extrapolates_from_observation() {
        let (clock, mut el) = element(10.0);
        el.play().unwrap();
        clock.advance(5.0);

        // Sampled 0.5s ago at 3.0
        el.resync(3.0, clock.now() - 0.5, false);
        assert!((el.current_time() - 3.5).abs() < 1e-9);

        el.resync(4.0, clock.now(), true);
        clock.advance(1.0);
        assert!((el.current_time() - 4.0).abs() < 1e-9);
        assert!(el.paused());
    }

    #[test]
    fn test_release_is_terminal() {
        let (clock, mut el) = element(3.0);
        el.play().unwrap();
        el.release();
        clock.advance(1.0);
        assert!(el.is_released());
        assert!(el.paused());
        assert_eq!(el.current_time(), 0.0);
        assert!(el.play().is_err());
    }
}
