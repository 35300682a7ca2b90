//! Playback session
//!
//! Owns every loaded track of one song and keeps them aligned. All
//! operations are synchronous: a seek is applied to the true position and
//! to every cursor before the next tick reads them. The periodic
//! [`tick`](PlaybackSession::tick) folds position advance, drift
//! correction, chapter looping and end-of-song handling into one pass, each
//! step safe to re-run against a position another step already moved.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chorale_common::events::{ChoraleEvent, LoopPolicy, PlaybackMode, PlaybackState};
use chorale_common::lyrics::active_line_index;
use chorale_common::model::{ChapterKind, LyricLine, Song, Track, VoicePart};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::chapters::ChapterTimeline;
use super::loader::{LoadWarning, LoadedTrack};
use super::mode::ModeManager;
use super::position::{earliest_position, PositionAuthority};
use super::sync::TrackSynchronizer;
use crate::audio::{Clock, MediaElement, MediaReport};
use crate::config::EngineTuning;
use crate::error::{Error, Result};

/// A track's playable element plus the resources backing it
pub struct LoadedAudioSource {
    pub track: Track,
    pub element: Box<dyn MediaElement>,
    loaded: Option<Arc<LoadedTrack>>,
}

impl LoadedAudioSource {
    pub fn new(track: Track, element: Box<dyn MediaElement>) -> Self {
        Self {
            track,
            element,
            loaded: None,
        }
    }

    /// Attach the loader output whose transient file this source plays from
    pub fn with_loaded(mut self, loaded: Arc<LoadedTrack>) -> Self {
        self.loaded = Some(loaded);
        self
    }

    fn release(&mut self) {
        self.element.pause();
        self.element.release();
        if let Some(loaded) = self.loaded.take() {
            loaded.resource.release();
        }
    }
}

struct TrackState {
    source: LoadedAudioSource,
    /// Gain given back when a silenced track is unmuted
    restore_volume: f32,
}

impl TrackState {
    fn part(&self) -> VoicePart {
        self.source.track.voice_part
    }

    fn muted(&self) -> bool {
        self.source.element.muted()
    }

    fn audible(&self) -> bool {
        !self.muted() && self.source.element.volume() > 0.0
    }

    /// Unmuted and advancing
    fn running(&self) -> bool {
        !self.muted() && !self.source.element.paused()
    }
}

/// Per-track view for the UI
#[derive(Debug, Clone, Serialize)]
pub struct TrackSnapshot {
    pub track_id: Uuid,
    pub voice_part: VoicePart,
    /// Seconds
    pub position: f64,
    /// Seconds
    pub duration: f64,
    pub volume: f32,
    pub muted: bool,
    pub paused: bool,
    /// Last command sequence number sent to the client element
    pub seq: u64,
}

/// Current chapter with its resolved end boundary
#[derive(Debug, Clone, Serialize)]
pub struct ChapterSnapshot {
    pub id: Uuid,
    pub title: String,
    pub kind: ChapterKind,
    pub start: f64,
    pub end: f64,
}

/// Everything the UI renders controls and highlighting from
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub song_id: Uuid,
    pub title: String,
    pub state: PlaybackState,
    pub is_playing: bool,
    /// True position, seconds
    pub position: f64,
    /// Position as last published on the UI cadence
    pub ui_position: f64,
    pub duration: f64,
    pub tracks: Vec<TrackSnapshot>,
    pub volumes: HashMap<Uuid, f32>,
    pub muted: HashMap<Uuid, bool>,
    pub auto_restart_song: bool,
    pub auto_restart_chapter: bool,
    pub loop_policy: LoopPolicy,
    pub mode: PlaybackMode,
    pub current_chapter: Option<ChapterSnapshot>,
    pub active_lyric: Option<LyricLine>,
    /// Row of `active_lyric` in the song's lyric table
    pub active_lyric_index: Option<usize>,
    pub load_warnings: Vec<LoadWarning>,
}

/// One song's playback: track registry, transport and tick logic
pub struct PlaybackSession {
    song: Song,
    clock: Arc<dyn Clock>,
    tuning: EngineTuning,
    tracks: HashMap<Uuid, TrackState>,
    /// Track ids in song order
    order: Vec<Uuid>,
    authority: PositionAuthority,
    sync: TrackSynchronizer,
    chapters: ChapterTimeline,
    modes: ModeManager,
    playing: bool,
    auto_restart_song: bool,
    auto_restart_chapter: bool,
    /// Alignment pause in progress; unmuted tracks resume at this clock reading
    resume_at: Option<f64>,
    /// The end of the current playthrough was already acted on
    end_handled: bool,
    last_published: Option<f64>,
    alive: Arc<AtomicBool>,
    torn_down: bool,
    warnings: Vec<LoadWarning>,
    events: Vec<ChoraleEvent>,
}

impl PlaybackSession {
    /// Build a paused session at position 0
    ///
    /// Duration is the longest loaded track. Tracks sharing the first
    /// track's mode category start audible; the others start muted so only
    /// one category is heard.
    pub fn new(
        song: Song,
        sources: Vec<LoadedAudioSource>,
        warnings: Vec<LoadWarning>,
        clock: Arc<dyn Clock>,
        tuning: EngineTuning,
    ) -> Self {
        let song = song.normalized();
        let duration = sources
            .iter()
            .map(|s| s.element.duration())
            .fold(0.0_f64, f64::max);
        let initial_category = sources.first().map(|s| s.track.voice_part.category());

        let mut tracks = HashMap::with_capacity(sources.len());
        let mut order = Vec::with_capacity(sources.len());
        for mut source in sources {
            source.element.pause();
            source.element.set_current_time(0.0);
            let muted = Some(source.track.voice_part.category()) != initial_category;
            source.element.set_muted(muted);
            let restore_volume = match source.element.volume() {
                v if v > 0.0 => v,
                _ => 1.0,
            };
            order.push(source.track.id);
            tracks.insert(
                source.track.id,
                TrackState {
                    source,
                    restore_volume,
                },
            );
        }

        let now = clock.now();
        let mut authority = PositionAuthority::new(duration, tuning.ui_interval_s());
        authority.seek(0.0, now);
        let mut chapters = ChapterTimeline::new(song.chapters.clone(), duration);
        chapters.check_boundary(0.0);

        info!(
            "Session for '{}' ready: {} tracks, {:.2}s",
            song.title,
            order.len(),
            duration
        );

        Self {
            sync: TrackSynchronizer::new(tuning.drift_tolerance_s, tuning.sync_interval_s()),
            song,
            clock,
            tuning,
            tracks,
            order,
            authority,
            chapters,
            modes: ModeManager::new(),
            playing: false,
            auto_restart_song: false,
            auto_restart_chapter: false,
            resume_at: None,
            end_handled: false,
            last_published: None,
            alive: Arc::new(AtomicBool::new(true)),
            torn_down: false,
            warnings,
            events: Vec::new(),
        }
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn song(&self) -> &Song {
        &self.song
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn position(&self) -> f64 {
        self.authority.position()
    }

    pub fn duration(&self) -> f64 {
        self.authority.duration()
    }

    pub fn mode(&self) -> PlaybackMode {
        self.modes.mode()
    }

    pub fn loop_policy(&self) -> LoopPolicy {
        if self.auto_restart_song {
            LoopPolicy::Song
        } else if self.auto_restart_chapter {
            LoopPolicy::Chapter
        } else {
            LoopPolicy::Off
        }
    }

    /// Liveness flag shared with the tick task; cleared when teardown starts
    pub fn liveness(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.alive)
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let position = self.authority.position();
        let lyric_index = active_line_index(&self.song.lyrics, position);
        let tracks: Vec<TrackSnapshot> = self
            .ordered()
            .map(|state| {
                let element = &state.source.element;
                TrackSnapshot {
                    track_id: state.source.track.id,
                    voice_part: state.part(),
                    position: element.current_time(),
                    duration: element.duration(),
                    volume: element.volume(),
                    muted: element.muted(),
                    paused: element.paused(),
                    seq: element.command_seq(),
                }
            })
            .collect();

        SessionSnapshot {
            song_id: self.song.id,
            title: self.song.title.clone(),
            state: PlaybackState::from_playing(self.playing),
            is_playing: self.playing,
            position,
            ui_position: self.authority.ui_position(),
            duration: self.authority.duration(),
            volumes: tracks.iter().map(|t| (t.track_id, t.volume)).collect(),
            muted: tracks.iter().map(|t| (t.track_id, t.muted)).collect(),
            tracks,
            auto_restart_song: self.auto_restart_song,
            auto_restart_chapter: self.auto_restart_chapter,
            loop_policy: self.loop_policy(),
            mode: self.modes.mode(),
            current_chapter: self.current_chapter(),
            active_lyric: lyric_index.and_then(|i| self.song.lyrics.get(i)).cloned(),
            active_lyric_index: lyric_index,
            load_warnings: self.warnings.clone(),
        }
    }

    /// Events produced since the last call
    pub fn drain_events(&mut self) -> Vec<ChoraleEvent> {
        std::mem::take(&mut self.events)
    }

    // ------------------------------------------------------------------
    // Transport
    // ------------------------------------------------------------------

    pub fn toggle_play_pause(&mut self) -> Result<PlaybackState> {
        if self.playing {
            self.pause()
        } else {
            self.play()
        }
    }

    /// Resume every unmuted track from the true position
    ///
    /// Tracks that refuse to start stay paused and are reported; the
    /// session only stays paused when every unmuted track refused.
    pub fn play(&mut self) -> Result<PlaybackState> {
        self.ensure_alive()?;
        if self.playing {
            return Ok(PlaybackState::Playing);
        }

        let duration = self.authority.duration();
        if duration > 0.0 && self.authority.position() >= duration {
            self.apply_seek(0.0);
        }

        let position = self.authority.position();
        for state in self.tracks.values_mut() {
            if !state.muted() {
                state.source.element.set_current_time(position);
            }
        }

        let (attempted, started) = self.start_unmuted();
        if attempted > 0 && started == 0 {
            warn!("Every unmuted track refused to play; staying paused");
            return Ok(PlaybackState::Paused);
        }

        let now = self.clock.now();
        self.authority.advance(now, false);
        self.sync.reset();
        self.resume_at = None;
        self.end_handled = false;
        self.set_playing(true);
        Ok(PlaybackState::Playing)
    }

    /// Pause every unmuted track; muted tracks are already paused
    pub fn pause(&mut self) -> Result<PlaybackState> {
        self.ensure_alive()?;
        if !self.playing {
            return Ok(PlaybackState::Paused);
        }

        let now = self.clock.now();
        self.authority.advance(now, self.advancing());
        self.resume_at = None;
        for state in self.tracks.values_mut() {
            state.source.element.pause();
        }
        self.set_playing(false);
        Ok(PlaybackState::Paused)
    }

    /// Move every track and the true position to `target` (clamped)
    ///
    /// Returns the position actually applied.
    pub fn seek(&mut self, target: f64) -> Result<f64> {
        self.ensure_alive()?;
        if !target.is_finite() {
            return Err(Error::BadRequest(format!("invalid seek target {}", target)));
        }
        let target = target.clamp(0.0, self.authority.duration());
        debug!("Seek to {:.3}", target);

        self.apply_seek(target);
        if self.playing && self.auto_restart_chapter {
            // The target may already sit inside the loop-back window
            self.check_chapter_loop();
        }
        Ok(self.authority.position())
    }

    pub fn seek_to_chapter(&mut self, chapter_id: Uuid) -> Result<f64> {
        let start = self
            .chapters
            .find(chapter_id)
            .map(|c| c.start)
            .ok_or(Error::UnknownChapter(chapter_id))?;
        self.seek(start)
    }

    /// Set a track's gain; a silent track turning audible selects the mode
    pub fn set_volume(&mut self, track_id: Uuid, level: f32) -> Result<()> {
        self.ensure_alive()?;
        if !level.is_finite() {
            return Err(Error::BadRequest(format!("invalid volume {}", level)));
        }
        let level = level.clamp(0.0, 1.0);

        let state = self
            .tracks
            .get_mut(&track_id)
            .ok_or(Error::UnknownTrack(track_id))?;
        let was_audible = state.audible();
        state.source.element.set_volume(level);
        if level > 0.0 {
            state.restore_volume = level;
        }
        let now_audible = state.audible();
        self.emit(ChoraleEvent::VolumeChanged {
            track_id,
            volume: level,
            timestamp: chrono::Utc::now(),
        });

        if now_audible && !was_audible {
            self.select_mode_for(track_id);
        }
        Ok(())
    }

    /// Mute pauses the track; unmute restores its gain, selects the mode
    /// and aligns it with the tracks already playing
    pub fn set_mute(&mut self, track_id: Uuid, muted: bool) -> Result<()> {
        self.ensure_alive()?;
        let state = self
            .tracks
            .get_mut(&track_id)
            .ok_or(Error::UnknownTrack(track_id))?;
        if state.muted() == muted {
            return Ok(());
        }

        let mut events = Vec::new();
        if muted {
            state.source.element.set_muted(true);
            state.source.element.pause();
        } else {
            state.source.element.set_muted(false);
            if state.source.element.volume() <= 0.0 {
                state.source.element.set_volume(state.restore_volume);
                events.push(ChoraleEvent::VolumeChanged {
                    track_id,
                    volume: state.restore_volume,
                    timestamp: chrono::Utc::now(),
                });
            }
        }
        let audible = state.audible();
        events.push(ChoraleEvent::MuteChanged {
            track_id,
            muted,
            timestamp: chrono::Utc::now(),
        });
        self.events.extend(events);

        if !muted {
            if audible {
                self.select_mode_for(track_id);
            }
            self.align_unmuted(track_id);
        }
        Ok(())
    }

    /// Enabling song restart turns chapter restart off
    pub fn set_auto_restart_song(&mut self, enabled: bool) -> Result<()> {
        self.ensure_alive()?;
        self.auto_restart_song = enabled;
        if enabled {
            self.auto_restart_chapter = false;
        }
        self.emit_loop_policy();
        Ok(())
    }

    /// Enabling chapter restart turns song restart off
    pub fn set_auto_restart_chapter(&mut self, enabled: bool) -> Result<()> {
        self.ensure_alive()?;
        self.auto_restart_chapter = enabled;
        if enabled {
            self.auto_restart_song = false;
            if self.playing {
                self.check_chapter_loop();
            }
        }
        self.emit_loop_policy();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Tick
    // ------------------------------------------------------------------

    /// One engine tick; a no-op once teardown has started
    pub fn tick(&mut self) {
        if !self.is_alive() {
            return;
        }
        let now = self.clock.now();

        if let Some(at) = self.resume_at {
            if now >= at {
                self.resume_at = None;
                self.authority.advance(now, false);
                self.start_unmuted();
                debug!("Alignment settled, tracks resumed");
            }
        }

        let advancing = self.advancing();
        self.authority.advance(now, advancing);

        if advancing {
            self.follow_laggard();

            if self.sync.due(now) {
                self.correct_drift();
            }

            if self.auto_restart_chapter {
                self.check_chapter_loop();
            }

            if !self.end_handled && self.reached_end() {
                self.on_track_ended();
            }
        }

        let position = self.authority.position();
        self.locate_chapter(position);

        if let Some(ui_position) = self.authority.take_ui_update(now) {
            if self.playing || self.last_published != Some(ui_position) {
                self.last_published = Some(ui_position);
                self.emit(ChoraleEvent::PlaybackPosition {
                    song_id: self.song.id,
                    position: ui_position,
                    duration: self.authority.duration(),
                    playing: self.playing,
                    timestamp: chrono::Utc::now(),
                });
            }
        }
    }

    /// Media-end notification
    ///
    /// Song restart seeks to 0 and resumes; chapter restart loops the
    /// current chapter; otherwise playback pauses at the end.
    pub fn on_track_ended(&mut self) {
        if !self.is_alive() {
            return;
        }
        self.end_handled = true;

        if self.auto_restart_song {
            info!("Song ended, restarting");
            self.apply_seek(0.0);
            self.resume_stopped();
            self.emit(ChoraleEvent::SongRestarted {
                song_id: self.song.id,
                timestamp: chrono::Utc::now(),
            });
            return;
        }

        if self.auto_restart_chapter && self.chapters.current().is_some() {
            self.loop_current_chapter();
            return;
        }

        info!("Song ended");
        let now = self.clock.now();
        for state in self.tracks.values_mut() {
            state.source.element.pause();
        }
        self.resume_at = None;
        self.authority.finish(now);
        self.set_playing(false);
        self.emit(ChoraleEvent::SongEnded {
            song_id: self.song.id,
            timestamp: chrono::Utc::now(),
        });
    }

    /// Fold in what a client observed about one of its tracks
    ///
    /// A lagging cursor pulls the true position back at once and tracks
    /// ahead of it are sought back. A refused play is reported; when no
    /// unmuted track is left running the session pauses. Stale reports
    /// change nothing.
    pub fn apply_report(&mut self, report: &MediaReport) -> Result<()> {
        self.ensure_alive()?;
        let track_id = report.track_id;
        let state = self
            .tracks
            .get_mut(&track_id)
            .ok_or(Error::UnknownTrack(track_id))?;
        if !state.source.element.observe(report) {
            return Ok(());
        }
        let part = state.part();

        if let Some(reason) = &report.rejected {
            warn!("Track {} ({}) refused to play: {}", track_id, part, reason);
            self.emit(ChoraleEvent::PlaybackRejected {
                track_id,
                reason: reason.clone(),
                timestamp: chrono::Utc::now(),
            });
            if self.advancing() && !self.tracks.values().any(|s| s.running()) {
                warn!("Every unmuted track refused to play; pausing");
                self.pause()?;
            }
            return Ok(());
        }

        if self.advancing() {
            let now = self.clock.now();
            self.authority.advance(now, true);
            self.follow_laggard();
            self.correct_drift();
            if !self.end_handled && self.reached_end() {
                self.on_track_ended();
            }
        }
        Ok(())
    }

    /// Pause and release every track; later ticks and operations do nothing
    pub fn teardown(&mut self) {
        self.alive.store(false, Ordering::SeqCst);
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        self.resume_at = None;
        self.playing = false;

        for state in self.tracks.values_mut() {
            state.source.release();
        }
        info!("Session for '{}' torn down", self.song.title);
        self.emit(ChoraleEvent::SessionClosed {
            song_id: self.song.id,
            timestamp: chrono::Utc::now(),
        });
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn ensure_alive(&self) -> Result<()> {
        if self.is_alive() {
            Ok(())
        } else {
            Err(Error::InvalidState("session closed".to_string()))
        }
    }

    fn ordered(&self) -> impl Iterator<Item = &TrackState> {
        self.order.iter().filter_map(|id| self.tracks.get(id))
    }

    /// Playing and not holding for an alignment
    fn advancing(&self) -> bool {
        self.playing && self.resume_at.is_none()
    }

    fn set_playing(&mut self, playing: bool) {
        if self.playing == playing {
            return;
        }
        self.playing = playing;
        self.emit(ChoraleEvent::PlaybackStateChanged {
            old_state: PlaybackState::from_playing(!playing),
            new_state: PlaybackState::from_playing(playing),
            timestamp: chrono::Utc::now(),
        });
    }

    /// Cursor, authority, cadences and chapter cache to `target`
    fn apply_seek(&mut self, target: f64) {
        let now = self.clock.now();
        for state in self.tracks.values_mut() {
            state.source.element.set_current_time(target);
        }
        self.authority.seek(target, now);
        self.sync.reset();
        self.end_handled = false;
        self.locate_chapter(target);

        if self.playing && self.resume_at.is_none() {
            // Elements that had reached the end stopped on their own
            self.resume_stopped();
        }
    }

    /// Play every unmuted track; returns `(attempted, started)`
    fn start_unmuted(&mut self) -> (usize, usize) {
        let mut attempted = 0;
        let mut started = 0;
        let mut rejections = Vec::new();

        for id in &self.order {
            let Some(state) = self.tracks.get_mut(id) else { continue };
            if state.muted() {
                continue;
            }
            attempted += 1;
            match state.source.element.play() {
                Ok(()) => started += 1,
                Err(e) => {
                    warn!("Track {} ({}) refused to play: {}", id, state.part(), e);
                    rejections.push(ChoraleEvent::PlaybackRejected {
                        track_id: *id,
                        reason: e.to_string(),
                        timestamp: chrono::Utc::now(),
                    });
                }
            }
        }

        self.events.extend(rejections);
        (attempted, started)
    }

    /// Restart unmuted tracks that are paused while the session plays
    fn resume_stopped(&mut self) {
        let stopped = self
            .tracks
            .values()
            .any(|s| !s.muted() && s.source.element.paused());
        if stopped {
            self.start_unmuted();
        }
    }

    /// Earliest running cursor becomes the true position when it lags
    fn follow_laggard(&mut self) {
        let earliest = earliest_position(
            self.tracks
                .values()
                .filter(|s| s.running())
                .map(|s| s.source.element.current_time()),
        );
        if let Some(position) = self.authority.reconcile(earliest) {
            debug!("True position pulled back to laggard at {:.3}", position);
        }
    }

    /// Pull every running track that is ahead beyond tolerance back
    fn correct_drift(&mut self) {
        let position = self.authority.position();
        for (id, state) in self.tracks.iter_mut() {
            if !state.running() {
                continue;
            }
            let cursor = state.source.element.current_time();
            if let Some(target) = self.sync.correction(cursor, position) {
                debug!(
                    "Track {} ahead by {:.3}s, seeking back to {:.3}",
                    id,
                    cursor - position,
                    target
                );
                state.source.element.set_current_time(target);
            }
        }
    }

    /// Time-align a just-unmuted track with the others
    ///
    /// While playing: pause every unmuted track, move them all to the
    /// earliest cursor among the others (or the true position), and resume
    /// after the settle delay.
    fn align_unmuted(&mut self, track_id: Uuid) {
        let position = self.authority.position();
        if !self.playing {
            if let Some(state) = self.tracks.get_mut(&track_id) {
                state.source.element.set_current_time(position);
            }
            return;
        }

        let others = earliest_position(
            self.tracks
                .iter()
                .filter(|(id, s)| **id != track_id && s.running())
                .map(|(_, s)| s.source.element.current_time()),
        );
        let target = others.map_or(position, |e| e.min(position));

        for state in self.tracks.values_mut() {
            if !state.muted() {
                state.source.element.pause();
                state.source.element.set_current_time(target);
            }
        }

        let now = self.clock.now();
        self.authority.seek(target, now);
        self.sync.reset();

        let settle = self.tuning.settle_s();
        if settle > 0.0 {
            debug!("Aligning {} tracks at {:.3}, resuming in {:.0}ms", self.tracks.len(), target, settle * 1000.0);
            self.resume_at = Some(now + settle);
        } else {
            self.start_unmuted();
        }
    }

    /// Switch to the mode of `track_id`'s voice part and silence the rest
    fn select_mode_for(&mut self, track_id: Uuid) {
        let Some(part) = self.tracks.get(&track_id).map(|s| s.part()) else {
            return;
        };
        if let Some((old_mode, new_mode)) = self.modes.on_audible(part) {
            info!("Mode changed: {} -> {}", old_mode, new_mode);
            self.emit(ChoraleEvent::ModeChanged {
                old_mode,
                new_mode,
                timestamp: chrono::Utc::now(),
            });
        }

        let mut events = Vec::new();
        for (id, state) in self.tracks.iter_mut() {
            if self.modes.admits(state.part()) {
                continue;
            }
            let element = &mut state.source.element;
            if !element.muted() {
                element.set_muted(true);
                events.push(ChoraleEvent::MuteChanged {
                    track_id: *id,
                    muted: true,
                    timestamp: chrono::Utc::now(),
                });
            }
            if element.volume() > 0.0 {
                element.set_volume(0.0);
                events.push(ChoraleEvent::VolumeChanged {
                    track_id: *id,
                    volume: 0.0,
                    timestamp: chrono::Utc::now(),
                });
            }
            element.pause();
        }
        self.events.extend(events);
    }

    fn check_chapter_loop(&mut self) -> bool {
        let position = self.authority.position();
        let lookahead = self.tuning.chapter_lookahead_s;
        if self.chapters.loop_target(position, lookahead).is_none() {
            return false;
        }
        self.loop_current_chapter();
        true
    }

    fn loop_current_chapter(&mut self) {
        let Some((chapter_id, start)) = self.chapters.current().map(|c| (c.id, c.start)) else {
            return;
        };
        debug!("Chapter loop back to {:.3}", start);
        self.apply_seek(start);
        self.resume_stopped();
        self.emit(ChoraleEvent::ChapterLooped {
            chapter_id,
            start,
            timestamp: chrono::Utc::now(),
        });
    }

    /// End of song: position at duration, or every unmuted track ended
    fn reached_end(&self) -> bool {
        let duration = self.authority.duration();
        if duration <= 0.0 {
            return false;
        }
        if self.authority.position() >= duration {
            return true;
        }
        let mut unmuted = self.tracks.values().filter(|s| !s.muted()).peekable();
        unmuted.peek().is_some() && unmuted.all(|s| s.source.element.ended())
    }

    fn locate_chapter(&mut self, position: f64) {
        let (crossed, chapter) = self.chapters.check_boundary(position);
        if crossed {
            let (chapter_id, title) = match chapter {
                Some(c) => (Some(c.id), Some(c.title.clone())),
                None => (None, None),
            };
            self.emit(ChoraleEvent::ChapterChanged {
                chapter_id,
                title,
                timestamp: chrono::Utc::now(),
            });
        }
    }

    fn current_chapter(&self) -> Option<ChapterSnapshot> {
        let chapter = self.chapters.current()?;
        let (start, end) = self.chapters.current_bounds()?;
        Some(ChapterSnapshot {
            id: chapter.id,
            title: chapter.title.clone(),
            kind: chapter.kind,
            start,
            end,
        })
    }

    fn emit_loop_policy(&mut self) {
        let policy = self.loop_policy();
        info!("Loop policy: {:?}", policy);
        self.emit(ChoraleEvent::LoopPolicyChanged {
            policy,
            timestamp: chrono::Utc::now(),
        });
    }

    fn emit(&mut self, event: ChoraleEvent) {
        self.events.push(event);
    }
}

impl Drop for PlaybackSession {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
