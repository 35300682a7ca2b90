//! Session driver
//!
//! Async owner of one [`PlaybackSession`]: loads the song's tracks, runs the
//! periodic tick task and forwards everything the session reports to the
//! event bus. Each track is a [`ReportedElement`] mirroring the client that
//! actually plays it. The session itself stays synchronous; every access goes
//! through one mutex, so a tick never interleaves with a transport command.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chorale_common::events::{ChoraleEvent, EventBus};
use chorale_common::model::Song;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use super::loader::TrackLoader;
use super::session::{LoadedAudioSource, PlaybackSession, SessionSnapshot};
use crate::audio::{Clock, ReportedElement};
use crate::config::EngineTuning;
use crate::error::{Error, Result};

pub struct SessionDriver {
    song_id: Uuid,
    session: Arc<Mutex<PlaybackSession>>,
    alive: Arc<AtomicBool>,
    events: EventBus,
    loader: Arc<TrackLoader>,
    ticker: StdMutex<Option<JoinHandle<()>>>,
}

impl SessionDriver {
    /// Load `song` and start ticking
    ///
    /// Tracks that fail to load are reported as `TrackLoadFailed` and left
    /// out; the session opens with whatever loaded. Cancelling `cancel`
    /// abandons the loads in flight and fails with `Cancelled`.
    pub async fn open(
        song: Song,
        loader: Arc<TrackLoader>,
        clock: Arc<dyn Clock>,
        tuning: EngineTuning,
        events: EventBus,
        cancel: CancellationToken,
    ) -> Result<Arc<Self>> {
        info!("Opening session for '{}' ({} tracks)", song.title, song.tracks.len());
        events.emit_lossy(ChoraleEvent::SessionOpened {
            song_id: song.id,
            title: song.title.clone(),
            track_count: song.tracks.len(),
            timestamp: chrono::Utc::now(),
        });

        let (loaded, warnings) = tokio::select! {
            _ = cancel.cancelled() => {
                info!("Loading '{}' cancelled", song.title);
                loader.clear();
                events.emit_lossy(ChoraleEvent::SessionClosed {
                    song_id: song.id,
                    timestamp: chrono::Utc::now(),
                });
                return Err(Error::Cancelled(song.title.clone()));
            }
            loaded = loader.load_all(&song.tracks) => loaded,
        };

        for track in &loaded {
            events.emit_lossy(ChoraleEvent::TrackLoaded {
                track_id: track.track.id,
                voice_part: track.track.voice_part,
                duration: track.duration,
                timestamp: chrono::Utc::now(),
            });
        }
        for warning in &warnings {
            events.emit_lossy(ChoraleEvent::TrackLoadFailed {
                track_id: warning.track_id,
                voice_part: warning.voice_part,
                reason: warning.reason.clone(),
                timestamp: chrono::Utc::now(),
            });
        }

        let sources = loaded
            .into_iter()
            .map(|track| {
                let element = ReportedElement::new(
                    track.track.id,
                    Arc::clone(&clock),
                    track.duration,
                    events.clone(),
                );
                LoadedAudioSource::new(track.track.clone(), Box::new(element)).with_loaded(track)
            })
            .collect();

        let song_id = song.id;
        let mut session = PlaybackSession::new(song, sources, warnings, clock, tuning.clone());
        for event in session.drain_events() {
            events.emit_lossy(event);
        }

        let alive = session.liveness();
        let session = Arc::new(Mutex::new(session));
        let ticker = spawn_ticker(
            Arc::clone(&session),
            Arc::clone(&alive),
            events.clone(),
            tuning.tick(),
        );

        Ok(Arc::new(Self {
            song_id,
            session,
            alive,
            events,
            loader,
            ticker: StdMutex::new(Some(ticker)),
        }))
    }

    pub fn song_id(&self) -> Uuid {
        self.song_id
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Run `f` against the session, then publish the events it produced
    pub async fn with_session<R>(
        &self,
        f: impl FnOnce(&mut PlaybackSession) -> Result<R>,
    ) -> Result<R> {
        let (result, drained) = {
            let mut session = self.session.lock().await;
            let result = f(&mut session);
            (result, session.drain_events())
        };
        for event in drained {
            self.events.emit_lossy(event);
        }
        result
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        self.session.lock().await.snapshot()
    }

    /// Stop the tick task, tear the session down and forget cached loads
    pub async fn close(&self) {
        self.alive.store(false, Ordering::SeqCst);
        if let Some(ticker) = self.take_ticker() {
            ticker.abort();
        }

        let drained = {
            let mut session = self.session.lock().await;
            session.teardown();
            session.drain_events()
        };
        for event in drained {
            self.events.emit_lossy(event);
        }
        self.loader.clear();
        info!("Session {} closed", self.song_id);
    }

    fn take_ticker(&self) -> Option<JoinHandle<()>> {
        self.ticker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }
}

impl Drop for SessionDriver {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::SeqCst);
        if let Some(ticker) = self.take_ticker() {
            ticker.abort();
        }
    }
}

/// Periodic tick; exits once the liveness flag drops
fn spawn_ticker(
    session: Arc<Mutex<PlaybackSession>>,
    alive: Arc<AtomicBool>,
    events: EventBus,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = interval(period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tick.tick().await;
            if !alive.load(Ordering::SeqCst) {
                break;
            }

            let drained = {
                let mut session = session.lock().await;
                session.tick();
                session.drain_events()
            };
            for event in drained {
                events.emit_lossy(event);
            }
        }
        debug!("Tick task stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::ManualClock;
    use crate::error::Error;
    use crate::playback::loader::{LoadFailure, TrackFetcher};
    use chorale_common::model::{Track, VoicePart};
    use futures::future::{BoxFuture, FutureExt};
    use tokio::sync::broadcast::error::TryRecvError;

    /// Two-second silent WAV for every URL, 404 for URLs containing "missing"
    struct WavFetcher(Vec<u8>);

    impl WavFetcher {
        fn new() -> Self {
            let mut cursor = std::io::Cursor::new(Vec::new());
            {
                let spec = hound::WavSpec {
                    channels: 1,
                    sample_rate: 8000,
                    bits_per_sample: 16,
                    sample_format: hound::SampleFormat::Int,
                };
                let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
                for _ in 0..16_000 {
                    writer.write_sample(0i16).unwrap();
                }
                writer.finalize().unwrap();
            }
            Self(cursor.into_inner())
        }
    }

    impl TrackFetcher for WavFetcher {
        fn fetch(&self, url: &str) -> BoxFuture<'static, std::result::Result<Vec<u8>, LoadFailure>> {
            let body = if url.contains("missing") {
                Err(LoadFailure::Fetch(format!("{}: 404", url)))
            } else {
                Ok(self.0.clone())
            };
            async move { body }.boxed()
        }
    }

    /// Takes far longer than any test waits
    struct StallingFetcher;

    impl TrackFetcher for StallingFetcher {
        fn fetch(&self, url: &str) -> BoxFuture<'static, std::result::Result<Vec<u8>, LoadFailure>> {
            let url = url.to_string();
            async move {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Err(LoadFailure::Fetch(format!("{}: timed out", url)))
            }
            .boxed()
        }
    }

    fn song(urls: &[(VoicePart, &str)]) -> Song {
        Song {
            id: Uuid::new_v4(),
            slug: "driver-test".to_string(),
            title: "Driver Test".to_string(),
            pdf_url: None,
            tracks: urls
                .iter()
                .map(|(part, url)| Track {
                    id: Uuid::new_v4(),
                    voice_part: *part,
                    url: url.to_string(),
                })
                .collect(),
            lyrics: vec![],
            chapters: vec![],
            rich_lyrics: None,
        }
    }

    fn fast_tuning() -> EngineTuning {
        EngineTuning {
            tick_ms: 5,
            ..EngineTuning::default()
        }
    }

    fn drain(rx: &mut tokio::sync::broadcast::Receiver<ChoraleEvent>) -> Vec<ChoraleEvent> {
        let mut out = Vec::new();
        loop {
            match rx.try_recv() {
                Ok(event) => out.push(event),
                Err(TryRecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
        out
    }

    #[tokio::test]
    async fn test_open_reports_loaded_and_failed_tracks() {
        let bus = EventBus::new(256);
        let mut rx = bus.subscribe();
        let loader = Arc::new(TrackLoader::new(Arc::new(WavFetcher::new()), 1));
        let song = song(&[(VoicePart::Soprano, "soprano.wav"), (VoicePart::Alto, "missing/alto.wav")]);

        let driver = SessionDriver::open(
            song,
            loader,
            Arc::new(ManualClock::new()),
            fast_tuning(),
            bus,
            CancellationToken::new(),
        )
        .await
        .unwrap();

        let names: Vec<&str> = drain(&mut rx).iter().map(|e| e.event_type()).collect();
        assert_eq!(names[0], "SessionOpened");
        assert!(names.contains(&"TrackLoaded"));
        assert!(names.contains(&"TrackLoadFailed"));

        let snapshot = driver.snapshot().await;
        assert_eq!(snapshot.tracks.len(), 1);
        assert_eq!(snapshot.load_warnings.len(), 1);
        assert_eq!(snapshot.load_warnings[0].voice_part, VoicePart::Alto);
        assert!((snapshot.duration - 2.0).abs() < 1e-6);

        driver.close().await;
    }

    #[tokio::test]
    async fn test_ticker_advances_position() {
        let bus = EventBus::new(1024);
        let clock = Arc::new(ManualClock::new());
        let loader = Arc::new(TrackLoader::new(Arc::new(WavFetcher::new()), 1));
        let driver = SessionDriver::open(
            song(&[(VoicePart::Tenor, "tenor.wav")]),
            loader,
            clock.clone(),
            fast_tuning(),
            bus,
            CancellationToken::new(),
        )
        .await
        .unwrap();

        driver.with_session(|s| s.play()).await.unwrap();
        clock.advance(1.0);
        tokio::time::sleep(Duration::from_millis(100)).await;

        let snapshot = driver.snapshot().await;
        assert!(snapshot.is_playing);
        assert!((snapshot.position - 1.0).abs() < 1e-6, "position {}", snapshot.position);

        driver.close().await;
    }

    #[tokio::test]
    async fn test_close_tears_down_once() {
        let bus = EventBus::new(256);
        let mut rx = bus.subscribe();
        let loader = Arc::new(TrackLoader::new(Arc::new(WavFetcher::new()), 1));
        let driver = SessionDriver::open(
            song(&[(VoicePart::Bass, "bass.wav")]),
            Arc::clone(&loader),
            Arc::new(ManualClock::new()),
            fast_tuning(),
            bus,
            CancellationToken::new(),
        )
        .await
        .unwrap();

        let path = {
            let session = driver.session.lock().await;
            let id = session.song().tracks[0].clone();
            drop(session);
            loader.load(&id).await.unwrap().resource.path().to_path_buf()
        };
        assert!(path.exists());

        driver.close().await;
        driver.close().await;

        assert!(!driver.is_alive());
        assert!(!path.exists());
        let closed = drain(&mut rx)
            .iter()
            .filter(|e| e.event_type() == "SessionClosed")
            .count();
        assert_eq!(closed, 1);

        let result = driver.with_session(|s| s.play()).await;
        assert!(matches!(result, Err(Error::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_cancel_abandons_loading() {
        let bus = EventBus::new(64);
        let mut rx = bus.subscribe();
        let loader = Arc::new(TrackLoader::new(Arc::new(StallingFetcher), 1));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let result = SessionDriver::open(
            song(&[(VoicePart::Soprano, "soprano.wav"), (VoicePart::Alto, "alto.wav")]),
            loader,
            Arc::new(ManualClock::new()),
            fast_tuning(),
            bus,
            cancel,
        )
        .await;

        assert!(matches!(result, Err(Error::Cancelled(_))));
        assert!(started.elapsed() < Duration::from_secs(5));
        let names: Vec<&str> = drain(&mut rx).iter().map(|e| e.event_type()).collect();
        assert_eq!(names, vec!["SessionOpened", "SessionClosed"]);
    }
}
