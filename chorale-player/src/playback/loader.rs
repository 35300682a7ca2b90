//! Track loader
//!
//! Resolves each track's URL into a local audio file of known duration. Loads are
//! idempotent per track id: concurrent and repeated requests share one
//! in-flight future and observe the same result. A semaphore bounds how many
//! fetches run at once.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chorale_common::model::{Track, VoicePart};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use tempfile::NamedTempFile;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::audio::measure_duration;

/// Why a track could not be loaded
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LoadFailure {
    #[error("fetch failed: {0}")]
    Fetch(String),

    #[error("io error: {0}")]
    Io(String),

    #[error("decode failed: {0}")]
    Decode(String),

    #[error("path outside the root folder: {0}")]
    OutsideRoot(String),

    #[error("loader shut down")]
    Cancelled,
}

/// Non-fatal report for a track that did not load
#[derive(Debug, Clone, Serialize)]
pub struct LoadWarning {
    pub track_id: Uuid,
    pub voice_part: VoicePart,
    pub reason: String,
}

/// Source of raw audio bytes for a track URL
pub trait TrackFetcher: Send + Sync {
    fn fetch(&self, url: &str) -> BoxFuture<'static, Result<Vec<u8>, LoadFailure>>;
}

/// Fetches `http(s)://` URLs with reqwest and reads everything else from disk
///
/// Bare paths resolve against the root folder; `file://` URLs are taken
/// as-is. Either way the resolved file must lie inside the root folder.
#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    root_folder: PathBuf,
}

impl HttpFetcher {
    pub fn new(client: reqwest::Client, root_folder: PathBuf) -> Self {
        Self {
            client,
            root_folder,
        }
    }

    fn local_path(&self, url: &str) -> PathBuf {
        match url.strip_prefix("file://") {
            Some(path) => PathBuf::from(path),
            None => self.root_folder.join(url.trim_start_matches('/')),
        }
    }
}

/// Canonical form of `path`, refused unless it is under `root`
///
/// Canonicalizing both sides resolves `..` components and symlinks before
/// the prefix check.
async fn confine(root: &Path, path: &Path) -> Result<PathBuf, LoadFailure> {
    let io = |p: &Path, e: std::io::Error| LoadFailure::Io(format!("{}: {}", p.display(), e));
    let root = tokio::fs::canonicalize(root).await.map_err(|e| io(root, e))?;
    let resolved = tokio::fs::canonicalize(path).await.map_err(|e| io(path, e))?;
    if resolved.starts_with(&root) {
        Ok(resolved)
    } else {
        Err(LoadFailure::OutsideRoot(path.display().to_string()))
    }
}

impl TrackFetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> BoxFuture<'static, Result<Vec<u8>, LoadFailure>> {
        if url.starts_with("http://") || url.starts_with("https://") {
            let request = self.client.get(url);
            let url = url.to_string();
            async move {
                let response = request
                    .send()
                    .await
                    .and_then(|r| r.error_for_status())
                    .map_err(|e| LoadFailure::Fetch(format!("{}: {}", url, e)))?;
                let bytes = response
                    .bytes()
                    .await
                    .map_err(|e| LoadFailure::Fetch(format!("{}: {}", url, e)))?;
                Ok(bytes.to_vec())
            }
            .boxed()
        } else {
            let path = self.local_path(url);
            let root = self.root_folder.clone();
            async move {
                let path = confine(&root, &path).await?;
                tokio::fs::read(&path)
                    .await
                    .map_err(|e| LoadFailure::Io(format!("{}: {}", path.display(), e)))
            }
            .boxed()
        }
    }
}

/// Temporary local copy of fetched audio bytes
///
/// Released exactly once: by [`release`](Self::release) or on drop,
/// whichever comes first.
#[derive(Debug)]
pub struct TransientResource {
    path: PathBuf,
    file: Mutex<Option<NamedTempFile>>,
}

impl TransientResource {
    pub(crate) fn new(file: NamedTempFile) -> Self {
        Self {
            path: file.path().to_path_buf(),
            file: Mutex::new(Some(file)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the temporary file; returns false when already released
    pub fn release(&self) -> bool {
        match self.slot().take() {
            Some(file) => {
                if let Err(e) = file.close() {
                    warn!("Failed to remove {}: {}", self.path.display(), e);
                }
                debug!("Released transient resource {}", self.path.display());
                true
            }
            None => false,
        }
    }

    pub fn is_released(&self) -> bool {
        self.slot().is_none()
    }

    fn slot(&self) -> MutexGuard<'_, Option<NamedTempFile>> {
        self.file.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for TransientResource {
    fn drop(&mut self) {
        self.release();
    }
}

/// A track resolved into a playable local file
#[derive(Debug)]
pub struct LoadedTrack {
    pub track: Track,
    /// Seconds
    pub duration: f64,
    pub resource: TransientResource,
}

type LoadResult = Result<Arc<LoadedTrack>, LoadFailure>;
type LoadFuture = Shared<BoxFuture<'static, LoadResult>>;

/// Bounded, idempotent track loader
pub struct TrackLoader {
    fetcher: Arc<dyn TrackFetcher>,
    permits: Arc<Semaphore>,
    loads: Mutex<HashMap<Uuid, LoadFuture>>,
}

impl TrackLoader {
    pub fn new(fetcher: Arc<dyn TrackFetcher>, max_concurrent_loads: usize) -> Self {
        Self {
            fetcher,
            permits: Arc::new(Semaphore::new(max_concurrent_loads.max(1))),
            loads: Mutex::new(HashMap::new()),
        }
    }

    /// Load one track, joining any load already started for the same id
    pub async fn load(&self, track: &Track) -> LoadResult {
        let load = {
            let mut loads = self.loads.lock().unwrap_or_else(|p| p.into_inner());
            loads
                .entry(track.id)
                .or_insert_with(|| self.start(track.clone()))
                .clone()
        };
        load.await
    }

    /// Load every track; failures are reported, never fatal
    ///
    /// Successful tracks come back in the order given.
    pub async fn load_all(&self, tracks: &[Track]) -> (Vec<Arc<LoadedTrack>>, Vec<LoadWarning>) {
        let results = futures::future::join_all(tracks.iter().map(|t| self.load(t))).await;

        let mut loaded = Vec::with_capacity(tracks.len());
        let mut warnings = Vec::new();
        for (track, result) in tracks.iter().zip(results) {
            match result {
                Ok(track) => loaded.push(track),
                Err(e) => {
                    warn!("Track {} ({}) failed to load: {}", track.id, track.voice_part, e);
                    warnings.push(LoadWarning {
                        track_id: track.id,
                        voice_part: track.voice_part,
                        reason: e.to_string(),
                    });
                }
            }
        }
        info!("Loaded {}/{} tracks", loaded.len(), tracks.len());
        (loaded, warnings)
    }

    /// Stop sharing cached loads; transient files go once the last holder drops them
    pub fn clear(&self) {
        self.loads.lock().unwrap_or_else(|p| p.into_inner()).clear();
    }

    fn start(&self, track: Track) -> LoadFuture {
        let fetcher = Arc::clone(&self.fetcher);
        let permits = Arc::clone(&self.permits);
        async move {
            let _permit = permits.acquire_owned().await.map_err(|_| LoadFailure::Cancelled)?;
            debug!("Fetching track {} from {}", track.id, track.url);

            let bytes = fetcher.fetch(&track.url).await?;
            let resource = materialize(&track, &bytes)?;

            let path = resource.path().to_path_buf();
            // Tap failure drops `resource`, which removes the file
            let duration = tokio::task::spawn_blocking(move || measure_duration(&path))
                .await
                .map_err(|e| LoadFailure::Decode(format!("tap task failed: {}", e)))??;

            debug!("Track {} ready ({:.2}s)", track.id, duration);
            Ok(Arc::new(LoadedTrack {
                track,
                duration,
                resource,
            }))
        }
        .boxed()
        .shared()
    }
}

/// Write fetched bytes to a temporary file named after the track
fn materialize(track: &Track, bytes: &[u8]) -> Result<TransientResource, LoadFailure> {
    let suffix = Path::new(track.url.split(['?', '#']).next().unwrap_or(""))
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e))
        .unwrap_or_default();

    let mut file = tempfile::Builder::new()
        .prefix("chorale-")
        .suffix(&suffix)
        .tempfile()
        .map_err(|e| LoadFailure::Io(e.to_string()))?;
    let resource_io = |e: std::io::Error| LoadFailure::Io(e.to_string());
    file.write_all(bytes).map_err(resource_io)?;
    file.flush().map_err(resource_io)?;

    Ok(TransientResource::new(file))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Serves a generated WAV for every URL not containing "broken"
    struct CountingFetcher {
        calls: AtomicUsize,
        in_flight: Arc<AtomicUsize>,
        max_in_flight: Arc<AtomicUsize>,
        wav: Vec<u8>,
    }

    impl CountingFetcher {
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
            Self {
                calls: AtomicUsize::new(0),
                in_flight: Arc::new(AtomicUsize::new(0)),
                max_in_flight: Arc::new(AtomicUsize::new(0)),
                wav: cursor.into_inner(),
            }
        }
    }

    impl TrackFetcher for CountingFetcher {
        fn fetch(&self, url: &str) -> BoxFuture<'static, Result<Vec<u8>, LoadFailure>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let in_flight = Arc::clone(&self.in_flight);
            let max = Arc::clone(&self.max_in_flight);
            let body = if url.contains("broken") {
                Err(LoadFailure::Fetch(format!("{}: 404", url)))
            } else {
                Ok(self.wav.clone())
            };
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                max.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                body
            }
            .boxed()
        }
    }

    fn track(part: VoicePart, url: &str) -> Track {
        Track {
            id: Uuid::new_v4(),
            voice_part: part,
            url: url.to_string(),
        }
    }

    #[tokio::test]
    async fn test_concurrent_loads_share_one_fetch() {
        let fetcher = Arc::new(CountingFetcher::new());
        let loader = TrackLoader::new(fetcher.clone(), 1);
        let soprano = track(VoicePart::Soprano, "soprano.wav");

        let (a, b) = tokio::join!(loader.load(&soprano), loader.load(&soprano));
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&a, &b));
        assert!((a.duration - 2.0).abs() < 1e-6);

        // Completed loads are reused too
        let c = loader.load(&soprano).await.unwrap();
        assert!(Arc::ptr_eq(&a, &c));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_failures_are_shared() {
        let fetcher = Arc::new(CountingFetcher::new());
        let loader = TrackLoader::new(fetcher.clone(), 2);
        let bass = track(VoicePart::Bass, "broken/bass.wav");

        let (a, b) = tokio::join!(loader.load(&bass), loader.load(&bass));
        assert_eq!(a.unwrap_err(), b.unwrap_err());
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let fetcher = Arc::new(CountingFetcher::new());
        let loader = TrackLoader::new(fetcher.clone(), 1);
        let tracks: Vec<Track> = [VoicePart::Soprano, VoicePart::Alto, VoicePart::Tenor, VoicePart::Bass]
            .into_iter()
            .map(|p| track(p, &format!("{}.wav", p)))
            .collect();

        let (loaded, warnings) = loader.load_all(&tracks).await;

        assert_eq!(loaded.len(), 4);
        assert!(warnings.is_empty());
        assert_eq!(fetcher.max_in_flight.load(Ordering::SeqCst), 1);
        let order: Vec<Uuid> = loaded.iter().map(|l| l.track.id).collect();
        let expected: Vec<Uuid> = tracks.iter().map(|t| t.id).collect();
        assert_eq!(order, expected);
    }

    #[tokio::test]
    async fn test_failure_does_not_abort_others() {
        let fetcher = Arc::new(CountingFetcher::new());
        let loader = TrackLoader::new(fetcher, 2);
        let tracks = vec![
            track(VoicePart::Soprano, "soprano.wav"),
            track(VoicePart::Alto, "broken/alto.wav"),
            track(VoicePart::Tenor, "tenor.wav"),
        ];

        let (loaded, warnings) = loader.load_all(&tracks).await;

        assert_eq!(loaded.len(), 2);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].track_id, tracks[1].id);
        assert_eq!(warnings[0].voice_part, VoicePart::Alto);
    }

    #[tokio::test]
    async fn test_undecodable_bytes_release_temp_file() {
        struct JunkFetcher;
        impl TrackFetcher for JunkFetcher {
            fn fetch(&self, _url: &str) -> BoxFuture<'static, Result<Vec<u8>, LoadFailure>> {
                async { Ok(b"not audio at all".to_vec()) }.boxed()
            }
        }

        let loader = TrackLoader::new(Arc::new(JunkFetcher), 1);
        let err = loader.load(&track(VoicePart::Tenor, "junk.mp3")).await.unwrap_err();
        assert!(matches!(err, LoadFailure::Decode(_)));

        let leftovers = std::fs::read_dir(std::env::temp_dir())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| {
                let name = e.file_name().to_string_lossy().to_string();
                name.starts_with("chorale-") && name.ends_with(".mp3")
            })
            .count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn test_transient_resource_released_once() {
        let loader = TrackLoader::new(Arc::new(CountingFetcher::new()), 1);
        let loaded = loader.load(&track(VoicePart::All, "mix.wav")).await.unwrap();
        let path = loaded.resource.path().to_path_buf();
        assert!(path.exists());

        assert!(loaded.resource.release());
        assert!(!loaded.resource.release());
        assert!(loaded.resource.is_released());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_local_paths_resolve_against_root() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("alto.wav"), b"bytes").unwrap();
        let fetcher = HttpFetcher::new(reqwest::Client::new(), dir.path().to_path_buf());

        assert_eq!(fetcher.fetch("alto.wav").await.unwrap(), b"bytes".to_vec());
        let absolute = format!("file://{}", dir.path().join("alto.wav").display());
        assert_eq!(fetcher.fetch(&absolute).await.unwrap(), b"bytes".to_vec());
        assert!(matches!(fetcher.fetch("missing.wav").await, Err(LoadFailure::Io(_))));
    }

    #[tokio::test]
    async fn test_local_paths_cannot_leave_root() {
        let outer = tempfile::TempDir::new().unwrap();
        let root = outer.path().join("root");
        std::fs::create_dir_all(root.join("sub")).unwrap();
        std::fs::write(root.join("alto.wav"), b"bytes").unwrap();
        std::fs::write(outer.path().join("secret.wav"), b"secret").unwrap();
        let fetcher = HttpFetcher::new(reqwest::Client::new(), root.clone());

        assert!(matches!(
            fetcher.fetch("../secret.wav").await,
            Err(LoadFailure::OutsideRoot(_))
        ));
        assert!(matches!(
            fetcher.fetch("sub/../../secret.wav").await,
            Err(LoadFailure::OutsideRoot(_))
        ));
        let absolute = format!("file://{}", outer.path().join("secret.wav").display());
        assert!(matches!(
            fetcher.fetch(&absolute).await,
            Err(LoadFailure::OutsideRoot(_))
        ));
        // `..` that stays inside the root is fine
        assert_eq!(fetcher.fetch("sub/../alto.wav").await.unwrap(), b"bytes".to_vec());
    }
}
