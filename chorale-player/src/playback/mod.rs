//! Multi-track playback engine
//!
//! - [`loader`]: bounded, idempotent track loading
//! - [`position`], [`sync`], [`chapters`], [`mode`]: the per-song policies
//! - [`session`]: the track registry and transport, advanced by `tick()`
//! - [`driver`]: async owner of a session and its tick task

pub mod chapters;
pub mod driver;
pub mod loader;
pub mod mode;
pub mod position;
pub mod session;
pub mod sync;

pub use chapters::ChapterTimeline;
pub use driver::SessionDriver;
pub use loader::{HttpFetcher, LoadFailure, LoadWarning, LoadedTrack, TrackFetcher, TrackLoader};
pub use mode::ModeManager;
pub use position::PositionAuthority;
pub use session::{LoadedAudioSource, PlaybackSession, SessionSnapshot};
pub use sync::TrackSynchronizer;
