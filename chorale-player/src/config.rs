//! Configuration for chorale-player
//!
//! Bootstrap settings come from a TOML file:
//!
//! ```toml
//! port = 5780
//! root_folder = "/srv/chorale"
//!
//! [engine]
//! tick_ms = 50
//! drift_tolerance_s = 0.1
//! max_concurrent_loads = 1
//! ```
//!
//! Command-line arguments and environment variables override the file.
//! `root_folder` is read by `chorale_common::config::resolve_root_folder`,
//! which applies that priority order.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing::info;

use crate::error::{Error, Result};

/// Default HTTP port
pub const DEFAULT_PORT: u16 = 5780;

/// Bootstrap configuration loaded from TOML file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlConfig {
    /// HTTP server port
    #[serde(default)]
    pub port: Option<u16>,

    /// Playback engine cadences and tolerances
    #[serde(default)]
    pub engine: EngineTuning,
}

impl TomlConfig {
    /// Load from `path`; a missing file yields defaults
    pub fn load(path: &Path) -> Result<Self> {
        let config: TomlConfig = chorale_common::config::load_toml_config(path)
            .map_err(|e| Error::Config(e.to_string()))?;
        info!("Loaded configuration from {}", path.display());
        Ok(TomlConfig {
            engine: config.engine.clamped(),
            ..config
        })
    }
}

/// Engine timing constants
///
/// The values are tunable; defaults keep tracks within 0.1 s of each other
/// on a 50 ms tick.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EngineTuning {
    /// Period of the engine tick driving position, sync and chapter checks
    pub tick_ms: u64,
    /// Minimum interval between corrective sync passes
    pub sync_interval_ms: u64,
    /// Minimum interval between UI position updates
    pub ui_interval_ms: u64,
    /// Drift (seconds) a track may run ahead of true position before it is pulled back
    pub drift_tolerance_s: f64,
    /// Pause held while a newly unmuted track is aligned
    pub settle_ms: u64,
    /// How early (seconds) a chapter loop fires before the chapter end
    pub chapter_lookahead_s: f64,
    /// Upper bound on tracks fetched at once
    pub max_concurrent_loads: usize,
}

impl Default for EngineTuning {
    fn default() -> Self {
        Self {
            tick_ms: 50,
            sync_interval_ms: 50,
            ui_interval_ms: 100,
            drift_tolerance_s: 0.1,
            settle_ms: 50,
            chapter_lookahead_s: 0.1,
            max_concurrent_loads: 1,
        }
    }
}

impl EngineTuning {
    /// Clamp values into usable ranges
    pub fn clamped(self) -> Self {
        Self {
            tick_ms: self.tick_ms.clamp(5, 1000),
            sync_interval_ms: self.sync_interval_ms.min(10_000),
            ui_interval_ms: self.ui_interval_ms.min(10_000),
            drift_tolerance_s: finite_or(self.drift_tolerance_s, 0.1).clamp(0.0, 5.0),
            settle_ms: self.settle_ms.min(2000),
            chapter_lookahead_s: finite_or(self.chapter_lookahead_s, 0.1).clamp(0.0, 1.0),
            max_concurrent_loads: self.max_concurrent_loads.clamp(1, 16),
        }
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn sync_interval_s(&self) -> f64 {
        self.sync_interval_ms as f64 / 1000.0
    }

    pub fn ui_interval_s(&self) -> f64 {
        self.ui_interval_ms as f64 / 1000.0
    }

    pub fn settle_s(&self) -> f64 {
        self.settle_ms as f64 / 1000.0
    }
}

fn finite_or(value: f64, fallback: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        fallback
    }
}
