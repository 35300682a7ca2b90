//! Configuration loading and root folder resolution

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Environment variable naming the root folder
pub const ROOT_FOLDER_ENV: &str = "CHORALE_ROOT_FOLDER";

/// Root folder resolution priority order:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable
/// 3. `root_folder` key of the TOML config file
/// 4. OS-dependent compiled default (fallback)
pub fn resolve_root_folder(
    cli_arg: Option<&str>,
    env_var_name: &str,
    config_file: Option<&Path>,
) -> PathBuf {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return PathBuf::from(path);
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    // Priority 3: TOML config file
    let config_path = config_file.map(Path::to_path_buf).or_else(|| find_config_file().ok());
    if let Some(config_path) = config_path {
        match std::fs::read_to_string(&config_path) {
            Ok(toml_content) => match toml::from_str::<toml::Value>(&toml_content) {
                Ok(config) => {
                    if let Some(root_folder) = config.get("root_folder").and_then(|v| v.as_str()) {
                        return PathBuf::from(root_folder);
                    }
                }
                Err(e) => warn!("Ignoring malformed config file {}: {}", config_path.display(), e),
            },
            Err(e) => debug!("Config file {} not readable: {}", config_path.display(), e),
        }
    }

    // Priority 4: OS-dependent compiled default
    default_root_folder()
}

/// Locate the platform configuration file
///
/// Linux checks `~/.config/chorale/config.toml` then `/etc/chorale/config.toml`;
/// other platforms use the user config directory only.
pub fn find_config_file() -> Result<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("chorale").join("config.toml"));

    if let Some(path) = user_config {
        if path.exists() {
            return Ok(path);
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/chorale/config.toml");
        if system_config.exists() {
            return Ok(system_config);
        }
    }

    Err(Error::Config("No config file found".to_string()))
}

/// Parse a TOML config file into `T`
///
/// A missing file yields `T::default()` so services start with defaults;
/// a malformed file is an error.
pub fn load_toml_config<T>(path: &Path) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    if !path.exists() {
        warn!("Config file {} not found, using defaults", path.display());
        return Ok(T::default());
    }

    let content = std::fs::read_to_string(path)?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
}

/// Get OS-dependent default root folder path
pub fn default_root_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        dirs::data_local_dir()
            .map(|d| d.join("chorale"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/chorale"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("chorale"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/chorale"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("chorale"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\chorale"))
    } else {
        PathBuf::from("./chorale_data")
    }
}

/// Database file inside the root folder
pub fn database_path(root_folder: &Path) -> PathBuf {
    root_folder.join("chorale.db")
}
