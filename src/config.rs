//! Recorder configuration
//!
//! Read from `config.toml` in the platform config directory. A missing file
//! means defaults; every field is optional. Command line flags override what
//! is loaded here.

use directories::{ProjectDirs, UserDirs};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::audio::device::{DeviceFilter, DeviceId};
use crate::constants::{
    DEFAULT_BUFFER_MINUTES, MAX_BUFFER_MINUTES, MIN_BUFFER_MINUTES, OUTPUT_FOLDER_NAME,
};
use crate::error::{Error, Result};

const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// Where exported WAV files go
    pub output_dir: PathBuf,
    /// Instant-replay window in minutes
    pub buffer_minutes: u32,
    /// Start buffering together with every recording
    pub instant_replay: bool,
    /// Auto-stop recordings after this many seconds
    pub timer_seconds: Option<u32>,
    /// Devices selected at startup
    pub devices: Vec<DeviceId>,
    pub device_filter: DeviceFilter,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            buffer_minutes: DEFAULT_BUFFER_MINUTES,
            instant_replay: false,
            timer_seconds: None,
            devices: Vec::new(),
            device_filter: DeviceFilter::default(),
        }
    }
}

impl RecorderConfig {
    /// Load from the default location
    pub fn load() -> Result<Self> {
        match config_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    /// Load from `path`; a missing file yields the defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }

        let text = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&text)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        tracing::info!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let text = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        fs::write(path, text)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !(MIN_BUFFER_MINUTES..=MAX_BUFFER_MINUTES).contains(&self.buffer_minutes) {
            return Err(Error::Config(format!(
                "buffer_minutes must be {}-{}, got {}",
                MIN_BUFFER_MINUTES, MAX_BUFFER_MINUTES, self.buffer_minutes
            )));
        }
        if self.timer_seconds == Some(0) {
            return Err(Error::Config("timer_seconds must be positive".to_string()));
        }
        if self.output_dir.as_os_str().is_empty() {
            return Err(Error::Config("output_dir must not be empty".to_string()));
        }
        Ok(())
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "multitrack-recorder")
}

/// `<config dir>/config.toml`, if the platform has a config directory
pub fn config_path() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().join(CONFIG_FILE))
}

/// The user's audio folder, falling back to the app data directory
pub fn default_output_dir() -> PathBuf {
    if let Some(audio) = UserDirs::new().and_then(|dirs| dirs.audio_dir().map(Path::to_path_buf)) {
        return audio.join(OUTPUT_FOLDER_NAME);
    }
    project_dirs()
        .map(|dirs| dirs.data_dir().join("recordings"))
        .unwrap_or_else(|| PathBuf::from("recordings"))
}
