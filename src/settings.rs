//! Application settings
//!
//! Defaults can be overridden in dconf under `/com/voicenote/recorder/`.
//! All keys hold strings. Settings are only read, never written back.

use crate::audio::meter::{DEFAULT_HISTORY_CAPACITY, DEFAULT_SMOOTHING};
use crate::audio::recorder::RecorderConfig;
use crate::audio::RecordingFormat;
use crate::state::RecordingCatalog;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const DCONF_PATH: &str = "/com/voicenote/recorder/";

/// Keys for dconf settings
mod keys {
    pub const RECORDINGS_DIR: &str = "recordings-dir";
    pub const FORMAT: &str = "format";
    pub const SMOOTHING: &str = "smoothing";
    pub const HISTORY_CAPACITY: &str = "history-capacity";
}

/// Application settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub recordings_dir: PathBuf,
    pub format: RecordingFormat,
    /// Level smoothing factor in (0, 1]
    pub smoothing: f32,
    /// Levels kept for the live waveform
    pub history_capacity: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            recordings_dir: RecordingCatalog::default_dir(),
            format: RecordingFormat::default(),
            smoothing: DEFAULT_SMOOTHING,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
        }
    }
}

impl Settings {
    /// Defaults with any dconf overrides applied
    pub fn load() -> Self {
        let mut settings = Self::default();
        settings.apply_overrides(|key| {
            let key = format!("{}{}", DCONF_PATH, key);
            dconf_rs::get_string(&key).ok().filter(|v| !v.is_empty())
        });
        settings
    }

    /// Apply overrides from `lookup`, keeping defaults for invalid values
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup(keys::RECORDINGS_DIR) {
            debug!("Recordings directory from settings: {}", dir);
            self.recordings_dir = expand_home(&dir);
        }

        if let Some(format) = lookup(keys::FORMAT) {
            match format.parse::<RecordingFormat>() {
                Ok(format) if format.is_supported() => self.format = format,
                Ok(format) => warn!("Format {} is not available in this build", format),
                Err(e) => warn!("Ignoring format setting: {}", e),
            }
        }

        if let Some(smoothing) = lookup(keys::SMOOTHING) {
            match smoothing.trim().parse::<f32>() {
                Ok(alpha) if alpha > 0.0 && alpha <= 1.0 => self.smoothing = alpha,
                _ => warn!("Ignoring smoothing setting {:?}; expected (0, 1]", smoothing),
            }
        }

        if let Some(capacity) = lookup(keys::HISTORY_CAPACITY) {
            match capacity.trim().parse::<usize>() {
                Ok(n) if n > 0 => self.history_capacity = n,
                _ => warn!("Ignoring history-capacity setting {:?}", capacity),
            }
        }
    }

    /// Recorder configuration for these settings
    pub fn recorder_config(&self) -> RecorderConfig {
        RecorderConfig {
            format: self.format,
            smoothing: self.smoothing,
            history_capacity: self.history_capacity,
            ..RecorderConfig::default()
        }
    }
}

fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path)),
        None => PathBuf::from(path),
    }
}
