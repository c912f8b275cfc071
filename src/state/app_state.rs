use super::RecordingCatalog;
use crate::audio::player::{Player, SharedPlayerState};
use crate::audio::recorder::{CompletedRecording, Recorder, SharedRecorderState};
use crate::error::{AppError, CatalogError};
use crate::models::Recording;
use log::{debug, warn};
use std::path::{Path, PathBuf};

/// Root application state
///
/// While a recording is running every other action on recordings is
/// refused with [`AppError::RecordingInProgress`].
pub struct AppState {
    recorder: Recorder,
    player: Player,
    catalog: RecordingCatalog,
    recordings: Vec<Recording>,
}

impl AppState {
    pub fn new(recorder: Recorder, player: Player, catalog: RecordingCatalog) -> Self {
        Self {
            recorder,
            player,
            catalog,
            recordings: Vec::new(),
        }
    }

    /// Recordings as of the last refresh, newest first
    pub fn recordings(&self) -> &[Recording] {
        &self.recordings
    }

    pub fn recorder_state(&self) -> SharedRecorderState {
        self.recorder.shared_state()
    }

    pub fn player_state(&self) -> SharedPlayerState {
        self.player.shared_state()
    }

    pub fn is_recording(&self) -> bool {
        self.recorder.is_recording()
    }

    /// Re-read the recordings directory
    pub fn refresh(&mut self) -> Result<(), CatalogError> {
        self.recordings = self.catalog.list()?;
        Ok(())
    }

    fn ensure_not_recording(&self) -> Result<(), AppError> {
        if self.is_recording() {
            return Err(AppError::RecordingInProgress);
        }
        Ok(())
    }

    /// Start a new recording in the recordings directory.
    ///
    /// Playback is stopped first.
    pub fn start_recording(&mut self) -> Result<PathBuf, AppError> {
        self.ensure_not_recording()?;
        self.player.stop();
        self.catalog.ensure_dir().map_err(CatalogError::from)?;

        let path = self.catalog.new_recording_path();
        self.recorder.start(&path)?;
        Ok(path)
    }

    /// Stop recording and pick up the new file in the listing
    pub fn stop_recording(&mut self) -> Result<Option<CompletedRecording>, AppError> {
        let Some(done) = self.recorder.stop() else {
            return Ok(None);
        };
        self.refresh()?;
        debug!("Catalog refreshed after recording {:?}", done.path);
        Ok(Some(done))
    }

    /// Load a recording into the player, stopping current playback
    pub fn open(&mut self, name: &str) -> Result<PathBuf, AppError> {
        self.ensure_not_recording()?;
        let path = self.catalog.resolve(name)?;
        self.player.stop();
        self.player.load(&path)?;
        Ok(path)
    }

    pub fn play(&mut self) -> Result<(), AppError> {
        self.ensure_not_recording()?;
        self.player.play()?;
        Ok(())
    }

    pub fn pause(&mut self) {
        self.player.pause();
    }

    pub fn seek(&mut self, fraction: f64) {
        self.player.seek(fraction);
    }

    pub fn stop_playback(&mut self) {
        self.player.stop();
    }

    pub fn delete(&mut self, name: &str) -> Result<(), AppError> {
        self.ensure_not_recording()?;
        let path = self.catalog.resolve(name)?;
        self.release_if_loaded(&path);
        self.catalog.delete(&path)?;
        self.refresh()?;
        Ok(())
    }

    /// Rename a recording, returning its new path
    pub fn rename(&mut self, name: &str, title: &str) -> Result<PathBuf, AppError> {
        self.ensure_not_recording()?;
        let path = self.catalog.resolve(name)?;
        self.release_if_loaded(&path);
        let renamed = self.catalog.rename(&path, title)?;
        self.refresh()?;
        Ok(renamed)
    }

    fn release_if_loaded(&mut self, path: &Path) {
        if self.player.shared_state().path().as_deref() == Some(path) {
            warn!("Stopping playback of {:?} before changing it", path);
            self.player.stop();
        }
    }
}
