//! Playback transports
//!
//! A [`Transport`] is the thing the player drives: it knows the media
//! duration and current time and can start, pause and relocate output.
//! [`PcmTransport`] plays fully decoded samples through an audio backend.

use super::backend::{AudioBackend, AudioStream, StreamFormat};
use super::codec::{self, DecodedAudio};
use super::waveform::{summarize, OVERVIEW_BARS};
use crate::error::{LoadError, TransportError};
use log::debug;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Underlying playback engine for one loaded file
pub trait Transport: Send {
    /// Total length in seconds, fixed once loaded
    fn duration(&self) -> f64;

    /// Current playhead in seconds
    fn current_time(&self) -> f64;

    /// Whether audio is being produced right now.
    ///
    /// Turns false on its own when the media runs out.
    fn is_playing(&self) -> bool;

    /// Start or resume output from the current time
    fn play(&mut self) -> Result<(), TransportError>;

    fn pause(&mut self);

    /// Stop output, rewind, and release the output device
    fn stop(&mut self);

    /// Move the playhead to `seconds`, clamped to the media
    fn seek(&mut self, seconds: f64);

    /// Coarse level overview of the whole file, if known
    fn overview(&self) -> Vec<f32> {
        Vec::new()
    }
}

/// Opens a transport for a file
pub trait MediaOpener: Send + Sync {
    fn open(&self, path: &Path) -> Result<Box<dyn Transport>, LoadError>;
}

/// Opens files by decoding them completely and playing them from memory
pub struct DecodingOpener {
    backend: Arc<dyn AudioBackend>,
}

impl DecodingOpener {
    pub fn new(backend: Arc<dyn AudioBackend>) -> Self {
        Self { backend }
    }
}

impl MediaOpener for DecodingOpener {
    fn open(&self, path: &Path) -> Result<Box<dyn Transport>, LoadError> {
        if !path.is_file() {
            return Err(LoadError::NotFound(path.to_path_buf()));
        }
        let decoded = codec::decode(path).map_err(|source| LoadError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(
            "Decoded {:?}: {} samples at {} Hz",
            path,
            decoded.samples.len(),
            decoded.sample_rate
        );
        Ok(Box::new(PcmTransport::new(self.backend.clone(), decoded)))
    }
}

/// Shared state for audio playback - thread-safe
#[derive(Clone)]
pub struct SharedPlaybackState {
    inner: Arc<Mutex<PlaybackStateInner>>,
}

struct PlaybackStateInner {
    /// Audio samples to play
    samples: Vec<f32>,
    sample_rate: u32,
    /// Current playback position (sample index)
    position: usize,
    /// Is playback active
    is_playing: bool,
    /// Ran out of samples while playing
    finished: bool,
}

impl SharedPlaybackState {
    pub fn new(audio: DecodedAudio) -> Self {
        Self {
            inner: Arc::new(Mutex::new(PlaybackStateInner {
                samples: audio.samples,
                sample_rate: audio.sample_rate.max(1),
                position: 0,
                is_playing: false,
                finished: false,
            })),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.inner.lock().unwrap().sample_rate
    }

    /// Get total duration in seconds
    pub fn duration(&self) -> f64 {
        let inner = self.inner.lock().unwrap();
        codec::duration_seconds(inner.samples.len(), inner.sample_rate)
    }

    /// Get current playback position in seconds
    pub fn current_time(&self) -> f64 {
        let inner = self.inner.lock().unwrap();
        codec::duration_seconds(inner.position, inner.sample_rate)
    }

    pub fn is_playing(&self) -> bool {
        self.inner.lock().unwrap().is_playing
    }

    /// Whether playback last stopped by running out of samples
    pub fn finished(&self) -> bool {
        self.inner.lock().unwrap().finished
    }

    fn set_playing(&self, playing: bool) {
        self.inner.lock().unwrap().is_playing = playing;
    }

    /// Seek to a time in seconds
    pub fn seek_seconds(&self, seconds: f64) {
        let mut inner = self.inner.lock().unwrap();
        let seconds = if seconds.is_finite() { seconds.max(0.0) } else { 0.0 };
        let target = (seconds * inner.sample_rate as f64).round() as usize;
        inner.position = target.min(inner.samples.len());
        inner.finished = false;
    }

    /// Coarse overview of the loaded samples
    pub fn overview(&self, bars: usize) -> Vec<f32> {
        summarize(&self.inner.lock().unwrap().samples, bars)
    }

    /// Copy the next samples into `out`, advancing the playhead.
    ///
    /// Returns how many were written; 0 once paused or at the end.
    pub fn fill(&self, out: &mut [f32]) -> usize {
        let mut inner = self.inner.lock().unwrap();
        if !inner.is_playing {
            return 0;
        }

        let start = inner.position;
        let end = (start + out.len()).min(inner.samples.len());
        let count = end - start;
        out[..count].copy_from_slice(&inner.samples[start..end]);
        inner.position = end;

        if inner.position >= inner.samples.len() {
            inner.is_playing = false;
            inner.finished = true;
        }
        count
    }
}

/// Transport playing decoded samples through the audio backend
pub struct PcmTransport {
    backend: Arc<dyn AudioBackend>,
    state: SharedPlaybackState,
    overview: Vec<f32>,
    stream: Option<Box<dyn AudioStream>>,
}

impl PcmTransport {
    pub fn new(backend: Arc<dyn AudioBackend>, audio: DecodedAudio) -> Self {
        let state = SharedPlaybackState::new(audio);
        let overview = state.overview(OVERVIEW_BARS);
        Self {
            backend,
            state,
            overview,
            stream: None,
        }
    }

    fn close_stream(&mut self) {
        if let Some(stream) = self.stream.take() {
            stream.close();
        }
    }
}

impl Transport for PcmTransport {
    fn duration(&self) -> f64 {
        self.state.duration()
    }

    fn current_time(&self) -> f64 {
        self.state.current_time()
    }

    fn is_playing(&self) -> bool {
        self.state.is_playing()
    }

    fn play(&mut self) -> Result<(), TransportError> {
        if self.stream.is_some() && self.state.is_playing() {
            return Ok(());
        }
        self.close_stream();

        // Reset position to start if we've finished
        if self.state.finished() {
            self.state.seek_seconds(0.0);
        }

        self.state.set_playing(true);
        let state = self.state.clone();
        let stream = self.backend.open_output(
            StreamFormat::mono(self.state.sample_rate()),
            Box::new(move |out| state.fill(out)),
        );

        match stream {
            Ok(stream) => {
                self.stream = Some(stream);
                Ok(())
            }
            Err(e) => {
                self.state.set_playing(false);
                Err(TransportError::Output(e))
            }
        }
    }

    fn pause(&mut self) {
        self.state.set_playing(false);
        self.close_stream();
    }

    fn stop(&mut self) {
        self.pause();
        self.state.seek_seconds(0.0);
    }

    fn seek(&mut self, seconds: f64) {
        self.state.seek_seconds(seconds);
    }

    fn overview(&self) -> Vec<f32> {
        self.overview.clone()
    }
}

impl Drop for PcmTransport {
    fn drop(&mut self) {
        self.close_stream();
    }
}
