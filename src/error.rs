//! Error types for the capture, playback and catalog layers

use std::path::PathBuf;
use thiserror::Error;

/// Failures reported by the platform audio backend.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The audio subsystem could not be reached or the device is busy
    #[error("audio subsystem unavailable: {0}")]
    Unavailable(String),

    /// A stream was created but could not be configured or connected
    #[error("audio stream failed: {0}")]
    Stream(String),

    /// This build carries no audio backend
    #[error("built without an audio backend (enable the `pipewire` feature)")]
    NoBackend,
}

/// Failures while encoding, decoding or probing recording files.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[cfg(feature = "opus")]
    #[error("Ogg container error: {0}")]
    Ogg(#[from] ogg::OggReadError),

    #[cfg(feature = "opus")]
    #[error("Opus codec error: {0}")]
    Opus(#[from] opus::Error),

    #[cfg(feature = "opus")]
    #[error("cannot set up resampler: {0}")]
    ResamplerSetup(#[from] rubato::ResamplerConstructionError),

    #[cfg(feature = "opus")]
    #[error("resampling failed: {0}")]
    Resample(#[from] rubato::ResampleError),

    #[error("malformed audio file: {0}")]
    Malformed(String),

    #[error("unsupported audio format: {0}")]
    Unsupported(String),
}

/// Errors surfaced synchronously by `Recorder::start`.
#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("microphone access was denied; allow microphone access in your system privacy settings and try again")]
    PermissionDenied,

    #[error("could not configure the audio capture session: {0}")]
    SessionConfig(#[source] BackendError),

    #[error("cannot create recording file {path}: {source}")]
    SinkOpen {
        path: PathBuf,
        #[source]
        source: CodecError,
    },

    #[error("a recording is already in progress; stop it before starting another")]
    AlreadyRecording,
}

/// Errors surfaced by `Player::load`.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("recording not found: {0}")]
    NotFound(PathBuf),

    #[error("cannot read {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: CodecError,
    },
}

/// Errors from a playback transport when it starts its output.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("cannot start audio output: {0}")]
    Output(#[from] BackendError),
}

/// Errors from the recordings directory.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("recordings directory error: {0}")]
    Io(#[from] std::io::Error),

    #[error("title must not be empty")]
    InvalidTitle,

    #[error("a recording named {0} already exists")]
    AlreadyExists(PathBuf),

    #[error("no recording matches {0:?}")]
    NoSuchRecording(String),
}

/// Errors from the caller-side policy layer.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("please stop the recording to perform any further action")]
    RecordingInProgress,

    #[error(transparent)]
    Recorder(#[from] RecorderError),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),
}
