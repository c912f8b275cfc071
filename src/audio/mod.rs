//! Audio capture, metering and playback
//!
//! This module provides:
//! - Microphone capture into Ogg/Opus or WAV files
//! - Real-time level metering with a bounded history for waveforms
//! - Single-file playback with a scrubbable position
//!
//! Platform audio sits behind [`AudioBackend`]; the PipeWire backend is
//! built with the `pipewire` feature.

pub mod backend;
pub mod codec;
pub mod meter;
pub mod permission;
pub mod player;
#[cfg(feature = "pipewire")]
mod pipewire;
pub mod recorder;
pub mod scheduler;
pub mod transport;
pub mod waveform;

#[cfg(test)]
pub(crate) mod testing;

pub use backend::{default_backend, AudioBackend, AudioStream, StreamFormat};
pub use codec::{read_duration, RecordingFormat};
pub use meter::{LevelHistory, LevelMeter};
pub use permission::{PermissionProvider, PermissionStatus, StaticPermission};
pub use player::{Player, PlayerState, SharedPlayerState, DEFAULT_PROGRESS_INTERVAL};
pub use recorder::{CompletedRecording, Recorder, RecorderConfig, RecorderState, SharedRecorderState};
pub use scheduler::{ManualScheduler, Scheduler, ThreadScheduler, TickHandle};
pub use transport::{DecodingOpener, MediaOpener, PcmTransport, Transport};
