//! Platform audio stream abstraction
//!
//! The recorder and the playback transport only see mono `f32` sample
//! blocks. Backends run their own I/O thread and call back into the
//! closures handed to them.

use crate::error::BackendError;
use std::sync::Arc;

/// Receives captured mono samples on the backend's I/O thread.
///
/// That thread may be real-time, so the closure must not do file I/O.
pub type SampleSink = Box<dyn FnMut(&[f32]) + Send + 'static>;

/// Fills an output buffer with mono samples, returning how many were written.
///
/// Returning 0 signals end of media.
pub type SampleSource = Box<dyn FnMut(&mut [f32]) -> usize + Send + 'static>;

/// Requested stream format
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamFormat {
    pub sample_rate: u32,
    pub channels: u32,
}

impl StreamFormat {
    pub fn mono(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            channels: 1,
        }
    }
}

impl Default for StreamFormat {
    fn default() -> Self {
        Self::mono(44_100)
    }
}

/// An open input or output stream. Dropping it closes the stream.
pub trait AudioStream: Send {
    /// Stop the stream; no callback runs after this returns
    fn close(self: Box<Self>);
}

/// Opens audio streams on the platform's audio subsystem
pub trait AudioBackend: Send + Sync {
    fn open_input(
        &self,
        format: StreamFormat,
        on_samples: SampleSink,
    ) -> Result<Box<dyn AudioStream>, BackendError>;

    fn open_output(
        &self,
        format: StreamFormat,
        source: SampleSource,
    ) -> Result<Box<dyn AudioStream>, BackendError>;
}

/// The backend this build was compiled with
pub fn default_backend() -> Result<Arc<dyn AudioBackend>, BackendError> {
    #[cfg(feature = "pipewire")]
    {
        Ok(Arc::new(super::pipewire::PipeWireBackend::new()))
    }
    #[cfg(not(feature = "pipewire"))]
    {
        Err(BackendError::NoBackend)
    }
}
