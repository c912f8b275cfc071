//! In-memory audio backend for tests

use super::backend::{AudioBackend, AudioStream, SampleSink, SampleSource, StreamFormat};
use crate::error::BackendError;
use std::sync::{Arc, Mutex};

#[derive(Clone, Default)]
pub struct FakeBackend {
    inner: Arc<Mutex<FakeInner>>,
}

#[derive(Default)]
struct FakeInner {
    fail_input: bool,
    fail_output: bool,
    next_id: u64,
    input: Option<(u64, Option<SampleSink>)>,
    output: Option<(u64, Option<SampleSource>)>,
    formats: Vec<StreamFormat>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_input() -> Self {
        let backend = Self::new();
        backend.inner.lock().unwrap().fail_input = true;
        backend
    }

    pub fn set_fail_output(&self, fail: bool) {
        self.inner.lock().unwrap().fail_output = fail;
    }

    pub fn input_open(&self) -> bool {
        self.inner.lock().unwrap().input.is_some()
    }

    pub fn output_open(&self) -> bool {
        self.inner.lock().unwrap().output.is_some()
    }

    pub fn last_format(&self) -> Option<StreamFormat> {
        self.inner.lock().unwrap().formats.last().copied()
    }

    /// Deliver captured samples as the audio thread would
    pub fn feed(&self, samples: &[f32]) -> bool {
        let taken = {
            let mut inner = self.inner.lock().unwrap();
            inner.input.as_mut().and_then(|(id, sink)| sink.take().map(|s| (*id, s)))
        };
        let Some((id, mut sink)) = taken else {
            return false;
        };
        sink(samples);
        let mut inner = self.inner.lock().unwrap();
        if let Some((open_id, slot)) = inner.input.as_mut() {
            if *open_id == id {
                *slot = Some(sink);
            }
        }
        true
    }

    /// Pull `frames` samples from the open output, as the device would
    pub fn pull(&self, frames: usize) -> Vec<f32> {
        let taken = {
            let mut inner = self.inner.lock().unwrap();
            inner.output.as_mut().and_then(|(id, source)| source.take().map(|s| (*id, s)))
        };
        let Some((id, mut source)) = taken else {
            return Vec::new();
        };
        let mut buffer = vec![0.0; frames];
        let written = source(&mut buffer);
        buffer.truncate(written);
        let mut inner = self.inner.lock().unwrap();
        if let Some((open_id, slot)) = inner.output.as_mut() {
            if *open_id == id {
                *slot = Some(source);
            }
        }
        buffer
    }
}

enum Direction {
    Input,
    Output,
}

struct FakeStream {
    inner: Arc<Mutex<FakeInner>>,
    id: u64,
    direction: Direction,
}

impl AudioStream for FakeStream {
    fn close(self: Box<Self>) {}
}

impl Drop for FakeStream {
    fn drop(&mut self) {
        let mut inner = self.inner.lock().unwrap();
        match self.direction {
            Direction::Input => {
                if matches!(inner.input, Some((id, _)) if id == self.id) {
                    inner.input = None;
                }
            }
            Direction::Output => {
                if matches!(inner.output, Some((id, _)) if id == self.id) {
                    inner.output = None;
                }
            }
        }
    }
}

impl AudioBackend for FakeBackend {
    fn open_input(
        &self,
        format: StreamFormat,
        on_samples: SampleSink,
    ) -> Result<Box<dyn AudioStream>, BackendError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_input {
            return Err(BackendError::Unavailable("device busy".to_string()));
        }
        inner.next_id += 1;
        let id = inner.next_id;
        inner.input = Some((id, Some(on_samples)));
        inner.formats.push(format);
        Ok(Box::new(FakeStream {
            inner: self.inner.clone(),
            id,
            direction: Direction::Input,
        }))
    }

    fn open_output(
        &self,
        format: StreamFormat,
        source: SampleSource,
    ) -> Result<Box<dyn AudioStream>, BackendError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_output {
            return Err(BackendError::Unavailable("no output device".to_string()));
        }
        inner.next_id += 1;
        let id = inner.next_id;
        inner.output = Some((id, Some(source)));
        inner.formats.push(format);
        Ok(Box::new(FakeStream {
            inner: self.inner.clone(),
            id,
            direction: Direction::Output,
        }))
    }
}

/// A 440 Hz tone at half scale
pub fn sine(seconds: f64, sample_rate: u32) -> Vec<f32> {
    let n = (seconds * sample_rate as f64).round() as usize;
    (0..n)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            0.5 * (2.0 * std::f32::consts::PI * 440.0 * t).sin()
        })
        .collect()
}
