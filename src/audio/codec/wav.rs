//! WAV files using hound
//!
//! Recordings are written as 16-bit mono PCM; any WAV hound can read is
//! accepted for playback and mixed down to mono.

use super::{DecodedAudio, RecordingSink};
use crate::error::CodecError;
use hound::{WavSpec, WavWriter};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

/// Streaming 16-bit PCM WAV writer
pub struct WavSink {
    writer: WavWriter<BufWriter<File>>,
    written: u64,
}

impl WavSink {
    pub fn create(path: &Path, sample_rate: u32) -> Result<Self, CodecError> {
        let spec = WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let writer = WavWriter::create(path, spec)?;
        Ok(Self { writer, written: 0 })
    }
}

impl RecordingSink for WavSink {
    fn write(&mut self, samples: &[f32]) -> Result<(), CodecError> {
        for &sample in samples {
            let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
            self.writer.write_sample(value)?;
        }
        self.written += samples.len() as u64;
        Ok(())
    }

    fn samples_written(&self) -> u64 {
        self.written
    }

    fn finalize(self: Box<Self>) -> Result<(), CodecError> {
        self.writer.finalize()?;
        Ok(())
    }
}

/// Load samples from a WAV file, mixed down to mono
pub fn decode(path: &Path) -> Result<DecodedAudio, CodecError> {
    let reader = hound::WavReader::open(path)?;

    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader.into_samples::<f32>().collect::<Result<_, _>>()?,
        hound::SampleFormat::Int => {
            // Convert integer samples to float
            let max_value = (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max_value))
                .collect::<Result<_, _>>()?
        }
    };

    let samples = if channels == 1 {
        interleaved
    } else {
        interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect()
    };

    Ok(DecodedAudio {
        samples,
        sample_rate: spec.sample_rate,
    })
}

/// Duration from the WAV header, without reading samples
pub fn read_duration(path: &Path) -> Result<f64, CodecError> {
    let reader = hound::WavReader::open(path)?;
    let frames = reader.duration() as usize;
    Ok(super::duration_seconds(frames, reader.spec().sample_rate))
}
