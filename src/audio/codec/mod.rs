//! Recording file formats
//!
//! Sinks encode captured samples as they arrive; readers decode a whole file
//! for playback or probe its duration without decoding.

#[cfg(feature = "opus")]
mod ogg_opus;
mod wav;

use crate::error::CodecError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

#[cfg(feature = "opus")]
pub use ogg_opus::OggOpusSink;
pub use wav::WavSink;

/// Default encoder bitrate for lossy recordings ("high" quality for voice)
pub const DEFAULT_BITRATE: u32 = 96_000;

/// Container and codec used for new recordings
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecordingFormat {
    /// Opus in an Ogg container
    OggOpus,
    /// 16-bit PCM WAV
    Wav,
}

impl RecordingFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            RecordingFormat::OggOpus => "ogg",
            RecordingFormat::Wav => "wav",
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "ogg" | "opus" => Some(RecordingFormat::OggOpus),
            "wav" => Some(RecordingFormat::Wav),
            _ => None,
        }
    }

    /// Whether this build can write the format
    pub fn is_supported(&self) -> bool {
        match self {
            RecordingFormat::OggOpus => cfg!(feature = "opus"),
            RecordingFormat::Wav => true,
        }
    }

    /// Sniff the format from the file's magic bytes
    pub fn detect(path: &Path) -> Result<Self, CodecError> {
        let mut magic = [0u8; 4];
        let mut file = File::open(path)?;
        let read = file.read(&mut magic)?;
        match &magic[..read] {
            b"RIFF" => Ok(RecordingFormat::Wav),
            b"OggS" => Ok(RecordingFormat::OggOpus),
            [] => Err(CodecError::Malformed("file is empty".to_string())),
            _ => Err(CodecError::Unsupported(path.display().to_string())),
        }
    }
}

impl Default for RecordingFormat {
    fn default() -> Self {
        if cfg!(feature = "opus") {
            RecordingFormat::OggOpus
        } else {
            RecordingFormat::Wav
        }
    }
}

impl fmt::Display for RecordingFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordingFormat::OggOpus => write!(f, "ogg-opus"),
            RecordingFormat::Wav => write!(f, "wav"),
        }
    }
}

impl FromStr for RecordingFormat {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ogg-opus" | "ogg" | "opus" => Ok(RecordingFormat::OggOpus),
            "wav" => Ok(RecordingFormat::Wav),
            other => Err(CodecError::Unsupported(other.to_string())),
        }
    }
}

/// Streaming encoder for a single recording file
pub trait RecordingSink: Send {
    /// Append mono samples in [-1, 1]
    fn write(&mut self, samples: &[f32]) -> Result<(), CodecError>;

    /// Number of input samples accepted so far
    fn samples_written(&self) -> u64;

    /// Flush buffered data and close the file
    fn finalize(self: Box<Self>) -> Result<(), CodecError>;
}

/// Create the file at `path` and return a sink writing `format` into it
pub fn create_sink(
    format: RecordingFormat,
    path: &Path,
    sample_rate: u32,
    bitrate: u32,
) -> Result<Box<dyn RecordingSink>, CodecError> {
    match format {
        RecordingFormat::Wav => Ok(Box::new(WavSink::create(path, sample_rate)?)),
        #[cfg(feature = "opus")]
        RecordingFormat::OggOpus => Ok(Box::new(OggOpusSink::create(path, sample_rate, bitrate)?)),
        #[cfg(not(feature = "opus"))]
        RecordingFormat::OggOpus => {
            let _ = bitrate;
            Err(CodecError::Unsupported(
                "Ogg/Opus (built without the `opus` feature)".to_string(),
            ))
        }
    }
}

/// Fully decoded mono audio
#[derive(Clone, Debug, Default)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl DecodedAudio {
    pub fn duration_seconds(&self) -> f64 {
        duration_seconds(self.samples.len(), self.sample_rate)
    }
}

/// Get duration of samples in seconds
pub fn duration_seconds(sample_count: usize, sample_rate: u32) -> f64 {
    if sample_rate == 0 {
        return 0.0;
    }
    sample_count as f64 / sample_rate as f64
}

/// Decode a recording into mono samples
pub fn decode(path: &Path) -> Result<DecodedAudio, CodecError> {
    match RecordingFormat::detect(path)? {
        RecordingFormat::Wav => wav::decode(path),
        #[cfg(feature = "opus")]
        RecordingFormat::OggOpus => ogg_opus::decode(path),
        #[cfg(not(feature = "opus"))]
        RecordingFormat::OggOpus => Err(CodecError::Unsupported(
            "Ogg/Opus (built without the `opus` feature)".to_string(),
        )),
    }
}

/// Duration of a recording in seconds, read from container metadata
pub fn read_duration(path: &Path) -> Result<f64, CodecError> {
    match RecordingFormat::detect(path)? {
        RecordingFormat::Wav => wav::read_duration(path),
        #[cfg(feature = "opus")]
        RecordingFormat::OggOpus => ogg_opus::read_duration(path),
        #[cfg(not(feature = "opus"))]
        RecordingFormat::OggOpus => Err(CodecError::Unsupported(
            "Ogg/Opus (built without the `opus` feature)".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::testing::sine;

    fn record(format: RecordingFormat, path: &Path, samples: &[f32]) {
        let mut sink = create_sink(format, path, 44_100, DEFAULT_BITRATE).unwrap();
        for block in samples.chunks(1024) {
            sink.write(block).unwrap();
        }
        assert_eq!(sink.samples_written(), samples.len() as u64);
        sink.finalize().unwrap();
    }

    #[test]
    fn test_duration_calculation() {
        assert_eq!(duration_seconds(16000, 16000), 1.0);
        assert_eq!(duration_seconds(32000, 16000), 2.0);
        assert_eq!(duration_seconds(8000, 16000), 0.5);
        assert_eq!(duration_seconds(8000, 0), 0.0);
    }

    #[test]
    fn test_format_names() {
        assert_eq!("ogg".parse::<RecordingFormat>().unwrap(), RecordingFormat::OggOpus);
        assert_eq!(" WAV ".parse::<RecordingFormat>().unwrap(), RecordingFormat::Wav);
        assert!("aiff".parse::<RecordingFormat>().is_err());
        assert_eq!(RecordingFormat::from_extension("OGG"), Some(RecordingFormat::OggOpus));
        assert_eq!(RecordingFormat::Wav.extension(), "wav");
    }

    #[test]
    fn test_wav_recording_duration() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("take.wav");
        record(RecordingFormat::Wav, &path, &sine(3.0, 44_100));

        assert_eq!(RecordingFormat::detect(&path).unwrap(), RecordingFormat::Wav);
        let duration = read_duration(&path).unwrap();
        assert!((duration - 3.0).abs() < 0.1, "duration {}", duration);

        let decoded = decode(&path).unwrap();
        assert_eq!(decoded.sample_rate, 44_100);
        assert_eq!(decoded.samples.len(), 132_300);
    }

    #[cfg(feature = "opus")]
    #[test]
    fn test_ogg_opus_recording_duration() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("take.ogg");
        record(RecordingFormat::OggOpus, &path, &sine(3.0, 44_100));

        assert_eq!(RecordingFormat::detect(&path).unwrap(), RecordingFormat::OggOpus);
        let duration = read_duration(&path).unwrap();
        assert!((duration - 3.0).abs() < 0.1, "duration {}", duration);

        let decoded = decode(&path).unwrap();
        assert_eq!(decoded.sample_rate, 48_000);
        assert!((decoded.duration_seconds() - 3.0).abs() < 0.1);

        // Well under half the size of the same take as 16-bit PCM
        let size = std::fs::metadata(&path).unwrap().len();
        assert!(size < 132_300, "size {}", size);
    }

    #[cfg(feature = "opus")]
    #[test]
    fn test_ogg_opus_empty_recording() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.ogg");
        record(RecordingFormat::OggOpus, &path, &[]);
        assert_eq!(read_duration(&path).unwrap(), 0.0);
        assert!(decode(&path).unwrap().samples.is_empty());
    }

    #[cfg(feature = "opus")]
    #[test]
    fn test_ogg_opus_truncated_mid_take() {
        let dir = tempfile::tempdir().unwrap();
        let whole = dir.path().join("whole.ogg");
        record(RecordingFormat::OggOpus, &whole, &sine(3.0, 44_100));
        let bytes = std::fs::read(&whole).unwrap();

        // Cut inside the second second of audio, as a crash mid-take would.
        let partial = dir.path().join("partial.ogg");
        std::fs::write(&partial, &bytes[..bytes.len() * 3 / 5]).unwrap();
        let duration = read_duration(&partial).unwrap();
        assert!(duration >= 0.9 && duration < 3.0, "duration {}", duration);

        // Headers on disk but no audio page yet.
        let audio_start = bytes
            .windows(4)
            .enumerate()
            .filter(|(_, w)| *w == b"OggS")
            .nth(2)
            .map(|(i, _)| i)
            .unwrap();
        let headers_only = dir.path().join("headers.ogg");
        std::fs::write(&headers_only, &bytes[..audio_start]).unwrap();
        assert_eq!(read_duration(&headers_only).unwrap(), 0.0);

        // Cut inside the headers: nothing usable, but no panic either.
        let stub = dir.path().join("stub.ogg");
        std::fs::write(&stub, &bytes[..20]).unwrap();
        assert!(read_duration(&stub).is_err());
        assert!(decode(&stub).is_err());
    }

    #[test]
    fn test_empty_file_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zero.wav");
        std::fs::write(&path, b"").unwrap();
        assert!(matches!(read_duration(&path), Err(CodecError::Malformed(_))));
    }

    #[test]
    fn test_garbage_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("noise.wav");
        std::fs::write(&path, b"not audio at all").unwrap();
        assert!(decode(&path).is_err());
    }
}
