//! Ogg/Opus files
//!
//! Opus only runs at a handful of rates, so captured audio is resampled to
//! 48 kHz with an FFT resampler before encoding. The capture rate is still
//! recorded in the `OpusHead` header. Durations come from the final granule
//! position.

use super::{DecodedAudio, RecordingSink};
use crate::error::CodecError;
use log::{debug, warn};
use ogg::{PacketReader, PacketWriteEndInfo, PacketWriter};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

const OPUS_RATE: u32 = 48_000;
/// 20 ms at 48 kHz
const FRAME_SIZE: usize = 960;
/// Largest packet the encoder may produce
const MAX_PACKET: usize = 4000;
/// 120 ms at 48 kHz, the longest Opus frame
const MAX_FRAME: usize = 5760;
/// Encoder lookahead at 48 kHz, skipped by decoders
const PRE_SKIP: u16 = 312;
/// Flush a page roughly every second of audio
const PACKETS_PER_PAGE: u64 = 50;
/// Input frames per resampler chunk
const RESAMPLE_CHUNK: usize = 1024;
const VENDOR: &str = concat!("voicenote ", env!("CARGO_PKG_VERSION"));

/// Streaming Ogg/Opus encoder
pub struct OggOpusSink {
    writer: PacketWriter<'static, BufWriter<File>>,
    encoder: opus::Encoder,
    /// `None` when capturing at 48 kHz already
    resampler: Option<OpusResampler>,
    serial: u32,
    /// Resampled audio waiting for a full frame
    pending: Vec<f32>,
    /// Last encoded packet, held back so the final one can end the stream
    held: Option<Vec<u8>>,
    packets: u64,
    /// 48 kHz samples produced from real input
    produced: u64,
    written: u64,
    scratch: Vec<u8>,
}

impl OggOpusSink {
    pub fn create(path: &Path, sample_rate: u32, bitrate: u32) -> Result<Self, CodecError> {
        let resampler = if sample_rate == OPUS_RATE {
            None
        } else {
            Some(OpusResampler::new(sample_rate, OPUS_RATE)?)
        };
        let file = File::create(path)?;
        let mut encoder =
            opus::Encoder::new(OPUS_RATE, opus::Channels::Mono, opus::Application::Audio)?;
        encoder.set_bitrate(opus::Bitrate::Bits(bitrate as i32))?;

        let serial = uuid::Uuid::new_v4().as_u128() as u32;
        let mut writer = PacketWriter::new(BufWriter::new(file));
        writer.write_packet(
            opus_head(sample_rate),
            serial,
            PacketWriteEndInfo::EndPage,
            0,
        )?;
        writer.write_packet(opus_tags(), serial, PacketWriteEndInfo::EndPage, 0)?;

        debug!(
            "Opened Ogg/Opus sink {:?} ({} Hz in, {} bps)",
            path, sample_rate, bitrate
        );

        Ok(Self {
            writer,
            encoder,
            resampler,
            serial,
            pending: Vec::with_capacity(FRAME_SIZE * 2),
            held: None,
            packets: 0,
            produced: 0,
            written: 0,
            scratch: vec![0u8; MAX_PACKET],
        })
    }

    /// Encode every whole frame waiting in `pending`
    fn encode_pending(&mut self) -> Result<(), CodecError> {
        let full = self.pending.len() / FRAME_SIZE * FRAME_SIZE;
        if full == 0 {
            return Ok(());
        }
        let frames: Vec<f32> = self.pending.drain(..full).collect();
        for frame in frames.chunks(FRAME_SIZE) {
            let packet = self.encode_frame(frame)?;
            self.push_packet(packet)?;
        }
        Ok(())
    }

    fn encode_frame(&mut self, frame: &[f32]) -> Result<Vec<u8>, CodecError> {
        let len = self.encoder.encode_float(frame, &mut self.scratch)?;
        Ok(self.scratch[..len].to_vec())
    }

    /// Write the held packet now that another one follows it
    fn push_packet(&mut self, packet: Vec<u8>) -> Result<(), CodecError> {
        if let Some(previous) = self.held.replace(packet) {
            self.packets += 1;
            let granule = PRE_SKIP as u64 + self.packets * FRAME_SIZE as u64;
            let end = if self.packets % PACKETS_PER_PAGE == 0 {
                PacketWriteEndInfo::EndPage
            } else {
                PacketWriteEndInfo::NormalPacket
            };
            self.writer.write_packet(previous, self.serial, end, granule)?;
        }
        Ok(())
    }
}

impl RecordingSink for OggOpusSink {
    fn write(&mut self, samples: &[f32]) -> Result<(), CodecError> {
        let before = self.pending.len();
        match self.resampler.as_mut() {
            Some(resampler) => resampler.process(samples, &mut self.pending)?,
            None => self.pending.extend_from_slice(samples),
        }
        self.produced += (self.pending.len() - before) as u64;
        self.written += samples.len() as u64;
        self.encode_pending()
    }

    fn samples_written(&self) -> u64 {
        self.written
    }

    fn finalize(mut self: Box<Self>) -> Result<(), CodecError> {
        if let Some(mut resampler) = self.resampler.take() {
            let before = self.pending.len();
            resampler.flush(&mut self.pending)?;
            self.produced += (self.pending.len() - before) as u64;
            self.encode_pending()?;
        }

        // Pad the tail (or an empty take) out to one whole frame.
        if !self.pending.is_empty() || self.held.is_none() {
            let mut frame = std::mem::take(&mut self.pending);
            frame.resize(FRAME_SIZE, 0.0);
            let packet = self.encode_frame(&frame)?;
            self.push_packet(packet)?;
        }

        if let Some(last) = self.held.take() {
            // The final granule trims the padding off the end.
            let granule = PRE_SKIP as u64 + self.produced;
            self.writer
                .write_packet(last, self.serial, PacketWriteEndInfo::EndStream, granule)?;
        }

        let mut inner = self.writer.into_inner();
        inner.flush()?;
        debug!(
            "Finalized Ogg/Opus sink: {} samples in, {:.2}s",
            self.written,
            self.produced as f64 / OPUS_RATE as f64
        );
        Ok(())
    }
}

/// Decode an Ogg/Opus file to 48 kHz mono
pub fn decode(path: &Path) -> Result<DecodedAudio, CodecError> {
    let mut reader = PacketReader::new(BufReader::new(File::open(path)?));
    let pre_skip = read_headers(&mut reader)?;

    let mut decoder = opus::Decoder::new(OPUS_RATE, opus::Channels::Mono)?;
    let mut buffer = vec![0f32; MAX_FRAME];
    let mut samples = Vec::new();
    let mut last_granule = None;

    while let Some(packet) = reader.read_packet()? {
        let decoded = decoder.decode_float(&packet.data, &mut buffer, false)?;
        samples.extend_from_slice(&buffer[..decoded]);
        if packet.last_in_page() && is_valid_granule(packet.absgp_page()) {
            last_granule = Some(packet.absgp_page());
        }
    }

    let skip = (pre_skip as usize).min(samples.len());
    samples.drain(..skip);
    if let Some(granule) = last_granule {
        let total = granule.saturating_sub(pre_skip as u64) as usize;
        samples.truncate(total);
    }

    Ok(DecodedAudio {
        samples,
        sample_rate: OPUS_RATE,
    })
}

/// Duration from the last granule position.
///
/// A file that is still being written ends in a partial page; whatever was
/// complete before it is reported. One that has no audio pages on disk yet
/// reports zero, and one cut off inside its headers is an error.
pub fn read_duration(path: &Path) -> Result<f64, CodecError> {
    let mut reader = PacketReader::new(BufReader::new(File::open(path)?));
    let pre_skip = read_headers(&mut reader)?;

    let mut last_granule = pre_skip as u64;
    loop {
        match reader.read_packet() {
            Ok(Some(packet)) => {
                if packet.last_in_page() && is_valid_granule(packet.absgp_page()) {
                    last_granule = packet.absgp_page();
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!("Stopped reading {:?} at a damaged page: {}", path, e);
                break;
            }
        }
    }

    let samples = last_granule.saturating_sub(pre_skip as u64);
    Ok(samples as f64 / OPUS_RATE as f64)
}

fn is_valid_granule(granule: u64) -> bool {
    granule != u64::MAX
}

/// Read `OpusHead` and `OpusTags`, returning the pre-skip
fn read_headers(reader: &mut PacketReader<BufReader<File>>) -> Result<u16, CodecError> {
    let head = reader
        .read_packet()?
        .ok_or_else(|| CodecError::Malformed("Ogg stream has no packets".to_string()))?;
    let pre_skip = parse_opus_head(&head.data)?;

    let tags = reader
        .read_packet()?
        .ok_or_else(|| CodecError::Malformed("missing OpusTags header".to_string()))?;
    if !tags.data.starts_with(b"OpusTags") {
        return Err(CodecError::Malformed("missing OpusTags header".to_string()));
    }

    Ok(pre_skip)
}

fn parse_opus_head(data: &[u8]) -> Result<u16, CodecError> {
    if data.len() < 19 || !data.starts_with(b"OpusHead") {
        return Err(CodecError::Unsupported(
            "Ogg stream does not carry Opus audio".to_string(),
        ));
    }
    Ok(u16::from_le_bytes([data[10], data[11]]))
}

fn opus_head(input_rate: u32) -> Vec<u8> {
    let mut head = Vec::with_capacity(19);
    head.extend_from_slice(b"OpusHead");
    head.push(1); // version
    head.push(1); // channels
    head.extend_from_slice(&PRE_SKIP.to_le_bytes());
    head.extend_from_slice(&input_rate.to_le_bytes());
    head.extend_from_slice(&0i16.to_le_bytes()); // output gain
    head.push(0); // mapping family
    head
}

fn opus_tags() -> Vec<u8> {
    let mut tags = Vec::new();
    tags.extend_from_slice(b"OpusTags");
    tags.extend_from_slice(&(VENDOR.len() as u32).to_le_bytes());
    tags.extend_from_slice(VENDOR.as_bytes());
    tags.extend_from_slice(&0u32.to_le_bytes()); // no user comments
    tags
}

/// Streaming FFT resampler from the capture rate to 48 kHz.
///
/// Drops the filter delay from the front and, on flush, trims the zero
/// padding so the output length matches the input length at the new rate.
struct OpusResampler {
    resampler: rubato::FftFixedInOut<f32>,
    input_buffer: Vec<Vec<f32>>,
    output_buffer: Vec<Vec<f32>>,
    pending: Vec<f32>,
    /// Leading output frames still to drop
    delay: usize,
    in_rate: u32,
    out_rate: u32,
    consumed: u64,
    emitted: u64,
}

impl OpusResampler {
    fn new(in_rate: u32, out_rate: u32) -> Result<Self, CodecError> {
        use rubato::Resampler as _;
        if in_rate == 0 || out_rate == 0 {
            return Err(CodecError::Unsupported(format!(
                "resampling {} Hz to {} Hz",
                in_rate, out_rate
            )));
        }
        let resampler = rubato::FftFixedInOut::<f32>::new(
            in_rate as usize,
            out_rate as usize,
            RESAMPLE_CHUNK,
            1,
        )?;
        let input_buffer = resampler.input_buffer_allocate(true);
        let output_buffer = resampler.output_buffer_allocate(true);
        let delay = resampler.output_delay();
        Ok(Self {
            resampler,
            input_buffer,
            output_buffer,
            pending: Vec::new(),
            delay,
            in_rate,
            out_rate,
            consumed: 0,
            emitted: 0,
        })
    }

    fn process(&mut self, input: &[f32], out: &mut Vec<f32>) -> Result<(), CodecError> {
        use rubato::Resampler as _;

        self.pending.extend_from_slice(input);
        self.consumed += input.len() as u64;

        while self.pending.len() >= self.resampler.input_frames_next() {
            let chunk_size = self.resampler.input_frames_next();
            self.input_buffer[0].copy_from_slice(&self.pending[..chunk_size]);
            let (_in_len, out_len) = self.resampler.process_into_buffer(
                &self.input_buffer,
                &mut self.output_buffer,
                None,
            )?;
            self.emit(out_len, out);
            self.pending.drain(..chunk_size);
        }
        Ok(())
    }

    /// Push the buffered tail and the filter delay out with zero padding
    fn flush(&mut self, out: &mut Vec<f32>) -> Result<(), CodecError> {
        use rubato::Resampler as _;

        let expected = (self.consumed * self.out_rate as u64).div_ceil(self.in_rate as u64);
        while self.emitted < expected {
            let tail = [self.pending.as_slice()];
            let (_in_len, out_len) = self.resampler.process_partial_into_buffer(
                Some(&tail[..]),
                &mut self.output_buffer,
                None,
            )?;
            self.pending.clear();
            self.emit(out_len, out);
        }

        let excess = (self.emitted - expected) as usize;
        out.truncate(out.len().saturating_sub(excess));
        self.emitted = expected;
        Ok(())
    }

    fn emit(&mut self, len: usize, out: &mut Vec<f32>) {
        let skip = self.delay.min(len);
        self.delay -= skip;
        out.extend_from_slice(&self.output_buffer[0][skip..len]);
        self.emitted += (len - skip) as u64;
    }
}
