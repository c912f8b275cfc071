//! Audio streams using PipeWire
//!
//! Each stream runs its own PipeWire main loop on a dedicated thread. The
//! opening call blocks until the stream is connected, so configuration
//! failures are reported to the caller instead of surfacing later.

use super::backend::{AudioBackend, AudioStream, SampleSink, SampleSource, StreamFormat};
use crate::error::BackendError;
use log::{debug, warn};
use ::pipewire as pw;
use pw::spa;
use pw::spa::param::format::{MediaSubtype, MediaType};
use pw::spa::param::format_utils;
use pw::spa::pod::Pod;
use std::sync::mpsc;
use std::thread::{self, JoinHandle};

const APP_NAME: &str = "Voicenote";

/// Backend that talks to the PipeWire daemon
#[derive(Debug, Default)]
pub struct PipeWireBackend;

impl PipeWireBackend {
    pub fn new() -> Self {
        Self
    }
}

impl AudioBackend for PipeWireBackend {
    fn open_input(
        &self,
        format: StreamFormat,
        on_samples: SampleSink,
    ) -> Result<Box<dyn AudioStream>, BackendError> {
        let stream = PipeWireStream::spawn(format, StreamHandler::Capture(on_samples))?;
        Ok(Box::new(stream))
    }

    fn open_output(
        &self,
        format: StreamFormat,
        source: SampleSource,
    ) -> Result<Box<dyn AudioStream>, BackendError> {
        let stream = PipeWireStream::spawn(format, StreamHandler::Playback(source))?;
        Ok(Box::new(stream))
    }
}

enum StreamHandler {
    Capture(SampleSink),
    Playback(SampleSource),
}

impl StreamHandler {
    fn direction(&self) -> spa::utils::Direction {
        match self {
            StreamHandler::Capture(_) => spa::utils::Direction::Input,
            StreamHandler::Playback(_) => spa::utils::Direction::Output,
        }
    }
}

enum StreamCommand {
    Stop,
}

/// A running PipeWire stream and the thread driving it
struct PipeWireStream {
    sender: Option<pw::channel::Sender<StreamCommand>>,
    thread_handle: Option<JoinHandle<()>>,
}

impl PipeWireStream {
    fn spawn(format: StreamFormat, handler: StreamHandler) -> Result<Self, BackendError> {
        let (sender, receiver) = pw::channel::channel::<StreamCommand>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), BackendError>>();

        let handle = thread::spawn(move || {
            if let Err(e) = run_stream_loop(format, handler, receiver, &ready_tx) {
                let _ = ready_tx.send(Err(e));
            }
        });

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                sender: Some(sender),
                thread_handle: Some(handle),
            }),
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(BackendError::Unavailable(
                    "PipeWire thread exited during setup".to_string(),
                ))
            }
        }
    }

    fn stop(&mut self) {
        if let Some(sender) = self.sender.take() {
            let _ = sender.send(StreamCommand::Stop);
        }
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl AudioStream for PipeWireStream {
    fn close(mut self: Box<Self>) {
        self.stop();
    }
}

impl Drop for PipeWireStream {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Run a PipeWire stream until told to stop (or until playback runs dry)
fn run_stream_loop(
    format: StreamFormat,
    handler: StreamHandler,
    receiver: pw::channel::Receiver<StreamCommand>,
    ready: &mpsc::Sender<Result<(), BackendError>>,
) -> Result<(), BackendError> {
    pw::init();

    let mainloop = pw::main_loop::MainLoopRc::new(None).map_err(|e| {
        BackendError::Unavailable(format!("Failed to create PipeWire main loop: {}", e))
    })?;

    let context = pw::context::ContextRc::new(&mainloop, None).map_err(|e| {
        BackendError::Unavailable(format!("Failed to create PipeWire context: {}", e))
    })?;

    let core = context
        .connect_rc(None)
        .map_err(|e| BackendError::Unavailable(format!("Failed to connect to PipeWire: {}", e)))?;

    let mainloop_weak = mainloop.downgrade();
    let _receiver = receiver.attach(mainloop.loop_(), move |cmd| match cmd {
        StreamCommand::Stop => {
            if let Some(mainloop) = mainloop_weak.upgrade() {
                mainloop.quit();
            }
        }
    });

    struct UserData {
        format: spa::param::audio::AudioInfoRaw,
        handler: StreamHandler,
        scratch: Vec<f32>,
        mainloop_weak: pw::main_loop::MainLoopWeak,
    }

    let is_capture = matches!(handler, StreamHandler::Capture(_));
    let (category, role, node_name) = if is_capture {
        ("Capture", "Communication", "voicenote-capture")
    } else {
        ("Playback", "Music", "voicenote-playback")
    };
    let direction = handler.direction();

    let user_data = UserData {
        format: Default::default(),
        handler,
        scratch: Vec::new(),
        mainloop_weak: mainloop.downgrade(),
    };

    let props = pw::properties::properties! {
        *pw::keys::MEDIA_TYPE => "Audio",
        *pw::keys::MEDIA_CATEGORY => category,
        *pw::keys::MEDIA_ROLE => role,
        *pw::keys::APP_NAME => APP_NAME,
    };

    let stream = pw::stream::StreamBox::new(&core, node_name, props)
        .map_err(|e| BackendError::Stream(format!("Failed to create PipeWire stream: {}", e)))?;

    let _listener = stream
        .add_local_listener_with_user_data(user_data)
        .param_changed(|_, user_data, id, param| {
            let Some(param) = param else { return };
            if id != spa::param::ParamType::Format.as_raw() {
                return;
            }

            let (media_type, media_subtype) = match format_utils::parse_format(param) {
                Ok(v) => v,
                Err(_) => return,
            };

            if media_type != MediaType::Audio || media_subtype != MediaSubtype::Raw {
                return;
            }

            if let Err(e) = user_data.format.parse(param) {
                warn!("Failed to parse negotiated audio format: {:?}", e);
                return;
            }
            debug!(
                "Negotiated {} Hz, {} channel(s)",
                user_data.format.rate(),
                user_data.format.channels()
            );
        })
        .process(|stream, user_data| {
            let Some(mut buffer) = stream.dequeue_buffer() else {
                return;
            };

            let datas = buffer.datas_mut();
            if datas.is_empty() {
                return;
            }

            let data = &mut datas[0];
            let n_channels = user_data.format.channels().max(1) as usize;
            let sample_size = std::mem::size_of::<f32>();
            let stride = sample_size * n_channels;

            match &mut user_data.handler {
                StreamHandler::Capture(on_samples) => {
                    let n_samples = data.chunk().size() as usize / sample_size;
                    let Some(raw_samples) = data.data() else {
                        return;
                    };

                    // Keep the first channel of each frame
                    user_data.scratch.clear();
                    for i in (0..n_samples).step_by(n_channels) {
                        let start = i * sample_size;
                        let end = start + sample_size;
                        if end <= raw_samples.len() {
                            let sample = f32::from_le_bytes(
                                raw_samples[start..end].try_into().unwrap_or([0; 4]),
                            );
                            user_data.scratch.push(sample);
                        }
                    }

                    on_samples(&user_data.scratch);
                }
                StreamHandler::Playback(source) => {
                    let Some(slice) = data.data() else {
                        return;
                    };

                    let n_frames = slice.len() / stride;
                    user_data.scratch.resize(n_frames, 0.0);
                    let written = source(&mut user_data.scratch[..n_frames]).min(n_frames);

                    if written == 0 {
                        if let Some(mainloop) = user_data.mainloop_weak.upgrade() {
                            mainloop.quit();
                        }
                        return;
                    }

                    for (i, &sample) in user_data.scratch[..written].iter().enumerate() {
                        let bytes = sample.to_le_bytes();
                        for channel in 0..n_channels {
                            let offset = i * stride + channel * sample_size;
                            slice[offset..offset + sample_size].copy_from_slice(&bytes);
                        }
                    }
                    let used = written * stride;
                    if used < slice.len() {
                        slice[used..].fill(0);
                    }

                    let chunk = data.chunk_mut();
                    *chunk.offset_mut() = 0;
                    *chunk.stride_mut() = stride as i32;
                    *chunk.size_mut() = used as u32;
                }
            }
        })
        .register()
        .map_err(|e| BackendError::Stream(format!("Failed to register stream listener: {}", e)))?;

    // Ask for F32LE at the requested rate; PipeWire converts from the device.
    let mut audio_info = spa::param::audio::AudioInfoRaw::new();
    audio_info.set_format(spa::param::audio::AudioFormat::F32LE);
    audio_info.set_rate(format.sample_rate);
    audio_info.set_channels(format.channels.max(1));

    let obj = spa::pod::Object {
        type_: spa::utils::SpaTypes::ObjectParamFormat.as_raw(),
        id: spa::param::ParamType::EnumFormat.as_raw(),
        properties: audio_info.into(),
    };

    let values: Vec<u8> = spa::pod::serialize::PodSerializer::serialize(
        std::io::Cursor::new(Vec::new()),
        &spa::pod::Value::Object(obj),
    )
    .map_err(|e| BackendError::Stream(format!("Failed to serialize audio format: {:?}", e)))?
    .0
    .into_inner();

    let pod = Pod::from_bytes(&values)
        .ok_or_else(|| BackendError::Stream("Serialized audio format is invalid".to_string()))?;
    let mut params = [pod];

    stream
        .connect(
            direction,
            None,
            pw::stream::StreamFlags::AUTOCONNECT
                | pw::stream::StreamFlags::MAP_BUFFERS
                | pw::stream::StreamFlags::RT_PROCESS,
            &mut params,
        )
        .map_err(|e| BackendError::Stream(format!("Failed to connect stream: {}", e)))?;

    let _ = ready.send(Ok(()));
    debug!("PipeWire {} stream running", node_name);

    mainloop.run();

    Ok(())
}
