//! Recording sessions
//!
//! A [`Recorder`] owns at most one session at a time: an open input stream,
//! a writer thread feeding the file sink, and the metering tick. The audio
//! callback only sums power and hands blocks to the writer; it never touches
//! the file. Observers read progress through a cloned [`SharedRecorderState`].

use super::backend::{AudioBackend, AudioStream, StreamFormat};
use super::codec::{self, RecordingFormat, RecordingSink, DEFAULT_BITRATE};
use super::meter::{
    LevelHistory, LevelMeter, PowerAccumulator, DEFAULT_HISTORY_CAPACITY, DEFAULT_SMOOTHING,
};
use super::permission::{PermissionCache, PermissionProvider};
use super::scheduler::{Scheduler, TickHandle, TickTask};
use crate::error::RecorderError;
use log::{debug, error, info, warn};
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Where the recorder is in its lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecorderState {
    Idle,
    RequestingPermission,
    Recording,
}

/// Recording configuration
#[derive(Clone, Debug)]
pub struct RecorderConfig {
    pub format: RecordingFormat,
    /// Capture sample rate (default: 44100)
    pub sample_rate: u32,
    /// Encoder bitrate for lossy formats
    pub bitrate: u32,
    /// Metering tick period (default: ~60 Hz)
    pub meter_interval: Duration,
    /// Level smoothing factor
    pub smoothing: f32,
    /// Number of levels kept for the waveform
    pub history_capacity: usize,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            format: RecordingFormat::default(),
            sample_rate: 44_100,
            bitrate: DEFAULT_BITRATE,
            meter_interval: Duration::from_millis(16),
            smoothing: DEFAULT_SMOOTHING,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
        }
    }
}

/// A finished take
#[derive(Clone, Debug, PartialEq)]
pub struct CompletedRecording {
    pub path: PathBuf,
    pub elapsed: Duration,
}

/// Shared state for the recorder - thread-safe
#[derive(Clone)]
pub struct SharedRecorderState {
    inner: Arc<Mutex<RecorderStateInner>>,
}

struct RecorderStateInner {
    state: RecorderState,
    /// Bumped on every start and stop; ticks from older sessions are ignored
    generation: u64,
    current_level: f32,
    elapsed: Duration,
    started_at: Duration,
    history: LevelHistory,
    meter: LevelMeter,
    destination: Option<PathBuf>,
    error: Option<String>,
}

impl SharedRecorderState {
    fn new(config: &RecorderConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(RecorderStateInner {
                state: RecorderState::Idle,
                generation: 0,
                current_level: 0.0,
                elapsed: Duration::ZERO,
                started_at: Duration::ZERO,
                history: LevelHistory::new(config.history_capacity),
                meter: LevelMeter::new(config.smoothing),
                destination: None,
                error: None,
            })),
        }
    }

    pub fn state(&self) -> RecorderState {
        self.inner.lock().unwrap().state
    }

    pub fn is_recording(&self) -> bool {
        self.state() == RecorderState::Recording
    }

    /// Smoothed level from the latest metering tick, in [0, 1]
    pub fn current_level(&self) -> f32 {
        self.inner.lock().unwrap().current_level
    }

    /// Time since the current take started; zero when idle
    pub fn elapsed(&self) -> Duration {
        self.inner.lock().unwrap().elapsed
    }

    /// Recent levels, oldest first
    pub fn levels(&self) -> Vec<f32> {
        self.inner.lock().unwrap().history.to_vec()
    }

    /// File being written, while recording
    pub fn destination(&self) -> Option<PathBuf> {
        self.inner.lock().unwrap().destination.clone()
    }

    pub fn last_error(&self) -> Option<String> {
        self.inner.lock().unwrap().error.clone()
    }

    fn set_state(&self, state: RecorderState) {
        self.inner.lock().unwrap().state = state;
    }

    fn fail(&self, error: String) {
        let mut inner = self.inner.lock().unwrap();
        inner.state = RecorderState::Idle;
        inner.error = Some(error);
    }

    fn set_error(&self, error: String) {
        self.inner.lock().unwrap().error = Some(error);
    }

    /// Enter `Recording` and return the new session's generation
    fn begin(&self, destination: &Path, now: Duration) -> u64 {
        let mut inner = self.inner.lock().unwrap();
        inner.generation += 1;
        inner.state = RecorderState::Recording;
        inner.started_at = now;
        inner.elapsed = Duration::ZERO;
        inner.current_level = 0.0;
        inner.history.clear();
        inner.meter.reset();
        inner.destination = Some(destination.to_path_buf());
        inner.error = None;
        inner.generation
    }

    /// Leave `Recording`, returning how long the take ran
    fn end(&self, now: Duration) -> Duration {
        let mut inner = self.inner.lock().unwrap();
        inner.generation += 1;
        let elapsed = now.saturating_sub(inner.started_at);
        inner.state = RecorderState::Idle;
        inner.elapsed = Duration::ZERO;
        inner.current_level = 0.0;
        inner.destination = None;
        elapsed
    }

    /// Apply one metering reading for session `generation`
    fn apply_tick(
        &self,
        generation: u64,
        power_db: f32,
        now: Duration,
        error: Option<String>,
    ) -> ControlFlow<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.generation != generation || inner.state != RecorderState::Recording {
            return ControlFlow::Break(());
        }

        let level = inner.meter.smooth_db(power_db);
        inner.history.push(level);
        inner.current_level = level;
        inner.elapsed = now.saturating_sub(inner.started_at);
        if error.is_some() {
            inner.error = error;
        }
        ControlFlow::Continue(())
    }
}

/// Audio-thread side of a session: the metering sum plus the hand-off to
/// the writer thread
struct CaptureTap {
    blocks: Option<mpsc::Sender<Vec<f32>>>,
    power: PowerAccumulator,
    pending_error: Option<String>,
}

impl CaptureTap {
    fn new(blocks: mpsc::Sender<Vec<f32>>) -> Self {
        Self {
            blocks: Some(blocks),
            power: PowerAccumulator::new(),
            pending_error: None,
        }
    }

    fn push(&mut self, samples: &[f32]) {
        self.power.add(samples);
        let delivered = match &self.blocks {
            Some(blocks) => blocks.send(samples.to_vec()).is_ok(),
            None => return,
        };
        if !delivered {
            self.blocks = None;
        }
    }

    /// Disconnect from the writer so it drains what is queued and exits
    fn close(&mut self) {
        self.blocks = None;
    }
}

/// Write captured blocks to `sink` until the tap disconnects, then hand the
/// sink back for finalizing
fn spawn_writer(
    mut sink: Box<dyn RecordingSink>,
    blocks: mpsc::Receiver<Vec<f32>>,
    tap: Arc<Mutex<CaptureTap>>,
) -> JoinHandle<Box<dyn RecordingSink>> {
    thread::spawn(move || {
        let mut failed = false;
        for block in blocks {
            if failed {
                continue;
            }
            if let Err(e) = sink.write(&block) {
                warn!("Recording write failed, dropping further audio: {}", e);
                failed = true;
                tap.lock().unwrap().pending_error = Some(format!("Failed to write audio: {}", e));
            }
        }
        sink
    })
}

struct RecordingSession {
    path: PathBuf,
    input: Box<dyn AudioStream>,
    tap: Arc<Mutex<CaptureTap>>,
    writer: JoinHandle<Box<dyn RecordingSink>>,
    tick: TickHandle,
}

/// Records one take at a time from the audio backend into a file
pub struct Recorder {
    backend: Arc<dyn AudioBackend>,
    permission: Arc<dyn PermissionProvider>,
    scheduler: Arc<dyn Scheduler>,
    config: RecorderConfig,
    permission_cache: PermissionCache,
    shared: SharedRecorderState,
    session: Option<RecordingSession>,
}

impl Recorder {
    pub fn new(
        backend: Arc<dyn AudioBackend>,
        permission: Arc<dyn PermissionProvider>,
        scheduler: Arc<dyn Scheduler>,
        config: RecorderConfig,
    ) -> Self {
        let shared = SharedRecorderState::new(&config);
        Self {
            backend,
            permission,
            scheduler,
            config,
            permission_cache: PermissionCache::new(),
            shared,
            session: None,
        }
    }

    /// Get shared recorder state for UI updates
    pub fn shared_state(&self) -> SharedRecorderState {
        self.shared.clone()
    }

    pub fn is_recording(&self) -> bool {
        self.session.is_some()
    }

    /// Ask for microphone access; the first definitive answer sticks
    pub fn request_permission(&self) -> bool {
        self.permission_cache.resolve(self.permission.as_ref())
    }

    /// Start recording into `destination`.
    ///
    /// The file exists from here on but may be empty or partial until
    /// [`Recorder::stop`] finalizes it.
    pub fn start(&mut self, destination: &Path) -> Result<(), RecorderError> {
        if self.session.is_some() || self.shared.state() != RecorderState::Idle {
            return Err(RecorderError::AlreadyRecording);
        }

        self.shared.set_state(RecorderState::RequestingPermission);
        if !self.request_permission() {
            info!("Microphone permission denied");
            self.shared.fail(RecorderError::PermissionDenied.to_string());
            return Err(RecorderError::PermissionDenied);
        }

        let sink = match codec::create_sink(
            self.config.format,
            destination,
            self.config.sample_rate,
            self.config.bitrate,
        ) {
            Ok(sink) => sink,
            Err(source) => {
                let err = RecorderError::SinkOpen {
                    path: destination.to_path_buf(),
                    source,
                };
                error!("{}", err);
                self.shared.fail(err.to_string());
                return Err(err);
            }
        };

        let (blocks_tx, blocks_rx) = mpsc::channel();
        let tap = Arc::new(Mutex::new(CaptureTap::new(blocks_tx)));
        let audio_tap = tap.clone();
        let input = self.backend.open_input(
            StreamFormat::mono(self.config.sample_rate),
            Box::new(move |samples| audio_tap.lock().unwrap().push(samples)),
        );

        let input = match input {
            Ok(input) => input,
            Err(e) => {
                // Nothing was captured; don't leave an empty take behind.
                drop(sink);
                if let Err(remove_err) = std::fs::remove_file(destination) {
                    debug!("Could not remove {:?}: {}", destination, remove_err);
                }
                let err = RecorderError::SessionConfig(e);
                error!("{}", err);
                self.shared.fail(err.to_string());
                return Err(err);
            }
        };

        let writer = spawn_writer(sink, blocks_rx, tap.clone());
        let generation = self.shared.begin(destination, self.scheduler.now());
        let tick = self.scheduler.schedule(
            self.config.meter_interval,
            metering_task(
                self.shared.clone(),
                tap.clone(),
                self.scheduler.clone(),
                generation,
            ),
        );

        info!(
            "Recording started: {:?} ({}, {} Hz)",
            destination, self.config.format, self.config.sample_rate
        );

        self.session = Some(RecordingSession {
            path: destination.to_path_buf(),
            input,
            tap,
            writer,
            tick,
        });
        Ok(())
    }

    /// Stop recording and finalize the file.
    ///
    /// Does nothing when idle. Once this returns no metering tick or audio
    /// callback from the finished session will run.
    pub fn stop(&mut self) -> Option<CompletedRecording> {
        let session = self.session.take()?;

        let elapsed = self.shared.end(self.scheduler.now());
        session.tick.cancel();
        session.input.close();

        session.tap.lock().unwrap().close();

        let mut written = 0;
        match session.writer.join() {
            Ok(sink) => {
                written = sink.samples_written();
                // Write failures after the last metering tick
                if let Some(e) = session.tap.lock().unwrap().pending_error.take() {
                    self.shared.set_error(e);
                }
                if let Err(e) = sink.finalize() {
                    error!("Failed to finalize {:?}: {}", session.path, e);
                    self.shared
                        .set_error(format!("Failed to finalize recording: {}", e));
                }
            }
            Err(_) => {
                error!("Recording writer for {:?} panicked", session.path);
                self.shared
                    .set_error("Failed to finalize recording: writer thread panicked".to_string());
            }
        }
        info!(
            "Recording stopped: {:?} ({:.1}s, {} samples)",
            session.path,
            elapsed.as_secs_f64(),
            written
        );

        Some(CompletedRecording {
            path: session.path,
            elapsed,
        })
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        self.stop();
    }
}

fn metering_task(
    shared: SharedRecorderState,
    tap: Arc<Mutex<CaptureTap>>,
    scheduler: Arc<dyn Scheduler>,
    generation: u64,
) -> TickTask {
    Box::new(move || {
        let (power_db, error) = {
            let mut tap = tap.lock().unwrap();
            (tap.power.drain_power_db(), tap.pending_error.take())
        };
        shared.apply_tick(generation, power_db, scheduler.now(), error)
    })
}
