//! Single-file playback
//!
//! The [`Player`] drives a [`Transport`] and keeps a normalized position
//! for scrubbing. Progress is sampled by a periodic tick while playing.

use super::scheduler::{Scheduler, TickHandle, TickTask};
use super::transport::{MediaOpener, Transport};
use crate::error::{LoadError, TransportError};
use log::{debug, info, warn};
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Default progress tick period
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_millis(30);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlayerState {
    /// Nothing loaded
    Empty,
    Loaded,
    Playing,
    Paused,
}

/// Shared state for the player - thread-safe
#[derive(Clone)]
pub struct SharedPlayerState {
    inner: Arc<Mutex<PlayerStateInner>>,
}

struct PlayerStateInner {
    state: PlayerState,
    /// Bumped whenever a progress tick should stop applying
    generation: u64,
    /// Fraction of the file played, in [0, 1]
    position: f64,
    /// Set once playback runs off the end; the next play starts over
    finished: bool,
    duration: f64,
    path: Option<PathBuf>,
    overview: Vec<f32>,
}

impl SharedPlayerState {
    fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(PlayerStateInner {
                state: PlayerState::Empty,
                generation: 0,
                position: 0.0,
                finished: false,
                duration: 0.0,
                path: None,
                overview: Vec::new(),
            })),
        }
    }

    pub fn state(&self) -> PlayerState {
        self.inner.lock().unwrap().state
    }

    pub fn is_playing(&self) -> bool {
        self.state() == PlayerState::Playing
    }

    /// Playback position as a fraction of the duration
    pub fn position(&self) -> f64 {
        self.inner.lock().unwrap().position
    }

    /// Duration of the loaded file in seconds; 0 when empty
    pub fn duration(&self) -> f64 {
        self.inner.lock().unwrap().duration
    }

    /// Playback position in seconds
    pub fn current_time(&self) -> f64 {
        let inner = self.inner.lock().unwrap();
        inner.position * inner.duration
    }

    pub fn path(&self) -> Option<PathBuf> {
        self.inner.lock().unwrap().path.clone()
    }

    /// Level overview of the loaded file, for drawing a scrub bar
    pub fn overview(&self) -> Vec<f32> {
        self.inner.lock().unwrap().overview.clone()
    }

    fn loaded(&self, path: &Path, duration: f64, overview: Vec<f32>) {
        let mut inner = self.inner.lock().unwrap();
        inner.generation += 1;
        inner.state = PlayerState::Loaded;
        inner.position = 0.0;
        inner.finished = false;
        inner.duration = duration;
        inner.path = Some(path.to_path_buf());
        inner.overview = overview;
    }

    fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.generation += 1;
        inner.state = PlayerState::Empty;
        inner.position = 0.0;
        inner.finished = false;
        inner.duration = 0.0;
        inner.path = None;
        inner.overview.clear();
    }

    /// Enter `Playing` and return the generation for the new tick
    fn begin_playing(&self, position: f64) -> u64 {
        let mut inner = self.inner.lock().unwrap();
        inner.generation += 1;
        inner.state = PlayerState::Playing;
        inner.position = position;
        inner.finished = false;
        inner.generation
    }

    fn paused(&self, current_time: f64) {
        let mut inner = self.inner.lock().unwrap();
        inner.generation += 1;
        inner.state = PlayerState::Paused;
        inner.position = fraction_of(current_time, inner.duration);
    }

    fn set_position(&self, position: f64) {
        let mut inner = self.inner.lock().unwrap();
        inner.position = position;
        inner.finished = false;
    }

    fn finished(&self) -> bool {
        self.inner.lock().unwrap().finished
    }

    /// Apply one progress reading for tick `generation`
    fn apply_progress(&self, generation: u64, current_time: f64, playing: bool) -> ControlFlow<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.generation != generation || inner.state != PlayerState::Playing {
            return ControlFlow::Break(());
        }

        inner.position = fraction_of(current_time, inner.duration);
        if playing {
            return ControlFlow::Continue(());
        }

        // Ran off the end: park at the last position, no looping.
        inner.generation += 1;
        inner.state = PlayerState::Paused;
        inner.finished = true;
        ControlFlow::Break(())
    }
}

fn fraction_of(current_time: f64, duration: f64) -> f64 {
    if duration > 0.0 && current_time.is_finite() {
        (current_time / duration).clamp(0.0, 1.0)
    } else {
        0.0
    }
}

struct PlaybackSession {
    path: PathBuf,
    transport: Arc<Mutex<Box<dyn Transport>>>,
    duration: f64,
    tick: Option<TickHandle>,
}

/// Audio player for recordings
pub struct Player {
    opener: Arc<dyn MediaOpener>,
    scheduler: Arc<dyn Scheduler>,
    progress_interval: Duration,
    shared: SharedPlayerState,
    session: Option<PlaybackSession>,
}

impl Player {
    pub fn new(
        opener: Arc<dyn MediaOpener>,
        scheduler: Arc<dyn Scheduler>,
        progress_interval: Duration,
    ) -> Self {
        Self {
            opener,
            scheduler,
            progress_interval,
            shared: SharedPlayerState::new(),
            session: None,
        }
    }

    /// Get shared player state for UI updates
    pub fn shared_state(&self) -> SharedPlayerState {
        self.shared.clone()
    }

    /// Load a file, replacing whatever was loaded before
    pub fn load(&mut self, path: &Path) -> Result<(), LoadError> {
        self.stop();

        let transport = match self.opener.open(path) {
            Ok(transport) => transport,
            Err(e) => {
                warn!("Failed to load {:?}: {}", path, e);
                return Err(e);
            }
        };

        let duration = transport.duration().max(0.0);
        self.shared.loaded(path, duration, transport.overview());
        info!("Loaded {:?} ({:.2}s)", path, duration);

        self.session = Some(PlaybackSession {
            path: path.to_path_buf(),
            transport: Arc::new(Mutex::new(transport)),
            duration,
            tick: None,
        });
        Ok(())
    }

    /// Start or resume playback.
    ///
    /// A take that already played to the end starts again from the top. A
    /// seek to the very end is kept as is.
    pub fn play(&mut self) -> Result<(), TransportError> {
        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };
        if self.shared.state() == PlayerState::Playing {
            return Ok(());
        }

        let position = {
            let mut transport = session.transport.lock().unwrap();
            let mut position = self.shared.position();
            if self.shared.finished() {
                transport.seek(0.0);
                position = 0.0;
            }
            transport.play()?;
            position
        };

        // A tick from the previous run may still be parked on its handle.
        if let Some(old) = session.tick.take() {
            old.cancel();
        }

        let generation = self.shared.begin_playing(position);
        session.tick = Some(self.scheduler.schedule(
            self.progress_interval,
            progress_task(self.shared.clone(), session.transport.clone(), generation),
        ));
        debug!("Playing {:?} from {:.2}", session.path, position);
        Ok(())
    }

    /// Pause playback, keeping the position
    pub fn pause(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if self.shared.state() != PlayerState::Playing {
            return;
        }

        if let Some(tick) = session.tick.take() {
            tick.cancel();
        }
        let current_time = {
            let mut transport = session.transport.lock().unwrap();
            transport.pause();
            transport.current_time()
        };
        self.shared.paused(current_time);
        debug!("Paused {:?} at {:.2}s", session.path, current_time);
    }

    /// Stop playback and unload. Safe to call at any time.
    pub fn stop(&mut self) {
        self.shared.clear();
        let Some(mut session) = self.session.take() else {
            return;
        };

        if let Some(tick) = session.tick.take() {
            tick.cancel();
        }
        session.transport.lock().unwrap().stop();
        info!("Stopped playback of {:?}", session.path);
    }

    /// Jump to `fraction` of the way through the file
    pub fn seek(&mut self, fraction: f64) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        let fraction = if fraction.is_nan() {
            0.0
        } else {
            fraction.clamp(0.0, 1.0)
        };

        session
            .transport
            .lock()
            .unwrap()
            .seek(fraction * session.duration);
        self.shared.set_position(fraction);
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.stop();
    }
}

fn progress_task(
    shared: SharedPlayerState,
    transport: Arc<Mutex<Box<dyn Transport>>>,
    generation: u64,
) -> TickTask {
    Box::new(move || {
        let (current_time, playing) = {
            let transport = transport.lock().unwrap();
            (transport.current_time(), transport.is_playing())
        };
        shared.apply_progress(generation, current_time, playing)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::codec::{self, RecordingFormat};
    use crate::audio::scheduler::ManualScheduler;
    use crate::audio::testing::{sine, FakeBackend};
    use crate::audio::transport::DecodingOpener;
    use crate::error::BackendError;
    use std::collections::HashMap;

    /// Transport whose playhead follows the manual clock
    struct ClockTransport {
        clock: ManualScheduler,
        duration: f64,
        log: Arc<Mutex<TransportLog>>,
    }

    #[derive(Default)]
    struct TransportLog {
        offset: f64,
        started_at: Option<Duration>,
        fail_play: bool,
        plays: usize,
        stopped: bool,
    }

    impl ClockTransport {
        fn time(&self, log: &TransportLog) -> f64 {
            let running = log
                .started_at
                .map(|start| self.clock.now().saturating_sub(start).as_secs_f64())
                .unwrap_or(0.0);
            (log.offset + running).min(self.duration)
        }
    }

    impl Transport for ClockTransport {
        fn duration(&self) -> f64 {
            self.duration
        }

        fn current_time(&self) -> f64 {
            self.time(&self.log.lock().unwrap())
        }

        fn is_playing(&self) -> bool {
            let log = self.log.lock().unwrap();
            log.started_at.is_some() && self.time(&log) < self.duration
        }

        fn play(&mut self) -> Result<(), TransportError> {
            let mut log = self.log.lock().unwrap();
            if log.fail_play {
                return Err(TransportError::Output(BackendError::NoBackend));
            }
            log.plays += 1;
            log.started_at = Some(self.clock.now());
            Ok(())
        }

        fn pause(&mut self) {
            let mut log = self.log.lock().unwrap();
            log.offset = self.time(&log);
            log.started_at = None;
        }

        fn stop(&mut self) {
            let mut log = self.log.lock().unwrap();
            log.offset = 0.0;
            log.started_at = None;
            log.stopped = true;
        }

        fn seek(&mut self, seconds: f64) {
            let mut log = self.log.lock().unwrap();
            log.offset = seconds.clamp(0.0, self.duration);
            if log.started_at.is_some() {
                log.started_at = Some(self.clock.now());
            }
        }
    }

    struct ClockOpener {
        clock: ManualScheduler,
        durations: HashMap<PathBuf, f64>,
        logs: Mutex<Vec<Arc<Mutex<TransportLog>>>>,
        fail_play: bool,
    }

    impl ClockOpener {
        fn new(clock: &ManualScheduler, files: &[(&str, f64)]) -> Self {
            Self {
                clock: clock.clone(),
                durations: files
                    .iter()
                    .map(|(name, d)| (PathBuf::from(name), *d))
                    .collect(),
                logs: Mutex::new(Vec::new()),
                fail_play: false,
            }
        }

        fn log(&self, index: usize) -> Arc<Mutex<TransportLog>> {
            self.logs.lock().unwrap()[index].clone()
        }
    }

    impl MediaOpener for ClockOpener {
        fn open(&self, path: &Path) -> Result<Box<dyn Transport>, LoadError> {
            let duration = *self
                .durations
                .get(path)
                .ok_or_else(|| LoadError::NotFound(path.to_path_buf()))?;
            let log = Arc::new(Mutex::new(TransportLog {
                fail_play: self.fail_play,
                ..TransportLog::default()
            }));
            self.logs.lock().unwrap().push(log.clone());
            Ok(Box::new(ClockTransport {
                clock: self.clock.clone(),
                duration,
                log,
            }))
        }
    }

    fn player(opener: Arc<ClockOpener>, scheduler: &ManualScheduler) -> Player {
        Player::new(opener, Arc::new(scheduler.clone()), DEFAULT_PROGRESS_INTERVAL)
    }

    #[test]
    fn test_plays_to_end_without_looping() {
        let scheduler = ManualScheduler::new();
        let opener = Arc::new(ClockOpener::new(&scheduler, &[("ten.ogg", 10.0)]));
        let mut player = player(opener.clone(), &scheduler);
        let state = player.shared_state();

        player.load(Path::new("ten.ogg")).unwrap();
        assert_eq!(state.state(), PlayerState::Loaded);
        assert_eq!(state.duration(), 10.0);
        assert_eq!(state.position(), 0.0);

        player.play().unwrap();
        assert_eq!(state.state(), PlayerState::Playing);
        scheduler.advance(Duration::from_secs(5));
        assert!((state.position() - 0.5).abs() < 0.01);

        scheduler.advance(Duration::from_millis(5500));
        assert_eq!(state.state(), PlayerState::Paused);
        assert_eq!(state.position(), 1.0);
        assert_eq!(scheduler.pending(), 0);

        scheduler.advance(Duration::from_secs(5));
        assert_eq!(state.state(), PlayerState::Paused);
        assert_eq!(state.position(), 1.0);
        assert_eq!(opener.log(0).lock().unwrap().plays, 1);
    }

    #[test]
    fn test_play_after_end_restarts() {
        let scheduler = ManualScheduler::new();
        let opener = Arc::new(ClockOpener::new(&scheduler, &[("short.ogg", 1.0)]));
        let mut player = player(opener, &scheduler);
        let state = player.shared_state();

        player.load(Path::new("short.ogg")).unwrap();
        player.play().unwrap();
        scheduler.advance(Duration::from_secs(2));
        assert_eq!(state.position(), 1.0);

        player.play().unwrap();
        assert_eq!(state.state(), PlayerState::Playing);
        assert_eq!(state.position(), 0.0);
        scheduler.advance(Duration::from_millis(300));
        assert!(state.position() > 0.2 && state.position() < 0.4);
    }

    #[test]
    fn test_seek_to_end_is_not_a_restart() {
        let scheduler = ManualScheduler::new();
        let opener = Arc::new(ClockOpener::new(&scheduler, &[("ten.ogg", 10.0)]));
        let mut player = player(opener.clone(), &scheduler);
        let state = player.shared_state();

        player.load(Path::new("ten.ogg")).unwrap();
        player.seek(1.0);
        player.play().unwrap();
        assert_eq!(state.position(), 1.0);
        assert_eq!(opener.log(0).lock().unwrap().offset, 10.0);

        scheduler.advance(Duration::from_millis(100));
        assert_eq!(state.state(), PlayerState::Paused);
        assert_eq!(state.position(), 1.0);

        // Having now run off the end, the next play starts over.
        player.play().unwrap();
        assert_eq!(state.position(), 0.0);
        assert_eq!(opener.log(0).lock().unwrap().offset, 0.0);
    }

    #[test]
    fn test_seek_clamps_and_relocates() {
        let scheduler = ManualScheduler::new();
        let opener = Arc::new(ClockOpener::new(&scheduler, &[("long.ogg", 100.0)]));
        let mut player = player(opener.clone(), &scheduler);
        let state = player.shared_state();
        player.load(Path::new("long.ogg")).unwrap();

        player.seek(0.5);
        assert_eq!(state.position(), 0.5);
        assert_eq!(state.current_time(), 50.0);
        assert_eq!(opener.log(0).lock().unwrap().offset, 50.0);

        player.seek(-0.3);
        assert_eq!(state.position(), 0.0);
        player.seek(1.7);
        assert_eq!(state.position(), 1.0);
        player.seek(f64::NAN);
        assert_eq!(state.position(), 0.0);
    }

    #[test]
    fn test_seek_while_empty_is_noop() {
        let scheduler = ManualScheduler::new();
        let opener = Arc::new(ClockOpener::new(&scheduler, &[]));
        let mut player = player(opener, &scheduler);
        player.seek(0.7);
        assert_eq!(player.shared_state().position(), 0.0);
        assert_eq!(player.shared_state().state(), PlayerState::Empty);
    }

    #[test]
    fn test_seek_while_playing_moves_progress() {
        let scheduler = ManualScheduler::new();
        let opener = Arc::new(ClockOpener::new(&scheduler, &[("long.ogg", 100.0)]));
        let mut player = player(opener, &scheduler);
        let state = player.shared_state();

        player.load(Path::new("long.ogg")).unwrap();
        player.play().unwrap();
        scheduler.advance(Duration::from_secs(1));
        player.seek(0.8);
        scheduler.advance(Duration::from_secs(1));
        assert!((state.position() - 0.81).abs() < 0.001);
    }

    #[test]
    fn test_pause_keeps_position_and_cancels_tick() {
        let scheduler = ManualScheduler::new();
        let opener = Arc::new(ClockOpener::new(&scheduler, &[("ten.ogg", 10.0)]));
        let mut player = player(opener, &scheduler);
        let state = player.shared_state();

        player.load(Path::new("ten.ogg")).unwrap();
        player.pause();
        assert_eq!(state.state(), PlayerState::Loaded);

        player.play().unwrap();
        scheduler.advance(Duration::from_secs(2));
        player.pause();
        assert_eq!(state.state(), PlayerState::Paused);
        assert_eq!(scheduler.pending(), 0);
        let paused_at = state.position();
        assert!((paused_at - 0.2).abs() < 0.01);

        scheduler.advance(Duration::from_secs(3));
        assert_eq!(state.position(), paused_at);

        player.play().unwrap();
        scheduler.advance(Duration::from_secs(1));
        assert!((state.position() - 0.3).abs() < 0.01);
    }

    #[test]
    fn test_play_when_empty_is_noop() {
        let scheduler = ManualScheduler::new();
        let opener = Arc::new(ClockOpener::new(&scheduler, &[]));
        let mut player = player(opener, &scheduler);
        player.play().unwrap();
        assert_eq!(player.shared_state().state(), PlayerState::Empty);
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn test_play_twice_keeps_one_tick() {
        let scheduler = ManualScheduler::new();
        let opener = Arc::new(ClockOpener::new(&scheduler, &[("ten.ogg", 10.0)]));
        let mut player = player(opener.clone(), &scheduler);
        player.load(Path::new("ten.ogg")).unwrap();
        player.play().unwrap();
        player.play().unwrap();
        assert_eq!(scheduler.pending(), 1);
        assert_eq!(opener.log(0).lock().unwrap().plays, 1);
    }

    #[test]
    fn test_failed_output_leaves_state_unchanged() {
        let scheduler = ManualScheduler::new();
        let mut opener = ClockOpener::new(&scheduler, &[("ten.ogg", 10.0)]);
        opener.fail_play = true;
        let mut player = player(Arc::new(opener), &scheduler);

        player.load(Path::new("ten.ogg")).unwrap();
        assert!(player.play().is_err());
        assert_eq!(player.shared_state().state(), PlayerState::Loaded);
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn test_load_missing_file() {
        let scheduler = ManualScheduler::new();
        let opener = Arc::new(ClockOpener::new(&scheduler, &[("ten.ogg", 10.0)]));
        let mut player = player(opener.clone(), &scheduler);
        let state = player.shared_state();

        player.load(Path::new("ten.ogg")).unwrap();
        player.play().unwrap();

        let err = player.load(Path::new("gone.ogg")).unwrap_err();
        assert!(matches!(err, LoadError::NotFound(_)));
        assert_eq!(state.state(), PlayerState::Empty);
        assert_eq!(state.path(), None);
        assert!(opener.log(0).lock().unwrap().stopped);
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn test_zero_duration_file() {
        let scheduler = ManualScheduler::new();
        let opener = Arc::new(ClockOpener::new(&scheduler, &[("empty.ogg", 0.0)]));
        let mut player = player(opener, &scheduler);
        let state = player.shared_state();

        player.load(Path::new("empty.ogg")).unwrap();
        player.play().unwrap();
        scheduler.advance(Duration::from_millis(100));
        assert_eq!(state.state(), PlayerState::Paused);
        assert_eq!(state.position(), 0.0);
        assert!(state.position().is_finite());
    }

    #[test]
    fn test_stop_is_idempotent() {
        let scheduler = ManualScheduler::new();
        let opener = Arc::new(ClockOpener::new(&scheduler, &[("ten.ogg", 10.0)]));
        let mut player = player(opener.clone(), &scheduler);
        let state = player.shared_state();

        player.stop();
        player.stop();
        assert_eq!(state.state(), PlayerState::Empty);

        player.load(Path::new("ten.ogg")).unwrap();
        player.play().unwrap();
        scheduler.advance(Duration::from_secs(1));
        player.stop();
        player.stop();
        assert_eq!(state.state(), PlayerState::Empty);
        assert_eq!(state.position(), 0.0);
        assert_eq!(scheduler.pending(), 0);
        assert!(opener.log(0).lock().unwrap().stopped);
    }

    #[test]
    fn test_stale_progress_is_ignored() {
        let scheduler = ManualScheduler::new();
        let opener = Arc::new(ClockOpener::new(&scheduler, &[("ten.ogg", 10.0)]));
        let mut player = player(opener, &scheduler);
        let state = player.shared_state();

        player.load(Path::new("ten.ogg")).unwrap();
        player.play().unwrap();
        let old_generation = state.inner.lock().unwrap().generation;
        player.pause();
        player.play().unwrap();

        assert!(state.apply_progress(old_generation, 9.0, true).is_break());
        assert!(state.position() < 0.1);
    }

    #[test]
    fn test_decoded_wav_plays_through_backend() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("take.wav");
        let mut sink = codec::create_sink(RecordingFormat::Wav, &path, 8_000, 0).unwrap();
        sink.write(&sine(0.5, 8_000)).unwrap();
        sink.finalize().unwrap();

        let backend = FakeBackend::new();
        let scheduler = ManualScheduler::new();
        let mut player = Player::new(
            Arc::new(DecodingOpener::new(Arc::new(backend.clone()))),
            Arc::new(scheduler.clone()),
            DEFAULT_PROGRESS_INTERVAL,
        );
        let state = player.shared_state();

        player.load(&path).unwrap();
        assert!((state.duration() - 0.5).abs() < 1e-6);
        assert!(!state.overview().is_empty());

        player.play().unwrap();
        assert!(backend.output_open());
        assert_eq!(backend.pull(2_000).len(), 2_000);
        scheduler.advance(Duration::from_millis(30));
        assert!((state.position() - 0.5).abs() < 0.01);

        assert_eq!(backend.pull(4_000).len(), 2_000);
        scheduler.advance(Duration::from_millis(30));
        assert_eq!(state.state(), PlayerState::Paused);
        assert_eq!(state.position(), 1.0);

        player.stop();
        assert!(!backend.output_open());
    }
}
