//! voicenote - a voice-note recorder for Linux
//!
//! This is the command-line entry point.

mod cli;

use anyhow::{bail, Context, Result};
use clap::Parser;
use cli::{Args, Command, TerminalPermission};
use log::{info, warn};
use std::io::{self, BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use voicenote::audio::waveform::{render_ascii, render_scrub};
use voicenote::audio::{
    default_backend, DecodingOpener, Player, PlayerState, Recorder, Scheduler, ThreadScheduler,
    DEFAULT_PROGRESS_INTERVAL,
};
use voicenote::models::format_mmss;
use voicenote::settings::Settings;
use voicenote::state::{AppState, RecordingCatalog};

/// Terminal refresh period for meters and progress
const REFRESH: Duration = Duration::from_millis(50);
const METER_WIDTH: usize = 48;

fn main() -> Result<()> {
    // Parse command-line arguments and initialize logging
    let args = Args::parse();
    cli::init_logging(&args);

    let mut settings = Settings::load();
    if let Some(dir) = &args.dir {
        settings.recordings_dir = dir.clone();
    }
    if let Some(format) = args.format {
        if !format.is_supported() {
            bail!("{} recordings are not available in this build", format);
        }
        settings.format = format;
    }
    info!("Recordings directory: {:?}", settings.recordings_dir);

    let catalog = RecordingCatalog::new(&settings.recordings_dir, settings.format);

    match args.command {
        Command::Record { seconds, yes } => record(&settings, catalog, seconds, yes),
        Command::List { json } => list(&catalog, json),
        Command::Play { name, from } => play(&settings, catalog, &name, from),
        Command::Rename { name, title } => {
            let path = catalog.resolve(&name)?;
            let renamed = catalog.rename(&path, &title)?;
            println!("{}", renamed.display());
            Ok(())
        }
        Command::Delete { name, yes } => {
            let path = catalog.resolve(&name)?;
            if !yes && !cli::confirm(&format!("Delete {}?", path.display())) {
                return Ok(());
            }
            catalog.delete(&path)?;
            Ok(())
        }
        Command::Duration { name } => {
            let path = catalog.resolve(&name)?;
            let seconds = RecordingCatalog::read_duration(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            println!("{}\t{:.3}", format_mmss(seconds), seconds);
            Ok(())
        }
    }
}

fn app_state(settings: &Settings, catalog: RecordingCatalog, assume_yes: bool) -> Result<AppState> {
    let backend = default_backend().context("No audio backend")?;
    let scheduler: Arc<dyn Scheduler> = Arc::new(ThreadScheduler::new());
    let recorder = Recorder::new(
        backend.clone(),
        Arc::new(TerminalPermission::new(assume_yes)),
        scheduler.clone(),
        settings.recorder_config(),
    );
    let player = Player::new(
        Arc::new(DecodingOpener::new(backend)),
        scheduler,
        DEFAULT_PROGRESS_INTERVAL,
    );
    Ok(AppState::new(recorder, player, catalog))
}

fn record(
    settings: &Settings,
    catalog: RecordingCatalog,
    seconds: Option<Duration>,
    assume_yes: bool,
) -> Result<()> {
    let mut app = app_state(settings, catalog, assume_yes)?;
    let path = app.start_recording().context("Failed to start recording")?;
    let deadline = cli::record_deadline(Instant::now(), seconds)?;
    let state = app.recorder_state();

    let stop = Arc::new(AtomicBool::new(false));
    if seconds.is_none() {
        let stop = stop.clone();
        thread::spawn(move || {
            let mut line = String::new();
            let _ = io::stdin().lock().read_line(&mut line);
            stop.store(true, Ordering::SeqCst);
        });
        eprintln!("Recording to {} - press Enter to stop", path.display());
    } else {
        eprintln!("Recording to {}", path.display());
    }

    while !stop.load(Ordering::SeqCst) && deadline.map_or(true, |d| Instant::now() < d) {
        let elapsed = state.elapsed().as_secs_f64();
        eprint!(
            "\r{} {}",
            format_mmss(elapsed),
            render_ascii(&state.levels(), METER_WIDTH)
        );
        let _ = io::stderr().flush();
        thread::sleep(REFRESH);
    }
    eprintln!();

    if let Some(error) = state.last_error() {
        warn!("{}", error);
    }
    if let Some(done) = app.stop_recording()? {
        println!(
            "{}\t{}",
            done.path.display(),
            format_mmss(done.elapsed.as_secs_f64())
        );
    }
    Ok(())
}

fn list(catalog: &RecordingCatalog, json: bool) -> Result<()> {
    let recordings = catalog.list()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&recordings)?);
        return Ok(());
    }

    for recording in &recordings {
        println!(
            "{}\t{}\t{}",
            recording.created_at.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M"),
            recording.duration_label(),
            recording.title
        );
    }
    Ok(())
}

fn play(settings: &Settings, catalog: RecordingCatalog, name: &str, from: f64) -> Result<()> {
    let mut app = app_state(settings, catalog, false)?;
    let path = app.open(name)?;
    let state = app.player_state();
    app.seek(from);
    app.play()
        .with_context(|| format!("Failed to play {}", path.display()))?;

    while state.state() == PlayerState::Playing {
        eprint!(
            "\r{} / {} {}",
            format_mmss(state.current_time()),
            format_mmss(state.duration()),
            render_scrub(&state.overview(), state.position())
        );
        let _ = io::stderr().flush();
        thread::sleep(REFRESH);
    }
    eprintln!();
    app.stop_playback();
    Ok(())
}
