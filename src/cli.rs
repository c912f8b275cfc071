//! Command-line interface for voicenote
//!
//! Handles argument parsing, logging configuration and the terminal
//! microphone prompt.

use clap::{Parser, Subcommand};
use log::LevelFilter;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use voicenote::audio::{PermissionProvider, PermissionStatus, RecordingFormat};

/// voicenote - record and play back voice notes
#[derive(Parser, Debug)]
#[command(name = "voicenote")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Increase logging verbosity
    /// -v = info, -vv = debug, -vvv = trace, -vvvv = all deps
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Recordings directory (overrides settings)
    #[arg(long, global = true)]
    pub dir: Option<PathBuf>,

    /// Format for new recordings: ogg-opus or wav
    #[arg(long, global = true)]
    pub format: Option<RecordingFormat>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Record a new voice note; press Enter to stop
    Record {
        /// Stop automatically after this many seconds
        #[arg(long, value_parser = parse_seconds)]
        seconds: Option<Duration>,

        /// Grant microphone access without asking
        #[arg(short, long)]
        yes: bool,
    },

    /// List recordings, newest first
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Play a recording by file name, title or path
    Play {
        name: String,

        /// Start at this fraction of the recording (0.0 - 1.0)
        #[arg(long, default_value_t = 0.0)]
        from: f64,
    },

    /// Give a recording a new title
    Rename { name: String, title: String },

    /// Delete a recording
    Delete {
        name: String,

        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Print the duration of a recording
    Duration { name: String },
}

impl Args {
    /// Get the log level filter based on verbosity flags
    pub fn log_level(&self) -> LevelFilter {
        if self.quiet {
            LevelFilter::Error
        } else {
            match self.verbose {
                0 => LevelFilter::Warn,
                1 => LevelFilter::Info,
                2 => LevelFilter::Debug,
                _ => LevelFilter::Trace,
            }
        }
    }
}

/// Parse a non-negative, finite number of seconds
fn parse_seconds(value: &str) -> Result<Duration, String> {
    let seconds: f64 = value
        .trim()
        .parse()
        .map_err(|_| format!("`{}` is not a number of seconds", value))?;
    Duration::try_from_secs_f64(seconds)
        .map_err(|_| format!("`{}` is not a usable recording length", value))
}

/// When a `--seconds` limited recording should stop
pub fn record_deadline(start: Instant, limit: Option<Duration>) -> anyhow::Result<Option<Instant>> {
    match limit {
        None => Ok(None),
        Some(limit) => start
            .checked_add(limit)
            .map(Some)
            .ok_or_else(|| anyhow::anyhow!("--seconds {} is too long", limit.as_secs_f64())),
    }
}

/// Initialize the logging system based on CLI arguments
pub fn init_logging(args: &Args) {
    let mut builder = env_logger::Builder::new();

    // Base level for all modules - keep at warn to suppress noisy deps
    builder.filter_level(LevelFilter::Warn);

    builder.filter_module("voicenote", args.log_level());

    // PipeWire bindings only at -vvvv
    if args.verbose >= 4 {
        builder.filter_module("pipewire", args.log_level());
        builder.filter_module("libspa", args.log_level());
    }

    builder.format_timestamp_millis().init();
}

/// Ask a yes/no question on the terminal, defaulting to yes
pub fn confirm(question: &str) -> bool {
    print!("{} [Y/n] ", question);
    if io::stdout().flush().is_err() {
        return false;
    }
    let mut answer = String::new();
    match io::stdin().lock().read_line(&mut answer) {
        Ok(0) | Err(_) => false,
        Ok(_) => parse_answer(&answer),
    }
}

fn parse_answer(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "" | "y" | "yes")
}

/// Microphone permission asked on the terminal
pub struct TerminalPermission {
    assume_yes: bool,
}

impl TerminalPermission {
    pub fn new(assume_yes: bool) -> Self {
        Self { assume_yes }
    }
}

impl PermissionProvider for TerminalPermission {
    fn status(&self) -> PermissionStatus {
        if self.assume_yes {
            PermissionStatus::Granted
        } else {
            PermissionStatus::Undetermined
        }
    }

    fn request(&self) -> PermissionStatus {
        if confirm("Allow voicenote to use the microphone?") {
            PermissionStatus::Granted
        } else {
            PermissionStatus::Denied
        }
    }
}
