//! Input level metering
//!
//! Turns raw samples or average-power readings into a normalized, smoothed
//! level stream, and keeps a bounded history of recent levels for display.

use std::collections::VecDeque;

/// Lowest average power reported by the meter, in dBFS
pub const MIN_POWER_DB: f32 = -160.0;

/// Power at or below this level is drawn as silence
pub const NOISE_FLOOR_DB: f32 = -60.0;

/// Gain applied to raw RMS amplitude on the sample-buffer path
pub const RMS_GAIN: f32 = 10.0;

/// Default smoothing factor for decibel-derived levels
pub const DEFAULT_SMOOTHING: f32 = 0.2;

/// Default number of levels kept for display
pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// Map an average power reading in dBFS onto [0, 1].
///
/// -60 dBFS and below is silence, 0 dBFS is full scale.
pub fn normalize_db(db: f32) -> f32 {
    if db.is_nan() {
        return 0.0;
    }
    ((db - NOISE_FLOOR_DB) / -NOISE_FLOOR_DB).clamp(0.0, 1.0)
}

/// Convert a mean square amplitude into average power in dBFS
pub fn average_power_db(mean_square: f64) -> f32 {
    if mean_square <= 0.0 || !mean_square.is_finite() {
        return MIN_POWER_DB;
    }
    ((10.0 * mean_square.log10()) as f32).clamp(MIN_POWER_DB, 0.0)
}

/// Level from a raw sample buffer: RMS scaled by `gain`, never negative.
///
/// There is no upper clamp; renderers clamp on their own.
pub fn rms_level(samples: &[f32], gain: f32) -> f32 {
    (calculate_rms(samples) * gain).max(0.0)
}

/// Calculate RMS volume from samples
pub fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Calculate peak volume from samples
pub fn calculate_peak(samples: &[f32]) -> f32 {
    samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max)
}

/// Exponential moving average over successive level readings
#[derive(Clone, Debug)]
pub struct LevelMeter {
    alpha: f32,
    ema: f32,
}

impl LevelMeter {
    /// Create a meter with smoothing factor `alpha` in (0, 1].
    ///
    /// `alpha = 1.0` passes readings through unchanged.
    pub fn new(alpha: f32) -> Self {
        let alpha = if alpha.is_finite() {
            alpha.clamp(f32::EPSILON, 1.0)
        } else {
            1.0
        };
        Self { alpha, ema: 0.0 }
    }

    /// Feed one raw reading and return the smoothed level
    pub fn smooth(&mut self, raw: f32) -> f32 {
        self.ema = self.alpha * raw + (1.0 - self.alpha) * self.ema;
        self.ema
    }

    /// Feed an average power reading in dBFS
    pub fn smooth_db(&mut self, db: f32) -> f32 {
        self.smooth(normalize_db(db))
    }

    pub fn level(&self) -> f32 {
        self.ema
    }

    pub fn reset(&mut self) {
        self.ema = 0.0;
    }
}

impl Default for LevelMeter {
    fn default() -> Self {
        Self::new(DEFAULT_SMOOTHING)
    }
}

/// Fixed-capacity FIFO of recent levels
#[derive(Clone, Debug)]
pub struct LevelHistory {
    levels: VecDeque<f32>,
    capacity: usize,
}

impl LevelHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            levels: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a level, evicting the oldest once full
    pub fn push(&mut self, level: f32) {
        if self.levels.len() == self.capacity {
            self.levels.pop_front();
        }
        self.levels.push_back(level);
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn latest(&self) -> Option<f32> {
        self.levels.back().copied()
    }

    /// Oldest first
    pub fn iter(&self) -> impl Iterator<Item = f32> + '_ {
        self.levels.iter().copied()
    }

    pub fn to_vec(&self) -> Vec<f32> {
        self.levels.iter().copied().collect()
    }

    pub fn clear(&mut self) {
        self.levels.clear();
    }
}

impl Default for LevelHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

/// Running sum of squares between metering ticks.
///
/// Filled from the audio thread, drained by the metering tick.
#[derive(Debug)]
pub struct PowerAccumulator {
    sum_squares: f64,
    count: usize,
    last_power_db: f32,
}

impl PowerAccumulator {
    pub fn new() -> Self {
        Self {
            sum_squares: 0.0,
            count: 0,
            last_power_db: MIN_POWER_DB,
        }
    }

    pub fn add(&mut self, samples: &[f32]) {
        self.sum_squares += samples.iter().map(|&s| (s as f64) * (s as f64)).sum::<f64>();
        self.count += samples.len();
    }

    /// Average power since the last drain.
    ///
    /// Repeats the previous reading when no samples arrived in between.
    pub fn drain_power_db(&mut self) -> f32 {
        if self.count > 0 {
            self.last_power_db = average_power_db(self.sum_squares / self.count as f64);
            self.sum_squares = 0.0;
            self.count = 0;
        }
        self.last_power_db
    }
}

impl Default for PowerAccumulator {
    fn default() -> Self {
        Self::new()
    }
}
