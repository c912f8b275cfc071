//! Waveform layout
//!
//! Pure functions turning level streams into drawable bars. Nothing here
//! owns state; callers pass a snapshot of the level history.

use super::meter::calculate_rms;

/// Bars never shrink below this fraction of the available height
pub const MIN_BAR_LEVEL: f32 = 0.05;

/// Bar count for whole-file overviews
pub const OVERVIEW_BARS: usize = 96;

/// Narrowest bar drawn, in the caller's units
const MIN_BAR_WIDTH: f32 = 2.0;

const BLOCKS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

/// One bar of a waveform, vertically centered in its lane
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Bar {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Lay out one bar per level across `width`, centered within `height`
pub fn bars(levels: &[f32], width: f32, height: f32, gap: f32) -> Vec<Bar> {
    if levels.is_empty() {
        return Vec::new();
    }

    let bar_width = (width / levels.len() as f32 - gap).max(MIN_BAR_WIDTH);
    levels
        .iter()
        .enumerate()
        .map(|(i, &level)| {
            let bar_height = clamp_level(level) * height;
            Bar {
                x: i as f32 * (bar_width + gap),
                y: (height - bar_height) / 2.0,
                width: bar_width,
                height: bar_height,
            }
        })
        .collect()
}

fn clamp_level(level: f32) -> f32 {
    if level.is_nan() {
        return MIN_BAR_LEVEL;
    }
    level.clamp(MIN_BAR_LEVEL, 1.0)
}

/// RMS of `bars` equal segments of `samples`
pub fn summarize(samples: &[f32], bars: usize) -> Vec<f32> {
    if bars == 0 {
        return Vec::new();
    }
    let per_bar = samples.len() / bars;
    (0..bars)
        .map(|i| {
            let start = i * per_bar;
            let end = ((i + 1) * per_bar).min(samples.len());
            if start < end {
                calculate_rms(&samples[start..end])
            } else {
                0.0
            }
        })
        .collect()
}

/// Render the newest `width` levels as block characters.
///
/// Levels fill from the right; columns without data show the floor.
pub fn render_ascii(levels: &[f32], width: usize) -> String {
    let shown = &levels[levels.len().saturating_sub(width)..];
    let blank = width - shown.len();
    std::iter::repeat(BLOCKS[0])
        .take(blank)
        .chain(shown.iter().map(|&level| block_for(level)))
        .collect()
}

/// Render a file overview with the played part marked.
///
/// Bars before `position` are drawn as blocks, the rest as dots.
pub fn render_scrub(overview: &[f32], position: f64) -> String {
    let played = (position.clamp(0.0, 1.0) * overview.len() as f64) as usize;
    let peak = overview.iter().copied().fold(0.0f32, f32::max);
    overview
        .iter()
        .enumerate()
        .map(|(i, &level)| {
            if i < played {
                let relative = if peak > 0.0 { level / peak } else { 0.0 };
                block_for(relative)
            } else {
                '·'
            }
        })
        .collect()
}

fn block_for(level: f32) -> char {
    let index = (clamp_level(level) * (BLOCKS.len() - 1) as f32).round() as usize;
    BLOCKS[index.min(BLOCKS.len() - 1)]
}
