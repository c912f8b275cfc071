use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Information about a recording
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recording {
    /// File name, unique within the recordings directory
    pub id: String,
    pub title: String,
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub duration_seconds: f64,
}

impl Recording {
    /// Duration as `m:ss`
    pub fn duration_label(&self) -> String {
        format_mmss(self.duration_seconds)
    }
}

/// Format seconds as `m:ss`, rounding down
pub fn format_mmss(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds as u64
    } else {
        0
    };
    format!("{}:{:02}", total / 60, total % 60)
}
