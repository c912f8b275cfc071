//! Recordings directory and the policy tying recorder and player together

mod app_state;
mod catalog;

pub use app_state::AppState;
pub use catalog::RecordingCatalog;
