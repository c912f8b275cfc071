//! voicenote - record, meter and play back voice notes on Linux
//!
//! The [`audio`] module holds the capture and playback core. [`state`]
//! manages the recordings directory and the policy tying recorder and
//! player together.

pub mod audio;
pub mod error;
pub mod models;
pub mod settings;
pub mod state;
