//! Multi-guild audio dispatch for Discord voice.
//!
//! Requests are submitted to a [`DispatchRegistry`](audio::DispatchRegistry),
//! which keeps one ordered queue and one worker per guild and streams
//! Opus frames from memory, disk or an external fetch/transcode/encode
//! pipeline.

pub mod audio;
pub mod config;
pub mod error;
pub mod sources;

pub use error::{DispatchError, DispatchResult};
