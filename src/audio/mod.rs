//! # Audio Module
//!
//! Per-guild audio dispatch: every guild gets at most one worker and one
//! voice connection, and plays its requests strictly in order.
//!
//! ## Architecture
//!
//! ### [`player`] - Dispatch Registry
//! - Entry point for collaborators: submit, cancel, queue depth
//! - Creates a guild worker on first submission, drops it when drained
//!
//! ### [`worker`] - Guild Worker
//! - Iterative resolve → stream → advance loop
//! - Chained follow-ups play before anything queued
//!
//! ### [`pipeline`] - Streaming Pipeline
//! - fetch → transcode → encode as concurrent external stages
//! - Optional prefetch of streamed links to the audio directory
//!
//! ### [`codec`] / [`sink`] - Frames
//! - Length-prefixed Opus frames, lenient on truncated tails
//! - Frame-by-frame delivery with cooperative cancellation

pub mod codec;
pub mod collections;
pub mod connection;
pub mod pipeline;
pub mod player;
pub mod queue;
pub mod resolver;
pub mod sink;
pub mod songbird_bridge;
pub mod sound;
mod worker;

pub use connection::{NoStatus, StatusReporter, VoiceConnection, VoiceConnector};
pub use player::DispatchRegistry;
pub use queue::{PlayRequest, Selection};
pub use resolver::SourceResolver;
pub use sound::{Sound, SoundCollection};
