//! Error types for the dispatch core.
//!
//! Only [`DispatchError::Connection`] is fatal for a guild queue. Everything
//! else aborts the current request at most, and [`DispatchError::QueueFull`]
//! and [`DispatchError::CancelledMidStream`] are plain outcomes.

use std::{io, path::PathBuf};

use crate::audio::pipeline::StageKind;

/// Result alias used across the dispatch core.
pub type DispatchResult<T> = Result<T, DispatchError>;

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The encoded file backing an on-disk sound does not exist.
    #[error("sound file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// A frame stream failed for a reason other than truncation.
    #[error("frame stream error: {0}")]
    Decode(#[source] io::Error),

    /// A payload cannot be represented with a 16-bit length prefix.
    #[error("frame payload of {0} bytes exceeds the 65535 byte limit")]
    FrameTooLarge(usize),

    /// An external stage could not be launched.
    #[error("{stage} stage failed to start: {source}")]
    PipelineStart {
        stage: StageKind,
        #[source]
        source: io::Error,
    },

    /// The voice connection could not be established or was lost.
    #[error("voice connection error: {0}")]
    Connection(String),

    /// Live broadcasts never end, so they are never downloaded.
    #[error("{0} is a live broadcast")]
    LiveStream(String),

    /// The guild queue is at capacity; the request was dropped.
    #[error("queue is full")]
    QueueFull,

    /// A random pick was requested from a collection with zero total weight.
    #[error("collection `{0}` has no selectable sounds")]
    EmptyCollection(String),

    /// Playback was cancelled between two frames.
    #[error("playback cancelled")]
    CancelledMidStream,

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl DispatchError {
    /// Whether this error takes down the whole guild queue.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DispatchError::Connection(_))
    }
}
