//! Error types for flow-engine
//!
//! Defines engine error types using thiserror for clear error propagation.
//! Each variant maps onto a notification `ErrorKind` so failures reported on the
//! event bus and failures returned to a caller use the same vocabulary.

use flow_common::events::ErrorKind;
use thiserror::Error;

/// Main error type for the engine
#[derive(Error, Debug)]
pub enum Error {
    /// Source could not be probed, has no audio track, or uses an unsupported codec
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Source stopped being decodable
    #[error("Corrupt stream: {0}")]
    CorruptStream(String),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Position outside the track
    #[error("Invalid position {position} (track length {length:?})")]
    InvalidPosition { position: u64, length: Option<u64> },

    /// Cue slot holds no cue
    #[error("Cue slot {0} is empty")]
    SlotEmpty(u8),

    /// Cue slot already holds a cue (set-if-empty)
    #[error("Cue slot {0} is occupied")]
    SlotOccupied(u8),

    /// Cue slot index outside the configured range
    #[error("Cue slot {slot} out of range (0..{slots})")]
    InvalidSlot { slot: u8, slots: u8 },

    /// Seek could not be performed
    #[error("Seek error: {0}")]
    Seek(String),

    /// Command not allowed in the current transport state
    #[error("Invalid transition: {command} while {state}")]
    InvalidTransition {
        command: &'static str,
        state: flow_common::events::PlaybackState,
    },

    /// Command requires a loaded track
    #[error("No track loaded")]
    NoTrackLoaded,

    /// Audio output device errors
    #[error("Audio output error: {0}")]
    AudioOutput(String),

    /// Configuration file loading or validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Command loop has shut down
    #[error("Engine stopped")]
    EngineStopped,

    /// Other errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Notification classification for this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::UnsupportedFormat(_) => ErrorKind::UnsupportedFormat,
            Error::CorruptStream(_) => ErrorKind::CorruptStream,
            Error::Io(_) => ErrorKind::Io,
            Error::Seek(_) => ErrorKind::Seek,
            Error::InvalidPosition { .. } => ErrorKind::InvalidPosition,
            Error::AudioOutput(_) => ErrorKind::AudioOutput,
            Error::SlotEmpty(_) => ErrorKind::SlotEmpty,
            Error::SlotOccupied(_) => ErrorKind::SlotOccupied,
            Error::InvalidSlot { .. } => ErrorKind::InvalidSlot,
            Error::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            Error::NoTrackLoaded => ErrorKind::NoTrackLoaded,
            Error::Config(_) => ErrorKind::Config,
            Error::EngineStopped | Error::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Transient errors are retried before being surfaced
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Io(_))
    }
}

impl From<flow_common::Error> for Error {
    fn from(err: flow_common::Error) -> Self {
        match err {
            flow_common::Error::Io(e) => Error::Io(e),
            other => Error::Config(other.to_string()),
        }
    }
}

/// Convenience Result type using the engine Error
pub type Result<T> = std::result::Result<T, Error>;
