//! Playback-related type definitions
//!
//! Supporting types for transport state and error classification.

use serde::{Deserialize, Serialize};

/// Transport state enumeration
///
/// `Seeking` is transient: it is entered from any of the other three states
/// and always returns to the state it was entered from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    #[default]
    Stopped,
    Playing,
    Paused,
    Seeking,
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlaybackState::Stopped => write!(f, "stopped"),
            PlaybackState::Playing => write!(f, "playing"),
            PlaybackState::Paused => write!(f, "paused"),
            PlaybackState::Seeking => write!(f, "seeking"),
        }
    }
}

/// Classification carried by `Error` and `Warning` notifications
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub enum ErrorKind {
    /// Source could not be opened as audio
    UnsupportedFormat,
    /// Source became undecodable mid-stream
    CorruptStream,
    /// Reading the source failed
    Io,
    /// A seek could not be performed
    Seek,
    /// Requested position outside the track
    InvalidPosition,
    /// Output device failure
    AudioOutput,
    /// Cue slot holds no cue
    SlotEmpty,
    /// Cue slot already holds a cue
    SlotOccupied,
    /// Cue slot index outside the configured range
    InvalidSlot,
    /// Command not allowed in the current transport state
    InvalidTransition,
    /// Command needs a loaded track
    NoTrackLoaded,
    /// Invalid configuration value
    Config,
    /// Anything else
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::UnsupportedFormat => write!(f, "UnsupportedFormat"),
            ErrorKind::CorruptStream => write!(f, "CorruptStream"),
            ErrorKind::Io => write!(f, "Io"),
            ErrorKind::Seek => write!(f, "Seek"),
            ErrorKind::InvalidPosition => write!(f, "InvalidPosition"),
            ErrorKind::AudioOutput => write!(f, "AudioOutput"),
            ErrorKind::SlotEmpty => write!(f, "SlotEmpty"),
            ErrorKind::SlotOccupied => write!(f, "SlotOccupied"),
            ErrorKind::InvalidSlot => write!(f, "InvalidSlot"),
            ErrorKind::InvalidTransition => write!(f, "InvalidTransition"),
            ErrorKind::NoTrackLoaded => write!(f, "NoTrackLoaded"),
            ErrorKind::Config => write!(f, "Config"),
            ErrorKind::Internal => write!(f, "Internal"),
        }
    }
}
