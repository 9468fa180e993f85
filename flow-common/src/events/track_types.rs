//! Cue and annotation types shared between the engine and its collaborators

use serde::{Deserialize, Serialize};

use crate::TrackId;

/// A saved sample position the user can jump back to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CuePoint {
    /// Slot index (0-based)
    pub slot: u8,
    /// Frame position within the track
    pub position: u64,
    /// Optional user label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// All cues of one track, as handed to or received from a persistence layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CueSheet {
    pub track_id: TrackId,
    pub cues: Vec<CuePoint>,
}

/// Musical metadata produced by an external analysis tool
///
/// The engine stores and republishes these values; it never computes them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackAnnotations {
    /// Tempo in beats per minute
    #[serde(default)]
    pub bpm: Option<f64>,
    /// Beat positions in frames
    #[serde(default)]
    pub beatgrid: Vec<u64>,
    /// Musical key (e.g. "8A", "F#m")
    #[serde(default)]
    pub key: Option<String>,
}
