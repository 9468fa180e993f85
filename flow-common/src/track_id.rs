//! Track identity
//!
//! A track is identified by a UUIDv5 derived from its canonical source path, so
//! the same file maps to the same id across sessions. Cue sheets, waveform
//! caches and annotations are keyed by this id.

use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

/// Namespace for path-derived track ids
const TRACK_NAMESPACE: Uuid = Uuid::from_bytes([
    0x6f, 0x0c, 0x2b, 0x1e, 0x93, 0x4d, 0x4a, 0x8e, 0xa1, 0x57, 0x3c, 0xd2, 0x0b, 0x88, 0x41, 0x7f,
]);

/// Stable identifier of a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackId(pub Uuid);

impl TrackId {
    /// Derive the id for a source path
    ///
    /// The path is canonicalized when it exists; otherwise it is used verbatim.
    pub fn from_path(path: &Path) -> Self {
        let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        TrackId(Uuid::new_v5(
            &TRACK_NAMESPACE,
            canonical.to_string_lossy().as_bytes(),
        ))
    }

    /// Id for an in-memory or otherwise non-file source, derived from a name
    pub fn from_name(name: &str) -> Self {
        TrackId(Uuid::new_v5(&TRACK_NAMESPACE, name.as_bytes()))
    }
}

impl std::fmt::Display for TrackId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
