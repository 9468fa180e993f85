//! Track annotations supplied by external analysis
//!
//! BPM, beatgrid and key are never computed here. An analysis collaborator hands
//! them in through `Annotate` and front ends read them back by `TrackId`.

use flow_common::events::TrackAnnotations;
use flow_common::TrackId;
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Default)]
pub struct AnnotationStore {
    entries: HashMap<TrackId, TrackAnnotations>,
}

impl AnnotationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store annotations for a track, replacing any earlier set
    ///
    /// The beatgrid is kept sorted so lookups can binary-search it.
    pub fn insert(&mut self, track_id: TrackId, mut annotations: TrackAnnotations) -> Option<TrackAnnotations> {
        annotations.beatgrid.sort_unstable();
        annotations.beatgrid.dedup();
        debug!(
            track_id = %track_id,
            bpm = ?annotations.bpm,
            beats = annotations.beatgrid.len(),
            "Annotations stored"
        );
        self.entries.insert(track_id, annotations)
    }

    pub fn get(&self, track_id: TrackId) -> Option<&TrackAnnotations> {
        self.entries.get(&track_id)
    }

    pub fn remove(&mut self, track_id: TrackId) -> Option<TrackAnnotations> {
        self.entries.remove(&track_id)
    }

    /// Nearest beat at or before `position`
    pub fn beat_at_or_before(&self, track_id: TrackId, position: u64) -> Option<u64> {
        let grid = &self.entries.get(&track_id)?.beatgrid;
        match grid.binary_search(&position) {
            Ok(i) => Some(grid[i]),
            Err(0) => None,
            Err(i) => Some(grid[i - 1]),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
