//! Cue point management
//!
//! A fixed number of slots per track, each holding at most one `CuePoint`.
//! Positions are validated against the track length: `[0, total]` once the
//! total is known, otherwise `[0, decoded_extent]` so a cue can never point
//! past audio that is known to exist.
//!
//! Single writer: only the engine command loop mutates the manager.

use crate::audio::types::{SamplePosition, TrackLength};
use crate::error::{Error, Result};
use flow_common::events::{CuePoint, CueSheet};
use flow_common::TrackId;
use std::sync::Arc;
use tracing::{debug, warn};

/// How `set_cue` treats an occupied slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SetMode {
    /// Replace whatever is in the slot
    #[default]
    Overwrite,
    /// Fail with `SlotOccupied` if the slot holds a cue
    IfEmpty,
}

/// Seek produced by `jump_cue`, executed by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeekCommand {
    pub target: SamplePosition,
}

#[derive(Debug)]
struct AttachedTrack {
    id: TrackId,
    length: Arc<TrackLength>,
}

#[derive(Debug)]
pub struct CueManager {
    slots: Vec<Option<CuePoint>>,
    track: Option<AttachedTrack>,
}

impl CueManager {
    pub fn new(slot_count: u8) -> Self {
        Self {
            slots: vec![None; slot_count as usize],
            track: None,
        }
    }

    pub fn slot_count(&self) -> u8 {
        self.slots.len() as u8
    }

    /// Bind to a newly loaded track; all cues are dropped
    pub fn attach(&mut self, id: TrackId, length: Arc<TrackLength>) {
        self.clear();
        self.track = Some(AttachedTrack { id, length });
    }

    /// Unbind (load failure); all cues are dropped
    pub fn detach(&mut self) {
        self.clear();
        self.track = None;
    }

    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|s| *s = None);
    }

    pub fn track_id(&self) -> Option<TrackId> {
        self.track.as_ref().map(|t| t.id)
    }

    fn check_slot(&self, slot: u8) -> Result<usize> {
        if (slot as usize) < self.slots.len() {
            Ok(slot as usize)
        } else {
            Err(Error::InvalidSlot { slot, slots: self.slot_count() })
        }
    }

    fn check_position(&self, position: SamplePosition) -> Result<()> {
        let track = self.track.as_ref().ok_or(Error::NoTrackLoaded)?;
        let end = track.length.addressable_end();
        if position > end {
            return Err(Error::InvalidPosition {
                position,
                length: track.length.total(),
            });
        }
        Ok(())
    }

    /// Store a cue; returns the cue it replaced, if any
    pub fn set_cue(
        &mut self,
        slot: u8,
        position: SamplePosition,
        label: Option<String>,
        mode: SetMode,
    ) -> Result<Option<CuePoint>> {
        let index = self.check_slot(slot)?;
        self.check_position(position)?;

        if mode == SetMode::IfEmpty && self.slots[index].is_some() {
            return Err(Error::SlotOccupied(slot));
        }

        debug!(slot, position, "Cue set");
        Ok(self.slots[index].replace(CuePoint { slot, position, label }))
    }

    /// Seek target for a stored cue
    pub fn jump_cue(&self, slot: u8) -> Result<SeekCommand> {
        let index = self.check_slot(slot)?;
        self.slots[index]
            .as_ref()
            .map(|cue| SeekCommand { target: cue.position })
            .ok_or(Error::SlotEmpty(slot))
    }

    pub fn delete_cue(&mut self, slot: u8) -> Result<CuePoint> {
        let index = self.check_slot(slot)?;
        let removed = self.slots[index].take().ok_or(Error::SlotEmpty(slot))?;
        debug!(slot, position = removed.position, "Cue deleted");
        Ok(removed)
    }

    pub fn set_label(&mut self, slot: u8, label: Option<String>) -> Result<()> {
        let index = self.check_slot(slot)?;
        let cue = self.slots[index].as_mut().ok_or(Error::SlotEmpty(slot))?;
        cue.label = label;
        Ok(())
    }

    pub fn get(&self, slot: u8) -> Option<&CuePoint> {
        self.slots.get(slot as usize).and_then(|c| c.as_ref())
    }

    /// All cues ordered by position, ties broken by slot
    pub fn list_cues(&self) -> Vec<CuePoint> {
        let mut cues: Vec<CuePoint> = self.slots.iter().flatten().cloned().collect();
        cues.sort_by_key(|c| (c.position, c.slot));
        cues
    }

    /// Current cues as a sheet for a persistence collaborator
    pub fn sheet(&self) -> Option<CueSheet> {
        self.track_id().map(|track_id| CueSheet {
            track_id,
            cues: self.list_cues(),
        })
    }

    /// Drop cues that lie past the end of the track
    ///
    /// A container header can overstate the length; once decoding finds the
    /// real end, cues validated against the estimate may no longer be valid.
    /// Returns the cues removed.
    pub fn prune_beyond_end(&mut self) -> Vec<CuePoint> {
        let Some(end) = self.track.as_ref().map(|t| t.length.addressable_end()) else {
            return Vec::new();
        };
        let mut removed = Vec::new();
        for slot in self.slots.iter_mut() {
            if slot.as_ref().is_some_and(|cue| cue.position > end) {
                if let Some(cue) = slot.take() {
                    warn!(slot = cue.slot, position = cue.position, end, "Cue past end of track removed");
                    removed.push(cue);
                }
            }
        }
        removed
    }

    /// Bulk-load previously stored cues, overwriting the slots they name
    ///
    /// Cues that fail validation are skipped. Returns the number applied.
    pub fn restore(&mut self, cues: &[CuePoint]) -> Result<usize> {
        if self.track.is_none() {
            return Err(Error::NoTrackLoaded);
        }
        let mut applied = 0;
        for cue in cues {
            match self.set_cue(cue.slot, cue.position, cue.label.clone(), SetMode::Overwrite) {
                Ok(_) => applied += 1,
                Err(e) => warn!(slot = cue.slot, position = cue.position, "Skipping stored cue: {}", e),
            }
        }
        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager_with_track(total: Option<u64>) -> (CueManager, Arc<TrackLength>) {
        let length = Arc::new(TrackLength::new(total));
        let mut cues = CueManager::new(8);
        cues.attach(TrackId::from_name("track"), Arc::clone(&length));
        (cues, length)
    }

    #[test]
    fn test_set_then_jump_returns_exact_position() {
        let (mut cues, _) = manager_with_track(Some(180_000));
        cues.set_cue(1, 44_100, None, SetMode::Overwrite).expect("set");
        assert_eq!(cues.jump_cue(1).expect("jump"), SeekCommand { target: 44_100 });
    }

    #[test]
    fn test_position_bounds_with_known_total() {
        let (mut cues, _) = manager_with_track(Some(1_000));
        assert!(cues.set_cue(0, 0, None, SetMode::Overwrite).is_ok());
        assert!(cues.set_cue(1, 1_000, None, SetMode::Overwrite).is_ok());
        assert!(matches!(
            cues.set_cue(2, 1_001, None, SetMode::Overwrite),
            Err(Error::InvalidPosition { position: 1_001, length: Some(1_000) })
        ));
    }

    #[test]
    fn test_unknown_length_limited_to_decoded_extent() {
        let (mut cues, length) = manager_with_track(None);
        assert!(cues.set_cue(0, 10, None, SetMode::Overwrite).is_err());

        length.observe_decoded(5_000);
        assert!(cues.set_cue(0, 5_000, None, SetMode::Overwrite).is_ok());
        assert!(cues.set_cue(1, 5_001, None, SetMode::Overwrite).is_err());
    }

    #[test]
    fn test_if_empty_mode() {
        let (mut cues, _) = manager_with_track(Some(10_000));
        cues.set_cue(3, 100, None, SetMode::IfEmpty).expect("first set");
        assert!(matches!(
            cues.set_cue(3, 200, None, SetMode::IfEmpty),
            Err(Error::SlotOccupied(3))
        ));
        let previous = cues.set_cue(3, 200, None, SetMode::Overwrite).expect("overwrite");
        assert_eq!(previous.map(|c| c.position), Some(100));
    }

    #[test]
    fn test_empty_and_invalid_slots() {
        let (mut cues, _) = manager_with_track(Some(10_000));
        assert!(matches!(cues.jump_cue(2), Err(Error::SlotEmpty(2))));
        assert!(matches!(cues.delete_cue(2), Err(Error::SlotEmpty(2))));
        assert!(matches!(
            cues.set_cue(8, 0, None, SetMode::Overwrite),
            Err(Error::InvalidSlot { slot: 8, slots: 8 })
        ));
    }

    #[test]
    fn test_list_ordered_by_position() {
        let (mut cues, _) = manager_with_track(Some(10_000));
        cues.set_cue(0, 900, None, SetMode::Overwrite).expect("set");
        cues.set_cue(5, 100, Some("drop".into()), SetMode::Overwrite).expect("set");
        cues.set_cue(2, 500, None, SetMode::Overwrite).expect("set");
        cues.set_cue(7, 500, None, SetMode::Overwrite).expect("set");

        let order: Vec<(u8, u64)> = cues.list_cues().iter().map(|c| (c.slot, c.position)).collect();
        assert_eq!(order, vec![(5, 100), (2, 500), (7, 500), (0, 900)]);
    }

    #[test]
    fn test_delete_then_jump_is_empty() {
        let (mut cues, _) = manager_with_track(Some(10_000));
        cues.set_cue(4, 42, None, SetMode::Overwrite).expect("set");
        assert_eq!(cues.delete_cue(4).expect("delete").position, 42);
        assert!(matches!(cues.jump_cue(4), Err(Error::SlotEmpty(4))));
    }

    #[test]
    fn test_attach_clears_cues() {
        let (mut cues, _) = manager_with_track(Some(10_000));
        cues.set_cue(1, 44, None, SetMode::Overwrite).expect("set");
        cues.attach(TrackId::from_name("other"), Arc::new(TrackLength::new(Some(5))));
        assert!(cues.list_cues().is_empty());
        assert!(matches!(cues.jump_cue(1), Err(Error::SlotEmpty(1))));
    }

    #[test]
    fn test_no_track_rejects_set() {
        let mut cues = CueManager::new(4);
        assert!(matches!(
            cues.set_cue(0, 0, None, SetMode::Overwrite),
            Err(Error::NoTrackLoaded)
        ));
    }

    #[test]
    fn test_restore_skips_invalid() {
        let (mut cues, _) = manager_with_track(Some(1_000));
        let stored = vec![
            CuePoint { slot: 0, position: 10, label: None },
            CuePoint { slot: 1, position: 5_000, label: None },
            CuePoint { slot: 9, position: 20, label: None },
        ];
        assert_eq!(cues.restore(&stored).expect("restore"), 1);
        assert_eq!(cues.list_cues().len(), 1);
    }

    #[test]
    fn test_set_label() {
        let (mut cues, _) = manager_with_track(Some(1_000));
        cues.set_cue(0, 10, None, SetMode::Overwrite).expect("set");
        cues.set_label(0, Some("intro".into())).expect("label");
        assert_eq!(cues.get(0).and_then(|c| c.label.as_deref()), Some("intro"));
        assert!(cues.set_label(1, None).is_err());
    }

    #[test]
    fn test_shorter_than_header_prunes_cues_past_real_end() {
        let (mut cues, length) = manager_with_track(Some(30_000));
        cues.set_cue(0, 25_000, None, SetMode::Overwrite).expect("set");
        cues.set_cue(1, 10_000, Some("keep".into()), SetMode::Overwrite).expect("set");
        assert!(cues.prune_beyond_end().is_empty());

        length.observe_end(20_000);
        let removed = cues.prune_beyond_end();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].slot, 0);
        assert!(matches!(cues.jump_cue(0), Err(Error::SlotEmpty(0))));
        assert_eq!(cues.list_cues().len(), 1);
        assert!(cues.list_cues().iter().all(|c| c.position <= 20_000));
    }
}
