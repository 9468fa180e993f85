//! Playback clock
//!
//! The authoritative "current sample position". It moves forward only by the
//! number of frames the output sink actually consumed, and is set (never
//! advanced) by seek, stop and load.

use crate::audio::types::SamplePosition;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct PlaybackClock {
    position: AtomicU64,
}

impl PlaybackClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position(&self) -> SamplePosition {
        self.position.load(Ordering::Acquire)
    }

    /// Advance by frames consumed from the ring buffer
    ///
    /// Called by the consumer while it holds the ring's consumer lock.
    pub(crate) fn advance(&self, frames: usize) {
        self.position.fetch_add(frames as u64, Ordering::AcqRel);
    }

    /// Jump to `position` (seek completion, stop, load)
    ///
    /// Called under the ring's consumer lock together with a flush.
    pub(crate) fn set(&self, position: SamplePosition) {
        self.position.store(position, Ordering::Release);
    }
}
