//! Consumer side of the playout buffer
//!
//! `PlayoutSink` is what an audio output pulls from. It is cheap to clone and
//! safe to call from a real-time callback: it never blocks and never allocates.

use crate::audio::types::SampleFrame;
use crate::playback::clock::PlaybackClock;
use crate::playback::ring_buffer::PlayoutRingBuffer;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct PlayoutSink {
    ring: Arc<PlayoutRingBuffer>,
    clock: Arc<PlaybackClock>,
}

impl PlayoutSink {
    pub fn new(ring: Arc<PlayoutRingBuffer>, clock: Arc<PlaybackClock>) -> Self {
        Self { ring, clock }
    }

    /// Fill `out` with the next frames to play
    ///
    /// Outputs silence while the gate is closed or on underrun. The playback
    /// clock advances by exactly the number of buffered frames consumed, which
    /// is returned.
    pub fn pull(&self, out: &mut [SampleFrame]) -> usize {
        let clock = &self.clock;
        self.ring.pop_into(out, |n| clock.advance(n))
    }

    /// Sample-by-sample variant for per-frame output callbacks
    pub fn next_frame(&self) -> SampleFrame {
        let mut frame = [SampleFrame::zero()];
        self.pull(&mut frame);
        frame[0]
    }

    pub fn clock(&self) -> &Arc<PlaybackClock> {
        &self.clock
    }
}
