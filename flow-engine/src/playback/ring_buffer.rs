//! Playout ring buffer between the decode feeder and the audio output
//!
//! Fixed-capacity SPSC queue of decoded stereo frames. The feeder thread is the
//! only producer; the output sink is the only consumer.
//!
//! ```text
//! FrameSource → feeder → push_slice()
//!                            ↓
//!                    PlayoutRingBuffer
//!                    - allocated once: buffer_ms @ max_sample_rate
//!                    - per-track limit: buffer_ms @ track rate
//!                            ↓
//!                   pop_into() (gate open)
//!                            ↓
//!                      PlayoutSink → device
//! ```
//!
//! Neither side ever blocks on the other: `push_slice` reports how many frames
//! fit, and the consumer uses `try_lock` and outputs silence only while a flush
//! holds its half.

use crate::audio::types::SampleFrame;
use ringbuf::{traits::*, HeapCons, HeapProd, HeapRb};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, TryLockError};
use tracing::{debug, trace};

/// Counter snapshot for diagnostics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferStatistics {
    pub frames_written: u64,
    pub frames_read: u64,
    /// Output callbacks that found the gate open but the buffer short
    pub underruns: u64,
    /// Push attempts refused because the buffer was at its limit
    pub overruns: u64,
    pub flushes: u64,
}

/// Playout ring buffer
///
/// ## Thread Safety
///
/// The ring is split into producer and consumer halves at construction, each
/// behind its own Mutex (`try_push`/`try_pop` need `&mut`). Occupancy queries
/// read through the producer half, so the consumer lock is only ever contended
/// by `flush_and`, which takes both.
///
/// Coordination flags (`gate_open`, `decode_complete`) use Acquire/Release;
/// statistics use Relaxed.
pub struct PlayoutRingBuffer {
    prod: Mutex<HeapProd<SampleFrame>>,
    cons: Mutex<HeapCons<SampleFrame>>,

    /// Frames allocated (fixed at construction)
    capacity: usize,

    /// Frames usable for the current track (`<= capacity`)
    limit: AtomicUsize,

    /// Consumer outputs silence and consumes nothing while closed
    gate_open: AtomicBool,

    /// Producer reached end of stream; nothing more will be pushed until a flush
    decode_complete: AtomicBool,

    frames_written: AtomicU64,
    frames_read: AtomicU64,
    underruns: AtomicU64,
    overruns: AtomicU64,
    flushes: AtomicU64,
}

impl std::fmt::Debug for PlayoutRingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlayoutRingBuffer")
            .field("capacity", &self.capacity)
            .field("limit", &self.limit())
            .field("occupied", &self.occupied())
            .field("gate_open", &self.is_gate_open())
            .field("decode_complete", &self.is_decode_complete())
            .finish()
    }
}

/// Lock a mutex, recovering the guard if a previous holder panicked
///
/// Frames are plain data, so a poisoned ring is still structurally valid.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl PlayoutRingBuffer {
    /// Allocate a buffer holding `buffer_ms` of audio at `max_sample_rate`
    pub fn for_duration(buffer_ms: u64, max_sample_rate: u32) -> Self {
        let capacity = flow_common::time::ms_to_frames(buffer_ms, max_sample_rate).max(1);
        Self::new(capacity as usize)
    }

    /// Allocate a buffer of `capacity` frames
    ///
    /// The buffer starts empty, gate closed, limit = capacity.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        debug!(capacity, "Creating playout ring buffer");

        let rb = HeapRb::<SampleFrame>::new(capacity);
        let (prod, cons) = rb.split();

        Self {
            prod: Mutex::new(prod),
            cons: Mutex::new(cons),
            capacity,
            limit: AtomicUsize::new(capacity),
            gate_open: AtomicBool::new(false),
            decode_complete: AtomicBool::new(false),
            frames_written: AtomicU64::new(0),
            frames_read: AtomicU64::new(0),
            underruns: AtomicU64::new(0),
            overruns: AtomicU64::new(0),
            flushes: AtomicU64::new(0),
        }
    }

    /// Allocated frames
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Frames usable for the current track
    pub fn limit(&self) -> usize {
        self.limit.load(Ordering::Acquire)
    }

    /// Bound occupancy to `buffer_ms` at the track's sample rate
    ///
    /// Clamped to the allocation; a track faster than `max_sample_rate` simply
    /// gets less than `buffer_ms` of headroom.
    pub fn set_limit_for_rate(&self, buffer_ms: u64, sample_rate: u32) {
        let frames = flow_common::time::ms_to_frames(buffer_ms, sample_rate) as usize;
        let limit = frames.clamp(1, self.capacity);
        self.limit.store(limit, Ordering::Release);
        debug!(limit, sample_rate, "Ring buffer limit set");
    }

    /// Frames currently buffered
    ///
    /// Never touches the consumer half: the output callback must not find it
    /// locked by bookkeeping.
    pub fn occupied(&self) -> usize {
        lock(&self.prod).occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.occupied() == 0
    }

    /// Frames the producer may still push before hitting the limit
    pub fn free(&self) -> usize {
        self.limit().saturating_sub(self.occupied())
    }

    /// Push as many frames as fit under the limit; never blocks
    ///
    /// Returns the number of frames accepted (a prefix of `frames`).
    pub fn push_slice(&self, frames: &[SampleFrame]) -> usize {
        let mut prod = lock(&self.prod);
        let room = self.limit().saturating_sub(prod.occupied_len());
        let n = room.min(frames.len());
        let pushed = if n > 0 { prod.push_slice(&frames[..n]) } else { 0 };
        drop(prod);

        self.frames_written.fetch_add(pushed as u64, Ordering::Relaxed);
        if pushed < frames.len() {
            self.overruns.fetch_add(1, Ordering::Relaxed);
        }
        pushed
    }

    /// Push one frame; `false` when the buffer is at its limit
    pub fn push(&self, frame: SampleFrame) -> bool {
        self.push_slice(std::slice::from_ref(&frame)) == 1
    }

    /// Pop one frame regardless of the gate (used by tests and diagnostics)
    pub fn pop(&self) -> Option<SampleFrame> {
        let frame = lock(&self.cons).try_pop();
        if frame.is_some() {
            self.frames_read.fetch_add(1, Ordering::Relaxed);
        }
        frame
    }

    /// Consumer read: fill `out` from the buffer while the gate is open
    ///
    /// `on_consumed(n)` runs while the consumer lock is held, so clock updates
    /// are atomic with respect to `flush_and`. Unfilled tail frames are set to
    /// silence. Returns the number of buffered frames consumed.
    pub fn pop_into<F: FnOnce(usize)>(&self, out: &mut [SampleFrame], on_consumed: F) -> usize {
        if !self.is_gate_open() {
            out.fill(SampleFrame::zero());
            return 0;
        }

        let mut cons = match self.cons.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                // Flush in progress; position is about to be reset anyway
                out.fill(SampleFrame::zero());
                return 0;
            }
        };

        // Gate may have closed while we waited
        if !self.is_gate_open() {
            drop(cons);
            out.fill(SampleFrame::zero());
            return 0;
        }

        let n = cons.pop_slice(out);
        if n > 0 {
            on_consumed(n);
        }
        drop(cons);

        if n < out.len() {
            out[n..].fill(SampleFrame::zero());
            if !self.is_decode_complete() {
                self.underruns.fetch_add(1, Ordering::Relaxed);
                trace!(wanted = out.len(), got = n, "Playout buffer underrun");
            }
        }
        self.frames_read.fetch_add(n as u64, Ordering::Relaxed);
        n
    }

    /// Discard all buffered frames, running `with_cleared` under the consumer lock
    ///
    /// Also clears the end-of-stream flag. Only the producer side calls this
    /// (or a caller that has otherwise stopped the producer).
    pub fn flush_and<F: FnOnce()>(&self, with_cleared: F) -> usize {
        let _prod = lock(&self.prod);
        let mut cons = lock(&self.cons);
        let dropped = cons.clear();
        self.decode_complete.store(false, Ordering::Release);
        with_cleared();
        drop(cons);

        self.flushes.fetch_add(1, Ordering::Relaxed);
        trace!(dropped, "Playout buffer flushed");
        dropped
    }

    pub fn flush(&self) -> usize {
        self.flush_and(|| {})
    }

    pub fn open_gate(&self) {
        self.gate_open.store(true, Ordering::Release);
    }

    pub fn close_gate(&self) {
        self.gate_open.store(false, Ordering::Release);
    }

    pub fn is_gate_open(&self) -> bool {
        self.gate_open.load(Ordering::Acquire)
    }

    /// Producer reached end of stream
    pub fn mark_decode_complete(&self) {
        self.decode_complete.store(true, Ordering::Release);
    }

    pub fn is_decode_complete(&self) -> bool {
        self.decode_complete.load(Ordering::Acquire)
    }

    /// End of stream reached and every frame consumed
    pub fn is_drained(&self) -> bool {
        self.is_decode_complete() && self.is_empty()
    }

    pub fn statistics(&self) -> BufferStatistics {
        BufferStatistics {
            frames_written: self.frames_written.load(Ordering::Relaxed),
            frames_read: self.frames_read.load(Ordering::Relaxed),
            underruns: self.underruns.load(Ordering::Relaxed),
            overruns: self.overruns.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
        }
    }
}
