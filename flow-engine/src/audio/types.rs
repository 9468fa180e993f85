//! Core audio data types
//!
//! Defines the frame, position and track types shared by the decoder, the ring
//! buffer, the cue manager and the waveform generator.

use flow_common::TrackId;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Frame index within a track (one frame = one sample per channel)
pub type SamplePosition = u64;

/// SampleFrame represents a single stereo sample (one frame of audio).
///
/// Values are nominally in `[-1.0, 1.0]`. Mono sources are duplicated to both
/// channels; sources with more channels contribute their first two.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SampleFrame {
    /// Left channel sample
    pub left: f32,

    /// Right channel sample
    pub right: f32,
}

impl SampleFrame {
    /// Create a silent frame (0.0, 0.0)
    pub fn zero() -> Self {
        SampleFrame { left: 0.0, right: 0.0 }
    }

    /// Create frame from mono sample (duplicate to both channels)
    pub fn from_mono(sample: f32) -> Self {
        SampleFrame { left: sample, right: sample }
    }

    /// Create frame from stereo samples
    pub fn from_stereo(left: f32, right: f32) -> Self {
        SampleFrame { left, right }
    }

    /// Smallest of the two channel values
    pub fn min_sample(&self) -> f32 {
        self.left.min(self.right)
    }

    /// Largest of the two channel values
    pub fn max_sample(&self) -> f32 {
        self.left.max(self.right)
    }

    /// Clamp both channels to [-1.0, 1.0]
    pub fn clamp(&mut self) {
        self.left = self.left.clamp(-1.0, 1.0);
        self.right = self.right.clamp(-1.0, 1.0);
    }
}

/// A run of decoded frames starting at a known track position
#[derive(Debug, Clone, PartialEq)]
pub struct FrameChunk {
    /// Position of `frames[0]`
    pub start: SamplePosition,
    pub frames: Vec<SampleFrame>,
}

impl FrameChunk {
    /// Position one past the last frame
    pub fn end(&self) -> SamplePosition {
        self.start + self.frames.len() as u64
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

/// What a track handle refers to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TrackRef {
    pub path: PathBuf,
}

impl TrackRef {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        TrackRef { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn track_id(&self) -> TrackId {
        TrackId::from_path(&self.path)
    }
}

const UNKNOWN: u64 = u64::MAX;

/// Track length, refined as decoding progresses
///
/// Shared between the decode feeder (writer), the waveform scan (writer), and
/// the command loop (reader). `total` is `None` until the container reports it
/// or a decoder reaches end of stream. `decoded_extent` is the highest position
/// any decoder has produced so far.
#[derive(Debug)]
pub struct TrackLength {
    total: AtomicU64,
    decoded_extent: AtomicU64,
}

impl TrackLength {
    pub fn new(total: Option<u64>) -> Self {
        TrackLength {
            total: AtomicU64::new(total.unwrap_or(UNKNOWN)),
            decoded_extent: AtomicU64::new(0),
        }
    }

    /// Total frame count, if known
    pub fn total(&self) -> Option<u64> {
        match self.total.load(Ordering::Acquire) {
            UNKNOWN => None,
            n => Some(n),
        }
    }

    pub fn decoded_extent(&self) -> u64 {
        self.decoded_extent.load(Ordering::Acquire)
    }

    /// Record that frames up to `end` (exclusive) have been decoded
    pub fn observe_decoded(&self, end: u64) {
        self.decoded_extent.fetch_max(end, Ordering::AcqRel);
    }

    /// Record that end of stream was reached at `end`
    ///
    /// The decoded end is authoritative: container headers can be wrong, so an
    /// earlier estimate is replaced.
    pub fn observe_end(&self, end: u64) {
        self.observe_decoded(end);
        self.total.store(end, Ordering::Release);
    }

    /// Highest position a cue or seek may target right now
    ///
    /// The known total when available, otherwise the decoded extent.
    pub fn addressable_end(&self) -> u64 {
        self.total().unwrap_or_else(|| self.decoded_extent())
    }
}

/// Immutable handle to a loaded audio source
///
/// Cheap to clone. Replaced, never mutated, when the next track is loaded; only
/// the length refinement changes after publication.
#[derive(Debug, Clone)]
pub struct Track {
    pub id: TrackId,
    pub source: TrackRef,
    pub sample_rate: u32,
    /// Channel count of the source (output is always stereo)
    pub channels: u16,
    pub length: Arc<TrackLength>,
}

impl Track {
    pub fn new(source: TrackRef, sample_rate: u32, channels: u16, total: Option<u64>) -> Self {
        Track {
            id: source.track_id(),
            source,
            sample_rate,
            channels,
            length: Arc::new(TrackLength::new(total)),
        }
    }

    /// Total frame count, if known
    pub fn total_frames(&self) -> Option<u64> {
        self.length.total()
    }

    /// Get duration in milliseconds, if the length is known
    pub fn duration_ms(&self) -> Option<u64> {
        self.total_frames()
            .map(|n| flow_common::time::frames_to_ms(n, self.sample_rate))
    }
}
