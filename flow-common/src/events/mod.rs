//! Event types for the flow notification stream
//!
//! Provides the shared event definitions and the EventBus that carries them from
//! the engine to any number of front ends.

// Sub-modules (supporting types)
mod playback_types;
mod track_types;

pub use playback_types::{ErrorKind, PlaybackState};
pub use track_types::{CuePoint, CueSheet, TrackAnnotations};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::broadcast;

use crate::TrackId;

/// Flow notification types
///
/// Events are broadcast via EventBus and can be serialized for any external
/// transport. Every variant carries the time it was produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum FlowEvent {
    /// Playback clock moved
    ///
    /// Triggers:
    /// - UI: Update the position readout and the waveform playhead
    PositionChanged {
        track_id: TrackId,
        /// Frames consumed by the output since the start of the track
        position: u64,
        /// Sample rate of the track, for converting `position` to time
        sample_rate: u32,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Transport state changed
    ///
    /// Triggers:
    /// - UI: Update the play/pause indicator
    StateChanged {
        old_state: PlaybackState,
        new_state: PlaybackState,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A new track replaced the previous one
    ///
    /// Triggers:
    /// - UI: Reset cue display and waveform
    /// - Persistence: Offer stored cues via `RestoreCues`
    TrackLoaded {
        track_id: TrackId,
        path: PathBuf,
        sample_rate: u32,
        channels: u16,
        /// Total frames, when the container reports it
        total_frames: Option<u64>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Playback reached the end of the track and drained the buffer
    TrackEnded {
        track_id: TrackId,
        position: u64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// An operation failed
    ///
    /// Fatal decode failures are always followed by `StateChanged` to `stopped`.
    Error {
        kind: ErrorKind,
        message: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A recoverable problem (e.g. I/O retries exhausted)
    Warning {
        kind: ErrorKind,
        message: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// New waveform buckets are available
    ///
    /// `start..end` is the bucket index range appended since the last
    /// notification. `complete` is set on the final batch of a scan.
    WaveformBucketsReady {
        track_id: TrackId,
        start: usize,
        end: usize,
        bucket_width: u32,
        complete: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// The cue set of the current track changed
    ///
    /// Triggers:
    /// - UI: Redraw cue markers
    /// - Persistence: Store the new cue sheet
    CuesChanged {
        track_id: TrackId,
        cues: Vec<CuePoint>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Annotations for a track were supplied or replaced
    AnnotationsUpdated {
        track_id: TrackId,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl FlowEvent {
    /// Short variant name for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            FlowEvent::PositionChanged { .. } => "PositionChanged",
            FlowEvent::StateChanged { .. } => "StateChanged",
            FlowEvent::TrackLoaded { .. } => "TrackLoaded",
            FlowEvent::TrackEnded { .. } => "TrackEnded",
            FlowEvent::Error { .. } => "Error",
            FlowEvent::Warning { .. } => "Warning",
            FlowEvent::WaveformBucketsReady { .. } => "WaveformBucketsReady",
            FlowEvent::CuesChanged { .. } => "CuesChanged",
            FlowEvent::AnnotationsUpdated { .. } => "AnnotationsUpdated",
        }
    }
}

/// Broadcast channel for FlowEvents
///
/// Slow subscribers lose the oldest events (`RecvError::Lagged`) rather than
/// slowing the engine down.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<FlowEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// # Arguments
    ///
    /// * `capacity` - Number of events to buffer before dropping old events
    ///
    /// # Examples
    ///
    /// ```
    /// use flow_common::events::EventBus;
    ///
    /// let event_bus = EventBus::new(256);
    /// assert_eq!(event_bus.capacity(), 256);
    /// ```
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<FlowEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: FlowEvent,
    ) -> Result<usize, broadcast::error::SendError<FlowEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: FlowEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
