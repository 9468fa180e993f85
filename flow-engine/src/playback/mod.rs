//! Playback engine: transport, buffering, cues and waveform

pub mod clock;
pub mod commands;
pub mod cues;
pub mod engine;
pub mod feeder;
pub mod metadata;
pub mod ring_buffer;
pub mod sink;
pub mod transport;
pub mod waveform;

pub use clock::PlaybackClock;
pub use commands::{EngineHandle, EngineStatus, TrackInfo};
pub use cues::{CueManager, SeekCommand, SetMode};
pub use engine::{EngineParts, PlaybackEngine};
pub use ring_buffer::{BufferStatistics, PlayoutRingBuffer};
pub use sink::PlayoutSink;
pub use transport::{StateChange, Transport};
pub use waveform::{Aggregation, WaveformBucket, WaveformScan, WaveformSummary};
