//! # flow playback engine (flow-engine)
//!
//! Audio playback core for a terminal DJ player.
//!
//! **Purpose:** Decode tracks, keep a bounded playout buffer ahead of the audio
//! device, seek sample-accurately, manage cue points, and stream a waveform
//! summary to the UI while playing.
//!
//! **Architecture:** symphonia decode feeder thread → ringbuf playout buffer →
//! cpal (or null) output, steered by a tokio command loop that publishes
//! `FlowEvent`s on the shared event bus.

pub mod audio;
pub mod config;
pub mod error;
pub mod playback;

pub use error::{Error, Result};
pub use playback::{EngineHandle, EngineParts, PlaybackEngine, PlayoutSink};
