//! Audio decoding, frame types and output drivers

pub mod decoder;
pub mod output;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use decoder::{Decoded, FileSourceProvider, FrameSource, SourceProvider, SourceSpec, SymphoniaDecoder};
pub use output::{AudioOutput, NullOutput, OutputDriver};
pub use types::{FrameChunk, SampleFrame, SamplePosition, Track, TrackLength, TrackRef};
