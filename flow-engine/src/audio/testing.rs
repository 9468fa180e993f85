//! In-memory sources for unit tests

use crate::audio::decoder::{Decoded, FrameSource, SourceProvider, SourceSpec};
use crate::audio::types::{FrameChunk, SampleFrame, SamplePosition, TrackRef};
use crate::error::{Error, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Frames served from a vector in fixed-size chunks
pub struct VecSource {
    frames: Arc<Vec<SampleFrame>>,
    sample_rate: u32,
    chunk: usize,
    position: usize,
    fail_at: Option<usize>,
    known_length: bool,
    reported_length: Option<u64>,
    reads: Arc<AtomicUsize>,
}

impl VecSource {
    pub fn new(frames: Vec<SampleFrame>, sample_rate: u32) -> Self {
        Self::shared(Arc::new(frames), sample_rate)
    }

    pub fn shared(frames: Arc<Vec<SampleFrame>>, sample_rate: u32) -> Self {
        Self {
            frames,
            sample_rate,
            chunk: 1024,
            position: 0,
            fail_at: None,
            known_length: true,
            reported_length: None,
            reads: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_chunk(mut self, chunk: usize) -> Self {
        self.chunk = chunk.max(1);
        self
    }

    /// Return `CorruptStream` once the cursor reaches `position`
    pub fn fail_at(mut self, position: usize) -> Self {
        self.fail_at = Some(position);
        self
    }

    pub fn unknown_length(mut self) -> Self {
        self.known_length = false;
        self
    }

    /// Header length that disagrees with the frames actually present
    pub fn reported_length(mut self, frames: u64) -> Self {
        self.reported_length = Some(frames);
        self
    }

    /// Counter of `decode_next` calls
    pub fn reads(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.reads)
    }
}

impl FrameSource for VecSource {
    fn spec(&self) -> SourceSpec {
        SourceSpec {
            sample_rate: self.sample_rate,
            channels: 2,
            total_frames: self
                .known_length
                .then(|| self.reported_length.unwrap_or(self.frames.len() as u64)),
        }
    }

    fn position(&self) -> SamplePosition {
        self.position as u64
    }

    fn decode_next(&mut self) -> Result<Decoded> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if let Some(fail) = self.fail_at {
            if self.position >= fail {
                return Err(Error::CorruptStream(format!("scripted failure at {}", fail)));
            }
        }
        if self.position >= self.frames.len() {
            return Ok(Decoded::EndOfStream);
        }
        let mut end = (self.position + self.chunk).min(self.frames.len());
        if let Some(fail) = self.fail_at {
            if self.position < fail {
                end = end.min(fail);
            }
        }
        let chunk = FrameChunk {
            start: self.position as u64,
            frames: self.frames[self.position..end].to_vec(),
        };
        self.position = end;
        Ok(Decoded::Frames(chunk))
    }

    fn seek(&mut self, position: SamplePosition) -> Result<()> {
        if position as usize > self.frames.len() {
            return Err(Error::InvalidPosition {
                position,
                length: Some(self.frames.len() as u64),
            });
        }
        self.position = position as usize;
        Ok(())
    }
}

/// Serves the same frames for every track reference
pub struct VecProvider {
    frames: Arc<Vec<SampleFrame>>,
    sample_rate: u32,
    concurrent: bool,
    reported_length: Option<u64>,
}

impl VecProvider {
    pub fn new(frames: Vec<SampleFrame>, sample_rate: u32) -> Self {
        Self { frames: Arc::new(frames), sample_rate, concurrent: true, reported_length: None }
    }

    /// Sources claim `frames` in their header regardless of the data
    pub fn with_reported_length(mut self, frames: u64) -> Self {
        self.reported_length = Some(frames);
        self
    }

    pub fn single_cursor(mut self) -> Self {
        self.concurrent = false;
        self
    }
}

impl SourceProvider for VecProvider {
    fn open(&self, _source: &TrackRef) -> Result<Box<dyn FrameSource>> {
        let source = VecSource::shared(Arc::clone(&self.frames), self.sample_rate);
        Ok(Box::new(match self.reported_length {
            Some(frames) => source.reported_length(frames),
            None => source,
        }))
    }

    fn supports_concurrent_cursors(&self) -> bool {
        self.concurrent
    }
}

/// Frame whose value encodes its position, for checking what was played
pub fn indexed_frame(index: usize) -> SampleFrame {
    SampleFrame::from_mono(index as f32)
}

pub fn indexed_frames(n: usize) -> Vec<SampleFrame> {
    (0..n).map(indexed_frame).collect()
}
