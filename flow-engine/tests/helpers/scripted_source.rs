//! Scripted in-memory audio source
//!
//! Serves frames whose value is their own index, so a test can tell exactly
//! which part of the track reached the output. Errors and latency are injected
//! at chosen positions.

use flow_engine::audio::{Decoded, FrameChunk, FrameSource, SampleFrame, SamplePosition, SourceProvider, SourceSpec, TrackRef};
use flow_engine::{Error, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Script {
    pub frames: u64,
    pub sample_rate: u32,
    pub chunk: usize,
    pub known_length: bool,
    /// `CorruptStream` once the cursor reaches this position
    pub corrupt_at: Option<u64>,
    /// `(position, count)`: that many I/O errors before the chunk at `position` decodes
    pub io_errors_at: Option<(u64, u32)>,
    /// Every seek fails with a seek error, leaving the cursor in place
    pub failing_seeks: bool,
    /// Delay applied to every seek
    pub seek_latency: Duration,
    /// Delay applied to every decode step
    pub decode_latency: Duration,
}

impl Script {
    pub fn new(frames: u64, sample_rate: u32) -> Self {
        Self {
            frames,
            sample_rate,
            chunk: 512,
            known_length: true,
            corrupt_at: None,
            io_errors_at: None,
            failing_seeks: false,
            seek_latency: Duration::ZERO,
            decode_latency: Duration::ZERO,
        }
    }
}

pub struct ScriptedSource {
    script: Arc<Script>,
    position: u64,
    io_failures: u32,
}

impl ScriptedSource {
    pub fn new(script: Arc<Script>) -> Self {
        Self { script, position: 0, io_failures: 0 }
    }
}

impl FrameSource for ScriptedSource {
    fn spec(&self) -> SourceSpec {
        SourceSpec {
            sample_rate: self.script.sample_rate,
            channels: 2,
            total_frames: self.script.known_length.then_some(self.script.frames),
        }
    }

    fn position(&self) -> SamplePosition {
        self.position
    }

    fn decode_next(&mut self) -> Result<Decoded> {
        if !self.script.decode_latency.is_zero() {
            std::thread::sleep(self.script.decode_latency);
        }
        if let Some(at) = self.script.corrupt_at {
            if self.position >= at {
                return Err(Error::CorruptStream(format!("scripted corruption at {}", at)));
            }
        }
        if let Some((at, count)) = self.script.io_errors_at {
            let next_end = self.position + self.script.chunk as u64;
            if self.position <= at && at < next_end && self.io_failures < count {
                self.io_failures += 1;
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "scripted read failure",
                )));
            }
        }
        if self.position >= self.script.frames {
            return Ok(Decoded::EndOfStream);
        }

        let mut end = (self.position + self.script.chunk as u64).min(self.script.frames);
        if let Some(at) = self.script.corrupt_at {
            if self.position < at {
                end = end.min(at);
            }
        }
        let frames = (self.position..end)
            .map(|i| SampleFrame::from_mono(i as f32))
            .collect();
        let chunk = FrameChunk { start: self.position, frames };
        self.position = end;
        Ok(Decoded::Frames(chunk))
    }

    fn seek(&mut self, position: SamplePosition) -> Result<()> {
        if !self.script.seek_latency.is_zero() {
            std::thread::sleep(self.script.seek_latency);
        }
        if self.script.failing_seeks {
            return Err(Error::Seek(format!("scripted seek failure at {}", position)));
        }
        if position > self.script.frames {
            return Err(Error::InvalidPosition {
                position,
                length: Some(self.script.frames),
            });
        }
        self.position = position;
        Ok(())
    }
}

/// Provider handing out `ScriptedSource`s for any path
pub struct ScriptedProvider {
    script: Arc<Script>,
    concurrent: bool,
    opened: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new(script: Script) -> Self {
        Self {
            script: Arc::new(script),
            concurrent: true,
            opened: AtomicUsize::new(0),
        }
    }

    /// Report that a second cursor cannot be opened
    pub fn single_cursor(mut self) -> Self {
        self.concurrent = false;
        self
    }

    /// Sources opened so far (playback plus waveform)
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

impl SourceProvider for ScriptedProvider {
    fn open(&self, _source: &TrackRef) -> Result<Box<dyn FrameSource>> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedSource::new(Arc::clone(&self.script))))
    }

    fn supports_concurrent_cursors(&self) -> bool {
        self.concurrent
    }
}
