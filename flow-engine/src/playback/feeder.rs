//! Decode feeder: the ring buffer's only producer
//!
//! A dedicated thread that owns the playback `FrameSource`, decodes ahead of
//! the output and pushes frames into the `PlayoutRingBuffer`. It never blocks on
//! the ring: when the buffer is at its limit it sleeps briefly and re-checks
//! its command channel, so a new seek is picked up within one backoff period.
//!
//! Every repositioning command (load, seek, reset) carries the epoch the engine
//! assigned it. The feeder flushes the ring and sets the playback clock in one
//! step, refills to the watermark, and reports `Ready` with that epoch. A newer
//! command arriving mid-refill simply replaces the old one.

use crate::audio::decoder::{Decoded, FrameSource};
use crate::audio::types::{SampleFrame, SamplePosition, Track};
use crate::error::Error;
use crate::playback::clock::PlaybackClock;
use crate::playback::ring_buffer::PlayoutRingBuffer;
use crate::playback::waveform::WaveformTap;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, info, trace, warn};

/// Instructions from the engine
pub enum FeederCommand {
    /// Start feeding a new track from position 0
    Load {
        source: Box<dyn FrameSource>,
        track: Track,
        epoch: u64,
        tap: Option<WaveformTap>,
    },
    /// Drop the current track
    Unload { epoch: u64 },
    /// Reposition to `target`
    Seek { target: SamplePosition, epoch: u64 },
    /// Rewind to 0 (stop)
    Reset { epoch: u64 },
    /// Keep the ring topped up (playing) or only refill to the watermark
    SetProducing(bool),
    /// Replace the waveform tap (zoom change on a single-cursor source)
    SetTap(Option<WaveformTap>),
    Shutdown,
}

impl std::fmt::Debug for FeederCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FeederCommand::Load { track, epoch, .. } => f
                .debug_struct("Load")
                .field("track", &track.id)
                .field("epoch", epoch)
                .finish(),
            FeederCommand::Unload { epoch } => f.debug_struct("Unload").field("epoch", epoch).finish(),
            FeederCommand::Seek { target, epoch } => f
                .debug_struct("Seek")
                .field("target", target)
                .field("epoch", epoch)
                .finish(),
            FeederCommand::Reset { epoch } => f.debug_struct("Reset").field("epoch", epoch).finish(),
            FeederCommand::SetProducing(on) => f.debug_tuple("SetProducing").field(on).finish(),
            FeederCommand::SetTap(tap) => f.debug_tuple("SetTap").field(&tap.is_some()).finish(),
            FeederCommand::Shutdown => write!(f, "Shutdown"),
        }
    }
}

/// What the feeder tells the engine
#[derive(Debug)]
pub enum FeederReport {
    /// Ring flushed, clock set to `position`, refilled to the watermark (or end of stream)
    Ready { epoch: u64, position: SamplePosition },
    /// Seek could not be performed; ring and clock are untouched
    SeekFailed { epoch: u64, target: SamplePosition, error: Error },
    /// Source exhausted at `end`
    EndOfStream { epoch: u64, end: SamplePosition },
    /// Source no longer decodable
    Fatal { epoch: u64, error: Error },
    /// I/O kept failing after all retries; feeder idles until the next command
    IoExhausted { epoch: u64, error: Error },
}

/// Feeder tuning (derived from `EngineConfig`)
#[derive(Debug, Clone)]
pub struct FeederConfig {
    pub buffer_ms: u64,
    pub watermark_ms: u64,
    pub io_retry_attempts: u32,
    pub io_retry_backoff: Duration,
    pub backoff: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stall {
    None,
    EndOfStream,
    Failed,
}

/// Handle held by the engine
pub struct FeederHandle {
    commands: UnboundedSender<FeederCommand>,
    thread: Option<JoinHandle<()>>,
}

impl FeederHandle {
    /// Queue a command; `false` if the feeder thread is gone
    pub fn send(&self, command: FeederCommand) -> bool {
        trace!(?command, "Feeder command");
        self.commands.send(command).is_ok()
    }

    /// Stop the thread and wait for it
    pub fn shutdown(&mut self) {
        let _ = self.commands.send(FeederCommand::Shutdown);
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                error!("Feeder thread panicked");
            }
        }
    }
}

impl Drop for FeederHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Spawn the feeder thread
///
/// Returns the command handle and the report receiver.
pub fn spawn(
    ring: Arc<PlayoutRingBuffer>,
    clock: Arc<PlaybackClock>,
    config: FeederConfig,
) -> std::io::Result<(FeederHandle, UnboundedReceiver<FeederReport>)> {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (report_tx, report_rx) = mpsc::unbounded_channel();

    let feeder = Feeder {
        ring,
        clock,
        config,
        commands: cmd_rx,
        reports: report_tx,
        source: None,
        track: None,
        tap: None,
        epoch: 0,
        producing: false,
        refill_pending: false,
        stall: Stall::None,
        leftover: Vec::new(),
        leftover_offset: 0,
    };

    let thread = std::thread::Builder::new()
        .name("flow-feeder".to_string())
        .spawn(move || feeder.run())?;

    info!("Decode feeder started");
    Ok((
        FeederHandle { commands: cmd_tx, thread: Some(thread) },
        report_rx,
    ))
}

struct Feeder {
    ring: Arc<PlayoutRingBuffer>,
    clock: Arc<PlaybackClock>,
    config: FeederConfig,
    commands: UnboundedReceiver<FeederCommand>,
    reports: UnboundedSender<FeederReport>,

    source: Option<Box<dyn FrameSource>>,
    track: Option<Track>,
    tap: Option<WaveformTap>,
    epoch: u64,

    producing: bool,
    /// A `Ready` report is owed once the watermark is reached
    refill_pending: bool,
    stall: Stall,

    /// Decoded frames that did not fit in the ring yet
    leftover: Vec<SampleFrame>,
    leftover_offset: usize,
}

impl Feeder {
    fn run(mut self) {
        loop {
            let command = if self.has_work() {
                match self.commands.try_recv() {
                    Ok(command) => Some(command),
                    Err(TryRecvError::Empty) => None,
                    Err(TryRecvError::Disconnected) => break,
                }
            } else {
                match self.commands.blocking_recv() {
                    Some(command) => Some(command),
                    None => break,
                }
            };

            match command {
                Some(FeederCommand::Shutdown) => break,
                Some(command) => self.handle(command),
                None => self.step(),
            }
        }
        debug!("Decode feeder stopped");
    }

    fn has_work(&self) -> bool {
        self.source.is_some()
            && (self.refill_pending || (self.producing && self.stall == Stall::None))
    }

    fn report(&self, report: FeederReport) {
        trace!(?report, "Feeder report");
        let _ = self.reports.send(report);
    }

    fn watermark_frames(&self) -> usize {
        let rate = self.track.as_ref().map(|t| t.sample_rate).unwrap_or(0);
        (flow_common::time::ms_to_frames(self.config.watermark_ms, rate) as usize).min(self.ring.limit())
    }

    fn drop_leftover(&mut self) {
        self.leftover.clear();
        self.leftover_offset = 0;
    }

    /// Flush the ring and set the clock in one step, then owe a `Ready`
    fn reposition(&mut self, position: SamplePosition) {
        self.drop_leftover();
        let clock = &self.clock;
        self.ring.flush_and(|| clock.set(position));
        self.stall = Stall::None;
        self.refill_pending = true;
    }

    fn handle(&mut self, command: FeederCommand) {
        match command {
            FeederCommand::Load { source, track, epoch, tap } => {
                debug!(track_id = %track.id, epoch, "Feeder loading track");
                self.ring.set_limit_for_rate(self.config.buffer_ms, track.sample_rate);
                self.source = Some(source);
                self.track = Some(track);
                self.tap = tap;
                self.epoch = epoch;
                self.producing = false;
                self.reposition(0);
            }
            FeederCommand::Unload { epoch } => {
                self.source = None;
                self.track = None;
                self.tap = None;
                self.epoch = epoch;
                self.producing = false;
                self.reposition(0);
                self.refill_pending = false;
            }
            FeederCommand::Seek { target, epoch } => {
                self.epoch = epoch;
                let Some(source) = self.source.as_mut() else {
                    self.report(FeederReport::SeekFailed { epoch, target, error: Error::NoTrackLoaded });
                    return;
                };
                match source.seek(target) {
                    Ok(()) => {
                        debug!(target, epoch, "Feeder seek");
                        self.reposition(target);
                    }
                    Err(error) => {
                        warn!(target, epoch, "Feeder seek failed: {}", error);
                        self.refill_pending = false;
                        self.report(FeederReport::SeekFailed { epoch, target, error });
                    }
                }
            }
            FeederCommand::Reset { epoch } => {
                self.epoch = epoch;
                let Some(source) = self.source.as_mut() else {
                    return;
                };
                match source.seek(0) {
                    Ok(()) => self.reposition(0),
                    Err(error) => {
                        error!(epoch, "Rewind failed: {}", error);
                        self.stall = Stall::Failed;
                        self.refill_pending = false;
                        self.report(FeederReport::Fatal { epoch, error });
                    }
                }
            }
            FeederCommand::SetProducing(on) => {
                self.producing = on;
                if on && self.stall == Stall::Failed {
                    // Retry after I/O exhaustion
                    self.stall = Stall::None;
                }
            }
            FeederCommand::SetTap(tap) => self.tap = tap,
            FeederCommand::Shutdown => {}
        }
    }

    /// One unit of production work
    fn step(&mut self) {
        // Finish pushing a chunk that did not fit
        if self.leftover_offset < self.leftover.len() {
            let pushed = self.ring.push_slice(&self.leftover[self.leftover_offset..]);
            self.leftover_offset += pushed;
            if self.leftover_offset < self.leftover.len() {
                self.check_refill();
                std::thread::sleep(self.config.backoff);
                return;
            }
            self.drop_leftover();
        }

        if self.check_refill() && !self.producing {
            return;
        }

        if self.stall != Stall::None {
            return;
        }

        if self.ring.free() == 0 {
            std::thread::sleep(self.config.backoff);
            return;
        }

        match self.decode_with_retry() {
            Ok(Decoded::Frames(chunk)) => {
                if let Some(track) = &self.track {
                    track.length.observe_decoded(chunk.end());
                }
                if let Some(tap) = self.tap.as_mut() {
                    tap.feed(&chunk);
                }
                let pushed = self.ring.push_slice(&chunk.frames);
                if pushed < chunk.frames.len() {
                    self.leftover = chunk.frames;
                    self.leftover_offset = pushed;
                }
            }
            Ok(Decoded::EndOfStream) => {
                let end = self.source.as_ref().map(|s| s.position()).unwrap_or(0);
                if let Some(track) = &self.track {
                    track.length.observe_end(end);
                }
                if let Some(tap) = self.tap.as_mut() {
                    tap.end_of_stream(end);
                }
                self.ring.mark_decode_complete();
                self.stall = Stall::EndOfStream;
                debug!(end, epoch = self.epoch, "Feeder reached end of stream");
                self.report(FeederReport::EndOfStream { epoch: self.epoch, end });
                self.flush_refill();
            }
            Err(error) if error.is_transient() => {
                warn!(epoch = self.epoch, "I/O retries exhausted: {}", error);
                self.stall = Stall::Failed;
                self.report(FeederReport::IoExhausted { epoch: self.epoch, error });
                self.flush_refill();
            }
            Err(error) => {
                error!(epoch = self.epoch, "Decode failed: {}", error);
                self.stall = Stall::Failed;
                self.refill_pending = false;
                self.report(FeederReport::Fatal { epoch: self.epoch, error });
            }
        }
    }

    /// Report `Ready` once the watermark is reached; returns true if no refill is owed
    fn check_refill(&mut self) -> bool {
        if !self.refill_pending {
            return true;
        }
        if self.ring.occupied() >= self.watermark_frames() {
            self.flush_refill();
            return true;
        }
        false
    }

    /// Send the owed `Ready` now (watermark reached or nothing more to come)
    fn flush_refill(&mut self) {
        if self.refill_pending {
            self.refill_pending = false;
            self.report(FeederReport::Ready {
                epoch: self.epoch,
                position: self.clock.position(),
            });
        }
    }

    fn decode_with_retry(&mut self) -> crate::error::Result<Decoded> {
        let Some(source) = self.source.as_mut() else {
            return Ok(Decoded::EndOfStream);
        };
        let mut attempt = 0;
        loop {
            match source.decode_next() {
                Err(error) if error.is_transient() && attempt < self.config.io_retry_attempts => {
                    attempt += 1;
                    debug!(attempt, "Transient read error, retrying: {}", error);
                    std::thread::sleep(self.config.io_retry_backoff);
                }
                other => return other,
            }
        }
    }
}
