//! Playback engine command loop
//!
//! **Architecture:**
//! ```text
//! EngineHandle ──Command──► command loop (tokio task) ──FeederCommand──► feeder thread
//!                                 ▲   │                                      │
//!                      FeederReport   │ gate / flush                         ▼ push
//!                                 └───┴─────────────► PlayoutRingBuffer ──► PlayoutSink ──► output
//!                                                             clock ◄────────────┘
//! ```
//!
//! The loop is the only writer of transport state and cues. It decides when the
//! ring's output gate opens: only while Playing and only once the feeder has
//! acknowledged the latest epoch, so audio from an abandoned seek or a previous
//! track is never played.

use crate::audio::decoder::SourceProvider;
use crate::audio::types::{SamplePosition, Track, TrackRef};
use crate::config::TomlConfig;
use crate::error::{Error, Result};
use crate::playback::clock::PlaybackClock;
use crate::playback::commands::{Command, EngineHandle, EngineStatus, TrackInfo};
use crate::playback::cues::CueManager;
use crate::playback::feeder::{self, FeederCommand, FeederConfig, FeederHandle, FeederReport};
use crate::playback::metadata::AnnotationStore;
use crate::playback::ring_buffer::PlayoutRingBuffer;
use crate::playback::sink::PlayoutSink;
use crate::playback::transport::{StateChange, Transport};
use crate::playback::waveform::{Rebuild, WaveformService};
use flow_common::events::{ErrorKind, EventBus, FlowEvent, PlaybackState};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

const COMMAND_QUEUE: usize = 64;

/// What `PlaybackEngine::start` hands back
pub struct EngineParts {
    pub handle: EngineHandle,
    /// Consumer side for an output driver
    pub sink: PlayoutSink,
    /// Command loop task; finishes after `shutdown`
    pub task: JoinHandle<()>,
}

/// Where a cue preview returns to when released
#[derive(Debug, Clone, Copy)]
struct HeldCue {
    position: SamplePosition,
}

pub struct PlaybackEngine {
    provider: Arc<dyn SourceProvider>,
    events: EventBus,
    ring: Arc<PlayoutRingBuffer>,
    clock: Arc<PlaybackClock>,
    feeder: FeederHandle,

    transport: Transport,
    cues: CueManager,
    waveform: WaveformService,
    annotations: AnnotationStore,

    track: Option<Track>,
    /// Track total as of the last cue check
    known_total: Option<u64>,
    /// Latest epoch the feeder has reported ready for
    ready_epoch: u64,
    /// Track played to its end; next play starts from 0
    needs_rewind: bool,
    held: Option<HeldCue>,
    last_position: Option<SamplePosition>,
    position_interval: Duration,
}

impl PlaybackEngine {
    /// Build the engine and spawn its command loop on the current runtime
    pub fn start(config: &TomlConfig, provider: Arc<dyn SourceProvider>) -> Result<EngineParts> {
        config.validate()?;
        let engine_cfg = &config.engine;

        let events = EventBus::new(engine_cfg.event_capacity);
        let ring = Arc::new(PlayoutRingBuffer::for_duration(
            engine_cfg.buffer_ms,
            engine_cfg.max_sample_rate,
        ));
        let clock = Arc::new(PlaybackClock::new());

        let (feeder, reports) = feeder::spawn(
            Arc::clone(&ring),
            Arc::clone(&clock),
            FeederConfig {
                buffer_ms: engine_cfg.buffer_ms,
                watermark_ms: engine_cfg.watermark_ms,
                io_retry_attempts: engine_cfg.io_retry_attempts,
                io_retry_backoff: engine_cfg.io_retry_backoff(),
                backoff: engine_cfg.feeder_backoff(),
            },
        )
        .map_err(|e| Error::Internal(format!("Failed to spawn decode feeder: {}", e)))?;

        let waveform = WaveformService::new(
            Arc::clone(&provider),
            config.waveform.bucket_width,
            config.waveform.aggregation,
            config.waveform.batch_buckets,
            config.waveform.cache_tracks,
            events.clone(),
        );

        let engine = PlaybackEngine {
            provider,
            events: events.clone(),
            ring: Arc::clone(&ring),
            clock: Arc::clone(&clock),
            feeder,
            transport: Transport::new(),
            cues: CueManager::new(engine_cfg.cue_slots),
            waveform,
            annotations: AnnotationStore::new(),
            track: None,
            known_total: None,
            ready_epoch: 0,
            needs_rewind: false,
            held: None,
            last_position: None,
            position_interval: engine_cfg.position_interval(),
        };

        let (tx, rx) = mpsc::channel(COMMAND_QUEUE);
        let task = tokio::spawn(engine.run(rx, reports));

        info!(
            capacity = ring.capacity(),
            buffer_ms = engine_cfg.buffer_ms,
            cue_slots = engine_cfg.cue_slots,
            "Playback engine started"
        );

        Ok(EngineParts {
            handle: EngineHandle::new(tx, events),
            sink: PlayoutSink::new(ring, clock),
            task,
        })
    }

    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut reports: mpsc::UnboundedReceiver<FeederReport>,
    ) {
        let mut tick = interval(self.position_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown { reply }) => {
                        self.shutdown();
                        let _ = reply.send(Ok(()));
                        break;
                    }
                    Some(command) => self.handle_command(command).await,
                    None => {
                        debug!("All engine handles dropped");
                        self.shutdown();
                        break;
                    }
                },
                Some(report) = reports.recv() => self.handle_report(report),
                _ = tick.tick() => self.on_tick(),
            }
        }
        info!("Playback engine stopped");
    }

    fn shutdown(&mut self) {
        self.ring.close_gate();
        self.waveform.cancel();
        self.feeder.shutdown();
    }

    // ------------------------------------------------------------------
    // Notifications
    // ------------------------------------------------------------------

    fn announce(&self, change: Option<StateChange>) {
        if let Some(StateChange { old, new }) = change {
            info!("Playback state: {} -> {}", old, new);
            self.events.emit_lossy(FlowEvent::StateChanged {
                old_state: old,
                new_state: new,
                timestamp: flow_common::time::now(),
            });
        }
    }

    fn emit_position(&mut self) {
        let Some(track) = &self.track else {
            return;
        };
        let position = self.clock.position();
        if self.last_position == Some(position) {
            return;
        }
        self.last_position = Some(position);
        self.events.emit_lossy(FlowEvent::PositionChanged {
            track_id: track.id,
            position,
            sample_rate: track.sample_rate,
            timestamp: flow_common::time::now(),
        });
    }

    fn emit_error(&self, error: &Error) {
        self.events.emit_lossy(FlowEvent::Error {
            kind: error.kind(),
            message: error.to_string(),
            timestamp: flow_common::time::now(),
        });
    }

    fn emit_cues(&self) {
        if let Some(sheet) = self.cues.sheet() {
            self.events.emit_lossy(FlowEvent::CuesChanged {
                track_id: sheet.track_id,
                cues: sheet.cues,
                timestamp: flow_common::time::now(),
            });
        }
    }

    /// Open the gate only while playing with the latest epoch acknowledged
    fn sync_gate(&self) {
        if self.transport.state() == PlaybackState::Playing
            && self.ready_epoch == self.transport.epoch()
        {
            self.ring.open_gate();
        } else {
            self.ring.close_gate();
        }
    }

    fn send_feeder(&self, command: FeederCommand) {
        if !self.feeder.send(command) {
            error!("Decode feeder is gone");
        }
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    async fn handle_command(&mut self, command: Command) {
        trace!(?command, "Engine command");
        match command {
            Command::Load { path, reply } => {
                let result = self.load(TrackRef::new(path)).await;
                let _ = reply.send(result);
            }
            Command::Play { reply } => {
                let _ = reply.send(self.play());
            }
            Command::Pause { reply } => {
                let _ = reply.send(self.pause());
            }
            Command::TogglePlay { reply } => {
                let _ = reply.send(self.toggle_play());
            }
            Command::Stop { reply } => {
                self.stop();
                let _ = reply.send(Ok(()));
            }
            Command::SeekTo { position, reply } => {
                let _ = reply.send(self.seek_to(position));
            }
            Command::SetCue { slot, position, mode, label, reply } => {
                let position = position.unwrap_or_else(|| self.clock.position());
                let result = self.cues.set_cue(slot, position, label, mode);
                if result.is_ok() {
                    self.emit_cues();
                }
                let _ = reply.send(result);
            }
            Command::JumpCue { slot, reply } => {
                let result = self
                    .cues
                    .jump_cue(slot)
                    .and_then(|seek| self.seek_to(seek.target));
                let _ = reply.send(result);
            }
            Command::DeleteCue { slot, reply } => {
                let result = self.cues.delete_cue(slot);
                if result.is_ok() {
                    self.emit_cues();
                }
                let _ = reply.send(result);
            }
            Command::SetCueLabel { slot, label, reply } => {
                let result = self.cues.set_label(slot, label);
                if result.is_ok() {
                    self.emit_cues();
                }
                let _ = reply.send(result);
            }
            Command::RestoreCues { cues, reply } => {
                let result = self.cues.restore(&cues);
                if matches!(result, Ok(n) if n > 0) {
                    self.emit_cues();
                }
                let _ = reply.send(result);
            }
            Command::CueHold { slot, reply } => {
                let _ = reply.send(self.cue_hold(slot));
            }
            Command::CueRelease { reply } => {
                let _ = reply.send(self.cue_release());
            }
            Command::SetWaveformZoom { bucket_width, reply } => {
                let _ = reply.send(self.set_waveform_zoom(bucket_width));
            }
            Command::Annotate { track_id, annotations, reply } => {
                self.annotations.insert(track_id, annotations);
                self.events.emit_lossy(FlowEvent::AnnotationsUpdated {
                    track_id,
                    timestamp: flow_common::time::now(),
                });
                let _ = reply.send(Ok(()));
            }
            Command::Status { reply } => {
                let _ = reply.send(Ok(self.status()));
            }
            Command::Cues { reply } => {
                let _ = reply.send(Ok(self.cues.list_cues()));
            }
            Command::Waveform { reply } => {
                let _ = reply.send(Ok(self.waveform.snapshot()));
            }
            Command::WaveformWindow { center, buckets, reply } => {
                let _ = reply.send(Ok(self.waveform.window(center, buckets)));
            }
            Command::Annotations { track_id, reply } => {
                let _ = reply.send(Ok(self.annotations.get(track_id).cloned()));
            }
            Command::Shutdown { reply } => {
                // Handled by the loop
                let _ = reply.send(Ok(()));
            }
        }
    }

    fn status(&self) -> EngineStatus {
        EngineStatus {
            state: self.transport.state(),
            position: self.clock.position(),
            track: self.track.as_ref().map(track_info),
            cues: self.cues.list_cues(),
            buffered_frames: self.ring.occupied(),
            underruns: self.ring.statistics().underruns,
        }
    }

    async fn load(&mut self, track_ref: TrackRef) -> Result<TrackInfo> {
        info!("Loading {}", track_ref.path().display());

        let provider = Arc::clone(&self.provider);
        let opening = track_ref.clone();
        let opened = tokio::task::spawn_blocking(move || provider.open(&opening))
            .await
            .map_err(|e| Error::Internal(format!("Open task failed: {}", e)))
            .and_then(|r| r);

        let source = match opened {
            Ok(source) => source,
            Err(e) => {
                warn!("Failed to load {}: {}", track_ref.path().display(), e);
                self.unload();
                self.emit_error(&e);
                return Err(e);
            }
        };

        let spec = source.spec();
        let track = Track::new(track_ref, spec.sample_rate, spec.channels, spec.total_frames);

        let (epoch, change) = self.transport.load();
        self.reset_position();
        self.track = Some(track.clone());
        self.known_total = track.total_frames();
        self.held = None;
        self.needs_rewind = false;
        self.cues.attach(track.id, Arc::clone(&track.length));

        let tap = match self.waveform.rebuild(&track) {
            Ok(Rebuild::Tap(tap)) => Some(tap),
            Ok(_) => None,
            Err(e) => {
                warn!(track_id = %track.id, "Waveform unavailable: {}", e);
                self.events.emit_lossy(FlowEvent::Warning {
                    kind: e.kind(),
                    message: format!("Waveform unavailable: {}", e),
                    timestamp: flow_common::time::now(),
                });
                None
            }
        };

        self.send_feeder(FeederCommand::Load {
            source,
            track: track.clone(),
            epoch,
            tap,
        });

        let info = track_info(&track);
        info!(
            track_id = %info.track_id,
            sample_rate = info.sample_rate,
            channels = info.channels,
            total_frames = ?info.total_frames,
            "Track loaded"
        );
        self.announce(change);
        self.events.emit_lossy(FlowEvent::TrackLoaded {
            track_id: info.track_id,
            path: info.path.clone(),
            sample_rate: info.sample_rate,
            channels: info.channels,
            total_frames: info.total_frames,
            timestamp: flow_common::time::now(),
        });
        self.emit_cues();
        self.emit_position();
        Ok(info)
    }

    /// Drop the current track after a failed load
    fn unload(&mut self) {
        let (epoch, change) = self.transport.unload();
        self.reset_position();
        self.track = None;
        self.known_total = None;
        self.held = None;
        self.needs_rewind = false;
        self.cues.detach();
        self.waveform.cancel();
        self.send_feeder(FeederCommand::Unload { epoch });
        self.announce(change);
    }

    /// Close the gate, drop buffered audio and put the clock at 0
    ///
    /// The feeder flushes again when it handles the matching command, which
    /// discards anything it pushed in between.
    fn reset_position(&mut self) {
        self.ring.close_gate();
        let clock = &self.clock;
        self.ring.flush_and(|| clock.set(0));
        self.last_position = None;
    }

    fn play(&mut self) -> Result<()> {
        if self.needs_rewind && self.transport.state() == PlaybackState::Stopped {
            // Played to the end last time: start over
            let (epoch, _) = self.transport.stop();
            self.reset_position();
            self.send_feeder(FeederCommand::Reset { epoch });
            self.needs_rewind = false;
        }
        let change = self.transport.play()?;
        self.send_feeder(FeederCommand::SetProducing(true));
        self.sync_gate();
        self.announce(change);
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        let change = self.transport.pause()?;
        self.send_feeder(FeederCommand::SetProducing(false));
        self.sync_gate();
        self.announce(change);
        self.emit_position();
        Ok(())
    }

    /// Play unless (about to be) playing, otherwise pause
    fn toggle_play(&mut self) -> Result<()> {
        if self.transport.effective_state() == PlaybackState::Playing {
            self.pause()
        } else {
            self.play()
        }
    }

    fn stop(&mut self) {
        let (epoch, change) = self.transport.stop();
        self.held = None;
        self.needs_rewind = false;
        self.reset_position();
        if self.track.is_some() {
            self.send_feeder(FeederCommand::SetProducing(false));
            self.send_feeder(FeederCommand::Reset { epoch });
        }
        self.announce(change);
        self.emit_position();
    }

    fn seek_to(&mut self, position: SamplePosition) -> Result<()> {
        let track = self.track.as_ref().ok_or(Error::NoTrackLoaded)?;
        if position > track.length.addressable_end() {
            return Err(Error::InvalidPosition {
                position,
                length: track.length.total(),
            });
        }

        let (epoch, change) = self.transport.begin_seek()?;
        self.ring.close_gate();
        self.needs_rewind = false;
        self.send_feeder(FeederCommand::SetProducing(
            self.transport.effective_state() == PlaybackState::Playing,
        ));
        self.send_feeder(FeederCommand::Seek { target: position, epoch });
        debug!(position, epoch, "Seek requested");
        self.announce(change);
        Ok(())
    }

    fn cue_hold(&mut self, slot: Option<u8>) -> Result<()> {
        if self.track.is_none() {
            return Err(Error::NoTrackLoaded);
        }
        let target = slot.map(|s| self.cues.jump_cue(s)).transpose()?;

        if self.held.is_none() {
            self.held = Some(HeldCue {
                position: self.clock.position(),
            });
        }
        if let Some(seek) = target {
            self.seek_to(seek.target)?;
        }
        self.play()
    }

    fn cue_release(&mut self) -> Result<()> {
        let Some(held) = self.held.take() else {
            return Ok(());
        };
        if self.transport.effective_state() == PlaybackState::Playing {
            self.pause()?;
        }
        self.seek_to(held.position)
    }

    fn set_waveform_zoom(&mut self, bucket_width: u32) -> Result<()> {
        self.waveform.set_bucket_width(bucket_width)?;
        let Some(track) = self.track.clone() else {
            return Ok(());
        };
        let tap = match self.waveform.rebuild(&track)? {
            Rebuild::Tap(tap) => Some(tap),
            _ => None,
        };
        self.send_feeder(FeederCommand::SetTap(tap));
        Ok(())
    }

    // ------------------------------------------------------------------
    // Feeder reports
    // ------------------------------------------------------------------

    fn is_current(&self, epoch: u64) -> bool {
        if epoch == self.transport.epoch() {
            true
        } else {
            trace!(epoch, current = self.transport.epoch(), "Stale feeder report");
            false
        }
    }

    fn handle_report(&mut self, report: FeederReport) {
        match report {
            FeederReport::Ready { epoch, position } => {
                if !self.is_current(epoch) {
                    return;
                }
                debug!(epoch, position, "Feeder ready");
                self.ready_epoch = epoch;
                let change = self.transport.finish_seek(epoch);
                self.sync_gate();
                self.announce(change);
                self.emit_position();
            }
            FeederReport::SeekFailed { epoch, target, error } => {
                if !self.is_current(epoch) {
                    return;
                }
                warn!(target, "Seek failed: {}", error);
                // Ring and clock still describe the position before the seek
                self.ready_epoch = epoch;
                let change = self.transport.finish_seek(epoch);
                self.sync_gate();
                self.announce(change);
                self.events.emit_lossy(FlowEvent::Error {
                    kind: ErrorKind::Seek,
                    message: format!("Seek to {} failed: {}", target, error),
                    timestamp: flow_common::time::now(),
                });
            }
            FeederReport::EndOfStream { epoch, end } => {
                if self.is_current(epoch) {
                    debug!(end, "Decode reached end of stream");
                }
                self.sync_track_length();
            }
            FeederReport::Fatal { epoch, error } => {
                if !self.is_current(epoch) {
                    return;
                }
                error!("Playback failed: {}", error);
                let (_, change) = self.transport.fault();
                self.held = None;
                self.needs_rewind = true;
                self.reset_position();
                self.send_feeder(FeederCommand::SetProducing(false));
                self.emit_error(&error);
                self.announce(change);
                self.emit_position();
            }
            FeederReport::IoExhausted { epoch, error } => {
                if !self.is_current(epoch) {
                    return;
                }
                self.events.emit_lossy(FlowEvent::Warning {
                    kind: ErrorKind::Io,
                    message: format!("Read failed after retries: {}", error),
                    timestamp: flow_common::time::now(),
                });
            }
        }
    }

    /// Drop cues the real track end has invalidated
    ///
    /// Either decoder may discover the end, so this runs on every tick as
    /// well as on the feeder's end-of-stream report.
    fn sync_track_length(&mut self) {
        let Some(total) = self.track.as_ref().map(|t| t.total_frames()) else {
            return;
        };
        if total == self.known_total {
            return;
        }
        self.known_total = total;
        if !self.cues.prune_beyond_end().is_empty() {
            self.emit_cues();
        }
    }

    fn on_tick(&mut self) {
        self.sync_track_length();
        if self.transport.state() != PlaybackState::Playing {
            return;
        }
        self.emit_position();

        if self.ready_epoch == self.transport.epoch() && self.ring.is_drained() {
            self.finish_track();
        }
    }

    fn finish_track(&mut self) {
        let change = self.transport.end_of_stream();
        if change.is_none() {
            return;
        }
        self.sync_gate();
        self.send_feeder(FeederCommand::SetProducing(false));
        self.needs_rewind = true;
        self.held = None;

        let position = self.clock.position();
        if let Some(track) = &self.track {
            info!(track_id = %track.id, position, "Track ended");
            self.events.emit_lossy(FlowEvent::TrackEnded {
                track_id: track.id,
                position,
                timestamp: flow_common::time::now(),
            });
        }
        self.announce(change);
    }
}

fn track_info(track: &Track) -> TrackInfo {
    TrackInfo {
        track_id: track.id,
        path: track.source.path().to_path_buf(),
        sample_rate: track.sample_rate,
        channels: track.channels,
        total_frames: track.total_frames(),
    }
}
