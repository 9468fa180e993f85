//! Command interface to the engine
//!
//! Every request travels over one bounded channel into the command loop, which
//! handles them strictly in arrival order. Replies come back on a oneshot.

use crate::audio::types::SamplePosition;
use crate::error::{Error, Result};
use crate::playback::cues::SetMode;
use crate::playback::waveform::{WaveformBucket, WaveformSummary};
use flow_common::events::{CuePoint, EventBus, FlowEvent, PlaybackState, TrackAnnotations};
use flow_common::TrackId;
use serde::Serialize;
use std::path::PathBuf;
use tokio::sync::{broadcast, mpsc, oneshot};

type Reply<T> = oneshot::Sender<Result<T>>;

/// Requests handled by the command loop
#[derive(Debug)]
pub enum Command {
    Load { path: PathBuf, reply: Reply<TrackInfo> },
    Play { reply: Reply<()> },
    Pause { reply: Reply<()> },
    TogglePlay { reply: Reply<()> },
    Stop { reply: Reply<()> },
    SeekTo { position: SamplePosition, reply: Reply<()> },
    SetCue {
        slot: u8,
        /// Current clock position when absent
        position: Option<SamplePosition>,
        mode: SetMode,
        label: Option<String>,
        reply: Reply<Option<CuePoint>>,
    },
    JumpCue { slot: u8, reply: Reply<()> },
    DeleteCue { slot: u8, reply: Reply<CuePoint> },
    SetCueLabel { slot: u8, label: Option<String>, reply: Reply<()> },
    RestoreCues { cues: Vec<CuePoint>, reply: Reply<usize> },
    CueHold { slot: Option<u8>, reply: Reply<()> },
    CueRelease { reply: Reply<()> },
    SetWaveformZoom { bucket_width: u32, reply: Reply<()> },
    Annotate { track_id: TrackId, annotations: TrackAnnotations, reply: Reply<()> },
    Status { reply: Reply<EngineStatus> },
    Cues { reply: Reply<Vec<CuePoint>> },
    Waveform { reply: Reply<WaveformSummary> },
    WaveformWindow { center: SamplePosition, buckets: usize, reply: Reply<Vec<WaveformBucket>> },
    Annotations { track_id: TrackId, reply: Reply<Option<TrackAnnotations>> },
    Shutdown { reply: Reply<()> },
}

/// Loaded track as reported to callers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackInfo {
    pub track_id: TrackId,
    pub path: PathBuf,
    pub sample_rate: u32,
    pub channels: u16,
    pub total_frames: Option<u64>,
}

/// Snapshot of the engine
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub state: PlaybackState,
    pub position: SamplePosition,
    pub track: Option<TrackInfo>,
    pub cues: Vec<CuePoint>,
    pub buffered_frames: usize,
    pub underruns: u64,
}

/// Cloneable front door to a running engine
#[derive(Debug, Clone)]
pub struct EngineHandle {
    commands: mpsc::Sender<Command>,
    events: EventBus,
}

impl EngineHandle {
    pub(crate) fn new(commands: mpsc::Sender<Command>, events: EventBus) -> Self {
        Self { commands, events }
    }

    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| Error::EngineStopped)?;
        rx.await.map_err(|_| Error::EngineStopped)?
    }

    /// Receive notifications from now on
    pub fn subscribe(&self) -> broadcast::Receiver<FlowEvent> {
        self.events.subscribe()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub async fn load(&self, path: impl Into<PathBuf>) -> Result<TrackInfo> {
        let path = path.into();
        self.request(|reply| Command::Load { path, reply }).await
    }

    pub async fn play(&self) -> Result<()> {
        self.request(|reply| Command::Play { reply }).await
    }

    pub async fn pause(&self) -> Result<()> {
        self.request(|reply| Command::Pause { reply }).await
    }

    pub async fn toggle_play(&self) -> Result<()> {
        self.request(|reply| Command::TogglePlay { reply }).await
    }

    pub async fn stop(&self) -> Result<()> {
        self.request(|reply| Command::Stop { reply }).await
    }

    /// Start a seek; completion is announced by `StateChanged` out of `seeking`
    pub async fn seek_to(&self, position: SamplePosition) -> Result<()> {
        self.request(|reply| Command::SeekTo { position, reply }).await
    }

    pub async fn set_cue(
        &self,
        slot: u8,
        position: Option<SamplePosition>,
        mode: SetMode,
        label: Option<String>,
    ) -> Result<Option<CuePoint>> {
        self.request(|reply| Command::SetCue { slot, position, mode, label, reply })
            .await
    }

    pub async fn jump_cue(&self, slot: u8) -> Result<()> {
        self.request(|reply| Command::JumpCue { slot, reply }).await
    }

    pub async fn delete_cue(&self, slot: u8) -> Result<CuePoint> {
        self.request(|reply| Command::DeleteCue { slot, reply }).await
    }

    pub async fn set_cue_label(&self, slot: u8, label: Option<String>) -> Result<()> {
        self.request(|reply| Command::SetCueLabel { slot, label, reply }).await
    }

    /// Apply a stored cue sheet to the current track; returns cues applied
    pub async fn restore_cues(&self, cues: Vec<CuePoint>) -> Result<usize> {
        self.request(|reply| Command::RestoreCues { cues, reply }).await
    }

    /// Preview from a cue (or from here) while held
    pub async fn cue_hold(&self, slot: Option<u8>) -> Result<()> {
        self.request(|reply| Command::CueHold { slot, reply }).await
    }

    pub async fn cue_release(&self) -> Result<()> {
        self.request(|reply| Command::CueRelease { reply }).await
    }

    pub async fn set_waveform_zoom(&self, bucket_width: u32) -> Result<()> {
        self.request(|reply| Command::SetWaveformZoom { bucket_width, reply })
            .await
    }

    pub async fn annotate(&self, track_id: TrackId, annotations: TrackAnnotations) -> Result<()> {
        self.request(|reply| Command::Annotate { track_id, annotations, reply })
            .await
    }

    pub async fn status(&self) -> Result<EngineStatus> {
        self.request(|reply| Command::Status { reply }).await
    }

    pub async fn cues(&self) -> Result<Vec<CuePoint>> {
        self.request(|reply| Command::Cues { reply }).await
    }

    /// Current (possibly partial) waveform
    pub async fn waveform(&self) -> Result<WaveformSummary> {
        self.request(|reply| Command::Waveform { reply }).await
    }

    /// `buckets` waveform buckets centered on `center`
    pub async fn waveform_window(&self, center: SamplePosition, buckets: usize) -> Result<Vec<WaveformBucket>> {
        self.request(|reply| Command::WaveformWindow { center, buckets, reply })
            .await
    }

    pub async fn annotations(&self, track_id: TrackId) -> Result<Option<TrackAnnotations>> {
        self.request(|reply| Command::Annotations { track_id, reply }).await
    }

    /// Stop the command loop and its threads
    pub async fn shutdown(&self) -> Result<()> {
        self.request(|reply| Command::Shutdown { reply }).await
    }
}
