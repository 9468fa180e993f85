//! Transport state machine
//!
//! ```text
//!            play              pause
//! Stopped ─────────► Playing ─────────► Paused
//!    ▲                  │  ▲     play     │
//!    └──── stop / EOS ──┘  └──────────────┘
//!
//! any of the three ── seek ──► Seeking ── complete/fail ──► state it came from
//! ```
//!
//! Pure bookkeeping: no I/O, no locking. The engine command loop owns the only
//! instance and performs the side effects each transition calls for.
//!
//! Every stop, load and seek advances the epoch. Feeder reports carry the
//! epoch they were started under; reports for an older epoch are stale.

use crate::error::{Error, Result};
use flow_common::events::PlaybackState;

/// A state change to announce
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateChange {
    pub old: PlaybackState,
    pub new: PlaybackState,
}

#[derive(Debug)]
pub struct Transport {
    state: PlaybackState,
    /// State to return to when the pending seek finishes
    resume_to: PlaybackState,
    has_track: bool,
    epoch: u64,
}

impl Default for Transport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport {
    pub fn new() -> Self {
        Self {
            state: PlaybackState::Stopped,
            resume_to: PlaybackState::Stopped,
            has_track: false,
            epoch: 0,
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    /// State the transport is in, or will return to once a seek completes
    pub fn effective_state(&self) -> PlaybackState {
        if self.state == PlaybackState::Seeking {
            self.resume_to
        } else {
            self.state
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn has_track(&self) -> bool {
        self.has_track
    }

    fn go(&mut self, new: PlaybackState) -> Option<StateChange> {
        let old = self.state;
        self.state = new;
        (old != new).then_some(StateChange { old, new })
    }

    fn next_epoch(&mut self) -> u64 {
        self.epoch += 1;
        self.epoch
    }

    fn require_track(&self) -> Result<()> {
        if self.has_track {
            Ok(())
        } else {
            Err(Error::NoTrackLoaded)
        }
    }

    /// A new track replaced the current one (any state → Stopped)
    pub fn load(&mut self) -> (u64, Option<StateChange>) {
        self.has_track = true;
        let epoch = self.next_epoch();
        (epoch, self.go(PlaybackState::Stopped))
    }

    /// The track was dropped (failed load)
    pub fn unload(&mut self) -> (u64, Option<StateChange>) {
        self.has_track = false;
        let epoch = self.next_epoch();
        (epoch, self.go(PlaybackState::Stopped))
    }

    /// Stopped/Paused → Playing; no-op when Playing
    ///
    /// While seeking, playback resumes once the seek completes.
    pub fn play(&mut self) -> Result<Option<StateChange>> {
        self.require_track()?;
        match self.state {
            PlaybackState::Playing => Ok(None),
            PlaybackState::Seeking => {
                self.resume_to = PlaybackState::Playing;
                Ok(None)
            }
            PlaybackState::Stopped | PlaybackState::Paused => Ok(self.go(PlaybackState::Playing)),
        }
    }

    /// Playing → Paused
    ///
    /// While seeking, allowed when the seek would resume playing.
    pub fn pause(&mut self) -> Result<Option<StateChange>> {
        match self.state {
            PlaybackState::Playing => Ok(self.go(PlaybackState::Paused)),
            PlaybackState::Seeking if self.resume_to == PlaybackState::Playing => {
                self.resume_to = PlaybackState::Paused;
                Ok(None)
            }
            state => Err(Error::InvalidTransition { command: "pause", state }),
        }
    }

    /// Any state → Stopped; abandons a pending seek
    pub fn stop(&mut self) -> (u64, Option<StateChange>) {
        let epoch = self.next_epoch();
        (epoch, self.go(PlaybackState::Stopped))
    }

    /// Enter Seeking; a seek issued while seeking supersedes the pending one
    ///
    /// Returns the epoch the feeder must report back with.
    pub fn begin_seek(&mut self) -> Result<(u64, Option<StateChange>)> {
        self.require_track()?;
        if self.state != PlaybackState::Seeking {
            self.resume_to = self.state;
        }
        let epoch = self.next_epoch();
        Ok((epoch, self.go(PlaybackState::Seeking)))
    }

    /// Seek of `epoch` finished (successfully or not): return to the prior state
    ///
    /// Ignored unless it matches the latest epoch and a seek is pending.
    pub fn finish_seek(&mut self, epoch: u64) -> Option<StateChange> {
        if epoch != self.epoch || self.state != PlaybackState::Seeking {
            return None;
        }
        let resume = self.resume_to;
        self.go(resume)
    }

    /// Playback drained at end of stream
    pub fn end_of_stream(&mut self) -> Option<StateChange> {
        if self.state != PlaybackState::Playing {
            return None;
        }
        self.go(PlaybackState::Stopped)
    }

    /// Unrecoverable decode failure
    pub fn fault(&mut self) -> (u64, Option<StateChange>) {
        self.stop()
    }
}
