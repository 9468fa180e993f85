//! Waveform generation
//!
//! Produces a downsampled amplitude summary of a track for the UI. The summary
//! is built on a read cursor of its own, independent of playback, so it can run
//! ahead of (or behind) the playhead without disturbing it.
//!
//! ```text
//! SourceProvider::open ──► WaveformScan (iterator of buckets)
//!                                 │
//!                          SummaryWriter ──► Arc<RwLock<WaveformSummary>>
//!                                 │               ▲
//!                                 ▼               │ window(center, n)
//!                      WaveformBucketsReady      UI
//! ```
//!
//! Sources that cannot be opened twice are summarized from the frames the
//! playback feeder decodes instead (`WaveformTap`), contiguous from the start of
//! the track only.

use crate::audio::decoder::{Decoded, FrameSource, SourceProvider};
use crate::audio::types::{FrameChunk, SampleFrame, SamplePosition, Track};
use crate::error::{Error, Result};
use flow_common::events::{EventBus, FlowEvent};
use flow_common::TrackId;
use serde::Deserialize;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::JoinHandle;
use tracing::{debug, info, trace, warn};

/// How frames in a bucket are reduced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    /// Minimum and maximum sample over both channels
    #[default]
    MinMax,
    /// Root mean square over both channels, stored as `(-rms, rms)`
    Rms,
}

/// One summarized span of `frames` frames starting at `start`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WaveformBucket {
    pub start: SamplePosition,
    pub frames: u32,
    pub min: f32,
    pub max: f32,
}

impl WaveformBucket {
    /// Flat bucket used for gaps and window padding
    pub fn silent(start: SamplePosition, frames: u32) -> Self {
        Self { start, frames, min: 0.0, max: 0.0 }
    }

    /// Peak absolute amplitude
    pub fn peak(&self) -> f32 {
        self.min.abs().max(self.max.abs())
    }
}

/// Reduces a contiguous frame stream into buckets of `bucket_width` frames
///
/// Bucket `i` always covers `[i * width, (i + 1) * width)`. Frames arriving
/// after a gap are placed by position and the gap is filled with silent
/// buckets, so bucket index and track position stay in step.
#[derive(Debug, Clone)]
pub struct BucketAccumulator {
    bucket_width: u32,
    aggregation: Aggregation,
    /// Start of the bucket being accumulated
    bucket_start: SamplePosition,
    /// Next position expected
    next: SamplePosition,
    count: u32,
    min: f32,
    max: f32,
    sum_sq: f64,
}

impl BucketAccumulator {
    pub fn new(bucket_width: u32, aggregation: Aggregation) -> Self {
        Self {
            bucket_width: bucket_width.max(1),
            aggregation,
            bucket_start: 0,
            next: 0,
            count: 0,
            min: f32::MAX,
            max: f32::MIN,
            sum_sq: 0.0,
        }
    }

    pub fn bucket_width(&self) -> u32 {
        self.bucket_width
    }

    /// Position of the next frame this accumulator expects
    pub fn next_position(&self) -> SamplePosition {
        self.next
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.bucket_width, self.aggregation);
    }

    fn emit(&mut self, out: &mut Vec<WaveformBucket>) {
        let bucket = if self.count == 0 {
            WaveformBucket::silent(self.bucket_start, self.bucket_width)
        } else {
            match self.aggregation {
                Aggregation::MinMax => WaveformBucket {
                    start: self.bucket_start,
                    frames: self.count,
                    min: self.min,
                    max: self.max,
                },
                Aggregation::Rms => {
                    let rms = (self.sum_sq / (2.0 * self.count as f64)).sqrt() as f32;
                    WaveformBucket { start: self.bucket_start, frames: self.count, min: -rms, max: rms }
                }
            }
        };
        out.push(bucket);
        self.bucket_start += self.bucket_width as u64;
        self.count = 0;
        self.min = f32::MAX;
        self.max = f32::MIN;
        self.sum_sq = 0.0;
    }

    /// Add a chunk; completed buckets are appended to `out`
    pub fn push_chunk(&mut self, chunk: &FrameChunk, out: &mut Vec<WaveformBucket>) {
        let width = self.bucket_width as u64;
        if chunk.start < self.next {
            // Overlap with what we already have: drop the repeated prefix
            let skip = (self.next - chunk.start) as usize;
            if skip >= chunk.frames.len() {
                return;
            }
            self.push_frames(self.next, &chunk.frames[skip..], out);
            return;
        }
        if chunk.start > self.next {
            trace!(expected = self.next, got = chunk.start, "Waveform input gap");
            // Close buckets that end before the new chunk
            while self.bucket_start + width <= chunk.start {
                self.emit(out);
            }
        }
        self.push_frames(chunk.start, &chunk.frames, out);
    }

    fn push_frames(&mut self, start: SamplePosition, frames: &[SampleFrame], out: &mut Vec<WaveformBucket>) {
        let width = self.bucket_width as u64;
        let mut pos = start;
        for frame in frames {
            if pos >= self.bucket_start + width {
                self.emit(out);
            }
            self.min = self.min.min(frame.min_sample());
            self.max = self.max.max(frame.max_sample());
            self.sum_sq += (frame.left as f64).powi(2) + (frame.right as f64).powi(2);
            self.count += 1;
            pos += 1;
        }
        self.next = pos;
    }

    /// Emit the trailing partial bucket at end of stream
    pub fn finish(&mut self, out: &mut Vec<WaveformBucket>) {
        if self.count > 0 {
            self.emit(out);
        }
    }
}

/// Lazy, finite sequence of buckets over one track
///
/// Decodes on demand: consuming half the iterator decodes roughly half the
/// track. `restart` rewinds to the beginning.
pub struct WaveformScan {
    source: Box<dyn FrameSource>,
    acc: BucketAccumulator,
    pending: VecDeque<WaveformBucket>,
    end: Option<SamplePosition>,
    failed: bool,
}

impl WaveformScan {
    pub fn new(source: Box<dyn FrameSource>, bucket_width: u32, aggregation: Aggregation) -> Self {
        Self {
            source,
            acc: BucketAccumulator::new(bucket_width, aggregation),
            pending: VecDeque::new(),
            end: None,
            failed: false,
        }
    }

    pub fn bucket_width(&self) -> u32 {
        self.acc.bucket_width()
    }

    /// Frames decoded so far by this cursor
    pub fn decoded_until(&self) -> SamplePosition {
        self.acc.next_position()
    }

    /// End-of-stream position, once reached
    pub fn end(&self) -> Option<SamplePosition> {
        self.end
    }

    /// Rewind the cursor and start over
    pub fn restart(&mut self) -> Result<()> {
        self.source.seek(0)?;
        self.acc.reset();
        self.pending.clear();
        self.end = None;
        self.failed = false;
        Ok(())
    }

    fn fill(&mut self) -> Result<()> {
        let mut out = Vec::new();
        while out.is_empty() && self.end.is_none() {
            match self.source.decode_next()? {
                Decoded::Frames(chunk) => self.acc.push_chunk(&chunk, &mut out),
                Decoded::EndOfStream => {
                    self.acc.finish(&mut out);
                    self.end = Some(self.acc.next_position());
                }
            }
        }
        self.pending.extend(out);
        Ok(())
    }
}

impl Iterator for WaveformScan {
    type Item = Result<WaveformBucket>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        if self.pending.is_empty() && self.end.is_none() {
            if let Err(e) = self.fill() {
                self.failed = true;
                return Some(Err(e));
            }
        }
        self.pending.pop_front().map(Ok)
    }
}

/// Open an independent cursor on `track` and return its bucket stream
pub fn generate(
    provider: &dyn SourceProvider,
    track: &Track,
    bucket_width: u32,
    aggregation: Aggregation,
) -> Result<WaveformScan> {
    if bucket_width == 0 {
        return Err(Error::Config("bucket width must be > 0".to_string()));
    }
    let source = provider.open(&track.source)?;
    Ok(WaveformScan::new(source, bucket_width, aggregation))
}

/// Buckets for one track at one zoom level
#[derive(Debug, Clone, PartialEq)]
pub struct WaveformSummary {
    pub track_id: Option<TrackId>,
    pub bucket_width: u32,
    pub aggregation: Aggregation,
    pub buckets: Vec<WaveformBucket>,
    /// Scan reached end of stream
    pub complete: bool,
}

impl WaveformSummary {
    pub fn empty(track_id: Option<TrackId>, bucket_width: u32, aggregation: Aggregation) -> Self {
        Self {
            track_id,
            bucket_width,
            aggregation,
            buckets: Vec::new(),
            complete: false,
        }
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Index of the bucket containing `position`
    pub fn bucket_index(&self, position: SamplePosition) -> usize {
        (position / self.bucket_width.max(1) as u64) as usize
    }

    /// `count` buckets centered on `center`, zero-padded past either edge
    ///
    /// Missing buckets (before 0, past the end, or not yet scanned) are returned
    /// as silent buckets so the playhead always sits at `count / 2`.
    pub fn window(&self, center: SamplePosition, count: usize) -> Vec<WaveformBucket> {
        let width = self.bucket_width.max(1);
        let center_index = self.bucket_index(center) as i64;
        let first = center_index - (count / 2) as i64;

        (0..count as i64)
            .map(|i| {
                let index = first + i;
                if index < 0 {
                    return WaveformBucket::silent(0, 0);
                }
                self.buckets
                    .get(index as usize)
                    .copied()
                    .unwrap_or_else(|| WaveformBucket::silent(index as u64 * width as u64, 0))
            })
            .collect()
    }
}

type CacheKey = (TrackId, u32, Aggregation);

/// Completed summaries, oldest evicted first
#[derive(Debug)]
pub struct WaveformCache {
    capacity: usize,
    order: VecDeque<CacheKey>,
    entries: HashMap<CacheKey, WaveformSummary>,
}

impl WaveformCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::new(),
            entries: HashMap::new(),
        }
    }

    pub fn get(&self, track_id: TrackId, width: u32, aggregation: Aggregation) -> Option<&WaveformSummary> {
        self.entries.get(&(track_id, width, aggregation))
    }

    pub fn insert(&mut self, summary: WaveformSummary) {
        if self.capacity == 0 || !summary.complete {
            return;
        }
        let Some(track_id) = summary.track_id else {
            return;
        };
        let key = (track_id, summary.bucket_width, summary.aggregation);
        self.order.retain(|k| *k != key);
        self.order.push_back(key);
        self.entries.insert(key, summary);

        while self.order.len() > self.capacity {
            if let Some(old) = self.order.pop_front() {
                self.entries.remove(&old);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn write_summary(summary: &RwLock<WaveformSummary>) -> std::sync::RwLockWriteGuard<'_, WaveformSummary> {
    summary.write().unwrap_or_else(|p| p.into_inner())
}

fn read_summary(summary: &RwLock<WaveformSummary>) -> std::sync::RwLockReadGuard<'_, WaveformSummary> {
    summary.read().unwrap_or_else(|p| p.into_inner())
}

/// Appends buckets to the shared summary and announces them
///
/// Every writer belongs to one build generation; once the service starts a
/// newer build the writer's appends are refused and its owner stops.
pub struct SummaryWriter {
    summary: Arc<RwLock<WaveformSummary>>,
    generation: Arc<AtomicU64>,
    my_generation: u64,
    cache: Arc<Mutex<WaveformCache>>,
    events: EventBus,
    track_id: TrackId,
    bucket_width: u32,
    batch: usize,
    announced: usize,
}

impl SummaryWriter {
    /// Lock the summary if this writer still owns it
    ///
    /// The generation is compared under the write lock. `rebuild` bumps it
    /// before installing a new summary, so a superseded writer can never reach
    /// the replacement.
    fn lock_current(&self) -> Option<std::sync::RwLockWriteGuard<'_, WaveformSummary>> {
        let summary = write_summary(&self.summary);
        (self.generation.load(Ordering::Acquire) == self.my_generation).then_some(summary)
    }

    /// Append buckets; `false` once superseded
    pub fn append(&mut self, buckets: &[WaveformBucket]) -> bool {
        let len = {
            let Some(mut summary) = self.lock_current() else {
                return false;
            };
            summary.buckets.extend_from_slice(buckets);
            summary.len()
        };
        if len - self.announced >= self.batch {
            self.announce(len, false);
        }
        true
    }

    /// Mark the summary complete, cache it and send the final notification
    pub fn complete(&mut self) {
        let finished = {
            let Some(mut summary) = self.lock_current() else {
                return;
            };
            summary.complete = true;
            summary.clone()
        };
        let len = finished.len();
        self.cache.lock().unwrap_or_else(|p| p.into_inner()).insert(finished);
        self.announce(len, true);
        info!(track_id = %self.track_id, buckets = len, "Waveform complete");
    }

    fn announce(&mut self, len: usize, complete: bool) {
        self.events.emit_lossy(FlowEvent::WaveformBucketsReady {
            track_id: self.track_id,
            start: self.announced,
            end: len,
            bucket_width: self.bucket_width,
            complete,
            timestamp: flow_common::time::now(),
        });
        self.announced = len;
    }
}

/// Builds the waveform from frames the playback feeder decodes
///
/// Used for sources that cannot be opened a second time. Only frames that
/// continue the summary exactly where it stops are used.
pub struct WaveformTap {
    acc: BucketAccumulator,
    writer: SummaryWriter,
    length: Arc<crate::audio::types::TrackLength>,
    active: bool,
}

impl WaveformTap {
    pub fn feed(&mut self, chunk: &FrameChunk) {
        if !self.active || chunk.start != self.acc.next_position() {
            return;
        }
        let mut out = Vec::new();
        self.acc.push_chunk(chunk, &mut out);
        if !out.is_empty() && !self.writer.append(&out) {
            self.active = false;
        }
    }

    /// Feeder hit end of stream at `end`
    pub fn end_of_stream(&mut self, end: SamplePosition) {
        if !self.active || end != self.acc.next_position() {
            return;
        }
        let mut out = Vec::new();
        self.acc.finish(&mut out);
        if self.writer.append(&out) {
            self.writer.complete();
        }
        self.length.observe_end(end);
        self.active = false;
    }
}

/// Owns the current summary and the background build for it
pub struct WaveformService {
    provider: Arc<dyn SourceProvider>,
    bucket_width: u32,
    aggregation: Aggregation,
    batch: usize,
    summary: Arc<RwLock<WaveformSummary>>,
    generation: Arc<AtomicU64>,
    cache: Arc<Mutex<WaveformCache>>,
    events: EventBus,
    worker: Option<JoinHandle<()>>,
}

/// What `rebuild` did
pub enum Rebuild {
    /// Served from cache; nothing to do
    Cached,
    /// Background scan started
    Scanning,
    /// Caller must route decoded frames through this tap
    Tap(WaveformTap),
}

impl WaveformService {
    pub fn new(
        provider: Arc<dyn SourceProvider>,
        bucket_width: u32,
        aggregation: Aggregation,
        batch: usize,
        cache_tracks: usize,
        events: EventBus,
    ) -> Self {
        Self {
            provider,
            bucket_width,
            aggregation,
            batch: batch.max(1),
            summary: Arc::new(RwLock::new(WaveformSummary::empty(None, bucket_width, aggregation))),
            generation: Arc::new(AtomicU64::new(0)),
            cache: Arc::new(Mutex::new(WaveformCache::new(cache_tracks))),
            events,
            worker: None,
        }
    }

    pub fn bucket_width(&self) -> u32 {
        self.bucket_width
    }

    pub fn set_bucket_width(&mut self, bucket_width: u32) -> Result<()> {
        if bucket_width == 0 {
            return Err(Error::Config("bucket width must be > 0".to_string()));
        }
        self.bucket_width = bucket_width;
        Ok(())
    }

    /// Copy of the current (possibly partial) summary
    pub fn snapshot(&self) -> WaveformSummary {
        read_summary(&self.summary).clone()
    }

    pub fn window(&self, center: SamplePosition, count: usize) -> Vec<WaveformBucket> {
        read_summary(&self.summary).window(center, count)
    }

    /// Abandon any in-flight build and reset to an empty summary
    pub fn cancel(&mut self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        *write_summary(&self.summary) =
            WaveformSummary::empty(None, self.bucket_width, self.aggregation);
        // Worker notices the generation change at its next bucket
        self.worker.take();
    }

    fn new_writer(&self, track_id: TrackId, generation: u64) -> SummaryWriter {
        SummaryWriter {
            summary: Arc::clone(&self.summary),
            generation: Arc::clone(&self.generation),
            my_generation: generation,
            cache: Arc::clone(&self.cache),
            events: self.events.clone(),
            track_id,
            bucket_width: self.bucket_width,
            batch: self.batch,
            announced: 0,
        }
    }

    /// Replace the summary for `track` at the current zoom
    pub fn rebuild(&mut self, track: &Track) -> Result<Rebuild> {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.worker.take();

        let cached = self
            .cache
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(track.id, self.bucket_width, self.aggregation)
            .cloned();

        if let Some(summary) = cached {
            let len = summary.len();
            *write_summary(&self.summary) = summary;
            debug!(track_id = %track.id, buckets = len, "Waveform served from cache");
            self.events.emit_lossy(FlowEvent::WaveformBucketsReady {
                track_id: track.id,
                start: 0,
                end: len,
                bucket_width: self.bucket_width,
                complete: true,
                timestamp: flow_common::time::now(),
            });
            return Ok(Rebuild::Cached);
        }

        *write_summary(&self.summary) =
            WaveformSummary::empty(Some(track.id), self.bucket_width, self.aggregation);
        let writer = self.new_writer(track.id, generation);

        if !self.provider.supports_concurrent_cursors() {
            debug!(track_id = %track.id, "Waveform built from playback decode");
            return Ok(Rebuild::Tap(WaveformTap {
                acc: BucketAccumulator::new(self.bucket_width, self.aggregation),
                writer,
                length: Arc::clone(&track.length),
                active: true,
            }));
        }

        let scan = generate(self.provider.as_ref(), track, self.bucket_width, self.aggregation)?;
        let length = Arc::clone(&track.length);
        let track_id = track.id;
        let events = self.events.clone();

        let handle = std::thread::Builder::new()
            .name("flow-waveform".to_string())
            .spawn(move || run_scan(scan, writer, length, track_id, events))
            .map_err(|e| Error::Internal(format!("Failed to spawn waveform scan: {}", e)))?;
        self.worker = Some(handle);
        Ok(Rebuild::Scanning)
    }

    /// Wait for the background scan (tests and shutdown)
    pub fn join(&mut self) {
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                warn!("Waveform scan thread panicked");
            }
        }
    }
}

fn run_scan(
    mut scan: WaveformScan,
    mut writer: SummaryWriter,
    length: Arc<crate::audio::types::TrackLength>,
    track_id: TrackId,
    events: EventBus,
) {
    let mut batch = Vec::with_capacity(writer.batch);
    loop {
        match scan.next() {
            Some(Ok(bucket)) => {
                batch.push(bucket);
                length.observe_decoded(scan.decoded_until());
                if batch.len() >= writer.batch {
                    if !writer.append(&batch) {
                        debug!(track_id = %track_id, "Waveform scan superseded");
                        return;
                    }
                    batch.clear();
                }
            }
            Some(Err(e)) => {
                warn!(track_id = %track_id, "Waveform scan failed: {}", e);
                if writer.append(&batch) {
                    events.emit_lossy(FlowEvent::Warning {
                        kind: e.kind(),
                        message: format!("Waveform incomplete: {}", e),
                        timestamp: flow_common::time::now(),
                    });
                }
                return;
            }
            None => {
                if writer.append(&batch) {
                    if let Some(end) = scan.end() {
                        length.observe_end(end);
                    }
                    writer.complete();
                }
                return;
            }
        }
    }
}
