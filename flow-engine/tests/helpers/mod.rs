//! Test helper modules for flow-engine integration tests
//!
//! - audio_generator: WAV files with known content
//! - scripted_source: in-memory source with error and latency injection
//! - engine helpers below: config, event waiting, pulling from the sink

#![allow(dead_code)]

pub mod audio_generator;
pub mod scripted_source;

pub use audio_generator::{decode_index, TestTrack, INDEX_PERIOD, TEST_SAMPLE_RATE};
pub use scripted_source::{Script, ScriptedProvider, ScriptedSource};

use flow_common::events::{FlowEvent, PlaybackState};
use flow_engine::audio::SampleFrame;
use flow_engine::config::TomlConfig;
use flow_engine::PlayoutSink;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{sleep, timeout, Instant};

pub const EVENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Small buffers and fast ticks so tests run quickly
pub fn test_config() -> TomlConfig {
    let mut config = TomlConfig::default();
    config.engine.buffer_ms = 200;
    config.engine.max_sample_rate = 48_000;
    config.engine.watermark_ms = 20;
    config.engine.position_interval_ms = 5;
    config.engine.feeder_backoff_ms = 1;
    config.engine.io_retry_backoff_ms = 1;
    config.engine.io_retry_attempts = 3;
    config.waveform.bucket_width = 1_024;
    config.waveform.batch_buckets = 8;
    config
}

/// Wait for the first event matching `pred`, skipping others
pub async fn wait_for_event<F>(rx: &mut broadcast::Receiver<FlowEvent>, pred: F) -> FlowEvent
where
    F: Fn(&FlowEvent) -> bool,
{
    timeout(EVENT_TIMEOUT, async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(e) => panic!("event bus closed: {}", e),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Wait for a transition into `state`
pub async fn wait_for_state(rx: &mut broadcast::Receiver<FlowEvent>, state: PlaybackState) {
    wait_for_event(rx, |e| {
        matches!(e, FlowEvent::StateChanged { new_state, .. } if *new_state == state)
    })
    .await;
}

/// Consume exactly `count` frames from the sink, waiting for the feeder as needed
///
/// Returns only frames that were actually consumed (never gate/underrun silence).
pub async fn pull_frames(sink: &PlayoutSink, count: usize) -> Vec<SampleFrame> {
    let deadline = Instant::now() + EVENT_TIMEOUT;
    let mut consumed = Vec::with_capacity(count);
    let mut scratch = vec![SampleFrame::zero(); 1_024];

    while consumed.len() < count {
        assert!(Instant::now() < deadline, "timed out pulling frames ({} of {})", consumed.len(), count);
        let want = (count - consumed.len()).min(scratch.len());
        let n = sink.pull(&mut scratch[..want]);
        consumed.extend_from_slice(&scratch[..n]);
        if n == 0 {
            sleep(Duration::from_millis(1)).await;
        }
    }
    consumed
}

/// Pull whatever is available for `duration`
pub async fn drain_for(sink: PlayoutSink, duration: Duration) -> Vec<SampleFrame> {
    let deadline = Instant::now() + duration;
    let mut consumed = Vec::new();
    let mut scratch = vec![SampleFrame::zero(); 1_024];
    while Instant::now() < deadline {
        let n = sink.pull(&mut scratch);
        consumed.extend_from_slice(&scratch[..n]);
        if n == 0 {
            sleep(Duration::from_millis(1)).await;
        }
    }
    consumed
}

/// Index encoded in a scripted frame
pub fn frame_index(frame: &SampleFrame) -> u64 {
    frame.left as u64
}
