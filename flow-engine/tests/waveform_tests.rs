//! Waveform generation against real files and scripted sources

mod helpers;

use flow_common::events::{FlowEvent, PlaybackState};
use flow_engine::audio::{FileSourceProvider, SourceProvider, Track, TrackRef};
use flow_engine::playback::waveform::{generate, Aggregation};
use flow_engine::PlaybackEngine;
use helpers::*;
use std::sync::Arc;
use std::time::Duration;

fn complete_event(width: u32) -> impl Fn(&FlowEvent) -> bool {
    move |e| {
        matches!(
            e,
            FlowEvent::WaveformBucketsReady { complete: true, bucket_width, .. } if *bucket_width == width
        )
    }
}

#[test]
fn test_scan_decodes_only_what_is_consumed() {
    let track_file = TestTrack::sine("scan.wav", 441_000);
    let provider = FileSourceProvider::default();
    let track = Track::new(TrackRef::new(&track_file.path), TEST_SAMPLE_RATE, 2, Some(441_000));

    let mut scan = generate(&provider, &track, 1_024, Aggregation::MinMax).expect("generate");
    let first: Vec<_> = scan
        .by_ref()
        .take(10)
        .collect::<Result<_, _>>()
        .expect("buckets");
    assert_eq!(first.len(), 10);
    assert_eq!(first[9].start, 9 * 1_024);
    assert!(
        scan.decoded_until() < 441_000 / 4,
        "decoded {} frames for 10 buckets",
        scan.decoded_until()
    );

    let rest: Vec<_> = scan.collect::<Result<_, _>>().expect("buckets");
    // ceil(441000 / 1024)
    assert_eq!(first.len() + rest.len(), 431);
    let peak = rest.iter().map(|b| b.peak()).fold(0.0f32, f32::max);
    assert!((peak - 0.5).abs() < 0.01, "sine peak {}", peak);
}

#[test]
fn test_scan_cursor_is_independent_of_playback_cursor() {
    let track_file = TestTrack::indexed("cursor.wav", 50_000);
    let provider = FileSourceProvider::default();
    let track = Track::new(TrackRef::new(&track_file.path), TEST_SAMPLE_RATE, 2, Some(50_000));

    let mut playback = provider.open(&track.source).expect("open playback");
    playback.seek(40_000).expect("seek");

    let scan = generate(&provider, &track, 10_000, Aggregation::MinMax).expect("generate");
    let buckets: Vec<_> = scan.collect::<Result<_, _>>().expect("buckets");
    assert_eq!(buckets.len(), 5);
    assert_eq!(buckets[0].start, 0);
    assert_eq!(playback.position(), 40_000);
}

#[tokio::test]
async fn test_waveform_streams_in_batches_until_complete() {
    let track = TestTrack::sine("stream.wav", 88_200);
    let parts = PlaybackEngine::start(&test_config(), Arc::new(FileSourceProvider::default()))
        .expect("start engine");
    let handle = &parts.handle;
    let mut rx = handle.subscribe();

    handle.load(&track.path).await.expect("load");

    let mut batches = Vec::new();
    loop {
        let event = wait_for_event(&mut rx, |e| matches!(e, FlowEvent::WaveformBucketsReady { .. })).await;
        if let FlowEvent::WaveformBucketsReady { start, end, complete, .. } = event {
            batches.push((start, end));
            if complete {
                break;
            }
        }
    }
    assert!(batches.len() > 1, "expected incremental batches, got {:?}", batches);
    for pair in batches.windows(2) {
        assert_eq!(pair[0].1, pair[1].0, "batches must be contiguous: {:?}", batches);
    }

    let summary = handle.waveform().await.expect("waveform");
    assert!(summary.complete);
    // ceil(88200 / 1024)
    assert_eq!(summary.len(), 87);
    assert_eq!(batches.last().map(|b| b.1), Some(87));

    handle.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn test_zoom_rebuilds_and_reload_uses_cache() {
    let track = TestTrack::sine("zoom.wav", 88_200);
    let parts = PlaybackEngine::start(&test_config(), Arc::new(FileSourceProvider::default()))
        .expect("start engine");
    let handle = &parts.handle;
    let mut rx = handle.subscribe();

    handle.load(&track.path).await.expect("load");
    wait_for_event(&mut rx, complete_event(1_024)).await;

    handle.set_waveform_zoom(4_096).await.expect("zoom");
    wait_for_event(&mut rx, complete_event(4_096)).await;
    let summary = handle.waveform().await.expect("waveform");
    assert_eq!(summary.bucket_width, 4_096);
    assert_eq!(summary.len(), 22);

    // Served from cache: one complete notification covering everything
    handle.load(&track.path).await.expect("reload");
    let event = wait_for_event(&mut rx, complete_event(4_096)).await;
    if let FlowEvent::WaveformBucketsReady { start, end, .. } = event {
        assert_eq!((start, end), (0, 22));
    }

    assert!(handle.set_waveform_zoom(0).await.is_err());

    handle.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn test_window_keeps_playhead_centered() {
    let track = TestTrack::sine("window.wav", 88_200);
    let parts = PlaybackEngine::start(&test_config(), Arc::new(FileSourceProvider::default()))
        .expect("start engine");
    let handle = &parts.handle;
    let mut rx = handle.subscribe();

    handle.load(&track.path).await.expect("load");
    wait_for_event(&mut rx, complete_event(1_024)).await;

    let window = handle.waveform_window(0, 10).await.expect("window");
    assert_eq!(window.len(), 10);
    assert!(window[..5].iter().all(|b| b.peak() == 0.0));
    assert_eq!(window[5].start, 0);

    let window = handle.waveform_window(88_199, 10).await.expect("window");
    assert_eq!(window[5].start, 86 * 1_024);
    assert!(window[6..].iter().all(|b| b.peak() == 0.0));

    handle.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn test_single_cursor_source_builds_waveform_from_playback() {
    let provider = Arc::new(ScriptedProvider::new(Script::new(20_000, TEST_SAMPLE_RATE)).single_cursor());
    let parts = PlaybackEngine::start(&test_config(), provider.clone())
        .expect("start engine");
    let handle = &parts.handle;
    let mut rx = handle.subscribe();

    handle.load("/scripted/single").await.expect("load");
    handle.play().await.expect("play");
    wait_for_state(&mut rx, PlaybackState::Playing).await;

    let drain = tokio::spawn(drain_for(parts.sink.clone(), Duration::from_millis(800)));
    wait_for_event(&mut rx, complete_event(1_024)).await;

    let summary = handle.waveform().await.expect("waveform");
    assert!(summary.complete);
    // ceil(20000 / 1024)
    assert_eq!(summary.len(), 20);
    assert_eq!(provider.opened(), 1, "no second cursor opened");

    drain.await.expect("drain task");
    handle.shutdown().await.expect("shutdown");
}
