//! Timestamp and sample-position conversions

use chrono::{DateTime, Utc};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Convert milliseconds to duration
pub fn millis_to_duration(millis: u64) -> std::time::Duration {
    std::time::Duration::from_millis(millis)
}

/// Number of frames spanning `millis` at `sample_rate`, rounded down
pub fn ms_to_frames(millis: u64, sample_rate: u32) -> u64 {
    millis * sample_rate as u64 / 1000
}

/// Milliseconds covered by `frames` at `sample_rate`, rounded down
///
/// Returns 0 for a zero sample rate rather than dividing by zero.
pub fn frames_to_ms(frames: u64, sample_rate: u32) -> u64 {
    if sample_rate == 0 {
        return 0;
    }
    frames * 1000 / sample_rate as u64
}

/// Format a frame position as `m:ss.mmm` for log lines and the console
pub fn format_position(frames: u64, sample_rate: u32) -> String {
    let ms = frames_to_ms(frames, sample_rate);
    format!("{}:{:02}.{:03}", ms / 60_000, (ms / 1000) % 60, ms % 1000)
}
