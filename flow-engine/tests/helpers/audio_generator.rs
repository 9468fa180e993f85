//! Audio test file generation
//!
//! Deterministic WAV files with known content, written with hound into a
//! temporary directory that lives as long as the returned `TempDir`.

use hound::{WavSpec, WavWriter};
use std::f32::consts::PI;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Standard test sample rate (44.1 kHz)
pub const TEST_SAMPLE_RATE: u32 = 44_100;

/// Period of the indexed ramp written by `generate_indexed_wav`
pub const INDEX_PERIOD: u64 = 30_000;

/// Generate a stereo 16-bit sine wave of `frames` frames
pub fn generate_sine_wav<P: AsRef<Path>>(
    path: P,
    frames: u64,
    frequency_hz: f32,
    amplitude: f32,
) -> Result<(), hound::Error> {
    let spec = WavSpec {
        channels: 2,
        sample_rate: TEST_SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec)?;
    let amplitude_i16 = (amplitude * i16::MAX as f32) as i16;

    for frame_idx in 0..frames {
        let t = frame_idx as f32 / TEST_SAMPLE_RATE as f32;
        let sample = ((2.0 * PI * frequency_hz * t).sin() * amplitude_i16 as f32) as i16;
        writer.write_sample(sample)?;
        writer.write_sample(sample)?;
    }

    writer.finalize()?;
    Ok(())
}

/// Generate a stereo WAV whose left sample encodes the frame index
///
/// Left is `index % INDEX_PERIOD` as a raw i16; right is its negation. Decode
/// with `decode_index`.
pub fn generate_indexed_wav<P: AsRef<Path>>(path: P, frames: u64) -> Result<(), hound::Error> {
    let spec = WavSpec {
        channels: 2,
        sample_rate: TEST_SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec)?;
    for frame_idx in 0..frames {
        let value = (frame_idx % INDEX_PERIOD) as i16;
        writer.write_sample(value)?;
        writer.write_sample(-value)?;
    }
    writer.finalize()?;
    Ok(())
}

/// Recover `index % INDEX_PERIOD` from a decoded left sample
pub fn decode_index(left: f32) -> u64 {
    (left * 32_768.0).round() as u64
}

/// A temp dir holding one generated file
pub struct TestTrack {
    pub dir: TempDir,
    pub path: PathBuf,
    pub frames: u64,
}

impl TestTrack {
    pub fn sine(name: &str, frames: u64) -> Self {
        let dir = TempDir::new().expect("create temp dir");
        let path = dir.path().join(name);
        generate_sine_wav(&path, frames, 440.0, 0.5).expect("write sine wav");
        Self { dir, path, frames }
    }

    pub fn indexed(name: &str, frames: u64) -> Self {
        let dir = TempDir::new().expect("create temp dir");
        let path = dir.path().join(name);
        generate_indexed_wav(&path, frames).expect("write indexed wav");
        Self { dir, path, frames }
    }
}
