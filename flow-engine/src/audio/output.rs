//! Audio output
//!
//! Drives a `PlayoutSink` from either a cpal device callback (`AudioOutput`) or
//! a timer thread that consumes frames at real-time pace without a device
//! (`NullOutput`, for headless runs and tests).

use crate::audio::types::SampleFrame;
use crate::error::{Error, Result};
use crate::playback::sink::PlayoutSink;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, SampleFormat, SizedSample, Stream, StreamConfig};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Something that pulls frames from a sink at the device rate
pub trait OutputDriver {
    fn start(&mut self, sink: PlayoutSink) -> Result<()>;
    fn stop(&mut self);
    fn sample_rate(&self) -> u32;
    fn name(&self) -> String;
}

/// Audio output manager using cpal.
pub struct AudioOutput {
    device: Device,
    config: StreamConfig,
    sample_format: SampleFormat,
    stream: Option<Stream>,
    /// Stream error flag - set by audio callback on error
    error_flag: Arc<AtomicBool>,
    error_count: Arc<AtomicU32>,
}

impl AudioOutput {
    /// List available audio output devices.
    pub fn list_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();

        let devices: Vec<String> = host
            .output_devices()
            .map_err(|e| Error::AudioOutput(format!("Failed to enumerate devices: {}", e)))?
            .filter_map(|device| device.name().ok())
            .collect();

        debug!("Found {} output devices", devices.len());
        Ok(devices)
    }

    /// Open an output device for a track at `sample_rate`
    ///
    /// Falls back to the default device when the named one is missing. If the
    /// device cannot run at `sample_rate` its default rate is used and a warning
    /// is logged (playback speed will be off; no resampling is done).
    pub fn open(device_name: Option<&str>, sample_rate: u32) -> Result<Self> {
        let host = cpal::default_host();

        let device = match device_name {
            Some(name) => {
                let mut devices = host.output_devices().map_err(|e| {
                    Error::AudioOutput(format!("Failed to enumerate devices: {}", e))
                })?;
                match devices.find(|d| d.name().ok().as_deref() == Some(name)) {
                    Some(dev) => {
                        info!("Found requested audio device: {}", name);
                        dev
                    }
                    None => {
                        warn!("Requested device '{}' not found, falling back to default device", name);
                        host.default_output_device().ok_or_else(|| {
                            Error::AudioOutput(format!(
                                "Device '{}' not found and no default device available",
                                name
                            ))
                        })?
                    }
                }
            }
            None => host
                .default_output_device()
                .ok_or_else(|| Error::AudioOutput("No default output device found".to_string()))?,
        };

        let (config, sample_format) = Self::best_config(&device, sample_rate)?;
        if config.sample_rate.0 != sample_rate {
            warn!(
                requested = sample_rate,
                device_rate = config.sample_rate.0,
                "Device does not support track sample rate"
            );
        }

        debug!(
            "Audio config: sample_rate={}, channels={}, format={:?}",
            config.sample_rate.0, config.channels, sample_format
        );

        Ok(Self {
            device,
            config,
            sample_format,
            stream: None,
            error_flag: Arc::new(AtomicBool::new(false)),
            error_count: Arc::new(AtomicU32::new(0)),
        })
    }

    /// Prefer a stereo f32 config at the requested rate, then any config at
    /// that rate, then the device default.
    fn best_config(device: &Device, sample_rate: u32) -> Result<(StreamConfig, SampleFormat)> {
        let supported: Vec<_> = device
            .supported_output_configs()
            .map_err(|e| Error::AudioOutput(format!("Failed to get device configs: {}", e)))?
            .collect();

        let at_rate = |c: &cpal::SupportedStreamConfigRange| {
            c.min_sample_rate().0 <= sample_rate && c.max_sample_rate().0 >= sample_rate
        };

        let preferred = supported
            .iter()
            .find(|c| c.channels() == 2 && c.sample_format() == SampleFormat::F32 && at_rate(c))
            .or_else(|| supported.iter().find(|c| c.channels() >= 2 && at_rate(c)));

        if let Some(range) = preferred {
            let range = range.clone().with_sample_rate(cpal::SampleRate(sample_rate));
            return Ok((range.config(), range.sample_format()));
        }

        let default = device
            .default_output_config()
            .map_err(|e| Error::AudioOutput(format!("Failed to get default config: {}", e)))?;
        Ok((default.config(), default.sample_format()))
    }

    fn build_stream<T>(&self, sink: PlayoutSink) -> Result<Stream>
    where
        T: SizedSample + FromSample<f32>,
    {
        let channels = self.config.channels as usize;
        let error_flag = Arc::clone(&self.error_flag);
        let error_count = Arc::clone(&self.error_count);
        let mut scratch: Vec<SampleFrame> = Vec::new();

        self.device
            .build_output_stream(
                &self.config,
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                    let frames = data.len() / channels;
                    if scratch.len() < frames {
                        scratch.resize(frames, SampleFrame::zero());
                    }
                    sink.pull(&mut scratch[..frames]);

                    for (out, frame) in data.chunks_mut(channels).zip(scratch.iter()) {
                        out[0] = T::from_sample(frame.left.clamp(-1.0, 1.0));
                        if channels > 1 {
                            out[1] = T::from_sample(frame.right.clamp(-1.0, 1.0));
                        }
                        for extra in out.iter_mut().skip(2) {
                            *extra = T::EQUILIBRIUM;
                        }
                    }
                },
                move |err| {
                    error!("Audio stream error: {}", err);
                    error_flag.store(true, Ordering::SeqCst);
                    error_count.fetch_add(1, Ordering::SeqCst);
                },
                None,
            )
            .map_err(|e| Error::AudioOutput(format!("Failed to build stream: {}", e)))
    }

    /// True if the device reported a stream error since start
    pub fn has_error(&self) -> bool {
        self.error_flag.load(Ordering::SeqCst)
    }
}

impl OutputDriver for AudioOutput {
    fn start(&mut self, sink: PlayoutSink) -> Result<()> {
        info!("Starting audio stream");

        let stream = match self.sample_format {
            SampleFormat::F32 => self.build_stream::<f32>(sink)?,
            SampleFormat::I16 => self.build_stream::<i16>(sink)?,
            SampleFormat::U16 => self.build_stream::<u16>(sink)?,
            sample_format => {
                return Err(Error::AudioOutput(format!(
                    "Unsupported sample format: {:?}",
                    sample_format
                )));
            }
        };

        stream
            .play()
            .map_err(|e| Error::AudioOutput(format!("Failed to start stream: {}", e)))?;

        self.stream = Some(stream);
        self.error_flag.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.pause() {
                warn!("Failed to pause stream: {}", e);
            }
            info!("Audio stream stopped");
        }
    }

    fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }

    fn name(&self) -> String {
        self.device.name().unwrap_or_else(|_| "Unknown".to_string())
    }
}

impl Drop for AudioOutput {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Device-less output that consumes frames in real time
pub struct NullOutput {
    sample_rate: u32,
    period: Duration,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl NullOutput {
    pub fn new(sample_rate: u32) -> Self {
        Self::with_period(sample_rate, Duration::from_millis(10))
    }

    pub fn with_period(sample_rate: u32, period: Duration) -> Self {
        Self {
            sample_rate,
            period,
            running: Arc::new(AtomicBool::new(false)),
            thread: None,
        }
    }
}

impl OutputDriver for NullOutput {
    fn start(&mut self, sink: PlayoutSink) -> Result<()> {
        self.stop();
        self.running.store(true, Ordering::SeqCst);

        let running = Arc::clone(&self.running);
        let sample_rate = self.sample_rate as u64;
        let period = self.period;

        let handle = std::thread::Builder::new()
            .name("flow-null-output".to_string())
            .spawn(move || {
                let started = Instant::now();
                let mut pulled: u64 = 0;
                let mut scratch = vec![SampleFrame::zero(); 4096];

                while running.load(Ordering::SeqCst) {
                    std::thread::sleep(period);
                    // Catch up to wall-clock time so pacing does not drift
                    let due = started.elapsed().as_micros() as u64 * sample_rate / 1_000_000;
                    let mut owed = due.saturating_sub(pulled) as usize;
                    while owed > 0 {
                        let n = owed.min(scratch.len());
                        sink.pull(&mut scratch[..n]);
                        owed -= n;
                        pulled += n as u64;
                    }
                }
            })
            .map_err(|e| Error::AudioOutput(format!("Failed to spawn null output: {}", e)))?;

        self.thread = Some(handle);
        info!(sample_rate = self.sample_rate, "Null output started");
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                warn!("Null output thread panicked");
            }
        }
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn name(&self) -> String {
        "null".to_string()
    }
}

impl Drop for NullOutput {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::clock::PlaybackClock;
    use crate::playback::ring_buffer::PlayoutRingBuffer;

    #[test]
    fn test_null_output_consumes_in_real_time() {
        let ring = Arc::new(PlayoutRingBuffer::new(48_000));
        let clock = Arc::new(PlaybackClock::new());
        ring.push_slice(&vec![SampleFrame::from_mono(0.2); 48_000]);
        ring.open_gate();

        let mut output = NullOutput::with_period(8_000, Duration::from_millis(5));
        output
            .start(PlayoutSink::new(Arc::clone(&ring), Arc::clone(&clock)))
            .expect("start");
        std::thread::sleep(Duration::from_millis(250));
        output.stop();

        // ~2000 frames at 8 kHz over 250 ms; generous bounds for slow CI
        let consumed = clock.position();
        assert!(consumed >= 1_000, "consumed {}", consumed);
        assert!(consumed <= 4_000, "consumed {}", consumed);
    }

    #[test]
    fn test_null_output_stop_is_idempotent() {
        let mut output = NullOutput::new(44_100);
        output.stop();
        output.stop();
        assert_eq!(output.sample_rate(), 44_100);
        assert_eq!(output.name(), "null");
    }
}
