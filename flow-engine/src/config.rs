//! Configuration management for flow-engine
//!
//! Settings come from a TOML file (located via `flow_common::config`) with
//! built-in defaults for every field. Command-line flags override a handful of
//! values in `main.rs`.
//!
//! ```toml
//! [engine]
//! buffer_ms = 500
//! watermark_ms = 100
//!
//! [waveform]
//! bucket_width = 1024
//! aggregation = "rms"
//!
//! [output]
//! device = "default"
//!
//! [logging]
//! level = "debug"
//! ```

use crate::error::{Error, Result};
use crate::playback::waveform::Aggregation;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Complete configuration loaded from TOML
#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub waveform: WaveformConfig,

    #[serde(default)]
    pub output: OutputConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Playback engine tuning
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Decoded audio held ahead of the output, in milliseconds
    #[serde(default = "default_buffer_ms")]
    pub buffer_ms: u64,

    /// Highest sample rate the ring buffer is sized for
    ///
    /// The ring is allocated once for `buffer_ms` at this rate; tracks at lower
    /// rates use a proportionally smaller part of it.
    #[serde(default = "default_max_sample_rate")]
    pub max_sample_rate: u32,

    /// Audio buffered after a seek before output resumes
    #[serde(default = "default_watermark_ms")]
    pub watermark_ms: u64,

    /// Interval between `PositionChanged` notifications while playing
    #[serde(default = "default_position_interval_ms")]
    pub position_interval_ms: u64,

    /// Retries for transient I/O errors before a warning is raised
    #[serde(default = "default_io_retry_attempts")]
    pub io_retry_attempts: u32,

    #[serde(default = "default_io_retry_backoff_ms")]
    pub io_retry_backoff_ms: u64,

    /// Consecutive undecodable packets tolerated before the stream is declared corrupt
    #[serde(default = "default_max_consecutive_decode_errors")]
    pub max_consecutive_decode_errors: u32,

    /// Feeder sleep when the ring buffer is full
    #[serde(default = "default_feeder_backoff_ms")]
    pub feeder_backoff_ms: u64,

    /// Number of cue slots per track
    #[serde(default = "default_cue_slots")]
    pub cue_slots: u8,

    /// Event bus capacity
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

/// Waveform generation settings
#[derive(Debug, Clone, Deserialize)]
pub struct WaveformConfig {
    /// Frames summarized per bucket
    #[serde(default = "default_bucket_width")]
    pub bucket_width: u32,

    #[serde(default)]
    pub aggregation: Aggregation,

    /// Buckets appended between `WaveformBucketsReady` notifications
    #[serde(default = "default_batch_buckets")]
    pub batch_buckets: usize,

    /// Completed summaries kept in memory
    #[serde(default = "default_cache_tracks")]
    pub cache_tracks: usize,
}

/// Audio output settings
#[derive(Debug, Clone, Deserialize, Default)]
pub struct OutputConfig {
    /// Output device name (None = system default)
    #[serde(default)]
    pub device: Option<String>,

    /// Pace playback with a timer instead of opening an audio device
    #[serde(default)]
    pub null_output: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_buffer_ms() -> u64 {
    500
}

fn default_max_sample_rate() -> u32 {
    96_000
}

fn default_watermark_ms() -> u64 {
    100
}

fn default_position_interval_ms() -> u64 {
    50
}

fn default_io_retry_attempts() -> u32 {
    3
}

fn default_io_retry_backoff_ms() -> u64 {
    50
}

fn default_max_consecutive_decode_errors() -> u32 {
    3
}

fn default_feeder_backoff_ms() -> u64 {
    5
}

fn default_cue_slots() -> u8 {
    8
}

fn default_event_capacity() -> usize {
    256
}

fn default_bucket_width() -> u32 {
    1024
}

fn default_batch_buckets() -> usize {
    64
}

fn default_cache_tracks() -> usize {
    8
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            buffer_ms: default_buffer_ms(),
            max_sample_rate: default_max_sample_rate(),
            watermark_ms: default_watermark_ms(),
            position_interval_ms: default_position_interval_ms(),
            io_retry_attempts: default_io_retry_attempts(),
            io_retry_backoff_ms: default_io_retry_backoff_ms(),
            max_consecutive_decode_errors: default_max_consecutive_decode_errors(),
            feeder_backoff_ms: default_feeder_backoff_ms(),
            cue_slots: default_cue_slots(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl Default for WaveformConfig {
    fn default() -> Self {
        Self {
            bucket_width: default_bucket_width(),
            aggregation: Aggregation::default(),
            batch_buckets: default_batch_buckets(),
            cache_tracks: default_cache_tracks(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl EngineConfig {
    pub fn position_interval(&self) -> Duration {
        Duration::from_millis(self.position_interval_ms)
    }

    pub fn io_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.io_retry_backoff_ms)
    }

    pub fn feeder_backoff(&self) -> Duration {
        Duration::from_millis(self.feeder_backoff_ms)
    }
}

impl TomlConfig {
    /// Load from an explicit file
    pub fn load(path: &Path) -> Result<Self> {
        let config: TomlConfig = flow_common::config::load_toml(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve the config file (CLI → `FLOW_CONFIG` → standard locations) and load it
    ///
    /// Falls back to defaults when no file is found.
    pub fn resolve(cli_arg: Option<&Path>) -> Result<Self> {
        let (config, _path): (TomlConfig, _) = flow_common::config::load_or_default(
            cli_arg,
            flow_common::config::CONFIG_ENV_VAR,
        )?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        let e = &self.engine;
        if e.buffer_ms == 0 {
            return Err(Error::Config("engine.buffer_ms must be > 0".into()));
        }
        if e.max_sample_rate == 0 {
            return Err(Error::Config("engine.max_sample_rate must be > 0".into()));
        }
        if e.watermark_ms > e.buffer_ms {
            return Err(Error::Config(format!(
                "engine.watermark_ms ({}) exceeds engine.buffer_ms ({})",
                e.watermark_ms, e.buffer_ms
            )));
        }
        if e.position_interval_ms == 0 {
            return Err(Error::Config("engine.position_interval_ms must be > 0".into()));
        }
        if e.cue_slots == 0 {
            return Err(Error::Config("engine.cue_slots must be > 0".into()));
        }
        if e.event_capacity == 0 {
            return Err(Error::Config("engine.event_capacity must be > 0".into()));
        }
        if self.waveform.bucket_width == 0 {
            return Err(Error::Config("waveform.bucket_width must be > 0".into()));
        }
        if self.waveform.batch_buckets == 0 {
            return Err(Error::Config("waveform.batch_buckets must be > 0".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config: TomlConfig = toml::from_str("").expect("parse");
        assert_eq!(config.engine.buffer_ms, 500);
        assert_eq!(config.engine.watermark_ms, 100);
        assert_eq!(config.engine.cue_slots, 8);
        assert_eq!(config.waveform.aggregation, Aggregation::MinMax);
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let config: TomlConfig = toml::from_str(
            r#"
            [engine]
            buffer_ms = 250

            [waveform]
            aggregation = "rms"
            "#,
        )
        .expect("parse");
        assert_eq!(config.engine.buffer_ms, 250);
        assert_eq!(config.engine.max_sample_rate, 96_000);
        assert_eq!(config.waveform.aggregation, Aggregation::Rms);
        assert_eq!(config.waveform.bucket_width, 1024);
    }

    #[test]
    fn test_watermark_above_buffer_rejected() {
        let mut config = TomlConfig::default();
        config.engine.watermark_ms = config.engine.buffer_ms + 1;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_zero_bucket_width_rejected() {
        let mut config = TomlConfig::default();
        config.waveform.bucket_width = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("flow.toml");
        std::fs::write(&path, "[output]\nnull_output = true\n").expect("write");

        let config = TomlConfig::load(&path).expect("load");
        assert!(config.output.null_output);
        assert!(config.output.device.is_none());
    }

    #[test]
    #[serial]
    fn test_resolve_reads_env_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("env.toml");
        std::fs::write(&path, "[engine]\nbuffer_ms = 300\n").expect("write");

        std::env::set_var(flow_common::config::CONFIG_ENV_VAR, &path);
        let config = TomlConfig::resolve(None);
        std::env::remove_var(flow_common::config::CONFIG_ENV_VAR);

        assert_eq!(config.expect("resolve").engine.buffer_ms, 300);
    }

    #[test]
    #[serial]
    fn test_cli_path_beats_env_and_invalid_values_fail() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cli = dir.path().join("cli.toml");
        std::fs::write(&cli, "[engine]\nbuffer_ms = 50\nwatermark_ms = 80\n").expect("write");

        std::env::set_var(flow_common::config::CONFIG_ENV_VAR, dir.path().join("missing.toml"));
        let result = TomlConfig::resolve(Some(&cli));
        std::env::remove_var(flow_common::config::CONFIG_ENV_VAR);

        assert!(matches!(result, Err(Error::Config(_))));
    }
}
