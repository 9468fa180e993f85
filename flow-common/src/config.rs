//! Configuration file resolution
//!
//! Priority order for locating the TOML config file:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. Per-user config directory (`<config_dir>/flow/config.toml`)
//! 4. System-wide file (`/etc/flow/config.toml`, Linux only)
//!
//! When none of these exist the caller falls back to compiled defaults.

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "FLOW_CONFIG";

/// Locate the config file, if any
///
/// An explicitly requested file (CLI or environment) is returned even if it
/// does not exist, so that loading it reports a clear error instead of
/// silently falling back to defaults.
pub fn resolve_config_path(cli_arg: Option<&Path>, env_var_name: &str) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3/4: well-known locations
    default_config_locations().into_iter().find(|p| p.exists())
}

/// Candidate config locations for the platform, most specific first
fn default_config_locations() -> Vec<PathBuf> {
    let mut locations = Vec::new();
    if let Some(dir) = dirs::config_dir() {
        locations.push(dir.join("flow").join("config.toml"));
    }
    if cfg!(target_os = "linux") {
        locations.push(PathBuf::from("/etc/flow/config.toml"));
    }
    locations
}

/// Read and parse a TOML config file
pub fn load_toml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;
    let parsed = toml::from_str::<T>(&content)?;
    debug!(path = %path.display(), "Loaded config file");
    Ok(parsed)
}

/// Resolve and load the config, returning `T::default()` when no file exists
pub fn load_or_default<T: DeserializeOwned + Default>(
    cli_arg: Option<&Path>,
    env_var_name: &str,
) -> Result<(T, Option<PathBuf>)> {
    match resolve_config_path(cli_arg, env_var_name) {
        Some(path) => {
            let config = load_toml(&path)?;
            Ok((config, Some(path)))
        }
        None => Ok((T::default(), None)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serial_test::serial;

    #[derive(Debug, Default, Deserialize, PartialEq)]
    struct Sample {
        #[serde(default)]
        level: String,
    }

    #[test]
    #[serial]
    fn test_cli_arg_has_priority() {
        std::env::set_var("FLOW_TEST_CONFIG_A", "/tmp/from-env.toml");
        let cli = PathBuf::from("/tmp/from-cli.toml");
        let resolved = resolve_config_path(Some(&cli), "FLOW_TEST_CONFIG_A");
        assert_eq!(resolved, Some(cli));
        std::env::remove_var("FLOW_TEST_CONFIG_A");
    }

    #[test]
    #[serial]
    fn test_env_var_used_without_cli() {
        std::env::set_var("FLOW_TEST_CONFIG_B", "/tmp/from-env.toml");
        let resolved = resolve_config_path(None, "FLOW_TEST_CONFIG_B");
        assert_eq!(resolved, Some(PathBuf::from("/tmp/from-env.toml")));
        std::env::remove_var("FLOW_TEST_CONFIG_B");
    }

    #[test]
    fn test_load_toml_parses_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "level = \"debug\"\n").expect("write");

        let sample: Sample = load_toml(&path).expect("parse");
        assert_eq!(sample.level, "debug");
    }

    #[test]
    fn test_load_toml_reports_syntax_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "level = = nope").expect("write");

        let result: Result<Sample> = load_toml(&path);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let path = PathBuf::from("/nonexistent/flow/config.toml");
        let result: Result<(Sample, Option<PathBuf>)> =
            load_or_default(Some(&path), "FLOW_TEST_CONFIG_UNSET");
        assert!(result.is_err());
    }
}
