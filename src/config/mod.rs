// Configuration module for metric-sink
//
// Provides:
// - YAML configuration file loading
// - Environment variable substitution
// - Profiler-style argument maps (output=..., mode=...)
// - Configuration validation
// - Default values

pub mod types;
mod loader;

pub use types::*;
pub use loader::{
    ConfigLoader, ARG_MODE, ARG_OUTPUT, ARG_ROLL_SIZE, ARG_TOKEN, ARG_USER, ARG_WASB_ACCOUNT,
    ARG_WASB_KEY,
};

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a YAML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<SinkConfig> {
    ConfigLoader::load(path).context("Failed to load configuration")
}

/// Load configuration with environment variable overrides
pub fn load_config_with_env<P: AsRef<Path>>(path: P) -> Result<SinkConfig> {
    let mut config = load_config(path)?;
    apply_env_overrides(&mut config)?;
    ConfigLoader::validate(&config)?;
    Ok(config)
}

/// Allow environment variables to override config values
pub fn apply_env_overrides(config: &mut SinkConfig) -> Result<()> {
    if let Ok(output) = std::env::var("METRIC_SINK_OUTPUT") {
        config.output = output;
    }

    if let Ok(mode) = std::env::var("METRIC_SINK_MODE") {
        config.mode = mode.parse().map_err(anyhow::Error::msg)?;
    }

    if let Ok(roll_size) = std::env::var("METRIC_SINK_ROLL_SIZE_BYTES") {
        config.roll_size_bytes = roll_size
            .parse()
            .context("METRIC_SINK_ROLL_SIZE_BYTES must be a byte count")?;
    }

    Ok(())
}
