// Copyright 2025 coScene
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

// Configuration loader with environment variable substitution

use super::types::*;
use crate::storage::OutputLocation;
use anyhow::{anyhow, bail, Context, Result};
use regex::Regex;
use std::collections::HashMap;
use std::path::Path;
use tracing::warn;

/// Argument names understood by [`ConfigLoader::from_arguments`]
pub const ARG_OUTPUT: &str = "output";
pub const ARG_MODE: &str = "mode";
pub const ARG_ROLL_SIZE: &str = "roll_size_bytes";
pub const ARG_WASB_ACCOUNT: &str = "wasb_account";
pub const ARG_WASB_KEY: &str = "wasb_key";
pub const ARG_USER: &str = "user";
pub const ARG_TOKEN: &str = "token";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from file with environment variable substitution
    pub fn load<P: AsRef<Path>>(path: P) -> Result<SinkConfig> {
        let content = std::fs::read_to_string(path.as_ref())
            .context("Failed to read config file")?;

        Self::parse(&content)
    }

    /// Parse YAML text, substituting environment variables first
    pub fn parse(content: &str) -> Result<SinkConfig> {
        let content = Self::substitute_env_vars(content)?;

        let config: SinkConfig = serde_yaml::from_str(&content)
            .context("Failed to parse YAML configuration")?;

        Self::validate(&config)?;

        Ok(config)
    }

    /// Build configuration from profiler-style arguments (`name -> values`)
    ///
    /// The last non-empty value of an argument wins. `user` and `token` are
    /// forwarded as WebHDFS credentials. Azure Blob output is not available,
    /// so `wasb_account` and `wasb_key` are refused.
    pub fn from_arguments(args: &HashMap<String, Vec<String>>) -> Result<SinkConfig> {
        let single = |name: &str| {
            args.get(name)
                .and_then(|values| values.iter().rev().find(|v| !v.trim().is_empty()))
                .map(|v| v.trim().to_string())
        };

        let output = single(ARG_OUTPUT)
            .ok_or_else(|| anyhow!("{} path argument for metric sink is mandatory", ARG_OUTPUT))?;
        let mut config = SinkConfig::new(output);

        if let Some(mode) = single(ARG_MODE) {
            config.mode = mode.parse().unwrap_or_else(|e| {
                warn!("{}; keeping existing output content", e);
                WriteMode::Append
            });
        }

        if let Some(roll_size) = single(ARG_ROLL_SIZE) {
            config.roll_size_bytes = roll_size
                .parse()
                .context(format!("Invalid {}: {}", ARG_ROLL_SIZE, roll_size))?;
        }

        for arg in [ARG_WASB_ACCOUNT, ARG_WASB_KEY] {
            if single(arg).is_some() {
                bail!(
                    "{} is not supported: Azure Blob output is unavailable, use a file or webhdfs location",
                    arg
                );
            }
        }

        for (arg, credential) in [(ARG_USER, "user"), (ARG_TOKEN, "token")] {
            if let Some(value) = single(arg) {
                config.backend.credentials.insert(credential.to_string(), value);
            }
        }

        Self::validate(&config)?;
        Ok(config)
    }

    /// Substitute ${VAR} and ${VAR:-default} patterns with environment variables
    ///
    /// Examples:
    /// - ${HOME} -> /home/user
    /// - ${SINK_OUTPUT:-file:///tmp/metrics} -> file:///tmp/metrics (if SINK_OUTPUT not set)
    fn substitute_env_vars(content: &str) -> Result<String> {
        let re = Regex::new(r"\$\{([^}:]+)(?::-([^}]+))?\}")
            .context("Invalid substitution pattern")?;

        Ok(re
            .replace_all(content, |caps: &regex::Captures| {
                let var_name = &caps[1];
                let default_value = caps.get(2).map(|m| m.as_str());

                match std::env::var(var_name) {
                    Ok(value) => value,
                    Err(_) => match default_value {
                        Some(default) => default.to_string(),
                        // Keep original if no default and var not found
                        None => format!("${{{}}}", var_name),
                    },
                }
            })
            .to_string())
    }

    /// Validate configuration
    pub fn validate(config: &SinkConfig) -> Result<()> {
        if config.output.trim().is_empty() {
            bail!("output must not be empty");
        }

        OutputLocation::parse(&config.output).context("output is not a usable location")?;

        if config.roll_size_bytes == 0 {
            bail!("roll_size_bytes must be > 0");
        }

        if config.backend.timeout_seconds == 0 {
            bail!("backend.timeout_seconds must be > 0");
        }

        let level = config.logging.level.to_lowercase();
        if !LOG_LEVELS.contains(&level.as_str()) {
            bail!(
                "Unknown logging.level: '{}'. Supported: {}",
                config.logging.level,
                LOG_LEVELS.join(", ")
            );
        }

        Ok(())
    }
}
