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

// Configuration types for metric-sink

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SinkConfig {
    /// Base URI of all output files (mandatory)
    #[serde(default)]
    pub output: String,

    #[serde(default)]
    pub mode: WriteMode,

    /// Roll to a new file once the current one grows past this size
    #[serde(default = "default_roll_size")]
    pub roll_size_bytes: u64,

    #[serde(default)]
    pub backend: BackendOptions,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl SinkConfig {
    pub fn new(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            ..Self::default()
        }
    }

    pub fn with_mode(mut self, mode: WriteMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_roll_size(mut self, roll_size_bytes: u64) -> Self {
        self.roll_size_bytes = roll_size_bytes;
        self
    }

    pub fn with_credential(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.backend.credentials.insert(key.into(), value.into());
        self
    }
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            output: String::new(),
            mode: WriteMode::default(),
            roll_size_bytes: default_roll_size(),
            backend: BackendOptions::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// What to do with content already present at the output location
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    /// Keep existing files, add new ones next to them
    #[default]
    Append,
    /// Recursively delete the output location before the first write
    Overwrite,
}

impl FromStr for WriteMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "append" => Ok(WriteMode::Append),
            "overwrite" => Ok(WriteMode::Overwrite),
            other => Err(format!(
                "Unknown mode: '{}'. Supported: append, overwrite",
                other
            )),
        }
    }
}

impl<'de> Deserialize<'de> for WriteMode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        value.parse().map_err(serde::de::Error::custom)
    }
}

/// Options handed to the backend connection factory
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendOptions {
    /// Backend-specific credentials (WebHDFS reads `user` and `token`)
    #[serde(default)]
    pub credentials: HashMap<String, String>,

    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

impl Default for BackendOptions {
    fn default() -> Self {
        Self {
            credentials: HashMap::new(),
            timeout_seconds: default_timeout(),
        }
    }
}

impl BackendOptions {
    pub fn credential(&self, key: &str) -> Option<&str> {
        self.credentials
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// 128 MiB
pub const DEFAULT_ROLL_SIZE_BYTES: u64 = 128 * 1024 * 1024;

// Default value functions
fn default_roll_size() -> u64 { DEFAULT_ROLL_SIZE_BYTES }
fn default_timeout() -> u64 { 300 }
fn default_log_level() -> String { "info".to_string() }
