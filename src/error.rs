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

// Error taxonomy for the metric sink
//
// Only `Configuration` is ever returned to callers of the registry.
// Every other variant is built, logged and dropped inside `report`/`close`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SinkError {
    /// Missing or invalid settings, or the backend could not be reached
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A single record could not be appended to its stream file
    #[error("failed to append to '{path}': {source:#}")]
    Write {
        path: String,
        #[source]
        source: anyhow::Error,
    },

    /// The previous file of a stream could not be closed while rolling
    #[error("failed to close rolled file '{path}': {source:#}")]
    Roll {
        path: String,
        #[source]
        source: anyhow::Error,
    },

    /// Flush or close failed during shutdown
    #[error("failed to close '{target}': {source:#}")]
    Close {
        target: String,
        #[source]
        source: anyhow::Error,
    },

    /// The record could not be serialized
    #[error("failed to encode record for stream '{stream}': {source}")]
    Encode {
        stream: String,
        #[source]
        source: serde_json::Error,
    },
}

impl SinkError {
    pub fn configuration(message: impl Into<String>) -> Self {
        SinkError::Configuration(message.into())
    }

    /// Wrap an `anyhow` chain into a configuration error, keeping the causes
    pub fn configuration_from(context: &str, err: anyhow::Error) -> Self {
        SinkError::Configuration(format!("{}: {:#}", context, err))
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, SinkError::Configuration(_))
    }
}
