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

// Metric sink writing rolling newline-delimited JSON files
//
// This is the output side of an in-process profiler that:
// - Accepts named streams of flat metric records
// - Appends each record as one JSON line to the stream's current file
// - Rolls to a new uniquely named file once a size threshold is passed
// - Writes to local disk or HDFS (WebHDFS) chosen by the output URI
// - Swallows and logs I/O failures so the measured process never crashes

pub mod config;
pub mod error;
pub mod ingest;
pub mod record;
pub mod registry;
pub mod storage;

// Re-export main types
pub use config::{load_config, load_config_with_env, SinkConfig, WriteMode};
pub use error::SinkError;
pub use ingest::{ingest_lines, IngestSummary, StopReason};
pub use record::{encode_line, MetricValue, Record};
pub use registry::{Delivery, RegistryStats, StreamWriterRegistry};
pub use storage::{
    validate_stream_name, BackendFactory, OutputHandle, OutputLocation, StorageBackend,
};
