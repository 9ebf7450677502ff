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

// Stream writer registry (rolling per-stream chunk files)

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{ConfigLoader, SinkConfig, WriteMode};
use crate::error::SinkError;
use crate::record::{encode_line, Record};
use crate::storage::{
    validate_stream_name, BackendFactory, OutputHandle, OutputLocation, StorageBackend,
};

/// Outcome of a single [`StreamWriterRegistry::report`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The line was handed to the stream's open file
    Appended,
    /// The registry is closed; the record was dropped
    Closed,
    /// The stream name cannot name a directory; the record was dropped
    Rejected,
    /// Encoding, file creation or the append failed; the record was dropped
    Failed,
}

/// Counters since the registry was configured
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub records_appended: u64,
    pub records_dropped: u64,
    pub bytes_appended: u64,
    pub files_opened: u64,
    pub write_errors: u64,
    pub close_errors: u64,
    pub open_streams: usize,
}

#[derive(Debug, Default)]
struct Counters {
    records_appended: AtomicU64,
    records_dropped: AtomicU64,
    bytes_appended: AtomicU64,
    files_opened: AtomicU64,
    write_errors: AtomicU64,
    close_errors: AtomicU64,
}

impl Counters {
    fn record_appended(&self, bytes: u64) {
        self.records_appended.fetch_add(1, Ordering::Relaxed);
        self.bytes_appended.fetch_add(bytes, Ordering::Relaxed);
    }

    fn record_dropped(&self) {
        self.records_dropped.fetch_add(1, Ordering::Relaxed);
    }

    fn record_failure(&self) {
        self.write_errors.fetch_add(1, Ordering::Relaxed);
        self.records_dropped.fetch_add(1, Ordering::Relaxed);
    }

    fn record_close_error(&self) {
        self.close_errors.fetch_add(1, Ordering::Relaxed);
    }
}

/// Open chunk file of one stream
struct WriterEntry {
    location: OutputLocation,
    handle: Box<dyn OutputHandle>,
    /// Bytes successfully appended through this registry
    bytes_written: u64,
}

impl WriterEntry {
    /// Strictly greater than: a file may reach exactly `roll_size_bytes`
    fn needs_rolling(&self, roll_size_bytes: u64) -> bool {
        self.bytes_written > roll_size_bytes || self.bytes_written == u64::MAX
    }
}

struct OpenState {
    backend: Arc<dyn StorageBackend>,
    writers: HashMap<String, WriterEntry>,
}

/// Per-stream rolling writers over a shared storage backend
///
/// Every stream name owns at most one open chunk file at
/// `<base>/<stream>/<uuid>.json`. Records are appended as JSON lines; once a
/// file has grown past the roll size, the next record closes it and goes to
/// a fresh file.
///
/// # Failure model
///
/// Only [`StreamWriterRegistry::configure`] returns errors. Steady-state
/// failures (encoding, file creation, appends, closing) are logged, counted
/// in [`RegistryStats`] and the affected record is dropped, so reporting can
/// never take down the process being measured.
///
/// # Thread Safety
///
/// One async mutex guards the writer map and the backend connection. It is
/// held across rolling and the append itself, which keeps lines from
/// concurrent reporters whole and lets `close` wait for in-flight writes.
///
/// # Examples
///
/// ```ignore
/// use metric_sink::{Record, SinkConfig, StreamWriterRegistry, WriteMode};
///
/// let config = SinkConfig::new("file:///tmp/metrics").with_mode(WriteMode::Overwrite);
/// let registry = StreamWriterRegistry::configure(&config).await?;
///
/// registry
///     .report("cpu", &Record::new().with("processCpuLoad", 0.2))
///     .await;
/// registry.close().await;
/// ```
pub struct StreamWriterRegistry {
    base: OutputLocation,
    roll_size_bytes: u64,
    /// `None` once closed
    state: Mutex<Option<OpenState>>,
    counters: Counters,
}

impl StreamWriterRegistry {
    /// Validate `config`, connect its backend and apply the write mode
    pub async fn configure(config: &SinkConfig) -> Result<Self, SinkError> {
        ConfigLoader::validate(config)
            .map_err(|e| SinkError::configuration_from("Invalid metric sink configuration", e))?;

        let base = OutputLocation::parse(&config.output)
            .map_err(|e| SinkError::configuration_from("Invalid output location", e))?;

        let backend = BackendFactory::connect(&base, &config.backend)
            .map_err(|e| SinkError::configuration_from("Unable to connect output filesystem", e))?;

        Self::with_backend(base, backend, config.roll_size_bytes, config.mode).await
    }

    /// Build a registry on an already connected backend
    pub async fn with_backend(
        base: OutputLocation,
        backend: Arc<dyn StorageBackend>,
        roll_size_bytes: u64,
        mode: WriteMode,
    ) -> Result<Self, SinkError> {
        if roll_size_bytes == 0 {
            return Err(SinkError::configuration("roll_size_bytes must be > 0"));
        }

        if mode == WriteMode::Overwrite {
            match backend.delete(&base, true).await {
                Ok(true) => info!("Overwrite mode: removed existing content at {}", base),
                Ok(false) => debug!("Overwrite mode: nothing to remove at {}", base),
                Err(e) => {
                    if let Err(close_err) = backend.close().await {
                        warn!("Unable to close backend after failed setup: {:#}", close_err);
                    }
                    return Err(SinkError::configuration_from(
                        &format!("Unable to clear output location {}", base),
                        e,
                    ));
                }
            }
        }

        info!(
            "Metric sink writing to {} ({} backend, rolling past {} bytes)",
            base,
            backend.backend_type(),
            roll_size_bytes
        );

        Ok(Self {
            base,
            roll_size_bytes,
            state: Mutex::new(Some(OpenState {
                backend,
                writers: HashMap::new(),
            })),
            counters: Counters::default(),
        })
    }

    pub fn base_location(&self) -> &OutputLocation {
        &self.base
    }

    pub fn roll_size_bytes(&self) -> u64 {
        self.roll_size_bytes
    }

    /// Append `record` as one JSON line to the current file of `stream`
    ///
    /// Never fails: problems are logged and reported through [`Delivery`].
    pub async fn report(&self, stream: &str, record: &Record) -> Delivery {
        if let Err(e) = validate_stream_name(stream) {
            warn!("Dropping record: {:#}", e);
            self.counters.record_dropped();
            return Delivery::Rejected;
        }

        let line = match encode_line(record) {
            Ok(line) => line,
            Err(source) => {
                let err = SinkError::Encode {
                    stream: stream.to_string(),
                    source,
                };
                warn!("{}", err);
                self.counters.record_failure();
                return Delivery::Failed;
            }
        };

        let mut state = self.state.lock().await;
        let Some(open) = state.as_mut() else {
            debug!("Metric sink closed, dropping record for stream '{}'", stream);
            self.counters.record_dropped();
            return Delivery::Closed;
        };

        let entry = match self.writer_for(open, stream).await {
            Ok(entry) => entry,
            Err(err) => {
                warn!("{}", err);
                self.counters.record_failure();
                return Delivery::Failed;
            }
        };

        match entry.handle.append(&line).await {
            Ok(()) => {
                let len = line.len() as u64;
                entry.bytes_written = entry.bytes_written.saturating_add(len);
                self.counters.record_appended(len);
                Delivery::Appended
            }
            Err(source) => {
                let err = SinkError::Write {
                    path: entry.location.to_string(),
                    source,
                };
                warn!("{}", err);
                self.counters.record_failure();
                Delivery::Failed
            }
        }
    }

    /// Current writer of `stream`, rolling or creating it when needed
    async fn writer_for<'a>(
        &self,
        open: &'a mut OpenState,
        stream: &str,
    ) -> Result<&'a mut WriterEntry, SinkError> {
        let current_usable = open
            .writers
            .get(stream)
            .is_some_and(|entry| !entry.needs_rolling(self.roll_size_bytes));

        if !current_usable {
            if let Some(previous) = open.writers.remove(stream) {
                self.retire(previous).await;
            }
        }

        let entry = match open.writers.entry(stream.to_string()) {
            Entry::Occupied(slot) => {
                debug!("Using current file: {}", slot.get().location);
                slot.into_mut()
            }
            Entry::Vacant(slot) => {
                let fresh = self.open_writer(open.backend.as_ref(), stream).await?;
                slot.insert(fresh)
            }
        };
        Ok(entry)
    }

    async fn open_writer(
        &self,
        backend: &dyn StorageBackend,
        stream: &str,
    ) -> Result<WriterEntry, SinkError> {
        let chunk_id = Uuid::new_v4().to_string();
        let location = self
            .base
            .chunk(stream, &chunk_id)
            .map_err(|source| SinkError::Write {
                path: self.base.to_string(),
                source,
            })?;

        info!("Rolling new file: {}", location);

        let handle = backend
            .create(&location, true)
            .await
            .map_err(|source| SinkError::Write {
                path: location.to_string(),
                source,
            })?;

        self.counters.files_opened.fetch_add(1, Ordering::Relaxed);

        Ok(WriterEntry {
            location,
            handle,
            bytes_written: 0,
        })
    }

    /// Flush and close a rolled-over file; failures only get logged
    async fn retire(&self, mut entry: WriterEntry) {
        debug!(
            "Closing {} after {} bytes",
            entry.location, entry.bytes_written
        );

        let flushed = entry.handle.flush().await;
        let closed = entry.handle.close().await;
        for source in [flushed.err(), closed.err()].into_iter().flatten() {
            let err = SinkError::Roll {
                path: entry.location.to_string(),
                source,
            };
            warn!("{}", err);
            self.counters.record_close_error();
        }
    }

    /// Flush and close every open file, then the backend connection
    ///
    /// Later `report` calls return [`Delivery::Closed`]. Closing twice is a
    /// no-op.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        let Some(OpenState { backend, writers }) = state.take() else {
            debug!("Metric sink at {} already closed", self.base);
            return;
        };

        let file_count = writers.len();
        for (stream, mut entry) in writers {
            debug!("Closing stream '{}' at {}", stream, entry.location);

            let flushed = entry.handle.flush().await;
            let closed = entry.handle.close().await;
            for source in [flushed.err(), closed.err()].into_iter().flatten() {
                let err = SinkError::Close {
                    target: entry.location.to_string(),
                    source,
                };
                warn!("{}", err);
                self.counters.record_close_error();
            }
        }

        if let Err(source) = backend.close().await {
            let err = SinkError::Close {
                target: format!("{} backend for {}", backend.backend_type(), self.base),
                source,
            };
            warn!("{}", err);
            self.counters.record_close_error();
        }

        info!("Metric sink at {} closed ({} open files)", self.base, file_count);
    }

    pub async fn is_closed(&self) -> bool {
        self.state.lock().await.is_none()
    }

    pub async fn stats(&self) -> RegistryStats {
        let open_streams = self
            .state
            .lock()
            .await
            .as_ref()
            .map_or(0, |open| open.writers.len());

        RegistryStats {
            records_appended: self.counters.records_appended.load(Ordering::Relaxed),
            records_dropped: self.counters.records_dropped.load(Ordering::Relaxed),
            bytes_appended: self.counters.bytes_appended.load(Ordering::Relaxed),
            files_opened: self.counters.files_opened.load(Ordering::Relaxed),
            write_errors: self.counters.write_errors.load(Ordering::Relaxed),
            close_errors: self.counters.close_errors.load(Ordering::Relaxed),
            open_streams,
        }
    }
}

impl Drop for StreamWriterRegistry {
    fn drop(&mut self) {
        if let Some(open) = self.state.get_mut() {
            if !open.writers.is_empty() {
                warn!(
                    "Metric sink at {} dropped without close; {} open files may lose buffered data",
                    self.base,
                    open.writers.len()
                );
            }
        }
    }
}
