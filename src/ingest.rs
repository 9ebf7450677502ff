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

// Newline-delimited JSON input feeding a registry

use std::future::Future;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{error, info, warn};

use crate::record::Record;
use crate::registry::{Delivery, StreamWriterRegistry};

/// Why [`ingest_lines`] stopped reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopReason {
    #[default]
    EndOfInput,
    Shutdown,
    /// The reader failed; lines after the failure were not read
    ReadError,
    RegistryClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IngestSummary {
    pub lines_read: u64,
    pub records_appended: u64,
    pub records_dropped: u64,
    pub lines_skipped: u64,
    pub stop: StopReason,
}

/// Report every JSON line of `reader` to `stream` until input ends,
/// `shutdown` resolves, reading fails or the registry is closed
///
/// Read failures end ingestion instead of propagating, so the caller always
/// gets to close the registry and keep what was already appended. Lines that
/// are not a flat JSON object are skipped.
pub async fn ingest_lines<R, F>(
    registry: &StreamWriterRegistry,
    stream: &str,
    reader: R,
    shutdown: F,
) -> IngestSummary
where
    R: AsyncBufRead + Unpin,
    F: Future<Output = ()>,
{
    let mut lines = reader.lines();
    let mut summary = IngestSummary::default();
    tokio::pin!(shutdown);

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line,
            _ = &mut shutdown => {
                info!("Shutdown requested, no more input is read");
                summary.stop = StopReason::Shutdown;
                break;
            }
        };

        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => {
                summary.stop = StopReason::EndOfInput;
                break;
            }
            Err(e) => {
                error!("Failed to read input after line {}: {}", summary.lines_read, e);
                summary.stop = StopReason::ReadError;
                break;
            }
        };

        summary.lines_read += 1;
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<Record>(&line) {
            Ok(record) => match registry.report(stream, &record).await {
                Delivery::Appended => summary.records_appended += 1,
                Delivery::Rejected | Delivery::Failed => summary.records_dropped += 1,
                Delivery::Closed => {
                    summary.records_dropped += 1;
                    summary.stop = StopReason::RegistryClosed;
                    break;
                }
            },
            Err(e) => {
                warn!("Skipping line {}: {}", summary.lines_read, e);
                summary.lines_skipped += 1;
            }
        }
    }

    summary
}
