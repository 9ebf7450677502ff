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

// Shared helpers for integration tests

#![allow(dead_code)]

use anyhow::{bail, Result};
use async_trait::async_trait;
use metric_sink::{OutputHandle, OutputLocation, Record, StorageBackend};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Record whose encoded line has the same length for every `seq` below 10^7
pub fn fixed_width_record(seq: u64) -> Record {
    Record::new()
        .with("seq", format!("{:07}", seq))
        .with("host", "host1")
        .with("processCpuLoad", 0.25)
        .with("tag", None::<String>)
}

/// Profiler-like record with mixed value types
pub fn cpu_and_memory_record(epoch_millis: i64) -> Record {
    Record::new()
        .with("epochMillis", epoch_millis)
        .with("name", "process1")
        .with("host", "host1")
        .with("processUuid", "uuid1")
        .with("appId", "app1")
        .with("tag", None::<String>)
        .with("role", "role1")
        .with("processCpuLoad", 0.2)
        .with("systemCpuLoad", 0.3)
        .with("processCpuTime", 1001_i64)
        .with("heapMemoryTotalUsed", 2002_i64)
        .with("heapMemoryCommitted", 3003_i64)
        .with("heapMemoryMax", 4004_i64)
        .with("nonHeapMemoryCommitted", 5005_i64)
        .with("nonHeapMemoryTotalUsed", 6006_i64)
        .with("nonHeapMemoryMax", 7007_i64)
        .with("vmRSS", 8001_i64)
        .with("vmHWM", 8002_i64)
        .with("vmSize", 8003_i64)
        .with("vmPeak", 8004_i64)
}

/// All `.json` chunk files directly inside `dir`, sorted by name
pub fn chunk_files(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    files.sort();
    files
}

/// Lines of a chunk file, terminators stripped
pub fn read_lines(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect()
}

pub fn parse_lines(path: &Path) -> Vec<Record> {
    read_lines(path)
        .iter()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

/// Switches for [`MemoryBackend`] failures
#[derive(Debug, Default)]
pub struct Faults {
    pub fail_create: AtomicBool,
    pub fail_append: AtomicBool,
    pub fail_flush: AtomicBool,
    pub fail_close: AtomicBool,
    pub fail_delete: AtomicBool,
    pub fail_backend_close: AtomicBool,
}

impl Faults {
    pub fn set(flag: &AtomicBool, value: bool) {
        flag.store(value, Ordering::SeqCst);
    }

    fn check(flag: &AtomicBool, what: &str) -> Result<()> {
        if flag.load(Ordering::SeqCst) {
            bail!("injected {} failure", what);
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct MemoryFile {
    data: Vec<u8>,
    closed: bool,
}

type FileMap = Arc<Mutex<BTreeMap<String, MemoryFile>>>;

/// In-memory backend; data becomes visible once flushed or closed
#[derive(Default)]
pub struct MemoryBackend {
    files: FileMap,
    pub faults: Arc<Faults>,
    deletes: AtomicUsize,
    backend_closes: AtomicUsize,
}

impl MemoryBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn file_names(&self) -> Vec<String> {
        self.files.lock().unwrap().keys().cloned().collect()
    }

    pub fn contents(&self, name: &str) -> String {
        let files = self.files.lock().unwrap();
        String::from_utf8(files[name].data.clone()).unwrap()
    }

    pub fn is_closed(&self, name: &str) -> bool {
        self.files.lock().unwrap()[name].closed
    }

    pub fn delete_count(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    pub fn backend_close_count(&self) -> usize {
        self.backend_closes.load(Ordering::SeqCst)
    }

    /// Put a file in place as if an earlier run had written it
    pub fn seed(&self, name: &str, data: &str) {
        self.files.lock().unwrap().insert(
            name.to_string(),
            MemoryFile {
                data: data.as_bytes().to_vec(),
                closed: true,
            },
        );
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn create(
        &self,
        path: &OutputLocation,
        overwrite: bool,
    ) -> Result<Box<dyn OutputHandle>> {
        Faults::check(&self.faults.fail_create, "create")?;

        let key = path.to_string();
        let mut files = self.files.lock().unwrap();
        if files.contains_key(&key) && !overwrite {
            bail!("{} already exists", key);
        }
        files.insert(key.clone(), MemoryFile::default());

        Ok(Box::new(MemoryHandle {
            key,
            files: self.files.clone(),
            faults: self.faults.clone(),
            pending: Vec::new(),
            size: 0,
        }))
    }

    async fn delete(&self, path: &OutputLocation, _recursive: bool) -> Result<bool> {
        Faults::check(&self.faults.fail_delete, "delete")?;
        self.deletes.fetch_add(1, Ordering::SeqCst);

        let prefix = path.to_string();
        let mut files = self.files.lock().unwrap();
        let before = files.len();
        files.retain(|name, _| !name.starts_with(&prefix));
        Ok(files.len() != before)
    }

    async fn close(&self) -> Result<()> {
        self.backend_closes.fetch_add(1, Ordering::SeqCst);
        Faults::check(&self.faults.fail_backend_close, "backend close")
    }

    fn backend_type(&self) -> &str {
        "memory"
    }
}

struct MemoryHandle {
    key: String,
    files: FileMap,
    faults: Arc<Faults>,
    pending: Vec<u8>,
    size: u64,
}

impl MemoryHandle {
    fn commit(&mut self, close: bool) -> Result<()> {
        let mut files = self.files.lock().unwrap();
        let Some(file) = files.get_mut(&self.key) else {
            bail!("{} was deleted", self.key);
        };
        if file.closed {
            bail!("{} is already closed", self.key);
        }
        file.data.append(&mut self.pending);
        file.closed = close;
        Ok(())
    }
}

#[async_trait]
impl OutputHandle for MemoryHandle {
    async fn append(&mut self, data: &[u8]) -> Result<()> {
        Faults::check(&self.faults.fail_append, "append")?;
        self.pending.extend_from_slice(data);
        self.size += data.len() as u64;
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        Faults::check(&self.faults.fail_flush, "flush")?;
        self.commit(false)
    }

    async fn close(&mut self) -> Result<()> {
        Faults::check(&self.faults.fail_close, "close")?;
        self.commit(true)
    }

    fn current_size(&self) -> u64 {
        self.size
    }
}
