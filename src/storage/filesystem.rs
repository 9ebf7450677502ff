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

// Filesystem backend implementation (file:// locations)

use super::backend::{OutputHandle, StorageBackend};
use super::location::OutputLocation;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::fs;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info};

const WRITE_BUFFER_SIZE: usize = 64 * 1024;

/// Filesystem backend for writing chunk files to local disk
pub struct FilesystemBackend {
    base_path: PathBuf,
    closed: AtomicBool,
}

impl FilesystemBackend {
    pub fn new(base: &OutputLocation) -> Result<Self> {
        let base_path = base.to_file_path()?;

        info!(
            "Initializing filesystem backend at: {}",
            base_path.display()
        );

        Ok(Self {
            base_path,
            closed: AtomicBool::new(false),
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            bail!("Filesystem backend at {} is closed", self.base_path.display());
        }
        Ok(())
    }

    /// Ensure the directory holding `path` exists
    async fn ensure_parent_directory(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if fs::metadata(parent).await.is_err() {
                debug!("Creating directory: {}", parent.display());
                fs::create_dir_all(parent)
                    .await
                    .context(format!("Failed to create directory: {}", parent.display()))?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for FilesystemBackend {
    async fn create(
        &self,
        path: &OutputLocation,
        overwrite: bool,
    ) -> Result<Box<dyn OutputHandle>> {
        self.ensure_open()?;

        let file_path = path.to_file_path()?;
        Self::ensure_parent_directory(&file_path).await?;

        let mut options = fs::OpenOptions::new();
        options.write(true);
        if overwrite {
            options.create(true).truncate(true);
        } else {
            options.create_new(true);
        }

        let file = options
            .open(&file_path)
            .await
            .context(format!("Failed to create file: {}", file_path.display()))?;

        debug!("Created file {}", file_path.display());

        Ok(Box::new(FileHandle {
            path: file_path,
            writer: Some(BufWriter::with_capacity(WRITE_BUFFER_SIZE, file)),
            size: 0,
        }))
    }

    async fn delete(&self, path: &OutputLocation, recursive: bool) -> Result<bool> {
        self.ensure_open()?;

        let target = path.to_file_path()?;
        let metadata = match fs::metadata(&target).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => {
                return Err(e).context(format!("Failed to inspect {}", target.display()))
            }
        };

        let removed = match (metadata.is_dir(), recursive) {
            (true, true) => fs::remove_dir_all(&target).await,
            (true, false) => fs::remove_dir(&target).await,
            (false, _) => fs::remove_file(&target).await,
        };
        removed.context(format!("Failed to delete {}", target.display()))?;

        info!("Deleted {}", target.display());
        Ok(true)
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            bail!("Filesystem backend at {} already closed", self.base_path.display());
        }
        debug!("Closed filesystem backend at {}", self.base_path.display());
        Ok(())
    }

    fn backend_type(&self) -> &str {
        "filesystem"
    }
}

/// Buffered append handle on a local file
struct FileHandle {
    path: PathBuf,
    writer: Option<BufWriter<fs::File>>,
    size: u64,
}

impl FileHandle {
    fn writer(&mut self) -> Result<&mut BufWriter<fs::File>> {
        match self.writer.as_mut() {
            Some(writer) => Ok(writer),
            None => bail!("File {} is already closed", self.path.display()),
        }
    }
}

#[async_trait]
impl OutputHandle for FileHandle {
    async fn append(&mut self, data: &[u8]) -> Result<()> {
        let path = self.path.display().to_string();
        self.writer()?
            .write_all(data)
            .await
            .context(format!("Failed to write to {}", path))?;
        self.size += data.len() as u64;
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        let path = self.path.display().to_string();
        self.writer()?
            .flush()
            .await
            .context(format!("Failed to flush {}", path))
    }

    async fn close(&mut self) -> Result<()> {
        let Some(mut writer) = self.writer.take() else {
            bail!("File {} is already closed", self.path.display());
        };

        writer
            .flush()
            .await
            .context(format!("Failed to flush {}", self.path.display()))?;
        writer
            .into_inner()
            .sync_all()
            .await
            .context(format!("Failed to sync {}", self.path.display()))?;

        debug!("Closed {} ({} bytes)", self.path.display(), self.size);
        Ok(())
    }

    fn current_size(&self) -> u64 {
        self.size
    }
}
