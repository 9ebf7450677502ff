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

// Storage backend traits for append-only output

use super::location::OutputLocation;
use anyhow::Result;
use async_trait::async_trait;

/// Connection to an append-oriented filesystem
///
/// One connection is shared by every open file of a registry. It is created
/// by [`super::BackendFactory::connect`] and closed exactly once, after all
/// handles derived from it have been closed.
///
/// Reading data back is NOT part of this trait - users should inspect the
/// written files with the filesystem's own tools.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Create a new file and open it for appending
    ///
    /// # Arguments
    /// * `path` - Location of the file, below the base location
    /// * `overwrite` - Replace an existing file instead of failing
    async fn create(&self, path: &OutputLocation, overwrite: bool)
        -> Result<Box<dyn OutputHandle>>;

    /// Delete a file or directory
    ///
    /// Returns `false` if nothing existed at `path`.
    async fn delete(&self, path: &OutputLocation, recursive: bool) -> Result<bool>;

    /// Release the connection
    async fn close(&self) -> Result<()>;

    /// Get backend type identifier
    fn backend_type(&self) -> &str;
}

/// An open, append-only file
#[async_trait]
pub trait OutputHandle: Send {
    /// Append bytes; they may stay buffered until `flush`
    async fn append(&mut self, data: &[u8]) -> Result<()>;

    /// Push buffered bytes to the backend
    async fn flush(&mut self) -> Result<()>;

    /// Flush and release the file. The handle is unusable afterwards.
    async fn close(&mut self) -> Result<()>;

    /// Bytes accepted by this handle so far, buffered ones included
    fn current_size(&self) -> u64;
}
