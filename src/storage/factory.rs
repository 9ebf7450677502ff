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

// Backend factory selecting a storage backend from the output URI scheme

use super::backend::StorageBackend;
use super::filesystem::FilesystemBackend;
use super::location::OutputLocation;
use super::webhdfs::WebHdfsBackend;
use crate::config::BackendOptions;
use anyhow::{bail, Result};
use std::sync::Arc;

pub struct BackendFactory;

impl BackendFactory {
    /// Connect to the filesystem serving `location`
    pub fn connect(
        location: &OutputLocation,
        options: &BackendOptions,
    ) -> Result<Arc<dyn StorageBackend>> {
        match location.scheme() {
            "file" => {
                let backend = FilesystemBackend::new(location)?;
                Ok(Arc::new(backend))
            }

            "webhdfs" | "swebhdfs" => {
                let backend = WebHdfsBackend::new(location, options)?;
                Ok(Arc::new(backend))
            }

            "wasb" | "wasbs" => bail!(
                "Azure Blob output ('{}') is not supported. Supported: file, webhdfs, swebhdfs",
                location
            ),

            unknown => bail!(
                "Unsupported output scheme: '{}'. Supported: file, webhdfs, swebhdfs",
                unknown
            ),
        }
    }
}
