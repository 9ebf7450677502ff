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

// Storage backend module
//
// Provides a trait-based abstraction over append-oriented filesystems,
// selected by the scheme of the output URI (file://, webhdfs://, ...).
//
// This module focuses on WRITE-ONLY operations.
// Written files are read back with the filesystem's own tools.

pub mod backend;
pub mod factory;
pub mod filesystem;
pub mod location;
pub mod webhdfs;

pub use backend::{OutputHandle, StorageBackend};
pub use factory::BackendFactory;
pub use filesystem::FilesystemBackend;
pub use location::{validate_stream_name, OutputLocation};
pub use webhdfs::WebHdfsBackend;
