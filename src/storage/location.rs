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

// Output locations (base URI and per-stream chunk files)

use anyhow::{anyhow, bail, Context, Result};
use std::fmt;
use std::path::{Path, PathBuf};
use url::Url;

/// Extension of every chunk file
pub const CHUNK_EXTENSION: &str = "json";

/// An absolute URI inside the output filesystem
///
/// Plain absolute paths such as `/tmp/metrics` are accepted and treated as
/// `file://` URIs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLocation {
    url: Url,
}

impl OutputLocation {
    pub fn parse(uri: &str) -> Result<Self> {
        let uri = uri.trim();
        if uri.is_empty() {
            bail!("Output location is empty");
        }

        let url = match Url::parse(uri) {
            Ok(url) => url,
            Err(url::ParseError::RelativeUrlWithoutBase) if Path::new(uri).is_absolute() => {
                Url::from_file_path(uri)
                    .map_err(|_| anyhow!("Invalid output path: {}", uri))?
            }
            Err(e) => return Err(e).context(format!("Invalid output URI: {}", uri)),
        };

        if url.cannot_be_a_base() {
            bail!("Output URI '{}' has no hierarchical path", uri);
        }

        Ok(Self { url })
    }

    pub fn scheme(&self) -> &str {
        self.url.scheme()
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }

    /// Location of a chunk file: `<base>/<stream>/<chunk_id>.json`
    ///
    /// Fails for stream names rejected by [`validate_stream_name`].
    pub fn chunk(&self, stream: &str, chunk_id: &str) -> Result<OutputLocation> {
        validate_stream_name(stream)?;

        let mut url = self.url.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("Output location '{}' cannot hold files", self.url))?
            .pop_if_empty()
            .push(stream)
            .push(&format!("{}.{}", chunk_id, CHUNK_EXTENSION));

        Ok(OutputLocation { url })
    }

    /// Local path for `file://` locations
    pub fn to_file_path(&self) -> Result<PathBuf> {
        if self.url.scheme() != "file" {
            bail!("'{}' is not a local file location", self.url);
        }
        self.url
            .to_file_path()
            .map_err(|_| anyhow!("'{}' cannot be mapped to a local path", self.url))
    }
}

/// Check that `stream` names exactly one directory below the base
///
/// Empty names, `.` and `..` and names holding a path separator are refused:
/// URL path handling drops dot segments and file paths decode `%2F`, so none
/// of them would land in `<base>/<stream>/`.
pub fn validate_stream_name(stream: &str) -> Result<()> {
    if stream.is_empty() {
        bail!("Stream name is empty");
    }
    if stream == "." || stream == ".." {
        bail!("Stream name '{}' is not a directory name", stream);
    }
    if let Some(c) = stream.chars().find(|c| matches!(c, '/' | '\\' | '\0')) {
        bail!(
            "Stream name '{}' contains '{}'",
            stream.escape_default(),
            c.escape_default()
        );
    }
    Ok(())
}

impl fmt::Display for OutputLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.url.as_str())
    }
}
