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

// WebHDFS backend implementation (webhdfs:// and swebhdfs:// locations)
//
// Files are created and appended through the namenode REST API. Data-bearing
// calls follow the two-step protocol: the namenode answers with a
// 307 redirect to a datanode, which then receives the bytes.

use super::backend::{OutputHandle, StorageBackend};
use super::location::OutputLocation;
use crate::config::BackendOptions;
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use reqwest::{Client, Method, Response, StatusCode};
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

pub const DEFAULT_WEBHDFS_PORT: u16 = 9870;
pub const DEFAULT_SWEBHDFS_PORT: u16 = 9871;

/// Buffered bytes are pushed to the datanode once they pass this size
const APPEND_BUFFER_SIZE: usize = 4 * 1024 * 1024;

const CREDENTIAL_USER: &str = "user";
const CREDENTIAL_TOKEN: &str = "token";

#[derive(Debug, Deserialize)]
struct BooleanResponse {
    boolean: bool,
}

/// WebHDFS client for writing chunk files to HDFS
pub struct WebHdfsBackend {
    client: Client,
    endpoint: Url,
    user: Option<String>,
    delegation: Option<String>,
    closed: AtomicBool,
}

impl WebHdfsBackend {
    pub fn new(base: &OutputLocation, options: &BackendOptions) -> Result<Self> {
        let (http_scheme, default_port) = match base.scheme() {
            "webhdfs" => ("http", DEFAULT_WEBHDFS_PORT),
            "swebhdfs" => ("https", DEFAULT_SWEBHDFS_PORT),
            other => bail!("WebHDFS backend cannot serve '{}' locations", other),
        };

        let host = base
            .url()
            .host_str()
            .ok_or_else(|| anyhow!("WebHDFS location '{}' has no namenode host", base))?;
        let port = base.url().port().unwrap_or(default_port);

        let endpoint = Url::parse(&format!("{}://{}:{}", http_scheme, host, port))
            .context("Invalid namenode address")?;

        if let Some(key) = options
            .credentials
            .keys()
            .find(|key| *key != CREDENTIAL_USER && *key != CREDENTIAL_TOKEN)
        {
            bail!(
                "WebHDFS backend does not understand credential '{}' (expected '{}' or '{}')",
                key,
                CREDENTIAL_USER,
                CREDENTIAL_TOKEN
            );
        }

        // Redirects carry the datanode address and are followed by hand
        let client = reqwest::ClientBuilder::new()
            .redirect(reqwest::redirect::Policy::none())
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .timeout(options.timeout())
            .build()
            .context("Failed to build HTTP client")?;

        info!("Initializing WebHDFS backend at: {}", endpoint);

        Ok(Self {
            client,
            endpoint,
            user: options.credential(CREDENTIAL_USER).map(str::to_string),
            delegation: options.credential(CREDENTIAL_TOKEN).map(str::to_string),
            closed: AtomicBool::new(false),
        })
    }

    /// Namenode URL for `op` on `path`
    fn operation_url(
        &self,
        path: &OutputLocation,
        op: &str,
        params: &[(&str, String)],
    ) -> Url {
        let mut url = self.endpoint.clone();
        url.set_path(&format!("/webhdfs/v1{}", path.url().path()));
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("op", op);
            if let Some(user) = &self.user {
                query.append_pair("user.name", user);
            }
            if let Some(token) = &self.delegation {
                query.append_pair("delegation", token);
            }
            for (key, value) in params {
                query.append_pair(key, value);
            }
        }
        url
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            bail!("WebHDFS backend at {} is closed", self.endpoint);
        }
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for WebHdfsBackend {
    async fn create(
        &self,
        path: &OutputLocation,
        overwrite: bool,
    ) -> Result<Box<dyn OutputHandle>> {
        self.ensure_open()?;

        let create_url =
            self.operation_url(path, "CREATE", &[("overwrite", overwrite.to_string())]);
        let response = self
            .client
            .put(create_url)
            .send()
            .await
            .context("Failed to send CREATE request")?;

        match redirect_location(&response)? {
            Some(datanode) => {
                let response = self
                    .client
                    .put(datanode)
                    .header("Content-Type", "application/octet-stream")
                    .body(Bytes::new())
                    .send()
                    .await
                    .context("Failed to create file on datanode")?;
                expect_success("CREATE", response).await?;
            }
            None => {
                expect_success("CREATE", response).await?;
            }
        }

        debug!("Created file {}", path);

        Ok(Box::new(WebHdfsHandle {
            client: self.client.clone(),
            location: path.clone(),
            append_url: self.operation_url(path, "APPEND", &[]),
            buffer: BytesMut::with_capacity(APPEND_BUFFER_SIZE),
            committed: 0,
            closed: false,
        }))
    }

    async fn delete(&self, path: &OutputLocation, recursive: bool) -> Result<bool> {
        self.ensure_open()?;

        let url = self.operation_url(path, "DELETE", &[("recursive", recursive.to_string())]);
        let response = self
            .client
            .delete(url)
            .send()
            .await
            .context("Failed to send DELETE request")?;
        let response = expect_success("DELETE", response).await?;

        let result: BooleanResponse = response
            .json()
            .await
            .context("Invalid DELETE response")?;

        if result.boolean {
            info!("Deleted {}", path);
        }
        Ok(result.boolean)
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            bail!("WebHDFS backend at {} already closed", self.endpoint);
        }
        debug!("Closed WebHDFS backend at {}", self.endpoint);
        Ok(())
    }

    fn backend_type(&self) -> &str {
        "webhdfs"
    }
}

/// Append handle buffering bytes client-side between datanode pushes
struct WebHdfsHandle {
    client: Client,
    location: OutputLocation,
    append_url: Url,
    buffer: BytesMut,
    committed: u64,
    closed: bool,
}

impl WebHdfsHandle {
    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            bail!("File {} is already closed", self.location);
        }
        Ok(())
    }

    /// Push the buffer in one APPEND call. The buffer is emptied whether or
    /// not the call succeeds.
    async fn push(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        let chunk = self.buffer.split().freeze();
        let len = chunk.len() as u64;

        let result = self.send_append(chunk).await;
        match &result {
            Ok(()) => self.committed += len,
            Err(e) => warn!("Dropped {} buffered bytes for {}: {:#}", len, self.location, e),
        }
        result
    }

    async fn send_append(&self, chunk: Bytes) -> Result<()> {
        let response = self
            .client
            .request(Method::POST, self.append_url.clone())
            .send()
            .await
            .context("Failed to send APPEND request")?;

        let datanode = redirect_location(&response)?
            .ok_or_else(|| anyhow!("APPEND was not redirected (status {})", response.status()))?;

        let response = self
            .client
            .post(datanode)
            .header("Content-Type", "application/octet-stream")
            .body(chunk)
            .send()
            .await
            .context("Failed to append on datanode")?;
        expect_success("APPEND", response).await?;
        Ok(())
    }
}

#[async_trait]
impl OutputHandle for WebHdfsHandle {
    async fn append(&mut self, data: &[u8]) -> Result<()> {
        self.ensure_open()?;
        self.buffer.extend_from_slice(data);
        if self.buffer.len() >= APPEND_BUFFER_SIZE {
            self.push().await?;
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.push().await
    }

    async fn close(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.closed = true;
        self.push().await
    }

    fn current_size(&self) -> u64 {
        self.committed + self.buffer.len() as u64
    }
}

/// Datanode address of a 307 answer, `None` for any other status
fn redirect_location(response: &Response) -> Result<Option<Url>> {
    if response.status() != StatusCode::TEMPORARY_REDIRECT {
        return Ok(None);
    }

    let location = response
        .headers()
        .get(reqwest::header::LOCATION)
        .ok_or_else(|| anyhow!("Redirect without Location header"))?
        .to_str()
        .context("Location header is not valid UTF-8")?;

    Url::parse(location)
        .map(Some)
        .context(format!("Invalid redirect target: {}", location))
}

async fn expect_success(op: &str, response: Response) -> Result<Response> {
    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status();
    let error_text = response.text().await.unwrap_or_default();
    bail!(
        "WebHDFS {} failed with status {}: {}",
        op,
        status,
        error_text
    )
}
