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

// WebHDFS protocol tests against an in-process namenode/datanode

mod common;

use common::fixed_width_record;
use metric_sink::config::BackendOptions;
use metric_sink::storage::WebHdfsBackend;
use metric_sink::{
    Delivery, OutputLocation, Record, SinkConfig, StorageBackend, StreamWriterRegistry, WriteMode,
};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpListener;

// =============================================================================
// Stub server
// =============================================================================

struct Request {
    method: String,
    path: String,
    query: String,
    body: Vec<u8>,
}

impl Request {
    fn param(&self, name: &str) -> Option<&str> {
        self.query
            .split('&')
            .find_map(|pair| pair.strip_prefix(name)?.strip_prefix('='))
    }
}

struct Reply {
    status: u16,
    location: Option<String>,
    body: String,
}

impl Reply {
    fn status(status: u16) -> Self {
        Self {
            status,
            location: None,
            body: String::new(),
        }
    }

    fn json(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            location: None,
            body: body.into(),
        }
    }

    fn redirect(location: String) -> Self {
        Self {
            status: 307,
            location: Some(location),
            body: String::new(),
        }
    }
}

#[derive(Default)]
struct StubState {
    files: BTreeMap<String, Vec<u8>>,
    /// `"<namenode|datanode> <op>"` per request, in arrival order
    calls: Vec<String>,
    queries: Vec<String>,
    namenode_status: Option<u16>,
    datanode_status: Option<u16>,
    append_without_redirect: bool,
}

struct StubHdfs {
    addr: SocketAddr,
    state: Arc<Mutex<StubState>>,
}

impl StubHdfs {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind");
        let addr = listener.local_addr().expect("failed to get addr");
        let state = Arc::new(Mutex::new(StubState::default()));

        let server_state = state.clone();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let state = server_state.clone();
                tokio::spawn(async move {
                    let (read, mut write) = socket.into_split();
                    let mut reader = BufReader::new(read);
                    while let Ok(Some(request)) = read_request(&mut reader).await {
                        let reply = handle(&mut state.lock().unwrap(), addr, &request);
                        if write_reply(&mut write, &reply).await.is_err() {
                            break;
                        }
                    }
                });
            }
        });

        Self { addr, state }
    }

    fn base(&self, dir: &str) -> OutputLocation {
        OutputLocation::parse(&format!("webhdfs://{}/{}", self.addr, dir)).unwrap()
    }

    fn backend(&self, options: &BackendOptions) -> WebHdfsBackend {
        WebHdfsBackend::new(&self.base("metrics"), options).unwrap()
    }

    fn content(&self, path: &str) -> Vec<u8> {
        self.state.lock().unwrap().files[path].clone()
    }

    fn files(&self) -> Vec<String> {
        self.state.lock().unwrap().files.keys().cloned().collect()
    }

    fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    fn queries(&self) -> Vec<String> {
        self.state.lock().unwrap().queries.clone()
    }

    fn set_namenode_status(&self, status: Option<u16>) {
        self.state.lock().unwrap().namenode_status = status;
    }

    fn set_datanode_status(&self, status: Option<u16>) {
        self.state.lock().unwrap().datanode_status = status;
    }

    fn set_append_without_redirect(&self) {
        self.state.lock().unwrap().append_without_redirect = true;
    }
}

async fn read_request(reader: &mut BufReader<OwnedReadHalf>) -> std::io::Result<Option<Request>> {
    let mut request_line = String::new();
    if reader.read_line(&mut request_line).await? == 0 {
        return Ok(None);
    }
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let target = parts.next().unwrap_or_default().to_string();

    let mut content_length = 0usize;
    let mut chunked = false;
    loop {
        let mut header = String::new();
        reader.read_line(&mut header).await?;
        let header = header.trim_end();
        if header.is_empty() {
            break;
        }
        if let Some((name, value)) = header.split_once(':') {
            let name = name.trim().to_ascii_lowercase();
            let value = value.trim();
            if name == "content-length" {
                content_length = value.parse().unwrap_or(0);
            } else if name == "transfer-encoding" && value.eq_ignore_ascii_case("chunked") {
                chunked = true;
            }
        }
    }

    let mut body = Vec::new();
    if chunked {
        loop {
            let mut size_line = String::new();
            reader.read_line(&mut size_line).await?;
            let size_hex = size_line.trim().split(';').next().unwrap_or("0");
            let size = usize::from_str_radix(size_hex, 16).unwrap_or(0);
            // Chunk data is followed by CRLF; the last chunk is just CRLF
            let mut chunk = vec![0u8; size + 2];
            reader.read_exact(&mut chunk).await?;
            if size == 0 {
                break;
            }
            body.extend_from_slice(&chunk[..size]);
        }
    } else {
        body.resize(content_length, 0);
        reader.read_exact(&mut body).await?;
    }

    let (path, query) = match target.split_once('?') {
        Some((path, query)) => (path.to_string(), query.to_string()),
        None => (target, String::new()),
    };
    Ok(Some(Request {
        method,
        path,
        query,
        body,
    }))
}

async fn write_reply(
    write: &mut tokio::net::tcp::OwnedWriteHalf,
    reply: &Reply,
) -> std::io::Result<()> {
    let mut head = format!(
        "HTTP/1.1 {} Stub\r\nContent-Length: {}\r\n",
        reply.status,
        reply.body.len()
    );
    if let Some(location) = &reply.location {
        head.push_str(&format!("Location: {}\r\n", location));
    }
    if !reply.body.is_empty() {
        head.push_str("Content-Type: application/json\r\n");
    }
    head.push_str("\r\n");

    write.write_all(head.as_bytes()).await?;
    write.write_all(reply.body.as_bytes()).await?;
    write.flush().await
}

fn remote_exception(message: &str) -> String {
    format!(r#"{{"RemoteException":{{"message":"{}"}}}}"#, message)
}

fn handle(state: &mut StubState, addr: SocketAddr, request: &Request) -> Reply {
    let op = request.param("op").unwrap_or_default().to_string();

    if let Some(path) = request.path.strip_prefix("/webhdfs/v1") {
        state.calls.push(format!("namenode {}", op));
        state.queries.push(request.query.clone());
        if let Some(status) = state.namenode_status {
            return Reply::json(status, remote_exception("Permission denied"));
        }

        return match (request.method.as_str(), op.as_str()) {
            ("PUT", "CREATE") => {
                Reply::redirect(format!("http://{}/datanode{}?op=CREATE", addr, path))
            }
            ("POST", "APPEND") => {
                if !state.files.contains_key(path) {
                    Reply::json(404, remote_exception("File does not exist"))
                } else if state.append_without_redirect {
                    Reply::status(200)
                } else {
                    Reply::redirect(format!("http://{}/datanode{}?op=APPEND", addr, path))
                }
            }
            ("DELETE", "DELETE") => {
                let before = state.files.len();
                let dir = format!("{}/", path);
                state
                    .files
                    .retain(|name, _| name != path && !name.starts_with(&dir));
                let removed = state.files.len() != before;
                Reply::json(200, format!(r#"{{"boolean":{}}}"#, removed))
            }
            _ => Reply::json(400, remote_exception("Unsupported operation")),
        };
    }

    if let Some(path) = request.path.strip_prefix("/datanode") {
        state.calls.push(format!("datanode {}", op));
        if let Some(status) = state.datanode_status {
            return Reply::json(status, remote_exception("Datanode unavailable"));
        }

        return match op.as_str() {
            "CREATE" => {
                state.files.insert(path.to_string(), request.body.clone());
                Reply::status(201)
            }
            "APPEND" => match state.files.get_mut(path) {
                Some(data) => {
                    data.extend_from_slice(&request.body);
                    Reply::status(200)
                }
                None => Reply::json(404, remote_exception("File does not exist")),
            },
            _ => Reply::json(400, remote_exception("Unsupported operation")),
        };
    }

    Reply::status(404)
}

// =============================================================================
// Backend tests
// =============================================================================

#[tokio::test]
async fn test_create_and_append_follow_redirects() {
    let stub = StubHdfs::start().await;
    let mut options = BackendOptions::default();
    options
        .credentials
        .insert("user".to_string(), "profiler".to_string());
    let backend = stub.backend(&options);

    let chunk = stub.base("metrics").chunk("cpu", "chunk-1").unwrap();
    let mut handle = backend.create(&chunk, true).await.unwrap();
    assert_eq!(stub.files(), vec!["/metrics/cpu/chunk-1.json"]);

    handle.append(b"{\"a\":1}\n").await.unwrap();
    handle.append(b"{\"a\":2}\n").await.unwrap();
    assert_eq!(handle.current_size(), 16);
    // Small appends stay buffered client-side
    assert!(stub.content("/metrics/cpu/chunk-1.json").is_empty());

    handle.close().await.unwrap();
    assert_eq!(
        stub.content("/metrics/cpu/chunk-1.json"),
        b"{\"a\":1}\n{\"a\":2}\n"
    );
    assert_eq!(
        stub.calls(),
        vec![
            "namenode CREATE",
            "datanode CREATE",
            "namenode APPEND",
            "datanode APPEND"
        ]
    );
    assert!(stub
        .queries()
        .iter()
        .all(|query| query.contains("user.name=profiler")));
}

#[tokio::test]
async fn test_flush_pushes_buffered_bytes() {
    let stub = StubHdfs::start().await;
    let backend = stub.backend(&BackendOptions::default());

    let chunk = stub.base("metrics").chunk("cpu", "chunk-1").unwrap();
    let mut handle = backend.create(&chunk, true).await.unwrap();
    handle.append(b"{\"a\":1}\n").await.unwrap();
    handle.flush().await.unwrap();
    assert_eq!(stub.content("/metrics/cpu/chunk-1.json"), b"{\"a\":1}\n");

    // Nothing buffered: close does not issue another APPEND
    handle.close().await.unwrap();
    let appends = stub
        .calls()
        .iter()
        .filter(|call| *call == "namenode APPEND")
        .count();
    assert_eq!(appends, 1);
    assert!(handle.append(b"late").await.is_err());
}

#[tokio::test]
async fn test_full_buffer_is_pushed_without_flush() {
    let stub = StubHdfs::start().await;
    let backend = stub.backend(&BackendOptions::default());

    let chunk = stub.base("metrics").chunk("cpu", "big").unwrap();
    let mut handle = backend.create(&chunk, true).await.unwrap();

    let block = vec![b'x'; 4 * 1024 * 1024];
    handle.append(&block).await.unwrap();
    assert_eq!(stub.content("/metrics/cpu/big.json").len(), block.len());

    handle.append(b"tail\n").await.unwrap();
    assert_eq!(stub.content("/metrics/cpu/big.json").len(), block.len());

    handle.close().await.unwrap();
    assert_eq!(stub.content("/metrics/cpu/big.json").len(), block.len() + 5);
    assert_eq!(handle.current_size(), block.len() as u64 + 5);
}

#[tokio::test]
async fn test_error_status_is_propagated() {
    let stub = StubHdfs::start().await;
    let backend = stub.backend(&BackendOptions::default());
    let chunk = stub.base("metrics").chunk("cpu", "chunk-1").unwrap();

    stub.set_namenode_status(Some(403));
    let err = backend.create(&chunk, true).await.err().unwrap();
    let message = format!("{:#}", err);
    assert!(message.contains("403"), "{}", message);
    assert!(message.contains("Permission denied"), "{}", message);
    assert!(backend.delete(&stub.base("metrics"), true).await.is_err());
    stub.set_namenode_status(None);

    let mut handle = backend.create(&chunk, true).await.unwrap();
    handle.append(b"{\"lost\":1}\n").await.unwrap();

    stub.set_datanode_status(Some(500));
    let err = handle.flush().await.unwrap_err();
    assert!(format!("{:#}", err).contains("500"), "{:#}", err);
    // The failed push is not retried
    assert_eq!(handle.current_size(), 0);
    stub.set_datanode_status(None);

    handle.append(b"{\"kept\":2}\n").await.unwrap();
    handle.close().await.unwrap();
    assert_eq!(stub.content("/metrics/cpu/chunk-1.json"), b"{\"kept\":2}\n");
}

#[tokio::test]
async fn test_append_requires_redirect() {
    let stub = StubHdfs::start().await;
    let backend = stub.backend(&BackendOptions::default());
    let chunk = stub.base("metrics").chunk("cpu", "chunk-1").unwrap();

    let mut handle = backend.create(&chunk, true).await.unwrap();
    stub.set_append_without_redirect();
    handle.append(b"{\"a\":1}\n").await.unwrap();

    let err = handle.close().await.unwrap_err();
    assert!(err.to_string().contains("not redirected"), "{}", err);
}

#[tokio::test]
async fn test_delete_reports_whether_anything_was_removed() {
    let stub = StubHdfs::start().await;
    let backend = stub.backend(&BackendOptions::default());
    let base = stub.base("metrics");

    for id in ["a", "b"] {
        let mut handle = backend.create(&base.chunk("cpu", id).unwrap(), true).await.unwrap();
        handle.close().await.unwrap();
    }
    let other = stub.base("metrics2").chunk("cpu", "c").unwrap();
    backend.create(&other, true).await.unwrap().close().await.unwrap();

    assert!(backend.delete(&base, true).await.unwrap());
    assert_eq!(stub.files(), vec!["/metrics2/cpu/c.json"]);
    assert!(!backend.delete(&base, true).await.unwrap());
    assert!(stub
        .queries()
        .iter()
        .any(|query| query.contains("op=DELETE") && query.contains("recursive=true")));
}

// =============================================================================
// Registry over WebHDFS
// =============================================================================

#[tokio::test]
async fn test_registry_rolls_files_on_webhdfs() {
    let stub = StubHdfs::start().await;
    let config = SinkConfig::new(stub.base("metrics").to_string())
        .with_mode(WriteMode::Overwrite)
        .with_roll_size(200);
    let registry = StreamWriterRegistry::configure(&config).await.unwrap();

    for seq in 0..20 {
        assert_eq!(
            registry.report("cpu", &fixed_width_record(seq)).await,
            Delivery::Appended
        );
    }
    registry.close().await;

    // 66-byte lines: a file takes floor(200 / 66) + 1 = 4 records
    let files = stub.files();
    assert_eq!(files.len(), 5);

    let mut seqs = Vec::new();
    for file in &files {
        assert!(file.starts_with("/metrics/cpu/") && file.ends_with(".json"));
        let content = String::from_utf8(stub.content(file)).unwrap();
        let records: Vec<Record> = content
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(records.len(), 4);
        let first = seqs.len();
        for record in &records {
            let Some(metric_sink::MetricValue::Text(seq)) = record.get("seq") else {
                panic!("record without seq in {}", file);
            };
            seqs.push(seq.parse::<u64>().unwrap());
        }
        // Lines inside one file keep call order
        assert!(seqs[first..].windows(2).all(|pair| pair[1] == pair[0] + 1));
    }
    seqs.sort();
    assert_eq!(seqs, (0..20).collect::<Vec<_>>());

    let stats = registry.stats().await;
    assert_eq!(stats.files_opened, 5);
    assert_eq!(stats.close_errors, 0);
}
