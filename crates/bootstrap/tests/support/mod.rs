// In-memory collaborators: a sidecar served over `tokio::io::duplex`, a
// spawner that brings it up, and an updater that records what it was asked.

#![allow(dead_code)]

use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use pear_bootstrap::{
    BootstrapOptions, Bootstrapper, Channel, Collaborators, ConnectPolicy, LockPolicy, Spawner,
    StageRequest, Transport, UpdateError, Updater,
};
use pear_bootstrap_common::endpoint::ChannelAddress;
use pear_bootstrap_common::key::PeerKey;
use pear_bootstrap_common::peers::PeerAddr;
use pear_bootstrap_common::protocol::{encode_line, EventFrame, RequestFrame, StreamEvent};
use serde_json::Value;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, DuplexStream, ReadBuf};

pub const KEY_HEX: &str = "1f3a5c7e9b0d2f4a6c8e0b1d3f5a7c9e1b3d5f7a9c0e2b4d6f8a0c2e4b6d8f0a";
pub const APP_LINK: &str = "pear://rbw6fbxorqgjgyitworh3f73utc5cu7sczhptn64oonbznuojiao";

pub fn key() -> PeerKey {
    KEY_HEX.parse().expect("test key should parse")
}

/// Client end of a fake sidecar connection; counts shutdowns.
struct CountingChannel {
    inner: DuplexStream,
    shutdowns: Arc<AtomicUsize>,
}

impl AsyncRead for CountingChannel {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for CountingChannel {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let result = Pin::new(&mut this.inner).poll_shutdown(cx);
        if result.is_ready() {
            this.shutdowns.fetch_add(1, Ordering::SeqCst);
        }
        result
    }
}

/// Sidecar reachable once `up` is set. Each connection reads one request
/// and answers with `script`, framed with the request's id.
#[derive(Default)]
pub struct FakeTransport {
    pub up: Arc<AtomicBool>,
    pub attempts: AtomicUsize,
    pub opens: AtomicUsize,
    pub shutdowns: Arc<AtomicUsize>,
    pub script: Vec<StreamEvent>,
    pub requests: Arc<Mutex<Vec<RequestFrame>>>,
}

impl FakeTransport {
    pub fn requests(&self) -> Vec<RequestFrame> {
        self.requests.lock().expect("requests lock").clone()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn connect(&self, _address: &ChannelAddress) -> io::Result<Channel> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if !self.up.load(Ordering::SeqCst) {
            return Err(io::Error::from(io::ErrorKind::NotFound));
        }
        self.opens.fetch_add(1, Ordering::SeqCst);

        let (client, server) = tokio::io::duplex(16 * 1024);
        let script = self.script.clone();
        let requests = Arc::clone(&self.requests);
        tokio::spawn(async move {
            let (read, mut write) = tokio::io::split(server);
            let mut reader = BufReader::new(read);
            let mut line = String::new();
            if reader.read_line(&mut line).await.unwrap_or(0) == 0 {
                return;
            }
            let Ok(request) = serde_json::from_str::<RequestFrame>(&line) else {
                return;
            };
            let id = request.id;
            requests.lock().expect("requests lock").push(request);
            for event in script {
                let frame = encode_line(&EventFrame { id, event }).expect("encode event");
                if write.write_all(&frame).await.is_err() {
                    return;
                }
            }
        });

        Ok(Box::new(CountingChannel { inner: client, shutdowns: Arc::clone(&self.shutdowns) }))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnCall {
    pub executable: PathBuf,
    pub args: Vec<String>,
    pub cwd: PathBuf,
}

/// Records spawns and brings the fake sidecar up.
#[derive(Default)]
pub struct FakeSpawner {
    pub up: Arc<AtomicBool>,
    pub calls: Mutex<Vec<SpawnCall>>,
}

impl FakeSpawner {
    pub fn calls(&self) -> Vec<SpawnCall> {
        self.calls.lock().expect("calls lock").clone()
    }
}

impl Spawner for FakeSpawner {
    fn spawn(&self, executable: &Path, args: &[String], cwd: &Path) -> io::Result<()> {
        self.calls.lock().expect("calls lock").push(SpawnCall {
            executable: executable.to_path_buf(),
            args: args.to_vec(),
            cwd: cwd.to_path_buf(),
        });
        self.up.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageCall {
    pub key: String,
    pub root_dir: PathBuf,
    pub lock: bool,
    pub peers: Vec<PeerAddr>,
}

/// Records stage requests and replays `events` through the update observer.
#[derive(Default)]
pub struct FakeUpdater {
    pub calls: Mutex<Vec<StageCall>>,
    pub events: Vec<Value>,
    pub fail: bool,
}

impl FakeUpdater {
    pub fn calls(&self) -> Vec<StageCall> {
        self.calls.lock().expect("calls lock").clone()
    }
}

#[async_trait]
impl Updater for FakeUpdater {
    async fn stage(&self, request: StageRequest<'_>) -> Result<(), UpdateError> {
        self.calls.lock().expect("calls lock").push(StageCall {
            key: request.key.to_hex(),
            root_dir: request.root_dir.to_path_buf(),
            lock: request.lock,
            peers: request.peers.to_vec(),
        });
        if let Some(observer) = request.on_update {
            for event in &self.events {
                observer(event);
            }
        }
        if self.fail {
            return Err(UpdateError::MissingBuild { path: request.root_dir.join("current") });
        }
        Ok(())
    }
}

pub struct Harness {
    pub root: TempDir,
    pub transport: Arc<FakeTransport>,
    pub spawner: Arc<FakeSpawner>,
    pub updater: Arc<FakeUpdater>,
}

impl Harness {
    /// Sidecar already running, answering with `script`.
    pub fn running(script: Vec<StreamEvent>) -> Self {
        let harness = Self::absent(script);
        harness.transport.up.store(true, Ordering::SeqCst);
        harness
    }

    /// No sidecar until the spawner runs.
    pub fn absent(script: Vec<StreamEvent>) -> Self {
        Self::with_updater(script, FakeUpdater::default())
    }

    pub fn with_updater(script: Vec<StreamEvent>, updater: FakeUpdater) -> Self {
        let up = Arc::new(AtomicBool::new(false));
        let transport = FakeTransport { up: Arc::clone(&up), script, ..FakeTransport::default() };
        let spawner = FakeSpawner { up, ..FakeSpawner::default() };
        Self {
            root: TempDir::new().expect("tempdir should be created"),
            transport: Arc::new(transport),
            spawner: Arc::new(spawner),
            updater: Arc::new(updater),
        }
    }

    pub fn root_dir(&self) -> &Path {
        self.root.path()
    }

    pub fn bootstrapper(&self) -> Bootstrapper {
        Bootstrapper::new(Collaborators {
            updater: self.updater.clone(),
            spawner: self.spawner.clone(),
            transport: self.transport.clone(),
        })
        .with_policy(fast_policy())
    }

    pub fn options(&self) -> BootstrapOptions {
        BootstrapOptions::new(key(), self.root_dir()).app_link(APP_LINK)
    }

    pub fn opens(&self) -> usize {
        self.transport.opens.load(Ordering::SeqCst)
    }

    pub fn attempts(&self) -> usize {
        self.transport.attempts.load(Ordering::SeqCst)
    }

    pub fn shutdowns(&self) -> usize {
        self.transport.shutdowns.load(Ordering::SeqCst)
    }
}

pub fn fast_policy() -> ConnectPolicy {
    ConnectPolicy {
        timeout: Duration::from_millis(500),
        retry_initial: Duration::from_millis(5),
        retry_max: Duration::from_millis(40),
        lock: LockPolicy {
            timeout: Duration::from_secs(2),
            poll_interval: Duration::from_millis(5),
            ..LockPolicy::default()
        },
    }
}
