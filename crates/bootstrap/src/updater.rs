// Runtime staging collaborators. The launcher never downloads anything
// itself; it asks an updater to make sure `<root>/current` holds the build
// for the platform key, and relays whatever progress the updater reports.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use pear_bootstrap_common::key::PeerKey;
use pear_bootstrap_common::peers::{PeerAddr, DHT_BOOTSTRAP_FLAG};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

use crate::paths::RuntimeLayout;

/// Receives updater progress events.
pub type UpdateObserver = Arc<dyn Fn(&Value) + Send + Sync>;

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("no staged runtime build at {path:?}")]
    MissingBuild { path: PathBuf },

    #[error("failed to launch updater {program:?}: {source}")]
    Launch {
        program: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("updater {program:?} exited with {status}")]
    Exit { program: PathBuf, status: String },

    #[error("failed to read updater output: {0}")]
    Io(#[from] io::Error),
}

/// Everything an updater needs to stage a build.
pub struct StageRequest<'a> {
    pub key: &'a PeerKey,
    pub root_dir: &'a Path,
    /// Hold the platform lock while staging.
    pub lock: bool,
    pub peers: &'a [PeerAddr],
    pub on_update: Option<&'a UpdateObserver>,
}

impl StageRequest<'_> {
    fn emit(&self, event: &Value) {
        if let Some(observer) = self.on_update {
            observer(event);
        }
    }
}

impl fmt::Debug for StageRequest<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageRequest")
            .field("key", self.key)
            .field("root_dir", &self.root_dir)
            .field("lock", &self.lock)
            .field("peers", &self.peers)
            .field("on_update", &self.on_update.is_some())
            .finish()
    }
}

#[async_trait]
pub trait Updater: Send + Sync {
    async fn stage(&self, request: StageRequest<'_>) -> Result<(), UpdateError>;
}

/// Accepts whatever is already staged, failing only when nothing is.
#[derive(Debug, Clone, Default)]
pub struct StagedBuildCheck {
    layout: RuntimeLayout,
}

impl StagedBuildCheck {
    pub fn new(layout: RuntimeLayout) -> Self {
        Self { layout }
    }
}

#[async_trait]
impl Updater for StagedBuildCheck {
    async fn stage(&self, request: StageRequest<'_>) -> Result<(), UpdateError> {
        let current = self.layout.current_dir(request.root_dir);
        if !tokio::fs::try_exists(&current).await.unwrap_or(false) {
            return Err(UpdateError::MissingBuild { path: current });
        }
        debug!(current = %current.display(), "using staged runtime build");
        request.emit(&json!({
            "event": "staged",
            "key": request.key.to_hex(),
            "current": current.display().to_string(),
        }));
        Ok(())
    }
}

/// Runs an external staging program and relays its stdout.
///
/// The program is invoked as
/// `<program> <args..> --key <hex> --dir <root> [--lock] [--dht-bootstrap <peers>]`
/// and may print one JSON object per line; other lines are relayed as
/// `{"message": <line>}`.
#[derive(Debug, Clone)]
pub struct CommandUpdater {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandUpdater {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self { program: program.into(), args }
    }

    fn command(&self, request: &StageRequest<'_>) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        command.arg("--key").arg(request.key.to_hex());
        command.arg("--dir").arg(request.root_dir);
        if request.lock {
            command.arg("--lock");
        }
        if !request.peers.is_empty() {
            let peers = request.peers.iter().map(ToString::to_string).collect::<Vec<_>>();
            command.arg(DHT_BOOTSTRAP_FLAG).arg(peers.join(","));
        }
        command.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::inherit());
        command.kill_on_drop(true);
        command
    }
}

#[async_trait]
impl Updater for CommandUpdater {
    async fn stage(&self, request: StageRequest<'_>) -> Result<(), UpdateError> {
        let mut child = self
            .command(&request)
            .spawn()
            .map_err(|source| UpdateError::Launch { program: self.program.clone(), source })?;
        info!(program = %self.program.display(), "running updater");

        if let Some(stdout) = child.stdout.take() {
            let mut lines = BufReader::new(stdout).lines();
            while let Some(line) = lines.next_line().await? {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let event = serde_json::from_str::<Value>(line)
                    .unwrap_or_else(|_| json!({ "message": line }));
                debug!(?event, "updater event");
                request.emit(&event);
            }
        }

        let status = child.wait().await?;
        if !status.success() {
            return Err(UpdateError::Exit { program: self.program.clone(), status: status.to_string() });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    const KEY: &str = "1f3a5c7e9b0d2f4a6c8e0b1d3f5a7c9e1b3d5f7a9c0e2b4d6f8a0c2e4b6d8f0a";

    fn recorder() -> (UpdateObserver, Arc<Mutex<Vec<Value>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let observer: UpdateObserver = Arc::new(move |event: &Value| {
            sink.lock().expect("events lock").push(event.clone());
        });
        (observer, events)
    }

    #[tokio::test]
    async fn staged_check_fails_without_current_build() {
        let dir = tempfile::tempdir().expect("temp dir");
        let key: PeerKey = KEY.parse().expect("key");
        let request =
            StageRequest { key: &key, root_dir: dir.path(), lock: false, peers: &[], on_update: None };

        let error = StagedBuildCheck::default().stage(request).await.expect_err("nothing staged");
        assert!(matches!(error, UpdateError::MissingBuild { .. }));
    }

    #[tokio::test]
    async fn staged_check_reports_current_build() {
        let dir = tempfile::tempdir().expect("temp dir");
        std::fs::create_dir_all(dir.path().join("current")).expect("current dir");
        let key: PeerKey = KEY.parse().expect("key");
        let (observer, events) = recorder();
        let request = StageRequest {
            key: &key,
            root_dir: dir.path(),
            lock: true,
            peers: &[],
            on_update: Some(&observer),
        };

        StagedBuildCheck::default().stage(request).await.expect("staged");
        let events = events.lock().expect("events lock");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["event"], "staged");
        assert_eq!(events[0]["key"], KEY);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_updater_relays_stdout_and_passes_flags() {
        let dir = tempfile::tempdir().expect("temp dir");
        let key: PeerKey = KEY.parse().expect("key");
        let peers = [PeerAddr { host: "127.0.0.1".into(), port: 9999 }];
        let (observer, events) = recorder();
        let updater = CommandUpdater::new(
            "/bin/sh",
            vec![
                "-c".into(),
                r#"echo '{"progress":50}'; echo; echo "$@""#.into(),
                "stage".into(),
            ],
        );
        let request = StageRequest {
            key: &key,
            root_dir: dir.path(),
            lock: true,
            peers: &peers,
            on_update: Some(&observer),
        };

        updater.stage(request).await.expect("updater should succeed");

        let events = events.lock().expect("events lock");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], json!({ "progress": 50 }));
        let expected = format!(
            "--key {KEY} --dir {} --lock --dht-bootstrap 127.0.0.1:9999",
            dir.path().display()
        );
        assert_eq!(events[1], json!({ "message": expected }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_updater_failure_is_reported() {
        let dir = tempfile::tempdir().expect("temp dir");
        let key: PeerKey = KEY.parse().expect("key");
        let updater = CommandUpdater::new("/bin/sh", vec!["-c".into(), "exit 3".into()]);
        let request =
            StageRequest { key: &key, root_dir: dir.path(), lock: false, peers: &[], on_update: None };

        let error = updater.stage(request).await.expect_err("non-zero exit");
        assert!(matches!(error, UpdateError::Exit { .. }), "{error}");
    }

    #[tokio::test]
    async fn command_updater_missing_program_is_launch_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        let key: PeerKey = KEY.parse().expect("key");
        let updater = CommandUpdater::new(dir.path().join("no-such-updater"), Vec::new());
        let request =
            StageRequest { key: &key, root_dir: dir.path(), lock: false, peers: &[], on_update: None };

        let error = updater.stage(request).await.expect_err("missing program");
        assert!(matches!(error, UpdateError::Launch { .. }));
    }
}
