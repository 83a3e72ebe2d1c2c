// Bootstrap a runtime root: stage, connect or spawn, hand off one app link.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use pear_bootstrap_common::endpoint::address_for;
use pear_bootstrap_common::key::PeerKey;
use pear_bootstrap_common::peers::{sidecar_args, PeerEntry, PeerList};
use pear_bootstrap_common::protocol::{FinalPayload, RunRequest, StreamEvent};
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::config::BootstrapConfig;
use crate::connector::{ConnectPolicy, Connector, SpawnPlan};
use crate::driver::{run_request, StatusObserver};
use crate::error::BootstrapError;
use crate::paths::RuntimeLayout;
use crate::spawner::{DetachedSpawner, Spawner};
use crate::transport::{LocalTransport, Transport};
use crate::updater::{CommandUpdater, StageRequest, StagedBuildCheck, UpdateObserver, Updater};

/// Required scheme of an application link.
pub const LINK_SCHEME: &str = "pear:";

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Inputs of one bootstrap run.
#[derive(Clone)]
pub struct BootstrapOptions {
    pub key: PeerKey,
    pub root_dir: PathBuf,
    pub app_link: Option<String>,
    pub use_lock: bool,
    /// Unvalidated entries; canonicalized when the run starts.
    pub dht_bootstrap: Vec<PeerEntry>,
    pub on_update: Option<UpdateObserver>,
    pub on_status: Option<StatusObserver>,
}

impl BootstrapOptions {
    pub fn new(key: PeerKey, root_dir: impl Into<PathBuf>) -> Self {
        Self {
            key,
            root_dir: root_dir.into(),
            app_link: None,
            use_lock: false,
            dht_bootstrap: Vec::new(),
            on_update: None,
            on_status: None,
        }
    }

    pub fn app_link(mut self, link: impl Into<String>) -> Self {
        self.app_link = Some(link.into());
        self
    }

    pub fn use_lock(mut self, use_lock: bool) -> Self {
        self.use_lock = use_lock;
        self
    }

    pub fn dht_bootstrap(mut self, entries: impl IntoIterator<Item = PeerEntry>) -> Self {
        self.dht_bootstrap = entries.into_iter().collect();
        self
    }

    pub fn peers(self, peers: &PeerList) -> Self {
        if peers.is_empty() {
            return self.dht_bootstrap([]);
        }
        self.dht_bootstrap([PeerEntry::Raw(peers.canonical().to_string())])
    }

    pub fn on_update(mut self, observer: impl Fn(&Value) + Send + Sync + 'static) -> Self {
        self.on_update = Some(Arc::new(observer));
        self
    }

    pub fn on_status(mut self, observer: impl Fn(&StreamEvent) + Send + Sync + 'static) -> Self {
        self.on_status = Some(Arc::new(observer));
        self
    }
}

impl fmt::Debug for BootstrapOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BootstrapOptions")
            .field("key", &self.key)
            .field("root_dir", &self.root_dir)
            .field("app_link", &self.app_link)
            .field("use_lock", &self.use_lock)
            .field("dht_bootstrap", &self.dht_bootstrap)
            .field("on_update", &self.on_update.is_some())
            .field("on_status", &self.on_status.is_some())
            .finish()
    }
}

/// Services the orchestrator depends on.
#[derive(Clone)]
pub struct Collaborators {
    pub updater: Arc<dyn Updater>,
    pub spawner: Arc<dyn Spawner>,
    pub transport: Arc<dyn Transport>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            updater: Arc::new(StagedBuildCheck::default()),
            spawner: Arc::new(DetachedSpawner),
            transport: Arc::new(LocalTransport),
        }
    }
}

impl Collaborators {
    /// Real collaborators, with `CommandUpdater` when an updater command is configured.
    pub fn from_config(config: &BootstrapConfig) -> Self {
        let updater: Arc<dyn Updater> = match &config.updater.command {
            Some(program) => Arc::new(CommandUpdater::new(program, config.updater.args.clone())),
            None => Arc::new(StagedBuildCheck::new(config.layout())),
        };
        Self { updater, ..Self::default() }
    }
}

#[derive(Clone, Default)]
pub struct Bootstrapper {
    collaborators: Collaborators,
    policy: ConnectPolicy,
    layout: RuntimeLayout,
}

impl Bootstrapper {
    pub fn new(collaborators: Collaborators) -> Self {
        Self { collaborators, policy: ConnectPolicy::default(), layout: RuntimeLayout::default() }
    }

    pub fn from_config(config: &BootstrapConfig) -> Self {
        Self {
            collaborators: Collaborators::from_config(config),
            policy: config.connect_policy(),
            layout: config.layout(),
        }
    }

    pub fn with_policy(mut self, policy: ConnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_layout(mut self, layout: RuntimeLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Run the whole bootstrap sequence for `options`.
    ///
    /// Succeeds only when the runtime answers the hand-off with a
    /// `PREFLIGHT` bail. The channel is shut down before the outcome is
    /// interpreted, whatever the outcome.
    pub async fn bootstrap(&self, options: &BootstrapOptions) -> Result<(), BootstrapError> {
        let link = validate_link(options.app_link.as_deref())?;
        let peers = PeerList::new(options.dht_bootstrap.iter().cloned())?;
        let root_dir = options.root_dir.as_path();

        self.collaborators
            .updater
            .stage(StageRequest {
                key: &options.key,
                root_dir,
                lock: options.use_lock,
                peers: peers.addrs(),
                on_update: options.on_update.as_ref(),
            })
            .await?;

        let address = address_for(root_dir);
        let plan = self.spawn_plan(root_dir, &peers);
        debug!(endpoint = address.id(), address = %address, "connecting to sidecar");
        let connector = Connector::new(
            self.collaborators.transport.as_ref(),
            self.collaborators.spawner.as_ref(),
            self.policy,
        );
        let mut channel = connector.connect_or_spawn(&address, &plan).await?;

        let id = NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed);
        let request = RunRequest::preflight(link);
        let outcome = run_request(&mut channel, id, &request, options.on_status.as_ref()).await;

        if let Err(error) = channel.shutdown().await {
            debug!(endpoint = address.id(), %error, "sidecar channel shutdown failed");
        }
        drop(channel);

        interpret(outcome?)
    }

    fn spawn_plan(&self, root_dir: &Path, peers: &PeerList) -> SpawnPlan {
        SpawnPlan {
            executable: self.layout.runtime_executable(root_dir),
            args: sidecar_args(Some(peers)),
            cwd: root_dir.to_path_buf(),
            lock_path: self.layout.lock_path(root_dir),
        }
    }
}

/// Bootstrap with the real collaborators and default policies.
pub async fn bootstrap(options: &BootstrapOptions) -> Result<(), BootstrapError> {
    Bootstrapper::default().bootstrap(options).await
}

fn validate_link(link: Option<&str>) -> Result<&str, BootstrapError> {
    match link {
        None | Some("") => Err(BootstrapError::InvalidInput("app link is required".into())),
        Some(link) if !link.starts_with(LINK_SCHEME) => {
            Err(BootstrapError::InvalidInput(format!("app link must be a pear:// link, got `{link}`")))
        }
        Some(link) => Ok(link),
    }
}

fn interpret(payload: FinalPayload) -> Result<(), BootstrapError> {
    let Some(bail) = payload.bail else {
        return Err(BootstrapError::Internal("Expected PREFLIGHT bail".into()));
    };
    if bail.is_preflight() {
        info!("runtime accepted hand-off");
        return Ok(());
    }
    warn!(code = %bail.code, "runtime rejected hand-off");
    Err(BootstrapError::OperationFailed {
        message: bail.diagnostic().to_string(),
        code: bail.code,
        info: bail.info,
    })
}
