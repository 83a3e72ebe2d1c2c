// pear-bootstrap: make sure a runtime sidecar is running for a root
// directory and hand an application link over to it.

pub mod config;
pub mod connector;
pub mod driver;
pub mod error;
pub mod lock;
pub mod orchestrator;
pub mod paths;
pub mod spawner;
pub mod transport;
pub mod updater;

pub use config::{BootstrapConfig, ConfigError};
pub use connector::{ConnectPolicy, Connector, SpawnPlan};
pub use driver::{run_request, StatusObserver};
pub use error::BootstrapError;
pub use lock::{LockPolicy, SpawnLock};
pub use orchestrator::{bootstrap, BootstrapOptions, Bootstrapper, Collaborators};
pub use paths::RuntimeLayout;
pub use spawner::{DetachedSpawner, Spawner};
pub use transport::{Channel, ChannelIo, LocalTransport, Transport};
pub use updater::{CommandUpdater, StageRequest, StagedBuildCheck, UpdateError, UpdateObserver, Updater};
