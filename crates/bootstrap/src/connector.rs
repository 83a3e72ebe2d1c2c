// Connect-or-spawn: reach the sidecar for a root directory, launching the
// runtime under the spawn lock when nobody is listening yet.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use pear_bootstrap_common::endpoint::ChannelAddress;
use tokio::time::{sleep, timeout, timeout_at, Instant};
use tracing::{debug, info};

use crate::error::BootstrapError;
use crate::lock::{LockPolicy, SpawnLock};
use crate::spawner::Spawner;
use crate::transport::{Channel, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectPolicy {
    /// Deadline for the sidecar to come up after a spawn.
    pub timeout: Duration,
    pub retry_initial: Duration,
    pub retry_max: Duration,
    pub lock: LockPolicy,
}

impl Default for ConnectPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            retry_initial: Duration::from_millis(25),
            retry_max: Duration::from_millis(400),
            lock: LockPolicy::default(),
        }
    }
}

const MIN_RETRY_DELAY: Duration = Duration::from_millis(1);

impl ConnectPolicy {
    /// Clamp values that would spin or let a lock be judged stale while its
    /// holder is still inside the connect window.
    pub fn normalized(self) -> Self {
        let retry_initial = self.retry_initial.max(MIN_RETRY_DELAY);
        let retry_max = self.retry_max.max(retry_initial);
        let min_stale = self.timeout.saturating_mul(2);
        let lock = LockPolicy { stale_after: self.lock.stale_after.max(min_stale), ..self.lock };
        Self { retry_initial, retry_max, lock, ..self }
    }
}

/// How to bring the sidecar up if it is not running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnPlan {
    pub executable: PathBuf,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub lock_path: PathBuf,
}

/// `NotFound` and `ConnectionRefused` mean nobody is listening yet.
pub fn should_attempt_launch(kind: io::ErrorKind) -> bool {
    matches!(kind, io::ErrorKind::ConnectionRefused | io::ErrorKind::NotFound)
}

pub struct Connector<'a> {
    transport: &'a dyn Transport,
    spawner: &'a dyn Spawner,
    policy: ConnectPolicy,
}

impl<'a> Connector<'a> {
    pub fn new(transport: &'a dyn Transport, spawner: &'a dyn Spawner, policy: ConnectPolicy) -> Self {
        Self { transport, spawner, policy: policy.normalized() }
    }

    pub async fn connect_or_spawn(
        &self,
        address: &ChannelAddress,
        plan: &SpawnPlan,
    ) -> Result<Channel, BootstrapError> {
        if let Some(channel) = self.probe(address).await? {
            info!(endpoint = address.id(), "connected to running sidecar");
            return Ok(channel);
        }

        // Held until the spawned sidecar answers so that concurrent launches
        // find it instead of spawning their own.
        let _lock = SpawnLock::acquire(&plan.lock_path, self.policy.lock).await?;

        if let Some(channel) = self.probe(address).await? {
            info!(endpoint = address.id(), "sidecar started by another launcher");
            return Ok(channel);
        }

        info!(
            endpoint = address.id(),
            executable = %plan.executable.display(),
            "no sidecar listening; spawning runtime"
        );
        self.spawner.spawn(&plan.executable, &plan.args, &plan.cwd).map_err(|source| {
            BootstrapError::Spawn { executable: plan.executable.clone(), source }
        })?;

        self.wait_for_channel(address).await
    }

    /// One connect attempt. `Ok(None)` when the sidecar is absent.
    async fn probe(&self, address: &ChannelAddress) -> Result<Option<Channel>, BootstrapError> {
        let attempt = match timeout(self.policy.timeout, self.transport.connect(address)).await {
            Ok(attempt) => attempt,
            Err(_) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("connect did not complete within {}ms", millis(self.policy.timeout)),
            )),
        };
        match attempt {
            Ok(channel) => Ok(Some(channel)),
            Err(error) if should_attempt_launch(error.kind()) => {
                debug!(endpoint = address.id(), %error, "sidecar not reachable");
                Ok(None)
            }
            Err(source) => Err(BootstrapError::Connect { address: address.to_string(), source }),
        }
    }

    async fn wait_for_channel(&self, address: &ChannelAddress) -> Result<Channel, BootstrapError> {
        let deadline = Instant::now() + self.policy.timeout;
        let mut delay = self.policy.retry_initial;
        let mut attempts = 0_u32;

        loop {
            attempts += 1;
            let attempt = match timeout_at(deadline, self.transport.connect(address)).await {
                Ok(attempt) => attempt,
                Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "connect attempt stalled")),
            };
            let last_error = match attempt {
                Ok(channel) => {
                    info!(endpoint = address.id(), attempts, "connected to spawned sidecar");
                    return Ok(channel);
                }
                Err(error)
                    if should_attempt_launch(error.kind())
                        || error.kind() == io::ErrorKind::TimedOut =>
                {
                    error
                }
                Err(source) => {
                    return Err(BootstrapError::Connect { address: address.to_string(), source });
                }
            };

            let now = Instant::now();
            if now >= deadline {
                return Err(BootstrapError::ConnectTimeout {
                    address: address.to_string(),
                    timeout_ms: millis(self.policy.timeout),
                    attempts,
                    last_error: last_error.to_string(),
                });
            }
            debug!(
                endpoint = address.id(),
                attempts,
                delay_ms = millis(delay),
                "sidecar not up yet; retrying"
            );
            sleep(delay.min(deadline - now)).await;
            delay = delay.saturating_mul(2).min(self.policy.retry_max);
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
