// Exclusive spawn lock: a file created with `create_new` inside the root
// directory. Whoever creates it owns the spawn decision until the guard drops.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::error::BootstrapError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockPolicy {
    /// Give up waiting for a sibling after this long.
    pub timeout: Duration,
    /// Age after which a lock whose holder cannot be identified is abandoned.
    /// A readable pid always decides instead.
    pub stale_after: Duration,
    pub poll_interval: Duration,
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            stale_after: Duration::from_secs(60),
            poll_interval: Duration::from_millis(50),
        }
    }
}

/// Held spawn lock. Dropping it removes the lock file.
#[derive(Debug)]
pub struct SpawnLock {
    path: PathBuf,
}

impl SpawnLock {
    /// Wait until the lock file can be created, or `policy.timeout` elapses.
    pub async fn acquire(path: &Path, policy: LockPolicy) -> Result<Self, BootstrapError> {
        let deadline = Instant::now() + policy.timeout;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|source| BootstrapError::Lock { path: path.to_path_buf(), source })?;
        }

        loop {
            match try_create(path) {
                Ok(()) => {
                    info!(file = %path.display(), "acquired spawn lock");
                    return Ok(Self { path: path.to_path_buf() });
                }
                Err(error) if error.kind() == io::ErrorKind::AlreadyExists => {
                    if is_abandoned(path, policy.stale_after) {
                        warn!(file = %path.display(), "removing stale spawn lock");
                        match fs::remove_file(path) {
                            Ok(()) => continue,
                            Err(error) if error.kind() == io::ErrorKind::NotFound => continue,
                            Err(source) => {
                                return Err(BootstrapError::Lock { path: path.to_path_buf(), source })
                            }
                        }
                    }
                    if Instant::now() >= deadline {
                        return Err(BootstrapError::LockTimeout {
                            path: path.to_path_buf(),
                            timeout_ms: millis(policy.timeout),
                        });
                    }
                    debug!(file = %path.display(), "spawn lock held elsewhere; waiting");
                    sleep(policy.poll_interval).await;
                }
                Err(source) => {
                    return Err(BootstrapError::Lock { path: path.to_path_buf(), source });
                }
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SpawnLock {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Err(error) if error.kind() != io::ErrorKind::NotFound => {
                warn!(file = %self.path.display(), error = %error, "failed to remove spawn lock");
            }
            _ => debug!(file = %self.path.display(), "released spawn lock"),
        }
    }
}

fn try_create(path: &Path) -> io::Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    writeln!(file, "{}", std::process::id())?;
    Ok(())
}

/// A lock is abandoned when its holder's pid is gone. Without a usable pid
/// (half-written file, unsupported platform) the file age decides.
fn is_abandoned(path: &Path, stale_after: Duration) -> bool {
    match read_pid(path).and_then(holder_alive) {
        Some(true) => false,
        Some(false) => {
            debug!(file = %path.display(), "spawn lock holder is gone");
            true
        }
        None => is_older_than(path, stale_after),
    }
}

fn read_pid(path: &Path) -> Option<u32> {
    let content = fs::read_to_string(path).ok()?;
    content.trim().parse::<u32>().ok().filter(|pid| *pid != 0)
}

#[cfg(unix)]
fn holder_alive(pid: u32) -> Option<bool> {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let raw = i32::try_from(pid).ok()?;
    match kill(Pid::from_raw(raw), None) {
        Ok(()) | Err(Errno::EPERM) => Some(true),
        Err(Errno::ESRCH) => Some(false),
        Err(_) => None,
    }
}

#[cfg(not(unix))]
fn holder_alive(_pid: u32) -> Option<bool> {
    None
}

fn is_older_than(path: &Path, stale_after: Duration) -> bool {
    fs::metadata(path)
        .and_then(|metadata| metadata.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .is_some_and(|age| age > stale_after)
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
