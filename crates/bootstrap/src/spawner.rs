// Detached launch of the runtime in sidecar mode.

use std::io;
use std::path::Path;
use std::process::{Command, Stdio};

use tracing::info;

/// Starts a background process without waiting on it.
pub trait Spawner: Send + Sync {
    fn spawn(&self, executable: &Path, args: &[String], cwd: &Path) -> io::Result<()>;
}

/// Real spawner: null stdio, own process group, child handle dropped.
#[derive(Debug, Clone, Copy, Default)]
pub struct DetachedSpawner;

impl Spawner for DetachedSpawner {
    fn spawn(&self, executable: &Path, args: &[String], cwd: &Path) -> io::Result<()> {
        let mut command = Command::new(executable);
        command.args(args).current_dir(cwd);
        command.stdin(Stdio::null());
        command.stdout(Stdio::null());
        command.stderr(Stdio::null());
        detach(&mut command);

        let child = command.spawn()?;
        info!(
            pid = child.id(),
            executable = %executable.display(),
            args = ?args,
            "spawned runtime sidecar"
        );
        Ok(())
    }
}

#[cfg(unix)]
fn detach(command: &mut Command) {
    use std::os::unix::process::CommandExt;
    command.process_group(0);
}

#[cfg(windows)]
fn detach(command: &mut Command) {
    use std::os::windows::process::CommandExt;
    const DETACHED_PROCESS: u32 = 0x0000_0008;
    const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
    command.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP);
}

#[cfg(not(any(unix, windows)))]
fn detach(_command: &mut Command) {}
