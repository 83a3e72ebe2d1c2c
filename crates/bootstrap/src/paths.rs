// On-disk layout of a runtime root directory.

use std::path::{Path, PathBuf};

pub const RUNTIME_NAME: &str = "pear-runtime";
pub const DEFAULT_LOCK_FILE: &str = "pear-bootstrap.lock";
/// Directory (or link) pointing at the active staged build.
pub const CURRENT_DIR: &str = "current";

/// Names used inside a root directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeLayout {
    pub runtime_name: String,
    /// Relative to the root; an absolute path is used as is.
    pub lock_file: PathBuf,
}

impl Default for RuntimeLayout {
    fn default() -> Self {
        Self { runtime_name: RUNTIME_NAME.to_string(), lock_file: PathBuf::from(DEFAULT_LOCK_FILE) }
    }
}

impl RuntimeLayout {
    pub fn current_dir(&self, root_dir: &Path) -> PathBuf {
        root_dir.join(CURRENT_DIR)
    }

    /// `<root>/current/by-arch/<triple>/bin/<runtime>[.exe]`
    pub fn runtime_executable(&self, root_dir: &Path) -> PathBuf {
        let mut file_name = self.runtime_name.clone();
        if cfg!(windows) {
            file_name.push_str(".exe");
        }
        self.current_dir(root_dir).join("by-arch").join(host_triple()).join("bin").join(file_name)
    }

    pub fn lock_path(&self, root_dir: &Path) -> PathBuf {
        root_dir.join(&self.lock_file)
    }
}

/// `<platform>-<arch>` using the runtime's naming (`darwin-arm64`, `win32-x64`, ...).
pub fn host_triple() -> String {
    format!("{}-{}", platform_name(std::env::consts::OS), arch_name(std::env::consts::ARCH))
}

fn platform_name(os: &str) -> &str {
    match os {
        "macos" => "darwin",
        "windows" => "win32",
        other => other,
    }
}

fn arch_name(arch: &str) -> &str {
    match arch {
        "x86_64" => "x64",
        "aarch64" => "arm64",
        "x86" => "ia32",
        "arm" => "arm",
        other => other,
    }
}
