//! Scratch directories for per-fork working copies

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Prefix of every working copy directory name
pub const WORKDIR_PREFIX: &str = "forkupdate-";

/// A working copy location that is removed by [`WorkingCopy::cleanup`], or
/// when dropped if the owning future never got that far.
///
/// Holds only the path; the directory itself is created by `git clone`.
#[derive(Debug)]
pub struct WorkingCopy {
    path: PathBuf,
    removed: bool,
}

impl WorkingCopy {
    /// Deterministic location for a repository's working copy
    pub fn path_for(root: &Path, repo_name: &str) -> PathBuf {
        root.join(format!("{}{}", WORKDIR_PREFIX, repo_name))
    }

    /// Claim the working copy location for `repo_name`, clearing any stale
    /// directory left behind by an earlier run.
    pub async fn prepare(root: &Path, repo_name: &str) -> Self {
        let path = Self::path_for(root, repo_name);

        // Best effort: a missing directory is the common case
        if tokio::fs::remove_dir_all(&path).await.is_ok() {
            debug!("Removed stale working copy {}", path.display());
        }

        Self {
            path,
            removed: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the working copy. Failures are logged, never returned.
    pub async fn cleanup(mut self) {
        let result = tokio::fs::remove_dir_all(&self.path).await;
        log_removal(&self.path, result);
        self.removed = true;
    }
}

// Only reached when a sync is cancelled mid-flight; blocks briefly on purpose
impl Drop for WorkingCopy {
    fn drop(&mut self) {
        if !self.removed {
            log_removal(&self.path, std::fs::remove_dir_all(&self.path));
        }
    }
}

fn log_removal(path: &Path, result: std::io::Result<()>) {
    match result {
        Ok(()) => debug!("Removed working copy {}", path.display()),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove working copy {}: {}", path.display(), e),
    }
}
