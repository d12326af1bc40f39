//! Build-environment reset
//!
//! The image builder mutates the root filesystem of its host, so after every
//! publish attempt a fixed list of root directories is re-copied from a
//! known-good snapshot location. The reset is a capability behind a trait so
//! the pipeline can be exercised without touching real root paths.
//!
//! The snapshot/reset pair manipulates global, well-known paths shared by the
//! whole execution environment; concurrent runs must be serialized by the
//! deployment (one pipeline execution per host).

use std::path::{Path, PathBuf};
use std::process::Command;

use thiserror::Error;
use tracing::{info, warn};

use crate::fsutil::copy_tree;

/// Root directories restored from the snapshot after a publish attempt.
pub const RESET_DIRS: &[&str] = &[
    "bin", "boot", "dev", "etc", "home", "lib", "lib64", "local", "media", "mnt", "opt", "root",
    "run", "sbin", "srv", "tmp", "usr", "var", "workspace",
];

#[derive(Debug, Error)]
pub enum ResetError {
    #[error("copying '{dir}' back to the build root failed: {source}")]
    Copy {
        dir: String,
        #[source]
        source: std::io::Error,
    },
}

/// Capability to snapshot and restore the build environment.
pub trait EnvironmentReset {
    /// Best-effort snapshot of the current filesystem state before a build.
    /// Failures are logged, never fatal.
    fn snapshot(&self);

    /// Restore every directory in the fixed list from the snapshot.
    /// Any copy failure is fatal to the surrounding export.
    fn reset(&self) -> Result<(), ResetError>;
}

/// Reset implementation backed by an on-disk snapshot tree.
#[derive(Debug, Clone)]
pub struct SnapshotReset {
    /// Location holding the known-good copies, e.g. `/kaniko`
    snapshot_root: PathBuf,
    /// Root the directories are restored under, e.g. `/`
    target_root: PathBuf,
    /// Script invoked to refresh the snapshot before a build
    snapshot_script: PathBuf,
}

impl SnapshotReset {
    pub fn new(snapshot_root: impl Into<PathBuf>, target_root: impl Into<PathBuf>) -> Self {
        let snapshot_root = snapshot_root.into();
        let snapshot_script = snapshot_root.join("model-packager/snapshot.sh");
        Self {
            snapshot_root,
            target_root: target_root.into(),
            snapshot_script,
        }
    }
}

impl EnvironmentReset for SnapshotReset {
    fn snapshot(&self) {
        info!("caching the root file system");
        match Command::new(&self.snapshot_script).status() {
            Ok(status) if status.success() => info!("root file system cached"),
            Ok(status) => warn!(%status, "snapshot script reported failure"),
            Err(e) => warn!(error = %e, "snapshot script could not be started"),
        }
    }

    fn reset(&self) -> Result<(), ResetError> {
        info!("resetting the build root file system");
        for dir in RESET_DIRS {
            let src = self.snapshot_root.join(dir);
            let dst = self.target_root.join(dir);
            copy_tree(&src, &dst, None).map_err(|source| ResetError::Copy {
                dir: (*dir).to_string(),
                source,
            })?;
        }
        info!("build root file system reset complete");
        Ok(())
    }
}

/// Restore a single directory from a snapshot tree. Exposed for reuse by
/// reset implementations that manage their own directory lists.
pub fn restore_dir(snapshot_root: &Path, target_root: &Path, dir: &str) -> Result<(), ResetError> {
    copy_tree(&snapshot_root.join(dir), &target_root.join(dir), None).map_err(|source| {
        ResetError::Copy {
            dir: dir.to_string(),
            source,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn restore_dir_copies_snapshot_contents() {
        let snapshot = TempDir::new().unwrap();
        let target = TempDir::new().unwrap();
        fs::create_dir_all(snapshot.path().join("etc")).unwrap();
        fs::write(snapshot.path().join("etc/app.conf"), "golden").unwrap();

        restore_dir(snapshot.path(), target.path(), "etc").unwrap();

        assert_eq!(
            fs::read_to_string(target.path().join("etc/app.conf")).unwrap(),
            "golden"
        );
    }

    #[test]
    fn restore_dir_fails_on_missing_snapshot() {
        let snapshot = TempDir::new().unwrap();
        let target = TempDir::new().unwrap();
        let err = restore_dir(snapshot.path(), target.path(), "etc").unwrap_err();
        assert!(matches!(err, ResetError::Copy { .. }));
    }

    #[test]
    fn reset_dir_list_is_fixed() {
        assert_eq!(RESET_DIRS.len(), 19);
        assert!(RESET_DIRS.contains(&"usr"));
        assert!(RESET_DIRS.contains(&"workspace"));
    }
}
