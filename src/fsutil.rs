//! Recursive copy helpers for build-context assembly

use std::fs;
use std::io;
use std::path::Path;

use walkdir::WalkDir;

/// Recursively copy `src` into `dst`, creating directories as needed.
///
/// Entries whose path contains `exclude` as a component-level substring are
/// skipped together with everything below them.
pub fn copy_tree(src: &Path, dst: &Path, exclude: Option<&str>) -> io::Result<()> {
    fs::create_dir_all(dst)?;

    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry.map_err(io::Error::other)?;
        let path = entry.path();

        if let Some(needle) = exclude {
            if path
                .components()
                .any(|c| c.as_os_str().to_string_lossy().contains(needle))
            {
                continue;
            }
        }

        let rel = path
            .strip_prefix(src)
            .map_err(|e| io::Error::other(e.to_string()))?;
        if rel.as_os_str().is_empty() {
            continue;
        }

        let target = dst.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(path, &target)?;
        }
    }

    Ok(())
}
