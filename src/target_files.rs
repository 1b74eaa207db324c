//! Copying files from the live environment into the target root.
//!
//! Sources are resolved against a host root (normally `/`) and copied to the
//! same relative location under the target root. A missing source is not an
//! error: live-ISO customisations are optional.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

fn strip_root(path: &Path) -> &Path {
    path.strip_prefix("/").unwrap_or(path)
}

/// Copy `<host_root>/<relative>` to `<target_root>/<relative>`.
///
/// Returns the destination path, or None if the source does not exist.
pub fn copy_file(host_root: &Path, target_root: &Path, relative: &Path) -> Result<Option<PathBuf>> {
    let relative = strip_root(relative);
    let source = host_root.join(relative);
    if !source.exists() {
        log::debug!("Skipping copy of {}: not present on host", source.display());
        return Ok(None);
    }

    let dest = target_root.join(relative);
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    fs::copy(&source, &dest).with_context(|| {
        format!("Failed to copy {} to {}", source.display(), dest.display())
    })?;

    log::info!("Copied {} -> {}", source.display(), dest.display());
    Ok(Some(dest))
}

/// Recursively copy `<host_root>/<source>` into `<target_root>/<target>`.
///
/// Symlinks are recreated rather than followed. Existing directories are
/// merged and existing files overwritten. Returns the number of entries
/// copied, or None if the source does not exist.
pub fn copy_folder(
    host_root: &Path,
    target_root: &Path,
    source: &Path,
    target: &Path,
) -> Result<Option<usize>> {
    let source_dir = host_root.join(strip_root(source));
    if !source_dir.exists() {
        log::debug!("Skipping copy of {}: not present on host", source_dir.display());
        return Ok(None);
    }
    let dest_dir = target_root.join(strip_root(target));

    let mut copied = 0;
    for entry in WalkDir::new(&source_dir).follow_links(false) {
        let entry = entry.with_context(|| format!("Failed to walk {}", source_dir.display()))?;
        let rel = entry
            .path()
            .strip_prefix(&source_dir)
            .context("walkdir yielded a path outside the source")?;
        let dest = dest_dir.join(rel);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&dest)
                .with_context(|| format!("Failed to create {}", dest.display()))?;
            continue;
        }

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        if file_type.is_symlink() {
            let link = fs::read_link(entry.path())
                .with_context(|| format!("Failed to read link {}", entry.path().display()))?;
            if dest.symlink_metadata().is_ok() {
                fs::remove_file(&dest)
                    .with_context(|| format!("Failed to replace {}", dest.display()))?;
            }
            std::os::unix::fs::symlink(&link, &dest)
                .with_context(|| format!("Failed to link {}", dest.display()))?;
        } else {
            fs::copy(entry.path(), &dest).with_context(|| {
                format!("Failed to copy {} to {}", entry.path().display(), dest.display())
            })?;
        }
        copied += 1;
    }

    log::info!(
        "Copied {} entries {} -> {}",
        copied,
        source_dir.display(),
        dest_dir.display()
    );
    Ok(Some(copied))
}
