//! Read-only installation context handed to the finalizer.

use std::path::{Path, PathBuf};

/// Facts about the installation the finalizer acts on.
///
/// Built once from the loaded configuration and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallationContext {
    root_path: PathBuf,
    keyring_packages: Vec<String>,
}

impl InstallationContext {
    pub fn new(root_path: impl Into<PathBuf>, keyring_packages: Vec<String>) -> Self {
        Self {
            root_path: root_path.into(),
            keyring_packages,
        }
    }

    /// Mount point of the target system (e.g. `/mnt`)
    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    /// Keyrings to populate, in configured order. May be empty.
    pub fn keyring_packages(&self) -> &[String] {
        &self.keyring_packages
    }

    /// Resolve a path relative to the target root.
    ///
    /// Leading slashes on `relative` are ignored so `/usr/bin/snapper` and
    /// `usr/bin/snapper` both land inside the target.
    pub fn target_path(&self, relative: impl AsRef<Path>) -> PathBuf {
        let relative = relative.as_ref();
        let relative = relative.strip_prefix("/").unwrap_or(relative);
        self.root_path.join(relative)
    }
}
