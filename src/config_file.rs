//! Finalizer configuration file.
//!
//! The installer pipeline hands the finalizer a small JSON document:
//!
//! ```json
//! {
//!   "rootMountPoint": "/mnt",
//!   "keyrings": ["archlinux"]
//! }
//! ```
//!
//! `keyrings` is optional and defaults to empty (populate every keyring).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::context::InstallationContext;

/// Default mount point of the target system
pub const DEFAULT_ROOT_MOUNT_POINT: &str = "/mnt";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeConfig {
    pub root_mount_point: PathBuf,
    #[serde(default)]
    pub keyrings: Vec<String>,
}

impl Default for FinalizeConfig {
    fn default() -> Self {
        Self {
            root_mount_point: PathBuf::from(DEFAULT_ROOT_MOUNT_POINT),
            keyrings: Vec::new(),
        }
    }
}

impl FinalizeConfig {
    /// Save configuration to a JSON file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .context("Failed to serialize configuration to JSON")?;

        fs::write(&path, json)
            .with_context(|| format!("Failed to write configuration to {:?}", path.as_ref()))?;

        Ok(())
    }

    /// Load configuration from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read configuration from {:?}", path.as_ref()))?;

        let config: Self =
            serde_json::from_str(&content).context("Failed to parse configuration JSON")?;

        Ok(config)
    }

    /// Apply command-line overrides. Keyrings given on the command line
    /// replace the file's list rather than extending it.
    pub fn with_overrides(mut self, root: Option<PathBuf>, keyrings: Vec<String>) -> Self {
        if let Some(root) = root {
            self.root_mount_point = root;
        }
        if !keyrings.is_empty() {
            self.keyrings = keyrings;
        }
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let root = &self.root_mount_point;
        if root.as_os_str().is_empty() {
            anyhow::bail!("rootMountPoint must be specified");
        }
        if !root.is_absolute() {
            anyhow::bail!("rootMountPoint must be an absolute path, got {:?}", root);
        }
        if root == Path::new("/") {
            anyhow::bail!("rootMountPoint must not be the live system root");
        }

        for keyring in &self.keyrings {
            if keyring.trim().is_empty() {
                anyhow::bail!("Keyring names must not be empty");
            }
            if keyring.chars().any(char::is_whitespace) {
                anyhow::bail!("Invalid keyring name {:?}: contains whitespace", keyring);
            }
        }

        Ok(())
    }

    /// Build the read-only context the finalizer runs with
    pub fn into_context(self) -> InstallationContext {
        InstallationContext::new(self.root_mount_point, self.keyrings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = FinalizeConfig::default();
        assert_eq!(config.root_mount_point, PathBuf::from("/mnt"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_keyrings_default_to_empty() {
        let config: FinalizeConfig =
            serde_json::from_str(r#"{"rootMountPoint": "/tmp/calamares-root"}"#).unwrap();
        assert!(config.keyrings.is_empty());
        assert_eq!(config.root_mount_point, PathBuf::from("/tmp/calamares-root"));
    }

    #[test]
    fn test_missing_root_is_parse_error() {
        let result: std::result::Result<FinalizeConfig, _> =
            serde_json::from_str(r#"{"keyrings": ["archlinux"]}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_rejects_relative_and_live_root() {
        let relative = FinalizeConfig {
            root_mount_point: PathBuf::from("mnt"),
            keyrings: vec![],
        };
        assert!(relative.validate().is_err());

        let live = FinalizeConfig {
            root_mount_point: PathBuf::from("/"),
            keyrings: vec![],
        };
        assert!(live.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_keyrings() {
        let config = FinalizeConfig {
            keyrings: vec!["arch linux".to_string()],
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = FinalizeConfig {
            keyrings: vec![" ".to_string()],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_overrides() {
        let config = FinalizeConfig {
            root_mount_point: PathBuf::from("/mnt"),
            keyrings: vec!["archlinux".to_string()],
        };

        let kept = config.clone().with_overrides(None, vec![]);
        assert_eq!(kept, config);

        let replaced = config.with_overrides(
            Some(PathBuf::from("/target")),
            vec!["manjaro".to_string(), "archlinux".to_string()],
        );
        assert_eq!(replaced.root_mount_point, PathBuf::from("/target"));
        assert_eq!(replaced.keyrings, vec!["manjaro", "archlinux"]);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("finalize.json");
        let config = FinalizeConfig {
            root_mount_point: PathBuf::from("/mnt/target"),
            keyrings: vec!["archlinux".to_string()],
        };
        config.save_to_file(&path).unwrap();

        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"rootMountPoint\""));
        assert_eq!(FinalizeConfig::load_from_file(&path).unwrap(), config);
    }

    #[test]
    fn test_into_context() {
        let ctx = FinalizeConfig::default().into_context();
        assert_eq!(ctx.root_path(), Path::new("/mnt"));
        assert!(ctx.keyring_packages().is_empty());
    }
}
