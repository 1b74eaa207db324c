//! Host environment probes
//!
//! Detects the CPU vendor of the machine running the installer and checks
//! for files inside the target root. Both are read-only.
//!
//! # Caveat
//!
//! The CPU vendor comes from the *installer host's* `/proc/cpuinfo`, not from
//! the target. On a live ISO booted on the machine being installed these are
//! the same CPU. For installs prepared on a different machine (or a VM with a
//! different vendor string) the microcode choice follows the host.

use crate::error::{FinalizeError, Result};
use std::path::Path;
use strum::{AsRefStr, Display};

/// Path the kernel exposes CPU information at
pub const CPUINFO_PATH: &str = "/proc/cpuinfo";

/// CPU vendor as reported by the `vendor_id` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr)]
pub enum CpuVendor {
    #[strum(serialize = "AuthenticAMD")]
    Amd,
    #[strum(serialize = "GenuineIntel")]
    Intel,
    Unknown,
}

impl CpuVendor {
    /// Map a raw `vendor_id` value. Anything unrecognised is `Unknown`.
    pub fn from_vendor_id(vendor_id: &str) -> Self {
        match vendor_id.trim() {
            "AuthenticAMD" => Self::Amd,
            "GenuineIntel" => Self::Intel,
            _ => Self::Unknown,
        }
    }

    /// The microcode package for the *other* vendor, which must not stay
    /// installed on this CPU.
    pub fn conflicting_microcode(self) -> Option<&'static str> {
        match self {
            Self::Amd => Some("intel-ucode"),
            Self::Intel => Some("amd-ucode"),
            Self::Unknown => None,
        }
    }
}

/// Extract the first `vendor_id` value from `/proc/cpuinfo` contents.
///
/// Returns None when no `vendor_id` line exists (e.g. on some ARM kernels).
pub fn parse_vendor_id(cpuinfo: &str) -> Option<&str> {
    cpuinfo
        .lines()
        .find(|line| line.trim_start().starts_with("vendor_id"))
        .and_then(|line| line.split_once(':'))
        .and_then(|(_, value)| value.split_whitespace().next())
}

/// Probes the finalizer needs from its environment.
pub trait SystemProbe {
    /// Detect the CPU vendor of the machine running the installer.
    ///
    /// Fails only if CPU information cannot be read at all.
    fn cpu_vendor(&self) -> Result<CpuVendor>;

    /// Check whether an absolute path exists.
    fn path_exists(&self, path: &Path) -> bool;
}

impl<T: SystemProbe + ?Sized> SystemProbe for &T {
    fn cpu_vendor(&self) -> Result<CpuVendor> {
        (**self).cpu_vendor()
    }

    fn path_exists(&self, path: &Path) -> bool {
        (**self).path_exists(path)
    }
}

/// Probes backed by the real host filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostProbe;

impl SystemProbe for HostProbe {
    fn cpu_vendor(&self) -> Result<CpuVendor> {
        let cpuinfo = std::fs::read_to_string(CPUINFO_PATH).map_err(|e| {
            FinalizeError::probe(format!("cannot read {}: {}", CPUINFO_PATH, e))
        })?;

        let vendor = match parse_vendor_id(&cpuinfo) {
            Some(raw) => {
                log::info!("Detected CPU vendor: {}", raw);
                CpuVendor::from_vendor_id(raw)
            }
            None => {
                log::warn!("No vendor_id field in {}", CPUINFO_PATH);
                CpuVendor::Unknown
            }
        };
        Ok(vendor)
    }

    fn path_exists(&self, path: &Path) -> bool {
        path.exists()
    }
}
