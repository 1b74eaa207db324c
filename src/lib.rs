//! archfinal Library
//!
//! Post-install finalization for an Arch Linux target root: keyring setup,
//! microcode correction, gpg-agent cleanup, orphan marking and optional
//! snapper provisioning.

pub mod cli;
pub mod config_file;
pub mod context;
pub mod error;
pub mod executor;
pub mod finalize_state;
pub mod finalizer;
pub mod hardware;
pub mod process_guard;
pub mod target_command;
pub mod target_files;

// Re-export main types for convenience
pub use config_file::FinalizeConfig;
pub use context::InstallationContext;
pub use error::{FinalizeError, Result};
pub use executor::{ChrootExecutor, CommandOutput, CommandStatus, TargetExecutor};
pub use finalize_state::{FinalizeStep, FinalizeTracker, StepTransitionError};
pub use finalizer::{FinalizeReport, Finalizer};
pub use hardware::{CpuVendor, HostProbe, SystemProbe};
pub use process_guard::{ChildRegistry, CommandProcessGroup, ProcessGuard};
pub use target_command::TargetCommand;
