//! Post-install finalization of the target system
//!
//! Runs once, after the base system and packages are installed into the
//! target root and before the installer unmounts it:
//!
//! 1. `pacman-key --init`
//! 2. `pacman-key --populate [keyrings...]`
//! 3. Remove the microcode package that does not match the CPU
//! 4. `killall -9 gpg-agent` (left behind by the keyring steps)
//! 5. Flag orphaned dependencies as explicitly installed
//! 6. If snapper is installed: root config plus timeline/cleanup timers
//!
//! # Failure Policy
//!
//! Keyring steps are **fatal**: without a trusted keyring the installed
//! system cannot verify packages. Steps 3–6 tolerate the absence of what they
//! act on (no mismatched microcode, no agent, no orphans, no snapper) and
//! treat it as a no-op. Any other non-zero exit aborts the run. Nothing is
//! retried and nothing is rolled back.

use crate::context::InstallationContext;
use crate::error::{FinalizeError, Result};
use crate::executor::TargetExecutor;
use crate::finalize_state::{FinalizeStep, FinalizeTracker};
use crate::hardware::{CpuVendor, SystemProbe};
use crate::target_command::TargetCommand;
use crate::target_files;

use std::fmt;
use std::path::{Path, PathBuf};

/// Location of the snapper binary inside the target root
pub const SNAPPER_PATH: &str = "usr/bin/snapper";

/// Agent started by `pacman-key` that must not outlive the installer
pub const GPG_AGENT: &str = "gpg-agent";

/// Snapper configuration created for the root subvolume
pub const SNAPPER_ROOT_CONFIG: &str = "root";

/// Timers enabled when snapper is present, in order
pub const SNAPPER_TIMERS: [&str; 2] = ["snapper-timeline.timer", "snapper-cleanup.timer"];

// ============================================================================
// Finalize Report
// ============================================================================

/// What a successful run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizeReport {
    /// CPU vendor detected on the installer host
    pub cpu_vendor: CpuVendor,
    /// Microcode package removed from the target, if any
    pub removed_microcode: Option<String>,
    /// Whether a running gpg-agent was killed
    pub agent_terminated: bool,
    /// Packages re-flagged as explicitly installed
    pub orphans_marked: Vec<String>,
    /// Whether snapper was configured
    pub snapshots_provisioned: bool,
}

impl fmt::Display for FinalizeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cpu={}, microcode removed={}, orphans marked={}, snapshots={}",
            self.cpu_vendor,
            self.removed_microcode.as_deref().unwrap_or("none"),
            self.orphans_marked.len(),
            if self.snapshots_provisioned { "enabled" } else { "skipped" }
        )
    }
}

// ============================================================================
// Finalizer
// ============================================================================

/// Drives the finalization sequence against one target root.
pub struct Finalizer<E, P> {
    context: InstallationContext,
    executor: E,
    probe: P,
}

impl<E: TargetExecutor, P: SystemProbe> Finalizer<E, P> {
    pub fn new(context: InstallationContext, executor: E, probe: P) -> Self {
        Self {
            context,
            executor,
            probe,
        }
    }

    pub fn context(&self) -> &InstallationContext {
        &self.context
    }

    /// Run all six steps in order.
    ///
    /// Stops at the first fatal failure; the returned error names the step.
    pub fn run(&self) -> Result<FinalizeReport> {
        log::info!(
            "Finalizing installation at {}",
            self.context.root_path().display()
        );

        let mut tracker = FinalizeTracker::new();

        self.step(&mut tracker, FinalizeStep::InitKeyring, |f| f.init_keyring())?;
        self.step(&mut tracker, FinalizeStep::PopulateKeyring, |f| {
            f.populate_keyring()
        })?;
        let (cpu_vendor, removed_microcode) =
            self.step(&mut tracker, FinalizeStep::Microcode, |f| f.handle_microcode())?;
        let agent_terminated =
            self.step(&mut tracker, FinalizeStep::TerminateAgent, |f| f.terminate(GPG_AGENT))?;
        let orphans_marked = self.step(&mut tracker, FinalizeStep::MarkOrphans, |f| {
            f.mark_orphans_as_explicit()
        })?;
        let snapshots_provisioned = self.step(&mut tracker, FinalizeStep::Snapshots, |f| {
            f.provision_snapshots()
        })?;

        let report = FinalizeReport {
            cpu_vendor,
            removed_microcode,
            agent_terminated,
            orphans_marked,
            snapshots_provisioned,
        };
        log::info!("Finalization complete: {}", report);
        Ok(report)
    }

    fn step<T>(
        &self,
        tracker: &mut FinalizeTracker,
        step: FinalizeStep,
        action: impl FnOnce(&Self) -> Result<T>,
    ) -> Result<T> {
        tracker
            .begin(step)
            .map_err(|e| FinalizeError::state(e.to_string()))?;

        match action(self) {
            Ok(value) => {
                tracker
                    .complete(step)
                    .map_err(|e| FinalizeError::state(e.to_string()))?;
                Ok(value)
            }
            Err(e) => {
                let err = e.in_step(step);
                tracker
                    .fail(step)
                    .map_err(|e| FinalizeError::state(e.to_string()))?;
                Err(err)
            }
        }
    }

    /// Run a mutating command that must succeed.
    fn require(&self, step: FinalizeStep, command: TargetCommand) -> Result<()> {
        let output = self.executor.run(&command).map_err(|e| e.in_step(step))?;
        if output.success() {
            Ok(())
        } else {
            Err(FinalizeError::StepFailed {
                step,
                command: command.to_string(),
                exit_code: output.status.exit_code.unwrap_or(-1),
                stderr: output.stderr,
            })
        }
    }

    // ------------------------------------------------------------------------
    // Steps
    // ------------------------------------------------------------------------

    /// Initialize the pacman keyring in the target.
    pub fn init_keyring(&self) -> Result<()> {
        log::info!("Initializing pacman keyring");
        self.require(FinalizeStep::InitKeyring, TargetCommand::init_keyring())
    }

    /// Populate the keyring with the configured keyrings (all, if none are set).
    pub fn populate_keyring(&self) -> Result<()> {
        let keyrings = self.context.keyring_packages();
        if keyrings.is_empty() {
            log::info!("Populating pacman keyring with default keyrings");
        } else {
            log::info!("Populating pacman keyring: {}", keyrings.join(", "));
        }
        self.require(
            FinalizeStep::PopulateKeyring,
            TargetCommand::populate_keyring(keyrings),
        )
    }

    /// Remove the microcode package of the other CPU vendor.
    ///
    /// The vendor is read from the installer host. Returns the detected vendor
    /// and the package removed, if any. A missing package or a failed removal
    /// is logged and tolerated.
    pub fn handle_microcode(&self) -> Result<(CpuVendor, Option<String>)> {
        let vendor = self.probe.cpu_vendor()?;

        let Some(package) = vendor.conflicting_microcode() else {
            log::info!("CPU vendor {} has no microcode rule, skipping", vendor);
            return Ok((vendor, None));
        };

        let query = self.executor.query(&TargetCommand::query_package(package))?;
        if !query.success() {
            log::info!("{} not installed, nothing to remove", package);
            return Ok((vendor, None));
        }

        log::info!("Removing {} from {} system", package, vendor);
        let removal = self.executor.run(&TargetCommand::remove_package(package))?;
        if removal.success() {
            Ok((vendor, Some(package.to_string())))
        } else {
            log::warn!(
                "Removing {} failed (exit code {}), continuing",
                package,
                removal.status.exit_code.unwrap_or(-1)
            );
            Ok((vendor, None))
        }
    }

    /// `killall -9 <process>` inside the target.
    ///
    /// Returns whether anything was killed; no matching process is not an error.
    pub fn terminate(&self, process: &str) -> Result<bool> {
        let output = self.executor.run(&TargetCommand::kill_process(process))?;
        if output.success() {
            log::info!("Killed {}", process);
            Ok(true)
        } else {
            log::info!("No running {} to kill", process);
            Ok(false)
        }
    }

    /// Flag every orphaned dependency as explicitly installed.
    ///
    /// Keeps later `pacman -Qdtq | pacman -Rns -` cleanups from removing
    /// packages the user may still want. Returns the packages flagged.
    pub fn mark_orphans_as_explicit(&self) -> Result<Vec<String>> {
        log::debug!("Marking orphaned packages as explicit in installed system...");

        let query = self.executor.query(&TargetCommand::query_orphans())?;
        let orphans = query.lines();
        if !query.success() && !query.stderr.trim().is_empty() {
            log::warn!("Orphan query reported: {}", query.stderr.trim());
        }

        if orphans.is_empty() {
            log::info!("No orphaned packages");
            return Ok(orphans);
        }

        log::info!("Marking {} orphan(s) explicit: {}", orphans.len(), orphans.join(" "));
        self.require(
            FinalizeStep::MarkOrphans,
            TargetCommand::mark_explicit(&orphans),
        )?;
        log::debug!("Package marking completed.");
        Ok(orphans)
    }

    /// Configure snapper for `/` and enable its timers, if snapper is installed.
    pub fn provision_snapshots(&self) -> Result<bool> {
        let snapper = self.context.target_path(SNAPPER_PATH);
        if !self.probe.path_exists(&snapper) {
            log::info!("{} not found, skipping snapshot setup", snapper.display());
            return Ok(false);
        }

        log::info!("Configuring snapper for /");
        self.require(
            FinalizeStep::Snapshots,
            TargetCommand::snapper_create_config(SNAPPER_ROOT_CONFIG, "/"),
        )?;
        for timer in SNAPPER_TIMERS {
            self.require(FinalizeStep::Snapshots, TargetCommand::enable_unit(timer))?;
        }
        Ok(true)
    }

    // ------------------------------------------------------------------------
    // Helpers outside the fixed sequence
    // ------------------------------------------------------------------------

    /// Copy a file from the live system into the same path in the target.
    pub fn copy_file(&self, relative: impl AsRef<Path>) -> anyhow::Result<Option<PathBuf>> {
        target_files::copy_file(Path::new("/"), self.context.root_path(), relative.as_ref())
    }

    /// Copy a directory tree from the live system into the target.
    pub fn copy_folder(
        &self,
        source: impl AsRef<Path>,
        target: impl AsRef<Path>,
    ) -> anyhow::Result<Option<usize>> {
        target_files::copy_folder(
            Path::new("/"),
            self.context.root_path(),
            source.as_ref(),
            target.as_ref(),
        )
    }

    /// Resolve an XDG user directory (e.g. `DESKTOP`) for `user` in the target.
    pub fn find_xdg_directory(&self, user: &str, kind: &str) -> Result<String> {
        let command = TargetCommand::xdg_user_dir(user, kind);
        let output = self.executor.query(&command)?;
        if !output.success() {
            return Err(FinalizeError::probe(format!(
                "`{}` exited with code {}",
                command,
                output.status.exit_code.unwrap_or(-1)
            )));
        }
        output
            .lines()
            .into_iter()
            .next()
            .ok_or_else(|| FinalizeError::probe(format!("`{}` printed nothing", command)))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{CommandOutput, CommandStatus};
    use std::cell::RefCell;

    /// Answers queries from a script and records mutating commands.
    #[derive(Default)]
    struct ScriptedExecutor {
        installed: Vec<&'static str>,
        orphans: &'static str,
        failing: Vec<String>,
        ran: RefCell<Vec<String>>,
    }

    fn out(code: i32, stdout: &str) -> CommandOutput {
        CommandOutput {
            status: CommandStatus::from_code(code),
            stdout: stdout.to_string(),
            stderr: String::new(),
        }
    }

    impl TargetExecutor for ScriptedExecutor {
        fn run(&self, command: &TargetCommand) -> Result<CommandOutput> {
            let line = command.to_string();
            self.ran.borrow_mut().push(line.clone());
            let code = if self.failing.contains(&line) { 1 } else { 0 };
            Ok(out(code, ""))
        }

        fn query(&self, command: &TargetCommand) -> Result<CommandOutput> {
            match command.arguments() {
                [flag, pkg] if flag == "-Q" => {
                    let installed = self.installed.iter().any(|p| *p == pkg.as_str());
                    Ok(out(if installed { 0 } else { 1 }, ""))
                }
                [flag] if flag == "-Qdtq" => {
                    Ok(out(if self.orphans.is_empty() { 1 } else { 0 }, self.orphans))
                }
                _ => Ok(out(0, "/home/alice/Desktop\n")),
            }
        }
    }

    struct FixedProbe(CpuVendor, bool);

    impl SystemProbe for FixedProbe {
        fn cpu_vendor(&self) -> Result<CpuVendor> {
            Ok(self.0)
        }

        fn path_exists(&self, _path: &Path) -> bool {
            self.1
        }
    }

    fn finalizer(
        exec: &ScriptedExecutor,
        vendor: CpuVendor,
        snapper: bool,
    ) -> Finalizer<&ScriptedExecutor, FixedProbe> {
        Finalizer::new(
            InstallationContext::new("/mnt", vec![]),
            exec,
            FixedProbe(vendor, snapper),
        )
    }

    #[test]
    fn test_microcode_amd_removes_intel() {
        let exec = ScriptedExecutor {
            installed: vec!["intel-ucode"],
            ..Default::default()
        };
        let (vendor, removed) = finalizer(&exec, CpuVendor::Amd, false)
            .handle_microcode()
            .unwrap();
        assert_eq!(vendor, CpuVendor::Amd);
        assert_eq!(removed.as_deref(), Some("intel-ucode"));
        assert_eq!(*exec.ran.borrow(), vec!["pacman -Rns --noconfirm intel-ucode"]);
    }

    #[test]
    fn test_microcode_removal_failure_is_tolerated() {
        let exec = ScriptedExecutor {
            installed: vec!["amd-ucode"],
            failing: vec!["pacman -Rns --noconfirm amd-ucode".to_string()],
            ..Default::default()
        };
        let (_, removed) = finalizer(&exec, CpuVendor::Intel, false)
            .handle_microcode()
            .unwrap();
        assert!(removed.is_none());
    }

    #[test]
    fn test_terminate_without_process() {
        let exec = ScriptedExecutor {
            failing: vec!["killall -9 gpg-agent".to_string()],
            ..Default::default()
        };
        assert!(!finalizer(&exec, CpuVendor::Unknown, false).terminate(GPG_AGENT).unwrap());
    }

    #[test]
    fn test_mark_orphans_failure_is_fatal() {
        let exec = ScriptedExecutor {
            orphans: "libfoo\nlibbar\n",
            failing: vec!["pacman -D --asexplicit libfoo libbar".to_string()],
            ..Default::default()
        };
        let err = finalizer(&exec, CpuVendor::Unknown, false)
            .mark_orphans_as_explicit()
            .unwrap_err();
        assert_eq!(err.failed_step(), Some(FinalizeStep::MarkOrphans));
    }

    #[test]
    fn test_snapshot_failure_stops_remaining_timers() {
        let exec = ScriptedExecutor {
            failing: vec!["systemctl enable snapper-timeline.timer".to_string()],
            ..Default::default()
        };
        let err = finalizer(&exec, CpuVendor::Unknown, true)
            .provision_snapshots()
            .unwrap_err();
        assert_eq!(err.failed_step(), Some(FinalizeStep::Snapshots));
        assert_eq!(exec.ran.borrow().len(), 2);
    }

    #[test]
    fn test_find_xdg_directory() {
        let exec = ScriptedExecutor::default();
        let dir = finalizer(&exec, CpuVendor::Unknown, false)
            .find_xdg_directory("alice", "DESKTOP")
            .unwrap();
        assert_eq!(dir, "/home/alice/Desktop");
    }

    #[test]
    fn test_report_display() {
        let report = FinalizeReport {
            cpu_vendor: CpuVendor::Intel,
            removed_microcode: Some("amd-ucode".to_string()),
            agent_terminated: true,
            orphans_marked: vec!["libfoo".to_string()],
            snapshots_provisioned: false,
        };
        assert_eq!(
            report.to_string(),
            "cpu=GenuineIntel, microcode removed=amd-ucode, orphans marked=1, snapshots=skipped"
        );
    }
}
