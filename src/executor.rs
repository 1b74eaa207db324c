//! Execution of commands inside the target root.
//!
//! The finalizer never spawns processes itself; it hands `TargetCommand`s to a
//! `TargetExecutor`. `ChrootExecutor` is the production implementation. Tests
//! substitute a recording fake.
//!
//! # Contract
//!
//! - `Ok(..)` means the command ran; inspect its status for the exit code.
//! - `Err(..)` means the command could not be launched or waited on at all.

use crate::error::Result;
use crate::process_guard::{ChildRegistry, CommandProcessGroup};
use crate::target_command::TargetCommand;
use std::path::PathBuf;
use std::process::{Command, Stdio};

/// Program used to enter the target root
pub const CHROOT_PROGRAM: &str = "arch-chroot";

/// Exit status of a command run inside the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandStatus {
    /// Exit code (None if terminated by signal).
    pub exit_code: Option<i32>,
    /// Whether the command exited with code 0.
    pub success: bool,
}

impl CommandStatus {
    pub fn from_code(code: i32) -> Self {
        Self {
            exit_code: Some(code),
            success: code == 0,
        }
    }

    pub fn succeeded() -> Self {
        Self::from_code(0)
    }
}

/// Captured output of a command run inside the target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: CommandStatus,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Non-empty stdout lines, trimmed
    pub fn lines(&self) -> Vec<String> {
        self.stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(String::from)
            .collect()
    }

    pub fn success(&self) -> bool {
        self.status.success
    }
}

/// Runs commands inside the target root.
pub trait TargetExecutor {
    /// Run a command that may change the target.
    fn run(&self, command: &TargetCommand) -> Result<CommandOutput>;

    /// Run a read-only command (package or process queries).
    fn query(&self, command: &TargetCommand) -> Result<CommandOutput> {
        self.run(command)
    }
}

impl<T: TargetExecutor + ?Sized> TargetExecutor for &T {
    fn run(&self, command: &TargetCommand) -> Result<CommandOutput> {
        (**self).run(command)
    }

    fn query(&self, command: &TargetCommand) -> Result<CommandOutput> {
        (**self).query(command)
    }
}

/// Executes commands through `arch-chroot <root>`.
///
/// In dry-run mode mutating commands are only logged, while queries still
/// execute so the preview reflects the real target.
#[derive(Debug, Clone)]
pub struct ChrootExecutor {
    root: PathBuf,
    dry_run: bool,
}

impl ChrootExecutor {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            dry_run: false,
        }
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    fn build(&self, command: &TargetCommand) -> Command {
        let mut cmd = Command::new(CHROOT_PROGRAM);
        cmd.arg(&self.root)
            .arg(command.program())
            .args(command.arguments())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .in_new_process_group();
        cmd
    }

    fn execute(&self, command: &TargetCommand) -> Result<CommandOutput> {
        log::info!("target: {} (root={})", command, self.root.display());

        let child = self.build(command).spawn()?;
        let pid = child.id();
        if let Ok(mut registry) = ChildRegistry::global().lock() {
            registry.register(pid);
        }

        let waited = child.wait_with_output();

        if let Ok(mut registry) = ChildRegistry::global().lock() {
            registry.unregister(pid);
        }

        let output = waited?;
        let exit_code = output.status.code();
        let success = output.status.success();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if !success {
            log::debug!("`{}` exited with code {}", command, exit_code.unwrap_or(-1));
            if !stderr.trim().is_empty() {
                log::debug!("stderr: {}", stderr.trim());
            }
        }

        Ok(CommandOutput {
            status: CommandStatus { exit_code, success },
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr,
        })
    }
}

impl TargetExecutor for ChrootExecutor {
    fn run(&self, command: &TargetCommand) -> Result<CommandOutput> {
        if self.dry_run {
            log::info!("[DRY RUN] {} {} {}", CHROOT_PROGRAM, self.root.display(), command);
            return Ok(CommandOutput {
                status: CommandStatus::succeeded(),
                stdout: String::new(),
                stderr: String::new(),
            });
        }
        self.execute(command)
    }

    fn query(&self, command: &TargetCommand) -> Result<CommandOutput> {
        self.execute(command)
    }
}
