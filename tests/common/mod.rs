//! Shared fakes for finalizer integration tests.

#![allow(dead_code)]

use archfinal::{CommandOutput, CommandStatus, CpuVendor, SystemProbe, TargetCommand, TargetExecutor};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

/// Which executor method a command went through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Run,
    Query,
}

/// Records every command and answers from a fixed script.
///
/// Unscripted commands succeed with empty output.
#[derive(Default)]
pub struct RecordingExecutor {
    responses: HashMap<String, (i32, String)>,
    launch_failures: HashSet<String>,
    calls: RefCell<Vec<(Kind, String)>>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the exit code and stdout for a command line
    pub fn respond(mut self, command: &str, code: i32, stdout: &str) -> Self {
        self.responses
            .insert(command.to_string(), (code, stdout.to_string()));
        self
    }

    /// Make a command line fail with exit code 1
    pub fn fail(self, command: &str) -> Self {
        self.respond(command, 1, "")
    }

    /// Make a command impossible to launch (executor-level error)
    pub fn unlaunchable(mut self, command: &str) -> Self {
        self.launch_failures.insert(command.to_string());
        self
    }

    /// Everything issued through `run`, in order
    pub fn mutations(&self) -> Vec<String> {
        self.calls
            .borrow()
            .iter()
            .filter(|(kind, _)| *kind == Kind::Run)
            .map(|(_, cmd)| cmd.clone())
            .collect()
    }

    /// Everything issued, in order
    pub fn calls(&self) -> Vec<(Kind, String)> {
        self.calls.borrow().clone()
    }

    fn answer(&self, kind: Kind, command: &TargetCommand) -> archfinal::Result<CommandOutput> {
        let line = command.to_string();
        self.calls.borrow_mut().push((kind, line.clone()));

        if self.launch_failures.contains(&line) {
            return Err(std::io::Error::new(std::io::ErrorKind::NotFound, "arch-chroot: not found").into());
        }

        let (code, stdout) = self
            .responses
            .get(&line)
            .cloned()
            .unwrap_or((0, String::new()));
        Ok(CommandOutput {
            status: CommandStatus::from_code(code),
            stdout,
            stderr: if code == 0 { String::new() } else { format!("{} failed", line) },
        })
    }
}

impl TargetExecutor for RecordingExecutor {
    fn run(&self, command: &TargetCommand) -> archfinal::Result<CommandOutput> {
        self.answer(Kind::Run, command)
    }

    fn query(&self, command: &TargetCommand) -> archfinal::Result<CommandOutput> {
        self.answer(Kind::Query, command)
    }
}

/// Probe with a fixed vendor and a fixed set of existing paths.
pub struct FakeProbe {
    pub vendor: Option<CpuVendor>,
    pub existing: Vec<PathBuf>,
}

impl FakeProbe {
    pub fn vendor(vendor: CpuVendor) -> Self {
        Self {
            vendor: Some(vendor),
            existing: Vec::new(),
        }
    }

    /// A probe whose CPU information cannot be read
    pub fn unreadable_cpuinfo() -> Self {
        Self {
            vendor: None,
            existing: Vec::new(),
        }
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.existing.push(path.into());
        self
    }
}

impl SystemProbe for FakeProbe {
    fn cpu_vendor(&self) -> archfinal::Result<CpuVendor> {
        self.vendor
            .ok_or_else(|| archfinal::FinalizeError::probe("cannot read /proc/cpuinfo"))
    }

    fn path_exists(&self, path: &Path) -> bool {
        self.existing.iter().any(|p| p == path)
    }
}

// Command lines as the finalizer issues them
pub const INIT_KEYRING: &str = "pacman-key --init";
pub const POPULATE_KEYRING: &str = "pacman-key --populate";
pub const KILL_AGENT: &str = "killall -9 gpg-agent";
pub const QUERY_ORPHANS: &str = "pacman -Qdtq";
pub const CREATE_CONFIG: &str = "snapper --no-dbus -c root create-config /";
pub const ENABLE_TIMELINE: &str = "systemctl enable snapper-timeline.timer";
pub const ENABLE_CLEANUP: &str = "systemctl enable snapper-cleanup.timer";
