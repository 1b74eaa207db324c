//! Commands executed inside the target root.
//!
//! A `TargetCommand` is a program name plus arguments. It carries no path to
//! the target; the executor binds it to a root when it runs it. Builders for
//! every command the finalizer issues live here so the exact argv is defined
//! in one place.

use std::fmt;

/// A program plus argument list to run inside the target root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetCommand {
    program: String,
    args: Vec<String>,
}

impl TargetCommand {
    /// Create a command with no arguments
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Append one argument
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    /// Full argv, program first
    pub fn argv(&self) -> Vec<String> {
        std::iter::once(self.program.clone())
            .chain(self.args.iter().cloned())
            .collect()
    }

    // ------------------------------------------------------------------
    // Keyring
    // ------------------------------------------------------------------

    /// `pacman-key --init`
    pub fn init_keyring() -> Self {
        Self::new("pacman-key").arg("--init")
    }

    /// `pacman-key --populate [keyrings...]`
    ///
    /// With no keyrings pacman-key populates every keyring it finds.
    pub fn populate_keyring(keyrings: &[String]) -> Self {
        Self::new("pacman-key").arg("--populate").args(keyrings.iter().cloned())
    }

    // ------------------------------------------------------------------
    // Packages
    // ------------------------------------------------------------------

    /// `pacman -Q <package>`; exits non-zero when the package is not installed
    pub fn query_package(package: &str) -> Self {
        Self::new("pacman").args(["-Q", package])
    }

    /// `pacman -Rns --noconfirm <package>`
    pub fn remove_package(package: &str) -> Self {
        Self::new("pacman").args(["-Rns", "--noconfirm", package])
    }

    /// `pacman -Qdtq`; one orphan per line, exits 1 when there are none
    pub fn query_orphans() -> Self {
        Self::new("pacman").arg("-Qdtq")
    }

    /// `pacman -D --asexplicit <packages...>`
    pub fn mark_explicit(packages: &[String]) -> Self {
        Self::new("pacman")
            .args(["-D", "--asexplicit"])
            .args(packages.iter().cloned())
    }

    // ------------------------------------------------------------------
    // Processes and services
    // ------------------------------------------------------------------

    /// `killall -9 <process>`
    pub fn kill_process(process: &str) -> Self {
        Self::new("killall").args(["-9", process])
    }

    /// `systemctl enable <unit>`
    pub fn enable_unit(unit: &str) -> Self {
        Self::new("systemctl").args(["enable", unit])
    }

    /// `snapper --no-dbus -c <config> create-config <subvolume>`
    pub fn snapper_create_config(config: &str, subvolume: &str) -> Self {
        Self::new("snapper").args(["--no-dbus", "-c", config, "create-config", subvolume])
    }

    /// `su -lT <user> xdg-user-dir <kind>`
    pub fn xdg_user_dir(user: &str, kind: &str) -> Self {
        Self::new("su").args(["-lT", user, "xdg-user-dir", kind])
    }
}

impl fmt::Display for TargetCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}
