//! Finalization State Machine
//!
//! Authoritative record of where a finalization run is. The six steps run in
//! a fixed order; the tracker refuses to skip, repeat or reorder them, and
//! remembers the step at which a run failed.
//!
//! # Step Flow
//!
//! ```text
//! NotStarted
//!     ↓
//! InitKeyring
//!     ↓
//! PopulateKeyring
//!     ↓
//! Microcode
//!     ↓
//! TerminateAgent
//!     ↓
//! MarkOrphans
//!     ↓
//! Snapshots
//!     ↓
//! Completed
//!
//! (Any step can end in Failed)
//! ```

use std::fmt;
use thiserror::Error;

/// Finalization steps in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FinalizeStep {
    /// `pacman-key --init`
    InitKeyring = 1,
    /// `pacman-key --populate [keyrings...]`
    PopulateKeyring = 2,
    /// Remove the microcode package that does not match the host CPU
    Microcode = 3,
    /// `killall -9 gpg-agent`
    TerminateAgent = 4,
    /// Flag orphaned dependencies as explicitly installed
    MarkOrphans = 5,
    /// snapper root config plus timeline/cleanup timers
    Snapshots = 6,
}

impl FinalizeStep {
    /// Returns the 1-based position of this step
    #[inline]
    pub const fn order(self) -> u8 {
        self as u8
    }

    /// Returns the step that follows this one, or None after the last step
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::InitKeyring => Some(Self::PopulateKeyring),
            Self::PopulateKeyring => Some(Self::Microcode),
            Self::Microcode => Some(Self::TerminateAgent),
            Self::TerminateAgent => Some(Self::MarkOrphans),
            Self::MarkOrphans => Some(Self::Snapshots),
            Self::Snapshots => None,
        }
    }

    /// Returns true if this step tolerates the absence of what it acts on
    /// (package, process, orphan set, snapper binary).
    pub const fn tolerates_absence(self) -> bool {
        matches!(
            self,
            Self::Microcode | Self::TerminateAgent | Self::MarkOrphans | Self::Snapshots
        )
    }

    /// Returns a human-readable description of this step
    pub const fn description(self) -> &'static str {
        match self {
            Self::InitKeyring => "Initialize keyring",
            Self::PopulateKeyring => "Populate keyring",
            Self::Microcode => "Correct microcode",
            Self::TerminateAgent => "Terminate gpg-agent",
            Self::MarkOrphans => "Mark orphans explicit",
            Self::Snapshots => "Provision snapshots",
        }
    }

    /// Returns all steps in execution order
    pub const fn all() -> &'static [Self] {
        &[
            Self::InitKeyring,
            Self::PopulateKeyring,
            Self::Microcode,
            Self::TerminateAgent,
            Self::MarkOrphans,
            Self::Snapshots,
        ]
    }
}

impl fmt::Display for FinalizeStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Errors that can occur when driving the tracker out of order
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StepTransitionError {
    /// Attempted to start a step other than the next one
    #[error("Cannot start {} (expected {})", .attempted, match .expected { Some(s) => s.description(), None => "no further step" })]
    OutOfOrder {
        expected: Option<FinalizeStep>,
        attempted: FinalizeStep,
    },

    /// Attempted to finish a step that is not running
    #[error("Step {step} is not running")]
    NotRunning { step: FinalizeStep },

    /// The run already reached Completed or Failed
    #[error("Finalization already {}", if *.failed { "failed" } else { "completed" })]
    Finished { failed: bool },
}

/// Tracks progress of a single finalization run.
///
/// ```
/// use archfinal::finalize_state::{FinalizeStep, FinalizeTracker};
///
/// let mut tracker = FinalizeTracker::new();
/// tracker.begin(FinalizeStep::InitKeyring).unwrap();
/// tracker.complete(FinalizeStep::InitKeyring).unwrap();
///
/// // Steps cannot be skipped
/// assert!(tracker.begin(FinalizeStep::Snapshots).is_err());
/// ```
#[derive(Debug, Clone, Default)]
pub struct FinalizeTracker {
    running: Option<FinalizeStep>,
    completed: Vec<FinalizeStep>,
    failed_at: Option<FinalizeStep>,
}

impl FinalizeTracker {
    /// Create a tracker in the NotStarted state
    pub fn new() -> Self {
        Self {
            running: None,
            completed: Vec::with_capacity(FinalizeStep::all().len()),
            failed_at: None,
        }
    }

    /// The step that must run next, or None once every step is done
    pub fn expected_next(&self) -> Option<FinalizeStep> {
        match self.completed.last() {
            Some(last) => last.next(),
            None => Some(FinalizeStep::InitKeyring),
        }
    }

    /// Mark `step` as running.
    pub fn begin(&mut self, step: FinalizeStep) -> Result<(), StepTransitionError> {
        self.ensure_not_finished()?;

        let expected = self.expected_next();
        if self.running.is_some() || expected != Some(step) {
            return Err(StepTransitionError::OutOfOrder {
                expected,
                attempted: step,
            });
        }

        log::debug!("Finalize step {}/{}: {}", step.order(), FinalizeStep::all().len(), step);
        self.running = Some(step);
        Ok(())
    }

    /// Mark the running `step` as done.
    pub fn complete(&mut self, step: FinalizeStep) -> Result<(), StepTransitionError> {
        self.ensure_not_finished()?;
        if self.running != Some(step) {
            return Err(StepTransitionError::NotRunning { step });
        }
        self.running = None;
        self.completed.push(step);
        Ok(())
    }

    /// Record that the run failed while `step` was running.
    ///
    /// Failing is terminal; earlier mutations stay in place.
    pub fn fail(&mut self, step: FinalizeStep) -> Result<(), StepTransitionError> {
        self.ensure_not_finished()?;
        if self.running != Some(step) {
            return Err(StepTransitionError::NotRunning { step });
        }
        log::error!("Finalization failed at step {}: {}", step.order(), step);
        self.running = None;
        self.failed_at = Some(step);
        Ok(())
    }

    fn ensure_not_finished(&self) -> Result<(), StepTransitionError> {
        if self.failed_at.is_some() {
            return Err(StepTransitionError::Finished { failed: true });
        }
        if self.is_complete() {
            return Err(StepTransitionError::Finished { failed: false });
        }
        Ok(())
    }

    /// Steps finished so far, in order
    pub fn completed(&self) -> &[FinalizeStep] {
        &self.completed
    }

    /// The step that failed, if any
    #[inline]
    pub fn failed_at(&self) -> Option<FinalizeStep> {
        self.failed_at
    }

    /// True once all six steps completed
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.completed.len() == FinalizeStep::all().len()
    }
}
