//! Error handling module for archfinal
//!
//! Provides centralized error handling with proper error types using thiserror.
//! Tolerated absences (missing package, process or snapper binary) never reach
//! this type; everything here aborts the finalization run.

use crate::finalize_state::FinalizeStep;
use thiserror::Error;

/// Main error type for the finalizer
#[derive(Error, Debug)]
pub enum FinalizeError {
    /// IO errors (spawning commands, file copies)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors (loading, parsing, validation)
    #[error("Configuration error: {0}")]
    Config(String),

    /// A probe could not be attempted (e.g. unreadable /proc/cpuinfo)
    #[error("Probe error: {0}")]
    Probe(String),

    /// A required command inside the target exited non-zero
    #[error("Step '{}' failed: `{}` exited with code {}{}", .step, .command, .exit_code, stderr_suffix(.stderr))]
    StepFailed {
        step: FinalizeStep,
        command: String,
        exit_code: i32,
        stderr: String,
    },

    /// The executor could not launch a command for a step at all
    #[error("Step '{}' could not run: {}", .step, .source)]
    StepAborted {
        step: FinalizeStep,
        #[source]
        source: Box<FinalizeError>,
    },

    /// Finalizer state transition errors
    #[error("State error: {0}")]
    State(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn stderr_suffix(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(": {}", trimmed)
    }
}

/// Result type alias for finalizer operations
pub type Result<T> = std::result::Result<T, FinalizeError>;

// Convenient error constructors
impl FinalizeError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a probe error
    pub fn probe(msg: impl Into<String>) -> Self {
        Self::Probe(msg.into())
    }

    /// Create a state error
    pub fn state(msg: impl Into<String>) -> Self {
        Self::State(msg.into())
    }

    /// Wrap an error raised while a step was executing.
    ///
    /// Errors that already name their step are returned unchanged.
    pub fn in_step(self, step: FinalizeStep) -> Self {
        match self {
            Self::StepFailed { .. } | Self::StepAborted { .. } => self,
            other => Self::StepAborted {
                step,
                source: Box::new(other),
            },
        }
    }

    /// The step at which the run stopped, if the error is step-scoped.
    pub fn failed_step(&self) -> Option<FinalizeStep> {
        match self {
            Self::StepFailed { step, .. } | Self::StepAborted { step, .. } => Some(*step),
            _ => None,
        }
    }
}
