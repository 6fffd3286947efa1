//! Supervisor error types for typed error handling.
//!
//! None of these errors stop the supervisor loop. Each one is logged where it
//! occurs and the loop moves on to the next cycle.

use std::path::PathBuf;

use crate::supervisor::RestartReason;

/// Result type for supervisor operations.
pub type Result<T> = std::result::Result<T, SupervisorError>;

/// Supervisor errors with structured context.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum SupervisorError {
    /// Target executable missing, not executable, or failed to spawn.
    #[error("failed to launch '{path}': {reason}")]
    Launch { path: PathBuf, reason: String },

    /// A liveness probe or process table scan exceeded its time budget.
    #[error("probe timed out after {timeout_ms}ms")]
    ProbeTimeout { timeout_ms: u64 },

    /// The process table could not be read at all.
    #[error("cannot read process table: {0}")]
    ProcessTable(String),

    /// Sending a signal to a process failed.
    #[error("failed to signal process {pid}: {reason}")]
    Signal { pid: u32, reason: String },

    /// A conflicting helper survived forced termination.
    #[error("failed to terminate conflicting process {pid}: {reason}")]
    ConflictTermination { pid: u32, reason: String },

    /// A restart attempt failed.
    #[error("restart after {reason} failed: {source}")]
    Restart {
        reason: RestartReason,
        #[source]
        source: Box<SupervisorError>,
    },

    /// `systemctl` or `journalctl` failed or timed out.
    #[error("command '{command}' failed: {reason}")]
    ServiceManager { command: String, reason: String },

    /// Log source could not be read.
    #[error("log source error: {0}")]
    LogSource(String),

    /// PID file could not be read or written.
    #[error("PID store error: {0}")]
    PidStore(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error with context.
    #[error("IO error in {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl SupervisorError {
    /// Create an IO error with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a timeout error for a probe bounded by `timeout`.
    pub fn probe_timeout(timeout: std::time::Duration) -> Self {
        Self::ProbeTimeout {
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Create a launch error.
    pub fn launch(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Launch {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a signal error.
    pub fn signal(pid: u32, reason: impl Into<String>) -> Self {
        Self::Signal {
            pid,
            reason: reason.into(),
        }
    }

    /// Create a conflict termination error.
    pub fn conflict_termination(pid: u32, reason: impl Into<String>) -> Self {
        Self::ConflictTermination {
            pid,
            reason: reason.into(),
        }
    }

    /// Wrap the error that made a restart fail.
    pub fn restart(reason: RestartReason, source: SupervisorError) -> Self {
        Self::Restart {
            reason,
            source: Box::new(source),
        }
    }

    /// Create a service manager error.
    pub fn service_manager(command: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ServiceManager {
            command: command.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error means the probe ran out of time.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::ProbeTimeout { .. })
    }
}
