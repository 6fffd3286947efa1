//! Data types shared by the supervisor components.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{Result, SupervisorError};

/// A single environment variable applied to the child only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvOverride {
    pub key: String,
    pub value: String,
}

impl EnvOverride {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// The external executable under supervision.
///
/// Built once from configuration and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisedProcess {
    /// Display name used in logs.
    pub name: String,
    /// Absolute path of the target executable.
    pub executable: PathBuf,
    /// Arguments passed to the executable.
    pub args: Vec<String>,
    /// Ordered environment overrides; later entries win on duplicate keys.
    pub env: Vec<EnvOverride>,
    /// Command-line substring identifying the process in the process table.
    pub match_pattern: String,
    /// Service manager unit, if the process is managed by systemd.
    pub unit: Option<String>,
    /// File receiving the child's stdout and stderr.
    pub log_file: Option<PathBuf>,
}

impl SupervisedProcess {
    /// Create a process description; the match pattern defaults to the
    /// executable's file name.
    pub fn new(name: impl Into<String>, executable: impl Into<PathBuf>) -> Self {
        let executable = executable.into();
        let match_pattern = default_match_pattern(&executable);
        Self {
            name: name.into(),
            executable,
            args: Vec::new(),
            env: Vec::new(),
            match_pattern,
            unit: None,
            log_file: None,
        }
    }

    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push(EnvOverride::new(key, value));
        self
    }

    #[must_use]
    pub fn with_match_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.match_pattern = pattern.into();
        self
    }

    #[must_use]
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    #[must_use]
    pub fn with_log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }

    /// The configured unit, or a config error naming the process.
    pub fn require_unit(&self) -> Result<&str> {
        self.unit.as_deref().ok_or_else(|| {
            SupervisorError::Config(format!("process '{}' has no service unit", self.name))
        })
    }
}

fn default_match_pattern(executable: &Path) -> String {
    executable
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| executable.to_string_lossy().into_owned())
}

/// Result of one liveness probe. Recomputed every cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Running,
    NotRunning,
    /// The probe could not decide, e.g. it timed out.
    Unknown,
}

impl ProcessState {
    /// Unknown is treated like NotRunning: fail toward restart.
    pub fn needs_restart(self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Running => "running",
            Self::NotRunning => "not_running",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Known log text that marks the degraded-but-alive failure mode.
///
/// Matching is a case-sensitive literal substring test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaultSignature(String);

impl FaultSignature {
    /// # Errors
    ///
    /// Returns a config error for an empty signature, which would match every line.
    pub fn new(pattern: impl Into<String>) -> Result<Self> {
        let pattern = pattern.into();
        if pattern.is_empty() {
            return Err(SupervisorError::Config(
                "fault signature cannot be empty".to_string(),
            ));
        }
        Ok(Self(pattern))
    }

    pub fn matches(&self, line: &str) -> bool {
        line.contains(self.0.as_str())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FaultSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Why a restart event was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RestartReason {
    ProcessDown,
    FaultDetected,
    ConflictResolved,
}

impl fmt::Display for RestartReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ProcessDown => "process_down",
            Self::FaultDetected => "fault_detected",
            Self::ConflictResolved => "conflict_resolved",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RestartEvent {
    pub at: DateTime<Utc>,
    pub reason: RestartReason,
}

/// Restart coordinator state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    Idle,
    WaitingForConflict,
    Restarting,
}

impl fmt::Display for CoordinatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::WaitingForConflict => "waiting_for_conflict",
            Self::Restarting => "restarting",
        };
        f.write_str(s)
    }
}

/// What a restart trigger led to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestartOutcome {
    /// The launcher ran and reported success.
    Restarted { pid: Option<u32> },
    /// The launcher ran and failed; retried on a later cycle.
    Failed { error: String },
    /// Another restart was already in flight.
    Ignored,
    /// The previous restart finished less than one cooldown ago.
    CoolingDown,
    /// Shutdown arrived before the launcher was invoked.
    Aborted,
}

impl RestartOutcome {
    /// Whether the launcher was invoked for this trigger.
    pub fn attempted(&self) -> bool {
        matches!(self, Self::Restarted { .. } | Self::Failed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_pattern_defaults_to_file_name() {
        let process = SupervisedProcess::new("agent", "/opt/cisco/secureclient/bin/vpnagentd");
        assert_eq!(process.match_pattern, "vpnagentd");
    }

    #[test]
    fn test_env_overrides_keep_order() {
        let process = SupervisedProcess::new("agent", "/bin/true")
            .with_env("LD_LIBRARY_PATH", "/opt/libxml2/lib")
            .with_env("LD_PRELOAD", "/opt/libxml2/lib/libxml2.so.2");

        let keys: Vec<&str> = process.env.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, ["LD_LIBRARY_PATH", "LD_PRELOAD"]);
    }

    #[test]
    fn test_restart_event_serializes() {
        let event = RestartEvent {
            at: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
            reason: RestartReason::FaultDetected,
        };

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["reason"], "fault_detected");
        assert_eq!(value["at"], "2023-11-14T22:13:20Z");
    }

    #[test]
    fn test_require_unit() {
        let process = SupervisedProcess::new("agent", "/bin/true");
        assert!(process.require_unit().is_err());

        let process = process.with_unit("vpnagentd.service");
        assert_eq!(process.require_unit().unwrap(), "vpnagentd.service");
    }

    #[test]
    fn test_unknown_state_needs_restart() {
        assert!(!ProcessState::Running.needs_restart());
        assert!(ProcessState::NotRunning.needs_restart());
        assert!(ProcessState::Unknown.needs_restart());
    }

    #[test]
    fn test_signature_is_case_sensitive_literal() {
        let sig = FaultSignature::new("xmlGetPropNodeInternal").unwrap();
        assert!(sig.matches("segfault at 0 in libxml2.so.2 xmlGetPropNodeInternal+0x1c"));
        assert!(!sig.matches("XMLGETPROPNODEINTERNAL"));
        assert!(!sig.matches("xmlGetProp"));
    }

    #[test]
    fn test_signature_regex_characters_are_literal() {
        let sig = FaultSignature::new("libxml2.so.*").unwrap();
        assert!(sig.matches("loaded libxml2.so.* from /opt"));
        assert!(!sig.matches("loaded libxml2.so.2 from /opt"));
    }

    #[test]
    fn test_empty_signature_rejected() {
        assert!(FaultSignature::new("").is_err());
    }

    #[test]
    fn test_outcome_attempted() {
        assert!(RestartOutcome::Restarted { pid: Some(1) }.attempted());
        assert!(
            RestartOutcome::Failed {
                error: "boom".to_string()
            }
            .attempted()
        );
        assert!(!RestartOutcome::Ignored.attempted());
        assert!(!RestartOutcome::CoolingDown.attempted());
        assert!(!RestartOutcome::Aborted.attempted());
    }
}
