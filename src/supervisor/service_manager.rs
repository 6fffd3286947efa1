//! Thin `systemctl` / `journalctl` adapter with bounded run time.

use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use super::types::ProcessState;
use crate::constants;
use crate::error::{Result, SupervisorError};

/// Run `program args..` and collect its output, failing after `timeout`.
///
/// The child is killed if the timeout fires. A non-zero exit status is not an
/// error here; callers decide what it means.
pub async fn run_command(program: &str, args: &[&str], timeout: Duration) -> Result<Output> {
    let command_text = format!("{program} {}", args.join(" "));
    debug!(command = %command_text, "Running external command");

    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output();

    match tokio::time::timeout(timeout, child).await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(e)) => Err(SupervisorError::service_manager(command_text, e.to_string())),
        Err(_) => Err(SupervisorError::service_manager(
            command_text,
            format!("timed out after {}ms", timeout.as_millis()),
        )),
    }
}

/// Map `systemctl is-active` output to a process state.
pub fn parse_active_state(output: &str) -> ProcessState {
    match output.trim() {
        "active" | "reloading" | "activating" | "refreshing" => ProcessState::Running,
        "inactive" | "failed" | "deactivating" => ProcessState::NotRunning,
        _ => ProcessState::Unknown,
    }
}

/// Parse `systemctl show -p MainPID --value`; `0` means no main process.
pub fn parse_main_pid(output: &str) -> Option<u32> {
    output.trim().parse::<u32>().ok().filter(|pid| *pid != 0)
}

/// systemd unit control.
#[derive(Debug, Clone)]
pub struct ServiceManager {
    program: String,
    timeout: Duration,
}

impl ServiceManager {
    pub fn new(timeout: Duration) -> Self {
        Self {
            program: "systemctl".to_string(),
            timeout,
        }
    }

    /// Use a different binary, e.g. a wrapper that adds `--user`.
    #[must_use]
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// `systemctl is-active <unit>`.
    ///
    /// `is-active` exits non-zero for inactive units, so only stdout is used.
    pub async fn is_active(&self, unit: &str) -> Result<ProcessState> {
        let output = run_command(&self.program, &["is-active", unit], self.timeout).await?;
        Ok(parse_active_state(&String::from_utf8_lossy(&output.stdout)))
    }

    /// `systemctl restart <unit>`.
    pub async fn restart(&self, unit: &str) -> Result<()> {
        let output = run_command(&self.program, &["restart", unit], self.timeout).await?;
        if output.status.success() {
            return Ok(());
        }
        Err(SupervisorError::service_manager(
            format!("{} restart {unit}", self.program),
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ))
    }

    /// The unit's main pid, if it has one.
    pub async fn main_pid(&self, unit: &str) -> Result<Option<u32>> {
        let output = run_command(
            &self.program,
            &["show", "-p", "MainPID", "--value", unit],
            self.timeout,
        )
        .await?;
        Ok(parse_main_pid(&String::from_utf8_lossy(&output.stdout)))
    }
}

impl Default for ServiceManager {
    fn default() -> Self {
        Self::new(Duration::from_secs(constants::SERVICE_MANAGER_TIMEOUT_SECS))
    }
}
