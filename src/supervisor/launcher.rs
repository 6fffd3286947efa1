//! Process launching.
//!
//! Two launchers share the [`Launcher`] trait:
//!
//! - [`CommandLauncher`] spawns the executable directly with its environment
//!   overrides, the way a `LD_PRELOAD` wrapper script would.
//! - [`ServiceManagerLauncher`] asks systemd to restart the unit, which
//!   carries the overrides in its own `Environment=` lines.

use async_trait::async_trait;
use std::fs::{self, File, OpenOptions};
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::clock::Clock;
use super::pid_store::PidStore;
use super::process_table::{ProcessTable, find_blocking, is_alive_blocking};
use super::service_manager::ServiceManager;
use super::types::SupervisedProcess;
use crate::constants;
use crate::error::{Result, SupervisorError};

/// What a successful launch produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchHandle {
    pub pid: Option<u32>,
}

#[async_trait]
pub trait Launcher: Send + Sync {
    /// Start the process. Overrides apply to the child only.
    async fn launch(&self, process: &SupervisedProcess) -> Result<LaunchHandle>;

    /// Stop a running instance before it is relaunched.
    async fn stop(&self, process: &SupervisedProcess) -> Result<()>;
}

/// Check that `path` is a regular file with an execute bit.
pub fn check_executable(path: &Path) -> Result<()> {
    let metadata = fs::metadata(path)
        .map_err(|e| SupervisorError::launch(path, format!("executable not found: {e}")))?;

    if !metadata.is_file() {
        return Err(SupervisorError::launch(path, "not a regular file"));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if metadata.permissions().mode() & 0o111 == 0 {
            return Err(SupervisorError::launch(path, "file is not executable"));
        }
    }

    Ok(())
}

/// Spawns the executable as a detached child.
pub struct CommandLauncher {
    pid_store: Arc<dyn PidStore>,
    table: Arc<dyn ProcessTable>,
    clock: Arc<dyn Clock>,
    table_timeout: Duration,
}

impl CommandLauncher {
    pub fn new(
        pid_store: Arc<dyn PidStore>,
        table: Arc<dyn ProcessTable>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            pid_store,
            table,
            clock,
            table_timeout: Duration::from_secs(constants::DEFAULT_PROBE_TIMEOUT_SECS),
        }
    }

    /// Upper bound on each process table lookup made while stopping.
    #[must_use]
    pub fn with_table_timeout(mut self, timeout: Duration) -> Self {
        self.table_timeout = timeout;
        self
    }

    fn build_command(process: &SupervisedProcess) -> Result<Command> {
        let mut command = Command::new(&process.executable);
        command.args(&process.args).stdin(Stdio::null());

        for entry in &process.env {
            command.env(&entry.key, &entry.value);
        }

        match &process.log_file {
            Some(path) => {
                let log = open_log(path)?;
                let err = log
                    .try_clone()
                    .map_err(|e| SupervisorError::io(format!("cloning {}", path.display()), e))?;
                command.stdout(log).stderr(err);
            },
            None => {
                command.stdout(Stdio::null()).stderr(Stdio::null());
            },
        }

        // Own process group, so a Ctrl+C aimed at the supervisor spares the daemon.
        #[cfg(unix)]
        command.process_group(0);

        Ok(command)
    }

    /// Pids to stop: the recorded one if it is still an instance of the
    /// process, otherwise every pattern match.
    ///
    /// A pid file outlives the daemon, and its pid may since have been
    /// reused by an unrelated process.
    async fn running_pids(&self, process: &SupervisedProcess) -> Result<Vec<u32>> {
        let matches: Vec<u32> =
            find_blocking(&self.table, &process.match_pattern, self.table_timeout)
                .await?
                .into_iter()
                .map(|e| e.pid)
                .collect();

        match self.pid_store.read()? {
            Some(pid) if matches.contains(&pid) => Ok(vec![pid]),
            Some(pid) => {
                warn!(
                    process = %process.name,
                    pid,
                    pattern = %process.match_pattern,
                    "Recorded PID is not an instance of the process, ignoring it"
                );
                self.pid_store.clear()?;
                Ok(matches)
            },
            None => Ok(matches),
        }
    }

    async fn any_alive(&self, pids: &[u32]) -> Result<bool> {
        for pid in pids {
            if is_alive_blocking(&self.table, *pid, self.table_timeout).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

fn open_log(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .map_err(|e| SupervisorError::io(format!("creating {}", parent.display()), e))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| SupervisorError::io(format!("opening {}", path.display()), e))
}

#[async_trait]
impl Launcher for CommandLauncher {
    async fn launch(&self, process: &SupervisedProcess) -> Result<LaunchHandle> {
        check_executable(&process.executable)?;

        if let Err(e) = self.pid_store.clear() {
            warn!(process = %process.name, error = %e, "Failed to clear stale PID");
        }

        let mut command = Self::build_command(process)?;
        let child = command
            .spawn()
            .map_err(|e| SupervisorError::launch(&process.executable, e.to_string()))?;

        let pid = child.id();
        if let Some(pid) = pid
            && let Err(e) = self.pid_store.write(pid)
        {
            warn!(process = %process.name, pid, error = %e, "Failed to record PID");
        }

        // Dropping the handle leaves the child running; tokio reaps it on exit.
        drop(child);

        info!(
            process = %process.name,
            pid = ?pid,
            executable = %process.executable.display(),
            overrides = process.env.len(),
            "Process launched"
        );
        Ok(LaunchHandle { pid })
    }

    async fn stop(&self, process: &SupervisedProcess) -> Result<()> {
        let pids = self.running_pids(process).await?;
        if pids.is_empty() {
            debug!(process = %process.name, "Nothing to stop");
            return self.pid_store.clear();
        }

        for pid in &pids {
            info!(process = %process.name, pid, "Sending SIGTERM");
            self.table.terminate(*pid, false)?;
        }

        let interval = Duration::from_millis(constants::STOP_POLL_INTERVAL_MS);
        for _ in 0..constants::STOP_POLL_ATTEMPTS {
            if !self.any_alive(&pids).await? {
                return self.pid_store.clear();
            }
            self.clock.sleep(interval).await;
        }

        for pid in &pids {
            if is_alive_blocking(&self.table, *pid, self.table_timeout).await? {
                warn!(process = %process.name, pid, "Process ignored SIGTERM, sending SIGKILL");
                self.table.terminate(*pid, true)?;
            }
        }
        self.pid_store.clear()
    }
}

/// Restarts the process through systemd.
pub struct ServiceManagerLauncher {
    manager: ServiceManager,
    pid_store: Arc<dyn PidStore>,
}

impl ServiceManagerLauncher {
    pub fn new(manager: ServiceManager, pid_store: Arc<dyn PidStore>) -> Self {
        Self { manager, pid_store }
    }
}

#[async_trait]
impl Launcher for ServiceManagerLauncher {
    async fn launch(&self, process: &SupervisedProcess) -> Result<LaunchHandle> {
        let unit = process.require_unit()?;
        self.manager.restart(unit).await?;

        let pid = match self.manager.main_pid(unit).await {
            Ok(pid) => pid,
            Err(e) => {
                warn!(process = %process.name, unit, error = %e, "Could not read MainPID");
                None
            },
        };

        match pid {
            Some(pid) => {
                if let Err(e) = self.pid_store.write(pid) {
                    warn!(process = %process.name, pid, error = %e, "Failed to record PID");
                }
            },
            None => {
                if let Err(e) = self.pid_store.clear() {
                    warn!(process = %process.name, error = %e, "Failed to clear stale PID");
                }
            },
        }

        info!(process = %process.name, unit, pid = ?pid, "Unit restarted");
        Ok(LaunchHandle { pid })
    }

    async fn stop(&self, _process: &SupervisedProcess) -> Result<()> {
        // `systemctl restart` stops the old instance itself.
        Ok(())
    }
}
