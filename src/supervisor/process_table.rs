//! Process table access for liveness probing and conflict handling.
//!
//! Uses sysinfo to read the system's process table and nix to deliver
//! signals. Both the liveness prober and the restart coordinator go through
//! the [`ProcessTable`] trait so tests can substitute a fake table.

use std::sync::Arc;
use std::time::Duration;
use sysinfo::{Pid, ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, System, UpdateKind};

use crate::error::{Result, SupervisorError};

/// A process whose command line matched a pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEntry {
    pub pid: u32,
    pub command_line: String,
}

pub trait ProcessTable: Send + Sync {
    /// Live processes whose command line contains `pattern`.
    ///
    /// # Errors
    ///
    /// Returns an error only when the table cannot be read at all. No match
    /// is an empty vector.
    fn find(&self, pattern: &str) -> Result<Vec<ProcessEntry>>;

    /// Whether `pid` exists and is not a zombie.
    fn is_alive(&self, pid: u32) -> Result<bool>;

    /// Send SIGTERM, or SIGKILL when `force` is set. A process that is
    /// already gone is not an error.
    fn terminate(&self, pid: u32, force: bool) -> Result<()>;
}

/// Run a table operation on the blocking pool, giving up after `timeout`.
///
/// A sysinfo refresh walks all of `/proc` and must not stall the runtime.
/// The blocking thread is left to finish on its own when the timeout fires.
pub async fn run_blocking<T, F>(
    table: &Arc<dyn ProcessTable>,
    timeout: Duration,
    op: F,
) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&dyn ProcessTable) -> Result<T> + Send + 'static,
{
    let table = Arc::clone(table);
    let task = tokio::task::spawn_blocking(move || op(table.as_ref()));
    match tokio::time::timeout(timeout, task).await {
        Ok(joined) => joined
            .map_err(|e| SupervisorError::ProcessTable(format!("scan task failed: {e}")))?,
        Err(_) => Err(SupervisorError::probe_timeout(timeout)),
    }
}

/// [`ProcessTable::find`] under [`run_blocking`].
pub async fn find_blocking(
    table: &Arc<dyn ProcessTable>,
    pattern: &str,
    timeout: Duration,
) -> Result<Vec<ProcessEntry>> {
    let pattern = pattern.to_string();
    run_blocking(table, timeout, move |table| table.find(&pattern)).await
}

/// [`ProcessTable::is_alive`] under [`run_blocking`].
pub async fn is_alive_blocking(
    table: &Arc<dyn ProcessTable>,
    pid: u32,
    timeout: Duration,
) -> Result<bool> {
    run_blocking(table, timeout, move |table| table.is_alive(pid)).await
}

/// The host's process table.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProcessTable;

impl SystemProcessTable {
    pub fn new() -> Self {
        Self
    }
}

impl ProcessTable for SystemProcessTable {
    fn find(&self, pattern: &str) -> Result<Vec<ProcessEntry>> {
        if !sysinfo::IS_SUPPORTED_SYSTEM {
            return Err(SupervisorError::ProcessTable(
                "process table is not supported on this platform".to_string(),
            ));
        }

        let mut system = System::new();
        system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing().with_cmd(UpdateKind::Always),
        );

        // Even a minimal system shows this process; nothing means /proc is unreadable.
        if system.processes().is_empty() {
            return Err(SupervisorError::ProcessTable(
                "no processes visible".to_string(),
            ));
        }

        let own_pid = std::process::id();
        let mut entries: Vec<ProcessEntry> = system
            .processes()
            .iter()
            .filter(|(pid, process)| {
                pid.as_u32() != own_pid && process.status() != ProcessStatus::Zombie
            })
            .filter_map(|(pid, process)| {
                let command_line = command_line(process);
                command_line.contains(pattern).then(|| ProcessEntry {
                    pid: pid.as_u32(),
                    command_line,
                })
            })
            .collect();

        entries.sort_by_key(|e| e.pid);
        Ok(entries)
    }

    fn is_alive(&self, pid: u32) -> Result<bool> {
        let mut system = System::new();
        let target = Pid::from_u32(pid);
        system.refresh_processes(ProcessesToUpdate::Some(&[target]), true);

        Ok(system
            .process(target)
            .is_some_and(|p| p.status() != ProcessStatus::Zombie))
    }

    #[cfg(unix)]
    fn terminate(&self, pid: u32, force: bool) -> Result<()> {
        use nix::errno::Errno;
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid as NixPid;

        let raw = i32::try_from(pid)
            .map_err(|_| SupervisorError::signal(pid, "pid out of range"))?;
        let signal = if force {
            Signal::SIGKILL
        } else {
            Signal::SIGTERM
        };

        match kill(NixPid::from_raw(raw), signal) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(SupervisorError::signal(pid, e.desc())),
        }
    }

    #[cfg(not(unix))]
    fn terminate(&self, pid: u32, _force: bool) -> Result<()> {
        let mut system = System::new();
        let target = Pid::from_u32(pid);
        system.refresh_processes(ProcessesToUpdate::Some(&[target]), true);

        match system.process(target) {
            Some(process) if !process.kill() => {
                Err(SupervisorError::signal(pid, "kill request refused"))
            },
            _ => Ok(()),
        }
    }
}

/// argv joined by spaces, or the process name when argv is unreadable.
fn command_line(process: &sysinfo::Process) -> String {
    let cmd = process.cmd();
    if cmd.is_empty() {
        return process.name().to_string_lossy().into_owned();
    }
    cmd.iter()
        .map(|arg| arg.to_string_lossy())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::{Command, Stdio};

    #[test]
    fn test_is_alive_current_process() {
        // Current process should always be running
        let table = SystemProcessTable::new();
        assert!(table.is_alive(std::process::id()).unwrap());
    }

    #[test]
    fn test_is_alive_nonexistent_process() {
        // Very high PID unlikely to exist
        let table = SystemProcessTable::new();
        assert!(!table.is_alive(u32::MAX - 1).unwrap());
    }

    #[test]
    fn test_find_excludes_own_process() {
        let table = SystemProcessTable::new();
        let own = std::process::id();
        let entries = table.find("").unwrap();
        assert!(!entries.is_empty());
        assert!(entries.iter().all(|e| e.pid != own));
    }

    #[test]
    fn test_find_no_match() {
        let table = SystemProcessTable::new();
        let entries = table.find("warden-no-such-process-7f3a9c").unwrap();
        assert!(entries.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_find_and_terminate_child() {
        let mut child = Command::new("sleep")
            .arg("31.4159")
            .stdout(Stdio::null())
            .spawn()
            .expect("spawn sleep");

        let table = SystemProcessTable::new();
        let entries = table.find("sleep 31.4159").unwrap();
        assert!(entries.iter().any(|e| e.pid == child.id()));

        table.terminate(child.id(), true).unwrap();
        child.wait().unwrap();

        assert!(!table.is_alive(child.id()).unwrap());
    }

    struct StuckTable;

    impl ProcessTable for StuckTable {
        fn find(&self, _pattern: &str) -> Result<Vec<ProcessEntry>> {
            std::thread::sleep(Duration::from_millis(300));
            Ok(Vec::new())
        }

        fn is_alive(&self, _pid: u32) -> Result<bool> {
            std::thread::sleep(Duration::from_millis(300));
            Ok(true)
        }

        fn terminate(&self, _pid: u32, _force: bool) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_blocking_helpers_time_out() {
        let table: Arc<dyn ProcessTable> = Arc::new(StuckTable);
        let limit = Duration::from_millis(20);

        let err = find_blocking(&table, "vpnagentd", limit).await.unwrap_err();
        assert!(err.is_timeout());
        let err = is_alive_blocking(&table, 42, limit).await.unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_find_blocking_returns_matches() {
        let table: Arc<dyn ProcessTable> = Arc::new(SystemProcessTable::new());
        let entries = find_blocking(&table, "warden-no-such-process-7f3a9c", Duration::from_secs(10))
            .await
            .unwrap();
        assert!(entries.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_terminate_missing_process_is_ok() {
        let table = SystemProcessTable::new();
        assert!(table.terminate(u32::MAX / 2, false).is_ok());
    }
}
