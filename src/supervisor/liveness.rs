//! Liveness probing.
//!
//! A probe never blocks past its timeout. A probe that times out reports
//! [`ProcessState::Unknown`], which the loop treats like a dead process.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use super::process_table::{ProcessTable, find_blocking};
use super::service_manager::ServiceManager;
use super::types::{ProcessState, SupervisedProcess};
use crate::error::Result;

#[async_trait]
pub trait LivenessCheck: Send + Sync {
    /// # Errors
    ///
    /// Returns an error only for faults that make the result meaningless,
    /// such as an unreadable process table. The loop skips that cycle.
    async fn probe(&self, process: &SupervisedProcess) -> Result<ProcessState>;

    /// Strategy name for logs.
    fn name(&self) -> &'static str;
}

/// Looks for the process's match pattern in the process table.
pub struct ProcessTableMatch {
    table: Arc<dyn ProcessTable>,
    timeout: Duration,
}

impl ProcessTableMatch {
    pub fn new(table: Arc<dyn ProcessTable>, timeout: Duration) -> Self {
        Self { table, timeout }
    }

    async fn scan(&self, pattern: &str) -> Result<ProcessState> {
        let entries = find_blocking(&self.table, pattern, self.timeout).await?;

        Ok(if entries.is_empty() {
            ProcessState::NotRunning
        } else {
            ProcessState::Running
        })
    }
}

#[async_trait]
impl LivenessCheck for ProcessTableMatch {
    async fn probe(&self, process: &SupervisedProcess) -> Result<ProcessState> {
        match self.scan(&process.match_pattern).await {
            Err(e) if e.is_timeout() => {
                warn!(process = %process.name, error = %e, "Liveness probe timed out");
                Ok(ProcessState::Unknown)
            },
            other => other,
        }
    }

    fn name(&self) -> &'static str {
        "process_table"
    }
}

/// Asks systemd whether the process's unit is active.
pub struct ServiceManagerQuery {
    manager: ServiceManager,
}

impl ServiceManagerQuery {
    pub fn new(manager: ServiceManager) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl LivenessCheck for ServiceManagerQuery {
    async fn probe(&self, process: &SupervisedProcess) -> Result<ProcessState> {
        let unit = process.require_unit()?;
        match self.manager.is_active(unit).await {
            Ok(state) => Ok(state),
            Err(e) => {
                warn!(process = %process.name, unit, error = %e, "Service manager query failed");
                Ok(ProcessState::Unknown)
            },
        }
    }

    fn name(&self) -> &'static str {
        "service_manager"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SupervisorError;
    use crate::supervisor::process_table::ProcessEntry;

    struct StaticTable {
        entries: Vec<ProcessEntry>,
        delay: Duration,
        fail: bool,
    }

    impl ProcessTable for StaticTable {
        fn find(&self, pattern: &str) -> Result<Vec<ProcessEntry>> {
            std::thread::sleep(self.delay);
            if self.fail {
                return Err(SupervisorError::ProcessTable("unreadable".to_string()));
            }
            Ok(self
                .entries
                .iter()
                .filter(|e| e.command_line.contains(pattern))
                .cloned()
                .collect())
        }

        fn is_alive(&self, pid: u32) -> Result<bool> {
            Ok(self.entries.iter().any(|e| e.pid == pid))
        }

        fn terminate(&self, _pid: u32, _force: bool) -> Result<()> {
            Ok(())
        }
    }

    fn table(command_lines: &[&str]) -> StaticTable {
        StaticTable {
            entries: command_lines
                .iter()
                .enumerate()
                .map(|(i, c)| ProcessEntry {
                    pid: 100 + i as u32,
                    command_line: (*c).to_string(),
                })
                .collect(),
            delay: Duration::ZERO,
            fail: false,
        }
    }

    fn agent() -> SupervisedProcess {
        SupervisedProcess::new("agent", "/opt/cisco/secureclient/bin/vpnagentd")
    }

    #[tokio::test]
    async fn test_process_table_running() {
        let check = ProcessTableMatch::new(
            Arc::new(table(&["/opt/cisco/secureclient/bin/vpnagentd -execv_instance"])),
            Duration::from_secs(1),
        );
        assert_eq!(check.probe(&agent()).await.unwrap(), ProcessState::Running);
    }

    #[tokio::test]
    async fn test_process_table_not_running() {
        let check = ProcessTableMatch::new(
            Arc::new(table(&["/usr/bin/vpnui", "/usr/sbin/sshd"])),
            Duration::from_secs(1),
        );
        assert_eq!(
            check.probe(&agent()).await.unwrap(),
            ProcessState::NotRunning
        );
    }

    #[tokio::test]
    async fn test_process_table_timeout_is_unknown() {
        let mut slow = table(&["vpnagentd"]);
        slow.delay = Duration::from_millis(300);
        let check = ProcessTableMatch::new(Arc::new(slow), Duration::from_millis(20));

        assert_eq!(check.probe(&agent()).await.unwrap(), ProcessState::Unknown);
    }

    #[tokio::test]
    async fn test_process_table_unreadable_is_error() {
        let mut broken = table(&[]);
        broken.fail = true;
        let check = ProcessTableMatch::new(Arc::new(broken), Duration::from_secs(1));

        let err = check.probe(&agent()).await.unwrap_err();
        assert!(matches!(err, SupervisorError::ProcessTable(_)));
    }

    #[tokio::test]
    async fn test_service_query_requires_unit() {
        let check = ServiceManagerQuery::new(ServiceManager::default());
        assert!(check.probe(&agent()).await.is_err());
    }

    #[tokio::test]
    async fn test_service_query_failure_is_unknown() {
        let manager =
            ServiceManager::new(Duration::from_secs(1)).with_program("warden-no-such-systemctl");
        let check = ServiceManagerQuery::new(manager);
        let process = agent().with_unit("vpnagentd.service");

        assert_eq!(check.probe(&process).await.unwrap(), ProcessState::Unknown);
    }

    #[test]
    fn test_strategy_names() {
        let table_check =
            ProcessTableMatch::new(Arc::new(table(&[])), Duration::from_secs(1));
        let service_check = ServiceManagerQuery::new(ServiceManager::default());
        assert_eq!(table_check.name(), "process_table");
        assert_eq!(service_check.name(), "service_manager");
    }
}
