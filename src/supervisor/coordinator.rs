//! Restart coordination with a non-reentrant state machine.
//!
//! ## States
//!
//! - **Idle**: no restart in flight; a trigger moves to `WaitingForConflict`
//! - **`WaitingForConflict`**: polling for a helper process (e.g. the client's
//!   downloader) to exit; it is killed once the poll budget runs out
//! - **Restarting**: the launcher is running; always returns to `Idle`
//!
//! A trigger that arrives while the coordinator is not `Idle` is dropped, not
//! queued. A failed restart is not retried here; the next loop cycle is the
//! retry.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::clock::{self, Clock};
use super::fault::LogSource;
use super::launcher::Launcher;
use super::process_table::{ProcessEntry, ProcessTable, find_blocking};
use super::types::{
    CoordinatorState, RestartEvent, RestartOutcome, RestartReason, SupervisedProcess,
};
use crate::constants;
use crate::error::SupervisorError;
use crate::signal::Shutdown;

/// Restart coordinator configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// Minimum time between the end of one restart and the next trigger.
    pub cooldown: Duration,
    /// Command-line substring of the conflicting helper, if any.
    pub conflict_pattern: Option<String>,
    /// Polls before the helper is terminated.
    pub conflict_max_attempts: u32,
    /// Time between polls.
    pub conflict_interval: Duration,
    /// Upper bound on one conflict scan of the process table.
    pub table_timeout: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(constants::DEFAULT_RESTART_COOLDOWN_SECS),
            conflict_pattern: None,
            conflict_max_attempts: constants::DEFAULT_CONFLICT_MAX_ATTEMPTS,
            conflict_interval: Duration::from_secs(constants::DEFAULT_CONFLICT_INTERVAL_SECS),
            table_timeout: Duration::from_secs(constants::DEFAULT_PROBE_TIMEOUT_SECS),
        }
    }
}

impl CoordinatorConfig {
    /// Longest the conflict wait can take.
    pub fn conflict_budget(&self) -> Duration {
        self.conflict_interval
            .saturating_mul(self.conflict_max_attempts)
    }
}

enum ConflictWait {
    /// No conflicting helper was seen.
    Clear,
    /// A helper was seen and has gone, on its own or by force.
    Resolved,
    /// A helper was seen and could not be removed.
    Unresolved,
    /// Shutdown arrived during the wait.
    Aborted,
}

struct Inner {
    state: CoordinatorState,
    last_restart: Option<DateTime<Utc>>,
    history: VecDeque<RestartEvent>,
}

impl Inner {
    fn record(&mut self, event: RestartEvent) {
        if self.history.len() == constants::RESTART_HISTORY_CAPACITY {
            self.history.pop_front();
        }
        self.history.push_back(event);
    }
}

pub struct RestartCoordinator {
    process: Arc<SupervisedProcess>,
    config: CoordinatorConfig,
    launcher: Arc<dyn Launcher>,
    table: Arc<dyn ProcessTable>,
    clock: Arc<dyn Clock>,
    shutdown: Shutdown,
    log_source: Option<Arc<dyn LogSource>>,
    inner: Mutex<Inner>,
}

/// Returns the coordinator to `Idle` however `trigger` exits.
struct IdleOnDrop<'a>(&'a Mutex<Inner>);

impl Drop for IdleOnDrop<'_> {
    fn drop(&mut self) {
        self.0.lock().state = CoordinatorState::Idle;
    }
}

impl RestartCoordinator {
    pub fn new(
        process: Arc<SupervisedProcess>,
        config: CoordinatorConfig,
        launcher: Arc<dyn Launcher>,
        table: Arc<dyn ProcessTable>,
        clock: Arc<dyn Clock>,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            process,
            config,
            launcher,
            table,
            clock,
            shutdown,
            log_source: None,
            inner: Mutex::new(Inner {
                state: CoordinatorState::Idle,
                last_restart: None,
                history: VecDeque::new(),
            }),
        }
    }

    /// Log source whose backlog is dropped on every relaunch, so lines the
    /// old instance wrote are never read as the new one's.
    #[must_use]
    pub fn with_log_source(mut self, source: Arc<dyn LogSource>) -> Self {
        self.log_source = Some(source);
        self
    }

    pub fn state(&self) -> CoordinatorState {
        self.inner.lock().state
    }

    /// When the last restart attempt finished, successful or not.
    pub fn last_restart(&self) -> Option<DateTime<Utc>> {
        self.inner.lock().last_restart
    }

    /// Recorded events, oldest first.
    pub fn history(&self) -> Vec<RestartEvent> {
        self.inner.lock().history.iter().cloned().collect()
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Request a restart.
    ///
    /// Ignored while another restart is in flight, suppressed during the
    /// cooldown, and abandoned if shutdown arrives before the launcher runs.
    /// Once the launcher has started it runs to completion.
    pub async fn trigger(&self, reason: RestartReason) -> RestartOutcome {
        let now = self.clock.now();
        {
            let mut inner = self.inner.lock();
            if inner.state != CoordinatorState::Idle {
                debug!(
                    process = %self.process.name,
                    %reason,
                    state = %inner.state,
                    "Restart already in flight, ignoring trigger"
                );
                return RestartOutcome::Ignored;
            }
            if let Some(last) = inner.last_restart
                && now < clock::add(last, self.config.cooldown)
            {
                info!(
                    process = %self.process.name,
                    %reason,
                    cooldown_secs = self.config.cooldown.as_secs(),
                    "Restart suppressed during cooldown"
                );
                return RestartOutcome::CoolingDown;
            }
            inner.state = CoordinatorState::WaitingForConflict;
            inner.record(RestartEvent { at: now, reason });
        }
        let _idle = IdleOnDrop(&self.inner);

        info!(process = %self.process.name, %reason, "Restart triggered");

        match self.wait_for_conflict().await {
            ConflictWait::Aborted => {
                info!(process = %self.process.name, "Shutdown during conflict wait, restart abandoned");
                return RestartOutcome::Aborted;
            },
            ConflictWait::Resolved => {
                let at = self.clock.now();
                self.inner.lock().record(RestartEvent {
                    at,
                    reason: RestartReason::ConflictResolved,
                });
                info!(process = %self.process.name, reason = %RestartReason::ConflictResolved, "Conflicting process gone");
            },
            ConflictWait::Unresolved => {
                warn!(process = %self.process.name, "Conflicting process still present, restarting anyway");
            },
            ConflictWait::Clear => {},
        }

        self.inner.lock().state = CoordinatorState::Restarting;

        // A faulted process is still alive, and an Unknown probe may have
        // missed a live one; stop whatever is there before relaunching.
        if let Err(e) = self.launcher.stop(&self.process).await {
            warn!(process = %self.process.name, error = %e, "Failed to stop previous instance");
        }
        if let Some(source) = &self.log_source
            && let Err(e) = source.skip_backlog().await
        {
            warn!(process = %self.process.name, error = %e, "Failed to skip log backlog");
        }

        let outcome = match self.launcher.launch(&self.process).await {
            Ok(handle) => {
                info!(process = %self.process.name, %reason, pid = ?handle.pid, "Restart complete");
                RestartOutcome::Restarted { pid: handle.pid }
            },
            Err(e) => {
                let err = SupervisorError::restart(reason, e);
                error!(process = %self.process.name, error = %err, "Restart failed, will retry next cycle");
                RestartOutcome::Failed {
                    error: err.to_string(),
                }
            },
        };

        self.inner.lock().last_restart = Some(self.clock.now());
        outcome
    }

    async fn wait_for_conflict(&self) -> ConflictWait {
        let Some(pattern) = self.config.conflict_pattern.as_deref() else {
            return ConflictWait::Clear;
        };

        let mut seen = false;
        for attempt in 0..self.config.conflict_max_attempts {
            if self.shutdown.is_requested() {
                return ConflictWait::Aborted;
            }
            match self.find_conflicts(pattern).await {
                Some(entries) if entries.is_empty() => {
                    return if seen {
                        ConflictWait::Resolved
                    } else {
                        ConflictWait::Clear
                    };
                },
                Some(entries) => {
                    seen = true;
                    debug!(
                        process = %self.process.name,
                        attempt = attempt + 1,
                        max_attempts = self.config.conflict_max_attempts,
                        pids = ?entries.iter().map(|e| e.pid).collect::<Vec<_>>(),
                        "Waiting for conflicting process to exit"
                    );
                },
                None => return ConflictWait::Clear,
            }

            tokio::select! {
                () = self.clock.sleep(self.config.conflict_interval) => {},
                () = self.shutdown.wait() => return ConflictWait::Aborted,
            }
        }

        if self.shutdown.is_requested() {
            return ConflictWait::Aborted;
        }

        let entries = match self.find_conflicts(pattern).await {
            Some(entries) if entries.is_empty() => {
                return if seen {
                    ConflictWait::Resolved
                } else {
                    ConflictWait::Clear
                };
            },
            Some(entries) => entries,
            None => return ConflictWait::Clear,
        };

        warn!(
            process = %self.process.name,
            waited_secs = self.config.conflict_budget().as_secs(),
            count = entries.len(),
            "Conflicting process did not exit, terminating"
        );

        let mut all_terminated = true;
        for entry in &entries {
            if let Err(e) = self.table.terminate(entry.pid, true) {
                let err = SupervisorError::conflict_termination(entry.pid, e.to_string());
                error!(process = %self.process.name, error = %err, "Could not terminate conflicting process");
                all_terminated = false;
            }
        }

        if all_terminated {
            ConflictWait::Resolved
        } else {
            ConflictWait::Unresolved
        }
    }

    /// `None` when the table cannot be read in time; the wait is then skipped.
    async fn find_conflicts(&self, pattern: &str) -> Option<Vec<ProcessEntry>> {
        match find_blocking(&self.table, pattern, self.config.table_timeout).await {
            Ok(entries) => Some(entries),
            Err(e) => {
                warn!(process = %self.process.name, error = %e, "Cannot inspect conflicting processes, proceeding");
                None
            },
        }
    }
}
