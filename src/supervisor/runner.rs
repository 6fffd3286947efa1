//! The supervisor loop.
//!
//! An explicit single-threaded scheduler with two deadlines, one for liveness
//! probes and one for fault scans. Both run as soon as the loop starts. When
//! both are due in the same tick the probe goes first, and the scan is
//! skipped if the probe already restarted the process.
//!
//! Waiting for the next deadline races the shutdown signal. A restart that has
//! reached the launcher is never interrupted.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::clock::{self, Clock, SystemClock};
use super::coordinator::{CoordinatorConfig, RestartCoordinator};
use super::fault::FaultDetector;
use super::launcher::Launcher;
use super::liveness::LivenessCheck;
use super::process_table::{ProcessTable, SystemProcessTable};
use super::types::{FaultSignature, ProcessState, RestartOutcome, RestartReason, SupervisedProcess};
use crate::constants;
use crate::signal::Shutdown;

/// Fault scanning settings.
pub struct FaultWatch {
    pub detector: FaultDetector,
    pub signature: FaultSignature,
    pub window: Duration,
    pub interval: Duration,
}

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Probe result, if a probe was due and succeeded.
    pub probe: Option<ProcessState>,
    /// Scan result, if a scan was due and ran.
    pub fault_found: Option<bool>,
    /// One entry per restart trigger issued this tick.
    pub restarts: Vec<RestartOutcome>,
    /// The probe failed outright and the cycle was skipped.
    pub skipped: bool,
}

impl CycleReport {
    pub fn restart_attempted(&self) -> bool {
        self.restarts.iter().any(RestartOutcome::attempted)
    }
}

pub struct Supervisor {
    process: Arc<SupervisedProcess>,
    liveness: Box<dyn LivenessCheck>,
    fault: Option<FaultWatch>,
    coordinator: Arc<RestartCoordinator>,
    clock: Arc<dyn Clock>,
    shutdown: Shutdown,
    probe_interval: Duration,
    next_probe_at: DateTime<Utc>,
    next_scan_at: DateTime<Utc>,
}

impl Supervisor {
    pub fn builder(
        process: SupervisedProcess,
        liveness: Box<dyn LivenessCheck>,
        launcher: Arc<dyn Launcher>,
    ) -> SupervisorBuilder {
        SupervisorBuilder::new(process, liveness, launcher)
    }

    pub fn process(&self) -> &SupervisedProcess {
        &self.process
    }

    pub fn coordinator(&self) -> &Arc<RestartCoordinator> {
        &self.coordinator
    }

    /// Run until shutdown is requested.
    pub async fn run(&mut self) {
        info!(
            process = %self.process.name,
            liveness = self.liveness.name(),
            probe_interval_secs = self.probe_interval.as_secs(),
            fault_scan = self.fault.is_some(),
            "Supervisor started"
        );

        while self.wait_until_due().await {
            let report = self.tick().await;
            debug!(process = %self.process.name, ?report, "Cycle complete");
        }

        info!(process = %self.process.name, "Supervisor stopped");
    }

    /// Earliest pending deadline.
    fn next_due(&self) -> DateTime<Utc> {
        if self.fault.is_some() {
            self.next_probe_at.min(self.next_scan_at)
        } else {
            self.next_probe_at
        }
    }

    /// Sleep until the next deadline. Returns `false` on shutdown.
    async fn wait_until_due(&self) -> bool {
        if self.shutdown.is_requested() {
            return false;
        }
        let wait = clock::until(self.clock.now(), self.next_due());
        if wait.is_zero() {
            return true;
        }
        tokio::select! {
            () = self.clock.sleep(wait) => !self.shutdown.is_requested(),
            () = self.shutdown.wait() => false,
        }
    }

    /// Run whatever is due now.
    pub async fn tick(&mut self) -> CycleReport {
        let now = self.clock.now();
        let mut report = CycleReport::default();

        if now >= self.next_probe_at {
            self.next_probe_at = clock::add(now, self.probe_interval);
            self.run_probe(&mut report).await;
        }

        if self.fault.is_some() && now >= self.next_scan_at {
            let interval = self.fault.as_ref().map_or(self.probe_interval, |f| f.interval);
            self.next_scan_at = clock::add(now, interval);
            if report.restart_attempted() {
                debug!(process = %self.process.name, "Process just restarted, skipping fault scan");
            } else {
                self.run_scan(now, &mut report).await;
            }
        }

        report
    }

    async fn run_probe(&self, report: &mut CycleReport) {
        let state = match self.liveness.probe(&self.process).await {
            Ok(state) => state,
            Err(e) => {
                error!(process = %self.process.name, error = %e, "Liveness probe failed, skipping cycle");
                report.skipped = true;
                return;
            },
        };
        report.probe = Some(state);

        if !state.needs_restart() {
            debug!(process = %self.process.name, %state, "Process alive");
            return;
        }
        if self.shutdown.is_requested() {
            return;
        }

        warn!(process = %self.process.name, %state, "Process not running");
        let outcome = self.coordinator.trigger(RestartReason::ProcessDown).await;
        report.restarts.push(outcome);
    }

    async fn run_scan(&self, now: DateTime<Utc>, report: &mut CycleReport) {
        let Some(watch) = &self.fault else {
            return;
        };

        // Nothing logged before the last restart can be about the new instance.
        let mut since = clock::sub(now, watch.window);
        if let Some(last) = self.coordinator.last_restart() {
            since = since.max(last);
        }

        let found = match watch.detector.scan_since(since, &watch.signature).await {
            Ok(found) => found,
            Err(e) => {
                warn!(process = %self.process.name, error = %e, "Fault scan failed");
                return;
            },
        };
        report.fault_found = Some(found);

        if !found || self.shutdown.is_requested() {
            return;
        }

        warn!(
            process = %self.process.name,
            signature = %watch.signature,
            "Fault signature found in recent log"
        );
        let outcome = self.coordinator.trigger(RestartReason::FaultDetected).await;
        report.restarts.push(outcome);
    }
}

/// Assembles a [`Supervisor`]; everything but the process, probe and
/// launcher has a production default.
pub struct SupervisorBuilder {
    process: SupervisedProcess,
    liveness: Box<dyn LivenessCheck>,
    launcher: Arc<dyn Launcher>,
    fault: Option<FaultWatch>,
    clock: Arc<dyn Clock>,
    table: Arc<dyn ProcessTable>,
    shutdown: Shutdown,
    restart: CoordinatorConfig,
    probe_interval: Duration,
}

impl SupervisorBuilder {
    fn new(
        process: SupervisedProcess,
        liveness: Box<dyn LivenessCheck>,
        launcher: Arc<dyn Launcher>,
    ) -> Self {
        Self {
            process,
            liveness,
            launcher,
            fault: None,
            clock: Arc::new(SystemClock),
            table: Arc::new(SystemProcessTable::new()),
            shutdown: Shutdown::never(),
            restart: CoordinatorConfig::default(),
            probe_interval: Duration::from_secs(constants::DEFAULT_PROBE_INTERVAL_SECS),
        }
    }

    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Process table used for conflict handling.
    #[must_use]
    pub fn process_table(mut self, table: Arc<dyn ProcessTable>) -> Self {
        self.table = table;
        self
    }

    #[must_use]
    pub fn shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    #[must_use]
    pub fn restart(mut self, config: CoordinatorConfig) -> Self {
        self.restart = config;
        self
    }

    #[must_use]
    pub fn probe_interval(mut self, interval: Duration) -> Self {
        self.probe_interval = interval;
        self
    }

    #[must_use]
    pub fn fault(mut self, watch: FaultWatch) -> Self {
        self.fault = Some(watch);
        self
    }

    pub fn build(self) -> Supervisor {
        let process = Arc::new(self.process);
        let mut coordinator = RestartCoordinator::new(
            Arc::clone(&process),
            self.restart,
            self.launcher,
            self.table,
            Arc::clone(&self.clock),
            self.shutdown.clone(),
        );
        if let Some(watch) = &self.fault {
            coordinator = coordinator.with_log_source(watch.detector.source());
        }
        let coordinator = Arc::new(coordinator);
        let now = self.clock.now();

        Supervisor {
            process,
            liveness: self.liveness,
            fault: self.fault,
            coordinator,
            clock: self.clock,
            shutdown: self.shutdown,
            probe_interval: self.probe_interval,
            next_probe_at: now,
            next_scan_at: now,
        }
    }
}
