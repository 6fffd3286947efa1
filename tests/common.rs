//! Shared fakes for the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use tokio::sync::Notify;

use warden::supervisor::{
    CoordinatorState, LaunchHandle, Launcher, LivenessCheck, ProcessEntry, ProcessState,
    ProcessTable, RestartCoordinator, SupervisedProcess,
};
use warden::{Result, SupervisorError};

pub fn agent() -> SupervisedProcess {
    SupervisedProcess::new("agent", "/opt/vpn/vpnagentd")
        .with_env("LD_LIBRARY_PATH", "/opt/libxml2-fixed/lib")
}

/// Records coordinator states seen from inside the launcher and table.
#[derive(Default)]
pub struct Observer {
    coordinator: Mutex<Option<Arc<RestartCoordinator>>>,
    seen: Mutex<Vec<CoordinatorState>>,
}

impl Observer {
    pub fn attach(&self, coordinator: &Arc<RestartCoordinator>) {
        *self.coordinator.lock() = Some(Arc::clone(coordinator));
    }

    fn record(&self) {
        let state = self.coordinator.lock().as_ref().map(|c| c.state());
        if let Some(state) = state {
            self.seen.lock().push(state);
        }
    }

    pub fn seen(&self) -> Vec<CoordinatorState> {
        self.seen.lock().clone()
    }
}

// =============================================================================
// Liveness
// =============================================================================

/// Replays probe states, then reports `Running`.
pub struct ScriptedProbe {
    script: Mutex<VecDeque<ProcessState>>,
    pub calls: Arc<AtomicU32>,
}

impl ScriptedProbe {
    pub fn new(states: &[ProcessState]) -> Self {
        Self {
            script: Mutex::new(states.iter().copied().collect()),
            calls: Arc::new(AtomicU32::new(0)),
        }
    }
}

#[async_trait]
impl LivenessCheck for ScriptedProbe {
    async fn probe(&self, _process: &SupervisedProcess) -> Result<ProcessState> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .script
            .lock()
            .pop_front()
            .unwrap_or(ProcessState::Running))
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

// =============================================================================
// Launchers
// =============================================================================

/// Counts launches and records the coordinator state during each one.
#[derive(Default)]
pub struct RecordingLauncher {
    pub launches: AtomicU32,
    pub stops: AtomicU32,
    pub observer: Arc<Observer>,
}

#[async_trait]
impl Launcher for RecordingLauncher {
    async fn launch(&self, _process: &SupervisedProcess) -> Result<LaunchHandle> {
        self.observer.record();
        let n = self.launches.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(LaunchHandle { pid: Some(2000 + n) })
    }

    async fn stop(&self, _process: &SupervisedProcess) -> Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Blocks inside `launch` until released.
#[derive(Default)]
pub struct GatedLauncher {
    pub entered: Notify,
    pub release: Notify,
    pub launches: AtomicU32,
    pub finished: AtomicBool,
}

#[async_trait]
impl Launcher for GatedLauncher {
    async fn launch(&self, _process: &SupervisedProcess) -> Result<LaunchHandle> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        self.entered.notify_one();
        self.release.notified().await;
        self.finished.store(true, Ordering::SeqCst);
        Ok(LaunchHandle { pid: Some(3000) })
    }

    async fn stop(&self, _process: &SupervisedProcess) -> Result<()> {
        Ok(())
    }
}

// =============================================================================
// Process tables
// =============================================================================

/// A conflicting helper that never exits on its own.
#[derive(Default)]
pub struct StubbornHelperTable {
    pub finds: AtomicU32,
    pub killed: Mutex<Vec<u32>>,
    pub observer: Arc<Observer>,
}

pub const HELPER_PID: u32 = 4242;

impl ProcessTable for StubbornHelperTable {
    fn find(&self, _pattern: &str) -> Result<Vec<ProcessEntry>> {
        self.observer.record();
        self.finds.fetch_add(1, Ordering::SeqCst);
        if self.killed.lock().contains(&HELPER_PID) {
            return Ok(Vec::new());
        }
        Ok(vec![ProcessEntry {
            pid: HELPER_PID,
            command_line: "/opt/vpn/vpndownloader --update".to_string(),
        }])
    }

    fn is_alive(&self, pid: u32) -> Result<bool> {
        Ok(pid == HELPER_PID && !self.killed.lock().contains(&pid))
    }

    fn terminate(&self, pid: u32, force: bool) -> Result<()> {
        if !force {
            return Err(SupervisorError::signal(pid, "helper ignores SIGTERM"));
        }
        self.killed.lock().push(pid);
        Ok(())
    }
}

/// A table with nothing in it.
pub struct EmptyTable {
    pub observer: Arc<Observer>,
}

impl ProcessTable for EmptyTable {
    fn find(&self, _pattern: &str) -> Result<Vec<ProcessEntry>> {
        self.observer.record();
        Ok(Vec::new())
    }

    fn is_alive(&self, _pid: u32) -> Result<bool> {
        Ok(false)
    }

    fn terminate(&self, _pid: u32, _force: bool) -> Result<()> {
        Ok(())
    }
}
