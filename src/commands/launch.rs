//! Launch the process once.
//!
//! Covers the wrapper-script case: start the daemon with its environment
//! overrides, record the pid, and exit while the daemon keeps running.

use anyhow::{Context, Result, bail};
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

use crate::supervisor::{
    Clock, LaunchHandle, Launcher, LivenessCheck, ProcessState, ProcessTable, SupervisedProcess,
    SystemClock, SystemProcessTable,
};

pub async fn execute(config_path: Option<&Path>, force: bool) -> Result<()> {
    let config = super::load_config(config_path)?;
    let process = config.to_process();

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let table: Arc<dyn ProcessTable> = Arc::new(SystemProcessTable::new());
    let check = super::liveness(&config, Arc::clone(&table));
    let launcher = super::launcher(&config, table, clock)?;

    let handle = launch_once(&process, check.as_ref(), launcher.as_ref(), force).await?;

    match handle.pid {
        Some(pid) => println!("{} started (pid {pid})", process.name),
        None => println!("{} started", process.name),
    }
    Ok(())
}

/// Probe first so a second launch does not start a duplicate.
///
/// A running instance is refused unless `force` is set, in which case it is
/// stopped first. An `Unknown` probe may have missed a live instance, so that
/// case is stopped too.
pub async fn launch_once(
    process: &SupervisedProcess,
    check: &dyn LivenessCheck,
    launcher: &dyn Launcher,
    force: bool,
) -> Result<LaunchHandle> {
    let state = check
        .probe(process)
        .await
        .with_context(|| format!("Failed to probe {}", process.name))?;

    match state {
        ProcessState::Running if !force => {
            bail!(
                "{} is already running; use --force to stop it and launch again",
                process.name
            );
        },
        ProcessState::NotRunning => {},
        ProcessState::Running | ProcessState::Unknown => {
            if state == ProcessState::Unknown {
                warn!(process = %process.name, "Liveness unknown, stopping any instance first");
            }
            launcher
                .stop(process)
                .await
                .with_context(|| format!("Failed to stop {}", process.name))?;
        },
    }

    launcher
        .launch(process)
        .await
        .with_context(|| format!("Failed to launch {}", process.name))
}
