//! One-shot liveness probe.

use anyhow::{Context, Result};
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use crate::supervisor::{ProcessState, ProcessTable, SystemProcessTable};

/// Probe once and print the state. Exits 0 only when the process is running.
pub async fn execute(config_path: Option<&Path>) -> Result<ExitCode> {
    let config = super::load_config(config_path)?;
    let process = config.to_process();

    let table: Arc<dyn ProcessTable> = Arc::new(SystemProcessTable::new());
    let check = super::liveness(&config, table);

    let state = check
        .probe(&process)
        .await
        .with_context(|| format!("Failed to probe {}", process.name))?;

    println!("{}: {state}", process.name);
    Ok(if state == ProcessState::Running {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
