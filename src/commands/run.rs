//! Run the supervisor loop in the foreground.

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};

use crate::signal;
use crate::supervisor::{Clock, ProcessTable, Supervisor, SystemClock, SystemProcessTable};

/// Supervise the configured process until SIGINT or SIGTERM.
///
/// A restart in progress when the signal arrives is allowed to finish.
pub async fn execute(config_path: Option<&Path>) -> Result<()> {
    let config = super::load_config(config_path)?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let table: Arc<dyn ProcessTable> = Arc::new(SystemProcessTable::new());

    let (trigger, shutdown) = signal::channel();
    tokio::spawn(async move {
        if let Err(e) = signal::listen_for_signals(trigger).await {
            error!(error = %e, "Failed to install signal handlers");
        }
    });

    let mut builder = Supervisor::builder(
        config.to_process(),
        super::liveness(&config, Arc::clone(&table)),
        super::launcher(&config, Arc::clone(&table), Arc::clone(&clock))?,
    )
    .clock(Arc::clone(&clock))
    .process_table(table)
    .shutdown(shutdown)
    .restart(config.restart.coordinator_config(&config.probe))
    .probe_interval(config.probe.interval());

    if let Some(watch) = super::fault_watch(&config, clock)? {
        builder = builder.fault(watch);
    }

    let mut supervisor = builder.build();
    supervisor.run().await;

    let history = supervisor.coordinator().history();
    info!(
        process = %config.process.name,
        restarts = history.len(),
        history = %serde_json::to_string(&history)?,
        "Exiting"
    );
    Ok(())
}
