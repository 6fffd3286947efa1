//! CLI command implementations for warden.
//!
//! - [`run`] - the supervisor loop, until SIGINT/SIGTERM
//! - [`launch`] - start the process once and record its pid
//! - [`probe`] - one liveness probe
//! - [`scan`] - one fault scan
//! - [`status`] - whether the recorded pid is alive
//! - [`check`] - load and validate the configuration
//!
//! The helpers below turn a validated [`Config`] into supervisor parts.

pub mod check;
pub mod launch;
pub mod probe;
pub mod run;
pub mod scan;
pub mod status;

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::config::{Config, LogSourceKind, ProbeStrategy, RestartMode};
use crate::constants;
use crate::supervisor::{
    Clock, CommandLauncher, FaultDetector, FaultWatch, FilePidStore, FileLogSource,
    JournalLogSource, Launcher, LivenessCheck, LogSource, PidStore, ProcessTable,
    ProcessTableMatch, ServiceManager, ServiceManagerLauncher, ServiceManagerQuery,
};

/// Load the configuration from `path` (or the default location), validate
/// it and log any warnings.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    let validation = config.validate()?;
    for warning in &validation.warnings {
        warn!("{warning}");
    }
    Ok(config)
}

fn service_manager() -> ServiceManager {
    ServiceManager::new(Duration::from_secs(constants::SERVICE_MANAGER_TIMEOUT_SECS))
}

pub fn pid_store(config: &Config) -> Result<Arc<dyn PidStore>> {
    Ok(Arc::new(FilePidStore::new(config.pid_path()?)))
}

pub fn liveness(config: &Config, table: Arc<dyn ProcessTable>) -> Box<dyn LivenessCheck> {
    match config.probe.strategy {
        ProbeStrategy::ProcessTable => {
            Box::new(ProcessTableMatch::new(table, config.probe.timeout()))
        },
        ProbeStrategy::ServiceManager => Box::new(ServiceManagerQuery::new(
            service_manager(),
        )),
    }
}

pub fn launcher(
    config: &Config,
    table: Arc<dyn ProcessTable>,
    clock: Arc<dyn Clock>,
) -> Result<Arc<dyn Launcher>> {
    let pid_store = pid_store(config)?;
    let launcher: Arc<dyn Launcher> = match config.restart.mode {
        RestartMode::Launcher => Arc::new(
            CommandLauncher::new(pid_store, table, clock).with_table_timeout(config.probe.timeout()),
        ),
        RestartMode::ServiceManager => {
            Arc::new(ServiceManagerLauncher::new(service_manager(), pid_store))
        },
    };
    Ok(launcher)
}

/// The configured log source, or `None` when fault detection is off.
pub fn log_source(config: &Config, clock: Arc<dyn Clock>) -> Result<Option<Box<dyn LogSource>>> {
    let Some(fault) = &config.fault else {
        return Ok(None);
    };

    let source: Box<dyn LogSource> = match fault.source {
        LogSourceKind::File => {
            let path = config
                .fault_log_path()
                .context("fault.source = \"file\" requires a log path")?;
            Box::new(FileLogSource::new(path, clock))
        },
        LogSourceKind::Journal => {
            let unit = config
                .fault_unit()
                .context("fault.source = \"journal\" requires a unit")?;
            Box::new(JournalLogSource::new(
                unit,
                Duration::from_secs(constants::SERVICE_MANAGER_TIMEOUT_SECS),
            ))
        },
    };
    Ok(Some(source))
}

pub fn fault_watch(config: &Config, clock: Arc<dyn Clock>) -> Result<Option<FaultWatch>> {
    let Some(fault) = &config.fault else {
        return Ok(None);
    };
    let Some(source) = log_source(config, Arc::clone(&clock))? else {
        return Ok(None);
    };

    Ok(Some(FaultWatch {
        detector: FaultDetector::new(source, clock),
        signature: fault.signature()?,
        window: fault.window(),
        interval: fault.interval(),
    }))
}
