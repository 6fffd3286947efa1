//! One-shot fault scan.

use anyhow::{Context, Result};
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use crate::supervisor::{Clock, FaultDetector, SystemClock};

/// Scan the configured log once. Exits 1 when the signature is found.
pub async fn execute(config_path: Option<&Path>, window_secs: Option<u64>) -> Result<ExitCode> {
    let config = super::load_config(config_path)?;
    let fault = config
        .fault
        .as_ref()
        .context("No [fault] section in configuration; nothing to scan")?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let source = super::log_source(&config, Arc::clone(&clock))?
        .context("No log source configured")?;
    let detector = FaultDetector::new(source, clock);

    let window = window_secs.map_or_else(|| fault.window(), Duration::from_secs);
    let signature = fault.signature()?;
    let found = detector
        .scan(window, &signature)
        .await
        .context("Fault scan failed")?;

    if found {
        println!(
            "Fault signature \"{signature}\" found in the last {}s",
            window.as_secs()
        );
        Ok(ExitCode::FAILURE)
    } else {
        println!(
            "No fault signature in the last {}s",
            window.as_secs()
        );
        Ok(ExitCode::SUCCESS)
    }
}
