//! Validate the configuration without starting anything.

use anyhow::Result;
use std::path::Path;

use crate::config::Config;
use crate::paths;

pub fn execute(config_path: Option<&Path>) -> Result<()> {
    let path = match config_path {
        Some(path) => path.to_path_buf(),
        None => paths::get_config_path()?,
    };
    let config = Config::load_from(&path)?;
    let validation = config.validate()?;

    println!("{}: ok", path.display());
    for warning in &validation.warnings {
        println!("warning: {warning}");
    }

    let process = config.to_process();
    println!("  process:  {} ({})", process.name, process.executable.display());
    println!("  match:    {}", process.match_pattern);
    println!(
        "  probe:    {:?} every {}s",
        config.probe.strategy, config.probe.interval_secs
    );
    match &config.fault {
        Some(fault) => println!(
            "  fault:    \"{}\" via {:?}, {}s window every {}s",
            fault.signature, fault.source, fault.window_secs, fault.interval_secs
        ),
        None => println!("  fault:    disabled"),
    }
    println!(
        "  restart:  {:?}, cooldown {}s",
        config.restart.mode, config.restart.cooldown_secs
    );
    if let Some(pattern) = &config.restart.conflict_pattern {
        println!(
            "  conflict: \"{pattern}\", up to {}s",
            config.restart.coordinator_config(&config.probe).conflict_budget().as_secs()
        );
    }
    Ok(())
}
