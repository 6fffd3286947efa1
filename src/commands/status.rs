//! Report the recorded pid and whether it is alive.

use anyhow::Result;
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::supervisor::{ProcessTable, SystemProcessTable};

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub process: String,
    pub pid_file: PathBuf,
    pub pid: Option<u32>,
    pub alive: bool,
}

pub async fn execute(config_path: Option<&Path>, json: bool) -> Result<()> {
    let config = super::load_config(config_path)?;
    let pid_file = config.pid_path()?;
    let store = super::pid_store(&config)?;

    let pid = store.read()?;
    let alive = match pid {
        Some(pid) => {
            let table = SystemProcessTable::new();
            tokio::task::spawn_blocking(move || table.is_alive(pid)).await??
        },
        None => false,
    };

    let report = StatusReport {
        process: config.process.name.clone(),
        pid_file,
        pid,
        alive,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    match (report.pid, report.alive) {
        (Some(pid), true) => println!("{}: running (pid {pid})", report.process),
        (Some(pid), false) => println!("{}: not running (stale pid {pid})", report.process),
        (None, _) => println!(
            "{}: not running (no pid in {})",
            report.process,
            report.pid_file.display()
        ),
    }
    Ok(())
}
