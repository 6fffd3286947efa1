//! Default file locations.
//!
//! - [`get_warden_dir`] - `~/.warden/` (or `$WARDEN_HOME`)
//! - [`get_config_path`] - `~/.warden/warden.toml`
//! - [`get_pid_path`] - `~/.warden/warden.pid`

use anyhow::{Context, Result};
use std::path::PathBuf;

use crate::constants;

/// Get the warden base directory.
///
/// Resolution order:
/// 1. `WARDEN_HOME` environment variable (if set and non-empty)
/// 2. `~/.warden/`
pub fn get_warden_dir() -> Result<PathBuf> {
    if let Ok(home) = std::env::var(constants::HOME_ENV_VAR)
        && !home.is_empty()
    {
        return Ok(PathBuf::from(home));
    }

    let home = dirs::home_dir().context("Failed to get home directory")?;
    Ok(home.join(".warden"))
}

/// Get the default config path: `~/.warden/warden.toml`
pub fn get_config_path() -> Result<PathBuf> {
    Ok(get_warden_dir()?.join(constants::CONFIG_FILE_NAME))
}

/// Get the default PID file path: `~/.warden/warden.pid`
pub fn get_pid_path() -> Result<PathBuf> {
    Ok(get_warden_dir()?.join(constants::PID_FILE_NAME))
}
