//! PID file access.
//!
//! The launcher records the child's pid so that external tools, and systemd
//! units using `Type=forking` with `PIDFile=`, can track the real daemon.

use parking_lot::Mutex;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::{Result, SupervisorError};

pub trait PidStore: Send + Sync {
    /// Returns `None` when no pid is recorded.
    fn read(&self) -> Result<Option<u32>>;

    fn write(&self, pid: u32) -> Result<()>;

    /// Clearing an empty store is not an error.
    fn clear(&self) -> Result<()>;
}

/// PID file on disk: decimal pid followed by a newline.
#[derive(Debug, Clone)]
pub struct FilePidStore {
    path: PathBuf,
}

impl FilePidStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PidStore for FilePidStore {
    fn read(&self) -> Result<Option<u32>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(SupervisorError::io(
                    format!("reading {}", self.path.display()),
                    e,
                ));
            },
        };

        let trimmed = content.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }

        trimmed.parse::<u32>().map(Some).map_err(|_| {
            SupervisorError::PidStore(format!(
                "invalid pid '{trimmed}' in {}",
                self.path.display()
            ))
        })
    }

    fn write(&self, pid: u32) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|e| {
                SupervisorError::io(format!("creating {}", parent.display()), e)
            })?;
        }

        // Write then rename so readers never see a half-written file.
        let tmp = self.path.with_extension("pid.tmp");
        fs::write(&tmp, format!("{pid}\n"))
            .map_err(|e| SupervisorError::io(format!("writing {}", tmp.display()), e))?;
        fs::rename(&tmp, &self.path)
            .map_err(|e| SupervisorError::io(format!("renaming to {}", self.path.display()), e))
    }

    fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SupervisorError::io(
                format!("removing {}", self.path.display()),
                e,
            )),
        }
    }
}

/// In-memory store for tests and for running without a PID file.
#[derive(Debug, Default)]
pub struct MemoryPidStore {
    pid: Mutex<Option<u32>>,
}

impl MemoryPidStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PidStore for MemoryPidStore {
    fn read(&self) -> Result<Option<u32>> {
        Ok(*self.pid.lock())
    }

    fn write(&self, pid: u32) -> Result<()> {
        *self.pid.lock() = Some(pid);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.pid.lock() = None;
        Ok(())
    }
}
