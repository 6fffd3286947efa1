//! Log-based fault detection.
//!
//! The patched library's crash does not always kill the daemon. Sometimes it
//! logs an error and limps on, so liveness alone misses it. The detector
//! looks for a known [`FaultSignature`] in log entries newer than a window.
//!
//! Log sources:
//!
//! - [`FileLogSource`] follows a plain log file into a bounded ring buffer
//! - [`JournalLogSource`] queries the systemd journal for a unit
//! - [`MemoryLogSource`] holds timestamped lines, for tests

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fs::{File, Metadata};
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::clock::{self, Clock};
use super::service_manager::run_command;
use super::types::FaultSignature;
use crate::constants;
use crate::error::{Result, SupervisorError};

#[async_trait]
pub trait LogSource: Send + Sync {
    /// Lines logged at or after `since`, oldest first.
    async fn lines_since(&self, since: DateTime<Utc>) -> Result<Vec<String>>;

    /// Drop everything logged so far, so it is never reported again.
    ///
    /// The restart coordinator calls this after the old instance is stopped
    /// and before the new one is launched. Sources whose entries carry their
    /// own write time need nothing here.
    async fn skip_backlog(&self) -> Result<()> {
        Ok(())
    }
}

/// Whether any line contains the signature.
pub fn contains_signature<S: AsRef<str>>(lines: &[S], signature: &FaultSignature) -> bool {
    lines.iter().any(|line| signature.matches(line.as_ref()))
}

pub struct FaultDetector {
    source: Arc<dyn LogSource>,
    clock: Arc<dyn Clock>,
}

impl FaultDetector {
    pub fn new(source: Box<dyn LogSource>, clock: Arc<dyn Clock>) -> Self {
        Self {
            source: Arc::from(source),
            clock,
        }
    }

    /// The source being scanned, shared with the restart coordinator.
    pub fn source(&self) -> Arc<dyn LogSource> {
        Arc::clone(&self.source)
    }

    /// Whether `signature` appears in entries newer than `window`.
    pub async fn scan(&self, window: Duration, signature: &FaultSignature) -> Result<bool> {
        let since = clock::sub(self.clock.now(), window);
        self.scan_since(since, signature).await
    }

    /// Whether `signature` appears in entries at or after `since`.
    pub async fn scan_since(
        &self,
        since: DateTime<Utc>,
        signature: &FaultSignature,
    ) -> Result<bool> {
        let lines = self.source.lines_since(since).await?;
        let found = contains_signature(&lines, signature);
        debug!(lines = lines.len(), found, %since, "Fault scan complete");
        Ok(found)
    }
}

// =============================================================================
// File source
// =============================================================================

struct FollowState {
    offset: u64,
    partial: String,
    primed: bool,
    lines: VecDeque<(DateTime<Utc>, String)>,
}

/// Follows a log file by byte offset.
///
/// Lines already in the file when it is first read are stamped with the
/// file's modification time, so old crash traces from a previous run fall
/// outside the window. Lines appended later are stamped with the clock when
/// they are read. A file that shrinks is read again from the start.
///
/// File IO runs on the blocking pool.
pub struct FileLogSource {
    follower: Arc<Follower>,
}

struct Follower {
    path: PathBuf,
    clock: Arc<dyn Clock>,
    capacity: usize,
    state: Mutex<FollowState>,
}

impl FileLogSource {
    pub fn new(path: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        Self::with_capacity(path, clock, constants::LOG_RING_CAPACITY)
    }

    pub fn with_capacity(path: impl Into<PathBuf>, clock: Arc<dyn Clock>, capacity: usize) -> Self {
        Self {
            follower: Arc::new(Follower {
                path: path.into(),
                clock,
                capacity: capacity.max(1),
                state: Mutex::new(FollowState {
                    offset: 0,
                    partial: String::new(),
                    primed: false,
                    lines: VecDeque::new(),
                }),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.follower.path
    }

    async fn blocking<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Follower) -> Result<T> + Send + 'static,
    {
        let follower = Arc::clone(&self.follower);
        tokio::task::spawn_blocking(move || op(&follower))
            .await
            .map_err(|e| SupervisorError::LogSource(format!("log read task failed: {e}")))?
    }
}

impl Follower {
    fn open(&self) -> Result<Option<(File, Metadata)>> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(SupervisorError::io(
                    format!("opening {}", self.path.display()),
                    e,
                ));
            },
        };
        let metadata = file
            .metadata()
            .map_err(|e| SupervisorError::io(format!("stat {}", self.path.display()), e))?;
        Ok(Some((file, metadata)))
    }

    fn refresh(&self, state: &mut FollowState) -> Result<()> {
        let Some((mut file, metadata)) = self.open()? else {
            return Ok(());
        };
        let len = metadata.len();

        if len < state.offset {
            debug!(path = %self.path.display(), "Log file shrank, reading from start");
            state.offset = 0;
            state.partial.clear();
        }

        let mut start = state.offset;
        if len - start > constants::LOG_MAX_READ_BYTES {
            start = len - constants::LOG_MAX_READ_BYTES;
            state.partial.clear();
        }
        if start == len {
            state.primed = true;
            return Ok(());
        }

        file.seek(SeekFrom::Start(start))
            .map_err(|e| SupervisorError::io(format!("seeking {}", self.path.display()), e))?;
        let mut buf = Vec::new();
        file.take(len - start)
            .read_to_end(&mut buf)
            .map_err(|e| SupervisorError::io(format!("reading {}", self.path.display()), e))?;
        state.offset = start + buf.len() as u64;

        let stamp = if state.primed {
            self.clock.now()
        } else {
            metadata
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| self.clock.now())
        };
        state.primed = true;

        let text = format!("{}{}", state.partial, String::from_utf8_lossy(&buf));
        state.partial.clear();

        let mut pieces: Vec<&str> = text.split('\n').collect();
        // The last piece has no newline yet, keep it for the next read.
        if let Some(last) = pieces.pop() {
            state.partial.push_str(last);
        }

        for line in pieces {
            let line = line.strip_suffix('\r').unwrap_or(line);
            state.lines.push_back((stamp, line.to_string()));
            if state.lines.len() > self.capacity {
                state.lines.pop_front();
            }
        }
        Ok(())
    }

    fn lines_since(&self, since: DateTime<Utc>) -> Result<Vec<String>> {
        let mut state = self.state.lock();
        self.refresh(&mut state)?;

        // Callers only ever move `since` forward, so older lines are done with.
        while state.lines.front().is_some_and(|(at, _)| *at < since) {
            state.lines.pop_front();
        }

        Ok(state.lines.iter().map(|(_, line)| line.clone()).collect())
    }

    fn skip_backlog(&self) -> Result<()> {
        let mut state = self.state.lock();
        let len = self.open()?.map_or(0, |(_, metadata)| metadata.len());
        debug!(
            path = %self.path.display(),
            skipped_bytes = len.saturating_sub(state.offset),
            dropped_lines = state.lines.len(),
            "Skipping log backlog"
        );
        state.offset = len;
        state.partial.clear();
        state.lines.clear();
        state.primed = true;
        Ok(())
    }
}

#[async_trait]
impl LogSource for FileLogSource {
    async fn lines_since(&self, since: DateTime<Utc>) -> Result<Vec<String>> {
        self.blocking(move |follower| follower.lines_since(since)).await
    }

    async fn skip_backlog(&self) -> Result<()> {
        self.blocking(Follower::skip_backlog).await
    }
}

// =============================================================================
// Journal source
// =============================================================================

/// Reads a unit's messages from the systemd journal.
///
/// Journal entries carry their write time, so `--since` alone keeps the
/// previous instance's lines out after a restart.
#[derive(Debug, Clone)]
pub struct JournalLogSource {
    program: String,
    unit: String,
    timeout: Duration,
}

impl JournalLogSource {
    pub fn new(unit: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: "journalctl".to_string(),
            unit: unit.into(),
            timeout,
        }
    }

    /// Use a different binary, e.g. a wrapper that adds `--user`.
    #[must_use]
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }
}

/// `journalctl --since` argument for `at`, with microseconds.
pub fn journal_since_arg(at: DateTime<Utc>) -> String {
    format!("@{}.{:06}", at.timestamp(), at.timestamp_subsec_micros())
}

#[async_trait]
impl LogSource for JournalLogSource {
    async fn lines_since(&self, since: DateTime<Utc>) -> Result<Vec<String>> {
        let since_arg = journal_since_arg(since);
        let output = run_command(
            &self.program,
            &[
                "-u",
                &self.unit,
                "--since",
                &since_arg,
                "-o",
                "cat",
                "--no-pager",
                "-q",
            ],
            self.timeout,
        )
        .await?;

        if !output.status.success() {
            return Err(SupervisorError::LogSource(format!(
                "{} for '{}' exited with {}: {}",
                self.program,
                self.unit,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::to_string)
            .collect())
    }
}

// =============================================================================
// Memory source
// =============================================================================

#[derive(Debug, Default)]
pub struct MemoryLogSource {
    lines: Mutex<Vec<(DateTime<Utc>, String)>>,
}

impl MemoryLogSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, at: DateTime<Utc>, line: impl Into<String>) {
        self.lines.lock().push((at, line.into()));
    }
}

#[async_trait]
impl LogSource for MemoryLogSource {
    async fn lines_since(&self, since: DateTime<Utc>) -> Result<Vec<String>> {
        Ok(self
            .lines
            .lock()
            .iter()
            .filter(|(at, _)| *at >= since)
            .map(|(_, line)| line.clone())
            .collect())
    }
}

#[async_trait]
impl<T: LogSource + ?Sized> LogSource for Arc<T> {
    async fn lines_since(&self, since: DateTime<Utc>) -> Result<Vec<String>> {
        (**self).lines_since(since).await
    }

    async fn skip_backlog(&self) -> Result<()> {
        (**self).skip_backlog().await
    }
}
