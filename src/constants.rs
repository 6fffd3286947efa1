//! Default values shared by configuration and the supervisor.

// =============================================================================
// Scheduling
// =============================================================================

/// Seconds between liveness probes.
pub const DEFAULT_PROBE_INTERVAL_SECS: u64 = 30;

/// Upper bound on a single liveness probe.
pub const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 5;

/// Seconds between fault scans.
pub const DEFAULT_SCAN_INTERVAL_SECS: u64 = 30;

/// How far back a fault scan looks.
pub const DEFAULT_FAULT_WINDOW_SECS: u64 = 60;

// =============================================================================
// Restart
// =============================================================================

/// Minimum gap between the end of one restart and the start of the next.
pub const DEFAULT_RESTART_COOLDOWN_SECS: u64 = 10;

/// Polls for the conflicting helper before it is terminated.
pub const DEFAULT_CONFLICT_MAX_ATTEMPTS: u32 = 10;

/// Seconds between conflict polls.
pub const DEFAULT_CONFLICT_INTERVAL_SECS: u64 = 2;

/// Restart events kept in memory for inspection.
pub const RESTART_HISTORY_CAPACITY: usize = 64;

/// Polls after SIGTERM before a stopping process is sent SIGKILL.
pub const STOP_POLL_ATTEMPTS: u32 = 50;

/// Milliseconds between stop polls.
pub const STOP_POLL_INTERVAL_MS: u64 = 100;

// =============================================================================
// External commands and logs
// =============================================================================

/// Upper bound on `systemctl` and `journalctl` invocations.
pub const SERVICE_MANAGER_TIMEOUT_SECS: u64 = 10;

/// Lines retained by a followed log file.
pub const LOG_RING_CAPACITY: usize = 4096;

/// Maximum bytes read from a log file in one refresh.
pub const LOG_MAX_READ_BYTES: u64 = 8 * 1024 * 1024;

// =============================================================================
// Files
// =============================================================================

/// Configuration file name inside the warden directory.
pub const CONFIG_FILE_NAME: &str = "warden.toml";

/// Default PID file name inside the warden directory.
pub const PID_FILE_NAME: &str = "warden.pid";

/// Environment variable overriding the warden directory.
pub const HOME_ENV_VAR: &str = "WARDEN_HOME";
