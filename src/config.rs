//! Configuration for a supervised process.
//!
//! Loaded from `warden.toml`:
//!
//! - [`ProcessConfig`] - what to run and how to recognise it
//! - [`ProbeConfig`] - liveness probe strategy and timing
//! - [`FaultConfig`] - optional log-based fault detection
//! - [`RestartConfig`] - restart mode, cooldown and conflict handling
//!
//! Everything except `[process]` has defaults from [`crate::constants`].

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants;
use crate::paths;
use crate::supervisor::{CoordinatorConfig, FaultSignature, SupervisedProcess};

/// Result of configuration validation.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// Non-fatal warnings that should be logged but don't prevent operation.
    pub warnings: Vec<String>,
}

impl ValidationResult {
    /// Returns true if there are any warnings.
    #[must_use]
    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

/// warden.toml configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub process: ProcessConfig,
    #[serde(default)]
    pub probe: ProbeConfig,
    #[serde(default)]
    pub fault: Option<FaultConfig>,
    #[serde(default)]
    pub restart: RestartConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProcessConfig {
    pub name: String,
    pub executable: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    /// Command-line substring identifying the process; defaults to the
    /// executable's file name.
    #[serde(default)]
    pub match_pattern: Option<String>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub pid_file: Option<PathBuf>,
    #[serde(default)]
    pub log_file: Option<PathBuf>,
    #[serde(default)]
    pub env: Vec<EnvEntry>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct EnvEntry {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProbeStrategy {
    #[default]
    ProcessTable,
    ServiceManager,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProbeConfig {
    #[serde(default)]
    pub strategy: ProbeStrategy,
    #[serde(default = "default_probe_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_probe_timeout")]
    pub timeout_secs: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            strategy: ProbeStrategy::default(),
            interval_secs: default_probe_interval(),
            timeout_secs: default_probe_timeout(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogSourceKind {
    #[default]
    File,
    Journal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FaultConfig {
    pub signature: String,
    #[serde(default)]
    pub source: LogSourceKind,
    /// Log file for the `file` source; defaults to `process.log_file`.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Unit for the `journal` source; defaults to `process.unit`.
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default = "default_fault_window")]
    pub window_secs: u64,
    #[serde(default = "default_scan_interval")]
    pub interval_secs: u64,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RestartMode {
    #[default]
    Launcher,
    ServiceManager,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RestartConfig {
    #[serde(default)]
    pub mode: RestartMode,
    #[serde(default = "default_cooldown")]
    pub cooldown_secs: u64,
    #[serde(default)]
    pub conflict_pattern: Option<String>,
    #[serde(default = "default_conflict_max_attempts")]
    pub conflict_max_attempts: u32,
    #[serde(default = "default_conflict_interval")]
    pub conflict_interval_secs: u64,
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self {
            mode: RestartMode::default(),
            cooldown_secs: default_cooldown(),
            conflict_pattern: None,
            conflict_max_attempts: default_conflict_max_attempts(),
            conflict_interval_secs: default_conflict_interval(),
        }
    }
}

fn default_probe_interval() -> u64 {
    constants::DEFAULT_PROBE_INTERVAL_SECS
}

fn default_probe_timeout() -> u64 {
    constants::DEFAULT_PROBE_TIMEOUT_SECS
}

fn default_fault_window() -> u64 {
    constants::DEFAULT_FAULT_WINDOW_SECS
}

fn default_scan_interval() -> u64 {
    constants::DEFAULT_SCAN_INTERVAL_SECS
}

fn default_cooldown() -> u64 {
    constants::DEFAULT_RESTART_COOLDOWN_SECS
}

fn default_conflict_max_attempts() -> u32 {
    constants::DEFAULT_CONFLICT_MAX_ATTEMPTS
}

fn default_conflict_interval() -> u64 {
    constants::DEFAULT_CONFLICT_INTERVAL_SECS
}

// =============================================================================
// Loading and validation
// =============================================================================

impl Config {
    /// Load configuration from the default location (`~/.warden/warden.toml`).
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or contains invalid TOML.
    pub fn load() -> Result<Self> {
        Self::load_from(paths::get_config_path()?)
    }

    /// Load configuration from the specified path.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The file cannot be read (IO error)
    /// - The file contains invalid TOML syntax
    /// - Required fields are missing or have invalid types
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// Returns a `ValidationResult` containing any non-fatal warnings.
    ///
    /// # Errors
    ///
    /// Returns an error listing every problem found, for example an empty
    /// executable, a zero interval, or a service-manager setting without a
    /// unit.
    pub fn validate(&self) -> Result<ValidationResult> {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        // 1. Process
        let process = &self.process;
        if process.name.trim().is_empty() {
            errors.push("process.name cannot be empty".to_string());
        }
        if process.executable.as_os_str().is_empty() {
            errors.push("process.executable cannot be empty".to_string());
        } else if self.restart.mode == RestartMode::Launcher && !process.executable.exists() {
            warnings.push(format!(
                "Executable does not exist yet: {}\n  \
                 Launches will fail until it is installed",
                process.executable.display()
            ));
        }
        if let Some(pattern) = &process.match_pattern
            && pattern.is_empty()
        {
            errors.push(
                "process.match_pattern cannot be empty\n  \
                 Omit it to match on the executable file name"
                    .to_string(),
            );
        }
        for entry in &process.env {
            if entry.key.is_empty() {
                errors.push("process.env key cannot be empty".to_string());
            } else if entry.key.contains('=') {
                errors.push(format!(
                    "process.env key '{}' cannot contain '='",
                    entry.key
                ));
            }
        }

        // 2. Probe
        if self.probe.interval_secs == 0 {
            errors.push("probe.interval_secs must be greater than 0".to_string());
        }
        if self.probe.timeout_secs == 0 {
            errors.push("probe.timeout_secs must be greater than 0".to_string());
        }
        if self.probe.strategy == ProbeStrategy::ServiceManager && process.unit.is_none() {
            errors.push(
                "probe.strategy = \"service_manager\" requires process.unit".to_string(),
            );
        }
        if self.probe.timeout_secs > 0
            && self.probe.interval_secs > 0
            && self.probe.timeout_secs >= self.probe.interval_secs
        {
            warnings.push(format!(
                "probe.timeout_secs ({}) is not shorter than probe.interval_secs ({})\n  \
                 A slow probe will delay the next cycle",
                self.probe.timeout_secs, self.probe.interval_secs
            ));
        }

        // 3. Fault detection
        if let Some(fault) = &self.fault {
            if fault.signature.is_empty() {
                errors.push("fault.signature cannot be empty".to_string());
            }
            if fault.window_secs == 0 {
                errors.push("fault.window_secs must be greater than 0".to_string());
            }
            if fault.interval_secs == 0 {
                errors.push("fault.interval_secs must be greater than 0".to_string());
            }
            match fault.source {
                LogSourceKind::File if self.fault_log_path().is_none() => {
                    errors.push(
                        "fault.source = \"file\" requires fault.path or process.log_file"
                            .to_string(),
                    );
                },
                LogSourceKind::Journal if self.fault_unit().is_none() => {
                    errors.push(
                        "fault.source = \"journal\" requires fault.unit or process.unit"
                            .to_string(),
                    );
                },
                _ => {},
            }
            if fault.window_secs > 0 && fault.window_secs < fault.interval_secs {
                warnings.push(format!(
                    "fault.window_secs ({}) is shorter than fault.interval_secs ({})\n  \
                     Faults logged between scans may be missed",
                    fault.window_secs, fault.interval_secs
                ));
            }
        }

        // 4. Restart
        let restart = &self.restart;
        if restart.mode == RestartMode::ServiceManager && process.unit.is_none() {
            errors.push("restart.mode = \"service_manager\" requires process.unit".to_string());
        }
        if let Some(pattern) = &restart.conflict_pattern {
            if pattern.is_empty() {
                errors.push("restart.conflict_pattern cannot be empty".to_string());
            }
            if restart.conflict_max_attempts == 0 {
                errors.push(
                    "restart.conflict_max_attempts must be greater than 0 when \
                     restart.conflict_pattern is set"
                        .to_string(),
                );
            }
            if restart.conflict_interval_secs == 0 {
                errors.push(
                    "restart.conflict_interval_secs must be greater than 0 when \
                     restart.conflict_pattern is set"
                        .to_string(),
                );
            }
        }
        if restart.cooldown_secs > self.probe.interval_secs && self.probe.interval_secs > 0 {
            warnings.push(format!(
                "restart.cooldown_secs ({}) is longer than probe.interval_secs ({})\n  \
                 Some down probes will not trigger a restart",
                restart.cooldown_secs, self.probe.interval_secs
            ));
        }

        if !errors.is_empty() {
            anyhow::bail!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            );
        }

        Ok(ValidationResult { warnings })
    }

    // =========================================================================
    // Derived values
    // =========================================================================

    /// The supervised process described by `[process]`.
    pub fn to_process(&self) -> SupervisedProcess {
        let p = &self.process;
        let mut process = SupervisedProcess::new(p.name.clone(), p.executable.clone())
            .with_args(p.args.iter().cloned());
        for entry in &p.env {
            process = process.with_env(entry.key.clone(), entry.value.clone());
        }
        if let Some(pattern) = &p.match_pattern {
            process = process.with_match_pattern(pattern.clone());
        }
        if let Some(unit) = &p.unit {
            process = process.with_unit(unit.clone());
        }
        if let Some(log_file) = &p.log_file {
            process = process.with_log_file(log_file.clone());
        }
        process
    }

    /// PID file location: `process.pid_file`, else `~/.warden/warden.pid`.
    pub fn pid_path(&self) -> Result<PathBuf> {
        match &self.process.pid_file {
            Some(path) => Ok(path.clone()),
            None => paths::get_pid_path(),
        }
    }

    /// Log file scanned by the `file` fault source.
    pub fn fault_log_path(&self) -> Option<&Path> {
        self.fault
            .as_ref()
            .and_then(|f| f.path.as_deref())
            .or(self.process.log_file.as_deref())
    }

    /// Unit queried by the `journal` fault source.
    pub fn fault_unit(&self) -> Option<&str> {
        self.fault
            .as_ref()
            .and_then(|f| f.unit.as_deref())
            .or(self.process.unit.as_deref())
    }
}

impl ProbeConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl FaultConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// # Errors
    ///
    /// Returns an error if the signature is empty.
    pub fn signature(&self) -> Result<FaultSignature> {
        FaultSignature::new(self.signature.clone()).context("Invalid fault.signature")
    }
}

impl RestartConfig {
    /// Coordinator settings. Conflict scans share the probe's time budget.
    pub fn coordinator_config(&self, probe: &ProbeConfig) -> CoordinatorConfig {
        CoordinatorConfig {
            cooldown: Duration::from_secs(self.cooldown_secs),
            conflict_pattern: self.conflict_pattern.clone(),
            conflict_max_attempts: self.conflict_max_attempts,
            conflict_interval: Duration::from_secs(self.conflict_interval_secs),
            table_timeout: probe.timeout(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MINIMAL: &str = r#"
[process]
name = "agent"
executable = "/bin/sh"
"#;

    fn parse(toml_str: &str) -> Config {
        toml::from_str(toml_str).unwrap()
    }

    fn validation_error(config: &Config) -> String {
        config.validate().unwrap_err().to_string()
    }

    #[test]
    fn test_parse_minimal_config_uses_defaults() {
        let config = parse(MINIMAL);

        assert_eq!(config.process.name, "agent");
        assert!(config.process.args.is_empty());
        assert_eq!(config.probe.strategy, ProbeStrategy::ProcessTable);
        assert_eq!(config.probe.interval_secs, constants::DEFAULT_PROBE_INTERVAL_SECS);
        assert_eq!(config.probe.timeout_secs, constants::DEFAULT_PROBE_TIMEOUT_SECS);
        assert!(config.fault.is_none());
        assert_eq!(config.restart.mode, RestartMode::Launcher);
        assert_eq!(config.restart.cooldown_secs, constants::DEFAULT_RESTART_COOLDOWN_SECS);
        assert_eq!(
            config.restart.conflict_max_attempts,
            constants::DEFAULT_CONFLICT_MAX_ATTEMPTS
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_full_config() {
        let config = parse(
            r#"
[process]
name = "vpnagentd"
executable = "/opt/cisco/secureclient/bin/vpnagentd"
args = ["-execv_instance"]
match_pattern = "vpnagentd"
unit = "vpnagentd.service"
pid_file = "/run/vpnagentd.pid"
log_file = "/var/log/vpnagentd.log"

[[process.env]]
key = "LD_LIBRARY_PATH"
value = "/opt/libxml2-fixed/lib"

[[process.env]]
key = "LD_PRELOAD"
value = "/opt/libxml2-fixed/lib/libxml2.so.2"

[probe]
strategy = "service_manager"
interval_secs = 15
timeout_secs = 3

[fault]
signature = "xmlGetPropNodeInternal"
source = "journal"
window_secs = 120
interval_secs = 20

[restart]
mode = "service_manager"
cooldown_secs = 5
conflict_pattern = "vpndownloader"
conflict_max_attempts = 4
conflict_interval_secs = 3
"#,
        );

        assert_eq!(config.process.env.len(), 2);
        assert_eq!(config.process.env[1].key, "LD_PRELOAD");
        assert_eq!(config.probe.strategy, ProbeStrategy::ServiceManager);
        assert_eq!(config.probe.interval(), Duration::from_secs(15));

        let fault = config.fault.as_ref().unwrap();
        assert_eq!(fault.source, LogSourceKind::Journal);
        assert_eq!(fault.window(), Duration::from_secs(120));
        assert_eq!(config.fault_unit(), Some("vpnagentd.service"));

        assert_eq!(config.restart.mode, RestartMode::ServiceManager);
        let coordinator = config.restart.coordinator_config(&config.probe);
        assert_eq!(coordinator.cooldown, Duration::from_secs(5));
        assert_eq!(coordinator.conflict_pattern.as_deref(), Some("vpndownloader"));
        assert_eq!(coordinator.conflict_budget(), Duration::from_secs(12));
        assert_eq!(coordinator.table_timeout, config.probe.timeout());

        assert_eq!(config.pid_path().unwrap(), PathBuf::from("/run/vpnagentd.pid"));
    }

    #[test]
    fn test_to_process_maps_fields_in_order() {
        let config = parse(
            r#"
[process]
name = "agent"
executable = "/opt/vpn/vpnagentd"
args = ["-a", "-b"]
log_file = "/tmp/agent.log"

[[process.env]]
key = "A"
value = "1"

[[process.env]]
key = "B"
value = "2"
"#,
        );

        let process = config.to_process();

        assert_eq!(process.name, "agent");
        assert_eq!(process.args, ["-a", "-b"]);
        assert_eq!(process.match_pattern, "vpnagentd");
        let keys: Vec<&str> = process.env.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, ["A", "B"]);
        assert_eq!(process.log_file.as_deref(), Some(Path::new("/tmp/agent.log")));
        assert!(process.unit.is_none());
    }

    #[test]
    fn test_fault_path_defaults_to_process_log() {
        let config = parse(
            r#"
[process]
name = "agent"
executable = "/bin/sh"
log_file = "/var/log/agent.log"

[fault]
signature = "boom"
"#,
        );

        assert_eq!(config.fault_log_path(), Some(Path::new("/var/log/agent.log")));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_empty_executable() {
        let config = parse(
            r#"
[process]
name = "agent"
executable = ""
"#,
        );
        assert!(validation_error(&config).contains("process.executable cannot be empty"));
    }

    #[test]
    fn test_validate_env_keys() {
        let config = parse(
            r#"
[process]
name = "agent"
executable = "/bin/sh"

[[process.env]]
key = ""
value = "x"

[[process.env]]
key = "A=B"
value = "x"
"#,
        );

        let err = validation_error(&config);
        assert!(err.contains("env key cannot be empty"));
        assert!(err.contains("'A=B' cannot contain '='"));
    }

    #[test]
    fn test_validate_zero_intervals() {
        let mut config = parse(MINIMAL);
        config.probe.interval_secs = 0;
        config.probe.timeout_secs = 0;

        let err = validation_error(&config);
        assert!(err.contains("probe.interval_secs"));
        assert!(err.contains("probe.timeout_secs"));
    }

    #[test]
    fn test_validate_service_manager_requires_unit() {
        let mut config = parse(MINIMAL);
        config.probe.strategy = ProbeStrategy::ServiceManager;
        config.restart.mode = RestartMode::ServiceManager;

        let err = validation_error(&config);
        assert!(err.contains("probe.strategy"));
        assert!(err.contains("restart.mode"));
    }

    #[test]
    fn test_validate_conflict_settings() {
        let mut config = parse(MINIMAL);
        config.restart.conflict_pattern = Some("vpndownloader".to_string());
        config.restart.conflict_max_attempts = 0;
        assert!(validation_error(&config).contains("conflict_max_attempts"));

        // Zero attempts are fine without a pattern.
        config.restart.conflict_pattern = None;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_fault_sources() {
        let config = parse(
            r#"
[process]
name = "agent"
executable = "/bin/sh"

[fault]
signature = ""
"#,
        );
        let err = validation_error(&config);
        assert!(err.contains("fault.signature cannot be empty"));
        assert!(err.contains("requires fault.path or process.log_file"));

        let config = parse(
            r#"
[process]
name = "agent"
executable = "/bin/sh"

[fault]
signature = "boom"
source = "journal"
"#,
        );
        assert!(validation_error(&config).contains("requires fault.unit or process.unit"));
    }

    #[test]
    fn test_validate_collects_all_errors() {
        let mut config = parse(MINIMAL);
        config.process.name = String::new();
        config.probe.interval_secs = 0;
        config.process.match_pattern = Some(String::new());

        let err = validation_error(&config);
        assert!(err.starts_with("Configuration validation failed:"));
        assert_eq!(err.matches("\n  - ").count(), 3);
    }

    #[test]
    fn test_validate_warnings() {
        let mut config = parse(MINIMAL);
        config.process.executable = PathBuf::from("/nonexistent/warden-test-binary");
        config.probe.interval_secs = 5;
        config.probe.timeout_secs = 5;
        config.restart.cooldown_secs = 60;
        config.process.log_file = Some(PathBuf::from("/tmp/agent.log"));
        config.fault = Some(FaultConfig {
            signature: "boom".to_string(),
            source: LogSourceKind::File,
            path: None,
            unit: None,
            window_secs: 10,
            interval_secs: 30,
        });

        let result = config.validate().unwrap();

        assert!(result.has_warnings());
        assert_eq!(result.warnings.len(), 4);
    }

    #[test]
    fn test_missing_executable_not_warned_in_service_manager_mode() {
        let mut config = parse(MINIMAL);
        config.process.executable = PathBuf::from("/nonexistent/warden-test-binary");
        config.process.unit = Some("agent.service".to_string());
        config.restart.mode = RestartMode::ServiceManager;

        let result = config.validate().unwrap();
        assert!(!result.has_warnings());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();

        let config = Config::load_from(file.path()).unwrap();
        assert_eq!(config.process.name, "agent");
    }

    #[test]
    fn test_load_from_missing_file() {
        let err = Config::load_from("/nonexistent/warden.toml").unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_load_from_invalid_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"[process\nname = ").unwrap();

        let err = Config::load_from(file.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }

    #[test]
    fn test_unknown_strategy_rejected() {
        let result: std::result::Result<Config, _> = toml::from_str(
            r#"
[process]
name = "agent"
executable = "/bin/sh"

[probe]
strategy = "pidfile"
"#,
        );
        assert!(result.is_err());
    }
}
