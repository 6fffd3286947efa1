//! Supervision of a single external process.
//!
//! The pieces are small and injectable so the loop can be driven with a
//! manual clock and fakes:
//!
//! - [`types`]: the supervised process, probe states, restart reasons
//! - [`clock`]: wall clock and sleeping, real or manual
//! - [`pid_store`]: where the launched pid is recorded
//! - [`process_table`]: OS process enumeration and signalling
//! - [`service_manager`]: `systemctl` queries and restarts
//! - [`launcher`]: starting and stopping the process
//! - [`liveness`]: deciding whether the process is running
//! - [`fault`]: finding a fault signature in recent log output
//! - [`coordinator`]: the non-reentrant restart state machine
//! - [`runner`]: the loop tying probes, scans and restarts together

pub mod clock;
pub mod coordinator;
pub mod fault;
pub mod launcher;
pub mod liveness;
pub mod pid_store;
pub mod process_table;
pub mod runner;
pub mod service_manager;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use coordinator::{CoordinatorConfig, RestartCoordinator};
pub use fault::{FaultDetector, FileLogSource, JournalLogSource, LogSource, MemoryLogSource};
pub use launcher::{CommandLauncher, LaunchHandle, Launcher, ServiceManagerLauncher};
pub use liveness::{LivenessCheck, ProcessTableMatch, ServiceManagerQuery};
pub use pid_store::{FilePidStore, MemoryPidStore, PidStore};
pub use process_table::{ProcessEntry, ProcessTable, SystemProcessTable};
pub use runner::{CycleReport, FaultWatch, Supervisor, SupervisorBuilder};
pub use service_manager::ServiceManager;
pub use types::{
    CoordinatorState, EnvOverride, FaultSignature, ProcessState, RestartEvent, RestartOutcome,
    RestartReason, SupervisedProcess,
};
