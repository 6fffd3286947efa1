//! warden: keep one external process alive and fault-free.
//!
//! A small supervisor for a daemon that needs to be launched with
//! environment overrides and restarted when it dies or when its log shows a
//! known fault. See [`supervisor`] for the moving parts and [`commands`] for
//! the CLI.

#![deny(unsafe_code)]

pub mod commands;
pub mod config;
pub mod constants;
pub mod error;
pub mod paths;
pub mod signal;
pub mod supervisor;

pub use error::{Result, SupervisorError};
