//! Kestrel host daemon.
//!
//! Wires the virsh driver, the SSH certificate issuer and the sandbox
//! orchestrator together and keeps the expiry janitor running.

pub mod config;

pub use config::{ConfigError, KestrelConfig, LogFormat, CONFIG_ENV};
