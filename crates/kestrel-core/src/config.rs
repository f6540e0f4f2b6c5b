//! Orchestrator configuration.

use crate::error::{CoreError, Result};
use std::time::Duration;

/// Configuration for [`SandboxService`](crate::SandboxService).
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// libvirt network new sandboxes attach to (default: `default`).
    pub network: String,
    /// vCPUs when the caller gives none (default: 2).
    pub default_vcpus: u32,
    /// Memory in MB when the caller gives none (default: 2048).
    pub default_memory_mb: u32,
    /// Command timeout when the caller gives none (default: 10 minutes).
    pub command_timeout: Duration,
    /// How long start waits for an address (default: 2 minutes).
    pub ip_discovery_timeout: Duration,
    /// SSH connect timeout (default: 15 seconds).
    pub ssh_connect_timeout: Duration,
    /// Optional ProxyJump host for reaching guests.
    pub ssh_proxy_jump: Option<String>,
    /// Login used with managed credentials when the caller gives none (default: `sandbox`).
    pub managed_username: String,
    /// Activity stream poll interval (default: 5 seconds).
    pub stream_interval: Duration,
    /// Janitor sweep interval (default: 1 minute).
    pub janitor_interval: Duration,
    /// Lifetime for sandboxes created without a TTL. `None` keeps them forever.
    pub default_ttl: Option<Duration>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            network: "default".into(),
            default_vcpus: 2,
            default_memory_mb: 2048,
            command_timeout: Duration::from_secs(10 * 60),
            ip_discovery_timeout: Duration::from_secs(2 * 60),
            ssh_connect_timeout: Duration::from_secs(15),
            ssh_proxy_jump: None,
            managed_username: "sandbox".into(),
            stream_interval: Duration::from_secs(5),
            janitor_interval: Duration::from_secs(60),
            default_ttl: None,
        }
    }
}

impl ServiceConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.network.trim().is_empty() {
            return Err(CoreError::Validation("network is required".into()));
        }
        if self.default_vcpus == 0 || self.default_memory_mb == 0 {
            return Err(CoreError::Validation(
                "default_vcpus and default_memory_mb must be > 0".into(),
            ));
        }
        for (name, value) in [
            ("command_timeout", self.command_timeout),
            ("ip_discovery_timeout", self.ip_discovery_timeout),
            ("ssh_connect_timeout", self.ssh_connect_timeout),
            ("stream_interval", self.stream_interval),
            ("janitor_interval", self.janitor_interval),
        ] {
            if value.is_zero() {
                return Err(CoreError::Validation(format!("{name} must be > 0")));
            }
        }
        if self.managed_username.trim().is_empty() {
            return Err(CoreError::Validation("managed_username is required".into()));
        }
        Ok(())
    }
}
