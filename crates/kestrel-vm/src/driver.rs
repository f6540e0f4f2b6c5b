//! Hypervisor driver contract.

use crate::error::Result;
use crate::lease::ReleaseReport;
use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Domain state as reported by the hypervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmState {
    /// Domain is running.
    Running,
    /// Domain is paused.
    Paused,
    /// Domain is shut off.
    ShutOff,
    /// Domain crashed.
    Crashed,
    /// Domain is suspended to memory or disk.
    Suspended,
    /// Anything the hypervisor reported that is not recognized.
    Unknown,
}

impl VmState {
    /// Map hypervisor state text to a state. Never fails.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "running" => Self::Running,
            "paused" => Self::Paused,
            "shut off" | "shutoff" => Self::ShutOff,
            "crashed" => Self::Crashed,
            "pmsuspended" | "suspended" => Self::Suspended,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for VmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
            Self::ShutOff => write!(f, "shut off"),
            Self::Crashed => write!(f, "crashed"),
            Self::Suspended => write!(f, "suspended"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Identity of a defined domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainRef {
    /// Domain name.
    pub name: String,
    /// Hypervisor-assigned UUID, when it could be read.
    pub uuid: Option<String>,
}

/// A discovered guest address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpLease {
    /// IPv4 address without prefix length.
    pub ip: String,
    /// MAC address the address is bound to.
    pub mac: String,
}

/// Where a snapshot lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotKind {
    /// Managed by the hypervisor inside the disk image.
    Internal,
    /// A separate overlay file in the workspace.
    External,
}

/// A created snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRef {
    /// Snapshot name.
    pub name: String,
    /// Snapshot kind.
    pub kind: SnapshotKind,
    /// Overlay path for external snapshots, the name for internal ones.
    pub reference: String,
}

/// Advisory plan for comparing two snapshots. Nothing is mounted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotDiffPlan {
    /// Domain the snapshots belong to.
    pub vm_name: String,
    /// Earlier snapshot name.
    pub from: String,
    /// Later snapshot name.
    pub to: String,
    /// Overlay file of `from`, if it exists.
    pub from_path: Option<PathBuf>,
    /// Overlay file of `to`, if it exists.
    pub to_path: Option<PathBuf>,
    /// Human-readable instructions, one step per entry.
    pub notes: Vec<String>,
}

/// Parameters shared by both clone operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloneSpec {
    /// Name of the new domain.
    pub name: String,
    /// vCPU count. `None` uses the driver default.
    pub vcpus: Option<u32>,
    /// Memory in MB. `None` uses the driver default.
    pub memory_mb: Option<u32>,
    /// Network name. `None` uses the driver default.
    pub network: Option<String>,
}

impl CloneSpec {
    /// Clone parameters with driver defaults for everything but the name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            vcpus: None,
            memory_mb: None,
            network: None,
        }
    }
}

/// Operations on hypervisor domains, keyed by VM name.
///
/// Implementations must be cancellation-safe: dropping any returned future
/// terminates the host processes it started.
#[async_trait]
pub trait Hypervisor: Send + Sync {
    /// Clone a live source VM onto a copy-on-write overlay and define it.
    async fn clone_from_vm(&self, source: &str, spec: &CloneSpec) -> Result<DomainRef>;

    /// Create a domain from a golden base image.
    async fn clone_from_image(&self, image: &str, spec: &CloneSpec) -> Result<DomainRef>;

    /// Place `public_key` in the guest for `username`. An empty username
    /// is inferred from the VM name.
    async fn inject_ssh_key(&self, vm_name: &str, username: &str, public_key: &str) -> Result<()>;

    /// Boot a defined domain.
    async fn start_vm(&self, vm_name: &str) -> Result<()>;

    /// Shut a domain down, or pull the plug when `force` is set.
    async fn stop_vm(&self, vm_name: &str, force: bool) -> Result<()>;

    /// Tear a domain down and remove its workspace.
    ///
    /// Only workspace removal failure is returned; every earlier step is
    /// best-effort.
    async fn destroy_vm(&self, vm_name: &str) -> Result<()>;

    /// Take a snapshot.
    async fn create_snapshot(
        &self,
        vm_name: &str,
        name: &str,
        kind: SnapshotKind,
    ) -> Result<SnapshotRef>;

    /// Describe how two snapshots could be compared.
    async fn diff_snapshot(&self, vm_name: &str, from: &str, to: &str)
        -> Result<SnapshotDiffPlan>;

    /// Poll for the guest's IPv4 address until `timeout`.
    async fn get_ip_address(&self, vm_name: &str, timeout: Duration) -> Result<IpLease>;

    /// Current domain state.
    async fn get_vm_state(&self, vm_name: &str) -> Result<VmState>;

    /// Release any DHCP binding for `mac` on `network`. Never fails.
    async fn release_dhcp_lease(&self, network: &str, mac: &str) -> ReleaseReport;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_parsing() {
        assert_eq!(VmState::parse("running"), VmState::Running);
        assert_eq!(VmState::parse("shut off\n"), VmState::ShutOff);
        assert_eq!(VmState::parse("pmsuspended"), VmState::Suspended);
        assert_eq!(VmState::parse("Paused"), VmState::Paused);
        assert_eq!(VmState::parse("in shutdown"), VmState::Unknown);
        assert_eq!(VmState::parse(""), VmState::Unknown);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(VmState::ShutOff.to_string(), "shut off");
        assert_eq!(VmState::Unknown.to_string(), "unknown");
    }
}
