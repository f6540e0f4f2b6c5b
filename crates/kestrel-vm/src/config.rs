//! Driver configuration.

use crate::descriptor::{Arch, DomainType};
use crate::error::{Result, VmError};
use std::path::PathBuf;
use std::time::Duration;

/// Network name that routes through socket_vmnet instead of a libvirt network.
pub const SOCKET_VMNET: &str = "socket_vmnet";

/// How public keys are placed into a sandbox before boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyInjectMethod {
    /// Edit the overlay offline with virt-customize.
    #[default]
    VirtCustomize,
    /// Attach a cloud-init seed carrying the key and redefine the domain.
    CloudInit,
}

impl KeyInjectMethod {
    /// Parse from string (case-insensitive). Unknown values yield `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "virt-customize" | "virt_customize" => Some(Self::VirtCustomize),
            "cloud-init" | "cloud_init" | "cloudinit" => Some(Self::CloudInit),
            _ => None,
        }
    }
}

/// What a clone does when fresh reinitialization media cannot be built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SeedFallback {
    /// Detach the inherited media and continue with a warning.
    #[default]
    Detach,
    /// Keep the source VM's media. The guest may skip network setup.
    ReuseSource,
    /// Abort the clone.
    Fail,
}

impl SeedFallback {
    /// Parse from string (case-insensitive). Unknown values yield `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "detach" => Some(Self::Detach),
            "reuse" | "reuse-source" | "reuse_source" => Some(Self::ReuseSource),
            "fail" => Some(Self::Fail),
            _ => None,
        }
    }
}

/// A libvirt host reached over SSH instead of the local machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteHost {
    /// Hostname or address.
    pub address: String,
    /// Login name (default: `root`).
    pub user: String,
    /// SSH port (default: 22).
    pub port: u16,
    /// TCP connect timeout (default: 10s).
    pub connect_timeout: Duration,
}

impl RemoteHost {
    /// Host at `address` with default user, port and timeout.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            user: "root".into(),
            port: 22,
            connect_timeout: Duration::from_secs(10),
        }
    }

    /// `user@address`.
    pub fn destination(&self) -> String {
        format!("{}@{}", self.user, self.address)
    }

    /// Jump spec usable with `ssh -J`.
    pub fn jump_spec(&self) -> String {
        format!("{}:{}", self.destination(), self.port)
    }
}

/// Configuration for the virsh-backed driver.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// libvirt connection URI (default: `qemu:///system`).
    pub libvirt_uri: String,
    /// Network used when the caller does not name one (default: `default`).
    pub default_network: String,
    /// Directory holding golden base images for `clone_from_image`.
    pub base_image_dir: PathBuf,
    /// Parent of all per-sandbox workspaces.
    pub work_dir: PathBuf,
    /// Key injection mechanism.
    pub key_inject_method: KeyInjectMethod,
    /// Behavior when clone seed media cannot be built.
    pub seed_fallback: SeedFallback,
    /// Default vCPU count (default: 2).
    pub default_vcpus: u32,
    /// Default memory in MB (default: 2048).
    pub default_memory_mb: u32,
    /// Guest architecture for rendered descriptors.
    pub arch: Arch,
    /// Machine type override for rendered descriptors.
    pub machine: Option<String>,
    /// Hypervisor domain type for rendered descriptors.
    pub domain_type: DomainType,
    /// Emulator wrapper used with socket_vmnet networking.
    pub socket_vmnet_wrapper: Option<PathBuf>,
    /// dnsmasq lease directory (default: `/var/lib/libvirt/dnsmasq`).
    pub lease_dir: PathBuf,
    /// Upper bound for any single host tool invocation (default: 120s).
    pub command_timeout: Duration,
    /// SSH CA public key the guest should trust, written into seed media.
    pub ssh_ca_public_key: Option<String>,
    /// Run every host tool and file operation on this host over SSH.
    pub remote_host: Option<RemoteHost>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            libvirt_uri: "qemu:///system".into(),
            default_network: "default".into(),
            base_image_dir: PathBuf::from("/var/lib/libvirt/images/base"),
            work_dir: PathBuf::from("/var/lib/libvirt/images/jobs"),
            key_inject_method: KeyInjectMethod::VirtCustomize,
            seed_fallback: SeedFallback::Detach,
            default_vcpus: 2,
            default_memory_mb: 2048,
            arch: Arch::X86_64,
            machine: None,
            domain_type: DomainType::Kvm,
            socket_vmnet_wrapper: None,
            lease_dir: PathBuf::from("/var/lib/libvirt/dnsmasq"),
            command_timeout: Duration::from_secs(120),
            ssh_ca_public_key: None,
            remote_host: None,
        }
    }
}

impl DriverConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.work_dir.as_os_str().is_empty() {
            return Err(VmError::Config("work_dir is required".into()));
        }
        if self.default_vcpus == 0 {
            return Err(VmError::Config("default_vcpus must be > 0".into()));
        }
        if self.default_memory_mb < 128 {
            return Err(VmError::Config(format!(
                "default_memory_mb must be at least 128, got {}",
                self.default_memory_mb
            )));
        }
        if self.command_timeout.is_zero() {
            return Err(VmError::Config("command_timeout must be > 0".into()));
        }
        if let Some(host) = &self.remote_host {
            if host.address.trim().is_empty() || host.user.trim().is_empty() {
                return Err(VmError::Config(
                    "remote host address and user are required".into(),
                ));
            }
            if host.port == 0 {
                return Err(VmError::Config("remote host port must be > 0".into()));
            }
        }
        Ok(())
    }

    /// Workspace directory for a VM.
    pub fn workspace(&self, vm_name: &str) -> PathBuf {
        self.work_dir.join(vm_name)
    }

    /// Whether the default network routes through socket_vmnet.
    pub fn uses_socket_vmnet(&self) -> bool {
        self.default_network == SOCKET_VMNET
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = DriverConfig::default();
        assert_eq!(config.libvirt_uri, "qemu:///system");
        assert_eq!(config.default_network, "default");
        assert_eq!(config.default_vcpus, 2);
        assert_eq!(config.default_memory_mb, 2048);
        assert_eq!(config.command_timeout, Duration::from_secs(120));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_workspace_path() {
        let config = DriverConfig {
            work_dir: PathBuf::from("/srv/jobs"),
            ..Default::default()
        };
        assert_eq!(config.workspace("sbx-1"), PathBuf::from("/srv/jobs/sbx-1"));
    }

    #[test]
    fn test_validation_rejects_small_memory() {
        let config = DriverConfig {
            default_memory_mb: 64,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_remote_host() {
        let host = RemoteHost::new("kvm-01.lab");
        assert_eq!(host.destination(), "root@kvm-01.lab");
        assert_eq!(host.jump_spec(), "root@kvm-01.lab:22");

        let mut config = DriverConfig {
            remote_host: Some(host),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
        if let Some(host) = config.remote_host.as_mut() {
            host.port = 0;
        }
        assert!(config.validate().is_err());
        config.remote_host = Some(RemoteHost::new(" "));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_enums() {
        assert_eq!(
            KeyInjectMethod::parse("Cloud-Init"),
            Some(KeyInjectMethod::CloudInit)
        );
        assert_eq!(
            KeyInjectMethod::parse("virt-customize"),
            Some(KeyInjectMethod::VirtCustomize)
        );
        assert_eq!(KeyInjectMethod::parse("ansible"), None);
        assert_eq!(SeedFallback::parse("reuse"), Some(SeedFallback::ReuseSource));
        assert_eq!(SeedFallback::parse("FAIL"), Some(SeedFallback::Fail));
    }
}
