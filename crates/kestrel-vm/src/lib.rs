//! # kestrel-vm
//!
//! Hypervisor driver for Kestrel sandboxes, built on libvirt's `virsh`.
//!
//! ## Quick Start
//!
//! ```no_run
//! use kestrel_vm::{CloneSpec, DriverConfig, Hypervisor, VirshDriver};
//! use std::time::Duration;
//!
//! # async fn example() -> kestrel_vm::Result<()> {
//! let driver = VirshDriver::new(DriverConfig::default())?;
//!
//! // Linked clone of a prepared golden VM
//! let domain = driver
//!     .clone_from_vm("golden-ubuntu", &CloneSpec::new("sbx-1a2b3c4d"))
//!     .await?;
//! driver.start_vm(&domain.name).await?;
//!
//! let lease = driver
//!     .get_ip_address(&domain.name, Duration::from_secs(120))
//!     .await?;
//! println!("{} is at {}", domain.name, lease.ip);
//!
//! driver.destroy_vm(&domain.name).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - **Linked Clones**: qcow2 overlays on a source VM's disk or a base image
//! - **Descriptor Synthesis**: render and mutate domain XML as an element tree
//! - **Fresh Seed Media**: new cloud-init instance ids so clones reconfigure networking
//! - **IP Discovery**: DHCP leases, or ARP for socket_vmnet networking
//! - **Lease Hygiene**: tiered DHCP release on destroy
//! - **Remote Hosts**: the same driver over SSH via [`DriverConfig::remote_host`]

mod config;
mod descriptor;
mod discovery;
mod driver;
mod error;
mod exec;
mod hostfs;
mod lease;
mod seed;
mod virsh;

#[cfg(test)]
mod test_support;

pub use config::{DriverConfig, KeyInjectMethod, RemoteHost, SeedFallback, SOCKET_VMNET};
pub use descriptor::{
    generate_mac, mutate, render, Arch, Descriptor, DomainParams, DomainType, NetworkAttachment,
    MAC_PREFIX, QEMU_NAMESPACE,
};
pub use discovery::{normalize_mac, parse_arp, parse_domblklist, parse_domifaddr, BlockDevices};
pub use driver::{
    CloneSpec, DomainRef, Hypervisor, IpLease, SnapshotDiffPlan, SnapshotKind, SnapshotRef,
    VmState,
};
pub use error::{Result, VmError};
pub use exec::{ProcessRunner, RemoteRunner, SystemRunner};
pub use hostfs::{HostFs, LocalFs, RunnerFs};
pub use lease::{LeaseOutcome, LeaseReleaser, ReleaseReport, ReleaseTier};
pub use seed::{SeedMedia, SeedUser};
pub use virsh::{default_guest_user, VirshDriver, DOMAIN_FILE, OVERLAY_FILE};
