//! DHCP lease release.
//!
//! Destroyed sandboxes must not leave a binding behind, or the next clone
//! that happens to reuse the address collides with a stale lease. Release
//! is a fixed chain of tiers, each reporting a [`LeaseOutcome`]. The static
//! reservation tier always runs; after it, the first tier that reports
//! [`LeaseOutcome::Released`] ends the chain.

use crate::discovery::{parse_net_dhcp_leases, parse_net_info_bridge};
use crate::error::VmError;
use crate::exec::ProcessRunner;
use crate::hostfs::HostFs;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// One way of releasing a lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseTier {
    /// `virsh net-update ... delete ip-dhcp-host`.
    StaticReservation,
    /// dnsmasq's `dhcp_release` utility.
    DhcpRelease,
    /// Rewrite the dnsmasq lease file without the MAC.
    LeaseFile,
}

impl fmt::Display for ReleaseTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StaticReservation => write!(f, "static_reservation"),
            Self::DhcpRelease => write!(f, "dhcp_release"),
            Self::LeaseFile => write!(f, "lease_file"),
        }
    }
}

/// Result of a single tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseOutcome {
    /// The binding was removed.
    Released,
    /// The tier could not apply (tool absent, nothing to remove).
    NotApplicable(String),
    /// The tier applied but failed.
    Failed(String),
}

/// Outcome of every tier that ran, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseReport {
    /// Network the lease was on.
    pub network: String,
    /// MAC the lease was bound to.
    pub mac: String,
    /// Tier outcomes in execution order.
    pub outcomes: Vec<(ReleaseTier, LeaseOutcome)>,
}

impl ReleaseReport {
    fn new(network: &str, mac: &str) -> Self {
        Self {
            network: network.to_string(),
            mac: mac.to_string(),
            outcomes: Vec::new(),
        }
    }

    /// Whether a dynamic lease was released.
    pub fn released(&self) -> bool {
        self.outcomes.iter().any(|(tier, outcome)| {
            *tier != ReleaseTier::StaticReservation && *outcome == LeaseOutcome::Released
        })
    }

    /// Outcome of a particular tier, if it ran.
    pub fn outcome(&self, tier: ReleaseTier) -> Option<&LeaseOutcome> {
        self.outcomes.iter().find(|(t, _)| *t == tier).map(|(_, o)| o)
    }
}

/// Runs the release chain against a libvirt network.
pub struct LeaseReleaser {
    runner: Arc<dyn ProcessRunner>,
    fs: Arc<dyn HostFs>,
    libvirt_uri: String,
    lease_dir: PathBuf,
}

impl LeaseReleaser {
    /// Create a releaser.
    pub fn new(
        runner: Arc<dyn ProcessRunner>,
        fs: Arc<dyn HostFs>,
        libvirt_uri: &str,
        lease_dir: PathBuf,
    ) -> Self {
        Self {
            runner,
            fs,
            libvirt_uri: libvirt_uri.to_string(),
            lease_dir,
        }
    }

    /// Run the chain. Never fails; the report says what happened.
    pub async fn release(&self, network: &str, mac: &str) -> ReleaseReport {
        let mut report = ReleaseReport::new(network, mac);
        if mac.is_empty() {
            report.outcomes.push((
                ReleaseTier::StaticReservation,
                LeaseOutcome::NotApplicable("no MAC address".into()),
            ));
            return report;
        }

        let outcome = self.remove_reservation(network, mac).await;
        report.outcomes.push((ReleaseTier::StaticReservation, outcome));

        for tier in [ReleaseTier::DhcpRelease, ReleaseTier::LeaseFile] {
            let outcome = match tier {
                ReleaseTier::DhcpRelease => self.dhcp_release(network, mac).await,
                _ => self.rewrite_lease_file(network, mac).await,
            };
            tracing::debug!(network, mac, tier = %tier, outcome = ?outcome, "Lease release tier");
            let done = outcome == LeaseOutcome::Released;
            report.outcomes.push((tier, outcome));
            if done {
                break;
            }
        }

        if report.released() {
            tracing::info!(network, mac, "Released DHCP lease");
        } else {
            tracing::debug!(network, mac, outcomes = ?report.outcomes, "No DHCP lease released");
        }
        report
    }

    async fn virsh(&self, args: &[&str]) -> Result<String, VmError> {
        let mut full = vec!["--connect", self.libvirt_uri.as_str()];
        full.extend_from_slice(args);
        self.runner.run("virsh", &full).await
    }

    async fn remove_reservation(&self, network: &str, mac: &str) -> LeaseOutcome {
        let host = format!("<host mac='{mac}'/>");
        let args = [
            "net-update",
            network,
            "delete",
            "ip-dhcp-host",
            host.as_str(),
            "--live",
            "--config",
        ];
        match self.virsh(&args).await {
            Ok(_) => LeaseOutcome::Released,
            Err(VmError::ToolMissing(tool)) => LeaseOutcome::NotApplicable(format!("{tool} missing")),
            Err(VmError::Command { message, .. })
                if message.contains("couldn't locate") || message.contains("not found") =>
            {
                LeaseOutcome::NotApplicable("no static reservation".into())
            }
            Err(e) => LeaseOutcome::Failed(e.to_string()),
        }
    }

    async fn dhcp_release(&self, network: &str, mac: &str) -> LeaseOutcome {
        let bridge = match self.virsh(&["net-info", network]).await {
            Ok(out) => parse_net_info_bridge(&out),
            Err(e) => return LeaseOutcome::NotApplicable(format!("net-info failed: {e}")),
        };
        let Some(bridge) = bridge else {
            return LeaseOutcome::NotApplicable("network has no bridge".into());
        };
        let ip = match self.virsh(&["net-dhcp-leases", network]).await {
            Ok(out) => parse_net_dhcp_leases(&out, mac),
            Err(e) => return LeaseOutcome::NotApplicable(format!("net-dhcp-leases failed: {e}")),
        };
        let Some(ip) = ip else {
            return LeaseOutcome::NotApplicable("no active lease for MAC".into());
        };

        match self.runner.run("dhcp_release", &[&bridge, &ip, mac]).await {
            Ok(_) => LeaseOutcome::Released,
            Err(VmError::ToolMissing(_)) => {
                LeaseOutcome::NotApplicable("dhcp_release not installed".into())
            }
            Err(e) => LeaseOutcome::Failed(e.to_string()),
        }
    }

    async fn rewrite_lease_file(&self, network: &str, mac: &str) -> LeaseOutcome {
        let path = self.lease_dir.join(format!("{network}.leases"));
        let data = match self.fs.read_to_string(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return LeaseOutcome::NotApplicable(format!("{} not found", path.display()));
            }
            Err(e) => return LeaseOutcome::Failed(format!("read {}: {e}", path.display())),
        };

        let needle = mac.to_lowercase();
        let mut found = false;
        let kept: Vec<&str> = data
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter(|line| {
                let matches = line.to_lowercase().contains(&needle);
                found |= matches;
                !matches
            })
            .collect();
        if !found {
            return LeaseOutcome::NotApplicable("MAC not in lease file".into());
        }

        let mut contents = kept.join("\n");
        if !kept.is_empty() {
            contents.push('\n');
        }
        match self.fs.write(&path, &contents).await {
            Ok(()) => LeaseOutcome::Released,
            Err(e) => LeaseOutcome::Failed(format!("write {}: {e}", path.display())),
        }
    }
}
