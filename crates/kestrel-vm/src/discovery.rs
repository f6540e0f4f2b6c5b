//! Parsers for host tool output.
//!
//! All parsers are tolerant: headers, separator rows and malformed lines
//! are skipped rather than treated as errors.

use crate::driver::IpLease;

/// Disks reported by `virsh domblklist --details`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockDevices {
    /// First file-backed disk.
    pub primary_disk: Option<String>,
    /// Reinitialization media attached as a cdrom.
    pub seed_media: Option<String>,
}

/// Parse `virsh domblklist <vm> --details`.
///
/// ```text
///  Type   Device   Target   Source
/// ------------------------------------------------
///  file   disk     vda      /var/lib/libvirt/images/golden.qcow2
///  file   cdrom    sda      /var/lib/libvirt/images/golden-cloud-init.iso
/// ```
pub fn parse_domblklist(output: &str) -> BlockDevices {
    let mut devices = BlockDevices::default();
    for line in output.lines() {
        let fields: Vec<&str> = line.split_whitespace().take(3).collect();
        let Some(source) = after_fields(line, 3) else {
            continue;
        };
        if fields.len() < 3 || fields[0] != "file" {
            continue;
        }
        match fields[1] {
            "disk" if devices.primary_disk.is_none() => {
                devices.primary_disk = Some(source.to_string());
            }
            "cdrom" => {
                if source.contains("cloud-init") || source.ends_with(".iso") {
                    devices.seed_media = Some(source.to_string());
                }
            }
            _ => {}
        }
    }
    devices
}

/// The rest of `line` after its first `n` whitespace-separated fields,
/// with inner spacing intact. `None` when nothing follows them.
fn after_fields(line: &str, n: usize) -> Option<&str> {
    let mut rest = line.trim_start();
    for _ in 0..n {
        let end = rest.find(char::is_whitespace)?;
        rest = rest[end..].trim_start();
    }
    let rest = rest.trim_end();
    (!rest.is_empty()).then_some(rest)
}

/// Parse `virsh domifaddr <vm> --source lease` and return the first IPv4 lease.
///
/// ```text
///  Name       MAC address          Protocol     Address
/// -------------------------------------------------------------------------------
///  vnet0      52:54:00:6b:3c:86    ipv4         192.168.122.63/24
/// ```
pub fn parse_domifaddr(output: &str) -> Option<IpLease> {
    output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with("Name") && !l.starts_with('-'))
        .find_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() >= 4 && parts[2] == "ipv4" {
                Some(IpLease {
                    ip: strip_prefix_len(parts[3]).to_string(),
                    mac: parts[1].to_string(),
                })
            } else {
                None
            }
        })
}

/// Parse `virsh domiflist <vm>` and return the first interface MAC.
///
/// ```text
///  Interface   Type      Source    Model    MAC
/// -----------------------------------------------------------
///  -           network   default   virtio   52:54:00:6b:3c:86
/// ```
pub fn parse_domiflist_mac(output: &str) -> Option<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with("Interface") && !l.starts_with("--"))
        .find_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            fields
                .get(4)
                .filter(|mac| mac.matches(':').count() == 5)
                .map(|mac| mac.to_string())
        })
}

/// Find the IPv4 address bound to `mac` in `arp -an` output.
///
/// ```text
/// ? (192.168.105.4) at 52:54:0:12:34:56 on bridge100 ifscope [bridge]
/// ```
///
/// Shortened octets on either side are expanded before comparison.
pub fn parse_arp(output: &str, mac: &str) -> Option<String> {
    let wanted = normalize_mac(mac);
    for line in output.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 4 {
            continue;
        }
        let Some(entry_mac) = parts
            .iter()
            .position(|p| *p == "at")
            .and_then(|i| parts.get(i + 1))
        else {
            continue;
        };
        if normalize_mac(entry_mac) != wanted {
            continue;
        }
        let ip = parts.iter().find_map(|p| {
            p.strip_prefix('(')
                .and_then(|p| p.strip_suffix(')'))
                .filter(|ip| ip.matches('.').count() == 3)
        });
        if let Some(ip) = ip {
            return Some(ip.to_string());
        }
    }
    None
}

/// Lowercase a MAC and pad single-digit octets (`52:54:0:a:b:c` becomes
/// `52:54:00:0a:0b:0c`). Anything that is not six octets is only lowercased.
pub fn normalize_mac(mac: &str) -> String {
    let lower = mac.trim().to_lowercase();
    let parts: Vec<&str> = lower.split(':').collect();
    if parts.len() != 6 {
        return lower;
    }
    parts
        .iter()
        .map(|p| if p.len() == 1 { format!("0{p}") } else { p.to_string() })
        .collect::<Vec<_>>()
        .join(":")
}

/// Bridge interface from `virsh net-info <net>`.
pub fn parse_net_info_bridge(output: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let rest = line.trim().strip_prefix("Bridge:")?;
        let bridge = rest.trim();
        (!bridge.is_empty()).then(|| bridge.to_string())
    })
}

/// Leased IP for `mac` from `virsh net-dhcp-leases <net>`.
///
/// Columns: expiry date, expiry time, MAC, protocol, address/prefix,
/// hostname, client id.
pub fn parse_net_dhcp_leases(output: &str, mac: &str) -> Option<String> {
    let wanted = normalize_mac(mac);
    output.lines().find_map(|line| {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() >= 5 && normalize_mac(fields[2]) == wanted {
            Some(strip_prefix_len(fields[4]).to_string())
        } else {
            None
        }
    })
}

fn strip_prefix_len(addr: &str) -> &str {
    match addr.find('/') {
        Some(i) if i > 0 => &addr[..i],
        _ => addr,
    }
}
