//! [`Hypervisor`] implementation that drives libvirt through `virsh`.

use crate::config::{DriverConfig, KeyInjectMethod, SeedFallback};
use crate::descriptor::{render, Descriptor, DomainParams, NetworkAttachment};
use crate::discovery::{parse_arp, parse_domblklist, parse_domifaddr, parse_domiflist_mac};
use crate::driver::{
    CloneSpec, DomainRef, Hypervisor, IpLease, SnapshotDiffPlan, SnapshotKind, SnapshotRef,
    VmState,
};
use crate::error::{Result, VmError};
use crate::exec::{shell_quote, ProcessRunner, RemoteRunner, SystemRunner};
use crate::hostfs::{HostFs, LocalFs, RunnerFs};
use crate::lease::{LeaseReleaser, ReleaseReport};
use crate::seed::{SeedMedia, SeedUser};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Overlay disk inside a workspace.
pub const OVERLAY_FILE: &str = "disk-overlay.qcow2";
/// Stored descriptor inside a workspace.
pub const DOMAIN_FILE: &str = "domain.xml";
/// Fresh seed media built for a clone.
pub const CLONE_SEED_FILE: &str = "cloud-init.iso";
/// Seed media carrying an injected key.
pub const KEY_SEED_FILE: &str = "seed.iso";

const IP_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// What a clone does with the source's reinitialization media.
enum CloneSeed {
    Fresh(PathBuf),
    ReuseSource,
    Detach,
}

/// libvirt driver backed by the `virsh`, `qemu-img` and `virt-customize` CLIs.
///
/// With [`DriverConfig::remote_host`] set, every tool invocation and every
/// workspace file operation happens on that host over SSH.
pub struct VirshDriver {
    config: DriverConfig,
    runner: Arc<dyn ProcessRunner>,
    fs: Arc<dyn HostFs>,
    leases: LeaseReleaser,
}

impl VirshDriver {
    /// Create a driver that runs host tools directly, or on
    /// `config.remote_host` over SSH when one is set.
    ///
    /// Child processes inherit `LIBVIRT_DEFAULT_URI` and are bounded by
    /// `config.command_timeout`.
    pub fn new(config: DriverConfig) -> Result<Self> {
        config.validate()?;
        let system: Arc<dyn ProcessRunner> = Arc::new(
            SystemRunner::new(config.command_timeout)
                .env("LIBVIRT_DEFAULT_URI", config.libvirt_uri.clone()),
        );
        match config.remote_host.clone() {
            Some(host) => {
                tracing::info!(host = %host.destination(), port = host.port, "Managing remote libvirt host");
                let runner: Arc<dyn ProcessRunner> = Arc::new(RemoteRunner::new(host, system));
                let fs = Arc::new(RunnerFs::new(Arc::clone(&runner)));
                Ok(Self::with_host(config, runner, fs))
            }
            None => Ok(Self::with_runner(config, system)),
        }
    }

    /// Create a driver with a custom process runner and the local filesystem.
    pub fn with_runner(config: DriverConfig, runner: Arc<dyn ProcessRunner>) -> Self {
        Self::with_host(config, runner, Arc::new(LocalFs))
    }

    /// Create a driver with a custom process runner and host filesystem.
    pub fn with_host(
        config: DriverConfig,
        runner: Arc<dyn ProcessRunner>,
        fs: Arc<dyn HostFs>,
    ) -> Self {
        let leases = LeaseReleaser::new(
            Arc::clone(&runner),
            Arc::clone(&fs),
            &config.libvirt_uri,
            config.lease_dir.clone(),
        );
        Self {
            config,
            runner,
            fs,
            leases,
        }
    }

    /// Driver configuration.
    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    async fn virsh(&self, args: &[&str]) -> Result<String> {
        let mut full = vec!["--connect", self.config.libvirt_uri.as_str()];
        full.extend_from_slice(args);
        self.runner.run("virsh", &full).await
    }

    async fn create_overlay(&self, base: &str, overlay: &Path) -> Result<()> {
        let overlay = path_arg(overlay);
        self.runner
            .run(
                "qemu-img",
                &["create", "-f", "qcow2", "-F", "qcow2", "-b", base, &overlay],
            )
            .await?;
        Ok(())
    }

    async fn define(&self, vm_name: &str, xml: &str, workspace: &Path) -> Result<DomainRef> {
        let xml_path = workspace.join(DOMAIN_FILE);
        self.fs.write(&xml_path, xml).await?;
        self.virsh(&["define", &path_arg(&xml_path)]).await?;

        let uuid = match self.virsh(&["domuuid", vm_name]).await {
            Ok(out) if !out.trim().is_empty() => Some(out.trim().to_string()),
            Ok(_) => None,
            Err(e) => {
                tracing::debug!(vm_name, error = %e, "Could not read domain UUID");
                None
            }
        };
        Ok(DomainRef {
            name: vm_name.to_string(),
            uuid,
        })
    }

    async fn clone_seed(&self, vm_name: &str, workspace: &Path) -> Result<CloneSeed> {
        let iso = workspace.join(CLONE_SEED_FILE);
        let media = SeedMedia::for_clone(vm_name).trust_ca(self.config.ssh_ca_public_key.as_deref());
        match media.build(self.runner.as_ref(), self.fs.as_ref(), &iso).await {
            Ok(()) => {
                tracing::debug!(vm_name, iso = %iso.display(), "Built fresh seed media");
                Ok(CloneSeed::Fresh(iso))
            }
            Err(e) => match self.config.seed_fallback {
                SeedFallback::Detach => {
                    tracing::warn!(
                        vm_name,
                        error = %e,
                        "Could not build seed media, detaching inherited media"
                    );
                    Ok(CloneSeed::Detach)
                }
                SeedFallback::ReuseSource => {
                    tracing::warn!(
                        vm_name,
                        error = %e,
                        "Could not build seed media, reusing source media; guest may skip network setup"
                    );
                    Ok(CloneSeed::ReuseSource)
                }
                SeedFallback::Fail => {
                    tracing::error!(vm_name, error = %e, "Could not build seed media");
                    Err(e)
                }
            },
        }
    }

    async fn clone_vm_into(
        &self,
        source: &str,
        spec: &CloneSpec,
        base: &str,
        seed_media: Option<&str>,
        workspace: &Path,
    ) -> Result<DomainRef> {
        let overlay = workspace.join(OVERLAY_FILE);
        self.create_overlay(base, &overlay).await?;

        let seed = match seed_media {
            Some(_) => Some(self.clone_seed(&spec.name, workspace).await?),
            None => None,
        };

        let source_xml = self.virsh(&["dumpxml", source]).await?;
        let mut descriptor = Descriptor::parse(&source_xml)?;
        let mac = descriptor.prepare_clone(&spec.name, &overlay)?;
        descriptor.set_resources(spec.vcpus, spec.memory_mb)?;
        if let Some(network) = &spec.network {
            descriptor.set_network(network);
        }
        if let (Some(source_media), Some(seed)) = (seed_media, seed) {
            match seed {
                CloneSeed::Fresh(iso) => {
                    descriptor.replace_media(source_media, &path_arg(&iso));
                }
                CloneSeed::Detach => {
                    descriptor.detach_media(source_media);
                }
                CloneSeed::ReuseSource => {}
            }
        }
        tracing::debug!(vm_name = %spec.name, mac = %mac, "Mutated source descriptor");

        self.define(&spec.name, &descriptor.to_xml()?, workspace).await
    }

    async fn image_vm_into(
        &self,
        spec: &CloneSpec,
        base: &str,
        workspace: &Path,
    ) -> Result<DomainRef> {
        let overlay = workspace.join(OVERLAY_FILE);
        self.create_overlay(base, &overlay).await?;

        let seed_path = match self.clone_seed(&spec.name, workspace).await? {
            CloneSeed::Fresh(iso) => Some(iso),
            CloneSeed::ReuseSource | CloneSeed::Detach => None,
        };

        let network = spec
            .network
            .clone()
            .unwrap_or_else(|| self.config.default_network.clone());
        let attachment = NetworkAttachment::from_name(&network);
        let emulator = match attachment {
            NetworkAttachment::SocketVmnet => self.config.socket_vmnet_wrapper.clone(),
            _ => None,
        };
        let params = DomainParams {
            name: spec.name.clone(),
            vcpus: spec.vcpus.unwrap_or(self.config.default_vcpus),
            memory_mb: spec.memory_mb.unwrap_or(self.config.default_memory_mb),
            disk_path: overlay,
            seed_path,
            network: attachment,
            mac: None,
            arch: self.config.arch,
            machine: self.config.machine.clone(),
            domain_type: self.config.domain_type,
            emulator,
        };

        self.define(&spec.name, &render(&params)?, workspace).await
    }

    /// Remove a workspace left behind by a failed clone.
    async fn discard_workspace(&self, vm_name: &str, workspace: &Path) {
        if let Err(e) = self.fs.remove_dir_all(workspace).await {
            if e.kind() != ErrorKind::NotFound {
                tracing::warn!(
                    vm_name,
                    path = %workspace.display(),
                    error = %e,
                    "Failed to remove workspace after failed clone"
                );
            }
        }
    }

    /// MAC of the domain's NIC, from `domiflist` or else the descriptor.
    async fn vm_mac(&self, vm_name: &str) -> Result<Option<String>> {
        if let Ok(out) = self.virsh(&["domiflist", vm_name]).await {
            if let Some(mac) = parse_domiflist_mac(&out) {
                return Ok(Some(mac));
            }
        }
        let xml = self.virsh(&["dumpxml", vm_name]).await?;
        Ok(Descriptor::parse(&xml)?.mac_address())
    }

    async fn lookup_ip(&self, vm_name: &str, arp_mac: Option<&str>) -> Option<IpLease> {
        match arp_mac {
            Some(mac) => match self.runner.run("arp", &["-an"]).await {
                Ok(out) => parse_arp(&out, mac).map(|ip| IpLease {
                    ip,
                    mac: mac.to_string(),
                }),
                Err(e) => {
                    tracing::trace!(vm_name, error = %e, "arp lookup failed");
                    None
                }
            },
            None => match self.virsh(&["domifaddr", vm_name, "--source", "lease"]).await {
                Ok(out) => parse_domifaddr(&out),
                Err(e) => {
                    tracing::trace!(vm_name, error = %e, "domifaddr failed");
                    None
                }
            },
        }
    }
}

#[async_trait]
impl Hypervisor for VirshDriver {
    async fn clone_from_vm(&self, source: &str, spec: &CloneSpec) -> Result<DomainRef> {
        validate_name("source VM name", source)?;
        validate_name("VM name", &spec.name)?;
        let start = std::time::Instant::now();
        tracing::info!(source, vm_name = %spec.name, "Cloning VM");

        let devices = parse_domblklist(&self.virsh(&["domblklist", source, "--details"]).await?);
        let base = devices
            .primary_disk
            .ok_or_else(|| VmError::NoPrimaryDisk(source.to_string()))?;
        if !self.fs.exists(Path::new(&base)).await {
            tracing::error!(source, disk = %base, "Source disk not accessible");
            return Err(VmError::Io(std::io::Error::new(
                ErrorKind::NotFound,
                format!("source disk {base} not accessible"),
            )));
        }

        let workspace = self.config.workspace(&spec.name);
        self.fs.create_dir_all(&workspace).await?;

        match self
            .clone_vm_into(source, spec, &base, devices.seed_media.as_deref(), &workspace)
            .await
        {
            Ok(domain) => {
                tracing::info!(
                    source,
                    vm_name = %domain.name,
                    uuid = ?domain.uuid,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "VM cloned"
                );
                Ok(domain)
            }
            Err(e) => {
                tracing::error!(source, vm_name = %spec.name, error = %e, "Clone failed");
                self.discard_workspace(&spec.name, &workspace).await;
                Err(e)
            }
        }
    }

    async fn clone_from_image(&self, image: &str, spec: &CloneSpec) -> Result<DomainRef> {
        validate_name("base image", image)?;
        validate_name("VM name", &spec.name)?;
        let start = std::time::Instant::now();
        tracing::info!(image, vm_name = %spec.name, "Creating VM from base image");

        let base = self.config.base_image_dir.join(image);
        if !self.fs.exists(&base).await {
            return Err(VmError::Io(std::io::Error::new(
                ErrorKind::NotFound,
                format!("base image {} not accessible", base.display()),
            )));
        }

        let workspace = self.config.workspace(&spec.name);
        self.fs.create_dir_all(&workspace).await?;

        match self.image_vm_into(spec, &path_arg(&base), &workspace).await {
            Ok(domain) => {
                tracing::info!(
                    image,
                    vm_name = %domain.name,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "VM created from image"
                );
                Ok(domain)
            }
            Err(e) => {
                tracing::error!(image, vm_name = %spec.name, error = %e, "Create from image failed");
                self.discard_workspace(&spec.name, &workspace).await;
                Err(e)
            }
        }
    }

    async fn inject_ssh_key(&self, vm_name: &str, username: &str, public_key: &str) -> Result<()> {
        validate_name("VM name", vm_name)?;
        let public_key = public_key.trim();
        if public_key.is_empty() {
            return Err(VmError::InvalidArgument("public key is required".into()));
        }
        let username = if username.is_empty() {
            default_guest_user(vm_name)
        } else {
            username
        };
        if !is_valid_username(username) {
            return Err(VmError::InvalidArgument(format!(
                "invalid username: {username:?}"
            )));
        }

        let workspace = self.config.workspace(vm_name);
        let overlay = workspace.join(OVERLAY_FILE);
        if !self.fs.exists(&overlay).await {
            return Err(VmError::OverlayMissing(overlay));
        }

        tracing::info!(
            vm_name,
            username,
            method = ?self.config.key_inject_method,
            "Injecting SSH key"
        );
        match self.config.key_inject_method {
            KeyInjectMethod::VirtCustomize => {
                let ensure_user = format!(
                    "id -u {username} >/dev/null 2>&1 || useradd -m -s /bin/bash {username}"
                );
                let inject = format!("{username}:string:{public_key}");
                self.runner
                    .run(
                        "virt-customize",
                        &[
                            "-a",
                            &path_arg(&overlay),
                            "--run-command",
                            &ensure_user,
                            "--ssh-inject",
                            &inject,
                        ],
                    )
                    .await?;
            }
            KeyInjectMethod::CloudInit => {
                let iso = workspace.join(KEY_SEED_FILE);
                SeedMedia::with_user(
                    vm_name,
                    SeedUser {
                        name: username.to_string(),
                        public_key: public_key.to_string(),
                    },
                )
                .trust_ca(self.config.ssh_ca_public_key.as_deref())
                .build(self.runner.as_ref(), self.fs.as_ref(), &iso)
                .await?;

                let xml_path = workspace.join(DOMAIN_FILE);
                let mut descriptor =
                    Descriptor::parse(&self.fs.read_to_string(&xml_path).await?)?;
                if descriptor.attach_media(&path_arg(&iso))? {
                    self.fs.write(&xml_path, &descriptor.to_xml()?).await?;
                }
                self.virsh(&["define", &path_arg(&xml_path)]).await?;
            }
        }
        Ok(())
    }

    async fn start_vm(&self, vm_name: &str) -> Result<()> {
        validate_name("VM name", vm_name)?;
        tracing::info!(vm_name, uri = %self.config.libvirt_uri, "Starting VM");
        self.virsh(&["start", vm_name]).await.map_err(|e| {
            tracing::error!(vm_name, error = %e, "Failed to start VM");
            e
        })?;

        match self.get_vm_state(vm_name).await {
            Ok(VmState::Running) => tracing::debug!(vm_name, "VM running"),
            Ok(state) => tracing::warn!(
                vm_name,
                state = %state,
                "VM not running after start"
            ),
            Err(e) => tracing::warn!(vm_name, error = %e, "Unable to verify VM state after start"),
        }
        Ok(())
    }

    async fn stop_vm(&self, vm_name: &str, force: bool) -> Result<()> {
        validate_name("VM name", vm_name)?;
        tracing::info!(vm_name, force, "Stopping VM");
        let action = if force { "destroy" } else { "shutdown" };
        self.virsh(&[action, vm_name]).await?;
        Ok(())
    }

    async fn destroy_vm(&self, vm_name: &str) -> Result<()> {
        validate_name("VM name", vm_name)?;
        let start = std::time::Instant::now();
        tracing::info!(vm_name, "Destroying VM");

        let mac = match self.vm_mac(vm_name).await {
            Ok(mac) => mac,
            Err(e) => {
                tracing::debug!(vm_name, error = %e, "Could not read MAC for lease release");
                None
            }
        };

        if let Err(e) = self.virsh(&["destroy", vm_name]).await {
            tracing::debug!(vm_name, error = %e, "Force stop skipped");
        }
        if let Err(e) = self.virsh(&["undefine", vm_name]).await {
            tracing::warn!(vm_name, error = %e, "Undefine failed, removing files anyway");
        }

        match mac {
            Some(mac) if !self.config.uses_socket_vmnet() => {
                let report = self
                    .release_dhcp_lease(&self.config.default_network, &mac)
                    .await;
                tracing::debug!(vm_name, mac = %mac, released = report.released(), "Lease release finished");
            }
            _ => {}
        }

        let workspace = self.config.workspace(vm_name);
        match self.fs.remove_dir_all(&workspace).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(source) => {
                tracing::error!(
                    vm_name,
                    path = %workspace.display(),
                    error = %source,
                    "Failed to remove workspace"
                );
                return Err(VmError::WorkspaceCleanup {
                    path: workspace,
                    source,
                });
            }
        }

        tracing::info!(
            vm_name,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "VM destroyed"
        );
        Ok(())
    }

    async fn create_snapshot(
        &self,
        vm_name: &str,
        name: &str,
        kind: SnapshotKind,
    ) -> Result<SnapshotRef> {
        validate_name("VM name", vm_name)?;
        validate_name("snapshot name", name)?;
        tracing::info!(vm_name, snapshot = name, kind = ?kind, "Creating snapshot");

        match kind {
            SnapshotKind::External => {
                let path = snapshot_path(&self.config.workspace(vm_name), name);
                let diskspec = format!("vda,file={}", path.display());
                self.virsh(&[
                    "snapshot-create-as",
                    vm_name,
                    name,
                    "--disk-only",
                    "--atomic",
                    "--no-metadata",
                    "--diskspec",
                    &diskspec,
                ])
                .await?;
                Ok(SnapshotRef {
                    name: name.to_string(),
                    kind,
                    reference: path_arg(&path),
                })
            }
            SnapshotKind::Internal => {
                self.virsh(&["snapshot-create-as", vm_name, name]).await?;
                Ok(SnapshotRef {
                    name: name.to_string(),
                    kind,
                    reference: name.to_string(),
                })
            }
        }
    }

    async fn diff_snapshot(&self, vm_name: &str, from: &str, to: &str) -> Result<SnapshotDiffPlan> {
        validate_name("VM name", vm_name)?;
        validate_name("from snapshot", from)?;
        validate_name("to snapshot", to)?;

        let workspace = self.config.workspace(vm_name);
        let from_path = snapshot_path(&workspace, from);
        let to_path = snapshot_path(&workspace, to);
        let both_exist = self.fs.exists(&from_path).await && self.fs.exists(&to_path).await;

        let mut plan = SnapshotDiffPlan {
            vm_name: vm_name.to_string(),
            from: from.to_string(),
            to: to.to_string(),
            from_path: None,
            to_path: None,
            notes: Vec::new(),
        };
        if both_exist {
            plan.notes = vec![
                "External snapshots detected. Mount both overlays with qemu-nbd and diff the trees."
                    .to_string(),
                format!(
                    "sudo modprobe nbd max_part=16 && sudo qemu-nbd --read-only --connect=/dev/nbd0 {}",
                    shell_quote(&path_arg(&from_path))
                ),
                format!(
                    "sudo qemu-nbd --read-only --connect=/dev/nbd1 {}",
                    shell_quote(&path_arg(&to_path))
                ),
                "sudo mount -o ro /dev/nbd0p1 /mnt/from && sudo mount -o ro /dev/nbd1p1 /mnt/to"
                    .to_string(),
                "sudo diff -ruN /mnt/from /mnt/to (or rsync -rcn --delete /mnt/to/ /mnt/from/)"
                    .to_string(),
                "Unmount and run qemu-nbd --disconnect on both devices afterwards.".to_string(),
            ];
            plan.from_path = Some(from_path);
            plan.to_path = Some(to_path);
        } else {
            plan.notes = vec![
                "Internal snapshots assumed. Export each snapshot with qemu-img convert -l, then mount and diff."
                    .to_string(),
                "Alternatively, revert the VM to each snapshot in turn and export its filesystem."
                    .to_string(),
            ];
        }
        Ok(plan)
    }

    async fn get_ip_address(&self, vm_name: &str, timeout: Duration) -> Result<IpLease> {
        validate_name("VM name", vm_name)?;
        let start = Instant::now();
        let deadline = start + timeout;
        tracing::info!(
            vm_name,
            timeout_secs = timeout.as_secs(),
            network = %self.config.default_network,
            "Discovering IP address"
        );

        match self.get_vm_state(vm_name).await {
            Ok(VmState::Running) => {}
            Ok(state) => tracing::warn!(
                vm_name,
                state = %state,
                "IP discovery on a VM that is not running"
            ),
            Err(e) => tracing::debug!(vm_name, error = %e, "Could not read VM state"),
        }

        let arp_mac = if self.config.uses_socket_vmnet() {
            let xml = self.virsh(&["dumpxml", vm_name]).await?;
            let mac = Descriptor::parse(&xml)?
                .mac_address()
                .ok_or_else(|| VmError::ElementNotFound("NIC MAC address".into()))?;
            Some(mac)
        } else {
            None
        };

        let mut attempts: u32 = 0;
        loop {
            attempts += 1;
            if let Some(lease) = self.lookup_ip(vm_name, arp_mac.as_deref()).await {
                tracing::info!(
                    vm_name,
                    ip = %lease.ip,
                    mac = %lease.mac,
                    attempts,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "IP address discovered"
                );
                return Ok(lease);
            }
            if attempts % 10 == 0 {
                tracing::debug!(
                    vm_name,
                    attempts,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Still waiting for IP address"
                );
            }
            if Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(IP_POLL_INTERVAL).await;
        }

        let state = self.get_vm_state(vm_name).await.unwrap_or(VmState::Unknown);
        tracing::error!(vm_name, attempts, state = %state, "IP address not found");
        Err(VmError::IpNotFound {
            vm_name: vm_name.to_string(),
            timeout,
            state,
        })
    }

    async fn get_vm_state(&self, vm_name: &str) -> Result<VmState> {
        validate_name("VM name", vm_name)?;
        let out = self.virsh(&["domstate", vm_name]).await?;
        Ok(VmState::parse(&out))
    }

    async fn release_dhcp_lease(&self, network: &str, mac: &str) -> ReleaseReport {
        let network = if network.is_empty() {
            self.config.default_network.as_str()
        } else {
            network
        };
        self.leases.release(network, mac).await
    }
}

/// Login user baked into common cloud images, guessed from the VM name.
pub fn default_guest_user(vm_name: &str) -> &'static str {
    let name = vm_name.to_lowercase();
    if name.contains("ubuntu") {
        "ubuntu"
    } else if name.contains("centos") || name.contains("rhel") {
        "centos"
    } else {
        "cloud-user"
    }
}

fn validate_name(what: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(VmError::InvalidArgument(format!("{what} is required")));
    }
    if value.contains('/') || value == "." || value == ".." {
        return Err(VmError::InvalidArgument(format!(
            "{what} must not contain path separators: {value:?}"
        )));
    }
    Ok(())
}

fn is_valid_username(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_lowercase() || c == '_')
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
        && name.len() <= 32
}

fn snapshot_path(workspace: &Path, name: &str) -> PathBuf {
    workspace.join(format!("snap-{name}.qcow2"))
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
