//! Domain descriptor synthesis.
//!
//! Descriptors are libvirt domain XML documents. They are parsed into an
//! element tree and edited through typed accessors; every edit that targets
//! a specific element fails with [`VmError::ElementNotFound`] when that
//! element is absent, so a partially-modified descriptor is never emitted.

use crate::error::{Result, VmError};
use rand::Rng;
use std::path::{Path, PathBuf};
use xmltree::{Element, EmitterConfig, Namespace, XMLNode};

/// Namespace of libvirt's QEMU command-line passthrough elements.
pub const QEMU_NAMESPACE: &str = "http://libvirt.org/schemas/domain/qemu/1.0";

/// OUI reserved for QEMU/KVM guests. The first octet has the
/// locally-administered bit set.
pub const MAC_PREFIX: &str = "52:54:00";

/// Generate a MAC address under [`MAC_PREFIX`] with random low octets.
pub fn generate_mac() -> String {
    let tail: [u8; 3] = rand::thread_rng().gen();
    format!(
        "{MAC_PREFIX}:{:02x}:{:02x}:{:02x}",
        tail[0], tail[1], tail[2]
    )
}

/// Guest CPU architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Arch {
    /// 64-bit x86.
    #[default]
    X86_64,
    /// 64-bit ARM.
    Aarch64,
}

impl Arch {
    /// Parse an architecture name. Anything unrecognized is x86_64.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "aarch64" | "arm64" => Self::Aarch64,
            _ => Self::X86_64,
        }
    }

    /// Name as libvirt spells it.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::X86_64 => "x86_64",
            Self::Aarch64 => "aarch64",
        }
    }

    fn default_machine(&self) -> &'static str {
        match self {
            Self::X86_64 => "pc-q35-6.2",
            Self::Aarch64 => "virt",
        }
    }
}

/// Hypervisor domain type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DomainType {
    /// Hardware-accelerated.
    #[default]
    Kvm,
    /// Pure emulation.
    Qemu,
}

impl DomainType {
    /// Parse a domain type. Anything unrecognized is KVM.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "qemu" => Self::Qemu,
            _ => Self::Kvm,
        }
    }

    /// Name as libvirt spells it.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Kvm => "kvm",
            Self::Qemu => "qemu",
        }
    }
}

/// How the guest NIC is attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkAttachment {
    /// User-mode networking.
    User,
    /// A named libvirt network.
    Network(String),
    /// socket_vmnet, wired through QEMU command-line passthrough.
    SocketVmnet,
}

impl NetworkAttachment {
    /// Map a configured network name to an attachment.
    pub fn from_name(name: &str) -> Self {
        match name.trim() {
            "" | "user" => Self::User,
            crate::config::SOCKET_VMNET => Self::SocketVmnet,
            other => Self::Network(other.to_string()),
        }
    }
}

/// Inputs for [`render`].
#[derive(Debug, Clone)]
pub struct DomainParams {
    /// Domain name.
    pub name: String,
    /// vCPU count.
    pub vcpus: u32,
    /// Memory in MiB.
    pub memory_mb: u32,
    /// Primary (overlay) disk.
    pub disk_path: PathBuf,
    /// Optional reinitialization media, attached read-only.
    pub seed_path: Option<PathBuf>,
    /// NIC attachment.
    pub network: NetworkAttachment,
    /// NIC MAC address. Generated when absent.
    pub mac: Option<String>,
    /// Guest architecture.
    pub arch: Arch,
    /// Machine type. Defaults per architecture.
    pub machine: Option<String>,
    /// Domain type.
    pub domain_type: DomainType,
    /// Emulator binary override.
    pub emulator: Option<PathBuf>,
}

impl DomainParams {
    /// Parameters with x86_64/KVM defaults, 2 vCPUs and 2048 MiB.
    pub fn new(name: impl Into<String>, disk_path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            vcpus: 2,
            memory_mb: 2048,
            disk_path: disk_path.into(),
            seed_path: None,
            network: NetworkAttachment::Network("default".into()),
            mac: None,
            arch: Arch::X86_64,
            machine: None,
            domain_type: DomainType::Kvm,
            emulator: None,
        }
    }
}

/// Render a fresh descriptor.
pub fn render(params: &DomainParams) -> Result<String> {
    if params.name.trim().is_empty() {
        return Err(VmError::InvalidArgument("domain name is required".into()));
    }
    let arch = params.arch;
    let aarch64 = arch == Arch::Aarch64;
    let machine = params
        .machine
        .clone()
        .unwrap_or_else(|| arch.default_machine().to_string());
    let mac = params.mac.clone().unwrap_or_else(generate_mac);

    let mut os = element("os")
        .with_child(
            element("type")
                .with_attr("arch", arch.as_str())
                .with_attr("machine", machine)
                .with_text("hvm"),
        )
        .with_child(element("boot").with_attr("dev", "hd"))
        .with_child(element("boot").with_attr("dev", "cdrom"));
    if aarch64 {
        os = os.with_attr("firmware", "efi");
    }

    let mut features = element("features").with_child(element("acpi"));
    if aarch64 {
        features = features.with_child(element("gic").with_attr("version", "2"));
    } else {
        features = features
            .with_child(element("apic"))
            .with_child(element("pae"));
    }

    let cpu = if aarch64 && params.domain_type == DomainType::Qemu {
        element("cpu")
            .with_attr("mode", "custom")
            .with_attr("match", "exact")
            .with_child(
                element("model")
                    .with_attr("fallback", "allow")
                    .with_text("cortex-a72"),
            )
    } else {
        element("cpu").with_attr("mode", "host-passthrough")
    };

    let mut devices = element("devices");
    if let Some(emulator) = &params.emulator {
        devices = devices.with_child(element("emulator").with_text(path_str(emulator)));
    }
    devices = devices.with_child(
        element("disk")
            .with_attr("type", "file")
            .with_attr("device", "disk")
            .with_child(
                element("driver")
                    .with_attr("name", "qemu")
                    .with_attr("type", "qcow2")
                    .with_attr("cache", "none"),
            )
            .with_child(element("source").with_attr("file", path_str(&params.disk_path)))
            .with_child(
                element("target")
                    .with_attr("dev", "vda")
                    .with_attr("bus", "virtio"),
            ),
    );
    if let Some(seed) = &params.seed_path {
        devices = devices
            .with_child(cdrom(&path_str(seed), "sda"))
            .with_child(scsi_controller());
    }
    devices = devices.with_child(
        element("controller")
            .with_attr("type", "pci")
            .with_attr("model", "pcie-root"),
    );
    if aarch64 {
        devices = devices.with_child(
            element("controller")
                .with_attr("type", "usb")
                .with_attr("model", "qemu-xhci"),
        );
    }
    match &params.network {
        NetworkAttachment::User => {
            devices = devices.with_child(
                element("interface")
                    .with_attr("type", "user")
                    .with_child(element("mac").with_attr("address", &mac))
                    .with_child(element("model").with_attr("type", "virtio")),
            );
        }
        NetworkAttachment::Network(name) => {
            devices = devices.with_child(
                element("interface")
                    .with_attr("type", "network")
                    .with_child(element("source").with_attr("network", name))
                    .with_child(element("mac").with_attr("address", &mac))
                    .with_child(element("model").with_attr("type", "virtio")),
            );
        }
        NetworkAttachment::SocketVmnet => {}
    }
    devices = devices
        .with_child(
            element("graphics")
                .with_attr("type", "vnc")
                .with_attr("autoport", "yes")
                .with_attr("listen", "0.0.0.0"),
        )
        .with_child(element("console").with_attr("type", "pty"));
    if !aarch64 {
        devices = devices.with_child(
            element("input")
                .with_attr("type", "tablet")
                .with_attr("bus", "usb"),
        );
    }
    devices = devices.with_child(
        element("rng").with_attr("model", "virtio").with_child(
            element("backend")
                .with_attr("model", "random")
                .with_text("/dev/urandom"),
        ),
    );

    let mut root = element("domain")
        .with_attr("type", params.domain_type.as_str())
        .with_child(element("name").with_text(&params.name))
        .with_child(
            element("memory")
                .with_attr("unit", "MiB")
                .with_text(params.memory_mb.to_string()),
        )
        .with_child(
            element("vcpu")
                .with_attr("placement", "static")
                .with_text(params.vcpus.to_string()),
        )
        .with_child(os)
        .with_child(features)
        .with_child(cpu)
        .with_child(devices);

    if params.network == NetworkAttachment::SocketVmnet {
        let mut ns = Namespace::empty();
        ns.put("qemu", QEMU_NAMESPACE);
        root.namespaces = Some(ns);
        let mut cmdline = qemu_element("commandline");
        for value in [
            "-netdev".to_string(),
            "socket,id=net0,fd=3".to_string(),
            "-device".to_string(),
            format!("virtio-net-pci,netdev=net0,mac={mac}"),
        ] {
            let mut arg = qemu_element("arg");
            arg.attributes.insert("value".into(), value);
            cmdline.children.push(XMLNode::Element(arg));
        }
        root.children.push(XMLNode::Element(cmdline));
    }

    write(&root)
}

/// Derive a clone's descriptor from a source descriptor.
///
/// Renames the domain, drops its UUID, points the primary virtio disk at
/// `new_disk`, gives the NIC a fresh MAC without a bus address, and removes
/// display passwords and sound devices.
pub fn mutate(source: &str, new_name: &str, new_disk: &Path) -> Result<String> {
    let mut descriptor = Descriptor::parse(source)?;
    descriptor.prepare_clone(new_name, new_disk)?;
    descriptor.to_xml()
}

/// A parsed domain descriptor.
#[derive(Debug, Clone)]
pub struct Descriptor {
    root: Element,
}

impl Descriptor {
    /// Parse descriptor XML.
    pub fn parse(xml: &str) -> Result<Self> {
        let root =
            Element::parse(xml.as_bytes()).map_err(|e| VmError::Descriptor(e.to_string()))?;
        if root.name != "domain" {
            return Err(VmError::Descriptor(format!(
                "root element is <{}>, expected <domain>",
                root.name
            )));
        }
        Ok(Self { root })
    }

    /// Serialize back to XML.
    pub fn to_xml(&self) -> Result<String> {
        write(&self.root)
    }

    /// Apply every edit a clone needs. Returns the new MAC address.
    pub fn prepare_clone(&mut self, new_name: &str, new_disk: &Path) -> Result<String> {
        if new_name.trim().is_empty() {
            return Err(VmError::InvalidArgument("new domain name is required".into()));
        }
        self.set_name(new_name)?;
        self.remove_uuid();
        self.set_primary_disk_source(&path_str(new_disk))?;
        let mac = self.regenerate_mac()?;
        self.strip_graphics_passwords();
        self.remove_sound_devices();
        Ok(mac)
    }

    /// Domain name.
    pub fn name(&self) -> Option<String> {
        child(&self.root, "name").and_then(text_of)
    }

    /// Rename the domain.
    pub fn set_name(&mut self, name: &str) -> Result<()> {
        let elem = child_mut(&mut self.root, "name").ok_or_else(|| not_found("name"))?;
        set_text(elem, name);
        Ok(())
    }

    /// Override the vCPU count and memory size. `None` keeps the current value.
    pub fn set_resources(&mut self, vcpus: Option<u32>, memory_mb: Option<u32>) -> Result<()> {
        if let Some(vcpus) = vcpus {
            let elem = child_mut(&mut self.root, "vcpu").ok_or_else(|| not_found("vcpu"))?;
            set_text(elem, &vcpus.to_string());
        }
        if let Some(mb) = memory_mb {
            if child(&self.root, "memory").is_none() {
                return Err(not_found("memory"));
            }
            for name in ["memory", "currentMemory"] {
                if let Some(elem) = child_mut(&mut self.root, name) {
                    elem.attributes.insert("unit".into(), "MiB".into());
                    set_text(elem, &mb.to_string());
                }
            }
        }
        Ok(())
    }

    /// Attach a network-type NIC to `network`. Returns whether one was changed.
    pub fn set_network(&mut self, network: &str) -> bool {
        let Some(iface) =
            child_mut(&mut self.root, "devices").and_then(|d| child_mut(d, "interface"))
        else {
            return false;
        };
        if iface.attributes.get("type").map(String::as_str) != Some("network") {
            return false;
        }
        match child_mut(iface, "source") {
            Some(source) => {
                source.attributes.insert("network".into(), network.to_string());
            }
            None => iface.children.push(XMLNode::Element(
                element("source").with_attr("network", network),
            )),
        }
        true
    }

    /// Domain UUID, if present.
    pub fn uuid(&self) -> Option<String> {
        child(&self.root, "uuid").and_then(text_of)
    }

    /// Drop the UUID so the hypervisor assigns a fresh one on define.
    pub fn remove_uuid(&mut self) {
        self.root.children.retain(|n| !is_element(n, "uuid"));
    }

    /// Domain type attribute (`kvm`, `qemu`).
    pub fn domain_type(&self) -> Option<DomainType> {
        self.root.attributes.get("type").map(|t| DomainType::parse(t))
    }

    /// Architecture from `os/type@arch`.
    pub fn arch(&self) -> Option<Arch> {
        child(&self.root, "os")
            .and_then(|os| child(os, "type"))
            .and_then(|t| t.attributes.get("arch"))
            .map(|a| Arch::parse(a))
    }

    /// Backing file of the primary virtio disk.
    pub fn primary_disk_source(&self) -> Option<String> {
        let devices = child(&self.root, "devices")?;
        elements(devices, "disk")
            .find(|d| is_primary_virtio_disk(d))
            .and_then(|d| child(d, "source"))
            .and_then(|s| s.attributes.get("file").cloned())
    }

    /// Point the primary virtio disk at `path` as a qcow2 file.
    pub fn set_primary_disk_source(&mut self, path: &str) -> Result<()> {
        let devices = child_mut(&mut self.root, "devices").ok_or_else(|| not_found("devices"))?;
        let disk = elements_mut(devices, "disk")
            .find(|d| is_primary_virtio_disk(d))
            .ok_or_else(|| not_found("devices/disk[@device='disk'] with virtio target"))?;
        disk.attributes.insert("type".into(), "file".into());
        if let Some(driver) = child_mut(disk, "driver") {
            driver.attributes.insert("type".into(), "qcow2".into());
        }
        let source = child_mut(disk, "source").ok_or_else(|| not_found("disk/source"))?;
        source.attributes.remove("dev");
        source.attributes.insert("file".into(), path.to_string());
        Ok(())
    }

    /// MAC address of the guest NIC.
    ///
    /// Looks at the first `<interface>` and falls back to a `virtio-net-pci`
    /// argument in QEMU command-line passthrough.
    pub fn mac_address(&self) -> Option<String> {
        let from_interface = child(&self.root, "devices")
            .and_then(|d| child(d, "interface"))
            .and_then(|i| child(i, "mac"))
            .and_then(|m| m.attributes.get("address").cloned());
        from_interface.or_else(|| {
            self.commandline_args()
                .find_map(|value| nic_mac_from_arg(value).map(str::to_string))
        })
    }

    /// Give the NIC a new MAC and drop its bus address. Returns the new MAC.
    pub fn regenerate_mac(&mut self) -> Result<String> {
        let mac = generate_mac();

        if let Some(iface) =
            child_mut(&mut self.root, "devices").and_then(|d| child_mut(d, "interface"))
        {
            match child_mut(iface, "mac") {
                Some(elem) => {
                    elem.attributes.insert("address".into(), mac.clone());
                }
                None => iface.children.push(XMLNode::Element(
                    element("mac").with_attr("address", &mac),
                )),
            }
            iface.children.retain(|n| !is_element(n, "address"));
            return Ok(mac);
        }

        for cmdline in self
            .root
            .children
            .iter_mut()
            .filter_map(as_element_mut)
            .filter(|e| is_qemu(e, "commandline"))
        {
            for arg in cmdline
                .children
                .iter_mut()
                .filter_map(as_element_mut)
                .filter(|e| is_qemu(e, "arg"))
            {
                let Some(value) = arg.attributes.get("value") else {
                    continue;
                };
                if nic_mac_from_arg(value).is_none() {
                    continue;
                }
                let rewritten = value
                    .split(',')
                    .map(|part| {
                        if part.starts_with("mac=") {
                            format!("mac={mac}")
                        } else {
                            part.to_string()
                        }
                    })
                    .collect::<Vec<_>>()
                    .join(",");
                arg.attributes.insert("value".into(), rewritten);
                return Ok(mac);
            }
        }

        Err(not_found("devices/interface"))
    }

    /// Swap the source of the cdrom currently backed by `old`. Returns
    /// whether a device was changed.
    pub fn replace_media(&mut self, old: &str, new: &str) -> bool {
        let Some(devices) = child_mut(&mut self.root, "devices") else {
            return false;
        };
        for disk in elements_mut(devices, "disk").filter(|d| is_cdrom(d)) {
            if let Some(source) = child_mut(disk, "source") {
                if source.attributes.get("file").map(String::as_str) == Some(old) {
                    source.attributes.insert("file".into(), new.to_string());
                    return true;
                }
            }
        }
        false
    }

    /// Remove the cdrom backed by `source`. Returns whether one was removed.
    pub fn detach_media(&mut self, source: &str) -> bool {
        let Some(devices) = child_mut(&mut self.root, "devices") else {
            return false;
        };
        let before = devices.children.len();
        devices.children.retain(|n| match n {
            XMLNode::Element(d) if d.name == "disk" && is_cdrom(d) => {
                child(d, "source").and_then(|s| s.attributes.get("file")).map(String::as_str)
                    != Some(source)
            }
            _ => true,
        });
        devices.children.len() != before
    }

    /// Attach `path` as a read-only cdrom on a free SCSI target.
    ///
    /// Returns `false` when the media is already attached.
    pub fn attach_media(&mut self, path: &str) -> Result<bool> {
        let devices = child_mut(&mut self.root, "devices").ok_or_else(|| not_found("devices"))?;
        let attached = elements(devices, "disk").any(|d| {
            child(d, "source").and_then(|s| s.attributes.get("file")).map(String::as_str)
                == Some(path)
        });
        if attached {
            return Ok(false);
        }

        let used: Vec<String> = elements(devices, "disk")
            .filter_map(|d| child(d, "target"))
            .filter_map(|t| t.attributes.get("dev").cloned())
            .collect();
        let target = ('a'..='z')
            .map(|c| format!("sd{c}"))
            .find(|dev| !used.contains(dev))
            .ok_or_else(|| VmError::Descriptor("no free sd* target for media".into()))?;

        let has_scsi = elements(devices, "controller")
            .any(|c| c.attributes.get("type").map(String::as_str) == Some("scsi"));
        devices.children.push(XMLNode::Element(cdrom(path, &target)));
        if !has_scsi {
            devices.children.push(XMLNode::Element(scsi_controller()));
        }
        Ok(true)
    }

    /// Remove `passwd` from every graphics device. Returns how many were stripped.
    pub fn strip_graphics_passwords(&mut self) -> usize {
        let Some(devices) = child_mut(&mut self.root, "devices") else {
            return 0;
        };
        elements_mut(devices, "graphics")
            .filter_map(|g| g.attributes.remove("passwd"))
            .count()
    }

    /// Remove every sound device. Returns how many were removed.
    pub fn remove_sound_devices(&mut self) -> usize {
        let Some(devices) = child_mut(&mut self.root, "devices") else {
            return 0;
        };
        let before = devices.children.len();
        devices.children.retain(|n| !is_element(n, "sound"));
        before - devices.children.len()
    }

    fn commandline_args(&self) -> impl Iterator<Item = &String> {
        self.root
            .children
            .iter()
            .filter_map(as_element)
            .filter(|e| is_qemu(e, "commandline"))
            .flat_map(|c| c.children.iter().filter_map(as_element))
            .filter(|e| is_qemu(e, "arg"))
            .filter_map(|a| a.attributes.get("value"))
    }
}

// ============================================================================
// Tree helpers
// ============================================================================

trait ElementExt {
    fn with_attr(self, key: &str, value: impl Into<String>) -> Self;
    fn with_text(self, text: impl Into<String>) -> Self;
    fn with_child(self, child: Element) -> Self;
}

impl ElementExt for Element {
    fn with_attr(mut self, key: &str, value: impl Into<String>) -> Self {
        self.attributes.insert(key.to_string(), value.into());
        self
    }

    fn with_text(mut self, text: impl Into<String>) -> Self {
        self.children.push(XMLNode::Text(text.into()));
        self
    }

    fn with_child(mut self, child: Element) -> Self {
        self.children.push(XMLNode::Element(child));
        self
    }
}

fn element(name: &str) -> Element {
    Element::new(name)
}

fn qemu_element(name: &str) -> Element {
    let mut e = Element::new(name);
    e.prefix = Some("qemu".into());
    e.namespace = Some(QEMU_NAMESPACE.into());
    e
}

fn cdrom(source: &str, target: &str) -> Element {
    element("disk")
        .with_attr("type", "file")
        .with_attr("device", "cdrom")
        .with_child(
            element("driver")
                .with_attr("name", "qemu")
                .with_attr("type", "raw"),
        )
        .with_child(element("source").with_attr("file", source))
        .with_child(
            element("target")
                .with_attr("dev", target)
                .with_attr("bus", "scsi"),
        )
        .with_child(element("readonly"))
}

fn scsi_controller() -> Element {
    element("controller")
        .with_attr("type", "scsi")
        .with_attr("model", "virtio-scsi")
}

fn write(root: &Element) -> Result<String> {
    let mut buf = Vec::new();
    let config = EmitterConfig::new()
        .perform_indent(true)
        .write_document_declaration(false);
    root.write_with_config(&mut buf, config)
        .map_err(|e| VmError::Descriptor(e.to_string()))?;
    String::from_utf8(buf).map_err(|e| VmError::Descriptor(e.to_string()))
}

fn as_element(node: &XMLNode) -> Option<&Element> {
    match node {
        XMLNode::Element(e) => Some(e),
        _ => None,
    }
}

fn as_element_mut(node: &mut XMLNode) -> Option<&mut Element> {
    match node {
        XMLNode::Element(e) => Some(e),
        _ => None,
    }
}

fn is_element(node: &XMLNode, name: &str) -> bool {
    matches!(node, XMLNode::Element(e) if e.name == name)
}

fn is_qemu(e: &Element, name: &str) -> bool {
    e.name == name
        && (e.prefix.as_deref() == Some("qemu") || e.namespace.as_deref() == Some(QEMU_NAMESPACE))
}

fn child<'a>(parent: &'a Element, name: &str) -> Option<&'a Element> {
    parent
        .children
        .iter()
        .filter_map(as_element)
        .find(|e| e.name == name)
}

fn child_mut<'a>(parent: &'a mut Element, name: &str) -> Option<&'a mut Element> {
    parent
        .children
        .iter_mut()
        .filter_map(as_element_mut)
        .find(|e| e.name == name)
}

fn elements<'a>(parent: &'a Element, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
    parent
        .children
        .iter()
        .filter_map(as_element)
        .filter(move |e| e.name == name)
}

fn elements_mut<'a>(
    parent: &'a mut Element,
    name: &'a str,
) -> impl Iterator<Item = &'a mut Element> + 'a {
    parent
        .children
        .iter_mut()
        .filter_map(as_element_mut)
        .filter(move |e| e.name == name)
}

fn text_of(e: &Element) -> Option<String> {
    e.children.iter().find_map(|n| match n {
        XMLNode::Text(t) => Some(t.trim().to_string()),
        _ => None,
    })
}

fn set_text(e: &mut Element, text: &str) {
    e.children.retain(|n| !matches!(n, XMLNode::Text(_)));
    e.children.push(XMLNode::Text(text.to_string()));
}

fn is_primary_virtio_disk(disk: &Element) -> bool {
    let device = disk.attributes.get("device").map(String::as_str);
    let bus = child(disk, "target")
        .and_then(|t| t.attributes.get("bus"))
        .map(String::as_str);
    matches!(device, None | Some("disk")) && bus == Some("virtio") && child(disk, "source").is_some()
}

fn is_cdrom(disk: &Element) -> bool {
    disk.attributes.get("device").map(String::as_str) == Some("cdrom")
}

fn nic_mac_from_arg(value: &str) -> Option<&str> {
    if !value.starts_with("virtio-net-pci") {
        return None;
    }
    value.split(',').find_map(|part| part.strip_prefix("mac="))
}

fn not_found(what: &str) -> VmError {
    VmError::ElementNotFound(what.to_string())
}

fn path_str(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
