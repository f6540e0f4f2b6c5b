//! Configuration for the Kestrel daemon.
//!
//! Defaults come from each crate's config struct. An optional YAML file
//! named by `KESTREL_CONFIG` is applied first, then individual environment
//! variables.

use kestrel_core::ServiceConfig;
use kestrel_keys::KeyConfig;
use kestrel_vm::{Arch, DomainType, DriverConfig, KeyInjectMethod, RemoteHost, SeedFallback};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming the YAML config file.
pub const CONFIG_ENV: &str = "KESTREL_CONFIG";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable lines (default).
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

impl LogFormat {
    /// Parse from string (case-insensitive). Anything but `json` is text.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "json" => Self::Json,
            _ => Self::Text,
        }
    }
}

/// Configuration loading or validation error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },

    #[error("driver config: {0}")]
    Driver(#[from] kestrel_vm::VmError),

    #[error("credential config: {0}")]
    Keys(#[from] kestrel_keys::KeyError),

    #[error("service config: {0}")]
    Service(#[from] kestrel_core::CoreError),
}

/// Complete daemon configuration.
#[derive(Debug, Clone, Default)]
pub struct KestrelConfig {
    pub driver: DriverConfig,
    pub keys: KeyConfig,
    pub service: ServiceConfig,
    pub log_format: LogFormat,
    /// Destroy every tracked sandbox on shutdown (default: true).
    pub destroy_on_exit: bool,
}

/// YAML file layout. Every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    libvirt: LibvirtSection,
    vm: VmSection,
    ssh: SshSection,
    sandbox: SandboxSection,
    logging: LoggingSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct LibvirtSection {
    uri: Option<String>,
    network: Option<String>,
    base_image_dir: Option<PathBuf>,
    work_dir: Option<PathBuf>,
    lease_dir: Option<PathBuf>,
    key_inject_method: Option<String>,
    seed_fallback: Option<String>,
    arch: Option<String>,
    machine: Option<String>,
    domain_type: Option<String>,
    socket_vmnet_wrapper: Option<PathBuf>,
    tool_timeout_secs: Option<u64>,
    remote_host: Option<String>,
    remote_user: Option<String>,
    remote_port: Option<u16>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct VmSection {
    default_vcpus: Option<u32>,
    default_memory_mb: Option<u32>,
    command_timeout_secs: Option<u64>,
    ip_discovery_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct SshSection {
    ca_key_path: Option<PathBuf>,
    key_dir: Option<PathBuf>,
    cert_ttl_secs: Option<u64>,
    max_ttl_secs: Option<u64>,
    refresh_margin_secs: Option<u64>,
    default_user: Option<String>,
    proxy_jump: Option<String>,
    connect_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct SandboxSection {
    default_ttl_secs: Option<u64>,
    janitor_interval_secs: Option<u64>,
    stream_interval_secs: Option<u64>,
    destroy_on_exit: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct LoggingSection {
    format: Option<String>,
}

fn secs(value: Option<u64>) -> Option<Duration> {
    value.map(Duration::from_secs)
}

fn set<T>(target: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *target = value;
    }
}

fn enum_value<T>(
    key: &str,
    value: Option<String>,
    parse: fn(&str) -> Option<T>,
) -> Result<Option<T>, ConfigError> {
    match value {
        None => Ok(None),
        Some(v) => parse(&v)
            .map(Some)
            .ok_or(ConfigError::InvalidValue {
                key: key.to_string(),
                value: v,
            }),
    }
}

impl KestrelConfig {
    /// Load from `KESTREL_CONFIG` (if set) and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let file = std::env::var(CONFIG_ENV).ok().filter(|p| !p.is_empty());
        Self::load_from(file.as_deref().map(Path::new), |key| std::env::var(key).ok())
    }

    /// Load from an optional YAML file, then apply overrides from `env`.
    pub fn load_from(
        file: Option<&Path>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut config = Self {
            destroy_on_exit: true,
            ..Default::default()
        };
        if let Some(path) = file {
            let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
            let parsed: FileConfig =
                serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
                    path: path.to_path_buf(),
                    source,
                })?;
            config.apply_file(parsed)?;
        }
        config.apply_env(env)?;
        config.sync();
        Ok(config)
    }

    fn apply_file(&mut self, file: FileConfig) -> Result<(), ConfigError> {
        let FileConfig {
            libvirt,
            vm,
            ssh,
            sandbox,
            logging,
        } = file;

        let d = &mut self.driver;
        set(&mut d.libvirt_uri, libvirt.uri);
        set(&mut d.default_network, libvirt.network);
        set(&mut d.base_image_dir, libvirt.base_image_dir);
        set(&mut d.work_dir, libvirt.work_dir);
        set(&mut d.lease_dir, libvirt.lease_dir);
        set(
            &mut d.key_inject_method,
            enum_value("libvirt.key_inject_method", libvirt.key_inject_method, KeyInjectMethod::parse)?,
        );
        set(
            &mut d.seed_fallback,
            enum_value("libvirt.seed_fallback", libvirt.seed_fallback, SeedFallback::parse)?,
        );
        set(&mut d.arch, libvirt.arch.as_deref().map(Arch::parse));
        if libvirt.machine.is_some() {
            d.machine = libvirt.machine;
        }
        set(&mut d.domain_type, libvirt.domain_type.as_deref().map(DomainType::parse));
        if libvirt.socket_vmnet_wrapper.is_some() {
            d.socket_vmnet_wrapper = libvirt.socket_vmnet_wrapper;
        }
        set(&mut d.command_timeout, secs(libvirt.tool_timeout_secs));
        set(&mut d.default_vcpus, vm.default_vcpus);
        set(&mut d.default_memory_mb, vm.default_memory_mb);
        self.apply_remote(libvirt.remote_host, libvirt.remote_user, libvirt.remote_port);

        let s = &mut self.service;
        set(&mut s.command_timeout, secs(vm.command_timeout_secs));
        set(&mut s.ip_discovery_timeout, secs(vm.ip_discovery_timeout_secs));
        set(&mut s.ssh_connect_timeout, secs(ssh.connect_timeout_secs));
        if ssh.proxy_jump.is_some() {
            s.ssh_proxy_jump = ssh.proxy_jump;
        }
        set(&mut s.stream_interval, secs(sandbox.stream_interval_secs));
        set(&mut s.janitor_interval, secs(sandbox.janitor_interval_secs));
        if sandbox.default_ttl_secs.is_some() {
            s.default_ttl = secs(sandbox.default_ttl_secs);
        }

        let k = &mut self.keys;
        set(&mut k.ca_key_path, ssh.ca_key_path);
        set(&mut k.key_dir, ssh.key_dir);
        set(&mut k.cert_ttl, secs(ssh.cert_ttl_secs));
        set(&mut k.max_ttl, secs(ssh.max_ttl_secs));
        set(&mut k.refresh_margin, secs(ssh.refresh_margin_secs));
        set(&mut k.default_username, ssh.default_user);

        set(&mut self.destroy_on_exit, sandbox.destroy_on_exit);
        set(&mut self.log_format, logging.format.as_deref().map(LogFormat::parse));
        Ok(())
    }

    /// Apply environment overrides.
    ///
    /// | Variable | Field |
    /// |----------|-------|
    /// | `KESTREL_LIBVIRT_URI` | libvirt URI |
    /// | `KESTREL_NETWORK` | libvirt network |
    /// | `KESTREL_BASE_IMAGE_DIR` | golden image directory |
    /// | `KESTREL_WORK_DIR` | per-sandbox workspaces |
    /// | `KESTREL_REMOTE_HOST` | libvirt host managed over SSH |
    /// | `KESTREL_REMOTE_USER` | login on the remote host |
    /// | `KESTREL_REMOTE_PORT` | SSH port of the remote host |
    /// | `KESTREL_KEY_INJECT_METHOD` | `virt-customize` or `cloud-init` |
    /// | `KESTREL_SEED_FALLBACK` | `detach`, `reuse` or `fail` |
    /// | `KESTREL_DEFAULT_VCPUS` | vCPUs |
    /// | `KESTREL_DEFAULT_MEMORY_MB` | memory |
    /// | `KESTREL_COMMAND_TIMEOUT_SECS` | command timeout |
    /// | `KESTREL_IP_TIMEOUT_SECS` | IP discovery timeout |
    /// | `KESTREL_SSH_CA_KEY` | CA private key |
    /// | `KESTREL_SSH_KEY_DIR` | managed key directory |
    /// | `KESTREL_SSH_CERT_TTL_SECS` | certificate lifetime |
    /// | `KESTREL_SSH_USER` | managed login |
    /// | `KESTREL_SSH_PROXY_JUMP` | ProxyJump host |
    /// | `KESTREL_DEFAULT_TTL_SECS` | sandbox TTL when none is given |
    /// | `KESTREL_JANITOR_INTERVAL_SECS` | janitor sweep interval |
    /// | `KESTREL_DESTROY_ON_EXIT` | destroy sandboxes on shutdown |
    /// | `KESTREL_LOG_FORMAT` | `text` or `json` |
    fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        let var = |key: &str| env(key).filter(|v| !v.trim().is_empty());
        let number = |key: &str| -> Result<Option<u64>, ConfigError> {
            match var(key) {
                None => Ok(None),
                Some(v) => v.trim().parse().map(Some).map_err(|_| ConfigError::InvalidValue {
                    key: key.to_string(),
                    value: v,
                }),
            }
        };
        let small = |key: &str| -> Result<Option<u32>, ConfigError> {
            number(key)?
                .map(|n| {
                    u32::try_from(n).map_err(|_| ConfigError::InvalidValue {
                        key: key.to_string(),
                        value: n.to_string(),
                    })
                })
                .transpose()
        };

        let d = &mut self.driver;
        set(&mut d.libvirt_uri, var("KESTREL_LIBVIRT_URI"));
        set(&mut d.default_network, var("KESTREL_NETWORK"));
        set(&mut d.base_image_dir, var("KESTREL_BASE_IMAGE_DIR").map(PathBuf::from));
        set(&mut d.work_dir, var("KESTREL_WORK_DIR").map(PathBuf::from));
        set(
            &mut d.key_inject_method,
            enum_value("KESTREL_KEY_INJECT_METHOD", var("KESTREL_KEY_INJECT_METHOD"), KeyInjectMethod::parse)?,
        );
        set(
            &mut d.seed_fallback,
            enum_value("KESTREL_SEED_FALLBACK", var("KESTREL_SEED_FALLBACK"), SeedFallback::parse)?,
        );
        set(&mut d.default_vcpus, small("KESTREL_DEFAULT_VCPUS")?);
        set(&mut d.default_memory_mb, small("KESTREL_DEFAULT_MEMORY_MB")?);
        let port = number("KESTREL_REMOTE_PORT")?
            .map(|n| {
                u16::try_from(n).map_err(|_| ConfigError::InvalidValue {
                    key: "KESTREL_REMOTE_PORT".to_string(),
                    value: n.to_string(),
                })
            })
            .transpose()?;
        self.apply_remote(var("KESTREL_REMOTE_HOST"), var("KESTREL_REMOTE_USER"), port);

        let s = &mut self.service;
        set(&mut s.command_timeout, secs(number("KESTREL_COMMAND_TIMEOUT_SECS")?));
        set(&mut s.ip_discovery_timeout, secs(number("KESTREL_IP_TIMEOUT_SECS")?));
        if let Some(jump) = var("KESTREL_SSH_PROXY_JUMP") {
            s.ssh_proxy_jump = Some(jump);
        }
        if let Some(ttl) = number("KESTREL_DEFAULT_TTL_SECS")? {
            s.default_ttl = Some(Duration::from_secs(ttl));
        }
        set(&mut s.janitor_interval, secs(number("KESTREL_JANITOR_INTERVAL_SECS")?));

        let k = &mut self.keys;
        set(&mut k.ca_key_path, var("KESTREL_SSH_CA_KEY").map(PathBuf::from));
        set(&mut k.key_dir, var("KESTREL_SSH_KEY_DIR").map(PathBuf::from));
        set(&mut k.cert_ttl, secs(number("KESTREL_SSH_CERT_TTL_SECS")?));
        set(&mut k.default_username, var("KESTREL_SSH_USER"));

        if let Some(v) = var("KESTREL_DESTROY_ON_EXIT") {
            self.destroy_on_exit = v != "false" && v != "0";
        }
        set(&mut self.log_format, var("KESTREL_LOG_FORMAT").as_deref().map(LogFormat::parse));
        Ok(())
    }

    /// Select a remote host by address, then adjust its login and port.
    fn apply_remote(&mut self, address: Option<String>, user: Option<String>, port: Option<u16>) {
        if let Some(address) = address {
            self.driver.remote_host = Some(RemoteHost::new(address));
        }
        if let Some(host) = self.driver.remote_host.as_mut() {
            set(&mut host.user, user);
            set(&mut host.port, port);
        }
    }

    /// Propagate settings shared between crates.
    ///
    /// Guests of a remote host are reached through that host unless a
    /// ProxyJump is configured explicitly.
    fn sync(&mut self) {
        if self.service.ssh_proxy_jump.is_none() {
            self.service.ssh_proxy_jump =
                self.driver.remote_host.as_ref().map(RemoteHost::jump_spec);
        }
        self.service.network = self.driver.default_network.clone();
        self.service.default_vcpus = self.driver.default_vcpus;
        self.service.default_memory_mb = self.driver.default_memory_mb;
        self.service.managed_username = self.keys.default_username.clone();
    }

    /// Validate every section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.driver.validate()?;
        self.keys.validate()?;
        self.service.validate()?;
        Ok(())
    }

    /// Whether managed SSH credentials can be issued.
    pub fn managed_credentials_available(&self) -> bool {
        self.keys.ca_key_path.exists()
    }

    /// Log warnings for host paths that do not exist yet.
    pub fn validate_warn(&self) {
        if !self.managed_credentials_available() {
            tracing::warn!(
                path = %self.keys.ca_key_path.display(),
                "SSH CA key not found, managed credentials disabled"
            );
        }
        if let Some(host) = &self.driver.remote_host {
            tracing::info!(host = %host.destination(), "Host paths are checked on the remote host at use");
            return;
        }
        if !self.driver.base_image_dir.exists() {
            tracing::warn!(path = %self.driver.base_image_dir.display(), "Base image directory not found");
        }
        if let Some(parent) = self.driver.work_dir.parent() {
            if !parent.exists() {
                tracing::warn!(path = %self.driver.work_dir.display(), "Work directory parent not found");
            }
        }
    }
}
