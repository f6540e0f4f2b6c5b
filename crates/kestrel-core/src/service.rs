//! Sandbox lifecycle orchestration.
//!
//! `SandboxService` sequences driver calls and persistence for every
//! sandbox operation:
//!
//! ```text
//! CREATED -> STARTING -> RUNNING -> {STOPPED, ERROR}
//!     any state -> DESTROYED
//! ```
//!
//! A boot failure lands in `ERROR`. A VM that boots but whose address cannot
//! be found (or collides with another running sandbox) is still `RUNNING`,
//! without an address, and the call reports the error.

use crate::config::ServiceConfig;
use crate::error::{CoreError, Result};
use crate::sandbox::{
    encode_env, new_id, short_id, ChangeDiff, Command, CommandSummary, Diff, Sandbox,
    SandboxState, Snapshot,
};
use crate::ssh::{command_with_env, SshRunner, SshTarget, SystemSshRunner};
use crate::store::{ListOptions, OrderBy, SandboxFilter, SandboxStore, StoreError};
use kestrel_keys::{Clock, KeyProvider, SystemClock};
use kestrel_vm::{CloneSpec, Hypervisor, SnapshotKind};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Parameters for [`SandboxService::create_sandbox`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateSandboxRequest {
    /// VM to clone, or base image file name when `from_image` is set.
    pub source: String,
    /// Clone from a golden base image instead of a live VM.
    pub from_image: bool,
    /// Owning agent.
    pub agent_id: String,
    /// Domain name. Generated as `sbx-<short>` when `None`.
    pub vm_name: Option<String>,
    /// vCPUs. Service default when `None`.
    pub vcpus: Option<u32>,
    /// Memory in MB. Service default when `None`.
    pub memory_mb: Option<u32>,
    /// Lifetime for the expiry janitor.
    pub ttl_seconds: Option<u64>,
    /// Boot right after cloning.
    pub auto_start: bool,
    /// Wait for an address after booting. Ignored without `auto_start`.
    pub wait_for_ip: bool,
}

impl CreateSandboxRequest {
    /// Clone `source_vm` for `agent_id` with defaults, without booting.
    pub fn new(source_vm: impl Into<String>, agent_id: impl Into<String>) -> Self {
        Self {
            source: source_vm.into(),
            from_image: false,
            agent_id: agent_id.into(),
            vm_name: None,
            vcpus: None,
            memory_mb: None,
            ttl_seconds: None,
            auto_start: false,
            wait_for_ip: false,
        }
    }

    /// Boot after cloning, optionally waiting for an address.
    pub fn start(mut self, wait_for_ip: bool) -> Self {
        self.auto_start = true;
        self.wait_for_ip = wait_for_ip;
        self
    }
}

/// Parameters for [`SandboxService::run_command`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunCommandRequest {
    /// Target sandbox.
    pub sandbox_id: String,
    /// Login name. With managed credentials, empty selects the managed account.
    pub username: String,
    /// Caller-owned private key. `None` uses managed certificate credentials.
    pub private_key_path: Option<PathBuf>,
    /// Shell command.
    pub command: String,
    /// Execution timeout. Service default when `None`.
    pub timeout: Option<Duration>,
    /// Variables exported before the command runs.
    pub env: BTreeMap<String, String>,
}

impl RunCommandRequest {
    /// Run `command` with managed credentials and defaults.
    pub fn new(sandbox_id: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            sandbox_id: sandbox_id.into(),
            username: String::new(),
            private_key_path: None,
            command: command.into(),
            timeout: None,
            env: BTreeMap::new(),
        }
    }
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(CoreError::Validation(format!("{field} is required")));
    }
    Ok(())
}

/// Orchestrates sandboxes over a hypervisor driver and a store.
pub struct SandboxService {
    driver: Arc<dyn Hypervisor>,
    store: Arc<dyn SandboxStore>,
    ssh: Arc<dyn SshRunner>,
    keys: Option<Arc<dyn KeyProvider>>,
    config: ServiceConfig,
    clock: Arc<dyn Clock>,
}

impl SandboxService {
    /// Create a service using the system `ssh` client and no managed credentials.
    pub fn new(
        driver: Arc<dyn Hypervisor>,
        store: Arc<dyn SandboxStore>,
        config: ServiceConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            driver,
            store,
            ssh: Arc::new(SystemSshRunner::new()),
            keys: None,
            config,
            clock: Arc::new(SystemClock),
        })
    }

    /// Replace the SSH runner.
    pub fn with_ssh_runner(mut self, ssh: Arc<dyn SshRunner>) -> Self {
        self.ssh = ssh;
        self
    }

    /// Enable managed credentials for [`run_command`](Self::run_command).
    pub fn with_key_provider(mut self, keys: Arc<dyn KeyProvider>) -> Self {
        self.keys = Some(keys);
        self
    }

    /// Replace the clock used for timestamps.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Get the service configuration.
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub(crate) fn store(&self) -> Arc<dyn SandboxStore> {
        self.store.clone()
    }

    pub(crate) fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    /// Clone a sandbox and optionally boot it.
    pub async fn create_sandbox(&self, request: CreateSandboxRequest) -> Result<Sandbox> {
        require("source", &request.source)?;
        require("agent_id", &request.agent_id)?;
        let vm_name = match request.vm_name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => format!("sbx-{}", short_id()),
        };
        let spec = CloneSpec {
            name: vm_name.clone(),
            vcpus: Some(request.vcpus.unwrap_or(self.config.default_vcpus)),
            memory_mb: Some(request.memory_mb.unwrap_or(self.config.default_memory_mb)),
            network: Some(self.config.network.clone()),
        };

        let start = Instant::now();
        tracing::info!(
            source = %request.source,
            from_image = request.from_image,
            agent_id = %request.agent_id,
            vm_name = %vm_name,
            vcpus = spec.vcpus,
            memory_mb = spec.memory_mb,
            auto_start = request.auto_start,
            wait_for_ip = request.wait_for_ip,
            "Creating sandbox"
        );

        let cloned = if request.from_image {
            self.driver.clone_from_image(&request.source, &spec).await
        } else {
            self.driver.clone_from_vm(&request.source, &spec).await
        };
        let domain = cloned.map_err(|e| {
            tracing::error!(source = %request.source, vm_name = %vm_name, error = %e, "Failed to clone VM");
            e
        })?;

        let now = self.clock.now();
        let sandbox = Sandbox {
            id: new_id("SBX"),
            job_id: new_id("JOB"),
            agent_id: request.agent_id.clone(),
            vm_name: domain.name.clone(),
            source_vm: request.source.clone(),
            network: self.config.network.clone(),
            ip_address: None,
            state: SandboxState::Created,
            ttl_seconds: request.ttl_seconds,
            created_at: now,
            updated_at: now,
        };
        if let Err(e) = self.store.create_sandbox(&sandbox).await {
            tracing::error!(vm_name = %sandbox.vm_name, error = %e, "Failed to persist sandbox, removing domain");
            if let Err(cleanup) = self.driver.destroy_vm(&sandbox.vm_name).await {
                tracing::warn!(vm_name = %sandbox.vm_name, error = %cleanup, "Failed to remove unrecorded domain");
            }
            return Err(e.into());
        }
        tracing::debug!(
            sandbox_id = %sandbox.id,
            vm_name = %sandbox.vm_name,
            uuid = ?domain.uuid,
            "Sandbox cloned"
        );

        if request.auto_start {
            self.boot(&sandbox, request.wait_for_ip).await?;
        }

        let sandbox = self.store.get_sandbox(&sandbox.id).await?;
        tracing::info!(
            sandbox_id = %sandbox.id,
            state = %sandbox.state,
            ip = ?sandbox.ip_address,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Sandbox created"
        );
        Ok(sandbox)
    }

    /// Get a sandbox by ID.
    pub async fn get_sandbox(&self, sandbox_id: &str) -> Result<Sandbox> {
        require("sandbox_id", sandbox_id)?;
        Ok(self.store.get_sandbox(sandbox_id).await?)
    }

    /// List sandboxes.
    pub async fn list_sandboxes(
        &self,
        filter: &SandboxFilter,
        options: &ListOptions,
    ) -> Result<Vec<Sandbox>> {
        Ok(self.store.list_sandboxes(filter, options).await?)
    }

    /// Commands run in a sandbox, newest first unless `options` says otherwise.
    pub async fn get_sandbox_commands(
        &self,
        sandbox_id: &str,
        options: &ListOptions,
    ) -> Result<Vec<Command>> {
        require("sandbox_id", sandbox_id)?;
        self.store.get_sandbox(sandbox_id).await?;
        Ok(self.store.list_commands(sandbox_id, options).await?)
    }

    /// Authorize `public_key` for `username` in the guest.
    pub async fn inject_ssh_key(
        &self,
        sandbox_id: &str,
        username: &str,
        public_key: &str,
    ) -> Result<()> {
        require("sandbox_id", sandbox_id)?;
        require("username", username)?;
        require("public_key", public_key)?;
        let mut sandbox = self.store.get_sandbox(sandbox_id).await?;
        self.driver
            .inject_ssh_key(&sandbox.vm_name, username, public_key)
            .await?;
        sandbox.updated_at = self.clock.now();
        self.store.update_sandbox(&sandbox).await?;
        tracing::info!(sandbox_id, username, "Injected SSH key");
        Ok(())
    }

    /// Boot a `CREATED` or `STOPPED` sandbox.
    ///
    /// Returns the discovered address when `wait_for_ip` is set.
    pub async fn start_sandbox(&self, sandbox_id: &str, wait_for_ip: bool) -> Result<Option<String>> {
        require("sandbox_id", sandbox_id)?;
        let sandbox = self.store.get_sandbox(sandbox_id).await?;
        if !sandbox.state.can_start() {
            return Err(CoreError::InvalidState {
                sandbox_id: sandbox.id,
                state: sandbox.state.to_string(),
                operation: "start",
            });
        }
        tracing::info!(sandbox_id, vm_name = %sandbox.vm_name, wait_for_ip, "Starting sandbox");
        let ip = self.boot(&sandbox, wait_for_ip).await?;
        tracing::info!(sandbox_id, ip = ?ip, "Sandbox started");
        Ok(ip)
    }

    /// Shut a sandbox down, keeping its last known address.
    pub async fn stop_sandbox(&self, sandbox_id: &str, force: bool) -> Result<()> {
        require("sandbox_id", sandbox_id)?;
        let sandbox = self.store.get_sandbox(sandbox_id).await?;
        self.driver.stop_vm(&sandbox.vm_name, force).await?;
        self.store
            .update_sandbox_state(
                &sandbox.id,
                SandboxState::Stopped,
                sandbox.ip_address.as_deref(),
            )
            .await?;
        tracing::info!(sandbox_id, force, "Sandbox stopped");
        Ok(())
    }

    /// Tear a sandbox down and delete its record.
    ///
    /// Returns the sandbox as it was, with state `DESTROYED`.
    pub async fn destroy_sandbox(&self, sandbox_id: &str) -> Result<Sandbox> {
        require("sandbox_id", sandbox_id)?;
        let mut sandbox = self.store.get_sandbox(sandbox_id).await?;
        let start = Instant::now();
        tracing::info!(sandbox_id, vm_name = %sandbox.vm_name, "Destroying sandbox");

        if let Some(keys) = &self.keys {
            if let Err(e) = keys.cleanup_sandbox(sandbox_id).await {
                tracing::warn!(sandbox_id, error = %e, "Failed to clean up SSH keys");
            }
        }

        if let Err(e) = self.driver.destroy_vm(&sandbox.vm_name).await {
            tracing::error!(sandbox_id, vm_name = %sandbox.vm_name, error = %e, "Failed to destroy VM");
            return Err(e.into());
        }
        self.store.delete_sandbox(sandbox_id).await?;

        sandbox.state = SandboxState::Destroyed;
        sandbox.updated_at = self.clock.now();
        tracing::info!(
            sandbox_id,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Sandbox destroyed"
        );
        Ok(sandbox)
    }

    /// Snapshot a sandbox and record it.
    pub async fn create_snapshot(
        &self,
        sandbox_id: &str,
        name: &str,
        external: bool,
    ) -> Result<Snapshot> {
        require("sandbox_id", sandbox_id)?;
        require("name", name)?;
        let sandbox = self.store.get_sandbox(sandbox_id).await?;
        let kind = if external {
            SnapshotKind::External
        } else {
            SnapshotKind::Internal
        };
        let created = self
            .driver
            .create_snapshot(&sandbox.vm_name, name, kind)
            .await?;
        let snapshot = Snapshot {
            id: new_id("SNP"),
            sandbox_id: sandbox.id,
            name: created.name,
            kind: created.kind.into(),
            reference: created.reference,
            created_at: self.clock.now(),
        };
        self.store.create_snapshot(&snapshot).await?;
        tracing::info!(sandbox_id, snapshot = %snapshot.name, kind = ?snapshot.kind, "Snapshot created");
        Ok(snapshot)
    }

    /// Record a change summary between two snapshots.
    ///
    /// File, package and service changes are left empty; `commands_run` is
    /// rebuilt from the command history, oldest first.
    pub async fn diff_snapshots(&self, sandbox_id: &str, from: &str, to: &str) -> Result<Diff> {
        require("sandbox_id", sandbox_id)?;
        require("from", from)?;
        require("to", to)?;
        let sandbox = self.store.get_sandbox(sandbox_id).await?;

        match self.driver.diff_snapshot(&sandbox.vm_name, from, to).await {
            Ok(plan) => tracing::debug!(sandbox_id, notes = ?plan.notes, "Snapshot diff plan"),
            Err(e) => tracing::warn!(sandbox_id, error = %e, "Snapshot diff plan unavailable"),
        }

        let commands = match self
            .store
            .list_commands(sandbox_id, &ListOptions::ascending(OrderBy::StartedAt))
            .await
        {
            Ok(commands) => commands,
            Err(StoreError::NotFound(_)) => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        let diff = Diff {
            id: new_id("DIF"),
            sandbox_id: sandbox_id.to_string(),
            from_snapshot: from.to_string(),
            to_snapshot: to.to_string(),
            diff: ChangeDiff {
                commands_run: commands
                    .into_iter()
                    .map(|c| CommandSummary {
                        cmd: c.command,
                        exit_code: c.exit_code,
                        at: c.ended_at,
                    })
                    .collect(),
                ..Default::default()
            },
            created_at: self.clock.now(),
        };
        self.store.save_diff(&diff).await?;
        Ok(diff)
    }

    /// Run a command in a sandbox over SSH and record it.
    ///
    /// The address is rediscovered on every call. A non-zero remote exit is
    /// a normal result; an SSH transport failure returns
    /// [`CoreError::Execution`] carrying the saved record.
    pub async fn run_command(&self, request: RunCommandRequest) -> Result<Command> {
        require("sandbox_id", &request.sandbox_id)?;
        require("command", &request.command)?;
        let timeout = request.timeout.unwrap_or(self.config.command_timeout);

        let caller_key = request
            .private_key_path
            .filter(|p| !p.as_os_str().is_empty());
        let managed = match (&caller_key, &self.keys) {
            (Some(_), _) => {
                require("username", &request.username)?;
                None
            }
            (None, Some(keys)) => Some(keys.clone()),
            (None, None) => {
                return Err(CoreError::Validation(
                    "private_key_path is required (no key manager configured)".into(),
                ));
            }
        };

        let sandbox_id = request.sandbox_id.as_str();
        let sandbox = self.store.get_sandbox(sandbox_id).await?;

        let lease = self
            .driver
            .get_ip_address(&sandbox.vm_name, self.config.ip_discovery_timeout)
            .await
            .map_err(|source| CoreError::IpDiscovery {
                sandbox_id: sandbox.id.clone(),
                source,
            })?;
        if let Err(e) = self.validate_ip_uniqueness(&sandbox.id, &lease.ip).await {
            tracing::warn!(sandbox_id, ip = %lease.ip, mac = %lease.mac, error = %e, "IP conflict detected");
            return Err(e);
        }
        if sandbox.ip_address.as_deref() != Some(lease.ip.as_str()) {
            self.store
                .update_sandbox_ip(&sandbox.id, &lease.ip)
                .await?;
        }

        let (user, private_key_path, certificate_path) = match managed {
            Some(keys) => {
                let username = if request.username.trim().is_empty() {
                    self.config.managed_username.as_str()
                } else {
                    request.username.as_str()
                };
                let creds = keys.get_credentials(sandbox_id, username).await?;
                (
                    creds.username,
                    creds.private_key_path,
                    Some(creds.certificate_path),
                )
            }
            None => (
                request.username.clone(),
                caller_key.unwrap_or_default(),
                None,
            ),
        };
        let target = SshTarget {
            addr: lease.ip.clone(),
            user,
            private_key_path,
            certificate_path,
            proxy_jump: self.config.ssh_proxy_jump.clone(),
            connect_timeout: self.config.ssh_connect_timeout,
        };

        let env_json = encode_env(&request.env)?;
        let wrapped = command_with_env(&request.command, &request.env);
        let started_at = self.clock.now();
        let result = self.ssh.run(&target, &wrapped, timeout).await;
        let ended_at = self.clock.now();

        let (output, failure) = match result {
            Ok(output) => (output, None),
            Err(failure) => (failure.output, Some(failure.error)),
        };
        let record = Command {
            id: new_id("CMD"),
            sandbox_id: sandbox.id.clone(),
            command: request.command,
            env_json,
            stdout: output.stdout,
            stderr: output.stderr,
            exit_code: output.exit_code,
            started_at,
            ended_at,
        };
        self.store.save_command(&record).await?;

        match failure {
            Some(source) => {
                tracing::error!(sandbox_id, command_id = %record.id, error = %source, "SSH execution failed");
                Err(CoreError::Execution {
                    record: Box::new(record),
                    source,
                })
            }
            None => {
                tracing::info!(
                    sandbox_id,
                    command_id = %record.id,
                    exit_code = record.exit_code,
                    "Command finished"
                );
                Ok(record)
            }
        }
    }

    /// Fail if another `RUNNING` sandbox holds `ip`.
    pub async fn validate_ip_uniqueness(&self, sandbox_id: &str, ip: &str) -> Result<()> {
        let running = self
            .store
            .list_sandboxes(
                &SandboxFilter::state(SandboxState::Running),
                &ListOptions::default(),
            )
            .await?;
        match running
            .iter()
            .find(|sb| sb.id != sandbox_id && sb.ip_address.as_deref() == Some(ip))
        {
            Some(holder) => Err(CoreError::IpConflict {
                ip: ip.to_string(),
                sandbox_id: sandbox_id.to_string(),
                holder: holder.id.clone(),
            }),
            None => Ok(()),
        }
    }

    /// Start the domain and walk the sandbox through `STARTING` to `RUNNING`.
    async fn boot(&self, sandbox: &Sandbox, wait_for_ip: bool) -> Result<Option<String>> {
        let id = sandbox.id.as_str();
        if let Err(source) = self.driver.start_vm(&sandbox.vm_name).await {
            tracing::error!(sandbox_id = id, vm_name = %sandbox.vm_name, error = %source, "Failed to start VM");
            if let Err(e) = self
                .store
                .update_sandbox_state(id, SandboxState::Error, None)
                .await
            {
                tracing::warn!(sandbox_id = id, error = %e, "Failed to record ERROR state");
            }
            return Err(CoreError::StartFailed {
                sandbox_id: id.to_string(),
                source,
            });
        }
        self.store
            .update_sandbox_state(id, SandboxState::Starting, None)
            .await?;

        if !wait_for_ip {
            self.store
                .update_sandbox_state(id, SandboxState::Running, None)
                .await?;
            return Ok(None);
        }

        tracing::info!(
            sandbox_id = id,
            timeout_secs = self.config.ip_discovery_timeout.as_secs(),
            "Waiting for IP address"
        );
        let lease = match self
            .driver
            .get_ip_address(&sandbox.vm_name, self.config.ip_discovery_timeout)
            .await
        {
            Ok(lease) => lease,
            Err(source) => {
                tracing::warn!(sandbox_id = id, vm_name = %sandbox.vm_name, error = %source, "IP discovery failed");
                self.store
                    .update_sandbox_state(id, SandboxState::Running, None)
                    .await?;
                return Err(CoreError::IpDiscovery {
                    sandbox_id: id.to_string(),
                    source,
                });
            }
        };

        let recorded = match self.validate_ip_uniqueness(id, &lease.ip).await {
            Ok(()) => {
                self.store
                    .update_sandbox_state(id, SandboxState::Running, Some(&lease.ip))
                    .await
                    .map_err(CoreError::from)
            }
            Err(e) => Err(e),
        };
        match recorded {
            Ok(()) => Ok(Some(lease.ip)),
            Err(e) => {
                tracing::error!(
                    sandbox_id = id,
                    ip = %lease.ip,
                    mac = %lease.mac,
                    error = %e,
                    "IP conflict during boot"
                );
                self.store
                    .update_sandbox_state(id, SandboxState::Running, None)
                    .await?;
                Err(e)
            }
        }
    }
}
