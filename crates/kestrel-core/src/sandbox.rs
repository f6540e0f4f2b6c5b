//! Persisted entities: sandboxes, snapshots, commands and diffs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// First group of a random v4 UUID, e.g. `1a2b3c4d`.
pub fn short_id() -> String {
    let id = Uuid::new_v4().to_string();
    match id.split_once('-') {
        Some((head, _)) => head.to_string(),
        None => id,
    }
}

/// Generate a prefixed identifier such as `SBX-1a2b3c4d`.
pub fn new_id(prefix: &str) -> String {
    format!("{prefix}-{}", short_id())
}

/// Lifecycle state of a sandbox.
///
/// `Created -> Starting -> Running -> {Stopped, Error}`, and any state can
/// move to `Destroyed`, which is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SandboxState {
    /// Domain defined, not booted.
    Created,
    /// Boot requested.
    Starting,
    /// Domain running. The address may still be unknown.
    Running,
    /// Domain shut down.
    Stopped,
    /// Destroyed. Terminal.
    Destroyed,
    /// Boot failed.
    Error,
}

impl SandboxState {
    /// Whether no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Destroyed)
    }

    /// Whether `start` may be called from this state.
    pub fn can_start(&self) -> bool {
        matches!(self, Self::Created | Self::Stopped)
    }

    /// Canonical upper-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Starting => "STARTING",
            Self::Running => "RUNNING",
            Self::Stopped => "STOPPED",
            Self::Destroyed => "DESTROYED",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for SandboxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A leased VM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sandbox {
    /// `SBX-...` identifier.
    pub id: String,
    /// `JOB-...` identifier of the owning job.
    pub job_id: String,
    /// Owning agent.
    pub agent_id: String,
    /// Domain name, unique on the hypervisor.
    pub vm_name: String,
    /// VM or image the sandbox was cloned from.
    pub source_vm: String,
    /// libvirt network.
    pub network: String,
    /// Last discovered IPv4 address.
    pub ip_address: Option<String>,
    /// Lifecycle state.
    pub state: SandboxState,
    /// Lifetime in seconds, for the expiry janitor.
    pub ttl_seconds: Option<u64>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

/// Snapshot kind, persisted upper-case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SnapshotKind {
    /// Stored inside the disk image by the hypervisor.
    Internal,
    /// Separate overlay file in the sandbox workspace.
    External,
}

impl From<kestrel_vm::SnapshotKind> for SnapshotKind {
    fn from(kind: kestrel_vm::SnapshotKind) -> Self {
        match kind {
            kestrel_vm::SnapshotKind::Internal => Self::Internal,
            kestrel_vm::SnapshotKind::External => Self::External,
        }
    }
}

/// A point-in-time snapshot of a sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// `SNP-...` identifier.
    pub id: String,
    /// Owning sandbox.
    pub sandbox_id: String,
    /// Snapshot name, unique per sandbox.
    pub name: String,
    /// Snapshot kind.
    pub kind: SnapshotKind,
    /// Overlay path for external snapshots, the name for internal ones.
    pub reference: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// Audit record of one command execution. Never mutated after it is saved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    /// `CMD-...` identifier.
    pub id: String,
    /// Sandbox the command ran in.
    pub sandbox_id: String,
    /// Command text as submitted, before environment wrapping.
    pub command: String,
    /// Environment as a JSON object, if any was given.
    pub env_json: Option<String>,
    /// Captured stdout.
    pub stdout: String,
    /// Captured stderr.
    pub stderr: String,
    /// Remote exit code. 255 when ssh itself failed.
    pub exit_code: i32,
    /// When execution began.
    pub started_at: DateTime<Utc>,
    /// When execution finished.
    pub ended_at: DateTime<Utc>,
}

/// Serialize an environment map for [`Command::env_json`].
pub fn encode_env(env: &BTreeMap<String, String>) -> Result<Option<String>, serde_json::Error> {
    if env.is_empty() {
        return Ok(None);
    }
    serde_json::to_string(env).map(Some)
}

/// A package version change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageInfo {
    /// Package name.
    pub name: String,
    /// Version, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// A system service change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceChange {
    /// Unit name.
    pub name: String,
    /// New enablement, if it changed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    /// `started`, `stopped`, `restarted` or `reloaded`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

/// One command that contributed to a diff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSummary {
    /// Command text.
    pub cmd: String,
    /// Exit code.
    pub exit_code: i32,
    /// When it finished.
    pub at: DateTime<Utc>,
}

/// Normalized change set between two snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeDiff {
    pub files_modified: Vec<String>,
    pub files_added: Vec<String>,
    pub files_removed: Vec<String>,
    pub packages_added: Vec<PackageInfo>,
    pub packages_removed: Vec<PackageInfo>,
    pub services_changed: Vec<ServiceChange>,
    pub commands_run: Vec<CommandSummary>,
}

/// Persisted result of a snapshot comparison.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diff {
    /// `DIF-...` identifier.
    pub id: String,
    /// Sandbox the snapshots belong to.
    pub sandbox_id: String,
    /// Earlier snapshot name.
    pub from_snapshot: String,
    /// Later snapshot name.
    pub to_snapshot: String,
    /// The change set.
    pub diff: ChangeDiff,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}
