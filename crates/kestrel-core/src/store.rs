//! Persistence seam and the in-memory store.

use crate::sandbox::{Command, Diff, Sandbox, SandboxState, Snapshot};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;

/// Errors reported by a [`SandboxStore`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// No entity matched
    #[error("store: not found: {0}")]
    NotFound(String),

    /// An entity with the same key exists
    #[error("store: already exists: {0}")]
    AlreadyExists(String),

    /// The write would break a uniqueness constraint
    #[error("store: conflict: {0}")]
    Conflict(String),

    /// The entity is missing required fields
    #[error("store: invalid data: {0}")]
    Invalid(String),

    /// Backend failure
    #[error("store: {0}")]
    Backend(String),
}

/// Sandbox list filter. `None` fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SandboxFilter {
    pub state: Option<SandboxState>,
    pub agent_id: Option<String>,
    pub job_id: Option<String>,
    pub vm_name: Option<String>,
    pub source_vm: Option<String>,
}

impl SandboxFilter {
    /// Filter on state only.
    pub fn state(state: SandboxState) -> Self {
        Self {
            state: Some(state),
            ..Default::default()
        }
    }

    fn matches(&self, sb: &Sandbox) -> bool {
        self.state.map_or(true, |s| sb.state == s)
            && self.agent_id.as_ref().map_or(true, |a| &sb.agent_id == a)
            && self.job_id.as_ref().map_or(true, |j| &sb.job_id == j)
            && self.vm_name.as_ref().map_or(true, |v| &sb.vm_name == v)
            && self.source_vm.as_ref().map_or(true, |s| &sb.source_vm == s)
    }
}

/// Sort column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderBy {
    CreatedAt,
    UpdatedAt,
    VmName,
    StartedAt,
    EndedAt,
}

/// Ordering and pagination.
///
/// Columns that do not apply to the listed entity fall back to its default
/// order: `created_at` descending, or `started_at` descending for commands.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListOptions {
    /// Maximum number of records. `None` returns everything.
    pub limit: Option<usize>,
    /// Records to skip.
    pub offset: usize,
    /// Sort column.
    pub order_by: Option<OrderBy>,
    /// Ascending instead of descending.
    pub ascending: bool,
}

impl ListOptions {
    /// Order by `column`, ascending.
    pub fn ascending(column: OrderBy) -> Self {
        Self {
            order_by: Some(column),
            ascending: true,
            ..Default::default()
        }
    }

    /// Return at most `limit` records.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn page<T>(&self, items: Vec<T>) -> Vec<T> {
        let iter = items.into_iter().skip(self.offset);
        match self.limit {
            Some(limit) => iter.take(limit).collect(),
            None => iter.collect(),
        }
    }
}

/// Persistence for sandboxes, snapshots, commands and diffs.
///
/// Reads after a successful write observe that write.
#[async_trait]
pub trait SandboxStore: Send + Sync {
    async fn create_sandbox(&self, sandbox: &Sandbox) -> Result<(), StoreError>;
    async fn get_sandbox(&self, id: &str) -> Result<Sandbox, StoreError>;
    async fn get_sandbox_by_vm_name(&self, vm_name: &str) -> Result<Sandbox, StoreError>;
    async fn list_sandboxes(
        &self,
        filter: &SandboxFilter,
        options: &ListOptions,
    ) -> Result<Vec<Sandbox>, StoreError>;

    /// Replace every mutable field of an existing sandbox.
    async fn update_sandbox(&self, sandbox: &Sandbox) -> Result<(), StoreError>;

    /// Set state and address together. `None` clears the address.
    ///
    /// Fails with [`StoreError::Conflict`] when the sandbox would become
    /// `RUNNING` with an address another `RUNNING` sandbox holds.
    async fn update_sandbox_state(
        &self,
        id: &str,
        state: SandboxState,
        ip_address: Option<&str>,
    ) -> Result<(), StoreError>;

    /// Set only the address, leaving the state as currently stored.
    ///
    /// Fails with [`StoreError::Conflict`] when the sandbox is `RUNNING` and
    /// another `RUNNING` sandbox holds `ip_address`.
    async fn update_sandbox_ip(&self, id: &str, ip_address: &str) -> Result<(), StoreError>;

    /// Remove the sandbox. Later reads return [`StoreError::NotFound`].
    async fn delete_sandbox(&self, id: &str) -> Result<(), StoreError>;

    async fn create_snapshot(&self, snapshot: &Snapshot) -> Result<(), StoreError>;
    async fn get_snapshot(&self, id: &str) -> Result<Snapshot, StoreError>;
    async fn get_snapshot_by_name(
        &self,
        sandbox_id: &str,
        name: &str,
    ) -> Result<Snapshot, StoreError>;
    async fn list_snapshots(
        &self,
        sandbox_id: &str,
        options: &ListOptions,
    ) -> Result<Vec<Snapshot>, StoreError>;

    async fn save_command(&self, command: &Command) -> Result<(), StoreError>;
    async fn get_command(&self, id: &str) -> Result<Command, StoreError>;
    async fn list_commands(
        &self,
        sandbox_id: &str,
        options: &ListOptions,
    ) -> Result<Vec<Command>, StoreError>;

    async fn save_diff(&self, diff: &Diff) -> Result<(), StoreError>;
    async fn get_diff(&self, id: &str) -> Result<Diff, StoreError>;
}

#[derive(Default)]
struct Tables {
    sandboxes: HashMap<String, Sandbox>,
    snapshots: Vec<Snapshot>,
    commands: Vec<Command>,
    diffs: HashMap<String, Diff>,
}

impl Tables {
    fn ip_holder(&self, exclude_id: &str, ip: &str) -> Option<&Sandbox> {
        self.sandboxes.values().find(|sb| {
            sb.id != exclude_id
                && sb.state == SandboxState::Running
                && sb.ip_address.as_deref() == Some(ip)
        })
    }
}

/// [`SandboxStore`] held in process memory.
///
/// All tables sit behind one lock, so the address uniqueness check and the
/// state write it guards happen atomically.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

fn require(field: &str, value: &str) -> Result<(), StoreError> {
    if value.trim().is_empty() {
        return Err(StoreError::Invalid(format!("{field} is required")));
    }
    Ok(())
}

fn sort_by<T, K: Ord>(items: &mut [T], ascending: bool, key: impl Fn(&T) -> K) {
    items.sort_by(|a, b| key(a).cmp(&key(b)));
    if !ascending {
        items.reverse();
    }
}

#[async_trait]
impl SandboxStore for MemoryStore {
    async fn create_sandbox(&self, sandbox: &Sandbox) -> Result<(), StoreError> {
        require("id", &sandbox.id)?;
        require("agent_id", &sandbox.agent_id)?;
        require("vm_name", &sandbox.vm_name)?;
        require("network", &sandbox.network)?;

        let mut tables = self.tables.write().await;
        if tables.sandboxes.contains_key(&sandbox.id) {
            return Err(StoreError::AlreadyExists(format!("sandbox {}", sandbox.id)));
        }
        if tables
            .sandboxes
            .values()
            .any(|sb| sb.vm_name == sandbox.vm_name)
        {
            return Err(StoreError::AlreadyExists(format!(
                "vm name {}",
                sandbox.vm_name
            )));
        }
        tables
            .sandboxes
            .insert(sandbox.id.clone(), sandbox.clone());
        Ok(())
    }

    async fn get_sandbox(&self, id: &str) -> Result<Sandbox, StoreError> {
        self.tables
            .read()
            .await
            .sandboxes
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("sandbox {id}")))
    }

    async fn get_sandbox_by_vm_name(&self, vm_name: &str) -> Result<Sandbox, StoreError> {
        self.tables
            .read()
            .await
            .sandboxes
            .values()
            .find(|sb| sb.vm_name == vm_name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("vm {vm_name}")))
    }

    async fn list_sandboxes(
        &self,
        filter: &SandboxFilter,
        options: &ListOptions,
    ) -> Result<Vec<Sandbox>, StoreError> {
        let mut out: Vec<Sandbox> = self
            .tables
            .read()
            .await
            .sandboxes
            .values()
            .filter(|sb| filter.matches(sb))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        match options.order_by {
            Some(OrderBy::UpdatedAt) => sort_by(&mut out, options.ascending, |sb| sb.updated_at),
            Some(OrderBy::VmName) => {
                sort_by(&mut out, options.ascending, |sb| sb.vm_name.clone())
            }
            Some(OrderBy::CreatedAt) => sort_by(&mut out, options.ascending, |sb| sb.created_at),
            _ => sort_by(&mut out, false, |sb| sb.created_at),
        }
        Ok(options.page(out))
    }

    async fn update_sandbox(&self, sandbox: &Sandbox) -> Result<(), StoreError> {
        require("id", &sandbox.id)?;
        let mut tables = self.tables.write().await;
        if sandbox.state == SandboxState::Running {
            if let Some(ip) = sandbox.ip_address.as_deref() {
                if let Some(holder) = tables.ip_holder(&sandbox.id, ip) {
                    return Err(StoreError::Conflict(format!(
                        "ip {ip} held by sandbox {}",
                        holder.id
                    )));
                }
            }
        }
        let existing = tables
            .sandboxes
            .get_mut(&sandbox.id)
            .ok_or_else(|| StoreError::NotFound(format!("sandbox {}", sandbox.id)))?;
        *existing = Sandbox {
            created_at: existing.created_at,
            updated_at: Utc::now(),
            ..sandbox.clone()
        };
        Ok(())
    }

    async fn update_sandbox_state(
        &self,
        id: &str,
        state: SandboxState,
        ip_address: Option<&str>,
    ) -> Result<(), StoreError> {
        require("id", id)?;
        let mut tables = self.tables.write().await;
        if state == SandboxState::Running {
            if let Some(ip) = ip_address {
                if let Some(holder) = tables.ip_holder(id, ip) {
                    return Err(StoreError::Conflict(format!(
                        "ip {ip} held by sandbox {}",
                        holder.id
                    )));
                }
            }
        }
        let sandbox = tables
            .sandboxes
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("sandbox {id}")))?;
        sandbox.state = state;
        sandbox.ip_address = ip_address.map(str::to_string);
        sandbox.updated_at = Utc::now();
        Ok(())
    }

    async fn update_sandbox_ip(&self, id: &str, ip_address: &str) -> Result<(), StoreError> {
        require("id", id)?;
        require("ip_address", ip_address)?;
        let mut tables = self.tables.write().await;
        let state = tables
            .sandboxes
            .get(id)
            .map(|sb| sb.state)
            .ok_or_else(|| StoreError::NotFound(format!("sandbox {id}")))?;
        if state == SandboxState::Running {
            if let Some(holder) = tables.ip_holder(id, ip_address) {
                return Err(StoreError::Conflict(format!(
                    "ip {ip_address} held by sandbox {}",
                    holder.id
                )));
            }
        }
        if let Some(sandbox) = tables.sandboxes.get_mut(id) {
            sandbox.ip_address = Some(ip_address.to_string());
            sandbox.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn delete_sandbox(&self, id: &str) -> Result<(), StoreError> {
        require("id", id)?;
        self.tables
            .write()
            .await
            .sandboxes
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(format!("sandbox {id}")))
    }

    async fn create_snapshot(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        require("id", &snapshot.id)?;
        require("sandbox_id", &snapshot.sandbox_id)?;
        require("name", &snapshot.name)?;
        require("reference", &snapshot.reference)?;

        let mut tables = self.tables.write().await;
        let taken = tables.snapshots.iter().any(|s| {
            s.id == snapshot.id || (s.sandbox_id == snapshot.sandbox_id && s.name == snapshot.name)
        });
        if taken {
            return Err(StoreError::AlreadyExists(format!(
                "snapshot {} of {}",
                snapshot.name, snapshot.sandbox_id
            )));
        }
        tables.snapshots.push(snapshot.clone());
        Ok(())
    }

    async fn get_snapshot(&self, id: &str) -> Result<Snapshot, StoreError> {
        self.tables
            .read()
            .await
            .snapshots
            .iter()
            .find(|s| s.id == id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("snapshot {id}")))
    }

    async fn get_snapshot_by_name(
        &self,
        sandbox_id: &str,
        name: &str,
    ) -> Result<Snapshot, StoreError> {
        self.tables
            .read()
            .await
            .snapshots
            .iter()
            .find(|s| s.sandbox_id == sandbox_id && s.name == name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("snapshot {name} of {sandbox_id}")))
    }

    async fn list_snapshots(
        &self,
        sandbox_id: &str,
        options: &ListOptions,
    ) -> Result<Vec<Snapshot>, StoreError> {
        let mut out: Vec<Snapshot> = self
            .tables
            .read()
            .await
            .snapshots
            .iter()
            .filter(|s| s.sandbox_id == sandbox_id)
            .cloned()
            .collect();
        let ascending = options.order_by == Some(OrderBy::CreatedAt) && options.ascending;
        sort_by(&mut out, ascending, |s| s.created_at);
        Ok(options.page(out))
    }

    async fn save_command(&self, command: &Command) -> Result<(), StoreError> {
        require("id", &command.id)?;
        require("sandbox_id", &command.sandbox_id)?;
        let mut tables = self.tables.write().await;
        if tables.commands.iter().any(|c| c.id == command.id) {
            return Err(StoreError::AlreadyExists(format!("command {}", command.id)));
        }
        tables.commands.push(command.clone());
        Ok(())
    }

    async fn get_command(&self, id: &str) -> Result<Command, StoreError> {
        self.tables
            .read()
            .await
            .commands
            .iter()
            .find(|c| c.id == id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("command {id}")))
    }

    async fn list_commands(
        &self,
        sandbox_id: &str,
        options: &ListOptions,
    ) -> Result<Vec<Command>, StoreError> {
        let mut out: Vec<Command> = self
            .tables
            .read()
            .await
            .commands
            .iter()
            .filter(|c| c.sandbox_id == sandbox_id)
            .cloned()
            .collect();
        match options.order_by {
            Some(OrderBy::EndedAt) => sort_by(&mut out, options.ascending, |c| c.ended_at),
            Some(OrderBy::StartedAt) => sort_by(&mut out, options.ascending, |c| c.started_at),
            _ => sort_by(&mut out, false, |c| c.started_at),
        }
        Ok(options.page(out))
    }

    async fn save_diff(&self, diff: &Diff) -> Result<(), StoreError> {
        require("id", &diff.id)?;
        require("sandbox_id", &diff.sandbox_id)?;
        let mut tables = self.tables.write().await;
        if tables.diffs.contains_key(&diff.id) {
            return Err(StoreError::AlreadyExists(format!("diff {}", diff.id)));
        }
        tables.diffs.insert(diff.id.clone(), diff.clone());
        Ok(())
    }

    async fn get_diff(&self, id: &str) -> Result<Diff, StoreError> {
        self.tables
            .read()
            .await
            .diffs
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("diff {id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration};

    fn sandbox(id: &str, vm: &str, created_at: DateTime<Utc>) -> Sandbox {
        Sandbox {
            id: id.into(),
            job_id: "JOB-1".into(),
            agent_id: "agent-1".into(),
            vm_name: vm.into(),
            source_vm: "golden-ubuntu".into(),
            network: "default".into(),
            ip_address: None,
            state: SandboxState::Created,
            ttl_seconds: None,
            created_at,
            updated_at: created_at,
        }
    }

    fn command(id: &str, sandbox_id: &str, started_at: DateTime<Utc>) -> Command {
        Command {
            id: id.into(),
            sandbox_id: sandbox_id.into(),
            command: format!("echo {id}"),
            env_json: None,
            stdout: String::new(),
            stderr: String::new(),
            exit_code: 0,
            started_at,
            ended_at: started_at,
        }
    }

    #[tokio::test]
    async fn test_sandbox_crud() {
        let store = MemoryStore::new();
        let sb = sandbox("SBX-1", "sbx-1", Utc::now());
        store.create_sandbox(&sb).await.unwrap();

        assert_eq!(store.get_sandbox("SBX-1").await.unwrap(), sb);
        assert_eq!(store.get_sandbox_by_vm_name("sbx-1").await.unwrap().id, "SBX-1");
        assert!(matches!(
            store.create_sandbox(&sb).await,
            Err(StoreError::AlreadyExists(_))
        ));

        store.delete_sandbox("SBX-1").await.unwrap();
        assert!(matches!(
            store.get_sandbox("SBX-1").await,
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            store.delete_sandbox("SBX-1").await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_rejects_incomplete_sandbox() {
        let store = MemoryStore::new();
        let sb = sandbox("", "sbx-1", Utc::now());
        assert!(matches!(
            store.create_sandbox(&sb).await,
            Err(StoreError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn test_update_state_unknown_sandbox() {
        let store = MemoryStore::new();
        assert!(matches!(
            store
                .update_sandbox_state("SBX-x", SandboxState::Running, None)
                .await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_running_ip_is_unique() {
        let store = MemoryStore::new();
        store
            .create_sandbox(&sandbox("SBX-1", "sbx-1", Utc::now()))
            .await
            .unwrap();
        store
            .create_sandbox(&sandbox("SBX-2", "sbx-2", Utc::now()))
            .await
            .unwrap();

        store
            .update_sandbox_state("SBX-1", SandboxState::Running, Some("10.0.0.5"))
            .await
            .unwrap();
        let err = store
            .update_sandbox_state("SBX-2", SandboxState::Running, Some("10.0.0.5"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        // A stopped sandbox keeps its address without blocking others.
        store
            .update_sandbox_state("SBX-1", SandboxState::Stopped, Some("10.0.0.5"))
            .await
            .unwrap();
        store
            .update_sandbox_state("SBX-2", SandboxState::Running, Some("10.0.0.5"))
            .await
            .unwrap();
        // Re-asserting your own address is fine.
        store
            .update_sandbox_state("SBX-2", SandboxState::Running, Some("10.0.0.5"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_update_ip_keeps_current_state() {
        let store = MemoryStore::new();
        store
            .create_sandbox(&sandbox("SBX-1", "sbx-1", Utc::now()))
            .await
            .unwrap();
        store
            .update_sandbox_state("SBX-1", SandboxState::Running, Some("10.0.0.5"))
            .await
            .unwrap();
        let before = store.get_sandbox("SBX-1").await.unwrap();

        // A stop lands between the read above and the address write.
        store
            .update_sandbox_state("SBX-1", SandboxState::Stopped, None)
            .await
            .unwrap();
        store.update_sandbox_ip(&before.id, "10.0.0.9").await.unwrap();

        let after = store.get_sandbox("SBX-1").await.unwrap();
        assert_eq!(after.state, SandboxState::Stopped);
        assert_eq!(after.ip_address.as_deref(), Some("10.0.0.9"));

        store.delete_sandbox("SBX-1").await.unwrap();
        assert!(matches!(
            store.update_sandbox_ip("SBX-1", "10.0.0.9").await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_update_ip_rejects_running_conflict() {
        let store = MemoryStore::new();
        for (id, vm) in [("SBX-1", "sbx-1"), ("SBX-2", "sbx-2")] {
            store
                .create_sandbox(&sandbox(id, vm, Utc::now()))
                .await
                .unwrap();
        }
        store
            .update_sandbox_state("SBX-1", SandboxState::Running, Some("10.0.0.5"))
            .await
            .unwrap();
        store
            .update_sandbox_state("SBX-2", SandboxState::Running, Some("10.0.0.6"))
            .await
            .unwrap();
        assert!(matches!(
            store.update_sandbox_ip("SBX-2", "10.0.0.5").await,
            Err(StoreError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_list_filter_and_order() {
        let store = MemoryStore::new();
        let t0 = Utc::now();
        for (i, vm) in ["sbx-a", "sbx-b", "sbx-c"].iter().enumerate() {
            let mut sb = sandbox(&format!("SBX-{i}"), vm, t0 + Duration::seconds(i as i64));
            if i == 1 {
                sb.agent_id = "agent-2".into();
            }
            store.create_sandbox(&sb).await.unwrap();
        }
        store
            .update_sandbox_state("SBX-2", SandboxState::Running, None)
            .await
            .unwrap();

        let all = store
            .list_sandboxes(&SandboxFilter::default(), &ListOptions::default())
            .await
            .unwrap();
        let ids: Vec<_> = all.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, ["SBX-2", "SBX-1", "SBX-0"]);

        let running = store
            .list_sandboxes(
                &SandboxFilter::state(SandboxState::Running),
                &ListOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].id, "SBX-2");

        let filter = SandboxFilter {
            agent_id: Some("agent-2".into()),
            ..Default::default()
        };
        let mine = store
            .list_sandboxes(&filter, &ListOptions::default())
            .await
            .unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].vm_name, "sbx-b");

        let page = store
            .list_sandboxes(
                &SandboxFilter::default(),
                &ListOptions {
                    offset: 1,
                    ..ListOptions::ascending(OrderBy::VmName).limit(1)
                },
            )
            .await
            .unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].vm_name, "sbx-b");
    }

    #[tokio::test]
    async fn test_command_order() {
        let store = MemoryStore::new();
        let t0 = Utc::now();
        for i in 0..3 {
            store
                .save_command(&command(&format!("CMD-{i}"), "SBX-1", t0 + Duration::seconds(i)))
                .await
                .unwrap();
        }
        store
            .save_command(&command("CMD-other", "SBX-2", t0))
            .await
            .unwrap();

        let newest_first = store
            .list_commands("SBX-1", &ListOptions::default())
            .await
            .unwrap();
        let ids: Vec<_> = newest_first.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, ["CMD-2", "CMD-1", "CMD-0"]);

        let oldest_first = store
            .list_commands("SBX-1", &ListOptions::ascending(OrderBy::StartedAt).limit(2))
            .await
            .unwrap();
        let ids: Vec<_> = oldest_first.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, ["CMD-0", "CMD-1"]);

        assert_eq!(store.get_command("CMD-1").await.unwrap().command, "echo CMD-1");
    }

    #[tokio::test]
    async fn test_snapshot_names_unique_per_sandbox() {
        let store = MemoryStore::new();
        let snap = Snapshot {
            id: "SNP-1".into(),
            sandbox_id: "SBX-1".into(),
            name: "base".into(),
            kind: crate::sandbox::SnapshotKind::Internal,
            reference: "base".into(),
            created_at: Utc::now(),
        };
        store.create_snapshot(&snap).await.unwrap();
        let dup = Snapshot {
            id: "SNP-2".into(),
            ..snap.clone()
        };
        assert!(matches!(
            store.create_snapshot(&dup).await,
            Err(StoreError::AlreadyExists(_))
        ));
        assert_eq!(
            store.get_snapshot_by_name("SBX-1", "base").await.unwrap(),
            snap
        );
        assert_eq!(
            store
                .list_snapshots("SBX-1", &ListOptions::default())
                .await
                .unwrap()
                .len(),
            1
        );
    }
}
