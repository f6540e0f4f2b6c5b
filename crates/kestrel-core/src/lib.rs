//! # kestrel-core
//!
//! Sandbox orchestration for Kestrel.
//!
//! ## Architecture
//!
//! ```text
//!                         SandboxService
//!   create / start / stop / destroy / snapshot / diff / run / watch
//!        │               │               │               │
//!        ▼               ▼               ▼               ▼
//!   Hypervisor     SandboxStore      SshRunner      KeyProvider
//!   (kestrel-vm)   (MemoryStore)     (ssh client)   (kestrel-keys)
//! ```
//!
//! [`SandboxService::watch`] streams command activity by polling the
//! store, and [`Janitor`] destroys sandboxes whose TTL has elapsed.
//!
//! ## Quick Start
//!
//! ```no_run
//! use kestrel_core::{
//!     CreateSandboxRequest, MemoryStore, RunCommandRequest, SandboxService, ServiceConfig,
//! };
//! use kestrel_vm::{DriverConfig, VirshDriver};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let driver = Arc::new(VirshDriver::new(DriverConfig::default())?);
//! let service = SandboxService::new(driver, Arc::new(MemoryStore::new()), ServiceConfig::default())?;
//!
//! let sandbox = service
//!     .create_sandbox(CreateSandboxRequest::new("golden-ubuntu", "agent-1").start(true))
//!     .await?;
//!
//! let mut request = RunCommandRequest::new(&sandbox.id, "uname -a");
//! request.username = "ubuntu".into();
//! request.private_key_path = Some("/home/agent/.ssh/id_ed25519".into());
//! let record = service.run_command(request).await?;
//! println!("exit {}: {}", record.exit_code, record.stdout);
//!
//! service.destroy_sandbox(&sandbox.id).await?;
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod janitor;
mod sandbox;
mod service;
mod ssh;
mod store;
mod stream;

#[cfg(test)]
mod test_support;

pub use config::ServiceConfig;
pub use error::{CoreError, Result, SshError};
pub use janitor::Janitor;
pub use sandbox::{
    encode_env, new_id, short_id, ChangeDiff, Command, CommandSummary, Diff, PackageInfo, Sandbox,
    SandboxState, ServiceChange, Snapshot, SnapshotKind,
};
pub use service::{CreateSandboxRequest, RunCommandRequest, SandboxService};
pub use ssh::{
    check_key_file, command_with_env, shell_quote, truncate_output, SshFailure, SshOutput,
    SshRunner, SshTarget, SystemSshRunner, MAX_OUTPUT_BYTES,
};
pub use store::{ListOptions, MemoryStore, OrderBy, SandboxFilter, SandboxStore, StoreError};
pub use stream::{EventType, StreamEvent, HISTORY_LIMIT};
