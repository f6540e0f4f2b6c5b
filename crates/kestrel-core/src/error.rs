//! Error types for kestrel-core.

use crate::sandbox::Command;
use crate::store::StoreError;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for kestrel-core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Failure of the SSH transport, as opposed to a non-zero remote exit.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SshError {
    /// Private key or certificate file is missing
    #[error("ssh {kind} file not found: {path}")]
    FileMissing {
        /// `key` or `certificate`
        kind: &'static str,
        /// Offending path
        path: String,
    },

    /// Private key is readable by group or others
    #[error("ssh key file {path} has insecure permissions {mode:o} (should be 0600 or stricter)")]
    InsecureKey {
        /// Key path
        path: String,
        /// Observed permission bits
        mode: u32,
    },

    /// The ssh binary could not be started
    #[error("failed to spawn ssh: {0}")]
    Spawn(String),

    /// ssh itself failed (exit 255), e.g. connection refused or auth denied
    #[error("ssh transport failed: {0}")]
    Transport(String),

    /// Command did not finish in time
    #[error("ssh command timed out after {0:?}")]
    Timeout(Duration),
}

/// Errors that can occur during sandbox orchestration.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Error from kestrel-vm
    #[error("VM error: {0}")]
    Vm(#[from] kestrel_vm::VmError),

    /// Error from kestrel-keys
    #[error("credential error: {0}")]
    Keys(#[from] kestrel_keys::KeyError),

    /// Error from the persistence layer
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Missing or malformed input. Nothing was attempted.
    #[error("invalid request: {0}")]
    Validation(String),

    /// Operation not allowed in the sandbox's current state
    #[error("sandbox {sandbox_id} is {state}, cannot {operation}")]
    InvalidState {
        /// Sandbox ID
        sandbox_id: String,
        /// Current state
        state: String,
        /// Attempted operation
        operation: &'static str,
    },

    /// Another running sandbox already holds the address
    #[error("IP {ip} is already assigned to sandbox {holder} (requested by {sandbox_id})")]
    IpConflict {
        /// Contested address
        ip: String,
        /// Sandbox that discovered the address
        sandbox_id: String,
        /// Sandbox currently holding it
        holder: String,
    },

    /// The domain failed to boot. The sandbox is now in `ERROR`.
    #[error("failed to start sandbox {sandbox_id}: {source}")]
    StartFailed {
        /// Sandbox ID
        sandbox_id: String,
        /// Driver error
        #[source]
        source: kestrel_vm::VmError,
    },

    /// The VM runs but its address could not be determined
    #[error("IP discovery failed for sandbox {sandbox_id}: {source}")]
    IpDiscovery {
        /// Sandbox ID
        sandbox_id: String,
        /// Driver error, carrying the last observed VM state on timeout
        #[source]
        source: kestrel_vm::VmError,
    },

    /// The command could not be executed over SSH. The audit record was saved.
    #[error("ssh run failed for command {}: {source}", record.id)]
    Execution {
        /// Persisted record with whatever output was captured
        record: Box<Command>,
        /// Transport failure
        #[source]
        source: SshError,
    },

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// Whether the entity does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Store(StoreError::NotFound(_)))
    }

    /// Whether the request was rejected before any side effect.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::Store(StoreError::Invalid(_)) | Self::InvalidState { .. }
        )
    }

    /// Whether the request collided with existing state.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::IpConflict { .. }
                | Self::Store(StoreError::Conflict(_))
                | Self::Store(StoreError::AlreadyExists(_))
        )
    }

    /// The audit record attached to an execution failure.
    pub fn command_record(&self) -> Option<&Command> {
        match self {
            Self::Execution { record, .. } => Some(record.as_ref()),
            _ => None,
        }
    }
}
