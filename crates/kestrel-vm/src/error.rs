//! Error types for kestrel-vm.

use crate::driver::VmState;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for kestrel-vm operations.
pub type Result<T> = std::result::Result<T, VmError>;

/// Errors that can occur during hypervisor operations.
#[derive(Debug, Error)]
pub enum VmError {
    /// A required argument was empty or malformed
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// A host tool exited unsuccessfully
    #[error("{program} {args} failed: {message}")]
    Command {
        /// Program that was run
        program: String,
        /// Space-joined arguments
        args: String,
        /// Exit status and captured stderr
        message: String,
    },

    /// A host tool is not installed
    #[error("{0} not found on host")]
    ToolMissing(String),

    /// A host tool did not finish in time and was killed
    #[error("{program} timed out after {timeout:?}")]
    CommandTimeout {
        /// Program that was run
        program: String,
        /// Timeout that elapsed
        timeout: Duration,
    },

    /// The descriptor could not be parsed or serialized
    #[error("descriptor error: {0}")]
    Descriptor(String),

    /// A required element is missing from the descriptor
    #[error("descriptor element not found: {0}")]
    ElementNotFound(String),

    /// The source VM has no file-backed primary disk
    #[error("could not find disk path for source VM {0}")]
    NoPrimaryDisk(String),

    /// The sandbox overlay disk does not exist
    #[error("overlay not found: {}", .0.display())]
    OverlayMissing(PathBuf),

    /// Reinitialization media could not be built
    #[error("seed media error: {0}")]
    Seed(String),

    /// No address was found before the deadline
    #[error("IP address for {vm_name} not found within {timeout:?} (VM state: {state})")]
    IpNotFound {
        /// Domain that was polled
        vm_name: String,
        /// Discovery timeout
        timeout: Duration,
        /// Last observed domain state
        state: VmState,
    },

    /// The workspace directory could not be removed
    #[error("failed to remove workspace {}: {source}", path.display())]
    WorkspaceCleanup {
        /// Workspace path
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
