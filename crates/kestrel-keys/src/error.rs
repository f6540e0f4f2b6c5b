//! Error types for kestrel-keys.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for kestrel-keys operations.
pub type Result<T> = std::result::Result<T, KeyError>;

/// Errors that can occur while issuing credentials.
#[derive(Debug, Error)]
pub enum KeyError {
    /// A required argument was empty or malformed
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// The CA private key does not exist
    #[error("CA key not found: {}", .0.display())]
    CaKeyMissing(PathBuf),

    /// The CA private key is readable by group or others
    #[error("CA key {} has insecure permissions {mode:o}", path.display())]
    CaKeyPermissions {
        /// CA key path
        path: PathBuf,
        /// Observed permission bits
        mode: u32,
    },

    /// Keypair generation failed
    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    /// Certificate signing failed
    #[error("certificate signing failed: {0}")]
    Signing(String),

    /// The sandbox's credentials were cleaned up while this request waited
    #[error("credentials for sandbox {0} were cleaned up")]
    Retired(String),

    /// `ssh-keygen` did not finish in time
    #[error("ssh-keygen timed out after {0:?}")]
    Timeout(Duration),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
