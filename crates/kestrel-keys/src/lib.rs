//! # kestrel-keys
//!
//! Short-lived SSH certificates for Kestrel sandboxes.
//!
//! Each `(sandbox, user)` pair gets an ed25519 keypair under
//! `<key_dir>/<sandbox_id>/<user>/` and a certificate signed by the host CA.
//! Certificates are cached and reissued shortly before they expire.
//!
//! ```no_run
//! use kestrel_keys::{KeyConfig, KeyManager, KeyProvider, SshKeygenAuthority};
//! use std::sync::Arc;
//!
//! # async fn example() -> kestrel_keys::Result<()> {
//! let config = KeyConfig::default();
//! let ca = SshKeygenAuthority::new(&config.ca_key_path, config.max_ttl, config.command_timeout);
//! let keys = KeyManager::new(Arc::new(ca), config).await?;
//!
//! let creds = keys.get_credentials("SBX-1a2b3c4d", "sandbox").await?;
//! println!("ssh -i {} -o CertificateFile={}", creds.private_key_path.display(), creds.certificate_path.display());
//!
//! keys.cleanup_sandbox("SBX-1a2b3c4d").await?;
//! # Ok(())
//! # }
//! ```

mod ca;
mod clock;
mod config;
mod error;
mod manager;

pub use ca::{CertificateAuthority, CertificateRequest, IssuedCertificate, SshKeygenAuthority};
pub use clock::{Clock, SystemClock};
pub use config::KeyConfig;
pub use error::{KeyError, Result};
pub use manager::{Credentials, KeyManager, KeyProvider};
