//! Credential issuer configuration.

use crate::error::{KeyError, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for [`KeyManager`](crate::KeyManager) and the bundled CA.
#[derive(Debug, Clone)]
pub struct KeyConfig {
    /// Base directory for per-sandbox key material (default: `/tmp/sandbox-keys`).
    pub key_dir: PathBuf,
    /// Requested certificate lifetime (default: 5 minutes).
    pub cert_ttl: Duration,
    /// Upper bound the CA enforces on any lifetime (default: 10 minutes).
    pub max_ttl: Duration,
    /// How long before expiry a cached certificate is replaced (default: 30 seconds).
    pub refresh_margin: Duration,
    /// Username used when the caller passes none (default: `sandbox`).
    pub default_username: String,
    /// CA private key (default: `/etc/kestrel/ssh_ca`).
    pub ca_key_path: PathBuf,
    /// Bound on each `ssh-keygen` invocation (default: 30 seconds).
    pub command_timeout: Duration,
}

impl Default for KeyConfig {
    fn default() -> Self {
        Self {
            key_dir: PathBuf::from("/tmp/sandbox-keys"),
            cert_ttl: Duration::from_secs(5 * 60),
            max_ttl: Duration::from_secs(10 * 60),
            refresh_margin: Duration::from_secs(30),
            default_username: "sandbox".into(),
            ca_key_path: PathBuf::from("/etc/kestrel/ssh_ca"),
            command_timeout: Duration::from_secs(30),
        }
    }
}

impl KeyConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.key_dir.as_os_str().is_empty() {
            return Err(KeyError::Config("key_dir is required".into()));
        }
        if self.cert_ttl.is_zero() {
            return Err(KeyError::Config("cert_ttl must be > 0".into()));
        }
        if self.refresh_margin >= self.cert_ttl {
            return Err(KeyError::Config(format!(
                "refresh_margin ({:?}) must be shorter than cert_ttl ({:?})",
                self.refresh_margin, self.cert_ttl
            )));
        }
        if self.default_username.is_empty() {
            return Err(KeyError::Config("default_username is required".into()));
        }
        Ok(())
    }

    /// Certificate lifetime after clamping to `max_ttl`.
    pub fn effective_ttl(&self) -> Duration {
        self.cert_ttl.min(self.max_ttl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = KeyConfig::default();
        assert_eq!(config.cert_ttl, Duration::from_secs(300));
        assert_eq!(config.refresh_margin, Duration::from_secs(30));
        assert_eq!(config.default_username, "sandbox");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_margin_must_be_shorter_than_ttl() {
        let config = KeyConfig {
            refresh_margin: Duration::from_secs(300),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_ttl_is_clamped() {
        let config = KeyConfig {
            cert_ttl: Duration::from_secs(3600),
            ..Default::default()
        };
        assert_eq!(config.effective_ttl(), Duration::from_secs(600));
    }
}
