//! Certificate authority seam and the `ssh-keygen` implementation.

use crate::error::{KeyError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::io::ErrorKind;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// A request to sign a user public key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateRequest {
    /// Certificate key id, recorded in sshd logs.
    pub key_id: String,
    /// OpenSSH public key file to sign.
    pub public_key_path: PathBuf,
    /// Login names the certificate is valid for.
    pub principals: Vec<String>,
    /// Requested lifetime. The CA may shorten it.
    pub ttl: Duration,
}

/// A signed certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedCertificate {
    /// OpenSSH certificate text (`*-cert.pub` contents).
    pub certificate: String,
    /// End of the validity window.
    pub valid_until: DateTime<Utc>,
}

/// Mints user keypairs and signs them.
#[async_trait]
pub trait CertificateAuthority: Send + Sync {
    /// Write a fresh ed25519 keypair to `private_key_path` and
    /// `<private_key_path>.pub`. Returns the public key text.
    async fn generate_keypair(&self, private_key_path: &Path, comment: &str) -> Result<String>;

    /// Sign a public key.
    async fn issue_certificate(&self, request: &CertificateRequest) -> Result<IssuedCertificate>;
}

/// [`CertificateAuthority`] that shells out to `ssh-keygen`.
#[derive(Debug, Clone)]
pub struct SshKeygenAuthority {
    ca_key_path: PathBuf,
    max_ttl: Duration,
    timeout: Duration,
}

impl SshKeygenAuthority {
    /// Create an authority signing with the private key at `ca_key_path`.
    ///
    /// Every certificate lifetime is clamped to `max_ttl`.
    pub fn new(ca_key_path: impl Into<PathBuf>, max_ttl: Duration, timeout: Duration) -> Self {
        Self {
            ca_key_path: ca_key_path.into(),
            max_ttl,
            timeout,
        }
    }

    /// Check that the CA key exists and is private to its owner.
    pub async fn check_ca_key(&self) -> Result<()> {
        let meta = match tokio::fs::metadata(&self.ca_key_path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(KeyError::CaKeyMissing(self.ca_key_path.clone()));
            }
            Err(e) => return Err(e.into()),
        };
        let mode = meta.permissions().mode() & 0o777;
        if mode & 0o077 != 0 {
            return Err(KeyError::CaKeyPermissions {
                path: self.ca_key_path.clone(),
                mode,
            });
        }
        Ok(())
    }

    async fn ssh_keygen(&self, args: &[&str], failed: fn(String) -> KeyError) -> Result<String> {
        let mut cmd = Command::new("ssh-keygen");
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let child = cmd.spawn().map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                failed("ssh-keygen not found on host".to_string())
            } else {
                failed(format!("spawn ssh-keygen: {e}"))
            }
        })?;
        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| KeyError::Timeout(self.timeout))??;
        if !output.status.success() {
            return Err(failed(format!(
                "{}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl CertificateAuthority for SshKeygenAuthority {
    async fn generate_keypair(&self, private_key_path: &Path, comment: &str) -> Result<String> {
        let path = private_key_path.to_string_lossy().into_owned();
        self.ssh_keygen(
            &["-q", "-t", "ed25519", "-N", "", "-f", &path, "-C", comment],
            KeyError::KeyGeneration,
        )
        .await?;
        let public = tokio::fs::read_to_string(format!("{path}.pub")).await?;
        Ok(public.trim().to_string())
    }

    async fn issue_certificate(&self, request: &CertificateRequest) -> Result<IssuedCertificate> {
        if request.principals.is_empty() {
            return Err(KeyError::InvalidArgument(
                "at least one principal is required".into(),
            ));
        }
        self.check_ca_key().await?;

        let ttl = request.ttl.min(self.max_ttl);
        if ttl < request.ttl {
            tracing::debug!(
                requested_secs = request.ttl.as_secs(),
                granted_secs = ttl.as_secs(),
                "Clamped certificate TTL"
            );
        }

        // Sign a copy so ssh-keygen's `-cert.pub` output lands in scratch space.
        let scratch = tempfile::TempDir::new()?;
        let scratch_pub = scratch.path().join("key.pub");
        tokio::fs::copy(&request.public_key_path, &scratch_pub).await?;

        let ca = self.ca_key_path.to_string_lossy().into_owned();
        let principals = request.principals.join(",");
        let validity = format!("+{}s", ttl.as_secs().max(1));
        let target = scratch_pub.to_string_lossy().into_owned();
        let issued_at = Utc::now();
        self.ssh_keygen(
            &[
                "-q",
                "-s",
                &ca,
                "-I",
                &request.key_id,
                "-n",
                &principals,
                "-V",
                &validity,
                &target,
            ],
            KeyError::Signing,
        )
        .await?;

        let certificate = tokio::fs::read_to_string(scratch.path().join("key-cert.pub")).await?;
        let valid_until = issued_at
            + chrono::Duration::from_std(ttl).map_err(|e| KeyError::Signing(e.to_string()))?;
        tracing::debug!(
            key_id = %request.key_id,
            principals = %principals,
            valid_until = %valid_until,
            "Issued certificate"
        );
        Ok(IssuedCertificate {
            certificate: certificate.trim().to_string(),
            valid_until,
        })
    }
}
