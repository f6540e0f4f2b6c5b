//! Per-sandbox credential cache.
//!
//! Credentials are cached per `(sandbox_id, username)`. Each cache key owns
//! its own async mutex, so concurrent callers for the same key wait on one
//! issuance while unrelated sandboxes proceed independently.

use crate::ca::{CertificateAuthority, CertificateRequest};
use crate::clock::{Clock, SystemClock};
use crate::config::KeyConfig;
use crate::error::{KeyError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

const PRIVATE_KEY_FILE: &str = "key";
const PUBLIC_KEY_FILE: &str = "key.pub";
const CERTIFICATE_FILE: &str = "key-cert.pub";

/// SSH credentials for one user on one sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Owning sandbox.
    pub sandbox_id: String,
    /// Login name the certificate is valid for.
    pub username: String,
    /// Private key file (mode 0600).
    pub private_key_path: PathBuf,
    /// Certificate file, passed to ssh as `CertificateFile`.
    pub certificate_path: PathBuf,
    /// OpenSSH public key text.
    pub public_key: String,
    /// End of the certificate validity window.
    pub valid_until: DateTime<Utc>,
}

impl Credentials {
    /// True when the certificate expires within `margin` of `now`.
    pub fn is_expired(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        let Ok(margin) = chrono::Duration::from_std(margin) else {
            return true;
        };
        match now.checked_add_signed(margin) {
            Some(deadline) => deadline >= self.valid_until,
            None => true,
        }
    }
}

/// What the orchestrator needs from a credential issuer.
#[async_trait]
pub trait KeyProvider: Send + Sync {
    /// Return valid credentials, issuing or refreshing them as needed.
    ///
    /// An empty `username` selects the configured default.
    async fn get_credentials(&self, sandbox_id: &str, username: &str) -> Result<Credentials>;

    /// Drop every cached credential for the sandbox and delete its key directory.
    async fn cleanup_sandbox(&self, sandbox_id: &str) -> Result<()>;
}

enum Slot {
    Empty,
    Issued(Credentials),
    /// Removed by `cleanup_sandbox`. Holders of the old slot must not issue.
    Retired,
}

type SlotKey = (String, String);

/// [`KeyProvider`] that mints keys locally and has them signed by a
/// [`CertificateAuthority`].
pub struct KeyManager {
    ca: Arc<dyn CertificateAuthority>,
    config: KeyConfig,
    clock: Arc<dyn Clock>,
    slots: Mutex<HashMap<SlotKey, Arc<Mutex<Slot>>>>,
}

impl KeyManager {
    /// Create a manager, creating `key_dir` with mode 0700 if needed.
    pub async fn new(ca: Arc<dyn CertificateAuthority>, config: KeyConfig) -> Result<Self> {
        config.validate()?;
        create_private_dir(&config.key_dir).await?;
        tracing::info!(key_dir = %config.key_dir.display(), "Key manager ready");
        Ok(Self {
            ca,
            config,
            clock: Arc::new(SystemClock),
            slots: Mutex::new(HashMap::new()),
        })
    }

    /// Replace the clock used for expiry checks.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Get the manager configuration.
    pub fn config(&self) -> &KeyConfig {
        &self.config
    }

    fn sandbox_dir(&self, sandbox_id: &str) -> PathBuf {
        self.config.key_dir.join(sandbox_id)
    }

    async fn slot(&self, key: SlotKey) -> Arc<Mutex<Slot>> {
        let mut slots = self.slots.lock().await;
        slots
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(Slot::Empty)))
            .clone()
    }

    /// Serve from `slot`, issuing under its lock when empty or near expiry.
    async fn credentials_in(
        &self,
        slot: &Mutex<Slot>,
        sandbox_id: &str,
        username: &str,
    ) -> Result<Credentials> {
        let mut slot = slot.lock().await;
        match &*slot {
            Slot::Retired => {
                tracing::debug!(sandbox_id, username, "Credential request raced sandbox cleanup");
                return Err(KeyError::Retired(sandbox_id.to_string()));
            }
            Slot::Issued(credentials) => {
                if !credentials.is_expired(self.clock.now(), self.config.refresh_margin) {
                    tracing::trace!(sandbox_id, username, "Credential cache hit");
                    return Ok(credentials.clone());
                }
                tracing::debug!(sandbox_id, username, "Cached certificate near expiry, refreshing");
            }
            Slot::Empty => {}
        }

        let credentials = self.issue(sandbox_id, username).await?;
        *slot = Slot::Issued(credentials.clone());
        Ok(credentials)
    }

    async fn issue(&self, sandbox_id: &str, username: &str) -> Result<Credentials> {
        let start = std::time::Instant::now();
        let dir = self.sandbox_dir(sandbox_id).join(username);
        create_private_dir(&dir).await?;

        let private_key_path = dir.join(PRIVATE_KEY_FILE);
        let public_key_path = dir.join(PUBLIC_KEY_FILE);
        let certificate_path = dir.join(CERTIFICATE_FILE);

        let existing = if file_exists(&private_key_path).await && file_exists(&public_key_path).await
        {
            Some(tokio::fs::read_to_string(&public_key_path).await?)
        } else {
            None
        };
        let minted = existing.is_none();
        let public_key = match existing {
            Some(public_key) => public_key.trim().to_string(),
            None => {
                remove_files(&[
                    private_key_path.as_path(),
                    public_key_path.as_path(),
                    certificate_path.as_path(),
                ])
                .await;
                let comment = format!("{username}@{sandbox_id}");
                let public_key = self.ca.generate_keypair(&private_key_path, &comment).await?;
                set_mode(&private_key_path, 0o600).await?;
                tracing::debug!(sandbox_id, username, "Generated keypair");
                public_key
            }
        };

        let request = CertificateRequest {
            key_id: format!("sandbox-runner:{sandbox_id}"),
            public_key_path: public_key_path.clone(),
            principals: vec![username.to_string()],
            ttl: self.config.effective_ttl(),
        };
        let issued = match self.ca.issue_certificate(&request).await {
            Ok(issued) => issued,
            Err(e) => {
                if minted {
                    remove_files(&[private_key_path.as_path(), public_key_path.as_path()]).await;
                }
                tracing::error!(sandbox_id, username, error = %e, "Certificate issuance failed");
                return Err(e);
            }
        };

        tokio::fs::write(&certificate_path, format!("{}\n", issued.certificate)).await?;
        set_mode(&certificate_path, 0o600).await?;

        tracing::info!(
            sandbox_id,
            username,
            valid_until = %issued.valid_until,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Issued SSH certificate"
        );
        Ok(Credentials {
            sandbox_id: sandbox_id.to_string(),
            username: username.to_string(),
            private_key_path,
            certificate_path,
            public_key,
            valid_until: issued.valid_until,
        })
    }
}

#[async_trait]
impl KeyProvider for KeyManager {
    async fn get_credentials(&self, sandbox_id: &str, username: &str) -> Result<Credentials> {
        validate_component("sandbox_id", sandbox_id)?;
        let username = if username.is_empty() {
            self.config.default_username.as_str()
        } else {
            username
        };
        validate_component("username", username)?;

        let slot = self
            .slot((sandbox_id.to_string(), username.to_string()))
            .await;
        self.credentials_in(&slot, sandbox_id, username).await
    }

    async fn cleanup_sandbox(&self, sandbox_id: &str) -> Result<()> {
        validate_component("sandbox_id", sandbox_id)?;

        let removed: Vec<Arc<Mutex<Slot>>> = {
            let mut slots = self.slots.lock().await;
            let keys: Vec<SlotKey> = slots
                .keys()
                .filter(|(sid, _)| sid == sandbox_id)
                .cloned()
                .collect();
            keys.iter().filter_map(|k| slots.remove(k)).collect()
        };
        // Wait out in-flight issuance before deleting the files it writes.
        for slot in &removed {
            *slot.lock().await = Slot::Retired;
        }

        match tokio::fs::remove_dir_all(self.sandbox_dir(sandbox_id)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::error!(sandbox_id, error = %e, "Failed to remove key directory");
                return Err(e.into());
            }
        }
        tracing::info!(sandbox_id, entries = removed.len(), "Cleaned up sandbox credentials");
        Ok(())
    }
}

/// Reject values that would escape the key directory.
fn validate_component(field: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(KeyError::InvalidArgument(format!("{field} is required")));
    }
    if value == "." || value == ".." || value.contains('/') || value.contains('\0') {
        return Err(KeyError::InvalidArgument(format!(
            "{field} {value:?} is not a valid path component"
        )));
    }
    Ok(())
}

async fn create_private_dir(path: &Path) -> Result<()> {
    let mut builder = tokio::fs::DirBuilder::new();
    builder.recursive(true).mode(0o700);
    builder.create(path).await?;
    set_mode(path, 0o700).await
}

async fn set_mode(path: &Path, mode: u32) -> Result<()> {
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await?;
    Ok(())
}

async fn file_exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

async fn remove_files(paths: &[&Path]) {
    for path in paths {
        if let Err(e) = tokio::fs::remove_file(path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %path.display(), error = %e, "Failed to remove key file");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ca::IssuedCertificate;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct ManualClock {
        now: std::sync::Mutex<DateTime<Utc>>,
    }

    impl ManualClock {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                now: std::sync::Mutex::new(Utc::now()),
            })
        }

        fn advance(&self, by: Duration) {
            let mut now = self.now.lock().unwrap();
            *now += chrono::Duration::from_std(by).unwrap();
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.now.lock().unwrap()
        }
    }

    struct FakeAuthority {
        clock: Arc<ManualClock>,
        keygens: AtomicUsize,
        issued: AtomicUsize,
        fail_signing: AtomicBool,
        delay: Duration,
    }

    impl FakeAuthority {
        fn new(clock: Arc<ManualClock>) -> Arc<Self> {
            Arc::new(Self {
                clock,
                keygens: AtomicUsize::new(0),
                issued: AtomicUsize::new(0),
                fail_signing: AtomicBool::new(false),
                delay: Duration::from_millis(20),
            })
        }
    }

    #[async_trait]
    impl CertificateAuthority for FakeAuthority {
        async fn generate_keypair(&self, path: &Path, comment: &str) -> Result<String> {
            let n = self.keygens.fetch_add(1, Ordering::SeqCst);
            let public = format!("ssh-ed25519 AAAAKEY{n} {comment}");
            tokio::fs::write(path, "PRIVATE").await?;
            tokio::fs::write(format!("{}.pub", path.display()), &public).await?;
            Ok(public)
        }

        async fn issue_certificate(&self, request: &CertificateRequest) -> Result<IssuedCertificate> {
            tokio::time::sleep(self.delay).await;
            if self.fail_signing.load(Ordering::SeqCst) {
                return Err(KeyError::Signing("CA unavailable".into()));
            }
            let n = self.issued.fetch_add(1, Ordering::SeqCst);
            Ok(IssuedCertificate {
                certificate: format!("ssh-ed25519-cert-v01@openssh.com CERT{n} {}", request.key_id),
                valid_until: self.clock.now() + chrono::Duration::from_std(request.ttl).unwrap(),
            })
        }
    }

    async fn manager(dir: &TempDir) -> (Arc<KeyManager>, Arc<FakeAuthority>, Arc<ManualClock>) {
        let clock = ManualClock::new();
        let ca = FakeAuthority::new(clock.clone());
        let config = KeyConfig {
            key_dir: dir.path().join("keys"),
            ..Default::default()
        };
        let manager = KeyManager::new(ca.clone(), config)
            .await
            .unwrap()
            .with_clock(clock.clone());
        (Arc::new(manager), ca, clock)
    }

    #[test]
    fn test_is_expired_includes_margin() {
        let now = Utc::now();
        let creds = Credentials {
            sandbox_id: "SBX-1".into(),
            username: "sandbox".into(),
            private_key_path: PathBuf::from("/k"),
            certificate_path: PathBuf::from("/k-cert.pub"),
            public_key: String::new(),
            valid_until: now + chrono::Duration::seconds(30),
        };
        assert!(!creds.is_expired(now, Duration::from_secs(29)));
        assert!(creds.is_expired(now, Duration::from_secs(30)));
        assert!(creds.is_expired(now + chrono::Duration::seconds(31), Duration::ZERO));
    }

    #[tokio::test]
    async fn test_reuses_cached_credentials() {
        let dir = TempDir::new().unwrap();
        let (manager, ca, _) = manager(&dir).await;

        let first = manager.get_credentials("SBX-1", "sandbox").await.unwrap();
        let second = manager.get_credentials("SBX-1", "sandbox").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(ca.issued.load(Ordering::SeqCst), 1);
        assert_eq!(
            first.private_key_path,
            dir.path().join("keys/SBX-1/sandbox/key")
        );
        let mode = std::fs::metadata(&first.private_key_path)
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
        let dir_mode = std::fs::metadata(dir.path().join("keys/SBX-1"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(dir_mode & 0o777, 0o700);
    }

    #[tokio::test]
    async fn test_refreshes_after_expiry() {
        let dir = TempDir::new().unwrap();
        let (manager, ca, clock) = manager(&dir).await;

        let first = manager.get_credentials("SBX-1", "sandbox").await.unwrap();
        clock.advance(Duration::from_secs(6 * 60));
        let refreshed = manager.get_credentials("SBX-1", "sandbox").await.unwrap();

        assert!(refreshed.valid_until > first.valid_until);
        assert_eq!(refreshed.private_key_path, first.private_key_path);
        assert_eq!(refreshed.certificate_path, first.certificate_path);
        assert_eq!(ca.issued.load(Ordering::SeqCst), 2);
        // Key is reused, only the certificate is reissued.
        assert_eq!(ca.keygens.load(Ordering::SeqCst), 1);
        let cert = std::fs::read_to_string(&refreshed.certificate_path).unwrap();
        assert!(cert.contains("CERT1"));
    }

    #[tokio::test]
    async fn test_refreshes_inside_margin() {
        let dir = TempDir::new().unwrap();
        let (manager, ca, clock) = manager(&dir).await;

        manager.get_credentials("SBX-1", "").await.unwrap();
        // 5 min TTL, 30 s margin.
        clock.advance(Duration::from_secs(269));
        manager.get_credentials("SBX-1", "").await.unwrap();
        assert_eq!(ca.issued.load(Ordering::SeqCst), 1);

        clock.advance(Duration::from_secs(1));
        manager.get_credentials("SBX-1", "").await.unwrap();
        assert_eq!(ca.issued.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_issuance() {
        let dir = TempDir::new().unwrap();
        let (manager, ca, _) = manager(&dir).await;

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let manager = manager.clone();
                tokio::spawn(async move { manager.get_credentials("SBX-1", "sandbox").await })
            })
            .collect();
        let results = futures::future::join_all(handles).await;

        let first = results[0].as_ref().unwrap().as_ref().unwrap().clone();
        for result in results {
            assert_eq!(result.unwrap().unwrap(), first);
        }
        assert_eq!(ca.issued.load(Ordering::SeqCst), 1);
        assert_eq!(ca.keygens.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_distinct_users_get_distinct_keys() {
        let dir = TempDir::new().unwrap();
        let (manager, ca, _) = manager(&dir).await;

        let a = manager.get_credentials("SBX-1", "sandbox").await.unwrap();
        let b = manager.get_credentials("SBX-1", "ubuntu").await.unwrap();
        let c = manager.get_credentials("SBX-2", "sandbox").await.unwrap();

        assert_ne!(a.private_key_path, b.private_key_path);
        assert_ne!(a.private_key_path, c.private_key_path);
        assert_eq!(ca.issued.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_failed_issuance_removes_fresh_key() {
        let dir = TempDir::new().unwrap();
        let (manager, ca, _) = manager(&dir).await;
        ca.fail_signing.store(true, Ordering::SeqCst);

        let err = manager.get_credentials("SBX-1", "sandbox").await.unwrap_err();
        assert!(matches!(err, KeyError::Signing(_)));
        assert!(!dir.path().join("keys/SBX-1/sandbox/key").exists());
        assert!(!dir.path().join("keys/SBX-1/sandbox/key.pub").exists());

        ca.fail_signing.store(false, Ordering::SeqCst);
        manager.get_credentials("SBX-1", "sandbox").await.unwrap();
        assert_eq!(ca.keygens.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cleanup_removes_files_and_cache() {
        let dir = TempDir::new().unwrap();
        let (manager, ca, _) = manager(&dir).await;

        manager.get_credentials("SBX-1", "sandbox").await.unwrap();
        manager.get_credentials("SBX-2", "sandbox").await.unwrap();
        manager.cleanup_sandbox("SBX-1").await.unwrap();

        assert!(!dir.path().join("keys/SBX-1").exists());
        assert!(dir.path().join("keys/SBX-2/sandbox/key").exists());

        manager.get_credentials("SBX-1", "sandbox").await.unwrap();
        assert_eq!(ca.issued.load(Ordering::SeqCst), 3);

        // Cleaning up a sandbox with no credentials is fine.
        manager.cleanup_sandbox("SBX-9").await.unwrap();
    }

    #[tokio::test]
    async fn test_stale_slot_after_cleanup_does_not_reissue() {
        let dir = TempDir::new().unwrap();
        let (manager, ca, _) = manager(&dir).await;
        manager.get_credentials("SBX-1", "sandbox").await.unwrap();

        // A caller that fetched the slot before cleanup and locks it after.
        let stale = manager
            .slot(("SBX-1".to_string(), "sandbox".to_string()))
            .await;
        manager.cleanup_sandbox("SBX-1").await.unwrap();

        let err = manager
            .credentials_in(&stale, "SBX-1", "sandbox")
            .await
            .unwrap_err();
        assert!(matches!(err, KeyError::Retired(_)));
        assert!(!dir.path().join("keys/SBX-1").exists());
        assert_eq!(ca.issued.load(Ordering::SeqCst), 1);

        // New requests get a fresh slot.
        manager.get_credentials("SBX-1", "sandbox").await.unwrap();
        assert_eq!(ca.issued.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_rejects_bad_identifiers() {
        let dir = TempDir::new().unwrap();
        let (manager, ca, _) = manager(&dir).await;

        assert!(matches!(
            manager.cleanup_sandbox("").await,
            Err(KeyError::InvalidArgument(_))
        ));
        assert!(matches!(
            manager.get_credentials("", "sandbox").await,
            Err(KeyError::InvalidArgument(_))
        ));
        assert!(matches!(
            manager.get_credentials("SBX-1", "../root").await,
            Err(KeyError::InvalidArgument(_))
        ));
        assert!(matches!(
            manager.get_credentials("..", "sandbox").await,
            Err(KeyError::InvalidArgument(_))
        ));
        assert_eq!(ca.issued.load(Ordering::SeqCst), 0);
    }
}
