//! Remote command execution over the system `ssh` client.

use crate::error::SshError;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

/// Cap on captured stdout and stderr, each.
pub const MAX_OUTPUT_BYTES: usize = 1024 * 1024;

/// ssh exits with 255 when it fails itself rather than the remote command.
const SSH_FAILURE_EXIT: i32 = 255;

/// Where and as whom to run a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshTarget {
    /// Guest address.
    pub addr: String,
    /// Login name.
    pub user: String,
    /// Private key file.
    pub private_key_path: PathBuf,
    /// Certificate file for certificate authentication.
    pub certificate_path: Option<PathBuf>,
    /// Optional `ProxyJump` host.
    pub proxy_jump: Option<String>,
    /// TCP connect timeout.
    pub connect_timeout: Duration,
}

/// Captured result of a remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SshOutput {
    pub stdout: String,
    pub stderr: String,
    /// Remote exit code. Non-zero is a normal outcome.
    pub exit_code: i32,
}

/// Transport failure together with whatever output was captured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshFailure {
    pub error: SshError,
    pub output: SshOutput,
}

impl From<SshError> for SshFailure {
    fn from(error: SshError) -> Self {
        Self {
            error,
            output: SshOutput {
                exit_code: SSH_FAILURE_EXIT,
                ..Default::default()
            },
        }
    }
}

/// Runs shell commands on a guest.
#[async_trait]
pub trait SshRunner: Send + Sync {
    /// Run `command` on `target`, giving up after `timeout`.
    ///
    /// A remote non-zero exit is returned as `Ok`. Only failures of ssh
    /// itself are errors.
    async fn run(
        &self,
        target: &SshTarget,
        command: &str,
        timeout: Duration,
    ) -> Result<SshOutput, SshFailure>;
}

/// [`SshRunner`] backed by the `ssh` binary.
///
/// Host keys are not verified: sandboxes are ephemeral and addresses get
/// reused across them.
#[derive(Debug, Clone, Default)]
pub struct SystemSshRunner;

impl SystemSshRunner {
    /// Create a runner.
    pub fn new() -> Self {
        Self
    }

    fn args(target: &SshTarget, command: &str) -> Vec<String> {
        let mut args = vec![
            "-i".to_string(),
            target.private_key_path.display().to_string(),
        ];
        if let Some(cert) = &target.certificate_path {
            args.push("-o".into());
            args.push(format!("CertificateFile={}", cert.display()));
        }
        args.extend(
            [
                "-o",
                "StrictHostKeyChecking=no",
                "-o",
                "UserKnownHostsFile=/dev/null",
                "-o",
                "BatchMode=yes",
                "-o",
                "LogLevel=ERROR",
            ]
            .map(String::from),
        );
        args.push("-o".into());
        args.push(format!(
            "ConnectTimeout={}",
            target.connect_timeout.as_secs().max(1)
        ));
        if let Some(jump) = &target.proxy_jump {
            args.push("-J".into());
            args.push(jump.clone());
        }
        args.push(format!("{}@{}", target.user, target.addr));
        args.push("--".into());
        args.push(command.to_string());
        args
    }
}

/// Refuse keys that are missing or readable by group or others.
pub async fn check_key_file(path: &Path) -> Result<(), SshError> {
    let meta = match tokio::fs::metadata(path).await {
        Ok(meta) => meta,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(SshError::FileMissing {
                kind: "key",
                path: path.display().to_string(),
            });
        }
        Err(e) => return Err(SshError::Spawn(format!("stat {}: {e}", path.display()))),
    };
    let mode = meta.permissions().mode() & 0o777;
    if mode & 0o077 != 0 {
        return Err(SshError::InsecureKey {
            path: path.display().to_string(),
            mode,
        });
    }
    Ok(())
}

#[async_trait]
impl SshRunner for SystemSshRunner {
    async fn run(
        &self,
        target: &SshTarget,
        command: &str,
        timeout: Duration,
    ) -> Result<SshOutput, SshFailure> {
        check_key_file(&target.private_key_path).await?;
        if let Some(cert) = &target.certificate_path {
            if !tokio::fs::try_exists(cert).await.unwrap_or(false) {
                return Err(SshError::FileMissing {
                    kind: "certificate",
                    path: cert.display().to_string(),
                }
                .into());
            }
        }

        let start = std::time::Instant::now();
        let args = Self::args(target, command);
        tracing::debug!(addr = %target.addr, user = %target.user, "Running ssh command");

        let mut child = Command::new("ssh")
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SshError::Spawn(e.to_string()))?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let collect = async {
            tokio::try_join!(
                read_capped(stdout, MAX_OUTPUT_BYTES),
                read_capped(stderr, MAX_OUTPUT_BYTES),
                child.wait()
            )
        };
        let (stdout, stderr, status) = match tokio::time::timeout(timeout, collect).await {
            Ok(result) => result.map_err(|e| SshError::Spawn(e.to_string()))?,
            Err(_) => {
                tracing::warn!(addr = %target.addr, timeout_secs = timeout.as_secs(), "ssh command timed out");
                return Err(SshError::Timeout(timeout).into());
            }
        };

        let captured = SshOutput {
            stdout: truncate_output(&stdout, MAX_OUTPUT_BYTES),
            stderr: truncate_output(&stderr, MAX_OUTPUT_BYTES),
            exit_code: status.code().unwrap_or(SSH_FAILURE_EXIT),
        };
        tracing::debug!(
            addr = %target.addr,
            exit_code = captured.exit_code,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "ssh command finished"
        );

        if status.code().is_none() || captured.exit_code == SSH_FAILURE_EXIT {
            let message = match captured.stderr.trim() {
                "" => format!("ssh exited with {status}"),
                stderr => stderr.to_string(),
            };
            return Err(SshFailure {
                error: SshError::Transport(message),
                output: captured,
            });
        }
        Ok(captured)
    }
}

/// Read at most `limit` bytes from `reader`, then discard the rest so the
/// writer never blocks on a full pipe.
async fn read_capped<R>(reader: Option<R>, limit: usize) -> std::io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return Ok(Vec::new());
    };
    let mut buf = Vec::new();
    (&mut reader).take(limit as u64).read_to_end(&mut buf).await?;
    tokio::io::copy(&mut reader, &mut tokio::io::sink()).await?;
    Ok(buf)
}

/// Lossy UTF-8 decode, cut to at most `limit` bytes on a character boundary.
pub fn truncate_output(bytes: &[u8], limit: usize) -> String {
    let mut text = String::from_utf8_lossy(bytes).into_owned();
    if text.len() > limit {
        let mut end = limit;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        text.truncate(end);
    }
    text
}

/// Single-quote `s` for a POSIX shell.
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

fn shell_ident(key: &str) -> String {
    let ident: String = key
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if ident.is_empty() {
        "VAR".to_string()
    } else {
        ident
    }
}

/// Wrap `command` in a login shell with `env` exported first.
pub fn command_with_env(command: &str, env: &BTreeMap<String, String>) -> String {
    let mut script = String::new();
    for (key, value) in env {
        script.push_str(&format!("export {}={}; ", shell_ident(key), shell_quote(value)));
    }
    script.push_str(command);
    format!("bash -lc {}", shell_quote(&script))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn target(dir: &TempDir) -> SshTarget {
        SshTarget {
            addr: "10.0.0.5".into(),
            user: "sandbox".into(),
            private_key_path: dir.path().join("key"),
            certificate_path: None,
            proxy_jump: None,
            connect_timeout: Duration::from_secs(15),
        }
    }

    #[test]
    fn test_command_without_env() {
        assert_eq!(
            command_with_env("echo hi", &BTreeMap::new()),
            "bash -lc 'echo hi'"
        );
    }

    #[test]
    fn test_command_with_env_is_quoted() {
        let env = BTreeMap::from([
            ("NAME".to_string(), "it's".to_string()),
            ("bad-key".to_string(), "x".to_string()),
            (String::new(), "y".to_string()),
        ]);
        let wrapped = command_with_env("echo $NAME", &env);
        assert_eq!(
            wrapped,
            r#"bash -lc 'export VAR='\''y'\''; export NAME='\''it'\''\'\'''\''s'\''; export bad_key='\''x'\''; echo $NAME'"#
        );
    }

    #[test]
    fn test_truncate_on_char_boundary() {
        assert_eq!(truncate_output(b"hello", 10), "hello");
        assert_eq!(truncate_output(b"hello", 3), "hel");
        // 'é' is two bytes; cutting inside it backs off.
        assert_eq!(truncate_output("aé".as_bytes(), 2), "a");
    }

    #[tokio::test]
    async fn test_read_capped_bounds_and_drains() {
        let mut input: &[u8] = b"0123456789";
        let captured = read_capped(Some(&mut input), 4).await.unwrap();
        assert_eq!(captured, b"0123");
        assert!(input.is_empty());

        let short = read_capped(Some(&b"ok"[..]), 4).await.unwrap();
        assert_eq!(short, b"ok");
        assert!(read_capped(None::<&[u8]>, 4).await.unwrap().is_empty());
    }

    #[test]
    fn test_ssh_args() {
        let dir = TempDir::new().unwrap();
        let mut t = target(&dir);
        t.certificate_path = Some(dir.path().join("key-cert.pub"));
        t.proxy_jump = Some("bastion".into());
        let args = SystemSshRunner::args(&t, "bash -lc 'id'");
        let joined = args.join(" ");
        assert!(joined.contains(&format!("CertificateFile={}", dir.path().join("key-cert.pub").display())));
        assert!(joined.contains("StrictHostKeyChecking=no"));
        assert!(joined.contains("ConnectTimeout=15"));
        assert!(joined.contains("-J bastion"));
        assert_eq!(&args[args.len() - 3..], ["sandbox@10.0.0.5", "--", "bash -lc 'id'"]);
    }

    #[tokio::test]
    async fn test_missing_key_fails_before_spawn() {
        let dir = TempDir::new().unwrap();
        let err = SystemSshRunner::new()
            .run(&target(&dir), "true", Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err.error, SshError::FileMissing { kind: "key", .. }));
        assert_eq!(err.output.exit_code, 255);
    }

    #[tokio::test]
    async fn test_insecure_key_rejected() {
        let dir = TempDir::new().unwrap();
        let key = dir.path().join("key");
        std::fs::write(&key, "k").unwrap();
        std::fs::set_permissions(&key, std::fs::Permissions::from_mode(0o644)).unwrap();
        let err = SystemSshRunner::new()
            .run(&target(&dir), "true", Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err.error, SshError::InsecureKey { mode: 0o644, .. }));
    }

    #[tokio::test]
    async fn test_missing_certificate_rejected() {
        let dir = TempDir::new().unwrap();
        let key = dir.path().join("key");
        std::fs::write(&key, "k").unwrap();
        std::fs::set_permissions(&key, std::fs::Permissions::from_mode(0o600)).unwrap();
        let mut t = target(&dir);
        t.certificate_path = Some(dir.path().join("key-cert.pub"));
        let err = SystemSshRunner::new()
            .run(&t, "true", Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(
            err.error,
            SshError::FileMissing {
                kind: "certificate",
                ..
            }
        ));
    }
}
