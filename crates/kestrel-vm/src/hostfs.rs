//! File operations on the libvirt host.
//!
//! Workspaces, descriptors, seed documents and lease files live on the
//! machine running libvirt. [`LocalFs`] touches the local disk; [`RunnerFs`]
//! performs the same operations with shell tools through a
//! [`ProcessRunner`], which over a [`RemoteRunner`](crate::RemoteRunner)
//! means on the remote host.

use crate::error::VmError;
use crate::exec::ProcessRunner;
use async_trait::async_trait;
use std::io::{self, ErrorKind};
use std::path::Path;
use std::sync::Arc;

/// Filesystem of the host libvirt runs on.
#[async_trait]
pub trait HostFs: Send + Sync {
    /// Whether `path` exists. Errors count as absent.
    async fn exists(&self, path: &Path) -> bool;

    async fn create_dir_all(&self, path: &Path) -> io::Result<()>;

    /// Remove a directory tree. Fails with [`ErrorKind::NotFound`] if absent.
    async fn remove_dir_all(&self, path: &Path) -> io::Result<()>;

    async fn read_to_string(&self, path: &Path) -> io::Result<String>;

    /// Create or replace `path` with `contents`.
    async fn write(&self, path: &Path, contents: &str) -> io::Result<()>;
}

/// [`HostFs`] on the local disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFs;

#[async_trait]
impl HostFs for LocalFs {
    async fn exists(&self, path: &Path) -> bool {
        tokio::fs::try_exists(path).await.unwrap_or(false)
    }

    async fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        tokio::fs::create_dir_all(path).await
    }

    async fn remove_dir_all(&self, path: &Path) -> io::Result<()> {
        tokio::fs::remove_dir_all(path).await
    }

    async fn read_to_string(&self, path: &Path) -> io::Result<String> {
        tokio::fs::read_to_string(path).await
    }

    async fn write(&self, path: &Path, contents: &str) -> io::Result<()> {
        tokio::fs::write(path, contents).await
    }
}

/// [`HostFs`] implemented with `test`, `mkdir`, `rm`, `cat` and `sh`.
pub struct RunnerFs {
    runner: Arc<dyn ProcessRunner>,
}

impl RunnerFs {
    pub fn new(runner: Arc<dyn ProcessRunner>) -> Self {
        Self { runner }
    }

    async fn run(&self, program: &str, args: &[&str]) -> io::Result<String> {
        self.runner.run(program, args).await.map_err(to_io)
    }
}

fn to_io(e: VmError) -> io::Error {
    match e {
        VmError::Io(e) => e,
        other => io::Error::other(other.to_string()),
    }
}

fn arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[async_trait]
impl HostFs for RunnerFs {
    async fn exists(&self, path: &Path) -> bool {
        self.run("test", &["-e", &arg(path)]).await.is_ok()
    }

    async fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        self.run("mkdir", &["-p", &arg(path)]).await.map(|_| ())
    }

    async fn remove_dir_all(&self, path: &Path) -> io::Result<()> {
        if !self.exists(path).await {
            return Err(io::Error::new(
                ErrorKind::NotFound,
                format!("{} does not exist", path.display()),
            ));
        }
        self.run("rm", &["-rf", &arg(path)]).await.map(|_| ())
    }

    async fn read_to_string(&self, path: &Path) -> io::Result<String> {
        if !self.exists(path).await {
            return Err(io::Error::new(
                ErrorKind::NotFound,
                format!("{} does not exist", path.display()),
            ));
        }
        self.run("cat", &[&arg(path)]).await
    }

    async fn write(&self, path: &Path, contents: &str) -> io::Result<()> {
        // `contents` is `$1`, never part of the script.
        self.run(
            "sh",
            &["-c", r#"printf '%s' "$1" > "$2""#, "sh", contents, &arg(path)],
        )
        .await
        .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedRunner;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_local_fs() {
        let dir = TempDir::new().unwrap();
        let ws = dir.path().join("jobs/sbx-1");
        let fs = LocalFs;

        fs.create_dir_all(&ws).await.unwrap();
        fs.write(&ws.join("domain.xml"), "<domain/>").await.unwrap();
        assert!(fs.exists(&ws.join("domain.xml")).await);
        assert_eq!(fs.read_to_string(&ws.join("domain.xml")).await.unwrap(), "<domain/>");

        fs.remove_dir_all(&ws).await.unwrap();
        assert!(!fs.exists(&ws).await);
        let err = fs.remove_dir_all(&ws).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_runner_fs_commands() {
        let runner = Arc::new(ScriptedRunner::new().ok("cat /jobs/sbx-1/domain.xml", "<domain/>"));
        let fs = RunnerFs::new(runner.clone());

        fs.create_dir_all(Path::new("/jobs/sbx-1")).await.unwrap();
        fs.write(Path::new("/jobs/sbx-1/meta-data"), "instance-id: sbx-1")
            .await
            .unwrap();
        let xml = fs
            .read_to_string(Path::new("/jobs/sbx-1/domain.xml"))
            .await
            .unwrap();
        assert_eq!(xml, "<domain/>");
        fs.remove_dir_all(Path::new("/jobs/sbx-1")).await.unwrap();

        let calls = runner.calls();
        assert_eq!(calls[0], "mkdir -p /jobs/sbx-1");
        assert!(calls[1].starts_with("sh -c"));
        assert!(calls[1].ends_with("sh instance-id: sbx-1 /jobs/sbx-1/meta-data"));
        assert!(runner.called("rm -rf /jobs/sbx-1"));
    }

    #[tokio::test]
    async fn test_runner_fs_missing_paths() {
        let runner = Arc::new(ScriptedRunner::new().fail("test -e", ""));
        let fs = RunnerFs::new(runner.clone());

        assert!(!fs.exists(Path::new("/jobs/gone")).await);
        let err = fs.remove_dir_all(Path::new("/jobs/gone")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        let err = fs.read_to_string(Path::new("/jobs/gone/domain.xml")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(!runner.called("rm -rf"));
    }
}
