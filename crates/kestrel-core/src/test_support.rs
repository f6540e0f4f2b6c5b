//! Mock collaborators for orchestrator tests.

use crate::ssh::{SshFailure, SshOutput, SshRunner, SshTarget};
use crate::SshError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kestrel_keys::{Clock, Credentials, KeyError, KeyProvider};
use kestrel_vm::{
    CloneSpec, DomainRef, Hypervisor, IpLease, ReleaseReport, SnapshotDiffPlan, SnapshotKind,
    SnapshotRef, VmError, VmState,
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn driver_failure(op: &str, vm: &str) -> VmError {
    VmError::Command {
        program: "virsh".into(),
        args: format!("{op} {vm}"),
        message: "exit status: 1: error: operation failed".into(),
    }
}

/// Scripted [`Hypervisor`]. Every call is recorded as `"<op> <vm>"`.
#[derive(Default)]
pub struct MockDriver {
    calls: Mutex<Vec<String>>,
    ips: Mutex<HashMap<String, String>>,
    fail: Mutex<Vec<String>>,
}

impl MockDriver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Address reported for `vm` from now on. Unset means discovery times out.
    pub fn set_ip(&self, vm: &str, ip: &str) {
        self.ips
            .lock()
            .unwrap()
            .insert(vm.to_string(), ip.to_string());
    }

    /// Make operation `op` (e.g. `"start"`) fail.
    pub fn fail(&self, op: &str) {
        self.fail.lock().unwrap().push(op.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, op: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.split(' ').next() == Some(op))
            .count()
    }

    fn record(&self, op: &str, vm: &str) -> Result<(), VmError> {
        self.calls.lock().unwrap().push(format!("{op} {vm}"));
        if self.fail.lock().unwrap().iter().any(|f| f == op) {
            return Err(driver_failure(op, vm));
        }
        Ok(())
    }
}

#[async_trait]
impl Hypervisor for MockDriver {
    async fn clone_from_vm(&self, _source: &str, spec: &CloneSpec) -> Result<DomainRef, VmError> {
        self.record("clone", &spec.name)?;
        Ok(DomainRef {
            name: spec.name.clone(),
            uuid: Some("4b4a1f0e-0000-4000-8000-000000000001".into()),
        })
    }

    async fn clone_from_image(&self, _image: &str, spec: &CloneSpec) -> Result<DomainRef, VmError> {
        self.record("clone_image", &spec.name)?;
        Ok(DomainRef {
            name: spec.name.clone(),
            uuid: None,
        })
    }

    async fn inject_ssh_key(&self, vm: &str, _user: &str, _key: &str) -> Result<(), VmError> {
        self.record("inject", vm)
    }

    async fn start_vm(&self, vm: &str) -> Result<(), VmError> {
        self.record("start", vm)
    }

    async fn stop_vm(&self, vm: &str, force: bool) -> Result<(), VmError> {
        self.record(if force { "destroy_domain" } else { "shutdown" }, vm)
    }

    async fn destroy_vm(&self, vm: &str) -> Result<(), VmError> {
        self.record("destroy", vm)
    }

    async fn create_snapshot(
        &self,
        vm: &str,
        name: &str,
        kind: SnapshotKind,
    ) -> Result<SnapshotRef, VmError> {
        self.record("snapshot", vm)?;
        let reference = match kind {
            SnapshotKind::Internal => name.to_string(),
            SnapshotKind::External => format!("/var/lib/libvirt/images/jobs/{vm}/snap-{name}.qcow2"),
        };
        Ok(SnapshotRef {
            name: name.to_string(),
            kind,
            reference,
        })
    }

    async fn diff_snapshot(
        &self,
        vm: &str,
        from: &str,
        to: &str,
    ) -> Result<SnapshotDiffPlan, VmError> {
        self.record("diff", vm)?;
        Ok(SnapshotDiffPlan {
            vm_name: vm.to_string(),
            from: from.to_string(),
            to: to.to_string(),
            from_path: None,
            to_path: None,
            notes: vec!["Snapshots are internal; export them to compare.".into()],
        })
    }

    async fn get_ip_address(&self, vm: &str, timeout: Duration) -> Result<IpLease, VmError> {
        self.record("ip", vm)?;
        let ip = self.ips.lock().unwrap().get(vm).cloned();
        ip.map(|ip| IpLease {
            ip,
            mac: "52:54:00:12:34:56".into(),
        })
        .ok_or_else(|| VmError::IpNotFound {
            vm_name: vm.to_string(),
            timeout,
            state: VmState::Running,
        })
    }

    async fn get_vm_state(&self, vm: &str) -> Result<VmState, VmError> {
        self.record("state", vm)?;
        Ok(VmState::Running)
    }

    async fn release_dhcp_lease(&self, network: &str, mac: &str) -> ReleaseReport {
        let _ = self.record("release", network);
        ReleaseReport {
            network: network.to_string(),
            mac: mac.to_string(),
            outcomes: Vec::new(),
        }
    }
}

/// Recording [`SshRunner`] that returns a canned result.
pub struct MockSsh {
    pub runs: Mutex<Vec<(SshTarget, String)>>,
    result: Mutex<Result<SshOutput, SshFailure>>,
}

impl MockSsh {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            runs: Mutex::new(Vec::new()),
            result: Mutex::new(Ok(SshOutput {
                stdout: "hi\n".into(),
                stderr: String::new(),
                exit_code: 0,
            })),
        })
    }

    pub fn respond(&self, result: Result<SshOutput, SshFailure>) {
        *self.result.lock().unwrap() = result;
    }

    pub fn transport_failure(&self, stderr: &str) {
        self.respond(Err(SshFailure {
            error: SshError::Transport(stderr.to_string()),
            output: SshOutput {
                stdout: String::new(),
                stderr: stderr.to_string(),
                exit_code: 255,
            },
        }));
    }

    pub fn runs(&self) -> Vec<(SshTarget, String)> {
        self.runs.lock().unwrap().clone()
    }
}

#[async_trait]
impl SshRunner for MockSsh {
    async fn run(
        &self,
        target: &SshTarget,
        command: &str,
        _timeout: Duration,
    ) -> Result<SshOutput, SshFailure> {
        self.runs
            .lock()
            .unwrap()
            .push((target.clone(), command.to_string()));
        self.result.lock().unwrap().clone()
    }
}

/// [`KeyProvider`] that hands out fixed paths and records cleanups.
#[derive(Default)]
pub struct MockKeys {
    pub issued: Mutex<Vec<(String, String)>>,
    pub cleaned: Mutex<Vec<String>>,
    pub fail_cleanup: bool,
}

impl MockKeys {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing_cleanup() -> Arc<Self> {
        Arc::new(Self {
            fail_cleanup: true,
            ..Default::default()
        })
    }
}

#[async_trait]
impl KeyProvider for MockKeys {
    async fn get_credentials(&self, sandbox_id: &str, username: &str) -> Result<Credentials, KeyError> {
        let username = if username.is_empty() { "sandbox" } else { username };
        self.issued
            .lock()
            .unwrap()
            .push((sandbox_id.to_string(), username.to_string()));
        let dir = PathBuf::from(format!("/tmp/sandbox-keys/{sandbox_id}/{username}"));
        Ok(Credentials {
            sandbox_id: sandbox_id.to_string(),
            username: username.to_string(),
            private_key_path: dir.join("key"),
            certificate_path: dir.join("key-cert.pub"),
            public_key: "ssh-ed25519 AAAA".into(),
            valid_until: Utc::now() + chrono::Duration::minutes(5),
        })
    }

    async fn cleanup_sandbox(&self, sandbox_id: &str) -> Result<(), KeyError> {
        self.cleaned.lock().unwrap().push(sandbox_id.to_string());
        if self.fail_cleanup {
            return Err(KeyError::InvalidArgument("cleanup failed".into()));
        }
        Ok(())
    }
}

/// Settable [`Clock`].
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(Utc::now()),
        })
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock().unwrap() += chrono::Duration::from_std(by).unwrap();
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}
