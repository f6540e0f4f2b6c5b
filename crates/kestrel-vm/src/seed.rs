//! cloud-init NoCloud seed media.
//!
//! A clone inherits the source disk's cloud-init state, including the
//! instance id. Seed media with a fresh `instance-id` makes the guest rerun
//! first-boot initialization, which is what brings networking up on the
//! clone's new MAC.

use crate::error::{Result, VmError};
use crate::exec::ProcessRunner;
use crate::hostfs::HostFs;
use std::fmt::Write as _;
use std::path::Path;

/// Path the guest's sshd reads trusted user CA keys from.
const TRUSTED_CA_PATH: &str = "/etc/ssh/trusted_user_ca_keys.pub";

/// A user account to create on first boot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedUser {
    /// Login name.
    pub name: String,
    /// Public key to authorize.
    pub public_key: String,
}

/// Contents of a NoCloud seed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedMedia {
    instance_id: String,
    user: Option<SeedUser>,
    trusted_ca: Option<String>,
}

impl SeedMedia {
    /// Seed for a clone: DHCP on every virtio NIC, existing accounts untouched.
    pub fn for_clone(vm_name: &str) -> Self {
        Self {
            instance_id: vm_name.to_string(),
            user: None,
            trusted_ca: None,
        }
    }

    /// Seed that also creates `user` with an authorized key.
    pub fn with_user(vm_name: &str, user: SeedUser) -> Self {
        Self {
            instance_id: vm_name.to_string(),
            user: Some(user),
            trusted_ca: None,
        }
    }

    /// Configure sshd to trust certificates signed by `ca_public_key`.
    pub fn trust_ca(mut self, ca_public_key: Option<&str>) -> Self {
        self.trusted_ca = ca_public_key
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(str::to_string);
        self
    }

    /// `meta-data` document.
    pub fn meta_data(&self) -> String {
        format!(
            "instance-id: {id}\nlocal-hostname: {id}\n",
            id = self.instance_id
        )
    }

    /// `user-data` document.
    pub fn user_data(&self) -> String {
        let mut doc = String::from("#cloud-config\n");
        if let Some(user) = &self.user {
            let _ = write!(
                doc,
                "users:\n  - default\n  - name: {}\n    sudo: ALL=(ALL) NOPASSWD:ALL\n    groups: users, admin, sudo\n    shell: /bin/bash\n    ssh_authorized_keys:\n      - {}\n",
                user.name,
                user.public_key.trim()
            );
        }
        doc.push_str(
            "network:\n  version: 2\n  ethernets:\n    id0:\n      match:\n        driver: virtio*\n      dhcp4: true\n",
        );
        if let Some(ca) = &self.trusted_ca {
            let _ = write!(
                doc,
                "write_files:\n  - path: {TRUSTED_CA_PATH}\n    permissions: '0644'\n    content: |\n      {ca}\nruncmd:\n  - grep -q '^TrustedUserCAKeys' /etc/ssh/sshd_config || echo 'TrustedUserCAKeys {TRUSTED_CA_PATH}' >> /etc/ssh/sshd_config\n  - systemctl restart ssh || systemctl restart sshd\n"
            );
        }
        doc
    }

    /// Write `user-data` and `meta-data` next to `out_iso` and pack them.
    ///
    /// Tries `cloud-localds`, then `genisoimage`, then `mkisofs`.
    pub async fn build(
        &self,
        runner: &dyn ProcessRunner,
        fs: &dyn HostFs,
        out_iso: &Path,
    ) -> Result<()> {
        let dir = out_iso
            .parent()
            .ok_or_else(|| VmError::Seed(format!("{} has no parent", out_iso.display())))?;
        let user_data = dir.join("user-data");
        let meta_data = dir.join("meta-data");
        fs.write(&user_data, &self.user_data())
            .await
            .map_err(|e| VmError::Seed(format!("write user-data: {e}")))?;
        fs.write(&meta_data, &self.meta_data())
            .await
            .map_err(|e| VmError::Seed(format!("write meta-data: {e}")))?;

        let out_path = out_iso.to_string_lossy().into_owned();
        let ud_path = user_data.to_string_lossy().into_owned();
        let md_path = meta_data.to_string_lossy().into_owned();
        let (out, ud, md) = (out_path.as_str(), ud_path.as_str(), md_path.as_str());

        match runner.run("cloud-localds", &[out, ud, md]).await {
            Ok(_) => return Ok(()),
            Err(e) => tracing::debug!(error = %e, "cloud-localds unavailable, trying genisoimage"),
        }

        let genisoimage = [
            "-output", out, "-volid", "cidata", "-joliet", "-rock", ud, md,
        ];
        match runner.run("genisoimage", &genisoimage).await {
            Ok(_) => return Ok(()),
            Err(VmError::ToolMissing(_)) => {}
            Err(e) => return Err(VmError::Seed(e.to_string())),
        }

        let mkisofs = ["-output", out, "-V", "cidata", "-J", "-R", ud, md];
        match runner.run("mkisofs", &mkisofs).await {
            Ok(_) => Ok(()),
            Err(VmError::ToolMissing(_)) => Err(VmError::Seed(
                "seed build tools not found: need cloud-localds, genisoimage or mkisofs".into(),
            )),
            Err(e) => Err(VmError::Seed(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hostfs::LocalFs;
    use crate::test_support::ScriptedRunner;
    use tempfile::TempDir;

    #[test]
    fn test_clone_seed_documents() {
        let seed = SeedMedia::for_clone("sbx-1a2b3c4d");
        assert_eq!(
            seed.meta_data(),
            "instance-id: sbx-1a2b3c4d\nlocal-hostname: sbx-1a2b3c4d\n"
        );
        let ud = seed.user_data();
        assert!(ud.starts_with("#cloud-config\n"));
        assert!(ud.contains("driver: virtio*"));
        assert!(ud.contains("dhcp4: true"));
        assert!(!ud.contains("users:"));
        assert!(!ud.contains("TrustedUserCAKeys"));
    }

    #[test]
    fn test_user_seed_with_ca() {
        let seed = SeedMedia::with_user(
            "sbx-1",
            SeedUser {
                name: "sandbox".into(),
                public_key: "ssh-ed25519 AAAA test\n".into(),
            },
        )
        .trust_ca(Some("ssh-ed25519 CAKEY ca"));
        let ud = seed.user_data();
        assert!(ud.contains("  - name: sandbox\n"));
        assert!(ud.contains("      - ssh-ed25519 AAAA test\n"));
        assert!(ud.contains("ssh-ed25519 CAKEY ca"));
        assert!(ud.contains("TrustedUserCAKeys /etc/ssh/trusted_user_ca_keys.pub"));
    }

    #[test]
    fn test_blank_ca_is_ignored() {
        let seed = SeedMedia::for_clone("sbx").trust_ca(Some("  "));
        assert!(!seed.user_data().contains("write_files"));
    }

    #[tokio::test]
    async fn test_build_prefers_cloud_localds() {
        let dir = TempDir::new().unwrap();
        let runner = ScriptedRunner::new();
        let iso = dir.path().join("cloud-init.iso");
        SeedMedia::for_clone("sbx-1").build(&runner, &LocalFs, &iso).await.unwrap();

        assert!(runner.called("cloud-localds"));
        assert!(!runner.called("genisoimage"));
        let meta = std::fs::read_to_string(dir.path().join("meta-data")).unwrap();
        assert!(meta.contains("instance-id: sbx-1"));
    }

    #[tokio::test]
    async fn test_build_falls_back_to_mkisofs() {
        let dir = TempDir::new().unwrap();
        let runner = ScriptedRunner::new()
            .missing("cloud-localds")
            .missing("genisoimage");
        let iso = dir.path().join("cloud-init.iso");
        SeedMedia::for_clone("sbx-1").build(&runner, &LocalFs, &iso).await.unwrap();
        assert!(runner.called("mkisofs -output"));
        assert!(runner.called("-V cidata"));
    }

    #[tokio::test]
    async fn test_build_without_tools_fails() {
        let dir = TempDir::new().unwrap();
        let runner = ScriptedRunner::new()
            .missing("cloud-localds")
            .missing("genisoimage")
            .missing("mkisofs");
        let err = SeedMedia::for_clone("sbx-1")
            .build(&runner, &LocalFs, &dir.path().join("cloud-init.iso"))
            .await
            .unwrap_err();
        assert!(matches!(err, VmError::Seed(_)));
    }
}
