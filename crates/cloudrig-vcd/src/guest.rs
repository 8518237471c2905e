//! Guest customization by OS family
//!
//! Guest-specific behavior is a capability lookup keyed by an OS family
//! tag, not a type hierarchy: the family decides the package-manager line
//! and the rest of the first-boot script is shared. The script runs under
//! the control plane's customization hook, which invokes it with
//! `precustomization` before first boot and `postcustomization` after.

use cloudrig_cloud::{CloudError, Result};

/// Guest OS family tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OsFamily {
    Debian,
    Rhel,
}

impl OsFamily {
    /// Map an OS identifier (e.g. `ubuntu1804`, `centos8`) to its family.
    pub fn from_os_id(os_id: &str) -> Result<Self> {
        let id = os_id.to_lowercase();
        if id.starts_with("ubuntu") || id.starts_with("debian") {
            Ok(OsFamily::Debian)
        } else if id.starts_with("centos")
            || id.starts_with("rhel")
            || id.starts_with("rocky")
            || id.starts_with("alma")
        {
            Ok(OsFamily::Rhel)
        } else {
            Err(CloudError::InvalidConfig(format!(
                "unsupported OS family for guest customization: {os_id:?}"
            )))
        }
    }

    /// Package-manager line installing the tooling the harness expects.
    pub fn install_line(&self) -> &'static str {
        match self {
            OsFamily::Debian => "apt install -y sudo software-properties-common",
            OsFamily::Rhel => "yum install -y sudo",
        }
    }
}

/// Render the first-boot customization script for a VM.
///
/// Creates the login user with passwordless sudo, installs the SSH public
/// key, and registers the hostname. The user `root` keeps `/root` as its
/// home directory.
pub fn customization_script(
    os_id: &str,
    user: &str,
    hostname: &str,
    public_key: &str,
) -> Result<String> {
    let installs = OsFamily::from_os_id(os_id)?.install_line();
    let userdir = if user == "root" {
        "/root".to_string()
    } else {
        format!("/home/{user}")
    };

    Ok(format!(
        r#"#!/bin/bash
if [[ x$1 == xprecustomization ]]; then
    echo Do Nothing
elif [[ x$1 == xpostcustomization ]]; then
    {installs}
    groupadd -fr sudo
    useradd --home {userdir} --shell /bin/bash -m {user}
    usermod -a -G sudo {user}
    mkdir -p {userdir}/.ssh
    echo {public_key} >> {userdir}/.ssh/authorized_keys
    chown -R {user}:{user} {userdir}/.ssh
    chmod 700 {userdir}/.ssh
    chmod 600 {userdir}/.ssh/authorized_keys
    restorecon -R -v {userdir}/.ssh
    echo "%sudo ALL=(ALL) NOPASSWD: ALL" >> /etc/sudoers
    echo "127.0.0.1 {hostname}" >> /etc/hosts
fi
"#
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn family_lookup_by_tag() {
        assert_eq!(OsFamily::from_os_id("ubuntu1804").unwrap(), OsFamily::Debian);
        assert_eq!(OsFamily::from_os_id("debian10").unwrap(), OsFamily::Debian);
        assert_eq!(OsFamily::from_os_id("centos8").unwrap(), OsFamily::Rhel);
        assert_eq!(OsFamily::from_os_id("rocky9").unwrap(), OsFamily::Rhel);
        assert!(matches!(
            OsFamily::from_os_id("windows2019"),
            Err(CloudError::InvalidConfig(_))
        ));
    }

    #[test]
    fn script_carries_user_key_and_hostname() {
        let script =
            customization_script("ubuntu1804", "bench", "pkb-vm-0", "ssh-rsa AAAA...").unwrap();
        assert!(script.contains("apt install -y sudo"));
        assert!(script.contains("useradd --home /home/bench"));
        assert!(script.contains("echo ssh-rsa AAAA... >> /home/bench/.ssh/authorized_keys"));
        assert!(script.contains("127.0.0.1 pkb-vm-0"));
    }

    #[test]
    fn root_user_keeps_root_home() {
        let script = customization_script("centos7", "root", "vm", "key").unwrap();
        assert!(script.contains("yum install -y sudo"));
        assert!(script.contains("useradd --home /root"));
    }
}
