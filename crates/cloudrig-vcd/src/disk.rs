//! Independent disk lifecycle
//!
//! A [`VcdDisk`] is a remote block volume created independently of any VM,
//! attached to at most one VM at a time. Detaching clears the VM
//! association without destroying the volume; deletion requires the disk
//! to be unattached. Guest-level filesystem work (rescan, mkfs, mount) is
//! the OS layer's job, not this crate's.

use crate::api::{self, DiskCreateSpec, DiskHandle};
use crate::cache::OrgCache;
use cloudrig_cloud::{CloudError, Result};
use std::sync::Arc;

const DEVICE_LETTERS: &str = "abcdefghijklmnopqrstuvwxyz";

/// VM a disk is currently attached to
#[derive(Debug, Clone)]
struct VmBinding {
    vapp: String,
    vm: String,
}

/// Remote block volume
pub struct VcdDisk {
    cache: Arc<OrgCache>,
    run_uri: String,
    pub size_gb: u64,
    pub disk_type: Option<String>,
    pub mount_point: Option<String>,
    /// Ordinal of the disk within the run; names the volume and picks the
    /// guest device letter
    pub ordinal: usize,
    handle: Option<DiskHandle>,
    attached_to: Option<VmBinding>,
}

impl VcdDisk {
    pub fn new(
        cache: Arc<OrgCache>,
        run_uri: &str,
        ordinal: usize,
        size_gb: u64,
        disk_type: Option<String>,
        mount_point: Option<String>,
    ) -> Self {
        tracing::debug!(
            "Disk init: {} GiB, type {:?}, mount {:?}, ordinal {}",
            size_gb,
            disk_type,
            mount_point,
            ordinal
        );
        Self {
            cache,
            run_uri: run_uri.to_string(),
            size_gb,
            disk_type,
            mount_point,
            ordinal,
            handle: None,
            attached_to: None,
        }
    }

    pub fn volume_name(&self) -> String {
        format!("cloudrig-{}-{}", self.run_uri, self.ordinal)
    }

    /// Create the remote volume and store its handle.
    pub async fn create(&mut self) -> Result<()> {
        let name = self.volume_name();
        tracing::debug!("Disk create {:?}", name);
        let topology = self.cache.topology().await?;
        let storage_policy = self
            .cache
            .profile()
            .ok_or_else(|| {
                CloudError::InvalidConfig(
                    "no cloud profile selected; storage policy unknown".to_string(),
                )
            })?
            .storage_policy_name(self.disk_type.as_deref())?;
        let spec = DiskCreateSpec {
            name,
            size_bytes: self.size_gb * 1024u64.pow(3),
            storage_policy,
        };
        let api = self.cache.api();
        let (handle, task) = api.create_disk(&topology.compute_vdc, &spec).await?;
        api::await_task(api.as_ref(), &task, "disk creation").await?;
        self.handle = Some(handle);
        Ok(())
    }

    fn handle(&self) -> Result<&DiskHandle> {
        self.handle
            .as_ref()
            .ok_or_else(|| CloudError::InvalidConfig("disk has not been created".to_string()))
    }

    /// Attach to a VM and record the association.
    pub async fn attach(&mut self, vapp: &str, vm: &str) -> Result<()> {
        tracing::debug!("Disk attach to {}/{}", vapp, vm);
        let api = self.cache.api();
        let task = api.attach_disk(vapp, vm, self.handle()?).await?;
        api::await_task(api.as_ref(), &task, "disk attach").await?;
        self.attached_to = Some(VmBinding {
            vapp: vapp.to_string(),
            vm: vm.to_string(),
        });
        Ok(())
    }

    /// Detach from the recorded VM. Detaching a disk that was never
    /// attached is a precondition violation.
    pub async fn detach(&mut self) -> Result<()> {
        tracing::debug!("Disk detach");
        let binding = self.attached_to.clone().ok_or_else(|| {
            CloudError::InvalidConfig("detach called on a disk that is not attached".to_string())
        })?;
        let api = self.cache.api();
        let task = api
            .detach_disk(&binding.vapp, &binding.vm, self.handle()?)
            .await?;
        api::await_task(api.as_ref(), &task, "disk detach").await?;
        self.attached_to = None;
        Ok(())
    }

    /// Destroy the remote volume.
    pub async fn delete(&mut self) -> Result<()> {
        let topology = self.cache.topology().await?;
        let api = self.cache.api();
        api.refresh_vdc(&topology.compute_vdc).await?;
        let task = api.delete_disk(&topology.compute_vdc, self.handle()?).await?;
        api::await_task(api.as_ref(), &task, "disk deletion").await?;
        self.handle = None;
        Ok(())
    }

    /// Guest device path derived from the ordinal: 0 -> /dev/sda,
    /// 25 -> /dev/sdz. More than 26 disks is out of range.
    pub fn device_path(&self) -> Result<String> {
        device_path(self.ordinal)
    }
}

/// Deterministic ordinal-to-device-path mapping.
pub fn device_path(ordinal: usize) -> Result<String> {
    let letter = DEVICE_LETTERS.as_bytes().get(ordinal).ok_or_else(|| {
        CloudError::InvalidConfig(format!("disk ordinal {ordinal} beyond supported device letters"))
    })?;
    Ok(format!("/dev/sd{}", *letter as char))
}
