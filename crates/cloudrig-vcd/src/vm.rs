//! Virtual machine lifecycle
//!
//! The top-level state machine: resolve dependencies (network, firewall),
//! instantiate the vApp from a catalog template, apply compute/memory
//! overrides, inject guest customization, power on with forced
//! re-customization, wait for an internal address, and open the inbound
//! SSH port mapping. Failure at any step surfaces to the caller; partially
//! created remote state is reclaimed only by an explicit `delete`.

use crate::api::{self, GcStatus, VappConfig, VcdApi};
use crate::cache::OrgCache;
use crate::guest;
use crate::network::{PortForward, VcdFirewall, VcdNetwork};
use crate::select;
use cloudrig_cloud::{CloudError, Result, RetryConfig, retry};
use std::sync::Arc;
use std::time::Duration;

/// Polling intervals and bounds for VM provisioning.
///
/// Injectable so tests run without wall-clock delays. The customization
/// wait is explicitly bounded; exhausting it is a `Timeout`.
#[derive(Debug, Clone)]
pub struct PollTuning {
    pub customization_interval: Duration,
    pub customization_max_attempts: u32,
    pub ip_interval: Duration,
    pub ip_max_attempts: u32,
}

impl Default for PollTuning {
    fn default() -> Self {
        Self {
            customization_interval: Duration::from_secs(2),
            customization_max_attempts: 150,
            ip_interval: Duration::from_secs(5),
            ip_max_attempts: 40,
        }
    }
}

impl PollTuning {
    /// No sleeps between polls. Test use.
    pub fn immediate() -> Self {
        Self {
            customization_interval: Duration::ZERO,
            ip_interval: Duration::ZERO,
            ..Self::default()
        }
    }
}

/// Caller-supplied VM description
#[derive(Debug, Clone)]
pub struct VmSpec {
    pub name: String,
    /// OS identifier, e.g. `ubuntu1804`
    pub os_id: String,
    pub user_name: String,
    /// SSH public key material installed for `user_name`
    pub ssh_public_key: String,
    pub cpus: Option<u32>,
    pub memory_mb: Option<u64>,
    /// Ordinal of the VM within the run
    pub instance: u32,
}

/// One Cloud Director virtual machine and its vApp container
pub struct VcdVirtualMachine {
    cache: Arc<OrgCache>,
    network: Arc<VcdNetwork>,
    firewall: Arc<VcdFirewall>,
    spec: VmSpec,
    tuning: PollTuning,
    retry_config: RetryConfig,

    /// Name of the bound VM inside the vApp, set once instantiated
    vm_name: Option<String>,
    internal_ip: Option<String>,
    external_ip: Option<String>,
    ssh_port: Option<u16>,
}

impl VcdVirtualMachine {
    pub fn new(
        cache: Arc<OrgCache>,
        spec: VmSpec,
        network: Arc<VcdNetwork>,
        firewall: Arc<VcdFirewall>,
    ) -> Self {
        Self {
            cache,
            network,
            firewall,
            spec,
            tuning: PollTuning::default(),
            retry_config: RetryConfig::default(),
            vm_name: None,
            internal_ip: None,
            external_ip: None,
            ssh_port: None,
        }
    }

    pub fn with_tuning(mut self, tuning: PollTuning) -> Self {
        self.tuning = tuning;
        self
    }

    pub fn with_retry_config(mut self, retry_config: RetryConfig) -> Self {
        self.retry_config = retry_config;
        self
    }

    /// The vApp is named after the VM.
    pub fn vapp_name(&self) -> &str {
        &self.spec.name
    }

    pub fn internal_ip(&self) -> Option<&str> {
        self.internal_ip.as_deref()
    }

    pub fn external_ip(&self) -> Option<&str> {
        self.external_ip.as_deref()
    }

    pub fn ssh_port(&self) -> Option<u16> {
        self.ssh_port
    }

    /// Make sure shared dependencies exist. Network creation is
    /// idempotent, so concurrent VMs of one run can all call this.
    pub async fn create_dependencies(&self) -> Result<()> {
        tracing::info!("VM dependencies: create network");
        self.network.create().await?;
        tracing::debug!("VM dependencies: create network done");
        Ok(())
    }

    /// Instantiate, configure, and power on the VM, blocking until guest
    /// customization has started running.
    pub async fn create(&mut self) -> Result<()> {
        tracing::info!("Create VM {}", self.spec.name);
        let api = self.cache.api();
        let topology = self.cache.topology().await?;

        let (catalog, template) = select::select_catalog_image(
            api.as_ref(),
            &topology.org,
            self.cache.profile(),
            &self.spec.os_id,
        )
        .await?;
        let storage_policy = self
            .cache
            .profile()
            .ok_or_else(|| {
                CloudError::InvalidConfig(
                    "no cloud profile selected; storage policy unknown".to_string(),
                )
            })?
            .storage_policy_name(None)?;
        let cust_script = guest::customization_script(
            &self.spec.os_id,
            &self.spec.user_name,
            &self.spec.name,
            &self.spec.ssh_public_key,
        )?;

        let config = VappConfig {
            name: self.spec.name.clone(),
            hostname: self.spec.name.clone(),
            vm_name: self.spec.name.clone(),
            catalog,
            template,
            network: self.network.name().to_string(),
            power_on: false,
            deploy: false,
            cust_script: cust_script.clone(),
            storage_policy,
            // Instantiating without an adapter type yields a PCNet32 NIC,
            // which some guests cannot drive
            network_adapter_type: "VMXNET3".to_string(),
        };

        api.refresh_vdc(&topology.compute_vdc).await?;
        let task = api.instantiate_vapp(&topology.compute_vdc, &config).await?;
        tracing::debug!("Waiting for vApp instantiation");
        api::await_task(api.as_ref(), &task, "vApp instantiation").await?;

        let vapp = api.get_vapp(&topology.compute_vdc, &self.spec.name).await?;
        let vm_name = vapp.vm_names.first().cloned().ok_or_else(|| {
            CloudError::Api(format!("vApp {} contains no VMs", vapp.name))
        })?;
        self.vm_name = Some(vm_name.clone());

        self.configure(api.as_ref(), &vm_name, &cust_script).await?;
        self.power_on(api.as_ref(), &vm_name).await?;
        Ok(())
    }

    /// Apply overrides and customization. The control plane invalidates
    /// cached resource tags after every change, so each mutation reloads
    /// remote state first.
    async fn configure(&self, api: &dyn VcdApi, vm: &str, cust_script: &str) -> Result<()> {
        tracing::debug!("Updating VM config");
        let vapp = self.vapp_name();

        if let Some(cpus) = self.spec.cpus {
            api.refresh_vm(vapp, vm).await?;
            let task = api.modify_cpu(vapp, vm, cpus).await?;
            api::await_task(api, &task, "cpu override").await?;
        }
        if let Some(memory_mb) = self.spec.memory_mb {
            api.refresh_vm(vapp, vm).await?;
            let task = api.modify_memory(vapp, vm, memory_mb).await?;
            api::await_task(api, &task, "memory override").await?;
        }

        // Script content and enablement are two separate calls; the
        // control plane does not reliably apply both in one
        api.refresh_vm(vapp, vm).await?;
        let task = api.set_guest_customization(vapp, vm, cust_script).await?;
        api::await_task(api, &task, "guest customization script").await?;

        api.refresh_vm(vapp, vm).await?;
        let task = api.enable_guest_customization(vapp, vm, true).await?;
        api::await_task(api, &task, "guest customization enable").await?;

        api.refresh_vm(vapp, vm).await?;
        let task = api.set_hostname(vapp, vm, &self.spec.name).await?;
        api::await_task(api, &task, "hostname").await?;
        Ok(())
    }

    async fn power_on(&self, api: &dyn VcdApi, vm: &str) -> Result<()> {
        tracing::info!("Starting VM {}", self.spec.name);
        let vapp = self.vapp_name();

        // Plain power-on skips customization for some images
        let task = api.power_on_and_force_recustomization(vapp, vm).await?;
        api::await_task(api, &task, "power on").await?;

        for _ in 0..self.tuning.customization_max_attempts {
            let status = api.guest_customization_status(vapp, vm).await?;
            if status != GcStatus::Pending {
                tracing::info!("VM {} started, customization {:?}", self.spec.name, status);
                return Ok(());
            }
            tokio::time::sleep(self.tuning.customization_interval).await;
        }
        Err(CloudError::Timeout(format!(
            "guest customization of {} still pending after {} attempts",
            self.spec.name, self.tuning.customization_max_attempts
        )))
    }

    fn bound_vm(&self) -> Result<&str> {
        self.vm_name
            .as_deref()
            .ok_or_else(|| CloudError::InvalidConfig("VM has not been created".to_string()))
    }

    /// Wait for the guest to report an IPv4 address on any NIC. IPv6
    /// addresses are skipped with a warning. Exhausting the attempt budget
    /// is a fatal provisioning failure, not a retryable one.
    pub async fn wait_internal_ip(&self) -> Result<String> {
        let api = self.cache.api();
        let vapp = self.vapp_name();
        let vm = self.bound_vm()?;

        for attempt in 0..self.tuning.ip_max_attempts {
            api.refresh_vm(vapp, vm).await?;
            let nics = api.list_nics(vapp, vm).await?;
            tracing::debug!("Checking NICs (attempt {}): {:?}", attempt, nics);
            for nic in &nics {
                if let Some(ip) = &nic.ip_address {
                    if ip.contains(':') {
                        tracing::warn!(
                            "VM {} got IPv6 address {} instead of IPv4",
                            self.spec.name,
                            ip
                        );
                        continue;
                    }
                    tracing::info!("VM {} got internal IP {}", self.spec.name, ip);
                    return Ok(ip.clone());
                }
            }
            tokio::time::sleep(self.tuning.ip_interval).await;
        }
        Err(CloudError::Timeout(format!(
            "VM {} did not get an IPv4 address",
            self.spec.name
        )))
    }

    /// Record addresses and open the inbound SSH mapping.
    pub async fn post_create(&mut self) -> Result<()> {
        let internal_ip = self.wait_internal_ip().await?;
        let external_ip = self.network.select_public_address().await?;
        let ssh_port = select::select_external_tcp_port();

        self.firewall
            .create_port_forwarding(&PortForward {
                external_address: external_ip.clone(),
                internal_address: internal_ip.clone(),
                instance: self.spec.instance,
                external_port: ssh_port,
                internal_port: 22,
            })
            .await?;

        self.internal_ip = Some(internal_ip);
        self.external_ip = Some(external_ip);
        self.ssh_port = Some(ssh_port);
        Ok(())
    }

    /// Delete the vApp. Absence counts as success; a stale session is
    /// re-authenticated and the deletion retried, bounded by the retry
    /// configuration.
    pub async fn delete(&self) -> Result<()> {
        tracing::info!("Delete VM {}", self.spec.name);
        let topology = self.cache.topology().await?;

        retry(&self.retry_config, || {
            let api = self.cache.api();
            let vdc = topology.compute_vdc.clone();
            let name = self.spec.name.clone();
            async move {
                let task = match api.delete_vapp(&vdc, &name, true).await {
                    Ok(task) => task,
                    Err(fault) => {
                        let err = CloudError::from(fault);
                        return match err {
                            CloudError::NotFound(_) => Ok(()),
                            CloudError::AuthExpired(_) => {
                                self.cache.reauthenticate().await?;
                                Err(err)
                            }
                            other => Err(other),
                        };
                    }
                };
                api::await_task(api.as_ref(), &task, "vApp deletion").await
            }
        })
        .await
    }

    /// Whether the vApp currently exists. Absence is a normal `false`,
    /// not an error.
    pub async fn exists(&self) -> Result<bool> {
        let topology = self.cache.topology().await?;
        match self
            .cache
            .api()
            .get_vapp(&topology.compute_vdc, &self.spec.name)
            .await
        {
            Ok(_) => Ok(true),
            Err(fault) => match CloudError::from(fault) {
                CloudError::NotFound(_) => Ok(false),
                err => Err(err),
            },
        }
    }
}
