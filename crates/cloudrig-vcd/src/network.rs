//! Network and firewall lifecycle
//!
//! A [`VcdNetwork`] is one logical unit: the routed org-vDC network, its
//! DHCP pool, and the SNAT rule giving the subnet outbound access. Create
//! and delete are guarded per instance so concurrent callers sharing the
//! network perform each remote transition at most once. Two different
//! `VcdNetwork` values pointed at the same remote name are not mutually
//! protected.
//!
//! [`VcdFirewall`] manages per-VM DNAT port-forward rules with a bounded
//! retry on busy/auth faults. There is no firewall-wide teardown; DNAT
//! rules are not cleaned up by network deletion.

use crate::api::{self, DhcpPoolSpec, NatAction, NatRuleSpec, RoutedNetworkSpec};
use crate::cache::OrgCache;
use crate::select;
use cloudrig_cloud::{CloudError, Result, RetryConfig, retry};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Routed network plus DHCP pool and SNAT rule, managed as one unit
pub struct VcdNetwork {
    cache: Arc<OrgCache>,
    name: String,
    cidr: String,
    dhcp_range: String,
    default_gateway: String,
    created: Mutex<bool>,
}

impl VcdNetwork {
    /// Rejects any CIDR that is not a `.0/24` subnet before any remote
    /// call is made.
    pub fn new(cache: Arc<OrgCache>, run_uri: &str, cidr: &str) -> Result<Self> {
        let base = select::subnet_base(cidr)?;
        let dhcp_range = format!("{base}.100-{base}.199");
        let default_gateway = format!("{base}.1");
        tracing::debug!(
            "Network DHCP range {:?}, default gateway {:?}",
            dhcp_range,
            default_gateway
        );
        Ok(Self {
            cache,
            name: format!("cloudrig-network-{run_uri}"),
            cidr: cidr.to_string(),
            dhcp_range,
            default_gateway,
            created: Mutex::new(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cidr(&self) -> &str {
        &self.cidr
    }

    pub fn dhcp_range(&self) -> &str {
        &self.dhcp_range
    }

    pub fn default_gateway(&self) -> &str {
        &self.default_gateway
    }

    /// Create the network unit. No-op when already created; a failure
    /// partway leaves the flag clear and surfaces the error, without
    /// undoing remote steps that already ran.
    pub async fn create(&self) -> Result<()> {
        tracing::debug!("Network create, name {:?}", self.name);
        let mut created = self.created.lock().await;
        if *created {
            return Ok(());
        }
        self.do_create().await?;
        *created = true;
        Ok(())
    }

    async fn do_create(&self) -> Result<()> {
        let api = self.cache.api();
        let topology = self.cache.topology().await?;

        let spec = RoutedNetworkSpec {
            name: self.name.clone(),
            gateway_cidr: select::first_usable_ip(&self.cidr)?,
            edge_name: topology.edge.clone(),
            description: "Network created by cloudrig".to_string(),
            shared: true,
        };
        let task = api.create_routed_network(&topology.network_vdc, &spec).await?;
        api::await_task(api.as_ref(), &task, "routed network creation").await?;

        self.create_dhcp_pool(&topology.edge).await?;
        self.create_snat(&topology.edge).await?;
        Ok(())
    }

    async fn create_dhcp_pool(&self, edge: &str) -> Result<()> {
        tracing::debug!("Network create DHCP pool");
        let (primary_server, secondary_server) = self
            .cache
            .profile()
            .map(|p| p.recommended_dnses())
            .unwrap_or(("8.8.8.8".to_string(), "8.8.4.4".to_string()));
        let pool = DhcpPoolSpec {
            ip_range: self.dhcp_range.clone(),
            default_gateway: self.default_gateway.clone(),
            primary_server,
            secondary_server,
        };
        self.cache.api().add_dhcp_pool(edge, &pool).await?;
        Ok(())
    }

    async fn create_snat(&self, edge: &str) -> Result<()> {
        let description = format!("{}-snat", self.name);
        tracing::info!("Create SNAT rule {}", description);
        let rule = NatRuleSpec {
            action: NatAction::Snat,
            original_address: self.cidr.clone(),
            translated_address: self.select_public_address().await?,
            description,
            protocol: "tcp".to_string(),
            original_port: None,
            translated_port: None,
            logging_enabled: true,
        };
        self.cache.api().add_nat_rule(edge, &rule).await?;
        Ok(())
    }

    /// First public IP allocated to the external network on the edge.
    pub async fn select_public_address(&self) -> Result<String> {
        let topology = self.cache.topology().await?;
        let allocations = self
            .cache
            .api()
            .external_ip_allocations(&topology.edge)
            .await?;
        let ips = allocations
            .iter()
            .find(|a| a.network == topology.external_network)
            .map(|a| a.ip_addresses.as_slice())
            .unwrap_or(&[]);
        tracing::debug!(
            "External network {} has IPs: {:?}",
            topology.external_network,
            ips
        );
        ips.first().cloned().ok_or_else(|| {
            CloudError::ResourceUnavailable("no public IP available on external network".to_string())
        })
    }

    /// Delete the network unit: SNAT rule, DHCP pool, then the routed
    /// network, in that order. No-op when not created.
    pub async fn delete(&self) -> Result<()> {
        tracing::info!("Network delete, name {:?}", self.name);
        let mut created = self.created.lock().await;
        if !*created {
            return Ok(());
        }
        self.do_delete().await?;
        *created = false;
        Ok(())
    }

    async fn do_delete(&self) -> Result<()> {
        let api = self.cache.api();
        let topology = self.cache.topology().await?;

        // Refresh remote state first; a stale session gets one
        // re-authentication, not a recursive retry
        if let Err(fault) = api.refresh_vdc(&topology.network_vdc).await {
            match CloudError::from(fault) {
                CloudError::AuthExpired(_) => {
                    tracing::info!("Re-authenticating");
                    self.cache.reauthenticate().await?;
                    api.refresh_vdc(&topology.network_vdc).await?;
                }
                err => return Err(err),
            }
        }

        self.delete_snat(&topology.edge).await?;
        self.delete_dhcp_pool(&topology.edge).await?;

        let task = api
            .delete_routed_network(&topology.network_vdc, &self.name, true)
            .await?;
        api::await_task(api.as_ref(), &task, "routed network deletion").await?;
        Ok(())
    }

    async fn delete_snat(&self, edge: &str) -> Result<()> {
        let api = self.cache.api();
        let description = format!("{}-snat", self.name);
        for rule in api.list_nat_rules(edge).await? {
            if rule.description == description {
                tracing::info!("Delete NAT rule {}", rule.id);
                api.delete_nat_rule(edge, &rule.id).await?;
            }
        }
        Ok(())
    }

    async fn delete_dhcp_pool(&self, edge: &str) -> Result<()> {
        let api = self.cache.api();
        for pool in api.list_dhcp_pools(edge).await? {
            if pool.ip_range == self.dhcp_range {
                tracing::info!("Remove DHCP pool {} ({})", pool.id, pool.ip_range);
                api.delete_dhcp_pool(edge, &pool.id).await?;
            }
        }
        Ok(())
    }
}

/// Inbound port-forward request for one VM
#[derive(Debug, Clone)]
pub struct PortForward {
    pub external_address: String,
    pub internal_address: String,
    /// Ordinal of the VM within the run, used in the rule description
    pub instance: u32,
    pub external_port: u16,
    pub internal_port: u16,
}

/// Per-VM DNAT rule manager
pub struct VcdFirewall {
    cache: Arc<OrgCache>,
    run_uri: String,
    retry_config: RetryConfig,
}

impl VcdFirewall {
    pub fn new(cache: Arc<OrgCache>, run_uri: &str) -> Self {
        Self {
            cache,
            run_uri: run_uri.to_string(),
            retry_config: RetryConfig::default(),
        }
    }

    pub fn with_retry_config(mut self, retry_config: RetryConfig) -> Self {
        self.retry_config = retry_config;
        self
    }

    /// Create a DNAT rule forwarding `external_port` on the VM's public
    /// address to `internal_port` on its internal address.
    ///
    /// Up to 3 attempts: an expired session is re-authenticated and
    /// retried, a busy edge is retried, anything else is fatal.
    pub async fn create_port_forwarding(&self, forward: &PortForward) -> Result<()> {
        tracing::info!(
            "Firewall port forwarding {}:{} -> {}:{}",
            forward.external_address,
            forward.external_port,
            forward.internal_address,
            forward.internal_port
        );
        let topology = self.cache.topology().await?;
        let rule = NatRuleSpec {
            action: NatAction::Dnat,
            original_address: forward.external_address.clone(),
            translated_address: forward.internal_address.clone(),
            description: format!(
                "cloudrig-{}-{}-{}-{}",
                self.run_uri, forward.instance, forward.external_port, forward.internal_port
            ),
            protocol: "tcp".to_string(),
            original_port: Some(forward.external_port),
            translated_port: Some(forward.internal_port),
            logging_enabled: true,
        };

        retry(&self.retry_config, || {
            let api = self.cache.api();
            let edge = topology.edge.clone();
            let rule = rule.clone();
            async move {
                match api.add_nat_rule(&edge, &rule).await {
                    Ok(()) => Ok(()),
                    Err(fault) => {
                        let err = CloudError::from(fault);
                        if let CloudError::AuthExpired(_) = &err {
                            self.cache.reauthenticate().await?;
                        }
                        Err(err)
                    }
                }
            }
        })
        .await?;

        tracing::debug!("Firewall port forwarding done");
        Ok(())
    }

    /// Firewall-wide teardown is not implemented; DNAT cleanup is an
    /// acknowledged gap.
    pub fn disallow_all_ports(&self) {}
}
