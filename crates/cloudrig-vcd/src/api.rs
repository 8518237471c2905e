//! Control-plane API boundary
//!
//! The Cloud Director management API is consumed through the [`VcdApi`]
//! trait so that the orchestration layer never depends on a transport.
//! Long-running operations hand back a [`TaskHandle`] that the caller polls
//! to a terminal [`TaskOutcome`] via [`VcdApi::wait_for_task`]; the
//! [`await_task`] helper folds a failed outcome into the shared error
//! taxonomy.

use async_trait::async_trait;
use cloudrig_cloud::{CloudError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Media type declared by proper vApp templates in catalog items.
pub const VAPP_TEMPLATE_MEDIA_TYPE: &str = "application/vnd.vmware.vcloud.vAppTemplate+xml";

/// Minor error code reported by the control plane when an entity is busy
/// completing another operation.
pub const BUSY_ENTITY: &str = "BUSY_ENTITY";

/// Faults raised at the control-plane boundary
#[derive(Error, Debug, Clone)]
pub enum ApiFault {
    #[error("unauthorized")]
    Unauthorized,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {message}")]
    BadRequest {
        message: String,
        /// Machine-readable minor code, e.g. `BUSY_ENTITY`
        minor_code: Option<String>,
    },

    #[error("{0}")]
    Other(String),
}

impl ApiFault {
    pub fn is_busy(&self) -> bool {
        matches!(self, ApiFault::BadRequest { minor_code: Some(code), .. } if code == BUSY_ENTITY)
    }
}

impl From<ApiFault> for CloudError {
    fn from(fault: ApiFault) -> Self {
        match fault {
            ApiFault::Unauthorized => CloudError::AuthExpired("session rejected".to_string()),
            ApiFault::NotFound(what) => CloudError::NotFound(what),
            ApiFault::BadRequest { message, minor_code } => {
                if minor_code.as_deref() == Some(BUSY_ENTITY) {
                    CloudError::Busy(message)
                } else {
                    CloudError::Api(message)
                }
            }
            ApiFault::Other(message) => CloudError::Api(message),
        }
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiFault>;

/// Credential triple used to log in to the organization
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub user: String,
    pub org: String,
    pub password: String,
}

/// Organization summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrgInfo {
    pub name: String,
}

/// Virtual data center summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VdcInfo {
    pub name: String,
}

/// One capacity axis of a vDC, in the units the control plane reports
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapacityEntry {
    pub allocated: f64,
    pub limit: f64,
    pub used: f64,
    /// "GB", "MB", "kB", "GHz" or "MHz"
    pub units: String,
}

/// Compute capacity of a vDC
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputeCapacity {
    pub memory: CapacityEntry,
    pub cpu: CapacityEntry,
}

/// Edge gateway summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeGateway {
    pub name: String,
}

/// External network and the public IPs allocated to it on an edge.
///
/// Order matches control-plane enumeration order; selection heuristics are
/// first-match and therefore depend on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalNetworkAllocation {
    pub network: String,
    pub ip_addresses: Vec<String>,
}

/// DHCP pool to provision on an edge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DhcpPoolSpec {
    pub ip_range: String,
    pub default_gateway: String,
    pub primary_server: String,
    pub secondary_server: String,
}

/// Existing DHCP pool on an edge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DhcpPoolInfo {
    pub id: String,
    pub ip_range: String,
}

/// NAT rule direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NatAction {
    Snat,
    Dnat,
}

impl std::fmt::Display for NatAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NatAction::Snat => write!(f, "snat"),
            NatAction::Dnat => write!(f, "dnat"),
        }
    }
}

/// NAT rule to add on an edge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NatRuleSpec {
    pub action: NatAction,
    pub original_address: String,
    pub translated_address: String,
    pub description: String,
    pub protocol: String,
    pub original_port: Option<u16>,
    pub translated_port: Option<u16>,
    pub logging_enabled: bool,
}

/// Existing NAT rule on an edge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NatRuleInfo {
    pub id: String,
    pub action: NatAction,
    pub description: String,
}

/// Routed org-vDC network to create
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutedNetworkSpec {
    pub name: String,
    /// First usable IP of the subnet in CIDR notation, e.g. `10.0.5.1/24`
    pub gateway_cidr: String,
    pub edge_name: String,
    pub description: String,
    pub shared: bool,
}

/// Catalog item summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogItem {
    pub name: String,
    pub entity_type: String,
}

/// vApp instantiation request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VappConfig {
    pub name: String,
    pub hostname: String,
    pub vm_name: String,
    pub catalog: String,
    pub template: String,
    pub network: String,
    pub power_on: bool,
    pub deploy: bool,
    pub cust_script: String,
    pub storage_policy: String,
    pub network_adapter_type: String,
}

/// Existing vApp and the VMs it contains
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VappInfo {
    pub name: String,
    pub vm_names: Vec<String>,
}

/// Network interface as reported by the control plane
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NicInfo {
    pub ip_address: Option<String>,
    /// Extra fields the control plane reports (adapter type, MAC, ...)
    #[serde(default)]
    pub attributes: HashMap<String, serde_json::Value>,
}

/// Guest customization phase of a VM
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GcStatus {
    /// Customization has not run yet (wire value `GC_PENDING`)
    Pending,
    Complete,
    Failed,
}

/// Independent disk creation request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskCreateSpec {
    pub name: String,
    pub size_bytes: u64,
    pub storage_policy: String,
}

/// Handle to a created independent disk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskHandle {
    pub id: String,
}

/// Handle to a long-running control-plane task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskHandle {
    pub id: String,
}

/// Terminal state of a control-plane task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskOutcome {
    Success,
    Failure(String),
}

/// Authenticated client boundary to the Cloud Director management API.
///
/// Implementations own the transport (HTTP, mock, ...). All methods map a
/// remote call one-to-one; none of them encode orchestration decisions.
#[async_trait]
pub trait VcdApi: Send + Sync {
    // Session
    async fn authenticate(&self, credentials: &Credentials) -> ApiResult<()>;
    async fn organization(&self) -> ApiResult<OrgInfo>;

    // vDCs
    async fn list_vdcs(&self) -> ApiResult<Vec<VdcInfo>>;
    async fn vdc_capacity(&self, vdc: &str) -> ApiResult<ComputeCapacity>;
    /// Reload cached vDC state. Required before mutations because the
    /// control plane invalidates resource tags after any change.
    async fn refresh_vdc(&self, vdc: &str) -> ApiResult<()>;

    // Edges and networking
    async fn list_edge_gateways(&self, vdc: &str) -> ApiResult<Vec<EdgeGateway>>;
    async fn external_ip_allocations(&self, edge: &str)
    -> ApiResult<Vec<ExternalNetworkAllocation>>;
    async fn add_dhcp_pool(&self, edge: &str, pool: &DhcpPoolSpec) -> ApiResult<()>;
    async fn list_dhcp_pools(&self, edge: &str) -> ApiResult<Vec<DhcpPoolInfo>>;
    async fn delete_dhcp_pool(&self, edge: &str, pool_id: &str) -> ApiResult<()>;
    async fn add_nat_rule(&self, edge: &str, rule: &NatRuleSpec) -> ApiResult<()>;
    async fn list_nat_rules(&self, edge: &str) -> ApiResult<Vec<NatRuleInfo>>;
    async fn delete_nat_rule(&self, edge: &str, rule_id: &str) -> ApiResult<()>;
    async fn create_routed_network(
        &self,
        vdc: &str,
        spec: &RoutedNetworkSpec,
    ) -> ApiResult<TaskHandle>;
    async fn delete_routed_network(&self, vdc: &str, name: &str, force: bool)
    -> ApiResult<TaskHandle>;

    // Catalogs
    async fn list_catalogs(&self) -> ApiResult<Vec<String>>;
    async fn list_catalog_items(&self, catalog: &str) -> ApiResult<Vec<String>>;
    async fn catalog_item(&self, catalog: &str, item: &str) -> ApiResult<CatalogItem>;

    // vApps and VMs
    async fn instantiate_vapp(&self, vdc: &str, config: &VappConfig) -> ApiResult<TaskHandle>;
    async fn get_vapp(&self, vdc: &str, name: &str) -> ApiResult<VappInfo>;
    async fn delete_vapp(&self, vdc: &str, name: &str, force: bool) -> ApiResult<TaskHandle>;
    async fn refresh_vm(&self, vapp: &str, vm: &str) -> ApiResult<()>;
    async fn modify_cpu(&self, vapp: &str, vm: &str, cpus: u32) -> ApiResult<TaskHandle>;
    async fn modify_memory(&self, vapp: &str, vm: &str, memory_mb: u64) -> ApiResult<TaskHandle>;
    /// Write the guest customization script. Enablement is a separate
    /// call; the control plane does not reliably apply both in one step.
    async fn set_guest_customization(
        &self,
        vapp: &str,
        vm: &str,
        script: &str,
    ) -> ApiResult<TaskHandle>;
    async fn enable_guest_customization(
        &self,
        vapp: &str,
        vm: &str,
        enabled: bool,
    ) -> ApiResult<TaskHandle>;
    async fn set_hostname(&self, vapp: &str, vm: &str, hostname: &str) -> ApiResult<TaskHandle>;
    /// Plain power-on skips customization for some images; this variant
    /// forces it.
    async fn power_on_and_force_recustomization(
        &self,
        vapp: &str,
        vm: &str,
    ) -> ApiResult<TaskHandle>;
    async fn guest_customization_status(&self, vapp: &str, vm: &str) -> ApiResult<GcStatus>;
    async fn list_nics(&self, vapp: &str, vm: &str) -> ApiResult<Vec<NicInfo>>;

    // Independent disks
    async fn create_disk(
        &self,
        vdc: &str,
        spec: &DiskCreateSpec,
    ) -> ApiResult<(DiskHandle, TaskHandle)>;
    async fn attach_disk(&self, vapp: &str, vm: &str, disk: &DiskHandle) -> ApiResult<TaskHandle>;
    async fn detach_disk(&self, vapp: &str, vm: &str, disk: &DiskHandle) -> ApiResult<TaskHandle>;
    async fn delete_disk(&self, vdc: &str, disk: &DiskHandle) -> ApiResult<TaskHandle>;

    // Tasks
    async fn wait_for_task(&self, task: &TaskHandle) -> ApiResult<TaskOutcome>;
}

/// Block on a control-plane task and fold a failure outcome into the error
/// taxonomy. `what` names the operation for the error message.
pub async fn await_task(api: &dyn VcdApi, task: &TaskHandle, what: &str) -> Result<()> {
    let outcome = api.wait_for_task(task).await?;
    tracing::debug!("Task {} for {} finished: {:?}", task.id, what, outcome);
    match outcome {
        TaskOutcome::Success => Ok(()),
        TaskOutcome::Failure(reason) => {
            Err(CloudError::TaskFailed(format!("{what}: {reason}")))
        }
    }
}
