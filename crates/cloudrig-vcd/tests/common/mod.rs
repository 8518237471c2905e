#![allow(dead_code)]

//! Shared test harness: an in-memory control plane
//!
//! `MockApi` implements `VcdApi` against hash maps, records every call,
//! and can be told to fail specific operations a number of times so tests
//! can exercise retry and re-authentication paths. All list methods
//! return vectors in insertion order, which pins the enumeration order
//! the selection heuristics depend on.

use async_trait::async_trait;
use cloudrig_vcd::api::*;
use cloudrig_vcd::profiles::ProfileCatalog;
use cloudrig_vcd::settings::VcdSettings;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

pub const RUN_URI: &str = "testrun";

#[derive(Default)]
pub struct MockApi {
    calls: Mutex<Vec<String>>,

    pub vdcs: Vec<VdcInfo>,
    pub capacities: HashMap<String, ComputeCapacity>,
    /// vDC name -> edges
    pub edges: HashMap<String, Vec<EdgeGateway>>,
    /// edge name -> external network allocations
    pub allocations: HashMap<String, Vec<ExternalNetworkAllocation>>,
    pub catalogs: Vec<String>,
    /// catalog name -> item names
    pub catalog_items: HashMap<String, Vec<String>>,
    /// (catalog, item) -> entity type; defaults to the template media type
    pub entity_types: HashMap<(String, String), String>,

    vapps: Mutex<HashMap<String, VappInfo>>,
    nat_rules: Mutex<Vec<NatRuleInfo>>,
    dhcp_pools: Mutex<Vec<DhcpPoolInfo>>,
    disks: Mutex<Vec<DiskHandle>>,
    pub disk_specs: Mutex<Vec<DiskCreateSpec>>,
    /// Queued NIC listings; the last entry repeats once the queue drains
    nic_responses: Mutex<VecDeque<Vec<NicInfo>>>,

    pub auth_calls: AtomicU32,
    /// Fail `authenticate` with Unauthorized this many times
    pub auth_failures: AtomicU32,
    /// Report a Failure outcome from `wait_for_task` this many times
    pub task_failures: AtomicU32,
    /// Fail `add_nat_rule` with BUSY_ENTITY this many times
    pub nat_busy_failures: AtomicU32,
    /// Fail `add_nat_rule` with Unauthorized this many times
    pub nat_unauthorized_failures: AtomicU32,
    /// Fail `refresh_vdc` with Unauthorized this many times
    pub refresh_unauthorized_failures: AtomicU32,
    /// Report customization as pending this many times before completing
    pub gc_pending_polls: AtomicU32,

    next_id: AtomicU32,
}

impl MockApi {
    /// An organization with two vDCs: `vdc-big` (most available capacity,
    /// hosts `edge-1` fronting `extnet-internet`) and `vdc-small`.
    pub fn with_basic_topology() -> Self {
        let mut api = Self::default();
        api.vdcs = vec![
            VdcInfo { name: "vdc-small".to_string() },
            VdcInfo { name: "vdc-big".to_string() },
        ];
        api.capacities.insert("vdc-small".to_string(), capacity(1_000.0, 1_000.0));
        api.capacities.insert("vdc-big".to_string(), capacity(100_000.0, 100_000.0));
        api.edges.insert(
            "vdc-big".to_string(),
            vec![EdgeGateway { name: "edge-1".to_string() }],
        );
        api.allocations.insert(
            "edge-1".to_string(),
            vec![ExternalNetworkAllocation {
                network: "extnet-internet".to_string(),
                ip_addresses: vec!["203.0.113.10".to_string(), "203.0.113.11".to_string()],
            }],
        );
        api.catalogs = vec!["public".to_string()];
        api.catalog_items.insert(
            "public".to_string(),
            vec![
                "CentOS-8-Minimal".to_string(),
                "Ubuntu Server 18.04 LTS 64bit".to_string(),
            ],
        );
        api
    }

    pub fn ipv4_nic(ip: &str) -> Vec<NicInfo> {
        vec![NicInfo {
            ip_address: Some(ip.to_string()),
            attributes: HashMap::new(),
        }]
    }

    pub fn push_nics(&self, nics: Vec<NicInfo>) {
        self.nic_responses.lock().unwrap().push_back(nics);
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_matching(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    pub fn nat_rules(&self) -> Vec<NatRuleInfo> {
        self.nat_rules.lock().unwrap().clone()
    }

    pub fn dhcp_pools(&self) -> Vec<DhcpPoolInfo> {
        self.dhcp_pools.lock().unwrap().clone()
    }

    fn next_id(&self) -> String {
        format!("id-{}", self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    fn task(&self) -> TaskHandle {
        TaskHandle { id: self.next_id() }
    }

    fn consume(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

pub fn capacity(mem_avail: f64, cpu_avail: f64) -> ComputeCapacity {
    ComputeCapacity {
        memory: CapacityEntry {
            allocated: mem_avail,
            limit: 0.0,
            used: 0.0,
            units: "MB".to_string(),
        },
        cpu: CapacityEntry {
            allocated: cpu_avail,
            limit: 0.0,
            used: 0.0,
            units: "MHz".to_string(),
        },
    }
}

#[async_trait]
impl VcdApi for MockApi {
    async fn authenticate(&self, _credentials: &Credentials) -> ApiResult<()> {
        self.record("authenticate");
        self.auth_calls.fetch_add(1, Ordering::SeqCst);
        if Self::consume(&self.auth_failures) {
            return Err(ApiFault::Unauthorized);
        }
        Ok(())
    }

    async fn organization(&self) -> ApiResult<OrgInfo> {
        self.record("organization");
        Ok(OrgInfo { name: "perf-org".to_string() })
    }

    async fn list_vdcs(&self) -> ApiResult<Vec<VdcInfo>> {
        self.record("list_vdcs");
        Ok(self.vdcs.clone())
    }

    async fn vdc_capacity(&self, vdc: &str) -> ApiResult<ComputeCapacity> {
        self.record(format!("vdc_capacity:{vdc}"));
        self.capacities
            .get(vdc)
            .cloned()
            .ok_or_else(|| ApiFault::NotFound(vdc.to_string()))
    }

    async fn refresh_vdc(&self, vdc: &str) -> ApiResult<()> {
        self.record(format!("refresh_vdc:{vdc}"));
        if Self::consume(&self.refresh_unauthorized_failures) {
            return Err(ApiFault::Unauthorized);
        }
        Ok(())
    }

    async fn list_edge_gateways(&self, vdc: &str) -> ApiResult<Vec<EdgeGateway>> {
        self.record(format!("list_edge_gateways:{vdc}"));
        Ok(self.edges.get(vdc).cloned().unwrap_or_default())
    }

    async fn external_ip_allocations(
        &self,
        edge: &str,
    ) -> ApiResult<Vec<ExternalNetworkAllocation>> {
        self.record(format!("external_ip_allocations:{edge}"));
        Ok(self.allocations.get(edge).cloned().unwrap_or_default())
    }

    async fn add_dhcp_pool(&self, edge: &str, pool: &DhcpPoolSpec) -> ApiResult<()> {
        self.record(format!("add_dhcp_pool:{edge}"));
        self.dhcp_pools.lock().unwrap().push(DhcpPoolInfo {
            id: self.next_id(),
            ip_range: pool.ip_range.clone(),
        });
        Ok(())
    }

    async fn list_dhcp_pools(&self, edge: &str) -> ApiResult<Vec<DhcpPoolInfo>> {
        self.record(format!("list_dhcp_pools:{edge}"));
        Ok(self.dhcp_pools.lock().unwrap().clone())
    }

    async fn delete_dhcp_pool(&self, edge: &str, pool_id: &str) -> ApiResult<()> {
        self.record(format!("delete_dhcp_pool:{edge}:{pool_id}"));
        self.dhcp_pools.lock().unwrap().retain(|p| p.id != pool_id);
        Ok(())
    }

    async fn add_nat_rule(&self, edge: &str, rule: &NatRuleSpec) -> ApiResult<()> {
        self.record(format!("add_nat_rule:{edge}:{}", rule.action));
        if Self::consume(&self.nat_unauthorized_failures) {
            return Err(ApiFault::Unauthorized);
        }
        if Self::consume(&self.nat_busy_failures) {
            return Err(ApiFault::BadRequest {
                message: "the entity is busy completing an operation".to_string(),
                minor_code: Some(BUSY_ENTITY.to_string()),
            });
        }
        self.nat_rules.lock().unwrap().push(NatRuleInfo {
            id: self.next_id(),
            action: rule.action,
            description: rule.description.clone(),
        });
        Ok(())
    }

    async fn list_nat_rules(&self, edge: &str) -> ApiResult<Vec<NatRuleInfo>> {
        self.record(format!("list_nat_rules:{edge}"));
        Ok(self.nat_rules.lock().unwrap().clone())
    }

    async fn delete_nat_rule(&self, edge: &str, rule_id: &str) -> ApiResult<()> {
        self.record(format!("delete_nat_rule:{edge}:{rule_id}"));
        self.nat_rules.lock().unwrap().retain(|r| r.id != rule_id);
        Ok(())
    }

    async fn create_routed_network(
        &self,
        vdc: &str,
        spec: &RoutedNetworkSpec,
    ) -> ApiResult<TaskHandle> {
        self.record(format!("create_routed_network:{vdc}:{}", spec.name));
        Ok(self.task())
    }

    async fn delete_routed_network(
        &self,
        vdc: &str,
        name: &str,
        _force: bool,
    ) -> ApiResult<TaskHandle> {
        self.record(format!("delete_routed_network:{vdc}:{name}"));
        Ok(self.task())
    }

    async fn list_catalogs(&self) -> ApiResult<Vec<String>> {
        self.record("list_catalogs");
        Ok(self.catalogs.clone())
    }

    async fn list_catalog_items(&self, catalog: &str) -> ApiResult<Vec<String>> {
        self.record(format!("list_catalog_items:{catalog}"));
        Ok(self.catalog_items.get(catalog).cloned().unwrap_or_default())
    }

    async fn catalog_item(&self, catalog: &str, item: &str) -> ApiResult<CatalogItem> {
        self.record(format!("catalog_item:{catalog}:{item}"));
        let entity_type = self
            .entity_types
            .get(&(catalog.to_string(), item.to_string()))
            .cloned()
            .unwrap_or_else(|| VAPP_TEMPLATE_MEDIA_TYPE.to_string());
        Ok(CatalogItem {
            name: item.to_string(),
            entity_type,
        })
    }

    async fn instantiate_vapp(&self, vdc: &str, config: &VappConfig) -> ApiResult<TaskHandle> {
        self.record(format!("instantiate_vapp:{vdc}:{}", config.name));
        self.vapps.lock().unwrap().insert(
            config.name.clone(),
            VappInfo {
                name: config.name.clone(),
                vm_names: vec![config.vm_name.clone()],
            },
        );
        Ok(self.task())
    }

    async fn get_vapp(&self, _vdc: &str, name: &str) -> ApiResult<VappInfo> {
        self.record(format!("get_vapp:{name}"));
        self.vapps
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| ApiFault::NotFound(name.to_string()))
    }

    async fn delete_vapp(&self, _vdc: &str, name: &str, _force: bool) -> ApiResult<TaskHandle> {
        self.record(format!("delete_vapp:{name}"));
        if self.vapps.lock().unwrap().remove(name).is_none() {
            return Err(ApiFault::NotFound(name.to_string()));
        }
        Ok(self.task())
    }

    async fn refresh_vm(&self, vapp: &str, _vm: &str) -> ApiResult<()> {
        self.record(format!("refresh_vm:{vapp}"));
        Ok(())
    }

    async fn modify_cpu(&self, vapp: &str, _vm: &str, cpus: u32) -> ApiResult<TaskHandle> {
        self.record(format!("modify_cpu:{vapp}:{cpus}"));
        Ok(self.task())
    }

    async fn modify_memory(&self, vapp: &str, _vm: &str, memory_mb: u64) -> ApiResult<TaskHandle> {
        self.record(format!("modify_memory:{vapp}:{memory_mb}"));
        Ok(self.task())
    }

    async fn set_guest_customization(
        &self,
        vapp: &str,
        _vm: &str,
        _script: &str,
    ) -> ApiResult<TaskHandle> {
        self.record(format!("set_guest_customization:{vapp}"));
        Ok(self.task())
    }

    async fn enable_guest_customization(
        &self,
        vapp: &str,
        _vm: &str,
        enabled: bool,
    ) -> ApiResult<TaskHandle> {
        self.record(format!("enable_guest_customization:{vapp}:{enabled}"));
        Ok(self.task())
    }

    async fn set_hostname(&self, vapp: &str, _vm: &str, hostname: &str) -> ApiResult<TaskHandle> {
        self.record(format!("set_hostname:{vapp}:{hostname}"));
        Ok(self.task())
    }

    async fn power_on_and_force_recustomization(
        &self,
        vapp: &str,
        _vm: &str,
    ) -> ApiResult<TaskHandle> {
        self.record(format!("power_on_and_force_recustomization:{vapp}"));
        Ok(self.task())
    }

    async fn guest_customization_status(&self, vapp: &str, _vm: &str) -> ApiResult<GcStatus> {
        self.record(format!("guest_customization_status:{vapp}"));
        if Self::consume(&self.gc_pending_polls) {
            return Ok(GcStatus::Pending);
        }
        Ok(GcStatus::Complete)
    }

    async fn list_nics(&self, vapp: &str, _vm: &str) -> ApiResult<Vec<NicInfo>> {
        self.record(format!("list_nics:{vapp}"));
        let mut responses = self.nic_responses.lock().unwrap();
        if responses.len() > 1 {
            Ok(responses.pop_front().unwrap_or_default())
        } else {
            Ok(responses.front().cloned().unwrap_or_default())
        }
    }

    async fn create_disk(
        &self,
        vdc: &str,
        spec: &DiskCreateSpec,
    ) -> ApiResult<(DiskHandle, TaskHandle)> {
        self.record(format!("create_disk:{vdc}:{}", spec.name));
        self.disk_specs.lock().unwrap().push(spec.clone());
        let handle = DiskHandle { id: self.next_id() };
        self.disks.lock().unwrap().push(handle.clone());
        Ok((handle, self.task()))
    }

    async fn attach_disk(&self, vapp: &str, _vm: &str, disk: &DiskHandle) -> ApiResult<TaskHandle> {
        self.record(format!("attach_disk:{vapp}:{}", disk.id));
        Ok(self.task())
    }

    async fn detach_disk(&self, vapp: &str, _vm: &str, disk: &DiskHandle) -> ApiResult<TaskHandle> {
        self.record(format!("detach_disk:{vapp}:{}", disk.id));
        Ok(self.task())
    }

    async fn delete_disk(&self, vdc: &str, disk: &DiskHandle) -> ApiResult<TaskHandle> {
        self.record(format!("delete_disk:{vdc}:{}", disk.id));
        self.disks.lock().unwrap().retain(|d| d.id != disk.id);
        Ok(self.task())
    }

    async fn wait_for_task(&self, task: &TaskHandle) -> ApiResult<TaskOutcome> {
        self.record(format!("wait_for_task:{}", task.id));
        if Self::consume(&self.task_failures) {
            return Ok(TaskOutcome::Failure("operation aborted".to_string()));
        }
        Ok(TaskOutcome::Success)
    }
}

/// Settings pointing at the test profile.
pub fn settings() -> VcdSettings {
    VcdSettings {
        user: "bench".to_string(),
        org: "perf-org".to_string(),
        password: "secret".to_string(),
        cloud: Some("testcloud".to_string()),
        host: None,
        port: None,
        verify_ssl: None,
        api_version: None,
    }
}

/// Profile catalog with one test profile carrying a storage policy.
pub fn profiles() -> ProfileCatalog {
    ProfileCatalog::from_yaml(
        r#"
testcloud:
  name: "Test Cloud"
  abbreviation: "tc"
  host: "vcd.test.example"
  storage_policies:
    ssd: "Gold-SSD"
"#,
    )
    .unwrap()
}
