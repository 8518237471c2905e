//! VMware Cloud Director provider for cloudrig
//!
//! This crate provisions and tears down virtual infrastructure on a Cloud
//! Director organization: routed networks with DHCP and NAT, independent
//! disks, and VMs instantiated from catalog templates.
//!
//! # Architecture
//!
//! - [`api`]: the control-plane boundary, i.e. the [`api::VcdApi`] trait,
//!   request/response types, and asynchronous task polling. The transport
//!   lives behind the trait; tests use a mock.
//! - [`profiles`] / [`settings`]: predefined cloud profiles and the
//!   explicit-wins merge into connection parameters.
//! - [`cache`]: the per-run [`cache::OrgCache`], holding session and
//!   topology (compute vDC, network vDC, edge, external network), each
//!   resolved exactly once.
//! - [`select`]: capacity ranking, edge/external-network discovery, and
//!   catalog image matching.
//! - [`network`], [`disk`], [`vm`]: the lifecycle managers.
//! - [`guest`]: OS-family capability table and first-boot script
//!   rendering.
//!
//! # Example
//!
//! ```ignore
//! use cloudrig_vcd::{OrgCache, ProfileCatalog, VcdNetwork, VcdFirewall, VcdSettings};
//! use std::sync::Arc;
//!
//! let profiles = ProfileCatalog::load("clouds.yml")?;
//! let cache = OrgCache::new(api, settings, &profiles)?;
//! let network = Arc::new(VcdNetwork::new(cache.clone(), "run1", "10.0.5.0/24")?);
//! let firewall = Arc::new(VcdFirewall::new(cache.clone(), "run1"));
//!
//! let mut vm = VcdVirtualMachine::new(cache, spec, network, firewall);
//! vm.create_dependencies().await?;
//! vm.create().await?;
//! vm.post_create().await?;
//! ```

pub mod api;
pub mod cache;
pub mod disk;
pub mod guest;
pub mod network;
pub mod profiles;
pub mod select;
pub mod settings;
pub mod vm;

// Re-exports
pub use api::{ApiFault, ApiResult, Credentials, TaskHandle, TaskOutcome, VcdApi};
pub use cache::{OrgCache, Session, Topology};
pub use disk::VcdDisk;
pub use guest::OsFamily;
pub use network::{PortForward, VcdFirewall, VcdNetwork};
pub use profiles::{CloudProfile, ImagePin, ProfileCatalog};
pub use select::NetworkingSelection;
pub use settings::{ConnectionConfig, VcdSettings};
pub use vm::{PollTuning, VcdVirtualMachine, VmSpec};
