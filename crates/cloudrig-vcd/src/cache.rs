//! Session and topology cache
//!
//! One `OrgCache` lives for the whole benchmark run and is shared by every
//! lifecycle manager. It authenticates the control-plane client exactly
//! once, resolves the organization topology (compute vDC, network vDC,
//! edge gateway, external network) exactly once, and hands out the
//! resolved values from then on. Even if the underlying cloud state
//! drifts, a run sees one consistent view.

use crate::api::{Credentials, VcdApi};
use crate::profiles::{CloudProfile, ProfileCatalog};
use crate::select;
use crate::settings::{ConnectionConfig, VcdSettings};
use cloudrig_cloud::{AuthStatus, CloudError, Result};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Authenticated session record
#[derive(Debug, Clone)]
pub struct Session {
    pub host: String,
    pub port: u16,
    pub verify_ssl: bool,
    pub api_version: Option<String>,
}

/// Resolved organization topology.
///
/// Immutable once fully resolved: the compute vDC hosts VMs and disks, the
/// network vDC hosts the edge, and the edge fronts the external network.
/// The two vDCs may legitimately differ.
#[derive(Debug, Clone)]
pub struct Topology {
    pub org: String,
    pub compute_vdc: String,
    pub network_vdc: String,
    pub edge: String,
    pub external_network: String,
}

#[derive(Default)]
struct CacheState {
    session: Option<Session>,
    topology: Option<Topology>,
}

/// Process-wide session and topology cache
pub struct OrgCache {
    api: Arc<dyn VcdApi>,
    credentials: Credentials,
    connection: ConnectionConfig,
    profile: Option<CloudProfile>,
    state: Mutex<CacheState>,
}

impl OrgCache {
    /// Resolve connection parameters eagerly so configuration errors
    /// surface before any remote call.
    pub fn new(
        api: Arc<dyn VcdApi>,
        settings: VcdSettings,
        profiles: &ProfileCatalog,
    ) -> Result<Arc<Self>> {
        let profile = match &settings.cloud {
            Some(key) => Some(
                profiles
                    .get(key)
                    .cloned()
                    .ok_or_else(|| CloudError::InvalidConfig(format!("unknown cloud profile {key:?}")))?,
            ),
            None => None,
        };
        let connection = ConnectionConfig::resolve(&settings, profile.as_ref())?;
        Ok(Arc::new(Self {
            api,
            credentials: settings.credentials(),
            connection,
            profile,
            state: Mutex::new(CacheState::default()),
        }))
    }

    pub fn api(&self) -> Arc<dyn VcdApi> {
        Arc::clone(&self.api)
    }

    pub fn profile(&self) -> Option<&CloudProfile> {
        self.profile.as_ref()
    }

    /// Authenticated session, creating it on first use. Concurrent callers
    /// wait on the lock and reuse the completed session.
    pub async fn session(&self) -> Result<Session> {
        let mut state = self.state.lock().await;
        if let Some(session) = &state.session {
            return Ok(session.clone());
        }
        let session = self.login().await?;
        state.session = Some(session.clone());
        Ok(session)
    }

    /// Discard the session and log in again. Used after the control plane
    /// rejects the session mid-run. Topology is deliberately kept.
    pub async fn reauthenticate(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        state.session = None;
        let session = self.login().await?;
        state.session = Some(session);
        Ok(())
    }

    /// Probe authentication, logging in on first use. A failed login does
    /// not poison the cache; the next probe attempts a fresh login.
    pub async fn auth_status(&self) -> AuthStatus {
        match self.session().await {
            Ok(_) => AuthStatus::ok(format!(
                "{}@{}",
                self.credentials.user, self.credentials.org
            )),
            Err(err) => AuthStatus::failed(err.to_string()),
        }
    }

    async fn login(&self) -> Result<Session> {
        tracing::info!(
            "Logging in to organization {} as {} ({}:{})",
            self.credentials.org,
            self.credentials.user,
            self.connection.host,
            self.connection.port
        );
        self.api
            .authenticate(&self.credentials)
            .await
            .map_err(|fault| CloudError::AuthenticationFailed(fault.to_string()))?;
        Ok(Session {
            host: self.connection.host.clone(),
            port: self.connection.port,
            verify_ssl: self.connection.verify_ssl,
            api_version: self.connection.api_version.clone(),
        })
    }

    /// Resolved topology, computing it on first use.
    pub async fn topology(&self) -> Result<Topology> {
        self.session().await?;
        let mut state = self.state.lock().await;
        if let Some(topology) = &state.topology {
            return Ok(topology.clone());
        }
        let topology = self.resolve_topology().await?;
        state.topology = Some(topology.clone());
        Ok(topology)
    }

    async fn resolve_topology(&self) -> Result<Topology> {
        let org = self.api.organization().await?;
        let vdcs = self.api.list_vdcs().await?;

        // Select the vDC with the most available resources
        let mut candidates = Vec::with_capacity(vdcs.len());
        for vdc in &vdcs {
            tracing::debug!("Fetching capacity of vDC {}", vdc.name);
            let capacity = self.api.vdc_capacity(&vdc.name).await?;
            candidates.push((vdc.name.clone(), capacity));
        }
        let compute_vdc = select::best_vdc(&candidates)
            .ok_or_else(|| {
                CloudError::NotFound(format!("no vDC in organization {}", org.name))
            })?
            .to_string();
        tracing::debug!("Selected best compute vDC: {}", compute_vdc);

        // Resolve networking, preferring the compute vDC when it also
        // hosts a suitable edge
        let hint = self
            .profile
            .as_ref()
            .and_then(|p| p.external_network_internet.as_deref());
        let networking =
            select::select_networking(self.api.as_ref(), &vdcs, hint, &compute_vdc).await?;
        tracing::debug!(
            "Selected networking vDC {} with edge {} on {}",
            networking.vdc,
            networking.edge,
            networking.external_network
        );

        Ok(Topology {
            org: org.name,
            compute_vdc,
            network_vdc: networking.vdc,
            edge: networking.edge,
            external_network: networking.external_network,
        })
    }
}
