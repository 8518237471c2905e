//! Explicit provider settings and connection resolution
//!
//! Settings come from the harness configuration surface. Connection
//! parameters merge explicit values over profile defaults; explicit values
//! always win.

use crate::api::Credentials;
use crate::profiles::CloudProfile;
use cloudrig_cloud::{CloudError, Result};
use serde::{Deserialize, Serialize};

/// Provider settings supplied by the caller.
///
/// The credential triple is required; everything else overrides the
/// selected cloud profile when present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VcdSettings {
    pub user: String,
    pub org: String,
    pub password: String,

    /// Key, name, or abbreviation of a predefined cloud profile
    pub cloud: Option<String>,

    pub host: Option<String>,
    pub port: Option<u16>,
    pub verify_ssl: Option<bool>,
    pub api_version: Option<String>,
}

impl VcdSettings {
    pub fn credentials(&self) -> Credentials {
        Credentials {
            user: self.user.clone(),
            org: self.org.clone(),
            password: self.password.clone(),
        }
    }
}

/// Resolved connection parameters for the control-plane endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub verify_ssl: bool,
    /// `None` means: let the client pick its default
    pub api_version: Option<String>,
}

impl ConnectionConfig {
    /// Merge explicit settings over profile defaults.
    ///
    /// Hosts on a non-standard port carry the port in the host string,
    /// with any trailing slash trimmed first.
    pub fn resolve(settings: &VcdSettings, profile: Option<&CloudProfile>) -> Result<Self> {
        let host = settings
            .host
            .clone()
            .or_else(|| profile.and_then(|p| p.host.clone()))
            .ok_or_else(|| {
                CloudError::InvalidConfig(
                    "no API host given and the cloud profile does not define one".to_string(),
                )
            })?;
        let port = settings.port.unwrap_or_else(|| profile.map_or(443, |p| p.port));
        let verify_ssl = settings
            .verify_ssl
            .unwrap_or_else(|| profile.is_none_or(|p| p.verify_ssl));
        let api_version = settings
            .api_version
            .clone()
            .or_else(|| profile.and_then(|p| p.api_version.clone()));

        let host = if port != 443 {
            format!("{}:{}", host.trim_end_matches('/'), port)
        } else {
            host
        };

        Ok(Self {
            host,
            port,
            verify_ssl,
            api_version,
        })
    }
}
