//! Predefined cloud profiles
//!
//! A profile carries the connection defaults and resource hints for one
//! Cloud Director installation: API endpoint, recommended DNS servers, the
//! external-network hint, named storage policies, and the OS-name to
//! catalog-image mapping. Profiles are loaded from a YAML document and
//! looked up by map key, display name, or abbreviation.

use cloudrig_cloud::{CloudError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Storage profile type used when the caller does not ask for one.
pub const DEFAULT_STORAGE_PROFILE: &str = "ssd";

const DEFAULT_DNSES: [&str; 2] = ["8.8.8.8", "8.8.4.4"];

fn default_port() -> u16 {
    443
}

fn default_verify_ssl() -> bool {
    true
}

/// Catalog/template pin for one OS identifier
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImagePin {
    pub catalog: Option<String>,
    pub template: Option<String>,
}

/// Connection defaults and resource hints for one Cloud Director cloud
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudProfile {
    pub name: Option<String>,
    pub abbreviation: Option<String>,

    pub host: Option<String>,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_verify_ssl")]
    pub verify_ssl: bool,
    pub api_version: Option<String>,

    #[serde(default)]
    pub recommended_dnses: Vec<String>,

    /// External network known to provide internet-facing addresses. When
    /// absent, selection falls back to the "internet" substring guess.
    pub external_network_internet: Option<String>,

    /// Storage policy name by profile type (e.g. "ssd" -> "Gold-SSD")
    #[serde(default)]
    pub storage_policies: HashMap<String, String>,

    /// OS identifier -> pinned catalog image
    #[serde(default)]
    pub images: HashMap<String, ImagePin>,
}

impl CloudProfile {
    /// Primary and secondary DNS recommendation, falling back to the
    /// public defaults when the profile lists fewer than two servers.
    pub fn recommended_dnses(&self) -> (String, String) {
        if self.recommended_dnses.len() >= 2 {
            (
                self.recommended_dnses[0].clone(),
                self.recommended_dnses[1].clone(),
            )
        } else {
            (DEFAULT_DNSES[0].to_string(), DEFAULT_DNSES[1].to_string())
        }
    }

    /// Named storage policy for a profile type (default type "ssd").
    pub fn storage_policy_name(&self, profile_type: Option<&str>) -> Result<String> {
        let profile_type = profile_type.unwrap_or(DEFAULT_STORAGE_PROFILE);
        self.storage_policies
            .get(profile_type)
            .cloned()
            .ok_or_else(|| {
                CloudError::InvalidConfig(format!(
                    "cloud has no storage policy defined for {profile_type:?}"
                ))
            })
    }

    pub fn image_pin(&self, os_id: &str) -> Option<&ImagePin> {
        self.images.get(os_id)
    }
}

/// All known cloud profiles, keyed by a short identifier
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProfileCatalog {
    profiles: HashMap<String, CloudProfile>,
}

impl ProfileCatalog {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Look up a profile: first by map key, then by display name, then by
    /// abbreviation.
    pub fn get(&self, key: &str) -> Option<&CloudProfile> {
        if let Some(profile) = self.profiles.get(key) {
            return Some(profile);
        }
        if let Some(profile) = self
            .profiles
            .values()
            .find(|p| p.name.as_deref() == Some(key))
        {
            return Some(profile);
        }
        self.profiles
            .values()
            .find(|p| p.abbreviation.as_deref() == Some(key))
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}
