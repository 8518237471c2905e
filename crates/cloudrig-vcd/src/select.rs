//! Resource selection
//!
//! Pure decision logic over control-plane enumerations: rank vDCs by
//! available capacity, discover the edge/external-network pairing, and
//! match an OS identifier to a catalog image. All guesses are first-match
//! in enumeration order; that order comes from the control plane and is
//! not guaranteed stable.

use crate::api::{ComputeCapacity, VAPP_TEMPLATE_MEDIA_TYPE, VcdApi, VdcInfo};
use crate::profiles::CloudProfile;
use cloudrig_cloud::{CloudError, Result};
use rand::Rng;

/// Ratio converting a capacity unit to the common base (MB / MHz).
fn unit_ratio(units: &str) -> f64 {
    match units {
        "GB" => 1000.0,
        "MB" => 1.0,
        "kB" => 0.001,
        "GHz" => 2000.0,
        "MHz" => 2.0,
        other => {
            tracing::warn!("Unknown capacity unit {:?}, treating as zero", other);
            0.0
        }
    }
}

/// Rank score of a vDC: geometric mean of normalized available memory and
/// CPU. A starved axis yields zero available and kills the whole score.
pub fn rank_score(capacity: &ComputeCapacity) -> f64 {
    let factors = [&capacity.memory, &capacity.cpu].map(|entry| {
        let available = entry.allocated.max(entry.limit) - entry.used;
        (available * unit_ratio(&entry.units)).max(0.0)
    });
    (factors[0] * factors[1]).sqrt()
}

/// Pick the vDC with the greatest rank score. Ties break to the first
/// maximum in input order.
pub fn best_vdc<'a>(candidates: &'a [(String, ComputeCapacity)]) -> Option<&'a str> {
    let mut best: Option<(&str, f64)> = None;
    for (name, capacity) in candidates {
        let score = rank_score(capacity);
        tracing::debug!("vDC {} rank score: {}", name, score);
        if best.is_none_or(|(_, b)| score > b) {
            best = Some((name, score));
        }
    }
    best.map(|(name, _)| name)
}

/// Outcome of networking selection
#[derive(Debug, Clone)]
pub struct NetworkingSelection {
    pub external_network: String,
    pub edge: String,
    pub vdc: String,
}

/// Select the external network, edge gateway, and hosting vDC.
///
/// Enumerates every (vDC, edge, external network) triple, with vDCs named
/// `preferred_vdc` enumerated first (a soft preference, not a filter).
/// With an explicit external-network name the first match wins and absence
/// is `NotFound`. Without one, the first name containing the
/// case-insensitive substring "internet" wins; a sole candidate wins even
/// without the hint; anything else is `Ambiguous`.
pub async fn select_networking(
    api: &dyn VcdApi,
    vdcs: &[VdcInfo],
    explicit_ext_net: Option<&str>,
    preferred_vdc: &str,
) -> Result<NetworkingSelection> {
    let mut ordered: Vec<&VdcInfo> = Vec::with_capacity(vdcs.len());
    ordered.extend(vdcs.iter().filter(|v| v.name == preferred_vdc));
    ordered.extend(vdcs.iter().filter(|v| v.name != preferred_vdc));

    let mut count = 0usize;
    let mut sole: Option<NetworkingSelection> = None;

    for vdc in ordered {
        for edge in api.list_edge_gateways(&vdc.name).await? {
            for allocation in api.external_ip_allocations(&edge.name).await? {
                let candidate = NetworkingSelection {
                    external_network: allocation.network.clone(),
                    edge: edge.name.clone(),
                    vdc: vdc.name.clone(),
                };
                if let Some(wanted) = explicit_ext_net {
                    if allocation.network == wanted {
                        return Ok(candidate);
                    }
                    continue;
                }
                count += 1;
                if allocation.network.to_lowercase().contains("internet") {
                    tracing::debug!("Guessed external network: {}", allocation.network);
                    return Ok(candidate);
                }
                sole = Some(candidate);
            }
        }
    }

    if let Some(wanted) = explicit_ext_net {
        return Err(CloudError::NotFound(format!(
            "no edge gateway with external network {wanted} in organization"
        )));
    }
    if count == 1 {
        if let Some(selection) = sole {
            tracing::debug!(
                "Guessed only available external network: {}",
                selection.external_network
            );
            return Ok(selection);
        }
    }
    Err(CloudError::Ambiguous(
        "no edge gateway with an unambiguous external network in organization".to_string(),
    ))
}

/// Normalize a catalog image name and test it against an OS identifier.
///
/// e.g. "Ubuntu Server 18.04 LTS 64bit" matches "ubuntu1804".
pub fn match_image_name(sample_name: &str, os_id: &str) -> bool {
    const NOISE_TOKENS: [&str; 5] = ["server", "temp", ".", " ", "-"];
    let mut normalized = sample_name.to_lowercase();
    for token in NOISE_TOKENS {
        normalized = normalized.replace(token, "");
    }
    normalized.starts_with(os_id)
}

async fn verify_image(api: &dyn VcdApi, catalog: &str, image: &str) -> Result<bool> {
    let item = api.catalog_item(catalog, image).await?;
    Ok(item.entity_type == VAPP_TEMPLATE_MEDIA_TYPE)
}

/// Resolve the (catalog, template) pair for an OS identifier.
///
/// Resolution order: a fully pinned catalog/template pair is validated and
/// used as-is; a pinned template is searched for across catalogs; with
/// nothing pinned the first catalog image whose normalized name matches
/// the OS identifier wins.
pub async fn select_catalog_image(
    api: &dyn VcdApi,
    org_name: &str,
    profile: Option<&CloudProfile>,
    os_id: &str,
) -> Result<(String, String)> {
    let pin = profile.and_then(|p| p.image_pin(os_id));
    let pinned_catalog = pin.and_then(|p| p.catalog.clone());
    let pinned_template = pin.and_then(|p| p.template.clone());

    if let (Some(catalog), Some(template)) = (&pinned_catalog, &pinned_template) {
        if !verify_image(api, catalog, template).await? {
            return Err(CloudError::InvalidConfig(format!(
                "given image {template} is not a proper VM template"
            )));
        }
        return Ok((catalog.clone(), template.clone()));
    }

    let catalogs = match &pinned_catalog {
        Some(catalog) => vec![catalog.clone()],
        None => {
            let catalogs = api.list_catalogs().await?;
            if catalogs.is_empty() {
                return Err(CloudError::NotFound(format!(
                    "no image catalog in organization {org_name}"
                )));
            }
            catalogs
        }
    };

    if let Some(template) = &pinned_template {
        for catalog in &catalogs {
            for image in api.list_catalog_items(catalog).await? {
                if &image == template && verify_image(api, catalog, &image).await? {
                    return Ok((catalog.clone(), image));
                }
            }
        }
        return Err(CloudError::NotFound(format!(
            "could not find image named {template} in organization {org_name}"
        )));
    }

    for catalog in &catalogs {
        for image in api.list_catalog_items(catalog).await? {
            if match_image_name(&image, os_id) && verify_image(api, catalog, &image).await? {
                tracing::debug!("Guessed image for OS {}: {}", os_id, image);
                return Ok((catalog.clone(), image));
            }
        }
    }

    Err(CloudError::NotFound(format!(
        "could not guess image for {os_id} in organization {org_name}"
    )))
}

/// External TCP port for inbound access, pseudo-random in [9000, 65535).
pub fn select_external_tcp_port() -> u16 {
    rand::thread_rng().gen_range(9000..65535)
}

/// CIDR for the run's routed network.
// TODO: probe the organization for networks already holding this range.
pub fn select_free_cidr() -> &'static str {
    "192.168.123.0/24"
}

/// Base of a /24 subnet ("10.0.5.0/24" -> "10.0.5"). Any other prefix
/// length is rejected before remote calls are made.
pub fn subnet_base(cidr: &str) -> Result<&str> {
    cidr.strip_suffix(".0/24").ok_or_else(|| {
        CloudError::InvalidConfig(format!("subnets other than /24 not supported: {cidr}"))
    })
}

/// First usable IP of a /24 subnet, in CIDR notation.
pub fn first_usable_ip(cidr: &str) -> Result<String> {
    Ok(format!("{}.1/24", subnet_base(cidr)?))
}
