//! Desired state for one inference host.

use std::collections::BTreeMap;

use inference_cloud::aws::amis;
use inference_cloud::{CreateInstanceRequest, RootVolume};
use serde::Serialize;
use tracing::debug;

use crate::bootstrap::BootstrapScript;
use crate::config::{DeploymentConfig, InstanceSize};
use crate::error::{ProvisionError, Result};
use crate::network::NetworkPolicy;

/// Tag identifying resources this tool owns.
pub const MANAGED_BY_TAG: &str = "managed-by";

/// Tag recording the model the host was bootstrapped with.
pub const MODEL_TAG: &str = "model";

/// Value of [`MANAGED_BY_TAG`].
pub const MANAGED_BY: &str = "inference-host";

/// Root device name on the pinned Ubuntu images.
pub const ROOT_DEVICE: &str = "/dev/sda1";

/// Root volume type.
pub const ROOT_VOLUME_TYPE: &str = "gp3";

/// A pinned image known to work with the bootstrap script.
struct PinnedImage {
    os_family: &'static str,
    region: &'static str,
    id: &'static str,
    build: &'static str,
}

const IMAGES: &[PinnedImage] = &[
    PinnedImage {
        os_family: "ubuntu-24.04",
        region: "us-east-1",
        id: amis::UBUNTU_24_04_US_EAST_1,
        build: "ubuntu-noble-24.04-amd64-server-20240423",
    },
    PinnedImage {
        os_family: "ubuntu-22.04",
        region: "us-east-1",
        id: amis::UBUNTU_22_04_US_EAST_1,
        build: "ubuntu-jammy-22.04-amd64-server-20230516",
    },
];

/// OS families with a pinned image.
#[must_use]
pub fn supported_os_families() -> Vec<&'static str> {
    let mut families: Vec<_> = IMAGES.iter().map(|i| i.os_family).collect();
    families.dedup();
    families
}

/// Reference to a concrete machine image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageRef {
    /// Backend image ID.
    pub id: String,
    /// OS family it was chosen for.
    pub os_family: String,
    /// Dated build name, or `override` when supplied by the operator.
    pub build: String,
}

impl ImageRef {
    /// Whether `id` names one fixed image rather than a moving alias.
    #[must_use]
    pub fn is_pinned(id: &str) -> bool {
        let lower = id.to_lowercase();
        lower.starts_with("ami-")
            && lower.len() > 4
            && lower[4..].chars().all(|c| c.is_ascii_hexdigit())
    }

    /// Look up the pinned image for a family and region, or validate an
    /// operator override.
    ///
    /// # Errors
    /// Returns [`ProvisionError::UnsupportedImage`] for an unknown family, a
    /// region without a pinned image, or a floating override.
    pub fn resolve(os_family: &str, region: &str, image_override: Option<&str>) -> Result<Self> {
        if let Some(id) = image_override {
            if !Self::is_pinned(id) {
                return Err(ProvisionError::UnsupportedImage(format!(
                    "image '{id}' is not a pinned image ID; floating references like 'latest' are not allowed"
                )));
            }
            return Ok(Self {
                id: id.to_string(),
                os_family: os_family.to_string(),
                build: "override".to_string(),
            });
        }

        if !IMAGES.iter().any(|i| i.os_family == os_family) {
            return Err(ProvisionError::UnsupportedImage(format!(
                "unknown OS family '{os_family}'. Supported: {}",
                supported_os_families().join(", ")
            )));
        }

        IMAGES
            .iter()
            .find(|i| i.os_family == os_family && i.region == region)
            .map(|i| Self {
                id: i.id.to_string(),
                os_family: i.os_family.to_string(),
                build: i.build.to_string(),
            })
            .ok_or_else(|| {
                ProvisionError::UnsupportedImage(format!(
                    "no pinned {os_family} image for region {region}; set `image` to a pinned ID"
                ))
            })
    }
}

/// Root volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StorageSpec {
    /// Size in GiB.
    pub size_gib: u32,
    /// Volume type.
    pub volume_type: String,
    /// Root device name.
    pub device_name: String,
}

impl From<&StorageSpec> for RootVolume {
    fn from(storage: &StorageSpec) -> Self {
        Self {
            device_name: storage.device_name.clone(),
            size_gib: storage.size_gib,
            volume_type: storage.volume_type.clone(),
        }
    }
}

/// Everything needed to create the host, derived from one config.
#[derive(Debug, Clone, Serialize)]
pub struct ProvisionPlan {
    /// Identity key at the backend.
    pub name: String,
    /// Backend region.
    pub region: String,
    /// Machine image.
    pub image: ImageRef,
    /// Size class.
    pub instance_size: InstanceSize,
    /// Backend instance type.
    pub instance_type: String,
    /// Root volume.
    pub storage: StorageSpec,
    /// Firewall allow-list.
    pub network: NetworkPolicy,
    /// First-boot script.
    pub bootstrap: String,
    /// SSH key pair name.
    pub ssh_key: String,
    /// Tags, always including `Name` and [`MANAGED_BY_TAG`].
    pub tags: BTreeMap<String, String>,
}

impl ProvisionPlan {
    /// Backend request creating this host.
    #[must_use]
    pub fn to_create_request(&self) -> CreateInstanceRequest {
        CreateInstanceRequest {
            name: self.name.clone(),
            instance_type: self.instance_type.clone(),
            region: self.region.clone(),
            image: self.image.id.clone(),
            ssh_keys: vec![self.ssh_key.clone()],
            root_volume: RootVolume::from(&self.storage),
            firewall_rules: self.network.rules().to_vec(),
            user_data: Some(self.bootstrap.clone()),
            tags: self.tags.clone(),
        }
    }
}

/// Build the desired state for a deployment.
///
/// # Errors
/// Returns [`ProvisionError::UnsupportedImage`] when no pinned image applies.
pub fn plan(
    config: &DeploymentConfig,
    network: NetworkPolicy,
    bootstrap: &BootstrapScript,
) -> Result<ProvisionPlan> {
    let image = ImageRef::resolve(
        &config.os_family,
        &config.region,
        config.image_override.as_deref(),
    )?;

    let mut tags = config.tags.clone();
    tags.insert("Name".to_string(), config.name.clone());
    tags.insert(MANAGED_BY_TAG.to_string(), MANAGED_BY.to_string());
    tags.insert(MODEL_TAG.to_string(), config.model_identifier.clone());

    let plan = ProvisionPlan {
        name: config.name.clone(),
        region: config.region.clone(),
        image,
        instance_size: config.instance_size,
        instance_type: config.instance_size.instance_type().to_string(),
        storage: StorageSpec {
            size_gib: config.storage_gib,
            volume_type: ROOT_VOLUME_TYPE.to_string(),
            device_name: ROOT_DEVICE.to_string(),
        },
        network,
        bootstrap: bootstrap.as_str().to_string(),
        ssh_key: config.ssh_key_reference.clone(),
        tags,
    };

    debug!(
        name = %plan.name,
        image = %plan.image.id,
        instance_type = %plan.instance_type,
        storage_gib = plan.storage.size_gib,
        "Provision plan built"
    );

    Ok(plan)
}
