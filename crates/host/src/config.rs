//! Deployment configuration.
//!
//! Raw settings come from a file, the environment, and CLI flags. They are
//! layered into a [`RawConfig`] and then validated once by [`resolve`] into
//! an immutable [`DeploymentConfig`].

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result as AnyResult};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{ProvisionError, Result};

/// Port the inference daemon listens on.
pub const SERVICE_PORT: u16 = 11434;

/// Port used for administrative SSH access.
pub const ADMIN_PORT: u16 = 22;

/// Smallest root volume accepted by the backend.
pub const MIN_STORAGE_GIB: u32 = 8;

/// Largest root volume accepted by the backend.
pub const MAX_STORAGE_GIB: u32 = 16_384;

/// Default deployment name, used as the backend identity key.
pub const DEFAULT_NAME: &str = "inference-host";

/// Default region.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Default OS family.
pub const DEFAULT_OS_FAMILY: &str = "ubuntu-24.04";

/// Default model.
pub const DEFAULT_MODEL: &str = "gemma2:9b";

/// Default root volume size.
pub const DEFAULT_STORAGE_GIB: u32 = 50;

/// Prefix for environment variables read by [`RawConfig::from_env`].
pub const ENV_PREFIX: &str = "INFERENCE_HOST_";

static MODEL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9][a-z0-9._/-]*:[A-Za-z0-9][A-Za-z0-9._-]*$").expect("valid model regex")
});

static NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9][a-z0-9-]{0,62}$").expect("valid name regex"));

// ============================================================================
// CIDR
// ============================================================================

/// An IP network with an explicit prefix length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cidr {
    addr: IpAddr,
    prefix: u8,
}

impl Cidr {
    /// Network address.
    #[must_use]
    pub fn addr(&self) -> IpAddr {
        self.addr
    }

    /// Prefix length.
    #[must_use]
    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    /// Whether this network matches every address of its family.
    #[must_use]
    pub fn is_open_world(&self) -> bool {
        self.prefix == 0
    }

    /// Whether this is a single-host network (`/32` or `/128`).
    #[must_use]
    pub fn is_single_host(&self) -> bool {
        match self.addr {
            IpAddr::V4(_) => self.prefix == 32,
            IpAddr::V6(_) => self.prefix == 128,
        }
    }

    /// Address with every host bit cleared.
    fn network(addr: IpAddr, prefix: u8) -> IpAddr {
        match addr {
            IpAddr::V4(v4) => {
                let mask = u32::MAX.checked_shl(32 - u32::from(prefix)).unwrap_or(0);
                IpAddr::V4((u32::from(v4) & mask).into())
            }
            IpAddr::V6(v6) => {
                let mask = u128::MAX.checked_shl(128 - u32::from(prefix)).unwrap_or(0);
                IpAddr::V6((u128::from(v6) & mask).into())
            }
        }
    }
}

impl std::str::FromStr for Cidr {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        let (addr, prefix) = s
            .split_once('/')
            .ok_or_else(|| format!("'{s}' has no prefix length (e.g. 203.0.113.5/32)"))?;

        let addr: IpAddr = addr
            .parse()
            .map_err(|_| format!("'{addr}' is not an IP address"))?;
        let prefix: u8 = prefix
            .parse()
            .map_err(|_| format!("'{prefix}' is not a prefix length"))?;

        let max = if addr.is_ipv4() { 32 } else { 128 };
        if prefix > max {
            return Err(format!("prefix /{prefix} exceeds /{max}"));
        }

        let network = Self::network(addr, prefix);
        if network != addr {
            return Err(format!(
                "'{s}' has host bits set; did you mean {network}/{prefix}?"
            ));
        }

        Ok(Self { addr, prefix })
    }
}

impl std::fmt::Display for Cidr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix)
    }
}

impl Serialize for Cidr {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Cidr {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// Instance sizing
// ============================================================================

/// Instance size class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum InstanceSize {
    /// 2 vCPU, 8GB RAM.
    Small,
    /// 4 vCPU, 16GB RAM.
    #[default]
    Medium,
    /// 8 vCPU, 32GB RAM.
    Large,
    /// 1x T4 GPU.
    GpuSmall,
    /// 1x A10G GPU.
    GpuLarge,
}

impl InstanceSize {
    /// Backend instance type for this size.
    #[must_use]
    pub fn instance_type(self) -> &'static str {
        match self {
            Self::Small => "t3.large",
            Self::Medium => "t3.xlarge",
            Self::Large => "m6i.2xlarge",
            Self::GpuSmall => "g4dn.xlarge",
            Self::GpuLarge => "g5.2xlarge",
        }
    }
}

impl std::fmt::Display for InstanceSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Small => write!(f, "small"),
            Self::Medium => write!(f, "medium"),
            Self::Large => write!(f, "large"),
            Self::GpuSmall => write!(f, "gpu-small"),
            Self::GpuLarge => write!(f, "gpu-large"),
        }
    }
}

impl std::str::FromStr for InstanceSize {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "small" => Ok(Self::Small),
            "medium" => Ok(Self::Medium),
            "large" => Ok(Self::Large),
            "gpu-small" => Ok(Self::GpuSmall),
            "gpu-large" => Ok(Self::GpuLarge),
            _ => Err(format!(
                "unknown size '{s}'. Supported: small, medium, large, gpu-small, gpu-large"
            )),
        }
    }
}

// ============================================================================
// Raw configuration
// ============================================================================

/// Unvalidated configuration, every field optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfig {
    /// Deployment name (identity key at the backend).
    pub name: Option<String>,
    /// Backend region.
    pub region: Option<String>,
    /// SSH key pair name registered with the backend.
    pub ssh_key: Option<String>,
    /// CIDR allowed to reach SSH and the inference port.
    pub allowed_cidr: Option<String>,
    /// Instance size class.
    pub instance_size: Option<String>,
    /// Root volume size in GiB.
    pub storage_gib: Option<u32>,
    /// Model to pull, as `name:tag`.
    pub model: Option<String>,
    /// Inference port. Only 11434 is accepted.
    pub service_port: Option<u16>,
    /// OS family for image lookup.
    pub os_family: Option<String>,
    /// Pinned image ID overriding the built-in table.
    pub image: Option<String>,
    /// Explicit confirmation that an open-world CIDR is intended.
    pub allow_open_world: Option<bool>,
    /// Extra tags applied to backend resources.
    pub tags: Option<BTreeMap<String, String>>,
}

impl RawConfig {
    /// Load a raw config from a TOML or YAML file, chosen by extension.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> AnyResult<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase);

        let raw: Self = match extension.as_deref() {
            Some("yaml" | "yml") => serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse YAML config {}", path.display()))?,
            _ => toml::from_str(&content)
                .with_context(|| format!("Failed to parse TOML config {}", path.display()))?,
        };

        debug!(path = %path.display(), "Loaded config file");
        Ok(raw)
    }

    /// Read `INFERENCE_HOST_*` variables from the process environment.
    ///
    /// # Errors
    /// Returns `InvalidConfig` if a numeric or boolean variable is malformed.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a raw config from an arbitrary variable lookup.
    ///
    /// # Errors
    /// Returns `InvalidConfig` if a numeric or boolean variable is malformed.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |field: &str| {
            lookup(&format!("{ENV_PREFIX}{}", field.to_uppercase()))
                .filter(|v| !v.trim().is_empty())
        };

        let storage_gib = get("storage_gib")
            .map(|v| {
                v.trim()
                    .parse::<u32>()
                    .map_err(|_| ProvisionError::invalid("storage_gib", format!("'{v}' is not a number")))
            })
            .transpose()?;

        let service_port = get("service_port")
            .map(|v| {
                v.trim()
                    .parse::<u16>()
                    .map_err(|_| ProvisionError::invalid("service_port", format!("'{v}' is not a port")))
            })
            .transpose()?;

        let allow_open_world = get("allow_open_world")
            .map(|v| match v.trim().to_lowercase().as_str() {
                "1" | "true" | "yes" => Ok(true),
                "0" | "false" | "no" => Ok(false),
                _ => Err(ProvisionError::invalid(
                    "allow_open_world",
                    format!("'{v}' is not a boolean"),
                )),
            })
            .transpose()?;

        Ok(Self {
            name: get("name"),
            region: get("region"),
            ssh_key: get("ssh_key"),
            allowed_cidr: get("allowed_cidr"),
            instance_size: get("instance_size"),
            storage_gib,
            model: get("model"),
            service_port,
            os_family: get("os_family"),
            image: get("image"),
            allow_open_world,
            tags: None,
        })
    }

    /// Layer `other` over `self`; fields set in `other` win.
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        let tags = match (self.tags, other.tags) {
            (Some(mut base), Some(over)) => {
                base.extend(over);
                Some(base)
            }
            (base, over) => over.or(base),
        };

        Self {
            name: other.name.or(self.name),
            region: other.region.or(self.region),
            ssh_key: other.ssh_key.or(self.ssh_key),
            allowed_cidr: other.allowed_cidr.or(self.allowed_cidr),
            instance_size: other.instance_size.or(self.instance_size),
            storage_gib: other.storage_gib.or(self.storage_gib),
            model: other.model.or(self.model),
            service_port: other.service_port.or(self.service_port),
            os_family: other.os_family.or(self.os_family),
            image: other.image.or(self.image),
            allow_open_world: other.allow_open_world.or(self.allow_open_world),
            tags,
        }
    }
}

// ============================================================================
// Validated configuration
// ============================================================================

/// Validated deployment configuration. Immutable once resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeploymentConfig {
    /// Deployment name (identity key at the backend).
    pub name: String,
    /// Backend region.
    pub region: String,
    /// SSH key pair name registered with the backend.
    pub ssh_key_reference: String,
    /// CIDR allowed to reach SSH and the inference port.
    pub allowed_cidr: Cidr,
    /// Instance size class.
    pub instance_size: InstanceSize,
    /// Root volume size in GiB.
    pub storage_gib: u32,
    /// Model identifier, `name:tag`.
    pub model_identifier: String,
    /// Inference port (always [`SERVICE_PORT`]).
    pub service_port: u16,
    /// OS family for image lookup.
    pub os_family: String,
    /// Pinned image override.
    pub image_override: Option<String>,
    /// Whether an open-world CIDR was explicitly confirmed.
    pub allow_open_world: bool,
    /// Extra tags.
    pub tags: BTreeMap<String, String>,
}

/// Validate a raw config into a [`DeploymentConfig`].
///
/// Pure: no network access, no filesystem access.
///
/// # Errors
/// Returns [`ProvisionError::InvalidConfig`] naming the first offending field.
pub fn resolve(raw: RawConfig) -> Result<DeploymentConfig> {
    let name = raw.name.unwrap_or_else(|| DEFAULT_NAME.to_string());
    if !NAME_RE.is_match(&name) {
        return Err(ProvisionError::invalid(
            "name",
            format!("'{name}' must be lowercase letters, digits and dashes (max 63)"),
        ));
    }

    let ssh_key_reference = raw.ssh_key.map(|k| k.trim().to_string()).unwrap_or_default();
    if ssh_key_reference.is_empty() {
        return Err(ProvisionError::invalid("ssh_key", "an SSH key reference is required"));
    }

    let allow_open_world = raw.allow_open_world.unwrap_or(false);
    let allowed_cidr = resolve_cidr(raw.allowed_cidr.as_deref(), allow_open_world)?;

    let instance_size = raw
        .instance_size
        .as_deref()
        .map(str::parse::<InstanceSize>)
        .transpose()
        .map_err(|reason| ProvisionError::invalid("instance_size", reason))?
        .unwrap_or_default();

    let storage_gib = raw.storage_gib.unwrap_or(DEFAULT_STORAGE_GIB);
    if !(MIN_STORAGE_GIB..=MAX_STORAGE_GIB).contains(&storage_gib) {
        return Err(ProvisionError::invalid(
            "storage_gib",
            format!("{storage_gib} GiB is outside {MIN_STORAGE_GIB}..={MAX_STORAGE_GIB}"),
        ));
    }

    let model_identifier = raw.model.unwrap_or_else(|| DEFAULT_MODEL.to_string());
    if !MODEL_RE.is_match(&model_identifier) {
        return Err(ProvisionError::invalid(
            "model",
            format!("'{model_identifier}' must look like name:tag (e.g. gemma2:9b)"),
        ));
    }

    if let Some(port) = raw.service_port.filter(|p| *p != SERVICE_PORT) {
        return Err(ProvisionError::invalid(
            "service_port",
            format!("{port} is not supported; the daemon listens on {SERVICE_PORT}"),
        ));
    }

    let image_override = raw.image.map(|i| i.trim().to_string()).filter(|i| !i.is_empty());

    Ok(DeploymentConfig {
        name,
        region: raw.region.unwrap_or_else(|| DEFAULT_REGION.to_string()),
        ssh_key_reference,
        allowed_cidr,
        instance_size,
        storage_gib,
        model_identifier,
        service_port: SERVICE_PORT,
        os_family: raw.os_family.unwrap_or_else(|| DEFAULT_OS_FAMILY.to_string()),
        image_override,
        allow_open_world,
        tags: raw.tags.unwrap_or_default(),
    })
}

/// Parse the allow-list CIDR, refusing unconfirmed open-world access.
fn resolve_cidr(value: Option<&str>, allow_open_world: bool) -> Result<Cidr> {
    let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) else {
        warn!("allowed_cidr is not set; refusing to fall back to 0.0.0.0/0");
        return Err(ProvisionError::invalid(
            "allowed_cidr",
            "must be set explicitly (e.g. your public IP with /32)",
        ));
    };

    let cidr: Cidr = value
        .parse()
        .map_err(|reason| ProvisionError::invalid("allowed_cidr", reason))?;

    if cidr.is_open_world() {
        if !allow_open_world {
            return Err(ProvisionError::invalid(
                "allowed_cidr",
                format!(
                    "{cidr} exposes SSH and port {SERVICE_PORT} to the internet; \
                     set allow_open_world = true to confirm"
                ),
            ));
        }
        warn!(
            cidr = %cidr,
            "Open-world access confirmed: SSH and the inference API will be reachable from anywhere"
        );
    }

    Ok(cidr)
}
