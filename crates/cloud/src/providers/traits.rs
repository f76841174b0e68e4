//! Cloud provider trait and common types.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during cloud provider operations.
#[derive(Error, Debug)]
pub enum CloudProviderError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// API returned an error response.
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Resource not found.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Operation timed out.
    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Authentication error.
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Quota exceeded.
    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Local state could not be read or written.
    #[error("State error: {0}")]
    State(String),
}

// ============================================================================
// Firewall types
// ============================================================================

/// Transport protocol matched by a firewall rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// TCP.
    Tcp,
    /// UDP.
    Udp,
    /// Any protocol.
    All,
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tcp => write!(f, "tcp"),
            Self::Udp => write!(f, "udp"),
            Self::All => write!(f, "all"),
        }
    }
}

/// Traffic direction of a firewall rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Traffic arriving at the instance.
    Inbound,
    /// Traffic leaving the instance.
    Outbound,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Inbound => write!(f, "inbound"),
            Self::Outbound => write!(f, "outbound"),
        }
    }
}

/// A single allow rule attached to an instance.
///
/// `port == None` means every port.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FirewallRule {
    /// Traffic direction.
    pub direction: Direction,
    /// Protocol.
    pub protocol: Protocol,
    /// Destination port for inbound, or `None` for all ports.
    pub port: Option<u16>,
    /// Peer CIDR (source for inbound, destination for outbound).
    pub cidr: String,
    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl FirewallRule {
    /// Inbound TCP rule for one port.
    #[must_use]
    pub fn inbound_tcp(port: u16, cidr: impl Into<String>) -> Self {
        Self {
            direction: Direction::Inbound,
            protocol: Protocol::Tcp,
            port: Some(port),
            cidr: cidr.into(),
            description: None,
        }
    }

    /// Outbound rule allowing all traffic to `cidr`.
    #[must_use]
    pub fn outbound_all(cidr: impl Into<String>) -> Self {
        Self {
            direction: Direction::Outbound,
            protocol: Protocol::All,
            port: None,
            cidr: cidr.into(),
            description: None,
        }
    }

    /// Attach a description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Whether two rules allow the same traffic, ignoring descriptions.
    #[must_use]
    pub fn same_traffic(&self, other: &Self) -> bool {
        self.direction == other.direction
            && self.protocol == other.protocol
            && self.port == other.port
            && self.cidr == other.cidr
    }
}

impl std::fmt::Display for FirewallRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let port = self
            .port
            .map_or_else(|| "*".to_string(), |p| p.to_string());
        write!(
            f,
            "{} {}/{} {}",
            self.direction, self.protocol, port, self.cidr
        )
    }
}

// ============================================================================
// Instance (VM) types
// ============================================================================

/// Instance (VM) status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    /// Instance is pending creation.
    Pending,
    /// Instance is running.
    Running,
    /// Instance is stopped.
    Stopped,
    /// Instance is being terminated.
    Terminating,
    /// Instance is terminated.
    Terminated,
    /// Unknown status.
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
            Self::Terminating => write!(f, "terminating"),
            Self::Terminated => write!(f, "terminated"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// A virtual machine instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    /// Unique instance identifier.
    pub id: String,
    /// Instance name (the `Name` tag).
    pub name: String,
    /// Current status.
    pub status: InstanceStatus,
    /// Instance type/size.
    pub instance_type: String,
    /// Region/zone.
    pub region: String,
    /// Public IPv4 address.
    pub public_ip: Option<String>,
    /// Private IPv4 address.
    pub private_ip: Option<String>,
    /// OS image used.
    pub image: String,
    /// Root volume size in GiB, when the backend reports it.
    #[serde(default)]
    pub root_volume_gib: Option<u32>,
    /// Firewall rules currently attached.
    #[serde(default)]
    pub firewall_rules: Vec<FirewallRule>,
    /// Tags.
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    /// When the instance was created.
    pub created_at: Option<DateTime<Utc>>,
}

/// Root volume specification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootVolume {
    /// Device name (e.g. `/dev/sda1`).
    pub device_name: String,
    /// Size in GiB.
    pub size_gib: u32,
    /// Volume type (e.g. `gp3`).
    pub volume_type: String,
}

/// Request to create a new instance (VM).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateInstanceRequest {
    /// Instance name.
    pub name: String,
    /// Instance type/size.
    pub instance_type: String,
    /// Region/zone to deploy in.
    pub region: String,
    /// OS image to use.
    pub image: String,
    /// SSH key names/IDs.
    pub ssh_keys: Vec<String>,
    /// Root volume.
    pub root_volume: RootVolume,
    /// Firewall rules to attach at creation.
    pub firewall_rules: Vec<FirewallRule>,
    /// User data/cloud-init script (optional).
    pub user_data: Option<String>,
    /// Extra tags. `Name` is always set from `name`.
    pub tags: BTreeMap<String, String>,
}

/// Trait for cloud providers.
///
/// Implementations are opaque declarative backends: they report observed
/// state and perform single mutations, but never decide what to change.
#[cfg_attr(feature = "mock", mockall::automock)]
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Create a new instance (VM) with its firewall rules attached.
    async fn create_instance(
        &self,
        req: CreateInstanceRequest,
    ) -> Result<Instance, CloudProviderError>;

    /// Get instance by ID.
    async fn get_instance(&self, id: &str) -> Result<Instance, CloudProviderError>;

    /// Find the live (non-terminated) instance carrying the given `Name` tag.
    async fn find_instance(&self, name: &str) -> Result<Option<Instance>, CloudProviderError>;

    /// Wait for instance to be running.
    async fn wait_instance_ready(
        &self,
        id: &str,
        timeout_secs: u64,
    ) -> Result<Instance, CloudProviderError>;

    /// Replace the firewall rules attached to an instance in place.
    async fn replace_firewall_rules(
        &self,
        id: &str,
        rules: Vec<FirewallRule>,
    ) -> Result<(), CloudProviderError>;

    /// Terminate an instance.
    async fn terminate_instance(&self, id: &str) -> Result<(), CloudProviderError>;

    /// List all instances.
    async fn list_instances(&self) -> Result<Vec<Instance>, CloudProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_traffic_ignores_description() {
        let a = FirewallRule::inbound_tcp(22, "203.0.113.5/32").with_description("ssh");
        let b = FirewallRule::inbound_tcp(22, "203.0.113.5/32");
        assert!(a.same_traffic(&b));
        assert_ne!(a, b);
    }

    #[test]
    fn test_rule_display() {
        assert_eq!(
            FirewallRule::inbound_tcp(11434, "10.0.0.0/8").to_string(),
            "inbound tcp/11434 10.0.0.0/8"
        );
        assert_eq!(
            FirewallRule::outbound_all("0.0.0.0/0").to_string(),
            "outbound all/* 0.0.0.0/0"
        );
    }

    #[test]
    fn test_status_deserializes_unknown() {
        let status: InstanceStatus = serde_json::from_str("\"rebooting\"").unwrap();
        assert_eq!(status, InstanceStatus::Unknown);
    }
}
