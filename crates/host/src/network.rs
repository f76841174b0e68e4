//! Firewall policy derived from a deployment config.

use inference_cloud::{Direction, FirewallRule};
use serde::Serialize;

use crate::config::{Cidr, DeploymentConfig, ADMIN_PORT};
use crate::error::{ProvisionError, Result};

/// Destination for the unrestricted outbound rule.
pub const OUTBOUND_CIDR: &str = "0.0.0.0/0";

/// Ordered allow-list for one host.
///
/// Always exactly two inbound TCP rules (SSH and the inference port) scoped
/// to the operator CIDR, followed by one outbound rule to anywhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkPolicy {
    rules: Vec<FirewallRule>,
}

impl NetworkPolicy {
    /// Rules in declaration order.
    #[must_use]
    pub fn rules(&self) -> &[FirewallRule] {
        &self.rules
    }

    /// Consume the policy into its rules.
    #[must_use]
    pub fn into_rules(self) -> Vec<FirewallRule> {
        self.rules
    }

    /// Inbound rules only.
    pub fn inbound(&self) -> impl Iterator<Item = &FirewallRule> {
        self.rules
            .iter()
            .filter(|r| r.direction == Direction::Inbound)
    }

    /// Outbound rules only.
    pub fn outbound(&self) -> impl Iterator<Item = &FirewallRule> {
        self.rules
            .iter()
            .filter(|r| r.direction == Direction::Outbound)
    }

    /// Whether `observed` allows exactly the same traffic, in any order.
    #[must_use]
    pub fn matches(&self, observed: &[FirewallRule]) -> bool {
        let key = |r: &FirewallRule| (r.direction, r.protocol, r.port, r.cidr.clone());

        let mut desired: Vec<_> = self.rules.iter().map(key).collect();
        let mut actual: Vec<_> = observed.iter().map(key).collect();
        desired.sort();
        desired.dedup();
        actual.sort();
        actual.dedup();

        desired == actual
    }
}

/// Build the allow-list for a deployment.
///
/// # Errors
/// Returns `InvalidConfig` if the CIDR no longer parses, which means the
/// config was constructed without going through [`crate::config::resolve`].
pub fn build_network_policy(config: &DeploymentConfig) -> Result<NetworkPolicy> {
    let cidr: Cidr = config
        .allowed_cidr
        .to_string()
        .parse()
        .map_err(|reason| ProvisionError::invalid("allowed_cidr", reason))?;
    let source = cidr.to_string();

    Ok(NetworkPolicy {
        rules: vec![
            FirewallRule::inbound_tcp(ADMIN_PORT, source.clone()).with_description("ssh"),
            FirewallRule::inbound_tcp(config.service_port, source).with_description("inference api"),
            FirewallRule::outbound_all(OUTBOUND_CIDR).with_description("all outbound"),
        ],
    })
}
