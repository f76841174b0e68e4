//! Provision and reconcile a single-node model-serving host.
//!
//! One deployment config flows through the whole pipeline:
//!
//! ```text
//! RawConfig --resolve--> DeploymentConfig --+--> NetworkPolicy --+
//!                                           |                    +--> ProvisionPlan --> ReconcileEngine
//!                                           +--> BootstrapScript +
//! ```
//!
//! Once the backend reports the host running, [`readiness::ReadinessProbe`]
//! polls the daemon until it answers. The bootstrap script itself runs on
//! the host and is only observable through its durable log, which
//! [`bootstrap::BootstrapReport`] parses.

pub mod bootstrap;
pub mod config;
pub mod error;
pub mod network;
pub mod plan;
pub mod readiness;
pub mod reconcile;

pub use bootstrap::{BootstrapFailureKind, BootstrapReport, BootstrapScript, ServiceUnitSpec};
pub use config::{resolve, Cidr, DeploymentConfig, InstanceSize, RawConfig};
pub use error::{ProvisionError, Result};
pub use network::{build_network_policy, NetworkPolicy};
pub use plan::{plan, ImageRef, ProvisionPlan, StorageSpec};
pub use readiness::{ProbeConfig, ProbeReport, ReadinessOutcome, ReadinessProbe};
pub use reconcile::{
    diff, ApplyReport, ChangeSet, LifecycleStatus, Operation, ReconcileEngine,
    RemoteResourceState, ReplaceReason,
};

/// Resolve, derive the network policy, render the bootstrap script, and
/// build the plan in one step.
///
/// # Errors
/// Returns the first pre-flight error. Nothing touches the backend.
pub fn prepare(raw: RawConfig) -> Result<(DeploymentConfig, ProvisionPlan)> {
    let config = resolve(raw)?;
    let network = build_network_policy(&config)?;
    let script = bootstrap::generate(&config)?;
    let plan = plan(&config, network, &script)?;
    Ok((config, plan))
}
