//! Diff-and-apply against the cloud backend.
//!
//! The engine always reads the backend fresh before deciding anything, then
//! computes the smallest set of operations that brings the host to the
//! plan:
//!
//! - no live host with the plan's name: create it
//! - image, instance type, or root volume differ: replace (these cannot be
//!   changed on a running host)
//! - only firewall rules differ: update them in place
//! - otherwise: nothing to do
//!
//! Invocations against the same host must be serialized by the caller. The
//! backend is the only arbiter of concurrent writes.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use inference_cloud::{CloudProvider, FirewallRule, Instance, InstanceStatus};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::Result;
use crate::plan::{ProvisionPlan, MODEL_TAG};

/// Lifecycle of an observed host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleStatus {
    /// Booting or in a transitional state.
    Pending,
    /// Running.
    Running,
    /// Stopped but still present.
    Stopped,
    /// Gone or going away.
    Terminated,
}

impl From<InstanceStatus> for LifecycleStatus {
    fn from(status: InstanceStatus) -> Self {
        match status {
            InstanceStatus::Running => Self::Running,
            InstanceStatus::Stopped => Self::Stopped,
            InstanceStatus::Terminating | InstanceStatus::Terminated => Self::Terminated,
            InstanceStatus::Pending | InstanceStatus::Unknown => Self::Pending,
        }
    }
}

impl fmt::Display for LifecycleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
            Self::Terminated => write!(f, "terminated"),
        }
    }
}

/// Host state as last read from the backend.
///
/// Only [`ReconcileEngine`] produces these, from a fresh backend read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteResourceState {
    id: String,
    name: String,
    image: String,
    instance_type: String,
    storage_gib: Option<u32>,
    status: LifecycleStatus,
    network_rules: Vec<FirewallRule>,
    public_ip: Option<String>,
    model: Option<String>,
}

impl RemoteResourceState {
    fn from_instance(instance: Instance) -> Self {
        Self {
            id: instance.id,
            name: instance.name,
            image: instance.image,
            instance_type: instance.instance_type,
            storage_gib: instance.root_volume_gib,
            status: instance.status.into(),
            network_rules: instance.firewall_rules,
            public_ip: instance.public_ip,
            model: instance.tags.get(MODEL_TAG).cloned(),
        }
    }

    /// Backend ID.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Identity key.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Image ID the host was created from.
    #[must_use]
    pub fn image(&self) -> &str {
        &self.image
    }

    /// Backend instance type.
    #[must_use]
    pub fn instance_type(&self) -> &str {
        &self.instance_type
    }

    /// Root volume size, when the backend reports it.
    #[must_use]
    pub fn storage_gib(&self) -> Option<u32> {
        self.storage_gib
    }

    /// Lifecycle status.
    #[must_use]
    pub fn status(&self) -> LifecycleStatus {
        self.status
    }

    /// Firewall rules currently attached.
    #[must_use]
    pub fn network_rules(&self) -> &[FirewallRule] {
        &self.network_rules
    }

    /// Public IPv4 address, once assigned.
    #[must_use]
    pub fn public_ip(&self) -> Option<&str> {
        self.public_ip.as_deref()
    }

    /// Model the host was bootstrapped with, from its tags.
    #[must_use]
    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }
}

/// An attribute that forces the host to be recreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "attribute", rename_all = "snake_case")]
pub enum ReplaceReason {
    /// Machine image changed.
    Image { from: String, to: String },
    /// Instance type changed.
    InstanceType { from: String, to: String },
    /// Root volume size changed.
    Storage { from: u32, to: u32 },
    /// Model changed. The bootstrap payload only runs at first boot.
    Model { from: String, to: String },
}

impl fmt::Display for ReplaceReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Image { from, to } => write!(f, "image {from} -> {to}"),
            Self::InstanceType { from, to } => write!(f, "instance_type {from} -> {to}"),
            Self::Storage { from, to } => write!(f, "storage {from} GiB -> {to} GiB"),
            Self::Model { from, to } => write!(f, "model {from} -> {to}"),
        }
    }
}

/// One backend mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    /// Create the host.
    Create {
        name: String,
        instance_type: String,
        image: String,
    },
    /// Replace the attached firewall rules in place.
    UpdateNetworkRules {
        id: String,
        from: Vec<FirewallRule>,
        to: Vec<FirewallRule>,
    },
    /// Terminate the host and create it again.
    Replace {
        id: String,
        reasons: Vec<ReplaceReason>,
    },
    /// Terminate the host.
    Destroy { id: String },
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create {
                name,
                instance_type,
                image,
            } => write!(f, "+ create {name} ({instance_type}, {image})"),
            Self::UpdateNetworkRules { id, from, to } => {
                writeln!(f, "~ update network rules on {id}")?;
                for rule in from.iter().filter(|r| !to.iter().any(|t| t.same_traffic(r))) {
                    writeln!(f, "    - {rule}")?;
                }
                let added: Vec<_> = to
                    .iter()
                    .filter(|r| !from.iter().any(|o| o.same_traffic(r)))
                    .collect();
                for (i, rule) in added.iter().enumerate() {
                    if i + 1 == added.len() {
                        write!(f, "    + {rule}")?;
                    } else {
                        writeln!(f, "    + {rule}")?;
                    }
                }
                Ok(())
            }
            Self::Replace { id, reasons } => {
                let reasons: Vec<_> = reasons.iter().map(ToString::to_string).collect();
                write!(f, "-/+ replace {id} ({})", reasons.join(", "))
            }
            Self::Destroy { id } => write!(f, "- destroy {id}"),
        }
    }
}

/// Ordered operations converging one host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChangeSet {
    /// Operations in execution order.
    pub operations: Vec<Operation>,
}

impl ChangeSet {
    /// Whether the host already matches.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Number of operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.operations.len()
    }
}

impl fmt::Display for ChangeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.operations.is_empty() {
            return write!(f, "No changes. Host matches the plan.");
        }
        for (i, op) in self.operations.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{op}")?;
        }
        Ok(())
    }
}

/// Result of an apply or destroy.
#[derive(Debug, Clone, Serialize)]
pub struct ApplyReport {
    /// When the run started.
    pub run_time: DateTime<Utc>,
    /// Host name.
    pub name: String,
    /// Operations executed, in order.
    pub operations: Vec<Operation>,
    /// Host state after the run; `None` when no host remains.
    pub resource: Option<RemoteResourceState>,
}

impl ApplyReport {
    /// Whether anything was changed.
    #[must_use]
    pub fn changed(&self) -> bool {
        !self.operations.is_empty()
    }
}

/// Compute the operations converging `observed` to `plan`.
///
/// Pure: no backend access.
#[must_use]
pub fn diff(plan: &ProvisionPlan, observed: Option<&RemoteResourceState>) -> ChangeSet {
    let Some(observed) = observed.filter(|o| o.status != LifecycleStatus::Terminated) else {
        return ChangeSet {
            operations: vec![Operation::Create {
                name: plan.name.clone(),
                instance_type: plan.instance_type.clone(),
                image: plan.image.id.clone(),
            }],
        };
    };

    let mut reasons = Vec::new();
    if observed.image != plan.image.id {
        reasons.push(ReplaceReason::Image {
            from: observed.image.clone(),
            to: plan.image.id.clone(),
        });
    }
    if observed.instance_type != plan.instance_type {
        reasons.push(ReplaceReason::InstanceType {
            from: observed.instance_type.clone(),
            to: plan.instance_type.clone(),
        });
    }
    if let Some(current) = observed.storage_gib.filter(|gib| *gib != plan.storage.size_gib) {
        reasons.push(ReplaceReason::Storage {
            from: current,
            to: plan.storage.size_gib,
        });
    }

    if let (Some(current), Some(wanted)) = (observed.model.as_deref(), plan.tags.get(MODEL_TAG)) {
        if current != wanted {
            reasons.push(ReplaceReason::Model {
                from: current.to_string(),
                to: wanted.clone(),
            });
        }
    }

    if !reasons.is_empty() {
        return ChangeSet {
            operations: vec![Operation::Replace {
                id: observed.id.clone(),
                reasons,
            }],
        };
    }

    if !plan.network.matches(&observed.network_rules) {
        return ChangeSet {
            operations: vec![Operation::UpdateNetworkRules {
                id: observed.id.clone(),
                from: observed.network_rules.clone(),
                to: plan.network.rules().to_vec(),
            }],
        };
    }

    ChangeSet::default()
}

/// Converges one host through a [`CloudProvider`].
pub struct ReconcileEngine {
    provider: Arc<dyn CloudProvider>,
}

impl ReconcileEngine {
    /// Create an engine over `provider`.
    #[must_use]
    pub fn new(provider: Arc<dyn CloudProvider>) -> Self {
        Self { provider }
    }

    /// Read the live host named `name`, if any.
    ///
    /// # Errors
    /// Returns the backend error verbatim.
    pub async fn observe(&self, name: &str) -> Result<Option<RemoteResourceState>> {
        let state = self
            .provider
            .find_instance(name)
            .await?
            .map(RemoteResourceState::from_instance)
            .filter(|s| s.status != LifecycleStatus::Terminated);

        debug!(
            name = %name,
            found = state.is_some(),
            status = ?state.as_ref().map(|s| s.status),
            "Observed remote state"
        );
        Ok(state)
    }

    /// Compute what [`apply`](Self::apply) would do, without mutating.
    ///
    /// # Errors
    /// Returns the backend error verbatim.
    pub async fn plan(&self, plan: &ProvisionPlan) -> Result<ChangeSet> {
        let observed = self.observe(&plan.name).await?;
        Ok(diff(plan, observed.as_ref()))
    }

    /// Converge the backend to `plan`.
    ///
    /// Stops at the first backend error and returns it unchanged. Nothing
    /// already done is rolled back; retrying or cleaning up is the caller's
    /// decision.
    ///
    /// # Errors
    /// Returns the first backend error.
    pub async fn apply(&self, plan: ProvisionPlan) -> Result<ApplyReport> {
        let run_time = Utc::now();
        let observed = self.observe(&plan.name).await?;
        let changes = diff(&plan, observed.as_ref());

        if changes.is_empty() {
            info!(name = %plan.name, "Host already matches plan");
            return Ok(ApplyReport {
                run_time,
                name: plan.name,
                operations: Vec::new(),
                resource: observed,
            });
        }

        let mut resource = observed;
        for op in &changes.operations {
            info!(name = %plan.name, operation = %op, "Applying");
            resource = match op {
                Operation::Create { .. } => Some(self.create(&plan).await?),
                Operation::Replace { id, reasons } => {
                    info!(instance_id = %id, reason_count = reasons.len(), "Replacing host");
                    self.provider.terminate_instance(id).await?;
                    Some(self.create(&plan).await?)
                }
                Operation::UpdateNetworkRules { id, to, .. } => {
                    self.provider
                        .replace_firewall_rules(id, to.clone())
                        .await?;
                    resource.map(|mut state| {
                        state.network_rules.clone_from(to);
                        state
                    })
                }
                Operation::Destroy { id } => {
                    self.provider.terminate_instance(id).await?;
                    None
                }
            };
        }

        info!(name = %plan.name, operations = changes.len(), "Apply complete");
        Ok(ApplyReport {
            run_time,
            name: plan.name,
            operations: changes.operations,
            resource,
        })
    }

    /// Terminate the host named `name` if it exists.
    ///
    /// # Errors
    /// Returns the backend error verbatim.
    pub async fn destroy(&self, name: &str) -> Result<ApplyReport> {
        let run_time = Utc::now();
        let Some(observed) = self.observe(name).await? else {
            info!(name = %name, "Nothing to destroy");
            return Ok(ApplyReport {
                run_time,
                name: name.to_string(),
                operations: Vec::new(),
                resource: None,
            });
        };

        let op = Operation::Destroy {
            id: observed.id.clone(),
        };
        info!(name = %name, operation = %op, "Applying");
        self.provider.terminate_instance(&observed.id).await?;

        Ok(ApplyReport {
            run_time,
            name: name.to_string(),
            operations: vec![op],
            resource: None,
        })
    }

    /// Block until the host is running at the backend, returning its state.
    ///
    /// # Errors
    /// Returns the backend error, including its timeout, verbatim.
    pub async fn wait_running(&self, id: &str, timeout_secs: u64) -> Result<RemoteResourceState> {
        let instance = self.provider.wait_instance_ready(id, timeout_secs).await?;
        Ok(RemoteResourceState::from_instance(instance))
    }

    async fn create(&self, plan: &ProvisionPlan) -> Result<RemoteResourceState> {
        let instance = self.provider.create_instance(plan.to_create_request()).await?;
        info!(instance_id = %instance.id, name = %instance.name, "Host created");
        Ok(RemoteResourceState::from_instance(instance))
    }
}
