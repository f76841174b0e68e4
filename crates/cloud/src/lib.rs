//! Cloud backend integrations for single-node inference hosts.
//!
//! The provisioner treats the cloud as an opaque declarative backend. This
//! crate provides that backend surface:
//!
//! - **AWS** - EC2 instances with a dedicated security group per host
//! - **Local** - a JSON state file standing in for a real cloud, used for
//!   dry runs and tests
//!
//! Both implement [`CloudProvider`], which only observes and mutates. Deciding
//! *what* to mutate is the caller's job.

pub mod providers;

#[cfg(feature = "mock")]
pub use providers::MockCloudProvider;
pub use providers::{
    aws, local, CloudProvider, CloudProviderError, CreateInstanceRequest, Direction,
    FirewallRule, Instance, InstanceStatus, Protocol, RootVolume,
};
