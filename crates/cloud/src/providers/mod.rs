//! Cloud provider abstractions.
//!
//! This module defines the common traits and types for cloud providers.

pub mod aws;
pub mod local;
mod traits;

#[cfg(feature = "mock")]
pub use traits::MockCloudProvider;
pub use traits::{
    CloudProvider, CloudProviderError, CreateInstanceRequest, Direction, FirewallRule, Instance,
    InstanceStatus, Protocol, RootVolume,
};

// Re-export provider clients
pub use aws::Aws;
pub use local::LocalProvider;
