//! AWS (Amazon Web Services) cloud provider.
//!
//! Implements the [`CloudProvider`](crate::CloudProvider) trait on top of EC2.
//! Each host gets its own security group, so firewall rules can be replaced
//! in place without touching the instance.
//!
//! ## Recommended Instance Types
//!
//! ### CPU inference (small models, 1b-9b quantized):
//! - **t3.large**: 2 vCPU, 8GB RAM
//! - **t3.xlarge**: 4 vCPU, 16GB RAM
//! - **m6i.2xlarge**: 8 vCPU, 32GB RAM
//!
//! ### GPU inference:
//! - **g4dn.xlarge**: 4 vCPU, 16GB RAM, 1x T4 (16GB)
//! - **g5.2xlarge**: 8 vCPU, 32GB RAM, 1x A10G (24GB)

mod client;
mod models;

pub use client::Aws;
pub use models::*;
