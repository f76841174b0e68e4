//! Local file-backed provider.
//!
//! Keeps instances in a JSON state file instead of a real cloud account.
//! Instances are reported as running immediately after creation. Useful for
//! dry runs of the provisioning workflow and for tests.

mod client;
mod store;

pub use client::LocalProvider;
pub use store::LocalState;
