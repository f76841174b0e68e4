//! Error types for provisioning operations.

use inference_cloud::CloudProviderError;
use thiserror::Error;

/// Errors raised while resolving, planning, or reconciling a deployment.
///
/// Configuration and planning errors are raised before any remote call is
/// made. Backend errors are returned as soon as they occur and are never
/// retried here.
#[derive(Error, Debug)]
pub enum ProvisionError {
    /// A configuration field is missing or malformed.
    #[error("Invalid configuration for `{field}`: {reason}")]
    InvalidConfig { field: String, reason: String },

    /// No pinned image exists for the requested OS family or region.
    #[error("Unsupported image: {0}")]
    UnsupportedImage(String),

    /// The cloud backend rejected an operation.
    #[error("Backend error: {0}")]
    Backend(#[from] CloudProviderError),

    /// The service unit would not guarantee safe supervision.
    #[error("Invalid service unit: {0}")]
    InvalidServiceUnit(String),

    /// A bootstrap or unit template failed to render.
    #[error("Template error: {0}")]
    Template(String),
}

impl ProvisionError {
    /// Shorthand for [`ProvisionError::InvalidConfig`].
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Whether the error was raised before touching the backend.
    #[must_use]
    pub fn is_preflight(&self) -> bool {
        !matches!(self, Self::Backend(_))
    }
}

/// Result alias for provisioning operations.
pub type Result<T> = std::result::Result<T, ProvisionError>;
