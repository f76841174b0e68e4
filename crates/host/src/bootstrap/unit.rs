//! Service supervision unit for the inference daemon.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::json;

use super::renderer;
use crate::config::SERVICE_PORT;
use crate::error::{ProvisionError, Result};

const UNIT_TEMPLATE: &str = include_str!("../../templates/inference.service.hbs");

/// Default service account.
pub const SERVICE_USER: &str = "ollama";

/// Default unit name.
pub const SERVICE_NAME: &str = "ollama";

/// Restart delay after a crash.
pub const RESTART_DELAY_SECS: u32 = 3;

/// Supervisor restart policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicy {
    /// Restart whenever the process exits.
    Always,
    /// Restart only after an unclean exit.
    OnFailure,
}

impl std::fmt::Display for RestartPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Always => write!(f, "always"),
            Self::OnFailure => write!(f, "on-failure"),
        }
    }
}

/// Definition of the supervised daemon process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceUnitSpec {
    /// Unit name, without the `.service` suffix.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Command line started by the supervisor.
    pub exec_command: String,
    /// Account the process runs as. Never `root`.
    pub run_as_user: String,
    /// Restart policy.
    pub restart_policy: RestartPolicy,
    /// Delay before a restart.
    pub restart_delay_secs: u32,
    /// Environment passed to the process.
    pub environment: BTreeMap<String, String>,
}

impl Default for ServiceUnitSpec {
    fn default() -> Self {
        Self {
            name: SERVICE_NAME.to_string(),
            description: "Ollama inference daemon".to_string(),
            exec_command: "/usr/local/bin/ollama serve".to_string(),
            run_as_user: SERVICE_USER.to_string(),
            restart_policy: RestartPolicy::Always,
            restart_delay_secs: RESTART_DELAY_SECS,
            environment: BTreeMap::from([(
                "OLLAMA_HOST".to_string(),
                format!("0.0.0.0:{SERVICE_PORT}"),
            )]),
        }
    }
}

impl ServiceUnitSpec {
    /// Path of the rendered unit file inside `unit_dir`.
    #[must_use]
    pub fn unit_path(&self, unit_dir: &str) -> String {
        format!("{}/{}.service", unit_dir.trim_end_matches('/'), self.name)
    }

    /// Check the unit guarantees unprivileged, self-healing supervision.
    ///
    /// # Errors
    /// Returns [`ProvisionError::InvalidServiceUnit`] describing the violation.
    pub fn validate(&self) -> Result<()> {
        let user = self.run_as_user.trim();
        if user.is_empty() || user == "root" || user == "0" {
            return Err(ProvisionError::InvalidServiceUnit(format!(
                "run_as_user must be an unprivileged account, got '{}'",
                self.run_as_user
            )));
        }
        if self.restart_policy != RestartPolicy::Always {
            return Err(ProvisionError::InvalidServiceUnit(format!(
                "restart policy must be always, got {}",
                self.restart_policy
            )));
        }
        if self.exec_command.trim().is_empty() {
            return Err(ProvisionError::InvalidServiceUnit(
                "exec_command is empty".to_string(),
            ));
        }
        if self
            .environment
            .iter()
            .any(|(k, v)| k.contains(['=', '"', '\n']) || v.contains(['"', '\n']))
        {
            return Err(ProvisionError::InvalidServiceUnit(
                "environment entries may not contain quotes, '=' in keys, or newlines".to_string(),
            ));
        }
        Ok(())
    }

    /// Render the systemd unit file.
    ///
    /// # Errors
    /// Returns an error if the spec is invalid or the template fails.
    pub fn render(&self) -> Result<String> {
        self.validate()?;

        let context = json!({
            "description": self.description,
            "exec_command": self.exec_command,
            "user": self.run_as_user,
            "restart": self.restart_policy.to_string(),
            "restart_delay_secs": self.restart_delay_secs,
            "environment": self.environment,
        });

        renderer()?
            .render_template(UNIT_TEMPLATE, &context)
            .map_err(|e| ProvisionError::Template(format!("service unit: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_unit_renders() {
        let unit = ServiceUnitSpec::default().render().unwrap();
        assert!(unit.contains("ExecStart=/usr/local/bin/ollama serve"));
        assert!(unit.contains("User=ollama"));
        assert!(unit.contains("Restart=always"));
        assert!(unit.contains("RestartSec=3"));
        assert!(unit.contains("Environment=\"OLLAMA_HOST=0.0.0.0:11434\""));
        assert!(unit.contains("WantedBy=multi-user.target"));
    }

    #[test]
    fn test_root_is_rejected() {
        let spec = ServiceUnitSpec {
            run_as_user: "root".to_string(),
            ..ServiceUnitSpec::default()
        };
        assert!(matches!(
            spec.validate(),
            Err(ProvisionError::InvalidServiceUnit(_))
        ));
    }

    #[test]
    fn test_restart_must_be_always() {
        let spec = ServiceUnitSpec {
            restart_policy: RestartPolicy::OnFailure,
            ..ServiceUnitSpec::default()
        };
        assert!(spec.render().is_err());
    }

    #[test]
    fn test_environment_is_sorted() {
        let mut spec = ServiceUnitSpec::default();
        spec.environment
            .insert("OLLAMA_KEEP_ALIVE".to_string(), "24h".to_string());
        let unit = spec.render().unwrap();

        let host = unit.find("OLLAMA_HOST").unwrap();
        let keep_alive = unit.find("OLLAMA_KEEP_ALIVE").unwrap();
        assert!(host < keep_alive);
    }
}
