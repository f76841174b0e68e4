//! First-boot bootstrap script generation.
//!
//! The script runs once as cloud-init user data on the new host. It installs
//! the inference daemon, supervises it with systemd, pulls the configured
//! model, and leaves a durable log for post-hoc diagnosis:
//!
//! ```text
//! refresh-packages -> install-tools -> install-daemon -> create-service-account
//!   -> write-service-unit -> start-service -> wait-for-listener -> pull-model
//!   -> write-summary
//! ```
//!
//! Failures before the service is up abort the run. A failed model pull is
//! recorded but tolerated: the host stays reachable and the pull can be
//! retried by hand.

mod report;
mod unit;

use handlebars::Handlebars;
use serde::Serialize;
use serde_json::json;
use tracing::debug;

pub use report::{BootstrapFailure, BootstrapReport, StepRecord, StepStatus};
pub use unit::{RestartPolicy, ServiceUnitSpec, RESTART_DELAY_SECS, SERVICE_NAME, SERVICE_USER};

use crate::config::DeploymentConfig;
use crate::error::{ProvisionError, Result};

const SCRIPT_TEMPLATE: &str = include_str!("../../templates/bootstrap.sh.hbs");

/// Durable log written by the script on the host.
pub const DEFAULT_LOG_PATH: &str = "/var/log/inference-bootstrap.log";

/// Directory the supervisor loads units from.
pub const DEFAULT_UNIT_DIR: &str = "/etc/systemd/system";

/// Installer for the inference daemon.
pub const DEFAULT_INSTALLER_URL: &str = "https://ollama.com/install.sh";

/// Handlebars registry shared by the script and unit templates.
pub(crate) fn renderer() -> Result<Handlebars<'static>> {
    let mut handlebars = Handlebars::new();
    handlebars.set_strict_mode(true);
    handlebars.register_escape_fn(handlebars::no_escape);
    Ok(handlebars)
}

/// Category of a bootstrap failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BootstrapFailureKind {
    /// Package index refresh, tool install, or daemon install failed.
    PackageInstallFailed,
    /// Service account, unit, start, or listener failed.
    ServiceStartFailed,
    /// The model could not be pulled.
    ModelPullFailed,
}

impl BootstrapFailureKind {
    /// Identifier used in the durable log.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PackageInstallFailed => "package_install_failed",
            Self::ServiceStartFailed => "service_start_failed",
            Self::ModelPullFailed => "model_pull_failed",
        }
    }
}

impl std::fmt::Display for BootstrapFailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BootstrapFailureKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "package_install_failed" => Ok(Self::PackageInstallFailed),
            "service_start_failed" => Ok(Self::ServiceStartFailed),
            "model_pull_failed" => Ok(Self::ModelPullFailed),
            _ => Err(format!("unknown failure kind: {s}")),
        }
    }
}

/// What happens when a step fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FailurePolicy {
    /// Record the failure and stop with the step's exit status.
    Abort(BootstrapFailureKind),
    /// Record the failure and continue.
    Record(BootstrapFailureKind),
    /// Continue without recording.
    Ignore,
}

impl FailurePolicy {
    fn shell_args(self) -> (&'static str, &'static str) {
        match self {
            Self::Abort(kind) => ("abort", kind.as_str()),
            Self::Record(kind) => ("record", kind.as_str()),
            Self::Ignore => ("ignore", "none"),
        }
    }
}

/// One idempotent step of the bootstrap sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BootstrapStep {
    /// Step name, as logged.
    pub name: &'static str,
    /// Shell commands, run with `set -e` in a subshell when `isolated`.
    pub commands: Vec<String>,
    /// Shell command that must succeed after the commands for the step to pass.
    pub success_condition: String,
    /// Failure handling.
    pub on_failure: FailurePolicy,
    /// Run in a subshell. Steps that must change script state run inline.
    pub isolated: bool,
}

impl BootstrapStep {
    fn new(
        name: &'static str,
        commands: Vec<String>,
        success_condition: impl Into<String>,
        on_failure: FailurePolicy,
    ) -> Self {
        Self {
            name,
            commands,
            success_condition: success_condition.into(),
            on_failure,
            isolated: true,
        }
    }

    /// Whether a failure here stops the sequence.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self.on_failure, FailurePolicy::Abort(_))
    }

    fn fn_name(&self) -> String {
        self.name.replace('-', "_")
    }
}

/// Tunables for script generation.
#[derive(Debug, Clone)]
pub struct BootstrapSettings {
    /// Durable log location on the host.
    pub log_path: String,
    /// Installer URL for the daemon.
    pub installer_url: String,
    /// Supporting packages installed when missing.
    pub tools: Vec<String>,
    /// How long to wait for the daemon's listener.
    pub listener_timeout_secs: u64,
    /// Poll interval while waiting for the listener.
    pub listener_interval_secs: u64,
    /// Supervised service definition.
    pub unit: ServiceUnitSpec,
    /// Where the unit file is written.
    pub unit_dir: String,
}

impl Default for BootstrapSettings {
    fn default() -> Self {
        Self {
            log_path: DEFAULT_LOG_PATH.to_string(),
            installer_url: DEFAULT_INSTALLER_URL.to_string(),
            tools: ["curl", "ca-certificates", "tar", "zstd"]
                .into_iter()
                .map(String::from)
                .collect(),
            listener_timeout_secs: 120,
            listener_interval_secs: 2,
            unit: ServiceUnitSpec::default(),
            unit_dir: DEFAULT_UNIT_DIR.to_string(),
        }
    }
}

/// Rendered bootstrap sequence.
#[derive(Debug, Clone)]
pub struct BootstrapScript {
    steps: Vec<BootstrapStep>,
    model_identifier: String,
    log_path: String,
    rendered: String,
}

impl BootstrapScript {
    /// Ordered steps.
    #[must_use]
    pub fn steps(&self) -> &[BootstrapStep] {
        &self.steps
    }

    /// Look up a step by name.
    #[must_use]
    pub fn step(&self, name: &str) -> Option<&BootstrapStep> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// Model the script pulls.
    #[must_use]
    pub fn model_identifier(&self) -> &str {
        &self.model_identifier
    }

    /// Durable log location on the host.
    #[must_use]
    pub fn log_path(&self) -> &str {
        &self.log_path
    }

    /// Shell script text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.rendered
    }

    /// Consume into the shell script text.
    #[must_use]
    pub fn into_string(self) -> String {
        self.rendered
    }

    /// Run the step sequence in-process with `outcome` deciding whether each
    /// step succeeds, applying the same failure policy as the shell script.
    pub fn simulate(&self, mut outcome: impl FnMut(&BootstrapStep) -> bool) -> BootstrapReport {
        let mut report = BootstrapReport::default();
        let mut service_started = false;

        for step in &self.steps {
            if outcome(step) {
                report.steps.push(StepRecord {
                    name: step.name.to_string(),
                    status: StepStatus::Ok,
                    exit_code: Some(0),
                });
                if step.name == "start-service" {
                    service_started = true;
                }
                if step.name == "pull-model" {
                    report.models.push(self.model_identifier.clone());
                }
                continue;
            }

            report.steps.push(StepRecord {
                name: step.name.to_string(),
                status: StepStatus::Failed,
                exit_code: Some(1),
            });

            match step.on_failure {
                FailurePolicy::Abort(kind) => {
                    report.failures.push(BootstrapFailure {
                        kind,
                        step: step.name.to_string(),
                        exit_code: Some(1),
                    });
                    report.exit_status = Some(1);
                    break;
                }
                FailurePolicy::Record(kind) => report.failures.push(BootstrapFailure {
                    kind,
                    step: step.name.to_string(),
                    exit_code: Some(1),
                }),
                FailurePolicy::Ignore => {}
            }
        }

        report.exit_status.get_or_insert(0);
        report.service_status = Some(if service_started { "active" } else { "inactive" }.to_string());
        report.complete = true;
        report
    }
}

/// Render the bootstrap script with default settings.
///
/// # Errors
/// Returns an error if the service unit is invalid or a template fails.
pub fn generate(config: &DeploymentConfig) -> Result<BootstrapScript> {
    generate_with(config, &BootstrapSettings::default())
}

/// Render the bootstrap script.
///
/// # Errors
/// Returns an error if the service unit is invalid or a template fails.
pub fn generate_with(
    config: &DeploymentConfig,
    settings: &BootstrapSettings,
) -> Result<BootstrapScript> {
    let steps = build_steps(config, settings)?;

    let step_context: Vec<_> = steps
        .iter()
        .map(|step| {
            let (policy, kind) = step.on_failure.shell_args();
            json!({
                "name": step.name,
                "fn_name": step.fn_name(),
                "isolated": step.isolated,
                "policy": policy,
                "kind": kind,
                "commands": step.commands.join("\n"),
                "check": step.success_condition,
            })
        })
        .collect();

    let context = json!({
        "name": config.name,
        "model": config.model_identifier,
        "log_path": settings.log_path,
        "service_name": settings.unit.name,
        "port": config.service_port,
        "steps": step_context,
    });

    let rendered = renderer()?
        .render_template(SCRIPT_TEMPLATE, &context)
        .map_err(|e| ProvisionError::Template(format!("bootstrap script: {e}")))?;

    debug!(
        name = %config.name,
        steps = steps.len(),
        bytes = rendered.len(),
        "Bootstrap script rendered"
    );

    Ok(BootstrapScript {
        steps,
        model_identifier: config.model_identifier.clone(),
        log_path: settings.log_path.clone(),
        rendered,
    })
}

fn build_steps(
    config: &DeploymentConfig,
    settings: &BootstrapSettings,
) -> Result<Vec<BootstrapStep>> {
    use BootstrapFailureKind::{ModelPullFailed, PackageInstallFailed, ServiceStartFailed};

    let unit = &settings.unit;
    let unit_file = unit.render()?;
    let unit_path = unit.unit_path(&settings.unit_dir);
    let user = &unit.run_as_user;
    let service = &unit.name;
    let port = config.service_port;
    let model = &config.model_identifier;
    let local_api = format!("http://127.0.0.1:{port}");

    let mut summary = BootstrapStep::new(
        "write-summary",
        vec!["write_summary".to_string()],
        "true",
        FailurePolicy::Ignore,
    );
    summary.isolated = false;

    Ok(vec![
        BootstrapStep::new(
            "refresh-packages",
            vec![
                "export DEBIAN_FRONTEND=noninteractive".to_string(),
                "apt-get update -y".to_string(),
                "apt-get -o Dpkg::Options::=--force-confold upgrade -y".to_string(),
            ],
            "apt-get check >/dev/null",
            FailurePolicy::Abort(PackageInstallFailed),
        ),
        BootstrapStep::new(
            "install-tools",
            vec![
                "export DEBIAN_FRONTEND=noninteractive".to_string(),
                "missing=\"\"".to_string(),
                format!(
                    "for pkg in {}; do dpkg -s \"$pkg\" >/dev/null 2>&1 || missing=\"$missing $pkg\"; done",
                    settings.tools.join(" ")
                ),
                "if [ -n \"$missing\" ]; then apt-get install -y $missing; fi".to_string(),
            ],
            "command -v curl >/dev/null",
            FailurePolicy::Abort(PackageInstallFailed),
        ),
        BootstrapStep::new(
            "install-daemon",
            vec![format!(
                "command -v ollama >/dev/null 2>&1 || curl -fsSL {} | sh",
                settings.installer_url
            )],
            "command -v ollama >/dev/null",
            FailurePolicy::Abort(PackageInstallFailed),
        ),
        BootstrapStep::new(
            "create-service-account",
            vec![format!(
                "if ! id -u {user} >/dev/null 2>&1; then useradd --system --create-home \
                 --home-dir /usr/share/{user} --shell /usr/sbin/nologin {user}; fi"
            )],
            format!("id -u {user} >/dev/null"),
            FailurePolicy::Abort(ServiceStartFailed),
        ),
        BootstrapStep::new(
            "write-service-unit",
            vec![
                format!("cat > {unit_path} <<'UNIT'\n{}UNIT", ensure_newline(&unit_file)),
                "systemctl daemon-reload".to_string(),
            ],
            format!("test -s {unit_path}"),
            FailurePolicy::Abort(ServiceStartFailed),
        ),
        BootstrapStep::new(
            "start-service",
            vec![
                format!("systemctl enable {service}"),
                format!("systemctl restart {service}"),
            ],
            format!("systemctl is-active --quiet {service}"),
            FailurePolicy::Abort(ServiceStartFailed),
        ),
        BootstrapStep::new(
            "wait-for-listener",
            vec![
                format!(
                    "deadline=$(( $(date +%s) + {} ))",
                    settings.listener_timeout_secs
                ),
                format!("until curl -fsS --max-time 5 {local_api}/api/tags >/dev/null; do"),
                "  [ \"$(date +%s)\" -lt \"$deadline\" ] || exit 1".to_string(),
                format!("  sleep {}", settings.listener_interval_secs),
                "done".to_string(),
            ],
            "true",
            FailurePolicy::Abort(ServiceStartFailed),
        ),
        BootstrapStep::new(
            "pull-model",
            vec![format!("OLLAMA_HOST=127.0.0.1:{port} ollama pull '{model}'")],
            format!("OLLAMA_HOST=127.0.0.1:{port} ollama list | grep -qF '{model}'"),
            FailurePolicy::Record(ModelPullFailed),
        ),
        summary,
    ])
}

fn ensure_newline(text: &str) -> String {
    if text.ends_with('\n') {
        text.to_string()
    } else {
        format!("{text}\n")
    }
}
