//! inference-host CLI - provision a single-node model-serving host.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use colored::Colorize;
use dialoguer::{theme::ColorfulTheme, Confirm};
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use inference_cloud::aws::Aws;
use inference_cloud::local::{LocalProvider, LocalState};
use inference_cloud::CloudProvider;
use inference_host::bootstrap::{self, BootstrapReport, StepStatus};
use inference_host::config::{DEFAULT_NAME, DEFAULT_REGION, SERVICE_PORT};
use inference_host::{
    diff, prepare, ChangeSet, DeploymentConfig, ProbeConfig, ProbeReport, ProvisionPlan,
    RawConfig, ReadinessOutcome, ReadinessProbe, ReconcileEngine,
};

/// inference-host - provision a single-node model-serving host.
#[derive(Parser)]
#[command(name = "inference-host")]
#[command(about = "Provision and reconcile a single-node model-serving host")]
#[command(version)]
struct Cli {
    /// Cloud backend.
    #[arg(long, value_enum, env = "INFERENCE_HOST_BACKEND", default_value = "aws", global = true)]
    backend: Backend,

    /// State file for the local backend.
    #[arg(long, env = "INFERENCE_HOST_STATE_FILE", global = true)]
    state_file: Option<PathBuf>,

    /// EC2 JSON gateway endpoint (see the aws backend docs).
    #[arg(long, env = "INFERENCE_HOST_AWS_ENDPOINT", global = true)]
    endpoint: Option<String>,

    /// Enable verbose logging.
    #[arg(short, long, default_value = "false", global = true)]
    verbose: bool,

    /// Log output format.
    #[arg(long, value_enum, default_value = "text", global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Backend {
    /// Amazon EC2.
    Aws,
    /// JSON state file, for dry runs.
    Local,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Clone, Copy, ValueEnum)]
enum RenderTarget {
    /// First-boot bootstrap script.
    Script,
    /// systemd unit for the daemon.
    Unit,
    /// Full provision plan as JSON.
    Plan,
}

/// Deployment settings. Flags override the environment, which overrides the file.
#[derive(Args)]
struct ConfigArgs {
    /// Deployment file (TOML, or YAML by extension).
    #[arg(short, long, env = "INFERENCE_HOST_CONFIG")]
    config: Option<PathBuf>,

    /// Deployment name (identity key at the backend).
    #[arg(long)]
    name: Option<String>,

    /// Backend region.
    #[arg(long)]
    region: Option<String>,

    /// SSH key pair name registered with the backend.
    #[arg(long)]
    ssh_key: Option<String>,

    /// CIDR allowed to reach SSH and the inference port (e.g. 203.0.113.5/32).
    #[arg(long)]
    allowed_cidr: Option<String>,

    /// Instance size (small, medium, large, gpu-small, gpu-large).
    #[arg(long)]
    size: Option<String>,

    /// Root volume size in GiB.
    #[arg(long)]
    storage_gib: Option<u32>,

    /// Model to pull, as name:tag.
    #[arg(long)]
    model: Option<String>,

    /// OS family for image lookup.
    #[arg(long)]
    os_family: Option<String>,

    /// Pinned image ID.
    #[arg(long)]
    image: Option<String>,

    /// Confirm that an open-world CIDR is intended.
    #[arg(long)]
    allow_open_world: bool,

    /// Extra tag, repeatable.
    #[arg(long = "tag", value_name = "KEY=VALUE", value_parser = parse_tag)]
    tags: Vec<(String, String)>,
}

impl ConfigArgs {
    fn overrides(&self) -> RawConfig {
        RawConfig {
            name: self.name.clone(),
            region: self.region.clone(),
            ssh_key: self.ssh_key.clone(),
            allowed_cidr: self.allowed_cidr.clone(),
            instance_size: self.size.clone(),
            storage_gib: self.storage_gib,
            model: self.model.clone(),
            service_port: None,
            os_family: self.os_family.clone(),
            image: self.image.clone(),
            allow_open_world: self.allow_open_world.then_some(true),
            tags: (!self.tags.is_empty()).then(|| self.tags.iter().cloned().collect::<BTreeMap<_, _>>()),
        }
    }

    /// Layer file, environment, and flags.
    fn load(&self) -> Result<RawConfig> {
        let mut raw = RawConfig::default();
        if let Some(path) = &self.config {
            raw = raw.merge(RawConfig::from_file(path)?);
        }
        raw = raw.merge(RawConfig::from_env().context("Invalid INFERENCE_HOST_* environment")?);
        Ok(raw.merge(self.overrides()))
    }
}

fn parse_tag(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("'{s}' is not KEY=VALUE"))?;
    if key.is_empty() {
        return Err(format!("'{s}' has an empty key"));
    }
    Ok((key.to_string(), value.to_string()))
}

#[derive(Subcommand)]
enum Commands {
    /// Show what apply would change. Never mutates.
    Plan {
        #[command(flatten)]
        config: ConfigArgs,

        /// Print the change set as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Converge the backend to the configured host.
    Apply {
        #[command(flatten)]
        config: ConfigArgs,

        /// Wait for the instance and the inference API to become ready.
        #[arg(long)]
        wait: bool,

        /// Seconds to wait for the instance and then for the API.
        #[arg(long, default_value = "900")]
        wait_timeout: u64,

        /// Seconds between readiness polls.
        #[arg(long, default_value = "10")]
        poll_interval: u64,

        /// Skip the confirmation prompt.
        #[arg(short, long)]
        yes: bool,
    },

    /// Terminate the host if it exists.
    Destroy {
        #[command(flatten)]
        config: ConfigArgs,

        /// Skip the confirmation prompt.
        #[arg(short, long)]
        yes: bool,
    },

    /// Print the bootstrap script, service unit, or plan without touching the backend.
    Render {
        #[command(flatten)]
        config: ConfigArgs,

        /// What to render.
        #[arg(long, value_enum, default_value = "script")]
        target: RenderTarget,

        /// Write to a file instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Poll a host's inference API until it is ready.
    Probe {
        /// Host address. Looked up at the backend by name when omitted.
        #[arg(long, env = "INFERENCE_HOST_ADDRESS")]
        host: Option<String>,

        /// Deployment name used for the lookup.
        #[arg(long, default_value = DEFAULT_NAME)]
        name: String,

        /// Backend region used for the lookup.
        #[arg(long, default_value = DEFAULT_REGION)]
        region: String,

        /// Inference API port.
        #[arg(long, default_value_t = SERVICE_PORT)]
        port: u16,

        /// Overall deadline in seconds.
        #[arg(long, default_value = "300")]
        timeout: u64,

        /// Seconds between polls.
        #[arg(long, default_value = "5")]
        interval: u64,
    },

    /// Summarize a bootstrap log copied from the host.
    Report {
        /// Path to the copied /var/log/inference-bootstrap.log.
        path: PathBuf,

        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_format);

    match &cli.command {
        Commands::Plan { config, json } => run_plan(&cli, config, *json).await,
        Commands::Apply {
            config,
            wait,
            wait_timeout,
            poll_interval,
            yes,
        } => run_apply(&cli, config, *wait, *wait_timeout, *poll_interval, *yes).await,
        Commands::Destroy { config, yes } => run_destroy(&cli, config, *yes).await,
        Commands::Render {
            config,
            target,
            output,
        } => run_render(config, *target, output.as_deref()),
        Commands::Probe {
            host,
            name,
            region,
            port,
            timeout,
            interval,
        } => {
            let host = match host {
                Some(host) => host.clone(),
                None => lookup_address(&cli, name, region).await?,
            };
            let probe_config = ProbeConfig {
                interval: Duration::from_secs(*interval),
                timeout: Duration::from_secs(*timeout),
                ..ProbeConfig::default()
            };
            let report = probe(&host, *port, probe_config).await?;
            print_probe(&report);
            ensure_ready(&report)
        }
        Commands::Report { path, json } => run_report(path, *json),
    }
}

fn init_logging(verbose: bool, format: LogFormat) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    // Logs go to stderr so rendered output on stdout stays clean.
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn provider(cli: &Cli, region: &str) -> Result<Arc<dyn CloudProvider>> {
    match cli.backend {
        Backend::Aws => {
            let mut aws = Aws::new(region).context("Failed to create AWS provider")?;
            if let Some(endpoint) = &cli.endpoint {
                aws = aws.with_endpoint(endpoint);
            }
            Ok(Arc::new(aws))
        }
        Backend::Local => {
            let path = cli.state_file.clone().unwrap_or_else(LocalState::default_path);
            info!(path = %path.display(), "Using local state file");
            Ok(Arc::new(LocalProvider::new(path)))
        }
    }
}

async fn run_plan(cli: &Cli, args: &ConfigArgs, json: bool) -> Result<()> {
    let (config, plan) = prepare(args.load()?)?;
    let engine = ReconcileEngine::new(provider(cli, &config.region)?);

    let changes = match engine.plan(&plan).await {
        Ok(changes) => changes,
        Err(e) => {
            warn!(error = %e, "Backend could not be observed; showing the full create");
            print_warning(&format!("Could not read current state: {e}"));
            diff(&plan, None)
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&changes)?);
        return Ok(());
    }

    print_summary(&config, &plan);
    print_changes(&changes);
    Ok(())
}

async fn run_apply(
    cli: &Cli,
    args: &ConfigArgs,
    wait: bool,
    wait_timeout: u64,
    poll_interval: u64,
    yes: bool,
) -> Result<()> {
    let (config, plan) = prepare(args.load()?)?;
    let engine = ReconcileEngine::new(provider(cli, &config.region)?);

    print_summary(&config, &plan);
    let changes = engine.plan(&plan).await.context("Failed to read current state")?;
    print_changes(&changes);

    if !changes.is_empty() && !yes && !confirm("Apply these changes?")? {
        println!("{}", "Apply cancelled.".yellow());
        return Ok(());
    }

    let applying = spinner("Applying changes...");
    let result = engine.apply(plan).await;
    applying.finish_and_clear();
    let report = result.context("Apply failed")?;

    if report.changed() {
        print_success(&format!("Applied {} operation(s) to {}", report.operations.len(), report.name));
    }

    if !wait {
        return Ok(());
    }

    let resource = report
        .resource
        .context("No host exists after apply")?;

    let waiting = spinner(&format!("Waiting for {} to run...", resource.id()));
    let result = engine.wait_running(resource.id(), wait_timeout).await;
    waiting.finish_and_clear();
    let resource = result.context("Instance did not reach running")?;

    let address = resource
        .public_ip()
        .context("Instance has no public IP address")?;
    println!("  {} {}", "Public IP:".bright_black(), address.green());

    let probe_config = ProbeConfig {
        interval: Duration::from_secs(poll_interval),
        timeout: Duration::from_secs(wait_timeout),
        ..ProbeConfig::default()
    };
    let probe_report = probe(address, config.service_port, probe_config).await?;
    print_probe(&probe_report);
    ensure_ready(&probe_report)?;

    if !probe_report.models.iter().any(|m| m == &config.model_identifier) {
        print_warning(&format!(
            "{} is not loaded yet; the pull may still be running or may have failed (see {} on the host)",
            config.model_identifier,
            bootstrap::DEFAULT_LOG_PATH
        ));
    }
    Ok(())
}

async fn run_destroy(cli: &Cli, args: &ConfigArgs, yes: bool) -> Result<()> {
    let raw = args.load()?;
    let name = raw.name.unwrap_or_else(|| DEFAULT_NAME.to_string());
    let region = raw.region.unwrap_or_else(|| DEFAULT_REGION.to_string());
    let engine = ReconcileEngine::new(provider(cli, &region)?);

    let Some(observed) = engine.observe(&name).await? else {
        println!("{} {}", "Nothing to destroy:".bright_black(), name);
        return Ok(());
    };

    println!(
        "{} {} ({}, {})",
        "- destroy".red().bold(),
        observed.id(),
        observed.instance_type(),
        observed.status()
    );
    if !yes && !confirm(&format!("Terminate {name}?"))? {
        println!("{}", "Destroy cancelled.".yellow());
        return Ok(());
    }

    let report = engine.destroy(&name).await.context("Destroy failed")?;
    if report.changed() {
        print_success(&format!("Destroyed {name}"));
    }
    Ok(())
}

fn run_render(args: &ConfigArgs, target: RenderTarget, output: Option<&Path>) -> Result<()> {
    let text = match target {
        RenderTarget::Script => {
            let config = inference_host::resolve(args.load()?)?;
            bootstrap::generate(&config)?.into_string()
        }
        RenderTarget::Unit => bootstrap::BootstrapSettings::default().unit.render()?,
        RenderTarget::Plan => {
            let (_, plan) = prepare(args.load()?)?;
            serde_json::to_string_pretty(&plan)?
        }
    };

    match output {
        Some(path) => {
            std::fs::write(path, &text)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!(path = %path.display(), bytes = text.len(), "Rendered");
        }
        None => print!("{text}"),
    }
    Ok(())
}

fn run_report(path: &Path, json: bool) -> Result<()> {
    let log = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read bootstrap log {}", path.display()))?;
    let report = BootstrapReport::parse(&log);

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_section("Bootstrap Report");
        for step in &report.steps {
            let marker = match step.status {
                StepStatus::Ok => "✓".green(),
                StepStatus::Failed => "✗".red(),
                StepStatus::Running => "…".yellow(),
            };
            println!("  {marker} {}", step.name);
        }
        println!();
        for failure in &report.failures {
            print_warning(&format!("{} at {}", failure.kind, failure.step));
        }
        let service = report.service_status.as_deref().unwrap_or("unknown");
        println!("  {} {}", "Service:".bright_black(), service);
        println!("  {} {}", "Models:".bright_black(), report.models.join(", "));
        match report.exit_status {
            Some(status) => println!("  {} {status}", "Exit status:".bright_black()),
            None => println!(
                "  {} {}",
                "Still running:".bright_black(),
                report.current_step().unwrap_or("-")
            ),
        }
    }

    if let Some(failure) = report.fatal_failure() {
        bail!("Bootstrap aborted with {} at {}", failure.kind, failure.step);
    }
    Ok(())
}

async fn lookup_address(cli: &Cli, name: &str, region: &str) -> Result<String> {
    let engine = ReconcileEngine::new(provider(cli, region)?);
    let observed = engine
        .observe(name)
        .await?
        .with_context(|| format!("No live host named {name}"))?;
    observed
        .public_ip()
        .map(ToString::to_string)
        .with_context(|| format!("{name} has no public IP address"))
}

async fn probe(host: &str, port: u16, config: ProbeConfig) -> Result<ProbeReport> {
    let probe =
        ReadinessProbe::for_host(host, port, config).context("Failed to create HTTP client")?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    let polling = spinner(&format!("Waiting for {}...", probe.url()));
    let report = probe.wait(&cancel).await;
    polling.finish_and_clear();
    Ok(report)
}

fn ensure_ready(report: &ProbeReport) -> Result<()> {
    match report.outcome {
        ReadinessOutcome::Ready => Ok(()),
        outcome => bail!(
            "Inference API {outcome} after {} attempt(s): {}",
            report.attempts,
            report.last_error.as_deref().unwrap_or("no response")
        ),
    }
}

// ============================================================================
// Output
// ============================================================================

fn spinner(message: &str) -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.green} {msg}") {
        bar.set_style(style);
    }
    bar.set_message(message.to_string());
    bar.enable_steady_tick(Duration::from_millis(120));
    bar
}

fn confirm(prompt: &str) -> Result<bool> {
    Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(prompt)
        .default(false)
        .interact()
        .context("Confirmation needs a terminal; pass --yes to skip it")
}

fn print_section(title: &str) {
    println!();
    println!("{}", title.cyan().bold());
    println!("{}", "─".repeat(60).bright_black());
}

fn print_success(message: &str) {
    println!();
    println!("{} {}", "✓".green().bold(), message.green());
}

fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message.yellow());
}

fn print_summary(config: &DeploymentConfig, plan: &ProvisionPlan) {
    print_section("Deployment");
    let rows = [
        ("Name:", plan.name.clone()),
        ("Region:", plan.region.clone()),
        ("Size:", format!("{} ({})", config.instance_size, plan.instance_type)),
        ("Image:", format!("{} ({})", plan.image.id, plan.image.build)),
        ("Storage:", format!("{} GiB {}", plan.storage.size_gib, plan.storage.volume_type)),
        ("Model:", config.model_identifier.clone()),
        ("Allowed CIDR:", config.allowed_cidr.to_string()),
    ];
    for (label, value) in rows {
        println!("  {:<14} {}", label.bright_black(), value.green());
    }
    if config.allowed_cidr.is_open_world() {
        print_warning("SSH and the inference API will be reachable from anywhere");
    }
}

fn print_changes(changes: &ChangeSet) {
    print_section("Changes");
    for line in changes.to_string().lines() {
        let trimmed = line.trim_start();
        let colored = if trimmed.starts_with("-/+") {
            line.yellow()
        } else if trimmed.starts_with('+') {
            line.green()
        } else if trimmed.starts_with('-') {
            line.red()
        } else if trimmed.starts_with('~') {
            line.cyan()
        } else {
            line.normal()
        };
        println!("  {colored}");
    }
}

fn print_probe(report: &ProbeReport) {
    let elapsed = report.elapsed.as_secs_f32();
    match report.outcome {
        ReadinessOutcome::Ready => {
            print_success(&format!(
                "Inference API ready after {} attempt(s), {elapsed:.1}s",
                report.attempts
            ));
            if !report.models.is_empty() {
                println!("  {} {}", "Models:".bright_black(), report.models.join(", "));
            }
        }
        outcome => print_warning(&format!(
            "Inference API {outcome} after {} attempt(s), {elapsed:.1}s",
            report.attempts
        )),
    }
}
