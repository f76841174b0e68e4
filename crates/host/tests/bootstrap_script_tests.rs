//! Runs the rendered bootstrap script under bash with stubbed system tools
//! and reads the outcome back from its durable log.

#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::process::Command;

use inference_host::bootstrap::{self, BootstrapSettings, StepStatus};
use inference_host::{resolve, BootstrapFailureKind, BootstrapReport, RawConfig};
use tempfile::TempDir;

const APT_GET: &str = r#"#!/bin/sh
if [ "$1" = "update" ] && [ -n "$FAIL_REFRESH" ]; then
  echo "E: Could not resolve archive.ubuntu.com" >&2
  exit 100
fi
exit 0
"#;

const SYSTEMCTL: &str = r#"#!/bin/sh
case "$1" in
  restart)
    [ -z "$FAIL_START" ] || exit 1
    touch "$STUB_STATE/started"
    ;;
  is-active)
    if [ -f "$STUB_STATE/started" ]; then
      [ "$2" = "--quiet" ] || echo active
      exit 0
    fi
    [ "$2" = "--quiet" ] || echo inactive
    exit 3
    ;;
esac
exit 0
"#;

const OLLAMA: &str = r#"#!/bin/sh
case "$1" in
  pull)
    [ -z "$FAIL_PULL" ] || exit 1
    touch "$STUB_STATE/pulled"
    ;;
  list)
    [ -f "$STUB_STATE/pulled" ] && echo "demo:1b  abc123  1.3 GB"
    ;;
esac
exit 0
"#;

const CURL: &str = r#"#!/bin/sh
[ -f "$STUB_STATE/started" ] || exit 7
if [ -f "$STUB_STATE/pulled" ]; then
  echo '{"models":[{"name":"demo:1b"}]}'
else
  echo '{"models":[]}'
fi
"#;

const ALWAYS_OK: &str = "#!/bin/sh\nexit 0\n";

struct Host {
    dir: TempDir,
    script: String,
}

impl Host {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        for sub in ["bin", "state", "units", "log"] {
            fs::create_dir_all(dir.path().join(sub)).unwrap();
        }
        let bin = dir.path().join("bin");
        for (name, body) in [
            ("apt-get", APT_GET),
            ("systemctl", SYSTEMCTL),
            ("ollama", OLLAMA),
            ("curl", CURL),
            ("dpkg", ALWAYS_OK),
            ("id", ALWAYS_OK),
            ("useradd", ALWAYS_OK),
        ] {
            write_executable(&bin.join(name), body);
        }

        let config = resolve(RawConfig {
            ssh_key: Some("operator".to_string()),
            allowed_cidr: Some("203.0.113.5/32".to_string()),
            model: Some("demo:1b".to_string()),
            ..RawConfig::default()
        })
        .unwrap();
        let settings = BootstrapSettings {
            log_path: dir.path().join("log/bootstrap.log").display().to_string(),
            unit_dir: dir.path().join("units").display().to_string(),
            listener_timeout_secs: 5,
            listener_interval_secs: 1,
            ..BootstrapSettings::default()
        };
        let script = bootstrap::generate_with(&config, &settings).unwrap();

        Self {
            dir,
            script: script.into_string(),
        }
    }

    fn run(&self, failing: &[&str]) -> (i32, BootstrapReport) {
        let path = self.dir.path().join("bootstrap.sh");
        fs::write(&path, &self.script).unwrap();

        let search_path = format!(
            "{}:{}",
            self.dir.path().join("bin").display(),
            std::env::var("PATH").unwrap_or_default()
        );
        let mut command = Command::new("bash");
        command
            .arg(&path)
            .env("PATH", search_path)
            .env("STUB_STATE", self.dir.path().join("state"))
            .env_remove("FAIL_REFRESH")
            .env_remove("FAIL_START")
            .env_remove("FAIL_PULL");
        for var in failing {
            command.env(var, "1");
        }
        let status = command.status().unwrap();

        let log = fs::read_to_string(self.dir.path().join("log/bootstrap.log")).unwrap();
        (status.code().unwrap_or(-1), BootstrapReport::parse(&log))
    }
}

fn write_executable(path: &Path, body: &str) {
    fs::write(path, body).unwrap();
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
}

fn step_status(report: &BootstrapReport, name: &str) -> Option<StepStatus> {
    report.steps.iter().find(|s| s.name == name).map(|s| s.status)
}

#[test]
fn test_clean_run_pulls_model() {
    let host = Host::new();
    let (code, report) = host.run(&[]);

    assert_eq!(code, 0);
    assert!(report.complete);
    assert!(report.service_active());
    assert!(report.has_model("demo:1b"));
    assert!(report.failures.is_empty());
    assert!(host.dir.path().join("units/ollama.service").exists());
}

#[test]
fn test_failed_package_refresh_aborts() {
    let host = Host::new();
    let (code, report) = host.run(&["FAIL_REFRESH"]);

    assert_eq!(code, 100);
    assert!(report.aborted());
    assert_eq!(step_status(&report, "refresh-packages"), Some(StepStatus::Failed));
    assert_eq!(
        report.fatal_failure().map(|f| f.kind),
        Some(BootstrapFailureKind::PackageInstallFailed)
    );
    assert!(step_status(&report, "install-tools").is_none());
    assert!(!report.service_active());
}

#[test]
fn test_failed_service_start_aborts() {
    let host = Host::new();
    let (code, report) = host.run(&["FAIL_START"]);

    assert_ne!(code, 0);
    assert!(report.aborted());
    assert_eq!(step_status(&report, "start-service"), Some(StepStatus::Failed));
    assert_eq!(
        report.fatal_failure().map(|f| f.kind),
        Some(BootstrapFailureKind::ServiceStartFailed)
    );
    assert!(step_status(&report, "pull-model").is_none());
    assert!(!report.service_active());
}

#[test]
fn test_failed_pull_is_recorded_only() {
    let host = Host::new();
    let (code, report) = host.run(&["FAIL_PULL"]);

    assert_eq!(code, 0);
    assert!(!report.aborted());
    assert!(report.service_active());
    assert!(!report.has_model("demo:1b"));
    assert_eq!(step_status(&report, "pull-model"), Some(StepStatus::Failed));
    assert_eq!(step_status(&report, "write-summary"), Some(StepStatus::Ok));
    assert_eq!(
        report.failures.iter().map(|f| f.kind).collect::<Vec<_>>(),
        vec![BootstrapFailureKind::ModelPullFailed]
    );
}
