//! Parsing of the durable bootstrap log.
//!
//! The script appends one line per step transition and a single `SUMMARY`
//! line when it exits:
//!
//! ```text
//! 2025-01-01T00:00:00Z step=pull-model status=start
//! 2025-01-01T00:01:12Z step=pull-model status=failed rc=1 kind=model_pull_failed
//! 2025-01-01T00:01:13Z SUMMARY {"service":"ollama","service_status":"active",...}
//! ```
//!
//! Output from the commands themselves is interleaved and ignored.

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::BootstrapFailureKind;

/// State of one step as seen in the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Started, no result logged yet.
    Running,
    /// Finished and its check passed.
    Ok,
    /// Finished with a failure.
    Failed,
}

/// One step transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepRecord {
    /// Step name.
    pub name: String,
    /// Last known status.
    pub status: StepStatus,
    /// Exit code, once finished.
    pub exit_code: Option<i32>,
}

/// A recorded failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BootstrapFailure {
    /// Failure category.
    pub kind: BootstrapFailureKind,
    /// Step that failed.
    pub step: String,
    /// Exit code of the step, when known.
    pub exit_code: Option<i32>,
}

/// Outcome of the most recent bootstrap run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BootstrapReport {
    /// Steps in execution order.
    pub steps: Vec<StepRecord>,
    /// Recorded failures, in order.
    pub failures: Vec<BootstrapFailure>,
    /// Supervisor status of the daemon at exit (e.g. `active`).
    pub service_status: Option<String>,
    /// Models the daemon reported at exit.
    pub models: Vec<String>,
    /// Script exit status.
    pub exit_status: Option<i32>,
    /// Whether the summary line was written.
    pub complete: bool,
}

#[derive(Debug, Deserialize)]
struct Summary {
    service_status: String,
    #[serde(default)]
    tags: Tags,
    #[serde(default)]
    failures: Vec<String>,
    exit_status: i32,
}

#[derive(Debug, Default, Deserialize)]
struct Tags {
    #[serde(default)]
    models: Vec<TagModel>,
}

#[derive(Debug, Deserialize)]
struct TagModel {
    name: String,
}

impl BootstrapReport {
    /// Parse the log of the most recent run.
    ///
    /// A re-run of the script appends to the same file; only the lines after
    /// the last completed run's summary are considered.
    #[must_use]
    pub fn parse(log: &str) -> Self {
        let mut report = Self::default();

        for line in log.lines() {
            let mut tokens = line.split_whitespace();
            let (Some(_timestamp), Some(marker)) = (tokens.next(), tokens.next()) else {
                continue;
            };

            if marker == "SUMMARY" {
                let Some((_, body)) = line.split_once(" SUMMARY ") else {
                    continue;
                };
                match serde_json::from_str::<Summary>(body) {
                    Ok(summary) => report.apply_summary(summary),
                    Err(e) => warn!(error = %e, "Ignoring malformed bootstrap summary"),
                }
                continue;
            }

            let Some(step) = marker.strip_prefix("step=") else {
                continue;
            };

            let mut status = None;
            let mut exit_code = None;
            let mut kind = None;
            for token in tokens {
                match token.split_once('=') {
                    Some(("status", v)) => status = Some(v),
                    Some(("rc", v)) => exit_code = v.parse().ok(),
                    Some(("kind", v)) => kind = v.parse::<BootstrapFailureKind>().ok(),
                    _ => {}
                }
            }

            // The summary is written from inside the last step, so only a new
            // start after it marks another run.
            if report.complete && status == Some("start") {
                report = Self::default();
            }

            match status {
                Some("start") => report.steps.push(StepRecord {
                    name: step.to_string(),
                    status: StepStatus::Running,
                    exit_code: None,
                }),
                Some("ok") => report.finish(step, StepStatus::Ok, exit_code),
                Some("failed") => {
                    report.finish(step, StepStatus::Failed, exit_code);
                    if let Some(kind) = kind {
                        report.failures.push(BootstrapFailure {
                            kind,
                            step: step.to_string(),
                            exit_code,
                        });
                    }
                }
                _ => {}
            }
        }

        report
    }

    fn finish(&mut self, step: &str, status: StepStatus, exit_code: Option<i32>) {
        match self.steps.iter_mut().rev().find(|s| s.name == step) {
            Some(record) => {
                record.status = status;
                record.exit_code = exit_code;
            }
            None => self.steps.push(StepRecord {
                name: step.to_string(),
                status,
                exit_code,
            }),
        }
    }

    fn apply_summary(&mut self, summary: Summary) {
        let failures: Vec<_> = summary
            .failures
            .iter()
            .filter_map(|entry| {
                let (kind, step) = entry.split_once(':')?;
                let kind = kind.parse().ok()?;
                let exit_code = self
                    .steps
                    .iter()
                    .rev()
                    .find(|s| s.name == step)
                    .and_then(|s| s.exit_code);
                Some(BootstrapFailure {
                    kind,
                    step: step.to_string(),
                    exit_code,
                })
            })
            .collect();

        self.failures = failures;
        self.service_status = Some(summary.service_status);
        self.models = summary.tags.models.into_iter().map(|m| m.name).collect();
        self.exit_status = Some(summary.exit_status);
        self.complete = true;
    }

    /// Whether the daemon was running under supervision at exit.
    #[must_use]
    pub fn service_active(&self) -> bool {
        self.service_status.as_deref() == Some("active")
    }

    /// Whether the run stopped early on a fatal step.
    #[must_use]
    pub fn aborted(&self) -> bool {
        self.exit_status.is_some_and(|status| status != 0)
    }

    /// The failure that stopped the run, if any.
    #[must_use]
    pub fn fatal_failure(&self) -> Option<&BootstrapFailure> {
        if self.aborted() {
            self.failures.last()
        } else {
            None
        }
    }

    /// Whether `model` was present when the run finished.
    #[must_use]
    pub fn has_model(&self, model: &str) -> bool {
        self.models.iter().any(|m| m == model)
    }

    /// Name of the step currently running, for an incomplete log.
    #[must_use]
    pub fn current_step(&self) -> Option<&str> {
        if self.complete {
            return None;
        }
        self.steps
            .iter()
            .rev()
            .find(|s| s.status == StepStatus::Running)
            .map(|s| s.name.as_str())
    }
}
