//! Readiness polling for a deployed host.
//!
//! Polls `GET /api/tags` at a fixed interval until the daemon answers with
//! a well-formed model list, the deadline passes, or the caller cancels.

use std::time::{Duration, Instant};

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Polling parameters.
#[derive(Debug, Clone, Copy)]
pub struct ProbeConfig {
    /// Pause between attempts.
    pub interval: Duration,
    /// Overall deadline.
    pub timeout: Duration,
    /// Limit for one request. Capped by the time left before the deadline.
    pub request_timeout: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            timeout: Duration::from_secs(600),
            request_timeout: Duration::from_secs(5),
        }
    }
}

/// How polling ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadinessOutcome {
    /// The daemon answered with a model list.
    Ready,
    /// Deadline passed; the daemon was reachable but never answered correctly.
    Timeout,
    /// Deadline passed; the last attempt could not connect.
    Unreachable,
    /// The caller cancelled.
    Cancelled,
}

impl std::fmt::Display for ReadinessOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ready => write!(f, "ready"),
            Self::Timeout => write!(f, "timeout"),
            Self::Unreachable => write!(f, "unreachable"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Result of a polling run.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeReport {
    /// How polling ended.
    pub outcome: ReadinessOutcome,
    /// Requests sent.
    pub attempts: u32,
    /// Time spent polling.
    pub elapsed: Duration,
    /// Models reported by the daemon when ready.
    pub models: Vec<String>,
    /// Last failure seen, if any.
    pub last_error: Option<String>,
}

/// Why a single attempt failed.
#[derive(Debug, Clone, PartialEq, Eq)]
enum AttemptFailure {
    /// Could not open a connection.
    Connect(String),
    /// Request did not finish in time.
    Slow,
    /// Non-2xx response.
    Status(u16),
    /// 2xx with a body that is not a model list.
    Malformed(String),
}

impl AttemptFailure {
    fn outcome(&self) -> ReadinessOutcome {
        match self {
            Self::Connect(_) => ReadinessOutcome::Unreachable,
            Self::Slow | Self::Status(_) | Self::Malformed(_) => ReadinessOutcome::Timeout,
        }
    }
}

impl std::fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connect(e) => write!(f, "connection failed: {e}"),
            Self::Slow => write!(f, "request timed out"),
            Self::Status(status) => write!(f, "HTTP {status}"),
            Self::Malformed(e) => write!(f, "malformed response: {e}"),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    models: Vec<TagModel>,
}

#[derive(Debug, Deserialize)]
struct TagModel {
    name: String,
}

/// Polls one daemon endpoint.
#[derive(Debug, Clone)]
pub struct ReadinessProbe {
    client: Client,
    base_url: String,
    config: ProbeConfig,
}

impl ReadinessProbe {
    /// Probe the daemon at `base_url` (e.g. `http://203.0.113.10:11434`).
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(base_url: impl Into<String>, config: ProbeConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder().build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            config,
        })
    }

    /// Probe `host` on `port` over plain HTTP.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be created.
    pub fn for_host(host: &str, port: u16, config: ProbeConfig) -> Result<Self, reqwest::Error> {
        Self::new(format!("http://{host}:{port}"), config)
    }

    /// Endpoint being polled.
    #[must_use]
    pub fn url(&self) -> String {
        format!("{}/api/tags", self.base_url)
    }

    /// Poll until ready, the deadline passes, or `cancel` fires.
    pub async fn wait(&self, cancel: &CancellationToken) -> ProbeReport {
        let start = Instant::now();
        let deadline = start + self.config.timeout;
        let url = self.url();
        let mut attempts = 0;
        let mut last_failure: Option<AttemptFailure> = None;

        info!(
            url = %url,
            interval_ms = self.config.interval.as_millis(),
            timeout_secs = self.config.timeout.as_secs(),
            "Waiting for inference API"
        );

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }

            attempts += 1;
            let request_timeout = self.config.request_timeout.min(remaining);
            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    return Self::cancelled(start, attempts, last_failure.as_ref());
                }
                result = self.attempt(&url, request_timeout) => result,
            };

            match result {
                Ok(models) => {
                    info!(
                        url = %url,
                        attempts,
                        elapsed_ms = start.elapsed().as_millis(),
                        model_count = models.len(),
                        "Inference API ready"
                    );
                    return ProbeReport {
                        outcome: ReadinessOutcome::Ready,
                        attempts,
                        elapsed: start.elapsed(),
                        models,
                        last_error: last_failure.map(|f| f.to_string()),
                    };
                }
                Err(failure) => {
                    debug!(url = %url, attempt = attempts, error = %failure, "Not ready yet");
                    last_failure = Some(failure);
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }

            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    return Self::cancelled(start, attempts, last_failure.as_ref());
                }
                () = tokio::time::sleep(self.config.interval.min(remaining)) => {}
            }
        }

        let outcome = last_failure
            .as_ref()
            .map_or(ReadinessOutcome::Timeout, AttemptFailure::outcome);
        warn!(
            url = %url,
            attempts,
            outcome = %outcome,
            last_error = ?last_failure.as_ref().map(ToString::to_string),
            "Inference API did not become ready"
        );

        ProbeReport {
            outcome,
            attempts,
            elapsed: start.elapsed(),
            models: Vec::new(),
            last_error: last_failure.map(|f| f.to_string()),
        }
    }

    fn cancelled(start: Instant, attempts: u32, last: Option<&AttemptFailure>) -> ProbeReport {
        info!(attempts, "Readiness probe cancelled");
        ProbeReport {
            outcome: ReadinessOutcome::Cancelled,
            attempts,
            elapsed: start.elapsed(),
            models: Vec::new(),
            last_error: last.map(ToString::to_string),
        }
    }

    async fn attempt(&self, url: &str, timeout: Duration) -> Result<Vec<String>, AttemptFailure> {
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        if !status.is_success() {
            return Err(AttemptFailure::Status(status.as_u16()));
        }

        let body = response.text().await.map_err(classify)?;
        let tags: TagsResponse =
            serde_json::from_str(&body).map_err(|e| AttemptFailure::Malformed(e.to_string()))?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }
}

fn classify(error: reqwest::Error) -> AttemptFailure {
    if error.is_timeout() {
        AttemptFailure::Slow
    } else if error.is_connect() || error.is_request() {
        AttemptFailure::Connect(error.to_string())
    } else {
        AttemptFailure::Malformed(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_classification() {
        assert_eq!(
            AttemptFailure::Connect("refused".to_string()).outcome(),
            ReadinessOutcome::Unreachable
        );
        assert_eq!(AttemptFailure::Slow.outcome(), ReadinessOutcome::Timeout);
        assert_eq!(AttemptFailure::Status(503).outcome(), ReadinessOutcome::Timeout);
        assert_eq!(
            AttemptFailure::Malformed("eof".to_string()).outcome(),
            ReadinessOutcome::Timeout
        );
    }

    #[test]
    fn test_url() {
        let probe =
            ReadinessProbe::for_host("203.0.113.10", 11434, ProbeConfig::default()).unwrap();
        assert_eq!(probe.url(), "http://203.0.113.10:11434/api/tags");
    }
}
