//! HTTP client for the inference API.

use std::time::{Duration, Instant};

use futures::StreamExt;
use reqwest::{Client, Response};
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{ChatError, Result};
use crate::models::{GenerateRequest, GenerateResponse, TagsResponse};

/// Limit for the connection check and model listing.
pub const CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Limit for a non-streamed generation, and the idle limit between
/// streamed chunks.
pub const GENERATE_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

/// Client for one inference daemon.
#[derive(Debug, Clone)]
pub struct InferenceClient {
    client: Client,
    base_url: String,
    check_timeout: Duration,
    generate_timeout: Duration,
}

impl InferenceClient {
    /// Create a client for a base URL such as `http://10.0.0.5:11434`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            check_timeout: CHECK_TIMEOUT,
            generate_timeout: GENERATE_TIMEOUT,
        }
    }

    /// Create a client for a host and port over plain HTTP.
    pub fn for_host(host: &str, port: u16) -> Self {
        Self::new(format!("http://{host}:{port}"))
    }

    /// Override the request limits.
    #[must_use]
    pub fn with_timeouts(mut self, check: Duration, generate: Duration) -> Self {
        self.check_timeout = check;
        self.generate_timeout = generate;
        self
    }

    /// Base URL requests are sent to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Whether the daemon answers `GET /api/tags` with a success status.
    pub async fn check_connection(&self) -> bool {
        let result = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .timeout(self.check_timeout)
            .send()
            .await;

        match result {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(url = %self.base_url, error = %e, "Connection check failed");
                false
            }
        }
    }

    /// Fetch the installed models.
    ///
    /// # Errors
    /// Returns an error on transport failure, a non-success status, or an
    /// undecodable body.
    pub async fn tags(&self) -> Result<TagsResponse> {
        let response = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .timeout(self.check_timeout)
            .send()
            .await?;
        let response = check_status(response).await?;
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| ChatError::Malformed(e.to_string()))
    }

    /// Names of the installed models.
    ///
    /// # Errors
    /// See [`InferenceClient::tags`].
    pub async fn list_models(&self) -> Result<Vec<String>> {
        Ok(self.tags().await?.models.into_iter().map(|m| m.name).collect())
    }

    /// Generate a complete response in one request.
    ///
    /// # Errors
    /// Returns an error on transport failure, timeout, a non-success
    /// status, or an undecodable body.
    pub async fn generate(&self, model: &str, prompt: &str) -> Result<GenerateResponse> {
        let request = GenerateRequest::new(model, prompt, false);
        let started = Instant::now();

        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&request)
            .timeout(self.generate_timeout)
            .send()
            .await?;
        let response = check_status(response).await?;
        let body = response.text().await?;
        let mut generated: GenerateResponse =
            serde_json::from_str(&body).map_err(|e| ChatError::Malformed(e.to_string()))?;

        if let Some(error) = generated.error.take() {
            return Err(ChatError::Remote(error));
        }

        info!(
            model = %model,
            chars = generated.response.len(),
            elapsed_ms = started.elapsed().as_millis(),
            "Generated response"
        );
        Ok(generated)
    }

    /// Generate a response as a stream of chunks.
    ///
    /// `on_chunk` receives each text fragment as it arrives. The returned
    /// value carries the concatenated text and the final chunk's counters.
    ///
    /// # Errors
    /// Returns an error on transport failure, a non-success status, a
    /// malformed chunk, an error chunk, an idle gap longer than the
    /// generate limit, or a stream that closes before `done: true`.
    pub async fn generate_stream<F>(
        &self,
        model: &str,
        prompt: &str,
        mut on_chunk: F,
    ) -> Result<GenerateResponse>
    where
        F: FnMut(&str),
    {
        let request = GenerateRequest::new(model, prompt, true);

        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&request)
            .send()
            .await?;
        let response = check_status(response).await?;

        let mut stream = response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();
        let mut text = String::new();

        loop {
            let next = tokio::time::timeout(self.generate_timeout, stream.next())
                .await
                .map_err(|_| ChatError::Stalled(self.generate_timeout.as_secs()))?;

            let Some(chunk) = next else {
                break;
            };
            buffer.extend_from_slice(&chunk?);

            while let Some(end) = buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=end).collect();
                if let Some(done) = accept_line(&line, &mut text, &mut on_chunk)? {
                    return Ok(finish(done, text));
                }
            }
        }

        // A final chunk without a trailing newline.
        if let Some(done) = accept_line(&buffer, &mut text, &mut on_chunk)? {
            return Ok(finish(done, text));
        }
        Err(ChatError::Incomplete)
    }
}

/// Decode one NDJSON line. Returns the chunk when it is the last one.
fn accept_line<F>(line: &[u8], text: &mut String, on_chunk: &mut F) -> Result<Option<GenerateResponse>>
where
    F: FnMut(&str),
{
    let line = std::str::from_utf8(line)
        .map_err(|e| ChatError::Malformed(e.to_string()))?
        .trim();
    if line.is_empty() {
        return Ok(None);
    }

    let mut chunk: GenerateResponse =
        serde_json::from_str(line).map_err(|e| ChatError::Malformed(e.to_string()))?;
    if let Some(error) = chunk.error.take() {
        return Err(ChatError::Remote(error));
    }

    if !chunk.response.is_empty() {
        on_chunk(&chunk.response);
        text.push_str(&chunk.response);
    }
    Ok(chunk.done.then_some(chunk))
}

fn finish(mut last: GenerateResponse, text: String) -> GenerateResponse {
    last.response = text;
    last
}

async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&body)
        .map(|e| e.error)
        .unwrap_or(body);
    Err(ChatError::Api {
        status: status.as_u16(),
        message,
    })
}
