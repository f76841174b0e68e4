//! Chat client errors.

use thiserror::Error;

/// Errors raised while talking to the inference API.
#[derive(Error, Debug)]
pub enum ChatError {
    /// Transport failure or timeout.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The API answered with a non-success status.
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// A response body or stream chunk could not be decoded.
    #[error("Malformed response: {0}")]
    Malformed(String),

    /// The server reported an error inside a streamed response.
    #[error("Server error: {0}")]
    Remote(String),

    /// No stream data arrived within the idle limit.
    #[error("No data received for {0} seconds")]
    Stalled(u64),

    /// The stream closed before a chunk with `done: true` arrived.
    #[error("Stream ended before completion")]
    Incomplete,
}

impl ChatError {
    /// Whether the request never reached a responding server.
    #[must_use]
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Http(e) if e.is_connect() || e.is_timeout())
    }
}

/// Result alias for chat operations.
pub type Result<T> = std::result::Result<T, ChatError>;
