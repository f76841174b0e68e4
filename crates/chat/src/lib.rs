//! Interactive chat against a self-hosted inference API.
//!
//! The wire contract is two endpoints: `GET /api/tags` lists installed
//! models and `POST /api/generate` produces a completion, either as one
//! JSON document or as newline-delimited JSON chunks ending with
//! `"done": true`.

pub mod client;
pub mod command;
pub mod error;
pub mod models;
pub mod session;

pub use client::InferenceClient;
pub use command::Command;
pub use error::{ChatError, Result};
pub use models::{GenerateRequest, GenerateResponse, ModelInfo, TagsResponse};
pub use session::{Conversation, Message, Role, SessionStats};

/// Port the inference daemon listens on.
pub const DEFAULT_PORT: u16 = 11434;

/// Model requested when none is configured.
pub const DEFAULT_MODEL: &str = "gemma2:9b";

/// Pick the model to chat with.
///
/// Returns the requested model when it is installed, otherwise the first
/// installed model. `None` means nothing is installed.
#[must_use]
pub fn select_model<'a>(requested: &'a str, available: &'a [String]) -> Option<&'a str> {
    if available.iter().any(|m| m == requested) {
        Some(requested)
    } else {
        available.first().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_model_prefers_requested() {
        let available = vec!["phi4-mini:3.8b".to_string(), "gemma2:9b".to_string()];
        assert_eq!(select_model("gemma2:9b", &available), Some("gemma2:9b"));
    }

    #[test]
    fn test_select_model_falls_back_to_first() {
        let available = vec!["phi4-mini:3.8b".to_string()];
        assert_eq!(select_model("gemma2:9b", &available), Some("phi4-mini:3.8b"));
        assert_eq!(select_model("gemma2:9b", &[]), None);
    }
}
