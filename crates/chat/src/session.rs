//! Conversation history and its on-disk form.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Characters of each message shown by [`Conversation::preview`].
pub const PREVIEW_CHARS: usize = 100;

/// Who wrote a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
        }
    }
}

/// One turn in the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// A chat session with one daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub session_start: DateTime<Utc>,
    pub model: String,
    pub host: String,
    #[serde(rename = "conversation")]
    messages: Vec<Message>,
}

/// Summary printed by `/stats`.
#[derive(Debug, Clone)]
pub struct SessionStats {
    pub duration: Duration,
    pub messages: usize,
    pub model: String,
    pub host: String,
    pub started: DateTime<Utc>,
}

impl Conversation {
    #[must_use]
    pub fn new(model: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            session_start: Utc::now(),
            model: model.into(),
            host: host.into(),
            messages: Vec::new(),
        }
    }

    pub fn push(&mut self, role: Role, content: impl Into<String>) {
        self.messages.push(Message {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        });
    }

    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// File name used by `/save` without an argument.
    #[must_use]
    pub fn default_filename(&self) -> PathBuf {
        let stem = self.model.split(':').next().unwrap_or("chat");
        let stem: String = stem
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        PathBuf::from(format!(
            "{stem}_conversation_{}.json",
            Utc::now().format("%Y%m%d_%H%M%S")
        ))
    }

    /// Write the session as pretty JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    /// Replace the history with the one saved at `path`.
    ///
    /// The current model, host, and start time are kept. Returns the number
    /// of messages loaded.
    pub fn load(&mut self, path: &Path) -> Result<usize> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let saved: Self = serde_json::from_str(&content)
            .with_context(|| format!("{} is not a saved conversation", path.display()))?;
        self.messages = saved.messages;
        Ok(self.messages.len())
    }

    #[must_use]
    pub fn stats(&self) -> SessionStats {
        SessionStats {
            duration: Utc::now() - self.session_start,
            messages: self.messages.len(),
            model: self.model.clone(),
            host: self.host.clone(),
            started: self.session_start,
        }
    }

    /// One line per message, each cut to [`PREVIEW_CHARS`].
    #[must_use]
    pub fn preview(&self) -> Vec<(Role, String)> {
        self.messages
            .iter()
            .map(|m| (m.role, truncate(&m.content, PREVIEW_CHARS)))
            .collect()
    }
}

fn truncate(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_and_load_keeps_history() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("chat.json");

        let mut conversation = Conversation::new("demo:1b", "localhost:11434");
        conversation.push(Role::User, "hello");
        conversation.push(Role::Assistant, "hi there");
        conversation.save(&path).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        for key in ["session_start", "model", "host", "conversation"] {
            assert!(raw.get(key).is_some(), "missing {key}");
        }
        assert_eq!(raw["conversation"][1]["role"], "assistant");

        let mut restored = Conversation::new("other:1b", "10.0.0.5:11434");
        assert_eq!(restored.load(&path).unwrap(), 2);
        assert_eq!(restored.messages(), conversation.messages());
        assert_eq!(restored.model, "other:1b");
    }

    #[test]
    fn test_load_rejects_unrelated_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("other.json");
        std::fs::write(&path, r#"{"hello": "world"}"#).unwrap();

        let mut conversation = Conversation::new("demo:1b", "localhost:11434");
        conversation.push(Role::User, "kept");
        assert!(conversation.load(&path).is_err());
        assert_eq!(conversation.len(), 1);
    }

    #[test]
    fn test_preview_truncates_long_messages() {
        let mut conversation = Conversation::new("demo:1b", "localhost:11434");
        conversation.push(Role::User, "short");
        conversation.push(Role::Assistant, "é".repeat(150));

        let preview = conversation.preview();
        assert_eq!(preview[0].1, "short");
        assert_eq!(preview[1].1.chars().count(), PREVIEW_CHARS + 3);
        assert!(preview[1].1.ends_with("..."));

        let exact = "x".repeat(PREVIEW_CHARS);
        assert_eq!(truncate(&exact, PREVIEW_CHARS), exact);
    }

    #[test]
    fn test_default_filename_uses_model_name() {
        let conversation = Conversation::new("phi4-mini:3.8b", "localhost:11434");
        let name = conversation.default_filename();
        let name = name.to_str().unwrap();
        assert!(name.starts_with("phi4-mini_conversation_"));
        assert!(name.ends_with(".json"));
    }

    #[test]
    fn test_clear_and_stats() {
        let mut conversation = Conversation::new("demo:1b", "localhost:11434");
        conversation.push(Role::User, "one");
        assert_eq!(conversation.stats().messages, 1);
        conversation.clear();
        assert!(conversation.is_empty());
        assert_eq!(conversation.stats().host, "localhost:11434");
    }
}
