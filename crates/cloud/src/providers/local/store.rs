//! State file persistence for the local provider.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::providers::traits::Instance;

/// Everything the local provider knows, as persisted on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocalState {
    /// Known instances, including terminated ones.
    pub instances: Vec<Instance>,
    /// Timestamp of last update.
    #[serde(default)]
    pub updated_at: Option<String>,
}

impl LocalState {
    /// Load state from file. A missing file is an empty state.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "No local state file, starting empty");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).context("Failed to read state file")?;
        let state: Self = serde_json::from_str(&content).context("Failed to parse state file")?;

        debug!(
            path = %path.display(),
            instances = state.instances.len(),
            "Loaded local state"
        );
        Ok(state)
    }

    /// Save state to file, creating parent directories as needed.
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    pub fn save(&mut self, path: &Path) -> Result<()> {
        self.updated_at = Some(chrono::Utc::now().to_rfc3339());

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).context("Failed to create state directory")?;
        }

        let content = serde_json::to_string_pretty(self).context("Failed to serialize state")?;
        std::fs::write(path, content).context("Failed to write state file")?;

        Ok(())
    }

    /// Default state file location under the user's working directory.
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathBuf::from(".inference-host").join("local-state.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let state = LocalState::load(&dir.path().join("nope.json")).unwrap();
        assert!(state.instances.is_empty());
    }

    #[test]
    fn test_save_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/state.json");

        let mut state = LocalState::default();
        state.save(&path).unwrap();

        let loaded = LocalState::load(&path).unwrap();
        assert!(loaded.updated_at.is_some());
    }
}
