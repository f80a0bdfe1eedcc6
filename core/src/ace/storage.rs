//! Storage for the section-partitioned playbook
//!
//! The whole playbook is persisted as one JSON document. Saves are
//! write-then-replace: the document is written to a temp file next to
//! the target and renamed over it, so a reader (or a crash) never
//! observes a half-written playbook.

use crate::ace::error::AceError;
use crate::ace::types::Playbook;
use chrono::Utc;
use std::path::Path;
use std::path::PathBuf;
use tokio::fs;

/// Playbook persistence
pub struct PlaybookStorage {
    /// Playbook file path
    playbook_path: PathBuf,

    /// Archive directory
    archive_dir: PathBuf,
}

impl PlaybookStorage {
    /// Create storage rooted at `base_path`, creating directories as needed
    pub fn new(base_path: impl AsRef<Path>) -> Result<Self, AceError> {
        let base_path = base_path.as_ref();
        let playbook_path = base_path.join("playbook.json");
        let archive_dir = base_path.join("archive");

        std::fs::create_dir_all(base_path)?;
        std::fs::create_dir_all(&archive_dir)?;

        Ok(Self {
            playbook_path,
            archive_dir,
        })
    }

    /// Load the playbook, or an empty one when no file exists yet
    pub async fn load_playbook(&self) -> Result<Playbook, AceError> {
        if !self.playbook_path.exists() {
            return Ok(Playbook::new());
        }

        let content = fs::read_to_string(&self.playbook_path).await?;

        let playbook: Playbook = serde_json::from_str(&content)
            .map_err(|err| AceError::Storage(format!("failed to parse playbook JSON: {err}")))?;

        tracing::debug!(
            "Loaded playbook version {} with {} bullets",
            playbook.version,
            playbook.total_bullets()
        );

        Ok(playbook)
    }

    /// Save the playbook atomically (write temp file, then rename)
    pub async fn save_playbook(&self, playbook: &Playbook) -> Result<(), AceError> {
        let json = serde_json::to_string_pretty(playbook)
            .map_err(|err| AceError::Storage(format!("failed to serialize playbook: {err}")))?;

        let tmp_path = self.playbook_path.with_extension("json.tmp");
        fs::write(&tmp_path, json).await?;
        fs::rename(&tmp_path, &self.playbook_path).await?;

        tracing::debug!(
            "Saved playbook version {} with {} bullets",
            playbook.version,
            playbook.total_bullets()
        );

        Ok(())
    }

    /// Snapshot the current playbook into the archive directory
    pub async fn archive(&self, playbook: &Playbook) -> Result<PathBuf, AceError> {
        let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
        let archive_path = self.archive_dir.join(format!("playbook_{timestamp}.json"));

        let json = serde_json::to_string_pretty(playbook)
            .map_err(|err| AceError::Storage(format!("failed to serialize playbook: {err}")))?;
        fs::write(&archive_path, json).await?;

        tracing::info!("Archived playbook to: {}", archive_path.display());

        Ok(archive_path)
    }

    /// Archive directory path (read-only accessor for the CLI)
    pub fn archive_dir(&self) -> &Path {
        &self.archive_dir
    }
}
