//! History of merges applied to a function bank

use crate::error::{Error, Result};
use crate::merger::{ConflictPolicy, MergeResult, ModifiedFunction};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// A record of one successful merge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// When the merge was applied
    pub timestamp: DateTime<Utc>,
    /// Transaction file that was merged
    pub function_file: PathBuf,
    /// Conflict policy in effect
    pub policy: ConflictPolicy,
    /// Ids that were added
    pub added: Vec<String>,
    /// Functions that were changed, with their previous expressions
    pub modified: Vec<ModifiedFunction>,
}

/// History file containing all recorded merges, oldest first
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HistoryFile {
    pub entries: Vec<HistoryEntry>,
}

impl HistoryFile {
    /// Create a new empty history
    pub fn new() -> Self {
        Self::default()
    }

    /// Load history from a file, or create empty if not exists
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::new());
        }

        let content = fs::read_to_string(path).map_err(|e| Error::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        serde_json::from_str(&content).map_err(Error::Json)
    }

    /// Save history to a file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Add an entry to the history
    pub fn add_entry(&mut self, entry: HistoryEntry) {
        self.entries.push(entry);
    }

    /// Get the most recent entry
    pub fn last_entry(&self) -> Option<&HistoryEntry> {
        self.entries.last()
    }

    /// Entries that touched a given function id
    pub fn entries_for(&self, id: &str) -> Vec<&HistoryEntry> {
        self.entries
            .iter()
            .filter(|e| {
                e.added.iter().any(|a| a.eq_ignore_ascii_case(id))
                    || e.modified.iter().any(|m| m.id.eq_ignore_ascii_case(id))
            })
            .collect()
    }

    /// Get total number of entries
    pub fn total_entries(&self) -> usize {
        self.entries.len()
    }
}

/// Create a history entry from a successful merge
pub fn create_history_entry(function_file: &Path, result: &MergeResult) -> HistoryEntry {
    HistoryEntry {
        timestamp: Utc::now(),
        function_file: function_file.to_path_buf(),
        policy: result.policy,
        added: result.added.clone(),
        modified: result.modified.clone(),
    }
}
