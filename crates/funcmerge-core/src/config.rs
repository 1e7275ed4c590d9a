//! Merge configuration

use crate::error::{Error, Result};
use crate::merger::{ConflictPolicy, MergeOptions};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Settings for one merge run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeConfig {
    /// Transaction file to merge; required
    #[serde(default)]
    pub function_file: Option<PathBuf>,
    /// Conflict policy
    #[serde(default)]
    pub policy: ConflictPolicy,
    /// Undo all changes if the merge fails
    #[serde(default = "default_revert_on_error")]
    pub revert_on_error: bool,
}

fn default_revert_on_error() -> bool {
    true
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            function_file: None,
            policy: ConflictPolicy::default(),
            revert_on_error: default_revert_on_error(),
        }
    }
}

impl MergeConfig {
    /// Config for a transaction file with default options
    pub fn new(function_file: impl Into<PathBuf>) -> Self {
        Self {
            function_file: Some(function_file.into()),
            ..Self::default()
        }
    }

    /// Load a config from JSON
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| Error::FileRead {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        serde_json::from_str(&content).map_err(Error::Json)
    }

    /// Save the config to JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// The transaction file, or [`Error::MissingInput`] if none is set
    pub fn function_file(&self) -> Result<&Path> {
        self.function_file.as_deref().ok_or(Error::MissingInput)
    }

    /// Options passed to the merge engine
    pub fn options(&self) -> MergeOptions {
        MergeOptions {
            policy: self.policy,
            revert_on_error: self.revert_on_error,
        }
    }
}
