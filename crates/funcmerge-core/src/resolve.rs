//! Conflict resolution strategies for the EDIT policy
//!
//! This module provides:
//! - The [`ConflictResolver`] strategy consulted by the merge engine
//! - Per-id [`Resolution`] decisions
//! - A resolution file format (JSON) for deciding conflicts ahead of time

use crate::error::{Error, Result};
use crate::merger::Conflict;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Decisions returned by a resolver, keyed by function id
pub type Decisions = BTreeMap<String, Resolution>;

/// What to do with one conflicting function
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Leave the database definition in place
    Keep,
    /// Replace it with the definition from the transaction file
    UseFile,
    /// Replace it with a hand-written expression
    Custom(String),
}

impl Resolution {
    /// The replacement expression this decision asks for, if any
    pub fn replacement<'a>(&'a self, conflict: &'a Conflict) -> Option<&'a str> {
        match self {
            Resolution::Keep => None,
            Resolution::UseFile => Some(conflict.file_expression.as_str()),
            Resolution::Custom(expression) => Some(expression.as_str()),
        }
    }
}

/// Strategy that decides conflicts the configured policy cannot
///
/// Ids missing from the returned decisions are kept as they are in the
/// database.
pub trait ConflictResolver {
    /// Decide the given conflicts, which arrive sorted by id
    fn resolve(&mut self, conflicts: &[Conflict]) -> Result<Decisions>;
}

impl<F> ConflictResolver for F
where
    F: FnMut(&[Conflict]) -> Result<Decisions>,
{
    fn resolve(&mut self, conflicts: &[Conflict]) -> Result<Decisions> {
        self(conflicts)
    }
}

/// Action recorded in a resolution file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionAction {
    Keep,
    File,
    Custom,
}

/// A single decision in a resolution file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionEntry {
    /// Function id
    pub id: String,
    /// Chosen action
    pub action: ResolutionAction,
    /// Expression for the `custom` action
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
    /// Database expression at the time the template was written
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_expression: Option<String>,
    /// File expression at the time the template was written
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_expression: Option<String>,
}

impl ResolutionEntry {
    /// Create an entry with no reference expressions
    pub fn new(id: impl Into<String>, action: ResolutionAction) -> Self {
        Self {
            id: id.into(),
            action,
            expression: None,
            database_expression: None,
            file_expression: None,
        }
    }

    /// Create a `custom` entry
    pub fn custom(id: impl Into<String>, expression: impl Into<String>) -> Self {
        Self {
            expression: Some(expression.into()),
            ..Self::new(id, ResolutionAction::Custom)
        }
    }

    /// Convert to the decision the merge engine applies
    pub fn to_resolution(&self) -> Result<Resolution> {
        match self.action {
            ResolutionAction::Keep => Ok(Resolution::Keep),
            ResolutionAction::File => Ok(Resolution::UseFile),
            ResolutionAction::Custom => match &self.expression {
                Some(expression) if !expression.trim().is_empty() => {
                    Ok(Resolution::Custom(expression.clone()))
                }
                _ => Err(Error::InvalidResolution {
                    id: self.id.clone(),
                    message: "custom action requires an expression".to_string(),
                }),
            },
        }
    }
}

/// A file of per-function decisions for the EDIT policy
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResolutionFile {
    /// Decisions, one per conflicting function
    pub resolutions: Vec<ResolutionEntry>,
}

impl ResolutionFile {
    /// Create an empty resolution file
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a template that keeps every conflicting database definition
    pub fn template(conflicts: &[Conflict]) -> Self {
        let resolutions = conflicts
            .iter()
            .map(|c| ResolutionEntry {
                database_expression: Some(c.database_expression.clone()),
                file_expression: Some(c.file_expression.clone()),
                ..ResolutionEntry::new(c.id.clone(), ResolutionAction::Keep)
            })
            .collect();
        Self { resolutions }
    }

    /// Add a decision
    pub fn add_entry(&mut self, entry: ResolutionEntry) {
        self.resolutions.push(entry);
    }

    /// Load a resolution file from JSON
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| Error::FileRead {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        serde_json::from_str(&content).map_err(Error::Json)
    }

    /// Save the resolution file to JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Convert every entry into a decision
    pub fn decisions(&self) -> Result<Decisions> {
        self.resolutions
            .iter()
            .map(|entry| Ok((entry.id.clone(), entry.to_resolution()?)))
            .collect()
    }
}

impl ConflictResolver for ResolutionFile {
    fn resolve(&mut self, _conflicts: &[Conflict]) -> Result<Decisions> {
        self.decisions()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conflict(id: &str, db: &str, file: &str) -> Conflict {
        Conflict {
            id: id.to_string(),
            database_expression: db.to_string(),
            file_expression: file.to_string(),
        }
    }

    #[test]
    fn test_replacement() {
        let c = conflict("fd1", "a", "b");

        assert_eq!(Resolution::Keep.replacement(&c), None);
        assert_eq!(Resolution::UseFile.replacement(&c), Some("b"));
        assert_eq!(Resolution::Custom("c".to_string()).replacement(&c), Some("c"));
    }

    #[test]
    fn test_template_keeps_everything() {
        let conflicts = vec![conflict("fd1", "a", "b"), conflict("fd2", "c", "d")];
        let file = ResolutionFile::template(&conflicts);

        assert_eq!(file.resolutions.len(), 2);
        assert!(file
            .resolutions
            .iter()
            .all(|e| e.action == ResolutionAction::Keep));
        assert_eq!(file.resolutions[1].file_expression.as_deref(), Some("d"));
    }

    #[test]
    fn test_custom_requires_expression() {
        let mut entry = ResolutionEntry::new("fd1", ResolutionAction::Custom);
        assert!(matches!(
            entry.to_resolution(),
            Err(Error::InvalidResolution { .. })
        ));

        entry.expression = Some("x+1".to_string());
        assert_eq!(
            entry.to_resolution().unwrap(),
            Resolution::Custom("x+1".to_string())
        );
    }

    #[test]
    fn test_resolution_file_json() {
        let json = r#"{
            "resolutions": [
                { "id": "fd1", "action": "file" },
                { "id": "fd2", "action": "custom", "expression": "ul2 * 2" },
                { "id": "fd3", "action": "keep" }
            ]
        }"#;
        let mut file: ResolutionFile = serde_json::from_str(json).unwrap();
        let decisions = file.resolve(&[]).unwrap();

        assert_eq!(decisions.len(), 3);
        assert_eq!(decisions["fd1"], Resolution::UseFile);
        assert_eq!(decisions["fd2"], Resolution::Custom("ul2 * 2".to_string()));
        assert_eq!(decisions["fd3"], Resolution::Keep);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("resolutions.json");

        let mut file = ResolutionFile::new();
        file.add_entry(ResolutionEntry::custom("fd1", "1"));
        file.save(&path).unwrap();

        let loaded = ResolutionFile::load(&path).unwrap();
        assert_eq!(loaded.resolutions.len(), 1);
        assert_eq!(loaded.resolutions[0].expression.as_deref(), Some("1"));
        assert!(loaded.resolutions[0].database_expression.is_none());
    }

    #[test]
    fn test_closure_resolver() {
        let mut resolver = |conflicts: &[Conflict]| -> Result<Decisions> {
            Ok(conflicts
                .iter()
                .map(|c| (c.id.clone(), Resolution::UseFile))
                .collect())
        };
        let decisions = resolver.resolve(&[conflict("fd1", "a", "b")]).unwrap();
        assert_eq!(decisions["fd1"], Resolution::UseFile);
    }
}
