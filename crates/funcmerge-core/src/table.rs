//! Core table types for representing function definitions

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single functional definition: an id and its expression
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Function {
    /// Function id as issued by its source (e.g. "fd12")
    pub id: String,
    /// Expression text
    pub expression: String,
}

impl Function {
    /// Create a new function
    pub fn new(id: impl Into<String>, expression: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            expression: expression.into(),
        }
    }
}

/// A table of functions keyed by case-insensitive id
///
/// Expressions are normalized with [`normalize_expression`] on insert, so two
/// definitions that only differ in spacing compare equal. Ids keep the casing
/// they were inserted with.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FunctionTable {
    entries: BTreeMap<String, Function>,
}

impl FunctionTable {
    /// Create a new empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a function, returning the previous definition
    pub fn insert(&mut self, id: impl Into<String>, expression: &str) -> Option<Function> {
        let id = id.into();
        let function = Function::new(id.clone(), normalize_expression(expression));
        self.entries.insert(fold_id(&id), function)
    }

    /// Look up a function by id
    pub fn get(&self, id: &str) -> Option<&Function> {
        self.entries.get(&fold_id(id))
    }

    /// Get the normalized expression for an id
    pub fn expression(&self, id: &str) -> Option<&str> {
        self.get(id).map(|f| f.expression.as_str())
    }

    /// Check whether an id is present
    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(&fold_id(id))
    }

    /// Remove a function by id
    pub fn remove(&mut self, id: &str) -> Option<Function> {
        self.entries.remove(&fold_id(id))
    }

    /// Get the number of functions
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the table has no functions
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over functions in id order
    pub fn iter(&self) -> impl Iterator<Item = &Function> {
        self.entries.values()
    }

    /// Get all ids in id order
    pub fn ids(&self) -> Vec<&str> {
        self.entries.values().map(|f| f.id.as_str()).collect()
    }
}

impl<K: Into<String>, V: AsRef<str>> FromIterator<(K, V)> for FunctionTable {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut table = FunctionTable::new();
        for (id, expression) in iter {
            table.insert(id, expression.as_ref());
        }
        table
    }
}

/// Strip all whitespace from an expression
pub fn normalize_expression(expression: &str) -> String {
    expression.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Key under which an id is stored; ids compare case-insensitively
pub(crate) fn fold_id(id: &str) -> String {
    id.to_lowercase()
}
