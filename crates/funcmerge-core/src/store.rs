//! Function store abstraction and an in-memory implementation
//!
//! The merge engine never talks to a concrete database. It is handed a
//! [`FunctionStore`] and performs every mutation through it, which keeps the
//! rollback logic independent of where functions actually live.

use crate::error::{Error, Result, StoreError};
use crate::table::{fold_id, Function, FunctionTable};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Live storage for functional definitions
pub trait FunctionStore {
    /// List every defined function
    fn functions(&self) -> Result<Vec<Function>>;

    /// Create a new function; fails if the id is already defined
    fn create_function(&mut self, id: &str, expression: &str) -> Result<()>;

    /// Read the expression of a function, `None` if it does not exist
    fn expression(&self, id: &str) -> Result<Option<String>>;

    /// Replace the expression of an existing function
    fn set_expression(&mut self, id: &str, expression: &str) -> Result<()>;

    /// Delete an existing function
    fn delete_function(&mut self, id: &str) -> Result<()>;
}

/// An in-memory function store with case-insensitive ids
///
/// Expressions are kept exactly as written. This is the store behind the
/// JSON "function bank" files the CLI operates on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryStore {
    functions: BTreeMap<String, Function>,
}

/// On-disk representation of a [`MemoryStore`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BankFile {
    /// Defined functions
    pub functions: Vec<Function>,
}

impl MemoryStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from a list of functions; later duplicates win
    pub fn from_functions<I: IntoIterator<Item = Function>>(functions: I) -> Self {
        let functions = functions
            .into_iter()
            .map(|f| (fold_id(&f.id), f))
            .collect();
        Self { functions }
    }

    /// Load a store from a JSON bank file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| Error::FileRead {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        let bank: BankFile = serde_json::from_str(&content)?;
        Ok(Self::from_functions(bank.functions))
    }

    /// Save the store to a JSON bank file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let bank = BankFile {
            functions: self.functions.values().cloned().collect(),
        };
        let content = serde_json::to_string_pretty(&bank)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Look up a function by id
    pub fn get(&self, id: &str) -> Option<&Function> {
        self.functions.get(&fold_id(id))
    }

    /// Get the number of functions
    pub fn len(&self) -> usize {
        self.functions.len()
    }

    /// Check if the store has no functions
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Copy the store contents into a normalized table
    pub fn to_table(&self) -> FunctionTable {
        self.functions
            .values()
            .map(|f| (f.id.clone(), f.expression.as_str()))
            .collect()
    }
}

impl FunctionStore for MemoryStore {
    fn functions(&self) -> Result<Vec<Function>> {
        Ok(self.functions.values().cloned().collect())
    }

    fn create_function(&mut self, id: &str, expression: &str) -> Result<()> {
        let key = fold_id(id);
        if self.functions.contains_key(&key) {
            return Err(StoreError::AlreadyExists { id: id.to_string() }.into());
        }
        self.functions.insert(key, Function::new(id, expression));
        Ok(())
    }

    fn expression(&self, id: &str) -> Result<Option<String>> {
        Ok(self.get(id).map(|f| f.expression.clone()))
    }

    fn set_expression(&mut self, id: &str, expression: &str) -> Result<()> {
        let function = self
            .functions
            .get_mut(&fold_id(id))
            .ok_or_else(|| StoreError::NotFound { id: id.to_string() })?;
        function.expression = expression.to_string();
        Ok(())
    }

    fn delete_function(&mut self, id: &str) -> Result<()> {
        self.functions
            .remove(&fold_id(id))
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound { id: id.to_string() }.into())
    }
}
