//! Merge engine for folding transaction file functions into a store
//!
//! Functions only present in the file are always added. Functions present in
//! both sources with different expressions are conflicts, settled by the
//! configured [`ConflictPolicy`]. Functions only present in the store are
//! never touched.
//!
//! Every mutation is recorded in a [`RollbackLog`]. When the merge fails and
//! `revert_on_error` is set, the log is replayed backwards so the store ends
//! up exactly as it was before the call.

use crate::error::{Error, Result, StoreError};
use crate::resolve::{ConflictResolver, Decisions, Resolution};
use crate::store::FunctionStore;
use crate::table::{fold_id, normalize_expression, Function, FunctionTable};
use serde::{Deserialize, Serialize};
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// How conflicting definitions are settled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConflictPolicy {
    /// Fail the merge, naming every conflicting function
    #[serde(alias = "raise")]
    Raise,
    /// Keep the database definitions
    #[serde(alias = "preserve")]
    Preserve,
    /// Replace database definitions with the file's
    #[default]
    #[serde(alias = "overwrite")]
    Overwrite,
    /// Ask a [`ConflictResolver`] for each conflict
    #[serde(alias = "edit")]
    Edit,
}

impl ConflictPolicy {
    /// All policies, in display order
    pub const ALL: [ConflictPolicy; 4] = [
        ConflictPolicy::Raise,
        ConflictPolicy::Preserve,
        ConflictPolicy::Overwrite,
        ConflictPolicy::Edit,
    ];

    /// Upper-case policy name
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictPolicy::Raise => "RAISE",
            ConflictPolicy::Preserve => "PRESERVE",
            ConflictPolicy::Overwrite => "OVERWRITE",
            ConflictPolicy::Edit => "EDIT",
        }
    }
}

impl fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ConflictPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ConflictPolicy::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::InvalidPolicy(s.to_string()))
    }
}

/// Options for a single merge call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeOptions {
    /// Conflict policy
    pub policy: ConflictPolicy,
    /// Undo every change made by the call if it fails
    pub revert_on_error: bool,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            policy: ConflictPolicy::default(),
            revert_on_error: true,
        }
    }
}

impl MergeOptions {
    /// Options with the given policy and rollback enabled
    pub fn with_policy(policy: ConflictPolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }
}

/// A function defined differently in the database and the file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    /// Function id as stored in the database
    pub id: String,
    /// Normalized database expression
    pub database_expression: String,
    /// Normalized file expression
    pub file_expression: String,
}

/// A function whose expression was replaced by the merge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModifiedFunction {
    /// Function id
    pub id: String,
    /// Expression before the merge, exactly as the store held it
    pub old_expression: String,
    /// Expression written by the merge
    pub new_expression: String,
}

/// What a merge would do, computed without touching the store
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MergePlan {
    /// Functions only present in the file, in id order
    pub additions: Vec<Function>,
    /// Conflicting functions, sorted by case-folded id
    pub conflicts: Vec<Conflict>,
    /// Ids present in both sources with equal expressions
    pub unchanged: Vec<String>,
}

impl MergePlan {
    /// True when the merge would change nothing
    pub fn is_noop(&self) -> bool {
        self.additions.is_empty() && self.conflicts.is_empty()
    }
}

/// Compare the database and file tables
pub fn plan_merge(database: &FunctionTable, file: &FunctionTable) -> MergePlan {
    let mut plan = MergePlan::default();

    for function in file.iter() {
        match database.get(&function.id) {
            None => plan.additions.push(function.clone()),
            Some(existing) if existing.expression != function.expression => {
                plan.conflicts.push(Conflict {
                    id: existing.id.clone(),
                    database_expression: existing.expression.clone(),
                    file_expression: function.expression.clone(),
                });
            }
            Some(existing) => plan.unchanged.push(existing.id.clone()),
        }
    }

    plan.conflicts
        .sort_by(|a, b| fold_id(&a.id).cmp(&fold_id(&b.id)).then_with(|| a.id.cmp(&b.id)));
    plan
}

/// Outcome of a successful merge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeResult {
    /// Policy the merge ran with
    pub policy: ConflictPolicy,
    /// Ids created in the store
    pub added: Vec<String>,
    /// Functions whose expression was replaced
    pub modified: Vec<ModifiedFunction>,
    /// Every conflict detected, including ones left unchanged
    pub conflicts: Vec<Conflict>,
}

impl MergeResult {
    /// Number of functions added
    pub fn added_count(&self) -> usize {
        self.added.len()
    }

    /// Number of functions modified
    pub fn modified_count(&self) -> usize {
        self.modified.len()
    }

    /// One-line status message, e.g. "Done. 2 functions added."
    pub fn summary(&self) -> String {
        let mut msg = String::from("Done.");
        if self.added_count() > 0 {
            msg.push_str(&format!(" {} functions added.", self.added_count()));
        }
        if self.modified_count() > 0 {
            msg.push_str(&format!(" {} functions modified.", self.modified_count()));
        }
        msg
    }
}

/// Changes applied to the store during one merge call
#[derive(Debug, Default)]
pub struct RollbackLog {
    added: Vec<String>,
    modified: Vec<ModifiedFunction>,
}

impl RollbackLog {
    /// Create an empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a function created by the merge
    pub fn record_added(&mut self, id: impl Into<String>) {
        self.added.push(id.into());
    }

    /// Record a function whose expression was replaced
    pub fn record_modified(&mut self, change: ModifiedFunction) {
        self.modified.push(change);
    }

    /// Ids created so far
    pub fn added(&self) -> &[String] {
        &self.added
    }

    /// Modifications so far
    pub fn modified(&self) -> &[ModifiedFunction] {
        &self.modified
    }

    /// Check if nothing has been recorded
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty()
    }

    /// Undo every recorded change, newest first
    ///
    /// Keeps going past individual failures and returns how many steps could
    /// not be undone.
    pub fn rollback<S: FunctionStore + ?Sized>(&self, store: &mut S) -> usize {
        let mut failures = 0;

        for change in self.modified.iter().rev() {
            if let Err(e) = store.set_expression(&change.id, &change.old_expression) {
                tracing::error!(id = %change.id, error = %e, "failed to restore function");
                failures += 1;
            }
        }

        for id in self.added.iter().rev() {
            if let Err(e) = store.delete_function(id) {
                tracing::error!(id = %id, error = %e, "failed to remove added function");
                failures += 1;
            }
        }

        failures
    }
}

/// Merge file functions into the store
///
/// `database` must be a snapshot of `store` taken for this call. The EDIT
/// policy fails with [`Error::ResolverRequired`] here; use
/// [`merge_functions_with_resolver`] for it.
pub fn merge_functions<S: FunctionStore + ?Sized>(
    store: &mut S,
    database: &FunctionTable,
    file: &FunctionTable,
    options: &MergeOptions,
) -> Result<MergeResult> {
    merge_with_rollback(store, database, file, options, None)
}

/// Merge file functions into the store, consulting `resolver` under EDIT
pub fn merge_functions_with_resolver<S: FunctionStore + ?Sized>(
    store: &mut S,
    database: &FunctionTable,
    file: &FunctionTable,
    options: &MergeOptions,
    resolver: &mut dyn ConflictResolver,
) -> Result<MergeResult> {
    merge_with_rollback(store, database, file, options, Some(resolver))
}

fn merge_with_rollback<S: FunctionStore + ?Sized>(
    store: &mut S,
    database: &FunctionTable,
    file: &FunctionTable,
    options: &MergeOptions,
    resolver: Option<&mut dyn ConflictResolver>,
) -> Result<MergeResult> {
    let mut log = RollbackLog::new();

    match apply_merge(store, database, file, options, resolver, &mut log) {
        Ok(conflicts) => Ok(MergeResult {
            policy: options.policy,
            added: log.added,
            modified: log.modified,
            conflicts,
        }),
        Err(err) => {
            if options.revert_on_error {
                tracing::warn!(
                    added = log.added.len(),
                    modified = log.modified.len(),
                    "merge failed, reverting changes"
                );
                let failures = log.rollback(store);
                if failures > 0 {
                    tracing::error!(failures, "rollback incomplete");
                }
            } else if !log.is_empty() {
                tracing::warn!(
                    added = log.added.len(),
                    modified = log.modified.len(),
                    "merge failed, leaving partial changes in place"
                );
            }
            Err(err)
        }
    }
}

fn apply_merge<S: FunctionStore + ?Sized>(
    store: &mut S,
    database: &FunctionTable,
    file: &FunctionTable,
    options: &MergeOptions,
    resolver: Option<&mut dyn ConflictResolver>,
    log: &mut RollbackLog,
) -> Result<Vec<Conflict>> {
    let plan = plan_merge(database, file);

    for function in &plan.additions {
        store.create_function(&function.id, &function.expression)?;
        log.record_added(function.id.clone());
        tracing::info!(id = %function.id, expression = %function.expression, "added function");
    }

    if plan.conflicts.is_empty() {
        return Ok(plan.conflicts);
    }

    match options.policy {
        ConflictPolicy::Preserve => {
            for conflict in &plan.conflicts {
                tracing::info!(id = %conflict.id, "preserved database definition");
            }
        }
        ConflictPolicy::Overwrite => {
            for conflict in &plan.conflicts {
                change_function(store, log, &conflict.id, &conflict.file_expression)?;
            }
        }
        ConflictPolicy::Raise => {
            let ids = plan.conflicts.iter().map(|c| c.id.clone()).collect();
            return Err(Error::conflict(ids));
        }
        ConflictPolicy::Edit => {
            let resolver = resolver.ok_or(Error::ResolverRequired)?;
            let decisions = resolver.resolve(&plan.conflicts)?;
            apply_decisions(store, log, &plan.conflicts, decisions)?;
        }
    }

    Ok(plan.conflicts)
}

fn apply_decisions<S: FunctionStore + ?Sized>(
    store: &mut S,
    log: &mut RollbackLog,
    conflicts: &[Conflict],
    decisions: Decisions,
) -> Result<()> {
    let mut folded: BTreeMap<String, (String, Resolution)> = BTreeMap::new();
    for (id, resolution) in decisions {
        match folded.entry(fold_id(&id)) {
            Entry::Vacant(slot) => {
                slot.insert((id, resolution));
            }
            Entry::Occupied(slot) => {
                tracing::warn!(
                    id = %id,
                    kept = %slot.get().0,
                    "ignoring duplicate decision for the same function"
                );
            }
        }
    }
    let decisions = folded;
    let conflict_keys: BTreeSet<String> = conflicts.iter().map(|c| fold_id(&c.id)).collect();

    for (key, (id, _)) in &decisions {
        if !conflict_keys.contains(key) {
            tracing::warn!(id = %id, "ignoring decision for function without a conflict");
        }
    }

    for conflict in conflicts {
        let Some((_, resolution)) = decisions.get(&fold_id(&conflict.id)) else {
            tracing::info!(id = %conflict.id, "no decision, kept database definition");
            continue;
        };
        let Some(replacement) = resolution.replacement(conflict) else {
            tracing::info!(id = %conflict.id, "kept database definition");
            continue;
        };

        let expression = normalize_expression(replacement);
        if expression.is_empty() {
            return Err(Error::InvalidResolution {
                id: conflict.id.clone(),
                message: "replacement expression is empty".to_string(),
            });
        }
        if expression == conflict.database_expression {
            continue;
        }
        change_function(store, log, &conflict.id, &expression)?;
    }

    Ok(())
}

/// Replace a function's expression, logging the original for rollback
fn change_function<S: FunctionStore + ?Sized>(
    store: &mut S,
    log: &mut RollbackLog,
    id: &str,
    expression: &str,
) -> Result<()> {
    let original = store
        .expression(id)?
        .ok_or_else(|| StoreError::NotFound { id: id.to_string() })?;
    store.set_expression(id, expression)?;

    tracing::info!(id, old = %original, new = %expression, "changed function");
    log.record_modified(ModifiedFunction {
        id: id.to_string(),
        old_expression: original,
        new_expression: expression.to_string(),
    });
    Ok(())
}
