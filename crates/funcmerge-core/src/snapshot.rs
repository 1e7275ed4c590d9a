//! Snapshot of the functions currently defined in a store

use crate::error::Result;
use crate::store::FunctionStore;
use crate::table::FunctionTable;

/// Read every function in the store into a normalized table
///
/// Ids keep the casing the store reports. Store failures propagate unchanged.
pub fn snapshot_functions<S: FunctionStore + ?Sized>(store: &S) -> Result<FunctionTable> {
    let functions = store.functions()?;
    let table: FunctionTable = functions
        .into_iter()
        .map(|f| (f.id, f.expression))
        .collect();

    tracing::debug!(count = table.len(), "loaded functions from store");
    Ok(table)
}
