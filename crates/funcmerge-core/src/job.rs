//! End-to-end merge of a transaction file into a store

use crate::config::MergeConfig;
use crate::error::Result;
use crate::merger::{merge_functions, merge_functions_with_resolver, MergeResult};
use crate::parser::parse_transaction_file;
use crate::resolve::ConflictResolver;
use crate::snapshot::snapshot_functions;
use crate::store::FunctionStore;

/// Parse the configured transaction file and merge it into `store`
///
/// Nothing is read or mutated when the config has no transaction file, and
/// format errors surface before the store is touched.
pub fn run_merge<S: FunctionStore + ?Sized>(
    config: &MergeConfig,
    store: &mut S,
    resolver: Option<&mut dyn ConflictResolver>,
) -> Result<MergeResult> {
    let function_file = config.function_file()?;
    let _span = tracing::info_span!(
        "merge_functions",
        file = %function_file.display(),
        policy = %config.policy
    )
    .entered();

    let file_functions = parse_transaction_file(function_file)?;
    let database_functions = snapshot_functions(&*store)?;

    let options = config.options();
    let result = match resolver {
        Some(resolver) => merge_functions_with_resolver(
            store,
            &database_functions,
            &file_functions,
            &options,
            resolver,
        )?,
        None => merge_functions(store, &database_functions, &file_functions, &options)?,
    };

    tracing::info!("{}", result.summary());
    Ok(result)
}
