//! funcmerge-core: Core library for merging functional definitions
//!
//! This library provides functionality to:
//! - Parse function transaction files into function tables
//! - Snapshot the functions currently defined in a store
//! - Merge incoming functions into a store, settling conflicts by policy
//! - Roll back every change when a merge fails
//! - Export functions back to the transaction file format

pub mod config;
pub mod error;
pub mod export;
pub mod history;
pub mod job;
pub mod merger;
pub mod parser;
pub mod resolve;
pub mod snapshot;
pub mod store;
pub mod table;

pub use config::MergeConfig;
pub use error::{Error, FormatErrorKind, Result, StoreError};
pub use export::{to_transaction_string, write_transaction_file};
pub use history::{create_history_entry, HistoryEntry, HistoryFile};
pub use job::run_merge;
pub use merger::{
    merge_functions, merge_functions_with_resolver, plan_merge, Conflict, ConflictPolicy,
    MergeOptions, MergePlan, MergeResult, ModifiedFunction, RollbackLog,
};
pub use parser::{parse_transaction_file, parse_transaction_str};
pub use resolve::{
    ConflictResolver, Decisions, Resolution, ResolutionAction, ResolutionEntry, ResolutionFile,
};
pub use snapshot::snapshot_functions;
pub use store::{FunctionStore, MemoryStore};
pub use table::{normalize_expression, Function, FunctionTable};
