//! Error types for funcmerge-core

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in funcmerge-core
#[derive(Debug, Error)]
pub enum Error {
    /// No transaction file was configured
    #[error("import file not specified")]
    MissingInput,

    /// Failed to read a file
    #[error("failed to read file '{path}': {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Malformed transaction file
    #[error("format error in '{path}' at line {line}: {kind}")]
    Format {
        path: PathBuf,
        line: usize,
        kind: FormatErrorKind,
    },

    /// Conflicting definitions under the RAISE policy
    #[error(
        "the following {count} functions have conflicting definitions: {}",
        .ids.join(", ")
    )]
    Conflict { count: usize, ids: Vec<String> },

    /// Failure reported by the function store
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// EDIT policy selected without a resolver to consult
    #[error("conflict policy EDIT requires a conflict resolver")]
    ResolverRequired,

    /// A resolution entry that cannot be applied
    #[error("invalid resolution for function '{id}': {message}")]
    InvalidResolution { id: String, message: String },

    /// Unrecognised conflict policy name
    #[error("unknown conflict policy '{0}' (expected raise, preserve, overwrite or edit)")]
    InvalidPolicy(String),

    /// CSV error from the csv crate
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// The ways a transaction file can be malformed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatErrorKind {
    /// A `t` record that does not open a functions block
    #[error("wrong transaction record type '{found}', expected 'functions'")]
    WrongRecordType { found: String },

    /// A record that is only valid inside a functions block
    #[error("'{code}' record before 't functions' record")]
    RecordOrder { code: char },

    /// A line code that is not part of the format
    #[error("unknown record code '{code}'")]
    UnknownRecordCode { code: char },

    /// An `a` record without the `=` separating id and expression
    #[error("add record is missing '=' between id and expression")]
    MissingSeparator,

    /// An `a` record whose id is blank
    #[error("add record has an empty function id")]
    EmptyFunctionId,
}

/// Errors raised by a [`FunctionStore`](crate::store::FunctionStore)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// No function with this id exists
    #[error("function '{id}' does not exist")]
    NotFound { id: String },

    /// A function with this id already exists
    #[error("function '{id}' already exists")]
    AlreadyExists { id: String },

    /// Backend-specific failure
    #[error("{0}")]
    Backend(String),
}

impl Error {
    /// Build a format error for a given source and line
    pub fn format(path: impl Into<PathBuf>, line: usize, kind: FormatErrorKind) -> Self {
        Error::Format {
            path: path.into(),
            line,
            kind,
        }
    }

    /// Build a conflict error from the conflicting ids, in order
    pub fn conflict(ids: Vec<String>) -> Self {
        Error::Conflict {
            count: ids.len(),
            ids,
        }
    }
}
