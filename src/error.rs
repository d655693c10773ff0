//! Error types for dataset loading and check evaluation.

use std::path::PathBuf;

use thiserror::Error;

/// Fatal errors raised while reading the source tables.
///
/// Any of these aborts the run: the loader never returns partial data.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("source file not found: {}", .0.display())]
    MissingFile(PathBuf),

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed delimited data in {}: {source}", path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("{} is missing required column {column}", path.display())]
    MissingColumn { path: PathBuf, column: &'static str },

    #[error("{}:{line}: invalid {column} value {value:?}: {reason}", path.display())]
    InvalidField {
        path: PathBuf,
        line: u64,
        column: &'static str,
        value: String,
        reason: String,
    },
}

/// Errors raised while reading an expectations file.
#[derive(Debug, Error)]
pub enum ExpectationsError {
    #[error("failed to read expectations {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid expectations: {0}")]
    Parse(#[from] serde_yaml_ng::Error),

    #[error("invalid expectations: {field} month {month} is outside 1-12")]
    MonthOutOfRange { field: &'static str, month: u32 },

    #[error("invalid expectations: {field} lists month {month} twice")]
    DuplicateMonth { field: &'static str, month: u32 },
}

/// Why a single check did not pass.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CheckError {
    /// The metric was computed but violates its expectation.
    #[error("{0}")]
    Assertion(String),

    /// The metric could not be computed (e.g. a rate over zero rows).
    #[error("undefined metric: {0}")]
    Undefined(String),
}

impl CheckError {
    pub fn assertion(msg: impl Into<String>) -> Self {
        Self::Assertion(msg.into())
    }

    pub fn undefined(msg: impl Into<String>) -> Self {
        Self::Undefined(msg.into())
    }
}
