//! Error taxonomy for compilation and execution.
//!
//! Compile-time errors abort the whole compilation and are never recovered
//! internally. Validation failures and JTD parse failures are not errors at
//! all: they come back as data (`Validation`, `ParseOutcome`).
use serde_json::Value;
use thiserror::Error;

/// An identifier failed the name grammar.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid name {0:?}: names must match ^[a-zA-Z_$][a-zA-Z_$0-9]*$")]
pub struct NameError(pub String);

/// A `$ref` that could not be resolved against the known documents.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("can't resolve reference {reference} from id {base}")]
pub struct MissingRefError {
    pub reference: String,
    pub base: String,
    /// Document URI (without fragment) that a loader would have to supply.
    pub missing_schema: String,
}

#[derive(Error, Debug, Clone)]
pub enum CompileError {
    #[error("schema is invalid at {path}: {reason}")]
    InvalidSchema { path: String, reason: String },

    #[error("strict mode: unknown keyword {keyword:?} at {path}")]
    UnknownKeyword { keyword: String, path: String },

    #[error("keyword {keyword:?} at {path} requires sibling keyword {sibling:?}")]
    MissingSibling { keyword: String, sibling: String, path: String },

    #[error("discriminator at {path}: tag value {tag:?} is mapped more than once")]
    DuplicateTag { tag: String, path: String },

    #[error("standalone code: value {name} has no literal or import form")]
    StandaloneValue { name: String },

    #[error("forward reference {name} was never filled")]
    UnfilledSlot { name: String },

    #[error("async schema referenced by sync schema at {path}")]
    AsyncRefInSync { path: String },

    #[error(transparent)]
    MissingRef(#[from] MissingRefError),

    #[error("unresolved reference: {0}")]
    UnresolvedRef(MissingRefError),

    #[error("invalid keyword definition {keyword:?}: {reason}")]
    InvalidKeywordDefinition { keyword: String, reason: String },

    #[error("unknown format {format:?} at {path}")]
    UnknownFormat { format: String, path: String },

    #[error("invalid regular expression {pattern:?}: {reason}")]
    InvalidRegex { pattern: String, reason: String },

    #[error("invalid JTD schema at {path}: {reason}")]
    Jtd { path: String, reason: String },

    #[error(transparent)]
    Name(#[from] NameError),
}

impl CompileError {
    pub(crate) fn invalid(path: impl Into<String>, reason: impl Into<String>) -> Self {
        CompileError::InvalidSchema { path: path.into(), reason: reason.into() }
    }

    pub(crate) fn jtd(path: impl Into<String>, reason: impl Into<String>) -> Self {
        CompileError::Jtd { path: path.into(), reason: reason.into() }
    }
}

/// Faults while running compiled code. These are not validation failures.
#[derive(Error, Debug, Clone)]
pub enum RuntimeError {
    #[error("maximum call depth {0} exceeded")]
    DepthExceeded(usize),

    #[error("uncaught exception: {0}")]
    Uncaught(Value),

    #[error("type error: {0}")]
    Type(String),

    #[error("malformed module: {0}")]
    Malformed(String),
}

pub type Result<T, E = CompileError> = std::result::Result<T, E>;
