//! Compile JSON Schema and JSON Type Definition documents into programs.
//!
//! A schema becomes a set of functions in a small typed IR ([`codegen`]),
//! which the [`runtime`] interpreter runs directly or which can be shipped as
//! a self-contained [`StandaloneModule`]. JTD schemas also compile into
//! parsers and serializers ([`jtd`]).
//!
//! ```no_run
//! use json_schemac::{Compiler, Options};
//! use serde_json::json;
//!
//! let mut compiler = Compiler::new(Options { all_errors: true, ..Options::default() });
//! let validator = compiler.compile(&json!({"type": "object", "required": ["id"]})).unwrap();
//! let out = validator.validate(&json!({})).unwrap();
//! assert!(!out.valid);
//! ```
pub mod codegen;
pub mod compile;
pub mod error;
pub mod formats;
pub mod jtd;
pub mod path_de;
pub mod runtime;
pub mod validator;
pub mod vocab;

pub use compile::{Compiler, InlineRefs, KeywordCxt, MissingRefs, Options, SchemaLoader, StrictMode};
pub use error::{CompileError, MissingRefError, RuntimeError};
pub use formats::FormatDefinition;
pub use jtd::{JtdCompiler, JtdOptions, JtdParser, JtdSerializer, ParseOutcome};
pub use runtime::Imports;
pub use validator::{StandaloneModule, Validation, ValidationError, ValidationErrors, Validator};
pub use vocab::KeywordDefinition;
