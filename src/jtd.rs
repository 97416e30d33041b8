//! JSON Type Definition: compiled parsers and serializers.
//!
//! Both compilers walk the typed [`Schema`] form by form and emit IR through
//! the same `CodeBuilder`/`ValueScope` pair the JSON Schema compiler uses.
//! Every `ref` target becomes one function, compiled at most once, unless it
//! contains no references itself, in which case it is inlined.
mod parse;
mod schema;
mod serialize;

use std::collections::HashMap;
use std::rc::Rc;

use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value;

use crate::codegen::{Function, Name, ValueScope};
use crate::error::{CompileError, Result, RuntimeError};
use crate::path_de;
use crate::runtime::{DEFAULT_MAX_DEPTH, Helper, Module};

pub use parse::Pos;
pub use schema::{Form, Node, Schema, TypeForm};

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct JtdOptions {
    /// Accept insignificant whitespace between tokens. Each skip promotes the
    /// read position to a runtime value, so this is off by default.
    pub whitespace: bool,
    pub max_depth: usize,
}

impl Default for JtdOptions {
    fn default() -> Self {
        JtdOptions { whitespace: false, max_depth: DEFAULT_MAX_DEPTH }
    }
}

impl JtdOptions {
    pub fn from_json_str(src: &str) -> Result<Self> {
        path_de::from_str_with_path(src).map_err(|e| CompileError::invalid(format!("options{}", e.path), e.message))
    }

    pub fn whitespace(mut self) -> Self {
        self.whitespace = true;
        self
    }
}

/// What a compiled parser returns. Malformed text is data, not an error.
#[derive(Clone, Debug, PartialEq)]
pub enum ParseOutcome {
    Parsed { value: Value, position: usize },
    Failed { message: String, position: usize },
}

impl ParseOutcome {
    pub fn value(self) -> Option<Value> {
        match self {
            ParseOutcome::Parsed { value, .. } => Some(value),
            ParseOutcome::Failed { .. } => None,
        }
    }

    pub fn position(&self) -> usize {
        match self {
            ParseOutcome::Parsed { position, .. } | ParseOutcome::Failed { position, .. } => *position,
        }
    }
}

// ---------------------------- Shared compile state ----------------------- //

/// One compilation's functions, values and `ref` memo.
#[derive(Default)]
struct Unit {
    scope: ValueScope,
    functions: IndexMap<Name, Rc<Function>>,
    /// Definition name → its function, recorded before the body is compiled
    /// so recursive references resolve to the same function. JTD `ref`s only
    /// name root `definitions`, so this map stands in for the URI-keyed envs.
    refs: HashMap<String, Name>,
}

impl Unit {
    fn helper(&mut self, h: Helper) -> Name {
        self.scope.value("func", h.descriptor())
    }

    fn add(&mut self, functions: Vec<Function>) {
        for f in functions {
            self.functions.insert(f.name.clone(), Rc::new(f));
        }
    }

    fn link(&self, entry: &Name, max_depth: usize) -> Result<Rc<Module>> {
        let out = self.scope.finalize_live(entry, &self.functions)?;
        Ok(Rc::new(Module::new(out.functions, out.values, max_depth)))
    }
}

// ------------------------------- Compiler -------------------------------- //

#[derive(Clone, Debug, Default)]
pub struct JtdCompiler {
    opts: JtdOptions,
}

impl JtdCompiler {
    pub fn new(opts: JtdOptions) -> Self {
        JtdCompiler { opts }
    }

    pub fn parser(&self, schema: &Value) -> Result<JtdParser> {
        let schema = Schema::from_value(schema)?;
        let mut unit = Unit::default();
        let entry = parse::compile(&mut unit, &schema, &self.opts)?;
        Ok(JtdParser { module: unit.link(&entry, self.opts.max_depth)?, entry })
    }

    pub fn serializer(&self, schema: &Value) -> Result<JtdSerializer> {
        let schema = Schema::from_value(schema)?;
        let mut unit = Unit::default();
        let entry = serialize::compile(&mut unit, &schema)?;
        Ok(JtdSerializer { module: unit.link(&entry, self.opts.max_depth)?, entry })
    }
}

fn source(module: &Module) -> String {
    module.functions().map(ToString::to_string).collect::<Vec<_>>().join("\n")
}

#[derive(Clone, Debug)]
pub struct JtdParser {
    module: Rc<Module>,
    entry: Name,
}

impl JtdParser {
    pub fn parse(&self, json: &str) -> ParseOutcome {
        let run = match self.module.run(&self.entry, vec![Value::from(json)]) {
            Ok(run) => run,
            Err(e) => return ParseOutcome::Failed { message: e.to_string(), position: 0 },
        };
        let position = |v: &Value| v.as_u64().unwrap_or(0) as usize;
        match run.outcome {
            Ok(Value::Array(mut pair)) if pair.len() == 2 => {
                let end = position(&pair[1]);
                ParseOutcome::Parsed { value: pair.swap_remove(0), position: end }
            }
            Ok(other) => ParseOutcome::Failed { message: format!("parser returned {other}"), position: 0 },
            Err(thrown) => ParseOutcome::Failed {
                message: thrown.get("message").and_then(Value::as_str).unwrap_or("parse error").to_string(),
                position: thrown.get("position").map(position).unwrap_or(0),
            },
        }
    }

    pub fn source(&self) -> String {
        source(&self.module)
    }
}

#[derive(Clone, Debug)]
pub struct JtdSerializer {
    module: Rc<Module>,
    entry: Name,
}

impl JtdSerializer {
    /// Serialize without validating; `data` is assumed to fit the schema.
    pub fn serialize(&self, data: &Value) -> Result<String, RuntimeError> {
        let run = self.module.run(&self.entry, vec![data.clone()])?;
        match run.outcome {
            Ok(Value::String(s)) => Ok(s),
            Ok(other) => Err(RuntimeError::Malformed(format!("serializer returned {other}"))),
            Err(thrown) => Err(RuntimeError::Uncaught(thrown)),
        }
    }

    pub fn source(&self) -> String {
        source(&self.module)
    }
}
