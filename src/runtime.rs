//! Execution of compiled modules.
//!
//! A `Module` is the finalized output of a compilation: functions plus the
//! value table they close over. The interpreter in `interp` walks the IR
//! directly; there is no intermediate bytecode.
pub mod helpers;
mod interp;

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use regex::Regex;
use serde_json::Value;

use crate::codegen::{Function, Name, Slot, ValueCode};
use crate::error::RuntimeError;

pub use helpers::Helper;

pub const DEFAULT_MAX_DEPTH: usize = 128;

pub type KeywordFn = Rc<dyn Fn(&Value, &Value) -> bool>;
pub type FormatFn = Rc<dyn Fn(&Value) -> bool>;

// ------------------------------- LiveValue ------------------------------- //

/// An in-process value referenced from compiled code.
#[derive(Clone)]
pub enum LiveValue {
    Json(Rc<Value>),
    Regex(Rc<Regex>),
    Helper(Helper),
    Function(Name),
    Forward(Slot),
    /// User keyword: `(schema, data) -> valid`.
    Keyword(KeywordFn),
    /// User format predicate.
    Format(FormatFn),
}

impl LiveValue {
    /// Identity for deduplication of shared references.
    pub fn ptr_id(&self) -> Option<usize> {
        match self {
            LiveValue::Json(rc) => Some(Rc::as_ptr(rc) as usize),
            LiveValue::Regex(rc) => Some(Rc::as_ptr(rc) as usize),
            LiveValue::Keyword(rc) => Some(Rc::as_ptr(rc) as *const () as usize),
            LiveValue::Format(rc) => Some(Rc::as_ptr(rc) as *const () as usize),
            LiveValue::Helper(_) | LiveValue::Function(_) | LiveValue::Forward(_) => None,
        }
    }
}

impl fmt::Debug for LiveValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LiveValue::Json(v) => write!(f, "Json({v})"),
            LiveValue::Regex(r) => write!(f, "Regex({:?})", r.as_str()),
            LiveValue::Helper(h) => write!(f, "Helper({})", h.import_path()),
            LiveValue::Function(n) => write!(f, "Function({n})"),
            LiveValue::Forward(s) => write!(f, "Forward({})", s.0),
            LiveValue::Keyword(_) => f.write_str("Keyword(<closure>)"),
            LiveValue::Format(_) => f.write_str("Format(<closure>)"),
        }
    }
}

// -------------------------------- Imports -------------------------------- //

/// Import table used to turn persisted value code back into live values.
/// Built-in helpers are always available; user routines are registered here.
#[derive(Clone, Debug, Default)]
pub struct Imports {
    entries: HashMap<String, LiveValue>,
}

impl Imports {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<String>, value: LiveValue) -> &mut Self {
        self.entries.insert(path.into(), value);
        self
    }

    pub fn format(mut self, path: impl Into<String>, f: impl Fn(&Value) -> bool + 'static) -> Self {
        self.insert(path, LiveValue::Format(Rc::new(f)));
        self
    }

    pub fn keyword(mut self, path: impl Into<String>, f: impl Fn(&Value, &Value) -> bool + 'static) -> Self {
        self.insert(path, LiveValue::Keyword(Rc::new(f)));
        self
    }

    pub fn materialize(&self, code: &ValueCode) -> Result<LiveValue, String> {
        match code {
            ValueCode::Json(v) => Ok(LiveValue::Json(Rc::new(v.clone()))),
            ValueCode::Import(path) => self
                .entries
                .get(path)
                .cloned()
                .or_else(|| Helper::from_import(path).map(LiveValue::Helper))
                .ok_or_else(|| format!("unknown import {path:?}")),
            ValueCode::Regex(src) => Regex::new(src).map(|r| LiveValue::Regex(Rc::new(r))).map_err(|e| e.to_string()),
            ValueCode::Function(n) => Ok(LiveValue::Function(n.clone())),
            ValueCode::Forward(s) => Err(format!("unresolved forward reference {}", s.0)),
        }
    }
}

// -------------------------------- Module --------------------------------- //

/// Result of one call into a module.
#[derive(Debug)]
pub struct Run {
    /// `Ok` with the returned value, or `Err` with an uncaught thrown value.
    pub outcome: Result<Value, Value>,
    /// Error records appended while running.
    pub errors: Vec<Value>,
}

#[derive(Debug)]
pub struct Module {
    functions: IndexMap<Name, Rc<Function>>,
    values: HashMap<Name, LiveValue>,
    max_depth: usize,
}

impl Module {
    pub fn new(functions: IndexMap<Name, Rc<Function>>, values: Vec<(Name, LiveValue)>, max_depth: usize) -> Self {
        Module { functions, values: values.into_iter().collect(), max_depth }
    }

    pub fn functions(&self) -> impl Iterator<Item = &Function> {
        self.functions.values().map(|f| f.as_ref())
    }

    pub fn value_names(&self) -> impl Iterator<Item = &Name> {
        self.values.keys()
    }

    pub fn run(&self, entry: &Name, args: Vec<Value>) -> Result<Run, RuntimeError> {
        interp::Machine::new(self).run(entry, args)
    }
}
