//! Compiled validators, in-process and standalone.
use std::fmt;
use std::future::{Ready, ready};
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::codegen::{Finalized, Function, Name, ValueCode};
use crate::error::RuntimeError;
use crate::path_de;
use crate::runtime::{Imports, Module};

// ------------------------------- Results --------------------------------- //

/// One error record as produced by compiled code.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationError {
    /// JSON pointer to the failing part of the instance, `""` for the root.
    pub instance_path: String,
    /// `#`-rooted pointer to the failing keyword.
    pub schema_path: String,
    pub keyword: String,
    #[serde(default)]
    pub params: Map<String, Value>,
    pub message: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "data{} {}", self.instance_path, self.message)
    }
}

#[derive(Clone, Debug, PartialEq, Error)]
#[error("{}", .0.iter().map(ToString::to_string).collect::<Vec<_>>().join(", "))]
pub struct ValidationErrors(pub Vec<ValidationError>);

#[derive(Clone, Debug, PartialEq)]
pub struct Validation {
    pub valid: bool,
    pub errors: Vec<ValidationError>,
}

impl Validation {
    pub fn into_result(self) -> Result<(), ValidationErrors> {
        if self.valid { Ok(()) } else { Err(ValidationErrors(self.errors)) }
    }
}

// ------------------------------ Validator -------------------------------- //

#[derive(Clone, Debug)]
pub struct Validator {
    module: Rc<Module>,
    entry: Name,
    is_async: bool,
}

impl Validator {
    pub(crate) fn new(module: Rc<Module>, entry: Name, is_async: bool) -> Self {
        Validator { module, entry, is_async }
    }

    pub fn is_async(&self) -> bool {
        self.is_async
    }

    pub fn validate(&self, data: &Value) -> Result<Validation, RuntimeError> {
        let args = vec![data.clone(), Value::from(""), data.clone()];
        let run = self.module.run(&self.entry, args)?;
        let valid = match run.outcome {
            Ok(_) if self.is_async => true,
            Ok(v) => v == Value::Bool(true),
            Err(thrown) if thrown.get("validation") == Some(&Value::Bool(true)) => false,
            Err(thrown) => return Err(RuntimeError::Uncaught(thrown)),
        };
        let errors = run
            .errors
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<ValidationError>, _>>()
            .map_err(|e| RuntimeError::Malformed(format!("error record: {e}")))?;
        Ok(Validation { valid, errors })
    }

    /// Faults count as invalid.
    pub fn is_valid(&self, data: &Value) -> bool {
        self.validate(data).is_ok_and(|v| v.valid)
    }

    /// The runtime evaluates `await` eagerly, so the future is ready at once.
    pub fn validate_async(&self, data: &Value) -> Ready<Result<Validation, RuntimeError>> {
        ready(self.validate(data))
    }

    /// Program text of every function in the module, entry first.
    pub fn source(&self) -> String {
        let mut functions: Vec<&Function> = self.module.functions().collect();
        functions.sort_by_key(|f| f.name != self.entry);
        functions.iter().map(ToString::to_string).collect::<Vec<_>>().join("\n")
    }

    pub fn value_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.module.value_names().map(ToString::to_string).collect();
        names.sort();
        names
    }
}

// --------------------------- StandaloneModule ---------------------------- //

/// A compiled validator with a literal-only value table. Serializes with
/// serde and loads without a compiler.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StandaloneModule {
    pub entry: Name,
    #[serde(default)]
    pub is_async: bool,
    pub max_depth: usize,
    pub functions: Vec<Function>,
    pub values: Vec<(Name, ValueCode)>,
}

impl StandaloneModule {
    pub(crate) fn new(entry: Name, is_async: bool, out: Finalized<ValueCode>, max_depth: usize) -> Self {
        let functions = out.functions.values().map(|f| f.as_ref().clone()).collect();
        StandaloneModule { entry, is_async, max_depth, functions, values: out.values }
    }

    pub fn from_json_str(src: &str) -> Result<Self, RuntimeError> {
        path_de::from_str_with_path(src).map_err(|e| RuntimeError::Malformed(e.to_string()))
    }

    pub fn to_json_string(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// The value table followed by the functions, as program text.
    pub fn source(&self) -> String {
        let mut out = String::new();
        for (name, code) in &self.values {
            out.push_str(&format!("const {name} = {code};\n"));
        }
        for f in &self.functions {
            out.push_str(&format!("{f}\n"));
        }
        out.push_str(&format!("export default {};\n", self.entry));
        out
    }

    pub fn load(&self) -> Result<Validator, RuntimeError> {
        self.load_with(&Imports::default())
    }

    /// Load, resolving user imports (formats, keywords) from `imports`.
    pub fn load_with(&self, imports: &Imports) -> Result<Validator, RuntimeError> {
        let functions = self.functions.iter().map(|f| (f.name.clone(), Rc::new(f.clone()))).collect();
        let module = Module::new(functions, self.materialize(imports)?, self.max_depth);
        if !module.functions().any(|f| f.name == self.entry) {
            return Err(RuntimeError::Malformed(format!("entry {} is not defined", self.entry)));
        }
        Ok(Validator::new(Rc::new(module), self.entry.clone(), self.is_async))
    }

    pub(crate) fn materialize(&self, imports: &Imports) -> Result<Vec<(Name, crate::runtime::LiveValue)>, RuntimeError> {
        self.values
            .iter()
            .map(|(name, code)| {
                imports
                    .materialize(code)
                    .map(|live| (name.clone(), live))
                    .map_err(|reason| RuntimeError::Malformed(format!("{name}: {reason}")))
            })
            .collect()
    }
}
