//! The JSON Schema compiler.
//!
//! A `Compiler` owns everything one compilation context needs: the keyword
//! vocabulary, the format registry, the resource index, the schema
//! environments, the value scope and every function compiled so far. Nothing
//! is global, so two compilers never see each other's schemas.
mod check;
mod context;
mod env;
mod resolve;
mod subschema;

use std::collections::HashMap;
use std::rc::Rc;

use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value;
use url::Url;

use crate::codegen::{Checkpoint, Function, Name, ValueScope};
use crate::error::{CompileError, Result};
use crate::formats::{FormatDefinition, Formats};
use crate::path_de;
use crate::runtime::{DEFAULT_MAX_DEPTH, Module};
use crate::validator::{StandaloneModule, Validator};
use crate::vocab::{KeywordDefinition, Vocabulary};

pub use context::{DataStep, KeywordCxt, SchemaCxt, SubschemaSpec};

use env::{EnvState, SchemaEnv};
use resolve::Resources;

// ------------------------------- Options --------------------------------- //

/// What to do with keywords nobody registered.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrictMode {
    #[default]
    Error,
    Log,
    Off,
}

/// What to do with a `$ref` that resolves to nothing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingRefs {
    /// Abort with `CompileError::UnresolvedRef`.
    Fail,
    /// Log and treat the reference as always valid.
    Warn,
    /// Abort with `CompileError::MissingRef` so a loader can supply the document.
    #[default]
    Propagate,
}

/// `true`, `false`, or the largest target (in keywords) that may be inlined.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum InlineRefs {
    Enabled(bool),
    Limit(usize),
}

impl Default for InlineRefs {
    fn default() -> Self {
        InlineRefs::Enabled(true)
    }
}

impl InlineRefs {
    pub fn limit(self) -> Option<usize> {
        match self {
            InlineRefs::Enabled(true) => Some(8),
            InlineRefs::Enabled(false) => None,
            InlineRefs::Limit(n) => Some(n),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct Options {
    /// Collect every error instead of stopping at the first.
    pub all_errors: bool,
    pub strict: StrictMode,
    /// Accept `{"$data": pointer}` in place of keyword values.
    pub data: bool,
    pub inline_refs: InlineRefs,
    pub missing_refs: MissingRefs,
    pub discriminator: bool,
    pub validate_formats: bool,
    /// Runtime call depth limit of compiled validators.
    pub max_depth: usize,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            all_errors: false,
            strict: StrictMode::Error,
            data: false,
            inline_refs: InlineRefs::default(),
            missing_refs: MissingRefs::default(),
            discriminator: false,
            validate_formats: true,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl Options {
    pub fn from_json_str(src: &str) -> Result<Self> {
        path_de::from_str_with_path(src).map_err(|e| CompileError::invalid(format!("options{}", e.path), e.message))
    }

    pub fn all_errors(mut self) -> Self {
        self.all_errors = true;
        self
    }
}

// ------------------------------- Loading --------------------------------- //

/// Supplies schema documents by URI when a `$ref` points outside what the
/// compiler already knows.
pub trait SchemaLoader {
    fn load(&mut self, uri: &str) -> Option<Value>;
}

impl<F: FnMut(&str) -> Option<Value>> SchemaLoader for F {
    fn load(&mut self, uri: &str) -> Option<Value> {
        self(uri)
    }
}

impl SchemaLoader for HashMap<String, Value> {
    fn load(&mut self, uri: &str) -> Option<Value> {
        self.get(uri).cloned()
    }
}

// -------------------------------- State ---------------------------------- //

#[derive(Debug, Default)]
pub(crate) struct State {
    pub scope: ValueScope,
    pub functions: IndexMap<Name, Rc<Function>>,
    pub envs: Vec<SchemaEnv>,
    pub env_index: HashMap<String, usize>,
    pub resources: Resources,
    /// Environments being compiled, outermost first, each with whether it
    /// was entered without descending into instance data.
    pub chain: Vec<(usize, bool)>,
    /// Document the current top-level compilation started from.
    pub entry_doc: Option<String>,
    cache: HashMap<String, (Name, bool)>,
    anonymous: usize,
}

struct StateCheckpoint {
    scope: Checkpoint,
    functions: usize,
    envs: Vec<EnvState>,
    resources: usize,
}

impl State {
    fn checkpoint(&self) -> StateCheckpoint {
        StateCheckpoint {
            scope: self.scope.checkpoint(),
            functions: self.functions.len(),
            envs: self.envs.iter().map(|e| e.state.clone()).collect(),
            resources: self.resources.checkpoint(),
        }
    }

    fn rollback(&mut self, cp: StateCheckpoint) {
        self.scope.rollback(cp.scope);
        self.functions.truncate(cp.functions);
        self.envs.truncate(cp.envs.len());
        for (env, state) in self.envs.iter_mut().zip(cp.envs) {
            env.state = state;
        }
        let live = self.envs.len();
        self.env_index.retain(|_, i| *i < live);
        self.resources.rollback(cp.resources);
        self.chain.clear();
        self.entry_doc = None;
    }
}

/// Borrowed view of a compiler for the duration of one compilation.
pub(crate) struct Session<'c> {
    pub opts: &'c Options,
    pub vocab: &'c Vocabulary,
    pub formats: &'c Formats,
    pub st: &'c mut State,
}

// ------------------------------- Compiler -------------------------------- //

pub struct Compiler {
    opts: Options,
    vocab: Vocabulary,
    formats: Formats,
    state: State,
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new(Options::default())
    }
}

impl Compiler {
    pub fn new(opts: Options) -> Self {
        let vocab = Vocabulary::standard(opts.discriminator);
        Compiler { opts, vocab, formats: Formats::standard(), state: State::default() }
    }

    pub fn options(&self) -> &Options {
        &self.opts
    }

    pub fn add_keyword(&mut self, def: KeywordDefinition) -> Result<&mut Self> {
        self.vocab.add(def)?;
        Ok(self)
    }

    pub fn add_format(&mut self, name: impl Into<String>, def: FormatDefinition) -> &mut Self {
        self.formats.insert(name, def);
        self
    }

    fn session(&mut self) -> Session<'_> {
        Session { opts: &self.opts, vocab: &self.vocab, formats: &self.formats, st: &mut self.state }
    }

    /// Register a schema document so `$ref`s can reach it. Returns its URI.
    pub fn add_schema(&mut self, schema: Value, uri: Option<&str>) -> Result<String> {
        let cp = self.state.checkpoint();
        let result = self.register(schema, uri);
        if result.is_err() {
            self.state.rollback(cp);
        }
        result.map(|(doc, _)| doc)
    }

    fn register(&mut self, schema: Value, uri: Option<&str>) -> Result<(String, Rc<Value>)> {
        let id = uri.map(str::to_string).or_else(|| schema.get("$id").and_then(Value::as_str).map(str::to_string));
        let url = match id.as_deref().map(Url::parse) {
            Some(Ok(url)) => url,
            Some(Err(e)) => return Err(CompileError::invalid("#", format!("schema id is not an absolute URI: {e}"))),
            None => {
                self.state.anonymous += 1;
                Url::parse(&format!("json-schema:///anonymous{}.json", self.state.anonymous))
                    .map_err(|e| CompileError::invalid("#", e.to_string()))?
            }
        };
        check::check_schema(&self.opts, &self.vocab, &schema, "#")?;
        let root = Rc::new(schema);
        let doc = self.state.resources.add_document(root.clone(), &url)?;
        Ok((doc, root))
    }

    /// Compile a schema into an in-process validator.
    pub fn compile(&mut self, schema: &Value) -> Result<Validator> {
        let (entry, is_async) = self.compile_entry(schema)?;
        self.link(&entry, is_async)
    }

    /// Compile a previously added schema by URI (with optional fragment).
    pub fn get_schema(&mut self, uri: &str) -> Result<Validator> {
        let cp = self.state.checkpoint();
        let result = self.compile_uri(uri);
        match result {
            Ok((entry, is_async)) => self.link(&entry, is_async),
            Err(e) => {
                self.state.rollback(cp);
                Err(e)
            }
        }
    }

    /// Compile, asking `loader` for every document a `$ref` is missing.
    pub fn compile_loading(&mut self, schema: &Value, loader: &mut dyn SchemaLoader) -> Result<Validator> {
        loop {
            match self.compile(schema) {
                Err(CompileError::MissingRef(e)) => {
                    if self.state.resources.contains_document(&e.missing_schema) {
                        return Err(CompileError::UnresolvedRef(e));
                    }
                    tracing::debug!(uri = %e.missing_schema, "loading referenced schema");
                    let Some(doc) = loader.load(&e.missing_schema) else {
                        return Err(CompileError::MissingRef(e));
                    };
                    self.add_schema(doc, Some(&e.missing_schema))?;
                }
                other => return other,
            }
        }
    }

    /// Compile to a self-contained module with a literal-only value table.
    pub fn compile_standalone(&mut self, schema: &Value) -> Result<StandaloneModule> {
        let (entry, is_async) = self.compile_entry(schema)?;
        let out = self.state.scope.finalize_code(&entry, &self.state.functions)?;
        Ok(StandaloneModule::new(entry, is_async, out, self.opts.max_depth))
    }

    fn compile_entry(&mut self, schema: &Value) -> Result<(Name, bool)> {
        let cache_key = serde_json::to_string(schema).unwrap_or_default();
        if let Some(hit) = self.state.cache.get(&cache_key) {
            return Ok(hit.clone());
        }
        let cp = self.state.checkpoint();
        let result = self.register(schema.clone(), None).and_then(|(doc, _)| self.compile_uri(&doc));
        match result {
            Ok(hit) => {
                self.state.cache.insert(cache_key, hit.clone());
                Ok(hit)
            }
            Err(e) => {
                self.state.rollback(cp);
                Err(e)
            }
        }
    }

    fn compile_uri(&mut self, uri: &str) -> Result<(Name, bool)> {
        let base = Url::parse(uri).map_err(|e| CompileError::invalid(uri, e.to_string()))?;
        let loc = self.state.resources.resolve(uri, &base)?;
        self.state.entry_doc = Some(loc.doc.clone());
        let mut s = self.session();
        let env = s.st.env_for(loc);
        let is_async = s.st.envs[env].is_async;
        let entry = env::compile_env(&mut s, env, true)?;
        s.st.entry_doc = None;
        Ok((entry, is_async))
    }

    fn link(&self, entry: &Name, is_async: bool) -> Result<Validator> {
        let out = self.state.scope.finalize_live(entry, &self.state.functions)?;
        let module = Module::new(out.functions, out.values, self.opts.max_depth);
        Ok(Validator::new(Rc::new(module), entry.clone(), is_async))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_report_the_bad_path() {
        let err = Options::from_json_str(r#"{"allErrors": true, "strict": "loud"}"#).unwrap_err();
        assert!(err.to_string().contains("strict"), "{err}");
        let opts = Options::from_json_str(r#"{"inlineRefs": 3, "missingRefs": "warn"}"#).unwrap();
        assert_eq!(opts.inline_refs.limit(), Some(3));
        assert_eq!(opts.missing_refs, MissingRefs::Warn);
    }

    #[test]
    fn failed_compilation_leaves_no_state_behind() {
        let mut c = Compiler::default();
        let before = c.state.scope.len();
        let bad = serde_json::json!({"properties": {"a": {"pattern": "a"}}, "items": {"$ref": "#/nope"}});
        assert!(c.compile(&bad).is_err());
        assert_eq!(c.state.scope.len(), before);
        assert!(c.state.functions.is_empty());
        assert!(c.state.envs.is_empty());
    }
}
