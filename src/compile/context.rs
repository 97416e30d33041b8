//! Per-node and per-keyword compilation contexts.
//!
//! `SchemaCxt` describes where a schema node sits: its schema path, the data
//! variable it validates, how to build its instance path at runtime and which
//! error mode applies. `KeywordCxt` is what a keyword implementation sees; it
//! is the only way keyword code touches the builder and the value scope.
use std::rc::Rc;

use regex::Regex;
use serde_json::Value;
use url::Url;

use crate::codegen::{CodeBuilder, Expr, Name, ValueCode, ValueDescriptor};
use crate::error::{CompileError, Result};
use crate::formats::FormatDefinition;
use crate::runtime::helpers::escape_pointer;
use crate::runtime::{Helper, LiveValue};
use crate::vocab::KeywordDefinition;

use super::{Options, Session, env, subschema};

// ------------------------------ SchemaCxt -------------------------------- //

#[derive(Clone, Debug)]
pub struct SchemaCxt<'s> {
    pub schema: &'s Value,
    /// `#`-rooted JSON pointer used in error records.
    pub schema_path: String,
    pub data: Name,
    /// How many data steps below the function's `data` parameter.
    pub data_level: usize,
    /// The data variable at each level, `data_names[0]` being the parameter.
    pub data_names: Vec<Name>,
    pub instance_path: Expr,
    pub root_data: Name,
    /// Error count when this node started.
    pub errs: Name,
    /// Inside `anyOf`/`oneOf`/`not`/`if`: errors never return early.
    pub composite: bool,
    pub all_errors: bool,
    pub is_async: bool,
    pub(crate) env: usize,
    pub base: Url,
}

impl SchemaCxt<'_> {
    /// Errors return immediately instead of accumulating.
    pub fn fails_fast(&self) -> bool {
        !self.all_errors && !self.composite
    }
}

/// How the data of a subschema is reached from the current data.
#[derive(Clone, Debug)]
pub enum DataStep {
    /// A property known at compile time.
    Prop(String),
    /// A property named by a runtime string.
    Dynamic(Expr),
    /// An array element at a runtime index.
    Index(Expr),
    /// Another value validated at the same instance location.
    Replace(Name),
}

#[derive(Clone, Debug)]
pub struct SubschemaSpec<'v> {
    pub schema: &'v Value,
    /// Pointer tokens relative to the current node's schema path.
    pub path: Vec<String>,
    pub data: Option<DataStep>,
    pub composite: bool,
    location: Option<(String, Url, usize)>,
}

impl<'v> SubschemaSpec<'v> {
    pub fn new<T: ToString>(schema: &'v Value, path: impl IntoIterator<Item = T>) -> Self {
        SubschemaSpec {
            schema,
            path: path.into_iter().map(|t| t.to_string()).collect(),
            data: None,
            composite: false,
            location: None,
        }
    }

    pub fn data(mut self, step: DataStep) -> Self {
        self.data = Some(step);
        self
    }

    pub fn composite(mut self) -> Self {
        self.composite = true;
        self
    }

    /// Compile in place a schema that lives elsewhere (an inlined `$ref`).
    pub(crate) fn located(mut self, schema_path: String, base: Url, env: usize) -> Self {
        self.location = Some((schema_path, base, env));
        self
    }
}

// ------------------------------- Reporting ------------------------------- //

pub(crate) fn fail_fast(cg: &mut CodeBuilder, is_async: bool) {
    if is_async {
        cg.throw(Expr::Object(vec![("validation".into(), Expr::bool(true))]));
    } else {
        cg.return_(false);
    }
}

/// Append one error record, then leave the function when failing fast.
pub(crate) fn report(
    cg: &mut CodeBuilder,
    it: &SchemaCxt<'_>,
    keyword: &str,
    schema_path: String,
    params: Vec<(String, Expr)>,
    message: Expr,
) {
    cg.add_error(Expr::Object(vec![
        ("instancePath".into(), it.instance_path.clone()),
        ("schemaPath".into(), Expr::str(schema_path)),
        ("keyword".into(), Expr::str(keyword)),
        ("params".into(), Expr::Object(params)),
        ("message".into(), message),
    ]));
    if it.fails_fast() {
        fail_fast(cg, it.is_async);
    }
}

// ------------------------------ KeywordCxt ------------------------------- //

pub struct KeywordCxt<'a, 'c> {
    pub(crate) s: &'a mut Session<'c>,
    pub cg: &'a mut CodeBuilder,
    pub it: &'a SchemaCxt<'a>,
    pub def: &'a KeywordDefinition,
    keyword: &'a str,
    schema: &'a Value,
    schema_code: Option<Expr>,
    is_data: bool,
    params: Vec<(String, Expr)>,
    message: Option<Expr>,
}

impl<'a, 'c> KeywordCxt<'a, 'c> {
    pub(crate) fn new(
        s: &'a mut Session<'c>,
        cg: &'a mut CodeBuilder,
        it: &'a SchemaCxt<'a>,
        def: &'a KeywordDefinition,
        schema: &'a Value,
        schema_code: Option<Expr>,
    ) -> Self {
        let is_data = schema_code.is_some();
        KeywordCxt { s, cg, it, def, keyword: &def.keyword, schema, schema_code, is_data, params: Vec::new(), message: None }
    }

    pub fn keyword(&self) -> &'a str {
        self.keyword
    }

    /// The keyword's value as written (the `{"$data": ..}` object under `$data`).
    pub fn schema(&self) -> &'a Value {
        self.schema
    }

    pub fn parent_schema(&self) -> &'a Value {
        self.it.schema
    }

    /// Runtime expression for the keyword's value.
    pub fn schema_code(&mut self) -> Expr {
        if let Some(code) = &self.schema_code {
            return code.clone();
        }
        let schema = self.schema;
        let code = self.schema_value(schema);
        self.schema_code = Some(code.clone());
        code
    }

    pub fn is_data(&self) -> bool {
        self.is_data
    }

    pub fn data(&self) -> Expr {
        Expr::var(&self.it.data)
    }

    pub fn options(&self) -> &Options {
        self.s.opts
    }

    pub fn format(&self, name: &str) -> Option<FormatDefinition> {
        self.s.formats.get(name).cloned()
    }

    // ------------------------------ Values ------------------------------- //

    pub fn scope_value(&mut self, prefix: &str, desc: ValueDescriptor) -> Name {
        self.s.st.scope.value(prefix, desc)
    }

    /// A literal for primitives, an injected value for containers.
    pub fn schema_value(&mut self, v: &Value) -> Expr {
        match v {
            Value::Array(_) | Value::Object(_) => Expr::var(&self.scope_value("schema", ValueDescriptor::json(v.clone()))),
            _ => Expr::Lit(v.clone()),
        }
    }

    pub fn helper(&mut self, h: Helper) -> Name {
        self.scope_value("func", h.descriptor())
    }

    pub fn regex(&mut self, source: &str) -> Result<Name> {
        let re = Regex::new(source)
            .map_err(|e| CompileError::InvalidRegex { pattern: source.to_string(), reason: e.to_string() })?;
        let desc = ValueDescriptor {
            key: Some(format!("pattern:{source}")),
            live: Some(LiveValue::Regex(Rc::new(re))),
            code: Some(ValueCode::Regex(source.to_string())),
        };
        Ok(self.scope_value("pattern", desc))
    }

    /// The schema a reference points at, if it resolves.
    pub(crate) fn resolve_schema(&self, reference: &str) -> Option<Value> {
        let loc = self.s.st.resources.resolve(reference, &self.it.base).ok()?;
        loc.schema().cloned()
    }

    pub(crate) fn apply_ref(&mut self, reference: &str, dynamic: bool) -> Result<()> {
        env::emit_ref(self, reference, dynamic)
    }

    // ------------------------------ Errors ------------------------------- //

    pub fn set_param(&mut self, key: &str, value: impl Into<Expr>) {
        let value = value.into();
        match self.params.iter_mut().find(|(k, _)| k == key) {
            Some((_, v)) => *v = value,
            None => self.params.push((key.to_string(), value)),
        }
    }

    /// Replace the template message for the next reported error.
    pub fn set_message(&mut self, message: impl Into<Expr>) {
        self.message = Some(message.into());
    }

    pub fn error(&mut self) {
        let message = match (self.message.take(), self.def.template()) {
            (Some(m), _) => m,
            (None, Some(t)) => t.render(&self.params),
            (None, None) => Expr::str(format!("must pass \"{}\" keyword validation", self.keyword)),
        };
        let path = format!("{}/{}", self.it.schema_path, escape_pointer(self.keyword));
        report(self.cg, self.it, self.keyword, path, self.params.clone(), message);
    }

    /// Report an error when `cond` holds at runtime.
    pub fn fail(&mut self, cond: Expr) {
        if cond.is_false() {
            return;
        }
        if cond.is_true() {
            self.error();
            return;
        }
        self.cg.if_(cond);
        self.error();
        self.cg.end_if();
    }

    /// Report an error unless `cond` holds at runtime.
    pub fn pass(&mut self, cond: Expr) {
        self.fail(cond.not());
    }

    /// Leave the function when a subresult failed and errors do not accumulate.
    pub fn merge_valid(&mut self, valid: impl Into<Expr>) {
        if self.it.fails_fast() {
            self.cg.if_(valid.into().not());
            fail_fast(self.cg, self.it.is_async);
            self.cg.end_if();
        }
    }

    pub fn errs_count(&mut self) -> Name {
        self.cg.const_("errs", Expr::ErrorCount)
    }

    pub fn reset_errors(&mut self, errs: &Name) {
        self.cg.reset_errors(errs);
    }

    // ---------------------------- Subschemas ----------------------------- //

    /// Compile a nested schema in place; returns a boolean telling whether it
    /// added no errors.
    pub fn subschema(&mut self, spec: SubschemaSpec<'_>) -> Result<Name> {
        let errs = self.errs_count();
        let it = self.child(spec, errs.clone());
        subschema::compile_node(self.s, self.cg, &it)?;
        Ok(self.cg.const_("valid", Expr::eq(Expr::ErrorCount, &errs)))
    }

    fn child<'v>(&mut self, spec: SubschemaSpec<'v>, errs: Name) -> SchemaCxt<'v> {
        let parent = self.it;
        let mut it = SchemaCxt {
            schema: spec.schema,
            schema_path: parent.schema_path.clone(),
            data: parent.data.clone(),
            data_level: parent.data_level,
            data_names: parent.data_names.clone(),
            instance_path: parent.instance_path.clone(),
            root_data: parent.root_data.clone(),
            errs,
            composite: parent.composite || spec.composite,
            all_errors: parent.all_errors,
            is_async: parent.is_async,
            env: parent.env,
            base: parent.base.clone(),
        };
        for token in &spec.path {
            it.schema_path.push('/');
            it.schema_path.push_str(&escape_pointer(token));
        }
        match spec.location {
            Some((path, base, env)) => {
                it.schema_path = path;
                it.base = base;
                it.env = env;
            }
            None => {
                let id = spec.schema.get("$id").and_then(Value::as_str).filter(|id| !id.starts_with('#'));
                if let Some(next) = id.and_then(|id| it.base.join(id).ok()) {
                    it.base = next;
                }
            }
        }
        let step = |cg: &mut CodeBuilder, it: &mut SchemaCxt<'v>, key: Expr, segment: Expr| {
            let data = cg.const_("data", Expr::var(&it.data).index(key));
            it.instance_path = Expr::add(it.instance_path.clone(), segment);
            it.data_level += 1;
            it.data_names.push(data.clone());
            it.data = data;
        };
        match spec.data {
            None => {}
            Some(DataStep::Prop(p)) => {
                let segment = Expr::str(format!("/{}", escape_pointer(&p)));
                step(self.cg, &mut it, Expr::str(p), segment);
            }
            Some(DataStep::Dynamic(key)) => {
                let escape = self.helper(Helper::EscapePointer);
                let segment = Expr::add("/", Expr::call(&escape, vec![key.clone()]));
                step(self.cg, &mut it, key, segment);
            }
            Some(DataStep::Index(i)) => {
                let segment = match &i {
                    Expr::Lit(n) => Expr::str(format!("/{n}")),
                    _ => Expr::add("/", i.clone()),
                };
                step(self.cg, &mut it, i, segment);
            }
            Some(DataStep::Replace(name)) => it.data = name,
        }
        it
    }
}
