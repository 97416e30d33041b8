//! Schema environments: one compiled function per canonical schema location.
//!
//! An env is compiled at most once. While it compiles, calls to it go through
//! a forward `wrapper` value whose slot is filled when the function is done.
use serde_json::Value;

use crate::codegen::{CodeBuilder, Expr, Name, ValueCode, ValueDescriptor};
use crate::error::{CompileError, MissingRefError, Result};
use crate::runtime::LiveValue;

use super::context::{KeywordCxt, SchemaCxt, SubschemaSpec, fail_fast};
use super::resolve::{Location, NON_SCHEMA};
use super::{MissingRefs, Session, State, subschema};

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum EnvState {
    Pending,
    Compiling { wrapper: Name, function: Name },
    Done { function: Name },
}

#[derive(Debug)]
pub(crate) struct SchemaEnv {
    pub loc: Location,
    pub is_async: bool,
    pub state: EnvState,
}

impl State {
    pub(crate) fn env_for(&mut self, loc: Location) -> usize {
        let key = loc.key();
        if let Some(&i) = self.env_index.get(&key) {
            return i;
        }
        let is_async = loc.schema().and_then(|s| s.get("$async")).and_then(Value::as_bool).unwrap_or(false);
        self.envs.push(SchemaEnv { loc, is_async, state: EnvState::Pending });
        self.env_index.insert(key, self.envs.len() - 1);
        self.envs.len() - 1
    }
}

/// Compile `env` into its own function and return the function's name.
/// `level0` tells whether the reference leading here consumed no data.
pub(crate) fn compile_env(s: &mut Session<'_>, env: usize, level0: bool) -> Result<Name> {
    match &s.st.envs[env].state {
        EnvState::Done { function } | EnvState::Compiling { function, .. } => return Ok(function.clone()),
        EnvState::Pending => {}
    }
    let loc = s.st.envs[env].loc.clone();
    let is_async = s.st.envs[env].is_async;
    let key = loc.key();
    tracing::debug!(env = %key, "compiling schema env");

    let function = s.st.scope.name("validate");
    let (slot, wrapper) = s.st.scope.reserve_slot(format!("env:{key}"));
    s.st.envs[env].state = EnvState::Compiling { wrapper, function: function.clone() };
    s.st.chain.push((env, level0));

    let root = loc.root.clone();
    let schema = root
        .pointer(&loc.pointer)
        .ok_or_else(|| CompileError::invalid(key.clone(), "reference target does not exist"))?;
    let data = Name::new("data")?;
    let mut cg = CodeBuilder::new();
    cg.func(function.clone(), vec![data.clone(), Name::new("instancePath")?, Name::new("rootData")?], is_async);
    let errs = cg.const_("errs", Expr::ErrorCount);
    let it = SchemaCxt {
        schema,
        schema_path: format!("#{}", loc.pointer),
        data: data.clone(),
        data_level: 0,
        data_names: vec![data.clone()],
        instance_path: Expr::var(&Name::new("instancePath")?),
        root_data: Name::new("rootData")?,
        errs: errs.clone(),
        composite: false,
        all_errors: s.opts.all_errors,
        is_async,
        env,
        base: loc.base.clone(),
    };
    subschema::compile_node(s, &mut cg, &it)?;
    if is_async {
        cg.if_(Expr::ne(Expr::ErrorCount, &errs));
        fail_fast(&mut cg, true);
        cg.end_if();
        cg.return_(&data);
    } else {
        cg.return_(Expr::eq(Expr::ErrorCount, &errs));
    }
    cg.end_func();
    for f in cg.finish() {
        s.st.functions.insert(f.name.clone(), f.into());
    }

    s.st.scope.fill_slot(slot, function.clone());
    s.st.envs[env].state = EnvState::Done { function: function.clone() };
    s.st.chain.pop();
    tracing::debug!(env = %key, %function, "schema env compiled");
    Ok(function)
}

/// Emit validation of the current data against the schema `reference` names.
pub(crate) fn emit_ref(cxt: &mut KeywordCxt<'_, '_>, reference: &str, dynamic: bool) -> Result<()> {
    let loc = match cxt.s.st.resources.resolve(reference, &cxt.it.base) {
        Ok(loc) if dynamic => dynamic_target(cxt.s.st, loc, reference),
        Ok(loc) => loc,
        Err(e) => return missing(cxt.s.opts.missing_refs, e),
    };
    let env = cxt.s.st.env_for(loc.clone());
    let target_async = cxt.s.st.envs[env].is_async;
    if target_async && !cxt.it.is_async {
        return Err(CompileError::AsyncRefInSync { path: format!("{}/{}", cxt.it.schema_path, cxt.keyword()) });
    }

    let compiling = matches!(cxt.s.st.envs[env].state, EnvState::Compiling { .. });
    let limit = cxt.s.opts.inline_refs.limit();
    let root = loc.root.clone();
    if let (Some(limit), Some(schema), false) = (limit, root.pointer(&loc.pointer), compiling) {
        if target_async == cxt.it.is_async && inlinable(schema, limit) {
            let spec = SubschemaSpec::new(schema, Vec::<String>::new()).located(
                format!("#{}", loc.pointer),
                loc.base.clone(),
                env,
            );
            cxt.subschema(spec)?;
            return Ok(());
        }
    }

    let callee = match cxt.s.st.envs[env].state.clone() {
        EnvState::Compiling { wrapper, .. } => {
            if no_progress(cxt.s.st, env, cxt.it.data_level) {
                tracing::debug!(reference, "reference cycle without data progress adds no constraint");
                return Ok(());
            }
            wrapper
        }
        EnvState::Pending => {
            let function = compile_env(cxt.s, env, cxt.it.data_level == 0)?;
            validate_value(cxt, &loc, function)
        }
        EnvState::Done { function } => validate_value(cxt, &loc, function),
    };

    let args = vec![cxt.data(), cxt.it.instance_path.clone(), Expr::var(&cxt.it.root_data)];
    if target_async {
        let errs = cxt.errs_count();
        cxt.cg.try_();
        cxt.cg.code(Expr::call(&callee, args).await_());
        let e = cxt.cg.catch("e");
        cxt.cg.if_(Expr::var(&e).index("validation").not());
        cxt.cg.throw(Expr::var(&e));
        cxt.cg.end_if();
        cxt.cg.end_try();
        cxt.merge_valid(Expr::eq(Expr::ErrorCount, &errs));
    } else {
        let valid = cxt.cg.const_("valid", Expr::call(&callee, args));
        cxt.merge_valid(&valid);
    }
    Ok(())
}

fn validate_value(cxt: &mut KeywordCxt<'_, '_>, loc: &Location, function: Name) -> Name {
    let desc = ValueDescriptor {
        key: Some(format!("env:{}", loc.key())),
        live: Some(LiveValue::Function(function.clone())),
        code: Some(ValueCode::Function(function)),
    };
    cxt.scope_value("validate", desc)
}

fn missing(policy: MissingRefs, e: MissingRefError) -> Result<()> {
    match policy {
        MissingRefs::Fail => Err(CompileError::UnresolvedRef(e)),
        MissingRefs::Warn => {
            tracing::warn!(reference = %e.reference, base = %e.base, "unresolved reference ignored");
            Ok(())
        }
        MissingRefs::Propagate => Err(CompileError::MissingRef(e)),
    }
}

/// The entry document's dynamic anchor wins over the statically resolved one.
fn dynamic_target(st: &State, loc: Location, reference: &str) -> Location {
    let Some(anchor) = reference.rsplit_once('#').map(|(_, a)| a).filter(|a| !a.is_empty() && !a.starts_with('/'))
    else {
        return loc;
    };
    let declares = loc.schema().and_then(|s| s.get("$dynamicAnchor")).and_then(Value::as_str) == Some(anchor);
    let outer = st.entry_doc.as_deref().and_then(|doc| st.resources.dynamic_anchor(doc, anchor));
    match outer {
        Some(outer) if declares => outer.clone(),
        _ => loc,
    }
}

/// A call back into `target` from here would re-validate the same data
/// forever: no reference on the way consumed any of it.
fn no_progress(st: &State, target: usize, data_level: usize) -> bool {
    if data_level != 0 {
        return false;
    }
    match st.chain.iter().position(|(env, _)| *env == target) {
        Some(i) => st.chain[i + 1..].iter().all(|(_, level0)| *level0),
        None => false,
    }
}

fn inlinable(schema: &Value, limit: usize) -> bool {
    fn has_ref(v: &Value) -> bool {
        match v {
            Value::Object(m) => m
                .iter()
                .any(|(k, v)| k == "$ref" || k == "$dynamicRef" || (!NON_SCHEMA.contains(&k.as_str()) && has_ref(v))),
            Value::Array(xs) => xs.iter().any(has_ref),
            _ => false,
        }
    }
    fn count(v: &Value) -> usize {
        match v {
            Value::Object(m) => {
                m.iter().map(|(k, v)| 1 + if NON_SCHEMA.contains(&k.as_str()) { 0 } else { count(v) }).sum()
            }
            Value::Array(xs) => xs.iter().map(count).sum(),
            _ => 0,
        }
    }
    match schema {
        Value::Bool(_) => true,
        Value::Object(_) => !has_ref(schema) && count(schema) <= limit,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn inlining_needs_small_reference_free_targets() {
        assert!(inlinable(&json!({"type": "string", "minLength": 1}), 8));
        assert!(!inlinable(&json!({"items": {"$ref": "#"}}), 8));
        assert!(inlinable(&json!({"enum": [{"$ref": "not a ref"}]}), 8));
        assert!(!inlinable(&json!({"properties": {"a": {}, "b": {}, "c": {}}}), 3));
    }
}
