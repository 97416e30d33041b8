//! Per-node dispatch: the `type` check first, then every keyword group in
//! order, each group behind its type guard and the error-count cascade.
use std::rc::Rc;

use serde_json::{Map, Value};

use crate::codegen::{CodeBuilder, Expr, JsonType, ValueCode, ValueDescriptor};
use crate::error::{CompileError, Result};
use crate::runtime::LiveValue;
use crate::runtime::helpers::escape_pointer;
use crate::vocab::{Group, KeywordDefinition, KeywordKind};

use super::Session;
use super::check::{self, is_data_ref};
use super::context::{KeywordCxt, SchemaCxt, SubschemaSpec, report};

pub(crate) fn compile_node(s: &mut Session<'_>, cg: &mut CodeBuilder, it: &SchemaCxt<'_>) -> Result<()> {
    let map = match it.schema {
        Value::Bool(true) => return Ok(()),
        Value::Bool(false) => {
            report(cg, it, "false schema", it.schema_path.clone(), Vec::new(), Expr::str("boolean schema is false"));
            return Ok(());
        }
        Value::Object(map) => map,
        _ => return Err(CompileError::invalid(it.schema_path.clone(), "schema must be an object or a boolean")),
    };
    tracing::trace!(path = %it.schema_path, "compiling schema node");

    let types = node_types(map);
    let mut first = true;
    if let (Some(def), Some(value)) = (s.vocab.get("type").cloned(), map.get("type")) {
        keyword(s, cg, it, &def, value, None)?;
        first = false;
    }
    for group in Group::ORDER {
        let defs = group_keywords(s, map, group);
        if defs.is_empty() {
            continue;
        }
        let typed = group.guard_type().is_some();
        if typed && !types.is_empty() && !types.iter().any(|t| Group::of(*t) == group) {
            continue;
        }
        let pinned = !it.all_errors && !types.is_empty() && types.iter().all(|t| Group::of(*t) == group);
        cg.block();
        if !first && !it.all_errors {
            cg.if_(Expr::eq(Expr::ErrorCount, &it.errs));
        }
        if let Some(t) = group.guard_type().filter(|_| !pinned) {
            cg.if_(Expr::var(&it.data).type_is(t));
        }
        for (i, (def, value)) in defs.iter().enumerate() {
            if i > 0 && !it.all_errors {
                cg.if_(Expr::eq(Expr::ErrorCount, &it.errs));
            }
            keyword(s, cg, it, def, value, group.guard_type())?;
        }
        cg.end_block(None);
        first = false;
    }
    Ok(())
}

fn node_types(map: &Map<String, Value>) -> Vec<JsonType> {
    match map.get("type") {
        Some(Value::String(t)) => t.parse::<JsonType>().into_iter().collect(),
        Some(Value::Array(ts)) => ts.iter().filter_map(Value::as_str).filter_map(|t| t.parse::<JsonType>().ok()).collect(),
        _ => Vec::new(),
    }
}

/// Present keywords of one group, in registration order.
fn group_keywords<'m>(
    s: &Session<'_>,
    map: &'m Map<String, Value>,
    group: Group,
) -> Vec<(Rc<KeywordDefinition>, &'m Value)> {
    let implemented = |kw: &str| {
        map.keys().any(|k| k != kw && s.vocab.get(k).is_some_and(|d| d.implements.iter().any(|i| i == kw)))
    };
    s.vocab
        .iter()
        .filter(|d| d.keyword != "type" && !matches!(d.kind, KeywordKind::Annotation))
        .filter(|d| d.groups().contains(&group) && !implemented(&d.keyword))
        .filter_map(|d| map.get(&d.keyword).map(|v| (d.clone(), v)))
        .collect()
}

fn keyword(
    s: &mut Session<'_>,
    cg: &mut CodeBuilder,
    it: &SchemaCxt<'_>,
    def: &KeywordDefinition,
    value: &Value,
    group_guard: Option<JsonType>,
) -> Result<()> {
    tracing::trace!(keyword = %def.keyword, path = %it.schema_path, "keyword");
    cg.block();
    let covered = group_guard.is_some_and(|g| def.types.contains(&g));
    if !def.types.is_empty() && !covered {
        cg.if_(Expr::or_all(def.types.iter().map(|t| Expr::var(&it.data).type_is(*t))));
    }
    match &def.kind {
        KeywordKind::Annotation => {}
        KeywordKind::Macro(expand) => {
            let expanded = expand(value, it.schema);
            let path = format!("{}/{}", it.schema_path, escape_pointer(&def.keyword));
            check::check_schema(s.opts, s.vocab, &expanded, &path)?;
            let mut cxt = KeywordCxt::new(s, cg, it, def, value, None);
            cxt.subschema(SubschemaSpec::new(&expanded, [def.keyword.as_str()]))?;
        }
        _ if s.opts.data && def.data && is_data_ref(value) => {
            let pointer = value.get("$data").and_then(Value::as_str).unwrap_or_default();
            let code = cg.const_("dataSchema", data_pointer(it, pointer)?);
            cg.if_(Expr::ne(&code, Expr::null()));
            let type_ok = Expr::or_all(def.schema_types.iter().map(|t| Expr::var(&code).type_is(*t)));
            if !def.schema_types.is_empty() {
                cg.if_(type_ok.not());
                let path = format!("{}/{}", it.schema_path, escape_pointer(&def.keyword));
                let message = Expr::str(format!("\"{}\" keyword is invalid ($data)", def.keyword));
                report(cg, it, &def.keyword, path, Vec::new(), message);
                cg.else_();
            }
            run(&mut KeywordCxt::new(s, cg, it, def, value, Some(Expr::var(&code))))?;
        }
        _ => run(&mut KeywordCxt::new(s, cg, it, def, value, None))?,
    }
    cg.end_block(None);
    Ok(())
}

fn run(cxt: &mut KeywordCxt<'_, '_>) -> Result<()> {
    let def = cxt.def;
    match &def.kind {
        KeywordKind::Code(f) => f(cxt),
        KeywordKind::Validate { func, import } => {
            let desc = ValueDescriptor {
                key: Some(format!("keyword:{}", def.keyword)),
                live: Some(LiveValue::Keyword(func.clone())),
                code: import.clone().map(ValueCode::Import),
            };
            let f = cxt.scope_value("keyword", desc);
            let args = vec![cxt.schema_code(), cxt.data()];
            cxt.pass(Expr::call(&f, args));
            Ok(())
        }
        KeywordKind::Macro(_) | KeywordKind::Annotation => Ok(()),
    }
}

/// Expression reading a `$data` pointer: `/a/b` from the root data, `N/a/b`
/// from N levels above the current data.
fn data_pointer(it: &SchemaCxt<'_>, pointer: &str) -> Result<Expr> {
    let bad = || CompileError::invalid(it.schema_path.clone(), format!("invalid $data pointer {pointer:?}"));
    let (mut expr, rest) = if pointer.is_empty() || pointer.starts_with('/') {
        (Expr::var(&it.root_data), pointer)
    } else {
        let digits = pointer.find(|c: char| !c.is_ascii_digit()).unwrap_or(pointer.len());
        let up: usize = pointer[..digits].parse().map_err(|_| bad())?;
        let rest = &pointer[digits..];
        if up > it.data_level || !(rest.is_empty() || rest.starts_with('/')) {
            return Err(bad());
        }
        (Expr::var(&it.data_names[it.data_level - up]), rest)
    };
    for token in rest.split('/').skip(1) {
        let token = token.replace("~1", "/").replace("~0", "~");
        expr = match token.parse::<u64>() {
            Ok(n) => expr.index(Expr::lit(n)),
            Err(_) => expr.index(Expr::str(token)),
        };
    }
    Ok(expr)
}
