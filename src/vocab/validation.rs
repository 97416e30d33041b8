//! Validation keywords: assertions on a single instance value.
use std::collections::HashSet;

use serde_json::Value;

use crate::codegen::{BinOp, Expr, JsonType};
use crate::compile::{KeywordCxt, StrictMode};
use crate::error::{CompileError, Result};
use crate::runtime::Helper;

use super::KeywordDefinition;

/// Enums longer than this are checked with a loop instead of unrolled.
const UNROLL_LIMIT: usize = 8;

pub fn definitions() -> Vec<KeywordDefinition> {
    vec![
        KeywordDefinition::code("enum", enum_keyword)
            .schema_types([JsonType::Array])
            .allow_data()
            .error("must be equal to one of the allowed values"),
        KeywordDefinition::code("const", const_keyword).allow_data().error("must be equal to constant"),
        limit("maximum", BinOp::Gt, "<="),
        limit("minimum", BinOp::Lt, ">="),
        limit("exclusiveMaximum", BinOp::Ge, "<"),
        limit("exclusiveMinimum", BinOp::Le, ">"),
        KeywordDefinition::code("multipleOf", |cxt| {
            let divisor = cxt.schema_code();
            cxt.set_param("multipleOf", divisor.clone());
            let quotient = Expr::bin(BinOp::Div, cxt.data(), divisor);
            cxt.fail(quotient.type_is(JsonType::Integer).not());
            Ok(())
        })
        .types([JsonType::Number])
        .schema_types([JsonType::Number])
        .allow_data()
        .error("must be multiple of {multipleOf}")
        .check(|v, _| match v.as_f64() {
            Some(f) if f > 0.0 => Ok(()),
            _ => Err("multipleOf must be greater than 0".into()),
        }),
        length("maxLength", BinOp::Gt, "more", "characters"),
        length("minLength", BinOp::Lt, "fewer", "characters"),
        KeywordDefinition::code("pattern", |cxt| {
            let source = cxt.schema().as_str().unwrap_or_default();
            let re = cxt.regex(source)?;
            cxt.set_param("pattern", Expr::str(source));
            let data = cxt.data();
            cxt.pass(Expr::call(&re, vec![data]));
            Ok(())
        })
        .types([JsonType::String])
        .schema_types([JsonType::String])
        .error("must match pattern \"{pattern}\"")
        .check(|v, _| {
            let source = v.as_str().unwrap_or_default();
            regex::Regex::new(source).map(|_| ()).map_err(|e| format!("invalid pattern {source:?}: {e}"))
        }),
        KeywordDefinition::code("format", format_keyword)
            .schema_types([JsonType::String])
            .error("must match format \"{format}\""),
        length("maxItems", BinOp::Gt, "more", "items"),
        length("minItems", BinOp::Lt, "fewer", "items"),
        KeywordDefinition::code("uniqueItems", unique_items)
            .types([JsonType::Array])
            .schema_types([JsonType::Boolean])
            .error("must NOT have duplicate items (items ## {j} and {i} are identical)"),
        length("maxProperties", BinOp::Gt, "more", "properties"),
        length("minProperties", BinOp::Lt, "fewer", "properties"),
        KeywordDefinition::code("required", required)
            .types([JsonType::Object])
            .schema_types([JsonType::Array])
            .allow_data()
            .error("must have required property '{missingProperty}'")
            .check(|v, _| string_set(v, "required")),
        KeywordDefinition::code("dependentRequired", dependent_required)
            .types([JsonType::Object])
            .schema_types([JsonType::Object])
            .error("must have property {missingProperty} when property {property} is present")
            .check(|v, _| match v {
                Value::Object(m) => m.values().try_for_each(|deps| string_set(deps, "dependentRequired")),
                _ => Ok(()),
            }),
    ]
}

fn string_set(v: &Value, keyword: &str) -> std::result::Result<(), String> {
    let mut seen = HashSet::new();
    for item in v.as_array().into_iter().flatten() {
        let Some(s) = item.as_str() else { return Err(format!("{keyword} items must be strings")) };
        if !seen.insert(s) {
            return Err(format!("{keyword} lists {s:?} twice"));
        }
    }
    Ok(())
}

// ---------------------------- Numbers and sizes -------------------------- //

/// `fails` is the comparison of `data` to the limit that is an error.
fn limit(keyword: &'static str, fails: BinOp, comparison: &'static str) -> KeywordDefinition {
    KeywordDefinition::code(keyword, move |cxt| {
        let limit = cxt.schema_code();
        cxt.set_param("comparison", Expr::str(comparison));
        cxt.set_param("limit", limit.clone());
        let data = cxt.data();
        cxt.fail(Expr::bin(fails, data, limit));
        Ok(())
    })
    .types([JsonType::Number])
    .schema_types([JsonType::Number])
    .allow_data()
    .error("must be {comparison} {limit}")
}

fn length(keyword: &'static str, fails: BinOp, side: &str, unit: &'static str) -> KeywordDefinition {
    let instance = match unit {
        "characters" => JsonType::String,
        "items" => JsonType::Array,
        _ => JsonType::Object,
    };
    KeywordDefinition::code(keyword, move |cxt| {
        let limit = cxt.schema_code();
        cxt.set_param("limit", limit.clone());
        let len = match instance {
            JsonType::String => {
                let ucs2 = cxt.helper(Helper::Ucs2Length);
                Expr::call(&ucs2, vec![cxt.data()])
            }
            _ => cxt.data().len(),
        };
        cxt.fail(Expr::bin(fails, len, limit));
        Ok(())
    })
    .types([instance])
    .schema_types([JsonType::Integer])
    .allow_data()
    .error(format!("must NOT have {side} than {{limit}} {unit}"))
    .check(|v, _| match v.as_f64() {
        Some(n) if n >= 0.0 => Ok(()),
        _ => Err("must be a non-negative integer".into()),
    })
}

// ------------------------------ Equality --------------------------------- //

fn is_primitive(v: &Value) -> bool {
    !matches!(v, Value::Array(_) | Value::Object(_))
}

fn enum_keyword(cxt: &mut KeywordCxt<'_, '_>) -> Result<()> {
    let equal = cxt.helper(Helper::Equal);
    let values = cxt.schema_code();
    cxt.set_param("allowedValues", values.clone());
    let data = cxt.data();
    match cxt.schema() {
        Value::Array(items) if !cxt.is_data() && items.len() <= UNROLL_LIMIT => {
            let mut alternatives = Vec::with_capacity(items.len());
            for item in items {
                alternatives.push(if is_primitive(item) {
                    Expr::eq(data.clone(), Expr::Lit(item.clone()))
                } else {
                    let item = cxt.schema_value(item);
                    Expr::call(&equal, vec![data.clone(), item])
                });
            }
            cxt.pass(Expr::or_all(alternatives));
        }
        _ => {
            let found = cxt.cg.let_("valid", Expr::bool(false));
            let item = cxt.cg.for_each("item", values);
            cxt.cg.if_(Expr::call(&equal, vec![data, Expr::var(&item)]));
            cxt.cg.assign(&found, true);
            cxt.cg.break_();
            cxt.cg.end_if();
            cxt.cg.end_for();
            cxt.pass(Expr::var(&found));
        }
    }
    Ok(())
}

fn const_keyword(cxt: &mut KeywordCxt<'_, '_>) -> Result<()> {
    let value = cxt.schema_code();
    cxt.set_param("allowedValue", value.clone());
    let data = cxt.data();
    if !cxt.is_data() && is_primitive(cxt.schema()) {
        cxt.fail(Expr::ne(data, value));
    } else {
        let equal = cxt.helper(Helper::Equal);
        cxt.pass(Expr::call(&equal, vec![data, value]));
    }
    Ok(())
}

fn unique_items(cxt: &mut KeywordCxt<'_, '_>) -> Result<()> {
    if cxt.is_data() || cxt.schema() != &Value::Bool(true) {
        return Ok(());
    }
    let equal = cxt.helper(Helper::Equal);
    let data = cxt.data();
    let cg = &mut *cxt.cg;
    let earlier = cg.let_("dupJ", Expr::null());
    let later = cg.let_("dupI", Expr::null());
    let i = cg.for_range("i", 0usize, data.clone().len());
    let j = cg.for_range("j", Expr::add(&i, 1usize), data.clone().len());
    cg.if_(Expr::call(&equal, vec![data.clone().index(&i), data.clone().index(&j)]));
    cg.assign(&earlier, &i);
    cg.assign(&later, &j);
    cg.break_();
    cg.end_if();
    cg.end_for();
    cg.if_(Expr::ne(&earlier, Expr::null()));
    cg.break_();
    cg.end_if();
    cg.end_for();
    cxt.set_param("i", &earlier);
    cxt.set_param("j", &later);
    cxt.fail(Expr::ne(&earlier, Expr::null()));
    Ok(())
}

// ---------------------------- Object members ----------------------------- //

fn required(cxt: &mut KeywordCxt<'_, '_>) -> Result<()> {
    let data = cxt.data();
    if cxt.is_data() {
        let props = cxt.schema_code();
        let prop = cxt.cg.for_each("prop", props);
        cxt.set_param("missingProperty", &prop);
        cxt.fail(data.has(&prop).not());
        cxt.cg.end_for();
        return Ok(());
    }
    let props: Vec<&str> = cxt.schema().as_array().into_iter().flatten().filter_map(Value::as_str).collect();
    if cxt.it.all_errors {
        for p in props {
            cxt.set_param("missingProperty", Expr::str(p));
            cxt.fail(data.clone().has(p).not());
        }
        return Ok(());
    }
    // Fail fast reports only the first missing property.
    for (i, p) in props.iter().enumerate() {
        let missing = data.clone().has(*p).not();
        if i == 0 {
            cxt.cg.if_(missing);
        } else {
            cxt.cg.else_if(missing);
        }
        cxt.set_param("missingProperty", Expr::str(*p));
        cxt.error();
    }
    if !props.is_empty() {
        cxt.cg.end_if();
    }
    Ok(())
}

fn dependent_required(cxt: &mut KeywordCxt<'_, '_>) -> Result<()> {
    let Value::Object(deps) = cxt.schema() else { return Ok(()) };
    let data = cxt.data();
    for (prop, required) in deps {
        let required: Vec<&str> = required.as_array().into_iter().flatten().filter_map(Value::as_str).collect();
        if required.is_empty() {
            continue;
        }
        cxt.cg.if_(data.clone().has(prop.as_str()));
        cxt.set_param("property", Expr::str(prop.as_str()));
        for dep in required {
            cxt.set_param("missingProperty", Expr::str(dep));
            cxt.fail(data.clone().has(dep).not());
        }
        cxt.cg.end_if();
    }
    Ok(())
}

// -------------------------------- Formats -------------------------------- //

fn format_keyword(cxt: &mut KeywordCxt<'_, '_>) -> Result<()> {
    if !cxt.options().validate_formats {
        return Ok(());
    }
    let name = cxt.schema().as_str().unwrap_or_default();
    let Some(def) = cxt.format(name) else {
        let path = cxt.it.schema_path.clone();
        return match cxt.options().strict {
            StrictMode::Error => Err(CompileError::UnknownFormat { format: name.to_string(), path }),
            StrictMode::Log => {
                tracing::warn!(format = name, path = %path, "unknown format ignored");
                Ok(())
            }
            StrictMode::Off => Ok(()),
        };
    };
    if def.is_async && !cxt.it.is_async {
        return Err(CompileError::invalid(cxt.it.schema_path.clone(), format!("async format {name:?} in sync schema")));
    }
    let check = cxt.scope_value("format", def.descriptor(name));
    cxt.set_param("format", Expr::str(name));
    let data = cxt.data();
    let mut call = Expr::call(&check, vec![data.clone()]);
    if def.is_async {
        call = call.await_();
    }
    let applies = Expr::or_all(def.types.iter().map(|t| data.clone().type_is(*t)));
    cxt.fail(applies.and(call.not()));
    Ok(())
}
