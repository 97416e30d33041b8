//! Applicator keywords: everything that runs nested schemas against the
//! instance or parts of it.
use serde_json::Value;

use crate::codegen::{BinOp, Expr, JsonType, Name};
use crate::compile::{DataStep, KeywordCxt, SubschemaSpec};
use crate::error::Result;

use super::{KeywordDefinition, Subschemas};

const SCHEMA: [JsonType; 2] = [JsonType::Object, JsonType::Boolean];

/// Unrolled property lists longer than this become a lookup in the
/// injected `properties` object.
const UNROLL_LIMIT: usize = 8;

pub fn definitions() -> Vec<KeywordDefinition> {
    let single = |kw: &'static str, f: fn(&mut KeywordCxt<'_, '_>) -> Result<()>| {
        KeywordDefinition::code(kw, f).schema_types(SCHEMA).subschemas(Subschemas::Single)
    };
    let list = |kw: &'static str, f: fn(&mut KeywordCxt<'_, '_>) -> Result<()>| {
        KeywordDefinition::code(kw, f).schema_types([JsonType::Array]).subschemas(Subschemas::List)
    };
    vec![
        list("allOf", all_of),
        list("anyOf", any_of).error("must match a schema in anyOf"),
        list("oneOf", one_of).error("must match exactly one schema in oneOf"),
        single("not", not).error("must NOT be valid"),
        single("if", if_keyword).implements(["then", "else"]).error("must match \"{failingKeyword}\" schema"),
        KeywordDefinition::annotation("then").schema_types(SCHEMA).subschemas(Subschemas::Single),
        KeywordDefinition::annotation("else").schema_types(SCHEMA).subschemas(Subschemas::Single),
        list("prefixItems", prefix_items).types([JsonType::Array]),
        KeywordDefinition::code("items", items)
            .types([JsonType::Array])
            .schema_types([JsonType::Object, JsonType::Boolean, JsonType::Array])
            .subschemas(Subschemas::SingleOrList)
            .error("must NOT have more than {limit} items"),
        single("additionalItems", additional_items)
            .types([JsonType::Array])
            .error("must NOT have more than {limit} items"),
        single("contains", contains).types([JsonType::Array]).error("must contain at least {minContains} valid item(s)"),
        KeywordDefinition::annotation("minContains").schema_types([JsonType::Integer]),
        KeywordDefinition::annotation("maxContains").schema_types([JsonType::Integer]),
        KeywordDefinition::code("properties", properties)
            .types([JsonType::Object])
            .schema_types([JsonType::Object])
            .subschemas(Subschemas::Map),
        KeywordDefinition::code("patternProperties", pattern_properties)
            .types([JsonType::Object])
            .schema_types([JsonType::Object])
            .subschemas(Subschemas::Map)
            .check(|v, _| {
                for pattern in v.as_object().into_iter().flat_map(|m| m.keys()) {
                    regex::Regex::new(pattern).map_err(|e| format!("invalid pattern {pattern:?}: {e}"))?;
                }
                Ok(())
            }),
        single("additionalProperties", additional_properties)
            .types([JsonType::Object])
            .error("must NOT have additional properties"),
        single("propertyNames", property_names).types([JsonType::Object]).error("property name must be valid"),
    ]
}

/// In composite rules errors do not return, so loops stop on their own.
fn break_unless(cxt: &mut KeywordCxt<'_, '_>, valid: &Name) {
    if !cxt.it.all_errors {
        cxt.cg.if_(Expr::var(valid).not());
        cxt.cg.break_();
        cxt.cg.end_if();
    }
}

fn path(keyword: &str, token: impl ToString) -> [String; 2] {
    [keyword.to_string(), token.to_string()]
}

// ------------------------------ Combinators ------------------------------ //

fn all_of(cxt: &mut KeywordCxt<'_, '_>) -> Result<()> {
    let schemas = cxt.schema().as_array().map(Vec::as_slice).unwrap_or_default();
    for (i, sub) in schemas.iter().enumerate() {
        if sub == &Value::Bool(true) {
            continue;
        }
        cxt.subschema(SubschemaSpec::new(sub, path("allOf", i)))?;
    }
    Ok(())
}

fn any_of(cxt: &mut KeywordCxt<'_, '_>) -> Result<()> {
    let schemas = cxt.schema().as_array().map(Vec::as_slice).unwrap_or_default();
    let errs = cxt.errs_count();
    let valid = cxt.cg.let_("valid", Expr::bool(false));
    cxt.cg.block();
    for (i, sub) in schemas.iter().enumerate() {
        if i > 0 {
            cxt.cg.if_(Expr::var(&valid).not());
        }
        let branch = cxt.subschema(SubschemaSpec::new(sub, path("anyOf", i)).composite())?;
        cxt.cg.assign(&valid, &branch);
    }
    cxt.cg.end_block(Some(schemas.len().saturating_sub(1)));
    cxt.cg.if_(Expr::var(&valid));
    cxt.reset_errors(&errs);
    cxt.cg.else_();
    cxt.error();
    cxt.cg.end_if();
    Ok(())
}

fn one_of(cxt: &mut KeywordCxt<'_, '_>) -> Result<()> {
    let schemas = cxt.schema().as_array().map(Vec::as_slice).unwrap_or_default();
    let errs = cxt.errs_count();
    let valid = cxt.cg.let_("valid", Expr::bool(false));
    let passing = cxt.cg.let_("passing", Expr::null());
    for (i, sub) in schemas.iter().enumerate() {
        let branch = cxt.subschema(SubschemaSpec::new(sub, path("oneOf", i)).composite())?;
        if i > 0 {
            cxt.cg.if_(Expr::var(&branch).and(Expr::var(&valid)));
            cxt.cg.assign(&valid, false);
            cxt.cg.assign(&passing, Expr::Array(vec![Expr::var(&passing), Expr::from(i)]));
            cxt.cg.else_();
        }
        cxt.cg.if_(Expr::var(&branch));
        cxt.cg.assign(&valid, true);
        cxt.cg.assign(&passing, i);
        cxt.cg.end_if();
        if i > 0 {
            cxt.cg.end_if();
        }
    }
    cxt.cg.if_(Expr::var(&valid));
    cxt.reset_errors(&errs);
    cxt.cg.else_();
    cxt.set_param("passingSchemas", &passing);
    cxt.error();
    cxt.cg.end_if();
    Ok(())
}

fn not(cxt: &mut KeywordCxt<'_, '_>) -> Result<()> {
    let errs = cxt.errs_count();
    let sub = cxt.schema();
    let valid = cxt.subschema(SubschemaSpec::new(sub, ["not"]).composite())?;
    cxt.cg.if_(Expr::var(&valid));
    cxt.error();
    cxt.cg.else_();
    cxt.reset_errors(&errs);
    cxt.cg.end_if();
    Ok(())
}

fn if_keyword(cxt: &mut KeywordCxt<'_, '_>) -> Result<()> {
    let parent = cxt.parent_schema();
    let then = parent.get("then");
    let otherwise = parent.get("else");
    if then.is_none() && otherwise.is_none() {
        return Ok(());
    }
    let valid = cxt.cg.let_("valid", Expr::bool(true));
    let clause = cxt.cg.let_("ifClause", Expr::null());
    let errs = cxt.errs_count();
    let sub = cxt.schema();
    let matched = cxt.subschema(SubschemaSpec::new(sub, ["if"]).composite())?;
    cxt.reset_errors(&errs);

    match (then, otherwise) {
        (Some(t), Some(e)) => {
            cxt.cg.if_(Expr::var(&matched));
            branch(cxt, "then", t, &valid, &clause)?;
            cxt.cg.else_();
            branch(cxt, "else", e, &valid, &clause)?;
        }
        (Some(t), None) => {
            cxt.cg.if_(Expr::var(&matched));
            branch(cxt, "then", t, &valid, &clause)?;
        }
        (None, Some(e)) => {
            cxt.cg.if_(Expr::var(&matched).not());
            branch(cxt, "else", e, &valid, &clause)?;
        }
        (None, None) => return Ok(()),
    }
    cxt.cg.end_if();
    cxt.set_param("failingKeyword", &clause);
    cxt.pass(Expr::var(&valid));
    Ok(())
}

fn branch(cxt: &mut KeywordCxt<'_, '_>, keyword: &str, schema: &Value, valid: &Name, clause: &Name) -> Result<()> {
    let ok = cxt.subschema(SubschemaSpec::new(schema, [keyword]))?;
    cxt.cg.assign(valid, &ok);
    cxt.cg.assign(clause, keyword);
    Ok(())
}

// -------------------------------- Arrays --------------------------------- //

fn tuple(cxt: &mut KeywordCxt<'_, '_>, keyword: &str, schemas: &[Value]) -> Result<()> {
    let data = cxt.data();
    for (i, sub) in schemas.iter().enumerate() {
        if sub == &Value::Bool(true) {
            continue;
        }
        cxt.cg.if_(Expr::bin(BinOp::Gt, data.clone().len(), i));
        cxt.subschema(SubschemaSpec::new(sub, path(keyword, i)).data(DataStep::Index(Expr::from(i))))?;
        cxt.cg.end_if();
    }
    Ok(())
}

/// Apply `schema` to every item from index `start` on.
fn rest_items(cxt: &mut KeywordCxt<'_, '_>, keyword: &str, schema: &Value, start: usize) -> Result<()> {
    let data = cxt.data();
    match schema {
        Value::Bool(true) => {}
        Value::Bool(false) => {
            cxt.set_param("limit", start);
            cxt.fail(Expr::bin(BinOp::Gt, data.len(), start));
        }
        _ => {
            let i = cxt.cg.for_range("i", start, data.len());
            let valid = cxt.subschema(SubschemaSpec::new(schema, [keyword]).data(DataStep::Index(Expr::var(&i))))?;
            break_unless(cxt, &valid);
            cxt.cg.end_for();
        }
    }
    Ok(())
}

fn prefix_items(cxt: &mut KeywordCxt<'_, '_>) -> Result<()> {
    let schemas = cxt.schema().as_array().map(Vec::as_slice).unwrap_or_default();
    tuple(cxt, "prefixItems", schemas)
}

fn items(cxt: &mut KeywordCxt<'_, '_>) -> Result<()> {
    match cxt.schema() {
        Value::Array(schemas) => tuple(cxt, "items", schemas),
        schema => {
            let start = cxt.parent_schema().get("prefixItems").and_then(Value::as_array).map_or(0, Vec::len);
            rest_items(cxt, "items", schema, start)
        }
    }
}

/// Only meaningful next to the array form of `items`.
fn additional_items(cxt: &mut KeywordCxt<'_, '_>) -> Result<()> {
    let Some(tuple) = cxt.parent_schema().get("items").and_then(Value::as_array) else { return Ok(()) };
    let schema = cxt.schema();
    rest_items(cxt, "additionalItems", schema, tuple.len())
}

fn contains(cxt: &mut KeywordCxt<'_, '_>) -> Result<()> {
    let parent = cxt.parent_schema();
    let min = parent.get("minContains").and_then(Value::as_u64).unwrap_or(1);
    let max = parent.get("maxContains").and_then(Value::as_u64);
    let data = cxt.data();
    let errs = cxt.errs_count();
    let count = cxt.cg.let_("count", Expr::from(0usize));
    let i = cxt.cg.for_range("i", 0usize, data.len());
    let sub = cxt.schema();
    let valid = cxt.subschema(SubschemaSpec::new(sub, ["contains"]).data(DataStep::Index(Expr::var(&i))).composite())?;
    cxt.cg.if_(Expr::var(&valid));
    cxt.cg.add_assign(&count, 1usize);
    cxt.cg.end_if();
    if max.is_none() {
        cxt.cg.if_(Expr::bin(BinOp::Ge, &count, Expr::lit(min)));
        cxt.cg.break_();
        cxt.cg.end_if();
    }
    cxt.cg.end_for();

    let mut ok = Expr::bin(BinOp::Ge, &count, Expr::lit(min));
    cxt.set_param("minContains", Expr::lit(min));
    if let Some(max) = max {
        ok = ok.and(Expr::bin(BinOp::Le, &count, Expr::lit(max)));
        cxt.set_param("maxContains", Expr::lit(max));
        cxt.set_message(Expr::str(format!("must contain at least {min} and no more than {max} valid item(s)")));
    }
    cxt.cg.if_(ok);
    cxt.reset_errors(&errs);
    cxt.cg.else_();
    cxt.error();
    cxt.cg.end_if();
    Ok(())
}

// -------------------------------- Objects -------------------------------- //

fn properties(cxt: &mut KeywordCxt<'_, '_>) -> Result<()> {
    let Value::Object(props) = cxt.schema() else { return Ok(()) };
    let data = cxt.data();
    for (prop, sub) in props {
        if sub == &Value::Bool(true) {
            continue;
        }
        cxt.cg.if_(data.clone().has(prop.as_str()));
        let spec = SubschemaSpec::new(sub, path("properties", prop)).data(DataStep::Prop(prop.clone()));
        cxt.subschema(spec)?;
        cxt.cg.end_if();
    }
    Ok(())
}

fn pattern_properties(cxt: &mut KeywordCxt<'_, '_>) -> Result<()> {
    let Value::Object(patterns) = cxt.schema() else { return Ok(()) };
    let data = cxt.data();
    for (pattern, sub) in patterns {
        let re = cxt.regex(pattern)?;
        let key = cxt.cg.for_keys("key", data.clone());
        cxt.cg.if_(Expr::call(&re, vec![Expr::var(&key)]));
        let spec = SubschemaSpec::new(sub, path("patternProperties", pattern)).data(DataStep::Dynamic(Expr::var(&key)));
        let valid = cxt.subschema(spec)?;
        break_unless(cxt, &valid);
        cxt.cg.end_if();
        cxt.cg.end_for();
    }
    Ok(())
}

/// Condition under which `key` is matched by neither `properties` nor
/// `patternProperties` of the parent schema.
fn is_additional(cxt: &mut KeywordCxt<'_, '_>, key: &Name) -> Result<Expr> {
    let parent = cxt.parent_schema();
    let mut conds = Vec::new();
    if let Some(props) = parent.get("properties").filter(|p| p.is_object()) {
        let names = props.as_object().map(|m| m.len()).unwrap_or(0);
        if names > UNROLL_LIMIT {
            let injected = cxt.schema_value(props);
            conds.push(injected.has(key).not());
        } else {
            conds.extend(props.as_object().into_iter().flat_map(|m| m.keys()).map(|p| Expr::ne(key, p.as_str())));
        }
    }
    for pattern in parent.get("patternProperties").and_then(Value::as_object).into_iter().flat_map(|m| m.keys()) {
        let re = cxt.regex(pattern)?;
        conds.push(Expr::call(&re, vec![Expr::var(key)]).not());
    }
    Ok(Expr::and_all(conds))
}

fn additional_properties(cxt: &mut KeywordCxt<'_, '_>) -> Result<()> {
    let schema = cxt.schema();
    if schema == &Value::Bool(true) {
        return Ok(());
    }
    let data = cxt.data();
    let key = cxt.cg.for_keys("key", data);
    let additional = is_additional(cxt, &key)?;
    cxt.cg.if_(additional);
    if schema == &Value::Bool(false) {
        cxt.set_param("additionalProperty", &key);
        cxt.error();
        if !cxt.it.all_errors {
            cxt.cg.break_();
        }
    } else {
        let spec = SubschemaSpec::new(schema, ["additionalProperties"]).data(DataStep::Dynamic(Expr::var(&key)));
        let valid = cxt.subschema(spec)?;
        break_unless(cxt, &valid);
    }
    cxt.cg.end_if();
    cxt.cg.end_for();
    Ok(())
}

fn property_names(cxt: &mut KeywordCxt<'_, '_>) -> Result<()> {
    let schema = cxt.schema();
    if schema == &Value::Bool(true) {
        return Ok(());
    }
    let data = cxt.data();
    let key = cxt.cg.for_keys("key", data);
    let spec = SubschemaSpec::new(schema, ["propertyNames"]).data(DataStep::Replace(key.clone())).composite();
    let valid = cxt.subschema(spec)?;
    cxt.cg.if_(Expr::var(&valid).not());
    cxt.set_param("propertyName", &key);
    cxt.error();
    if !cxt.it.all_errors {
        cxt.cg.break_();
    }
    cxt.cg.end_if();
    cxt.cg.end_for();
    Ok(())
}
