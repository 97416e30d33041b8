//! Core keywords: references, definitions, `type` and plain annotations.
use std::collections::HashSet;

use serde_json::Value;

use crate::codegen::{Expr, JsonType};

use super::{KeywordDefinition, Subschemas};

const ANNOTATIONS: [(&str, &[JsonType]); 13] = [
    ("$id", &[JsonType::String]),
    ("$schema", &[JsonType::String]),
    ("$anchor", &[JsonType::String]),
    ("$dynamicAnchor", &[JsonType::String]),
    ("$comment", &[JsonType::String]),
    ("$async", &[JsonType::Boolean]),
    ("title", &[JsonType::String]),
    ("description", &[JsonType::String]),
    ("default", &[]),
    ("examples", &[JsonType::Array]),
    ("deprecated", &[JsonType::Boolean]),
    ("readOnly", &[JsonType::Boolean]),
    ("writeOnly", &[JsonType::Boolean]),
];

pub fn definitions() -> Vec<KeywordDefinition> {
    let mut defs = vec![
        KeywordDefinition::code("$ref", |cxt| {
            let reference = cxt.schema().as_str().unwrap_or_default();
            cxt.apply_ref(reference, false)
        })
        .schema_types([JsonType::String]),
        KeywordDefinition::code("$dynamicRef", |cxt| {
            let reference = cxt.schema().as_str().unwrap_or_default();
            cxt.apply_ref(reference, true)
        })
        .schema_types([JsonType::String]),
        KeywordDefinition::annotation("$defs").schema_types([JsonType::Object]).subschemas(Subschemas::Map),
        KeywordDefinition::annotation("definitions").schema_types([JsonType::Object]).subschemas(Subschemas::Map),
        type_keyword(),
    ];
    defs.extend(ANNOTATIONS.iter().map(|(kw, types)| KeywordDefinition::annotation(*kw).schema_types(types.iter().copied())));
    defs
}

fn type_keyword() -> KeywordDefinition {
    KeywordDefinition::code("type", |cxt| {
        let types: Vec<&str> = match cxt.schema() {
            Value::String(t) => vec![t.as_str()],
            Value::Array(ts) => ts.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        };
        let data = cxt.data();
        let matches = types.iter().filter_map(|t| t.parse::<JsonType>().ok()).map(|t| data.clone().type_is(t));
        let cond = Expr::or_all(matches);
        cxt.set_param("type", Expr::str(types.join(",")));
        cxt.pass(cond);
        Ok(())
    })
    .schema_types([JsonType::String, JsonType::Array])
    .error("must be {type}")
    .check(|v, _| {
        let names: Vec<&Value> = match v {
            Value::Array(ts) => ts.iter().collect(),
            other => vec![other],
        };
        let mut seen = HashSet::new();
        for name in names {
            let Some(t) = name.as_str() else { return Err(format!("type names must be strings, found {name}")) };
            t.parse::<JsonType>()?;
            if !seen.insert(t) {
                return Err(format!("type {t:?} is listed twice"));
            }
        }
        Ok(())
    })
}
