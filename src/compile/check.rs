//! Static schema checks, run over a whole document before anything is
//! emitted: value types of keywords, required siblings, per-keyword hooks and
//! unknown keywords under `strict`.
use serde_json::{Map, Value};

use crate::error::{CompileError, Result};
use crate::runtime::helpers::escape_pointer;
use crate::vocab::{KeywordKind, Subschemas, Vocabulary};

use super::{Options, StrictMode};

pub(crate) fn is_data_ref(v: &Value) -> bool {
    matches!(v, Value::Object(m) if m.len() == 1 && m.get("$data").is_some_and(Value::is_string))
}

pub(crate) fn check_schema(opts: &Options, vocab: &Vocabulary, schema: &Value, path: &str) -> Result<()> {
    match schema {
        Value::Bool(_) => Ok(()),
        Value::Object(map) => check_object(opts, vocab, map, schema, path),
        _ => Err(CompileError::invalid(path, "schema must be an object or a boolean")),
    }
}

fn check_object(opts: &Options, vocab: &Vocabulary, map: &Map<String, Value>, schema: &Value, path: &str) -> Result<()> {
    for (k, v) in map {
        let Some(def) = vocab.get(k) else {
            match opts.strict {
                StrictMode::Error => return Err(CompileError::UnknownKeyword { keyword: k.clone(), path: path.into() }),
                StrictMode::Log => tracing::warn!(keyword = %k, path, "unknown keyword ignored"),
                StrictMode::Off => {}
            }
            continue;
        };
        let kpath = format!("{path}/{}", escape_pointer(k));
        let is_data = opts.data && def.data && is_data_ref(v);
        if !is_data && !def.schema_types.is_empty() && !def.schema_types.iter().any(|t| t.matches(v)) {
            let expected: Vec<_> = def.schema_types.iter().map(|t| t.as_str()).collect();
            return Err(CompileError::invalid(kpath, format!("value must be {}", expected.join(" or "))));
        }
        if let Some(sibling) = def.dependencies.iter().find(|d| !map.contains_key(d.as_str())) {
            return Err(CompileError::MissingSibling { keyword: k.clone(), sibling: sibling.clone(), path: path.into() });
        }
        if is_data || matches!(def.kind, KeywordKind::Macro(_)) {
            continue;
        }
        if let Some(check) = &def.check {
            check(v, schema).map_err(|reason| CompileError::invalid(kpath.clone(), reason))?;
        }
        match (def.subschemas, v) {
            (Subschemas::None, _) => {}
            (Subschemas::Single, _) | (Subschemas::SingleOrList, Value::Object(_) | Value::Bool(_)) => {
                check_schema(opts, vocab, v, &kpath)?
            }
            (Subschemas::List | Subschemas::SingleOrList, Value::Array(items)) => {
                for (i, item) in items.iter().enumerate() {
                    check_schema(opts, vocab, item, &format!("{kpath}/{i}"))?;
                }
            }
            (Subschemas::Map, Value::Object(members)) => {
                for (name, item) in members {
                    check_schema(opts, vocab, item, &format!("{kpath}/{}", escape_pointer(name)))?;
                }
            }
            (_, other) => {
                return Err(CompileError::invalid(kpath, format!("expected schemas, found {other}")));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn check(opts: &Options, schema: Value) -> Result<()> {
        check_schema(opts, &Vocabulary::standard(opts.discriminator), &schema, "#")
    }

    #[test]
    fn rejects_bad_shapes_with_paths() {
        let opts = Options::default();
        let err = check(&opts, json!({"properties": {"a": {"minLength": "3"}}})).unwrap_err();
        assert!(matches!(err, CompileError::InvalidSchema { ref path, .. } if path == "#/properties/a/minLength"));
        assert!(check(&opts, json!(3)).is_err());
        assert!(check(&opts, json!({"allOf": {}})).is_err());
    }

    #[test]
    fn unknown_keywords_follow_strict_mode() {
        let schema = json!({"x-unknown": 1});
        assert!(matches!(check(&Options::default(), schema.clone()), Err(CompileError::UnknownKeyword { .. })));
        let lax = Options { strict: StrictMode::Log, ..Options::default() };
        assert!(check(&lax, schema).is_ok());
    }

    #[test]
    fn data_refs_skip_value_checks_only_when_enabled() {
        let schema = json!({"maximum": {"$data": "1/limit"}});
        assert!(check(&Options::default(), schema.clone()).is_err());
        let opts = Options { data: true, ..Options::default() };
        assert!(check(&opts, schema).is_ok());
    }

    #[test]
    fn discriminator_needs_one_of() {
        let opts = Options { discriminator: true, ..Options::default() };
        let err = check(&opts, json!({"type": "object", "discriminator": {"propertyName": "kind"}})).unwrap_err();
        assert!(matches!(err, CompileError::MissingSibling { ref sibling, .. } if sibling == "oneOf"));
    }
}
