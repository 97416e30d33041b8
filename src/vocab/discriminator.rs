//! `discriminator`: dispatch to one `oneOf` branch by a string tag property.
use indexmap::IndexMap;
use serde_json::Value;

use crate::codegen::{Expr, JsonType};
use crate::compile::{KeywordCxt, SubschemaSpec};
use crate::error::{CompileError, Result};
use crate::runtime::helpers::escape_pointer;

use super::KeywordDefinition;

pub fn definition() -> KeywordDefinition {
    KeywordDefinition::code("discriminator", discriminator)
        .types([JsonType::Object])
        .schema_types([JsonType::Object])
        .dependencies(["oneOf"])
        .implements(["oneOf"])
        .check(|v, _| {
            if !v.get("propertyName").is_some_and(Value::is_string) {
                return Err("discriminator needs a string \"propertyName\"".into());
            }
            match v.get("mapping") {
                None => Ok(()),
                Some(Value::Object(m)) if m.values().all(Value::is_string) => Ok(()),
                Some(_) => Err("discriminator \"mapping\" must map tags to reference strings".into()),
            }
        })
}

/// Tag value → index of the `oneOf` branch it selects.
fn tags(cxt: &KeywordCxt<'_, '_>, prop: &str) -> Result<IndexMap<String, usize>> {
    let path = format!("{}/discriminator", cxt.it.schema_path);
    let branches = cxt.parent_schema().get("oneOf").and_then(Value::as_array).map(Vec::as_slice).unwrap_or_default();
    let mapping = cxt.schema().get("mapping").and_then(Value::as_object);
    let mut out = IndexMap::new();
    for (i, branch) in branches.iter().enumerate() {
        let reference = branch.get("$ref").and_then(Value::as_str);
        let mut found: Vec<String> = mapping
            .into_iter()
            .flatten()
            .filter(|(_, target)| reference.is_some() && target.as_str() == reference)
            .map(|(tag, _)| tag.clone())
            .collect();
        if found.is_empty() {
            let resolved = match reference {
                Some(r) => cxt.resolve_schema(r),
                None => Some(branch.clone()),
            };
            let tag_schema = resolved.as_ref().and_then(|s| s.pointer(&format!("/properties/{}", escape_pointer(prop))));
            if let Some(t) = tag_schema {
                found.extend(t.get("const").and_then(Value::as_str).map(String::from));
                let listed = t.get("enum").and_then(Value::as_array).into_iter().flatten();
                found.extend(listed.filter_map(Value::as_str).map(String::from));
            }
        }
        if found.is_empty() {
            return Err(CompileError::invalid(
                path,
                format!("oneOf/{i} has no string const or enum for tag \"{prop}\" and no mapping entry"),
            ));
        }
        for tag in found {
            if out.insert(tag.clone(), i).is_some() {
                return Err(CompileError::DuplicateTag { tag, path });
            }
        }
    }
    Ok(out)
}

fn discriminator(cxt: &mut KeywordCxt<'_, '_>) -> Result<()> {
    let prop = cxt.schema().get("propertyName").and_then(Value::as_str).unwrap_or_default();
    let tags = tags(cxt, prop)?;
    let branches = cxt.parent_schema().get("oneOf").and_then(Value::as_array).map(Vec::as_slice).unwrap_or_default();

    let data = cxt.data();
    let tag = cxt.cg.const_("tag", data.index(prop));
    cxt.set_param("tag", &tag);
    cxt.set_param("tagName", Expr::str(prop));
    cxt.cg.if_(Expr::var(&tag).type_is(JsonType::String).not());
    cxt.set_param("error", Expr::str("tag"));
    cxt.set_message(Expr::str(format!("tag \"{prop}\" must be string")));
    cxt.error();
    for (i, branch) in branches.iter().enumerate() {
        let selected: Vec<Expr> = tags.iter().filter(|(_, b)| **b == i).map(|(t, _)| Expr::eq(&tag, t.as_str())).collect();
        cxt.cg.else_if(Expr::or_all(selected));
        cxt.subschema(SubschemaSpec::new(branch, ["oneOf".to_string(), i.to_string()]))?;
    }
    cxt.cg.else_();
    cxt.set_param("error", Expr::str("mapping"));
    cxt.set_message(Expr::str(format!("value of tag \"{prop}\" must be in oneOf")));
    cxt.error();
    cxt.cg.end_if();
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::compile::{Compiler, Options};
    use crate::error::CompileError;

    fn compiler() -> Compiler {
        Compiler::new(Options { discriminator: true, ..Options::default() })
    }

    #[test]
    fn duplicate_tags_fail_compilation() {
        let schema = json!({
            "type": "object",
            "discriminator": {"propertyName": "kind"},
            "oneOf": [
                {"properties": {"kind": {"const": "a"}}},
                {"properties": {"kind": {"enum": ["b", "a"]}}}
            ]
        });
        let err = compiler().compile(&schema).unwrap_err();
        assert!(matches!(err, CompileError::DuplicateTag { ref tag, .. } if tag == "a"));
    }

    #[test]
    fn tags_follow_references_and_mapping() {
        let schema = json!({
            "type": "object",
            "discriminator": {"propertyName": "kind", "mapping": {"circle": "#/$defs/round"}},
            "oneOf": [{"$ref": "#/$defs/round"}, {"$ref": "#/$defs/square"}],
            "$defs": {
                "round": {"properties": {"kind": {"const": "circle"}, "r": {"type": "number"}}},
                "square": {"properties": {"kind": {"const": "square"}, "side": {"type": "number"}}}
            }
        });
        let v = compiler().compile(&schema).unwrap();
        assert!(v.is_valid(&json!({"kind": "circle", "r": 1})));
        assert!(!v.is_valid(&json!({"kind": "square", "side": "x"})));

        let out = v.validate(&json!({"kind": 5})).unwrap();
        assert_eq!(out.errors[0].params["error"], "tag");
        assert_eq!(out.errors[0].message, "tag \"kind\" must be string");
    }
}
