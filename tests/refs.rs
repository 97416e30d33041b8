use std::collections::HashMap;

use json_schemac::{CompileError, Compiler, MissingRefs, Options, SchemaLoader};
use serde_json::{Value, json};

#[test]
fn self_reference_accepts_everything() {
    let v = Compiler::default().compile(&json!({"$ref": "#"})).unwrap();
    for data in [json!(null), json!(1), json!("s"), json!([1, [2]]), json!({"a": {}})] {
        assert!(v.is_valid(&data), "{data}");
    }
}

#[test]
fn recursive_structure_reports_the_deep_path() {
    let schema = json!({
        "type": "object",
        "properties": {"a": {"anyOf": [{"type": "null"}, {"$ref": "#"}]}},
        "required": ["a"]
    });
    let v = Compiler::default().compile(&schema).unwrap();
    assert!(v.is_valid(&json!({"a": {"a": {"a": null}}})));

    let out = v.validate(&json!({"a": {"a": 1}})).unwrap();
    assert!(!out.valid);
    assert!(out.errors.iter().any(|e| e.instance_path == "/a/a"), "{:?}", out.errors);
}

#[test]
fn mutual_recursion_through_defs() {
    let schema = json!({
        "$defs": {
            "even": {"type": "array", "maxItems": 1, "items": {"$ref": "#/$defs/odd"}},
            "odd": {"type": "array", "minItems": 1, "maxItems": 1, "items": {"$ref": "#/$defs/even"}}
        },
        "$ref": "#/$defs/even"
    });
    let v = Compiler::default().compile(&schema).unwrap();
    assert!(v.is_valid(&json!([])));
    assert!(v.is_valid(&json!([[[]]])));
    assert!(!v.is_valid(&json!([[]])));
}

#[test]
fn anchors_and_ids_resolve() {
    let schema = json!({
        "$id": "https://example.com/root.json",
        "properties": {
            "n": {"$ref": "#count"},
            "s": {"$ref": "words.json"}
        },
        "$defs": {
            "count": {"$anchor": "count", "type": "integer"},
            "words": {"$id": "words.json", "type": "string"}
        }
    });
    let v = Compiler::default().compile(&schema).unwrap();
    assert!(v.is_valid(&json!({"n": 2, "s": "x"})));
    assert!(!v.is_valid(&json!({"n": "2"})));
    assert!(!v.is_valid(&json!({"s": 2})));
}

#[test]
fn added_schemas_are_reachable_by_uri() {
    let mut c = Compiler::default();
    let uri = c.add_schema(json!({"type": "string"}), Some("https://example.com/str.json")).unwrap();
    assert_eq!(uri, "https://example.com/str.json");
    let v = c.compile(&json!({"items": {"$ref": "https://example.com/str.json"}})).unwrap();
    assert!(v.is_valid(&json!(["a"])));
    assert!(!v.is_valid(&json!([1])));
    let direct = c.get_schema("https://example.com/str.json").unwrap();
    assert!(direct.is_valid(&json!("x")));
}

struct Docs(HashMap<String, Value>);

impl SchemaLoader for Docs {
    fn load(&mut self, uri: &str) -> Option<Value> {
        self.0.remove(uri)
    }
}

#[test]
fn missing_documents_are_loaded_on_demand() {
    let schema = json!({"properties": {"id": {"$ref": "https://example.com/id.json"}}});

    let err = Compiler::default().compile(&schema).unwrap_err();
    let CompileError::MissingRef(missing) = err else { panic!("{err:?}") };
    assert_eq!(missing.missing_schema, "https://example.com/id.json");

    let mut docs = Docs(HashMap::from([("https://example.com/id.json".to_string(), json!({"type": "integer"}))]));
    let v = Compiler::default().compile_loading(&schema, &mut docs).unwrap();
    assert!(v.is_valid(&json!({"id": 3})));
    assert!(!v.is_valid(&json!({"id": "3"})));

    let mut empty = Docs(HashMap::new());
    assert!(matches!(Compiler::default().compile_loading(&schema, &mut empty), Err(CompileError::MissingRef(_))));
}

#[test]
fn missing_ref_policies() {
    let schema = json!({"$ref": "https://example.com/nowhere.json"});
    let fail = Options { missing_refs: MissingRefs::Fail, ..Options::default() };
    assert!(matches!(Compiler::new(fail).compile(&schema), Err(CompileError::UnresolvedRef(_))));
    let warn = Options { missing_refs: MissingRefs::Warn, ..Options::default() };
    assert!(Compiler::new(warn).compile(&schema).unwrap().is_valid(&json!(42)));
}

#[test]
fn sync_schema_cannot_reference_async_one() {
    let schema = json!({
        "properties": {"a": {"$ref": "#/$defs/slow"}},
        "$defs": {"slow": {"$async": true, "type": "string"}}
    });
    let err = Compiler::default().compile(&schema).unwrap_err();
    assert!(matches!(err, CompileError::AsyncRefInSync { .. }), "{err:?}");
}
