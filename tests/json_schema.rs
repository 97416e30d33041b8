use json_schemac::codegen::Name;
use json_schemac::{CompileError, Compiler, KeywordDefinition, Options, StrictMode, Validator};
use proptest::prelude::*;
use serde_json::{Value, json};

fn compile(schema: Value) -> Validator {
    Compiler::default().compile(&schema).unwrap()
}

fn compile_with(opts: Options, schema: Value) -> Validator {
    Compiler::new(opts).compile(&schema).unwrap()
}

fn arb_json() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        (-20i64..20).prop_map(Value::from),
        "[a-c]{0,3}".prop_map(Value::from),
    ];
    leaf.prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map("[a-c]", inner, 0..3).prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

fn sample_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "a": {"type": ["integer", "null"], "minimum": 0},
            "b": {"type": "array", "items": {"type": "string"}, "uniqueItems": true},
            "c": {"anyOf": [{"type": "string", "maxLength": 2}, {"type": "boolean"}]}
        },
        "additionalProperties": false
    })
}

proptest! {
    #[test]
    fn compiled_validators_are_deterministic(data in arb_json()) {
        let first = compile_with(Options::default().all_errors(), sample_schema());
        let second = compile_with(Options::default().all_errors(), sample_schema());
        prop_assert_eq!(first.source(), second.source());
        let a = first.validate(&data).unwrap();
        let b = second.validate(&data).unwrap();
        prop_assert_eq!(&a, &b);
        prop_assert_eq!(a.valid, a.errors.is_empty());
    }
}

#[test]
fn errors_carry_paths_and_messages() {
    let v = compile(json!({
        "type": "object",
        "properties": {"n": {"type": "integer", "minimum": 1}},
        "required": ["n"]
    }));
    assert!(v.is_valid(&json!({"n": 3})));

    let out = v.validate(&json!({"n": 0})).unwrap();
    assert!(!out.valid);
    let err = &out.errors[0];
    assert_eq!(err.instance_path, "/n");
    assert_eq!(err.schema_path, "#/properties/n/minimum");
    assert_eq!(err.keyword, "minimum");
    assert_eq!(err.message, "must be >= 1");
    assert_eq!(err.to_string(), "data/n must be >= 1");

    let out = v.validate(&json!([])).unwrap();
    assert_eq!(out.errors[0].message, "must be object");
    assert!(out.into_result().is_err());
}

#[test]
fn all_errors_collects_what_fail_fast_stops_at() {
    let schema = json!({"required": ["a", "b"]});
    let fast = compile(schema.clone()).validate(&json!({})).unwrap();
    let all = compile_with(Options::default().all_errors(), schema).validate(&json!({})).unwrap();
    assert_eq!(fast.errors.len(), 1);
    assert_eq!(all.errors.len(), 2);
    assert_eq!(all.errors[1].params["missingProperty"], "b");
}

#[test]
fn repeated_values_share_one_entry() {
    let opts = Options { inline_refs: json_schemac::InlineRefs::Enabled(false), ..Options::default() };
    let v = compile_with(
        opts,
        json!({
            "properties": {
                "a": {"$ref": "#/$defs/word"},
                "b": {"$ref": "#/$defs/word"},
                "c": {"$ref": "#/$defs/word"}
            },
            "$defs": {"word": {"type": "string"}}
        }),
    );
    assert_eq!(v.value_names().len(), 1, "{:?}", v.value_names());
    assert!(v.is_valid(&json!({"a": "x", "c": "y"})));
    assert!(!v.is_valid(&json!({"b": 1})));

    let v = compile(json!({"properties": {"a": {"pattern": "^x"}, "b": {"pattern": "^x"}, "c": {"pattern": "^x"}}}));
    assert_eq!(v.value_names().iter().filter(|n| n.starts_with("pattern")).count(), 1);
}

#[test]
fn hostile_text_never_becomes_a_name() {
    assert!(Name::new("x; doEvil()").is_err());
    let v = compile(json!({"properties": {"x; doEvil()": {"type": "string"}}, "required": ["x; doEvil()"]}));
    assert!(v.is_valid(&json!({"x; doEvil()": "ok"})));
    let out = v.validate(&json!({"x; doEvil()": 1})).unwrap();
    assert_eq!(out.errors[0].instance_path, "/x; doEvil()");
}

#[test]
fn combinators_and_conditionals() {
    let v = compile(json!({
        "oneOf": [{"type": "integer"}, {"minimum": 2}],
        "not": {"const": 7}
    }));
    assert!(v.is_valid(&json!(1)));
    assert!(v.is_valid(&json!(2.5)));
    assert!(!v.is_valid(&json!(3)));
    assert!(!v.is_valid(&json!(7)));

    let v = compile_with(
        Options::default().all_errors(),
        json!({
            "if": {"properties": {"kind": {"const": "a"}}},
            "then": {"required": ["a"]},
            "else": {"required": ["b"]}
        }),
    );
    assert!(v.is_valid(&json!({"kind": "a", "a": 1})));
    assert!(v.is_valid(&json!({"kind": "z", "b": 1})));
    let out = v.validate(&json!({"kind": "a"})).unwrap();
    assert_eq!(out.errors.last().unwrap().message, "must match \"then\" schema");
}

#[test]
fn arrays_and_objects() {
    let v = compile(json!({
        "type": "array",
        "prefixItems": [{"type": "string"}],
        "items": {"type": "number"},
        "contains": {"const": 0},
        "maxContains": 1
    }));
    assert!(v.is_valid(&json!(["a", 1, 0])));
    assert!(!v.is_valid(&json!(["a", 1])));
    assert!(!v.is_valid(&json!(["a", 0, 0])));
    assert!(!v.is_valid(&json!([1, 0])));

    let v = compile(json!({
        "patternProperties": {"^x-": {"type": "string"}},
        "propertyNames": {"maxLength": 4},
        "additionalProperties": {"type": "integer"}
    }));
    assert!(v.is_valid(&json!({"x-a": "s", "n": 1})));
    assert!(!v.is_valid(&json!({"x-a": 1})));
    assert!(!v.is_valid(&json!({"n": "s"})));
    assert!(!v.is_valid(&json!({"longer": 1})));
}

#[test]
fn pattern_properties_skip_unmatched_keys_in_any_order() {
    let pattern = json!({"patternProperties": {"^x-": {"type": "string"}}});
    for opts in [Options::default(), Options::default().all_errors()] {
        let v = compile_with(opts.clone(), pattern.clone());
        assert!(v.validate(&json!({"n": 1, "x-a": "s"})).unwrap().valid);
        assert!(v.validate(&json!({"n": 1})).unwrap().valid);
        let out = v.validate(&json!({"n": 1, "x-a": 2})).unwrap();
        assert_eq!(out.errors[0].instance_path, "/x-a");

        let nested = compile_with(opts, json!({"anyOf": [pattern.clone(), {"type": "string"}]}));
        assert!(nested.validate(&json!({"n": 1, "x-a": "s"})).unwrap().valid);
        assert!(!nested.validate(&json!({"n": 1, "x-a": 2})).unwrap().valid);
    }
}

#[test]
fn data_references_read_sibling_values() {
    let opts = Options { data: true, ..Options::default() };
    let v = compile_with(
        opts,
        json!({
            "properties": {
                "low": {"type": "number"},
                "high": {"minimum": {"$data": "1/low"}}
            }
        }),
    );
    assert!(v.is_valid(&json!({"low": 1, "high": 2})));
    assert!(!v.is_valid(&json!({"low": 3, "high": 2})));
}

#[test]
fn unknown_keywords_follow_strict_mode() {
    let schema = json!({"type": "string", "colour": "red"});
    let err = Compiler::default().compile(&schema).unwrap_err();
    assert!(matches!(err, CompileError::UnknownKeyword { ref keyword, .. } if keyword == "colour"));
    let lax = Options { strict: StrictMode::Log, ..Options::default() };
    assert!(compile_with(lax, schema).is_valid(&json!("x")));
}

#[test]
fn user_keywords() {
    let mut c = Compiler::default();
    c.add_keyword(KeywordDefinition::validate("even", |schema, data| {
        schema.as_bool() != Some(true) || data.as_i64().is_some_and(|n| n % 2 == 0)
    }))
    .unwrap();
    c.add_keyword(KeywordDefinition::macro_("positive", |_, _| json!({"exclusiveMinimum": 0}))).unwrap();
    let v = c.compile(&json!({"even": true, "positive": true})).unwrap();
    assert!(v.is_valid(&json!(4)));
    assert!(!v.is_valid(&json!(3)));
    assert!(!v.is_valid(&json!(-2)));
}

#[test]
fn formats() {
    let v = compile(json!({"format": "date"}));
    assert!(v.is_valid(&json!("2024-02-29")));
    assert!(!v.is_valid(&json!("2023-02-29")));
    assert!(v.is_valid(&json!(5)));

    let err = Compiler::default().compile(&json!({"format": "colour"})).unwrap_err();
    assert!(matches!(err, CompileError::UnknownFormat { .. }));

    let off = Options { validate_formats: false, ..Options::default() };
    assert!(compile_with(off, json!({"format": "date"})).is_valid(&json!("nope")));
}

#[test]
fn discriminator_reports_unmapped_tags() {
    let opts = Options { discriminator: true, ..Options::default() };
    let v = compile_with(
        opts,
        json!({
            "type": "object",
            "discriminator": {"propertyName": "kind"},
            "oneOf": [
                {"properties": {"kind": {"const": "a"}, "x": {"type": "string"}}},
                {"properties": {"kind": {"const": "b"}, "y": {"type": "string"}}}
            ]
        }),
    );
    assert!(v.is_valid(&json!({"kind": "a", "x": "s"})));
    assert!(!v.is_valid(&json!({"kind": "b", "y": 1})));
    let out = v.validate(&json!({"kind": "c"})).unwrap();
    assert_eq!(out.errors.len(), 1);
    assert_eq!(out.errors[0].keyword, "discriminator");
    assert_eq!(out.errors[0].params["error"], "mapping");
}
