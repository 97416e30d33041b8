use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll, Waker};

use json_schemac::{CompileError, Compiler, FormatDefinition, Imports, Options, RuntimeError, StandaloneModule};
use serde_json::{Value, json};

fn schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "id": {"type": "string", "pattern": "^[a-z]+-\\d+$"},
            "day": {"type": "string", "format": "date"},
            "tags": {"type": "array", "items": {"enum": ["x", "y"]}, "uniqueItems": true},
            "child": {"$ref": "#"}
        },
        "required": ["id"]
    })
}

#[test]
fn standalone_modules_behave_like_live_validators() {
    let mut c = Compiler::new(Options::default().all_errors());
    let live = c.compile(&schema()).unwrap();
    let module = c.compile_standalone(&schema()).unwrap();
    let loaded = StandaloneModule::from_json_str(&module.to_json_string()).unwrap().load().unwrap();
    assert_eq!(module, StandaloneModule::from_json_str(&module.to_json_string()).unwrap());

    let cases = [
        json!({"id": "ab-1"}),
        json!({"id": "AB-1", "day": "2021-13-01"}),
        json!({"id": "a-1", "tags": ["x", "x"], "child": {"id": 3}}),
        json!({"child": {"child": {"id": "z-9", "tags": ["q"]}}}),
        json!([]),
    ];
    for data in cases {
        assert_eq!(live.validate(&data).unwrap(), loaded.validate(&data).unwrap(), "{data}");
    }
}

#[test]
fn source_lists_values_then_functions() {
    let module = Compiler::default().compile_standalone(&schema()).unwrap();
    let src = module.source();
    assert!(src.starts_with("const "), "{src}");
    assert!(src.contains(&format!("function {}(", module.entry)));
    assert!(src.trim_end().ends_with(&format!("export default {};", module.entry)));
}

#[test]
fn live_only_values_cannot_be_exported() {
    let mut c = Compiler::default();
    c.add_format("even-length", FormatDefinition::predicate(|v| v.as_str().is_some_and(|s| s.len() % 2 == 0)));
    let err = c.compile_standalone(&json!({"format": "even-length"})).unwrap_err();
    let CompileError::StandaloneValue { name } = &err else { panic!("{err:?}") };
    assert!(name.starts_with("format"), "{name}");
    assert!(err.to_string().contains(name.as_str()));
}

#[test]
fn imported_values_are_supplied_at_load_time() {
    let even = |v: &Value| v.as_str().is_some_and(|s| s.len() % 2 == 0);
    let mut c = Compiler::default();
    c.add_format("even-length", FormatDefinition::predicate(even).import("app/even-length"));
    let module = c.compile_standalone(&json!({"format": "even-length"})).unwrap();

    assert!(matches!(module.load(), Err(RuntimeError::Malformed(_))));
    let v = module.load_with(&Imports::new().format("app/even-length", even)).unwrap();
    assert!(v.is_valid(&json!("ab")));
    assert!(!v.is_valid(&json!("abc")));
}

#[test]
fn tampered_modules_are_rejected() {
    let module = Compiler::default().compile_standalone(&json!({"type": "string"})).unwrap();
    let mut text: Value = serde_json::from_str(&module.to_json_string()).unwrap();
    text["entry"] = json!("x; doEvil()");
    assert!(StandaloneModule::from_json_str(&text.to_string()).is_err());
    text["entry"] = json!("missing");
    let reloaded = StandaloneModule::from_json_str(&text.to_string()).unwrap();
    assert!(reloaded.load().is_err());
}

#[test]
fn async_schemas_reject_through_the_future() {
    let v = Compiler::default()
        .compile(&json!({"$async": true, "properties": {"n": {"type": "integer"}}}))
        .unwrap();
    assert!(v.is_async());
    let mut cx = Context::from_waker(Waker::noop());
    let mut poll = |data: Value| {
        let mut fut = v.validate_async(&data);
        match Pin::new(&mut fut).poll(&mut cx) {
            Poll::Ready(out) => out.unwrap(),
            Poll::Pending => panic!("validation never waits"),
        }
    };
    assert!(poll(json!({"n": 1})).valid);
    let rejected = poll(json!({"n": "1"}));
    assert!(!rejected.valid);
    assert_eq!(rejected.errors[0].instance_path, "/n");
}
