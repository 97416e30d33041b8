use json_schemac::{CompileError, JtdCompiler, JtdOptions, ParseOutcome};
use serde_json::json;

fn spaced() -> JtdCompiler {
    JtdCompiler::new(JtdOptions::default().whitespace())
}

#[test]
fn literal_positions_until_the_first_variable_step() {
    let empty = JtdCompiler::default().parser(&json!({"properties": {}})).unwrap();
    assert_eq!(empty.parse("{}"), ParseOutcome::Parsed { value: json!({}), position: 2 });
    assert!(!empty.source().contains("pos0"), "{}", empty.source());

    let one = JtdCompiler::default().parser(&json!({"properties": {"a": {"type": "string"}}})).unwrap();
    let text = r#"{"a":"x"}"#;
    assert_eq!(one.parse(text), ParseOutcome::Parsed { value: json!({"a": "x"}), position: text.len() });
}

#[test]
fn whitespace_is_opt_in() {
    let schema = json!({"values": {"type": "float64"}});
    let text = "{ \"x\" : 1.5 }";
    assert_eq!(spaced().parser(&schema).unwrap().parse(text).value(), Some(json!({"x": 1.5})));
    assert!(JtdCompiler::default().parser(&schema).unwrap().parse(text).value().is_none());
    assert_eq!(JtdCompiler::default().parser(&schema).unwrap().parse(r#"{"x":1.5}"#).value(), Some(json!({"x": 1.5})));
}

#[test]
fn discriminator_failures_are_distinct() {
    let p = spaced()
        .parser(&json!({
            "discriminator": "type",
            "mapping": {
                "user": {"properties": {"name": {"type": "string"}}},
                "bot": {"properties": {}, "additionalProperties": true}
            }
        }))
        .unwrap();
    assert_eq!(p.parse(r#"{"type":"bot","v":[1]}"#).value(), Some(json!({"type": "bot", "v": [1]})));

    let message = |text: &str| match p.parse(text) {
        ParseOutcome::Failed { message, .. } => message,
        other => panic!("{text} parsed: {other:?}"),
    };
    assert!(message("{}").contains("missing"));
    assert!(message(r#"{"name": "n"}"#).contains("missing discriminator tag"));
    assert!(message(r#"{"type": 1}"#).contains("must be a string"));
    assert!(message(r#"{"type": "alien"}"#).contains("unknown discriminator tag"));
    assert!(message(r#"{"type": "user", "name": "n", "type": "user"}"#).contains("repeated"));
}

#[test]
fn discriminator_tag_position_does_not_matter() {
    let p = spaced()
        .parser(&json!({
            "discriminator": "kind",
            "mapping": {
                "dot": {"properties": {"x": {"type": "int32"}}, "optionalProperties": {"label": {"type": "string"}}}
            }
        }))
        .unwrap();
    let expected = json!({"kind": "dot", "x": 1, "label": "a"});
    for text in [
        r#"{"kind": "dot", "x": 1, "label": "a"}"#,
        r#"{"x": 1, "kind": "dot", "label": "a"}"#,
        r#"{"x": 1, "label": "a", "kind": "dot"}"#,
    ] {
        assert_eq!(p.parse(text).value(), Some(expected.clone()), "{text}");
    }
    let absent = p.parse(r#"{"x": 1, "label": "a"}"#);
    assert!(matches!(absent, ParseOutcome::Failed { ref message, position: 0 } if message.contains("missing")));
}

#[test]
fn integer_ranges_and_timestamps() {
    let p = spaced()
        .parser(&json!({"properties": {"n": {"type": "int8"}, "at": {"type": "timestamp"}}}))
        .unwrap();
    let ok = p.parse(r#"{"n": -128, "at": "2020-01-01T00:00:00Z"}"#);
    assert_eq!(ok.value(), Some(json!({"n": -128, "at": "2020-01-01T00:00:00Z"})));
    assert!(p.parse(r#"{"n": 128, "at": "2020-01-01T00:00:00Z"}"#).value().is_none());
    assert!(p.parse(r#"{"n": 1.5, "at": "2020-01-01T00:00:00Z"}"#).value().is_none());
    assert!(p.parse(r#"{"n": 1, "at": "yesterday"}"#).value().is_none());
}

#[test]
fn malformed_text_is_a_failed_outcome_not_an_error() {
    let p = spaced().parser(&json!({"elements": {"enum": ["a", "b"]}})).unwrap();
    assert_eq!(p.parse(r#"["a", "b"]"#).value(), Some(json!(["a", "b"])));
    for text in ["", "[", r#"["a""#, r#"["c"]"#, r#"["a"] ]"#, "nul"] {
        assert!(matches!(p.parse(text), ParseOutcome::Failed { .. }), "{text}");
    }
}

#[test]
fn serializer_inverts_the_parser() {
    let schema = json!({
        "definitions": {"node": {"properties": {"v": {"type": "uint16"}}, "optionalProperties": {"next": {"ref": "node", "nullable": true}}}},
        "ref": "node"
    });
    let parser = JtdCompiler::default().parser(&schema).unwrap();
    let serializer = JtdCompiler::default().serializer(&schema).unwrap();
    let text = r#"{"v":1,"next":{"v":2,"next":null}}"#;
    let value = parser.parse(text).value().unwrap();
    assert_eq!(serializer.serialize(&value).unwrap(), text);
}

#[test]
fn invalid_schemas_are_rejected() {
    let err = JtdCompiler::default().parser(&json!({"ref": "nowhere"})).unwrap_err();
    assert!(matches!(err, CompileError::Jtd { .. }));
    assert!(JtdCompiler::default().serializer(&json!({"type": "int64"})).is_err());
    assert!(JtdOptions::from_json_str(r#"{"whitespace": "yes"}"#).is_err());
}
