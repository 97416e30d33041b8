//! Parser compilation: every form becomes recursive-descent code over the
//! input text.
//!
//! The read position starts as a compile-time [`Pos::Literal`] and stays one
//! while every token consumed has a fixed length. The first variable-length
//! step (a helper call, a loop, a branch) promotes it to a runtime variable,
//! and from then on the function advances that variable in place.
use indexmap::IndexMap;

use crate::codegen::{BinOp, CodeBuilder, Expr, JsonType, Name};
use crate::error::{CompileError, Result};
use crate::runtime::Helper;

use super::schema::{Form, Node, Schema, TypeForm};
use super::{JtdOptions, Unit};

/// Read position inside the function being emitted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Pos {
    Literal(usize),
    Runtime(Name),
}

struct ParseCxt<'u> {
    unit: &'u mut Unit,
    schema: &'u Schema,
    opts: &'u JtdOptions,
    cg: CodeBuilder,
    json: Name,
    pos: Pos,
}

/// Compile the root parser; returns the entry function, called as `(json)`
/// and returning `[value, end]`.
pub(super) fn compile(unit: &mut Unit, schema: &Schema, opts: &JtdOptions) -> Result<Name> {
    let entry = unit.scope.name("parse");
    let json = Name::new("json")?;
    let mut cxt = ParseCxt { unit, schema, opts, cg: CodeBuilder::new(), json: json.clone(), pos: Pos::Literal(0) };
    cxt.cg.func(entry.clone(), vec![json.clone()], false);
    let value = cxt.node(&schema.root)?;
    cxt.skip_ws();
    let end = cxt.pos();
    cxt.cg.if_(Expr::ne(Expr::var(&json).len(), end.clone()));
    cxt.fail("unexpected input after the value");
    cxt.cg.end_if();
    cxt.cg.return_(Expr::Array(vec![value, end]));
    cxt.cg.end_func();
    let functions = cxt.cg.finish();
    cxt.unit.add(functions);
    tracing::debug!(entry = %entry, functions = cxt.unit.functions.len(), "compiled JTD parser");
    Ok(entry)
}

/// One function per recursive definition, called as `(json, pos)`.
fn definition(unit: &mut Unit, schema: &Schema, opts: &JtdOptions, name: &str, node: &Node) -> Result<Name> {
    let f = unit.scope.name("parse");
    unit.refs.insert(name.to_string(), f.clone());
    let json = Name::new("json")?;
    let pos = Name::new("pos")?;
    let mut cxt = ParseCxt { unit, schema, opts, cg: CodeBuilder::new(), json: json.clone(), pos: Pos::Runtime(pos.clone()) };
    cxt.cg.func(f.clone(), vec![json, pos], false);
    let value = cxt.node(node)?;
    let end = cxt.pos();
    cxt.cg.return_(Expr::Array(vec![value, end]));
    cxt.cg.end_func();
    let functions = cxt.cg.finish();
    cxt.unit.add(functions);
    Ok(f)
}

impl<'u> ParseCxt<'u> {
    // ----------------------------- Position ------------------------------ //

    fn pos(&self) -> Expr {
        match &self.pos {
            Pos::Literal(n) => Expr::from(*n),
            Pos::Runtime(name) => Expr::var(name),
        }
    }

    fn promote(&mut self) -> Name {
        match &self.pos {
            Pos::Runtime(name) => name.clone(),
            Pos::Literal(n) => {
                let name = self.cg.let_("pos", Expr::from(*n));
                self.pos = Pos::Runtime(name.clone());
                name
            }
        }
    }

    fn advance(&mut self, n: usize) {
        match &self.pos {
            Pos::Literal(k) => self.pos = Pos::Literal(k + n),
            Pos::Runtime(name) => {
                let name = name.clone();
                self.cg.add_assign(&name, n);
            }
        }
    }

    fn skip_ws(&mut self) {
        if !self.opts.whitespace {
            return;
        }
        let pos = self.promote();
        let f = self.unit.helper(Helper::SkipWhitespace);
        self.cg.assign(&pos, Expr::call(&f, vec![Expr::var(&self.json), Expr::var(&pos)]));
    }

    // ------------------------------ Tokens ------------------------------- //

    /// True when `token` starts at the current position.
    fn at(&self, token: &str) -> Expr {
        Expr::eq(Expr::slice(Expr::var(&self.json), self.pos(), token.len()), token)
    }

    fn expect(&mut self, token: &str) {
        self.skip_ws();
        let missing = self.at(token).not();
        self.cg.if_(missing);
        self.fail(&format!("expected '{token}'"));
        self.cg.end_if();
        self.advance(token.len());
    }

    fn fail(&mut self, message: &str) {
        let at = self.pos();
        self.fail_at(message, at);
    }

    fn fail_at(&mut self, message: &str, position: Expr) {
        let record = Expr::Object(vec![("message".into(), Expr::str(message)), ("position".into(), position)]);
        self.cg.throw(record);
    }

    /// Run a parsing helper at the current position. Returns where the value
    /// started and the value itself.
    fn scalar(&mut self, h: Helper) -> (Name, Name) {
        self.skip_ws();
        let pos = self.promote();
        let start = self.cg.const_("start", Expr::var(&pos));
        let f = self.unit.helper(h);
        let r = self.cg.const_("r", Expr::call(&f, vec![Expr::var(&self.json), Expr::var(&pos)]));
        self.cg.assign(&pos, Expr::var(&r).index(1usize));
        let value = self.cg.const_("value", Expr::var(&r).index(0usize));
        (start, value)
    }

    /// Parse the current member list until the closing brace is next.
    fn members(&mut self, mut member: impl FnMut(&mut Self) -> Result<()>) -> Result<()> {
        self.cg.loop_();
        member(self)?;
        self.skip_ws();
        let comma = self.at(",");
        self.cg.if_(comma);
        self.advance(1);
        self.cg.else_();
        self.cg.break_();
        self.cg.end_if();
        self.cg.end_for();
        Ok(())
    }

    // ------------------------------- Forms ------------------------------- //

    fn node(&mut self, node: &Node) -> Result<Expr> {
        if !node.nullable {
            return self.form(&node.form);
        }
        self.skip_ws();
        self.promote();
        let out = self.cg.let_("value", Expr::null());
        let null = self.at("null");
        self.cg.if_(null);
        self.advance(4);
        self.cg.else_();
        let value = self.form(&node.form)?;
        self.cg.assign(&out, value);
        self.cg.end_if();
        Ok(Expr::var(&out))
    }

    fn form(&mut self, form: &Form) -> Result<Expr> {
        match form {
            Form::Empty => Ok(Expr::var(&self.scalar(Helper::ParseValue).1)),
            Form::Type(t) => self.type_form(*t),
            Form::Enum(values) => {
                let (start, value) = self.scalar(Helper::ParseString);
                let known = Expr::or_all(values.iter().map(|v| Expr::eq(&value, v.as_str())));
                self.cg.if_(known.not());
                self.fail_at("value is not in the enum", Expr::var(&start));
                self.cg.end_if();
                Ok(Expr::var(&value))
            }
            Form::Elements(item) => self.elements(item),
            Form::Values(item) => self.values(item),
            Form::Properties { required, optional, additional } => self.properties(required, optional, *additional),
            Form::Discriminator { tag, mapping } => self.discriminator(tag, mapping),
            Form::Ref(name) => self.reference(name),
        }
    }

    fn type_form(&mut self, t: TypeForm) -> Result<Expr> {
        match t {
            TypeForm::Boolean => {
                self.skip_ws();
                self.promote();
                let out = self.cg.let_("value", Expr::null());
                let is_true = self.at("true");
                self.cg.if_(is_true);
                self.cg.assign(&out, true);
                self.advance(4);
                let is_false = self.at("false");
                self.cg.else_if(is_false);
                self.cg.assign(&out, false);
                self.advance(5);
                self.cg.else_();
                self.fail("expected boolean");
                self.cg.end_if();
                Ok(Expr::var(&out))
            }
            TypeForm::String => Ok(Expr::var(&self.scalar(Helper::ParseString).1)),
            TypeForm::Timestamp => {
                let (start, value) = self.scalar(Helper::ParseString);
                let f = self.unit.helper(Helper::IsTimestamp);
                self.cg.if_(Expr::call(&f, vec![Expr::var(&value)]).not());
                self.fail_at("expected RFC 3339 timestamp", Expr::var(&start));
                self.cg.end_if();
                Ok(Expr::var(&value))
            }
            TypeForm::Float32 | TypeForm::Float64 => Ok(Expr::var(&self.scalar(Helper::ParseNumber).1)),
            _ => {
                let (start, value) = self.scalar(Helper::ParseNumber);
                let (lo, hi) = t.int_range().unwrap_or((i64::MIN, i64::MAX));
                let fits = Expr::and_all([
                    Expr::var(&value).type_is(JsonType::Integer),
                    Expr::bin(BinOp::Ge, &value, Expr::lit(lo)),
                    Expr::bin(BinOp::Le, &value, Expr::lit(hi)),
                ]);
                self.cg.if_(fits.not());
                self.fail_at(&format!("expected {}", t.as_str()), Expr::var(&start));
                self.cg.end_if();
                Ok(Expr::var(&value))
            }
        }
    }

    fn elements(&mut self, item: &Node) -> Result<Expr> {
        self.expect("[");
        self.promote();
        let out = self.cg.let_("items", Expr::Array(vec![]));
        self.skip_ws();
        let empty = self.at("]");
        self.cg.if_(empty.not());
        self.members(|cxt| {
            let value = cxt.node(item)?;
            cxt.cg.push(&out, value);
            Ok(())
        })?;
        self.cg.end_if();
        self.expect("]");
        Ok(Expr::var(&out))
    }

    fn values(&mut self, item: &Node) -> Result<Expr> {
        self.expect("{");
        self.promote();
        let out = self.cg.let_("object", Expr::Object(vec![]));
        self.skip_ws();
        let empty = self.at("}");
        self.cg.if_(empty.not());
        self.members(|cxt| {
            let (_, key) = cxt.scalar(Helper::ParseString);
            cxt.expect(":");
            let value = cxt.node(item)?;
            cxt.cg.set_index(&out, &key, value);
            Ok(())
        })?;
        self.cg.end_if();
        self.expect("}");
        Ok(Expr::var(&out))
    }

    fn properties(
        &mut self,
        required: &IndexMap<String, Node>,
        optional: &IndexMap<String, Node>,
        additional: bool,
    ) -> Result<Expr> {
        self.expect("{");
        if required.is_empty() && optional.is_empty() && !additional {
            self.expect("}");
            return Ok(Expr::Object(vec![]));
        }
        self.promote();
        let out = self.cg.let_("object", Expr::Object(vec![]));
        self.skip_ws();
        let empty = self.at("}");
        self.cg.if_(empty.not());
        self.members(|cxt| cxt.member(&out, required, optional, additional, None))?;
        self.cg.end_if();
        self.close_properties(&out, required)
    }

    fn close_properties(&mut self, out: &Name, required: &IndexMap<String, Node>) -> Result<Expr> {
        self.expect("}");
        for name in required.keys() {
            self.cg.if_(Expr::var(out).has(name.as_str()).not());
            self.fail(&format!("missing required property \"{name}\""));
            self.cg.end_if();
        }
        Ok(Expr::var(out))
    }

    /// One `"key": value` member, dispatched on the key. Under a
    /// discriminator the tag member was read by the scan already; `seen`
    /// lets it through once and rejects a repeat.
    fn member(
        &mut self,
        out: &Name,
        required: &IndexMap<String, Node>,
        optional: &IndexMap<String, Node>,
        additional: bool,
        tag: Option<(&str, &Name)>,
    ) -> Result<()> {
        let (start, key) = self.scalar(Helper::ParseString);
        self.expect(":");
        let mut open = false;
        let mut arm = |cg: &mut CodeBuilder, cond: Expr| {
            if open {
                cg.else_if(cond);
            } else {
                cg.if_(cond);
                open = true;
            }
        };
        for (name, node) in required.iter().chain(optional) {
            arm(&mut self.cg, Expr::eq(&key, name.as_str()));
            let value = self.node(node)?;
            self.cg.set_index(out, name.as_str(), value);
        }
        if let Some((tag, seen)) = tag {
            arm(&mut self.cg, Expr::eq(&key, tag));
            self.cg.if_(Expr::var(seen));
            self.fail_at(&format!("repeated discriminator tag \"{tag}\""), Expr::var(&start));
            self.cg.end_if();
            self.cg.assign(seen, true);
            self.scalar(Helper::ParseString);
        }
        if open {
            self.cg.else_();
        }
        if additional {
            let (_, value) = self.scalar(Helper::ParseValue);
            self.cg.set_index(out, &key, &value);
        } else {
            self.fail_at("unexpected property", Expr::var(&start));
        }
        if open {
            self.cg.end_if();
        }
        Ok(())
    }

    /// Scan the members for the tag, skipping the others, then rewind and
    /// read the whole object with the properties form the tag selects.
    fn discriminator(&mut self, tag: &str, mapping: &IndexMap<String, Node>) -> Result<Expr> {
        self.skip_ws();
        let pos = self.promote();
        let object_start = self.cg.const_("start", Expr::var(&pos));
        self.expect("{");
        let members_start = self.cg.const_("start", Expr::var(&pos));
        let found = self.cg.let_("tag", Expr::null());
        let found_at = self.cg.let_("tagStart", Expr::var(&pos));

        self.skip_ws();
        let empty = self.at("}");
        self.cg.if_(empty.not());
        self.cg.loop_();
        let (_, key) = self.scalar(Helper::ParseString);
        self.expect(":");
        self.cg.if_(Expr::eq(&key, tag));
        self.skip_ws();
        let quote = self.at("\"");
        self.cg.if_(quote.not());
        self.fail("discriminator tag must be a string");
        self.cg.end_if();
        self.cg.assign(&found_at, Expr::var(&pos));
        let (_, value) = self.scalar(Helper::ParseString);
        self.cg.assign(&found, &value);
        self.cg.break_();
        self.cg.end_if();
        self.scalar(Helper::ParseValue);
        self.skip_ws();
        let comma = self.at(",");
        self.cg.if_(comma.not());
        self.cg.break_();
        self.cg.end_if();
        self.advance(1);
        self.cg.end_for();
        self.cg.end_if();

        self.cg.if_(Expr::eq(&found, Expr::null()));
        self.fail_at(&format!("missing discriminator tag \"{tag}\""), Expr::var(&object_start));
        self.cg.end_if();
        self.cg.assign(&pos, Expr::var(&members_start));

        let out = self.cg.let_("object", Expr::Object(vec![(tag.to_string(), Expr::var(&found))]));
        let seen = self.cg.let_("seen", Expr::bool(false));
        for (i, (tag_value, node)) in mapping.iter().enumerate() {
            let selected = Expr::eq(&found, tag_value.as_str());
            if i == 0 {
                self.cg.if_(selected);
            } else {
                self.cg.else_if(selected);
            }
            let Form::Properties { required, optional, additional } = &node.form else {
                return Err(CompileError::jtd("/mapping", "mapping values must be properties forms"));
            };
            self.members(|cxt| cxt.member(&out, required, optional, *additional, Some((tag, &seen))))?;
            self.close_properties(&out, required)?;
        }
        if !mapping.is_empty() {
            self.cg.else_();
        }
        self.fail_at("unknown discriminator tag value", Expr::var(&found_at));
        if !mapping.is_empty() {
            self.cg.end_if();
        }
        Ok(Expr::var(&out))
    }

    fn reference(&mut self, name: &str) -> Result<Expr> {
        let schema: &'u Schema = self.schema;
        let Some(def) = schema.definitions.get(name) else {
            return Err(CompileError::jtd("", format!("ref {name:?} has no definition")));
        };
        if !def.has_ref() {
            return self.node(def);
        }
        let f = match self.unit.refs.get(name) {
            Some(f) => f.clone(),
            None => definition(self.unit, schema, self.opts, name, def)?,
        };
        let pos = self.promote();
        let r = self.cg.const_("r", Expr::call(&f, vec![Expr::var(&self.json), Expr::var(&pos)]));
        self.cg.assign(&pos, Expr::var(&r).index(1usize));
        Ok(Expr::var(&self.cg.const_("value", Expr::var(&r).index(0usize))))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::jtd::{JtdCompiler, JtdOptions, ParseOutcome};

    fn parser(schema: serde_json::Value, whitespace: bool) -> crate::jtd::JtdParser {
        JtdCompiler::new(JtdOptions { whitespace, ..JtdOptions::default() }).parser(&schema).unwrap()
    }

    #[test]
    fn fixed_width_prefix_stays_literal() {
        let p = parser(json!({"properties": {}}), false);
        assert_eq!(p.parse("{}"), ParseOutcome::Parsed { value: json!({}), position: 2 });
        assert!(!p.source().contains("pos0"), "{}", p.source());
    }

    #[test]
    fn first_helper_call_promotes_the_position() {
        let p = parser(json!({"properties": {"a": {"type": "string"}}}), false);
        assert!(p.source().contains("pos0"));
        assert_eq!(p.parse(r#"{"a":"x"}"#), ParseOutcome::Parsed { value: json!({"a": "x"}), position: 9 });
    }

    #[test]
    fn reports_the_failing_position() {
        let p = parser(json!({"properties": {"n": {"type": "uint8"}}}), true);
        assert_eq!(p.parse(r#"{ "n": 300 }"#).position(), 7);
        let missing = p.parse("{}");
        assert!(matches!(missing, ParseOutcome::Failed { ref message, .. } if message.contains("\"n\"")));
        assert!(matches!(p.parse(r#"{"n": 1, "m": 2}"#), ParseOutcome::Failed { position: 9, .. }));
    }

    #[test]
    fn nullable_and_elements() {
        let p = parser(json!({"elements": {"type": "boolean", "nullable": true}}), true);
        assert_eq!(p.parse("[true, null ,false]").value(), Some(json!([true, null, false])));
        assert_eq!(p.parse("[]").value(), Some(json!([])));
        assert!(p.parse("[true,]").value().is_none());
        assert!(p.parse("[true] x").value().is_none());
    }

    #[test]
    fn discriminator_tag_may_appear_anywhere() {
        let p = parser(
            json!({
                "discriminator": "kind",
                "mapping": {"dot": {"properties": {"x": {"type": "int32"}}}}
            }),
            true,
        );
        assert_eq!(p.parse(r#"{"kind": "dot", "x": 1}"#).value(), Some(json!({"kind": "dot", "x": 1})));
        assert_eq!(p.parse(r#"{"x": 1, "kind": "dot"}"#).value(), Some(json!({"kind": "dot", "x": 1})));

        let unmapped = p.parse(r#"{"kind": "line"}"#);
        assert!(matches!(unmapped, ParseOutcome::Failed { ref message, position: 9 } if message.contains("unknown")));
        let absent = p.parse(r#"{"x": 1}"#);
        assert_eq!(absent, ParseOutcome::Failed { message: "missing discriminator tag \"kind\"".into(), position: 0 });
        let repeated = p.parse(r#"{"x": 1, "kind": "dot", "kind": "dot"}"#);
        assert!(matches!(repeated, ParseOutcome::Failed { ref message, position: 24 } if message.contains("repeated")));
    }

    #[test]
    fn default_options_keep_literal_offsets() {
        let p = JtdCompiler::default().parser(&json!({"properties": {}})).unwrap();
        assert!(!p.source().contains("pos0"), "{}", p.source());
        assert_eq!(p.parse("{}"), ParseOutcome::Parsed { value: json!({}), position: 2 });
        assert!(p.parse("{ }").value().is_none());
    }

    #[test]
    fn recursive_definitions_share_one_function() {
        let p = parser(
            json!({
                "definitions": {"tree": {"properties": {"kids": {"elements": {"ref": "tree"}}}}},
                "ref": "tree"
            }),
            true,
        );
        let value = p.parse(r#"{"kids": [{"kids": []}, {"kids": [{"kids": []}]}]}"#).value();
        assert_eq!(value, Some(json!({"kids": [{"kids": []}, {"kids": [{"kids": []}]}]})));
        assert_eq!(p.source().matches("function parse").count(), 2, "{}", p.source());
    }
}
