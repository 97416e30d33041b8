//! Serializer compilation. Each function takes `(data)` and returns its JSON
//! text, appending pieces to one local string.
use indexmap::IndexMap;
use serde_json::Value;

use crate::codegen::{BinOp, CodeBuilder, Expr, Name};
use crate::error::{CompileError, Result};
use crate::runtime::Helper;

use super::schema::{Form, Node, Schema, TypeForm};
use super::Unit;

struct SerCxt<'u> {
    unit: &'u mut Unit,
    schema: &'u Schema,
    cg: CodeBuilder,
    json: Name,
}

/// Member separator state inside one object.
enum Sep {
    /// Nothing has been written yet, known while compiling.
    First,
    /// At least one member has been written.
    Comma,
    /// Only known at runtime: the flag is true until a member is written.
    Flag(Name),
}

pub(super) fn compile(unit: &mut Unit, schema: &Schema) -> Result<Name> {
    let entry = function(unit, schema, &schema.root)?;
    tracing::debug!(entry = %entry, functions = unit.functions.len(), "compiled JTD serializer");
    Ok(entry)
}

fn function(unit: &mut Unit, schema: &Schema, node: &Node) -> Result<Name> {
    let f = unit.scope.name("serialize");
    let data = Name::new("data")?;
    let mut cg = CodeBuilder::new();
    cg.func(f.clone(), vec![data.clone()], false);
    let json = cg.let_("json", Expr::str(""));
    let mut cxt = SerCxt { unit, schema, cg, json };
    cxt.node(node, Expr::var(&data))?;
    let json = cxt.json.clone();
    cxt.cg.return_(&json);
    cxt.cg.end_func();
    let functions = cxt.cg.finish();
    cxt.unit.add(functions);
    Ok(f)
}

fn quoted(s: &str) -> String {
    Value::String(s.to_string()).to_string()
}

impl<'u> SerCxt<'u> {
    fn write(&mut self, piece: impl Into<Expr>) {
        let json = self.json.clone();
        self.cg.assign(&json, Expr::add(&json, piece));
    }

    fn call(&mut self, h: Helper, arg: Expr) -> Expr {
        let f = self.unit.helper(h);
        Expr::call(&f, vec![arg])
    }

    /// Name `data` once so the form can read it repeatedly.
    fn bind(&mut self, data: Expr) -> Name {
        match data {
            Expr::Var(name) => name,
            other => self.cg.const_("value", other),
        }
    }

    fn node(&mut self, node: &Node, data: Expr) -> Result<()> {
        if !node.nullable {
            return self.form(&node.form, data);
        }
        let data = self.bind(data);
        self.cg.if_(Expr::eq(&data, Expr::null()));
        self.write("null");
        self.cg.else_();
        self.form(&node.form, Expr::var(&data))?;
        self.cg.end_if();
        Ok(())
    }

    fn form(&mut self, form: &Form, data: Expr) -> Result<()> {
        match form {
            Form::Type(TypeForm::String | TypeForm::Timestamp) | Form::Enum(_) => {
                let text = self.call(Helper::Quote, data);
                self.write(text);
            }
            Form::Empty | Form::Type(_) => {
                let text = self.call(Helper::ToJson, data);
                self.write(text);
            }
            Form::Elements(item) => {
                let data = self.bind(data);
                self.write("[");
                let i = self.cg.for_range("i", 0usize, Expr::var(&data).len());
                self.cg.if_(Expr::bin(BinOp::Gt, &i, 0usize));
                self.write(",");
                self.cg.end_if();
                self.node(item, Expr::var(&data).index(&i))?;
                self.cg.end_for();
                self.write("]");
            }
            Form::Values(item) => {
                let data = self.bind(data);
                self.write("{");
                let first = self.cg.let_("first", Expr::bool(true));
                let key = self.cg.for_keys("key", &data);
                let mut sep = Sep::Flag(first);
                self.separate(&mut sep);
                let key_text = self.call(Helper::Quote, Expr::var(&key));
                self.write(key_text);
                self.write(":");
                self.node(item, Expr::var(&data).index(&key))?;
                self.cg.end_for();
                self.write("}");
            }
            Form::Properties { required, optional, additional } => {
                let data = self.bind(data);
                self.properties(&data, required, optional, *additional, None)?;
            }
            Form::Discriminator { tag, mapping } => {
                let data = self.bind(data);
                let tag_value = self.cg.const_("tag", Expr::var(&data).index(tag.as_str()));
                for (i, (value, node)) in mapping.iter().enumerate() {
                    let selected = Expr::eq(&tag_value, value.as_str());
                    if i == 0 {
                        self.cg.if_(selected);
                    } else {
                        self.cg.else_if(selected);
                    }
                    let Form::Properties { required, optional, additional } = &node.form else {
                        return Err(CompileError::jtd("/mapping", "mapping values must be properties forms"));
                    };
                    self.properties(&data, required, optional, *additional, Some((tag.as_str(), value.as_str())))?;
                }
                if !mapping.is_empty() {
                    self.cg.else_();
                }
                let message = Expr::Object(vec![
                    ("message".into(), Expr::str("unknown discriminator tag value")),
                    ("tag".into(), Expr::var(&tag_value)),
                ]);
                self.cg.throw(message);
                if !mapping.is_empty() {
                    self.cg.end_if();
                }
            }
            Form::Ref(name) => self.reference(name, data)?,
        }
        Ok(())
    }

    /// Emit `,` before a member unless it is the first one written.
    fn separate(&mut self, sep: &mut Sep) {
        match sep {
            Sep::First => *sep = Sep::Comma,
            Sep::Comma => self.write(","),
            Sep::Flag(first) => {
                let first = first.clone();
                self.cg.if_(Expr::var(&first).not());
                self.write(",");
                self.cg.end_if();
                self.cg.assign(&first, false);
            }
        }
    }

    fn properties(
        &mut self,
        data: &Name,
        required: &IndexMap<String, Node>,
        optional: &IndexMap<String, Node>,
        additional: bool,
        tag: Option<(&str, &str)>,
    ) -> Result<()> {
        self.write("{");
        let mut sep = Sep::First;
        if let Some((tag, value)) = tag {
            self.write(Expr::str(format!("{}:{}", quoted(tag), quoted(value))));
            sep = Sep::Comma;
        }
        for (name, node) in required {
            self.separate(&mut sep);
            self.write(Expr::str(format!("{}:", quoted(name))));
            self.node(node, Expr::var(data).index(name.as_str()))?;
        }
        if matches!(sep, Sep::First) && (!optional.is_empty() || additional) {
            sep = Sep::Flag(self.cg.let_("first", Expr::bool(true)));
        }
        for (name, node) in optional {
            self.cg.if_(Expr::var(data).has(name.as_str()));
            self.separate(&mut sep);
            self.write(Expr::str(format!("{}:", quoted(name))));
            self.node(node, Expr::var(data).index(name.as_str()))?;
            self.cg.end_if();
        }
        if additional {
            let key = self.cg.for_keys("key", data);
            let known = required.keys().chain(optional.keys()).map(String::as_str).chain(tag.map(|(t, _)| t));
            let unknown = Expr::and_all(known.map(|k| Expr::ne(&key, k)).collect::<Vec<_>>());
            self.cg.if_(unknown);
            self.separate(&mut sep);
            let key_text = self.call(Helper::Quote, Expr::var(&key));
            self.write(key_text);
            self.write(":");
            let value = self.call(Helper::ToJson, Expr::var(data).index(&key));
            self.write(value);
            self.cg.end_if();
            self.cg.end_for();
        }
        self.write("}");
        Ok(())
    }

    fn reference(&mut self, name: &str, data: Expr) -> Result<()> {
        let schema: &'u Schema = self.schema;
        let Some(def) = schema.definitions.get(name) else {
            return Err(CompileError::jtd("", format!("ref {name:?} has no definition")));
        };
        if !def.has_ref() {
            return self.node(def, data);
        }
        let f = match self.unit.refs.get(name) {
            Some(f) => f.clone(),
            None => {
                let f = self.unit.scope.name("serialize");
                self.unit.refs.insert(name.to_string(), f.clone());
                definition(self.unit, schema, f.clone(), def)?;
                f
            }
        };
        self.write(Expr::call(&f, vec![data]));
        Ok(())
    }
}

/// Body of a recursive definition under a name reserved before compiling
/// it, so references inside resolve to the same function.
fn definition(unit: &mut Unit, schema: &Schema, f: Name, node: &Node) -> Result<()> {
    let data = Name::new("data")?;
    let mut cg = CodeBuilder::new();
    cg.func(f, vec![data.clone()], false);
    let json = cg.let_("json", Expr::str(""));
    let mut cxt = SerCxt { unit, schema, cg, json };
    cxt.node(node, Expr::var(&data))?;
    let json = cxt.json.clone();
    cxt.cg.return_(&json);
    cxt.cg.end_func();
    let functions = cxt.cg.finish();
    cxt.unit.add(functions);
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::jtd::{JtdCompiler, JtdSerializer};

    fn serializer(schema: serde_json::Value) -> JtdSerializer {
        JtdCompiler::default().serializer(&schema).unwrap()
    }

    #[test]
    fn writes_required_optional_and_additional_members() {
        let s = serializer(json!({
            "properties": {"id": {"type": "uint32"}},
            "optionalProperties": {"name": {"type": "string"}},
            "additionalProperties": true
        }));
        assert_eq!(s.serialize(&json!({"id": 1})).unwrap(), r#"{"id":1}"#);
        assert_eq!(s.serialize(&json!({"id": 1, "name": "a\"b", "x": [true]})).unwrap(), r#"{"id":1,"name":"a\"b","x":[true]}"#);
    }

    #[test]
    fn optional_only_objects_place_commas_at_runtime() {
        let s = serializer(json!({"optionalProperties": {"a": {"type": "int8"}, "b": {"type": "int8"}}}));
        assert_eq!(s.serialize(&json!({})).unwrap(), "{}");
        assert_eq!(s.serialize(&json!({"b": 2})).unwrap(), r#"{"b":2}"#);
        assert_eq!(s.serialize(&json!({"a": 1, "b": 2})).unwrap(), r#"{"a":1,"b":2}"#);
    }

    #[test]
    fn elements_values_and_nullable() {
        let s = serializer(json!({"values": {"elements": {"type": "timestamp", "nullable": true}}}));
        let data = json!({"x": ["2024-01-01T00:00:00Z", null], "y": []});
        assert_eq!(s.serialize(&data).unwrap(), r#"{"x":["2024-01-01T00:00:00Z",null],"y":[]}"#);
    }

    #[test]
    fn discriminator_writes_the_tag_first() {
        let s = serializer(json!({
            "discriminator": "kind",
            "mapping": {"dot": {"properties": {"x": {"type": "float64"}}}}
        }));
        assert_eq!(s.serialize(&json!({"x": 1.5, "kind": "dot"})).unwrap(), r#"{"kind":"dot","x":1.5}"#);
        assert!(s.serialize(&json!({"kind": "line"})).is_err());
    }

    #[test]
    fn recursive_definitions() {
        let s = serializer(json!({
            "definitions": {"list": {"properties": {"v": {"enum": ["a", "b"]}}, "optionalProperties": {"next": {"ref": "list"}}}},
            "ref": "list"
        }));
        let data = json!({"v": "a", "next": {"v": "b"}});
        assert_eq!(s.serialize(&data).unwrap(), r#"{"v":"a","next":{"v":"b"}}"#);
    }
}
