//! Typed JTD schemas.
//!
//! The raw document is deserialized with path tracking, then folded into a
//! [`Node`] tree whose [`Form`] makes "exactly one form" structural.
use std::collections::HashSet;

use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{CompileError, Result};
use crate::path_de;
use crate::runtime::helpers::escape_pointer;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeForm {
    Boolean,
    String,
    Timestamp,
    Float32,
    Float64,
    Int8,
    Uint8,
    Int16,
    Uint16,
    Int32,
    Uint32,
}

impl TypeForm {
    pub fn as_str(self) -> &'static str {
        match self {
            TypeForm::Boolean => "boolean",
            TypeForm::String => "string",
            TypeForm::Timestamp => "timestamp",
            TypeForm::Float32 => "float32",
            TypeForm::Float64 => "float64",
            TypeForm::Int8 => "int8",
            TypeForm::Uint8 => "uint8",
            TypeForm::Int16 => "int16",
            TypeForm::Uint16 => "uint16",
            TypeForm::Int32 => "int32",
            TypeForm::Uint32 => "uint32",
        }
    }

    /// Inclusive bounds of the integer types.
    pub fn int_range(self) -> Option<(i64, i64)> {
        match self {
            TypeForm::Int8 => Some((i8::MIN.into(), i8::MAX.into())),
            TypeForm::Uint8 => Some((0, u8::MAX.into())),
            TypeForm::Int16 => Some((i16::MIN.into(), i16::MAX.into())),
            TypeForm::Uint16 => Some((0, u16::MAX.into())),
            TypeForm::Int32 => Some((i32::MIN.into(), i32::MAX.into())),
            TypeForm::Uint32 => Some((0, u32::MAX.into())),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Form {
    Empty,
    Ref(String),
    Type(TypeForm),
    Enum(Vec<String>),
    Elements(Box<Node>),
    Properties { required: IndexMap<String, Node>, optional: IndexMap<String, Node>, additional: bool },
    Values(Box<Node>),
    Discriminator { tag: String, mapping: IndexMap<String, Node> },
}

#[derive(Clone, Debug, PartialEq)]
pub struct Node {
    pub nullable: bool,
    pub form: Form,
}

impl Node {
    pub fn has_ref(&self) -> bool {
        match &self.form {
            Form::Ref(_) => true,
            Form::Empty | Form::Type(_) | Form::Enum(_) => false,
            Form::Elements(n) | Form::Values(n) => n.has_ref(),
            Form::Properties { required, optional, .. } => required.values().chain(optional.values()).any(Node::has_ref),
            Form::Discriminator { mapping, .. } => mapping.values().any(Node::has_ref),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Schema {
    pub definitions: IndexMap<String, Node>,
    pub root: Node,
}

// ------------------------------ Raw document ----------------------------- //

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct Raw {
    definitions: Option<IndexMap<String, Raw>>,
    #[serde(default)]
    nullable: bool,
    #[allow(dead_code)]
    metadata: Option<serde_json::Map<String, Value>>,
    #[serde(rename = "ref")]
    reference: Option<String>,
    #[serde(rename = "type")]
    type_: Option<TypeForm>,
    #[serde(rename = "enum")]
    enum_: Option<Vec<String>>,
    elements: Option<Box<Raw>>,
    properties: Option<IndexMap<String, Raw>>,
    optional_properties: Option<IndexMap<String, Raw>>,
    additional_properties: Option<bool>,
    values: Option<Box<Raw>>,
    discriminator: Option<String>,
    mapping: Option<IndexMap<String, Raw>>,
}

impl Schema {
    pub fn from_value(v: &Value) -> Result<Self> {
        let raw: Raw = path_de::from_value_with_path(v).map_err(|e| CompileError::jtd(e.path, e.message))?;
        let mut definitions = IndexMap::new();
        for (name, def) in raw.definitions.iter().flatten() {
            let path = format!("/definitions/{}", escape_pointer(name));
            definitions.insert(name.clone(), convert(def, &path)?);
        }
        let root = convert(&raw, "")?;
        let schema = Schema { definitions, root };
        schema.check_refs(&schema.root, "")?;
        for (name, def) in &schema.definitions {
            schema.check_refs(def, &format!("/definitions/{}", escape_pointer(name)))?;
        }
        Ok(schema)
    }

    fn check_refs(&self, node: &Node, path: &str) -> Result<()> {
        match &node.form {
            Form::Ref(r) if !self.definitions.contains_key(r) => {
                Err(CompileError::jtd(path, format!("ref {r:?} has no definition")))
            }
            Form::Elements(n) => self.check_refs(n, &format!("{path}/elements")),
            Form::Values(n) => self.check_refs(n, &format!("{path}/values")),
            Form::Properties { required, optional, .. } => {
                for (k, n) in required {
                    self.check_refs(n, &format!("{path}/properties/{}", escape_pointer(k)))?;
                }
                for (k, n) in optional {
                    self.check_refs(n, &format!("{path}/optionalProperties/{}", escape_pointer(k)))?;
                }
                Ok(())
            }
            Form::Discriminator { mapping, .. } => {
                for (k, n) in mapping {
                    self.check_refs(n, &format!("{path}/mapping/{}", escape_pointer(k)))?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

fn map(raw: &IndexMap<String, Raw>, path: &str) -> Result<IndexMap<String, Node>> {
    raw.iter().map(|(k, v)| Ok((k.clone(), convert(v, &format!("{path}/{}", escape_pointer(k)))?))).collect()
}

fn convert(raw: &Raw, path: &str) -> Result<Node> {
    if raw.definitions.is_some() && !path.is_empty() {
        return Err(CompileError::jtd(path, "definitions are only allowed at the root"));
    }
    let is_properties = raw.properties.is_some() || raw.optional_properties.is_some();
    let forms = [
        raw.reference.is_some(),
        raw.type_.is_some(),
        raw.enum_.is_some(),
        raw.elements.is_some(),
        is_properties,
        raw.values.is_some(),
        raw.discriminator.is_some(),
    ];
    if forms.iter().filter(|f| **f).count() > 1 {
        return Err(CompileError::jtd(path, "schema mixes keywords of more than one form"));
    }
    if raw.additional_properties.is_some() && !is_properties {
        return Err(CompileError::jtd(path, "additionalProperties needs properties or optionalProperties"));
    }
    if raw.mapping.is_some() != raw.discriminator.is_some() {
        return Err(CompileError::jtd(path, "discriminator and mapping go together"));
    }

    let form = if let Some(r) = &raw.reference {
        Form::Ref(r.clone())
    } else if let Some(t) = raw.type_ {
        Form::Type(t)
    } else if let Some(values) = &raw.enum_ {
        let mut seen = HashSet::new();
        if values.is_empty() {
            return Err(CompileError::jtd(format!("{path}/enum"), "enum must not be empty"));
        }
        if let Some(dup) = values.iter().find(|v| !seen.insert(v.as_str())) {
            return Err(CompileError::jtd(format!("{path}/enum"), format!("enum repeats {dup:?}")));
        }
        Form::Enum(values.clone())
    } else if let Some(e) = &raw.elements {
        Form::Elements(Box::new(convert(e, &format!("{path}/elements"))?))
    } else if is_properties {
        let required = map(raw.properties.as_ref().unwrap_or(&IndexMap::new()), &format!("{path}/properties"))?;
        let optional =
            map(raw.optional_properties.as_ref().unwrap_or(&IndexMap::new()), &format!("{path}/optionalProperties"))?;
        if let Some(k) = required.keys().find(|k| optional.contains_key(*k)) {
            return Err(CompileError::jtd(path, format!("{k:?} is both required and optional")));
        }
        Form::Properties { required, optional, additional: raw.additional_properties.unwrap_or(false) }
    } else if let Some(v) = &raw.values {
        Form::Values(Box::new(convert(v, &format!("{path}/values"))?))
    } else if let (Some(tag), Some(mapping)) = (&raw.discriminator, &raw.mapping) {
        let mapping = map(mapping, &format!("{path}/mapping"))?;
        for (value, node) in &mapping {
            let at = format!("{path}/mapping/{}", escape_pointer(value));
            match &node.form {
                Form::Properties { required, optional, .. } if !node.nullable => {
                    if required.contains_key(tag) || optional.contains_key(tag) {
                        return Err(CompileError::jtd(at, format!("mapping redefines the tag {tag:?}")));
                    }
                }
                _ => return Err(CompileError::jtd(at, "mapping values must be non-nullable properties forms")),
            }
        }
        Form::Discriminator { tag: tag.clone(), mapping }
    } else {
        Form::Empty
    };
    Ok(Node { nullable: raw.nullable, form })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn err_path(v: Value) -> String {
        match Schema::from_value(&v) {
            Err(CompileError::Jtd { path, .. }) => path,
            other => panic!("expected a JTD error, got {other:?}"),
        }
    }

    #[test]
    fn folds_forms() {
        let s = Schema::from_value(&json!({
            "definitions": {"id": {"type": "uint32"}},
            "properties": {"id": {"ref": "id"}},
            "optionalProperties": {"tags": {"elements": {"type": "string"}}}
        }))
        .unwrap();
        let Form::Properties { required, optional, additional } = &s.root.form else { panic!("{:?}", s.root) };
        assert_eq!(required["id"].form, Form::Ref("id".into()));
        assert!(matches!(optional["tags"].form, Form::Elements(_)));
        assert!(!additional);
        assert!(s.root.has_ref());
    }

    #[test]
    fn rejects_malformed_schemas_with_paths() {
        assert_eq!(err_path(json!({"type": "string", "enum": ["a"]})), "");
        assert_eq!(err_path(json!({"elements": {"ref": "missing"}})), "/elements");
        assert_eq!(err_path(json!({"values": {"definitions": {}}})), "/values");
        assert_eq!(err_path(json!({"enum": ["a", "a"]})), "/enum");
        assert_eq!(err_path(json!({"properties": {"a": {"type": "int"}}})), ".properties.a.type");
        assert_eq!(
            err_path(json!({"discriminator": "k", "mapping": {"x": {"properties": {"k": {}}}}})),
            "/mapping/x"
        );
    }
}
