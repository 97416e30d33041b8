//! Keyword definitions and the registry that orders them.
//!
//! A definition is registered once, validated up front, and from then on only
//! read by the static checker and the dispatcher.
pub mod applicator;
pub mod core;
pub mod discriminator;
pub mod validation;

use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use serde_json::Value;

use crate::codegen::{Expr, JsonType};
use crate::compile::KeywordCxt;
use crate::error::{CompileError, Result};
use crate::runtime::KeywordFn;

pub type CodeFn = Rc<dyn Fn(&mut KeywordCxt<'_, '_>) -> Result<()>>;
/// `(keyword value, parent schema) -> schema to apply in its place`
pub type MacroFn = Rc<dyn Fn(&Value, &Value) -> Value>;
/// Static check of `(keyword value, parent schema)`; `Err` carries the reason.
pub type CheckFn = Rc<dyn Fn(&Value, &Value) -> std::result::Result<(), String>>;

#[derive(Clone)]
pub enum KeywordKind {
    /// Emits code directly through the keyword context.
    Code(CodeFn),
    /// Calls a runtime predicate `(schema, data) -> bool`. With an import
    /// path the keyword also works in standalone modules.
    Validate { func: KeywordFn, import: Option<String> },
    /// Replaced by the schema it expands to.
    Macro(MacroFn),
    /// Known, but emits nothing.
    Annotation,
}

impl fmt::Debug for KeywordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeywordKind::Code(_) => f.write_str("Code"),
            KeywordKind::Validate { import, .. } => write!(f, "Validate({import:?})"),
            KeywordKind::Macro(_) => f.write_str("Macro"),
            KeywordKind::Annotation => f.write_str("Annotation"),
        }
    }
}

/// Where a keyword's value holds nested schemas.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Subschemas {
    None,
    Single,
    List,
    Map,
    SingleOrList,
}

// ---------------------------- Error templates ---------------------------- //

#[derive(Clone, Debug, PartialEq, Eq)]
enum Part {
    Text(String),
    Param(String),
}

/// Message with `{param}` placeholders, parsed once at registration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ErrorTemplate {
    parts: Vec<Part>,
}

impl ErrorTemplate {
    pub fn parse(src: &str) -> std::result::Result<Self, String> {
        let mut parts = Vec::new();
        let mut rest = src;
        while let Some(open) = rest.find('{') {
            if open > 0 {
                parts.push(Part::Text(rest[..open].to_string()));
            }
            let Some(close) = rest[open..].find('}') else {
                return Err(format!("unclosed placeholder in {src:?}"));
            };
            let param = &rest[open + 1..open + close];
            if param.is_empty() || !param.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Err(format!("bad placeholder {{{param}}} in {src:?}"));
            }
            parts.push(Part::Param(param.to_string()));
            rest = &rest[open + close + 1..];
        }
        if rest.contains('}') {
            return Err(format!("unmatched '}}' in {src:?}"));
        }
        if !rest.is_empty() {
            parts.push(Part::Text(rest.to_string()));
        }
        Ok(ErrorTemplate { parts })
    }

    pub fn params(&self) -> impl Iterator<Item = &str> {
        self.parts.iter().filter_map(|p| match p {
            Part::Param(p) => Some(p.as_str()),
            Part::Text(_) => None,
        })
    }

    /// Build the message expression; literal params fold into the text.
    pub fn render(&self, params: &[(String, Expr)]) -> Expr {
        let mut out = Expr::str("");
        for part in &self.parts {
            let piece = match part {
                Part::Text(t) => Expr::str(t.as_str()),
                Part::Param(p) => match params.iter().find(|(k, _)| k == p).map(|(_, v)| v) {
                    Some(Expr::Lit(Value::String(s))) => Expr::str(s.as_str()),
                    Some(Expr::Lit(v)) => Expr::str(v.to_string()),
                    Some(e) => e.clone(),
                    None => Expr::str(""),
                },
            };
            out = Expr::add(out, piece);
        }
        out
    }
}

// -------------------------- Keyword definitions -------------------------- //

#[derive(Clone)]
pub struct KeywordDefinition {
    pub keyword: String,
    pub kind: KeywordKind,
    /// Instance types the keyword applies to; empty means any.
    pub types: Vec<JsonType>,
    /// Accepted types of the keyword's own value; empty means any.
    pub schema_types: Vec<JsonType>,
    /// Whether `{"$data": pointer}` may stand in for the value.
    pub data: bool,
    /// Message template source, e.g. `must be {comparison} {limit}`.
    pub error: Option<String>,
    template: Option<ErrorTemplate>,
    pub dependencies: Vec<String>,
    /// Keywords whose work this one also does.
    pub implements: Vec<String>,
    pub subschemas: Subschemas,
    pub check: Option<CheckFn>,
}

impl fmt::Debug for KeywordDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeywordDefinition")
            .field("keyword", &self.keyword)
            .field("kind", &self.kind)
            .field("types", &self.types)
            .field("schema_types", &self.schema_types)
            .field("data", &self.data)
            .field("error", &self.error)
            .field("dependencies", &self.dependencies)
            .field("subschemas", &self.subschemas)
            .finish_non_exhaustive()
    }
}

impl KeywordDefinition {
    pub fn new(keyword: impl Into<String>, kind: KeywordKind) -> Self {
        KeywordDefinition {
            keyword: keyword.into(),
            kind,
            types: Vec::new(),
            schema_types: Vec::new(),
            data: false,
            error: None,
            template: None,
            dependencies: Vec::new(),
            implements: Vec::new(),
            subschemas: Subschemas::None,
            check: None,
        }
    }

    pub fn code(keyword: impl Into<String>, f: impl Fn(&mut KeywordCxt<'_, '_>) -> Result<()> + 'static) -> Self {
        Self::new(keyword, KeywordKind::Code(Rc::new(f)))
    }

    pub fn validate(keyword: impl Into<String>, f: impl Fn(&Value, &Value) -> bool + 'static) -> Self {
        Self::new(keyword, KeywordKind::Validate { func: Rc::new(f), import: None })
    }

    pub fn macro_(keyword: impl Into<String>, f: impl Fn(&Value, &Value) -> Value + 'static) -> Self {
        Self::new(keyword, KeywordKind::Macro(Rc::new(f)))
    }

    pub fn annotation(keyword: impl Into<String>) -> Self {
        Self::new(keyword, KeywordKind::Annotation)
    }

    pub fn types(mut self, types: impl IntoIterator<Item = JsonType>) -> Self {
        self.types = types.into_iter().collect();
        self
    }

    pub fn schema_types(mut self, types: impl IntoIterator<Item = JsonType>) -> Self {
        self.schema_types = types.into_iter().collect();
        self
    }

    pub fn allow_data(mut self) -> Self {
        self.data = true;
        self
    }

    /// Message template; parsed when the definition is registered.
    pub fn error(mut self, template: impl Into<String>) -> Self {
        self.error = Some(template.into());
        self
    }

    pub fn template(&self) -> Option<&ErrorTemplate> {
        self.template.as_ref()
    }

    pub fn dependencies(mut self, deps: impl IntoIterator<Item = &'static str>) -> Self {
        self.dependencies = deps.into_iter().map(String::from).collect();
        self
    }

    pub fn implements(mut self, kws: impl IntoIterator<Item = &'static str>) -> Self {
        self.implements = kws.into_iter().map(String::from).collect();
        self
    }

    pub fn subschemas(mut self, layout: Subschemas) -> Self {
        self.subschemas = layout;
        self
    }

    pub fn check(mut self, f: impl Fn(&Value, &Value) -> std::result::Result<(), String> + 'static) -> Self {
        self.check = Some(Rc::new(f));
        self
    }

    pub fn import(mut self, path: impl Into<String>) -> Self {
        if let KeywordKind::Validate { import, .. } = &mut self.kind {
            *import = Some(path.into());
        }
        self
    }

    pub fn groups(&self) -> Vec<Group> {
        let mut out: Vec<Group> = Vec::new();
        for t in &self.types {
            let g = Group::of(*t);
            if !out.contains(&g) {
                out.push(g);
            }
        }
        if out.is_empty() {
            out.push(Group::Untyped);
        }
        out
    }

    fn validate_definition(&mut self) -> std::result::Result<(), String> {
        if self.keyword.is_empty() {
            return Err("keyword name is empty".into());
        }
        self.template = self.error.as_deref().map(ErrorTemplate::parse).transpose()?;
        if self.dependencies.iter().any(|d| d == &self.keyword) {
            return Err("keyword cannot depend on itself".into());
        }
        match &self.kind {
            KeywordKind::Macro(_) if self.data => Err("macro keywords cannot accept $data".into()),
            KeywordKind::Annotation if self.data || self.error.is_some() => {
                Err("annotations do not validate, so $data and error templates make no sense".into())
            }
            _ => Ok(()),
        }
    }
}

/// Keyword groups in dispatch order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Group {
    Untyped,
    Number,
    String,
    Array,
    Object,
}

impl Group {
    pub const ORDER: [Group; 5] = [Group::Untyped, Group::Number, Group::String, Group::Array, Group::Object];

    pub fn of(t: JsonType) -> Group {
        match t {
            JsonType::Number | JsonType::Integer => Group::Number,
            JsonType::String => Group::String,
            JsonType::Array => Group::Array,
            JsonType::Object => Group::Object,
            JsonType::Null | JsonType::Boolean => Group::Untyped,
        }
    }

    /// The instance type a runtime guard for this group tests.
    pub fn guard_type(self) -> Option<JsonType> {
        match self {
            Group::Untyped => None,
            Group::Number => Some(JsonType::Number),
            Group::String => Some(JsonType::String),
            Group::Array => Some(JsonType::Array),
            Group::Object => Some(JsonType::Object),
        }
    }
}

// -------------------------------- Registry ------------------------------- //

#[derive(Clone, Debug, Default)]
pub struct Vocabulary {
    defs: IndexMap<String, Rc<KeywordDefinition>>,
}

impl Vocabulary {
    pub fn new() -> Self {
        Self::default()
    }

    /// The draft 2020-12 style vocabulary, plus `discriminator` when enabled.
    pub fn standard(with_discriminator: bool) -> Self {
        let mut v = Vocabulary::new();
        let defs = core::definitions()
            .into_iter()
            .chain(validation::definitions())
            .chain(applicator::definitions())
            .chain(with_discriminator.then(discriminator::definition));
        for def in defs {
            if let Err(e) = v.add(def) {
                panic!("built-in vocabulary is inconsistent: {e}");
            }
        }
        v
    }

    pub fn add(&mut self, mut def: KeywordDefinition) -> Result<()> {
        let keyword = def.keyword.clone();
        let invalid = |reason: String| CompileError::InvalidKeywordDefinition { keyword: keyword.clone(), reason };
        if self.defs.contains_key(&def.keyword) {
            return Err(invalid("keyword is already defined".into()));
        }
        def.validate_definition().map_err(invalid)?;
        self.defs.insert(def.keyword.clone(), Rc::new(def));
        Ok(())
    }

    pub fn get(&self, keyword: &str) -> Option<&Rc<KeywordDefinition>> {
        self.defs.get(keyword)
    }

    pub fn contains(&self, keyword: &str) -> bool {
        self.defs.contains_key(keyword)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Rc<KeywordDefinition>> {
        self.defs.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn templates_fold_literal_params() {
        let t = ErrorTemplate::parse("must be {comparison} {limit}").unwrap();
        let msg = t.render(&[("comparison".into(), Expr::str(">=")), ("limit".into(), Expr::lit(3))]);
        assert_eq!(msg, Expr::str("must be >= 3"));
        assert_eq!(t.params().collect::<Vec<_>>(), vec!["comparison", "limit"]);
    }

    #[test]
    fn malformed_templates_are_rejected_at_registration() {
        let mut v = Vocabulary::new();
        let err = v.add(KeywordDefinition::validate("even", |_, _| true).error("must be {oops")).unwrap_err();
        assert!(matches!(err, CompileError::InvalidKeywordDefinition { .. }));
    }

    #[test]
    fn redefinition_and_bad_macros_are_rejected() {
        let mut v = Vocabulary::standard(false);
        assert!(v.add(KeywordDefinition::annotation("minimum")).is_err());
        assert!(v.add(KeywordDefinition::macro_("range", |s, _| s.clone()).allow_data()).is_err());
        assert!(v.add(KeywordDefinition::annotation("x-note")).is_ok());
    }

    #[test]
    fn number_and_integer_share_a_group() {
        let def = KeywordDefinition::annotation("k").types([JsonType::Integer, JsonType::Number]);
        assert_eq!(def.groups(), vec![Group::Number]);
        assert_eq!(KeywordDefinition::annotation("k").groups(), vec![Group::Untyped]);
    }
}
