//! Format registry: `format` names mapped to runtime predicates.
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use regex::Regex;
use serde_json::Value;

use crate::codegen::{JsonType, ValueCode, ValueDescriptor};
use crate::error::{CompileError, Result};
use crate::runtime::{FormatFn, Helper, LiveValue};

#[derive(Clone)]
pub enum FormatCheck {
    Regex(Rc<Regex>),
    Helper(Helper),
    /// A user predicate; `import` names it for standalone modules.
    Predicate { func: FormatFn, import: Option<String> },
}

impl fmt::Debug for FormatCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatCheck::Regex(r) => write!(f, "Regex({:?})", r.as_str()),
            FormatCheck::Helper(h) => write!(f, "Helper({})", h.import_path()),
            FormatCheck::Predicate { import, .. } => write!(f, "Predicate({import:?})"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct FormatDefinition {
    /// Instance types the format constrains; others pass.
    pub types: Vec<JsonType>,
    pub validate: FormatCheck,
    pub is_async: bool,
}

impl FormatDefinition {
    pub fn regex(pattern: &str) -> Result<Self> {
        let re = Regex::new(pattern)
            .map_err(|e| CompileError::InvalidRegex { pattern: pattern.to_string(), reason: e.to_string() })?;
        Ok(FormatDefinition { types: vec![JsonType::String], validate: FormatCheck::Regex(Rc::new(re)), is_async: false })
    }

    pub fn helper(h: Helper) -> Self {
        FormatDefinition { types: vec![JsonType::String], validate: FormatCheck::Helper(h), is_async: false }
    }

    pub fn predicate(f: impl Fn(&Value) -> bool + 'static) -> Self {
        FormatDefinition {
            types: vec![JsonType::String],
            validate: FormatCheck::Predicate { func: Rc::new(f), import: None },
            is_async: false,
        }
    }

    pub fn types(mut self, types: impl IntoIterator<Item = JsonType>) -> Self {
        self.types = types.into_iter().collect();
        self
    }

    pub fn import(mut self, path: impl Into<String>) -> Self {
        if let FormatCheck::Predicate { import, .. } = &mut self.validate {
            *import = Some(path.into());
        }
        self
    }

    pub fn asynchronous(mut self) -> Self {
        self.is_async = true;
        self
    }

    pub(crate) fn descriptor(&self, name: &str) -> ValueDescriptor {
        let key = Some(format!("format:{name}"));
        match &self.validate {
            FormatCheck::Regex(re) => ValueDescriptor {
                key,
                live: Some(LiveValue::Regex(re.clone())),
                code: Some(ValueCode::Regex(re.as_str().to_string())),
            },
            FormatCheck::Helper(h) => ValueDescriptor { key, ..h.descriptor() },
            FormatCheck::Predicate { func, import } => ValueDescriptor {
                key,
                live: Some(LiveValue::Format(func.clone())),
                code: import.clone().map(ValueCode::Import),
            },
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct Formats {
    defs: HashMap<String, FormatDefinition>,
}

impl Formats {
    /// The built-in formats: dates and times via chrono, the rest by pattern.
    pub fn standard() -> Self {
        let mut f = Formats::default();
        f.insert("date", FormatDefinition::helper(Helper::IsDate));
        f.insert("time", FormatDefinition::helper(Helper::IsTime));
        f.insert("date-time", FormatDefinition::helper(Helper::IsTimestamp));
        let patterns = [
            ("email", r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)*$"),
            ("uri", r"^[a-zA-Z][a-zA-Z0-9+.-]*:[^\s]*$"),
            ("uuid", r"^(?:urn:uuid:)?[0-9a-fA-F]{8}-(?:[0-9a-fA-F]{4}-){3}[0-9a-fA-F]{12}$"),
            ("ipv4", r"^(?:(?:25[0-5]|2[0-4]\d|1\d\d|[1-9]?\d)\.){3}(?:25[0-5]|2[0-4]\d|1\d\d|[1-9]?\d)$"),
        ];
        for (name, pattern) in patterns {
            match FormatDefinition::regex(pattern) {
                Ok(def) => f.insert(name, def),
                Err(e) => panic!("built-in format {name} is broken: {e}"),
            }
        }
        f
    }

    pub fn insert(&mut self, name: impl Into<String>, def: FormatDefinition) {
        self.defs.insert(name.into(), def);
    }

    pub fn get(&self, name: &str) -> Option<&FormatDefinition> {
        self.defs.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_patterns_match() {
        let f = Formats::standard();
        let is = |name: &str, s: &str| match &f.get(name).unwrap().validate {
            FormatCheck::Regex(re) => re.is_match(s),
            FormatCheck::Helper(h) => h.call(&[Value::from(s)]).unwrap() == Value::Bool(true),
            FormatCheck::Predicate { func, .. } => func(&Value::from(s)),
        };
        assert!(is("email", "a.b@example.com"));
        assert!(!is("email", "nope"));
        assert!(is("ipv4", "192.168.0.1"));
        assert!(!is("ipv4", "256.1.1.1"));
        assert!(is("uuid", "123e4567-e89b-12d3-a456-426614174000"));
        assert!(is("date-time", "2020-01-01T00:00:00Z"));
    }

    #[test]
    fn live_only_predicates_have_no_code() {
        let def = FormatDefinition::predicate(|_| true);
        assert!(def.descriptor("even").code.is_none());
        assert!(def.import("formats/even").descriptor("even").code.is_some());
    }
}
