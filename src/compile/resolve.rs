//! Resource index and `$ref` resolution.
//!
//! Every schema document is walked once when it is added. Each `$id`,
//! `$anchor`, legacy `#name` id and `$dynamicAnchor` becomes an absolute URI
//! pointing at a `(document, json-pointer)` location.
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use serde_json::Value;
use url::Url;

use crate::error::{CompileError, MissingRefError, Result};
use crate::runtime::helpers::escape_pointer;

/// Members whose values are data, not schemas.
pub(crate) const NON_SCHEMA: [&str; 4] = ["enum", "const", "examples", "default"];

#[derive(Clone, Debug)]
pub(crate) struct Location {
    pub root: Rc<Value>,
    /// Document URI without fragment.
    pub doc: String,
    /// JSON pointer from the document root.
    pub pointer: String,
    /// Base URI in effect at this schema.
    pub base: Url,
}

impl Location {
    /// Canonical identity of the schema at this location.
    pub fn key(&self) -> String {
        format!("{}#{}", self.doc, self.pointer)
    }

    pub fn schema(&self) -> Option<&Value> {
        self.root.pointer(&self.pointer)
    }
}

#[derive(Debug, Default)]
pub(crate) struct Resources {
    entries: HashMap<String, Location>,
    dynamic: HashSet<String>,
    order: Vec<String>,
}

impl Resources {
    pub fn contains_document(&self, uri: &str) -> bool {
        self.document(uri).is_some()
    }

    /// The root location of a document (or embedded `$id` resource).
    fn document(&self, uri: &str) -> Option<&Location> {
        self.entries.get(uri)
    }

    pub fn checkpoint(&self) -> usize {
        self.order.len()
    }

    pub fn rollback(&mut self, n: usize) {
        for key in self.order.drain(n..) {
            self.entries.remove(&key);
            self.dynamic.remove(&key);
        }
    }

    fn register(&mut self, key: String, loc: Location) -> Result<()> {
        if let Some(existing) = self.entries.get(&key) {
            if existing.key() == loc.key() {
                return Ok(());
            }
            return Err(CompileError::invalid(
                loc.key(),
                format!("{key} already identifies the schema at {}", existing.key()),
            ));
        }
        self.order.push(key.clone());
        self.entries.insert(key, loc);
        Ok(())
    }

    /// Index a whole document under `uri`.
    pub fn add_document(&mut self, root: Rc<Value>, uri: &Url) -> Result<String> {
        let mut doc_url = uri.clone();
        doc_url.set_fragment(None);
        let doc = doc_url.to_string();
        let loc = Location { root: root.clone(), doc: doc.clone(), pointer: String::new(), base: doc_url.clone() };
        self.register(doc.clone(), loc)?;
        let mut walker = Walker { resources: self, root: &root, doc: &doc };
        walker.walk(&root, String::new(), &doc_url)?;
        Ok(doc)
    }

    /// Resolve `reference` against `base`.
    pub fn resolve(&self, reference: &str, base: &Url) -> std::result::Result<Location, MissingRefError> {
        let missing = |doc: String| MissingRefError {
            reference: reference.to_string(),
            base: base.to_string(),
            missing_schema: doc,
        };
        let target = base.join(reference).map_err(|_| missing(reference.to_string()))?;
        let fragment = target.fragment().map(percent_decode).unwrap_or_default();
        let mut doc_url = target.clone();
        doc_url.set_fragment(None);
        let doc = doc_url.to_string();

        if fragment.is_empty() {
            return self.document(&doc).cloned().ok_or_else(|| missing(doc.clone()));
        }
        if fragment.starts_with('/') {
            let start = self.document(&doc).ok_or_else(|| missing(doc.clone()))?;
            let pointer = format!("{}{fragment}", start.pointer);
            if start.root.pointer(&pointer).is_none() {
                return Err(missing(doc));
            }
            let base = base_along(&start.root, &start.pointer, &start.base, &fragment);
            return Ok(Location { root: start.root.clone(), doc: start.doc.clone(), pointer, base });
        }
        self.entries.get(&format!("{doc}#{fragment}")).cloned().ok_or_else(|| missing(doc))
    }

    /// A `$dynamicAnchor` named `name` declared at the root resource of `doc`.
    pub fn dynamic_anchor(&self, doc: &str, name: &str) -> Option<&Location> {
        let key = format!("{doc}#{name}");
        if self.dynamic.contains(&key) { self.entries.get(&key) } else { None }
    }
}

struct Walker<'r> {
    resources: &'r mut Resources,
    root: &'r Rc<Value>,
    doc: &'r str,
}

impl Walker<'_> {
    fn location(&self, pointer: &str, base: &Url) -> Location {
        Location { root: self.root.clone(), doc: self.doc.to_string(), pointer: pointer.to_string(), base: base.clone() }
    }

    fn walk(&mut self, v: &Value, pointer: String, base: &Url) -> Result<()> {
        match v {
            Value::Object(map) => {
                let mut base = base.clone();
                if let Some(id) = map.get("$id").and_then(Value::as_str) {
                    if let Some(anchor) = id.strip_prefix('#') {
                        let loc = self.location(&pointer, &base);
                        self.resources.register(anchor_key(&base, anchor), loc)?;
                    } else {
                        base = base.join(id).map_err(|e| CompileError::invalid(pointer.clone(), format!("bad $id {id:?}: {e}")))?;
                        base.set_fragment(None);
                        let loc = self.location(&pointer, &base);
                        self.resources.register(base.to_string(), loc)?;
                    }
                }
                if let Some(anchor) = map.get("$anchor").and_then(Value::as_str) {
                    let loc = self.location(&pointer, &base);
                    self.resources.register(anchor_key(&base, anchor), loc)?;
                }
                if let Some(anchor) = map.get("$dynamicAnchor").and_then(Value::as_str) {
                    let key = anchor_key(&base, anchor);
                    let loc = self.location(&pointer, &base);
                    self.resources.register(key.clone(), loc)?;
                    self.resources.dynamic.insert(key);
                }
                for (k, child) in map {
                    if NON_SCHEMA.contains(&k.as_str()) {
                        continue;
                    }
                    self.walk(child, format!("{pointer}/{}", escape_pointer(k)), &base)?;
                }
            }
            Value::Array(items) => {
                for (i, child) in items.iter().enumerate() {
                    self.walk(child, format!("{pointer}/{i}"), base)?;
                }
            }
            _ => {}
        }
        Ok(())
    }
}

fn anchor_key(base: &Url, anchor: &str) -> String {
    let mut u = base.clone();
    u.set_fragment(None);
    format!("{u}#{anchor}")
}

/// Base URI after following `suffix` from the schema at `start`.
fn base_along(root: &Value, start: &str, base: &Url, suffix: &str) -> Url {
    let mut base = base.clone();
    let mut node = root.pointer(start);
    for token in suffix.split('/').skip(1) {
        let token = unescape_token(token);
        node = node.and_then(|n| match n {
            Value::Object(m) => m.get(&token),
            Value::Array(a) => token.parse::<usize>().ok().and_then(|i| a.get(i)),
            _ => None,
        });
        let id = node.and_then(|n| n.get("$id")).and_then(Value::as_str);
        if let Some(id) = id.filter(|id| !id.starts_with('#')) {
            if let Ok(next) = base.join(id) {
                base = next;
            }
        }
    }
    base
}

fn unescape_token(token: &str) -> String {
    token.replace("~1", "/").replace("~0", "~")
}

pub(crate) fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let hex = |b: u8| (b as char).to_digit(16);
        match (bytes[i], bytes.get(i + 1).copied().and_then(hex), bytes.get(i + 2).copied().and_then(hex)) {
            (b'%', Some(hi), Some(lo)) => {
                out.push((hi * 16 + lo) as u8);
                i += 3;
            }
            (b, _, _) => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn index(schema: Value, uri: &str) -> Resources {
        let mut r = Resources::default();
        r.add_document(Rc::new(schema), &Url::parse(uri).unwrap()).unwrap();
        r
    }

    #[test]
    fn resolves_pointers_ids_and_anchors() {
        let r = index(
            json!({
                "$defs": {
                    "a": {"$id": "nested.json", "$defs": {"b": {"$anchor": "bee"}}},
                    "c": {"$id": "#legacy"}
                }
            }),
            "https://example.com/root.json",
        );
        let base = Url::parse("https://example.com/root.json").unwrap();
        assert_eq!(r.resolve("#/$defs/a", &base).unwrap().pointer, "/$defs/a");
        assert_eq!(r.resolve("nested.json", &base).unwrap().pointer, "/$defs/a");
        assert_eq!(r.resolve("nested.json#bee", &base).unwrap().pointer, "/$defs/a/$defs/b");
        assert_eq!(r.resolve("#legacy", &base).unwrap().pointer, "/$defs/c");
        let via_nested = r.resolve("#/$defs/a/$defs/b", &base).unwrap();
        assert_eq!(via_nested.base.as_str(), "https://example.com/nested.json");
    }

    #[test]
    fn fragments_are_percent_decoded() {
        let r = index(json!({"$defs": {"a b": {"type": "null"}, "x%y": true}}), "https://example.com/s.json");
        let base = Url::parse("https://example.com/s.json").unwrap();
        assert_eq!(r.resolve("#/$defs/a%20b", &base).unwrap().pointer, "/$defs/a b");
        assert_eq!(r.resolve("#/$defs/x%25y", &base).unwrap().pointer, "/$defs/x%y");
    }

    #[test]
    fn missing_documents_name_what_to_load() {
        let r = index(json!({}), "https://example.com/s.json");
        let base = Url::parse("https://example.com/s.json").unwrap();
        let err = r.resolve("other.json#/x", &base).unwrap_err();
        assert_eq!(err.missing_schema, "https://example.com/other.json");
    }

    #[test]
    fn rollback_forgets_documents() {
        let mut r = Resources::default();
        let cp = r.checkpoint();
        r.add_document(Rc::new(json!({"$anchor": "x"})), &Url::parse("https://e.com/a.json").unwrap()).unwrap();
        r.rollback(cp);
        assert!(!r.contains_document("https://e.com/a.json"));
    }
}
