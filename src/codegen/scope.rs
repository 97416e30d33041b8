//! Name allocation and deduplicated value injection.
//!
//! `Scope` hands out local names for one builder. `ValueScope` owns the
//! external values compiled code refers to (helpers, regexes, injected schema
//! fragments, forward references) and is shared by a whole compiler.
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::code::Function;
use super::name::Name;
use crate::error::{CompileError, Result};
use crate::runtime::{Imports, LiveValue};

/// Prefixes owned by the value scope and by compiled function names.
pub const RESERVED_PREFIXES: [&str; 10] =
    ["validate", "parse", "serialize", "wrapper", "schema", "pattern", "format", "keyword", "func", "root"];

// -------------------------------- Scope ---------------------------------- //

#[derive(Debug, Default)]
pub struct Scope {
    counters: HashMap<String, usize>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    /// # Panics
    ///
    /// When `prefix` is reserved for scope values, ends in a digit, or is not
    /// itself a valid identifier.
    pub fn name(&mut self, prefix: &str) -> Name {
        if RESERVED_PREFIXES.contains(&prefix) {
            panic!("CodeBuilder: prefix {prefix:?} is reserved for scope values");
        }
        next_name(&mut self.counters, prefix)
    }
}

fn next_name(counters: &mut HashMap<String, usize>, prefix: &str) -> Name {
    if prefix.ends_with(|c: char| c.is_ascii_digit()) {
        panic!("CodeBuilder: prefix {prefix:?} must not end in a digit");
    }
    let n = counters.entry(prefix.to_string()).or_insert(0);
    let name = Name::internal(format!("{prefix}{n}"));
    *n += 1;
    name
}

// ------------------------------ Value code -------------------------------- //

/// A forward handle, allocated before the thing it points to exists.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Slot(pub usize);

/// The persisted form of a scope value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind", content = "value")]
pub enum ValueCode {
    Json(Value),
    /// A runtime routine looked up by path when the module is loaded.
    Import(String),
    Regex(String),
    Function(Name),
    /// Only ever seen before finalization.
    Forward(Slot),
}

#[derive(Clone, Debug, Default)]
pub struct ValueDescriptor {
    pub key: Option<String>,
    pub live: Option<LiveValue>,
    pub code: Option<ValueCode>,
}

impl ValueDescriptor {
    pub fn json(v: Value) -> Self {
        ValueDescriptor { key: None, live: None, code: Some(ValueCode::Json(v)) }
    }

    pub fn keyed(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum DedupKey {
    Key(String),
    Ptr(usize),
    Code(String),
}

#[derive(Debug)]
struct Entry {
    name: Name,
    dedup: Option<(String, DedupKey)>,
    live: Option<LiveValue>,
    code: Option<ValueCode>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Checkpoint {
    entries: usize,
    slots: usize,
}

/// Functions and values reachable from one entry point.
#[derive(Debug)]
pub struct Finalized<T> {
    pub functions: IndexMap<Name, Rc<Function>>,
    pub values: Vec<(Name, T)>,
}

// ------------------------------ ValueScope -------------------------------- //

#[derive(Debug, Default)]
pub struct ValueScope {
    counters: HashMap<String, usize>,
    entries: Vec<Entry>,
    by_key: HashMap<(String, DedupKey), usize>,
    by_name: HashMap<Name, usize>,
    slots: Vec<Option<Name>>,
}

impl ValueScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a name under a value prefix without recording an entry
    /// (compiled functions are named this way).
    pub fn name(&mut self, prefix: &str) -> Name {
        next_name(&mut self.counters, prefix)
    }

    /// Reference a value, reusing the existing entry when one matches.
    pub fn value(&mut self, prefix: &str, desc: ValueDescriptor) -> Name {
        let dedup = dedup_key(&desc).map(|k| (prefix.to_string(), k));
        if let Some(i) = dedup.as_ref().and_then(|k| self.by_key.get(k)) {
            return self.entries[*i].name.clone();
        }
        let name = self.name(prefix);
        let index = self.entries.len();
        if let Some(k) = &dedup {
            self.by_key.insert(k.clone(), index);
        }
        self.by_name.insert(name.clone(), index);
        self.entries.push(Entry { name: name.clone(), dedup, live: desc.live, code: desc.code });
        name
    }

    pub fn get(&self, name: &Name) -> Option<(Option<&LiveValue>, Option<&ValueCode>)> {
        let e = &self.entries[*self.by_name.get(name)?];
        Some((e.live.as_ref(), e.code.as_ref()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Allocate a forward handle and a `wrapper` value that calls through it.
    pub fn reserve_slot(&mut self, key: impl Into<String>) -> (Slot, Name) {
        let slot = Slot(self.slots.len());
        self.slots.push(None);
        let desc = ValueDescriptor {
            key: Some(key.into()),
            live: Some(LiveValue::Forward(slot)),
            code: Some(ValueCode::Forward(slot)),
        };
        (slot, self.value("wrapper", desc))
    }

    pub fn fill_slot(&mut self, slot: Slot, function: Name) {
        tracing::debug!(slot = slot.0, %function, "forward reference filled");
        self.slots[slot.0] = Some(function);
    }

    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint { entries: self.entries.len(), slots: self.slots.len() }
    }

    /// Drop everything recorded after `cp`. Name counters keep running.
    pub fn rollback(&mut self, cp: Checkpoint) {
        for e in self.entries.drain(cp.entries..) {
            self.by_name.remove(&e.name);
            if let Some(k) = e.dedup {
                self.by_key.remove(&k);
            }
        }
        self.slots.truncate(cp.slots);
    }

    fn resolve_slot(&self, slot: Slot, owner: &Name) -> Result<Name> {
        self.slots
            .get(slot.0)
            .cloned()
            .flatten()
            .ok_or_else(|| CompileError::UnfilledSlot { name: owner.to_string() })
    }

    /// Walk everything reachable from `entry`, following names used in function
    /// bodies into other functions and into function-valued entries.
    fn reachable(&self, entry: &Name, functions: &IndexMap<Name, Rc<Function>>) -> Result<(Vec<Name>, Vec<usize>)> {
        let mut seen: HashSet<Name> = HashSet::new();
        let mut funcs = Vec::new();
        let mut values = Vec::new();
        let mut stack = vec![entry.clone()];
        while let Some(name) = stack.pop() {
            if !seen.insert(name.clone()) {
                continue;
            }
            if let Some(f) = functions.get(&name) {
                funcs.push(name.clone());
                stack.extend(f.referenced_names());
            } else if let Some(&i) = self.by_name.get(&name) {
                values.push(i);
                let e = &self.entries[i];
                match (&e.live, &e.code) {
                    (Some(LiveValue::Function(n)), _) | (_, Some(ValueCode::Function(n))) => stack.push(n.clone()),
                    (Some(LiveValue::Forward(s)), _) | (_, Some(ValueCode::Forward(s))) => {
                        stack.push(self.resolve_slot(*s, &e.name)?)
                    }
                    _ => {}
                }
            }
        }
        // Definition order keeps output stable across runs.
        let ordered = functions.keys().filter(|n| funcs.contains(*n)).cloned().collect();
        values.sort_unstable();
        Ok((ordered, values))
    }

    fn pick(functions: &IndexMap<Name, Rc<Function>>, names: Vec<Name>) -> IndexMap<Name, Rc<Function>> {
        names.into_iter().filter_map(|n| functions.get(&n).map(|f| (n, f.clone()))).collect()
    }

    /// Closure mode: every referenced entry becomes a live value.
    pub fn finalize_live(
        &self,
        entry: &Name,
        functions: &IndexMap<Name, Rc<Function>>,
    ) -> Result<Finalized<LiveValue>> {
        let (funcs, indices) = self.reachable(entry, functions)?;
        let imports = Imports::default();
        let mut values = Vec::with_capacity(indices.len());
        for i in indices {
            let e = &self.entries[i];
            let live = match (&e.live, &e.code) {
                (Some(LiveValue::Forward(s)), _) => LiveValue::Function(self.resolve_slot(*s, &e.name)?),
                (Some(live), _) => live.clone(),
                (None, Some(ValueCode::Forward(s))) => LiveValue::Function(self.resolve_slot(*s, &e.name)?),
                (None, Some(code)) => imports
                    .materialize(code)
                    .map_err(|reason| CompileError::invalid(e.name.to_string(), reason))?,
                (None, None) => return Err(CompileError::StandaloneValue { name: e.name.to_string() }),
            };
            values.push((e.name.clone(), live));
        }
        Ok(Finalized { functions: Self::pick(functions, funcs), values })
    }

    /// Standalone mode: every referenced entry must have a code form.
    pub fn finalize_code(
        &self,
        entry: &Name,
        functions: &IndexMap<Name, Rc<Function>>,
    ) -> Result<Finalized<ValueCode>> {
        let (funcs, indices) = self.reachable(entry, functions)?;
        let mut values = Vec::with_capacity(indices.len());
        for i in indices {
            let e = &self.entries[i];
            let code = match &e.code {
                Some(ValueCode::Forward(s)) => ValueCode::Function(self.resolve_slot(*s, &e.name)?),
                Some(code) => code.clone(),
                None => return Err(CompileError::StandaloneValue { name: e.name.to_string() }),
            };
            values.push((e.name.clone(), code));
        }
        Ok(Finalized { functions: Self::pick(functions, funcs), values })
    }
}

fn dedup_key(desc: &ValueDescriptor) -> Option<DedupKey> {
    if let Some(k) = &desc.key {
        return Some(DedupKey::Key(k.clone()));
    }
    if let Some(p) = desc.live.as_ref().and_then(LiveValue::ptr_id) {
        return Some(DedupKey::Ptr(p));
    }
    desc.code.as_ref().and_then(|c| serde_json::to_string(c).ok()).map(DedupKey::Code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::code::{Expr, Stmt};
    use crate::runtime::Helper;
    use serde_json::json;

    fn func(name: &Name, uses: &[&Name]) -> (Name, Rc<Function>) {
        let body = uses.iter().map(|n| Stmt::Expr(Expr::var(n))).collect();
        (name.clone(), Rc::new(Function { name: name.clone(), params: vec![], body, is_async: false }))
    }

    #[test]
    fn dedups_by_key_then_identity_then_code() {
        let mut scope = ValueScope::new();
        let a = scope.value("schema", ValueDescriptor::json(json!({"x": 1})).keyed("env:a"));
        let b = scope.value("schema", ValueDescriptor::json(json!({"y": 2})).keyed("env:a"));
        assert_eq!(a, b);

        let rc = Rc::new(json!([1, 2]));
        let live = |v: &Rc<Value>| ValueDescriptor { live: Some(LiveValue::Json(v.clone())), ..Default::default() };
        assert_eq!(scope.value("schema", live(&rc)), scope.value("schema", live(&rc)));

        let eq1 = scope.value("func", Helper::Equal.descriptor());
        let eq2 = scope.value("func", Helper::Equal.descriptor());
        let eq3 = scope.value("func", Helper::Equal.descriptor());
        assert_eq!((&eq1, &eq2), (&eq3, &eq3));
        assert_eq!(scope.len(), 3);
    }

    #[test]
    fn same_code_under_other_prefix_is_distinct() {
        let mut scope = ValueScope::new();
        let a = scope.value("schema", ValueDescriptor::json(json!(1)));
        let b = scope.value("root", ValueDescriptor::json(json!(1)));
        assert_ne!(a, b);
    }

    #[test]
    fn standalone_rejects_live_only_values() {
        let mut scope = ValueScope::new();
        let kw = scope.value(
            "keyword",
            ValueDescriptor { live: Some(LiveValue::Keyword(Rc::new(|_, _| true))), ..Default::default() },
        );
        let entry = scope.name("validate");
        let functions: IndexMap<_, _> = [func(&entry, &[&kw])].into_iter().collect();
        let err = scope.finalize_code(&entry, &functions).unwrap_err();
        assert!(matches!(err, CompileError::StandaloneValue { ref name } if name == kw.as_str()));
        assert!(scope.finalize_live(&entry, &functions).is_ok());
    }

    #[test]
    fn only_reachable_values_are_finalized() {
        let mut scope = ValueScope::new();
        let used = scope.value("schema", ValueDescriptor::json(json!(1)));
        let _unused = scope.value("schema", ValueDescriptor::json(json!(2)));
        let entry = scope.name("validate");
        let functions: IndexMap<_, _> = [func(&entry, &[&used])].into_iter().collect();
        let out = scope.finalize_code(&entry, &functions).unwrap();
        assert_eq!(out.values, vec![(used, ValueCode::Json(json!(1)))]);
    }

    #[test]
    fn forward_slots_resolve_or_fail() {
        let mut scope = ValueScope::new();
        let (slot, wrapper) = scope.reserve_slot("env:x");
        let entry = scope.name("validate");
        let functions: IndexMap<_, _> = [func(&entry, &[&wrapper])].into_iter().collect();
        assert!(matches!(scope.finalize_code(&entry, &functions), Err(CompileError::UnfilledSlot { .. })));
        scope.fill_slot(slot, entry.clone());
        let out = scope.finalize_code(&entry, &functions).unwrap();
        assert_eq!(out.values, vec![(wrapper, ValueCode::Function(entry))]);
    }

    #[test]
    fn rollback_forgets_entries() {
        let mut scope = ValueScope::new();
        let cp = scope.checkpoint();
        let a = scope.value("schema", ValueDescriptor::json(json!(1)));
        scope.rollback(cp);
        assert!(scope.is_empty());
        let b = scope.value("schema", ValueDescriptor::json(json!(1)));
        assert_ne!(a, b);
    }

    #[test]
    #[should_panic(expected = "reserved")]
    fn local_names_cannot_use_value_prefixes() {
        Scope::new().name("validate");
    }
}
