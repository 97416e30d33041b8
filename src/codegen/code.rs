//! Typed program IR. No string concatenation anywhere: literals are
//! `Expr::Lit` (JSON values, embedded verbatim) and identifiers are `Name`s,
//! so an injected schema string can only ever become data.
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::name::Name;

// ------------------------------- Types ----------------------------------- //

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JsonType {
    Null,
    Boolean,
    Integer,
    Number,
    String,
    Array,
    Object,
}

impl JsonType {
    pub const ALL: [JsonType; 7] = [
        JsonType::Null,
        JsonType::Boolean,
        JsonType::Integer,
        JsonType::Number,
        JsonType::String,
        JsonType::Array,
        JsonType::Object,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            JsonType::Null => "null",
            JsonType::Boolean => "boolean",
            JsonType::Integer => "integer",
            JsonType::Number => "number",
            JsonType::String => "string",
            JsonType::Array => "array",
            JsonType::Object => "object",
        }
    }

    pub fn matches(self, v: &Value) -> bool {
        match (self, v) {
            (JsonType::Null, Value::Null) => true,
            (JsonType::Boolean, Value::Bool(_)) => true,
            (JsonType::Number, Value::Number(_)) => true,
            (JsonType::Integer, Value::Number(n)) => {
                n.is_i64() || n.is_u64() || n.as_f64().is_some_and(|f| f.fract() == 0.0)
            }
            (JsonType::String, Value::String(_)) => true,
            (JsonType::Array, Value::Array(_)) => true,
            (JsonType::Object, Value::Object(_)) => true,
            _ => false,
        }
    }

    /// The type of a value, reporting integral numbers as `Integer`.
    pub fn of(v: &Value) -> JsonType {
        match v {
            Value::Null => JsonType::Null,
            Value::Bool(_) => JsonType::Boolean,
            Value::Number(_) if JsonType::Integer.matches(v) => JsonType::Integer,
            Value::Number(_) => JsonType::Number,
            Value::String(_) => JsonType::String,
            Value::Array(_) => JsonType::Array,
            Value::Object(_) => JsonType::Object,
        }
    }
}

impl FromStr for JsonType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JsonType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown type {s:?}"))
    }
}

impl fmt::Display for JsonType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ----------------------------- Expressions ------------------------------- //

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BinOp {
    /// Strict equality: primitives by value, containers never equal.
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    /// Numeric addition, or concatenation when either side is a string.
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Expr {
    Lit(Value),
    Var(Name),
    /// `obj[key]` / `arr[i]`; a missing member reads as `null`.
    Index(Box<Expr>, Box<Expr>),
    Has(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Bin(BinOp, Box<Expr>, Box<Expr>),
    TypeIs(Box<Expr>, JsonType),
    /// Array length, object member count, or string length in bytes.
    Len(Box<Expr>),
    /// `len` bytes of a string starting at byte offset `start`; `""` when out of range.
    Slice { text: Box<Expr>, start: Box<Expr>, len: usize },
    Call(Box<Expr>, Vec<Expr>),
    Await(Box<Expr>),
    Object(Vec<(String, Expr)>),
    Array(Vec<Expr>),
    ErrorCount,
}

impl Expr {
    pub fn lit(v: impl Into<Value>) -> Expr {
        Expr::Lit(v.into())
    }

    pub fn str(s: impl Into<String>) -> Expr {
        Expr::Lit(Value::String(s.into()))
    }

    pub fn bool(b: bool) -> Expr {
        Expr::Lit(Value::Bool(b))
    }

    pub fn null() -> Expr {
        Expr::Lit(Value::Null)
    }

    pub fn var(n: &Name) -> Expr {
        Expr::Var(n.clone())
    }

    pub fn is_true(&self) -> bool {
        matches!(self, Expr::Lit(Value::Bool(true)))
    }

    pub fn is_false(&self) -> bool {
        matches!(self, Expr::Lit(Value::Bool(false)))
    }

    pub fn index(self, key: impl Into<Expr>) -> Expr {
        Expr::Index(Box::new(self), Box::new(key.into()))
    }

    pub fn has(self, key: impl Into<Expr>) -> Expr {
        Expr::Has(Box::new(self), Box::new(key.into()))
    }

    pub fn len(self) -> Expr {
        Expr::Len(Box::new(self))
    }

    pub fn type_is(self, t: JsonType) -> Expr {
        Expr::TypeIs(Box::new(self), t)
    }

    pub fn slice(text: Expr, start: Expr, len: usize) -> Expr {
        Expr::Slice { text: Box::new(text), start: Box::new(start), len }
    }

    pub fn call(callee: impl Into<Expr>, args: Vec<Expr>) -> Expr {
        Expr::Call(Box::new(callee.into()), args)
    }

    pub fn await_(self) -> Expr {
        Expr::Await(Box::new(self))
    }

    pub fn bin(op: BinOp, a: impl Into<Expr>, b: impl Into<Expr>) -> Expr {
        Expr::Bin(op, Box::new(a.into()), Box::new(b.into()))
    }

    pub fn eq(a: impl Into<Expr>, b: impl Into<Expr>) -> Expr {
        Expr::bin(BinOp::Eq, a, b)
    }

    pub fn ne(a: impl Into<Expr>, b: impl Into<Expr>) -> Expr {
        Expr::bin(BinOp::Ne, a, b)
    }

    /// `a + b`, folding adjacent string literals.
    pub fn add(a: impl Into<Expr>, b: impl Into<Expr>) -> Expr {
        match (a.into(), b.into()) {
            (Expr::Lit(Value::String(x)), Expr::Lit(Value::String(y))) => Expr::str(x + &y),
            (Expr::Bin(BinOp::Add, l, r), Expr::Lit(Value::String(y))) => match *r {
                Expr::Lit(Value::String(x)) => Expr::bin(BinOp::Add, *l, Expr::str(x + &y)),
                r => Expr::bin(BinOp::Add, Expr::Bin(BinOp::Add, l, Box::new(r)), Expr::str(y)),
            },
            (a, b) => Expr::bin(BinOp::Add, a, b),
        }
    }

    pub fn not(self) -> Expr {
        match self {
            Expr::Lit(Value::Bool(b)) => Expr::bool(!b),
            Expr::Not(inner) => *inner,
            Expr::Bin(BinOp::Eq, a, b) => Expr::Bin(BinOp::Ne, a, b),
            Expr::Bin(BinOp::Ne, a, b) => Expr::Bin(BinOp::Eq, a, b),
            e => Expr::Not(Box::new(e)),
        }
    }

    pub fn and(self, other: Expr) -> Expr {
        Expr::and_all([self, other])
    }

    pub fn or(self, other: Expr) -> Expr {
        Expr::or_all([self, other])
    }

    pub fn and_all(items: impl IntoIterator<Item = Expr>) -> Expr {
        let mut out = Vec::new();
        for e in items {
            match e {
                e if e.is_true() => {}
                e if e.is_false() => return Expr::bool(false),
                Expr::And(xs) => out.extend(xs),
                e => out.push(e),
            }
        }
        match out.len() {
            0 => Expr::bool(true),
            1 => out.remove(0),
            _ => Expr::And(out),
        }
    }

    pub fn or_all(items: impl IntoIterator<Item = Expr>) -> Expr {
        let mut out = Vec::new();
        for e in items {
            match e {
                e if e.is_false() => {}
                e if e.is_true() => return Expr::bool(true),
                Expr::Or(xs) => out.extend(xs),
                e => out.push(e),
            }
        }
        match out.len() {
            0 => Expr::bool(false),
            1 => out.remove(0),
            _ => Expr::Or(out),
        }
    }

    fn visit_names(&self, f: &mut dyn FnMut(&Name)) {
        match self {
            Expr::Lit(_) | Expr::ErrorCount => {}
            Expr::Var(n) => f(n),
            Expr::Index(a, b) | Expr::Has(a, b) | Expr::Bin(_, a, b) => {
                a.visit_names(f);
                b.visit_names(f);
            }
            Expr::Not(a) | Expr::TypeIs(a, _) | Expr::Len(a) | Expr::Await(a) => a.visit_names(f),
            Expr::And(xs) | Expr::Or(xs) | Expr::Array(xs) => xs.iter().for_each(|x| x.visit_names(f)),
            Expr::Slice { text, start, .. } => {
                text.visit_names(f);
                start.visit_names(f);
            }
            Expr::Call(callee, args) => {
                callee.visit_names(f);
                args.iter().for_each(|x| x.visit_names(f));
            }
            Expr::Object(members) => members.iter().for_each(|(_, x)| x.visit_names(f)),
        }
    }
}

impl From<&Name> for Expr {
    fn from(n: &Name) -> Expr {
        Expr::Var(n.clone())
    }
}

impl From<Name> for Expr {
    fn from(n: Name) -> Expr {
        Expr::Var(n)
    }
}

impl From<&str> for Expr {
    fn from(s: &str) -> Expr {
        Expr::str(s)
    }
}

impl From<bool> for Expr {
    fn from(b: bool) -> Expr {
        Expr::bool(b)
    }
}

impl From<usize> for Expr {
    fn from(n: usize) -> Expr {
        Expr::Lit(Value::from(n))
    }
}

// ------------------------------ Statements ------------------------------- //

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Stmt {
    Let { name: Name, value: Option<Expr>, constant: bool },
    Assign { name: Name, value: Expr },
    SetIndex { target: Name, key: Expr, value: Expr },
    Push { target: Name, value: Expr },
    Expr(Expr),
    If { cond: Expr, then: Vec<Stmt>, otherwise: Vec<Stmt> },
    ForRange { var: Name, from: Expr, to: Expr, body: Vec<Stmt> },
    ForKeys { var: Name, object: Expr, body: Vec<Stmt> },
    ForEach { var: Name, iterable: Expr, body: Vec<Stmt> },
    Loop { body: Vec<Stmt> },
    Break,
    Return(Expr),
    Throw(Expr),
    Try { body: Vec<Stmt>, catch: Option<(Name, Vec<Stmt>)>, finally: Vec<Stmt> },
    /// Append one error record to the shared error list.
    AddError(Expr),
    /// Truncate the shared error list back to a saved count.
    ResetErrors(Expr),
}

impl Stmt {
    fn visit_names(&self, f: &mut dyn FnMut(&Name)) {
        fn block(body: &[Stmt], f: &mut dyn FnMut(&Name)) {
            body.iter().for_each(|s| s.visit_names(f));
        }
        match self {
            Stmt::Let { name, value, .. } => {
                f(name);
                if let Some(v) = value { v.visit_names(f) }
            }
            Stmt::Assign { name, value } => {
                f(name);
                value.visit_names(f);
            }
            Stmt::SetIndex { target, key, value } => {
                f(target);
                key.visit_names(f);
                value.visit_names(f);
            }
            Stmt::Push { target, value } => {
                f(target);
                value.visit_names(f);
            }
            Stmt::Expr(e) | Stmt::Return(e) | Stmt::Throw(e) | Stmt::AddError(e) | Stmt::ResetErrors(e) => {
                e.visit_names(f)
            }
            Stmt::If { cond, then, otherwise } => {
                cond.visit_names(f);
                block(then, &mut *f);
                block(otherwise, &mut *f);
            }
            Stmt::ForRange { var, from, to, body } => {
                f(var);
                from.visit_names(f);
                to.visit_names(f);
                block(body, &mut *f);
            }
            Stmt::ForKeys { var, object: e, body } | Stmt::ForEach { var, iterable: e, body } => {
                f(var);
                e.visit_names(f);
                block(body, &mut *f);
            }
            Stmt::Loop { body } => block(body, &mut *f),
            Stmt::Break => {}
            Stmt::Try { body, catch, finally } => {
                block(body, &mut *f);
                if let Some((n, c)) = catch {
                    f(n);
                    block(c, &mut *f);
                }
                block(finally, &mut *f);
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Function {
    pub name: Name,
    pub params: Vec<Name>,
    pub body: Vec<Stmt>,
    #[serde(default)]
    pub is_async: bool,
}

impl Function {
    /// Every name mentioned by the function: params, locals and scope values.
    pub fn referenced_names(&self) -> Vec<Name> {
        let mut out = Vec::new();
        for s in &self.body {
            s.visit_names(&mut |n| out.push(n.clone()));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folds_boolean_algebra() {
        let x = Name::new("x").unwrap();
        assert!(Expr::bool(true).and(Expr::bool(true)).is_true());
        assert_eq!(Expr::bool(true).and(Expr::var(&x)), Expr::var(&x));
        assert!(Expr::var(&x).or(Expr::bool(true)).is_true());
        assert_eq!(Expr::var(&x).not().not(), Expr::var(&x));
        assert_eq!(Expr::eq(&x, 1usize).not(), Expr::ne(&x, 1usize));
    }

    #[test]
    fn folds_string_literals() {
        let p = Name::new("instancePath").unwrap();
        assert_eq!(Expr::add("/a", "/b"), Expr::str("/a/b"));
        let e = Expr::add(Expr::add(&p, "/a"), "/b");
        assert_eq!(e, Expr::bin(BinOp::Add, &p, "/a/b"));
    }

    #[test]
    fn integer_type_accepts_integral_floats() {
        assert!(JsonType::Integer.matches(&serde_json::json!(2.0)));
        assert!(!JsonType::Integer.matches(&serde_json::json!(2.5)));
        assert_eq!(JsonType::of(&serde_json::json!(3)), JsonType::Integer);
        assert_eq!("array".parse::<JsonType>().unwrap(), JsonType::Array);
    }
}
