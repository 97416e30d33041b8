use std::borrow::Cow;
use std::collections::HashMap;

use serde_json::{Map, Number, Value};

use crate::codegen::{BinOp, Expr, Function, Name, Stmt};
use crate::error::RuntimeError;

use super::{LiveValue, Module, Run};

type Locals = HashMap<Name, Value>;

enum Flow {
    Normal,
    Break,
    Return(Value),
}

/// Why evaluation stopped early: a value thrown by the program (catchable)
/// or a fault in the module itself (never catchable).
enum Abort {
    Throw(Value),
    Fault(RuntimeError),
}

impl From<RuntimeError> for Abort {
    fn from(e: RuntimeError) -> Self {
        Abort::Fault(e)
    }
}

type Exec<T> = Result<T, Abort>;

pub(super) struct Machine<'m> {
    module: &'m Module,
    errors: Vec<Value>,
    depth: usize,
}

impl<'m> Machine<'m> {
    pub(super) fn new(module: &'m Module) -> Self {
        Machine { module, errors: Vec::new(), depth: 0 }
    }

    pub(super) fn run(mut self, entry: &Name, args: Vec<Value>) -> Result<Run, RuntimeError> {
        let outcome = match self.call_function(entry, args) {
            Ok(v) => Ok(v),
            Err(Abort::Throw(v)) => Err(v),
            Err(Abort::Fault(e)) => return Err(e),
        };
        Ok(Run { outcome, errors: self.errors })
    }

    fn call_function(&mut self, name: &Name, args: Vec<Value>) -> Exec<Value> {
        let module = self.module;
        let Some(f) = module.functions.get(name) else {
            return Err(RuntimeError::Malformed(format!("no function named {name}")).into());
        };
        if self.depth >= module.max_depth {
            return Err(RuntimeError::DepthExceeded(module.max_depth).into());
        }
        self.depth += 1;
        let result = self.invoke(f, args);
        self.depth -= 1;
        result
    }

    fn invoke(&mut self, f: &Function, args: Vec<Value>) -> Exec<Value> {
        let mut locals: Locals = f.params.iter().cloned().zip(args.into_iter().chain(std::iter::repeat(Value::Null))).collect();
        match self.exec_block(&f.body, &mut locals)? {
            Flow::Return(v) => Ok(v),
            Flow::Normal | Flow::Break => Ok(Value::Null),
        }
    }

    // ------------------------------ Statements --------------------------- //

    fn exec_block(&mut self, body: &[Stmt], locals: &mut Locals) -> Exec<Flow> {
        for s in body {
            match self.exec(s, locals)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_loop_body(&mut self, body: &[Stmt], locals: &mut Locals) -> Exec<Option<Flow>> {
        match self.exec_block(body, locals)? {
            Flow::Normal => Ok(None),
            Flow::Break => Ok(Some(Flow::Normal)),
            ret => Ok(Some(ret)),
        }
    }

    fn exec(&mut self, s: &Stmt, locals: &mut Locals) -> Exec<Flow> {
        match s {
            Stmt::Let { name, value, .. } => {
                let v = match value {
                    Some(e) => self.eval(e, locals)?.into_owned(),
                    None => Value::Null,
                };
                locals.insert(name.clone(), v);
            }
            Stmt::Assign { name, value } => {
                let v = self.eval(value, locals)?.into_owned();
                locals.insert(name.clone(), v);
            }
            Stmt::SetIndex { target, key, value } => {
                let k = self.eval(key, locals)?.into_owned();
                let v = self.eval(value, locals)?.into_owned();
                match (local_mut(locals, target)?, k) {
                    (Value::Object(m), Value::String(k)) => {
                        m.insert(k, v);
                    }
                    (Value::Array(a), Value::Number(i)) => {
                        let i = i.as_u64().unwrap_or(u64::MAX) as usize;
                        if i >= a.len() {
                            a.resize(i + 1, Value::Null);
                        }
                        a[i] = v;
                    }
                    (t, k) => return Err(type_fault(format!("cannot set {k} on {t}"))),
                }
            }
            Stmt::Push { target, value } => {
                let v = self.eval(value, locals)?.into_owned();
                match local_mut(locals, target)? {
                    Value::Array(a) => a.push(v),
                    t => return Err(type_fault(format!("cannot push onto {t}"))),
                }
            }
            Stmt::Expr(e) => {
                self.eval(e, locals)?;
            }
            Stmt::If { cond, then, otherwise } => {
                let branch = if truthy(&*self.eval(cond, locals)?) { then } else { otherwise };
                return self.exec_block(branch, locals);
            }
            Stmt::ForRange { var, from, to, body } => {
                let from = as_index(&*self.eval(from, locals)?)?;
                let to = as_index(&*self.eval(to, locals)?)?;
                let mut i = from;
                while i < to {
                    locals.insert(var.clone(), Value::from(i));
                    if let Some(flow) = self.exec_loop_body(body, locals)? {
                        return Ok(flow);
                    }
                    i += 1;
                }
            }
            Stmt::ForKeys { var, object, body } => {
                let keys: Vec<String> = match self.eval(object, locals)?.as_ref() {
                    Value::Object(m) => m.keys().cloned().collect(),
                    _ => Vec::new(),
                };
                for k in keys {
                    locals.insert(var.clone(), Value::String(k));
                    if let Some(flow) = self.exec_loop_body(body, locals)? {
                        return Ok(flow);
                    }
                }
            }
            Stmt::ForEach { var, iterable, body } => {
                let items = match self.eval(iterable, locals)?.into_owned() {
                    Value::Array(items) => items,
                    Value::Object(m) => m.into_iter().map(|(_, v)| v).collect(),
                    _ => Vec::new(),
                };
                for item in items {
                    locals.insert(var.clone(), item);
                    if let Some(flow) = self.exec_loop_body(body, locals)? {
                        return Ok(flow);
                    }
                }
            }
            Stmt::Loop { body } => loop {
                if let Some(flow) = self.exec_loop_body(body, locals)? {
                    return Ok(flow);
                }
            },
            Stmt::Break => return Ok(Flow::Break),
            Stmt::Return(e) => return Ok(Flow::Return(self.eval(e, locals)?.into_owned())),
            Stmt::Throw(e) => return Err(Abort::Throw(self.eval(e, locals)?.into_owned())),
            Stmt::Try { body, catch, finally } => {
                let result = match (self.exec_block(body, locals), catch) {
                    (Err(Abort::Throw(v)), Some((name, handler))) => {
                        locals.insert(name.clone(), v);
                        self.exec_block(handler, locals)
                    }
                    (other, _) => other,
                };
                return match self.exec_block(finally, locals)? {
                    Flow::Normal => result,
                    flow => Ok(flow),
                };
            }
            Stmt::AddError(e) => {
                let record = self.eval(e, locals)?.into_owned();
                self.errors.push(record);
            }
            Stmt::ResetErrors(e) => {
                let n = as_index(&*self.eval(e, locals)?)?;
                self.errors.truncate(n);
            }
        }
        Ok(Flow::Normal)
    }

    // ----------------------------- Expressions --------------------------- //

    fn eval<'a>(&mut self, e: &Expr, locals: &'a Locals) -> Exec<Cow<'a, Value>>
    where
        'm: 'a,
    {
        let module: &'m Module = self.module;
        Ok(match e {
            Expr::Lit(v) => Cow::Owned(v.clone()),
            Expr::Var(n) => {
                if let Some(v) = locals.get(n) {
                    Cow::Borrowed(v)
                } else {
                    match module.values.get(n) {
                        Some(LiveValue::Json(v)) => Cow::Borrowed(v.as_ref()),
                        Some(_) => return Err(type_fault(format!("{n} is not a JSON value"))),
                        None => return Err(RuntimeError::Malformed(format!("unbound name {n}")).into()),
                    }
                }
            }
            Expr::Index(base, key) => {
                let key = self.eval(key, locals)?.into_owned();
                match self.eval(base, locals)? {
                    Cow::Borrowed(b) => lookup(b, &key).map(Cow::Borrowed).unwrap_or(Cow::Owned(Value::Null)),
                    Cow::Owned(o) => Cow::Owned(lookup(&o, &key).cloned().unwrap_or(Value::Null)),
                }
            }
            Expr::Has(base, key) => {
                let key = self.eval(key, locals)?.into_owned();
                let base = self.eval(base, locals)?;
                Cow::Owned(Value::Bool(lookup(&base, &key).is_some()))
            }
            Expr::Not(a) => Cow::Owned(Value::Bool(!truthy(&*self.eval(a, locals)?))),
            Expr::And(xs) => {
                for x in xs {
                    if !truthy(&*self.eval(x, locals)?) {
                        return Ok(Cow::Owned(Value::Bool(false)));
                    }
                }
                Cow::Owned(Value::Bool(true))
            }
            Expr::Or(xs) => {
                for x in xs {
                    if truthy(&*self.eval(x, locals)?) {
                        return Ok(Cow::Owned(Value::Bool(true)));
                    }
                }
                Cow::Owned(Value::Bool(false))
            }
            Expr::Bin(op, a, b) => {
                let a = self.eval(a, locals)?;
                let b = self.eval(b, locals)?;
                Cow::Owned(binary(*op, &a, &b)?)
            }
            Expr::TypeIs(a, t) => Cow::Owned(Value::Bool(t.matches(&*self.eval(a, locals)?))),
            Expr::Len(a) => {
                let n = match self.eval(a, locals)?.as_ref() {
                    Value::Array(xs) => xs.len(),
                    Value::Object(m) => m.len(),
                    Value::String(s) => s.len(),
                    other => return Err(type_fault(format!("{other} has no length"))),
                };
                Cow::Owned(Value::from(n))
            }
            Expr::Slice { text, start, len } => {
                let start = as_index(&*self.eval(start, locals)?)?;
                let text = self.eval(text, locals)?;
                let out = text.as_str().and_then(|s| s.get(start..start.saturating_add(*len))).unwrap_or("");
                Cow::Owned(Value::String(out.to_string()))
            }
            Expr::Call(callee, args) => {
                let mut values = Vec::with_capacity(args.len());
                for a in args {
                    values.push(self.eval(a, locals)?.into_owned());
                }
                Cow::Owned(self.call(callee, values)?)
            }
            // Everything runs to completion, so awaiting is the identity.
            Expr::Await(a) => self.eval(a, locals)?,
            Expr::Object(members) => {
                let mut m = Map::new();
                for (k, v) in members {
                    m.insert(k.clone(), self.eval(v, locals)?.into_owned());
                }
                Cow::Owned(Value::Object(m))
            }
            Expr::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for x in items {
                    out.push(self.eval(x, locals)?.into_owned());
                }
                Cow::Owned(Value::Array(out))
            }
            Expr::ErrorCount => Cow::Owned(Value::from(self.errors.len())),
        })
    }

    fn call(&mut self, callee: &Expr, args: Vec<Value>) -> Exec<Value> {
        let Expr::Var(name) = callee else {
            return Err(type_fault("only names are callable".to_string()));
        };
        let module = self.module;
        if module.functions.contains_key(name) {
            return self.call_function(name, args);
        }
        let arg = |i: usize| args.get(i).unwrap_or(&Value::Null);
        match module.values.get(name) {
            Some(LiveValue::Function(target)) => self.call_function(target, args),
            Some(LiveValue::Helper(h)) => h.call(&args).map_err(Abort::Throw),
            Some(LiveValue::Regex(re)) => match arg(0) {
                Value::String(s) => Ok(Value::Bool(re.is_match(s))),
                other => Err(type_fault(format!("pattern applied to {other}"))),
            },
            Some(LiveValue::Format(f)) => Ok(Value::Bool(f(arg(0)))),
            Some(LiveValue::Keyword(f)) => Ok(Value::Bool(f(arg(0), arg(1)))),
            Some(LiveValue::Json(_)) => Err(type_fault(format!("{name} is not callable"))),
            Some(LiveValue::Forward(_)) => Err(RuntimeError::Malformed(format!("{name} was never resolved")).into()),
            None => Err(RuntimeError::Malformed(format!("unbound name {name}")).into()),
        }
    }
}

// -------------------------------- Values --------------------------------- //

fn type_fault(msg: String) -> Abort {
    Abort::Fault(RuntimeError::Type(msg))
}

fn local_mut<'a>(locals: &'a mut Locals, name: &Name) -> Exec<&'a mut Value> {
    locals.get_mut(name).ok_or_else(|| RuntimeError::Malformed(format!("unbound local {name}")).into())
}

fn lookup<'v>(base: &'v Value, key: &Value) -> Option<&'v Value> {
    match (base, key) {
        (Value::Object(m), Value::String(k)) => m.get(k),
        (Value::Object(m), Value::Number(n)) => m.get(&n.to_string()),
        (Value::Array(xs), Value::Number(n)) => n.as_u64().and_then(|i| xs.get(i as usize)),
        _ => None,
    }
}

fn truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn as_index(v: &Value) -> Exec<usize> {
    match v.as_f64() {
        Some(f) if f >= 0.0 => Ok(f as usize),
        _ => Err(type_fault(format!("{v} is not an index"))),
    }
}

/// Text used when a value is concatenated onto a string.
fn concat_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if !n.is_i64() && !n.is_u64() && f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
            _ => n.to_string(),
        },
        other => other.to_string(),
    }
}

fn number(f: f64) -> Value {
    if f.fract() == 0.0 && f.abs() < 9.0e15 {
        Value::from(f as i64)
    } else {
        Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
    }
}

fn binary(op: BinOp, a: &Value, b: &Value) -> Exec<Value> {
    let num = |v: &Value| v.as_f64().ok_or_else(|| type_fault(format!("{v} is not a number")));
    Ok(match op {
        BinOp::Eq => Value::Bool(strict_eq(a, b)),
        BinOp::Ne => Value::Bool(!strict_eq(a, b)),
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            let ord = match (a, b) {
                (Value::String(x), Value::String(y)) => x.partial_cmp(y),
                _ => num(a)?.partial_cmp(&num(b)?),
            };
            let Some(ord) = ord else { return Ok(Value::Bool(false)) };
            Value::Bool(match op {
                BinOp::Lt => ord.is_lt(),
                BinOp::Le => ord.is_le(),
                BinOp::Gt => ord.is_gt(),
                _ => ord.is_ge(),
            })
        }
        BinOp::Add if a.is_string() || b.is_string() => Value::String(concat_text(a) + &concat_text(b)),
        BinOp::Add => match (a.as_i64(), b.as_i64()) {
            (Some(x), Some(y)) => x.checked_add(y).map(Value::from).unwrap_or_else(|| number(x as f64 + y as f64)),
            _ => number(num(a)? + num(b)?),
        },
        BinOp::Sub => match (a.as_i64(), b.as_i64()) {
            (Some(x), Some(y)) => x.checked_sub(y).map(Value::from).unwrap_or_else(|| number(x as f64 - y as f64)),
            _ => number(num(a)? - num(b)?),
        },
        BinOp::Mul => number(num(a)? * num(b)?),
        BinOp::Div => number(num(a)? / num(b)?),
        BinOp::Rem => number(num(a)? % num(b)?),
    })
}

/// Primitives compare by value; containers are never strictly equal.
fn strict_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Array(_), _) | (Value::Object(_), _) => false,
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use indexmap::IndexMap;
    use serde_json::json;

    use super::*;
    use crate::codegen::CodeBuilder;
    use crate::runtime::Helper;

    fn module(functions: Vec<Function>, values: Vec<(Name, LiveValue)>) -> Module {
        let functions: IndexMap<_, _> = functions.into_iter().map(|f| (f.name.clone(), Rc::new(f))).collect();
        Module::new(functions, values, 16)
    }

    #[test]
    fn loops_break_and_return() {
        let f = Name::new("f").unwrap();
        let mut cg = CodeBuilder::new();
        cg.func(f.clone(), vec![], false);
        let total = cg.let_("total", Expr::lit(0));
        let i = cg.for_range("i", 0usize, 10usize);
        cg.if_(Expr::eq(&i, 4usize));
        cg.break_();
        cg.end_if();
        cg.add_assign(&total, &i);
        cg.end_for();
        cg.return_(&total);
        cg.end_func();
        let run = module(cg.finish(), vec![]).run(&f, vec![]).unwrap();
        assert_eq!(run.outcome.unwrap(), json!(6));
    }

    #[test]
    fn try_catch_binds_thrown_value() {
        let f = Name::new("f").unwrap();
        let mut cg = CodeBuilder::new();
        cg.func(f.clone(), vec![], false);
        cg.try_();
        cg.throw(Expr::Object(vec![("position".into(), Expr::lit(3))]));
        let e = cg.catch("e");
        cg.return_(Expr::var(&e).index("position"));
        cg.end_try();
        cg.end_func();
        let run = module(cg.finish(), vec![]).run(&f, vec![]).unwrap();
        assert_eq!(run.outcome.unwrap(), json!(3));
    }

    #[test]
    fn unbounded_recursion_is_a_fault() {
        let f = Name::new("f").unwrap();
        let body = vec![Stmt::Return(Expr::call(&f, vec![]))];
        let m = module(vec![Function { name: f.clone(), params: vec![], body, is_async: false }], vec![]);
        assert!(matches!(m.run(&f, vec![]), Err(RuntimeError::DepthExceeded(16))));
    }

    #[test]
    fn helpers_and_errors() {
        let f = Name::new("f").unwrap();
        let eq = Name::new("func0").unwrap();
        let body = vec![
            Stmt::AddError(Expr::lit(json!({"keyword": "x"}))),
            Stmt::Return(Expr::call(&eq, vec![Expr::lit(json!([1])), Expr::lit(json!([1.0]))])),
        ];
        let m = module(
            vec![Function { name: f.clone(), params: vec![], body, is_async: false }],
            vec![(eq, LiveValue::Helper(Helper::Equal))],
        );
        let run = m.run(&f, vec![]).unwrap();
        assert_eq!(run.outcome.unwrap(), json!(true));
        assert_eq!(run.errors.len(), 1);
    }

    #[test]
    fn missing_members_read_as_null() {
        assert_eq!(lookup(&json!({"a": 1}), &json!("b")), None);
        assert_eq!(binary(BinOp::Add, &json!("/a/"), &json!(3)).ok(), Some(json!("/a/3")));
        assert!(strict_eq(&json!(1), &json!(1.0)));
        assert!(!strict_eq(&json!([]), &json!([])));
    }
}
