//! Readable program text for compiled IR.
//!
//! The output is for inspection and snapshots only; modules are persisted as
//! serialized IR, never re-parsed from this text.
use std::fmt::{self, Display, Formatter, Write};

use serde_json::Value;

use super::code::{BinOp, Expr, Function, Stmt};
use super::scope::ValueCode;

const INDENT: &str = "  ";

impl Display for BinOp {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BinOp::Eq => "===",
            BinOp::Ne => "!==",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Rem => "%",
        })
    }
}

fn list(f: &mut Formatter<'_>, items: &[Expr], sep: &str) -> fmt::Result {
    for (i, x) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(sep)?;
        }
        write!(f, "{x}")?;
    }
    Ok(())
}

impl Display for Expr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Lit(v) => write!(f, "{v}"),
            Expr::Var(n) => write!(f, "{n}"),
            Expr::Index(a, k) => match k.as_ref() {
                Expr::Lit(Value::String(s)) if super::Name::new(s.as_str()).is_ok() => write!(f, "{a}.{s}"),
                _ => write!(f, "{a}[{k}]"),
            },
            Expr::Has(a, k) => write!(f, "({k} in {a})"),
            Expr::Not(a) => write!(f, "!{a}"),
            Expr::And(xs) => {
                f.write_str("(")?;
                list(f, xs, " && ")?;
                f.write_str(")")
            }
            Expr::Or(xs) => {
                f.write_str("(")?;
                list(f, xs, " || ")?;
                f.write_str(")")
            }
            Expr::Bin(op, a, b) => write!(f, "({a} {op} {b})"),
            Expr::TypeIs(a, t) => write!(f, "isType({a}, \"{t}\")"),
            Expr::Len(a) => write!(f, "{a}.length"),
            Expr::Slice { text, start, len } => write!(f, "{text}.substr({start}, {len})"),
            Expr::Call(c, args) => {
                write!(f, "{c}(")?;
                list(f, args, ", ")?;
                f.write_str(")")
            }
            Expr::Await(a) => write!(f, "(await {a})"),
            Expr::Object(members) => {
                f.write_str("{")?;
                for (i, (k, v)) in members.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {v}", Value::String(k.clone()))?;
                }
                f.write_str("}")
            }
            Expr::Array(items) => {
                f.write_str("[")?;
                list(f, items, ", ")?;
                f.write_str("]")
            }
            Expr::ErrorCount => f.write_str("errors"),
        }
    }
}

struct Printer<'w, W: Write> {
    out: &'w mut W,
    depth: usize,
}

impl<W: Write> Printer<'_, W> {
    fn line(&mut self, args: fmt::Arguments<'_>) -> fmt::Result {
        for _ in 0..self.depth {
            self.out.write_str(INDENT)?;
        }
        self.out.write_fmt(args)?;
        self.out.write_char('\n')
    }

    fn block(&mut self, body: &[Stmt]) -> fmt::Result {
        self.depth += 1;
        for s in body {
            self.stmt(s)?;
        }
        self.depth -= 1;
        Ok(())
    }

    fn stmt(&mut self, s: &Stmt) -> fmt::Result {
        match s {
            Stmt::Let { name, value: Some(v), constant } => {
                self.line(format_args!("{} {name} = {v};", if *constant { "const" } else { "let" }))
            }
            Stmt::Let { name, value: None, .. } => self.line(format_args!("let {name};")),
            Stmt::Assign { name, value } => self.line(format_args!("{name} = {value};")),
            Stmt::SetIndex { target, key, value } => self.line(format_args!("{target}[{key}] = {value};")),
            Stmt::Push { target, value } => self.line(format_args!("{target}.push({value});")),
            Stmt::Expr(e) => self.line(format_args!("{e};")),
            Stmt::If { cond, then, otherwise } => {
                self.line(format_args!("if ({cond}) {{"))?;
                self.block(then)?;
                let mut rest = otherwise;
                loop {
                    match rest.as_slice() {
                        [] => break,
                        [Stmt::If { cond, then, otherwise }] => {
                            self.line(format_args!("}} else if ({cond}) {{"))?;
                            self.block(then)?;
                            rest = otherwise;
                        }
                        body => {
                            self.line(format_args!("}} else {{"))?;
                            self.block(body)?;
                            break;
                        }
                    }
                }
                self.line(format_args!("}}"))
            }
            Stmt::ForRange { var, from, to, body } => {
                self.line(format_args!("for (let {var} = {from}; {var} < {to}; {var}++) {{"))?;
                self.block(body)?;
                self.line(format_args!("}}"))
            }
            Stmt::ForKeys { var, object, body } => {
                self.line(format_args!("for (const {var} in {object}) {{"))?;
                self.block(body)?;
                self.line(format_args!("}}"))
            }
            Stmt::ForEach { var, iterable, body } => {
                self.line(format_args!("for (const {var} of {iterable}) {{"))?;
                self.block(body)?;
                self.line(format_args!("}}"))
            }
            Stmt::Loop { body } => {
                self.line(format_args!("for (;;) {{"))?;
                self.block(body)?;
                self.line(format_args!("}}"))
            }
            Stmt::Break => self.line(format_args!("break;")),
            Stmt::Return(e) => self.line(format_args!("return {e};")),
            Stmt::Throw(e) => self.line(format_args!("throw {e};")),
            Stmt::Try { body, catch, finally } => {
                self.line(format_args!("try {{"))?;
                self.block(body)?;
                if let Some((name, handler)) = catch {
                    self.line(format_args!("}} catch ({name}) {{"))?;
                    self.block(handler)?;
                }
                if !finally.is_empty() {
                    self.line(format_args!("}} finally {{"))?;
                    self.block(finally)?;
                }
                self.line(format_args!("}}"))
            }
            Stmt::AddError(e) => self.line(format_args!("errors.push({e});")),
            Stmt::ResetErrors(e) => self.line(format_args!("errors.length = {e};")),
        }
    }
}

impl Display for Function {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let params = self.params.iter().map(|p| p.as_str()).collect::<Vec<_>>().join(", ");
        let kw = if self.is_async { "async function" } else { "function" };
        writeln!(f, "{kw} {}({params}) {{", self.name)?;
        let mut p = Printer { out: f, depth: 0 };
        p.block(&self.body)?;
        f.write_str("}\n")
    }
}

impl Display for ValueCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ValueCode::Json(v) => write!(f, "{v}"),
            ValueCode::Import(path) => write!(f, "require({})", Value::String(path.clone())),
            ValueCode::Regex(src) => write!(f, "new RegExp({}, \"u\")", Value::String(src.clone())),
            ValueCode::Function(n) => write!(f, "{n}"),
            ValueCode::Forward(s) => write!(f, "/* unresolved slot {} */ undefined", s.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::codegen::{CodeBuilder, Name};

    #[test]
    fn renders_else_if_chains_flat() {
        let mut cg = CodeBuilder::new();
        let data = Name::new("data").unwrap();
        cg.func(Name::new("f").unwrap(), vec![data.clone()], false);
        cg.if_(Expr::eq(Expr::var(&data).index("kind"), "a"));
        cg.return_(Expr::lit(1));
        cg.else_if(Expr::eq(Expr::var(&data).index("kind"), "b"));
        cg.return_(Expr::lit(2));
        cg.else_();
        cg.throw(Expr::lit(json!({"message": "x; doEvil()"})));
        cg.end_if();
        cg.end_func();
        let text = cg.finish()[0].to_string();
        assert_eq!(
            text,
            "function f(data) {\n  if ((data.kind === \"a\")) {\n    return 1;\n  } else if ((data.kind === \"b\")) {\n    \
             return 2;\n  } else {\n    throw {\"message\":\"x; doEvil()\"};\n  }\n}\n"
        );
    }
}
