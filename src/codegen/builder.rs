//! Structured, block-scoped program assembler.
//!
//! Every opener pushes a frame, every closer pops it after checking its kind.
//! An imbalance is a defect in whatever is emitting code (usually a keyword),
//! never a property of the schema, so it panics instead of returning an error.
use std::fmt;

use super::code::{Expr, Function, Stmt};
use super::name::Name;
use super::scope::Scope;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockKind {
    If,
    For,
    Func,
    Try,
}

impl fmt::Display for BlockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BlockKind::If => "if",
            BlockKind::For => "for",
            BlockKind::Func => "func",
            BlockKind::Try => "try",
        };
        f.write_str(s)
    }
}

enum ForHead {
    Range { var: Name, from: Expr, to: Expr },
    Keys { var: Name, object: Expr },
    Each { var: Name, iterable: Expr },
    Loop,
}

enum Frame {
    If { arms: Vec<(Expr, Vec<Stmt>)>, otherwise: Option<Vec<Stmt>> },
    For { head: ForHead, body: Vec<Stmt> },
    Func { name: Name, params: Vec<Name>, is_async: bool, body: Vec<Stmt> },
    Try { body: Vec<Stmt>, catch: Option<(Name, Vec<Stmt>)>, finally: Option<Vec<Stmt>> },
}

impl Frame {
    fn kind(&self) -> BlockKind {
        match self {
            Frame::If { .. } => BlockKind::If,
            Frame::For { .. } => BlockKind::For,
            Frame::Func { .. } => BlockKind::Func,
            Frame::Try { .. } => BlockKind::Try,
        }
    }

    fn active(&mut self) -> &mut Vec<Stmt> {
        match self {
            Frame::If { otherwise: Some(body), .. } => body,
            Frame::If { arms, .. } => match arms.last_mut() {
                Some((_, body)) => body,
                None => unreachable!("if frame always has an arm"),
            },
            Frame::For { body, .. } | Frame::Func { body, .. } => body,
            Frame::Try { finally: Some(body), .. } => body,
            Frame::Try { catch: Some((_, body)), .. } => body,
            Frame::Try { body, .. } => body,
        }
    }
}

pub struct CodeBuilder {
    scope: Scope,
    root: Vec<Stmt>,
    stack: Vec<Frame>,
    block_starts: Vec<usize>,
    functions: Vec<Function>,
}

impl Default for CodeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CodeBuilder {
    pub fn new() -> Self {
        CodeBuilder {
            scope: Scope::new(),
            root: Vec::new(),
            stack: Vec::new(),
            block_starts: Vec::new(),
            functions: Vec::new(),
        }
    }

    /// Allocate a fresh local name, unique within this builder.
    pub fn name(&mut self, prefix: &str) -> Name {
        self.scope.name(prefix)
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    fn current(&mut self) -> &mut Vec<Stmt> {
        match self.stack.last_mut() {
            Some(frame) => frame.active(),
            None => &mut self.root,
        }
    }

    fn emit(&mut self, s: Stmt) -> &mut Self {
        self.current().push(s);
        self
    }

    // ----------------------------- Statements ---------------------------- //

    pub fn let_(&mut self, prefix: &str, value: impl Into<Option<Expr>>) -> Name {
        let name = self.name(prefix);
        self.emit(Stmt::Let { name: name.clone(), value: value.into(), constant: false });
        name
    }

    pub fn const_(&mut self, prefix: &str, value: Expr) -> Name {
        let name = self.name(prefix);
        self.emit(Stmt::Let { name: name.clone(), value: Some(value), constant: true });
        name
    }

    pub fn assign(&mut self, name: &Name, value: impl Into<Expr>) -> &mut Self {
        self.emit(Stmt::Assign { name: name.clone(), value: value.into() })
    }

    /// `name = name + n`
    pub fn add_assign(&mut self, name: &Name, n: impl Into<Expr>) -> &mut Self {
        self.assign(name, Expr::add(name, n))
    }

    pub fn set_index(&mut self, target: &Name, key: impl Into<Expr>, value: impl Into<Expr>) -> &mut Self {
        self.emit(Stmt::SetIndex { target: target.clone(), key: key.into(), value: value.into() })
    }

    pub fn push(&mut self, target: &Name, value: impl Into<Expr>) -> &mut Self {
        self.emit(Stmt::Push { target: target.clone(), value: value.into() })
    }

    pub fn code(&mut self, e: Expr) -> &mut Self {
        self.emit(Stmt::Expr(e))
    }

    pub fn break_(&mut self) -> &mut Self {
        self.emit(Stmt::Break)
    }

    pub fn return_(&mut self, e: impl Into<Expr>) -> &mut Self {
        self.emit(Stmt::Return(e.into()))
    }

    pub fn throw(&mut self, e: Expr) -> &mut Self {
        self.emit(Stmt::Throw(e))
    }

    pub fn add_error(&mut self, record: Expr) -> &mut Self {
        self.emit(Stmt::AddError(record))
    }

    pub fn reset_errors(&mut self, count: impl Into<Expr>) -> &mut Self {
        self.emit(Stmt::ResetErrors(count.into()))
    }

    // ---------------------------- Conditionals --------------------------- //

    pub fn if_(&mut self, cond: Expr) -> &mut Self {
        self.stack.push(Frame::If { arms: vec![(cond, Vec::new())], otherwise: None });
        self
    }

    pub fn else_if(&mut self, cond: Expr) -> &mut Self {
        match self.stack.last_mut() {
            Some(Frame::If { arms, otherwise: None }) => arms.push((cond, Vec::new())),
            other => panic!("CodeBuilder: else-if without if (top: {})", describe(other.map(|f| f.kind()))),
        }
        self
    }

    pub fn else_(&mut self) -> &mut Self {
        match self.stack.last_mut() {
            Some(Frame::If { otherwise: otherwise @ None, .. }) => *otherwise = Some(Vec::new()),
            other => panic!("CodeBuilder: else without if (top: {})", describe(other.map(|f| f.kind()))),
        }
        self
    }

    pub fn end_if(&mut self) -> &mut Self {
        self.close(BlockKind::If)
    }

    // ------------------------------- Loops ------------------------------- //

    /// `for (var = from; var < to; var++)`
    pub fn for_range(&mut self, prefix: &str, from: impl Into<Expr>, to: impl Into<Expr>) -> Name {
        let var = self.name(prefix);
        let head = ForHead::Range { var: var.clone(), from: from.into(), to: to.into() };
        self.stack.push(Frame::For { head, body: Vec::new() });
        var
    }

    /// `for (var in object)`
    pub fn for_keys(&mut self, prefix: &str, object: impl Into<Expr>) -> Name {
        let var = self.name(prefix);
        let head = ForHead::Keys { var: var.clone(), object: object.into() };
        self.stack.push(Frame::For { head, body: Vec::new() });
        var
    }

    /// `for (var of iterable)`
    pub fn for_each(&mut self, prefix: &str, iterable: impl Into<Expr>) -> Name {
        let var = self.name(prefix);
        let head = ForHead::Each { var: var.clone(), iterable: iterable.into() };
        self.stack.push(Frame::For { head, body: Vec::new() });
        var
    }

    /// `for (;;)`
    pub fn loop_(&mut self) -> &mut Self {
        self.stack.push(Frame::For { head: ForHead::Loop, body: Vec::new() });
        self
    }

    pub fn end_for(&mut self) -> &mut Self {
        self.close(BlockKind::For)
    }

    // ----------------------------- Functions ----------------------------- //

    pub fn func(&mut self, name: Name, params: Vec<Name>, is_async: bool) -> &mut Self {
        if !self.stack.is_empty() {
            panic!("CodeBuilder: functions must be defined at top level (open: {})", self.stack.len());
        }
        self.stack.push(Frame::Func { name, params, is_async, body: Vec::new() });
        self
    }

    pub fn end_func(&mut self) -> &mut Self {
        self.close(BlockKind::Func)
    }

    // -------------------------------- Try -------------------------------- //

    pub fn try_(&mut self) -> &mut Self {
        self.stack.push(Frame::Try { body: Vec::new(), catch: None, finally: None });
        self
    }

    pub fn catch(&mut self, prefix: &str) -> Name {
        let name = self.name(prefix);
        match self.stack.last_mut() {
            Some(Frame::Try { catch: catch @ None, finally: None, .. }) => {
                *catch = Some((name.clone(), Vec::new()))
            }
            other => panic!("CodeBuilder: catch without try (top: {})", describe(other.map(|f| f.kind()))),
        }
        name
    }

    pub fn finally(&mut self) -> &mut Self {
        match self.stack.last_mut() {
            Some(Frame::Try { finally: finally @ None, .. }) => *finally = Some(Vec::new()),
            other => panic!("CodeBuilder: finally without try (top: {})", describe(other.map(|f| f.kind()))),
        }
        self
    }

    pub fn end_try(&mut self) -> &mut Self {
        self.close(BlockKind::Try)
    }

    // ------------------------ Self-balancing blocks ---------------------- //

    /// Mark the current depth; a later `end_block` closes everything opened since.
    pub fn block(&mut self) -> &mut Self {
        self.block_starts.push(self.stack.len());
        self
    }

    /// Close every construct opened since the matching `block()`. With
    /// `Some(n)`, exactly `n` constructs must be open, otherwise this panics.
    pub fn end_block(&mut self, expected: Option<usize>) -> &mut Self {
        let Some(start) = self.block_starts.pop() else {
            panic!("CodeBuilder: end_block outside of a self-balancing block");
        };
        if self.stack.len() < start {
            panic!("CodeBuilder: block closed past its start ({} < {start})", self.stack.len());
        }
        let to_close = self.stack.len() - start;
        if let Some(n) = expected {
            if n != to_close {
                panic!("CodeBuilder: wrong number of open constructs: {to_close} vs {n} expected");
            }
        }
        for _ in 0..to_close {
            let kind = self.stack.last().map(|f| f.kind()).unwrap_or(BlockKind::If);
            self.close(kind);
        }
        self
    }

    fn close(&mut self, kind: BlockKind) -> &mut Self {
        let found = self.stack.last().map(|f| f.kind());
        if found != Some(kind) {
            panic!("CodeBuilder: expected to close {kind}, found {}", describe(found));
        }
        if let Some(start) = self.block_starts.last() {
            if self.stack.len() <= *start {
                panic!("CodeBuilder: closing {kind} would cross a self-balancing block boundary");
            }
        }
        let Some(frame) = self.stack.pop() else { unreachable!() };
        let stmt = match frame {
            Frame::If { arms, otherwise } => {
                let mut acc = otherwise.unwrap_or_default();
                for (cond, then) in arms.into_iter().rev() {
                    acc = vec![Stmt::If { cond, then, otherwise: acc }];
                }
                acc.pop()
            }
            Frame::For { head, body } => Some(match head {
                ForHead::Range { var, from, to } => Stmt::ForRange { var, from, to, body },
                ForHead::Keys { var, object } => Stmt::ForKeys { var, object, body },
                ForHead::Each { var, iterable } => Stmt::ForEach { var, iterable, body },
                ForHead::Loop => Stmt::Loop { body },
            }),
            Frame::Func { name, params, is_async, body } => {
                self.functions.push(Function { name, params, body, is_async });
                None
            }
            Frame::Try { body, catch, finally } => {
                Some(Stmt::Try { body, catch, finally: finally.unwrap_or_default() })
            }
        };
        if let Some(stmt) = stmt {
            self.current().push(stmt);
        }
        self
    }

    /// Consume the builder, returning the functions it built.
    ///
    /// # Panics
    ///
    /// If any block is still open or statements were emitted outside a function.
    pub fn finish(self) -> Vec<Function> {
        if let Some(frame) = self.stack.last() {
            panic!("CodeBuilder: finished with {} open block(s), innermost {}", self.stack.len(), frame.kind());
        }
        if !self.block_starts.is_empty() {
            panic!("CodeBuilder: finished inside a self-balancing block");
        }
        if !self.root.is_empty() {
            panic!("CodeBuilder: {} statement(s) emitted outside any function", self.root.len());
        }
        self.functions
    }
}

fn describe(kind: Option<BlockKind>) -> String {
    kind.map(|k| k.to_string()).unwrap_or_else(|| "empty stack".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder_with_func() -> CodeBuilder {
        let mut cg = CodeBuilder::new();
        cg.func(Name::new("f").unwrap(), vec![], false);
        cg
    }

    #[test]
    fn builds_nested_if_else_chain() {
        let mut cg = builder_with_func();
        let x = cg.let_("x", Expr::lit(1));
        cg.if_(Expr::eq(&x, 1usize));
        cg.return_(Expr::str("one"));
        cg.else_if(Expr::eq(&x, 2usize));
        cg.return_(Expr::str("two"));
        cg.else_();
        cg.return_(Expr::str("many"));
        cg.end_if();
        cg.end_func();
        let funcs = cg.finish();
        assert_eq!(funcs.len(), 1);
        let Stmt::If { otherwise, .. } = &funcs[0].body[1] else { panic!("expected if") };
        assert!(matches!(&otherwise[0], Stmt::If { otherwise, .. } if otherwise.len() == 1));
    }

    #[test]
    fn names_are_unique_per_prefix() {
        let mut cg = CodeBuilder::new();
        let a = cg.name("valid");
        let b = cg.name("valid");
        let c = cg.name("errs");
        assert_eq!((a.as_str(), b.as_str(), c.as_str()), ("valid0", "valid1", "errs0"));
    }

    #[test]
    #[should_panic(expected = "expected to close if, found for")]
    fn closing_wrong_kind_is_fatal() {
        let mut cg = builder_with_func();
        cg.if_(Expr::bool(true));
        cg.loop_();
        cg.end_if();
    }

    #[test]
    #[should_panic(expected = "expected to close for, found func")]
    fn closing_more_than_opened_is_fatal() {
        let mut cg = builder_with_func();
        cg.loop_();
        cg.end_for();
        cg.end_for();
    }

    #[test]
    #[should_panic(expected = "expected to close if, found empty stack")]
    fn closing_on_empty_stack_is_fatal() {
        CodeBuilder::new().end_if();
    }

    #[test]
    #[should_panic(expected = "open block")]
    fn finishing_unbalanced_is_fatal() {
        let mut cg = builder_with_func();
        cg.if_(Expr::bool(true));
        cg.finish();
    }

    #[test]
    fn end_block_closes_exactly_n() {
        let mut cg = builder_with_func();
        cg.block();
        cg.if_(Expr::bool(true));
        cg.if_(Expr::bool(false));
        cg.end_block(Some(2));
        cg.end_func();
        assert_eq!(cg.finish()[0].body.len(), 1);
    }

    #[test]
    #[should_panic(expected = "wrong number of open constructs: 1 vs 2 expected")]
    fn end_block_checks_count() {
        let mut cg = builder_with_func();
        cg.block();
        cg.if_(Expr::bool(true));
        cg.end_block(Some(2));
    }

    #[test]
    fn try_catch_finally() {
        let mut cg = builder_with_func();
        cg.try_();
        cg.throw(Expr::str("boom"));
        let e = cg.catch("e");
        cg.return_(&e);
        cg.finally();
        cg.end_try();
        cg.end_func();
        let funcs = cg.finish();
        assert!(matches!(&funcs[0].body[0], Stmt::Try { catch: Some(_), .. }));
    }
}
