//! The abstract syntax tree produced by the parser.
//!
//! A pure owned tree: expressions, scope statements (the bodies of files,
//! functions, and methods), and slot statements (the members of an `object`
//! literal). Operator syntax never reaches this tree — the parser desugars
//! `a + b` into `a.add(b)` and `a[i]` into `a.get(i)` — so the compiler and
//! the interpreter only ever see method calls.

/// An expression. Everything in Feeny is an expression, including `if` and
/// `while` (both evaluate to a value; `while` always evaluates to null).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exp {
    /// Integer literal.
    Int(i64),
    /// The null literal.
    Null,
    /// `printf(format, args...)`. The format is the decoded string (escape
    /// sequences already processed); each `~` splices one argument.
    Printf { format: String, args: Vec<Exp> },
    /// `array(length, init)`.
    Array { length: Box<Exp>, init: Box<Exp> },
    /// `object parent: slots...` — `parent` is absent for `object:`.
    Object { parent: Option<Box<Exp>>, slots: Vec<SlotStmt> },
    /// Variable slot read: `receiver.name`.
    Slot { name: String, receiver: Box<Exp> },
    /// Variable slot write: `receiver.name = value`.
    SetSlot {
        name: String,
        receiver: Box<Exp>,
        value: Box<Exp>,
    },
    /// Method call: `receiver.name(args...)`. Also the desugared form of
    /// every operator and of array indexing.
    CallSlot {
        name: String,
        receiver: Box<Exp>,
        args: Vec<Exp>,
    },
    /// Global function call: `name(args...)`.
    Call { name: String, args: Vec<Exp> },
    /// Assignment to a plain name: `name = value`.
    Set { name: String, value: Box<Exp> },
    /// `if pred: conseq else: alt`. A missing `else` parses as a null
    /// expression statement.
    If {
        pred: Box<Exp>,
        conseq: Box<ScopeStmt>,
        alt: Box<ScopeStmt>,
    },
    /// `while pred: body`.
    While { pred: Box<Exp>, body: Box<ScopeStmt> },
    /// A plain name reference.
    Ref(String),
}

/// A statement in a file, function, or method body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeStmt {
    /// `var name = init`.
    Var { name: String, init: Exp },
    /// `defn name(args...): body`.
    Fn {
        name: String,
        args: Vec<String>,
        body: Box<ScopeStmt>,
    },
    /// Two statements in sequence. Parsers fold statement lists into a
    /// right-leaning chain of these.
    Seq { first: Box<ScopeStmt>, second: Box<ScopeStmt> },
    /// An expression in statement position.
    Exp(Exp),
}

/// A member of an `object` literal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotStmt {
    /// `var name = init` — a variable slot.
    Var { name: String, init: Exp },
    /// `method name(args...): body` — a method slot. `this` is implicit and
    /// not part of `args`.
    Method {
        name: String,
        args: Vec<String>,
        body: ScopeStmt,
    },
}

impl ScopeStmt {
    /// Folds a parsed statement list into a `Seq` chain, mirroring how the
    /// tree is consumed recursively. An empty list is a null expression.
    #[must_use]
    pub fn sequence(mut stmts: Vec<Self>) -> Self {
        let Some(mut result) = stmts.pop() else {
            return Self::Exp(Exp::Null);
        };
        while let Some(stmt) = stmts.pop() {
            result = Self::Seq {
                first: Box::new(stmt),
                second: Box::new(result),
            };
        }
        result
    }
}
