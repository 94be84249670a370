//! Tree-walking interpreter: the conformance oracle for the VM.
//!
//! Evaluates the AST directly over reference-counted runtime objects. Its
//! observable behavior — output, error categories, truthiness, the
//! comparison convention (int 0 for true, null for false), and the live
//! prototype chain for slots and methods — matches the bytecode engine, so
//! any program can run through both and the outputs diffed.
//!
//! Name resolution mirrors the compiler's: local scopes innermost-first,
//! then the receiver's slot chain inside methods, then the globals. One
//! deliberate divergence is kept from the original runtime: `defn` inside
//! a nested scope binds locally here, while the compiler only registers
//! top-level functions.

use std::{cell::RefCell, rc::Rc};

use indexmap::IndexMap;

use crate::{
    ast::{Exp, ScopeStmt, SlotStmt},
    error::RuntimeError,
    io::PrintWriter,
};

/// A runtime value. Arrays and objects have shared identity, matching the
/// heap semantics of the VM.
#[derive(Clone)]
enum Obj<'ast> {
    Null,
    Int(i64),
    Array(Rc<RefCell<Vec<Obj<'ast>>>>),
    Object(Rc<ObjectData<'ast>>),
}

/// One object: an evaluated parent and its own slots, looked up live along
/// the parent chain.
struct ObjectData<'ast> {
    parent: Obj<'ast>,
    slots: RefCell<IndexMap<String, Entry<'ast>>>,
}

/// A binding: a variable's value or a function's code.
#[derive(Clone)]
enum Entry<'ast> {
    Var(Obj<'ast>),
    Code(CodeEntry<'ast>),
}

#[derive(Clone, Copy)]
struct CodeEntry<'ast> {
    params: &'ast [String],
    body: &'ast ScopeStmt,
}

impl<'ast> Obj<'ast> {
    /// Feeny truthiness: only null is false.
    fn is_truthy(&self) -> bool {
        !matches!(self, Self::Null)
    }

    fn from_bool(b: bool) -> Self {
        if b { Self::Int(0) } else { Self::Null }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Int(_) => "int",
            Self::Array(_) => "array",
            Self::Object(_) => "object",
        }
    }
}

/// What took an assignment: a plain binding (local or global) or a slot
/// reached through the implicit receiver.
enum AssignTarget {
    Binding,
    ReceiverSlot,
}

/// One function or method activation: a stack of visibility scopes over
/// the locals, plus the receiver for methods.
struct Activation<'ast> {
    scopes: Vec<IndexMap<String, Entry<'ast>>>,
    receiver: Option<Obj<'ast>>,
}

impl<'ast> Activation<'ast> {
    fn new(receiver: Option<Obj<'ast>>) -> Self {
        Self {
            scopes: vec![IndexMap::new()],
            receiver,
        }
    }
}

/// Runs a program against a print writer.
pub fn interpret(stmt: &ScopeStmt, print: &mut impl PrintWriter) -> Result<(), RuntimeError> {
    let mut interp = Interp {
        globals: IndexMap::new(),
        print,
    };
    let mut top = Activation::new(None);
    // The top-level scope declares globals rather than locals.
    top.scopes.clear();
    interp.exec(&mut top, stmt)?;
    Ok(())
}

struct Interp<'ast, 'io, P: PrintWriter> {
    globals: IndexMap<String, Entry<'ast>>,
    print: &'io mut P,
}

impl<'ast, P: PrintWriter> Interp<'ast, '_, P> {
    /// Executes a statement and yields its value.
    fn exec(&mut self, act: &mut Activation<'ast>, stmt: &'ast ScopeStmt) -> Result<Obj<'ast>, RuntimeError> {
        match stmt {
            ScopeStmt::Var { name, init } => {
                let value = self.eval(act, init)?;
                let entry = Entry::Var(value.clone());
                match act.scopes.last_mut() {
                    Some(scope) => {
                        scope.insert(name.clone(), entry);
                    }
                    None => {
                        self.globals.insert(name.clone(), entry);
                    }
                }
                // `var` is an expression statement: it yields the value,
                // matching the VM's peeking store.
                Ok(value)
            }
            ScopeStmt::Fn { name, args, body } => {
                let entry = Entry::Code(CodeEntry { params: args, body });
                match act.scopes.last_mut() {
                    Some(scope) => {
                        scope.insert(name.clone(), entry);
                    }
                    None => {
                        self.globals.insert(name.clone(), entry);
                    }
                }
                Ok(Obj::Null)
            }
            ScopeStmt::Seq { first, second } => {
                self.exec(act, first)?;
                self.exec(act, second)
            }
            ScopeStmt::Exp(e) => self.eval(act, e),
        }
    }

    /// Executes a block body in a fresh visibility scope.
    fn exec_block(&mut self, act: &mut Activation<'ast>, stmt: &'ast ScopeStmt) -> Result<Obj<'ast>, RuntimeError> {
        act.scopes.push(IndexMap::new());
        let result = self.exec(act, stmt);
        act.scopes.pop();
        result
    }

    fn eval(&mut self, act: &mut Activation<'ast>, exp: &'ast Exp) -> Result<Obj<'ast>, RuntimeError> {
        match exp {
            Exp::Int(v) => Ok(Obj::Int(*v)),
            Exp::Null => Ok(Obj::Null),
            Exp::Printf { format, args } => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    match self.eval(act, arg)? {
                        Obj::Int(v) => values.push(v),
                        other => {
                            return Err(RuntimeError::TypeError(format!(
                                "printf only accepts integers, found {}",
                                other.type_name()
                            )));
                        }
                    }
                }
                let mut out = String::with_capacity(format.len() + 8 * values.len());
                let mut next = 0;
                for ch in format.chars() {
                    if ch == '~' {
                        let value = values.get(next).ok_or_else(|| {
                            RuntimeError::TypeError("printf placeholder without argument".to_owned())
                        })?;
                        out.push_str(&value.to_string());
                        next += 1;
                    } else {
                        out.push(ch);
                    }
                }
                self.print.stdout_write(&out);
                Ok(Obj::Null)
            }
            Exp::Array { length, init } => {
                let length = match self.eval(act, length)? {
                    Obj::Int(v) => usize::try_from(v)
                        .map_err(|_| RuntimeError::TypeError("array length must not be negative".to_owned()))?,
                    other => {
                        return Err(RuntimeError::TypeError(format!(
                            "array length must be an integer, found {}",
                            other.type_name()
                        )));
                    }
                };
                let init = self.eval(act, init)?;
                Ok(Obj::Array(Rc::new(RefCell::new(vec![init; length]))))
            }
            Exp::Object { parent, slots } => {
                let parent = match parent {
                    Some(p) => self.eval(act, p)?,
                    None => Obj::Null,
                };
                let object = Rc::new(ObjectData {
                    parent,
                    slots: RefCell::new(IndexMap::new()),
                });
                for slot in slots {
                    match slot {
                        SlotStmt::Var { name, init } => {
                            // Initializers evaluate in the enclosing scope;
                            // the object under construction is not visible.
                            let value = self.eval(act, init)?;
                            object.slots.borrow_mut().insert(name.clone(), Entry::Var(value));
                        }
                        SlotStmt::Method { name, args, body } => {
                            object
                                .slots
                                .borrow_mut()
                                .insert(name.clone(), Entry::Code(CodeEntry { params: args, body }));
                        }
                    }
                }
                Ok(Obj::Object(object))
            }
            Exp::Slot { name, receiver } => {
                let receiver = self.eval(act, receiver)?;
                let Obj::Object(object) = receiver else {
                    return Err(RuntimeError::TypeError("slot access requires an object".to_owned()));
                };
                match lookup_slot(&object, name)? {
                    Some(Entry::Var(value)) => Ok(value),
                    // Methods are not variable slots; reading one as a
                    // value fails the same way the VM's slot lookup does.
                    Some(Entry::Code(_)) | None => Err(RuntimeError::UndefinedSlot(name.clone())),
                }
            }
            Exp::SetSlot { name, receiver, value } => {
                let receiver = self.eval(act, receiver)?;
                let Obj::Object(object) = receiver else {
                    return Err(RuntimeError::TypeError("slot access requires an object".to_owned()));
                };
                let value = self.eval(act, value)?;
                set_slot(&object, name, value)?;
                // Matches the bytecode discipline: a slot assignment
                // expression yields null.
                Ok(Obj::Null)
            }
            Exp::CallSlot { name, receiver, args } => self.call_slot(act, name, receiver, args),
            Exp::Call { name, args } => {
                let code = self
                    .find_code(act, name)
                    .ok_or_else(|| RuntimeError::UndefinedFunction(name.clone()))?;
                if code.params.len() != args.len() {
                    return Err(RuntimeError::WrongArity {
                        name: name.clone(),
                        expected: code.params.len(),
                        got: args.len(),
                    });
                }
                let mut callee = Activation::new(None);
                for (param, arg) in code.params.iter().zip(args) {
                    let value = self.eval(act, arg)?;
                    callee.scopes[0].insert(param.clone(), Entry::Var(value));
                }
                self.exec(&mut callee, code.body)
            }
            Exp::Set { name, value } => {
                let value = self.eval(act, value)?;
                match self.assign(act, name, value.clone())? {
                    // Local and global assignment yields the value (the
                    // VM's peeking stores); a write through the implicit
                    // receiver goes through SetSlot semantics and yields
                    // null.
                    AssignTarget::Binding => Ok(value),
                    AssignTarget::ReceiverSlot => Ok(Obj::Null),
                }
            }
            Exp::If { pred, conseq, alt } => {
                if self.eval(act, pred)?.is_truthy() {
                    self.exec_block(act, conseq)
                } else {
                    self.exec_block(act, alt)
                }
            }
            Exp::While { pred, body } => {
                while self.eval(act, pred)?.is_truthy() {
                    self.exec_block(act, body)?;
                }
                Ok(Obj::Null)
            }
            Exp::Ref(name) => self.reference(act, name),
        }
    }

    /// Looks up a name for reading: locals, then the receiver's slot
    /// chain, then globals.
    fn reference(&mut self, act: &Activation<'ast>, name: &str) -> Result<Obj<'ast>, RuntimeError> {
        for scope in act.scopes.iter().rev() {
            match scope.get(name) {
                Some(Entry::Var(value)) => return Ok(value.clone()),
                Some(Entry::Code(_)) => {
                    return Err(RuntimeError::TypeError(format!(
                        "cannot reference function '{name}' as a value"
                    )));
                }
                None => {}
            }
        }
        if let Some(Obj::Object(object)) = &act.receiver {
            if let Some(Entry::Var(value)) = lookup_slot(object, name)? {
                return Ok(value);
            }
        }
        match self.globals.get(name) {
            Some(Entry::Var(value)) => Ok(value.clone()),
            Some(Entry::Code(_)) => Err(RuntimeError::TypeError(format!(
                "cannot reference function '{name}' as a value"
            ))),
            None => Err(RuntimeError::UndefinedVariable(name.to_owned())),
        }
    }

    /// Assigns along the same chain as [`Interp::reference`]; reports
    /// which kind of target took the write.
    fn assign(
        &mut self,
        act: &mut Activation<'ast>,
        name: &str,
        value: Obj<'ast>,
    ) -> Result<AssignTarget, RuntimeError> {
        for scope in act.scopes.iter_mut().rev() {
            if let Some(entry) = scope.get_mut(name) {
                *entry = Entry::Var(value);
                return Ok(AssignTarget::Binding);
            }
        }
        if let Some(Obj::Object(object)) = &act.receiver {
            if lookup_slot(object, name)?.is_some() {
                set_slot(object, name, value)?;
                return Ok(AssignTarget::ReceiverSlot);
            }
        }
        if let Some(entry) = self.globals.get_mut(name) {
            *entry = Entry::Var(value);
            return Ok(AssignTarget::Binding);
        }
        Err(RuntimeError::UndefinedVariable(name.to_owned()))
    }

    /// Finds a callable: local scopes, then globals.
    fn find_code(&self, act: &Activation<'ast>, name: &str) -> Option<CodeEntry<'ast>> {
        for scope in act.scopes.iter().rev() {
            if let Some(Entry::Code(code)) = scope.get(name) {
                return Some(*code);
            }
        }
        match self.globals.get(name) {
            Some(Entry::Code(code)) => Some(*code),
            _ => None,
        }
    }

    fn call_slot(
        &mut self,
        act: &mut Activation<'ast>,
        name: &'ast str,
        receiver: &'ast Exp,
        args: &'ast [Exp],
    ) -> Result<Obj<'ast>, RuntimeError> {
        let receiver = self.eval(act, receiver)?;
        match receiver {
            Obj::Int(x) => {
                if args.len() != 1 {
                    return Err(RuntimeError::WrongArity {
                        name: name.to_owned(),
                        expected: 2,
                        got: args.len() + 1,
                    });
                }
                let Obj::Int(y) = self.eval(act, &args[0])? else {
                    return Err(RuntimeError::TypeError(format!(
                        "integer '{name}' needs an integer argument"
                    )));
                };
                int_primitive(name, x, y)
            }
            Obj::Array(elements) => self.array_primitive(act, name, &elements, args),
            Obj::Object(object) => {
                let Some(Entry::Code(code)) = lookup_slot(&object, name)? else {
                    return Err(RuntimeError::UndefinedMethod(name.to_owned()));
                };
                if code.params.len() != args.len() {
                    return Err(RuntimeError::WrongArity {
                        name: name.to_owned(),
                        expected: code.params.len() + 1,
                        got: args.len() + 1,
                    });
                }
                let mut callee = Activation::new(Some(Obj::Object(Rc::clone(&object))));
                callee.scopes[0].insert("this".to_owned(), Entry::Var(Obj::Object(Rc::clone(&object))));
                for (param, arg) in code.params.iter().zip(args) {
                    let value = self.eval(act, arg)?;
                    callee.scopes[0].insert(param.clone(), Entry::Var(value));
                }
                self.exec(&mut callee, code.body)
            }
            Obj::Null => Err(RuntimeError::TypeError("cannot invoke a method on null".to_owned())),
        }
    }

    fn array_primitive(
        &mut self,
        act: &mut Activation<'ast>,
        name: &str,
        elements: &Rc<RefCell<Vec<Obj<'ast>>>>,
        args: &'ast [Exp],
    ) -> Result<Obj<'ast>, RuntimeError> {
        match name {
            "get" => {
                if args.len() != 1 {
                    return Err(RuntimeError::WrongArity {
                        name: name.to_owned(),
                        expected: 2,
                        got: args.len() + 1,
                    });
                }
                let length = elements.borrow().len();
                let index = self.array_index(act, &args[0], length)?;
                Ok(elements.borrow()[index].clone())
            }
            "set" => {
                if args.len() != 2 {
                    return Err(RuntimeError::WrongArity {
                        name: name.to_owned(),
                        expected: 3,
                        got: args.len() + 1,
                    });
                }
                let length = elements.borrow().len();
                let index = self.array_index(act, &args[0], length)?;
                let value = self.eval(act, &args[1])?;
                elements.borrow_mut()[index] = value;
                Ok(Obj::Null)
            }
            "length" => {
                if !args.is_empty() {
                    return Err(RuntimeError::WrongArity {
                        name: name.to_owned(),
                        expected: 1,
                        got: args.len() + 1,
                    });
                }
                let length = elements.borrow().len();
                Ok(Obj::Int(i64::try_from(length).unwrap_or(i64::MAX)))
            }
            other => Err(RuntimeError::UndefinedMethod(other.to_owned())),
        }
    }

    fn array_index(
        &mut self,
        act: &mut Activation<'ast>,
        arg: &'ast Exp,
        length: usize,
    ) -> Result<usize, RuntimeError> {
        let Obj::Int(raw) = self.eval(act, arg)? else {
            return Err(RuntimeError::TypeError("array index must be an integer".to_owned()));
        };
        usize::try_from(raw)
            .ok()
            .filter(|&i| i < length)
            .ok_or(RuntimeError::IndexOutOfBounds { index: raw, length })
    }
}

/// Walks the prototype chain for a named slot.
fn lookup_slot<'ast>(object: &Rc<ObjectData<'ast>>, name: &str) -> Result<Option<Entry<'ast>>, RuntimeError> {
    let mut current = Rc::clone(object);
    loop {
        if let Some(entry) = current.slots.borrow().get(name) {
            return Ok(Some(entry.clone()));
        }
        match &current.parent {
            Obj::Null => return Ok(None),
            Obj::Object(parent) => {
                let parent = Rc::clone(parent);
                current = parent;
            }
            _ => return Err(RuntimeError::InvalidParent),
        }
    }
}

/// Writes a named variable slot wherever the chain declares it. Method
/// slots are not assignment targets, matching the VM's var-only layout.
fn set_slot<'ast>(object: &Rc<ObjectData<'ast>>, name: &str, value: Obj<'ast>) -> Result<(), RuntimeError> {
    let mut current = Rc::clone(object);
    loop {
        {
            let mut slots = current.slots.borrow_mut();
            if let Some(entry @ Entry::Var(_)) = slots.get_mut(name) {
                *entry = Entry::Var(value);
                return Ok(());
            }
        }
        match &current.parent {
            Obj::Null => return Err(RuntimeError::UndefinedSlot(name.to_owned())),
            Obj::Object(parent) => {
                let parent = Rc::clone(parent);
                current = parent;
            }
            _ => return Err(RuntimeError::InvalidParent),
        }
    }
}

fn int_primitive<'ast>(name: &str, x: i64, y: i64) -> Result<Obj<'ast>, RuntimeError> {
    let result = match name {
        "add" => Obj::Int(x.wrapping_add(y)),
        "sub" => Obj::Int(x.wrapping_sub(y)),
        "mul" => Obj::Int(x.wrapping_mul(y)),
        "div" => {
            if y == 0 {
                return Err(RuntimeError::DivideByZero);
            }
            Obj::Int(x.wrapping_div(y))
        }
        "mod" => {
            if y == 0 {
                return Err(RuntimeError::DivideByZero);
            }
            Obj::Int(x.wrapping_rem(y))
        }
        "lt" => Obj::from_bool(x < y),
        "gt" => Obj::from_bool(x > y),
        "le" => Obj::from_bool(x <= y),
        "ge" => Obj::from_bool(x >= y),
        "eq" => Obj::from_bool(x == y),
        other => return Err(RuntimeError::UndefinedMethod(other.to_owned())),
    };
    Ok(result)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{io::CollectStringPrint, parser::parse};

    fn run_source(source: &str) -> String {
        let ast = parse(source).expect("parse failed");
        let mut print = CollectStringPrint::new();
        interpret(&ast, &mut print).expect("interpret failed");
        print.into_output()
    }

    fn run_source_err(source: &str) -> RuntimeError {
        let ast = parse(source).expect("parse failed");
        let mut print = CollectStringPrint::new();
        interpret(&ast, &mut print).expect_err("expected failure")
    }

    #[test]
    fn test_hello_world() {
        assert_eq!(run_source("printf(\"hello world\\n\")\n"), "hello world\n");
    }

    #[test]
    fn test_arithmetic_and_printf() {
        assert_eq!(run_source("var x = 1 + 2\nprintf(\"~\\n\", x)\n"), "3\n");
    }

    #[test]
    fn test_fib() {
        let source = "defn fib(n):\n    if n < 2:\n        n\n    else:\n        fib(n-1) + fib(n-2)\nprintf(\"~\\n\", fib(10))\n";
        assert_eq!(run_source(source), "55\n");
    }

    #[test]
    fn test_arrays_share_identity() {
        let source = "var a = array(2, 0)\nvar b = a\nb[0] = 9\nprintf(\"~\\n\", a[0])\n";
        assert_eq!(run_source(source), "9\n");
    }

    #[test]
    fn test_prototype_chain() {
        let source = "\
var p = object:
    var x = 1
    method get_x():
        this.x
var c = object p:
    var y = 2
    method sum():
        this.get_x() + this.y
printf(\"~\\n\", c.sum())
";
        assert_eq!(run_source(source), "3\n");
    }

    #[test]
    fn test_while_and_globals() {
        let source = "var i = 0\nvar sum = 0\nwhile i < 5:\n    sum = sum + i\n    i = i + 1\nprintf(\"~\\n\", sum)\n";
        assert_eq!(run_source(source), "10\n");
    }

    #[test]
    fn test_block_locals_invisible_outside() {
        let err = run_source_err("if 0:\n    var t = 1\nprintf(\"~\\n\", t)\n");
        assert_eq!(err, RuntimeError::UndefinedVariable("t".to_owned()));
    }

    #[test]
    fn test_undefined_method() {
        let err = run_source_err("var o = object:\n    var x = 1\no.missing()\n");
        assert_eq!(err, RuntimeError::UndefinedMethod("missing".to_owned()));
    }

    #[test]
    fn test_divide_by_zero() {
        assert_eq!(run_source_err("1 / 0\n"), RuntimeError::DivideByZero);
    }

    #[test]
    fn test_array_bounds() {
        let err = run_source_err("var a = array(1, 0)\na[3]\n");
        assert_eq!(err, RuntimeError::IndexOutOfBounds { index: 3, length: 1 });
    }

    #[test]
    fn test_method_args_evaluate_in_caller_scope() {
        let source = "\
var o = object:
    var x = 10
    method add_to(n):
        this.x + n
var x = 5
printf(\"~\\n\", o.add_to(x))
";
        assert_eq!(run_source(source), "15\n");
    }
}
