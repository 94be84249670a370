//! Single-pass AST to bytecode compiler.
//!
//! The compiler walks the statement tree once, emitting instructions into
//! per-function code vectors and interning every literal, name, method, and
//! class shape into one deduplicated constant pool.
//!
//! # Name resolution
//!
//! A reference resolves, in order, against:
//!
//! 1. the current function's formal arguments and visible locals
//!    (innermost block first) — `GetLocal`;
//! 2. the chain of enclosing object contexts — a hit in the outermost
//!    context is a global (`GetGlobal`), any other hit is a slot of the
//!    object under construction, read through the implicit `this` in local
//!    slot 0 (`GetLocal 0` + `Slot`);
//! 3. nothing — a compile error.
//!
//! Assignments mirror the same search with `SetLocal` / `SetGlobal` /
//! `SetSlot`.
//!
//! # Stack discipline
//!
//! Every expression compiles to code that pushes exactly one word.
//! `SetLocal` and `SetGlobal` peek (assignment is an expression yielding
//! the assigned value); `SetSlot` pops, so slot assignments are followed by
//! a null literal. Statement sequencing drops the first statement's value;
//! a function body that produces no value gets a trailing null before
//! `Return`, so callers always find a result on the stack.
//!
//! # Locals
//!
//! All locals of a function share one contiguous index space after the
//! formal arguments. Nested `if`/`while` bodies open visibility blocks but
//! keep allocating from the same counter, so `nlocals` is simply the
//! counter's final value.

use ahash::AHashMap;
use indexmap::IndexMap;

use super::{
    code::{MethodValue, Program, Value},
    op::Instr,
};
use crate::{
    ast::{Exp, ScopeStmt, SlotStmt},
    error::CompileError,
};

/// Compiles a parsed program into bytecode and a constant pool.
pub fn compile(stmt: &ScopeStmt) -> Result<Program, CompileError> {
    let mut compiler = Compiler::new();
    let mut entry = FunctionCtx::new("entry", Vec::new(), true);
    let yields = compiler.scope(&mut entry, stmt)?;
    if !yields {
        compiler.emit_null_lit(&mut entry)?;
    }
    entry.code.push(Instr::Return);

    let name = compiler.add(Value::Str("entry".to_owned()))?;
    let entry_index = compiler.add(Value::Method(MethodValue {
        name,
        nargs: 0,
        nlocals: entry.nslots,
        code: entry.code,
        processed: false,
    }))?;

    let globals = compiler.object_contexts[0].slots.values().copied().collect();
    Ok(Program {
        values: compiler.pool,
        entry: entry_index,
        globals,
    })
}

/// Where a non-local name was found.
enum ObjVar {
    /// Declared in the outermost (global) object context.
    Global,
    /// Declared in an enclosing object literal.
    InstanceSlot,
}

/// Slots declared by one object literal (or, at index zero of the context
/// stack, the program's globals): name to pool index of the `Slot` or
/// `Method` value, in declaration order.
#[derive(Default)]
struct ObjectCtx {
    slots: IndexMap<String, u16>,
}

/// Compilation state of one function, method, or the top-level entry.
struct FunctionCtx {
    /// For error messages.
    name: String,
    code: Vec<Instr>,
    /// Formal arguments; for object methods, `this` is argument zero.
    args: Vec<String>,
    /// Visibility blocks of `(name, slot)`. Slots come from `nslots` and
    /// never recycle, so siblings do not alias.
    blocks: Vec<Vec<(String, u16)>>,
    /// Running local slot counter; its final value is the method's
    /// `nlocals`.
    nslots: u16,
    /// True only for the top-level scope, where `var` and `defn` declare
    /// globals rather than locals.
    is_global: bool,
}

impl FunctionCtx {
    fn new(name: &str, args: Vec<String>, is_global: bool) -> Self {
        Self {
            name: name.to_owned(),
            code: Vec::new(),
            args,
            blocks: vec![Vec::new()],
            nslots: 0,
            is_global,
        }
    }

    /// True when declarations here are global declarations.
    fn at_global_scope(&self) -> bool {
        self.is_global && self.blocks.len() == 1
    }

    /// Finds `name` among the arguments and visible locals and returns its
    /// frame slot index.
    fn find_local(&self, name: &str) -> Option<u16> {
        if let Some(i) = self.args.iter().position(|a| a == name) {
            return u16::try_from(i).ok();
        }
        let nargs = u16::try_from(self.args.len()).ok()?;
        for block in self.blocks.iter().rev() {
            if let Some((_, slot)) = block.iter().rev().find(|(n, _)| n == name) {
                return Some(nargs + slot);
            }
        }
        None
    }

    /// Declares a local in the current block and returns its frame slot.
    fn declare_local(&mut self, name: &str) -> Result<u16, CompileError> {
        let slot = self.nslots;
        self.nslots = self
            .nslots
            .checked_add(1)
            .ok_or_else(|| CompileError::TooManyLocals(self.name.clone()))?;
        let block = self.blocks.last_mut().expect("function context has no block");
        block.push((name.to_owned(), slot));
        let nargs = u16::try_from(self.args.len()).map_err(|_| CompileError::TooManyLocals(self.name.clone()))?;
        nargs
            .checked_add(slot)
            .ok_or_else(|| CompileError::TooManyLocals(self.name.clone()))
    }
}

struct Compiler {
    pool: Vec<Value>,
    /// Structural dedup: an equal value is never pooled twice.
    dedup: AHashMap<Value, u16>,
    /// Object-literal nesting; index zero is the global slot table.
    object_contexts: Vec<ObjectCtx>,
    label_counter: u32,
}

impl Compiler {
    fn new() -> Self {
        Self {
            pool: Vec::new(),
            dedup: AHashMap::new(),
            object_contexts: vec![ObjectCtx::default()],
            label_counter: 0,
        }
    }

    /// Interns a value, returning the stable index of its first occurrence.
    fn add(&mut self, value: Value) -> Result<u16, CompileError> {
        if let Some(&idx) = self.dedup.get(&value) {
            return Ok(idx);
        }
        let idx = u16::try_from(self.pool.len()).map_err(|_| CompileError::PoolOverflow)?;
        self.pool.push(value.clone());
        self.dedup.insert(value, idx);
        Ok(idx)
    }

    fn add_str(&mut self, s: &str) -> Result<u16, CompileError> {
        self.add(Value::Str(s.to_owned()))
    }

    /// Pools a fresh label name. The counter is program-wide, so label
    /// strings never collide between methods.
    fn fresh_label(&mut self) -> Result<u16, CompileError> {
        let name = format!("L{}", self.label_counter);
        self.label_counter += 1;
        self.add(Value::Str(name))
    }

    fn emit_null_lit(&mut self, f: &mut FunctionCtx) -> Result<(), CompileError> {
        let idx = self.add(Value::Null)?;
        f.code.push(Instr::Lit { idx });
        Ok(())
    }

    /// Searches the object-context chain for `name`.
    fn find_obj_var(&self, name: &str) -> Option<ObjVar> {
        for (depth, ctx) in self.object_contexts.iter().enumerate().rev() {
            if ctx.slots.contains_key(name) {
                return Some(if depth == 0 { ObjVar::Global } else { ObjVar::InstanceSlot });
            }
        }
        None
    }

    /// Registers a slot in the innermost object context, rejecting
    /// duplicates within that object.
    fn register_slot(&mut self, name: &str, pool_idx: u16) -> Result<(), CompileError> {
        let ctx = self.object_contexts.last_mut().expect("object context stack empty");
        if ctx.slots.contains_key(name) {
            return Err(CompileError::DuplicateSlot(name.to_owned()));
        }
        ctx.slots.insert(name.to_owned(), pool_idx);
        Ok(())
    }

    /// Compiles a statement; returns whether it left a value on the stack.
    fn scope(&mut self, f: &mut FunctionCtx, stmt: &ScopeStmt) -> Result<bool, CompileError> {
        match stmt {
            ScopeStmt::Var { name, init } => {
                if f.at_global_scope() {
                    let name_idx = self.add_str(name)?;
                    let slot_idx = self.add(Value::Slot { name: name_idx })?;
                    self.register_slot(name, slot_idx)?;
                    self.exp(f, init)?;
                    f.code.push(Instr::SetGlobal { name: name_idx });
                } else {
                    // Declared before the initializer compiles, so
                    // `var x = x` resolves to the (null) slot itself.
                    let idx = f.declare_local(name)?;
                    self.exp(f, init)?;
                    f.code.push(Instr::SetLocal { idx });
                }
                Ok(true)
            }
            ScopeStmt::Fn { name, args, body } => {
                let method_idx = self.compile_function(name, args, body, false)?;
                if f.at_global_scope() {
                    self.register_slot(name, method_idx)?;
                }
                Ok(false)
            }
            ScopeStmt::Seq { first, second } => {
                if self.scope(f, first)? {
                    f.code.push(Instr::Drop);
                }
                self.scope(f, second)
            }
            ScopeStmt::Exp(e) => {
                self.exp(f, e)?;
                Ok(true)
            }
        }
    }

    /// Compiles a `defn` or `method` body into a pooled `Method` value.
    fn compile_function(
        &mut self,
        name: &str,
        args: &[String],
        body: &ScopeStmt,
        with_receiver: bool,
    ) -> Result<u16, CompileError> {
        let mut formals = Vec::with_capacity(args.len() + usize::from(with_receiver));
        if with_receiver {
            formals.push("this".to_owned());
        }
        formals.extend(args.iter().cloned());
        let nargs = u8::try_from(formals.len()).map_err(|_| CompileError::TooManyArguments(name.to_owned()))?;

        let mut ctx = FunctionCtx::new(name, formals, false);
        if !self.scope(&mut ctx, body)? {
            self.emit_null_lit(&mut ctx)?;
        }
        ctx.code.push(Instr::Return);

        let name_idx = self.add_str(name)?;
        self.add(Value::Method(MethodValue {
            name: name_idx,
            nargs,
            nlocals: ctx.nslots,
            code: ctx.code,
            processed: false,
        }))
    }

    /// Compiles an expression; always leaves exactly one word on the stack.
    fn exp(&mut self, f: &mut FunctionCtx, e: &Exp) -> Result<(), CompileError> {
        match e {
            Exp::Int(v) => {
                let idx = self.add(Value::Int(*v))?;
                f.code.push(Instr::Lit { idx });
            }
            Exp::Null => self.emit_null_lit(f)?,
            Exp::Printf { format, args } => {
                for arg in args {
                    self.exp(f, arg)?;
                }
                let holes = format.matches('~').count();
                if holes != args.len() {
                    return Err(CompileError::PrintfArity {
                        format: format.clone(),
                        holes,
                        args: args.len(),
                    });
                }
                let arity =
                    u8::try_from(args.len()).map_err(|_| CompileError::TooManyArguments("printf".to_owned()))?;
                let format_idx = self.add_str(format)?;
                f.code.push(Instr::Printf {
                    format: format_idx,
                    arity,
                });
                // printf is a null-valued expression.
                self.emit_null_lit(f)?;
            }
            Exp::Array { length, init } => {
                self.exp(f, length)?;
                self.exp(f, init)?;
                f.code.push(Instr::Array);
            }
            Exp::Object { parent, slots } => self.object(f, parent.as_deref(), slots)?,
            Exp::Slot { name, receiver } => {
                self.exp(f, receiver)?;
                let name_idx = self.add_str(name)?;
                f.code.push(Instr::Slot { name: name_idx });
            }
            Exp::SetSlot { name, receiver, value } => {
                self.exp(f, receiver)?;
                self.exp(f, value)?;
                let name_idx = self.add_str(name)?;
                f.code.push(Instr::SetSlot { name: name_idx });
                self.emit_null_lit(f)?;
            }
            Exp::CallSlot { name, receiver, args } => {
                self.exp(f, receiver)?;
                for arg in args {
                    self.exp(f, arg)?;
                }
                let arity =
                    u8::try_from(args.len() + 1).map_err(|_| CompileError::TooManyArguments(name.clone()))?;
                let name_idx = self.add_str(name)?;
                f.code.push(Instr::CallSlot { name: name_idx, arity });
            }
            Exp::Call { name, args } => {
                for arg in args {
                    self.exp(f, arg)?;
                }
                let arity = u8::try_from(args.len()).map_err(|_| CompileError::TooManyArguments(name.clone()))?;
                let name_idx = self.add_str(name)?;
                f.code.push(Instr::Call { name: name_idx, arity });
            }
            Exp::Set { name, value } => self.assignment(f, name, value)?,
            Exp::If { pred, conseq, alt } => {
                let conseq_label = self.fresh_label()?;
                let end_label = self.fresh_label()?;

                self.exp(f, pred)?;
                f.code.push(Instr::Branch { target: conseq_label });

                self.branch_body(f, alt)?;
                f.code.push(Instr::Goto { target: end_label });

                f.code.push(Instr::Label { name: conseq_label });
                self.branch_body(f, conseq)?;
                f.code.push(Instr::Label { name: end_label });
            }
            Exp::While { pred, body } => {
                let cond_label = self.fresh_label()?;
                let body_label = self.fresh_label()?;

                f.code.push(Instr::Goto { target: cond_label });
                f.code.push(Instr::Label { name: body_label });

                f.blocks.push(Vec::new());
                if self.scope(f, body)? {
                    f.code.push(Instr::Drop);
                }
                f.blocks.pop();

                f.code.push(Instr::Label { name: cond_label });
                self.exp(f, pred)?;
                f.code.push(Instr::Branch { target: body_label });

                // A while loop evaluates to null.
                self.emit_null_lit(f)?;
            }
            Exp::Ref(name) => {
                if let Some(idx) = f.find_local(name) {
                    f.code.push(Instr::GetLocal { idx });
                } else {
                    match self.find_obj_var(name) {
                        Some(ObjVar::Global) => {
                            let name_idx = self.add_str(name)?;
                            f.code.push(Instr::GetGlobal { name: name_idx });
                        }
                        Some(ObjVar::InstanceSlot) => {
                            let name_idx = self.add_str(name)?;
                            f.code.push(Instr::GetLocal { idx: 0 });
                            f.code.push(Instr::Slot { name: name_idx });
                        }
                        None => return Err(CompileError::UndefinedVariable(name.clone())),
                    }
                }
            }
        }
        Ok(())
    }

    /// Compiles one arm of an `if`, guaranteeing exactly one result word.
    fn branch_body(&mut self, f: &mut FunctionCtx, body: &ScopeStmt) -> Result<(), CompileError> {
        f.blocks.push(Vec::new());
        let yields = self.scope(f, body)?;
        f.blocks.pop();
        if !yields {
            self.emit_null_lit(f)?;
        }
        Ok(())
    }

    /// Compiles `name = value` against the resolution chain.
    fn assignment(&mut self, f: &mut FunctionCtx, name: &str, value: &Exp) -> Result<(), CompileError> {
        if let Some(idx) = f.find_local(name) {
            self.exp(f, value)?;
            f.code.push(Instr::SetLocal { idx });
            return Ok(());
        }
        match self.find_obj_var(name) {
            Some(ObjVar::Global) => {
                self.exp(f, value)?;
                let name_idx = self.add_str(name)?;
                f.code.push(Instr::SetGlobal { name: name_idx });
                Ok(())
            }
            Some(ObjVar::InstanceSlot) => {
                f.code.push(Instr::GetLocal { idx: 0 });
                self.exp(f, value)?;
                let name_idx = self.add_str(name)?;
                f.code.push(Instr::SetSlot { name: name_idx });
                self.emit_null_lit(f)?;
                Ok(())
            }
            None => Err(CompileError::UndefinedVariable(name.to_owned())),
        }
    }

    /// Compiles an object literal.
    ///
    /// Stack shape fed to the `Object` instruction: parent first, then one
    /// initializer word per variable slot in declaration order. Initializer
    /// expressions compile in the enclosing context — the object under
    /// construction is not in scope inside its own initializers, only
    /// inside its method bodies.
    fn object(&mut self, f: &mut FunctionCtx, parent: Option<&Exp>, slots: &[SlotStmt]) -> Result<(), CompileError> {
        match parent {
            Some(p) => self.exp(f, p)?,
            None => self.emit_null_lit(f)?,
        }

        self.object_contexts.push(ObjectCtx::default());
        let result = self.object_slots(slots);
        let class_slots: Vec<u16> = self
            .object_contexts
            .last()
            .expect("object context stack empty")
            .slots
            .values()
            .copied()
            .collect();
        self.object_contexts.pop();
        result?;

        let class_idx = self.add(Value::Class { slots: class_slots })?;

        for slot in slots {
            if let SlotStmt::Var { init, .. } = slot {
                self.exp(f, init)?;
            }
        }

        f.code.push(Instr::Object { class: class_idx });
        Ok(())
    }

    /// Registers the slots of an object literal and compiles its methods.
    fn object_slots(&mut self, slots: &[SlotStmt]) -> Result<(), CompileError> {
        for slot in slots {
            match slot {
                SlotStmt::Var { name, .. } => {
                    let name_idx = self.add_str(name)?;
                    let slot_idx = self.add(Value::Slot { name: name_idx })?;
                    self.register_slot(name, slot_idx)?;
                }
                SlotStmt::Method { name, args, body } => {
                    let method_idx = self.compile_function(name, args, body, true)?;
                    self.register_slot(name, method_idx)?;
                }
            }
        }
        Ok(())
    }
}
