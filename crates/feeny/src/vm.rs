//! The bytecode virtual machine.
//!
//! A stack machine: one shared operand stack of tagged words, a vector of
//! call frames (each owning its locals), and an instruction pointer into
//! the current frame's method. Dispatch is a single loop over the
//! instruction enum; call instructions push a frame and restart the loop at
//! offset zero, `Return` pops a frame and resumes at the saved address, and
//! execution halts when the entry frame returns.
//!
//! Method dispatch on objects walks the receiver's parent chain through the
//! template class table, with a `(type, name)` cache in front of the walk.
//! Integer and array receivers never reach the tables — their operations
//! are handled inline (§ *primitives* below).
//!
//! Allocation routes through [`Machine::gc_alloc`], which owns the
//! collection and growth policy. Handlers keep every live pointer on the
//! operand stack across allocations so the collector's root scan sees it;
//! the `Array` handler re-pushes its initializer for exactly this reason,
//! and the `Object` handler allocates before popping its initializers.

use std::iter;

use ahash::AHashMap;
use smallvec::SmallVec;

use crate::{
    bytecode::{Instr, Program, Value},
    classes::{ARRAY_TYPE, ClassTable, GLOBAL_TYPE, OBJECT_TYPE},
    error::RuntimeError,
    heap::{DEFAULT_SEMI_WORDS, Heap, HeapStats},
    io::PrintWriter,
    tracer::{NoopTracer, VmTracer},
    value::Word,
};

/// Refuse single allocations beyond this many words; a request this large
/// is a runaway program, not a working set.
const MAX_ALLOC_WORDS: usize = 1 << 32;

/// One activation record.
#[derive(Debug)]
struct Frame {
    /// Pool index of the executing method.
    method: u16,
    /// Instruction offset in the caller to resume at.
    return_address: usize,
    /// Arguments followed by declared locals; all start as null.
    locals: Vec<Word>,
}

/// What an array primitive should do, decided while the method name is
/// borrowed and executed after the borrow ends.
enum ArrayOp {
    Get,
    Set,
    Length,
}

/// The virtual machine.
pub struct Machine<'io, P: PrintWriter, T: VmTracer = NoopTracer> {
    program: Program,
    classes: ClassTable,
    heap: Heap,
    /// Tagged pointer to the global prototype object.
    global: Word,
    stack: Vec<Word>,
    frames: Vec<Frame>,
    ip: usize,
    /// Method dispatch cache: receiver type and name pool index to method
    /// pool index. Purely an optimization; behavior is identical without it.
    dispatch_cache: AHashMap<(i64, u16), u16>,
    print: &'io mut P,
    tracer: T,
}

impl<'io, P: PrintWriter, T: VmTracer> Machine<'io, P, T> {
    /// Initializes a machine with the default heap size.
    pub fn new(program: Program, print: &'io mut P, tracer: T) -> Result<Self, RuntimeError> {
        Self::with_heap_size(program, DEFAULT_SEMI_WORDS, print, tracer)
    }

    /// Initializes a machine: builds the template class table, maps the
    /// heap, allocates the global prototype, and pushes the entry frame.
    pub fn with_heap_size(
        program: Program,
        semi_words: usize,
        print: &'io mut P,
        tracer: T,
    ) -> Result<Self, RuntimeError> {
        let classes = ClassTable::build(&program)?;
        let mut machine = Self {
            program,
            classes,
            heap: Heap::new(semi_words),
            global: Word::NULL,
            stack: Vec::new(),
            frames: Vec::new(),
            ip: 0,
            dispatch_cache: AHashMap::new(),
            print,
            tracer,
        };

        let nvars = machine.classes.by_type(GLOBAL_TYPE).map_or(0, |t| t.nvars());
        let base = machine.gc_alloc(2 + nvars)?;
        machine.heap.set(base, GLOBAL_TYPE);
        machine.heap.set(base + 1, Word::NULL.raw());
        for i in 0..nvars {
            machine.heap.set(base + 2 + i, Word::NULL.raw());
        }
        machine.global = Heap::word_at(base);

        let entry = machine.program.entry;
        machine.push_frame(entry)?;
        Ok(machine)
    }

    /// Runs the program to completion.
    pub fn run(&mut self) -> Result<(), RuntimeError> {
        loop {
            let Some(frame) = self.frames.last() else {
                return Ok(());
            };
            let method_idx = frame.method;
            let method = self.program.method_at(method_idx)?;
            let Some(&instr) = method.code.get(self.ip) else {
                return Err(RuntimeError::CodeOutOfBounds {
                    ip: self.ip,
                    len: method.code.len(),
                });
            };
            self.tracer
                .on_instruction(self.ip, &instr, self.stack.len(), self.frames.len());

            match instr {
                Instr::Label { .. } => {}
                Instr::Lit { idx } => self.op_lit(idx)?,
                Instr::Printf { format, arity } => self.op_printf(format, arity)?,
                Instr::Array => self.op_array()?,
                Instr::Object { class } => self.op_object(class)?,
                Instr::Slot { name } => self.op_slot(name)?,
                Instr::SetSlot { name } => self.op_set_slot(name)?,
                Instr::CallSlot { name, arity } => {
                    if self.op_call_slot(name, arity)? {
                        // A frame was pushed; dispatch from its first
                        // instruction.
                        continue;
                    }
                }
                Instr::Call { name, arity } => {
                    self.op_call(name, arity)?;
                    continue;
                }
                Instr::GetLocal { idx } => self.op_get_local(idx)?,
                Instr::SetLocal { idx } => self.op_set_local(idx)?,
                Instr::GetGlobal { name } => self.op_get_global(name)?,
                Instr::SetGlobal { name } => self.op_set_global(name)?,
                Instr::Branch { target } => {
                    if self.pop()?.is_truthy() {
                        self.ip = target as usize;
                        continue;
                    }
                }
                Instr::Goto { target } => {
                    self.ip = target as usize;
                    continue;
                }
                Instr::Return => {
                    let frame = self.frames.pop().expect("no frame to return from");
                    self.ip = frame.return_address;
                    self.tracer.on_return(self.frames.len());
                    continue;
                }
                Instr::Drop => {
                    self.pop()?;
                }
            }
            self.ip += 1;
        }
    }

    /// Current heap occupancy and collector counters.
    #[must_use]
    pub fn heap_stats(&self) -> HeapStats {
        self.heap.stats()
    }

    /// The tracer, for reading back accumulated counters.
    #[must_use]
    pub fn tracer(&self) -> &T {
        &self.tracer
    }

    // ------------------------------------------------------------------
    // Opcode handlers
    // ------------------------------------------------------------------

    fn op_lit(&mut self, idx: u16) -> Result<(), RuntimeError> {
        let word = match self.program.values.get(idx as usize) {
            Some(Value::Int(v)) => Word::from_int(*v),
            Some(Value::Null) => Word::NULL,
            _ => {
                return Err(RuntimeError::BadPoolEntry {
                    index: idx,
                    expected: "int or null",
                });
            }
        };
        self.stack.push(word);
        Ok(())
    }

    fn op_printf(&mut self, format: u16, arity: u8) -> Result<(), RuntimeError> {
        let argc = arity as usize;
        let mut args: SmallVec<[i64; 8]> = SmallVec::from_elem(0, argc);
        for i in (0..argc).rev() {
            let word = self.pop()?;
            if !word.is_int() {
                return Err(RuntimeError::TypeError("printf only accepts integers".to_owned()));
            }
            args[i] = word.as_int();
        }

        let format = self.program.str_at(format)?;
        let mut out = String::with_capacity(format.len() + 8 * argc);
        let mut next = 0;
        for ch in format.chars() {
            if ch == '~' {
                // The compiler matched holes against arity, so this only
                // trips on forged programs.
                let value = args
                    .get(next)
                    .ok_or_else(|| RuntimeError::TypeError("printf placeholder without argument".to_owned()))?;
                out.push_str(&value.to_string());
                next += 1;
            } else {
                out.push(ch);
            }
        }
        self.print.stdout_write(&out);
        Ok(())
    }

    fn op_array(&mut self) -> Result<(), RuntimeError> {
        let init = self.pop()?;
        let length_word = self.pop()?;
        if !length_word.is_int() {
            return Err(RuntimeError::TypeError("array length must be an integer".to_owned()));
        }
        let length = usize::try_from(length_word.as_int())
            .map_err(|_| RuntimeError::TypeError("array length must not be negative".to_owned()))?;

        // Keep the initializer visible to the root scan while allocating.
        self.stack.push(init);
        let base = self.gc_alloc(2 + length)?;
        let init = self.pop()?;

        self.heap.set(base, ARRAY_TYPE);
        self.heap.set(base + 1, i64::try_from(length).unwrap_or(i64::MAX));
        for i in 0..length {
            self.heap.set(base + 2 + i, init.raw());
        }
        self.stack.push(Heap::word_at(base));
        Ok(())
    }

    fn op_object(&mut self, class: u16) -> Result<(), RuntimeError> {
        let template = self
            .classes
            .by_pool_index(class)
            .ok_or(RuntimeError::BadPoolEntry {
                index: class,
                expected: "class",
            })?;
        let nvars = template.nvars();
        let type_tag = template.type_tag;

        // Allocate first: the initializers and parent stay rooted on the
        // operand stack while the collector may run.
        let base = self.gc_alloc(2 + nvars)?;
        for i in (0..nvars).rev() {
            let value = self.pop()?;
            self.heap.set(base + 2 + i, value.raw());
        }
        let parent = self.pop()?;
        self.heap.set(base, type_tag);
        self.heap.set(base + 1, parent.raw());
        self.stack.push(Heap::word_at(base));
        Ok(())
    }

    fn op_slot(&mut self, name: u16) -> Result<(), RuntimeError> {
        let receiver = self.pop()?;
        let location = {
            let name = self.program.str_at(name)?;
            self.find_slot_location(receiver, name)?
        };
        self.stack.push(Word::from_raw(self.heap.get(location)));
        Ok(())
    }

    fn op_set_slot(&mut self, name: u16) -> Result<(), RuntimeError> {
        let value = self.pop()?;
        let receiver = self.pop()?;
        let location = {
            let name = self.program.str_at(name)?;
            self.find_slot_location(receiver, name)?
        };
        self.heap.set(location, value.raw());
        Ok(())
    }

    /// Dispatches `CallSlot`. Returns true when a frame was pushed (object
    /// method call), false when the primitive completed inline.
    fn op_call_slot(&mut self, name: u16, arity: u8) -> Result<bool, RuntimeError> {
        if arity == 0 {
            return Err(RuntimeError::TypeError("call-slot needs a receiver".to_owned()));
        }
        let argc = arity as usize - 1;
        // args[0] is the last argument pushed.
        let mut args: SmallVec<[Word; 8]> = SmallVec::with_capacity(argc);
        for _ in 0..argc {
            args.push(self.pop()?);
        }
        let receiver = self.pop()?;

        if receiver.is_int() {
            let result = {
                let name = self.program.str_at(name)?;
                int_primitive(name, receiver, &args, arity)?
            };
            self.stack.push(result);
            return Ok(false);
        }

        if !receiver.is_ptr() {
            return Err(RuntimeError::TypeError(
                "cannot invoke a method on null".to_owned(),
            ));
        }

        let type_tag = self.heap.get(Heap::index_of(receiver));
        if type_tag == ARRAY_TYPE {
            self.array_primitive(name, receiver, &args, arity)?;
            return Ok(false);
        }

        if type_tag < OBJECT_TYPE && type_tag != GLOBAL_TYPE {
            return Err(RuntimeError::TypeError(
                "method call receiver is not an object".to_owned(),
            ));
        }

        // Object method dispatch, through the (type, name) cache. Only
        // hits on the receiver's own template are cached: an inherited
        // method depends on the instance's parent chain, which the type
        // tag does not determine.
        let method_idx = match self.dispatch_cache.get(&(type_tag, name)) {
            Some(&cached) => cached,
            None => {
                let (resolved, on_own_template) = {
                    let name = self.program.str_at(name)?;
                    self.resolve_method(receiver, name)?
                };
                if on_own_template {
                    self.dispatch_cache.insert((type_tag, name), resolved);
                }
                resolved
            }
        };

        let method = self.program.method_at(method_idx)?;
        if usize::from(method.nargs) != arity as usize {
            let expected = usize::from(method.nargs);
            let name = self.program.str_at(name)?.to_owned();
            return Err(RuntimeError::WrongArity {
                name,
                expected,
                got: arity as usize,
            });
        }

        self.push_frame(method_idx)?;
        let frame = self.frames.last_mut().expect("frame just pushed");
        frame.locals[0] = receiver;
        for (i, arg) in args.iter().enumerate() {
            // Declared arguments land in order after `this`.
            frame.locals[argc - i] = *arg;
        }
        self.trace_call(method_idx);
        Ok(true)
    }

    fn op_call(&mut self, name: u16, arity: u8) -> Result<(), RuntimeError> {
        let method_idx = {
            let name = self.program.str_at(name)?;
            let global_template = self.classes.by_type(GLOBAL_TYPE).expect("global template missing");
            global_template
                .methods
                .get(name)
                .copied()
                .ok_or_else(|| RuntimeError::UndefinedFunction(name.to_owned()))?
        };

        let method = self.program.method_at(method_idx)?;
        if usize::from(method.nargs) != arity as usize {
            let expected = usize::from(method.nargs);
            let name = self.program.str_at(name)?.to_owned();
            return Err(RuntimeError::WrongArity {
                name,
                expected,
                got: arity as usize,
            });
        }

        self.push_frame(method_idx)?;
        for i in 0..arity as usize {
            let value = self.pop()?;
            let frame = self.frames.last_mut().expect("frame just pushed");
            frame.locals[arity as usize - 1 - i] = value;
        }
        self.trace_call(method_idx);
        Ok(())
    }

    fn op_get_local(&mut self, idx: u16) -> Result<(), RuntimeError> {
        let frame = self.frames.last().expect("no active frame");
        let value = *frame
            .locals
            .get(idx as usize)
            .ok_or(RuntimeError::BadLocalSlot(idx))?;
        self.stack.push(value);
        Ok(())
    }

    /// SetLocal peeks: the assigned value remains the expression's result.
    fn op_set_local(&mut self, idx: u16) -> Result<(), RuntimeError> {
        let value = *self.stack.last().ok_or(RuntimeError::StackUnderflow)?;
        let frame = self.frames.last_mut().expect("no active frame");
        let slot = frame
            .locals
            .get_mut(idx as usize)
            .ok_or(RuntimeError::BadLocalSlot(idx))?;
        *slot = value;
        Ok(())
    }

    fn op_get_global(&mut self, name: u16) -> Result<(), RuntimeError> {
        let slot = self.global_slot_index(name)?;
        let value = self.heap.get(Heap::index_of(self.global) + 2 + slot);
        self.stack.push(Word::from_raw(value));
        Ok(())
    }

    /// SetGlobal peeks, like SetLocal.
    fn op_set_global(&mut self, name: u16) -> Result<(), RuntimeError> {
        let slot = self.global_slot_index(name)?;
        let value = *self.stack.last().ok_or(RuntimeError::StackUnderflow)?;
        self.heap.set(Heap::index_of(self.global) + 2 + slot, value.raw());
        Ok(())
    }

    // ------------------------------------------------------------------
    // Dispatch helpers
    // ------------------------------------------------------------------

    fn pop(&mut self) -> Result<Word, RuntimeError> {
        self.stack.pop().ok_or(RuntimeError::StackUnderflow)
    }

    fn global_slot_index(&self, name: u16) -> Result<usize, RuntimeError> {
        let name = self.program.str_at(name)?;
        self.classes
            .by_type(GLOBAL_TYPE)
            .and_then(|t| t.slot_index(name))
            .ok_or_else(|| RuntimeError::UndefinedVariable(name.to_owned()))
    }

    /// Finds the heap word index of a named variable slot, walking the
    /// receiver's prototype chain: inherited slots read and write the
    /// ancestor that declares them.
    fn find_slot_location(&self, receiver: Word, name: &str) -> Result<usize, RuntimeError> {
        if !receiver.is_ptr() {
            return Err(RuntimeError::TypeError("slot access requires an object".to_owned()));
        }
        let mut current = receiver;
        loop {
            let index = Heap::index_of(current);
            let type_tag = self.heap.get(index);
            if type_tag < OBJECT_TYPE && type_tag != GLOBAL_TYPE {
                return Err(RuntimeError::TypeError("slot access requires an object".to_owned()));
            }
            let template = self
                .classes
                .by_type(type_tag)
                .ok_or_else(|| RuntimeError::UndefinedSlot(name.to_owned()))?;
            if let Some(slot) = template.slot_index(name) {
                return Ok(index + 2 + slot);
            }
            let parent = Word::from_raw(self.heap.get(index + 1));
            if parent.is_null() {
                return Err(RuntimeError::UndefinedSlot(name.to_owned()));
            }
            if !parent.is_ptr() {
                return Err(RuntimeError::InvalidParent);
            }
            current = parent;
        }
    }

    /// Resolves a method by walking the receiver's prototype chain. The
    /// second result is true when the hit was on the receiver's own
    /// template rather than an ancestor's.
    fn resolve_method(&self, receiver: Word, name: &str) -> Result<(u16, bool), RuntimeError> {
        let mut current = receiver;
        let mut own = true;
        loop {
            let index = Heap::index_of(current);
            let type_tag = self.heap.get(index);
            if let Some(template) = self.classes.by_type(type_tag) {
                if let Some(&method_idx) = template.methods.get(name) {
                    return Ok((method_idx, own));
                }
            }
            let parent = Word::from_raw(self.heap.get(index + 1));
            if parent.is_null() {
                return Err(RuntimeError::UndefinedMethod(name.to_owned()));
            }
            if !parent.is_ptr() {
                return Err(RuntimeError::InvalidParent);
            }
            current = parent;
            own = false;
        }
    }

    /// Array primitives: `get`, `set`, `length`.
    fn array_primitive(&mut self, name: u16, receiver: Word, args: &[Word], arity: u8) -> Result<(), RuntimeError> {
        let op = {
            let name = self.program.str_at(name)?;
            match name {
                "get" => ArrayOp::Get,
                "set" => ArrayOp::Set,
                "length" => ArrayOp::Length,
                other => {
                    return Err(RuntimeError::UndefinedMethod(other.to_owned()));
                }
            }
        };
        let base = Heap::index_of(receiver);
        let length = usize::try_from(self.heap.get(base + 1)).expect("negative array length in heap");

        match op {
            ArrayOp::Get => {
                if arity != 2 {
                    return Err(self.arity_error(name, 2, arity));
                }
                let index = array_index(args[0], length)?;
                self.stack.push(Word::from_raw(self.heap.get(base + 2 + index)));
            }
            ArrayOp::Set => {
                if arity != 3 {
                    return Err(self.arity_error(name, 3, arity));
                }
                // args[0] is the value (pushed last), args[1] the index.
                let index = array_index(args[1], length)?;
                self.heap.set(base + 2 + index, args[0].raw());
                self.stack.push(Word::NULL);
            }
            ArrayOp::Length => {
                if arity != 1 {
                    return Err(self.arity_error(name, 1, arity));
                }
                self.stack.push(Word::from_int(i64::try_from(length).unwrap_or(i64::MAX)));
            }
        }
        Ok(())
    }

    fn arity_error(&self, name: u16, expected: usize, got: u8) -> RuntimeError {
        let name = self
            .program
            .str_at(name)
            .map_or_else(|_| "?".to_owned(), str::to_owned);
        RuntimeError::WrongArity {
            name,
            expected,
            got: got as usize,
        }
    }

    /// Pushes a frame for `method_idx`, resolving its labels on first use,
    /// and moves the instruction pointer to its first instruction.
    fn push_frame(&mut self, method_idx: u16) -> Result<(), RuntimeError> {
        self.resolve_labels(method_idx)?;
        let method = self.program.method_at(method_idx)?;
        let nslots = usize::from(method.nargs) + usize::from(method.nlocals);
        self.frames.push(Frame {
            method: method_idx,
            return_address: self.ip + 1,
            locals: vec![Word::NULL; nslots],
        });
        self.ip = 0;
        Ok(())
    }

    /// One-shot, idempotent label resolution: rewrites `Branch`/`Goto`
    /// operands from label-name pool indices to instruction offsets.
    fn resolve_labels(&mut self, method_idx: u16) -> Result<(), RuntimeError> {
        let method = self.program.method_at(method_idx)?;
        if method.processed {
            return Ok(());
        }

        let mut labels: AHashMap<u16, u16> = AHashMap::new();
        for (offset, instr) in method.code.iter().enumerate() {
            if let Instr::Label { name } = instr {
                let offset = u16::try_from(offset).map_err(|_| RuntimeError::MethodTooLong)?;
                labels.insert(*name, offset);
            }
        }

        // Validate targets against the pool before rewriting anything.
        for instr in &method.code {
            if let Instr::Branch { target } | Instr::Goto { target } = instr {
                let name = self.program.str_at(*target)?;
                if !labels.contains_key(target) {
                    return Err(RuntimeError::UnresolvedLabel(name.to_owned()));
                }
            }
        }

        let Some(Value::Method(method)) = self.program.values.get_mut(method_idx as usize) else {
            return Err(RuntimeError::BadPoolEntry {
                index: method_idx,
                expected: "method",
            });
        };
        for instr in &mut method.code {
            if let Instr::Branch { target } | Instr::Goto { target } = instr {
                *target = labels[target];
            }
        }
        method.processed = true;
        Ok(())
    }

    fn trace_call(&mut self, method_idx: u16) {
        let name = self
            .program
            .method_at(method_idx)
            .ok()
            .and_then(|m| self.program.str_at(m.name).ok())
            .unwrap_or("?")
            .to_owned();
        self.tracer.on_call(&name, self.frames.len());
    }

    // ------------------------------------------------------------------
    // Allocation and collection policy
    // ------------------------------------------------------------------

    /// Allocates `nwords`, collecting and growing as needed.
    fn gc_alloc(&mut self, nwords: usize) -> Result<usize, RuntimeError> {
        if nwords >= MAX_ALLOC_WORDS {
            return Err(RuntimeError::OutOfMemory { requested_words: nwords });
        }
        if self.heap.should_collect(nwords) {
            self.collect();
            while self.heap.should_grow(nwords) {
                self.grow();
            }
            if !self.heap.fits(nwords) {
                return Err(RuntimeError::OutOfMemory { requested_words: nwords });
            }
        }
        Ok(self.heap.bump(nwords))
    }

    fn collect(&mut self) {
        let before = self.heap.stats();
        let Self {
            heap,
            classes,
            global,
            frames,
            stack,
            ..
        } = self;
        heap.collect(
            classes,
            iter::once(global)
                .chain(frames.iter_mut().flat_map(|f| f.locals.iter_mut()))
                .chain(stack.iter_mut()),
        );
        let after = self.heap.stats();
        self.tracer.on_gc(before, after);
    }

    fn grow(&mut self) {
        let before = self.heap.stats();
        let Self {
            heap,
            classes,
            global,
            frames,
            stack,
            ..
        } = self;
        heap.grow_and_collect(
            classes,
            iter::once(global)
                .chain(frames.iter_mut().flat_map(|f| f.locals.iter_mut()))
                .chain(stack.iter_mut()),
        );
        let after = self.heap.stats();
        self.tracer.on_gc(before, after);
    }
}

/// Decodes and bounds-checks an array index argument.
fn array_index(word: Word, length: usize) -> Result<usize, RuntimeError> {
    if !word.is_int() {
        return Err(RuntimeError::TypeError("array index must be an integer".to_owned()));
    }
    let raw = word.as_int();
    usize::try_from(raw)
        .ok()
        .filter(|&i| i < length)
        .ok_or(RuntimeError::IndexOutOfBounds { index: raw, length })
}

/// Integer primitives.
///
/// `add`/`sub` work on tagged words directly (tag bits are zero on both
/// sides), `mul` multiplies tagged by untagged, `div`/`mod` untag fully.
/// Comparisons act on tagged words — tagging by shift is monotone — and
/// yield int 0 for true, null for false.
fn int_primitive(name: &str, receiver: Word, args: &[Word], arity: u8) -> Result<Word, RuntimeError> {
    if arity != 2 {
        return Err(RuntimeError::WrongArity {
            name: name.to_owned(),
            expected: 2,
            got: arity as usize,
        });
    }
    let other = args[0];
    if !other.is_int() {
        return Err(RuntimeError::TypeError(format!(
            "integer '{name}' needs an integer argument"
        )));
    }
    let x = receiver;
    let y = other;
    let result = match name {
        "add" => Word::from_raw(x.raw().wrapping_add(y.raw())),
        "sub" => Word::from_raw(x.raw().wrapping_sub(y.raw())),
        "mul" => Word::from_raw(x.raw().wrapping_mul(y.as_int())),
        "div" => {
            if y.as_int() == 0 {
                return Err(RuntimeError::DivideByZero);
            }
            Word::from_int(x.as_int().wrapping_div(y.as_int()))
        }
        "mod" => {
            if y.as_int() == 0 {
                return Err(RuntimeError::DivideByZero);
            }
            Word::from_int(x.as_int().wrapping_rem(y.as_int()))
        }
        "lt" => Word::from_bool(x.raw() < y.raw()),
        "gt" => Word::from_bool(x.raw() > y.raw()),
        "le" => Word::from_bool(x.raw() <= y.raw()),
        "ge" => Word::from_bool(x.raw() >= y.raw()),
        "eq" => Word::from_bool(x.raw() == y.raw()),
        other => {
            return Err(RuntimeError::UndefinedMethod(other.to_owned()));
        }
    };
    Ok(result)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        bytecode::compile,
        io::CollectStringPrint,
        parser::parse,
        tracer::{CountingTracer, NoopTracer},
    };

    fn run_source(source: &str) -> String {
        let ast = parse(source).expect("parse failed");
        let program = compile(&ast).expect("compile failed");
        let mut print = CollectStringPrint::new();
        let mut machine = Machine::new(program, &mut print, NoopTracer).expect("init failed");
        machine.run().expect("run failed");
        print.into_output()
    }

    fn run_source_err(source: &str) -> RuntimeError {
        let ast = parse(source).expect("parse failed");
        let program = compile(&ast).expect("compile failed");
        let mut print = CollectStringPrint::new();
        let mut machine = Machine::new(program, &mut print, NoopTracer).expect("init failed");
        machine.run().expect_err("expected runtime failure")
    }

    #[test]
    fn test_hello_world() {
        assert_eq!(run_source("printf(\"hello world\\n\")\n"), "hello world\n");
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(run_source("var x = 1 + 2\nprintf(\"~\\n\", x)\n"), "3\n");
        assert_eq!(run_source("printf(\"~\\n\", 7 * 6)\n"), "42\n");
        assert_eq!(run_source("printf(\"~\\n\", 17 / 5)\n"), "3\n");
        assert_eq!(run_source("printf(\"~\\n\", 17 % 5)\n"), "2\n");
        assert_eq!(run_source("printf(\"~\\n\", 2 - 5)\n"), "-3\n");
        assert_eq!(run_source("printf(\"~\\n\", -4 * -4)\n"), "16\n");
    }

    #[test]
    fn test_comparisons_yield_zero_or_null() {
        // Truthy comparison result prints as 0.
        assert_eq!(run_source("printf(\"~\\n\", 1 < 2)\n"), "0\n");
        assert_eq!(
            run_source("if 2 <= 1:\n    printf(\"yes\\n\")\nelse:\n    printf(\"no\\n\")\n"),
            "no\n"
        );
        // Int 0 is truthy; only null is false.
        assert_eq!(
            run_source("if 0:\n    printf(\"yes\\n\")\nelse:\n    printf(\"no\\n\")\n"),
            "yes\n"
        );
    }

    #[test]
    fn test_while_loop() {
        let source = "var i = 0\nvar sum = 0\nwhile i < 5:\n    sum = sum + i\n    i = i + 1\nprintf(\"~\\n\", sum)\n";
        assert_eq!(run_source(source), "10\n");
    }

    #[test]
    fn test_recursive_fib() {
        let source = "defn fib(n):\n    if n < 2:\n        n\n    else:\n        fib(n-1) + fib(n-2)\nprintf(\"~\\n\", fib(10))\n";
        assert_eq!(run_source(source), "55\n");
    }

    #[test]
    fn test_arrays() {
        let source = "var a = array(3, 0)\na[0] = 10\na[1] = 20\na[2] = 30\nprintf(\"~ ~ ~ ~\\n\", a[0], a[1], a[2], a.length())\n";
        assert_eq!(run_source(source), "10 20 30 3\n");
    }

    #[test]
    fn test_object_slots_and_methods() {
        let source = "\
var counter = object:
    var count = 0
    method inc():
        this.count = this.count + 1
    method get():
        this.count
counter.inc()
counter.inc()
printf(\"~\\n\", counter.get())
";
        assert_eq!(run_source(source), "2\n");
    }

    #[test]
    fn test_prototype_method_and_slot_inheritance() {
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
    fn test_assignment_is_an_expression() {
        // SetLocal and SetGlobal peek, so x = y = 5 threads the value.
        let source = "var x = 0\nvar y = 0\nx = y = 5\nprintf(\"~ ~\\n\", x, y)\n";
        assert_eq!(run_source(source), "5 5\n");
    }

    #[test]
    fn test_implicit_this_in_method() {
        let source = "\
var o = object:
    var v = 7
    method bump(d):
        v = v + d
o.bump(3)
printf(\"~\\n\", o.v)
";
        assert_eq!(run_source(source), "10\n");
    }

    #[test]
    fn test_labels_resolve_once_across_calls() {
        // Calling a branching function repeatedly exercises the processed
        // flag: a second resolution of already-rewritten targets would jump
        // into nonsense.
        let source = "\
defn sign(n):
    if n < 0:
        0 - 1
    else:
        if 0 < n:
            1
        else:
            0
printf(\"~ ~ ~ ~\\n\", sign(-5), sign(9), sign(0), sign(-2))
";
        assert_eq!(run_source(source), "-1 1 0 -1\n");
    }

    #[test]
    fn test_gc_collects_during_run() {
        // A heap far too small for the total allocation volume; only
        // collection keeps this alive.
        let source = "\
var keep = null
var i = 0
while i < 100:
    keep = array(32, i)
    i = i + 1
printf(\"~\\n\", keep[31])
";
        let ast = parse(source).expect("parse failed");
        let program = compile(&ast).expect("compile failed");
        let mut print = CollectStringPrint::new();
        let mut machine =
            Machine::with_heap_size(program, 256, &mut print, CountingTracer::new()).expect("init failed");
        machine.run().expect("run failed");
        assert!(machine.tracer().collections > 0, "expected at least one collection");
        let stats = machine.heap_stats();
        assert_eq!(stats.semi_space_words, 256, "no growth should have been needed");
        assert_eq!(print.into_output(), "99\n");
    }

    #[test]
    fn test_heap_grows_when_live_data_exceeds_space() {
        let source = "\
var a = array(100, 1)
var b = array(100, 2)
var c = array(100, 3)
printf(\"~ ~ ~\\n\", a[99], b[99], c[99])
";
        let ast = parse(source).expect("parse failed");
        let program = compile(&ast).expect("compile failed");
        let mut print = CollectStringPrint::new();
        let mut machine = Machine::with_heap_size(program, 128, &mut print, NoopTracer).expect("init failed");
        machine.run().expect("run failed");
        assert!(machine.heap_stats().growths > 0, "expected the heap to grow");
        assert_eq!(print.into_output(), "1 2 3\n");
    }

    #[test]
    fn test_divide_by_zero() {
        assert_eq!(run_source_err("printf(\"~\\n\", 1 / 0)\n"), RuntimeError::DivideByZero);
        assert_eq!(run_source_err("printf(\"~\\n\", 1 % 0)\n"), RuntimeError::DivideByZero);
    }

    #[test]
    fn test_array_bounds_checked() {
        let err = run_source_err("var a = array(2, 0)\na[5]\n");
        assert_eq!(err, RuntimeError::IndexOutOfBounds { index: 5, length: 2 });
    }

    #[test]
    fn test_undefined_method() {
        let err = run_source_err("var o = object:\n    var x = 1\no.missing()\n");
        assert_eq!(err, RuntimeError::UndefinedMethod("missing".to_owned()));
    }

    #[test]
    fn test_wrong_arity() {
        let err = run_source_err("defn f(a, b):\n    a\nf(1)\n");
        assert_eq!(
            err,
            RuntimeError::WrongArity {
                name: "f".to_owned(),
                expected: 2,
                got: 1,
            }
        );
    }

    #[test]
    fn test_call_on_null_rejected() {
        let err = run_source_err("null.add(1)\n");
        assert!(matches!(err, RuntimeError::TypeError(_)));
    }

    #[test]
    fn test_int_primitive_type_check() {
        let err = run_source_err("1 + null\n");
        assert!(matches!(err, RuntimeError::TypeError(_)));
    }

    #[test]
    fn test_printf_rejects_non_int() {
        let err = run_source_err("printf(\"~\\n\", null)\n");
        assert!(matches!(err, RuntimeError::TypeError(_)));
    }

    #[test]
    fn test_objects_survive_collection() {
        // Allocate garbage while an object graph stays live; its slots
        // must read back intact afterwards.
        let source = "\
var p = object:
    var x = 41
var c = object p:
    var y = 1
var i = 0
while i < 50:
    array(16, 0)
    i = i + 1
printf(\"~\\n\", c.x + c.y)
";
        let ast = parse(source).expect("parse failed");
        let program = compile(&ast).expect("compile failed");
        let mut print = CollectStringPrint::new();
        let mut machine =
            Machine::with_heap_size(program, 128, &mut print, CountingTracer::new()).expect("init failed");
        machine.run().expect("run failed");
        assert!(machine.tracer().collections > 0);
        assert_eq!(print.into_output(), "42\n");
    }

    #[test]
    fn test_inherited_slot_writes_hit_the_ancestor() {
        let source = "\
var p = object:
    var x = 1
var c = object p:
    var y = 2
c.x = 9
printf(\"~ ~\\n\", p.x, c.x)
";
        assert_eq!(run_source(source), "9 9\n");
    }

    #[test]
    fn test_same_class_different_parents_dispatch_correctly() {
        // Two instances of one literal class with different prototypes:
        // inherited dispatch must follow each instance's own chain, so
        // the (type, name) cache must not capture inherited hits.
        let source = "\
defn wrap(p):
    object p:
        var q = 0
var m1 = object:
    method f():
        1
var m2 = object:
    method f():
        2
var a = wrap(m1)
var b = wrap(m2)
printf(\"~ ~ ~ ~\\n\", a.f(), b.f(), a.f(), b.f())
";
        assert_eq!(run_source(source), "1 2 1 2\n");
    }

    #[test]
    fn test_global_function_via_object_method() {
        let source = "\
defn double(n):
    n * 2
var o = object:
    method run(n):
        double(n)
printf(\"~\\n\", o.run(21))
";
        assert_eq!(run_source(source), "42\n");
    }
}
