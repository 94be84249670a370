//! Instruction set of the Feeny virtual machine.

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use strum::IntoStaticStr;

/// One bytecode instruction.
///
/// Operands are `u16` indices into the program's constant pool, except for
/// `GetLocal`/`SetLocal` (frame slot indices) and the `arity` fields. The
/// `target` of `Branch` and `Goto` is a pool index of the label's name
/// string until the owning method's labels are resolved, and a code offset
/// afterwards; [`MethodValue::processed`](super::code::MethodValue) records
/// which reading is current.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, IntoStaticStr)]
pub enum Instr {
    /// Jump target marker; a no-op at execution time.
    Label { name: u16 },
    /// Push the pool constant at `idx` (an int or null) as a tagged word.
    Lit { idx: u16 },
    /// Pop `arity` integers and print the format string at `format`, with
    /// each `~` splicing the next argument.
    Printf { format: u16, arity: u8 },
    /// Pop an init value and a length; push a new array.
    Array,
    /// Pop initializer words and a parent; push a new instance of the class
    /// whose pool index is `class`.
    Object { class: u16 },
    /// Pop a receiver; push the value of its variable slot `name`.
    Slot { name: u16 },
    /// Pop a value and a receiver; store into variable slot `name`.
    SetSlot { name: u16 },
    /// Pop `arity - 1` arguments and a receiver; invoke method `name`.
    CallSlot { name: u16, arity: u8 },
    /// Pop `arity` arguments; invoke the global function `name`.
    Call { name: u16, arity: u8 },
    /// Push the current frame's local slot `idx`.
    GetLocal { idx: u16 },
    /// Store the top of stack into local slot `idx`, leaving it on the stack.
    SetLocal { idx: u16 },
    /// Push the global variable `name`.
    GetGlobal { name: u16 },
    /// Store the top of stack into global `name`, leaving it on the stack.
    SetGlobal { name: u16 },
    /// Pop a word; jump to `target` if it is not null.
    Branch { target: u16 },
    /// Unconditional jump to `target`.
    Goto { target: u16 },
    /// Pop the current frame and resume at its return address.
    Return,
    /// Pop and discard the top of stack.
    Drop,
}

impl Instr {
    /// The instruction's mnemonic, for tracing and disassembly.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.into()
    }
}

impl Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Label { name } => write!(f, "label #{name}"),
            Self::Lit { idx } => write!(f, "lit #{idx}"),
            Self::Printf { format, arity } => write!(f, "printf #{format} {arity}"),
            Self::Array => write!(f, "array"),
            Self::Object { class } => write!(f, "object #{class}"),
            Self::Slot { name } => write!(f, "slot #{name}"),
            Self::SetSlot { name } => write!(f, "set-slot #{name}"),
            Self::CallSlot { name, arity } => write!(f, "call-slot #{name} {arity}"),
            Self::Call { name, arity } => write!(f, "call #{name} {arity}"),
            Self::GetLocal { idx } => write!(f, "get-local {idx}"),
            Self::SetLocal { idx } => write!(f, "set-local {idx}"),
            Self::GetGlobal { name } => write!(f, "get-global #{name}"),
            Self::SetGlobal { name } => write!(f, "set-global #{name}"),
            Self::Branch { target } => write!(f, "branch {target}"),
            Self::Goto { target } => write!(f, "goto {target}"),
            Self::Return => write!(f, "return"),
            Self::Drop => write!(f, "drop"),
        }
    }
}
