//! Constant pool values and the compiled program container.

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

use super::op::Instr;
use crate::error::RuntimeError;

/// A value in the constant pool.
///
/// `Method.name`, `Slot.name`, and the entries of `Class.slots` are pool
/// indices themselves, so the pool forms a DAG: strings at the leaves,
/// methods and classes above them. Values are deduplicated by structural
/// equality on insertion, so equal literals share one index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Value {
    Null,
    Int(i64),
    Str(String),
    Method(MethodValue),
    /// A variable slot declaration; `name` indexes a `Str`.
    Slot { name: u16 },
    /// An object shape: pool indices of its `Slot` and `Method` members in
    /// declaration order.
    Class { slots: Vec<u16> },
}

impl Value {
    /// Short variant name for diagnostics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Int(_) => "int",
            Self::Str(_) => "string",
            Self::Method(_) => "method",
            Self::Slot { .. } => "slot",
            Self::Class { .. } => "class",
        }
    }
}

/// A compiled function or method body.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MethodValue {
    /// Pool index of the method's name string.
    pub name: u16,
    /// Number of arguments, including the implicit `this` for object
    /// methods.
    pub nargs: u8,
    /// Number of additional local slots the body needs.
    pub nlocals: u16,
    pub code: Vec<Instr>,
    /// Set once this method's labels have been resolved to code offsets.
    /// Resolution happens on first call and must not repeat.
    pub processed: bool,
}

/// A compiled program: the constant pool, the entry method, and the pool
/// indices of the global slots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Program {
    pub values: Vec<Value>,
    /// Pool index of the synthetic entry method.
    pub entry: u16,
    /// Pool indices of `Slot` and `Method` values declared at the top level,
    /// in declaration order. These define the layout of the global object.
    pub globals: Vec<u16>,
}

impl Program {
    /// Fetches the string at a pool index, or a pool-integrity error.
    pub fn str_at(&self, idx: u16) -> Result<&str, RuntimeError> {
        match self.values.get(idx as usize) {
            Some(Value::Str(s)) => Ok(s),
            _ => Err(RuntimeError::BadPoolEntry {
                index: idx,
                expected: "string",
            }),
        }
    }

    /// Fetches the method at a pool index, or a pool-integrity error.
    pub fn method_at(&self, idx: u16) -> Result<&MethodValue, RuntimeError> {
        match self.values.get(idx as usize) {
            Some(Value::Method(m)) => Ok(m),
            _ => Err(RuntimeError::BadPoolEntry {
                index: idx,
                expected: "method",
            }),
        }
    }

    /// Serializes the program to a compact binary format, suitable for
    /// caching compiled code between runs.
    pub fn dump(&self) -> Result<Vec<u8>, postcard::Error> {
        postcard::to_allocvec(self)
    }

    /// Restores a program serialized with [`Program::dump`].
    pub fn load(bytes: &[u8]) -> Result<Self, postcard::Error> {
        postcard::from_bytes(bytes)
    }
}

impl Display for Program {
    /// Disassembles the whole program: every pool entry, with method bodies
    /// listed instruction by instruction.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "entry: #{}", self.entry)?;
        write!(f, "globals:")?;
        for idx in &self.globals {
            write!(f, " #{idx}")?;
        }
        writeln!(f)?;
        for (i, value) in self.values.iter().enumerate() {
            match value {
                Value::Null => writeln!(f, "#{i}: null")?,
                Value::Int(v) => writeln!(f, "#{i}: int {v}")?,
                Value::Str(s) => writeln!(f, "#{i}: string {s:?}")?,
                Value::Slot { name } => writeln!(f, "#{i}: slot #{name}")?,
                Value::Class { slots } => {
                    write!(f, "#{i}: class")?;
                    for s in slots {
                        write!(f, " #{s}")?;
                    }
                    writeln!(f)?;
                }
                Value::Method(m) => {
                    writeln!(f, "#{i}: method #{} nargs={} nlocals={}", m.name, m.nargs, m.nlocals)?;
                    for (offset, instr) in m.code.iter().enumerate() {
                        writeln!(f, "    {offset:4}  {instr}")?;
                    }
                }
            }
        }
        Ok(())
    }
}
