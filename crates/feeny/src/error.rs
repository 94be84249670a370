//! Error types for every phase of the pipeline.
//!
//! Feeny has no user-visible exception mechanism: every error the runtime can
//! detect is fatal. The library therefore never panics on user input; each
//! phase reports a typed error and the caller (usually the CLI) prints the
//! diagnostic and exits non-zero.

use std::fmt::{self, Display};

/// Errors produced while tokenizing source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LexError {
    /// Indentation that is not a multiple of four spaces, or a jump of more
    /// than one level at once.
    BadIndentation { line: u32, detail: &'static str },
    /// A string literal that never sees its closing quote.
    UnterminatedString { line: u32 },
    /// A character with no meaning in Feeny.
    StrayCharacter { line: u32, column: u32, ch: char },
    /// A `:` must end its line; anything after it is an error.
    TrailingAfterColon { line: u32 },
}

impl Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadIndentation { line, detail } => {
                write!(f, "line {line}: {detail}")
            }
            Self::UnterminatedString { line } => {
                write!(f, "line {line}: unterminated string literal")
            }
            Self::StrayCharacter { line, column, ch } => {
                write!(f, "line {line}, column {column}: unexpected character '{ch}'")
            }
            Self::TrailingAfterColon { line } => {
                write!(f, "line {line}: colon must be followed by a newline")
            }
        }
    }
}

impl std::error::Error for LexError {}

/// Errors produced by the recursive-descent parser.
///
/// Carries the offending token's line and lexeme so the message can mirror
/// the classic `[line N] error at 'x': ...` shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub line: u32,
    pub lexeme: String,
    pub message: String,
}

impl ParseError {
    pub(crate) fn new(line: u32, lexeme: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            line,
            lexeme: lexeme.into(),
            message: message.into(),
        }
    }
}

impl Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[line {}] error at '{}': {}", self.line, self.lexeme, self.message)
    }
}

impl std::error::Error for ParseError {}

/// Errors detected while translating the AST to bytecode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    /// A reference that resolves to neither a local, an object slot, nor a
    /// global.
    UndefinedVariable(String),
    /// Two slots with the same name declared in one object (or two globals
    /// with the same name).
    DuplicateSlot(String),
    /// The number of `~` holes in a printf format does not match the number
    /// of arguments.
    PrintfArity { format: String, holes: usize, args: usize },
    /// The constant pool outgrew its `u16` index space.
    PoolOverflow,
    /// A single function declared more locals than the frame layout can index.
    TooManyLocals(String),
    /// A call site or declaration exceeded the `u8` arity encoding.
    TooManyArguments(String),
}

impl Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UndefinedVariable(name) => write!(f, "undefined variable '{name}'"),
            Self::DuplicateSlot(name) => write!(f, "slot '{name}' already defined"),
            Self::PrintfArity { format, holes, args } => write!(
                f,
                "printf format \"{format}\" has {holes} placeholder(s) but {args} argument(s)"
            ),
            Self::PoolOverflow => write!(f, "constant pool exceeds 65535 entries"),
            Self::TooManyLocals(name) => write!(f, "function '{name}' declares too many locals"),
            Self::TooManyArguments(name) => write!(f, "too many arguments for '{name}'"),
        }
    }
}

impl std::error::Error for CompileError {}

/// Fatal errors raised while executing a program, by either engine.
///
/// The bytecode VM and the AST interpreter share this type so conformance
/// tests can compare failure categories as well as output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    /// Method dispatch walked the whole parent chain without a hit.
    UndefinedMethod(String),
    /// Variable slot access walked the whole parent chain without a hit.
    UndefinedSlot(String),
    /// A global function call named something that is not a global method.
    UndefinedFunction(String),
    /// A name lookup failed at runtime (AST interpreter only; the compiler
    /// rejects these before the VM ever runs).
    UndefinedVariable(String),
    /// A call supplied the wrong number of arguments.
    WrongArity { name: String, expected: usize, got: usize },
    /// An operand had the wrong runtime type for the operation.
    TypeError(String),
    /// Array access outside `0..length`.
    IndexOutOfBounds { index: i64, length: usize },
    /// Integer division or modulo by zero.
    DivideByZero,
    /// The heap could not satisfy an allocation even after collecting and
    /// growing.
    OutOfMemory { requested_words: usize },
    /// An object's parent word was neither a heap pointer nor null when the
    /// dispatch walk tried to follow it.
    InvalidParent,
    /// The instruction pointer left the current method's code.
    CodeOutOfBounds { ip: usize, len: usize },
    /// A pool index referenced a value of the wrong variant. Indicates a
    /// corrupt or hand-forged program.
    BadPoolEntry { index: u16, expected: &'static str },
    /// The operand stack was empty where an operand was required. Only a
    /// corrupt program can cause this; compiled code is balanced.
    StackUnderflow,
    /// A local slot index outside the current frame.
    BadLocalSlot(u16),
    /// A branch or goto named a label that does not exist in its method.
    UnresolvedLabel(String),
    /// A method body too long for the 16-bit branch encoding.
    MethodTooLong,
}

impl Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UndefinedMethod(name) => write!(f, "undefined method '{name}'"),
            Self::UndefinedSlot(name) => write!(f, "undefined slot '{name}'"),
            Self::UndefinedFunction(name) => write!(f, "undefined function '{name}'"),
            Self::UndefinedVariable(name) => write!(f, "undefined variable '{name}'"),
            Self::WrongArity { name, expected, got } => {
                write!(f, "wrong number of arguments for '{name}': expected {expected}, got {got}")
            }
            Self::TypeError(message) => write!(f, "type error: {message}"),
            Self::IndexOutOfBounds { index, length } => {
                write!(f, "array index {index} out of bounds for length {length}")
            }
            Self::DivideByZero => write!(f, "division by zero"),
            Self::OutOfMemory { requested_words } => {
                write!(f, "out of memory: allocation of {requested_words} words failed after collection")
            }
            Self::InvalidParent => write!(f, "object parent is neither an object nor null"),
            Self::CodeOutOfBounds { ip, len } => {
                write!(f, "instruction pointer {ip} out of bounds for method of length {len}")
            }
            Self::BadPoolEntry { index, expected } => {
                write!(f, "constant pool entry {index} is not a {expected}")
            }
            Self::StackUnderflow => write!(f, "operand stack underflow"),
            Self::BadLocalSlot(idx) => write!(f, "local slot {idx} out of range for current frame"),
            Self::UnresolvedLabel(name) => write!(f, "unresolved label '{name}'"),
            Self::MethodTooLong => write!(f, "method body exceeds the branch target encoding"),
        }
    }
}

impl std::error::Error for RuntimeError {}

/// Umbrella error for the public API: any phase's failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeenyError {
    Lex(LexError),
    Parse(ParseError),
    Compile(CompileError),
    Runtime(RuntimeError),
}

impl Display for FeenyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lex(e) => write!(f, "lex error: {e}"),
            Self::Parse(e) => write!(f, "parse error: {e}"),
            Self::Compile(e) => write!(f, "compile error: {e}"),
            Self::Runtime(e) => write!(f, "runtime error: {e}"),
        }
    }
}

impl std::error::Error for FeenyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Lex(e) => Some(e),
            Self::Parse(e) => Some(e),
            Self::Compile(e) => Some(e),
            Self::Runtime(e) => Some(e),
        }
    }
}

impl From<LexError> for FeenyError {
    fn from(e: LexError) -> Self {
        Self::Lex(e)
    }
}

impl From<ParseError> for FeenyError {
    fn from(e: ParseError) -> Self {
        Self::Parse(e)
    }
}

impl From<CompileError> for FeenyError {
    fn from(e: CompileError) -> Self {
        Self::Compile(e)
    }
}

impl From<RuntimeError> for FeenyError {
    fn from(e: RuntimeError) -> Self {
        Self::Runtime(e)
    }
}
