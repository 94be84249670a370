//! Public interface for running Feeny code.
//!
//! [`Runner`] parses once and can then execute through either engine:
//! the tree-walking interpreter (`run_ast`) or the compile-and-execute
//! bytecode path (`run_vm`). Both write through a caller-supplied
//! [`PrintWriter`], so embedders and tests choose where output goes.

use crate::{
    ast::ScopeStmt,
    bytecode::{Program, compile},
    error::FeenyError,
    heap::HeapStats,
    interp::interpret,
    io::PrintWriter,
    parser::parse,
    tracer::{NoopTracer, VmTracer},
    vm::Machine,
};

/// A parsed Feeny program, ready to run.
#[derive(Debug, Clone)]
pub struct Runner {
    ast: ScopeStmt,
}

impl Runner {
    /// Parses source text. Lexical and syntactic errors surface here;
    /// compile-time errors surface when the bytecode path first runs.
    pub fn new(source: &str) -> Result<Self, FeenyError> {
        Ok(Self { ast: parse(source)? })
    }

    /// The parsed tree, for callers that drive the engines directly.
    #[must_use]
    pub fn ast(&self) -> &ScopeStmt {
        &self.ast
    }

    /// Runs through the tree-walking interpreter.
    pub fn run_ast(&self, print: &mut impl PrintWriter) -> Result<(), FeenyError> {
        interpret(&self.ast, print)?;
        Ok(())
    }

    /// Compiles to bytecode without running; useful for caching via
    /// [`Program::dump`] and for disassembly via the program's `Display`.
    pub fn compile(&self) -> Result<Program, FeenyError> {
        Ok(compile(&self.ast)?)
    }

    /// Compiles and runs on the VM with the zero-cost no-op tracer.
    pub fn run_vm(&self, print: &mut impl PrintWriter) -> Result<HeapStats, FeenyError> {
        self.run_vm_traced(print, NoopTracer)
    }

    /// Compiles and runs on the VM with a caller-chosen tracer. Returns
    /// the final heap statistics.
    pub fn run_vm_traced(
        &self,
        print: &mut impl PrintWriter,
        tracer: impl VmTracer,
    ) -> Result<HeapStats, FeenyError> {
        let program = compile(&self.ast)?;
        let mut machine = Machine::new(program, print, tracer)?;
        machine.run()?;
        Ok(machine.heap_stats())
    }
}
