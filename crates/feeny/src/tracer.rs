//! Trait-based execution tracing for the bytecode VM.
//!
//! The VM carries its tracer as a type parameter, so with [`NoopTracer`]
//! every hook monomorphizes to nothing and the dispatch loop pays zero
//! cost. [`StderrTracer`] backs the CLI's `-v` flag with a human-readable
//! execution log.

use crate::{bytecode::Instr, heap::HeapStats};

/// Hook points in the VM's execution.
///
/// Every method has a no-op default, so implementations override only what
/// they need.
pub trait VmTracer {
    /// Called before each instruction dispatch. The hottest hook; keep it
    /// light.
    #[inline(always)]
    fn on_instruction(&mut self, _ip: usize, _instr: &Instr, _stack_depth: usize, _frame_depth: usize) {}

    /// Called after a call pushes a new frame.
    #[inline(always)]
    fn on_call(&mut self, _name: &str, _frame_depth: usize) {}

    /// Called after a return pops a frame.
    #[inline(always)]
    fn on_return(&mut self, _frame_depth: usize) {}

    /// Called after every garbage collection, including growth collections.
    #[inline(always)]
    fn on_gc(&mut self, _before: HeapStats, _after: HeapStats) {}
}

/// The zero-cost production default.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl VmTracer for NoopTracer {}

/// Logs execution to stderr.
///
/// ```text
/// [   12] call-slot #5 2      stack=3  frames=1
///   >>> call fib             depth=2
///   <<< return               depth=1
///   gc: 131072 -> 24 words live (1 collections)
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct StderrTracer;

impl StderrTracer {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl VmTracer for StderrTracer {
    fn on_instruction(&mut self, ip: usize, instr: &Instr, stack_depth: usize, frame_depth: usize) {
        eprintln!("[{ip:5}] {instr:<24} stack={stack_depth:<3} frames={frame_depth}");
    }

    fn on_call(&mut self, name: &str, frame_depth: usize) {
        eprintln!("  >>> call {name:<16} depth={frame_depth}");
    }

    fn on_return(&mut self, frame_depth: usize) {
        eprintln!("  <<< return{:16} depth={frame_depth}", "");
    }

    fn on_gc(&mut self, before: HeapStats, after: HeapStats) {
        eprintln!(
            "  gc: {} -> {} words live ({} collections, {} growths)",
            before.used_words, after.used_words, after.collections, after.growths
        );
    }
}

/// Counts instructions, calls, and collections; used by tests to assert on
/// execution shape without parsing logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct CountingTracer {
    pub instructions: u64,
    pub calls: u64,
    pub returns: u64,
    pub collections: u64,
}

impl CountingTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl VmTracer for CountingTracer {
    fn on_instruction(&mut self, _ip: usize, _instr: &Instr, _stack_depth: usize, _frame_depth: usize) {
        self.instructions += 1;
    }

    fn on_call(&mut self, _name: &str, _frame_depth: usize) {
        self.calls += 1;
    }

    fn on_return(&mut self, _frame_depth: usize) {
        self.returns += 1;
    }

    fn on_gc(&mut self, _before: HeapStats, _after: HeapStats) {
        self.collections += 1;
    }
}
