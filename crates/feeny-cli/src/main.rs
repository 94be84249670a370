//! The `feeny` command: run a Feeny source file.
//!
//! ```text
//! feeny [-a | -f] [-v] <path>
//! ```
//!
//! `-a` walks the AST (the default), `-f` compiles to bytecode and runs
//! the VM, `-v` logs execution to stderr (VM mode only).

use std::{env, fs, process::ExitCode};

use feeny::{Runner, StdPrint, StderrTracer};

enum Mode {
    Ast,
    Bytecode,
}

struct Options {
    mode: Mode,
    verbose: bool,
    path: String,
}

fn main() -> ExitCode {
    let options = match parse_args(env::args().skip(1)) {
        Ok(options) => options,
        Err(message) => {
            eprintln!("{message}");
            eprintln!("usage: feeny [-a | -f] [-v] <path>");
            return ExitCode::FAILURE;
        }
    };

    let source = match fs::read_to_string(&options.path) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("error reading {}: {err}", options.path);
            return ExitCode::FAILURE;
        }
    };

    let runner = match Runner::new(&source) {
        Ok(runner) => runner,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::FAILURE;
        }
    };

    let mut print = StdPrint::new();
    let result = match options.mode {
        Mode::Ast => runner.run_ast(&mut print),
        Mode::Bytecode if options.verbose => runner.run_vm_traced(&mut print, StderrTracer::new()).map(|_| ()),
        Mode::Bytecode => runner.run_vm(&mut print).map(|_| ()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn parse_args(args: impl Iterator<Item = String>) -> Result<Options, String> {
    let mut mode = Mode::Ast;
    let mut verbose = false;
    let mut path = None;

    for arg in args {
        match arg.as_str() {
            "-a" => mode = Mode::Ast,
            "-f" => mode = Mode::Bytecode,
            "-v" => verbose = true,
            other if other.starts_with('-') => {
                return Err(format!("unknown option '{other}'"));
            }
            _ => {
                if path.replace(arg).is_some() {
                    return Err("more than one input file".to_owned());
                }
            }
        }
    }

    let path = path.ok_or_else(|| "missing input file".to_owned())?;
    Ok(Options { mode, verbose, path })
}
