//! ByteScript - an embeddable, statically typed scripting toolchain
//!
//! Scripts are parsed, checked by the semantic analyzer, compiled to a
//! compact prefix-encoded bytecode and run by a virtual machine that lets
//! scripts call each other.

pub mod token;
pub mod lexer;
pub mod parser;
pub mod ast;
pub mod value;
pub mod script;
pub mod source;
pub mod ir;
pub mod analyzer;
pub mod environment;
pub mod error;
pub mod bytecode;
pub mod compiler;
pub mod vm;

pub use environment::{install, CompilationEnvironment};
pub use error::{ErrorKind, Result, ScriptError};
pub use lexer::Lexer;
pub use parser::Parser;
pub use script::{ByteScript, CompilationResult, ExecutionResult, ScriptHeader, ScriptSource};
pub use value::{ObjectHandle, ScriptType, Value};
pub use vm::{CollectingSink, EventSink, ScriptRegistry, Vm, VmConfig};

/// Compile every script in a definition file and return a VM holding the
/// successful units, together with the per-script results.
pub fn load(text: &str, config: VmConfig) -> Result<(Vm, Vec<CompilationResult>)> {
    let mut env = CompilationEnvironment::new();
    env.load_all(source::split_definitions(text)?);
    let results = env.compile();

    let mut registry = ScriptRegistry::new();
    install(results.clone(), &mut registry);
    Ok((Vm::with_config(registry, config), results))
}

/// Version of the ByteScript toolchain
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
