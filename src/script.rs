//! Script headers, sources, compiled units and result records
//!
//! These are the values that cross the boundary between the host and the
//! toolchain.

use std::collections::HashMap;
use std::fmt;

use crate::value::{ScriptType, Value};

/// Most arguments a script may declare; slot ids are single bytes.
pub const MAX_ARGUMENTS: usize = 255;

/// A script's externally visible signature.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptHeader {
    name: String,
    return_type: ScriptType,
    /// Routing tag for the host; the toolchain never interprets it.
    channel: String,
    arguments: Vec<(String, ScriptType)>,
}

impl ScriptHeader {
    pub fn new(
        name: impl Into<String>,
        return_type: ScriptType,
        channel: impl Into<String>,
        arguments: Vec<(String, ScriptType)>,
    ) -> Self {
        Self {
            name: name.into(),
            return_type,
            channel: channel.into(),
            arguments,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn return_type(&self) -> ScriptType {
        self.return_type
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Argument names and types in declaration order.
    pub fn arguments(&self) -> &[(String, ScriptType)] {
        &self.arguments
    }

    pub fn arity(&self) -> usize {
        self.arguments.len()
    }

    /// Problems with the signature itself, independent of any body.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.arguments.len() > MAX_ARGUMENTS {
            errors.push(format!(
                "script '{}' declares {} arguments, the limit is {}",
                self.name,
                self.arguments.len(),
                MAX_ARGUMENTS
            ));
        }

        for (index, (name, ty)) in self.arguments.iter().enumerate() {
            if *ty == ScriptType::Void {
                errors.push(format!(
                    "argument '{}' of script '{}' cannot have type void",
                    name, self.name
                ));
            }
            if self.arguments[..index].iter().any(|(other, _)| other == name) {
                errors.push(format!(
                    "argument '{}' of script '{}' is declared twice",
                    name, self.name
                ));
            }
        }

        errors
    }
}

impl fmt::Display for ScriptHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.channel.is_empty() {
            write!(f, "@{} ", self.channel)?;
        }
        write!(f, "{} {}(", self.return_type, self.name)?;
        for (i, (name, ty)) in self.arguments.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{} {}", ty, name)?;
        }
        write!(f, ")")
    }
}

/// Headers of every script a unit may call, keyed by name.
pub type KnownHeaders = HashMap<String, ScriptHeader>;

/// Raw script body text together with its header.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptSource {
    pub text: String,
    pub header: ScriptHeader,
    /// Line of the body's first character in the file it came from, so
    /// diagnostics point at the right place.
    pub first_line: usize,
}

impl ScriptSource {
    pub fn new(text: impl Into<String>, header: ScriptHeader) -> Self {
        Self {
            text: text.into(),
            header,
            first_line: 1,
        }
    }

    pub fn name(&self) -> &str {
        self.header.name()
    }
}

/// One compiled script: header plus immutable bytecode.
#[derive(Debug, Clone, PartialEq)]
pub struct ByteScript {
    header: ScriptHeader,
    bytecode: Box<[u8]>,
}

impl ByteScript {
    pub fn new(header: ScriptHeader, bytecode: Vec<u8>) -> Self {
        Self {
            header,
            bytecode: bytecode.into_boxed_slice(),
        }
    }

    pub fn header(&self) -> &ScriptHeader {
        &self.header
    }

    pub fn name(&self) -> &str {
        self.header.name()
    }

    pub fn bytecode(&self) -> &[u8] {
        &self.bytecode
    }
}

/// Outcome of compiling one source.
#[derive(Debug, Clone)]
pub struct CompilationResult {
    pub name: String,
    pub unit: Option<ByteScript>,
    pub syntax_error: bool,
    pub semantics_error: bool,
    pub errors: Vec<String>,
}

impl CompilationResult {
    pub fn compiled(unit: ByteScript) -> Self {
        Self {
            name: unit.name().to_string(),
            unit: Some(unit),
            syntax_error: false,
            semantics_error: false,
            errors: Vec::new(),
        }
    }

    pub fn syntax_failure(name: impl Into<String>, error: String) -> Self {
        Self {
            name: name.into(),
            unit: None,
            syntax_error: true,
            semantics_error: false,
            errors: vec![error],
        }
    }

    pub fn semantic_failure(name: impl Into<String>, errors: Vec<String>) -> Self {
        Self {
            name: name.into(),
            unit: None,
            syntax_error: false,
            semantics_error: true,
            errors,
        }
    }

    pub fn success(&self) -> bool {
        self.unit.is_some()
    }
}

/// Outcome of executing one script.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult {
    pub success: bool,
    pub return_type: ScriptType,
    pub return_value: Option<Value>,
    pub script: String,
}

impl ExecutionResult {
    pub fn returned(script: &ScriptHeader, value: Option<Value>) -> Self {
        Self {
            success: true,
            return_type: script.return_type(),
            return_value: value,
            script: script.name().to_string(),
        }
    }

    /// A failed result never carries a value.
    pub fn failed(script: impl Into<String>, return_type: ScriptType) -> Self {
        Self {
            success: false,
            return_type,
            return_value: None,
            script: script.into(),
        }
    }
}
