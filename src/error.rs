//! Error types for ByteScript
//!
//! Front-end (syntax) errors and runtime errors share one error type with an
//! optional source location. Semantic errors are collected as plain
//! diagnostics by the analyzer and never travel through this type.

use crate::token::Span;
use std::fmt;

/// Error kinds in ByteScript
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorKind {
    // Lexer errors
    UnexpectedCharacter(char),
    UnterminatedString,
    InvalidNumber(String),

    // Parser errors
    UnexpectedToken(String),
    ExpectedToken(String, String),
    ExpectedExpression,
    ExpectedType(String),
    NestingTooDeep(usize),

    // Definition file errors
    InvalidDefinition(String),

    // Encoding errors
    StringTooLong(usize),
    JumpOutOfRange(usize),

    // Runtime errors
    UnassignedVariable(u8),
    UnknownScript(String),
    TypeMismatch(String, String),
    DivisionByZero,
    NegativeExponent,
    WrongArity(usize, usize),
    ArgumentType(usize, String, String),
    StackOverflow(usize),
    UnknownOpcode(u8, usize),
    TruncatedBytecode(usize),
    MissingReturn(String),
    NoValue(String),

    // Generic runtime error
    RuntimeError(String),
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::UnexpectedCharacter(c) => write!(f, "unexpected character '{}'", c),
            ErrorKind::UnterminatedString => write!(f, "unterminated string"),
            ErrorKind::InvalidNumber(s) => write!(f, "invalid number '{}'", s),
            ErrorKind::UnexpectedToken(t) => write!(f, "unexpected token '{}'", t),
            ErrorKind::ExpectedToken(expected, got) => {
                write!(f, "{}, got '{}'", expected, got)
            }
            ErrorKind::ExpectedExpression => write!(f, "expected expression"),
            ErrorKind::ExpectedType(got) => write!(f, "expected a type name, got '{}'", got),
            ErrorKind::NestingTooDeep(limit) => {
                write!(f, "nesting exceeds the limit of {} levels", limit)
            }
            ErrorKind::InvalidDefinition(msg) => write!(f, "invalid script definition: {}", msg),
            ErrorKind::StringTooLong(len) => {
                write!(f, "string of {} UTF-16 units exceeds the 65535 limit", len)
            }
            ErrorKind::JumpOutOfRange(addr) => write!(f, "jump address {} out of range", addr),
            ErrorKind::UnassignedVariable(slot) => {
                write!(f, "variable in slot {} has no value", slot)
            }
            ErrorKind::UnknownScript(name) => write!(f, "unknown script '{}'", name),
            ErrorKind::TypeMismatch(expected, got) => {
                write!(f, "type mismatch: expected {}, got {}", expected, got)
            }
            ErrorKind::DivisionByZero => write!(f, "division by zero"),
            ErrorKind::NegativeExponent => write!(f, "negative exponent in integer power"),
            ErrorKind::WrongArity(expected, got) => {
                write!(f, "expected {} arguments, got {}", expected, got)
            }
            ErrorKind::ArgumentType(index, expected, got) => {
                write!(f, "argument {} must be {}, got {}", index, expected, got)
            }
            ErrorKind::StackOverflow(depth) => {
                write!(f, "stack overflow (call depth limit {})", depth)
            }
            ErrorKind::UnknownOpcode(byte, pc) => {
                write!(f, "unknown opcode 0x{:02x} at {:04}", byte, pc)
            }
            ErrorKind::TruncatedBytecode(pc) => write!(f, "bytecode ends unexpectedly at {:04}", pc),
            ErrorKind::MissingReturn(name) => {
                write!(f, "script '{}' finished without returning a value", name)
            }
            ErrorKind::NoValue(name) => write!(f, "call to '{}' produced no value", name),
            ErrorKind::RuntimeError(msg) => write!(f, "{}", msg),
        }
    }
}

/// A ByteScript error with location information
#[derive(Debug, Clone)]
pub struct ScriptError {
    pub kind: ErrorKind,
    pub span: Option<Span>,
    pub source_line: Option<String>,
}

impl ScriptError {
    pub fn new(kind: ErrorKind, span: Option<Span>) -> Self {
        Self {
            kind,
            span,
            source_line: None,
        }
    }

    /// Shorthand for errors raised while executing bytecode.
    pub fn runtime(kind: ErrorKind) -> Self {
        Self::new(kind, None)
    }

    pub fn with_source(mut self, source: &str) -> Self {
        if let Some(span) = &self.span {
            let lines: Vec<&str> = source.lines().collect();
            if span.line > 0 && span.line <= lines.len() {
                self.source_line = Some(lines[span.line - 1].to_string());
            }
        }
        self
    }
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(span) = &self.span {
            write!(f, "[line {}:{}] Error: {}", span.line, span.column, self.kind)?;

            if let Some(ref line) = self.source_line {
                write!(f, "\n  | {}", line)?;
                write!(f, "\n  | {}^", " ".repeat(span.column.saturating_sub(1)))?;
            }
        } else {
            write!(f, "Error: {}", self.kind)?;
        }
        Ok(())
    }
}

impl std::error::Error for ScriptError {}

/// Result type for ByteScript operations
pub type Result<T> = std::result::Result<T, ScriptError>;
