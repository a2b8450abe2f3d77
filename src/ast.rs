//! Parse tree for ByteScript script bodies
//!
//! Produced by the parser, walked once by the semantic analyzer. The tree is
//! untyped; types live in the analyzer's output (`crate::ir`).

use crate::token::Span;
use crate::value::ScriptType;

/// Expression nodes
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Int { value: i32, span: Span },
    Float { value: f32, span: Span },
    String { value: String, span: Span },
    Bool { value: bool, span: Span },

    /// Variable reference: foo
    Variable { name: String, span: Span },

    Binary {
        left: Box<Expr>,
        op: BinaryOp,
        right: Box<Expr>,
        span: Span,
    },

    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
        span: Span,
    },

    /// Script call: other(a, b)
    Call {
        name: String,
        args: Vec<Expr>,
        span: Span,
    },

    /// Grouping: (expr)
    Grouping { expr: Box<Expr>, span: Span },
}

impl Expr {
    pub fn span(&self) -> Span {
        match self {
            Expr::Int { span, .. } => *span,
            Expr::Float { span, .. } => *span,
            Expr::String { span, .. } => *span,
            Expr::Bool { span, .. } => *span,
            Expr::Variable { span, .. } => *span,
            Expr::Binary { span, .. } => *span,
            Expr::Unary { span, .. } => *span,
            Expr::Call { span, .. } => *span,
            Expr::Grouping { span, .. } => *span,
        }
    }
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add, // +
    Sub, // -
    Mul, // *
    Div, // /
    Mod, // %
    Pow, // ^
    Eq,  // ==
    Ne,  // !=
    Lt,  // <
    Le,  // <=
    Gt,  // >
    Ge,  // >=
    And, // &&
    Or,  // ||
}

impl BinaryOp {
    pub fn is_arithmetic(&self) -> bool {
        matches!(
            self,
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod | BinaryOp::Pow
        )
    }

    pub fn is_ordering(&self) -> bool {
        matches!(self, BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge)
    }

    pub fn is_equality(&self) -> bool {
        matches!(self, BinaryOp::Eq | BinaryOp::Ne)
    }

    pub fn is_logical(&self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }
}

impl std::fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Pow => "^",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        };
        f.write_str(s)
    }
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg, // -
    Not, // !
}

impl std::fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnaryOp::Neg => f.write_str("-"),
            UnaryOp::Not => f.write_str("!"),
        }
    }
}

/// One `if`/`elseif` arm of a conditional chain.
#[derive(Debug, Clone, PartialEq)]
pub struct Branch {
    pub condition: Expr,
    pub body: Stmt,
}

/// Statement nodes
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    /// Block: { stmt* }
    Block { stmts: Vec<Stmt>, span: Span },

    /// While loop: while (cond) stmt
    While {
        condition: Expr,
        body: Box<Stmt>,
        span: Span,
    },

    /// Conditional chain: if (..) .. elseif (..) .. else ..
    If {
        branches: Vec<Branch>,
        else_branch: Option<Box<Stmt>>,
        span: Span,
    },

    /// Declaration: int x = expr;
    Declare {
        ty: ScriptType,
        name: String,
        initializer: Option<Expr>,
        span: Span,
    },

    /// Assignment: x = expr;
    Assign {
        name: String,
        value: Expr,
        span: Span,
    },

    Return { value: Option<Expr>, span: Span },

    Print { value: Expr, span: Span },

    /// Call whose result is discarded: other(a);
    Call {
        name: String,
        args: Vec<Expr>,
        span: Span,
    },
}

/// A complete script body
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub statements: Vec<Stmt>,
}

impl Program {
    pub fn new(statements: Vec<Stmt>) -> Self {
        Self { statements }
    }
}
