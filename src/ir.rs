//! Typed program produced by semantic analysis
//!
//! Every expression carries its inferred type and every variable reference
//! its slot id, so code generation is a plain serialisation of this tree.

use crate::ast::{BinaryOp, UnaryOp};
use crate::value::ScriptType;

#[derive(Debug, Clone, PartialEq)]
pub struct TypedProgram {
    pub body: Vec<TypedStmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypedStmt {
    /// `frees` lists the slots declared directly in this block, latest first.
    Block { body: Vec<TypedStmt>, frees: Vec<u8> },
    While { condition: TypedExpr, body: Box<TypedStmt> },
    If {
        branches: Vec<(TypedExpr, TypedStmt)>,
        else_branch: Option<Box<TypedStmt>>,
    },
    Declare { slot: u8, initializer: Option<TypedExpr> },
    Assign { slot: u8, value: TypedExpr },
    Return(Option<TypedExpr>),
    Print(TypedExpr),
    Call(TypedCall),
}

impl TypedStmt {
    /// True when control can never fall off the end of this statement.
    pub fn always_returns(&self) -> bool {
        match self {
            TypedStmt::Return(_) => true,
            TypedStmt::Block { body, .. } => body.iter().any(TypedStmt::always_returns),
            TypedStmt::If { branches, else_branch } => {
                else_branch.as_ref().is_some_and(|e| e.always_returns())
                    && branches.iter().all(|(_, body)| body.always_returns())
            }
            TypedStmt::While { condition, .. } => {
                matches!(condition.kind, TypedExprKind::Bool(true))
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypedCall {
    pub name: String,
    pub args: Vec<TypedExpr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypedExpr {
    pub ty: ScriptType,
    pub kind: TypedExprKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypedExprKind {
    Bool(bool),
    Int(i32),
    Float(f32),
    Str(String),
    Variable(u8),
    Binary {
        op: BinaryOp,
        left: Box<TypedExpr>,
        right: Box<TypedExpr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<TypedExpr>,
    },
    /// Explicit int to float widening inserted by the analyzer.
    ToFloat(Box<TypedExpr>),
    Call(TypedCall),
    /// Placeholder for a subexpression that already produced a diagnostic.
    Invalid,
}

impl TypedExpr {
    pub fn new(ty: ScriptType, kind: TypedExprKind) -> Self {
        Self { ty, kind }
    }

    pub fn invalid() -> Self {
        Self::new(ScriptType::Void, TypedExprKind::Invalid)
    }

    pub fn is_invalid(&self) -> bool {
        matches!(self.kind, TypedExprKind::Invalid)
    }

    /// Widen to `target` when the compatibility rule needs it.
    pub fn coerce_to(self, target: ScriptType) -> Self {
        if target == ScriptType::Float && self.ty == ScriptType::Int {
            TypedExpr::new(ScriptType::Float, TypedExprKind::ToFloat(Box::new(self)))
        } else {
            self
        }
    }
}
