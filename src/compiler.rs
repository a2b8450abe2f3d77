//! Compiler: typed program → bytecode
//!
//! Serializes the analyzer's output into a flat prefix-encoded buffer. Every
//! type and slot decision was already made by the analyzer, so the only
//! state kept here is the output buffer and the jump placeholders that wait
//! to be patched.

use tracing::debug;

use crate::bytecode::{ByteWriter, OpCode};
use crate::error::{ErrorKind, Result, ScriptError};
use crate::ir::{TypedCall, TypedExpr, TypedExprKind, TypedProgram, TypedStmt};

/// The bytecode compiler
pub struct Compiler {
    out: ByteWriter,
}

impl Compiler {
    pub fn new() -> Self {
        Self {
            out: ByteWriter::new(),
        }
    }

    /// Compile a whole script body. The root scope's variables are never
    /// freed explicitly; the frame owning them goes away on return.
    pub fn compile(mut self, program: &TypedProgram) -> Result<Vec<u8>> {
        for stmt in &program.body {
            self.compile_stmt(stmt)?;
        }
        debug!(bytes = self.out.len(), "compiled script body");
        Ok(self.out.into_bytes())
    }

    // ==================== Statements ====================

    fn compile_stmt(&mut self, stmt: &TypedStmt) -> Result<()> {
        match stmt {
            TypedStmt::Block { body, frees } => {
                for stmt in body {
                    self.compile_stmt(stmt)?;
                }
                for slot in frees {
                    self.out.write_op(OpCode::FreeVar);
                    self.out.write_u8(*slot);
                }
            }

            TypedStmt::While { condition, body } => {
                let loop_start = self.out.len();
                self.out.write_op(OpCode::CondTest);
                let exit_jump = self.out.reserve_address();
                self.compile_expr(condition)?;

                self.compile_stmt(body)?;

                self.out.write_op(OpCode::Jump);
                self.out.write_address(loop_start)?;
                self.out.patch_to_here(exit_jump)?;
            }

            TypedStmt::If { branches, else_branch } => {
                let mut end_jumps = Vec::with_capacity(branches.len());

                for (condition, body) in branches {
                    self.out.write_op(OpCode::CondTest);
                    let next_branch = self.out.reserve_address();
                    self.compile_expr(condition)?;

                    self.compile_stmt(body)?;

                    self.out.write_op(OpCode::Jump);
                    end_jumps.push(self.out.reserve_address());
                    self.out.patch_to_here(next_branch)?;
                }

                if let Some(else_stmt) = else_branch {
                    self.compile_stmt(else_stmt)?;
                }

                for jump in end_jumps {
                    self.out.patch_to_here(jump)?;
                }
            }

            TypedStmt::Declare { slot, initializer } => {
                self.out.write_op(OpCode::DeclareVar);
                self.out.write_u8(*slot);
                self.out.write_bool(initializer.is_some());
                if let Some(init) = initializer {
                    self.compile_expr(init)?;
                }
            }

            TypedStmt::Assign { slot, value } => {
                self.out.write_op(OpCode::SetVar);
                self.out.write_u8(*slot);
                self.compile_expr(value)?;
            }

            TypedStmt::Return(None) => self.out.write_op(OpCode::ReturnVoid),
            TypedStmt::Return(Some(value)) => {
                self.out.write_op(OpCode::ReturnValue);
                self.compile_expr(value)?;
            }

            TypedStmt::Print(value) => {
                self.out.write_op(OpCode::Print);
                self.compile_expr(value)?;
            }

            TypedStmt::Call(call) => self.compile_call(call)?,
        }
        Ok(())
    }

    // ==================== Expressions ====================

    fn compile_expr(&mut self, expr: &TypedExpr) -> Result<()> {
        match &expr.kind {
            TypedExprKind::Bool(b) => {
                self.out.write_op(OpCode::ConstBool);
                self.out.write_bool(*b);
            }
            TypedExprKind::Int(n) => {
                self.out.write_op(OpCode::ConstInt);
                self.out.write_i32(*n);
            }
            TypedExprKind::Float(n) => {
                self.out.write_op(OpCode::ConstFloat);
                self.out.write_f32(*n);
            }
            TypedExprKind::Str(s) => {
                self.out.write_op(OpCode::ConstString);
                self.out.write_str(s)?;
            }
            TypedExprKind::Variable(slot) => {
                self.out.write_op(OpCode::GetVar);
                self.out.write_u8(*slot);
            }
            TypedExprKind::Binary { op, left, right } => {
                self.out.write_op(OpCode::from_binary(*op));
                self.compile_expr(left)?;
                self.compile_expr(right)?;
            }
            TypedExprKind::Unary { op, operand } => {
                self.out.write_op(OpCode::from_unary(*op));
                self.compile_expr(operand)?;
            }
            TypedExprKind::ToFloat(operand) => {
                self.out.write_op(OpCode::ToFloat);
                self.compile_expr(operand)?;
            }
            TypedExprKind::Call(call) => self.compile_call(call)?,
            TypedExprKind::Invalid => {
                return Err(ScriptError::runtime(ErrorKind::RuntimeError(
                    "cannot compile an expression that failed analysis".to_string(),
                )));
            }
        }
        Ok(())
    }

    fn compile_call(&mut self, call: &TypedCall) -> Result<()> {
        let argc = u8::try_from(call.args.len()).map_err(|_| {
            ScriptError::runtime(ErrorKind::RuntimeError(format!(
                "call to '{}' passes {} arguments",
                call.name,
                call.args.len()
            )))
        })?;

        self.out.write_op(OpCode::CallFunction);
        self.out.write_str(&call.name)?;
        self.out.write_u8(argc);
        for arg in &call.args {
            self.compile_expr(arg)?;
        }
        Ok(())
    }
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::analyze;
    use crate::bytecode::ByteReader;
    use crate::lexer::Lexer;
    use crate::parser::Parser;
    use crate::script::{KnownHeaders, ScriptHeader};
    use crate::value::ScriptType;

    fn compile(source: &str, ret: ScriptType, args: &[(&str, ScriptType)]) -> Vec<u8> {
        let header = ScriptHeader::new(
            "test",
            ret,
            "",
            args.iter().map(|(n, t)| (n.to_string(), *t)).collect(),
        );
        let tokens = Lexer::new(source).tokenize().unwrap();
        let program = Parser::new(tokens).parse().unwrap();
        let analysis = analyze(&program, &header, &KnownHeaders::new());
        assert!(analysis.success(), "{:?}", analysis.errors);
        Compiler::new().compile(&analysis.program.unwrap()).unwrap()
    }

    fn address_at(code: &[u8], at: usize) -> i32 {
        ByteReader::at(code, at).read_i32().unwrap()
    }

    #[test]
    fn test_operators_precede_operands() {
        let code = compile("return 1 + 2 * x;", ScriptType::Int, &[("x", ScriptType::Int)]);
        assert_eq!(
            code,
            vec![
                0x01, // ReturnValue
                0x10, // Add
                0x31, 1, 0, 0, 0, // ConstInt 1
                0x12, // Multiply
                0x31, 2, 0, 0, 0, // ConstInt 2
                0x05, 0, // GetVar 0
            ]
        );
    }

    #[test]
    fn test_slots_are_reused_after_scope_exit() {
        let code = compile("{ int a; { int b; } int c; }", ScriptType::Void, &[]);
        assert_eq!(
            code,
            vec![
                0x03, 0, 0, // declare a
                0x03, 1, 0, // declare b
                0x06, 1, // free b
                0x03, 1, 0, // declare c
                0x06, 1, // free c
                0x06, 0, // free a
            ]
        );
    }

    #[test]
    fn test_root_scope_emits_no_frees() {
        let code = compile("int a = 1;", ScriptType::Void, &[]);
        assert_eq!(code, vec![0x03, 0, 1, 0x31, 1, 0, 0, 0]);
    }

    #[test]
    fn test_widening_is_encoded() {
        let code = compile("float f = 2;", ScriptType::Void, &[]);
        assert_eq!(code, vec![0x03, 0, 1, 0x22, 0x31, 2, 0, 0, 0]);
    }

    #[test]
    fn test_while_jumps_to_end_of_buffer() {
        let code = compile("while (true) { }", ScriptType::Void, &[]);
        assert_eq!(
            code,
            vec![0x08, 12, 0, 0, 0, 0x30, 1, 0x09, 0, 0, 0, 0]
        );
    }

    #[test]
    fn test_nested_while_targets() {
        let code = compile(
            "while (a) { while (b) { } print(1); }",
            ScriptType::Void,
            &[("a", ScriptType::Bool), ("b", ScriptType::Bool)],
        );
        assert_eq!(code.len(), 30);
        assert_eq!(code[0], OpCode::CondTest as u8);
        assert_eq!(address_at(&code, 1), 30);
        assert_eq!(code[7], OpCode::CondTest as u8);
        assert_eq!(address_at(&code, 8), 19);
        assert_eq!(code[14], OpCode::Jump as u8);
        assert_eq!(address_at(&code, 15), 7);
        assert_eq!(code[25], OpCode::Jump as u8);
        assert_eq!(address_at(&code, 26), 0);
    }

    #[test]
    fn test_if_chain_targets() {
        let code = compile(
            "if (a) print(1); elseif (b) print(2); else print(3);",
            ScriptType::Void,
            &[("a", ScriptType::Bool), ("b", ScriptType::Bool)],
        );
        assert_eq!(code.len(), 42);
        // each failed test lands on the next branch's test
        assert_eq!(address_at(&code, 1), 18);
        assert_eq!(code[18], OpCode::CondTest as u8);
        assert_eq!(address_at(&code, 19), 36);
        assert_eq!(code[36], OpCode::Print as u8);
        // every taken branch jumps past the else body
        assert_eq!(address_at(&code, 14), 42);
        assert_eq!(address_at(&code, 32), 42);
    }

    #[test]
    fn test_call_encoding() {
        let code = compile("test(n - 1);", ScriptType::Void, &[("n", ScriptType::Int)]);
        assert_eq!(
            code,
            vec![
                0x07, // CallFunction
                4, 0, b't', 0, b'e', 0, b's', 0, b't', 0, // "test"
                1,    // argc
                0x11, 0x05, 0, 0x31, 1, 0, 0, 0, // n - 1
            ]
        );
    }

    #[test]
    fn test_invalid_expression_is_rejected() {
        let program = TypedProgram {
            body: vec![TypedStmt::Print(TypedExpr::invalid())],
        };
        assert!(Compiler::new().compile(&program).is_err());
    }
}
