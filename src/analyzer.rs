//! Semantic analysis: parse tree → typed program
//!
//! Walks a script body once, infers a type for every expression, resolves
//! every variable to a slot id and checks the typing and scoping rules.
//! Problems are collected as diagnostics; analysis always runs to the end so
//! the caller sees every error at once.

use tracing::trace;

use crate::ast::{BinaryOp, Expr, Program, Stmt, UnaryOp};
use crate::ir::{TypedCall, TypedExpr, TypedExprKind, TypedProgram, TypedStmt};
use crate::script::{KnownHeaders, ScriptHeader};
use crate::token::Span;
use crate::value::ScriptType;

/// Most variables (arguments included) live at once in one unit.
pub const MAX_LIVE_SLOTS: usize = 255;

/// Outcome of analyzing one script body.
#[derive(Debug, Clone)]
pub struct Analysis {
    /// Present only when there were no errors.
    pub program: Option<TypedProgram>,
    pub errors: Vec<String>,
}

impl Analysis {
    pub fn success(&self) -> bool {
        self.errors.is_empty()
    }
}

#[derive(Debug, Clone)]
struct Variable {
    name: String,
    ty: ScriptType,
    slot: u8,
}

/// Analyze `program` as the body of the script described by `header`.
///
/// `known` holds the headers of every other callable script. The script's
/// own header is always callable, so recursion needs no extra setup.
pub fn analyze(program: &Program, header: &ScriptHeader, known: &KnownHeaders) -> Analysis {
    let mut analyzer = Analyzer::new(header, known);
    let body = analyzer.script_body(&program.statements);

    if analyzer.errors.is_empty() {
        Analysis {
            program: Some(TypedProgram { body }),
            errors: Vec::new(),
        }
    } else {
        Analysis {
            program: None,
            errors: analyzer.errors,
        }
    }
}

struct Analyzer<'a> {
    header: &'a ScriptHeader,
    known: &'a KnownHeaders,
    /// Innermost scope last.
    scopes: Vec<Vec<Variable>>,
    next_slot: usize,
    errors: Vec<String>,
}

impl<'a> Analyzer<'a> {
    fn new(header: &'a ScriptHeader, known: &'a KnownHeaders) -> Self {
        Self {
            header,
            known,
            scopes: Vec::new(),
            next_slot: 0,
            errors: header.validate(),
        }
    }

    fn script_body(&mut self, stmts: &[Stmt]) -> Vec<TypedStmt> {
        self.scopes.push(Vec::new());
        let header = self.header;
        for (name, ty) in header.arguments() {
            if self.lookup(name).is_none() {
                self.declare(name, *ty, Span::default());
            }
        }

        let body: Vec<TypedStmt> = stmts.iter().map(|s| self.statement(s)).collect();

        if header.return_type() != ScriptType::Void && !body.iter().any(TypedStmt::always_returns) {
            self.errors.push(format!(
                "script '{}' can finish without returning a value of type {}",
                header.name(), header.return_type()
            ));
        }

        self.scopes.pop();
        body
    }

    fn error(&mut self, span: Span, message: String) {
        trace!(line = span.line, %message, "semantic error");
        if span.line > 0 {
            self.errors.push(format!("[line {}] {}", span.line, message));
        } else {
            self.errors.push(message);
        }
    }

    // ==================== Scopes ====================

    fn lookup(&self, name: &str) -> Option<&Variable> {
        self.scopes
            .iter()
            .rev()
            .flat_map(|scope| scope.iter())
            .find(|v| v.name == name)
    }

    fn declare(&mut self, name: &str, ty: ScriptType, span: Span) -> Option<u8> {
        if self.next_slot >= MAX_LIVE_SLOTS {
            self.error(
                span,
                format!(
                    "cannot declare '{}': more than {} variables alive at once",
                    name, MAX_LIVE_SLOTS
                ),
            );
            return None;
        }

        let slot = self.next_slot as u8;
        self.next_slot += 1;
        if let Some(scope) = self.scopes.last_mut() {
            scope.push(Variable {
                name: name.to_string(),
                ty,
                slot,
            });
        }
        Some(slot)
    }

    /// Close the innermost scope and return its slots, latest first.
    fn pop_scope(&mut self) -> Vec<u8> {
        let scope = self.scopes.pop().unwrap_or_default();
        self.next_slot -= scope.len();
        scope.iter().rev().map(|v| v.slot).collect()
    }

    // ==================== Statements ====================

    fn statement(&mut self, stmt: &Stmt) -> TypedStmt {
        match stmt {
            Stmt::Block { stmts, .. } => {
                self.scopes.push(Vec::new());
                let body = stmts.iter().map(|s| self.statement(s)).collect();
                let frees = self.pop_scope();
                TypedStmt::Block { body, frees }
            }

            Stmt::While { condition, body, .. } => {
                let condition = self.condition(condition, "while");
                let body = Box::new(self.nested(body));
                TypedStmt::While { condition, body }
            }

            Stmt::If { branches, else_branch, .. } => {
                let branches = branches
                    .iter()
                    .map(|branch| {
                        let condition = self.condition(&branch.condition, "if");
                        (condition, self.nested(&branch.body))
                    })
                    .collect();
                let else_branch = else_branch.as_ref().map(|e| Box::new(self.nested(e)));
                TypedStmt::If { branches, else_branch }
            }

            Stmt::Declare { ty, name, initializer, span } => {
                self.declaration(*ty, name, initializer.as_ref(), *span)
            }

            Stmt::Assign { name, value, span } => {
                let value = self.expression(value);
                let Some(target) = self.lookup(name).cloned() else {
                    self.error(*span, format!("assignment to undeclared variable '{}'", name));
                    return TypedStmt::Assign { slot: 0, value };
                };
                if !value.is_invalid() && !target.ty.is_assignable_from(value.ty) {
                    self.error(
                        *span,
                        format!(
                            "cannot assign {} to variable '{}' of type {}",
                            value.ty, name, target.ty
                        ),
                    );
                }
                TypedStmt::Assign {
                    slot: target.slot,
                    value: value.coerce_to(target.ty),
                }
            }

            Stmt::Return { value, span } => self.return_statement(value.as_ref(), *span),

            Stmt::Print { value, span } => {
                let value = self.expression(value);
                if !value.is_invalid() && value.ty == ScriptType::Void {
                    self.error(*span, "cannot print a void value".to_string());
                }
                TypedStmt::Print(value)
            }

            Stmt::Call { name, args, span } => TypedStmt::Call(self.call(name, args, *span).0),
        }
    }

    /// Loop and branch bodies get their own scope even without braces.
    fn nested(&mut self, stmt: &Stmt) -> TypedStmt {
        if matches!(stmt, Stmt::Block { .. }) {
            return self.statement(stmt);
        }
        self.scopes.push(Vec::new());
        let inner = self.statement(stmt);
        let frees = self.pop_scope();
        if frees.is_empty() {
            inner
        } else {
            TypedStmt::Block { body: vec![inner], frees }
        }
    }

    fn condition(&mut self, expr: &Expr, keyword: &str) -> TypedExpr {
        let condition = self.expression(expr);
        if !condition.is_invalid() && condition.ty != ScriptType::Bool {
            self.error(
                expr.span(),
                format!("{} condition must be bool, got {}", keyword, condition.ty),
            );
        }
        condition
    }

    fn declaration(
        &mut self,
        ty: ScriptType,
        name: &str,
        initializer: Option<&Expr>,
        span: Span,
    ) -> TypedStmt {
        // The initializer cannot see the variable it initializes.
        let initializer = initializer.map(|e| self.expression(e));

        if ty == ScriptType::Void {
            self.error(span, format!("variable '{}' cannot have type void", name));
        }

        if let Some(init) = &initializer {
            if !init.is_invalid() && !ty.is_assignable_from(init.ty) {
                self.error(
                    span,
                    format!("cannot initialize {} variable '{}' with {}", ty, name, init.ty),
                );
            }
        }
        let initializer = initializer.map(|e| e.coerce_to(ty));

        if self.lookup(name).is_some() {
            self.error(span, format!("variable '{}' is already declared", name));
            return TypedStmt::Declare { slot: 0, initializer };
        }

        let slot = self.declare(name, ty, span).unwrap_or(0);
        TypedStmt::Declare { slot, initializer }
    }

    fn return_statement(&mut self, value: Option<&Expr>, span: Span) -> TypedStmt {
        let expected = self.header.return_type();
        let script = self.header.name().to_string();

        match value {
            None => {
                if expected != ScriptType::Void {
                    self.error(
                        span,
                        format!("script '{}' must return a value of type {}", script, expected),
                    );
                }
                TypedStmt::Return(None)
            }
            Some(expr) => {
                let value = self.expression(expr);
                if expected == ScriptType::Void {
                    self.error(
                        span,
                        format!("script '{}' returns void and cannot return a value", script),
                    );
                } else if !value.is_invalid() && !expected.is_assignable_from(value.ty) {
                    self.error(
                        span,
                        format!(
                            "script '{}' must return {}, got {}",
                            script, expected, value.ty
                        ),
                    );
                }
                TypedStmt::Return(Some(value.coerce_to(expected)))
            }
        }
    }

    // ==================== Expressions ====================

    fn expression(&mut self, expr: &Expr) -> TypedExpr {
        match expr {
            Expr::Int { value, .. } => TypedExpr::new(ScriptType::Int, TypedExprKind::Int(*value)),
            Expr::Float { value, .. } => {
                TypedExpr::new(ScriptType::Float, TypedExprKind::Float(*value))
            }
            Expr::Bool { value, .. } => {
                TypedExpr::new(ScriptType::Bool, TypedExprKind::Bool(*value))
            }
            Expr::String { value, span } => {
                let units = value.encode_utf16().count();
                if units > u16::MAX as usize {
                    self.error(
                        *span,
                        format!("string literal of {} UTF-16 units is too long", units),
                    );
                    return TypedExpr::invalid();
                }
                TypedExpr::new(ScriptType::String, TypedExprKind::Str(value.clone()))
            }

            Expr::Variable { name, span } => match self.lookup(name) {
                Some(var) => TypedExpr::new(var.ty, TypedExprKind::Variable(var.slot)),
                None => {
                    self.error(*span, format!("undefined variable '{}'", name));
                    TypedExpr::invalid()
                }
            },

            Expr::Grouping { expr, .. } => self.expression(expr),

            Expr::Unary { op, operand, span } => {
                let operand = self.expression(operand);
                if operand.is_invalid() {
                    return operand;
                }
                let ok = match op {
                    UnaryOp::Not => operand.ty == ScriptType::Bool,
                    UnaryOp::Neg => operand.ty.is_numeric(),
                };
                if !ok {
                    self.error(
                        *span,
                        format!("operator '{}' cannot be applied to {}", op, operand.ty),
                    );
                    return TypedExpr::invalid();
                }
                TypedExpr::new(
                    operand.ty,
                    TypedExprKind::Unary {
                        op: *op,
                        operand: Box::new(operand),
                    },
                )
            }

            Expr::Binary { left, op, right, span } => {
                let left = self.expression(left);
                let right = self.expression(right);
                if left.is_invalid() || right.is_invalid() {
                    return TypedExpr::invalid();
                }

                match binary_result_type(*op, left.ty, right.ty) {
                    Some(ty) => TypedExpr::new(
                        ty,
                        TypedExprKind::Binary {
                            op: *op,
                            left: Box::new(left),
                            right: Box::new(right),
                        },
                    ),
                    None => {
                        self.error(
                            *span,
                            format!(
                                "operator '{}' cannot be applied to {} and {}",
                                op, left.ty, right.ty
                            ),
                        );
                        TypedExpr::invalid()
                    }
                }
            }

            Expr::Call { name, args, span } => {
                let (call, ty) = self.call(name, args, *span);
                match ty {
                    Some(ty) => TypedExpr::new(ty, TypedExprKind::Call(call)),
                    None => TypedExpr::invalid(),
                }
            }
        }
    }

    /// Returns the call and, when the callee exists, its return type.
    fn call(&mut self, name: &str, args: &[Expr], span: Span) -> (TypedCall, Option<ScriptType>) {
        let typed_args: Vec<TypedExpr> = args.iter().map(|a| self.expression(a)).collect();

        let (header, known) = (self.header, self.known);
        let callee = if name == header.name() {
            Some(header)
        } else {
            known.get(name)
        };

        let Some(callee) = callee else {
            self.error(span, format!("unknown function '{}'", name));
            let call = TypedCall { name: name.to_string(), args: typed_args };
            return (call, None);
        };

        if callee.arity() != typed_args.len() {
            self.error(
                span,
                format!(
                    "function '{}' expects {} arguments, got {}",
                    name,
                    callee.arity(),
                    typed_args.len()
                ),
            );
            let call = TypedCall { name: name.to_string(), args: typed_args };
            return (call, Some(callee.return_type()));
        }

        let mut coerced = Vec::with_capacity(typed_args.len());
        for (index, (arg, (param, expected))) in
            typed_args.into_iter().zip(callee.arguments()).enumerate()
        {
            if !arg.is_invalid() && !expected.is_assignable_from(arg.ty) {
                self.error(
                    span,
                    format!(
                        "argument {} ('{}') of function '{}' must be {}, got {}",
                        index + 1,
                        param,
                        name,
                        expected,
                        arg.ty
                    ),
                );
            }
            coerced.push(arg.coerce_to(*expected));
        }

        let call = TypedCall { name: name.to_string(), args: coerced };
        (call, Some(callee.return_type()))
    }
}

/// Result type of a binary operator, or `None` when the operand types are
/// not accepted.
pub fn binary_result_type(op: BinaryOp, left: ScriptType, right: ScriptType) -> Option<ScriptType> {
    use ScriptType::*;

    if left == Void || right == Void {
        return None;
    }

    if op.is_arithmetic() {
        if op == BinaryOp::Add && (left == String || right == String) {
            return Some(String);
        }
        return match (left, right) {
            (Int, Int) => Some(Int),
            (l, r) if l.is_numeric() && r.is_numeric() => Some(Float),
            _ => None,
        };
    }

    if op.is_ordering() {
        return (left.is_numeric() && right.is_numeric()).then_some(Bool);
    }

    if op.is_equality() {
        let comparable = left.is_assignable_from(right) || right.is_assignable_from(left);
        return comparable.then_some(Bool);
    }

    // && and ||
    (left == Bool && right == Bool).then_some(Bool)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;
    use crate::parser::Parser;

    fn header(ret: ScriptType, args: &[(&str, ScriptType)]) -> ScriptHeader {
        ScriptHeader::new(
            "main",
            ret,
            "",
            args.iter().map(|(n, t)| (n.to_string(), *t)).collect(),
        )
    }

    fn run(source: &str, header: &ScriptHeader, known: &KnownHeaders) -> Analysis {
        let tokens = Lexer::new(source).tokenize().unwrap();
        let program = Parser::new(tokens).parse().unwrap();
        analyze(&program, header, known)
    }

    fn errors_of(source: &str) -> Vec<String> {
        run(source, &header(ScriptType::Void, &[]), &KnownHeaders::new()).errors
    }

    #[test]
    fn test_promotion_table() {
        use ScriptType::*;
        let ops = [
            BinaryOp::Add,
            BinaryOp::Sub,
            BinaryOp::Mul,
            BinaryOp::Div,
            BinaryOp::Mod,
            BinaryOp::Pow,
        ];
        for op in ops {
            assert_eq!(binary_result_type(op, Int, Int), Some(Int));
            assert_eq!(binary_result_type(op, Int, Float), Some(Float));
            assert_eq!(binary_result_type(op, Float, Int), Some(Float));
            assert_eq!(binary_result_type(op, Float, Float), Some(Float));
            assert_eq!(binary_result_type(op, Bool, Int), None);
        }
        for other in [Bool, Int, Float, String, Object] {
            assert_eq!(binary_result_type(BinaryOp::Add, String, other), Some(String));
            assert_eq!(binary_result_type(BinaryOp::Add, other, String), Some(String));
        }
        assert_eq!(binary_result_type(BinaryOp::Sub, String, Int), None);
        assert_eq!(binary_result_type(BinaryOp::Add, String, Void), None);
    }

    #[test]
    fn test_comparison_and_logic_types() {
        use ScriptType::*;
        assert_eq!(binary_result_type(BinaryOp::Lt, Int, Float), Some(Bool));
        assert_eq!(binary_result_type(BinaryOp::Lt, String, String), None);
        assert_eq!(binary_result_type(BinaryOp::Eq, String, String), Some(Bool));
        assert_eq!(binary_result_type(BinaryOp::Eq, Int, Float), Some(Bool));
        assert_eq!(binary_result_type(BinaryOp::Ne, Bool, Int), None);
        assert_eq!(binary_result_type(BinaryOp::And, Bool, Bool), Some(Bool));
        assert_eq!(binary_result_type(BinaryOp::Or, Bool, Int), None);
    }

    #[test]
    fn test_valid_script_produces_program() {
        let analysis = run(
            "int total = 0; while (total < n) { total = total + 1; } return total;",
            &header(ScriptType::Int, &[("n", ScriptType::Int)]),
            &KnownHeaders::new(),
        );
        assert!(analysis.success(), "{:?}", analysis.errors);
        assert!(analysis.program.is_some());
    }

    #[test]
    fn test_error_sentinel_does_not_cascade() {
        let errors = errors_of("int x = (true + 1) * 2 - 3;");
        assert_eq!(errors.len(), 1, "{:?}", errors);
        assert!(errors[0].contains("operator '+' cannot be applied to bool and int"));
    }

    #[test]
    fn test_undefined_and_redeclared_variables() {
        let errors = errors_of("int a = b; int a;");
        assert_eq!(errors.len(), 2, "{:?}", errors);
        assert!(errors[0].contains("undefined variable 'b'"));
        assert!(errors[1].contains("variable 'a' is already declared"));
    }

    #[test]
    fn test_shadowing_is_rejected() {
        let errors = errors_of("int a; { int a; }");
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("already declared"));
    }

    #[test]
    fn test_sibling_scopes_may_reuse_names() {
        assert!(errors_of("{ int a; } { float a; }").is_empty());
    }

    #[test]
    fn test_variable_not_visible_after_block() {
        let errors = errors_of("{ int a = 1; } a = 2;");
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("undeclared variable 'a'"));
    }

    #[test]
    fn test_initializer_cannot_see_its_variable() {
        let errors = errors_of("int a = a;");
        assert!(errors[0].contains("undefined variable 'a'"));
    }

    #[test]
    fn test_assignment_compatibility() {
        assert!(errors_of("float f = 1; f = 2;").is_empty());
        let errors = errors_of("int i = 1.5;");
        assert!(errors[0].contains("cannot initialize int variable 'i' with float"));
        let errors = errors_of("string s; s = 3;");
        assert!(errors[0].contains("cannot assign int to variable 's' of type string"));
    }

    #[test]
    fn test_int_to_float_is_widened_explicitly() {
        let analysis = run("float f = 1;", &header(ScriptType::Void, &[]), &KnownHeaders::new());
        let program = analysis.program.unwrap();
        match &program.body[0] {
            TypedStmt::Declare { initializer: Some(init), .. } => {
                assert_eq!(init.ty, ScriptType::Float);
                assert!(matches!(init.kind, TypedExprKind::ToFloat(_)));
            }
            other => panic!("unexpected statement {:?}", other),
        }
    }

    #[test]
    fn test_conditions_must_be_bool() {
        let errors = errors_of("if (1) { } while (\"x\") { }");
        assert_eq!(errors.len(), 2);
        assert!(errors[0].contains("if condition must be bool, got int"));
        assert!(errors[1].contains("while condition must be bool, got string"));
    }

    #[test]
    fn test_calls_are_checked_against_headers() {
        let mut known = KnownHeaders::new();
        known.insert(
            "scale".to_string(),
            ScriptHeader::new(
                "scale",
                ScriptType::Float,
                "",
                vec![("v".to_string(), ScriptType::Float), ("k".to_string(), ScriptType::Int)],
            ),
        );
        let h = header(ScriptType::Void, &[]);

        assert!(run("float x = scale(1, 2);", &h, &known).success());

        let errors = run("scale(1);", &h, &known).errors;
        assert!(errors[0].contains("expects 2 arguments, got 1"));

        let errors = run("scale(1.0, 2.0);", &h, &known).errors;
        assert!(errors[0].contains("argument 2 ('k') of function 'scale' must be int, got float"));

        let errors = run("missing();", &h, &known).errors;
        assert!(errors[0].contains("unknown function 'missing'"));

        let errors = run("int x = scale(1.0, 2);", &h, &known).errors;
        assert!(errors[0].contains("cannot initialize int variable 'x' with float"));
    }

    #[test]
    fn test_recursion_needs_no_known_headers() {
        let analysis = run(
            "if (n < 2) { return n; } return fib(n - 1) + fib(n - 2);",
            &ScriptHeader::new("fib", ScriptType::Int, "", vec![("n".to_string(), ScriptType::Int)]),
            &KnownHeaders::new(),
        );
        assert!(analysis.success(), "{:?}", analysis.errors);
    }

    #[test]
    fn test_return_checks() {
        let errors = errors_of("return 1;");
        assert!(errors[0].contains("returns void and cannot return a value"));

        let h = header(ScriptType::Int, &[]);
        let errors = run("return;", &h, &KnownHeaders::new()).errors;
        assert!(errors[0].contains("must return a value of type int"));

        let errors = run("return \"no\";", &h, &KnownHeaders::new()).errors;
        assert!(errors[0].contains("must return int, got string"));
    }

    #[test]
    fn test_missing_return_is_detected() {
        let h = header(ScriptType::Int, &[("x", ScriptType::Int)]);
        let known = KnownHeaders::new();

        let errors = run("if (x > 0) { return 1; }", &h, &known).errors;
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("can finish without returning"));

        assert!(run("if (x > 0) { return 1; } else { return 2; }", &h, &known).success());
        assert!(run("if (x > 0) return 1; elseif (x < 0) return 2; else return 0;", &h, &known)
            .success());
        assert!(run("while (true) { return 1; }", &h, &known).success());
        assert!(!run("while (x > 0) { return 1; }", &h, &known).success());
    }

    #[test]
    fn test_void_values_are_rejected() {
        let mut known = KnownHeaders::new();
        known.insert(
            "noop".to_string(),
            ScriptHeader::new("noop", ScriptType::Void, "", Vec::new()),
        );
        let h = header(ScriptType::Void, &[]);
        let errors = run("print(noop()); int x = noop() + 1; void v;", &h, &known).errors;
        assert_eq!(errors.len(), 3, "{:?}", errors);
        assert!(errors[0].contains("cannot print a void value"));
        assert!(errors[1].contains("cannot be applied to void and int"));
        assert!(errors[2].contains("cannot have type void"));
    }

    #[test]
    fn test_slot_limit() {
        let mut source = String::new();
        for i in 0..256 {
            source.push_str(&format!("int v{};", i));
        }
        let errors = errors_of(&source);
        assert_eq!(errors.len(), 1, "{:?}", errors);
        assert!(errors[0].contains("more than 255 variables"));
    }

    #[test]
    fn test_slots_are_released_per_block() {
        let mut source = String::new();
        for _ in 0..3 {
            source.push('{');
            for i in 0..200 {
                source.push_str(&format!("int v{};", i));
            }
            source.push('}');
        }
        assert!(errors_of(&source).is_empty());
    }

    #[test]
    fn test_header_errors_are_reported() {
        let h = ScriptHeader::new(
            "bad",
            ScriptType::Void,
            "",
            vec![("a".to_string(), ScriptType::Int), ("a".to_string(), ScriptType::Int)],
        );
        let errors = run("", &h, &KnownHeaders::new()).errors;
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("declared twice"));
    }

    #[test]
    fn test_errors_carry_line_numbers() {
        let errors = errors_of("int a;\n\na = true;");
        assert!(errors[0].starts_with("[line 3] "));
    }
}
