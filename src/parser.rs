//! Parser for ByteScript
//!
//! Converts tokens into a parse tree (`ast`). Also parses script headers for
//! definition files: `[@channel] TYPE name(TYPE arg, ...)`.

use crate::ast::{BinaryOp, Branch, Expr, Program, Stmt, UnaryOp};
use crate::error::{ErrorKind, Result, ScriptError};
use crate::script::ScriptHeader;
use crate::token::{Span, Token, TokenKind};
use crate::value::ScriptType;

/// Deepest expression tree, and deepest statement nesting, that a script
/// may contain. Later stages walk both recursively.
pub const MAX_NESTING: usize = 256;

/// Deepest nesting of parentheses, call arguments and prefix operators
/// inside one expression.
pub const MAX_RECURSION: usize = 64;

/// The parser state
pub struct Parser {
    tokens: Vec<Token>,
    current: usize,
    /// Active `unary` frames.
    nesting: usize,
    /// Enclosing blocks, loops and conditionals.
    blocks: usize,
}

impl Parser {
    /// Create a new parser from tokens
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            current: 0,
            nesting: 0,
            blocks: 0,
        }
    }

    /// Parse the tokens into a script body
    pub fn parse(&mut self) -> Result<Program> {
        let mut statements = Vec::new();

        while !self.is_at_end() {
            statements.push(self.statement()?);
        }

        Ok(Program::new(statements))
    }

    /// Parse a script signature and leave the parser on the token after `)`.
    pub fn header(&mut self) -> Result<ScriptHeader> {
        let channel = if self.match_token(&TokenKind::At) {
            self.expect_ident("expected channel name after '@'")?
        } else {
            String::new()
        };

        let return_type = self.type_name()?;
        let name = self.expect_ident("expected script name")?;
        self.expect(&TokenKind::LeftParen, "expected '(' after script name")?;

        let mut arguments = Vec::new();
        if !self.check(&TokenKind::RightParen) {
            loop {
                let ty = self.type_name()?;
                let arg = self.expect_ident("expected argument name")?;
                arguments.push((arg, ty));
                if !self.match_token(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RightParen, "expected ')' after arguments")?;

        Ok(ScriptHeader::new(name, return_type, channel, arguments))
    }

    // ==================== Statements ====================

    fn statement(&mut self) -> Result<Stmt> {
        let token = self.peek().clone();

        match &token.kind {
            TokenKind::LeftBrace | TokenKind::While | TokenKind::If => {
                if self.blocks >= MAX_NESTING {
                    return Err(too_deep(token.span));
                }
                self.blocks += 1;
                let stmt = self.compound_statement(&token);
                self.blocks -= 1;
                stmt
            }
            TokenKind::Return => self.return_statement(),
            TokenKind::Print => self.print_statement(),
            kind if kind.is_type_name() => self.declaration(),
            TokenKind::Ident(name) => {
                let name = name.clone();
                self.advance();
                if self.match_token(&TokenKind::Equal) {
                    let value = self.expression()?;
                    self.expect(&TokenKind::Semicolon, "expected ';' after assignment")?;
                    Ok(Stmt::Assign { name, value, span: token.span })
                } else if self.match_token(&TokenKind::LeftParen) {
                    let (args, _, _) = self.arguments()?;
                    self.expect(&TokenKind::Semicolon, "expected ';' after call")?;
                    Ok(Stmt::Call { name, args, span: token.span })
                } else {
                    Err(ScriptError::new(
                        ErrorKind::ExpectedToken(
                            "expected '=' or '(' after identifier".to_string(),
                            format!("{}", self.peek().kind),
                        ),
                        Some(self.peek().span),
                    ))
                }
            }
            other => Err(ScriptError::new(
                ErrorKind::UnexpectedToken(format!("{}", other)),
                Some(token.span),
            )),
        }
    }

    fn compound_statement(&mut self, token: &Token) -> Result<Stmt> {
        match token.kind {
            TokenKind::While => self.while_statement(),
            TokenKind::If => self.if_statement(),
            _ => {
                self.advance(); // consume '{'
                let stmts = self.block_statements()?;
                Ok(Stmt::Block { stmts, span: token.span })
            }
        }
    }

    fn declaration(&mut self) -> Result<Stmt> {
        let span = self.peek().span;
        let ty = self.type_name()?;
        let name = self.expect_ident("expected variable name")?;

        let initializer = if self.match_token(&TokenKind::Equal) {
            Some(self.expression()?)
        } else {
            None
        };

        self.expect(&TokenKind::Semicolon, "expected ';' after declaration")?;
        Ok(Stmt::Declare { ty, name, initializer, span })
    }

    fn while_statement(&mut self) -> Result<Stmt> {
        let span = self.advance().span; // consume 'while'
        let condition = self.parenthesized_condition("while")?;
        let body = Box::new(self.statement()?);
        Ok(Stmt::While { condition, body, span })
    }

    fn if_statement(&mut self) -> Result<Stmt> {
        let span = self.advance().span; // consume 'if'

        let condition = self.parenthesized_condition("if")?;
        let body = self.statement()?;
        let mut branches = vec![Branch { condition, body }];

        while self.match_token(&TokenKind::Elseif) {
            let condition = self.parenthesized_condition("elseif")?;
            let body = self.statement()?;
            branches.push(Branch { condition, body });
        }

        let else_branch = if self.match_token(&TokenKind::Else) {
            Some(Box::new(self.statement()?))
        } else {
            None
        };

        Ok(Stmt::If { branches, else_branch, span })
    }

    fn parenthesized_condition(&mut self, keyword: &str) -> Result<Expr> {
        self.expect(&TokenKind::LeftParen, &format!("expected '(' after {}", keyword))?;
        let condition = self.expression()?;
        self.expect(&TokenKind::RightParen, "expected ')' after condition")?;
        Ok(condition)
    }

    fn return_statement(&mut self) -> Result<Stmt> {
        let span = self.advance().span; // consume 'return'

        let value = if self.check(&TokenKind::Semicolon) {
            None
        } else {
            Some(self.expression()?)
        };

        self.expect(&TokenKind::Semicolon, "expected ';' after return")?;
        Ok(Stmt::Return { value, span })
    }

    fn print_statement(&mut self) -> Result<Stmt> {
        let span = self.advance().span; // consume 'print'
        self.expect(&TokenKind::LeftParen, "expected '(' after print")?;
        let value = self.expression()?;
        self.expect(&TokenKind::RightParen, "expected ')' after print argument")?;
        self.expect(&TokenKind::Semicolon, "expected ';' after print")?;
        Ok(Stmt::Print { value, span })
    }

    fn block_statements(&mut self) -> Result<Vec<Stmt>> {
        let mut stmts = Vec::new();

        while !self.check(&TokenKind::RightBrace) && !self.is_at_end() {
            stmts.push(self.statement()?);
        }

        self.expect(&TokenKind::RightBrace, "expected '}' after block")?;

        Ok(stmts)
    }

    // ==================== Expressions ====================

    fn expression(&mut self) -> Result<Expr> {
        self.or_expr().map(|parsed| parsed.expr)
    }

    fn or_expr(&mut self) -> Result<Parsed> {
        self.left_assoc(Self::and_expr, &[(TokenKind::OrOr, BinaryOp::Or)])
    }

    fn and_expr(&mut self) -> Result<Parsed> {
        self.left_assoc(Self::equality, &[(TokenKind::AndAnd, BinaryOp::And)])
    }

    fn equality(&mut self) -> Result<Parsed> {
        self.left_assoc(
            Self::comparison,
            &[(TokenKind::EqualEqual, BinaryOp::Eq), (TokenKind::BangEqual, BinaryOp::Ne)],
        )
    }

    fn comparison(&mut self) -> Result<Parsed> {
        self.left_assoc(
            Self::term,
            &[
                (TokenKind::Less, BinaryOp::Lt),
                (TokenKind::LessEqual, BinaryOp::Le),
                (TokenKind::Greater, BinaryOp::Gt),
                (TokenKind::GreaterEqual, BinaryOp::Ge),
            ],
        )
    }

    fn term(&mut self) -> Result<Parsed> {
        self.left_assoc(
            Self::factor,
            &[(TokenKind::Plus, BinaryOp::Add), (TokenKind::Minus, BinaryOp::Sub)],
        )
    }

    fn factor(&mut self) -> Result<Parsed> {
        self.left_assoc(
            Self::unary,
            &[
                (TokenKind::Star, BinaryOp::Mul),
                (TokenKind::Slash, BinaryOp::Div),
                (TokenKind::Percent, BinaryOp::Mod),
            ],
        )
    }

    /// One left-associative precedence level. The loop does not recurse,
    /// but every operator adds a level to the tree.
    fn left_assoc(
        &mut self,
        operand: fn(&mut Self) -> Result<Parsed>,
        operators: &[(TokenKind, BinaryOp)],
    ) -> Result<Parsed> {
        let mut left = operand(self)?;

        while let Some(op) = self.match_operator(operators) {
            let right = operand(self)?;
            left = binary(left, op, right)?;
        }

        Ok(left)
    }

    fn match_operator(&mut self, operators: &[(TokenKind, BinaryOp)]) -> Option<BinaryOp> {
        let op = operators
            .iter()
            .find(|(kind, _)| self.check(kind))
            .map(|(_, op)| *op)?;
        self.advance();
        Some(op)
    }

    /// Every recursive path through the expression grammar passes here.
    fn unary(&mut self) -> Result<Parsed> {
        if self.nesting >= MAX_RECURSION {
            return Err(ScriptError::new(
                ErrorKind::NestingTooDeep(MAX_RECURSION),
                Some(self.peek().span),
            ));
        }

        self.nesting += 1;
        let parsed = self.prefixed();
        self.nesting -= 1;
        parsed
    }

    fn prefixed(&mut self) -> Result<Parsed> {
        let op = if self.match_token(&TokenKind::Minus) {
            UnaryOp::Neg
        } else if self.match_token(&TokenKind::Bang) {
            UnaryOp::Not
        } else {
            return self.power();
        };

        let span = self.previous().span;
        if op == UnaryOp::Neg {
            if let Some(literal) = self.negative_literal(span)? {
                return Ok(literal);
            }
        }

        let operand = self.unary()?;
        nested(
            Expr::Unary {
                op,
                operand: Box::new(operand.expr),
                span,
            },
            operand.depth + 1,
        )
    }

    /// Fold `-` and a following int literal into one literal, unless the
    /// literal is the base of `^`. This is how `-2147483648` is written.
    fn negative_literal(&mut self, minus: Span) -> Result<Option<Parsed>> {
        let &TokenKind::Int(magnitude) = &self.peek().kind else {
            return Ok(None);
        };
        if self.next_is(&TokenKind::Caret) {
            return Ok(None);
        }

        let span = minus.to(self.advance().span);
        let value = i32::try_from(-magnitude).map_err(|_| {
            ScriptError::new(ErrorKind::InvalidNumber(format!("-{}", magnitude)), Some(span))
        })?;
        Ok(Some(leaf(Expr::Int { value, span })))
    }

    /// `^` binds tighter than unary minus and associates to the right.
    fn power(&mut self) -> Result<Parsed> {
        let base = self.primary()?;
        if self.match_token(&TokenKind::Caret) {
            let exponent = self.unary()?;
            return binary(base, BinaryOp::Pow, exponent);
        }
        Ok(base)
    }

    /// Call arguments, the closing paren's span and the deepest argument.
    fn arguments(&mut self) -> Result<(Vec<Expr>, Span, usize)> {
        let mut args = Vec::new();
        let mut depth = 0;

        if !self.check(&TokenKind::RightParen) {
            loop {
                let arg = self.or_expr()?;
                depth = depth.max(arg.depth);
                args.push(arg.expr);
                if !self.match_token(&TokenKind::Comma) {
                    break;
                }
            }
        }

        let end_span = self.expect(&TokenKind::RightParen, "expected ')' after arguments")?.span;
        Ok((args, end_span, depth))
    }

    fn primary(&mut self) -> Result<Parsed> {
        let token = self.peek().clone();

        match &token.kind {
            TokenKind::Int(n) => {
                self.advance();
                let value = i32::try_from(*n).map_err(|_| {
                    ScriptError::new(ErrorKind::InvalidNumber(n.to_string()), Some(token.span))
                })?;
                Ok(leaf(Expr::Int { value, span: token.span }))
            }
            TokenKind::Float(n) => {
                self.advance();
                Ok(leaf(Expr::Float { value: *n, span: token.span }))
            }
            TokenKind::String(s) => {
                self.advance();
                Ok(leaf(Expr::String { value: s.clone(), span: token.span }))
            }
            TokenKind::True => {
                self.advance();
                Ok(leaf(Expr::Bool { value: true, span: token.span }))
            }
            TokenKind::False => {
                self.advance();
                Ok(leaf(Expr::Bool { value: false, span: token.span }))
            }
            TokenKind::Ident(name) => {
                let name = name.clone();
                self.advance();
                if self.match_token(&TokenKind::LeftParen) {
                    let (args, end_span, depth) = self.arguments()?;
                    nested(
                        Expr::Call { name, args, span: token.span.to(end_span) },
                        depth + 1,
                    )
                } else {
                    Ok(leaf(Expr::Variable { name, span: token.span }))
                }
            }
            TokenKind::LeftParen => {
                self.advance();
                let inner = self.or_expr()?;
                self.expect(&TokenKind::RightParen, "expected ')' after expression")?;
                nested(
                    Expr::Grouping {
                        expr: Box::new(inner.expr),
                        span: token.span,
                    },
                    inner.depth + 1,
                )
            }
            _ => Err(ScriptError::new(
                ErrorKind::ExpectedExpression,
                Some(token.span),
            )),
        }
    }

    // ==================== Helpers ====================

    fn type_name(&mut self) -> Result<ScriptType> {
        let token = self.peek().clone();
        let ty = match token.kind {
            TokenKind::BoolType => ScriptType::Bool,
            TokenKind::IntType => ScriptType::Int,
            TokenKind::FloatType => ScriptType::Float,
            TokenKind::StringType => ScriptType::String,
            TokenKind::VoidType => ScriptType::Void,
            TokenKind::ObjectType => ScriptType::Object,
            other => {
                return Err(ScriptError::new(
                    ErrorKind::ExpectedType(format!("{}", other)),
                    Some(token.span),
                ))
            }
        };
        self.advance();
        Ok(ty)
    }

    pub(crate) fn peek(&self) -> &Token {
        &self.tokens[self.current]
    }

    fn previous(&self) -> &Token {
        &self.tokens[self.current - 1]
    }

    fn next_is(&self, kind: &TokenKind) -> bool {
        self.tokens
            .get(self.current + 1)
            .is_some_and(|t| std::mem::discriminant(&t.kind) == std::mem::discriminant(kind))
    }

    pub(crate) fn is_at_end(&self) -> bool {
        matches!(self.peek().kind, TokenKind::Eof)
    }

    pub(crate) fn advance(&mut self) -> &Token {
        if !self.is_at_end() {
            self.current += 1;
        }
        self.previous()
    }

    pub(crate) fn check(&self, kind: &TokenKind) -> bool {
        std::mem::discriminant(&self.peek().kind) == std::mem::discriminant(kind)
    }

    fn match_token(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    pub(crate) fn expect(&mut self, kind: &TokenKind, message: &str) -> Result<&Token> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(ScriptError::new(
                ErrorKind::ExpectedToken(message.to_string(), format!("{}", self.peek().kind)),
                Some(self.peek().span),
            ))
        }
    }

    fn expect_ident(&mut self, message: &str) -> Result<String> {
        if let TokenKind::Ident(name) = &self.peek().kind {
            let name = name.clone();
            self.advance();
            Ok(name)
        } else {
            Err(ScriptError::new(
                ErrorKind::ExpectedToken(message.to_string(), format!("{}", self.peek().kind)),
                Some(self.peek().span),
            ))
        }
    }
}

/// An expression with the height of its tree.
struct Parsed {
    expr: Expr,
    depth: usize,
}

fn leaf(expr: Expr) -> Parsed {
    Parsed { expr, depth: 1 }
}

/// Wrap `expr`, rejecting trees deeper than [`MAX_NESTING`].
fn nested(expr: Expr, depth: usize) -> Result<Parsed> {
    if depth > MAX_NESTING {
        return Err(too_deep(expr.span()));
    }
    Ok(Parsed { expr, depth })
}

fn binary(left: Parsed, op: BinaryOp, right: Parsed) -> Result<Parsed> {
    let span = left.expr.span().to(right.expr.span());
    let depth = left.depth.max(right.depth) + 1;
    nested(
        Expr::Binary {
            left: Box::new(left.expr),
            op,
            right: Box::new(right.expr),
            span,
        },
        depth,
    )
}

fn too_deep(span: Span) -> ScriptError {
    ScriptError::new(ErrorKind::NestingTooDeep(MAX_NESTING), Some(span))
}
