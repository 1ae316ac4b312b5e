//! Recursive-descent parser producing [`Module`].

use crate::ast::*;
use crate::lexer::{tokenize, Token, TokenKind};

/// Sources above this size are rejected before tokenizing.
pub const MAX_SOURCE_BYTES: usize = 256 * 1024;

/// Maximum combined nesting of blocks and expressions.
pub const MAX_NESTING_DEPTH: usize = 64;

/// Maximum left-leaning links (binary operators, `.attr`, calls, subscripts)
/// in one statement. Each link adds a tree level that nesting does not see.
pub const MAX_CHAIN_LINKS: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorCode {
    SourceTooLarge,
    InvalidCharacter,
    UnterminatedString,
    InvalidNumber,
    InconsistentIndent,
    UnexpectedToken,
    UnexpectedEof,
    InvalidAssignmentTarget,
    NestingTooDeep,
    Unsupported,
}

impl ParseErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParseErrorCode::SourceTooLarge => "source_too_large",
            ParseErrorCode::InvalidCharacter => "invalid_character",
            ParseErrorCode::UnterminatedString => "unterminated_string",
            ParseErrorCode::InvalidNumber => "invalid_number",
            ParseErrorCode::InconsistentIndent => "inconsistent_indent",
            ParseErrorCode::UnexpectedToken => "unexpected_token",
            ParseErrorCode::UnexpectedEof => "unexpected_eof",
            ParseErrorCode::InvalidAssignmentTarget => "invalid_assignment_target",
            ParseErrorCode::NestingTooDeep => "nesting_too_deep",
            ParseErrorCode::Unsupported => "unsupported",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub code: ParseErrorCode,
    pub message: String,
    pub span: Span,
}

impl ParseError {
    pub fn new(code: ParseErrorCode, message: impl Into<String>, span: Span) -> Self {
        Self {
            code,
            message: message.into(),
            span,
        }
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "parse error [{}] at {}: {}",
            self.code.as_str(),
            self.span,
            self.message
        )
    }
}

impl std::error::Error for ParseError {}

/// Parse a complete plugin source file.
pub fn parse(src: &str) -> Result<Module, ParseError> {
    if src.len() > MAX_SOURCE_BYTES {
        return Err(ParseError::new(
            ParseErrorCode::SourceTooLarge,
            format!(
                "source is {} bytes, limit is {}",
                src.len(),
                MAX_SOURCE_BYTES
            ),
            Span::new(1, 1),
        ));
    }
    let tokens = tokenize(src)?;
    let mut p = Parser {
        tokens,
        pos: 0,
        depth: 0,
        links: 0,
    };
    let mut body = Vec::new();
    while !p.at(&TokenKind::Eof) {
        body.push(p.statement()?);
    }
    Ok(Module { body })
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
    links: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        // tokenize() always terminates the stream with Eof.
        let last = self.tokens.len().saturating_sub(1);
        &self.tokens[self.pos.min(last)]
    }

    fn at(&self, kind: &TokenKind) -> bool {
        &self.peek().kind == kind
    }

    fn advance(&mut self) -> Token {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.at(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn unexpected(&self, expected: &str) -> ParseError {
        let tok = self.peek();
        let code = if tok.kind == TokenKind::Eof {
            ParseErrorCode::UnexpectedEof
        } else {
            ParseErrorCode::UnexpectedToken
        };
        ParseError::new(
            code,
            format!("expected {expected}, found {}", tok.kind.describe()),
            tok.span,
        )
    }

    fn expect(&mut self, kind: TokenKind, expected: &str) -> Result<Token, ParseError> {
        if self.at(&kind) {
            Ok(self.advance())
        } else {
            Err(self.unexpected(expected))
        }
    }

    fn name(&mut self) -> Result<String, ParseError> {
        match &self.peek().kind {
            TokenKind::Name(n) => {
                let n = n.clone();
                self.advance();
                Ok(n)
            }
            _ => Err(self.unexpected("identifier")),
        }
    }

    fn enter(&mut self, span: Span) -> Result<(), ParseError> {
        self.depth += 1;
        if self.depth > MAX_NESTING_DEPTH {
            return Err(ParseError::new(
                ParseErrorCode::NestingTooDeep,
                format!("nesting exceeds {MAX_NESTING_DEPTH} levels"),
                span,
            ));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    /// Charge one chain link against the current statement.
    fn link(&mut self, span: Span) -> Result<(), ParseError> {
        self.links += 1;
        if self.links > MAX_CHAIN_LINKS {
            return Err(ParseError::new(
                ParseErrorCode::NestingTooDeep,
                format!("statement chains more than {MAX_CHAIN_LINKS} operators"),
                span,
            ));
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // statements
    // ---------------------------------------------------------------------

    fn statement(&mut self) -> Result<Stmt, ParseError> {
        let span = self.peek().span;
        self.links = 0;
        match self.peek().kind {
            TokenKind::Def => self.function_def(),
            TokenKind::If => {
                self.advance();
                self.if_tail(span)
            }
            TokenKind::While => {
                self.advance();
                let test = self.expression()?;
                let body = self.block()?;
                Ok(Stmt {
                    kind: StmtKind::While { test, body },
                    span,
                })
            }
            TokenKind::For => {
                self.advance();
                let target = self.name()?;
                self.expect(TokenKind::In, "'in'")?;
                let iter = self.expression()?;
                let body = self.block()?;
                Ok(Stmt {
                    kind: StmtKind::For { target, iter, body },
                    span,
                })
            }
            TokenKind::Indent => Err(ParseError::new(
                ParseErrorCode::InconsistentIndent,
                "unexpected indent",
                span,
            )),
            _ => {
                let stmt = self.simple_statement()?;
                if !self.eat(&TokenKind::Newline) {
                    return Err(self.unexpected("end of line"));
                }
                Ok(stmt)
            }
        }
    }

    fn function_def(&mut self) -> Result<Stmt, ParseError> {
        let span = self.advance().span;
        let name = self.name()?;
        self.expect(TokenKind::LParen, "'('")?;
        let mut params = Vec::new();
        while !self.at(&TokenKind::RParen) {
            let pspan = self.peek().span;
            let p = self.name()?;
            if params.contains(&p) {
                return Err(ParseError::new(
                    ParseErrorCode::UnexpectedToken,
                    format!("duplicate parameter '{p}'"),
                    pspan,
                ));
            }
            params.push(p);
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RParen, "')'")?;
        let body = self.block()?;
        Ok(Stmt {
            kind: StmtKind::FunctionDef(FunctionDef { name, params, body }),
            span,
        })
    }

    fn if_tail(&mut self, span: Span) -> Result<Stmt, ParseError> {
        let test = self.expression()?;
        let body = self.block()?;
        let orelse = if self.at(&TokenKind::Elif) {
            let elif_span = self.advance().span;
            self.enter(elif_span)?;
            let elif = self.if_tail(elif_span);
            self.leave();
            vec![elif?]
        } else if self.eat(&TokenKind::Else) {
            self.block()?
        } else {
            Vec::new()
        };
        Ok(Stmt {
            kind: StmtKind::If { test, body, orelse },
            span,
        })
    }

    /// `:` followed by either an indented suite or a single simple statement.
    fn block(&mut self) -> Result<Vec<Stmt>, ParseError> {
        let colon = self.expect(TokenKind::Colon, "':'")?;
        self.enter(colon.span)?;
        let body = if self.eat(&TokenKind::Newline) {
            if !self.eat(&TokenKind::Indent) {
                return Err(self.unexpected("indented block"));
            }
            let mut body = Vec::new();
            while !self.eat(&TokenKind::Dedent) {
                if self.at(&TokenKind::Eof) {
                    return Err(self.unexpected("dedent"));
                }
                body.push(self.statement()?);
            }
            body
        } else {
            let stmt = self.simple_statement()?;
            if !self.eat(&TokenKind::Newline) {
                return Err(self.unexpected("end of line"));
            }
            vec![stmt]
        };
        self.leave();
        Ok(body)
    }

    fn simple_statement(&mut self) -> Result<Stmt, ParseError> {
        let span = self.peek().span;
        let kind = match self.peek().kind {
            TokenKind::Import => {
                self.advance();
                let mut names = vec![self.import_alias(true)?];
                while self.eat(&TokenKind::Comma) {
                    names.push(self.import_alias(true)?);
                }
                StmtKind::Import { names }
            }
            TokenKind::From => {
                self.advance();
                let module = self.dotted_name()?;
                self.expect(TokenKind::Import, "'import'")?;
                if self.at(&TokenKind::Star) {
                    return Err(ParseError::new(
                        ParseErrorCode::Unsupported,
                        "wildcard imports are not supported",
                        self.peek().span,
                    ));
                }
                let parens = self.eat(&TokenKind::LParen);
                let mut names = vec![self.import_alias(false)?];
                while self.eat(&TokenKind::Comma) {
                    if parens && self.at(&TokenKind::RParen) {
                        break;
                    }
                    names.push(self.import_alias(false)?);
                }
                if parens {
                    self.expect(TokenKind::RParen, "')'")?;
                }
                StmtKind::FromImport { module, names }
            }
            TokenKind::Return => {
                self.advance();
                if self.at(&TokenKind::Newline) {
                    StmtKind::Return(None)
                } else {
                    StmtKind::Return(Some(self.expression()?))
                }
            }
            TokenKind::Break => {
                self.advance();
                StmtKind::Break
            }
            TokenKind::Continue => {
                self.advance();
                StmtKind::Continue
            }
            TokenKind::Pass => {
                self.advance();
                StmtKind::Pass
            }
            TokenKind::Global | TokenKind::Nonlocal => {
                let is_global = self.advance().kind == TokenKind::Global;
                let mut names = vec![self.name()?];
                while self.eat(&TokenKind::Comma) {
                    names.push(self.name()?);
                }
                if is_global {
                    StmtKind::Global(names)
                } else {
                    StmtKind::Nonlocal(names)
                }
            }
            _ => self.expression_statement()?,
        };
        Ok(Stmt { kind, span })
    }

    fn dotted_name(&mut self) -> Result<String, ParseError> {
        let mut name = self.name()?;
        while self.eat(&TokenKind::Dot) {
            name.push('.');
            name.push_str(&self.name()?);
        }
        Ok(name)
    }

    fn import_alias(&mut self, dotted: bool) -> Result<ImportAlias, ParseError> {
        let name = if dotted {
            self.dotted_name()?
        } else {
            self.name()?
        };
        let asname = if self.eat(&TokenKind::As) {
            Some(self.name()?)
        } else {
            None
        };
        Ok(ImportAlias { name, asname })
    }

    fn expression_statement(&mut self) -> Result<StmtKind, ParseError> {
        let lhs = self.expression()?;
        let aug = match self.peek().kind {
            TokenKind::Assign => None,
            TokenKind::PlusAssign => Some(BinOp::Add),
            TokenKind::MinusAssign => Some(BinOp::Sub),
            TokenKind::StarAssign => Some(BinOp::Mul),
            TokenKind::SlashAssign => Some(BinOp::Div),
            _ => return Ok(StmtKind::Expr(lhs)),
        };
        self.advance();
        let target = to_target(lhs)?;
        let value = self.expression()?;
        if self.at(&TokenKind::Assign) {
            return Err(ParseError::new(
                ParseErrorCode::Unsupported,
                "chained assignment is not supported",
                self.peek().span,
            ));
        }
        Ok(match aug {
            None => StmtKind::Assign { target, value },
            Some(op) => StmtKind::AugAssign { target, op, value },
        })
    }

    // ---------------------------------------------------------------------
    // expressions, lowest precedence first
    // ---------------------------------------------------------------------

    fn expression(&mut self) -> Result<Expr, ParseError> {
        let span = self.peek().span;
        self.enter(span)?;
        let e = self.or_expr();
        self.leave();
        e
    }

    fn or_expr(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.and_expr()?;
        while self.at(&TokenKind::Or) {
            let span = self.advance().span;
            self.link(span)?;
            let right = self.and_expr()?;
            let span = left.span;
            left = Expr::new(
                ExprKind::BoolOp {
                    op: BoolOp::Or,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                span,
            );
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.not_expr()?;
        while self.at(&TokenKind::And) {
            let span = self.advance().span;
            self.link(span)?;
            let right = self.not_expr()?;
            let span = left.span;
            left = Expr::new(
                ExprKind::BoolOp {
                    op: BoolOp::And,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                span,
            );
        }
        Ok(left)
    }

    fn not_expr(&mut self) -> Result<Expr, ParseError> {
        if self.at(&TokenKind::Not) {
            let span = self.advance().span;
            self.enter(span)?;
            let operand = self.not_expr();
            self.leave();
            return Ok(Expr::new(
                ExprKind::Unary {
                    op: UnaryOp::Not,
                    operand: Box::new(operand?),
                },
                span,
            ));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, ParseError> {
        let left = self.additive()?;
        let Some(op) = self.cmp_op() else {
            return Ok(left);
        };
        self.advance();
        let right = self.additive()?;
        if self.cmp_op().is_some() {
            return Err(ParseError::new(
                ParseErrorCode::Unsupported,
                "chained comparisons are not supported",
                self.peek().span,
            ));
        }
        let span = left.span;
        Ok(Expr::new(
            ExprKind::Compare {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
            span,
        ))
    }

    fn cmp_op(&self) -> Option<CmpOp> {
        Some(match self.peek().kind {
            TokenKind::EqEq => CmpOp::Eq,
            TokenKind::NotEq => CmpOp::NotEq,
            TokenKind::Lt => CmpOp::Lt,
            TokenKind::LtE => CmpOp::LtE,
            TokenKind::Gt => CmpOp::Gt,
            TokenKind::GtE => CmpOp::GtE,
            _ => return None,
        })
    }

    fn additive(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.multiplicative()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Plus => BinOp::Add,
                TokenKind::Minus => BinOp::Sub,
                _ => return Ok(left),
            };
            let span = self.advance().span;
            self.link(span)?;
            let right = self.multiplicative()?;
            left = binary(op, left, right);
        }
    }

    fn multiplicative(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Star => BinOp::Mul,
                TokenKind::Slash => BinOp::Div,
                TokenKind::DoubleSlash => BinOp::FloorDiv,
                TokenKind::Percent => BinOp::Mod,
                _ => return Ok(left),
            };
            let span = self.advance().span;
            self.link(span)?;
            let right = self.unary()?;
            left = binary(op, left, right);
        }
    }

    fn unary(&mut self) -> Result<Expr, ParseError> {
        if self.at(&TokenKind::Minus) || self.at(&TokenKind::Plus) {
            let tok = self.advance();
            self.enter(tok.span)?;
            let operand = self.unary();
            self.leave();
            let operand = operand?;
            if tok.kind == TokenKind::Plus {
                return Ok(operand);
            }
            return Ok(Expr::new(
                ExprKind::Unary {
                    op: UnaryOp::Neg,
                    operand: Box::new(operand),
                },
                tok.span,
            ));
        }
        self.power()
    }

    /// `**` binds tighter than unary minus on its left and is right-associative.
    fn power(&mut self) -> Result<Expr, ParseError> {
        let base = self.postfix()?;
        if self.eat(&TokenKind::DoubleStar) {
            let span = self.peek().span;
            self.enter(span)?;
            let exp = self.unary();
            self.leave();
            return Ok(binary(BinOp::Pow, base, exp?));
        }
        Ok(base)
    }

    fn postfix(&mut self) -> Result<Expr, ParseError> {
        let mut e = self.atom()?;
        loop {
            let span = e.span;
            match self.peek().kind {
                TokenKind::Dot => {
                    let tok = self.advance();
                    self.link(tok.span)?;
                    let attr = self.name()?;
                    e = Expr::new(
                        ExprKind::Attribute {
                            value: Box::new(e),
                            attr,
                        },
                        span,
                    );
                }
                TokenKind::LParen => {
                    let tok = self.advance();
                    self.link(tok.span)?;
                    let args = self.comma_list(TokenKind::RParen, "')'")?;
                    e = Expr::new(
                        ExprKind::Call {
                            func: Box::new(e),
                            args,
                        },
                        span,
                    );
                }
                TokenKind::LBracket => {
                    let tok = self.advance();
                    self.link(tok.span)?;
                    let index = self.expression()?;
                    self.expect(TokenKind::RBracket, "']'")?;
                    e = Expr::new(
                        ExprKind::Subscript {
                            value: Box::new(e),
                            index: Box::new(index),
                        },
                        span,
                    );
                }
                _ => return Ok(e),
            }
        }
    }

    fn comma_list(&mut self, close: TokenKind, expected: &str) -> Result<Vec<Expr>, ParseError> {
        let mut items = Vec::new();
        while !self.at(&close) {
            if let TokenKind::Name(_) = self.peek().kind {
                if self.tokens.get(self.pos + 1).map(|t| &t.kind) == Some(&TokenKind::Assign) {
                    return Err(ParseError::new(
                        ParseErrorCode::Unsupported,
                        "keyword arguments are not supported",
                        self.peek().span,
                    ));
                }
            }
            items.push(self.expression()?);
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(close, expected)?;
        Ok(items)
    }

    fn atom(&mut self) -> Result<Expr, ParseError> {
        let tok = self.peek().clone();
        let span = tok.span;
        let kind = match tok.kind {
            TokenKind::Name(n) => {
                self.advance();
                ExprKind::Name(n)
            }
            TokenKind::Int(v) => {
                self.advance();
                ExprKind::Int(v)
            }
            TokenKind::Float(v) => {
                self.advance();
                ExprKind::Float(v)
            }
            TokenKind::Str(s) => {
                self.advance();
                let mut s = s;
                // adjacent literals concatenate
                while let TokenKind::Str(more) = &self.peek().kind {
                    s.push_str(more);
                    self.advance();
                }
                ExprKind::Str(s)
            }
            TokenKind::True => {
                self.advance();
                ExprKind::Bool(true)
            }
            TokenKind::False => {
                self.advance();
                ExprKind::Bool(false)
            }
            TokenKind::None => {
                self.advance();
                ExprKind::NoneLit
            }
            TokenKind::LParen => {
                self.advance();
                let inner = self.expression()?;
                self.expect(TokenKind::RParen, "')'")?;
                return Ok(inner);
            }
            TokenKind::LBracket => {
                self.advance();
                self.enter(span)?;
                let items = self.comma_list(TokenKind::RBracket, "']'");
                self.leave();
                ExprKind::List(items?)
            }
            TokenKind::LBrace => {
                self.advance();
                self.enter(span)?;
                let pairs = self.dict_body();
                self.leave();
                ExprKind::Dict(pairs?)
            }
            _ => return Err(self.unexpected("expression")),
        };
        Ok(Expr::new(kind, span))
    }

    fn dict_body(&mut self) -> Result<Vec<(Expr, Expr)>, ParseError> {
        let mut pairs = Vec::new();
        while !self.at(&TokenKind::RBrace) {
            let k = self.expression()?;
            self.expect(TokenKind::Colon, "':'")?;
            let v = self.expression()?;
            pairs.push((k, v));
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RBrace, "'}'")?;
        Ok(pairs)
    }
}

fn binary(op: BinOp, left: Expr, right: Expr) -> Expr {
    let span = left.span;
    Expr::new(
        ExprKind::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        },
        span,
    )
}

fn to_target(e: Expr) -> Result<Target, ParseError> {
    match e.kind {
        ExprKind::Name(n) => Ok(Target::Name(n)),
        ExprKind::Attribute { value, attr } => Ok(Target::Attribute { value, attr }),
        ExprKind::Subscript { value, index } => Ok(Target::Subscript { value, index }),
        _ => Err(ParseError::new(
            ParseErrorCode::InvalidAssignmentTarget,
            "cannot assign to expression",
            e.span,
        )),
    }
}
