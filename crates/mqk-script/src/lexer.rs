//! Tokenizer with indentation tracking (INDENT / DEDENT / NEWLINE tokens).

use crate::ast::Span;
use crate::parser::{ParseError, ParseErrorCode};

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Name(String),
    Int(i64),
    Float(f64),
    Str(String),
    Newline,
    Indent,
    Dedent,
    Eof,

    // keywords
    Import,
    From,
    As,
    Def,
    Return,
    If,
    Elif,
    Else,
    While,
    For,
    In,
    Break,
    Continue,
    Pass,
    Global,
    Nonlocal,
    And,
    Or,
    Not,
    True,
    False,
    None,

    // punctuation
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Colon,
    Dot,
    Plus,
    Minus,
    Star,
    Slash,
    DoubleSlash,
    Percent,
    DoubleStar,
    Assign,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,
    EqEq,
    NotEq,
    Lt,
    LtE,
    Gt,
    GtE,
}

impl TokenKind {
    fn keyword(word: &str) -> Option<TokenKind> {
        let kw = match word {
            "import" => TokenKind::Import,
            "from" => TokenKind::From,
            "as" => TokenKind::As,
            "def" => TokenKind::Def,
            "return" => TokenKind::Return,
            "if" => TokenKind::If,
            "elif" => TokenKind::Elif,
            "else" => TokenKind::Else,
            "while" => TokenKind::While,
            "for" => TokenKind::For,
            "in" => TokenKind::In,
            "break" => TokenKind::Break,
            "continue" => TokenKind::Continue,
            "pass" => TokenKind::Pass,
            "global" => TokenKind::Global,
            "nonlocal" => TokenKind::Nonlocal,
            "and" => TokenKind::And,
            "or" => TokenKind::Or,
            "not" => TokenKind::Not,
            "True" => TokenKind::True,
            "False" => TokenKind::False,
            "None" => TokenKind::None,
            _ => return None,
        };
        Some(kw)
    }

    /// Human-readable form for diagnostics.
    pub fn describe(&self) -> String {
        match self {
            TokenKind::Name(n) => format!("name '{n}'"),
            TokenKind::Int(v) => format!("integer {v}"),
            TokenKind::Float(v) => format!("float {v}"),
            TokenKind::Str(_) => "string literal".to_string(),
            TokenKind::Newline => "end of line".to_string(),
            TokenKind::Indent => "indent".to_string(),
            TokenKind::Dedent => "dedent".to_string(),
            TokenKind::Eof => "end of input".to_string(),
            other => format!("{other:?}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: u32,
    column: u32,
    indents: Vec<u32>,
    /// Open bracket depth; newlines inside brackets are not significant.
    depth: u32,
    at_line_start: bool,
    tokens: Vec<Token>,
}

/// Tokenize `src`. The stream always ends with `Newline? Dedent* Eof`.
pub fn tokenize(src: &str) -> Result<Vec<Token>, ParseError> {
    let mut lx = Lexer {
        chars: src.chars().collect(),
        pos: 0,
        line: 1,
        column: 1,
        indents: vec![0],
        depth: 0,
        at_line_start: true,
        tokens: Vec::new(),
    };
    lx.run()?;
    Ok(lx.tokens)
}

impl Lexer {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.get(self.pos).copied()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn here(&self) -> Span {
        Span::new(self.line, self.column)
    }

    fn push(&mut self, kind: TokenKind, span: Span) {
        self.tokens.push(Token { kind, span });
    }

    fn err(&self, code: ParseErrorCode, message: impl Into<String>, span: Span) -> ParseError {
        ParseError::new(code, message, span)
    }

    fn last_is_newline(&self) -> bool {
        matches!(
            self.tokens.last().map(|t| &t.kind),
            None | Some(TokenKind::Newline)
        )
    }

    fn run(&mut self) -> Result<(), ParseError> {
        while self.pos < self.chars.len() {
            if self.at_line_start && self.depth == 0 {
                if !self.handle_indentation()? {
                    continue;
                }
            }
            let Some(c) = self.peek() else { break };
            let span = self.here();
            match c {
                ' ' | '\t' | '\r' => {
                    self.bump();
                }
                '#' => self.skip_comment(),
                '\n' => {
                    self.bump();
                    if self.depth == 0 {
                        if !self.last_is_newline() {
                            self.push(TokenKind::Newline, span);
                        }
                        self.at_line_start = true;
                    }
                }
                '\\' if self.peek_at(1) == Some('\n') => {
                    self.bump();
                    self.bump();
                }
                '0'..='9' => self.lex_number(span)?,
                '.' if self.peek_at(1).is_some_and(|d| d.is_ascii_digit()) => {
                    self.lex_number(span)?
                }
                '"' | '\'' => self.lex_string(span)?,
                c if c.is_alphabetic() || c == '_' => self.lex_word(span),
                _ => self.lex_punct(span)?,
            }
        }

        if !self.last_is_newline() {
            let span = self.here();
            self.push(TokenKind::Newline, span);
        }
        while self.indents.len() > 1 {
            self.indents.pop();
            let span = self.here();
            self.push(TokenKind::Dedent, span);
        }
        let span = self.here();
        self.push(TokenKind::Eof, span);
        Ok(())
    }

    /// Measure leading whitespace of a logical line and emit INDENT/DEDENT.
    /// Returns `false` when the line was blank or comment-only and has been consumed.
    fn handle_indentation(&mut self) -> Result<bool, ParseError> {
        let mut width = 0u32;
        loop {
            match self.peek() {
                Some(' ') => {
                    width += 1;
                    self.bump();
                }
                Some('\t') => {
                    return Err(self.err(
                        ParseErrorCode::InconsistentIndent,
                        "tabs are not allowed in indentation",
                        self.here(),
                    ))
                }
                Some('\r') => {
                    self.bump();
                }
                _ => break,
            }
        }

        match self.peek() {
            None => return Ok(false),
            Some('\n') => {
                self.bump();
                return Ok(false);
            }
            Some('#') => {
                self.skip_comment();
                if self.peek() == Some('\n') {
                    self.bump();
                }
                return Ok(false);
            }
            _ => {}
        }

        self.at_line_start = false;
        let span = self.here();
        let current = self.indents.last().copied().unwrap_or(0);
        if width > current {
            self.indents.push(width);
            self.push(TokenKind::Indent, span);
        } else if width < current {
            while self.indents.last().copied().unwrap_or(0) > width {
                self.indents.pop();
                self.push(TokenKind::Dedent, span);
            }
            if self.indents.last().copied().unwrap_or(0) != width {
                return Err(self.err(
                    ParseErrorCode::InconsistentIndent,
                    "unindent does not match any outer indentation level",
                    span,
                ));
            }
        }
        Ok(true)
    }

    fn skip_comment(&mut self) {
        while let Some(c) = self.peek() {
            if c == '\n' {
                break;
            }
            self.bump();
        }
    }

    fn lex_word(&mut self, span: Span) {
        let mut word = String::new();
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
                word.push(c);
                self.bump();
            } else {
                break;
            }
        }
        let kind = TokenKind::keyword(&word).unwrap_or(TokenKind::Name(word));
        self.push(kind, span);
    }

    fn lex_number(&mut self, span: Span) -> Result<(), ParseError> {
        let mut text = String::new();
        let mut is_float = false;
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                text.push(c);
                self.bump();
            } else if c == '_' && self.peek_at(1).is_some_and(|d| d.is_ascii_digit()) {
                self.bump();
            } else if c == '.' && !is_float {
                is_float = true;
                text.push(c);
                self.bump();
            } else if c == 'e' || c == 'E' {
                is_float = true;
                text.push(c);
                self.bump();
                if let Some(sign @ ('+' | '-')) = self.peek() {
                    text.push(sign);
                    self.bump();
                }
            } else {
                break;
            }
        }
        if self.peek().is_some_and(|c| c.is_alphabetic() || c == '_') {
            return Err(self.err(
                ParseErrorCode::InvalidNumber,
                format!("invalid numeric literal '{text}'"),
                span,
            ));
        }
        let kind = if is_float {
            let v: f64 = text.parse().map_err(|_| {
                self.err(
                    ParseErrorCode::InvalidNumber,
                    format!("invalid float literal '{text}'"),
                    span,
                )
            })?;
            TokenKind::Float(v)
        } else {
            let v: i64 = text.parse().map_err(|_| {
                self.err(
                    ParseErrorCode::InvalidNumber,
                    format!("integer literal '{text}' out of range"),
                    span,
                )
            })?;
            TokenKind::Int(v)
        };
        self.push(kind, span);
        Ok(())
    }

    fn lex_string(&mut self, span: Span) -> Result<(), ParseError> {
        let quote = self.bump().unwrap_or('"');
        let mut out = String::new();
        loop {
            match self.bump() {
                None | Some('\n') => {
                    return Err(self.err(
                        ParseErrorCode::UnterminatedString,
                        "unterminated string literal",
                        span,
                    ))
                }
                Some('\\') => match self.bump() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some('r') => out.push('\r'),
                    Some('0') => out.push('\0'),
                    Some(c @ ('\\' | '\'' | '"')) => out.push(c),
                    Some(other) => {
                        out.push('\\');
                        out.push(other);
                    }
                    None => {
                        return Err(self.err(
                            ParseErrorCode::UnterminatedString,
                            "unterminated string literal",
                            span,
                        ))
                    }
                },
                Some(c) if c == quote => break,
                Some(c) => out.push(c),
            }
        }
        self.push(TokenKind::Str(out), span);
        Ok(())
    }

    fn lex_punct(&mut self, span: Span) -> Result<(), ParseError> {
        let c = self.peek().unwrap_or('\0');
        let next = self.peek_at(1);
        let (kind, width) = match (c, next) {
            ('*', Some('*')) => (TokenKind::DoubleStar, 2),
            ('/', Some('/')) => (TokenKind::DoubleSlash, 2),
            ('=', Some('=')) => (TokenKind::EqEq, 2),
            ('!', Some('=')) => (TokenKind::NotEq, 2),
            ('<', Some('=')) => (TokenKind::LtE, 2),
            ('>', Some('=')) => (TokenKind::GtE, 2),
            ('+', Some('=')) => (TokenKind::PlusAssign, 2),
            ('-', Some('=')) => (TokenKind::MinusAssign, 2),
            ('*', Some('=')) => (TokenKind::StarAssign, 2),
            ('/', Some('=')) => (TokenKind::SlashAssign, 2),
            ('(', _) => (TokenKind::LParen, 1),
            (')', _) => (TokenKind::RParen, 1),
            ('[', _) => (TokenKind::LBracket, 1),
            (']', _) => (TokenKind::RBracket, 1),
            ('{', _) => (TokenKind::LBrace, 1),
            ('}', _) => (TokenKind::RBrace, 1),
            (',', _) => (TokenKind::Comma, 1),
            (':', _) => (TokenKind::Colon, 1),
            ('.', _) => (TokenKind::Dot, 1),
            ('+', _) => (TokenKind::Plus, 1),
            ('-', _) => (TokenKind::Minus, 1),
            ('*', _) => (TokenKind::Star, 1),
            ('/', _) => (TokenKind::Slash, 1),
            ('%', _) => (TokenKind::Percent, 1),
            ('=', _) => (TokenKind::Assign, 1),
            ('<', _) => (TokenKind::Lt, 1),
            ('>', _) => (TokenKind::Gt, 1),
            _ => {
                return Err(self.err(
                    ParseErrorCode::InvalidCharacter,
                    format!("unexpected character {c:?}"),
                    span,
                ))
            }
        };
        for _ in 0..width {
            self.bump();
        }
        match kind {
            TokenKind::LParen | TokenKind::LBracket | TokenKind::LBrace => self.depth += 1,
            TokenKind::RParen | TokenKind::RBracket | TokenKind::RBrace => {
                self.depth = self.depth.saturating_sub(1)
            }
            _ => {}
        }
        self.push(kind, span);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        tokenize(src).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn indentation_produces_indent_dedent() {
        let k = kinds("def f(x):\n    return x\n");
        assert_eq!(
            k,
            vec![
                TokenKind::Def,
                TokenKind::Name("f".into()),
                TokenKind::LParen,
                TokenKind::Name("x".into()),
                TokenKind::RParen,
                TokenKind::Colon,
                TokenKind::Newline,
                TokenKind::Indent,
                TokenKind::Return,
                TokenKind::Name("x".into()),
                TokenKind::Newline,
                TokenKind::Dedent,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn blank_and_comment_lines_are_ignored() {
        let k = kinds("# header\n\nx = 1  # trailing\n\n   # indented comment\ny = 2\n");
        assert_eq!(
            k,
            vec![
                TokenKind::Name("x".into()),
                TokenKind::Assign,
                TokenKind::Int(1),
                TokenKind::Newline,
                TokenKind::Name("y".into()),
                TokenKind::Assign,
                TokenKind::Int(2),
                TokenKind::Newline,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn newlines_inside_brackets_are_joined() {
        let k = kinds("x = [1,\n     2]\n");
        assert!(!k[..k.len() - 2].contains(&TokenKind::Newline));
    }

    #[test]
    fn numbers_and_operators() {
        let k = kinds("a = 1_000 // 3 ** 2.5e1\n");
        assert_eq!(k[2], TokenKind::Int(1000));
        assert_eq!(k[3], TokenKind::DoubleSlash);
        assert_eq!(k[5], TokenKind::DoubleStar);
        assert_eq!(k[6], TokenKind::Float(25.0));
    }

    #[test]
    fn bad_dedent_is_an_error() {
        let err = tokenize("if x:\n        y = 1\n    z = 2\n").unwrap_err();
        assert_eq!(err.code, ParseErrorCode::InconsistentIndent);
        assert_eq!(err.span.line, 3);
    }

    #[test]
    fn unterminated_string_reports_start() {
        let err = tokenize("x = 'abc\n").unwrap_err();
        assert_eq!(err.code, ParseErrorCode::UnterminatedString);
        assert_eq!(err.span, Span::new(1, 5));
    }
}
