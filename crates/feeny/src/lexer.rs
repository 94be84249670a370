//! Indentation-sensitive tokenizer for Feeny source text.
//!
//! Feeny blocks are delimited by indentation in multiples of four spaces,
//! Python-style. The lexer tracks an indentation stack and synthesizes
//! [`TokenKind::Indent`] / [`TokenKind::Dedent`] tokens at level changes, so
//! the parser never has to look at whitespace. Comments run from `;` to the
//! end of the line. Blank lines (including comment-only lines) produce no
//! tokens and do not affect indentation.

use strum::{Display, IntoStaticStr};

use crate::error::LexError;

/// The kind of a lexical token.
///
/// `Display` yields the classic uppercase token names (`IDENTIFIER`,
/// `INDENT`, ...) used in parser diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr)]
#[strum(serialize_all = "UPPERCASE")]
pub enum TokenKind {
    // Keywords
    Var,
    Defn,
    Method,
    Object,
    If,
    Else,
    While,
    Printf,
    Array,
    Null,

    // Literals
    Integer,
    Identifier,
    Str,

    // Symbols
    Comma,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Dot,
    Colon,
    Equal,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Lt,
    Gt,
    Le,
    Ge,
    EqEq,

    // Layout
    Indent,
    Dedent,
    Eof,
}

/// One token: kind, raw lexeme, and source position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub lexeme: String,
    pub line: u32,
    pub column: u32,
}

impl Token {
    fn layout(kind: TokenKind, line: u32) -> Self {
        Self {
            kind,
            lexeme: String::new(),
            line,
            column: 0,
        }
    }
}

const KEYWORDS: &[(&str, TokenKind)] = &[
    ("var", TokenKind::Var),
    ("defn", TokenKind::Defn),
    ("method", TokenKind::Method),
    ("object", TokenKind::Object),
    ("if", TokenKind::If),
    ("else", TokenKind::Else),
    ("while", TokenKind::While),
    ("printf", TokenKind::Printf),
    ("array", TokenKind::Array),
    ("null", TokenKind::Null),
];

/// Spaces per indentation level.
const INDENT_WIDTH: u32 = 4;

/// Streaming tokenizer over Feeny source text.
pub struct Lexer<'src> {
    src: &'src [u8],
    pos: usize,
    start: usize,
    line: u32,
    column: u32,
    indent_stack: Vec<u32>,
    /// Dedent tokens still owed from the last indentation drop.
    pending_dedents: u32,
    at_line_start: bool,
}

impl<'src> Lexer<'src> {
    pub fn new(source: &'src str) -> Self {
        Self {
            src: source.as_bytes(),
            pos: 0,
            start: 0,
            line: 1,
            column: 1,
            indent_stack: vec![0],
            pending_dedents: 0,
            at_line_start: true,
        }
    }

    /// Tokenizes an entire source string.
    pub fn tokenize(source: &'src str) -> Result<Vec<Token>, LexError> {
        let mut lexer = Self::new(source);
        let mut tokens = Vec::new();
        loop {
            let token = lexer.next_token()?;
            let done = token.kind == TokenKind::Eof;
            tokens.push(token);
            if done {
                return Ok(tokens);
            }
        }
    }

    fn is_at_end(&self) -> bool {
        self.pos >= self.src.len()
    }

    fn peek(&self) -> u8 {
        if self.is_at_end() { 0 } else { self.src[self.pos] }
    }

    fn advance(&mut self) -> u8 {
        let c = self.src[self.pos];
        self.pos += 1;
        self.column += 1;
        c
    }

    fn matches(&mut self, expected: u8) -> bool {
        if self.peek() == expected {
            self.advance();
            true
        } else {
            false
        }
    }

    fn lexeme(&self) -> &'src str {
        // Valid UTF-8: the lexer only slices at ASCII boundaries.
        std::str::from_utf8(&self.src[self.start..self.pos]).unwrap_or("")
    }

    fn make_token(&self, kind: TokenKind) -> Token {
        let lexeme = self.lexeme().to_owned();
        let column = self.column - u32::try_from(lexeme.len()).unwrap_or(0);
        Token {
            kind,
            lexeme,
            line: self.line,
            column,
        }
    }

    /// Skips spaces, tabs, carriage returns, and `;` comments within a line.
    fn skip_inline_trivia(&mut self) {
        loop {
            match self.peek() {
                b' ' | b'\r' | b'\t' => {
                    self.advance();
                }
                b';' => {
                    while self.peek() != b'\n' && !self.is_at_end() {
                        self.advance();
                    }
                }
                _ => return,
            }
        }
    }

    /// Consumes the indentation of the line at the current position and
    /// returns its level in spaces, or `None` for a blank/comment-only line.
    fn measure_indent(&mut self) -> Result<Option<u32>, LexError> {
        let mut indent = 0;
        loop {
            match self.peek() {
                b' ' => {
                    indent += 1;
                    self.advance();
                }
                b'\t' => {
                    indent += INDENT_WIDTH;
                    self.advance();
                }
                _ => break,
            }
        }
        // Blank and comment-only lines carry no indentation information.
        if self.peek() == b'\n' || self.peek() == b';' || self.is_at_end() {
            return Ok(None);
        }
        if indent % INDENT_WIDTH != 0 {
            return Err(LexError::BadIndentation {
                line: self.line,
                detail: "indentation must be a multiple of 4 spaces",
            });
        }
        Ok(Some(indent))
    }

    /// Compares a line's indentation with the stack and emits layout tokens.
    fn handle_indent(&mut self, indent: u32) -> Result<Option<Token>, LexError> {
        let current = *self.indent_stack.last().unwrap_or(&0);
        if indent > current {
            if indent != current + INDENT_WIDTH {
                return Err(LexError::BadIndentation {
                    line: self.line,
                    detail: "indentation must increase by exactly one level",
                });
            }
            self.indent_stack.push(indent);
            return Ok(Some(Token::layout(TokenKind::Indent, self.line)));
        }
        if indent < current {
            let mut dedents = 0;
            while self.indent_stack.last().copied().unwrap_or(0) > indent {
                self.indent_stack.pop();
                dedents += 1;
            }
            if self.indent_stack.last().copied().unwrap_or(0) != indent {
                return Err(LexError::BadIndentation {
                    line: self.line,
                    detail: "dedent does not match any outer indentation level",
                });
            }
            self.pending_dedents = dedents - 1;
            return Ok(Some(Token::layout(TokenKind::Dedent, self.line)));
        }
        Ok(None)
    }

    fn scan_identifier(&mut self) -> Token {
        while self.peek().is_ascii_alphanumeric() || self.peek() == b'_' || self.peek() == b'-' {
            self.advance();
        }
        let text = self.lexeme();
        for &(keyword, kind) in KEYWORDS {
            if text == keyword {
                return self.make_token(kind);
            }
        }
        self.make_token(TokenKind::Identifier)
    }

    fn scan_number(&mut self) -> Token {
        while self.peek().is_ascii_digit() {
            self.advance();
        }
        self.make_token(TokenKind::Integer)
    }

    fn scan_string(&mut self) -> Result<Token, LexError> {
        while self.peek() != b'"' && self.peek() != b'\n' && !self.is_at_end() {
            if self.peek() == b'\\' {
                // Skip the escape introducer so an escaped quote does not
                // close the literal; the parser decodes the sequence.
                self.advance();
                if self.is_at_end() {
                    break;
                }
            }
            self.advance();
        }
        if self.peek() != b'"' {
            return Err(LexError::UnterminatedString { line: self.line });
        }
        self.advance();
        Ok(self.make_token(TokenKind::Str))
    }

    /// Produces the next token.
    ///
    /// At end of input, any open indentation levels unwind as `Dedent`
    /// tokens before the final `Eof`.
    pub fn next_token(&mut self) -> Result<Token, LexError> {
        if self.pending_dedents > 0 {
            self.pending_dedents -= 1;
            return Ok(Token::layout(TokenKind::Dedent, self.line));
        }

        // Layout processing at the start of a (non-blank) line.
        if self.at_line_start {
            loop {
                if let Some(indent) = self.measure_indent()? {
                    self.at_line_start = false;
                    if let Some(token) = self.handle_indent(indent)? {
                        return Ok(token);
                    }
                    break;
                }
                // Blank line: consume through the newline and retry.
                while self.peek() != b'\n' && !self.is_at_end() {
                    self.advance();
                }
                if self.is_at_end() {
                    break;
                }
                self.advance();
                self.line += 1;
                self.column = 1;
            }
        }

        self.skip_inline_trivia();
        self.start = self.pos;

        if self.is_at_end() {
            // Unwind remaining indentation before Eof.
            if self.indent_stack.len() > 1 {
                self.indent_stack.pop();
                return Ok(Token::layout(TokenKind::Dedent, self.line));
            }
            return Ok(Token::layout(TokenKind::Eof, self.line));
        }

        let c = self.advance();

        if c == b'\n' {
            self.line += 1;
            self.column = 1;
            self.at_line_start = true;
            return self.next_token();
        }

        if c.is_ascii_alphabetic() || c == b'_' {
            return Ok(self.scan_identifier());
        }
        if c.is_ascii_digit() {
            return Ok(self.scan_number());
        }

        match c {
            b',' => Ok(self.make_token(TokenKind::Comma)),
            b'(' => Ok(self.make_token(TokenKind::LParen)),
            b')' => Ok(self.make_token(TokenKind::RParen)),
            b'[' => Ok(self.make_token(TokenKind::LBracket)),
            b']' => Ok(self.make_token(TokenKind::RBracket)),
            b'.' => Ok(self.make_token(TokenKind::Dot)),
            b':' => {
                // A colon opens a block, so only trivia may follow it.
                self.skip_inline_trivia();
                if self.peek() != b'\n' && !self.is_at_end() {
                    return Err(LexError::TrailingAfterColon { line: self.line });
                }
                Ok(self.make_token(TokenKind::Colon))
            }
            b'=' => {
                if self.matches(b'=') {
                    Ok(self.make_token(TokenKind::EqEq))
                } else {
                    Ok(self.make_token(TokenKind::Equal))
                }
            }
            b'<' => {
                if self.matches(b'=') {
                    Ok(self.make_token(TokenKind::Le))
                } else {
                    Ok(self.make_token(TokenKind::Lt))
                }
            }
            b'>' => {
                if self.matches(b'=') {
                    Ok(self.make_token(TokenKind::Ge))
                } else {
                    Ok(self.make_token(TokenKind::Gt))
                }
            }
            b'+' => Ok(self.make_token(TokenKind::Plus)),
            b'-' => Ok(self.make_token(TokenKind::Minus)),
            b'*' => Ok(self.make_token(TokenKind::Star)),
            b'/' => Ok(self.make_token(TokenKind::Slash)),
            b'%' => Ok(self.make_token(TokenKind::Percent)),
            b'"' => self.scan_string(),
            _ => Err(LexError::StrayCharacter {
                line: self.line,
                column: self.column - 1,
                ch: char::from(c),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        Lexer::tokenize(source)
            .expect("tokenize failed")
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_simple_statement() {
        assert_eq!(
            kinds("var x = 1 + 2\n"),
            vec![
                TokenKind::Var,
                TokenKind::Identifier,
                TokenKind::Equal,
                TokenKind::Integer,
                TokenKind::Plus,
                TokenKind::Integer,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_indent_dedent() {
        let source = "while x:\n    f(x)\nprintf(\"done\")\n";
        assert_eq!(
            kinds(source),
            vec![
                TokenKind::While,
                TokenKind::Identifier,
                TokenKind::Colon,
                TokenKind::Indent,
                TokenKind::Identifier,
                TokenKind::LParen,
                TokenKind::Identifier,
                TokenKind::RParen,
                TokenKind::Dedent,
                TokenKind::Printf,
                TokenKind::LParen,
                TokenKind::Str,
                TokenKind::RParen,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_dedents_unwound_at_eof() {
        let source = "if x:\n    if y:\n        z\n";
        let k = kinds(source);
        let dedents = k.iter().filter(|k| **k == TokenKind::Dedent).count();
        assert_eq!(dedents, 2);
        assert_eq!(*k.last().expect("empty token stream"), TokenKind::Eof);
    }

    #[test]
    fn test_blank_and_comment_lines_ignored() {
        let source = "var x = 1\n\n; a comment\n    ; indented comment\nvar y = 2\n";
        let k = kinds(source);
        assert!(!k.contains(&TokenKind::Indent));
        assert_eq!(k.iter().filter(|k| **k == TokenKind::Var).count(), 2);
    }

    #[test]
    fn test_operators_two_char() {
        assert_eq!(
            kinds("a <= b == c >= d\n"),
            vec![
                TokenKind::Identifier,
                TokenKind::Le,
                TokenKind::Identifier,
                TokenKind::EqEq,
                TokenKind::Identifier,
                TokenKind::Ge,
                TokenKind::Identifier,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_identifier_with_dash() {
        let tokens = Lexer::tokenize("my-var\n").expect("tokenize failed");
        assert_eq!(tokens[0].kind, TokenKind::Identifier);
        assert_eq!(tokens[0].lexeme, "my-var");
    }

    #[test]
    fn test_bad_indentation() {
        let err = Lexer::tokenize("if x:\n   y\n").expect_err("expected failure");
        assert!(matches!(err, LexError::BadIndentation { line: 2, .. }));
    }

    #[test]
    fn test_unterminated_string() {
        let err = Lexer::tokenize("printf(\"oops\n").expect_err("expected failure");
        assert!(matches!(err, LexError::UnterminatedString { .. }));
    }

    #[test]
    fn test_stray_character() {
        let err = Lexer::tokenize("var x = @\n").expect_err("expected failure");
        assert!(matches!(err, LexError::StrayCharacter { ch: '@', .. }));
    }

    #[test]
    fn test_escaped_quote_stays_in_string() {
        let tokens = Lexer::tokenize("printf(\"a\\\"b\")\n").expect("tokenize failed");
        let s = tokens.iter().find(|t| t.kind == TokenKind::Str).expect("no string token");
        assert_eq!(s.lexeme, "\"a\\\"b\"");
    }
}
