//! Recursive-descent parser for Feeny.
//!
//! Grammar sketch (precedence low to high):
//!
//! ```text
//! expr    -> assign
//! assign  -> lvalue "=" assign | compare
//! compare -> term (("<" | "<=" | ">" | ">=" | "==") term)*
//! term    -> factor (("+" | "-") factor)*
//! factor  -> unary (("*" | "/" | "%") unary)*
//! unary   -> "-" unary | chain
//! chain   -> primary ("[" args "]" | "." IDENT ("(" args ")")? | "(" args ")")*
//! ```
//!
//! Operators desugar to `CallSlot` during parsing: `a + b` becomes
//! `a.add(b)`, `-e` becomes `0.sub(e)`, `a[i]` becomes `a.get(i)`, and
//! `a[i] = v` becomes `a.set(i, v)`. Assignment is right-associative and
//! only valid on names, slots, and `get` calls.

use crate::{
    ast::{Exp, ScopeStmt, SlotStmt},
    error::ParseError,
    lexer::{Lexer, Token, TokenKind},
};

/// Parses a complete source file into its top-level statement tree.
pub fn parse(source: &str) -> Result<ScopeStmt, crate::error::FeenyError> {
    let tokens = Lexer::tokenize(source)?;
    let mut parser = Parser::new(tokens);
    Ok(parser.parse_program()?)
}

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    #[must_use]
    pub fn new(mut tokens: Vec<Token>) -> Self {
        if tokens.is_empty() {
            tokens.push(Token {
                kind: TokenKind::Eof,
                lexeme: String::new(),
                line: 1,
                column: 0,
            });
        }
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn previous(&self) -> &Token {
        &self.tokens[self.pos.saturating_sub(1)]
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.peek().kind == kind
    }

    fn advance(&mut self) -> &Token {
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        self.previous()
    }

    fn matches(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        let token = self.peek();
        let lexeme = if token.lexeme.is_empty() {
            token.kind.to_string()
        } else {
            token.lexeme.clone()
        };
        ParseError::new(token.line, lexeme, message)
    }

    fn consume(&mut self, kind: TokenKind, message: &str) -> Result<&Token, ParseError> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(self.error(message))
        }
    }

    /// Parses the whole token stream; anything left over is an error.
    pub fn parse_program(&mut self) -> Result<ScopeStmt, ParseError> {
        let program = self.parse_scope()?;
        if !self.check(TokenKind::Eof) {
            return Err(self.error("expected end of input"));
        }
        Ok(program)
    }

    /// Parses statements until a dedent or end of input.
    fn parse_scope(&mut self) -> Result<ScopeStmt, ParseError> {
        let mut stmts = Vec::new();
        while !self.check(TokenKind::Eof) && !self.check(TokenKind::Dedent) {
            stmts.push(self.parse_statement()?);
        }
        Ok(ScopeStmt::sequence(stmts))
    }

    fn parse_statement(&mut self) -> Result<ScopeStmt, ParseError> {
        match self.peek().kind {
            TokenKind::Var => self.parse_var_declaration(),
            TokenKind::Defn => self.parse_function_declaration(),
            _ => Ok(ScopeStmt::Exp(self.parse_expression()?)),
        }
    }

    fn parse_var_declaration(&mut self) -> Result<ScopeStmt, ParseError> {
        self.consume(TokenKind::Var, "expected 'var'")?;
        self.consume(TokenKind::Identifier, "expected variable name")?;
        let name = self.previous().lexeme.clone();
        if name == "this" {
            return Err(self.error("'this' is a reserved name"));
        }
        self.consume(TokenKind::Equal, "expected '=' after variable name")?;
        let init = self.parse_expression()?;
        Ok(ScopeStmt::Var { name, init })
    }

    fn parse_function_declaration(&mut self) -> Result<ScopeStmt, ParseError> {
        self.consume(TokenKind::Defn, "expected 'defn'")?;
        self.consume(TokenKind::Identifier, "expected function name")?;
        let name = self.previous().lexeme.clone();
        let args = self.parse_parameter_list()?;
        let body = self.parse_block()?;
        Ok(ScopeStmt::Fn {
            name,
            args,
            body: Box::new(body),
        })
    }

    /// Parses `(a, b, c)` of parameter names.
    fn parse_parameter_list(&mut self) -> Result<Vec<String>, ParseError> {
        self.consume(TokenKind::LParen, "expected '(' after name")?;
        let mut args = Vec::new();
        if !self.check(TokenKind::RParen) {
            loop {
                self.consume(TokenKind::Identifier, "expected parameter name")?;
                args.push(self.previous().lexeme.clone());
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RParen, "expected ')' after parameters")?;
        Ok(args)
    }

    /// Parses `: INDENT scope DEDENT`.
    fn parse_block(&mut self) -> Result<ScopeStmt, ParseError> {
        self.consume(TokenKind::Colon, "expected ':'")?;
        self.consume(TokenKind::Indent, "expected an indented block")?;
        let body = self.parse_scope()?;
        self.consume(TokenKind::Dedent, "expected dedent after block")?;
        Ok(body)
    }

    fn parse_expression(&mut self) -> Result<Exp, ParseError> {
        self.parse_assign()
    }

    fn parse_assign(&mut self) -> Result<Exp, ParseError> {
        let expr = self.parse_compare()?;

        if self.check(TokenKind::Equal) && is_valid_lvalue(&expr) {
            self.advance();
            let rhs = self.parse_assign()?;
            return Ok(match expr {
                Exp::Ref(name) => Exp::Set {
                    name,
                    value: Box::new(rhs),
                },
                Exp::Slot { name, receiver } => Exp::SetSlot {
                    name,
                    receiver,
                    value: Box::new(rhs),
                },
                // `a[i, ...] = v` becomes `a.set(i, ..., v)`.
                Exp::CallSlot { receiver, mut args, .. } => {
                    args.push(rhs);
                    Exp::CallSlot {
                        name: "set".to_owned(),
                        receiver,
                        args,
                    }
                }
                _ => return Err(self.error("invalid assignment target")),
            });
        }

        Ok(expr)
    }

    fn parse_compare(&mut self) -> Result<Exp, ParseError> {
        let mut expr = self.parse_term()?;
        loop {
            let method = match self.peek().kind {
                TokenKind::Lt => "lt",
                TokenKind::Le => "le",
                TokenKind::Gt => "gt",
                TokenKind::Ge => "ge",
                TokenKind::EqEq => "eq",
                _ => break,
            };
            self.advance();
            let right = self.parse_term()?;
            expr = desugar_binary(expr, method, right);
        }
        Ok(expr)
    }

    fn parse_term(&mut self) -> Result<Exp, ParseError> {
        let mut expr = self.parse_factor()?;
        loop {
            let method = match self.peek().kind {
                TokenKind::Plus => "add",
                TokenKind::Minus => "sub",
                _ => break,
            };
            self.advance();
            let right = self.parse_factor()?;
            expr = desugar_binary(expr, method, right);
        }
        Ok(expr)
    }

    fn parse_factor(&mut self) -> Result<Exp, ParseError> {
        let mut expr = self.parse_unary()?;
        loop {
            let method = match self.peek().kind {
                TokenKind::Star => "mul",
                TokenKind::Slash => "div",
                TokenKind::Percent => "mod",
                _ => break,
            };
            self.advance();
            let right = self.parse_unary()?;
            expr = desugar_binary(expr, method, right);
        }
        Ok(expr)
    }

    fn parse_unary(&mut self) -> Result<Exp, ParseError> {
        if self.matches(TokenKind::Minus) {
            let operand = self.parse_unary()?;
            // -e desugars to 0.sub(e).
            return Ok(desugar_binary(Exp::Int(0), "sub", operand));
        }
        self.parse_chain()
    }

    /// Parses a primary followed by any number of `[...]`, `.name`,
    /// `.name(...)`, and `(...)` suffixes.
    fn parse_chain(&mut self) -> Result<Exp, ParseError> {
        let mut expr = self.parse_primary()?;

        // Literal-producing forms do not chain.
        if matches!(expr, Exp::Printf { .. } | Exp::Array { .. } | Exp::Object { .. }) {
            return Ok(expr);
        }

        let mut callable_name = match &expr {
            Exp::Ref(name) => Some(name.clone()),
            _ => None,
        };

        loop {
            if self.matches(TokenKind::LBracket) {
                // a[x, y] => a.get(x, y)
                let mut args = Vec::new();
                loop {
                    args.push(self.parse_expression()?);
                    if !self.matches(TokenKind::Comma) {
                        break;
                    }
                }
                self.consume(TokenKind::RBracket, "expected ']' after index")?;
                expr = Exp::CallSlot {
                    name: "get".to_owned(),
                    receiver: Box::new(expr),
                    args,
                };
                callable_name = None;
            } else if self.matches(TokenKind::Dot) {
                self.consume(TokenKind::Identifier, "expected property name after '.'")?;
                let name = self.previous().lexeme.clone();
                if self.matches(TokenKind::LParen) {
                    let args = self.parse_argument_list()?;
                    expr = Exp::CallSlot {
                        name,
                        receiver: Box::new(expr),
                        args,
                    };
                } else {
                    expr = Exp::Slot {
                        name,
                        receiver: Box::new(expr),
                    };
                }
                callable_name = None;
            } else if self.check(TokenKind::LParen) {
                // Only a bare identifier can head a global call.
                let Some(name) = callable_name.take() else {
                    return Err(self.error("invalid function call syntax"));
                };
                self.advance();
                let args = self.parse_argument_list()?;
                expr = Exp::Call { name, args };
            } else {
                break;
            }
        }

        Ok(expr)
    }

    /// Parses call arguments up to and including the closing `)`.
    fn parse_argument_list(&mut self) -> Result<Vec<Exp>, ParseError> {
        let mut args = Vec::new();
        if !self.check(TokenKind::RParen) {
            loop {
                args.push(self.parse_expression()?);
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RParen, "expected ')' after arguments")?;
        Ok(args)
    }

    fn parse_primary(&mut self) -> Result<Exp, ParseError> {
        if self.matches(TokenKind::Integer) {
            let token = self.previous();
            let value: i64 = token
                .lexeme
                .parse()
                .map_err(|_| ParseError::new(token.line, token.lexeme.clone(), "integer literal out of range"))?;
            return Ok(Exp::Int(value));
        }

        if self.matches(TokenKind::Null) {
            return Ok(Exp::Null);
        }

        if self.matches(TokenKind::LParen) {
            let expr = self.parse_expression()?;
            self.consume(TokenKind::RParen, "expected ')' after expression")?;
            return Ok(expr);
        }

        if self.matches(TokenKind::Identifier) {
            return Ok(Exp::Ref(self.previous().lexeme.clone()));
        }

        if self.matches(TokenKind::If) {
            let pred = self.parse_expression()?;
            let conseq = self.parse_block()?;
            let alt = if self.matches(TokenKind::Else) {
                self.parse_block()?
            } else {
                ScopeStmt::Exp(Exp::Null)
            };
            return Ok(Exp::If {
                pred: Box::new(pred),
                conseq: Box::new(conseq),
                alt: Box::new(alt),
            });
        }

        if self.matches(TokenKind::While) {
            let pred = self.parse_expression()?;
            let body = self.parse_block()?;
            return Ok(Exp::While {
                pred: Box::new(pred),
                body: Box::new(body),
            });
        }

        if self.matches(TokenKind::Object) {
            let parent = if self.check(TokenKind::Colon) {
                None
            } else {
                Some(Box::new(self.parse_expression()?))
            };
            self.consume(TokenKind::Colon, "expected ':' after object declaration")?;
            self.consume(TokenKind::Indent, "expected an indented slot block")?;
            let mut slots = Vec::new();
            while !self.check(TokenKind::Dedent) && !self.check(TokenKind::Eof) {
                slots.push(self.parse_slot_statement()?);
            }
            self.consume(TokenKind::Dedent, "expected dedent after object slots")?;
            return Ok(Exp::Object { parent, slots });
        }

        if self.matches(TokenKind::Array) {
            self.consume(TokenKind::LParen, "expected '(' after 'array'")?;
            let length = self.parse_expression()?;
            self.consume(TokenKind::Comma, "expected ',' after array length")?;
            let init = self.parse_expression()?;
            self.consume(TokenKind::RParen, "expected ')' after array initializer")?;
            return Ok(Exp::Array {
                length: Box::new(length),
                init: Box::new(init),
            });
        }

        if self.matches(TokenKind::Printf) {
            self.consume(TokenKind::LParen, "expected '(' after 'printf'")?;
            if !self.check(TokenKind::Str) {
                return Err(self.error("expected string literal in printf"));
            }
            self.advance();
            let token = self.previous();
            let format = decode_string(&token.lexeme)
                .map_err(|message| ParseError::new(token.line, token.lexeme.clone(), message))?;
            let mut args = Vec::new();
            while self.matches(TokenKind::Comma) {
                args.push(self.parse_expression()?);
            }
            self.consume(TokenKind::RParen, "expected ')' after printf arguments")?;
            return Ok(Exp::Printf { format, args });
        }

        Err(self.error("unexpected token"))
    }

    fn parse_slot_statement(&mut self) -> Result<SlotStmt, ParseError> {
        if self.matches(TokenKind::Var) {
            self.consume(TokenKind::Identifier, "expected slot name")?;
            let name = self.previous().lexeme.clone();
            self.consume(TokenKind::Equal, "expected '=' after slot name")?;
            let init = self.parse_expression()?;
            return Ok(SlotStmt::Var { name, init });
        }

        if self.matches(TokenKind::Method) {
            self.consume(TokenKind::Identifier, "expected method name")?;
            let name = self.previous().lexeme.clone();
            let args = self.parse_parameter_list()?;
            let body = self.parse_block()?;
            return Ok(SlotStmt::Method { name, args, body });
        }

        Err(self.error("expected 'var' or 'method' in object body"))
    }
}

/// Builds `receiver.method(arg)` for a desugared binary operator.
fn desugar_binary(receiver: Exp, method: &str, arg: Exp) -> Exp {
    Exp::CallSlot {
        name: method.to_owned(),
        receiver: Box::new(receiver),
        args: vec![arg],
    }
}

/// Assignment targets: names, slots, and `get` calls (array indexing).
fn is_valid_lvalue(expr: &Exp) -> bool {
    match expr {
        Exp::Ref(_) | Exp::Slot { .. } => true,
        Exp::CallSlot { name, .. } => name == "get",
        _ => false,
    }
}

/// Strips quotes and decodes escape sequences in a string literal.
fn decode_string(lexeme: &str) -> Result<String, String> {
    let inner = lexeme
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .ok_or_else(|| "malformed string literal".to_owned())?;
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('\\') => out.push('\\'),
            Some('"') => out.push('"'),
            Some(other) => return Err(format!("unknown escape sequence '\\{other}'")),
            None => return Err("dangling escape at end of string".to_owned()),
        }
    }
    Ok(out)
}
