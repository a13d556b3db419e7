//! Embedded expression grammar.
//!
//! Precedence, lowest first: ternary `?:` (right-associative, a bare ternary
//! may sit in the "then" slot), `||`, `&&`, equality, comparison, additive,
//! multiplicative, unary, postfix (`.name`, `[key]`, `(args)`), primary.

use crate::ast::*;
use crate::error::{ParseError, Position};
use crate::lexer::Source;

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    Int(i64),
    Float(f64),
    Str(String),
    Nil,
    True,
    False,
    Op(&'static str),
}

impl Tok {
    fn describe(&self) -> String {
        match self {
            Tok::Ident(s) => format!("identifier `{s}`"),
            Tok::Int(i) => format!("number `{i}`"),
            Tok::Float(x) => format!("number `{x}`"),
            Tok::Str(s) => format!("string {s:?}"),
            Tok::Nil => "`nil`".to_string(),
            Tok::True => "`true`".to_string(),
            Tok::False => "`false`".to_string(),
            Tok::Op(op) => format!("`{op}`"),
        }
    }
}

// Longest operators first so `===` wins over `==`.
const OPERATORS: &[&str] = &[
    "===", "!==", "==", "!=", "<=", ">=", "&&", "||", "<", ">", "!", "+", "-", "*", "/", "%",
    "?", ":", ",", ".", "(", ")", "[", "]", "{", "}",
];

struct Scanner<'a> {
    src: &'a str,
    cursor: usize,
    pos: Position,
}

impl<'a> Scanner<'a> {
    fn new(source: &'a Source) -> Self {
        Self {
            src: &source.text,
            cursor: 0,
            pos: source.pos,
        }
    }

    fn rest(&self) -> &'a str {
        &self.src[self.cursor..]
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.rest().chars().next()?;
        self.cursor += c.len_utf8();
        if c == '\n' {
            self.pos.line += 1;
            self.pos.column = 1;
        } else {
            self.pos.column += 1;
        }
        Some(c)
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError::MalformedExpression {
            pos: self.pos,
            message: message.into(),
        }
    }

    fn scan(mut self) -> Result<Vec<(Tok, Position)>, ParseError> {
        let mut out = Vec::new();
        loop {
            while self.rest().starts_with(char::is_whitespace) {
                self.bump();
            }
            let pos = self.pos;
            let Some(c) = self.rest().chars().next() else {
                return Ok(out);
            };
            let tok = if c.is_ascii_digit() {
                self.number()?
            } else if c == '"' || c == '\'' {
                self.string(c)?
            } else if c.is_alphabetic() || c == '_' || c == '$' {
                let start = self.cursor;
                while self
                    .rest()
                    .starts_with(|c: char| c.is_alphanumeric() || c == '_' || c == '$')
                {
                    self.bump();
                }
                match &self.src[start..self.cursor] {
                    "true" => Tok::True,
                    "false" => Tok::False,
                    "nil" | "null" | "undefined" => Tok::Nil,
                    word => Tok::Ident(word.to_string()),
                }
            } else if let Some(op) = OPERATORS.iter().find(|op| self.rest().starts_with(**op)) {
                for _ in 0..op.len() {
                    self.bump();
                }
                Tok::Op(match *op {
                    "===" => "==",
                    "!==" => "!=",
                    other => other,
                })
            } else {
                return Err(self.error(format!("unexpected character {c:?}")));
            };
            out.push((tok, pos));
        }
    }

    fn number(&mut self) -> Result<Tok, ParseError> {
        let start = self.cursor;
        let mut float = false;
        while let Some(c) = self.rest().chars().next() {
            let next_is_digit = self.rest()[c.len_utf8()..].starts_with(|d: char| d.is_ascii_digit());
            if c.is_ascii_digit() {
                self.bump();
            } else if c == '.' && !float && next_is_digit {
                float = true;
                self.bump();
            } else if (c == 'e' || c == 'E') && next_is_digit {
                float = true;
                self.bump();
            } else {
                break;
            }
        }
        let text = &self.src[start..self.cursor];
        if float {
            text.parse()
                .map(Tok::Float)
                .map_err(|_| self.error(format!("invalid number `{text}`")))
        } else {
            text.parse()
                .map(Tok::Int)
                .map_err(|_| self.error(format!("integer `{text}` out of range")))
        }
    }

    fn string(&mut self, quote: char) -> Result<Tok, ParseError> {
        let start = self.pos;
        self.bump();
        let mut s = String::new();
        loop {
            match self.bump() {
                None => {
                    return Err(ParseError::MalformedExpression {
                        pos: start,
                        message: "unterminated string".to_string(),
                    })
                }
                Some('\\') => match self.bump() {
                    Some('n') => s.push('\n'),
                    Some('t') => s.push('\t'),
                    Some('r') => s.push('\r'),
                    Some('0') => s.push('\0'),
                    Some(esc) => s.push(esc),
                    None => {}
                },
                Some(c) if c == quote => return Ok(Tok::Str(s)),
                Some(c) => s.push(c),
            }
        }
    }
}

pub struct ExprParser {
    tokens: Vec<(Tok, Position)>,
    cursor: usize,
    end: Position,
}

impl ExprParser {
    pub fn new(source: &Source) -> Result<Self, ParseError> {
        let scanner = Scanner::new(source);
        let mut end = source.pos;
        end.column += source.text.chars().count();
        Ok(Self {
            tokens: scanner.scan()?,
            cursor: 0,
            end,
        })
    }

    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.cursor).map(|(t, _)| t)
    }

    fn peek_pos(&self) -> Position {
        self.tokens
            .get(self.cursor)
            .map(|(_, p)| *p)
            .unwrap_or(self.end)
    }

    fn consume(&mut self) -> Option<Tok> {
        let tok = self.tokens.get(self.cursor).map(|(t, _)| t.clone());
        if tok.is_some() {
            self.cursor += 1;
        }
        tok
    }

    fn at_op(&self, op: &str) -> bool {
        matches!(self.peek(), Some(Tok::Op(o)) if *o == op)
    }

    fn eat_op(&mut self, op: &str) -> bool {
        if self.at_op(op) {
            self.cursor += 1;
            true
        } else {
            false
        }
    }

    fn unexpected(&self, expected: &str) -> ParseError {
        ParseError::UnexpectedToken {
            pos: self.peek_pos(),
            expected: expected.to_string(),
            found: self
                .peek()
                .map(Tok::describe)
                .unwrap_or_else(|| "end of expression".to_string()),
        }
    }

    fn expect_op(&mut self, op: &'static str) -> Result<(), ParseError> {
        if self.eat_op(op) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("`{op}`")))
        }
    }

    fn finish(&self) -> Result<(), ParseError> {
        match self.peek() {
            None => Ok(()),
            Some(_) => Err(self.unexpected("end of expression")),
        }
    }

    pub fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        self.parse_ternary()
    }

    fn parse_ternary(&mut self) -> Result<Expr, ParseError> {
        let cond = self.parse_or()?;
        if !self.eat_op("?") {
            return Ok(cond);
        }
        let then = self.parse_ternary()?;
        self.expect_op(":")?;
        let otherwise = self.parse_ternary()?;
        Ok(Expr::Ternary(
            Box::new(cond),
            Box::new(then),
            Box::new(otherwise),
        ))
    }

    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_and()?;
        while self.eat_op("||") {
            let rhs = self.parse_and()?;
            lhs = Expr::Binary(BinOp::Or, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_eq()?;
        while self.eat_op("&&") {
            let rhs = self.parse_eq()?;
            lhs = Expr::Binary(BinOp::And, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_eq(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_cmp()?;
        loop {
            let op = if self.eat_op("==") {
                BinOp::Eq
            } else if self.eat_op("!=") {
                BinOp::Ne
            } else {
                return Ok(lhs);
            };
            let rhs = self.parse_cmp()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn parse_cmp(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_add()?;
        loop {
            let op = if self.eat_op("<=") {
                BinOp::Le
            } else if self.eat_op(">=") {
                BinOp::Ge
            } else if self.eat_op("<") {
                BinOp::Lt
            } else if self.eat_op(">") {
                BinOp::Gt
            } else {
                return Ok(lhs);
            };
            let rhs = self.parse_add()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn parse_add(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_mul()?;
        loop {
            let op = if self.eat_op("+") {
                BinOp::Add
            } else if self.eat_op("-") {
                BinOp::Sub
            } else {
                return Ok(lhs);
            };
            let rhs = self.parse_mul()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn parse_mul(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = if self.eat_op("*") {
                BinOp::Mul
            } else if self.eat_op("/") {
                BinOp::Div
            } else if self.eat_op("%") {
                BinOp::Rem
            } else {
                return Ok(lhs);
            };
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        if self.eat_op("!") {
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(self.parse_unary()?)));
        }
        if self.eat_op("-") {
            return Ok(match self.parse_unary()? {
                Expr::Literal(Literal::Int(i)) => Expr::Literal(Literal::Int(-i)),
                Expr::Literal(Literal::Float(x)) => Expr::Literal(Literal::Float(-x)),
                other => Expr::Unary(UnaryOp::Neg, Box::new(other)),
            });
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.eat_op(".") {
                let Some(Tok::Ident(name)) = self.peek().cloned() else {
                    return Err(self.unexpected("field name after `.`"));
                };
                self.cursor += 1;
                expr = Expr::Field(Box::new(expr), name);
            } else if self.eat_op("[") {
                let key = self.parse_expr()?;
                self.expect_op("]")?;
                expr = Expr::Index(Box::new(expr), Box::new(key));
            } else if self.eat_op("(") {
                let args = self.parse_list(")")?;
                expr = Expr::Call(Box::new(expr), args);
            } else {
                return Ok(expr);
            }
        }
    }

    /// Comma separated expressions up to `close`; a trailing comma is fine.
    fn parse_list(&mut self, close: &'static str) -> Result<Vec<Expr>, ParseError> {
        let mut items = Vec::new();
        while !self.eat_op(close) {
            items.push(self.parse_expr()?);
            if !self.eat_op(",") {
                self.expect_op(close)?;
                break;
            }
        }
        Ok(items)
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let pos = self.peek_pos();
        let expr = match self.consume() {
            Some(Tok::Int(i)) => Expr::Literal(Literal::Int(i)),
            Some(Tok::Float(x)) => Expr::Literal(Literal::Float(x)),
            Some(Tok::Str(s)) => Expr::Literal(Literal::Str(s)),
            Some(Tok::True) => Expr::Literal(Literal::Bool(true)),
            Some(Tok::False) => Expr::Literal(Literal::Bool(false)),
            Some(Tok::Nil) => Expr::Literal(Literal::Nil),
            Some(Tok::Ident(name)) => Expr::Ident(name),
            Some(Tok::Op("(")) => {
                let inner = self.parse_expr()?;
                self.expect_op(")")?;
                inner
            }
            Some(Tok::Op("[")) => Expr::Array(self.parse_list("]")?),
            Some(Tok::Op("{")) => self.parse_map()?,
            Some(tok) => {
                return Err(ParseError::UnexpectedToken {
                    pos,
                    expected: "expression".to_string(),
                    found: tok.describe(),
                })
            }
            None => return Err(self.unexpected("expression")),
        };
        Ok(expr)
    }

    fn parse_map(&mut self) -> Result<Expr, ParseError> {
        let mut entries = Vec::new();
        while !self.eat_op("}") {
            let key = match self.peek() {
                Some(Tok::Ident(s)) | Some(Tok::Str(s)) => s.clone(),
                Some(Tok::Int(i)) => i.to_string(),
                _ => return Err(self.unexpected("map key")),
            };
            self.cursor += 1;
            self.expect_op(":")?;
            entries.push((key, self.parse_expr()?));
            if !self.eat_op(",") {
                self.expect_op("}")?;
                break;
            }
        }
        Ok(Expr::Map(entries))
    }
}

/// Parses a complete expression; trailing input is an error.
pub fn parse_expression(source: &Source) -> Result<Expr, ParseError> {
    let mut parser = ExprParser::new(source)?;
    if parser.peek().is_none() {
        return Err(parser.unexpected("expression"));
    }
    let expr = parser.parse_expr()?;
    parser.finish()?;
    Ok(expr)
}

/// Parses a comma separated argument list such as the inside of `+mixin(...)`.
pub fn parse_arguments(source: &Source) -> Result<Vec<Expr>, ParseError> {
    let mut parser = ExprParser::new(source)?;
    let mut args = Vec::new();
    while parser.peek().is_some() {
        args.push(parser.parse_expr()?);
        if !parser.eat_op(",") {
            parser.finish()?;
        }
    }
    Ok(args)
}
