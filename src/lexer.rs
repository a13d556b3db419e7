use crate::error::{LexError, Position};

/// An unparsed expression slice and where it starts in the template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    pub text: String,
    pub pos: Position,
}

impl Source {
    pub fn new(text: impl Into<String>, pos: Position) -> Self {
        Self {
            text: text.into(),
            pos,
        }
    }

    /// The part of this source starting at byte offset `start`.
    pub fn slice_from(&self, start: usize) -> Source {
        let mut pos = self.pos;
        for c in self.text[..start].chars() {
            if c == '\n' {
                pos.line += 1;
                pos.column = 1;
            } else {
                pos.column += 1;
            }
        }
        Source::new(&self.text[start..], pos)
    }

    /// Same source with surrounding whitespace removed.
    pub fn trimmed(&self) -> Source {
        let lead = self.text.len() - self.text.trim_start().len();
        let mut out = self.slice_from(lead);
        out.text.truncate(out.text.trim_end().len());
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    If,
    Unless,
    Else,
    ElseIf,
    Each,
    Mixin,
    Block,
    Append,
    Prepend,
    Extends,
    Include,
    Doctype,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    Indent(usize), // new depth
    Dedent,
    Newline,
    Eof,

    Tag(String),
    Class(String),
    Id(String),
    AttrOpen,
    Attr {
        name: String,
        value: Option<Source>,
        escaped: bool,
    },
    AttrClose,
    SelfClose,      // trailing `/`
    BlockExpansion, // `: `
    Dot,            // opens a raw text block
    RawText(String),

    Pipe,
    Text(String),
    Interpolation {
        expr: Source,
        escaped: bool,
    },
    InterpolationOpen,  // #[
    InterpolationClose, // ]

    Code {
        expr: Source,
        buffered: bool,
        escaped: bool,
    },
    Keyword {
        keyword: Keyword,
        args: Source,
    },
    MixinCall {
        name: String,
        args: Option<Source>,
    },
    Comment(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub pos: Position,
}

enum LineEnd {
    Plain,
    RawBlock,
    Comment(String),
}

#[derive(Clone)]
pub struct Lexer<'a> {
    input: &'a str,
    cursor: usize,
    line: usize,
    column: usize,
    indent_char: Option<char>,
    indent_stack: Vec<usize>,
    keep_comments: bool,
    tokens: Vec<Token>,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input,
            cursor: 0,
            line: 1,
            column: 1,
            indent_char: None,
            indent_stack: vec![0],
            keep_comments: false,
            tokens: Vec::new(),
        }
    }

    /// Emit buffered `//` comments instead of dropping them.
    pub fn with_comments(mut self, keep: bool) -> Self {
        self.keep_comments = keep;
        self
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>, LexError> {
        while self.cursor < self.input.len() {
            self.lex_line()?;
        }
        let pos = self.pos();
        while self.indent_stack.len() > 1 {
            self.indent_stack.pop();
            self.push(TokenKind::Dedent, pos);
        }
        self.push(TokenKind::Eof, pos);
        Ok(self.tokens)
    }

    fn rest(&self) -> &'a str {
        &self.input[self.cursor..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn peek_at(&self, n: usize) -> Option<char> {
        self.rest().chars().nth(n)
    }

    fn starts_with(&self, s: &str) -> bool {
        self.rest().starts_with(s)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.cursor += c.len_utf8();
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    /// Skips `len` bytes that are known not to contain a line break.
    fn advance(&mut self, len: usize) {
        let end = self.cursor + len;
        self.column += self.input[self.cursor..end].chars().count();
        self.cursor = end;
    }

    fn pos(&self) -> Position {
        Position::new(self.line, self.column)
    }

    fn push(&mut self, kind: TokenKind, pos: Position) {
        self.tokens.push(Token { kind, pos });
    }

    fn unexpected(&self) -> LexError {
        match self.peek() {
            Some(found) => LexError::UnexpectedChar {
                pos: self.pos(),
                found,
            },
            None => LexError::Unterminated {
                pos: self.pos(),
                what: "line",
            },
        }
    }

    /// The rest of the current line, without its terminator.
    fn current_line(&self) -> &'a str {
        let rest = self.rest();
        let end = rest.find('\n').unwrap_or(rest.len());
        rest[..end].trim_end_matches('\r')
    }

    fn at_line_end(&self) -> bool {
        matches!(self.peek(), None | Some('\n')) || self.starts_with("\r\n")
    }

    fn consume_eol(&mut self) {
        if self.starts_with("\r\n") {
            self.advance(1);
        }
        if self.peek() == Some('\n') {
            self.bump();
        }
    }

    fn skip_line(&mut self) {
        self.advance(self.current_line().len());
        if self.peek() == Some('\r') {
            self.advance(1);
        }
        self.consume_eol();
    }

    fn skip_inline_ws(&mut self) {
        while matches!(self.peek(), Some(' ') | Some('\t')) {
            self.bump();
        }
    }

    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> String {
        let rest = self.rest();
        let len = rest.find(|c: char| !pred(c)).unwrap_or(rest.len());
        self.advance(len);
        rest[..len].to_string()
    }

    fn take_line(&mut self) -> String {
        let line = self.current_line();
        self.advance(line.len());
        line.to_string()
    }

    /// Rest of the line as an expression source, leading blanks skipped.
    fn take_source(&mut self) -> Source {
        self.skip_inline_ws();
        let pos = self.pos();
        Source::new(self.take_line().trim_end(), pos)
    }

    fn lex_line(&mut self) -> Result<(), LexError> {
        let line = self.current_line();
        let content = line.trim_start_matches([' ', '\t']);
        if content.trim().is_empty() {
            self.skip_line();
            return Ok(());
        }
        let indent = &line[..line.len() - content.len()];
        let pos = self.pos();
        self.check_indent_chars(indent, pos)?;
        let width = indent.len();

        if content.starts_with("//") && (content.starts_with("//-") || !self.keep_comments) {
            // Dropped comments do not take part in indentation.
            self.skip_line();
            self.capture_nested(width);
            return Ok(());
        }

        self.apply_indent(width, pos)?;
        self.advance(indent.len());
        let end = self.lex_content()?;
        self.skip_inline_ws();
        if !self.at_line_end() {
            return Err(self.unexpected());
        }
        let eol = self.pos();
        self.consume_eol();

        match end {
            LineEnd::Plain => {}
            LineEnd::RawBlock => {
                for text in self.capture_nested(width) {
                    self.push(TokenKind::RawText(text), eol);
                }
            }
            LineEnd::Comment(first) => {
                let mut text = first;
                for nested in self.capture_nested(width) {
                    text.push('\n');
                    text.push_str(&nested);
                }
                self.push(TokenKind::Comment(text), pos);
            }
        }
        self.push(TokenKind::Newline, eol);
        Ok(())
    }

    fn check_indent_chars(&mut self, indent: &str, pos: Position) -> Result<(), LexError> {
        let Some(first) = indent.chars().next() else {
            return Ok(());
        };
        let mixed = match *self.indent_char.get_or_insert(first) {
            '\t' => indent.trim_start_matches('\t').contains('\t'),
            _ => indent.contains('\t'),
        };
        if mixed {
            return Err(LexError::MixedIndentation { pos });
        }
        Ok(())
    }

    fn apply_indent(&mut self, width: usize, pos: Position) -> Result<(), LexError> {
        let current = self.indent_stack.last().copied().unwrap_or(0);
        if width > current {
            self.indent_stack.push(width);
            let depth = self.indent_stack.len() - 1;
            self.push(TokenKind::Indent(depth), pos);
        } else if width < current {
            while self.indent_stack.last().is_some_and(|&w| w > width) {
                self.indent_stack.pop();
                self.push(TokenKind::Dedent, pos);
            }
            if self.indent_stack.last() != Some(&width) {
                return Err(LexError::InconsistentIndentation {
                    pos,
                    expected: self.indent_stack.clone(),
                    found: width,
                });
            }
        }
        Ok(())
    }

    /// Consumes every following line indented deeper than `header_width`,
    /// returning them with exactly `header_width` characters stripped.
    fn capture_nested(&mut self, header_width: usize) -> Vec<String> {
        let mut lines = Vec::new();
        while self.cursor < self.input.len() {
            let line = self.current_line();
            if line.trim().is_empty() {
                lines.push(String::new());
                self.skip_line();
                continue;
            }
            let width = line.len() - line.trim_start_matches([' ', '\t']).len();
            if width <= header_width {
                break;
            }
            lines.push(line[header_width..].to_string());
            self.skip_line();
        }
        while lines.last().is_some_and(|l| l.is_empty()) {
            lines.pop();
        }
        lines
    }

    fn lex_content(&mut self) -> Result<LineEnd, LexError> {
        let pos = self.pos();
        if self.starts_with("//") {
            self.advance(2);
            return Ok(LineEnd::Comment(self.take_line()));
        }
        match self.peek() {
            Some('|') => {
                self.bump();
                self.push(TokenKind::Pipe, pos);
                if self.peek() == Some(' ') {
                    self.bump();
                }
                self.lex_text(None)?;
                Ok(LineEnd::Plain)
            }
            Some('<') => {
                let text = self.take_line();
                self.push(TokenKind::Text(text), pos);
                Ok(LineEnd::Plain)
            }
            Some('-') => {
                self.bump();
                self.push_code(pos, false, false);
                Ok(LineEnd::Plain)
            }
            Some('=') => {
                self.bump();
                self.push_code(pos, true, true);
                Ok(LineEnd::Plain)
            }
            Some('!') if self.starts_with("!!!") => {
                self.advance(3);
                let args = self.take_source();
                self.push(
                    TokenKind::Keyword {
                        keyword: Keyword::Doctype,
                        args,
                    },
                    pos,
                );
                Ok(LineEnd::Plain)
            }
            Some('!') if self.starts_with("!=") => {
                self.advance(2);
                self.push_code(pos, true, false);
                Ok(LineEnd::Plain)
            }
            Some('+') => {
                self.lex_mixin_call()?;
                Ok(LineEnd::Plain)
            }
            Some('.') if self.current_line()[1..].trim().is_empty() => {
                self.bump();
                self.push(TokenKind::Dot, pos);
                Ok(LineEnd::RawBlock)
            }
            Some('.') | Some('#') => self.lex_tag(false),
            Some(c) if is_word_char(c) => {
                if self.lex_keyword()? {
                    return Ok(LineEnd::Plain);
                }
                self.lex_tag(false)
            }
            _ => Err(self.unexpected()),
        }
    }

    fn push_code(&mut self, pos: Position, buffered: bool, escaped: bool) {
        let expr = self.take_source();
        self.push(
            TokenKind::Code {
                expr,
                buffered,
                escaped,
            },
            pos,
        );
    }

    fn lex_keyword(&mut self) -> Result<bool, LexError> {
        let rest = self.rest();
        let len = rest.find(|c: char| !is_word_char(c)).unwrap_or(rest.len());
        if !matches!(rest[len..].chars().next(), None | Some(' ' | '\t' | '\r' | '\n')) {
            return Ok(false);
        }
        let mut keyword = match &rest[..len] {
            "if" => Keyword::If,
            "unless" => Keyword::Unless,
            "else" => Keyword::Else,
            "each" | "for" => Keyword::Each,
            "mixin" => Keyword::Mixin,
            "block" => Keyword::Block,
            "append" => Keyword::Append,
            "prepend" => Keyword::Prepend,
            "extends" | "extend" => Keyword::Extends,
            "include" => Keyword::Include,
            "doctype" => Keyword::Doctype,
            _ => return Ok(false),
        };
        let pos = self.pos();
        self.advance(len);
        if keyword == Keyword::Else {
            let rest = self.rest().trim_start_matches([' ', '\t']);
            if rest.starts_with("if")
                && matches!(rest[2..].chars().next(), None | Some(' ' | '\t' | '\r' | '\n'))
            {
                self.skip_inline_ws();
                self.advance(2);
                keyword = Keyword::ElseIf;
            }
        }
        let args = self.take_source();
        self.push(TokenKind::Keyword { keyword, args }, pos);
        Ok(true)
    }

    fn lex_mixin_call(&mut self) -> Result<(), LexError> {
        let pos = self.pos();
        self.bump();
        let name = self.take_while(is_name_char);
        if name.is_empty() {
            return Err(self.unexpected());
        }
        let args = if self.peek() == Some('(') {
            self.bump();
            Some(self.scan_balanced(')', "mixin arguments")?)
        } else {
            None
        };
        self.push(TokenKind::MixinCall { name, args }, pos);
        Ok(())
    }

    fn lex_tag(&mut self, inline: bool) -> Result<LineEnd, LexError> {
        let pos = self.pos();
        if self.peek().is_some_and(is_word_char) {
            let name = self.take_tag_name();
            self.push(TokenKind::Tag(name), pos);
        }
        loop {
            match (self.peek(), self.peek_at(1)) {
                (Some('.'), Some(c)) if is_class_start(c) => {
                    let pos = self.pos();
                    self.bump();
                    let name = self.take_while(is_name_char);
                    self.push(TokenKind::Class(name), pos);
                }
                (Some('#'), Some(c)) if is_name_char(c) => {
                    let pos = self.pos();
                    self.bump();
                    let name = self.take_while(is_name_char);
                    self.push(TokenKind::Id(name), pos);
                }
                (Some('('), _) => self.lex_attributes()?,
                _ => break,
            }
        }
        if self.peek() == Some('/') {
            let pos = self.pos();
            self.bump();
            self.push(TokenKind::SelfClose, pos);
        }

        if inline {
            if self.peek() == Some(' ') {
                self.bump();
                self.lex_text(Some(']'))?;
            }
            return Ok(LineEnd::Plain);
        }

        let pos = self.pos();
        match self.peek() {
            None | Some('\n' | '\r') => Ok(LineEnd::Plain),
            Some('.') if self.current_line()[1..].trim().is_empty() => {
                self.bump();
                self.push(TokenKind::Dot, pos);
                Ok(LineEnd::RawBlock)
            }
            Some(':') if matches!(self.peek_at(1), Some(' ' | '\t')) => {
                self.bump();
                self.skip_inline_ws();
                self.push(TokenKind::BlockExpansion, pos);
                match self.peek() {
                    Some('+') => {
                        self.lex_mixin_call()?;
                        Ok(LineEnd::Plain)
                    }
                    Some(c) if is_word_char(c) || c == '.' || c == '#' => self.lex_tag(false),
                    _ => Err(self.unexpected()),
                }
            }
            Some('=') => {
                self.bump();
                self.push_code(pos, true, true);
                Ok(LineEnd::Plain)
            }
            Some('!') if self.starts_with("!=") => {
                self.advance(2);
                self.push_code(pos, true, false);
                Ok(LineEnd::Plain)
            }
            Some(' ' | '\t') => {
                self.bump();
                self.lex_text(None)?;
                Ok(LineEnd::Plain)
            }
            _ => Err(self.unexpected()),
        }
    }

    /// `\w(?:[-:\w]*\w)?`
    fn take_tag_name(&mut self) -> String {
        let rest = self.rest();
        let len = rest
            .find(|c: char| !(is_word_char(c) || c == '-' || c == ':'))
            .unwrap_or(rest.len());
        let name = rest[..len].trim_end_matches(['-', ':']);
        self.advance(name.len());
        name.to_string()
    }

    fn lex_attributes(&mut self) -> Result<(), LexError> {
        let open = self.pos();
        self.bump();
        self.push(TokenKind::AttrOpen, open);
        loop {
            while self.peek().is_some_and(|c| c.is_whitespace() || c == ',') {
                self.bump();
            }
            match self.peek() {
                None => {
                    return Err(LexError::Unterminated {
                        pos: open,
                        what: "attribute group",
                    })
                }
                Some(')') => {
                    let pos = self.pos();
                    self.bump();
                    self.push(TokenKind::AttrClose, pos);
                    return Ok(());
                }
                Some(_) => {}
            }

            let pos = self.pos();
            let name = self.lex_attr_name()?;
            self.skip_inline_ws();
            let escaped = !self.starts_with("!=");
            let value = if self.starts_with("!=") || self.peek() == Some('=') {
                self.advance(if escaped { 1 } else { 2 });
                while self.peek().is_some_and(char::is_whitespace) {
                    self.bump();
                }
                Some(self.scan_attr_value(open)?)
            } else {
                None
            };
            self.push(
                TokenKind::Attr {
                    name,
                    value,
                    escaped,
                },
                pos,
            );
        }
    }

    fn lex_attr_name(&mut self) -> Result<String, LexError> {
        if let Some(quote @ ('"' | '\'')) = self.peek() {
            let start = self.cursor + 1;
            self.skip_string(quote)?;
            return Ok(self.input[start..self.cursor - 1].to_string());
        }
        let start = self.cursor;
        while let Some(c) = self.peek() {
            if c.is_whitespace() || matches!(c, '=' | ',' | '(' | ')') || self.starts_with("!=") {
                break;
            }
            self.bump();
        }
        if self.cursor == start {
            return Err(self.unexpected());
        }
        Ok(self.input[start..self.cursor].to_string())
    }

    /// Scans one attribute value. Whitespace ends the value unless an
    /// operator sits on either side of it.
    fn scan_attr_value(&mut self, open: Position) -> Result<Source, LexError> {
        let start = self.cursor;
        let pos = self.pos();
        let mut stack: Vec<char> = Vec::new();
        loop {
            let Some(c) = self.peek() else {
                return Err(LexError::Unterminated {
                    pos: open,
                    what: "attribute group",
                });
            };
            match c {
                '"' | '\'' | '`' => self.skip_string(c)?,
                '(' | '[' | '{' => {
                    stack.push(closer(c));
                    self.bump();
                }
                ')' | ']' | '}' => {
                    if stack.is_empty() && c == ')' {
                        break;
                    }
                    if stack.pop() != Some(c) {
                        return Err(self.unexpected());
                    }
                    self.bump();
                }
                ',' if stack.is_empty() => break,
                c if c.is_whitespace() && stack.is_empty() => {
                    let prev = self.input[start..self.cursor].trim_end().chars().last();
                    if !continues_expression(prev, self.rest().trim_start()) {
                        break;
                    }
                    while self.peek().is_some_and(char::is_whitespace) {
                        self.bump();
                    }
                }
                _ => {
                    self.bump();
                }
            }
        }
        Ok(Source::new(self.input[start..self.cursor].trim_end(), pos))
    }

    fn skip_string(&mut self, quote: char) -> Result<(), LexError> {
        let pos = self.pos();
        self.bump();
        loop {
            match self.bump() {
                None | Some('\n') => {
                    return Err(LexError::Unterminated { pos, what: "string" });
                }
                Some('\\') => {
                    self.bump();
                }
                Some(c) if c == quote => return Ok(()),
                Some(_) => {}
            }
        }
    }

    /// Scans up to the `close` that balances an already consumed opener.
    fn scan_balanced(&mut self, close: char, what: &'static str) -> Result<Source, LexError> {
        let pos = self.pos();
        let start = self.cursor;
        let mut stack: Vec<char> = Vec::new();
        loop {
            match self.peek() {
                None | Some('\n') => return Err(LexError::Unterminated { pos, what }),
                Some(c @ ('"' | '\'' | '`')) => self.skip_string(c)?,
                Some(c @ ('(' | '[' | '{')) => {
                    stack.push(closer(c));
                    self.bump();
                }
                Some(c @ (')' | ']' | '}')) => {
                    if stack.is_empty() && c == close {
                        let source = Source::new(&self.input[start..self.cursor], pos);
                        self.bump();
                        return Ok(source);
                    }
                    if stack.pop() != Some(c) {
                        return Err(self.unexpected());
                    }
                    self.bump();
                }
                Some(_) => {
                    self.bump();
                }
            }
        }
    }

    fn lex_text(&mut self, terminator: Option<char>) -> Result<(), LexError> {
        let mut buf = String::new();
        let mut buf_pos = self.pos();
        let mut depth = 0usize;
        while let Some(c) = self.peek() {
            if self.at_line_end() {
                break;
            }
            if terminator == Some(c) && depth == 0 {
                break;
            }
            let pos = self.pos();
            if c == '\\' && (self.starts_with("\\#{") || self.starts_with("\\!{") || self.starts_with("\\#[")) {
                self.bump();
                if buf.is_empty() {
                    buf_pos = pos;
                }
                buf.extend(self.bump());
                continue;
            }
            if (c == '#' || c == '!') && self.peek_at(1) == Some('{') {
                self.flush_text(&mut buf, buf_pos);
                self.advance(2);
                let expr = self.scan_balanced('}', "interpolation")?;
                self.push(
                    TokenKind::Interpolation {
                        expr,
                        escaped: c == '#',
                    },
                    pos,
                );
                continue;
            }
            if c == '#' && self.peek_at(1) == Some('[') {
                self.flush_text(&mut buf, buf_pos);
                self.advance(2);
                self.push(TokenKind::InterpolationOpen, pos);
                if !self.peek().is_some_and(|c| is_word_char(c) || c == '.' || c == '#') {
                    return Err(self.unexpected());
                }
                self.lex_tag(true)?;
                if self.peek() != Some(']') {
                    return Err(LexError::Unterminated {
                        pos,
                        what: "tag interpolation",
                    });
                }
                let close = self.pos();
                self.bump();
                self.push(TokenKind::InterpolationClose, close);
                continue;
            }
            if terminator.is_some() {
                match c {
                    '[' => depth += 1,
                    ']' => depth -= 1,
                    _ => {}
                }
            }
            if buf.is_empty() {
                buf_pos = pos;
            }
            buf.push(c);
            self.bump();
        }
        self.flush_text(&mut buf, buf_pos);
        Ok(())
    }

    fn flush_text(&mut self, buf: &mut String, pos: Position) {
        if !buf.is_empty() {
            self.push(TokenKind::Text(std::mem::take(buf)), pos);
        }
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn is_name_char(c: char) -> bool {
    is_word_char(c) || c == '-'
}

fn is_class_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '-'
}

fn closer(open: char) -> char {
    match open {
        '(' => ')',
        '[' => ']',
        _ => '}',
    }
}

fn continues_expression(prev: Option<char>, next: &str) -> bool {
    const OPERATORS: &str = "+-*/%<>=&|?:";
    if prev.is_some_and(|c| OPERATORS.contains(c) || c == '!') {
        return true;
    }
    let mut chars = next.chars();
    match chars.next() {
        Some('!') => chars.next() == Some('='),
        Some(c) => OPERATORS.contains(c),
        None => false,
    }
}

pub fn tokenize(input: &str) -> Result<Vec<Token>, LexError> {
    Lexer::new(input).tokenize()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<TokenKind> {
        tokenize(input)
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    fn text(s: &str) -> TokenKind {
        TokenKind::Text(s.to_string())
    }

    #[test]
    fn tag_with_shorthands() {
        let got = kinds("span.class-name#id-name");
        assert_eq!(
            got,
            vec![
                TokenKind::Tag("span".into()),
                TokenKind::Class("class-name".into()),
                TokenKind::Id("id-name".into()),
                TokenKind::Newline,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn indentation_pushes_and_pops() {
        let got = kinds("html\n  head\n    title\n  body");
        assert_eq!(
            got,
            vec![
                TokenKind::Tag("html".into()),
                TokenKind::Newline,
                TokenKind::Indent(1),
                TokenKind::Tag("head".into()),
                TokenKind::Newline,
                TokenKind::Indent(2),
                TokenKind::Tag("title".into()),
                TokenKind::Newline,
                TokenKind::Dedent,
                TokenKind::Tag("body".into()),
                TokenKind::Newline,
                TokenKind::Dedent,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn dedent_to_unknown_width_is_an_error() {
        let err = tokenize("a\n    b\n  c").unwrap_err();
        assert!(matches!(
            err,
            LexError::InconsistentIndentation { found: 2, .. }
        ));
    }

    #[test]
    fn tab_in_space_indentation_is_an_error() {
        let err = tokenize("a\n  b\n\tc").unwrap_err();
        assert!(matches!(err, LexError::MixedIndentation { .. }));
    }

    #[test]
    fn alignment_spaces_after_tabs_are_allowed() {
        assert!(tokenize(".cl1\n\t\t.cl2\n\t\t\t .cl3 test").is_ok());
    }

    #[test]
    fn attribute_values_span_operators() {
        let got = kinds(r#"p(class=i % 2 == 0 ? "even" : "odd", x)"#);
        assert_eq!(
            got[2],
            TokenKind::Attr {
                name: "class".into(),
                value: Some(Source::new(
                    r#"i % 2 == 0 ? "even" : "odd""#,
                    Position::new(1, 9)
                )),
                escaped: true,
            }
        );
        assert!(matches!(&got[3], TokenKind::Attr { name, value: None, .. } if name == "x"));
    }

    #[test]
    fn whitespace_separates_attributes() {
        let got = kinds(r#"div(name="Test" @foo.bar="baz", unescaped!="<foo>" "quoted"= "foo")"#);
        let names: Vec<_> = got
            .iter()
            .filter_map(|k| match k {
                TokenKind::Attr { name, escaped, .. } => Some((name.as_str(), *escaped)),
                _ => None,
            })
            .collect();
        assert_eq!(
            names,
            vec![
                ("name", true),
                ("@foo.bar", true),
                ("unescaped", false),
                ("quoted", true)
            ]
        );
    }

    #[test]
    fn unterminated_attribute_group() {
        let err = tokenize("div(a=1").unwrap_err();
        assert!(matches!(
            err,
            LexError::Unterminated {
                what: "attribute group",
                ..
            }
        ));
    }

    #[test]
    fn interpolations_split_text() {
        let got = kinds("| a #{b} !{c} \\#{d}");
        assert_eq!(got[0], TokenKind::Pipe);
        assert_eq!(got[1], text("a "));
        assert!(matches!(&got[2], TokenKind::Interpolation { expr, escaped: true } if expr.text == "b"));
        assert_eq!(got[3], text(" "));
        assert!(matches!(&got[4], TokenKind::Interpolation { expr, escaped: false } if expr.text == "c"));
        assert_eq!(got[5], text(" #{d}"));
    }

    #[test]
    fn unterminated_interpolation() {
        let err = tokenize("p #{a").unwrap_err();
        assert!(matches!(
            err,
            LexError::Unterminated {
                what: "interpolation",
                ..
            }
        ));
    }

    #[test]
    fn tag_interpolation_tokens() {
        let got = kinds("p Hello #[foo(bar='1') baz] World");
        assert_eq!(
            got[..4],
            [
                TokenKind::Tag("p".into()),
                text("Hello "),
                TokenKind::InterpolationOpen,
                TokenKind::Tag("foo".into()),
            ]
        );
        assert!(got.contains(&text("baz")));
        assert!(got.contains(&TokenKind::InterpolationClose));
        assert!(got.contains(&text(" World")));
    }

    #[test]
    fn raw_block_keeps_inner_whitespace() {
        let got = kinds("style.\n  body{ color: red }\n\n    x\n\np a");
        assert_eq!(
            got[..5],
            [
                TokenKind::Tag("style".into()),
                TokenKind::Dot,
                TokenKind::RawText("  body{ color: red }".into()),
                TokenKind::RawText(String::new()),
                TokenKind::RawText("    x".into()),
            ]
        );
        assert_eq!(got[5], TokenKind::Newline);
        assert_eq!(got[6], TokenKind::Tag("p".into()));
    }

    #[test]
    fn comments_are_dropped_by_default() {
        let got = kinds("// note\n  nested\np");
        assert_eq!(
            got,
            vec![TokenKind::Tag("p".into()), TokenKind::Newline, TokenKind::Eof]
        );
    }

    #[test]
    fn comments_kept_on_request() {
        let tokens = Lexer::new("// note\n//- hidden\np")
            .with_comments(true)
            .tokenize()
            .unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Comment(" note".into()));
        assert_eq!(tokens[2].kind, TokenKind::Tag("p".into()));
    }

    #[test]
    fn keywords_and_else_if() {
        let got = kinds("if a\nelse if b\nelse\neach v, i in items");
        let keywords: Vec<_> = got
            .iter()
            .filter_map(|k| match k {
                TokenKind::Keyword { keyword, args } => Some((*keyword, args.text.as_str())),
                _ => None,
            })
            .collect();
        assert_eq!(
            keywords,
            vec![
                (Keyword::If, "a"),
                (Keyword::ElseIf, "b"),
                (Keyword::Else, ""),
                (Keyword::Each, "v, i in items"),
            ]
        );
    }

    #[test]
    fn block_expansion_and_code() {
        let got = kinds("p: a(href=\"#\") foo\np.index= Items[1]");
        assert_eq!(got[1], TokenKind::BlockExpansion);
        assert_eq!(got[2], TokenKind::Tag("a".into()));
        assert!(got.iter().any(|k| matches!(
            k,
            TokenKind::Code { expr, buffered: true, escaped: true } if expr.text == "Items[1]"
        )));
    }

    #[test]
    fn mixin_call_arguments() {
        let got = kinds("+test(15, (1+1))");
        assert_eq!(
            got[0],
            TokenKind::MixinCall {
                name: "test".into(),
                args: Some(Source::new("15, (1+1)", Position::new(1, 7))),
            }
        );
    }

    #[test]
    fn source_slice_tracks_columns() {
        let src = Source::new("var x = 1", Position::new(3, 4));
        let sliced = src.slice_from(8);
        assert_eq!(sliced.text, "1");
        assert_eq!(sliced.pos, Position::new(3, 12));
    }

    #[test]
    fn columns_count_characters_across_skips() {
        let tokens = tokenize("div\n  p héllo #{x}\n  else if y").unwrap();
        let interpolation = tokens
            .iter()
            .find(|t| matches!(t.kind, TokenKind::Interpolation { .. }))
            .unwrap();
        assert_eq!(interpolation.pos, Position::new(2, 11));
        let keyword = tokens
            .iter()
            .find_map(|t| match &t.kind {
                TokenKind::Keyword { args, .. } => Some(args.pos),
                _ => None,
            })
            .unwrap();
        assert_eq!(keyword, Position::new(3, 11));
    }

    #[test]
    fn long_lines_keep_exact_columns() {
        let line = format!("p {}#{{x}}", "a".repeat(200_000));
        let tokens = tokenize(&line).unwrap();
        let interpolation = tokens
            .iter()
            .find(|t| matches!(t.kind, TokenKind::Interpolation { .. }))
            .unwrap();
        assert_eq!(interpolation.pos, Position::new(1, 200_003));
    }
}
