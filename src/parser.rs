use crate::ast::*;
use crate::error::{ParseError, Position};
use crate::expr::{parse_arguments, parse_expression};
use crate::lexer::{Keyword, Source, Token, TokenKind};
use crate::runtime::is_void;

/// Builds the document tree from a token stream.
pub struct Parser {
    tokens: Vec<Token>,
    cursor: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, cursor: 0 }
    }

    fn peek(&self) -> &TokenKind {
        self.tokens
            .get(self.cursor)
            .map(|t| &t.kind)
            .unwrap_or(&TokenKind::Eof)
    }

    fn pos(&self) -> Position {
        self.tokens
            .get(self.cursor)
            .or_else(|| self.tokens.last())
            .map(|t| t.pos)
            .unwrap_or_default()
    }

    fn consume(&mut self) -> Token {
        match self.tokens.get(self.cursor) {
            Some(token) => {
                self.cursor += 1;
                token.clone()
            }
            None => Token {
                kind: TokenKind::Eof,
                pos: self.pos(),
            },
        }
    }

    fn unexpected(&self, expected: &str) -> ParseError {
        ParseError::UnexpectedToken {
            pos: self.pos(),
            expected: expected.to_string(),
            found: describe(self.peek()),
        }
    }

    fn expect(&mut self, kind: TokenKind) -> Result<(), ParseError> {
        if *self.peek() == kind {
            self.cursor += 1;
            Ok(())
        } else {
            Err(self.unexpected(&describe(&kind)))
        }
    }

    pub fn parse(&mut self) -> Result<Vec<Node>, ParseError> {
        let mut nodes = Vec::new();
        loop {
            match self.peek() {
                TokenKind::Eof => return Ok(nodes),
                // Only the first line of a document can open with an indent.
                TokenKind::Indent(_) => nodes.extend(self.parse_children()?),
                TokenKind::Dedent => return Err(self.unexpected("a template line")),
                _ => nodes.extend(self.parse_line()?),
            }
        }
    }

    fn parse_nodes(&mut self) -> Result<Vec<Node>, ParseError> {
        let mut nodes = Vec::new();
        while !matches!(self.peek(), TokenKind::Dedent | TokenKind::Eof) {
            nodes.extend(self.parse_line()?);
        }
        Ok(nodes)
    }

    /// The indented block following the current line, if any.
    fn parse_children(&mut self) -> Result<Vec<Node>, ParseError> {
        if !matches!(self.peek(), TokenKind::Indent(_)) {
            return Ok(Vec::new());
        }
        self.cursor += 1;
        let nodes = self.parse_nodes()?;
        if *self.peek() == TokenKind::Dedent {
            self.cursor += 1;
        }
        Ok(nodes)
    }

    fn end_leaf(&mut self, construct: &'static str) -> Result<(), ParseError> {
        self.expect(TokenKind::Newline)?;
        if matches!(self.peek(), TokenKind::Indent(_)) {
            return Err(ParseError::InvalidConstruct {
                pos: self.pos(),
                construct,
                message: "cannot have nested content".to_string(),
            });
        }
        Ok(())
    }

    fn parse_line(&mut self) -> Result<Option<Node>, ParseError> {
        let pos = self.pos();
        let node = match self.peek().clone() {
            TokenKind::Newline => {
                self.cursor += 1;
                return Ok(None);
            }
            TokenKind::Tag(_) | TokenKind::Class(_) | TokenKind::Id(_) => {
                Node::Tag(self.parse_tag()?)
            }
            TokenKind::Dot => {
                self.cursor += 1;
                let lines = self.raw_lines();
                self.end_leaf("text block")?;
                Node::RawBlock(lines)
            }
            TokenKind::Pipe => {
                self.cursor += 1;
                let segments = self.parse_segments()?;
                self.end_leaf("piped text")?;
                Node::Text(segments)
            }
            TokenKind::Text(literal) => {
                self.cursor += 1;
                self.end_leaf("literal html")?;
                Node::Text(vec![Segment::Literal(literal)])
            }
            TokenKind::Code {
                expr,
                buffered: true,
                escaped,
            } => {
                self.cursor += 1;
                let segment = buffered_code(&expr, escaped)?;
                self.end_leaf("buffered code")?;
                Node::Text(vec![segment])
            }
            TokenKind::Code {
                expr,
                buffered: false,
                ..
            } => {
                self.cursor += 1;
                let node = parse_assignment(&expr)?;
                self.end_leaf("code")?;
                node
            }
            TokenKind::MixinCall { .. } => self.parse_mixin_call()?,
            TokenKind::Comment(text) => {
                self.cursor += 1;
                self.expect(TokenKind::Newline)?;
                Node::Comment(text)
            }
            TokenKind::Keyword { keyword, args } => {
                self.cursor += 1;
                self.parse_keyword(keyword, args, pos)?
            }
            _ => return Err(self.unexpected("a template line")),
        };
        Ok(Some(node))
    }

    fn parse_keyword(
        &mut self,
        keyword: Keyword,
        args: Source,
        pos: Position,
    ) -> Result<Node, ParseError> {
        match keyword {
            Keyword::If | Keyword::Unless => self.parse_if(args, keyword == Keyword::Unless, pos),
            Keyword::Else | Keyword::ElseIf => Err(ParseError::InvalidConstruct {
                pos,
                construct: "else",
                message: "must follow an if or unless block".to_string(),
            }),
            Keyword::Each => self.parse_each(args, pos),
            Keyword::Mixin => {
                let (name, params) = mixin_signature(&args)?;
                self.expect(TokenKind::Newline)?;
                let body = self.parse_children()?;
                Ok(Node::MixinDef { name, params, body })
            }
            Keyword::Block => {
                let mut words = args.text.splitn(2, char::is_whitespace);
                let (mode, name) = match (words.next(), words.next()) {
                    (Some("append"), Some(name)) => (BlockMode::Append, name),
                    (Some("prepend"), Some(name)) => (BlockMode::Prepend, name),
                    _ => (BlockMode::Replace, args.text.as_str()),
                };
                self.parse_block(block_name(name, pos)?, mode)
            }
            Keyword::Append => self.parse_block(block_name(&args.text, pos)?, BlockMode::Append),
            Keyword::Prepend => {
                self.parse_block(block_name(&args.text, pos)?, BlockMode::Prepend)
            }
            Keyword::Extends => {
                let path = directive_path(&args, "extends")?;
                self.end_leaf("extends")?;
                Ok(Node::Extends { path, pos })
            }
            Keyword::Include => {
                let path = directive_path(&args, "include")?;
                self.end_leaf("include")?;
                Ok(Node::Include { path, pos })
            }
            Keyword::Doctype => {
                let value = match args.text.as_str() {
                    "" => "html".to_string(),
                    other => other.to_string(),
                };
                self.end_leaf("doctype")?;
                Ok(Node::Doctype(value))
            }
        }
    }

    fn parse_block(&mut self, name: String, mode: BlockMode) -> Result<Node, ParseError> {
        self.expect(TokenKind::Newline)?;
        let children = self.parse_children()?;
        Ok(Node::Block(Block {
            name,
            mode,
            children,
        }))
    }

    fn parse_if(&mut self, cond: Source, negated: bool, pos: Position) -> Result<Node, ParseError> {
        let cond = parse_expression(&cond)?;
        self.expect(TokenKind::Newline)?;
        let then_branch = self.parse_children()?;
        let else_branch = match self.peek().clone() {
            TokenKind::Keyword {
                keyword: Keyword::ElseIf,
                args,
            } => {
                let pos = self.pos();
                self.cursor += 1;
                vec![self.parse_if(args, false, pos)?]
            }
            TokenKind::Keyword {
                keyword: Keyword::Else,
                args,
            } => {
                if !args.text.is_empty() {
                    return Err(ParseError::InvalidConstruct {
                        pos: args.pos,
                        construct: "else",
                        message: format!("unexpected `{}`", args.text),
                    });
                }
                self.cursor += 1;
                self.expect(TokenKind::Newline)?;
                self.parse_children()?
            }
            _ => Vec::new(),
        };
        Ok(Node::If {
            cond,
            negated,
            then_branch,
            else_branch,
            pos,
        })
    }

    /// `each item[, index] in collection`
    fn parse_each(&mut self, args: Source, pos: Position) -> Result<Node, ParseError> {
        let invalid = |message: &str| ParseError::InvalidConstruct {
            pos,
            construct: "each",
            message: message.to_string(),
        };
        let split = args
            .text
            .match_indices(" in ")
            .next()
            .map(|(at, _)| at)
            .ok_or_else(|| invalid("expected `item in collection`"))?;
        let mut names = args.text[..split].split(',').map(str::trim);
        let item = names
            .next()
            .filter(|n| is_identifier(n))
            .ok_or_else(|| invalid("expected a loop variable"))?
            .to_string();
        let index = match names.next() {
            Some(n) if is_identifier(n) => Some(n.to_string()),
            Some(_) => return Err(invalid("expected an index variable")),
            None => None,
        };
        if names.next().is_some() {
            return Err(invalid("at most two loop variables are allowed"));
        }
        let collection = parse_expression(&args.slice_from(split + 4))?;
        self.expect(TokenKind::Newline)?;
        let body = self.parse_children()?;
        Ok(Node::Each {
            item,
            index,
            collection,
            body,
            pos,
        })
    }

    fn parse_mixin_call(&mut self) -> Result<Node, ParseError> {
        let token = self.consume();
        let TokenKind::MixinCall { name, args } = token.kind else {
            return Err(self.unexpected("mixin call"));
        };
        let args = match args {
            Some(source) => parse_arguments(&source)?,
            None => Vec::new(),
        };
        self.end_leaf("mixin call")?;
        Ok(Node::MixinCall {
            name,
            args,
            pos: token.pos,
        })
    }

    /// A full tag line: head, inline content, then its indented children.
    /// With block expansion the nested tag owns the rest of the line and the
    /// indented block.
    fn parse_tag(&mut self) -> Result<Tag, ParseError> {
        let mut tag = self.parse_tag_head()?;
        match self.peek().clone() {
            TokenKind::Dot => {
                self.cursor += 1;
                tag.children.push(Node::RawBlock(self.raw_lines()));
                self.end_leaf("text block")?;
            }
            TokenKind::BlockExpansion => {
                self.cursor += 1;
                let child = match self.peek() {
                    TokenKind::MixinCall { .. } => self.parse_mixin_call()?,
                    TokenKind::Tag(_) | TokenKind::Class(_) | TokenKind::Id(_) => {
                        Node::Tag(self.parse_tag()?)
                    }
                    _ => return Err(self.unexpected("tag after `:`")),
                };
                tag.children.push(child);
            }
            TokenKind::Code {
                expr,
                buffered: true,
                escaped,
            } => {
                self.cursor += 1;
                tag.children
                    .push(Node::Text(vec![buffered_code(&expr, escaped)?]));
                self.expect(TokenKind::Newline)?;
                tag.children.extend(self.parse_children()?);
            }
            _ => {
                let segments = self.parse_segments()?;
                if !segments.is_empty() {
                    tag.children.push(Node::Text(segments));
                }
                self.expect(TokenKind::Newline)?;
                tag.children.extend(self.parse_children()?);
            }
        }
        if (tag.self_closing || is_void(&tag.name)) && !tag.children.is_empty() {
            return Err(ParseError::InvalidConstruct {
                pos: tag.pos,
                construct: "self-closing tag",
                message: format!("`{}` cannot have content", tag.name),
            });
        }
        Ok(tag)
    }

    /// Name, shorthands, attribute groups and the self-closing marker.
    fn parse_tag_head(&mut self) -> Result<Tag, ParseError> {
        let mut tag = match self.peek().clone() {
            TokenKind::Tag(name) => {
                let pos = self.consume().pos;
                Tag::new(name, pos)
            }
            _ => Tag::new("div", self.pos()),
        };
        loop {
            match self.peek().clone() {
                TokenKind::Class(name) => {
                    self.cursor += 1;
                    tag.classes.push(name);
                }
                TokenKind::Id(name) => {
                    self.cursor += 1;
                    tag.id = Some(name);
                }
                TokenKind::AttrOpen => {
                    self.cursor += 1;
                    self.parse_attributes(&mut tag)?;
                }
                TokenKind::SelfClose => {
                    self.cursor += 1;
                    tag.self_closing = true;
                    return Ok(tag);
                }
                _ => return Ok(tag),
            }
        }
    }

    fn parse_attributes(&mut self, tag: &mut Tag) -> Result<(), ParseError> {
        loop {
            let token = self.consume();
            match token.kind {
                TokenKind::AttrClose => return Ok(()),
                TokenKind::Attr {
                    name,
                    value,
                    escaped,
                } => {
                    let value = match value {
                        None => AttrValue::Boolean,
                        Some(source) => AttrValue::Expr {
                            expr: parse_expression(&source).map_err(|err| {
                                ParseError::MalformedAttribute {
                                    pos: token.pos,
                                    name: name.clone(),
                                    message: err.to_string(),
                                }
                            })?,
                            escaped,
                        },
                    };
                    tag.attributes.push(Attribute {
                        name,
                        value,
                        pos: token.pos,
                    });
                }
                other => {
                    return Err(ParseError::UnexpectedToken {
                        pos: token.pos,
                        expected: "attribute".to_string(),
                        found: describe(&other),
                    })
                }
            }
        }
    }

    /// Running text up to the end of the line or the closing `]` of a tag
    /// interpolation.
    fn parse_segments(&mut self) -> Result<Vec<Segment>, ParseError> {
        let mut segments = Vec::new();
        loop {
            match self.peek().clone() {
                TokenKind::Text(text) => {
                    self.cursor += 1;
                    segments.push(Segment::Literal(text));
                }
                TokenKind::Interpolation { expr, escaped } => {
                    let pos = self.consume().pos;
                    segments.push(Segment::Interpolated {
                        expr: parse_expression(&expr)?,
                        escaped,
                        pos,
                    });
                }
                TokenKind::InterpolationOpen => {
                    self.cursor += 1;
                    let mut tag = self.parse_tag_head()?;
                    let inner = self.parse_segments()?;
                    if !inner.is_empty() {
                        tag.children.push(Node::Text(inner));
                    }
                    self.expect(TokenKind::InterpolationClose)?;
                    segments.push(Segment::Tag(tag));
                }
                _ => return Ok(segments),
            }
        }
    }

    fn raw_lines(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        while let TokenKind::RawText(line) = self.peek() {
            lines.push(line.clone());
            self.cursor += 1;
        }
        lines
    }
}

fn buffered_code(expr: &Source, escaped: bool) -> Result<Segment, ParseError> {
    Ok(Segment::Interpolated {
        expr: parse_expression(expr)?,
        escaped,
        pos: expr.pos,
    })
}

/// `var name = expr`, also `let`, `const` or a bare `name = expr`.
fn parse_assignment(code: &Source) -> Result<Node, ParseError> {
    let text = code.text.as_str();
    let mut start = 0;
    for prefix in ["var ", "let ", "const "] {
        if text.starts_with(prefix) {
            start = prefix.len();
            break;
        }
    }
    let rest = &text[start..];
    let name_len = rest
        .find(|c: char| !(c.is_alphanumeric() || c == '_' || c == '$'))
        .unwrap_or(rest.len());
    let name = &rest[..name_len];
    let after = &rest[name_len..];
    let eq = after.len() - after.trim_start().len();
    let is_assignment = after[eq..].starts_with('=') && !after[eq..].starts_with("==");
    if !is_identifier(name) || !is_assignment {
        return Err(ParseError::InvalidConstruct {
            pos: code.pos,
            construct: "code",
            message: format!("expected an assignment, found `{text}`"),
        });
    }
    let expr = parse_expression(&code.slice_from(start + name_len + eq + 1))?;
    Ok(Node::Assignment {
        name: name.to_string(),
        expr,
        pos: code.pos,
    })
}

/// `name(param, ...)` or a bare `name`.
fn mixin_signature(args: &Source) -> Result<(String, Vec<String>), ParseError> {
    let invalid = |message: String| ParseError::InvalidConstruct {
        pos: args.pos,
        construct: "mixin",
        message,
    };
    let text = args.text.as_str();
    let (name, params) = match text.find('(') {
        Some(open) => {
            let inner = text[open + 1..]
                .strip_suffix(')')
                .ok_or_else(|| invalid("unclosed parameter list".to_string()))?;
            (&text[..open], inner)
        }
        None => (text, ""),
    };
    let name = name.trim();
    if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '-') {
        return Err(invalid(format!("invalid mixin name `{name}`")));
    }
    let params = params
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| {
            if is_identifier(p) {
                Ok(p.to_string())
            } else {
                Err(invalid(format!("invalid parameter `{p}`")))
            }
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok((name.to_string(), params))
}

fn block_name(name: &str, pos: Position) -> Result<String, ParseError> {
    let name = name.trim();
    if name.is_empty() || name.contains(char::is_whitespace) {
        return Err(ParseError::InvalidConstruct {
            pos,
            construct: "block",
            message: format!("invalid block name `{name}`"),
        });
    }
    Ok(name.to_string())
}

fn directive_path(args: &Source, construct: &'static str) -> Result<String, ParseError> {
    let path = args.text.trim_matches(|c| c == '"' || c == '\'');
    if path.is_empty() {
        return Err(ParseError::InvalidConstruct {
            pos: args.pos,
            construct,
            message: "missing path".to_string(),
        });
    }
    Ok(path.to_string())
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_alphabetic() || c == '_' || c == '$')
        && chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
}

fn describe(kind: &TokenKind) -> String {
    match kind {
        TokenKind::Indent(_) => "indentation".to_string(),
        TokenKind::Dedent => "dedent".to_string(),
        TokenKind::Newline => "end of line".to_string(),
        TokenKind::Eof => "end of input".to_string(),
        TokenKind::Tag(name) => format!("tag `{name}`"),
        TokenKind::Class(name) => format!("class `.{name}`"),
        TokenKind::Id(name) => format!("id `#{name}`"),
        TokenKind::AttrOpen => "`(`".to_string(),
        TokenKind::Attr { name, .. } => format!("attribute `{name}`"),
        TokenKind::AttrClose => "`)`".to_string(),
        TokenKind::SelfClose => "`/`".to_string(),
        TokenKind::BlockExpansion => "`:`".to_string(),
        TokenKind::Dot => "`.`".to_string(),
        TokenKind::RawText(_) => "raw text".to_string(),
        TokenKind::Pipe => "`|`".to_string(),
        TokenKind::Text(_) => "text".to_string(),
        TokenKind::Interpolation { .. } => "interpolation".to_string(),
        TokenKind::InterpolationOpen => "`#[`".to_string(),
        TokenKind::InterpolationClose => "`]`".to_string(),
        TokenKind::Code { .. } => "code".to_string(),
        TokenKind::Keyword { keyword, .. } => format!("keyword `{keyword:?}`").to_lowercase(),
        TokenKind::MixinCall { name, .. } => format!("mixin call `+{name}`"),
        TokenKind::Comment(_) => "comment".to_string(),
    }
}
