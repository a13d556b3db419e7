//! Lowers a merged document tree into a flat, re-executable render program.

use std::collections::BTreeMap;
use std::fmt;

use tracing::trace;

use crate::ast::*;
use crate::error::Position;
use crate::resolver::{Resolved, SubUnit};
use crate::runtime::{doctype, is_inline, is_void};

/// How one attribute of an opening tag is produced at render time.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrPlan {
    Boolean(String),
    Value {
        name: String,
        expr: Expr,
        escaped: bool,
        pos: Position,
    },
    /// Shorthand classes followed by every `class=` value, merged.
    Class {
        shorthand: Vec<String>,
        values: Vec<(Expr, Position)>,
    },
    /// `id=` wins over the `#id` shorthand.
    Id {
        shorthand: Option<String>,
        value: Option<(Expr, Position)>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    Literal(String),
    Emit {
        expr: Expr,
        escaped: bool,
        pos: Position,
    },
    OpenTag {
        name: String,
        attrs: Vec<AttrPlan>,
        self_closing: bool,
        pos: Position,
    },
    Branch {
        cond: Expr,
        negated: bool,
        then_ops: Vec<Op>,
        else_ops: Vec<Op>,
        pos: Position,
    },
    Loop {
        item: String,
        index: Option<String>,
        collection: Expr,
        body: Vec<Op>,
        pos: Position,
    },
    Assign {
        name: String,
        expr: Expr,
        pos: Position,
    },
    InvokeMixin {
        name: String,
        args: Vec<Expr>,
        pos: Position,
    },
    InvokeSub {
        path: String,
        pos: Position,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Mixin {
    pub params: Vec<String>,
    pub body: Vec<Op>,
    /// Unit the mixin was declared in, for error reporting.
    pub path: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubTemplate {
    Compiled(Vec<Op>),
    Raw(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub name: String,
    pub ops: Vec<Op>,
    pub mixins: BTreeMap<String, Mixin>,
    pub sub_templates: BTreeMap<String, SubTemplate>,
}

/// Compiles the main tree and every sub-unit. Sub-unit mixins are collected
/// first so the main unit wins on name collisions.
pub fn generate(name: &str, resolved: Resolved, pretty: bool) -> Program {
    let mut mixins = BTreeMap::new();
    let mut sub_templates = BTreeMap::new();
    for (path, sub) in resolved.subs {
        let compiled = match sub {
            SubUnit::Raw(text) => SubTemplate::Raw(text),
            SubUnit::Template(nodes) => {
                let mut gen = Generator::new(&path, pretty);
                gen.emit_nodes(&nodes, 0);
                mixins.extend(gen.mixins);
                SubTemplate::Compiled(gen.ops)
            }
        };
        sub_templates.insert(path, compiled);
    }

    let mut gen = Generator::new(name, pretty);
    gen.emit_nodes(&resolved.nodes, 0);
    mixins.extend(gen.mixins);
    trace!(
        ops = gen.ops.len(),
        mixins = mixins.len(),
        subs = sub_templates.len(),
        "generated render program"
    );
    Program {
        name: name.to_string(),
        ops: gen.ops,
        mixins,
        sub_templates,
    }
}

struct Generator<'a> {
    path: &'a str,
    pretty: bool,
    ops: Vec<Op>,
    /// Whether anything precedes the op list currently being filled.
    started: bool,
    mixins: BTreeMap<String, Mixin>,
}

impl<'a> Generator<'a> {
    fn new(path: &'a str, pretty: bool) -> Self {
        Self {
            path,
            pretty,
            ops: Vec::new(),
            started: false,
            mixins: BTreeMap::new(),
        }
    }

    fn literal(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        if let Some(Op::Literal(prev)) = self.ops.last_mut() {
            prev.push_str(text);
        } else {
            self.ops.push(Op::Literal(text.to_string()));
        }
    }

    fn newline(&mut self, depth: usize) {
        if depth == 0 && !self.started && self.ops.is_empty() {
            return;
        }
        let indent = "  ".repeat(depth);
        self.literal(&format!("\n{indent}"));
    }

    /// Emits `nodes` into a fresh op list and returns it.
    fn nested(&mut self, nodes: &[Node], depth: usize) -> Vec<Op> {
        let was_started = self.started;
        self.started |= !self.ops.is_empty();
        let saved = std::mem::take(&mut self.ops);
        self.emit_nodes(nodes, depth);
        self.started = was_started;
        std::mem::replace(&mut self.ops, saved)
    }

    fn emit_nodes(&mut self, nodes: &[Node], depth: usize) {
        for node in nodes {
            self.emit_node(node, depth);
        }
    }

    fn emit_node(&mut self, node: &Node, depth: usize) {
        match node {
            Node::Tag(tag) => self.emit_tag(tag, depth),
            Node::Text(segments) => self.emit_segments(segments, depth),
            Node::RawBlock(lines) => {
                for line in lines {
                    self.literal(line);
                    self.literal("\n");
                }
            }
            Node::Doctype(value) => self.literal(&doctype(value)),
            Node::Comment(text) => self.literal(&format!("<!--{text}-->")),
            Node::If {
                cond,
                negated,
                then_branch,
                else_branch,
                pos,
            } => {
                let then_ops = self.nested(then_branch, depth);
                let else_ops = self.nested(else_branch, depth);
                self.ops.push(Op::Branch {
                    cond: cond.clone(),
                    negated: *negated,
                    then_ops,
                    else_ops,
                    pos: *pos,
                });
            }
            Node::Each {
                item,
                index,
                collection,
                body,
                pos,
            } => {
                let body = self.nested(body, depth);
                self.ops.push(Op::Loop {
                    item: item.clone(),
                    index: index.clone(),
                    collection: collection.clone(),
                    body,
                    pos: *pos,
                });
            }
            Node::Assignment { name, expr, pos } => self.ops.push(Op::Assign {
                name: name.clone(),
                expr: expr.clone(),
                pos: *pos,
            }),
            Node::MixinDef { name, params, body } => {
                let body = self.nested(body, depth);
                self.mixins.insert(
                    name.clone(),
                    Mixin {
                        params: params.clone(),
                        body,
                        path: self.path.to_string(),
                    },
                );
            }
            Node::MixinCall { name, args, pos } => self.ops.push(Op::InvokeMixin {
                name: name.clone(),
                args: args.clone(),
                pos: *pos,
            }),
            Node::Block(block) => self.emit_nodes(&block.children, depth),
            Node::Include { path, pos } => self.ops.push(Op::InvokeSub {
                path: path.clone(),
                pos: *pos,
            }),
            // Consumed by the resolver.
            Node::Extends { .. } => {}
        }
    }

    fn emit_segments(&mut self, segments: &[Segment], depth: usize) {
        for segment in segments {
            match segment {
                Segment::Literal(text) => self.literal(text),
                Segment::Interpolated { expr, escaped, pos } => self.ops.push(Op::Emit {
                    expr: expr.clone(),
                    escaped: *escaped,
                    pos: *pos,
                }),
                Segment::Tag(tag) => self.emit_inline_tag(tag, depth),
            }
        }
    }

    fn emit_tag(&mut self, tag: &Tag, depth: usize) {
        let breaks = self.pretty && !is_inline(&tag.name);
        if breaks {
            self.newline(depth);
        }
        if !self.open_tag(tag) {
            return;
        }
        self.emit_nodes(&tag.children, depth + 1);
        if breaks && has_block_tags(&tag.children) {
            self.newline(depth);
        }
        self.literal(&format!("</{}>", tag.name));
    }

    /// Tags embedded in running text never break lines.
    fn emit_inline_tag(&mut self, tag: &Tag, depth: usize) {
        if !self.open_tag(tag) {
            return;
        }
        self.emit_nodes(&tag.children, depth + 1);
        self.literal(&format!("</{}>", tag.name));
    }

    /// Returns false when the tag closes itself.
    fn open_tag(&mut self, tag: &Tag) -> bool {
        let self_closing = tag.self_closing || is_void(&tag.name);
        self.ops.push(Op::OpenTag {
            name: tag.name.clone(),
            attrs: attribute_plan(tag),
            self_closing,
            pos: tag.pos,
        });
        !self_closing
    }
}

fn attribute_plan(tag: &Tag) -> Vec<AttrPlan> {
    let mut plan = Vec::new();
    let mut class_values = Vec::new();
    let mut has_class = !tag.classes.is_empty();
    let mut id_value = None;
    for attr in &tag.attributes {
        match (attr.name.as_str(), &attr.value) {
            ("class", AttrValue::Expr { expr, .. }) => {
                has_class = true;
                class_values.push((expr.clone(), attr.pos));
            }
            ("id", AttrValue::Expr { expr, .. }) => id_value = Some((expr.clone(), attr.pos)),
            (name, AttrValue::Boolean) => plan.push(AttrPlan::Boolean(name.to_string())),
            (name, AttrValue::Expr { expr, escaped }) => plan.push(AttrPlan::Value {
                name: name.to_string(),
                expr: expr.clone(),
                escaped: *escaped,
                pos: attr.pos,
            }),
        }
    }
    if has_class {
        plan.push(AttrPlan::Class {
            shorthand: tag.classes.clone(),
            values: class_values,
        });
    }
    if tag.id.is_some() || id_value.is_some() {
        plan.push(AttrPlan::Id {
            shorthand: tag.id.clone(),
            value: id_value,
        });
    }
    plan
}

fn has_block_tags(nodes: &[Node]) -> bool {
    nodes.iter().any(|node| match node {
        Node::Tag(tag) => !is_inline(&tag.name),
        Node::If {
            then_branch,
            else_branch,
            ..
        } => has_block_tags(then_branch) || has_block_tags(else_branch),
        Node::Each { body, .. } => has_block_tags(body),
        Node::Block(block) => has_block_tags(&block.children),
        Node::MixinCall { .. } | Node::Include { .. } => true,
        _ => false,
    })
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "program {:?}", self.name)?;
        write_ops(f, &self.ops, 1)?;
        for (name, mixin) in &self.mixins {
            writeln!(f, "mixin {name}({}) from {:?}", mixin.params.join(", "), mixin.path)?;
            write_ops(f, &mixin.body, 1)?;
        }
        for (path, sub) in &self.sub_templates {
            match sub {
                SubTemplate::Compiled(ops) => {
                    writeln!(f, "sub {path:?}")?;
                    write_ops(f, ops, 1)?;
                }
                SubTemplate::Raw(text) => writeln!(f, "sub {path:?} raw {text:?}")?,
            }
        }
        Ok(())
    }
}

fn write_ops(f: &mut fmt::Formatter<'_>, ops: &[Op], depth: usize) -> fmt::Result {
    let pad = "  ".repeat(depth);
    for op in ops {
        match op {
            Op::Literal(text) => writeln!(f, "{pad}text {text:?}")?,
            Op::Emit { expr, escaped, .. } => {
                let mode = if *escaped { "escaped" } else { "raw" };
                writeln!(f, "{pad}emit {mode} {expr}")?;
            }
            Op::OpenTag {
                name,
                attrs,
                self_closing,
                ..
            } => {
                write!(f, "{pad}open {name}")?;
                for attr in attrs {
                    write!(f, " ")?;
                    write_attr(f, attr)?;
                }
                writeln!(f, "{}", if *self_closing { " /" } else { "" })?;
            }
            Op::Branch {
                cond,
                negated,
                then_ops,
                else_ops,
                ..
            } => {
                let keyword = if *negated { "unless" } else { "if" };
                writeln!(f, "{pad}{keyword} {cond}")?;
                write_ops(f, then_ops, depth + 1)?;
                if !else_ops.is_empty() {
                    writeln!(f, "{pad}else")?;
                    write_ops(f, else_ops, depth + 1)?;
                }
            }
            Op::Loop {
                item,
                index,
                collection,
                body,
                ..
            } => {
                match index {
                    Some(index) => writeln!(f, "{pad}each {item}, {index} in {collection}")?,
                    None => writeln!(f, "{pad}each {item} in {collection}")?,
                }
                write_ops(f, body, depth + 1)?;
            }
            Op::Assign { name, expr, .. } => writeln!(f, "{pad}set {name} = {expr}")?,
            Op::InvokeMixin { name, args, .. } => {
                let args: Vec<String> = args.iter().map(ToString::to_string).collect();
                writeln!(f, "{pad}call {name}({})", args.join(", "))?;
            }
            Op::InvokeSub { path, .. } => writeln!(f, "{pad}include {path:?}")?,
        }
    }
    Ok(())
}

fn write_attr(f: &mut fmt::Formatter<'_>, attr: &AttrPlan) -> fmt::Result {
    match attr {
        AttrPlan::Boolean(name) => write!(f, "{name}"),
        AttrPlan::Value {
            name,
            expr,
            escaped,
            ..
        } => write!(f, "{name}{}{expr}", if *escaped { "=" } else { "!=" }),
        AttrPlan::Class { shorthand, values } => {
            write!(f, "class=[")?;
            let parts = shorthand
                .iter()
                .map(|c| format!("{c:?}"))
                .chain(values.iter().map(|(expr, _)| expr.to_string()));
            for (i, part) in parts.enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{part}")?;
            }
            write!(f, "]")
        }
        AttrPlan::Id { shorthand, value } => match (value, shorthand) {
            (Some((expr, _)), _) => write!(f, "id={expr}"),
            (None, Some(id)) => write!(f, "id={id:?}"),
            (None, None) => Ok(()),
        },
    }
}
