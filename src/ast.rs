use std::fmt;

use crate::error::Position;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Rem => "%",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::And => "&&",
            BinOp::Or => "||",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Literal),
    Ident(String),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Ternary(Box<Expr>, Box<Expr>, Box<Expr>),
    Index(Box<Expr>, Box<Expr>), // foo[bar]
    Call(Box<Expr>, Vec<Expr>),  // foo(a, b)
    Field(Box<Expr>, String),    // foo.bar
    Array(Vec<Expr>),
    Map(Vec<(String, Expr)>), // entries keep source order
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(Literal::Nil) => f.write_str("nil"),
            Expr::Literal(Literal::Bool(b)) => write!(f, "{b}"),
            Expr::Literal(Literal::Int(i)) => write!(f, "{i}"),
            Expr::Literal(Literal::Float(x)) => write!(f, "{x:?}"),
            Expr::Literal(Literal::Str(s)) => write!(f, "{s:?}"),
            Expr::Ident(name) => f.write_str(name),
            Expr::Binary(op, l, r) => write!(f, "({l} {} {r})", op.symbol()),
            Expr::Unary(UnaryOp::Not, e) => write!(f, "!{e}"),
            Expr::Unary(UnaryOp::Neg, e) => write!(f, "-{e}"),
            Expr::Ternary(c, t, e) => write!(f, "({c} ? {t} : {e})"),
            Expr::Index(base, key) => write!(f, "{base}[{key}]"),
            Expr::Call(base, args) => {
                write!(f, "{base}(")?;
                write_list(f, args)?;
                f.write_str(")")
            }
            Expr::Field(base, name) => write!(f, "{base}.{name}"),
            Expr::Array(items) => {
                f.write_str("[")?;
                write_list(f, items)?;
                f.write_str("]")
            }
            Expr::Map(entries) => {
                f.write_str("{")?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{key:?}: {value}")?;
                }
                f.write_str("}")
            }
        }
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, items: &[Expr]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

/// How a derived template's block combines with the inherited one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlockMode {
    #[default]
    Replace,
    Append,
    Prepend,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub name: String,
    pub mode: BlockMode,
    pub children: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    /// `name` with no value, rendered bare.
    Boolean,
    Expr { expr: Expr, escaped: bool },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub name: String,
    pub value: AttrValue,
    pub pos: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Tag {
    pub name: String,
    pub classes: Vec<String>, // shorthand, source order
    pub id: Option<String>,   // shorthand
    pub attributes: Vec<Attribute>,
    pub self_closing: bool,
    pub children: Vec<Node>,
    pub pos: Position,
}

impl Tag {
    pub fn new(name: impl Into<String>, pos: Position) -> Self {
        Self {
            name: name.into(),
            classes: Vec::new(),
            id: None,
            attributes: Vec::new(),
            self_closing: false,
            children: Vec::new(),
            pos,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Literal(String),
    Interpolated {
        expr: Expr,
        escaped: bool,
        pos: Position,
    },
    Tag(Tag), // #[tag ...]
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Tag(Tag),
    Text(Vec<Segment>),
    RawBlock(Vec<String>),
    Doctype(String),
    Comment(String),
    If {
        cond: Expr,
        negated: bool, // `unless`
        then_branch: Vec<Node>,
        else_branch: Vec<Node>,
        pos: Position,
    },
    Each {
        item: String,
        index: Option<String>,
        collection: Expr,
        body: Vec<Node>,
        pos: Position,
    },
    Assignment {
        name: String,
        expr: Expr,
        pos: Position,
    },
    MixinDef {
        name: String,
        params: Vec<String>,
        body: Vec<Node>,
    },
    MixinCall {
        name: String,
        args: Vec<Expr>,
        pos: Position,
    },
    Block(Block),
    Extends {
        path: String,
        pos: Position,
    },
    Include {
        path: String,
        pos: Position,
    },
}

/// Calls `f` on every node of the tree, parents before children.
pub fn walk_mut(nodes: &mut [Node], f: &mut dyn FnMut(&mut Node)) {
    for node in nodes {
        f(node);
        match node {
            Node::Tag(tag) => walk_mut(&mut tag.children, f),
            Node::If {
                then_branch,
                else_branch,
                ..
            } => {
                walk_mut(then_branch, f);
                walk_mut(else_branch, f);
            }
            Node::Each { body, .. } | Node::MixinDef { body, .. } => walk_mut(body, f),
            Node::Block(block) => walk_mut(&mut block.children, f),
            _ => {}
        }
    }
}
