//! Error types for every stage of the pipeline.
//!
//! Lexing and parsing errors carry a [`Position`]; resolution errors carry the
//! logical path they are about. The crate-level [`Error`] adds the path of the
//! unit being compiled or rendered so a failure can always be traced back to a
//! source line.

use std::fmt;

use thiserror::Error;

/// 1-based line and column inside a template source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

impl Position {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Errors produced while turning source text into tokens.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LexError {
    #[error("{pos}: invalid indentation, tabs and spaces cannot be mixed")]
    MixedIndentation { pos: Position },

    #[error("{pos}: inconsistent indentation, expected a width of {expected:?} but found {found}")]
    InconsistentIndentation {
        pos: Position,
        expected: Vec<usize>,
        found: usize,
    },

    #[error("{pos}: unterminated {what}")]
    Unterminated { pos: Position, what: &'static str },

    #[error("{pos}: unexpected character {found:?}")]
    UnexpectedChar { pos: Position, found: char },
}

/// Errors produced while building document or expression trees.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("{pos}: expected {expected}, found {found}")]
    UnexpectedToken {
        pos: Position,
        expected: String,
        found: String,
    },

    #[error("{pos}: malformed expression: {message}")]
    MalformedExpression { pos: Position, message: String },

    #[error("{pos}: malformed attribute `{name}`: {message}")]
    MalformedAttribute {
        pos: Position,
        name: String,
        message: String,
    },

    #[error("{pos}: invalid {construct}: {message}")]
    InvalidConstruct {
        pos: Position,
        construct: &'static str,
        message: String,
    },
}

/// Errors produced while loading and composing template units.
#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("template not found: {path}")]
    NotFound { path: String },

    #[error("cyclic extends chain: {}", chain.join(" -> "))]
    CyclicExtends { path: String, chain: Vec<String> },

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl ResolutionError {
    /// The logical path the error is about.
    pub fn path(&self) -> &str {
        match self {
            ResolutionError::NotFound { path }
            | ResolutionError::CyclicExtends { path, .. }
            | ResolutionError::Io { path, .. } => path,
        }
    }
}

/// Errors produced while executing a render program.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RenderError {
    #[error("undefined identifier `{name}`")]
    UndefinedIdentifier { name: String },

    #[error("cannot access {access} on {kind}")]
    InapplicableAccess { access: String, kind: &'static str },

    #[error("index {index} out of bounds for length {len}")]
    IndexOutOfBounds { index: i64, len: usize },

    #[error("value of type {kind} is not callable")]
    NotCallable { kind: &'static str },

    #[error("unsupported operands for `{op}`: {left} and {right}")]
    TypeMismatch {
        op: &'static str,
        left: &'static str,
        right: &'static str,
    },

    #[error("division by zero")]
    DivisionByZero,

    #[error("cannot iterate over {kind}")]
    NotIterable { kind: &'static str },

    #[error("unknown mixin `{name}`")]
    UnknownMixin { name: String },

    #[error("unresolved sub-template `{path}`")]
    UnresolvedSubTemplate { path: String },

    #[error("function `{name}` failed: {message}")]
    Function { name: String, message: String },

    #[error("invocation depth exceeded {limit}")]
    RecursionLimit { limit: usize },
}

/// Top-level error returned by the public API.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{path}:{source}")]
    Lex {
        path: String,
        #[source]
        source: LexError,
    },

    #[error("{path}:{source}")]
    Parse {
        path: String,
        #[source]
        source: ParseError,
    },

    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error("render data cannot be converted: {0}")]
    Data(#[from] serde_json::Error),

    #[error("{path}:{pos}: {source}")]
    Render {
        path: String,
        pos: Position,
        #[source]
        source: RenderError,
    },
}

impl Error {
    /// The render error, if this is one.
    pub fn as_render(&self) -> Option<&RenderError> {
        match self {
            Error::Render { source, .. } => Some(source),
            _ => None,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
