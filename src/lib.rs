//! pugmill: compiles Pug/Jade-style templates into reusable HTML render
//! programs.
//!
//! A template is compiled once and rendered any number of times, possibly
//! from several threads at once:
//!
//! ```
//! use pugmill::{compile_string, Value};
//!
//! let tpl = compile_string("ul\n  each item in items\n    li= item").unwrap();
//! let data: Value = [("items", Value::from(vec!["a", "b"]))].into_iter().collect();
//! assert_eq!(tpl.render(&data).unwrap(), "<ul><li>a</li><li>b</li></ul>");
//! ```
//!
//! Pipeline:
//! - [`lexer`] turns source text into tokens, indentation included.
//! - [`parser`] builds the document tree, handing embedded code to [`expr`].
//! - [`resolver`] merges `extends`/`block` chains and loads `include`s.
//! - [`codegen`] lowers the merged tree into a [`codegen::Program`].
//! - [`eval`] runs a program against a data [`Value`].
//!
//! The library logs through `tracing` and installs no subscriber.

pub mod ast;
pub mod codegen;
pub mod error;
pub mod eval;
pub mod expr;
pub mod fs;
pub mod lexer;
pub mod parser;
pub mod resolver;
pub mod runtime;
pub mod template;
pub mod value;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

pub use error::{Error, LexError, ParseError, Position, RenderError, ResolutionError, Result};
pub use fs::{FileSystem, FsDir, MemoryDir};
pub use template::Template;
pub use value::{Function, Value};

use codegen::{generate, Program};
use resolver::Resolver;

/// Label used for templates compiled from a string.
pub const STRING_TEMPLATE: &str = "<string>";

/// Compile-time settings.
#[derive(Clone, Default)]
pub struct Options {
    pretty_print: bool,
    dir: Option<Arc<dyn FileSystem>>,
    excluded_imports: BTreeSet<String>,
    functions: Vec<Function>,
    comments: bool,
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    /// Break and indent block-level tags. Cosmetic only.
    pub fn with_pretty_print(mut self, pretty: bool) -> Self {
        self.pretty_print = pretty;
        self
    }

    /// Where `compile_file`, `include` and `extends` read from. Defaults to
    /// the current directory.
    pub fn with_dir(mut self, dir: impl FileSystem + 'static) -> Self {
        self.dir = Some(Arc::new(dir));
        self
    }

    /// Skip loading `path`; supply it later with
    /// [`Template::define_template`] or [`Template::define_raw`].
    pub fn with_excluded_import(mut self, path: &str) -> Self {
        self.excluded_imports.insert(fs::normalize(path));
        self
    }

    pub fn with_function(mut self, function: Function) -> Self {
        self.functions.push(function);
        self
    }

    /// Emit `//` comments as HTML comments.
    pub fn with_comments(mut self, comments: bool) -> Self {
        self.comments = comments;
        self
    }

    fn function_table(&self) -> BTreeMap<String, Function> {
        let mut table = runtime::builtins();
        for function in &self.functions {
            if table.contains_key(function.name()) {
                warn!(function = %function.name(), "custom function shadows a builtin");
            }
            table.insert(function.name().to_string(), function.clone());
        }
        table
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let functions: Vec<&str> = self.functions.iter().map(Function::name).collect();
        f.debug_struct("Options")
            .field("pretty_print", &self.pretty_print)
            .field("dir", &self.dir.as_ref().map(|_| ".."))
            .field("excluded_imports", &self.excluded_imports)
            .field("functions", &functions)
            .field("comments", &self.comments)
            .finish()
    }
}

enum Input<'a> {
    File(&'a str),
    Source(&'a str),
}

fn build(input: Input<'_>, options: &Options) -> Result<Program> {
    let default_dir = FsDir::default();
    let dir: &dyn FileSystem = match &options.dir {
        Some(dir) => dir.as_ref(),
        None => &default_dir,
    };
    let resolver =
        Resolver::new(dir, &options.excluded_imports).with_comments(options.comments);
    let (name, resolved) = match input {
        Input::File(path) => {
            let name = fs::normalize(path);
            debug!(path = %name, "compiling template file");
            let resolved = resolver.resolve_file(&name)?;
            (name, resolved)
        }
        Input::Source(source) => {
            debug!(bytes = source.len(), "compiling template string");
            let resolved = resolver.resolve_source(STRING_TEMPLATE, source)?;
            (STRING_TEMPLATE.to_string(), resolved)
        }
    };
    let program = generate(&name, resolved, options.pretty_print);
    debug!(
        path = %name,
        ops = program.ops.len(),
        sub_templates = program.sub_templates.len(),
        "compiled template"
    );
    Ok(program)
}

fn compile(input: Input<'_>, options: Options) -> Result<Template> {
    let program = build(input, &options)?;
    Ok(Template::new(
        program,
        options.function_table(),
        options.pretty_print,
    ))
}

/// Compiles the template at `path`, relative to the current directory.
pub fn compile_file(path: &str) -> Result<Template> {
    compile_file_with_options(path, Options::default())
}

/// Compiles the template at `path`, relative to `options`' directory.
pub fn compile_file_with_options(path: &str, options: Options) -> Result<Template> {
    compile(Input::File(path), options)
}

/// Compiles template source. Relative `include`/`extends` paths resolve
/// against the root of the configured directory.
pub fn compile_string(source: &str) -> Result<Template> {
    compile_string_with_options(source, Options::default())
}

pub fn compile_string_with_options(source: &str, options: Options) -> Result<Template> {
    compile(Input::Source(source), options)
}

/// Compiles the file at `path` and returns the program's source form, for
/// inspecting what a template turns into.
pub fn parse_file(path: &str, options: Options) -> Result<String> {
    Ok(build(Input::File(path), &options)?.to_string())
}

/// Like [`parse_file`] for template source.
pub fn parse_string(source: &str, options: Options) -> Result<String> {
    Ok(build(Input::Source(source), &options)?.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(source: &str) -> String {
        compile_string(source).unwrap().render(&Value::Null).unwrap()
    }

    #[test]
    fn empty_template_renders_nothing() {
        assert_eq!(render(""), "");
    }

    #[test]
    fn string_templates_are_labelled() {
        let err = compile_string("p #{").unwrap_err();
        assert!(err.to_string().starts_with("<string>:1:"), "{err}");
    }

    #[test]
    fn custom_functions_are_callable() {
        let shout = Function::new("shout", |args| {
            Ok(Value::String(
                args.first().map(|v| v.to_string().to_uppercase()).unwrap_or_default(),
            ))
        });
        let tpl = compile_string_with_options("p= shout(\"hey\")", Options::new().with_function(shout))
            .unwrap();
        assert_eq!(tpl.render(&Value::Null).unwrap(), "<p>HEY</p>");
    }

    #[test]
    fn custom_function_wins_over_builtin() {
        let len = Function::new("len", |_| Ok(Value::Int(42)));
        let tpl = compile_string_with_options("| #{len(\"a\")}", Options::new().with_function(len))
            .unwrap();
        assert_eq!(tpl.render(&Value::Null).unwrap(), "42");
    }

    #[test]
    fn function_errors_carry_the_name() {
        let tpl = compile_string("p= len(1, 2)").unwrap();
        let err = tpl.render(&Value::Null).unwrap_err();
        assert!(matches!(
            err.as_render(),
            Some(RenderError::Function { name, .. }) if name == "len"
        ));
    }

    #[test]
    fn comments_are_opt_in() {
        assert_eq!(render("// hidden\np"), "<p></p>");
        let tpl = compile_string_with_options("// shown\np", Options::new().with_comments(true))
            .unwrap();
        assert_eq!(tpl.render(&Value::Null).unwrap(), "<!-- shown--><p></p>");
    }

    #[test]
    fn parse_string_returns_source_form() {
        let dump = parse_string("p= a", Options::default()).unwrap();
        assert!(dump.contains("open p"));
        assert!(dump.contains("emit escaped a"));
    }

    #[test]
    fn options_debug_lists_function_names() {
        let options = Options::new().with_function(Function::new("f", |_| Ok(Value::Null)));
        assert!(format!("{options:?}").contains("\"f\""));
    }
}
