use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::debug;

use crate::codegen::{generate, Program, SubTemplate};
use crate::error::Result;
use crate::eval::Evaluator;
use crate::fs::{normalize, MemoryDir};
use crate::resolver::Resolver;
use crate::value::{Function, Value};

/// A compiled template, ready to render any number of times.
#[derive(Debug, Clone)]
pub struct Template {
    program: Program,
    functions: BTreeMap<String, Function>,
    overrides: BTreeMap<String, SubTemplate>,
    pretty: bool,
}

impl Template {
    pub(crate) fn new(program: Program, functions: BTreeMap<String, Function>, pretty: bool) -> Self {
        Self {
            program,
            functions,
            overrides: BTreeMap::new(),
            pretty,
        }
    }

    pub fn name(&self) -> &str {
        &self.program.name
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    /// Renders against `data`. Top-level names resolve to fields of a map.
    pub fn render(&self, data: &Value) -> Result<String> {
        Evaluator::new(&self.program, &self.overrides, &self.functions, data).render()
    }

    /// Renders against any serializable data. Data serde_json cannot
    /// represent is reported as [`Error::Data`](crate::Error::Data).
    pub fn render_serialize<T: Serialize + ?Sized>(&self, data: &T) -> Result<String> {
        self.render(&Value::from_serialize(data)?)
    }

    /// Supplies template source for `path`, typically an excluded import.
    /// It shadows any sub-template compiled under the same path.
    pub fn define_template(&mut self, path: &str, source: &str) -> Result<()> {
        let path = normalize(path);
        let empty = MemoryDir::new();
        let excluded = BTreeSet::new();
        let resolved = Resolver::new(&empty, &excluded).resolve_source(&path, source)?;
        let program = generate(&path, resolved, self.pretty);
        for (name, mixin) in program.mixins {
            self.program.mixins.entry(name).or_insert(mixin);
        }
        for (sub, compiled) in program.sub_templates {
            self.overrides.entry(sub).or_insert(compiled);
        }
        debug!(path = %path, "defined sub-template");
        self.overrides
            .insert(path, SubTemplate::Compiled(program.ops));
        Ok(())
    }

    /// Supplies verbatim text for `path`.
    pub fn define_raw(&mut self, path: &str, text: impl Into<String>) {
        let path = normalize(path);
        debug!(path = %path, "defined raw sub-template");
        self.overrides.insert(path, SubTemplate::Raw(text.into()));
    }

    /// Human-readable dump of the render program.
    pub fn source_form(&self) -> String {
        self.program.to_string()
    }
}
