//! Cross-file composition: `extends`/`block` chains and `include`d sub-units.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::rc::Rc;

use tracing::{debug, trace, warn};

use crate::ast::{walk_mut, Block, BlockMode, Node};
use crate::error::{Error, ParseError, ResolutionError, Result};
use crate::fs::{is_template, join_logical, normalize, FileSystem};
use crate::lexer::Lexer;
use crate::parser::Parser;

/// One parsed source file.
#[derive(Debug)]
pub struct Unit {
    pub path: String,
    pub nodes: Vec<Node>,
    /// Logical path of the parent template.
    pub extends: Option<String>,
    /// Top-level blocks, in source order.
    pub blocks: Vec<Block>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubUnit {
    Template(Vec<Node>),
    Raw(String),
}

/// A merged main tree plus every included unit it references.
#[derive(Debug)]
pub struct Resolved {
    pub nodes: Vec<Node>,
    pub subs: BTreeMap<String, SubUnit>,
}

pub struct Resolver<'a> {
    fs: &'a dyn FileSystem,
    excluded: &'a BTreeSet<String>,
    keep_comments: bool,
    units: HashMap<String, Rc<Unit>>,
    subs: BTreeMap<String, SubUnit>,
    pending: HashSet<String>,
}

impl<'a> Resolver<'a> {
    pub fn new(fs: &'a dyn FileSystem, excluded: &'a BTreeSet<String>) -> Self {
        Self {
            fs,
            excluded,
            keep_comments: false,
            units: HashMap::new(),
            subs: BTreeMap::new(),
            pending: HashSet::new(),
        }
    }

    pub fn with_comments(mut self, keep: bool) -> Self {
        self.keep_comments = keep;
        self
    }

    pub fn resolve_file(mut self, path: &str) -> Result<Resolved> {
        let path = normalize(path);
        let nodes = self.resolve_path(&path, &mut Vec::new())?;
        Ok(self.finish(nodes))
    }

    /// Resolves a root unit whose source is already in hand. `label` names
    /// it in errors and anchors its relative references.
    pub fn resolve_source(mut self, label: &str, source: &str) -> Result<Resolved> {
        self.insert_unit(label, source)?;
        let nodes = self.resolve_path(label, &mut Vec::new())?;
        Ok(self.finish(nodes))
    }

    fn finish(self, nodes: Vec<Node>) -> Resolved {
        debug!(
            units = self.units.len(),
            subs = self.subs.len(),
            "resolved template graph"
        );
        Resolved {
            nodes,
            subs: self.subs,
        }
    }

    fn load(&mut self, path: &str) -> Result<Rc<Unit>> {
        if let Some(unit) = self.units.get(path) {
            return Ok(Rc::clone(unit));
        }
        let source = self.fs.read_to_string(path)?;
        debug!(path = %path, bytes = source.len(), "loaded template unit");
        self.insert_unit(path, &source)
    }

    fn insert_unit(&mut self, path: &str, source: &str) -> Result<Rc<Unit>> {
        let (unit, includes) = self.parse_unit(path, source)?;
        let unit = Rc::new(unit);
        self.units.insert(path.to_string(), Rc::clone(&unit));
        for key in includes {
            self.register(&key)?;
        }
        Ok(unit)
    }

    /// Parses one unit, rewriting include sites to their sub-unit keys.
    /// Returns the keys that still need loading.
    fn parse_unit(&self, path: &str, source: &str) -> Result<(Unit, Vec<String>)> {
        let tokens = Lexer::new(source)
            .with_comments(self.keep_comments)
            .tokenize()
            .map_err(|source| Error::Lex {
                path: path.to_string(),
                source,
            })?;
        let parse_error = |source| Error::Parse {
            path: path.to_string(),
            source,
        };
        let mut nodes = Parser::new(tokens).parse().map_err(parse_error)?;

        let mut extends = None;
        nodes.retain(|node| match node {
            Node::Extends { path: target, .. } => {
                extends.get_or_insert_with(|| join_logical(path, target));
                false
            }
            _ => true,
        });

        let mut includes = Vec::new();
        let mut misplaced = None;
        walk_mut(&mut nodes, &mut |node| match node {
            Node::Include { path: target, .. } => {
                let key = join_logical(path, target);
                match self.excluded_entry(&key, target) {
                    Some(entry) => {
                        debug!(path = %entry, "skipping excluded import");
                        *target = entry;
                    }
                    None => {
                        includes.push(key.clone());
                        *target = key;
                    }
                }
            }
            Node::Extends { pos, .. } => {
                misplaced.get_or_insert(*pos);
            }
            _ => {}
        });
        if let Some(pos) = misplaced {
            return Err(parse_error(ParseError::InvalidConstruct {
                pos,
                construct: "extends",
                message: "must appear at the top level".to_string(),
            }));
        }

        let blocks = nodes
            .iter()
            .filter_map(|node| match node {
                Node::Block(block) => Some(block.clone()),
                _ => None,
            })
            .collect();
        let unit = Unit {
            path: path.to_string(),
            nodes,
            extends,
            blocks,
        };
        Ok((unit, includes))
    }

    /// The exclusion entry matching an include, by logical key or as written.
    fn excluded_entry(&self, key: &str, written: &str) -> Option<String> {
        [key.to_string(), normalize(written)]
            .into_iter()
            .find(|candidate| self.excluded.contains(candidate))
    }

    fn register(&mut self, key: &str) -> Result<()> {
        if self.subs.contains_key(key) || self.pending.contains(key) {
            return Ok(());
        }
        if !is_template(key) {
            let text = self.fs.read_to_string(key)?;
            trace!(path = %key, "registered raw include");
            self.subs.insert(key.to_string(), SubUnit::Raw(text));
            return Ok(());
        }
        self.pending.insert(key.to_string());
        let nodes = self.resolve_path(key, &mut Vec::new())?;
        self.pending.remove(key);
        trace!(path = %key, "registered template include");
        self.subs.insert(key.to_string(), SubUnit::Template(nodes));
        Ok(())
    }

    /// The fully merged tree of the unit at `path`.
    fn resolve_path(&mut self, path: &str, chain: &mut Vec<String>) -> Result<Vec<Node>> {
        let unit = self.load(path)?;
        let Some(parent) = unit.extends.as_deref() else {
            return Ok(unit.nodes.clone());
        };
        chain.push(path.to_string());
        if chain.iter().any(|p| p == parent) {
            let mut cycle = chain.clone();
            cycle.push(parent.to_string());
            return Err(ResolutionError::CyclicExtends {
                path: path.to_string(),
                chain: cycle,
            }
            .into());
        }
        let mut merged = self.resolve_path(parent, chain)?;
        chain.pop();
        overlay(&unit, &mut merged);
        Ok(merged)
    }
}

/// Applies the blocks of a derived unit to its parent's merged tree and
/// hoists the unit's mixin definitions.
fn overlay(unit: &Unit, merged: &mut Vec<Node>) {
    for block in &unit.blocks {
        let mut found = false;
        walk_mut(merged, &mut |node| {
            if let Node::Block(target) = node {
                if !found && target.name == block.name {
                    splice(target, block);
                    found = true;
                }
            }
        });
        if !found {
            warn!(
                path = %unit.path,
                block = %block.name,
                "block has no counterpart in the parent template, ignoring"
            );
        }
    }

    let mixins: Vec<Node> = unit
        .nodes
        .iter()
        .filter(|node| matches!(node, Node::MixinDef { .. }))
        .cloned()
        .collect();
    for node in &unit.nodes {
        if !matches!(node, Node::Block(_) | Node::MixinDef { .. } | Node::Comment(_)) {
            trace!(path = %unit.path, "ignoring content outside blocks in derived template");
        }
    }
    merged.splice(0..0, mixins);
}

fn splice(target: &mut Block, derived: &Block) {
    let children = derived.children.iter().cloned();
    match derived.mode {
        BlockMode::Replace => target.children = children.collect(),
        BlockMode::Append => target.children.extend(children),
        BlockMode::Prepend => {
            target.children.splice(0..0, children);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Segment, Tag};
    use crate::fs::MemoryDir;

    fn texts(nodes: &[Node]) -> Vec<String> {
        let mut out = Vec::new();
        for node in nodes {
            match node {
                Node::Tag(Tag { children, .. }) => out.extend(texts(children)),
                Node::Block(block) => out.extend(texts(&block.children)),
                Node::Text(segments) => {
                    for segment in segments {
                        if let Segment::Literal(s) = segment {
                            out.push(s.clone());
                        }
                    }
                }
                _ => {}
            }
        }
        out
    }

    fn layouts() -> MemoryDir {
        MemoryDir::new()
            .with_file(
                "base.pug",
                "body\n  block a\n    p base-a\n  block b\n    p base-b\n  block c\n    p base-c",
            )
            .with_file("mid.pug", "extends base\nblock b\n  p mid-b")
            .with_file(
                "page.pug",
                "extends mid\nblock a\n  p page-a\nappend c\n  p page-c\nprepend b\n  p pre-b",
            )
    }

    #[test]
    fn three_level_chain() {
        let fs = layouts();
        let excluded = BTreeSet::new();
        let resolved = Resolver::new(&fs, &excluded).resolve_file("page.pug").unwrap();
        assert_eq!(
            texts(&resolved.nodes),
            vec!["page-a", "pre-b", "mid-b", "base-c", "page-c"]
        );
    }

    #[test]
    fn cyclic_extends_is_reported() {
        let fs = MemoryDir::new()
            .with_file("a.pug", "extends b\nblock x")
            .with_file("b.pug", "extends a\nblock x");
        let excluded = BTreeSet::new();
        let err = Resolver::new(&fs, &excluded).resolve_file("a.pug").unwrap_err();
        let Error::Resolution(ResolutionError::CyclicExtends { chain, .. }) = err else {
            panic!("expected a cycle, got {err:?}");
        };
        assert_eq!(chain, vec!["a.pug", "b.pug", "a.pug"]);
    }

    #[test]
    fn self_extension_is_a_cycle() {
        let fs = MemoryDir::new().with_file("a.pug", "extends a");
        let excluded = BTreeSet::new();
        assert!(matches!(
            Resolver::new(&fs, &excluded).resolve_file("a.pug"),
            Err(Error::Resolution(ResolutionError::CyclicExtends { .. }))
        ));
    }

    #[test]
    fn includes_become_sub_units() {
        let fs = MemoryDir::new()
            .with_file("sub/one.pug", "p one\ninclude two")
            .with_file("sub/two.pug", "p two")
            .with_file("sub/style.css", "body {}\n");
        let excluded = BTreeSet::new();
        let resolved = Resolver::new(&fs, &excluded)
            .resolve_source("<string>", "include sub/style.css\ninclude sub/one\ninclude sub/two")
            .unwrap();
        let keys: Vec<_> = resolved.subs.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["sub/one.pug", "sub/style.css", "sub/two.pug"]);
        assert_eq!(resolved.subs["sub/style.css"], SubUnit::Raw("body {}\n".into()));
        assert!(matches!(&resolved.nodes[1], Node::Include { path, .. } if path == "sub/one.pug"));
    }

    #[test]
    fn excluded_imports_are_not_loaded() {
        let fs = MemoryDir::new();
        let excluded: BTreeSet<String> = ["sub/style.css".to_string()].into();
        let resolved = Resolver::new(&fs, &excluded)
            .resolve_source("<string>", "style\n  include sub/style.css")
            .unwrap();
        assert!(resolved.subs.is_empty());
    }

    #[test]
    fn missing_include_names_the_path() {
        let fs = MemoryDir::new();
        let excluded = BTreeSet::new();
        let err = Resolver::new(&fs, &excluded)
            .resolve_source("<string>", "include nope")
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Resolution(ResolutionError::NotFound { ref path }) if path == "nope.pug"
        ));
    }

    #[test]
    fn mutual_includes_terminate() {
        let fs = MemoryDir::new()
            .with_file("a.pug", "p a\ninclude b")
            .with_file("b.pug", "p b\ninclude a");
        let excluded = BTreeSet::new();
        let resolved = Resolver::new(&fs, &excluded).resolve_file("a.pug").unwrap();
        assert_eq!(resolved.subs.len(), 2);
    }

    #[test]
    fn derived_mixins_are_hoisted() {
        let fs = MemoryDir::new()
            .with_file("base.pug", "block content")
            .with_file("page.pug", "extends base\nmixin m()\n  p m\nblock content\n  +m()");
        let excluded = BTreeSet::new();
        let resolved = Resolver::new(&fs, &excluded).resolve_file("page.pug").unwrap();
        assert!(matches!(&resolved.nodes[0], Node::MixinDef { name, .. } if name == "m"));
    }
}
