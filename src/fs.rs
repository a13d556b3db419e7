//! Where template sources come from.
//!
//! Paths handed to a [`FileSystem`] are logical: `/`-separated, relative to
//! the filesystem root and already normalized by [`join_logical`].

use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;

use crate::error::ResolutionError;

pub trait FileSystem: Send + Sync {
    fn read_to_string(&self, path: &str) -> Result<String, ResolutionError>;
}

/// Templates on disk below `root`.
#[derive(Debug, Clone)]
pub struct FsDir {
    root: PathBuf,
}

impl FsDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Default for FsDir {
    fn default() -> Self {
        Self::new(".")
    }
}

impl FileSystem for FsDir {
    fn read_to_string(&self, path: &str) -> Result<String, ResolutionError> {
        std::fs::read_to_string(self.root.join(path)).map_err(|source| match source.kind() {
            io::ErrorKind::NotFound => ResolutionError::NotFound {
                path: path.to_string(),
            },
            _ => ResolutionError::Io {
                path: path.to_string(),
                source,
            },
        })
    }
}

/// Templates held in memory, keyed by logical path.
#[derive(Debug, Clone, Default)]
pub struct MemoryDir {
    files: BTreeMap<String, String>,
}

impl MemoryDir {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: &str, contents: impl Into<String>) {
        self.files.insert(normalize(path), contents.into());
    }

    pub fn with_file(mut self, path: &str, contents: impl Into<String>) -> Self {
        self.insert(path, contents);
        self
    }
}

impl FileSystem for MemoryDir {
    fn read_to_string(&self, path: &str) -> Result<String, ResolutionError> {
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| ResolutionError::NotFound {
                path: path.to_string(),
            })
    }
}

/// Collapses `.`, `..` and empty segments. `..` never climbs above the root.
pub fn normalize(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split(['/', '\\']) {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    parts.join("/")
}

/// Resolves `target` as referenced from the file at `base`. A leading `/`
/// makes it root-relative. `.pug` is appended when there is no extension.
pub fn join_logical(base: &str, target: &str) -> String {
    let joined = match (target.strip_prefix('/'), base.rfind('/')) {
        (Some(absolute), _) => absolute.to_string(),
        (None, Some(slash)) => format!("{}/{}", &base[..slash], target),
        (None, None) => target.to_string(),
    };
    let mut path = normalize(&joined);
    if !has_extension(&path) {
        path.push_str(".pug");
    }
    path
}

pub fn has_extension(path: &str) -> bool {
    let file = path.rsplit('/').next().unwrap_or(path);
    matches!(file.rfind('.'), Some(dot) if dot > 0)
}

/// Whether the file at `path` is template source rather than raw text.
pub fn is_template(path: &str) -> bool {
    path.ends_with(".pug") || path.ends_with(".jade")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_relative_to_the_including_file() {
        assert_eq!(join_logical("views/index.pug", "sub/import1"), "views/sub/import1.pug");
        assert_eq!(join_logical("views/sub/a.pug", "../b"), "views/b.pug");
        assert_eq!(join_logical("views/sub/a.pug", "/root"), "root.pug");
        assert_eq!(join_logical("", "style.css"), "style.css");
        assert_eq!(join_logical("a.pug", "./x/../y"), "y.pug");
    }

    #[test]
    fn extension_detection() {
        assert!(has_extension("a/b.css"));
        assert!(!has_extension("a.d/b"));
        assert!(!has_extension(".hidden"));
        assert!(is_template("a.pug"));
        assert!(!is_template("a.css"));
    }

    #[test]
    fn memory_dir_normalizes_keys() {
        let dir = MemoryDir::new().with_file("./a//b.pug", "p");
        assert_eq!(dir.read_to_string("a/b.pug").unwrap(), "p");
        assert!(matches!(
            dir.read_to_string("missing.pug"),
            Err(ResolutionError::NotFound { path }) if path == "missing.pug"
        ));
    }

    #[test]
    fn fs_dir_reads_below_root() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir(tmp.path().join("sub")).unwrap();
        std::fs::write(tmp.path().join("sub/a.pug"), "p a").unwrap();
        let dir = FsDir::new(tmp.path());
        assert_eq!(dir.read_to_string("sub/a.pug").unwrap(), "p a");
        assert!(matches!(
            dir.read_to_string("sub/b.pug"),
            Err(ResolutionError::NotFound { .. })
        ));
    }
}
