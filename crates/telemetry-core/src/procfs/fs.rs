//! Filesystem abstraction so `/proc` readers can be exercised against
//! literal fixture strings instead of a real Linux `/proc`.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

/// Minimal slice of `std::fs` that the procfs readers need.
pub trait FileSystem {
    fn read_to_string(&self, path: &Path) -> io::Result<String>;
    fn read_dir_names(&self, path: &Path) -> io::Result<Vec<String>>;
}

/// Reads the real filesystem. Used in production.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealFs;

impl FileSystem for RealFs {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }

    fn read_dir_names(&self, path: &Path) -> io::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(path)? {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        Ok(names)
    }
}

/// In-memory fixture filesystem for tests: a flat map of path to content,
/// plus a set of "directories" each holding a list of child names.
#[derive(Debug, Clone, Default)]
pub struct MockFs {
    files: HashMap<PathBuf, String>,
    dirs: HashMap<PathBuf, Vec<String>>,
}

impl MockFs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_file(&mut self, path: impl Into<PathBuf>, content: impl Into<String>) -> &mut Self {
        let path = path.into();
        self.register_ancestors(&path);
        self.files.insert(path, content.into());
        self
    }

    pub fn add_dir(&mut self, path: impl Into<PathBuf>) -> &mut Self {
        let path = path.into();
        self.register_ancestors(&path);
        self.dirs.entry(path).or_default();
        self
    }

    /// Walks every ancestor of `path`, registering each component as a
    /// child entry of its parent directory's listing.
    fn register_ancestors(&mut self, path: &Path) {
        let mut current = path.to_path_buf();
        while let Some(parent) = current.parent().map(Path::to_path_buf) {
            let name = current.file_name().and_then(|n| n.to_str()).unwrap_or("");
            let children = self.dirs.entry(parent.clone()).or_default();
            if !children.iter().any(|c| c == name) {
                children.push(name.to_string());
            }
            current = parent;
        }
    }
}

impl FileSystem for MockFs {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, path.display().to_string()))
    }

    fn read_dir_names(&self, path: &Path) -> io::Result<Vec<String>> {
        self.dirs
            .get(path)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, path.display().to_string()))
    }
}
