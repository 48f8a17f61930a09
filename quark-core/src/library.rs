use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use crate::error::CoreError;

/// Extension of Quark source files.
pub const SOURCE_EXTENSION: &str = "qrk";

/// The library bundled next to this crate.
pub fn default_library_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../stdlib")
}

/// Library modules found under a root directory, keyed by file stem.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LibraryIndex {
    root: PathBuf,
    modules: BTreeMap<String, PathBuf>,
}

impl LibraryIndex {
    /// Walks `root` recursively. When two files share a stem, the first in
    /// file-name order wins.
    pub fn scan(root: impl AsRef<Path>) -> Result<Self, CoreError> {
        let root = root.as_ref();
        if !root.is_dir() {
            return Err(CoreError::MissingLibrary(root.to_path_buf()));
        }
        let mut modules = BTreeMap::new();
        for entry in WalkDir::new(root)
            .sort_by_file_name()
            .into_iter()
            .filter_map(Result::ok)
        {
            let path = entry.path();
            if !path.is_file() || path.extension().is_none_or(|ext| ext != SOURCE_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                modules
                    .entry(stem.to_string())
                    .or_insert_with(|| path.to_path_buf());
            }
        }
        debug!(root = %root.display(), modules = modules.len(), "indexed library");
        Ok(LibraryIndex {
            root: root.to_path_buf(),
            modules,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn find(&self, name: &str) -> Option<&Path> {
        self.modules.get(name).map(PathBuf::as_path)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.modules.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn indexes_the_bundled_library() {
        let index = LibraryIndex::scan(default_library_root()).expect("library should load");
        assert!(index.find("math").is_some());
        assert!(index.find("text").is_some());
        assert!(index.find("missing").is_none());
    }

    #[test]
    fn nested_files_are_keyed_by_stem() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(dir.path().join("data")).expect("mkdir");
        fs::write(dir.path().join("data/frames.qrk"), "module frames:\n    x = 1\n")
            .expect("write");
        fs::write(dir.path().join("notes.txt"), "not a module").expect("write");

        let index = LibraryIndex::scan(dir.path()).expect("scan");
        assert_eq!(index.len(), 1);
        assert_eq!(index.names().collect::<Vec<_>>(), vec!["frames"]);
        assert!(
            index
                .find("frames")
                .is_some_and(|p| p.ends_with("data/frames.qrk"))
        );
    }

    #[test]
    fn missing_root_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("nope");
        let err = LibraryIndex::scan(&missing).expect_err("missing root");
        assert!(matches!(err, CoreError::MissingLibrary(path) if path == missing));
    }
}
