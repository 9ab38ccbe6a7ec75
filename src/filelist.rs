//! The filelist abstraction that backs inputs and outputs of rules.
//!
//! A [`Filelist`] is an ordered, deduplicated sequence of [`FileDescriptor`]s.
//! Each node evaluation frame exclusively owns the filelist it produces —
//! there is no shared ownership or back-references, matching Rust's move
//! semantics directly (see Design Notes, `SPEC_FULL.md` §9).

use crate::services::Filesystem;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// A single file known to a [`Filelist`].
///
/// `timestamp == 0` means the file does not exist on disk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileDescriptor {
    /// Path relative to the owning filelist's `base_path`, or the source
    /// root a file was resolved under (for `SOURCES` pattern nodes).
    pub path: PathBuf,
    /// File name, e.g. `main.c`.
    pub name: String,
    /// Absolute (or pipeline-root-relative) path used for filesystem ops.
    pub full_path: PathBuf,
    pub timestamp: u64,
}

impl FileDescriptor {
    pub fn exists(&self) -> bool {
        self.timestamp != 0
    }
}

/// An ordered set of file descriptors flowing between rule-graph nodes.
#[derive(Debug, Default)]
pub struct Filelist {
    base_path: Option<PathBuf>,
    pattern: Option<String>,
    files: Vec<FileDescriptor>,
    seen: HashSet<PathBuf>,
}

impl Filelist {
    /// Creates a filelist, optionally expanding `pattern` against `base`.
    pub fn new(
        fs: &dyn Filesystem,
        base: Option<PathBuf>,
        pattern: Option<&str>,
    ) -> crate::error::Result<Self> {
        let mut list = Self { base_path: base, pattern: pattern.map(str::to_string), ..Default::default() };
        if let Some(pattern) = pattern {
            if let Some(base) = list.base_path.clone() {
                list.expand(fs, &base, pattern)?;
            }
        }
        Ok(list)
    }

    /// Changes the pattern this filelist was built from. Does not re-expand
    /// existing entries; callers that need a fresh expansion should create
    /// a new `Filelist`.
    pub fn set_pattern(&mut self, pattern: impl Into<String>) {
        self.pattern = Some(pattern.into());
    }

    pub fn pattern(&self) -> Option<&str> {
        self.pattern.as_deref()
    }

    pub fn base_path(&self) -> Option<&Path> {
        self.base_path.as_deref()
    }

    /// Expands `pattern` rooted at `path` and merges the matches in,
    /// recording each match's `path` field as `path` (the source-root
    /// offset used by the `SOURCES` pattern node).
    pub fn add_pattern(
        &mut self,
        fs: &dyn Filesystem,
        path: &Path,
        pattern: &str,
    ) -> crate::error::Result<()> {
        self.expand(fs, path, pattern)
    }

    fn expand(&mut self, fs: &dyn Filesystem, base: &Path, pattern: &str) -> crate::error::Result<()> {
        let full_pattern = base.join(pattern);
        let pattern_str = full_pattern.to_string_lossy().into_owned();
        let mut matches: Vec<PathBuf> = glob::glob(&pattern_str)
            .map_err(|source| crate::error::Error::InvalidPattern { pattern: pattern_str.clone(), source })?
            .filter_map(|p| p.ok())
            .collect();
        // `glob` already yields lexicographic order per directory, but sort
        // defensively so expansion is deterministic regardless of the
        // underlying filesystem's readdir order.
        matches.sort();

        for full_path in matches {
            let name = full_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let rel = full_path.strip_prefix(base).unwrap_or(&full_path).to_path_buf();
            let timestamp = fs.lastmodified(&full_path);
            self.push_unique(FileDescriptor { path: rel, name, full_path, timestamp });
        }
        Ok(())
    }

    fn push_unique(&mut self, file: FileDescriptor) -> &FileDescriptor {
        if let Some(idx) = self.files.iter().position(|f| f.full_path == file.full_path) {
            return &self.files[idx];
        }
        self.seen.insert(file.full_path.clone());
        self.files.push(file);
        self.files.last().unwrap()
    }

    /// Adds a single file by name (joined to `base_path` if set), returning
    /// the existing entry if one with the same `full_path` is already
    /// present.
    pub fn add_file(&mut self, fs: &dyn Filesystem, name: impl AsRef<Path>) -> &FileDescriptor {
        let name = name.as_ref();
        let full_path = match &self.base_path {
            Some(base) => base.join(name),
            None => name.to_path_buf(),
        };
        let file_name = name.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        let timestamp = fs.lastmodified(&full_path);
        self.push_unique(FileDescriptor {
            path: name.to_path_buf(),
            name: file_name,
            full_path,
            timestamp,
        })
    }

    /// Merges `src`'s files into `self`, deduplicating by `full_path`.
    pub fn merge(&mut self, src: &Filelist) {
        for file in &src.files {
            if !self.seen.contains(&file.full_path) {
                self.seen.insert(file.full_path.clone());
                self.files.push(file.clone());
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &FileDescriptor> {
        self.files.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut FileDescriptor> {
        self.files.iter_mut()
    }

    /// Updates the timestamp of the entry with the given `full_path`, if
    /// present. Used after a rule action regenerates a target so later
    /// staleness checks in the same evaluation see the fresh mtime.
    pub fn update_timestamp(&mut self, full_path: &Path, timestamp: u64) {
        if let Some(file) = self.files.iter_mut().find(|f| f.full_path == full_path) {
            file.timestamp = timestamp;
        }
    }

    pub fn count(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&FileDescriptor> {
        self.files.get(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::LocalFilesystem;
    use std::fs;

    fn write(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, b"x").unwrap();
        path
    }

    #[test]
    fn expand_matches_glob_against_base_in_sorted_order() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "b.c");
        write(dir.path(), "a.c");
        write(dir.path(), "sub/c.c");

        let list = Filelist::new(&LocalFilesystem, Some(dir.path().to_path_buf()), Some("**/*.c")).unwrap();
        let names: Vec<_> = list.iter().map(|f| f.name.clone()).collect();
        assert_eq!(names, vec!["a.c", "b.c", "c.c"]);
        assert_eq!(list.count(), 3);
    }

    #[test]
    fn add_file_returns_existing_entry_for_same_full_path() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.c");
        let mut list = Filelist::new(&LocalFilesystem, Some(dir.path().to_path_buf()), None).unwrap();

        let first = list.add_file(&LocalFilesystem, "a.c").clone();
        let second = list.add_file(&LocalFilesystem, "a.c").clone();
        assert_eq!(first.full_path, second.full_path);
        assert_eq!(list.count(), 1);
    }

    #[test]
    fn merge_deduplicates_by_full_path() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.c");
        let mut a = Filelist::new(&LocalFilesystem, Some(dir.path().to_path_buf()), None).unwrap();
        a.add_file(&LocalFilesystem, "a.c");

        let mut b = Filelist::new(&LocalFilesystem, Some(dir.path().to_path_buf()), None).unwrap();
        b.add_file(&LocalFilesystem, "a.c");
        b.add_file(&LocalFilesystem, "a.c");

        a.merge(&b);
        assert_eq!(a.count(), 1);
    }

    #[test]
    fn missing_file_has_zero_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let mut list = Filelist::new(&LocalFilesystem, Some(dir.path().to_path_buf()), None).unwrap();
        let file = list.add_file(&LocalFilesystem, "missing.c");
        assert!(!file.exists());
        assert_eq!(file.timestamp, 0);
    }
}
