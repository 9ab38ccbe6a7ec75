//! Test utilities for building and mutating throwaway project trees.
//!
//! Mirrors the teacher crate's `project_util` module: a small builder over
//! a real temporary directory, so tests exercise the same `Filesystem`
//! trait and manifest parser a real build would, instead of mocking them
//! away.

use crate::error::{Error, Result};
use crate::project::Project;
use crate::services::LocalFilesystem;
use rand::Rng;
use std::path::{Path, PathBuf};

/// A project tree rooted in a real temporary directory, cleaned up on drop.
pub struct TempProject {
    root: tempfile::TempDir,
}

impl TempProject {
    /// Creates an empty temporary directory; callers populate it with
    /// `write_manifest`/`write_source` before parsing.
    pub fn new() -> Result<Self> {
        let root = tempdir("bake-core-test")?;
        Ok(Self { root })
    }

    /// Creates a temporary directory pre-populated with a minimal
    /// `project.json` declaring `id` (and, if given, additional top-level
    /// members merged into the manifest).
    pub fn with_manifest(id: &str, extra: serde_json::Value) -> Result<Self> {
        let project = Self::new()?;
        let mut manifest = serde_json::json!({ "id": id });
        merge_into(&mut manifest, extra);
        project.write_manifest(&manifest)?;
        Ok(project)
    }

    pub fn root(&self) -> &Path {
        self.root.path()
    }

    pub fn write_manifest(&self, manifest: &serde_json::Value) -> Result<()> {
        let path = self.root().join("project.json");
        let contents = serde_json::to_string_pretty(manifest).expect("manifest is always serializable");
        std::fs::write(&path, contents).map_err(|e| Error::io(&path, e))
    }

    /// Writes `contents` to `relative`, creating parent directories. Useful
    /// for populating `src/`/`include/` trees ahead of a pattern expansion.
    pub fn write_file(&self, relative: impl AsRef<Path>, contents: &str) -> Result<PathBuf> {
        let path = self.root().join(relative.as_ref());
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
        std::fs::write(&path, contents).map_err(|e| Error::io(&path, e))?;
        Ok(path)
    }

    /// Creates an empty file if it does not exist, then sets its mtime to
    /// now — the staleness-triggering operation most build tests need.
    pub fn touch(&self, relative: impl AsRef<Path>) -> Result<PathBuf> {
        let path = self.root().join(relative.as_ref());
        if !path.exists() {
            self.write_file(relative, "")?;
        }
        let now = filetime::FileTime::now();
        filetime::set_file_mtime(&path, now).map_err(|e| Error::io(&path, e))?;
        Ok(path)
    }

    pub fn load_project(&self) -> Result<Project> {
        Project::load(&LocalFilesystem, self.root())
    }

    /// Copies a fixture directory's contents into the project root, for
    /// tests that exercise a prebuilt source tree rather than writing
    /// files one at a time.
    pub fn copy_fixture(&self, fixture_dir: &Path) -> Result<()> {
        let mut options = fs_extra::dir::CopyOptions::new();
        options.content_only = true;
        options.overwrite = true;
        fs_extra::dir::copy(fixture_dir, self.root(), &options)
            .map(|_| ())
            .map_err(|e| Error::io(fixture_dir, std::io::Error::new(std::io::ErrorKind::Other, e)))
    }
}

/// Creates a uniquely-named temporary directory under the OS temp root.
pub fn tempdir(prefix: &str) -> Result<tempfile::TempDir> {
    tempfile::Builder::new()
        .prefix(prefix)
        .tempdir()
        .map_err(|e| Error::io(std::env::temp_dir(), e))
}

/// A short random identifier suffix, useful for generating distinct
/// package ids across test cases that share one temp root.
pub fn random_suffix() -> String {
    let mut rng = rand::thread_rng();
    (0..8).map(|_| rng.sample(rand::distributions::Alphanumeric) as char).collect()
}

fn merge_into(dst: &mut serde_json::Value, src: serde_json::Value) {
    match (dst, src) {
        (serde_json::Value::Object(dst_map), serde_json::Value::Object(src_map)) => {
            for (k, v) in src_map {
                dst_map.insert(k, v);
            }
        }
        (dst, src) => *dst = src,
    }
}
