//! External collaborator interfaces.
//!
//! The core consumes, but does not implement, a command-line front-end, an
//! on-disk configuration loader, git plumbing, a setup/bootstrap installer,
//! or a dynamic-library loader (see §1 of `SPEC_FULL.md`). Those
//! collaborators are modelled here as small traits. Each trait has exactly
//! one concrete, filesystem-backed implementation in this module, used by
//! the crate's own tests and meant as a starting point for a real
//! front-end — the same relationship the teacher crate has with `solc`
//! version managers (trait + one real implementation in `compilers::solc`).

use crate::driver::BakeMain;
use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

/// What kind of location to resolve for a package id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LocateKind {
    /// Environment root the package was installed into.
    Env,
    /// Full path to the package's library artefact.
    Lib,
    /// Full path to the package's application artefact.
    App,
    /// Full path to either library or application artefact.
    Bin,
    /// Full path to the package's `etc` directory.
    Etc,
    /// Full path to the package's `include` directory.
    Include,
    /// Full path to the package's project directory.
    Package,
}

/// Resolves a logical package id to a location on disk.
///
/// The real locator (a package store, a registry, a workspace index) lives
/// outside this crate; callers are expected to memoise results themselves,
/// as the original tool does.
pub trait PackageLocator: Send + Sync {
    fn locate(&self, package_id: &str, kind: LocateKind) -> Result<PathBuf>;
}

/// Filesystem primitives the engine and pipeline need.
///
/// Grouped behind a trait so tests can swap in an in-memory or
/// failure-injecting implementation without touching real disk, the same
/// way the teacher crate keeps compilation behind the `Compiler` trait.
pub trait Filesystem: Send + Sync {
    fn file_test(&self, path: &Path) -> bool;
    fn isdir(&self, path: &Path) -> bool;
    fn mkdir_p(&self, path: &Path) -> Result<()>;
    fn rm(&self, path: &Path) -> Result<()>;
    fn rmtree(&self, path: &Path) -> Result<()>;
    fn cp(&self, src: &Path, dst: &Path) -> Result<()>;
    fn symlink(&self, src: &Path, dst: &Path) -> Result<()>;
    fn rename(&self, src: &Path, dst: &Path) -> Result<()>;
    /// Milliseconds since the Unix epoch, or `0` if the file does not exist.
    fn lastmodified(&self, path: &Path) -> u64;
    fn getperm(&self, path: &Path) -> Result<u32>;
    fn setperm(&self, path: &Path, mode: u32) -> Result<()>;
    /// Lists files under `path` matching `filter`. `filter` supports glob
    /// wildcards; a `//` segment matches any number of directory levels
    /// (the original tool's recursive separator, equivalent to `**`).
    fn dir_iter(&self, path: &Path, filter: &str) -> Result<Vec<PathBuf>>;
    fn touch(&self, path: &Path) -> Result<()>;
    fn cwd(&self) -> Result<PathBuf>;
    fn chdir(&self, path: &Path) -> Result<()>;
}

/// Runs a subprocess and reports how it terminated.
pub trait ProcessRunner: Send + Sync {
    /// Returns `(signal, exit_code)`. `signal` is `Some` if the process was
    /// killed by a signal rather than exiting normally.
    fn run(&self, command: &str) -> Result<(Option<i32>, i32)>;
}

/// Resolves a driver id to its entry point.
///
/// This is the crate's stand-in for the dynamic-library loader: in the
/// original tool, `bake_driver_get` locates the driver package, `dlopen`s
/// it, and resolves `bakemain`. Here, the whole "locate + load + resolve
/// symbol" act is behind one call so the core never touches `dlopen`
/// itself.
pub trait DriverLoader: Send + Sync {
    fn load(&self, driver_id: &str) -> Result<BakeMain>;
}

/// The minimum surface the pipeline needs from the external crawler.
pub trait Crawler: Send + Sync {
    /// Number of projects currently queued for this build invocation.
    fn project_count(&self) -> usize;
    /// Called when a project's pipeline aborts, so the crawler can skip
    /// its dependents.
    fn report_failure(&self, project_id: &str);
}

/// Filesystem-backed [`Filesystem`] implementation.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFilesystem;

impl Filesystem for LocalFilesystem {
    fn file_test(&self, path: &Path) -> bool {
        path.exists()
    }

    fn isdir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn mkdir_p(&self, path: &Path) -> Result<()> {
        // `mkdir` of an already-existing directory is success (§7 recovery policy).
        match std::fs::create_dir_all(path) {
            Ok(()) => Ok(()),
            Err(e) if path.is_dir() => {
                let _ = e;
                Ok(())
            }
            Err(e) => Err(Error::io(path, e)),
        }
    }

    fn rm(&self, path: &Path) -> Result<()> {
        // `rm` of a non-existent file is success (§7 recovery policy).
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::io(path, e)),
        }
    }

    fn rmtree(&self, path: &Path) -> Result<()> {
        match std::fs::remove_dir_all(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::io(path, e)),
        }
    }

    fn cp(&self, src: &Path, dst: &Path) -> Result<()> {
        let copy_one = |src: &Path, dst: &Path| -> std::io::Result<()> {
            if let Some(parent) = dst.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(src, dst)?;
            Ok(())
        };

        if src.is_dir() {
            self.mkdir_p(dst)?;
            for entry in walkdir::WalkDir::new(src).into_iter().filter_map(|e| e.ok()) {
                let rel = entry.path().strip_prefix(src).unwrap_or(entry.path());
                let target = dst.join(rel);
                if entry.file_type().is_dir() {
                    self.mkdir_p(&target)?;
                } else {
                    // cp into a missing destination directory retries once
                    // after creating the directory (§7 recovery policy).
                    if copy_one(entry.path(), &target).is_err() {
                        if let Some(parent) = target.parent() {
                            std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
                        }
                        copy_one(entry.path(), &target).map_err(|e| Error::io(&target, e))?;
                    }
                }
            }
            Ok(())
        } else {
            if copy_one(src, dst).is_err() {
                if let Some(parent) = dst.parent() {
                    std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
                }
                copy_one(src, dst).map_err(|e| Error::io(dst, e))?;
            }
            Ok(())
        }
    }

    fn symlink(&self, src: &Path, dst: &Path) -> Result<()> {
        #[cfg(unix)]
        {
            std::os::unix::fs::symlink(src, dst).map_err(|e| Error::io(dst, e))
        }
        #[cfg(not(unix))]
        {
            std::fs::copy(src, dst).map(|_| ()).map_err(|e| Error::io(dst, e))
        }
    }

    fn rename(&self, src: &Path, dst: &Path) -> Result<()> {
        std::fs::rename(src, dst).map_err(|e| Error::io(dst, e))
    }

    fn lastmodified(&self, path: &Path) -> u64 {
        std::fs::metadata(path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    fn getperm(&self, path: &Path) -> Result<u32> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            Ok(std::fs::metadata(path).map_err(|e| Error::io(path, e))?.permissions().mode())
        }
        #[cfg(not(unix))]
        {
            Ok(0)
        }
    }

    fn setperm(&self, path: &Path, mode: u32) -> Result<()> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
                .map_err(|e| Error::io(path, e))
        }
        #[cfg(not(unix))]
        {
            let _ = mode;
            Ok(())
        }
    }

    fn dir_iter(&self, path: &Path, filter: &str) -> Result<Vec<PathBuf>> {
        // `//` is the recursive separator. The `glob` crate only treats
        // `**` as recursive when it occupies a whole path component (e.g.
        // `a/**/b`), so `//` must become `/**/`, not have `**/` spliced in
        // next to the surrounding literal.
        let translated = filter.replace("//", "/**/");
        let pattern = glob::Pattern::new(&translated)
            .map_err(|source| Error::InvalidPattern { pattern: translated.clone(), source })?;

        let mut out = Vec::new();
        for entry in walkdir::WalkDir::new(path)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if entry.file_type().is_dir() {
                continue;
            }
            let rel = entry.path().strip_prefix(path).unwrap_or(entry.path());
            if pattern.matches_path(rel) {
                out.push(entry.path().to_path_buf());
            }
        }
        out.sort();
        Ok(out)
    }

    fn touch(&self, path: &Path) -> Result<()> {
        if !path.exists() {
            if let Some(parent) = path.parent() {
                self.mkdir_p(parent)?;
            }
            std::fs::write(path, []).map_err(|e| Error::io(path, e))?;
        }
        let now = filetime::FileTime::now();
        filetime::set_file_mtime(path, now).map_err(|e| Error::io(path, e))
    }

    fn cwd(&self) -> Result<PathBuf> {
        std::env::current_dir().map_err(|e| Error::io(".", e))
    }

    fn chdir(&self, path: &Path) -> Result<()> {
        std::env::set_current_dir(path).map_err(|e| Error::io(path, e))
    }
}

/// Runs commands through `sh -c` (Unix) / `cmd /C` (Windows).
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProcessRunner;

impl ProcessRunner for SystemProcessRunner {
    fn run(&self, command: &str) -> Result<(Option<i32>, i32)> {
        let output = if cfg!(windows) {
            std::process::Command::new("cmd").arg("/C").arg(command).output()
        } else {
            std::process::Command::new("sh").arg("-c").arg(command).output()
        }
        .map_err(|e| Error::io(command, e))?;

        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            Ok((output.status.signal(), output.status.code().unwrap_or(-1)))
        }
        #[cfg(not(unix))]
        {
            Ok((None, output.status.code().unwrap_or(-1)))
        }
    }
}

/// Default root for the installed-package environment, mirroring the
/// teacher crate's `dirs::data_dir().join("svm")` fallback for a per-user
/// data directory: `$XDG_DATA_HOME/bake` (or the platform equivalent), or
/// `.bake` under the current directory if no data directory can be
/// resolved.
pub fn default_env_root() -> PathBuf {
    dirs::data_dir().map(|dir| dir.join("bake")).unwrap_or_else(|| PathBuf::from(".bake"))
}

/// Locates packages beneath a single root directory, by convention
/// `<root>/<package-id-with-dots-as-slashes>`.
#[derive(Debug, Clone)]
pub struct PathPackageLocator {
    root: PathBuf,
}

impl PathPackageLocator {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl PackageLocator for PathPackageLocator {
    fn locate(&self, package_id: &str, kind: LocateKind) -> Result<PathBuf> {
        let rel = package_id.replace('.', "/");
        let package_path = self.root.join(&rel);
        if !package_path.exists() {
            return Err(Error::DependencyNotLocatable(package_id.to_string()));
        }
        Ok(match kind {
            LocateKind::Env => self.root.clone(),
            LocateKind::Package => package_path.clone(),
            LocateKind::Etc => package_path.join("etc"),
            LocateKind::Include => package_path.join("include"),
            LocateKind::Lib | LocateKind::App | LocateKind::Bin => package_path,
        })
    }
}

/// Minimal in-process [`Crawler`] that just tracks a fixed project count.
///
/// Useful for tests that build a single project or a short, already-ordered
/// chain of projects without needing a real dependency-discovery pass.
#[derive(Debug)]
pub struct InMemoryCrawler {
    count: std::sync::atomic::AtomicUsize,
    failures: std::sync::Mutex<Vec<String>>,
}

impl InMemoryCrawler {
    pub fn new(project_count: usize) -> Self {
        Self {
            count: std::sync::atomic::AtomicUsize::new(project_count),
            failures: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn failures(&self) -> Vec<String> {
        self.failures.lock().unwrap().clone()
    }
}

impl Crawler for InMemoryCrawler {
    fn project_count(&self) -> usize {
        self.count.load(std::sync::atomic::Ordering::SeqCst)
    }

    fn report_failure(&self, project_id: &str) {
        self.failures.lock().unwrap().push(project_id.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mkdir_p_of_existing_directory_is_success() {
        let dir = tempfile::tempdir().unwrap();
        assert!(LocalFilesystem.mkdir_p(dir.path()).is_ok());
        assert!(LocalFilesystem.mkdir_p(dir.path()).is_ok());
    }

    #[test]
    fn rm_of_missing_file_is_success() {
        let dir = tempfile::tempdir().unwrap();
        assert!(LocalFilesystem.rm(&dir.path().join("nope.txt")).is_ok());
    }

    #[test]
    fn cp_into_missing_destination_directory_creates_it() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.txt");
        std::fs::write(&src, b"hi").unwrap();
        let dst = dir.path().join("a/b/c/dst.txt");
        LocalFilesystem.cp(&src, &dst).unwrap();
        assert_eq!(std::fs::read(&dst).unwrap(), b"hi");
    }

    #[test]
    fn cp_recurses_into_directories() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        std::fs::create_dir_all(src.join("nested")).unwrap();
        std::fs::write(src.join("top.txt"), b"top").unwrap();
        std::fs::write(src.join("nested/leaf.txt"), b"leaf").unwrap();

        let dst = dir.path().join("dst");
        LocalFilesystem.cp(&src, &dst).unwrap();
        assert_eq!(std::fs::read(dst.join("top.txt")).unwrap(), b"top");
        assert_eq!(std::fs::read(dst.join("nested/leaf.txt")).unwrap(), b"leaf");
    }

    #[test]
    fn touch_creates_then_advances_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("new.txt");
        assert!(!path.exists());
        LocalFilesystem.touch(&path).unwrap();
        assert!(path.exists());
        let first = LocalFilesystem.lastmodified(&path);

        std::thread::sleep(std::time::Duration::from_millis(10));
        LocalFilesystem.touch(&path).unwrap();
        let second = LocalFilesystem.lastmodified(&path);
        assert!(second >= first);
    }

    #[test]
    fn lastmodified_of_missing_file_is_zero() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(LocalFilesystem.lastmodified(&dir.path().join("nope")), 0);
    }

    #[test]
    fn dir_iter_matches_recursive_separator() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("a/b")).unwrap();
        std::fs::write(dir.path().join("a/b/one.h"), b"").unwrap();
        std::fs::write(dir.path().join("a/two.h"), b"").unwrap();
        std::fs::write(dir.path().join("a/skip.c"), b"").unwrap();

        let matches = LocalFilesystem.dir_iter(dir.path(), "a//*.h").unwrap();
        assert_eq!(matches.len(), 2);
        assert!(matches.iter().all(|p| p.extension().unwrap() == "h"));
    }

    #[test]
    fn default_env_root_is_non_empty() {
        assert!(default_env_root().components().count() > 0);
    }

    #[test]
    fn path_package_locator_rejects_missing_packages() {
        let dir = tempfile::tempdir().unwrap();
        let locator = PathPackageLocator::new(dir.path());
        assert!(locator.locate("does.not.exist", LocateKind::Package).is_err());
    }

    #[test]
    fn path_package_locator_resolves_dotted_ids_to_nested_paths() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("acme/widgets")).unwrap();
        let locator = PathPackageLocator::new(dir.path());
        let resolved = locator.locate("acme.widgets", LocateKind::Package).unwrap();
        assert_eq!(resolved, dir.path().join("acme/widgets"));
    }

    #[test]
    fn in_memory_crawler_tracks_failures() {
        let crawler = InMemoryCrawler::new(3);
        assert_eq!(crawler.project_count(), 3);
        crawler.report_failure("foo");
        crawler.report_failure("bar");
        assert_eq!(crawler.failures(), vec!["foo".to_string(), "bar".to_string()]);
    }
}
