//! End-to-end build pipeline scenarios, covering the fixture-driven
//! properties in the component spec: a trivial build, touching a source,
//! a stale dependency forcing an artefact rebuild, a missing dependency,
//! an invalid project id, and `rebuild`'s `keep_binary` handling.
//!
//! These tests stand in for a real language driver with a small in-process
//! one: a `SOURCES` pattern over `*.c`, a `Map` rule that "compiles" each
//! source into an object file, and a `Pattern` rule that "links" the
//! objects into the project's artefact.

use bake_core::driver::BakeMain;
use bake_core::node::{RuleTarget, ARTEFACT_NODE};
use bake_core::project_util::TempProject;
use bake_core::services::{
    Crawler, DriverLoader, Filesystem, InMemoryCrawler, LocalFilesystem, LocateKind, PackageLocator,
};
use bake_core::{BuildConfig, BuildPipeline, Driver, DriverApi, DriverRegistry, Error, Project, Result};
use serde_json::json;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

struct FnLoader(BakeMain);

impl DriverLoader for FnLoader {
    fn load(&self, _driver_id: &str) -> Result<BakeMain> {
        Ok(self.0.clone())
    }
}

/// Resolves package ids to whatever paths the test wired up ahead of time;
/// an id/kind pair with nothing registered is a missing dependency.
#[derive(Default)]
struct FixedLocator {
    entries: HashMap<(String, LocateKind), PathBuf>,
}

impl FixedLocator {
    fn with(mut self, id: &str, kind: LocateKind, path: PathBuf) -> Self {
        self.entries.insert((id.to_string(), kind), path);
        self
    }
}

impl PackageLocator for FixedLocator {
    fn locate(&self, package_id: &str, kind: LocateKind) -> Result<PathBuf> {
        self.entries
            .get(&(package_id.to_string(), kind))
            .cloned()
            .ok_or_else(|| Error::DependencyNotLocatable(package_id.to_string()))
    }
}

/// A minimal "C-like" driver: compiles `*.c` under each source root into
/// `obj/<stem>.o`, then links every object into the project's artefact.
fn c_driver_entry() -> BakeMain {
    Arc::new(|api: &mut DriverApi| {
        api.pattern("SOURCES", Some("*.c"))?;
        api.rule(
            "OBJECTS",
            "SOURCES",
            RuleTarget::Map(Arc::new(|_driver: &Driver, _config, _project, input: &str| {
                Some(format!("obj/{}.o", input.trim_end_matches(".c")))
            })),
            Arc::new(|_driver: &Driver, _config, project: &mut Project, src: &str, dst: Option<&str>| {
                let dst_path = project.root.join(dst.expect("map rule always has a target"));
                std::fs::create_dir_all(dst_path.parent().unwrap()).unwrap();
                std::fs::write(&dst_path, format!("compiled({src})")).unwrap();
                Ok(())
            }),
        )?;
        api.pattern("BIN_GLOB", Some("bin/*/app"))?;
        api.rule(
            ARTEFACT_NODE,
            "OBJECTS",
            RuleTarget::Pattern("$BIN_GLOB".to_string()),
            Arc::new(|_driver: &Driver, _config, project: &mut Project, sources: &str, _dst: Option<&str>| {
                let artefact_path = project.artefact_path.clone().expect("pipeline computes artefact_path");
                std::fs::create_dir_all(artefact_path.parent().unwrap()).unwrap();
                std::fs::write(&artefact_path, format!("linked({sources})")).unwrap();
                Ok(())
            }),
        )?;
        api.artefact(Arc::new(|_driver, _config, _project| Some("app".to_string())));
        Ok(())
    })
}

fn pipeline(crawler_project_count: usize, env_root: &std::path::Path) -> BuildPipeline {
    BuildPipeline::new(
        Arc::new(LocalFilesystem) as Arc<dyn Filesystem>,
        Arc::new(FixedLocator::default()) as _,
        Arc::new(DriverRegistry::new(Arc::new(FnLoader(c_driver_entry())))),
        Arc::new(InMemoryCrawler::new(crawler_project_count)) as Arc<dyn Crawler>,
        env_root,
    )
}

fn mtime(path: &std::path::Path) -> u64 {
    LocalFilesystem.lastmodified(path)
}

#[test]
fn trivial_build_produces_artefact_and_second_build_is_idempotent() {
    let temp = TempProject::with_manifest("foo", json!({ "c": {} })).unwrap();
    temp.write_file("src/main.c", "int main(){}").unwrap();
    let mut project = temp.load_project().unwrap();

    let env_root = tempfile::tempdir().unwrap();
    let pipe = pipeline(1, env_root.path());
    let config = BuildConfig::new("linux-x64", "debug");

    pipe.build(&config, &mut project).unwrap();
    let artefact_path = project.artefact_path.clone().expect("artefact path computed");
    assert!(artefact_path.exists());
    assert!(project.built);

    project.freshly_baked = false;
    project.changed = false;
    pipe.build(&config, &mut project).unwrap();
    assert!(!project.freshly_baked, "second build must fire zero stale rules");
}

#[test]
fn touching_a_source_recompiles_and_relinks() {
    let temp = TempProject::with_manifest("foo", json!({ "c": {} })).unwrap();
    temp.write_file("src/main.c", "int main(){}").unwrap();
    let mut project = temp.load_project().unwrap();

    let env_root = tempfile::tempdir().unwrap();
    let pipe = pipeline(1, env_root.path());
    let config = BuildConfig::new("linux-x64", "debug");

    pipe.build(&config, &mut project).unwrap();
    let artefact_path = project.artefact_path.clone().unwrap();
    let object_path = temp.root().join("obj/main.o");
    let object_before = mtime(&object_path);
    let artefact_before = mtime(&artefact_path);

    std::thread::sleep(Duration::from_millis(10));
    temp.touch("src/main.c").unwrap();
    project.freshly_baked = false;
    project.changed = false;
    pipe.build(&config, &mut project).unwrap();

    assert!(project.freshly_baked);
    assert!(mtime(&object_path) > object_before, "touched source's object must be recompiled");
    assert!(mtime(&artefact_path) > artefact_before, "artefact must be relinked against the new object");
}

#[test]
fn dependency_outdating_artefact_forces_a_rebuild() {
    let temp = TempProject::with_manifest("app", json!({ "c": {}, "value": { "use": ["lib"] } })).unwrap();
    temp.write_file("src/main.c", "int main(){}").unwrap();
    let mut project = temp.load_project().unwrap();

    let dep_dir = tempfile::tempdir().unwrap();
    let lib_file = dep_dir.path().join("liblib.a");
    std::fs::write(&lib_file, b"lib").unwrap();

    let env_root = tempfile::tempdir().unwrap();
    let pipe = BuildPipeline::new(
        Arc::new(LocalFilesystem) as Arc<dyn Filesystem>,
        Arc::new(
            FixedLocator::default()
                .with("lib", LocateKind::Package, dep_dir.path().to_path_buf())
                .with("lib", LocateKind::Lib, lib_file.clone()),
        ) as _,
        Arc::new(DriverRegistry::new(Arc::new(FnLoader(c_driver_entry())))),
        Arc::new(InMemoryCrawler::new(1)) as Arc<dyn Crawler>,
        env_root.path(),
    );
    let config = BuildConfig::new("linux-x64", "debug");

    pipe.build(&config, &mut project).unwrap();
    let artefact_path = project.artefact_path.clone().unwrap();
    let artefact_before = mtime(&artefact_path);

    std::thread::sleep(Duration::from_millis(10));
    LocalFilesystem.touch(&lib_file).unwrap();

    project.artefact_outdated = false;
    pipe.build(&config, &mut project).unwrap();

    assert!(project.artefact_outdated, "a newer dependency must mark the artefact outdated");
    assert!(mtime(&artefact_path) > artefact_before, "the stale artefact must be removed and rebuilt");
}

#[test]
fn missing_dependency_aborts_before_the_build_step() {
    let temp = TempProject::with_manifest("app", json!({ "c": {}, "value": { "use": ["missing"] } })).unwrap();
    temp.write_file("src/main.c", "int main(){}").unwrap();
    let mut project = temp.load_project().unwrap();

    let env_root = tempfile::tempdir().unwrap();
    let pipe = pipeline(1, env_root.path());
    let config = BuildConfig::new("linux-x64", "debug");

    let err = pipe.build(&config, &mut project).unwrap_err();
    assert!(matches!(err, Error::DependencyNotLocatable(id) if id == "missing"));
    assert!(project.error);
    assert!(!project.built);
    assert!(
        !project.artefact_path.as_ref().unwrap().exists(),
        "load-dependees aborted before the build step ever ran, so no artefact was written"
    );
}

#[test]
fn invalid_project_id_is_rejected_before_any_step_runs() {
    let temp = TempProject::with_manifest("foo bar", json!({})).unwrap();
    let err = temp.load_project().unwrap_err();
    assert!(matches!(err, Error::InvalidId(id) if id == "foo bar"));
}

#[test]
fn rebuild_honours_keep_binary_with_multiple_projects_in_flight() {
    let temp = TempProject::with_manifest("foo", json!({ "c": {}, "value": { "keep_binary": true } })).unwrap();
    temp.write_file("src/main.c", "int main(){}").unwrap();
    let mut project = temp.load_project().unwrap();
    let config = BuildConfig::new("linux-x64", "debug");
    let env_root = tempfile::tempdir().unwrap();

    pipeline(1, env_root.path()).build(&config, &mut project).unwrap();
    let artefact_path = project.artefact_path.clone().unwrap();
    let after_initial_build = mtime(&artefact_path);

    // Two projects in flight: keep_binary suppresses the artefact removal.
    std::thread::sleep(Duration::from_millis(10));
    pipeline(2, env_root.path()).rebuild(&config, &mut project).unwrap();
    assert_eq!(mtime(&artefact_path), after_initial_build, "keep_binary must suppress removal when >1 project is building");

    // A single project in flight: keep_binary no longer applies, artefact is removed and rebuilt.
    std::thread::sleep(Duration::from_millis(10));
    pipeline(1, env_root.path()).rebuild(&config, &mut project).unwrap();
    assert!(mtime(&artefact_path) > after_initial_build, "with exactly one project building, the artefact is removed and rebuilt");
}
