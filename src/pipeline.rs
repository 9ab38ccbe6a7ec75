//! The per-project build pipeline.
//!
//! Sequences the twelve build steps via a data-driven step table, grounded
//! directly in the original tool's `bake_do_build_intern` (step order, skip
//! predicates, log-scope names) and `bake_project_check_dependencies`
//! (dependency staleness comparison).

use crate::attributes::AttributeCache;
use crate::config::BuildConfig;
use crate::driver::DriverRegistry;
use crate::engine;
use crate::error::{Error, Result};
use crate::node::ARTEFACT_NODE;
use crate::project::{Project, ProjectType};
use crate::services::{Crawler, Filesystem, LocateKind, PackageLocator};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info_span, warn};

/// Coordinates the services a build needs: a filesystem, a package
/// locator, the driver registry, and the crawler that ordered this build.
pub struct BuildPipeline {
    fs: Arc<dyn Filesystem>,
    locator: Arc<dyn PackageLocator>,
    drivers: Arc<DriverRegistry>,
    crawler: Arc<dyn Crawler>,
    attributes: AttributeCache,
    /// Root of the installed-package environment (metadata, headers and
    /// artefacts of public projects are copied here).
    env_root: PathBuf,
}

type StepFn = fn(&BuildPipeline, &BuildConfig, &mut Project, bool) -> Result<()>;

struct Step {
    name: &'static str,
    predicate: fn(&Project, bool) -> bool,
    run: StepFn,
}

const STEPS: &[Step] = &[
    Step { name: "install-metadata", predicate: |p, _| p.public, run: BuildPipeline::install_metadata },
    Step { name: "load-drivers", predicate: |_, _| true, run: BuildPipeline::load_drivers },
    Step { name: "load-dependees", predicate: |_, _| true, run: BuildPipeline::load_dependees },
    Step { name: "clean-cache", predicate: |_, rebuild| rebuild, run: BuildPipeline::clean_cache },
    Step { name: "validate-dependencies", predicate: |_, _| true, run: BuildPipeline::validate_dependencies },
    Step { name: "generate", predicate: |_, _| true, run: BuildPipeline::generate },
    Step {
        name: "clear",
        predicate: |p, _| p.public && p.project_type != ProjectType::Tool,
        run: BuildPipeline::clear,
    },
    Step {
        name: "install-prebuild",
        predicate: |p, _| p.public && p.project_type != ProjectType::Tool,
        run: BuildPipeline::install_prebuild,
    },
    Step { name: "prebuild", predicate: |_, _| true, run: BuildPipeline::prebuild },
    Step { name: "build", predicate: |p, _| p.artefact.is_some(), run: BuildPipeline::run_build_step },
    Step { name: "postbuild", predicate: |_, _| true, run: BuildPipeline::postbuild },
    Step {
        name: "install-postbuild",
        predicate: |p, _| p.public && p.artefact.is_some(),
        run: BuildPipeline::install_postbuild,
    },
];

impl BuildPipeline {
    pub fn new(
        fs: Arc<dyn Filesystem>,
        locator: Arc<dyn PackageLocator>,
        drivers: Arc<DriverRegistry>,
        crawler: Arc<dyn Crawler>,
        env_root: impl Into<PathBuf>,
    ) -> Self {
        Self { fs, locator, drivers, crawler, attributes: AttributeCache::new(), env_root: env_root.into() }
    }

    pub fn build(&self, config: &BuildConfig, project: &mut Project) -> Result<()> {
        self.run(config, project, false)
    }

    pub fn rebuild(&self, config: &BuildConfig, project: &mut Project) -> Result<()> {
        self.run(config, project, true)
    }

    fn run(&self, config: &BuildConfig, project: &mut Project, rebuild: bool) -> Result<()> {
        for step in STEPS {
            if !(step.predicate)(project, rebuild) {
                continue;
            }
            let _span = info_span!("step", name = step.name).entered();
            if let Err(e) = (step.run)(self, config, project, rebuild) {
                project.error = true;
                self.crawler.report_failure(&project.id);
                return Err(e);
            }
        }
        project.built = true;
        Ok(())
    }

    /// CLI `clean` command: invokes every bound driver's `clean` callback
    /// and removes the project's cache directory, outside the normal
    /// build/rebuild sequencing.
    pub fn clean(&self, config: &BuildConfig, project: &mut Project) -> Result<()> {
        for binding in project.drivers.clone() {
            let driver = self.drivers.get(&binding.driver_id)?;
            driver.run_clean(config, project)?;
        }
        if let Some(cache_path) = &project.cache_path {
            self.fs.rmtree(cache_path)?;
        }
        Ok(())
    }

    fn install_metadata(&self, _config: &BuildConfig, project: &mut Project, _rebuild: bool) -> Result<()> {
        let dst = self.env_root.join(&project.id).join("project.json");
        if let Some(parent) = dst.parent() {
            self.fs.mkdir_p(parent)?;
        }
        self.fs.cp(&project.root.join("project.json"), &dst)
    }

    fn load_drivers(&self, config: &BuildConfig, project: &mut Project, _rebuild: bool) -> Result<()> {
        project.load_driver_attributes(&self.attributes, config)?;

        for binding in project.drivers.clone() {
            let driver = self.drivers.get(&binding.driver_id)?;
            driver.run_init(config, project)?;
        }

        if let Ok(driver) = self.drivers.get(&project.language) {
            let artefact = driver.artefact(config, project);
            let bin_path = project.root.join("bin").join(config.qualifier());
            project.bin_path = Some(bin_path.clone());
            project.cache_path = Some(project.root.join(".bake_cache").join(config.qualifier()));
            if let Some(name) = artefact {
                let artefact_path = bin_path.join(&name);
                project.artefact_file = Some(PathBuf::from(&name));
                project.artefact_path = Some(artefact_path);
                project.artefact = Some(name);
            }
        }
        Ok(())
    }

    fn load_dependees(&self, _config: &BuildConfig, project: &mut Project, _rebuild: bool) -> Result<()> {
        let deps: Vec<String> = project.use_.iter().chain(project.use_private.iter()).cloned().collect();
        for dep in deps {
            let package_path = self
                .locator
                .locate(&dep, LocateKind::Package)
                .map_err(|_| Error::DependencyNotLocatable(dep.clone()))?;
            let dependee_path = package_path.join("dependee.json");
            if !self.fs.file_test(&dependee_path) {
                continue;
            }
            let contents = std::fs::read_to_string(&dependee_path).map_err(|e| Error::io(&dependee_path, e))?;
            let value: serde_json::Value = serde_json::from_str(&contents)
                .map_err(|source| Error::ManifestJson { path: dependee_path.clone(), source })?;
            project.merge_dependee_config(&value)?;
        }
        Ok(())
    }

    fn clean_cache(&self, _config: &BuildConfig, project: &mut Project, _rebuild: bool) -> Result<()> {
        if let Some(cache_path) = project.cache_path.clone() {
            self.fs.rmtree(&cache_path)?;
        }
        if project.keep_binary && self.crawler.project_count() == 1 {
            if let Some(artefact_path) = project.artefact_path.clone() {
                self.fs.rm(&artefact_path)?;
            }
        }
        Ok(())
    }

    fn validate_dependencies(&self, _config: &BuildConfig, project: &mut Project, _rebuild: bool) -> Result<()> {
        let artefact_modified = match &project.artefact_path {
            Some(path) if self.fs.file_test(path) => self.fs.lastmodified(path),
            _ => 0,
        };

        let deps: Vec<String> = project
            .use_
            .iter()
            .chain(project.use_private.iter())
            .chain(project.use_build.iter())
            .cloned()
            .collect();

        for dep in &deps {
            let lib = self
                .locator
                .locate(dep, LocateKind::Lib)
                .map_err(|_| Error::MissingDependency(dep.clone()))?;
            let dep_modified = self.fs.lastmodified(&lib);
            if artefact_modified != 0 && dep_modified > artefact_modified {
                project.artefact_outdated = true;
            }
        }

        if project.artefact_outdated {
            if let Some(artefact_path) = project.artefact_path.clone() {
                self.fs.rm(&artefact_path)?;
            }
        }
        Ok(())
    }

    fn generate(&self, config: &BuildConfig, project: &mut Project, _rebuild: bool) -> Result<()> {
        for binding in project.drivers.clone() {
            let driver = self.drivers.get(&binding.driver_id)?;
            driver.run_generate(config, project)?;
        }
        Ok(())
    }

    fn clear(&self, _config: &BuildConfig, project: &mut Project, _rebuild: bool) -> Result<()> {
        let install_dir = self.env_root.join(&project.id);
        for name in ["include", "etc"] {
            self.fs.rmtree(&install_dir.join(name))?;
        }
        Ok(())
    }

    fn install_prebuild(&self, _config: &BuildConfig, project: &mut Project, _rebuild: bool) -> Result<()> {
        let install_dir = self.env_root.join(&project.id);
        for include in &project.includes {
            let src = project.root.join(include);
            if self.fs.isdir(&src) {
                self.fs.cp(&src, &install_dir.join("include"))?;
            }
        }
        Ok(())
    }

    fn prebuild(&self, config: &BuildConfig, project: &mut Project, _rebuild: bool) -> Result<()> {
        for binding in project.drivers.clone() {
            let driver = self.drivers.get(&binding.driver_id)?;
            driver.run_prebuild(config, project)?;
        }
        Ok(())
    }

    fn run_build_step(&self, config: &BuildConfig, project: &mut Project, _rebuild: bool) -> Result<()> {
        let driver = self.drivers.get(&project.language)?;
        engine::eval(self.fs.as_ref(), &driver, config, project, ARTEFACT_NODE)?;
        Ok(())
    }

    fn postbuild(&self, config: &BuildConfig, project: &mut Project, _rebuild: bool) -> Result<()> {
        for binding in project.drivers.clone() {
            let driver = self.drivers.get(&binding.driver_id)?;
            driver.run_postbuild(config, project)?;
        }
        Ok(())
    }

    fn install_postbuild(&self, _config: &BuildConfig, project: &mut Project, _rebuild: bool) -> Result<()> {
        let (artefact_path, artefact_name) = match (&project.artefact_path, &project.artefact) {
            (Some(path), Some(name)) => (path.clone(), name.clone()),
            _ => {
                warn!(project = %project.id, "install-postbuild skipped: no artefact path computed");
                return Ok(());
            }
        };
        let dst = self.env_root.join(&project.id).join("lib").join(&artefact_name);
        if let Some(parent) = dst.parent() {
            self.fs.mkdir_p(parent)?;
        }
        self.fs.cp(&artefact_path, &dst)
    }
}
