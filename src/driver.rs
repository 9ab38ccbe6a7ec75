//! The driver plugin interface: registration of patterns, rules, dependency
//! rules and lifecycle callbacks, plus the loader that turns a driver id
//! into a cached, process-lifetime [`Driver`] instance.

use crate::config::BuildConfig;
use crate::error::{Error, Result};
use crate::node::{ActionFn, ConditionFn, DependencyActionFn, DependencyRuleNode, Node, NodeHeader, PatternNode, RuleNode, RuleTarget, SOURCES};
use crate::project::Project;
use crate::services::DriverLoader;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

/// `(driver, config, project) -> Result<()>` lifecycle callback.
pub type LifecycleFn =
    Arc<dyn Fn(&Driver, &BuildConfig, &mut Project) -> Result<()> + Send + Sync>;
/// `(driver, config, project) -> Option<artefact name>`.
pub type ArtefactFn = Arc<dyn Fn(&Driver, &BuildConfig, &Project) -> Option<String> + Send + Sync>;
/// `(driver, config, project, logical_name) -> library_name`.
pub type LinkToLibFn =
    Arc<dyn Fn(&Driver, &BuildConfig, &Project, &str) -> String + Send + Sync>;

/// A driver's entry point, registered under the driver id and invoked once
/// (lazily) to populate a fresh [`Driver`] via [`DriverApi`].
///
/// Stands in for the original tool's `bakemain(bake_driver_api*)` C entry
/// point: generalised here, per the Design Notes in `SPEC_FULL.md` §9, so
/// the driver receives the dispatch table by reference instead of writing
/// through a process-global `bake_driver_api_impl`.
pub type BakeMain = Arc<dyn Fn(&mut DriverApi) -> Result<()> + Send + Sync>;

#[derive(Default)]
pub struct DriverCallbacks {
    pub init: Option<LifecycleFn>,
    pub artefact: Option<ArtefactFn>,
    pub link_to_lib: Option<LinkToLibFn>,
    pub setup: Option<LifecycleFn>,
    pub generate: Option<LifecycleFn>,
    pub prebuild: Option<LifecycleFn>,
    pub postbuild: Option<LifecycleFn>,
    pub clean: Option<LifecycleFn>,
}

/// A loaded, process-lifetime driver plugin.
pub struct Driver {
    pub id: String,
    pub package_id: String,
    nodes: Vec<Node>,
    node_index: HashMap<String, usize>,
    pub callbacks: DriverCallbacks,
    /// Reset before each use; set by an action to signal failure (see
    /// §4.2 failure semantics).
    pub error: std::sync::atomic::AtomicBool,
}

impl Driver {
    fn new(id: impl Into<String>, package_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            package_id: package_id.into(),
            nodes: Vec::new(),
            node_index: HashMap::new(),
            callbacks: DriverCallbacks::default(),
            error: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn reset_error(&self) {
        self.error.store(false, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn has_error(&self) -> bool {
        self.error.load(std::sync::atomic::Ordering::SeqCst)
    }

    pub fn set_error(&self) {
        self.error.store(true, std::sync::atomic::Ordering::SeqCst);
    }

    /// Looks up a registered node by name. Lookups are case-insensitive
    /// only for the reserved `SOURCES` node name.
    pub fn find_node(&self, name: &str) -> Option<&Node> {
        if name.eq_ignore_ascii_case(SOURCES) {
            return self
                .node_index
                .get(SOURCES)
                .map(|&i| &self.nodes[i])
                .or_else(|| self.nodes.iter().find(|n| n.name().eq_ignore_ascii_case(SOURCES)));
        }
        self.node_index.get(name).map(|&i| &self.nodes[i])
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    pub fn artefact(&self, config: &BuildConfig, project: &Project) -> Option<String> {
        self.callbacks.artefact.as_ref().and_then(|f| f(self, config, project))
    }

    pub fn link_to_lib(&self, config: &BuildConfig, project: &Project, link: &str) -> String {
        match &self.callbacks.link_to_lib {
            Some(f) => f(self, config, project, link),
            None => link.to_string(),
        }
    }

    /// Initializes the driver for a specific project, e.g. to derive
    /// project-specific node conditions from its declared language or
    /// attributes. Invoked once per project during the pipeline's
    /// `load-drivers` step, distinct from the entry point invoked once per
    /// process at driver-load time.
    pub fn run_init(&self, config: &BuildConfig, project: &mut Project) -> Result<()> {
        self.run_lifecycle(&self.callbacks.init, config, project)
    }

    pub fn run_setup(&self, config: &BuildConfig, project: &mut Project) -> Result<()> {
        self.run_lifecycle(&self.callbacks.setup, config, project)
    }

    pub fn run_generate(&self, config: &BuildConfig, project: &mut Project) -> Result<()> {
        self.run_lifecycle(&self.callbacks.generate, config, project)
    }

    pub fn run_prebuild(&self, config: &BuildConfig, project: &mut Project) -> Result<()> {
        self.run_lifecycle(&self.callbacks.prebuild, config, project)
    }

    pub fn run_postbuild(&self, config: &BuildConfig, project: &mut Project) -> Result<()> {
        self.run_lifecycle(&self.callbacks.postbuild, config, project)
    }

    pub fn run_clean(&self, config: &BuildConfig, project: &mut Project) -> Result<()> {
        self.run_lifecycle(&self.callbacks.clean, config, project)
    }

    fn run_lifecycle(
        &self,
        cb: &Option<LifecycleFn>,
        config: &BuildConfig,
        project: &mut Project,
    ) -> Result<()> {
        if let Some(f) = cb {
            f(self, config, project)?;
        }
        Ok(())
    }
}

/// The dispatch table handed to a driver's entry point. Every registration
/// method writes into the [`Driver`] borrowed by this handle; there is no
/// process-global registration state.
pub struct DriverApi<'a> {
    driver: &'a mut Driver,
}

impl<'a> DriverApi<'a> {
    fn new(driver: &'a mut Driver) -> Self {
        Self { driver }
    }

    fn insert(&mut self, node: Node) -> Result<()> {
        let name = node.name().to_string();
        if self.driver.node_index.contains_key(&name) {
            // Registering under a name already taken is a programmer error
            // in the driver; keep the first registration, matching a
            // HashMap's natural "insert once" semantics.
            return Ok(());
        }
        self.driver.node_index.insert(name, self.driver.nodes.len());
        self.driver.nodes.push(node);
        Ok(())
    }

    /// Registers a pattern node. `pattern` of `None` yields an always-empty
    /// list.
    pub fn pattern(&mut self, name: &str, pattern: Option<&str>) -> Result<()> {
        self.insert(Node::Pattern(PatternNode {
            header: NodeHeader::new(name, Vec::new()),
            pattern: pattern.map(str::to_string),
        }))
    }

    /// Registers a rule node. `deps` defaults to `[source]`, matching the
    /// original tool's `bake_rule_new(name, source, target, action)`
    /// registration signature.
    pub fn rule(&mut self, name: &str, source: &str, target: RuleTarget, action: ActionFn) -> Result<()> {
        self.insert(Node::Rule(RuleNode {
            header: NodeHeader::new(name, vec![source.to_string()]),
            source: source.to_string(),
            target,
            action,
        }))
    }

    /// Registers a dependency rule, which dynamically extends its parent's
    /// input list during evaluation.
    pub fn dependency_rule(
        &mut self,
        name: &str,
        deps_pattern: &str,
        target: RuleTarget,
        action: DependencyActionFn,
    ) -> Result<()> {
        self.insert(Node::DependencyRule(DependencyRuleNode {
            header: NodeHeader::new(name, Vec::new()),
            deps_pattern: deps_pattern.to_string(),
            target,
            action,
        }))
    }

    /// Attaches a dependency list (beyond `rule`'s implicit `[source]`) and
    /// an optional guard to an already-registered node, e.g. for dependency
    /// rules that need extra static deps besides their dynamic ones.
    pub fn add_deps(&mut self, name: &str, deps: Vec<String>) -> Result<()> {
        let idx = *self.driver.node_index.get(name).ok_or_else(|| Error::NodeNotFound(name.to_string()))?;
        self.driver.nodes[idx].header_mut().deps.extend(deps);
        Ok(())
    }

    pub fn set_condition(&mut self, name: &str, cond: ConditionFn) -> Result<()> {
        let idx = *self.driver.node_index.get(name).ok_or_else(|| Error::NodeNotFound(name.to_string()))?;
        self.driver.nodes[idx].header_mut().cond = Some(cond);
        Ok(())
    }

    pub fn init(&mut self, cb: LifecycleFn) {
        self.driver.callbacks.init = Some(cb);
    }

    pub fn artefact(&mut self, cb: ArtefactFn) {
        self.driver.callbacks.artefact = Some(cb);
    }

    pub fn link_to_lib(&mut self, cb: LinkToLibFn) {
        self.driver.callbacks.link_to_lib = Some(cb);
    }

    pub fn setup(&mut self, cb: LifecycleFn) {
        self.driver.callbacks.setup = Some(cb);
    }

    pub fn generate(&mut self, cb: LifecycleFn) {
        self.driver.callbacks.generate = Some(cb);
    }

    pub fn prebuild(&mut self, cb: LifecycleFn) {
        self.driver.callbacks.prebuild = Some(cb);
    }

    pub fn postbuild(&mut self, cb: LifecycleFn) {
        self.driver.callbacks.postbuild = Some(cb);
    }

    pub fn clean(&mut self, cb: LifecycleFn) {
        self.driver.callbacks.clean = Some(cb);
    }
}

/// Caches loaded drivers keyed by id; a driver is loaded at most once per
/// process lifetime.
pub struct DriverRegistry {
    loader: Arc<dyn DriverLoader>,
    cache: RwLock<HashMap<String, Arc<Driver>>>,
    // Guards the load-and-insert sequence so two concurrent first-requests
    // for the same id can't both invoke the entry point.
    load_lock: Mutex<()>,
}

impl DriverRegistry {
    pub fn new(loader: Arc<dyn DriverLoader>) -> Self {
        Self { loader, cache: RwLock::new(HashMap::new()), load_lock: Mutex::new(()) }
    }

    /// Returns the cached driver for `id`, loading it on first request.
    pub fn get(&self, id: &str) -> Result<Arc<Driver>> {
        if let Some(driver) = self.cache.read().unwrap().get(id) {
            return Ok(driver.clone());
        }

        let _guard = self.load_lock.lock().unwrap();
        if let Some(driver) = self.cache.read().unwrap().get(id) {
            return Ok(driver.clone());
        }

        let entry_point = self.loader.load(id)?;
        let mut driver = Driver::new(id, id);
        {
            let mut api = DriverApi::new(&mut driver);
            entry_point(&mut api).map_err(|_| Error::DriverInitFailed(id.to_string()))?;
        }

        let driver = Arc::new(driver);
        self.cache.write().unwrap().insert(id.to_string(), driver.clone());
        Ok(driver)
    }
}
