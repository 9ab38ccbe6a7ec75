//! Rule graph node types.
//!
//! A single `Node` enum stands in for the source's "super struct plus
//! casts" pattern (`bake_node` + `bake_pattern`/`bake_rule`/
//! `bake_dependency_rule`), per the tagged-variant Design Note in
//! `SPEC_FULL.md` §9.

use crate::config::BuildConfig;
use crate::driver::Driver;
use crate::error::Result;
use crate::project::Project;
use std::sync::Arc;

/// Name of the pattern node whose matches are resolved against each of the
/// project's configured source roots in turn, rather than the project root.
pub const SOURCES: &str = "SOURCES";

/// Conventional name of the rule node a driver registers as the final
/// target of a build: the node the pipeline's `build` step evaluates.
pub const ARTEFACT_NODE: &str = "ARTEFACT";

/// `(driver, config, project) -> bool` node guard.
pub type ConditionFn = Arc<dyn Fn(&Driver, &BuildConfig, &Project) -> bool + Send + Sync>;

/// `(driver, config, project, input_name) -> output_name` used by `Map`
/// targets to compute a single output from a single input.
pub type MapFn = Arc<dyn Fn(&Driver, &BuildConfig, &Project, &str) -> Option<String> + Send + Sync>;

/// `(driver, config, project, src, dst)` rule action. `dst` is always
/// `Some` for `Map` targets, and `Some` only when the `Pattern` target's
/// output filelist has exactly one entry.
pub type ActionFn = Arc<
    dyn Fn(&Driver, &BuildConfig, &mut Project, &str, Option<&str>) -> Result<()> + Send + Sync,
>;

/// A dependency rule's action: given the parent node's current input
/// filelist, returns extra absolute input paths to fold in (e.g. header
/// dependencies emitted by a compiler's `.d` file).
pub type DependencyActionFn = Arc<
    dyn Fn(&Driver, &BuildConfig, &Project, &crate::filelist::Filelist) -> Result<Vec<std::path::PathBuf>>
        + Send
        + Sync,
>;

/// A rule node's output specification.
#[derive(Clone)]
pub enum RuleTarget {
    /// Each input is mapped individually to a distinct output.
    Map(MapFn),
    /// The outputs are the union of the named sibling pattern nodes,
    /// referenced as a comma-separated list of `$name` tokens.
    Pattern(String),
}

/// Fields shared by every node variant.
#[derive(Clone)]
pub struct NodeHeader {
    pub name: String,
    pub deps: Vec<String>,
    pub cond: Option<ConditionFn>,
}

impl NodeHeader {
    pub fn new(name: impl Into<String>, deps: Vec<String>) -> Self {
        Self { name: name.into(), deps, cond: None }
    }
}

#[derive(Clone)]
pub struct PatternNode {
    pub header: NodeHeader,
    pub pattern: Option<String>,
}

#[derive(Clone)]
pub struct RuleNode {
    pub header: NodeHeader,
    /// Name of the node this rule reads its primary input from.
    pub source: String,
    pub target: RuleTarget,
    pub action: ActionFn,
}

#[derive(Clone)]
pub struct DependencyRuleNode {
    pub header: NodeHeader,
    pub deps_pattern: String,
    pub target: RuleTarget,
    pub action: DependencyActionFn,
}

/// A rule graph node: either a pattern, a rule, or a dependency rule.
#[derive(Clone)]
pub enum Node {
    Pattern(PatternNode),
    Rule(RuleNode),
    DependencyRule(DependencyRuleNode),
}

impl Node {
    pub fn header(&self) -> &NodeHeader {
        match self {
            Node::Pattern(n) => &n.header,
            Node::Rule(n) => &n.header,
            Node::DependencyRule(n) => &n.header,
        }
    }

    pub fn header_mut(&mut self) -> &mut NodeHeader {
        match self {
            Node::Pattern(n) => &mut n.header,
            Node::Rule(n) => &mut n.header,
            Node::DependencyRule(n) => &mut n.header,
        }
    }

    pub fn name(&self) -> &str {
        &self.header().name
    }

    pub fn is_pattern(&self) -> bool {
        matches!(self, Node::Pattern(_))
    }
}
