//! The rule evaluation engine.
//!
//! Walks a driver's node graph depth-first, post-order, rooted at a
//! requested node (typically the node producing a project's artefact).
//! Grounded directly in the original tool's `bake_node_eval` /
//! `bake_node_eval_pattern` / `bake_node_run_rule_map` /
//! `bake_node_run_rule_pattern` family: same traversal shape, same
//! staleness rules, reworked around owned `Filelist` values instead of
//! linked lists of raw pointers.

use crate::config::BuildConfig;
use crate::driver::Driver;
use crate::error::{Error, Result};
use crate::filelist::Filelist;
use crate::node::{Node, RuleTarget, SOURCES};
use crate::project::Project;
use crate::services::Filesystem;
use std::collections::HashSet;
use std::path::Path;
use tracing::{trace, trace_span};

/// Evaluates `node_name` in `driver` against `project`, returning the
/// filelist of outputs it produced.
pub fn eval(
    fs: &dyn Filesystem,
    driver: &Driver,
    config: &BuildConfig,
    project: &mut Project,
    node_name: &str,
) -> Result<Filelist> {
    let mut visiting = HashSet::new();
    eval_node(fs, driver, config, project, node_name, None, &mut visiting)
}

fn eval_node(
    fs: &dyn Filesystem,
    driver: &Driver,
    config: &BuildConfig,
    project: &mut Project,
    node_name: &str,
    inherited: Option<&Filelist>,
    visiting: &mut HashSet<String>,
) -> Result<Filelist> {
    if !visiting.insert(node_name.to_string()) {
        return Err(Error::Cycle(node_name.to_string()));
    }

    let node = driver.find_node(node_name).ok_or_else(|| Error::NodeNotFound(node_name.to_string()))?;
    let _span = trace_span!("node", name = %node_name).entered();

    if let Some(cond) = &node.header().cond {
        if !cond(driver, config, project) {
            visiting.remove(node_name);
            return Ok(Filelist::default());
        }
    }

    let result = eval_node_inner(fs, driver, config, project, node, inherited, visiting);
    visiting.remove(node_name);
    result
}

fn eval_node_inner(
    fs: &dyn Filesystem,
    driver: &Driver,
    config: &BuildConfig,
    project: &mut Project,
    node: &Node,
    inherited: Option<&Filelist>,
    visiting: &mut HashSet<String>,
) -> Result<Filelist> {
    match node {
        Node::Pattern(p) => {
            trace!("evaluating pattern");
            let own = eval_pattern(fs, project, &p.header.name, p.pattern.as_deref())?;
            let targets = match own {
                Some(list) => list,
                None => inherited.cloned().unwrap_or_default(),
            };

            if p.header.deps.is_empty() {
                Ok(targets)
            } else {
                let mut inputs = Filelist::default();
                for dep in &p.header.deps {
                    let out = eval_node(fs, driver, config, project, dep, Some(&targets), visiting)?;
                    inputs.merge(&out);
                }
                Ok(inputs)
            }
        }
        Node::Rule(r) => {
            trace!("evaluating rule");
            let mut inputs = Filelist::default();
            for dep in &r.header.deps {
                let out = eval_node(fs, driver, config, project, dep, inherited, visiting)?;
                inputs.merge(&out);
            }

            match &r.target {
                RuleTarget::Map(map) => {
                    // Rooted at the project so `dst.full_path` lands where the
                    // action actually writes (`project.root/<mapped>`), not a
                    // bare relative path resolved against the process CWD.
                    let mut targets = Filelist::new(fs, Some(project.root.clone()), None)?;
                    run_rule_map(fs, driver, config, project, &r.header.name, map, &r.action, &inputs, &mut targets)?;
                    Ok(targets)
                }
                RuleTarget::Pattern(pattern) => {
                    let (mut targets, should_build) =
                        resolve_pattern_target(fs, driver, config, project, pattern, inherited, &inputs)?;
                    run_rule_pattern(driver, config, project, &r.header.name, &r.action, &inputs, &mut targets, should_build)?;
                    Ok(targets)
                }
            }
        }
        Node::DependencyRule(d) => {
            trace!("evaluating dependency rule");
            let base = inherited.cloned().unwrap_or_default();
            let extra_paths = (d.action)(driver, config, project, &base)?;
            let mut extra = Filelist::default();
            for path in extra_paths {
                extra.add_file(fs, &path);
            }
            Ok(extra)
        }
    }
}

fn eval_pattern(
    fs: &dyn Filesystem,
    project: &Project,
    name: &str,
    pattern: Option<&str>,
) -> Result<Option<Filelist>> {
    if name.eq_ignore_ascii_case(SOURCES) {
        // Rooted at the project, not each source directory, so every file's
        // `path` records its source-root offset (e.g. `src/main.c`) rather
        // than just its name — matching what a driver action actually needs
        // to locate the file from the project root (§4.2 item 2).
        let mut targets = Filelist::new(fs, Some(project.root.clone()), None)?;
        if let Some(pattern) = pattern {
            for src in &project.sources {
                let rooted_pattern = Path::new(src).join(pattern);
                targets.add_pattern(fs, &project.root, &rooted_pattern.to_string_lossy())?;
            }
        }
        return Ok(Some(targets));
    }

    match pattern {
        Some(pattern) => Ok(Some(Filelist::new(fs, Some(project.root.clone()), Some(pattern))?)),
        None => Ok(None),
    }
}

fn run_rule_map(
    fs: &dyn Filesystem,
    driver: &Driver,
    config: &BuildConfig,
    project: &mut Project,
    rule_name: &str,
    map: &crate::node::MapFn,
    action: &crate::node::ActionFn,
    inputs: &Filelist,
    targets: &mut Filelist,
) -> Result<()> {
    let total = inputs.count().max(1);
    for (count, src) in inputs.iter().enumerate() {
        let mapped = map(driver, config, project, &src.name).ok_or_else(|| Error::MapFailed(src.name.clone()))?;
        let dst = targets.add_file(fs, &mapped).clone();

        if src.timestamp > dst.timestamp {
            trace!(pct = 100 * (count + 1) / total, file = %src.name, "building");
            if let Some(parent) = dst.full_path.parent() {
                fs.mkdir_p(parent)?;
            }

            let src_path = src.path.to_string_lossy().into_owned();
            let dst_path = dst.path.to_string_lossy().into_owned();
            action(driver, config, project, &src_path, Some(&dst_path))?;

            if project.error {
                return Err(Error::ActionFailed(rule_name.to_string()));
            }
            project.freshly_baked = true;
            project.changed = true;

            let refreshed_ts = fs.lastmodified(&dst.full_path);
            targets.update_timestamp(&dst.full_path, refreshed_ts);
        } else {
            trace!(pct = 100 * (count + 1) / total, file = %src.name, "up to date");
        }
    }
    Ok(())
}

/// Resolves a rule's `Pattern` target, returning the output filelist and
/// whether at least one referenced sub-pattern matched nothing (which
/// forces a rebuild).
fn resolve_pattern_target(
    fs: &dyn Filesystem,
    driver: &Driver,
    config: &BuildConfig,
    project: &Project,
    pattern: &str,
    inherited: Option<&Filelist>,
    inputs: &Filelist,
) -> Result<(Filelist, bool)> {
    let refs: Vec<&str> = pattern.split(',').map(str::trim).collect();

    if refs.len() == 1 && inherited.is_some() {
        return Ok((inherited.cloned().unwrap(), false));
    }

    let mut targets = Filelist::default();
    let mut should_build = false;
    for token in &refs {
        let name = token.strip_prefix('$').unwrap_or(token);
        let target_node = driver.find_node(name).ok_or_else(|| Error::InvalidNodeReference {
            rule: pattern.to_string(),
            reference: name.to_string(),
        })?;
        if !target_node.is_pattern() {
            return Err(Error::InvalidNodeReference { rule: pattern.to_string(), reference: name.to_string() });
        }
        if let Some(cond) = &target_node.header().cond {
            if !cond(driver, config, project) {
                continue;
            }
        }
        let sub_pattern = match target_node {
            Node::Pattern(p) => p.pattern.clone(),
            _ => unreachable!(),
        };
        let list = match &sub_pattern {
            Some(p) => Filelist::new(fs, Some(project.root.clone()), Some(p))?,
            None => Filelist::default(),
        };
        if list.is_empty() {
            trace!(reference = name, "no targets matched, rebuild required");
            should_build = true;
        } else {
            targets.merge(&list);
        }
    }

    if targets.is_empty() && inputs.is_empty() {
        return Err(Error::NoTargetsForRule(pattern.to_string()));
    }
    Ok((targets, should_build))
}

fn run_rule_pattern(
    driver: &Driver,
    config: &BuildConfig,
    project: &mut Project,
    rule_name: &str,
    action: &crate::node::ActionFn,
    inputs: &Filelist,
    targets: &mut Filelist,
    mut should_build: bool,
) -> Result<()> {
    if !should_build {
        if targets.is_empty() {
            should_build = true;
            trace!(rule = rule_name, "no targets found, rebuilding");
        } else {
            'outer: for src in inputs.iter() {
                for dst in targets.iter() {
                    if !src.exists() || src.timestamp > dst.timestamp {
                        should_build = true;
                        break 'outer;
                    }
                }
            }
        }
    }

    let single_target = if targets.count() == 1 { targets.get(0).map(|f| f.name.clone()) } else { None };

    if should_build && !inputs.is_empty() {
        let source_list = inputs.iter().map(|f| f.name.as_str()).collect::<Vec<_>>().join(" ");
        action(driver, config, project, &source_list, single_target.as_deref())?;

        if project.error {
            return Err(match &single_target {
                Some(dst) => Error::ActionFailed(dst.clone()),
                None => Error::RuleFailed,
            });
        }
        project.freshly_baked = true;
        project.changed = true;
    }
    Ok(())
}
