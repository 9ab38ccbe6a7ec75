//! Driver-binding attribute parsing and `${VAR}` / `$fn(args)` expansion.

use crate::config::BuildConfig;
use crate::error::{Error, Result};
use crate::project::Project;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Mutex;

/// A parsed attribute value. Mirrors the JSON value shapes the original
/// tool's `bake_attrs_parse` produces, minus `null` (treated as absent).
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    String(String),
    Bool(bool),
    Number(f64),
    List(Vec<Attribute>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub name: String,
    pub value: AttributeValue,
}

/// Signature for a registered attribute function, e.g. `$os()`.
pub type AttributeFn = fn(&Project, &BuildConfig, &[String]) -> Result<String>;

fn builtin_functions() -> &'static HashMap<&'static str, AttributeFn> {
    static FUNCS: Lazy<HashMap<&'static str, AttributeFn>> = Lazy::new(|| {
        let mut m: HashMap<&'static str, AttributeFn> = HashMap::new();
        m.insert("os", |_project, config, _args| Ok(config.platform.clone()));
        m.insert("language", |project, _config, _args| Ok(project.language.clone()));
        m.insert("artefact", |project, _config, _args| {
            Ok(project.artefact.clone().unwrap_or_default())
        });
        m.insert("cfg", |_project, config, _args| Ok(config.configuration.clone()));
        m
    });
    &FUNCS
}

/// Memoises expansion results per `(project_id, package_id, input)` triple.
#[derive(Debug, Default)]
pub struct AttributeCache {
    entries: Mutex<HashMap<(String, String, String), String>>,
}

impl AttributeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Expands `${VAR}` and `$fn(args)` occurrences in `input`.
    pub fn expand(
        &self,
        project: &Project,
        config: &BuildConfig,
        package_id: &str,
        input: &str,
    ) -> Result<String> {
        let key = (project.id.clone(), package_id.to_string(), input.to_string());
        if let Some(cached) = self.entries.lock().unwrap().get(&key) {
            return Ok(cached.clone());
        }
        let expanded = expand_str(project, config, input)?;
        self.entries.lock().unwrap().insert(key, expanded.clone());
        Ok(expanded)
    }
}

static VAR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap());
static FN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$([A-Za-z_][A-Za-z0-9_]*)\(([^()]*)\)").unwrap());

fn expand_str(project: &Project, config: &BuildConfig, input: &str) -> Result<String> {
    check_balanced(input)?;

    // Functions first (`$fn(args)`), then plain variables (`${VAR}`), so a
    // function argument that itself contains `${VAR}` expands correctly
    // in one left-to-right pass over each kind.
    let after_fns = replace_all_fallible(&FN_RE, input, |caps| {
        let name = &caps[1];
        let args_str = &caps[2];
        let args: Vec<String> = if args_str.trim().is_empty() {
            Vec::new()
        } else {
            args_str.split(',').map(|s| s.trim().to_string()).collect()
        };
        let funcs = builtin_functions();
        let f = funcs.get(name).ok_or_else(|| Error::UnknownFunction(name.to_string()))?;
        f(project, config, &args)
    })?;

    replace_all_fallible(&VAR_RE, &after_fns, |caps| {
        let name = &caps[1];
        config
            .get_variable(name)
            .ok_or_else(|| Error::UnknownVariable(name.to_string()))
    })
}

fn check_balanced(input: &str) -> Result<()> {
    let mut chars = input.char_indices().peekable();
    while let Some((_, c)) = chars.next() {
        if c != '$' {
            continue;
        }
        match chars.peek() {
            Some((_, '{')) => {
                if !input[input.find('$').unwrap_or(0)..].contains('}') {
                    return Err(Error::UnterminatedExpansion(input.to_string()));
                }
            }
            Some((_, c2)) if c2.is_alphabetic() || *c2 == '_' => {
                // Could be a function call; unterminated only if it opens a
                // `(` with no matching `)`.
                let rest = &input[chars.peek().map(|(i, _)| *i).unwrap_or(input.len())..];
                if let Some(open) = rest.find('(') {
                    if !rest[open..].contains(')') {
                        return Err(Error::UnterminatedExpansion(input.to_string()));
                    }
                }
            }
            _ => {}
        }
    }
    Ok(())
}

/// Like `Regex::replace_all`, but the replacement closure can fail.
fn replace_all_fallible<F>(re: &Regex, input: &str, mut f: F) -> Result<String>
where
    F: FnMut(&regex::Captures) -> Result<String>,
{
    let mut out = String::with_capacity(input.len());
    let mut last = 0;
    for caps in re.captures_iter(input) {
        let m = caps.get(0).unwrap();
        out.push_str(&input[last..m.start()]);
        out.push_str(&f(&caps)?);
        last = m.end();
    }
    out.push_str(&input[last..]);
    Ok(out)
}

/// Parses a `serde_json::Value` (expected to be an object) into a list of
/// attributes, recursively expanding string leaves.
pub fn parse_attributes(
    cache: &AttributeCache,
    project: &Project,
    config: &BuildConfig,
    package_id: &str,
    value: &serde_json::Value,
) -> Result<Vec<Attribute>> {
    let object = value.as_object().cloned().unwrap_or_default();
    let mut attributes = Vec::with_capacity(object.len());
    for (name, v) in object {
        let value = parse_value(cache, project, config, package_id, &v)?;
        attributes.push(Attribute { name, value });
    }
    Ok(attributes)
}

fn parse_value(
    cache: &AttributeCache,
    project: &Project,
    config: &BuildConfig,
    package_id: &str,
    value: &serde_json::Value,
) -> Result<AttributeValue> {
    match value {
        serde_json::Value::String(s) => {
            Ok(AttributeValue::String(cache.expand(project, config, package_id, s)?))
        }
        serde_json::Value::Bool(b) => Ok(AttributeValue::Bool(*b)),
        serde_json::Value::Number(n) => {
            Ok(AttributeValue::Number(n.as_f64().unwrap_or_default()))
        }
        serde_json::Value::Array(items) => {
            let mut list = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                let value = parse_value(cache, project, config, package_id, item)?;
                list.push(Attribute { name: i.to_string(), value });
            }
            Ok(AttributeValue::List(list))
        }
        serde_json::Value::Object(_) => {
            let nested = parse_attributes(cache, project, config, package_id, value)?;
            Ok(AttributeValue::List(nested))
        }
        serde_json::Value::Null => Ok(AttributeValue::String(String::new())),
    }
}

impl Attribute {
    pub fn as_str(&self) -> Option<&str> {
        match &self.value {
            AttributeValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match &self.value {
            AttributeValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project_util::TempProject;

    fn project() -> Project {
        TempProject::with_manifest("foo", serde_json::json!({})).unwrap().load_project().unwrap()
    }

    #[test]
    fn expands_builtin_functions() {
        let project = project();
        let config = BuildConfig::new("linux-x64", "debug");
        let cache = AttributeCache::new();
        let out = cache.expand(&project, &config, "cc", "platform=$os() cfg=$cfg()").unwrap();
        assert_eq!(out, "platform=linux-x64 cfg=debug");
    }

    #[test]
    fn expands_config_variable_then_falls_back_to_environment() {
        let project = project();
        let config = BuildConfig::new("linux-x64", "debug").with_variable("PREFIX", "/opt/x");
        let cache = AttributeCache::new();
        let out = cache.expand(&project, &config, "cc", "${PREFIX}/bin").unwrap();
        assert_eq!(out, "/opt/x/bin");
    }

    #[test]
    fn unknown_variable_is_fatal() {
        let project = project();
        let config = BuildConfig::default();
        let cache = AttributeCache::new();
        let err = cache.expand(&project, &config, "cc", "${DOES_NOT_EXIST_XYZ}").unwrap_err();
        assert!(matches!(err, Error::UnknownVariable(name) if name == "DOES_NOT_EXIST_XYZ"));
    }

    #[test]
    fn unknown_function_is_fatal() {
        let project = project();
        let config = BuildConfig::default();
        let cache = AttributeCache::new();
        let err = cache.expand(&project, &config, "cc", "$nope()").unwrap_err();
        assert!(matches!(err, Error::UnknownFunction(name) if name == "nope"));
    }

    #[test]
    fn expansion_is_memoised_per_project_package_input_triple() {
        let project = project();
        let config = BuildConfig::new("linux-x64", "debug");
        let cache = AttributeCache::new();
        cache.expand(&project, &config, "cc", "$os()").unwrap();
        assert_eq!(cache.entries.lock().unwrap().len(), 1);
        // Same triple again must not grow the cache.
        cache.expand(&project, &config, "cc", "$os()").unwrap();
        assert_eq!(cache.entries.lock().unwrap().len(), 1);
        // A different package id is a distinct cache entry.
        cache.expand(&project, &config, "ld", "$os()").unwrap();
        assert_eq!(cache.entries.lock().unwrap().len(), 2);
    }

    #[test]
    fn parse_attributes_expands_nested_strings_and_lists() {
        let project = project();
        let config = BuildConfig::new("linux-x64", "debug");
        let cache = AttributeCache::new();
        let raw = serde_json::json!({
            "std": "c99",
            "flags": ["-O2", "-D$cfg()"],
            "debug": true,
        });
        let attrs = parse_attributes(&cache, &project, &config, "cc", &raw).unwrap();
        let std = attrs.iter().find(|a| a.name == "std").unwrap();
        assert_eq!(std.as_str(), Some("c99"));
        let flags = attrs.iter().find(|a| a.name == "flags").unwrap();
        match &flags.value {
            AttributeValue::List(items) => {
                assert_eq!(items[0].as_str(), Some("-O2"));
                assert_eq!(items[1].as_str(), Some("-Ddebug"));
            }
            other => panic!("expected a list, got {other:?}"),
        }
        let debug = attrs.iter().find(|a| a.name == "debug").unwrap();
        assert_eq!(debug.as_bool(), Some(true));
    }
}
