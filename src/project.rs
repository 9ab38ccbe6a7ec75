//! The project model and `project.json` manifest parsing.

use crate::attributes::{parse_attributes, Attribute, AttributeCache};
use crate::config::BuildConfig;
use crate::error::{Error, Result};
use crate::services::Filesystem;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectType {
    Application,
    Package,
    Tool,
    Template,
}

impl ProjectType {
    fn parse(raw: &str) -> Result<Self> {
        match raw {
            "application" => Ok(ProjectType::Application),
            "package" => Ok(ProjectType::Package),
            "tool" => Ok(ProjectType::Tool),
            "template" => Ok(ProjectType::Template),
            "executable" => {
                tracing::warn!(type = raw, "project type 'executable' is deprecated, use 'application'");
                Ok(ProjectType::Application)
            }
            "library" => {
                tracing::warn!(type = raw, "project type 'library' is deprecated, use 'package'");
                Ok(ProjectType::Package)
            }
            other => Err(Error::InvalidType(other.to_string())),
        }
    }
}

/// A single driver's section of the manifest: the raw JSON as written, plus
/// its attributes once evaluated against a [`BuildConfig`].
#[derive(Debug, Clone)]
pub struct ProjectDriverBinding {
    pub driver_id: String,
    pub raw_json: serde_json::Value,
    pub attributes: Vec<Attribute>,
}

/// A parsed `project.json`, plus the build-state fields the engine and
/// pipeline mutate as the project moves through a build.
#[derive(Debug, Clone)]
pub struct Project {
    // Identity
    pub id: String,
    pub id_underscore: String,
    pub id_dash: String,
    pub id_base: String,

    // Classification
    pub project_type: ProjectType,
    pub public: bool,
    pub keep_binary: bool,
    pub bake_extension: bool,

    // Declared values
    pub author: Option<String>,
    pub description: Option<String>,
    pub version: Option<String>,
    pub repository: Option<String>,
    pub language: String,

    // Dependencies
    pub use_: Vec<String>,
    pub use_private: Vec<String>,
    pub use_build: Vec<String>,
    pub use_runtime: Vec<String>,
    pub link: Vec<String>,

    // Roots
    pub sources: Vec<String>,
    pub includes: Vec<String>,

    // Driver bindings, in manifest declaration order.
    pub drivers: Vec<ProjectDriverBinding>,

    // Computed paths, filled in by the pipeline once the project root and
    // build config are known.
    pub root: PathBuf,
    pub artefact: Option<String>,
    pub artefact_path: Option<PathBuf>,
    pub artefact_file: Option<PathBuf>,
    pub bin_path: Option<PathBuf>,
    pub cache_path: Option<PathBuf>,

    // Mutable build state.
    pub error: bool,
    pub freshly_baked: bool,
    pub changed: bool,
    pub artefact_outdated: bool,
    pub sources_outdated: bool,
    pub unresolved_dependencies: usize,
    pub dependents: Vec<String>,
    pub built: bool,
    pub files_to_clean: Vec<PathBuf>,
}

static ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_/-]+$").unwrap());

const RESERVED_VALUE_KEYS: &[&str] = &[
    "public",
    "author",
    "description",
    "version",
    "repository",
    "language",
    "use",
    "use_private",
    "use_build",
    "use_runtime",
    "link",
    "sources",
    "includes",
    "keep_binary",
];

impl Project {
    /// Parses `<root>/project.json` into a [`Project`], applying defaults
    /// and normalising identity fields. Does not evaluate attributes; call
    /// [`Project::load_driver_attributes`] once a [`BuildConfig`] and
    /// [`AttributeCache`] are available.
    pub fn load(fs: &dyn Filesystem, root: &Path) -> Result<Self> {
        let manifest_path = root.join("project.json");
        if !fs.file_test(&manifest_path) {
            return Err(Error::ManifestNotFound(manifest_path));
        }
        let contents = std::fs::read_to_string(&manifest_path).map_err(|e| Error::io(&manifest_path, e))?;
        let value: serde_json::Value = serde_json::from_str(&contents)
            .map_err(|source| Error::ManifestJson { path: manifest_path.clone(), source })?;
        let object = value.as_object().ok_or_else(|| Error::ManifestNotAnObject(manifest_path.clone()))?;

        let raw_id = object
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::MissingId(manifest_path.clone()))?
            .to_string();
        let (id, id_underscore, id_dash, id_base) = normalise_id(&raw_id)?;

        let project_type = match object.get("type").and_then(|v| v.as_str()) {
            Some(raw) => ProjectType::parse(raw)?,
            None => ProjectType::Package,
        };

        let empty = serde_json::Map::new();
        let values = object.get("value").and_then(|v| v.as_object()).unwrap_or(&empty);
        for key in values.keys() {
            if !RESERVED_VALUE_KEYS.contains(&key.as_str()) {
                return Err(Error::UnknownValueMember(key.clone()));
            }
        }

        let as_string_list = |key: &str| -> Vec<String> {
            values
                .get(key)
                .and_then(|v| v.as_array())
                .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
                .unwrap_or_default()
        };

        let sources = {
            let s = as_string_list("sources");
            if s.is_empty() {
                vec!["src".to_string()]
            } else {
                s
            }
        };
        let includes = {
            let i = as_string_list("includes");
            if i.is_empty() {
                vec!["include".to_string()]
            } else {
                i
            }
        };
        let language = values
            .get("language")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| "c".to_string());

        let mut drivers = Vec::new();
        for (key, raw_json) in object {
            if key == "id" || key == "type" || key == "value" {
                continue;
            }
            drivers.push(ProjectDriverBinding { driver_id: key.clone(), raw_json: raw_json.clone(), attributes: Vec::new() });
        }

        Ok(Project {
            id,
            id_underscore,
            id_dash,
            id_base,
            project_type,
            public: values.get("public").and_then(|v| v.as_bool()).unwrap_or(false),
            keep_binary: values.get("keep_binary").and_then(|v| v.as_bool()).unwrap_or(false),
            bake_extension: false,
            author: values.get("author").and_then(|v| v.as_str()).map(str::to_string),
            description: values.get("description").and_then(|v| v.as_str()).map(str::to_string),
            version: values.get("version").and_then(|v| v.as_str()).map(str::to_string),
            repository: values.get("repository").and_then(|v| v.as_str()).map(str::to_string),
            language,
            use_: as_string_list("use"),
            use_private: as_string_list("use_private"),
            use_build: as_string_list("use_build"),
            use_runtime: as_string_list("use_runtime"),
            link: as_string_list("link"),
            sources,
            includes,
            drivers,
            root: root.to_path_buf(),
            artefact: None,
            artefact_path: None,
            artefact_file: None,
            bin_path: None,
            cache_path: None,
            error: false,
            freshly_baked: false,
            changed: false,
            artefact_outdated: false,
            sources_outdated: false,
            unresolved_dependencies: 0,
            dependents: Vec::new(),
            built: false,
            files_to_clean: Vec::new(),
        })
    }

    /// Evaluates every driver binding's raw JSON into attributes. Must run
    /// after any dependee config has been merged in, so dependee-provided
    /// keys are present when expansion happens.
    pub fn load_driver_attributes(&mut self, cache: &AttributeCache, config: &BuildConfig) -> Result<()> {
        // `parse_attributes` takes `&Project`, but the loop below needs
        // `&mut self.drivers`; snapshot self once up front to break the
        // borrow rather than threading interior mutability through Project.
        let snapshot = self.clone();
        for binding in &mut self.drivers {
            binding.attributes = parse_attributes(cache, &snapshot, config, &binding.driver_id, &binding.raw_json)?;
        }
        Ok(())
    }

    pub fn driver(&self, driver_id: &str) -> Option<&ProjectDriverBinding> {
        self.drivers.iter().find(|d| d.driver_id == driver_id)
    }

    /// Merges a dependee's driver-keyed configuration into this project's
    /// matching binding, creating the binding if this project doesn't
    /// already declare one for that driver.
    pub fn merge_dependee_config(&mut self, value: &serde_json::Value) -> Result<()> {
        let object = value.as_object().cloned().unwrap_or_default();
        for (driver_id, dep_value) in object {
            if driver_id == "id" || driver_id == "type" || driver_id == "value" {
                return Err(Error::DependeeReservedKey);
            }
            match self.drivers.iter_mut().find(|d| d.driver_id == driver_id) {
                Some(binding) => merge_json(&mut binding.raw_json, &dep_value),
                None => self.drivers.push(ProjectDriverBinding {
                    driver_id,
                    raw_json: dep_value,
                    attributes: Vec::new(),
                }),
            }
        }
        Ok(())
    }

    pub fn all_dependencies(&self) -> impl Iterator<Item = &str> {
        self.use_
            .iter()
            .chain(self.use_private.iter())
            .chain(self.use_build.iter())
            .map(String::as_str)
    }

    pub fn unique_dependencies(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for dep in self.all_dependencies() {
            if seen.insert(dep.to_string()) {
                out.push(dep.to_string());
            }
        }
        out
    }
}

fn merge_json(dst: &mut serde_json::Value, src: &serde_json::Value) {
    match (dst, src) {
        (serde_json::Value::Object(dst_map), serde_json::Value::Object(src_map)) => {
            for (k, v) in src_map {
                merge_json(dst_map.entry(k.clone()).or_insert(serde_json::Value::Null), v);
            }
        }
        (dst, src) => *dst = src.clone(),
    }
}

fn normalise_id(raw: &str) -> Result<(String, String, String, String)> {
    let id_base = raw.rsplit('.').next().unwrap_or(raw).to_string();
    let id = raw.replace('.', "/");
    if !ID_RE.is_match(&id) {
        return Err(Error::InvalidId(raw.to_string()));
    }
    let id_underscore = raw.replace('.', "_");
    let id_dash = raw.replace('.', "-");
    Ok((id, id_underscore, id_dash, id_base))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project_util::TempProject;
    use crate::services::LocalFilesystem;

    #[test]
    fn identity_normalisation_matches_spec() {
        let (id, underscore, dash, base) = normalise_id("acme.widgets.core").unwrap();
        assert_eq!(id, "acme/widgets/core");
        assert_eq!(underscore, "acme_widgets_core");
        assert_eq!(dash, "acme-widgets-core");
        assert_eq!(base, "core");
    }

    #[test]
    fn invalid_id_characters_are_a_fatal_parse_error() {
        let project = TempProject::with_manifest("foo bar", serde_json::json!({})).unwrap();
        let err = project.load_project().unwrap_err();
        assert!(matches!(err, Error::InvalidId(id) if id == "foo bar"));
    }

    #[test]
    fn defaults_are_applied_when_value_is_absent() {
        let project = TempProject::with_manifest("foo", serde_json::json!({})).unwrap().load_project().unwrap();
        assert_eq!(project.sources, vec!["src".to_string()]);
        assert_eq!(project.includes, vec!["include".to_string()]);
        assert_eq!(project.language, "c");
        assert_eq!(project.project_type, ProjectType::Package);
        assert!(!project.public);
    }

    #[test]
    fn executable_and_library_are_deprecated_aliases() {
        let exe = TempProject::with_manifest("foo", serde_json::json!({ "type": "executable" }))
            .unwrap()
            .load_project()
            .unwrap();
        assert_eq!(exe.project_type, ProjectType::Application);

        let lib = TempProject::with_manifest("bar", serde_json::json!({ "type": "library" }))
            .unwrap()
            .load_project()
            .unwrap();
        assert_eq!(lib.project_type, ProjectType::Package);
    }

    #[test]
    fn unknown_value_member_is_a_fatal_parse_error() {
        let project = TempProject::with_manifest("foo", serde_json::json!({ "value": { "bogus": 1 } })).unwrap();
        let err = project.load_project().unwrap_err();
        assert!(matches!(err, Error::UnknownValueMember(key) if key == "bogus"));
    }

    #[test]
    fn unknown_top_level_keys_become_driver_bindings() {
        let project = TempProject::with_manifest("foo", serde_json::json!({ "c": { "std": "c99" } }))
            .unwrap()
            .load_project()
            .unwrap();
        let binding = project.driver("c").expect("c driver binding recorded");
        assert_eq!(binding.raw_json["std"], "c99");
    }

    #[test]
    fn missing_manifest_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Project::load(&LocalFilesystem, dir.path()).unwrap_err();
        assert!(matches!(err, Error::ManifestNotFound(_)));
    }

    #[test]
    fn merge_dependee_config_rejects_reserved_keys() {
        let mut project = TempProject::with_manifest("foo", serde_json::json!({})).unwrap().load_project().unwrap();
        let err = project.merge_dependee_config(&serde_json::json!({ "id": "nope" })).unwrap_err();
        assert!(matches!(err, Error::DependeeReservedKey));
    }

    #[test]
    fn merge_dependee_config_deep_merges_into_existing_binding() {
        let mut project = TempProject::with_manifest("foo", serde_json::json!({ "c": { "std": "c99" } }))
            .unwrap()
            .load_project()
            .unwrap();
        project.merge_dependee_config(&serde_json::json!({ "c": { "include": ["dep/include"] } })).unwrap();
        let binding = project.driver("c").unwrap();
        assert_eq!(binding.raw_json["std"], "c99");
        assert_eq!(binding.raw_json["include"][0], "dep/include");
    }

    #[test]
    fn unique_dependencies_dedupes_across_use_lists() {
        let project = TempProject::with_manifest(
            "foo",
            serde_json::json!({ "value": { "use": ["a", "b"], "use_private": ["b"], "use_build": ["c"] } }),
        )
        .unwrap()
        .load_project()
        .unwrap();
        assert_eq!(project.unique_dependencies(), vec!["a", "b", "c"]);
    }
}
