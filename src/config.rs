//! The active platform/configuration pair threaded through the engine and
//! pipeline, and the variable overlay consulted during attribute expansion.
//!
//! Analogue of the teacher crate's `ProjectPathsConfig`/`SolcConfig` pair: a
//! small, serde-friendly value rather than a grab-bag of loose parameters.

use std::collections::BTreeMap;

/// Default build configuration name, matching the original tool's default.
pub const DEFAULT_CONFIGURATION: &str = "debug";

#[derive(Debug, Clone)]
pub struct BuildConfig {
    /// e.g. `"linux"`, `"darwin"`, `"windows"`.
    pub platform: String,
    /// e.g. `"debug"`, `"release"`.
    pub configuration: String,
    /// Variable overlay consulted before the process environment during
    /// `${VAR}` expansion.
    pub variables: BTreeMap<String, String>,
}

impl BuildConfig {
    pub fn new(platform: impl Into<String>, configuration: impl Into<String>) -> Self {
        Self { platform: platform.into(), configuration: configuration.into(), variables: BTreeMap::new() }
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    /// The `<platform>-<configuration>` directory qualifier used for `bin`
    /// and cache paths.
    pub fn qualifier(&self) -> String {
        format!("{}-{}", self.platform, self.configuration)
    }

    pub fn get_variable(&self, name: &str) -> Option<String> {
        self.variables.get(name).cloned().or_else(|| std::env::var(name).ok())
    }
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self::new(current_platform(), DEFAULT_CONFIGURATION)
    }
}

/// Best-effort platform string, mirroring `UT_PLATFORM_STRING` in the
/// original tool (`<os>-<arch>`).
pub fn current_platform() -> String {
    format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH)
}
