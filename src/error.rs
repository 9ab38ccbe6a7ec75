//! The crate's single error type.
//!
//! Mirrors the teacher crate's `SolcError`: one flat `thiserror` enum rather
//! than a hierarchy of per-module error types, so callers can match on a
//! single `Result` alias throughout the pipeline.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("could not find file '{0}'")]
    ManifestNotFound(PathBuf),

    #[error("failed to parse '{path}': {source}")]
    ManifestJson {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to parse '{0}': expected a JSON object")]
    ManifestNotAnObject(PathBuf),

    #[error("failed to parse '{0}': missing 'id'")]
    MissingId(PathBuf),

    #[error("project id '{0}' contains invalid characters")]
    InvalidId(String),

    #[error("project type '{0}' is not valid")]
    InvalidType(String),

    #[error("unknown member '{0}' in project.json")]
    UnknownValueMember(String),

    #[error("dependee config cannot override 'value', 'type' or 'id'")]
    DependeeReservedKey,

    #[error("missing dependency '{0}'")]
    MissingDependency(String),

    #[error("failed to locate path for dependency '{0}'")]
    DependencyNotLocatable(String),

    #[error("failed to locate driver package '{0}'")]
    DriverNotLocatable(String),

    #[error("failed to load driver library for '{0}': {1}")]
    DriverLoadFailed(String, String),

    #[error("driver '{0}' failed to initialize")]
    DriverInitFailed(String),

    #[error("node '{0}' not found")]
    NodeNotFound(String),

    #[error("node reference '{reference}' in rule '{rule}' does not resolve to a pattern node")]
    InvalidNodeReference { rule: String, reference: String },

    #[error("cycle detected in rule graph at node '{0}'")]
    Cycle(String),

    #[error("no targets for rule '{0}'")]
    NoTargetsForRule(String),

    #[error("failed to map file '{0}'")]
    MapFailed(String),

    #[error("command for task '{0}' failed")]
    ActionFailed(String),

    #[error("rule failed")]
    RuleFailed,

    #[error("unknown variable '{0}' in attribute expansion")]
    UnknownVariable(String),

    #[error("unknown function '{0}' in attribute expansion")]
    UnknownFunction(String),

    #[error("unterminated expansion in '{0}'")]
    UnterminatedExpansion(String),

    #[error("attribute '{0}' has unexpected type")]
    AttributeTypeMismatch(String),

    #[error("invalid glob pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    #[error("io error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io { path: path.into(), source }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
