//! Error types for target discovery.

use thiserror::Error;

/// Result type alias for discovery operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the discovery engine and its Kubernetes bridge.
#[derive(Error, Debug)]
pub enum Error {
    /// A discovery rule or the discovery configuration is invalid.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A resource could not be encoded into a target.
    #[error("encoding error: {0}")]
    Encode(#[from] EncodeError),

    /// YAML deserialization error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Kubernetes client error.
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Kubernetes watch stream error.
    #[error("Kubernetes watcher error: {0}")]
    Watch(#[from] kube::runtime::watcher::Error),

    /// Metric collector registration error.
    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

/// A discovery rule that cannot be loaded.
///
/// Rules failing with one of these are dropped at startup; the remaining
/// rules still load.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// The rule has no name.
    #[error("rule name must not be empty")]
    EmptyName,

    /// Another rule with the same name was declared earlier.
    #[error("duplicate rule name: {0}")]
    DuplicateName(String),

    /// The selector names a resource kind that is not supported.
    #[error("unknown resource kind: {0:?}")]
    UnknownKind(String),

    /// The rule type does not name a supported provider family.
    #[error("invalid plugin type: {0:?}")]
    UnknownType(String),

    /// A `telegraf/<plugin>` type without the plugin part.
    #[error("missing telegraf plugin name in type: {0:?}")]
    MissingPlugin(String),

    /// A label selector key is not a valid Kubernetes label key.
    #[error("invalid label selector key: {0:?}")]
    InvalidLabelKey(String),

    /// The name selector is not a valid regular expression.
    #[error("invalid name pattern {pattern:?}: {source}")]
    InvalidNamePattern {
        /// The offending pattern.
        pattern: String,
        /// The regex compilation error.
        source: regex::Error,
    },

    /// The rule selects exactly the same resources as an earlier rule.
    #[error("rule {rule} has the same selectors as rule {earlier}")]
    DuplicateSelector {
        /// The rejected rule.
        rule: String,
        /// The earlier rule that already owns the selection.
        earlier: String,
    },
}

/// A single resource that could not be turned into a target.
#[derive(Error, Debug)]
pub enum EncodeError {
    /// The port annotation or rule value is not a valid port number.
    #[error("target {target}: invalid port {port:?}")]
    InvalidPort {
        /// Canonical name of the target being built.
        target: String,
        /// The offending port value.
        port: String,
    },

    /// The plugin configuration references `${port}` but the rule sets no port.
    #[error("target {target}: configuration uses ${{port}} but the rule has no port")]
    MissingPort {
        /// Canonical name of the target being built.
        target: String,
    },

    /// The raw transport settings of the rule could not be parsed.
    #[error("target {target}: invalid transport settings: {source}")]
    TransportSettings {
        /// Canonical name of the target being built.
        target: String,
        /// The YAML parse error.
        source: serde_yaml::Error,
    },
}
