//! Discovery rule configuration.
//!
//! Rules are loaded once at startup, typically from the `discovery` section
//! of the collector configuration file:
//!
//! ```yaml
//! enableRuntimePlugins: true
//! plugins:
//!   - name: redis
//!     type: telegraf/redis
//!     selectors:
//!       resourceType: pod
//!       labels:
//!         app: [redis]
//!     port: 6379
//!     conf: |
//!       servers = ["tcp://${host}:${port}"]
//!   - name: kube-dns
//!     type: prometheus
//!     selectors:
//!       resourceType: service
//!       namespaces: [kube-system]
//!       name: kube-dns
//!     port: 9153
//! ```

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};
use crate::resource::Kind;

/// Default capacity of the discovery event queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

/// Top-level discovery configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryConfig {
    /// Whether resources matching no rule fall back to annotation-based discovery.
    #[serde(default = "default_true")]
    pub enable_runtime_plugins: bool,

    /// Capacity of the bounded event queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Discovery rules, in precedence order.
    #[serde(default)]
    pub plugins: Vec<RuleConfig>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enable_runtime_plugins: true,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            plugins: Vec::new(),
        }
    }
}

impl DiscoveryConfig {
    /// Parses a discovery configuration from YAML.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not valid YAML or does not have
    /// the expected shape. Individual rules are validated later, when the
    /// discoverer is built.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Appends a rule.
    #[must_use]
    pub fn rule(mut self, rule: RuleConfig) -> Self {
        self.plugins.push(rule);
        self
    }

    /// Enables or disables annotation-based fallback discovery.
    #[must_use]
    pub fn runtime_plugins(mut self, enabled: bool) -> Self {
        self.enable_runtime_plugins = enabled;
        self
    }

    /// Sets the event queue capacity.
    #[must_use]
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }
}

fn default_true() -> bool {
    true
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

/// Resource selection criteria of a rule.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Selectors {
    /// Kind of resource the rule applies to (`pod`, `service` or `node`).
    pub resource_type: String,

    /// Namespaces the rule applies to. Empty means any namespace.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub namespaces: Vec<String>,

    /// Required labels. An empty value list only requires the key to be present.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, Vec<String>>,

    /// Regular expression the whole object name must match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Static configuration of one discovery rule.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleConfig {
    /// Unique rule name.
    pub name: String,

    /// Provider type: `prometheus` or `telegraf/<plugin>`.
    #[serde(rename = "type")]
    pub plugin_type: String,

    /// Resource selection criteria.
    #[serde(default)]
    pub selectors: Selectors,

    /// URL scheme override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheme: Option<String>,

    /// URL path override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Port override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Metric name prefix.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,

    /// Whether resource labels become target tags. Defaults to `true`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_labels: Option<bool>,

    /// Raw provider settings: transport settings for prometheus, the plugin
    /// body for telegraf.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conf: Option<String>,
}

impl RuleConfig {
    /// Creates a rule selecting every resource of `kind`.
    #[must_use]
    pub fn new(name: impl Into<String>, plugin_type: impl Into<String>, kind: Kind) -> Self {
        Self {
            name: name.into(),
            plugin_type: plugin_type.into(),
            selectors: Selectors {
                resource_type: kind.as_str().to_string(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Restricts the rule to a namespace. May be called repeatedly.
    #[must_use]
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.selectors.namespaces.push(namespace.into());
        self
    }

    /// Requires a label to have one of the given values.
    #[must_use]
    pub fn label<I, S>(mut self, key: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.selectors
            .labels
            .insert(key.into(), values.into_iter().map(Into::into).collect());
        self
    }

    /// Requires the object name to match a regular expression.
    #[must_use]
    pub fn name_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.selectors.name = Some(pattern.into());
        self
    }

    /// Sets the URL scheme.
    #[must_use]
    pub fn scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = Some(scheme.into());
        self
    }

    /// Sets the URL path.
    #[must_use]
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Sets the port.
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Sets the metric prefix.
    #[must_use]
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Controls whether resource labels become tags.
    #[must_use]
    pub fn include_labels(mut self, include: bool) -> Self {
        self.include_labels = Some(include);
        self
    }

    /// Sets the raw provider settings.
    #[must_use]
    pub fn conf(mut self, conf: impl Into<String>) -> Self {
        self.conf = Some(conf.into());
        self
    }

    /// Resolves the provider family of this rule.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the type names no supported provider.
    pub fn provider_type(&self) -> std::result::Result<ProviderType, ConfigError> {
        self.plugin_type.parse()
    }
}

/// Provider family a rule feeds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProviderType {
    /// HTTP scrape of a prometheus endpoint.
    Prometheus,
    /// A telegraf input plugin, by plugin name.
    Telegraf(String),
}

impl FromStr for ProviderType {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        if s == "prometheus" {
            return Ok(Self::Prometheus);
        }

        match s.split_once('/') {
            Some(("telegraf", plugin)) if !plugin.trim().is_empty() => {
                Ok(Self::Telegraf(plugin.trim().to_string()))
            }
            Some(("telegraf", _)) => Err(ConfigError::MissingPlugin(s.to_string())),
            _ if s == "telegraf" => Err(ConfigError::MissingPlugin(s.to_string())),
            _ => Err(ConfigError::UnknownType(s.to_string())),
        }
    }
}
