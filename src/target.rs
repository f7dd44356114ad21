//! Encoded metric-source targets.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Provenance of a target.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Discovered {
    /// Built from a matching discovery rule.
    Rule,
    /// Built from resource annotations.
    Annotation,
    /// Configured statically, outside of discovery.
    #[default]
    Static,
}

impl Discovered {
    /// Returns the marker as recorded in tags and metrics.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rule => "rule",
            Self::Annotation => "annotation",
            Self::Static => "static",
        }
    }
}

impl fmt::Display for Discovered {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A live metric source derived from one cluster resource.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Target {
    /// An HTTP endpoint exposing prometheus metrics.
    Prometheus(PrometheusSource),
    /// A telegraf input plugin pointed at the resource.
    Telegraf(TelegrafSource),
}

impl Target {
    /// Returns the canonical target name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Prometheus(source) => &source.name,
            Self::Telegraf(source) => &source.name,
        }
    }

    /// Returns the sanitized tags attached to collected metrics.
    #[must_use]
    pub fn tags(&self) -> &BTreeMap<String, String> {
        match self {
            Self::Prometheus(source) => &source.tags,
            Self::Telegraf(source) => &source.tags,
        }
    }

    /// Returns the provenance marker.
    #[must_use]
    pub fn discovered(&self) -> Discovered {
        match self {
            Self::Prometheus(source) => source.discovered,
            Self::Telegraf(source) => source.discovered,
        }
    }

    /// Returns the provider family name.
    #[must_use]
    pub fn provider(&self) -> &'static str {
        match self {
            Self::Prometheus(_) => "prometheus",
            Self::Telegraf(_) => "telegraf",
        }
    }
}

/// Scrape configuration of a prometheus endpoint.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct PrometheusSource {
    /// Canonical target name.
    pub name: String,
    /// Source reported with collected metrics.
    pub source: String,
    /// Scrape URL (`scheme://host:port/path`).
    pub url: String,
    /// Metric name prefix.
    pub prefix: String,
    /// Tags added to every collected metric.
    pub tags: BTreeMap<String, String>,
    /// Provenance marker.
    pub discovered: Discovered,
    /// Transport settings for the scrape.
    pub http_client: HttpClientConfig,
}

/// HTTP transport settings, in prometheus `http_config` layout.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpClientConfig {
    /// File holding the bearer token sent with each scrape.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bearer_token_file: Option<String>,
    /// TLS settings.
    pub tls_config: TlsConfig,
}

/// TLS settings of a scrape.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// CA certificate used to verify the server.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ca_file: Option<String>,
    /// Client certificate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cert_file: Option<String>,
    /// Client key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_file: Option<String>,
    /// Server name used for verification.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
    /// Disables server certificate verification.
    pub insecure_skip_verify: bool,
}

/// Configuration of a telegraf input plugin instance.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct TelegrafSource {
    /// Canonical target name.
    pub name: String,
    /// Telegraf input plugin name.
    pub plugin: String,
    /// Plugin configuration body, with address placeholders substituted.
    pub conf: String,
    /// Metric name prefix.
    pub prefix: String,
    /// Tags added to every collected metric.
    pub tags: BTreeMap<String, String>,
    /// Provenance marker.
    pub discovered: Discovered,
}
