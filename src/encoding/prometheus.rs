//! Encoder for HTTP-scraped prometheus endpoints.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use super::{Encoder, param, resource_tags};
use crate::config::RuleConfig;
use crate::error::EncodeError;
use crate::resource::{self, Kind, resource_name};
use crate::target::{Discovered, HttpClientConfig, PrometheusSource, Target};

/// Enables annotation-based discovery when set to `"true"`.
pub const SCRAPE_ANNOTATION: &str = "prometheus.io/scrape";
/// Overrides the scrape scheme.
pub const SCHEME_ANNOTATION: &str = "prometheus.io/scheme";
/// Overrides the scrape path.
pub const PATH_ANNOTATION: &str = "prometheus.io/path";
/// Overrides the scrape port.
pub const PORT_ANNOTATION: &str = "prometheus.io/port";
/// Sets the metric prefix.
pub const PREFIX_ANNOTATION: &str = "prometheus.io/prefix";
/// Set to `"false"` to keep resource labels out of the tags.
pub const INCLUDE_LABELS_ANNOTATION: &str = "prometheus.io/includeLabels";

const DEFAULT_SCHEME: &str = "http";
const DEFAULT_PATH: &str = "/metrics";
const DEFAULT_PORT: &str = "9102";

/// Builds [`PrometheusSource`] targets.
#[derive(Clone, Copy, Debug, Default)]
pub struct PrometheusEncoder;

impl Encoder for PrometheusEncoder {
    fn encode(
        &self,
        address: &str,
        kind: Kind,
        meta: &ObjectMeta,
        rule: Option<&RuleConfig>,
    ) -> Result<Option<Target>, EncodeError> {
        if address.is_empty() {
            return Ok(None);
        }

        // Without a rule, only explicitly annotated resources are scraped.
        let use_annotations = rule.is_none();
        if use_annotations && resource::annotation(meta, SCRAPE_ANNOTATION) != Some("true") {
            return Ok(None);
        }

        let rule_port = rule.and_then(|r| r.port).map(|p| p.to_string());
        let rule_include_labels = rule
            .and_then(|r| r.include_labels)
            .map(|include| if include { "true" } else { "false" });

        let scheme = param(
            meta,
            SCHEME_ANNOTATION,
            rule.and_then(|r| r.scheme.as_deref()),
            DEFAULT_SCHEME,
            use_annotations,
        );
        let path = param(
            meta,
            PATH_ANNOTATION,
            rule.and_then(|r| r.path.as_deref()),
            DEFAULT_PATH,
            use_annotations,
        );
        let port = param(
            meta,
            PORT_ANNOTATION,
            rule_port.as_deref(),
            DEFAULT_PORT,
            use_annotations,
        );
        let prefix = param(
            meta,
            PREFIX_ANNOTATION,
            rule.and_then(|r| r.prefix.as_deref()),
            "",
            use_annotations,
        );
        let include_labels = param(
            meta,
            INCLUDE_LABELS_ANNOTATION,
            rule_include_labels,
            "true",
            use_annotations,
        ) != "false";

        let name = resource_name(kind, meta);
        if port.parse::<u16>().is_err() {
            return Err(EncodeError::InvalidPort {
                target: name,
                port: port.to_string(),
            });
        }

        let http_client = match rule.and_then(|r| r.conf.as_deref()) {
            Some(conf) if !conf.trim().is_empty() => serde_yaml::from_str::<HttpClientConfig>(conf)
                .map_err(|source| EncodeError::TransportSettings {
                    target: name.clone(),
                    source,
                })?,
            _ => HttpClientConfig::default(),
        };

        Ok(Some(Target::Prometheus(PrometheusSource {
            url: scrape_url(scheme, address, port, path),
            source: meta.name.clone().unwrap_or_default(),
            prefix: prefix.to_string(),
            tags: resource_tags(kind, meta, include_labels),
            discovered: if use_annotations {
                Discovered::Annotation
            } else {
                Discovered::Rule
            },
            http_client,
            name,
        })))
    }
}

/// Formats `scheme://host:port/path`, bracketing IPv6 hosts.
fn scrape_url(scheme: &str, host: &str, port: &str, path: &str) -> String {
    let host = if host.contains(':') {
        format!("[{host}]")
    } else {
        host.to_string()
    };
    let slash = if path.starts_with('/') { "" } else { "/" };
    format!("{scheme}://{host}:{port}{slash}{path}")
}
