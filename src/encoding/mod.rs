//! Encoding of resources into provider-specific targets.
//!
//! Each provider family has one [`Encoder`]. Encoders are pure: they only look
//! at the resource address, kind, metadata and the matched rule, and never
//! perform I/O.
//!
//! Every descriptor field is resolved independently, with this precedence:
//!
//! 1. resource annotation (annotation mode only)
//! 2. rule field
//! 3. built-in default

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use crate::config::RuleConfig;
use crate::error::EncodeError;
use crate::resource::{self, Kind};
use crate::target::Target;

mod prometheus;
mod telegraf;

pub use prometheus::{
    INCLUDE_LABELS_ANNOTATION, PATH_ANNOTATION, PORT_ANNOTATION, PREFIX_ANNOTATION,
    PrometheusEncoder, SCHEME_ANNOTATION, SCRAPE_ANNOTATION,
};
pub use telegraf::TelegrafEncoder;

/// Maps a resource to a provider-specific target.
pub trait Encoder: Send + Sync {
    /// Encodes a resource.
    ///
    /// `rule` is `Some` when the resource matched a discovery rule and `None`
    /// when it is discovered through annotations. Returns `Ok(None)` when the
    /// resource should not be a target.
    ///
    /// # Errors
    ///
    /// Returns [`EncodeError`] when the resource or rule carries settings that
    /// cannot be turned into a valid target.
    fn encode(
        &self,
        address: &str,
        kind: Kind,
        meta: &ObjectMeta,
        rule: Option<&RuleConfig>,
    ) -> Result<Option<Target>, EncodeError>;
}

/// Resolves one descriptor field.
fn param<'a>(
    meta: &'a ObjectMeta,
    annotation: &str,
    rule_value: Option<&'a str>,
    default: &'a str,
    use_annotations: bool,
) -> &'a str {
    let annotated = if use_annotations {
        resource::annotation(meta, annotation).filter(|v| !v.is_empty())
    } else {
        None
    };

    annotated
        .or_else(|| rule_value.filter(|v| !v.is_empty()))
        .unwrap_or(default)
}

/// Builds the tags of a target: the resource labels (when included) overlaid
/// with the identity tags of its kind, without empty values.
#[must_use]
pub fn resource_tags(
    kind: Kind,
    meta: &ObjectMeta,
    include_labels: bool,
) -> BTreeMap<String, String> {
    let mut tags = BTreeMap::new();

    if include_labels {
        for (key, value) in resource::labels(meta) {
            tags.insert(key.clone(), value.clone());
        }
    }

    let name = meta.name.clone().unwrap_or_default();
    let namespace = meta.namespace.clone().unwrap_or_default();
    match kind {
        Kind::Pod => {
            tags.insert("pod".to_string(), name);
            tags.insert("namespace".to_string(), namespace);
        }
        Kind::Service => {
            tags.insert("service".to_string(), name);
            tags.insert("namespace".to_string(), namespace);
        }
        Kind::Node => {
            tags.insert("node".to_string(), name);
        }
    }

    process_tags(&mut tags);
    tags
}

/// Removes every tag with an empty value.
///
/// Metric validation downstream rejects points carrying empty tag values.
pub fn process_tags(tags: &mut BTreeMap<String, String>) {
    tags.retain(|_, value| !value.is_empty());
}
