//! Encoder for telegraf input plugins.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use super::{Encoder, resource_tags};
use crate::config::RuleConfig;
use crate::error::EncodeError;
use crate::resource::{Kind, resource_name};
use crate::target::{Discovered, TelegrafSource, Target};

const HOST_PLACEHOLDER: &str = "${host}";
const PORT_PLACEHOLDER: &str = "${port}";

/// Builds [`TelegrafSource`] targets for one plugin.
///
/// Telegraf targets only come from rules; there is no annotation-based
/// discovery for them.
#[derive(Clone, Debug)]
pub struct TelegrafEncoder {
    plugin: String,
}

impl TelegrafEncoder {
    /// Creates an encoder for the named telegraf input plugin.
    #[must_use]
    pub fn new(plugin: impl Into<String>) -> Self {
        Self {
            plugin: plugin.into(),
        }
    }

    /// Returns the plugin name.
    #[must_use]
    pub fn plugin(&self) -> &str {
        &self.plugin
    }
}

impl Encoder for TelegrafEncoder {
    fn encode(
        &self,
        address: &str,
        kind: Kind,
        meta: &ObjectMeta,
        rule: Option<&RuleConfig>,
    ) -> Result<Option<Target>, EncodeError> {
        let Some(rule) = rule else {
            return Ok(None);
        };

        if address.is_empty() {
            return Ok(None);
        }

        let name = resource_name(kind, meta);
        let conf = rule.conf.as_deref().unwrap_or_default();
        let conf = match rule.port {
            Some(port) => conf.replace(PORT_PLACEHOLDER, &port.to_string()),
            None if conf.contains(PORT_PLACEHOLDER) => {
                return Err(EncodeError::MissingPort { target: name });
            }
            None => conf.to_string(),
        };

        Ok(Some(Target::Telegraf(TelegrafSource {
            name,
            plugin: self.plugin.clone(),
            conf: conf.replace(HOST_PLACEHOLDER, address),
            prefix: rule.prefix.clone().unwrap_or_default(),
            tags: resource_tags(kind, meta, rule.include_labels.unwrap_or(true)),
            discovered: Discovered::Rule,
        })))
    }
}
