//! Compiled resource selectors.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::config::RuleConfig;
use crate::error::ConfigError;
use crate::resource::{Kind, Resource};

// Kubernetes label keys: an optional DNS subdomain prefix and a name segment.
static LABEL_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9]([-A-Za-z0-9_.]{0,61}[A-Za-z0-9])?$").expect("valid label name regex")
});

static LABEL_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$")
        .expect("valid label prefix regex")
});

/// Predicate over a resource's kind, namespace, labels and name.
///
/// Built once per rule; evaluation is pure.
#[derive(Clone, Debug)]
pub struct ResourceFilter {
    kind: Kind,
    namespaces: Vec<String>,
    labels: BTreeMap<String, Vec<String>>,
    name: Option<Regex>,
}

impl ResourceFilter {
    /// Compiles the selectors of a rule.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for an unknown resource kind, an invalid label
    /// key or an invalid name pattern.
    pub fn new(rule: &RuleConfig) -> Result<Self, ConfigError> {
        let selectors = &rule.selectors;
        let kind = selectors.resource_type.parse()?;

        if let Some(key) = selectors.labels.keys().find(|k| !valid_label_key(k)) {
            return Err(ConfigError::InvalidLabelKey(key.clone()));
        }

        // The pattern must match the whole name.
        let name = selectors
            .name
            .as_deref()
            .map(|pattern| {
                Regex::new(&format!("^(?:{pattern})$")).map_err(|source| {
                    ConfigError::InvalidNamePattern {
                        pattern: pattern.to_string(),
                        source,
                    }
                })
            })
            .transpose()?;

        let mut namespaces = selectors.namespaces.clone();
        namespaces.sort();
        namespaces.dedup();

        let mut labels = selectors.labels.clone();
        for values in labels.values_mut() {
            values.sort();
            values.dedup();
        }

        Ok(Self {
            kind,
            namespaces,
            labels,
            name,
        })
    }

    /// Returns the kind this filter selects.
    #[must_use]
    pub fn kind(&self) -> Kind {
        self.kind
    }

    /// Returns `true` if the resource satisfies every selector.
    #[must_use]
    pub fn matches(&self, resource: &Resource) -> bool {
        resource.kind == self.kind
            && self.matches_namespace(resource.namespace())
            && self.matches_labels(resource)
            && self
                .name
                .as_ref()
                .is_none_or(|name| name.is_match(resource.name()))
    }

    fn matches_namespace(&self, namespace: &str) -> bool {
        self.namespaces.is_empty() || self.namespaces.iter().any(|ns| ns == namespace)
    }

    fn matches_labels(&self, resource: &Resource) -> bool {
        self.labels.iter().all(|(key, values)| {
            resource
                .label(key)
                .is_some_and(|value| values.is_empty() || values.iter().any(|v| v == value))
        })
    }

    /// Returns `true` if both filters select exactly the same resources by
    /// construction.
    pub(crate) fn same_selection(&self, other: &Self) -> bool {
        self.kind == other.kind
            && self.namespaces == other.namespaces
            && self.labels == other.labels
            && self.name.as_ref().map(Regex::as_str) == other.name.as_ref().map(Regex::as_str)
    }

    /// Returns `true` unless the filters provably select disjoint resources.
    pub(crate) fn may_overlap(&self, other: &Self) -> bool {
        if self.kind != other.kind {
            return false;
        }

        let namespaces_disjoint = !self.namespaces.is_empty()
            && !other.namespaces.is_empty()
            && !self.namespaces.iter().any(|ns| other.namespaces.contains(ns));
        if namespaces_disjoint {
            return false;
        }

        // A label required by both with no value in common can never match twice.
        !self.labels.iter().any(|(key, values)| {
            other.labels.get(key).is_some_and(|others| {
                !values.is_empty()
                    && !others.is_empty()
                    && !values.iter().any(|v| others.contains(v))
            })
        })
    }
}

fn valid_label_key(key: &str) -> bool {
    match key.rsplit_once('/') {
        Some((prefix, name)) => {
            prefix.len() <= 253 && LABEL_PREFIX.is_match(prefix) && LABEL_NAME.is_match(name)
        }
        None => LABEL_NAME.is_match(key),
    }
}
