#![deny(missing_docs)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! Kubernetes target discovery for metrics collection agents.
//!
//! Pods, services and nodes come and go. This crate turns their lifecycle
//! events into scrape targets for a metrics collector: each resource is matched
//! against configured rules (or, failing that, its `prometheus.io/*`
//! annotations), encoded into a provider-specific source configuration and
//! handed to a user-provided [`ProviderHandler`].
//!
//! # Features
//!
//! - **Rule-based discovery**: Select resources by kind, namespace, labels and
//!   name; the earliest matching rule wins
//! - **Annotation discovery**: Unmatched resources annotated with
//!   `prometheus.io/scrape: "true"` become prometheus targets
//! - **Prometheus and telegraf targets**: HTTP scrape URLs or telegraf input
//!   plugin configurations with `${host}`/`${port}` substituted
//! - **Ordered processing**: One bounded queue and one consumer, so events for
//!   an object are applied in the order they were submitted
//!
//! # Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use kube_target_discovery::{Discoverer, DiscoveryConfig, Kind, ProviderHandler, Target, watch};
//!
//! struct Scraper;
//!
//! impl ProviderHandler for Scraper {
//!     fn add_or_replace(&self, target: &Target) {
//!         // start or reconfigure collection for target.name()
//!     }
//!
//!     fn remove(&self, name: &str) {
//!         // stop collection
//!     }
//! }
//!
//! let config = DiscoveryConfig::from_yaml(&std::fs::read_to_string("discovery.yaml")?)?;
//! let registry = prometheus::Registry::new();
//! let discoverer = Arc::new(Discoverer::new(Arc::new(Scraper), &config, &registry)?);
//!
//! // Feed it from the cluster, or call discover/delete from your own watch.
//! let watches = watch::watch_cluster(&discoverer, &[Kind::Pod]).await?;
//! ```

mod config;
mod discoverer;
mod encoding;
mod error;
mod filter;
mod handler;
mod metrics;
mod registry;
mod resource;
mod target;
pub mod watch;

pub use config::{DEFAULT_QUEUE_CAPACITY, DiscoveryConfig, ProviderType, RuleConfig, Selectors};
pub use discoverer::Discoverer;
pub use encoding::{
    Encoder, INCLUDE_LABELS_ANNOTATION, PATH_ANNOTATION, PORT_ANNOTATION, PREFIX_ANNOTATION,
    PrometheusEncoder, SCHEME_ANNOTATION, SCRAPE_ANNOTATION, TelegrafEncoder, process_tags,
    resource_tags,
};
pub use error::{ConfigError, EncodeError, Error, Result};
pub use filter::ResourceFilter;
pub use handler::{Handler, ProviderHandler, RegistrationHook, TargetHandler, scrape_disabled};
pub use metrics::DiscoveryMetrics;
pub use registry::Registry;
pub use resource::{Kind, Resource, Status, resource_name};
pub use target::{Discovered, HttpClientConfig, PrometheusSource, Target, TelegrafSource, TlsConfig};
