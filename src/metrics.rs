//! Discovery engine metrics.
//!
//! Collectors are created per engine and registered into a caller-supplied
//! [`prometheus::Registry`]; [`DiscoveryMetrics::unregister`] removes them again
//! when the engine shuts down.

use prometheus::core::Collector;
use prometheus::{IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry};

use crate::resource::Status;
use crate::target::Discovered;

const NAMESPACE: &str = "discovery";

/// Counters and gauges of one discovery engine.
#[derive(Clone, Debug)]
pub struct DiscoveryMetrics {
    events: IntCounterVec,
    registered: IntCounterVec,
    unregistered: IntCounterVec,
    encode_errors: IntCounterVec,
    rules_rejected: IntCounter,
    targets: IntGaugeVec,
}

impl DiscoveryMetrics {
    /// Creates the collectors and registers them.
    ///
    /// # Errors
    ///
    /// Returns an error if a collector with the same name is already
    /// registered, e.g. by another engine sharing the registry.
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let metrics = Self::build()?;
        for collector in metrics.collectors() {
            registry.register(collector)?;
        }
        Ok(metrics)
    }

    fn build() -> Result<Self, prometheus::Error> {
        Ok(Self {
            events: IntCounterVec::new(
                Opts::new("events_total", "Resource events processed by status")
                    .namespace(NAMESPACE),
                &["status"],
            )?,
            registered: IntCounterVec::new(
                Opts::new("targets_registered_total", "Targets registered or replaced")
                    .namespace(NAMESPACE),
                &["type", "discovered"],
            )?,
            unregistered: IntCounterVec::new(
                Opts::new("targets_unregistered_total", "Targets removed").namespace(NAMESPACE),
                &["type"],
            )?,
            encode_errors: IntCounterVec::new(
                Opts::new("encode_errors_total", "Resources that failed to encode")
                    .namespace(NAMESPACE),
                &["type"],
            )?,
            rules_rejected: IntCounter::with_opts(
                Opts::new("rules_rejected_total", "Discovery rules dropped at startup")
                    .namespace(NAMESPACE),
            )?,
            targets: IntGaugeVec::new(
                Opts::new("targets", "Currently registered targets").namespace(NAMESPACE),
                &["type"],
            )?,
        })
    }

    fn collectors(&self) -> Vec<Box<dyn Collector>> {
        vec![
            Box::new(self.events.clone()),
            Box::new(self.registered.clone()),
            Box::new(self.unregistered.clone()),
            Box::new(self.encode_errors.clone()),
            Box::new(self.rules_rejected.clone()),
            Box::new(self.targets.clone()),
        ]
    }

    /// Removes the collectors from the registry.
    pub fn unregister(&self, registry: &Registry) {
        for collector in self.collectors() {
            if let Err(e) = registry.unregister(collector) {
                tracing::debug!("discovery metric already unregistered: {e}");
            }
        }
    }

    pub(crate) fn event(&self, status: Status) {
        let status = match status {
            Status::Discover => "discover",
            Status::Delete => "delete",
        };
        self.events.with_label_values(&[status]).inc();
    }

    /// Counts a registration; `added` is `false` when an existing target was
    /// replaced.
    pub(crate) fn registered(&self, provider: &str, discovered: Discovered, added: bool) {
        self.registered
            .with_label_values(&[provider, discovered.as_str()])
            .inc();
        if added {
            self.targets.with_label_values(&[provider]).inc();
        }
    }

    pub(crate) fn unregistered(&self, provider: &str) {
        self.unregistered.with_label_values(&[provider]).inc();
        self.targets.with_label_values(&[provider]).dec();
    }

    pub(crate) fn encode_error(&self, provider: &str) {
        self.encode_errors.with_label_values(&[provider]).inc();
    }

    pub(crate) fn rule_rejected(&self) {
        self.rules_rejected.inc();
    }
}
