//! Target handlers bind an encoder and a registry to a provider family.

use std::sync::Arc;

use crate::config::{ProviderType, RuleConfig};
use crate::encoding::{Encoder, PrometheusEncoder, SCRAPE_ANNOTATION, TelegrafEncoder};
use crate::error::ConfigError;
use crate::metrics::DiscoveryMetrics;
use crate::registry::Registry;
use crate::resource::Resource;
use crate::target::Target;

/// Receiver of target lifecycle notifications.
///
/// Implemented by the metric-source registry that owns the actual scraping.
/// Calls come from the discovery consumer task and must not block on I/O.
pub trait ProviderHandler: Send + Sync {
    /// A target was discovered or its configuration changed.
    fn add_or_replace(&self, target: &Target);

    /// The target registered under `name` is gone.
    fn remove(&self, name: &str);
}

/// Hook consulted before registering an annotation-discovered target.
///
/// Returns `true` to veto the registration.
pub type RegistrationHook = fn(&Resource) -> bool;

/// Vetoes prometheus targets on resources explicitly annotated with
/// `prometheus.io/scrape: "false"`.
///
/// Installed on the annotation-driven prometheus handler. [`PrometheusEncoder`]
/// already requires `scrape: "true"` in that mode, so with the built-in encoder
/// this hook only restates the opt-out; it is what keeps the opt-out in force
/// for a handler built with a custom [`Encoder`].
#[must_use]
pub fn scrape_disabled(resource: &Resource) -> bool {
    resource.annotation(SCRAPE_ANNOTATION) == Some("false")
}

/// Generic handler for one provider family.
pub struct Handler<E> {
    encoder: E,
    registry: Registry,
    provider: Arc<dyn ProviderHandler>,
    use_annotations: bool,
    veto: Option<RegistrationHook>,
    metrics: DiscoveryMetrics,
}

impl<E: Encoder> Handler<E> {
    /// Creates a handler with an empty registry.
    #[must_use]
    pub fn new(
        encoder: E,
        registry: Registry,
        provider: Arc<dyn ProviderHandler>,
        metrics: DiscoveryMetrics,
    ) -> Self {
        Self {
            encoder,
            registry,
            provider,
            use_annotations: false,
            veto: None,
            metrics,
        }
    }

    /// Makes this handler discover through annotations, ignoring any rule.
    #[must_use]
    pub fn use_annotations(mut self, enabled: bool) -> Self {
        self.use_annotations = enabled;
        self
    }

    /// Installs a veto hook for annotation-discovered targets.
    #[must_use]
    pub fn registration_hook(mut self, hook: RegistrationHook) -> Self {
        self.veto = Some(hook);
        self
    }

    /// Returns the registry of active targets.
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Encodes the resource and registers the resulting target.
    ///
    /// When the resource yields no target, any target it registered earlier
    /// is retired.
    pub fn handle(&self, resource: &Resource, rule: Option<&RuleConfig>) {
        let name = resource.target_name();

        let Some(address) = resource.address() else {
            tracing::debug!("{name}: no address yet, skipping");
            self.retire(&name);
            return;
        };

        let rule = if self.use_annotations { None } else { rule };
        let meta = &resource.meta;
        let target = match self.encoder.encode(address, resource.kind, meta, rule) {
            Ok(Some(target)) => target,
            Ok(None) => {
                tracing::debug!("{name}: not a {} target", self.registry.name());
                self.retire(&name);
                return;
            }
            Err(e) => {
                tracing::error!("{name}: {e}");
                self.metrics.encode_error(self.registry.name());
                self.retire(&name);
                return;
            }
        };

        if self.use_annotations && self.veto.is_some_and(|veto| veto(resource)) {
            tracing::debug!("{name}: registration vetoed");
            self.retire(&name);
            return;
        }

        let discovered = target.discovered();
        let added = match self.registry.register(target.clone()) {
            Some(previous) if previous == target => {
                tracing::debug!("{name}: unchanged");
                return;
            }
            Some(_) => {
                tracing::info!("{name}: updated {} target", self.registry.name());
                false
            }
            None => {
                tracing::info!("{name}: registered {} target", self.registry.name());
                true
            }
        };

        self.metrics
            .registered(self.registry.name(), discovered, added);
        self.provider.add_or_replace(&target);
    }

    /// Unregisters the target registered under `name`. Unknown names are ignored.
    pub fn delete(&self, name: &str) {
        if !self.retire(name) {
            tracing::debug!("{name}: not registered, nothing to delete");
        }
    }

    fn retire(&self, name: &str) -> bool {
        if self.registry.unregister(name).is_none() {
            return false;
        }

        tracing::info!("{name}: unregistered {} target", self.registry.name());
        self.metrics.unregistered(self.registry.name());
        self.provider.remove(name);
        true
    }
}

/// Target handler of one of the supported provider families.
pub enum TargetHandler {
    /// HTTP-scraped prometheus endpoints.
    Prometheus(Handler<PrometheusEncoder>),
    /// Telegraf input plugins.
    Telegraf(Handler<TelegrafEncoder>),
}

impl TargetHandler {
    /// Creates a prometheus handler.
    ///
    /// With `use_annotations`, the handler discovers annotated resources and
    /// honors `prometheus.io/scrape: "false"` as a veto.
    #[must_use]
    pub fn prometheus(
        provider: Arc<dyn ProviderHandler>,
        use_annotations: bool,
        metrics: DiscoveryMetrics,
    ) -> Self {
        let mut handler = Handler::new(
            PrometheusEncoder,
            Registry::new("prometheus"),
            provider,
            metrics,
        )
        .use_annotations(use_annotations);

        if use_annotations {
            handler = handler.registration_hook(scrape_disabled);
        }

        Self::Prometheus(handler)
    }

    /// Creates a telegraf handler for one input plugin.
    #[must_use]
    pub fn telegraf(
        provider: Arc<dyn ProviderHandler>,
        plugin: impl Into<String>,
        metrics: DiscoveryMetrics,
    ) -> Self {
        Self::Telegraf(Handler::new(
            TelegrafEncoder::new(plugin),
            Registry::new("telegraf"),
            provider,
            metrics,
        ))
    }

    /// Creates the handler matching a rule's provider type.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the rule type is not supported.
    pub fn for_rule(
        rule: &RuleConfig,
        provider: Arc<dyn ProviderHandler>,
        metrics: DiscoveryMetrics,
    ) -> Result<Self, ConfigError> {
        Ok(match rule.provider_type()? {
            ProviderType::Prometheus => Self::prometheus(provider, false, metrics),
            ProviderType::Telegraf(plugin) => Self::telegraf(provider, plugin, metrics),
        })
    }

    /// Encodes and registers the resource.
    pub fn handle(&self, resource: &Resource, rule: Option<&RuleConfig>) {
        match self {
            Self::Prometheus(handler) => handler.handle(resource, rule),
            Self::Telegraf(handler) => handler.handle(resource, rule),
        }
    }

    /// Unregisters the target registered under `name`, if any.
    pub fn delete(&self, name: &str) {
        match self {
            Self::Prometheus(handler) => handler.delete(name),
            Self::Telegraf(handler) => handler.delete(name),
        }
    }

    /// Returns the registry of active targets.
    #[must_use]
    pub fn registry(&self) -> &Registry {
        match self {
            Self::Prometheus(handler) => handler.registry(),
            Self::Telegraf(handler) => handler.registry(),
        }
    }
}
