//! Routing of resource events to target handlers.
//!
//! # How It Works
//!
//! 1. Producers (typically Kubernetes watchers) submit resources through
//!    [`Discoverer::discover`] and [`Discoverer::delete`]
//! 2. Events go through one bounded FIFO queue; a full queue blocks producers
//! 3. A single consumer task routes each event: the first rule whose filter
//!    matches handles it, otherwise every runtime (annotation) handler does
//! 4. Handlers encode targets, update their registries and notify the
//!    [`ProviderHandler`]
//!
//! Deletes are routed to the handler that last saw the resource, so a delete
//! still reaches the right registry when the object's labels changed in
//! between. Resources the consumer never saw fall back to filter evaluation.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::task::JoinHandle;

use crate::config::{DiscoveryConfig, RuleConfig};
use crate::error::{ConfigError, Result};
use crate::filter::ResourceFilter;
use crate::handler::{ProviderHandler, TargetHandler};
use crate::metrics::DiscoveryMetrics;
use crate::resource::{Resource, Status};
use crate::target::Target;

/// A rule bound to its compiled filter and handler.
struct Delegate {
    filter: ResourceFilter,
    handler: TargetHandler,
    rule: RuleConfig,
}

/// Handler that last processed a target name.
#[derive(Clone, Debug, PartialEq, Eq)]
enum Route {
    Rule(String),
    Runtime,
}

struct Router {
    delegates: Vec<Delegate>,
    runtime_handlers: Vec<TargetHandler>,
    metrics: DiscoveryMetrics,
}

impl Router {
    fn route_for(&self, resource: &Resource) -> Route {
        self.delegates
            .iter()
            .find(|d| d.filter.matches(resource))
            .map_or(Route::Runtime, |d| Route::Rule(d.rule.name.clone()))
    }

    fn delegate(&self, route: &Route) -> Option<&Delegate> {
        match route {
            Route::Rule(rule) => self.delegates.iter().find(|d| &d.rule.name == rule),
            Route::Runtime => None,
        }
    }

    fn discover(&self, resource: &Resource, routes: &mut HashMap<String, Route>) {
        let name = resource.target_name();
        let route = self.route_for(resource);

        if let Some(previous) = routes.get(&name).filter(|r| **r != route) {
            tracing::info!("{name}: moved from {previous:?} to {route:?}");
            self.dispatch_delete(previous, &name);
        }

        match self.delegate(&route) {
            Some(delegate) => {
                tracing::debug!("{name}: matched rule {}", delegate.rule.name);
                delegate.handler.handle(resource, Some(&delegate.rule));
            }
            None => {
                for handler in &self.runtime_handlers {
                    handler.handle(resource, None);
                }
            }
        }

        routes.insert(name, route);
    }

    fn delete(&self, resource: &Resource, routes: &mut HashMap<String, Route>) {
        let name = resource.target_name();
        let route = routes
            .remove(&name)
            .unwrap_or_else(|| self.route_for(resource));

        self.dispatch_delete(&route, &name);
    }

    fn dispatch_delete(&self, route: &Route, name: &str) {
        match self.delegate(route) {
            Some(delegate) => delegate.handler.delete(name),
            None => {
                for handler in &self.runtime_handlers {
                    handler.delete(name);
                }
            }
        }
    }

    fn process(&self, resource: &Resource, routes: &mut HashMap<String, Route>) {
        self.metrics.event(resource.status);
        match resource.status {
            Status::Delete => self.delete(resource, routes),
            Status::Discover => self.discover(resource, routes),
        }
    }
}

/// Converts resource lifecycle events into registered targets.
///
/// Must be created within a Tokio runtime; the consumer runs as a spawned task.
pub struct Discoverer {
    queue: Mutex<Option<Sender<Resource>>>,
    consumer: Mutex<Option<JoinHandle<()>>>,
    router: Arc<Router>,
    metrics_registry: prometheus::Registry,
}

impl Discoverer {
    /// Builds the rule delegates and starts the consumer task.
    ///
    /// Invalid rules are logged and skipped. Engine metrics are registered in
    /// `metrics_registry` until [`Discoverer::stopped`] completes.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine metrics cannot be registered.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub fn new(
        provider: Arc<dyn ProviderHandler>,
        config: &DiscoveryConfig,
        metrics_registry: &prometheus::Registry,
    ) -> Result<Self> {
        let metrics = DiscoveryMetrics::new(metrics_registry)?;

        let runtime_handlers = if config.enable_runtime_plugins {
            // Annotation-based discovery is only supported for prometheus.
            let annotations = TargetHandler::prometheus(provider.clone(), true, metrics.clone());
            vec![annotations]
        } else {
            Vec::new()
        };

        let router = Arc::new(Router {
            delegates: make_delegates(&provider, &config.plugins, &metrics),
            runtime_handlers,
            metrics,
        });

        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let consumer = tokio::spawn(process_events(router.clone(), rx));

        Ok(Self {
            queue: Mutex::new(Some(tx)),
            consumer: Mutex::new(Some(consumer)),
            router,
            metrics_registry: metrics_registry.clone(),
        })
    }

    fn sender(&self) -> Sender<Resource> {
        match &*self.queue.lock() {
            Some(tx) => tx.clone(),
            None => panic!("resource submitted after Discoverer::stop"),
        }
    }

    /// Queues a resource for discovery, waiting while the queue is full.
    ///
    /// # Panics
    ///
    /// Panics if called after [`Discoverer::stop`].
    pub async fn discover(&self, mut resource: Resource) {
        resource.status = Status::Discover;
        self.enqueue(resource).await;
    }

    /// Queues a resource deletion behind any earlier events.
    ///
    /// # Panics
    ///
    /// Panics if called after [`Discoverer::stop`].
    pub async fn delete(&self, mut resource: Resource) {
        resource.status = Status::Delete;
        self.enqueue(resource).await;
    }

    async fn enqueue(&self, resource: Resource) {
        let sent = self.sender().send(resource).await;
        assert!(sent.is_ok(), "discovery consumer terminated");
    }

    /// Blocking variant of [`Discoverer::discover`] for synchronous producers.
    ///
    /// # Panics
    ///
    /// Panics if called after [`Discoverer::stop`] or from within an
    /// asynchronous execution context.
    pub fn blocking_discover(&self, mut resource: Resource) {
        resource.status = Status::Discover;
        self.blocking_enqueue(resource);
    }

    /// Blocking variant of [`Discoverer::delete`] for synchronous producers.
    ///
    /// # Panics
    ///
    /// Panics if called after [`Discoverer::stop`] or from within an
    /// asynchronous execution context.
    pub fn blocking_delete(&self, mut resource: Resource) {
        resource.status = Status::Delete;
        self.blocking_enqueue(resource);
    }

    fn blocking_enqueue(&self, resource: Resource) {
        let sent = self.sender().blocking_send(resource);
        assert!(sent.is_ok(), "discovery consumer terminated");
    }

    /// Closes the queue. Buffered events are still processed.
    ///
    /// # Panics
    ///
    /// Panics if called more than once.
    pub fn stop(&self) {
        let queue = self.queue.lock().take();
        assert!(queue.is_some(), "Discoverer::stop called more than once");
        tracing::info!("stopping resource discovery");
    }

    /// Waits until the consumer has drained the queue, then unregisters the
    /// engine metrics.
    ///
    /// Only returns once [`Discoverer::stop`] has been called and every
    /// producer has finished submitting.
    pub async fn stopped(&self) {
        let consumer = self.consumer.lock().take();
        let Some(consumer) = consumer else {
            return;
        };

        if let Err(e) = consumer.await {
            tracing::error!("discovery consumer failed: {e}");
        }
        self.router.metrics.unregister(&self.metrics_registry);
    }

    /// Returns the names of the active rules, in precedence order.
    #[must_use]
    pub fn rules(&self) -> Vec<String> {
        self.router
            .delegates
            .iter()
            .map(|d| d.rule.name.clone())
            .collect()
    }

    /// Returns a snapshot of every registered target, ordered by name within
    /// each handler.
    #[must_use]
    pub fn targets(&self) -> Vec<Target> {
        self.router
            .delegates
            .iter()
            .map(|d| &d.handler)
            .chain(&self.router.runtime_handlers)
            .flat_map(|h| h.registry().targets())
            .collect()
    }
}

async fn process_events(router: Arc<Router>, mut rx: Receiver<Resource>) {
    let mut routes = HashMap::new();
    while let Some(resource) = rx.recv().await {
        router.process(&resource, &mut routes);
    }
    tracing::info!("stopping resource discovery processing");
}

fn make_delegates(
    provider: &Arc<dyn ProviderHandler>,
    rules: &[RuleConfig],
    metrics: &DiscoveryMetrics,
) -> Vec<Delegate> {
    let mut delegates: Vec<Delegate> = Vec::with_capacity(rules.len());

    for rule in rules {
        match make_delegate(provider, rule, metrics, &delegates) {
            Ok(delegate) => {
                tracing::info!("loaded discovery rule {}", rule.name);
                delegates.push(delegate);
            }
            Err(e) => {
                tracing::error!("error parsing plugin: {} error: {e}", rule.name);
                metrics.rule_rejected();
            }
        }
    }

    delegates
}

fn make_delegate(
    provider: &Arc<dyn ProviderHandler>,
    rule: &RuleConfig,
    metrics: &DiscoveryMetrics,
    earlier: &[Delegate],
) -> std::result::Result<Delegate, ConfigError> {
    if rule.name.trim().is_empty() {
        return Err(ConfigError::EmptyName);
    }

    if earlier.iter().any(|d| d.rule.name == rule.name) {
        return Err(ConfigError::DuplicateName(rule.name.clone()));
    }

    let filter = ResourceFilter::new(rule)?;
    for delegate in earlier {
        if delegate.filter.same_selection(&filter) {
            return Err(ConfigError::DuplicateSelector {
                rule: rule.name.clone(),
                earlier: delegate.rule.name.clone(),
            });
        }

        if delegate.filter.may_overlap(&filter) {
            tracing::warn!(
                "rule {} may overlap rule {}; {} takes precedence",
                rule.name,
                delegate.rule.name,
                delegate.rule.name
            );
        }
    }

    let handler = TargetHandler::for_rule(rule, provider.clone(), metrics.clone())?;

    Ok(Delegate {
        filter,
        handler,
        rule: rule.clone(),
    })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    use super::*;
    use crate::encoding::SCRAPE_ANNOTATION;
    use crate::handler::tests::{Notification, RecordingProvider};
    use crate::resource::Kind;
    use crate::target::Discovered;

    const SCRAPE: &[(&str, &str)] = &[(SCRAPE_ANNOTATION, "true")];

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    fn pod(name: &str, labels: &[(&str, &str)], annotations: &[(&str, &str)]) -> Resource {
        let map = |pairs: &[(&str, &str)]| {
            Some(
                pairs
                    .iter()
                    .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                    .collect::<BTreeMap<_, _>>(),
            )
        };

        Resource::new(
            Kind::Pod,
            ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("test".to_string()),
                labels: map(labels),
                annotations: map(annotations),
                ..Default::default()
            },
            Some("10.2.3.4".to_string()),
        )
    }

    fn web_rule(name: &str, plugin_type: &str) -> RuleConfig {
        RuleConfig::new(name, plugin_type, Kind::Pod).label("app", ["web"])
    }

    fn start(config: &DiscoveryConfig) -> (Discoverer, Arc<RecordingProvider>) {
        init_tracing();
        let provider = Arc::new(RecordingProvider::default());
        let registry = prometheus::Registry::new();
        let discoverer = Discoverer::new(provider.clone(), config, &registry);
        (discoverer.unwrap(), provider)
    }

    async fn drain(discoverer: &Discoverer) {
        discoverer.stop();
        discoverer.stopped().await;
    }

    fn registrations(notifications: &[Notification]) -> Vec<(String, Discovered, &'static str)> {
        notifications
            .iter()
            .filter_map(|n| match n {
                Notification::AddOrReplace(t) => {
                    Some((t.name().to_string(), t.discovered(), t.provider()))
                }
                Notification::Remove(_) => None,
            })
            .collect()
    }

    fn removal(name: &str) -> Notification {
        Notification::Remove(name.to_string())
    }

    #[tokio::test]
    async fn matching_rule_handles_resource() {
        let rule = web_rule("web", "telegraf/http");
        let config = DiscoveryConfig::default().rule(rule);
        let (discoverer, provider) = start(&config);

        discoverer
            .discover(pod("web-0", &[("app", "web")], SCRAPE))
            .await;
        drain(&discoverer).await;

        // Only the rule handler sees it, even though the pod is annotated.
        assert_eq!(
            registrations(&provider.take()),
            vec![("pod/test/web-0".to_string(), Discovered::Rule, "telegraf")]
        );
    }

    #[tokio::test]
    async fn unmatched_resource_goes_to_runtime_handlers() {
        let rule = web_rule("web", "telegraf/http");
        let config = DiscoveryConfig::default().rule(rule);
        let (discoverer, provider) = start(&config);

        discoverer
            .discover(pod("api-0", &[("app", "api")], SCRAPE))
            .await;
        discoverer
            .discover(pod("api-1", &[("app", "api")], &[]))
            .await;
        drain(&discoverer).await;

        assert_eq!(
            registrations(&provider.take()),
            vec![(
                "pod/test/api-0".to_string(),
                Discovered::Annotation,
                "prometheus"
            )]
        );
    }

    #[tokio::test]
    async fn runtime_handlers_can_be_disabled() {
        let config = DiscoveryConfig::default().runtime_plugins(false);
        let (discoverer, provider) = start(&config);

        discoverer.discover(pod("web-0", &[], SCRAPE)).await;
        drain(&discoverer).await;

        assert!(provider.take().is_empty());
    }

    #[tokio::test]
    async fn earliest_rule_wins() {
        let all_in_test = RuleConfig::new("second", "telegraf/http", Kind::Pod).namespace("test");
        let config = DiscoveryConfig::default()
            .rule(web_rule("first", "prometheus"))
            .rule(all_in_test);
        let (discoverer, provider) = start(&config);

        discoverer
            .discover(pod("web-0", &[("app", "web")], &[]))
            .await;
        discoverer
            .discover(pod("db-0", &[("app", "db")], &[]))
            .await;
        drain(&discoverer).await;

        assert_eq!(
            registrations(&provider.take()),
            vec![
                ("pod/test/web-0".to_string(), Discovered::Rule, "prometheus"),
                ("pod/test/db-0".to_string(), Discovered::Rule, "telegraf"),
            ]
        );
    }

    #[tokio::test]
    async fn delete_follows_discover_route() {
        let rule = web_rule("web", "prometheus");
        let config = DiscoveryConfig::default().rule(rule);
        let (discoverer, provider) = start(&config);

        discoverer
            .discover(pod("web-0", &[("app", "web")], &[]))
            .await;
        discoverer.discover(pod("api-0", &[], SCRAPE)).await;
        discoverer
            .delete(pod("web-0", &[("app", "web")], &[]))
            .await;
        discoverer.delete(pod("api-0", &[], SCRAPE)).await;
        drain(&discoverer).await;

        let notifications = provider.take();
        assert_eq!(notifications.len(), 4);
        assert_eq!(notifications[2], removal("pod/test/web-0"));
        assert_eq!(notifications[3], removal("pod/test/api-0"));
        assert!(discoverer.targets().is_empty());
    }

    #[tokio::test]
    async fn delete_uses_route_from_discovery_time() {
        let rule = web_rule("web", "prometheus");
        let config = DiscoveryConfig::default().rule(rule);
        let (discoverer, provider) = start(&config);

        discoverer
            .discover(pod("web-0", &[("app", "web")], &[]))
            .await;
        // The label changed before the delete arrived.
        discoverer
            .delete(pod("web-0", &[("app", "db")], &[]))
            .await;
        drain(&discoverer).await;

        assert_eq!(provider.take().last(), Some(&removal("pod/test/web-0")));
        assert!(discoverer.targets().is_empty());
    }

    #[tokio::test]
    async fn delete_of_unseen_resource_is_noop() {
        let (discoverer, provider) = start(&DiscoveryConfig::default());

        discoverer.delete(pod("ghost", &[], &[])).await;
        drain(&discoverer).await;

        assert!(provider.take().is_empty());
    }

    #[tokio::test]
    async fn relabeled_resource_moves_between_handlers() {
        let rule = web_rule("web", "telegraf/http");
        let config = DiscoveryConfig::default().rule(rule);
        let (discoverer, provider) = start(&config);

        discoverer
            .discover(pod("web-0", &[("app", "web")], SCRAPE))
            .await;
        discoverer
            .discover(pod("web-0", &[("app", "api")], SCRAPE))
            .await;
        drain(&discoverer).await;

        let notifications = provider.take();
        assert_eq!(notifications.len(), 3);
        assert_eq!(notifications[1], removal("pod/test/web-0"));

        let targets = discoverer.targets();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].provider(), "prometheus");
    }

    #[tokio::test]
    async fn invalid_rules_are_dropped() {
        let mut unknown_kind = RuleConfig::new("bad-kind", "prometheus", Kind::Pod);
        unknown_kind.selectors.resource_type = "ingress".to_string();
        let bad_label = RuleConfig::new("bad-label", "prometheus", Kind::Pod).label("-x", ["y"]);

        let config = DiscoveryConfig::default()
            .rule(RuleConfig::new("good", "prometheus", Kind::Service))
            .rule(unknown_kind)
            .rule(RuleConfig::new("bad-type", "statsd", Kind::Pod))
            .rule(bad_label)
            .rule(RuleConfig::new("good", "prometheus", Kind::Node))
            .rule(RuleConfig::new("same", "telegraf/http", Kind::Service))
            .rule(RuleConfig::new("", "prometheus", Kind::Node))
            .rule(RuleConfig::new("nodes", "prometheus", Kind::Node));
        let (discoverer, _provider) = start(&config);

        assert_eq!(discoverer.rules(), ["good", "nodes"]);
        drain(&discoverer).await;
    }

    #[tokio::test]
    async fn label_value_order_does_not_hide_duplicates() {
        let forward = RuleConfig::new("a", "prometheus", Kind::Pod).label("app", ["x", "y"]);
        let reversed = RuleConfig::new("b", "prometheus", Kind::Pod).label("app", ["y", "x"]);
        let config = DiscoveryConfig::default().rule(forward).rule(reversed);
        let (discoverer, _provider) = start(&config);

        assert_eq!(discoverer.rules(), ["a"]);
        drain(&discoverer).await;
    }

    #[tokio::test]
    async fn stop_drains_buffered_events() {
        let config = DiscoveryConfig::default().queue_capacity(64);
        let (discoverer, provider) = start(&config);

        for i in 0..50 {
            discoverer
                .discover(pod(&format!("web-{i}"), &[], SCRAPE))
                .await;
        }
        drain(&discoverer).await;

        assert_eq!(registrations(&provider.take()).len(), 50);
        assert_eq!(discoverer.targets().len(), 50);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn full_queue_applies_backpressure() {
        let config = DiscoveryConfig::default().queue_capacity(1);
        let (discoverer, provider) = start(&config);
        let discoverer = Arc::new(discoverer);

        let producers: Vec<_> = (0..4)
            .map(|p| {
                let discoverer = discoverer.clone();
                tokio::spawn(async move {
                    for i in 0..25 {
                        discoverer
                            .discover(pod(&format!("web-{p}-{i}"), &[], SCRAPE))
                            .await;
                    }
                })
            })
            .collect();

        for producer in producers {
            producer.await.unwrap();
        }
        drain(&discoverer).await;

        assert_eq!(registrations(&provider.take()).len(), 100);
    }

    #[tokio::test]
    #[should_panic(expected = "called more than once")]
    async fn double_stop_panics() {
        let (discoverer, _provider) = start(&DiscoveryConfig::default());
        discoverer.stop();
        discoverer.stop();
    }

    #[tokio::test]
    #[should_panic(expected = "submitted after Discoverer::stop")]
    async fn discover_after_stop_panics() {
        let (discoverer, _provider) = start(&DiscoveryConfig::default());
        discoverer.stop();
        discoverer.discover(pod("web-0", &[], &[])).await;
    }

    #[tokio::test]
    async fn targets_gauge_spans_all_handlers() {
        let rule = web_rule("web", "prometheus");
        let config = DiscoveryConfig::default().rule(rule);
        let (discoverer, provider) = start(&config);

        for i in 0..3 {
            discoverer
                .discover(pod(&format!("api-{i}"), &[], SCRAPE))
                .await;
        }
        discoverer
            .discover(pod("web-0", &[("app", "web")], &[]))
            .await;
        // A replacement does not add a target.
        let relabeled = pod("web-0", &[("app", "web"), ("tier", "front")], &[]);
        discoverer.discover(relabeled).await;
        discoverer.delete(pod("api-0", &[], SCRAPE)).await;
        drain(&discoverer).await;

        assert_eq!(registrations(&provider.take()).len(), 5);
        assert_eq!(discoverer.targets().len(), 3);

        let gauge = crate::metrics::tests::targets(&discoverer.router.metrics, "prometheus");
        assert_eq!(gauge, 3);
    }

    #[tokio::test]
    async fn stopped_unregisters_metrics() {
        let registry = prometheus::Registry::new();
        let provider = Arc::new(RecordingProvider::default());
        let config = DiscoveryConfig::default();
        let discoverer = Discoverer::new(provider.clone(), &config, &registry);
        let discoverer = discoverer.unwrap();

        let second = Discoverer::new(provider.clone(), &config, &registry);
        assert!(second.is_err());

        drain(&discoverer).await;
        assert!(Discoverer::new(provider, &config, &registry).is_ok());
    }

    #[test]
    fn blocking_producers() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .build()
            .unwrap();
        let provider = Arc::new(RecordingProvider::default());
        let discoverer = runtime.block_on(async {
            let registry = prometheus::Registry::new();
            let config = DiscoveryConfig::default();
            let discoverer = Discoverer::new(provider.clone(), &config, &registry);
            discoverer.unwrap()
        });

        discoverer.blocking_discover(pod("web-0", &[], SCRAPE));
        discoverer.blocking_delete(pod("web-0", &[], SCRAPE));
        discoverer.stop();
        runtime.block_on(discoverer.stopped());

        assert_eq!(provider.take().last(), Some(&removal("pod/test/web-0")));
    }
}
