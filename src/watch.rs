//! Kubernetes watches feeding a [`Discoverer`].
//!
//! # How It Works
//!
//! 1. Watches pods, services and/or nodes cluster-wide
//! 2. Converts every applied object into a [`Resource`] and queues it for
//!    discovery
//! 3. Queues deleted objects for deletion
//! 4. After a relist, objects that disappeared while the watch was down are
//!    deleted as well
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use kube_target_discovery::{Discoverer, DiscoveryConfig, Kind, watch};
//!
//! let registry = prometheus::Registry::new();
//! let discoverer = Arc::new(Discoverer::new(provider, &config, &registry)?);
//! let watches = watch::watch_cluster(&discoverer, &[Kind::Pod, Kind::Service]).await?;
//!
//! // On shutdown, stop the producers before the engine.
//! for watch in &watches {
//!     watch.abort();
//! }
//! discoverer.stop();
//! discoverer.stopped().await;
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Debug;
use std::sync::Arc;

use futures::TryStreamExt;
use k8s_openapi::api::core::v1::{Node, Pod, Service};
use kube::runtime::WatchStreamExt;
use kube::runtime::watcher::{self, Config as WatcherConfig, Event};
use kube::{Api, Client};
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;

use crate::discoverer::Discoverer;
use crate::error::Result;
use crate::resource::{Kind, Resource};

/// Kubernetes object types the discovery engine understands.
pub trait Discoverable:
    kube::Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static
{
    /// Converts the object into a discovery resource.
    fn to_resource(&self) -> Resource;
}

impl Discoverable for Pod {
    fn to_resource(&self) -> Resource {
        self.into()
    }
}

impl Discoverable for Service {
    fn to_resource(&self) -> Resource {
        self.into()
    }
}

impl Discoverable for Node {
    fn to_resource(&self) -> Resource {
        self.into()
    }
}

/// Starts a watch for each of the given kinds across all namespaces.
///
/// Uses the default kube client configuration (in-cluster or kubeconfig).
/// The returned tasks run until aborted; abort them before calling
/// [`Discoverer::stop`].
///
/// # Errors
///
/// Returns an error if no Kubernetes client can be configured.
pub async fn watch_cluster(
    discoverer: &Arc<Discoverer>,
    kinds: &[Kind],
) -> Result<Vec<JoinHandle<()>>> {
    let client = Client::try_default().await?;

    Ok(kinds
        .iter()
        .map(|kind| match kind {
            Kind::Pod => spawn_watch(
                Api::<Pod>::all(client.clone()),
                WatcherConfig::default(),
                discoverer.clone(),
            ),
            Kind::Service => spawn_watch(
                Api::<Service>::all(client.clone()),
                WatcherConfig::default(),
                discoverer.clone(),
            ),
            Kind::Node => spawn_watch(
                Api::<Node>::all(client.clone()),
                WatcherConfig::default(),
                discoverer.clone(),
            ),
        })
        .collect())
}

/// Spawns a background task that feeds watch events of `api` to the
/// discoverer.
///
/// Use this directly to watch a single namespace or to narrow the watch
/// with label or field selectors.
pub fn spawn_watch<K: Discoverable>(
    api: Api<K>,
    config: WatcherConfig,
    discoverer: Arc<Discoverer>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = watch_loop(api, config, &discoverer).await {
            tracing::error!("Kubernetes {} watcher failed: {e}", K::kind(&()));
        }
    })
}

async fn watch_loop<K: Discoverable>(
    api: Api<K>,
    config: WatcherConfig,
    discoverer: &Discoverer,
) -> Result<()> {
    let mut known = KnownObjects::default();
    let stream = watcher::watcher(api, config).default_backoff();
    tokio::pin!(stream);

    tracing::debug!("starting Kubernetes {} watch", K::kind(&()));

    while let Some(event) = stream.try_next().await? {
        let actions = process_event(&event, &mut known);
        dispatch(discoverer, actions).await;
    }

    Ok(())
}

async fn dispatch(discoverer: &Discoverer, actions: Vec<WatchAction>) {
    for action in actions {
        match action {
            WatchAction::Discover(resource) => discoverer.discover(resource).await,
            WatchAction::Delete(resource) => discoverer.delete(resource).await,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum WatchAction {
    Discover(Resource),
    Delete(Resource),
}

/// Objects seen by one watch, keyed by target name.
#[derive(Debug, Default)]
struct KnownObjects {
    live: BTreeMap<String, Resource>,
    relisted: Option<BTreeSet<String>>,
}

/// Processes a watcher event and returns the discovery actions.
fn process_event<K: Discoverable>(event: &Event<K>, known: &mut KnownObjects) -> Vec<WatchAction> {
    match event {
        Event::Apply(object) => {
            let resource = object.to_resource();
            known.live.insert(resource.target_name(), resource.clone());
            vec![WatchAction::Discover(resource)]
        }

        Event::InitApply(object) => {
            let resource = object.to_resource();
            let name = resource.target_name();
            if let Some(relisted) = known.relisted.as_mut() {
                relisted.insert(name.clone());
            }
            known.live.insert(name, resource.clone());
            vec![WatchAction::Discover(resource)]
        }

        Event::Delete(object) => {
            let resource = object.to_resource();
            known.live.remove(&resource.target_name());
            vec![WatchAction::Delete(resource)]
        }

        Event::Init => {
            tracing::debug!("Kubernetes {} watch relisting", K::kind(&()));
            known.relisted = Some(BTreeSet::new());
            Vec::new()
        }

        Event::InitDone => {
            let relisted = known.relisted.take().unwrap_or_default();
            let (kept, gone): (BTreeMap<_, _>, BTreeMap<_, _>) = std::mem::take(&mut known.live)
                .into_iter()
                .partition(|(name, _)| relisted.contains(name));
            known.live = kept;

            gone.into_values()
                .map(|resource| {
                    tracing::debug!("{}: gone after relist", resource.target_name());
                    WatchAction::Delete(resource)
                })
                .collect()
        }
    }
}
