//! Cluster resources as seen by the discovery engine.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use k8s_openapi::api::core::v1::{Node, Pod, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use crate::error::ConfigError;

/// Kind of a discoverable cluster object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Kind {
    /// A pod, addressed by its pod IP.
    Pod,
    /// A service, addressed by its cluster IP.
    Service,
    /// A node, addressed by its internal IP.
    Node,
}

impl Kind {
    /// Returns the lowercase name used in target names and tags.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pod => "pod",
            Self::Service => "service",
            Self::Node => "node",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Kind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pod" | "pods" => Ok(Self::Pod),
            "service" | "services" => Ok(Self::Service),
            "node" | "nodes" => Ok(Self::Node),
            _ => Err(ConfigError::UnknownKind(s.to_string())),
        }
    }
}

/// Lifecycle transition carried by a [`Resource`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Status {
    /// The object was added or updated.
    #[default]
    Discover,
    /// The object was removed from the cluster.
    Delete,
}

/// Immutable snapshot of a cluster object change.
#[derive(Clone, Debug, PartialEq)]
pub struct Resource {
    /// Kind of the object.
    pub kind: Kind,
    /// Object metadata (name, namespace, labels, annotations).
    pub meta: ObjectMeta,
    /// Address used to reach the object, if it has one yet.
    pub address: Option<String>,
    /// Lifecycle transition.
    pub status: Status,
}

impl Resource {
    /// Creates a resource for discovery.
    ///
    /// Empty addresses are treated as unresolved.
    #[must_use]
    pub fn new(kind: Kind, meta: ObjectMeta, address: Option<String>) -> Self {
        Self {
            kind,
            meta,
            address: address.filter(|a| !a.is_empty()),
            status: Status::Discover,
        }
    }

    /// Returns the object name, or an empty string if unset.
    #[must_use]
    pub fn name(&self) -> &str {
        self.meta.name.as_deref().unwrap_or_default()
    }

    /// Returns the object namespace, or an empty string for cluster-scoped objects.
    #[must_use]
    pub fn namespace(&self) -> &str {
        self.meta.namespace.as_deref().unwrap_or_default()
    }

    /// Returns the value of a label.
    #[must_use]
    pub fn label(&self, key: &str) -> Option<&str> {
        self.meta.labels.as_ref()?.get(key).map(String::as_str)
    }

    /// Returns the value of an annotation.
    #[must_use]
    pub fn annotation(&self, key: &str) -> Option<&str> {
        annotation(&self.meta, key)
    }

    /// Returns the resolved address, if any.
    #[must_use]
    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    /// Returns the canonical target name of this object.
    #[must_use]
    pub fn target_name(&self) -> String {
        resource_name(self.kind, &self.meta)
    }

    /// Returns `true` if this snapshot records a deletion.
    #[must_use]
    pub fn is_delete(&self) -> bool {
        self.status == Status::Delete
    }
}

impl From<&Pod> for Resource {
    fn from(pod: &Pod) -> Self {
        let ip = pod.status.as_ref().and_then(|s| s.pod_ip.clone());
        Self::new(Kind::Pod, pod.metadata.clone(), ip)
    }
}

impl From<&Service> for Resource {
    fn from(service: &Service) -> Self {
        // Headless services report "None" as their cluster IP.
        let ip = service
            .spec
            .as_ref()
            .and_then(|s| s.cluster_ip.clone())
            .filter(|ip| ip != "None");
        Self::new(Kind::Service, service.metadata.clone(), ip)
    }
}

impl From<&Node> for Resource {
    fn from(node: &Node) -> Self {
        let addresses = node
            .status
            .as_ref()
            .and_then(|s| s.addresses.as_deref())
            .unwrap_or_default();

        let ip = addresses
            .iter()
            .find(|a| a.type_ == "InternalIP")
            .or_else(|| addresses.first())
            .map(|a| a.address.clone());

        Self::new(Kind::Node, node.metadata.clone(), ip)
    }
}

/// Returns the canonical target name for an object.
///
/// The name only depends on kind, namespace and name, so it is stable across
/// add, update and delete of the same object.
#[must_use]
pub fn resource_name(kind: Kind, meta: &ObjectMeta) -> String {
    let name = meta.name.as_deref().unwrap_or_default();
    match meta.namespace.as_deref() {
        Some(namespace) if !namespace.is_empty() => format!("{kind}/{namespace}/{name}"),
        _ => format!("{kind}/{name}"),
    }
}

pub(crate) fn annotation<'a>(meta: &'a ObjectMeta, key: &str) -> Option<&'a str> {
    meta.annotations.as_ref()?.get(key).map(String::as_str)
}

pub(crate) fn labels(meta: &ObjectMeta) -> impl Iterator<Item = (&String, &String)> {
    meta.labels.iter().flat_map(BTreeMap::iter)
}

#[cfg(test)]
mod tests {
    use k8s_openapi::api::core::v1::{NodeAddress, NodeStatus, PodStatus, ServiceSpec};

    use super::*;

    fn meta(namespace: Option<&str>, name: &str) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.to_string()),
            namespace: namespace.map(String::from),
            ..Default::default()
        }
    }

    #[test]
    fn kind_from_str() {
        assert_eq!("pod".parse::<Kind>().unwrap(), Kind::Pod);
        assert_eq!("Services".parse::<Kind>().unwrap(), Kind::Service);
        assert_eq!(" node ".parse::<Kind>().unwrap(), Kind::Node);
        assert_eq!(
            "ingress".parse::<Kind>(),
            Err(ConfigError::UnknownKind("ingress".to_string()))
        );
    }

    #[test]
    fn resource_name_namespaced() {
        assert_eq!(
            resource_name(Kind::Pod, &meta(Some("test"), "web-0")),
            "pod/test/web-0"
        );
    }

    #[test]
    fn resource_name_cluster_scoped() {
        let unnamespaced = meta(None, "node-1");
        let blank_namespace = meta(Some(""), "node-1");

        assert_eq!(resource_name(Kind::Node, &unnamespaced), "node/node-1");
        assert_eq!(resource_name(Kind::Node, &blank_namespace), "node/node-1");
    }

    #[test]
    fn pod_address_from_status() {
        let pod = Pod {
            metadata: meta(Some("test"), "test"),
            status: Some(PodStatus {
                pod_ip: Some("10.2.3.4".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };

        let resource = Resource::from(&pod);
        assert_eq!(resource.kind, Kind::Pod);
        assert_eq!(resource.address(), Some("10.2.3.4"));
        assert_eq!(resource.status, Status::Discover);
    }

    #[test]
    fn pod_without_ip_is_unresolved() {
        let pod = Pod {
            metadata: meta(Some("test"), "test"),
            status: Some(PodStatus {
                pod_ip: Some(String::new()),
                ..Default::default()
            }),
            ..Default::default()
        };

        assert_eq!(Resource::from(&pod).address(), None);
    }

    #[test]
    fn headless_service_is_unresolved() {
        let service = Service {
            metadata: meta(Some("test"), "db"),
            spec: Some(ServiceSpec {
                cluster_ip: Some("None".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };

        assert_eq!(Resource::from(&service).address(), None);
    }

    #[test]
    fn node_prefers_internal_ip() {
        let node = Node {
            metadata: meta(None, "node-1"),
            status: Some(NodeStatus {
                addresses: Some(vec![
                    NodeAddress {
                        address: "node-1.example.com".to_string(),
                        type_: "Hostname".to_string(),
                    },
                    NodeAddress {
                        address: "192.168.0.10".to_string(),
                        type_: "InternalIP".to_string(),
                    },
                ]),
                ..Default::default()
            }),
            ..Default::default()
        };

        assert_eq!(Resource::from(&node).address(), Some("192.168.0.10"));
    }

    #[test]
    fn label_and_annotation_lookup() {
        let mut m = meta(Some("test"), "test");
        m.labels = Some(BTreeMap::from([("app".to_string(), "web".to_string())]));
        m.annotations = Some(BTreeMap::from([(
            "prometheus.io/scrape".to_string(),
            "true".to_string(),
        )]));
        let resource = Resource::new(Kind::Pod, m, None);

        assert_eq!(resource.label("app"), Some("web"));
        assert_eq!(resource.label("tier"), None);
        assert_eq!(resource.annotation("prometheus.io/scrape"), Some("true"));
    }
}
