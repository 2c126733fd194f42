//! Kubernetes object kinds, queue keys and the cluster snapshot store
//!
//! The ingestion layer reduces every informer callback to a string key
//! `<kind>/<namespace>/<name>` (Node and Gateway keys carry the tenant in
//! the namespace slot). The graph layer decodes keys at its boundary with
//! [`parse_key`] and joins them against [`K8sStore`], the concurrent
//! snapshot of everything AKO watches.

pub mod gateway;
pub mod route;
pub mod watch;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use dashmap::DashMap;
use k8s_openapi::api::core::v1::{Endpoints, Namespace, Node, Pod, Secret, Service};
use k8s_openapi::api::networking::v1::{Ingress, IngressClass};

use crate::crd::{AviInfraSetting, HTTPRule, HostRule};
pub use gateway::{Gateway, GatewayClass};
pub use route::Route;

/// Watched object kinds, the first segment of every ingestion key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum ObjectKind {
    Ingress,
    Route,
    L4LBService,
    Service,
    Endpoints,
    Secret,
    Pod,
    Node,
    IngressClass,
    HostRule,
    HTTPRule,
    AviInfraSetting,
    Gateway,
    GatewayClass,
}

impl ObjectKind {
    /// Canonical key segment for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ingress => "Ingress",
            Self::Route => "Route",
            Self::L4LBService => "L4LBService",
            Self::Service => "Service",
            Self::Endpoints => "Endpoints",
            Self::Secret => "Secret",
            Self::Pod => "Pod",
            Self::Node => "Node",
            Self::IngressClass => "IngressClass",
            Self::HostRule => "HostRule",
            Self::HTTPRule => "HTTPRule",
            Self::AviInfraSetting => "AviInfraSetting",
            Self::Gateway => "Gateway",
            Self::GatewayClass => "GatewayClass",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObjectKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "Ingress" => Self::Ingress,
            "Route" => Self::Route,
            "L4LBService" => Self::L4LBService,
            "Service" => Self::Service,
            "Endpoints" => Self::Endpoints,
            "Secret" => Self::Secret,
            "Pod" => Self::Pod,
            "Node" => Self::Node,
            "IngressClass" => Self::IngressClass,
            "HostRule" => Self::HostRule,
            "HTTPRule" => Self::HTTPRule,
            "AviInfraSetting" => Self::AviInfraSetting,
            "Gateway" => Self::Gateway,
            "GatewayClass" => Self::GatewayClass,
            _ => return Err(()),
        })
    }
}

/// Build an ingestion key.
pub fn encode_key(kind: ObjectKind, namespace: &str, name: &str) -> String {
    format!("{kind}/{namespace}/{name}")
}

/// Decode an ingestion key. Returns `None` for malformed or unknown keys;
/// callers log and drop those rather than panic a worker.
pub fn parse_key(key: &str) -> Option<(ObjectKind, &str, &str)> {
    let mut parts = key.splitn(3, '/');
    let kind = parts.next()?.parse().ok()?;
    let namespace = parts.next()?;
    let name = parts.next()?;
    Some((kind, namespace, name))
}

/// Concurrent map of one kind's objects, keyed `namespace/name`
/// (cluster-scoped kinds use the bare name).
pub struct ObjectStore<T> {
    objects: DashMap<String, Arc<T>>,
}

impl<T> Default for ObjectStore<T> {
    fn default() -> Self {
        Self {
            objects: DashMap::new(),
        }
    }
}

impl<T> ObjectStore<T> {
    fn store_key(namespace: &str, name: &str) -> String {
        if namespace.is_empty() {
            name.to_string()
        } else {
            format!("{namespace}/{name}")
        }
    }

    /// Fetch one object.
    pub fn get(&self, namespace: &str, name: &str) -> Option<Arc<T>> {
        self.objects
            .get(&Self::store_key(namespace, name))
            .map(|e| Arc::clone(e.value()))
    }

    /// Insert or replace; returns the previous object so update handlers
    /// can diff old against new.
    pub fn insert(&self, namespace: &str, name: &str, obj: T) -> Option<Arc<T>> {
        self.objects
            .insert(Self::store_key(namespace, name), Arc::new(obj))
    }

    /// Remove; returns the last known object (the tombstone content).
    pub fn remove(&self, namespace: &str, name: &str) -> Option<Arc<T>> {
        self.objects
            .remove(&Self::store_key(namespace, name))
            .map(|(_, v)| v)
    }

    /// All objects of one namespace, with their names.
    pub fn list_namespace(&self, namespace: &str) -> Vec<(String, Arc<T>)> {
        let prefix = format!("{namespace}/");
        self.objects
            .iter()
            .filter(|e| e.key().starts_with(&prefix))
            .map(|e| {
                let name = e.key()[prefix.len()..].to_string();
                (name, Arc::clone(e.value()))
            })
            .collect()
    }

    /// Every object with its store key.
    pub fn list_all(&self) -> Vec<(String, Arc<T>)> {
        self.objects
            .iter()
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect()
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

/// Snapshot of all watched cluster state.
///
/// Populated by the ingestion layer as events arrive; read by the graph
/// layer when rebuilding models. Both sides touch it lock-free per key.
#[derive(Default)]
pub struct K8sStore {
    /// Ingresses by namespace/name
    pub ingresses: ObjectStore<Ingress>,
    /// OpenShift Routes by namespace/name
    pub routes: ObjectStore<Route>,
    /// Services (all types) by namespace/name
    pub services: ObjectStore<Service>,
    /// Endpoints by namespace/name
    pub endpoints: ObjectStore<Endpoints>,
    /// Secrets by namespace/name
    pub secrets: ObjectStore<Secret>,
    /// Pods by namespace/name (NodePortLocal mode only)
    pub pods: ObjectStore<Pod>,
    /// Nodes by name
    pub nodes: ObjectStore<Node>,
    /// Namespaces by name
    pub namespaces: ObjectStore<Namespace>,
    /// IngressClasses by name
    pub ingress_classes: ObjectStore<IngressClass>,
    /// Gateways by namespace/name
    pub gateways: ObjectStore<Gateway>,
    /// GatewayClasses by name
    pub gateway_classes: ObjectStore<GatewayClass>,
    /// HostRule CRDs by namespace/name
    pub host_rules: ObjectStore<HostRule>,
    /// HTTPRule CRDs by namespace/name
    pub http_rules: ObjectStore<HTTPRule>,
    /// AviInfraSetting CRDs by name
    pub infra_settings: ObjectStore<AviInfraSetting>,
}

impl K8sStore {
    /// Fresh empty store.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}
