//! Update filtering and the namespace filter
//!
//! Informers re-deliver objects on resyncs and on status-only writes; the
//! predicates here admit an Update only when it carries semantic change,
//! which keeps resync storms out of the pipeline. The namespace filter is
//! the pluggable membership check gating which namespaces AKO serves.

use dashmap::DashSet;
use k8s_openapi::api::core::v1::{Endpoints, Namespace, Node, Secret, Service};
use k8s_openapi::api::networking::v1::Ingress;

use crate::k8s::Route;
use crate::names::fnv_hash32;

fn hash_of<T: serde::Serialize>(value: &T) -> u32 {
    fnv_hash32(&serde_json::to_string(value).unwrap_or_default())
}

/// Ingress updates matter when the spec or annotations hash moved.
pub fn is_ingress_updated(old: &Ingress, new: &Ingress) -> bool {
    if old.metadata.resource_version == new.metadata.resource_version {
        return false;
    }
    hash_of(&old.spec) != hash_of(&new.spec)
        || hash_of(&old.metadata.annotations) != hash_of(&new.metadata.annotations)
}

/// Route updates matter when the spec hash moved.
pub fn is_route_updated(old: &Route, new: &Route) -> bool {
    if old.metadata.resource_version == new.metadata.resource_version {
        return false;
    }
    hash_of(&old.spec) != hash_of(&new.spec)
        || hash_of(&old.metadata.annotations) != hash_of(&new.metadata.annotations)
}

/// Service updates matter on any resource-version or annotation change.
pub fn is_service_updated(old: &Service, new: &Service) -> bool {
    old.metadata.resource_version != new.metadata.resource_version
        || old.metadata.annotations != new.metadata.annotations
}

/// Endpoints updates matter when the subsets differ.
pub fn is_endpoints_updated(old: &Endpoints, new: &Endpoints) -> bool {
    old.subsets != new.subsets
}

/// Secret updates matter when both version and data moved.
pub fn is_secret_updated(old: &Secret, new: &Secret) -> bool {
    old.metadata.resource_version != new.metadata.resource_version
        && old.data != new.data
}

fn node_internal_ip(node: &Node) -> Option<&str> {
    node.status
        .as_ref()?
        .addresses
        .as_ref()?
        .iter()
        .find(|a| a.type_ == "InternalIP")
        .map(|a| a.address.as_str())
}

/// Node updates matter when the InternalIP, pod CIDR or labels moved.
pub fn is_node_updated(old: &Node, new: &Node) -> bool {
    if old.metadata.resource_version == new.metadata.resource_version {
        return false;
    }
    if node_internal_ip(old) != node_internal_ip(new) {
        return true;
    }
    let cidr = |n: &Node| n.spec.as_ref().and_then(|s| s.pod_cidr.clone());
    if cidr(old) != cidr(new) {
        return true;
    }
    old.metadata.labels != new.metadata.labels
}

/// Namespace updates matter when the label hash moved.
pub fn is_namespace_updated(old: &Namespace, new: &Namespace) -> bool {
    if old.metadata.resource_version == new.metadata.resource_version {
        return false;
    }
    hash_of(&old.metadata.labels) != hash_of(&new.metadata.labels)
}

/// Membership check for serving namespaces.
///
/// With no sync label configured every namespace is admitted. With one,
/// only namespaces whose labels carry the configured pair are valid; the
/// ingestion layer replays a namespace's objects when it transitions.
pub struct NamespaceFilter {
    label: Option<(String, String)>,
    valid: DashSet<String>,
}

impl NamespaceFilter {
    /// Build from the configured sync label.
    pub fn new(label: Option<(String, String)>) -> Self {
        Self {
            label,
            valid: DashSet::new(),
        }
    }

    /// A filter admitting everything (migration disabled).
    pub fn admit_all() -> Self {
        Self::new(None)
    }

    /// Whether namespace migration filtering is on.
    pub fn enabled(&self) -> bool {
        self.label.is_some()
    }

    /// Whether a namespace's labels satisfy the sync label.
    pub fn labels_match(&self, labels: Option<&std::collections::BTreeMap<String, String>>) -> bool {
        match &self.label {
            None => true,
            Some((k, v)) => labels.map_or(false, |l| l.get(k) == Some(v)),
        }
    }

    /// Whether a namespace is currently served.
    pub fn namespace_accepted(&self, namespace: &str) -> bool {
        !self.enabled() || self.valid.contains(namespace)
    }

    /// Mark a namespace valid.
    pub fn add_namespace(&self, namespace: &str) {
        self.valid.insert(namespace.to_string());
    }

    /// Drop a namespace from the valid set.
    pub fn delete_namespace(&self, namespace: &str) {
        self.valid.remove(namespace);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn ingress(rv: &str, host: &str) -> Ingress {
        serde_json::from_value(serde_json::json!({
            "metadata": { "name": "w", "namespace": "red", "resourceVersion": rv },
            "spec": { "rules": [ { "host": host } ] }
        }))
        .unwrap()
    }

    #[test]
    fn resync_deliveries_are_filtered() {
        let a = ingress("1", "a.x");
        let b = ingress("1", "b.x");
        // Same resource version: never an update, whatever the content.
        assert!(!is_ingress_updated(&a, &b));
    }

    #[test]
    fn status_only_ingress_writes_are_filtered() {
        let a = ingress("1", "a.x");
        let b = ingress("2", "a.x");
        assert!(!is_ingress_updated(&a, &b));
        let c = ingress("3", "c.x");
        assert!(is_ingress_updated(&a, &c));
    }

    #[test]
    fn secret_updates_require_data_change() {
        let old = Secret {
            metadata: ObjectMeta {
                resource_version: Some("1".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        let mut new = old.clone();
        new.metadata.resource_version = Some("2".to_string());
        // Version moved, data identical.
        assert!(!is_secret_updated(&old, &new));
        new.data = Some(
            [("tls.crt".to_string(), k8s_openapi::ByteString(b"x".to_vec()))]
                .into_iter()
                .collect(),
        );
        assert!(is_secret_updated(&old, &new));
    }

    #[test]
    fn node_label_changes_are_updates() {
        let old: Node = serde_json::from_value(serde_json::json!({
            "metadata": { "name": "n", "resourceVersion": "1", "labels": { "zone": "a" } }
        }))
        .unwrap();
        let new: Node = serde_json::from_value(serde_json::json!({
            "metadata": { "name": "n", "resourceVersion": "2", "labels": { "zone": "b" } }
        }))
        .unwrap();
        assert!(is_node_updated(&old, &new));
    }

    #[test]
    fn disabled_filter_admits_everything() {
        let filter = NamespaceFilter::admit_all();
        assert!(!filter.enabled());
        assert!(filter.namespace_accepted("anything"));
    }

    #[test]
    fn enabled_filter_tracks_valid_namespaces() {
        let filter = NamespaceFilter::new(Some(("env".to_string(), "prod".to_string())));
        assert!(!filter.namespace_accepted("ns1"));
        filter.add_namespace("ns1");
        assert!(filter.namespace_accepted("ns1"));
        filter.delete_namespace("ns1");
        assert!(!filter.namespace_accepted("ns1"));

        let labels = [("env".to_string(), "prod".to_string())].into_iter().collect();
        assert!(filter.labels_match(Some(&labels)));
        let wrong = [("env".to_string(), "dev".to_string())].into_iter().collect();
        assert!(!filter.labels_match(Some(&wrong)));
        assert!(!filter.labels_match(None));
    }
}
