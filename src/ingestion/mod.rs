//! Ingestion layer: watch events in, sharded keys out
//!
//! Every handler follows the same contract: keep the snapshot store
//! current, drop the event while `DisableSync` is set, apply the
//! namespace filter and the per-kind update predicate, then enqueue the
//! canonical `<kind>/<namespace>/<name>` key on the worker selected by
//! `FNV-1a(namespace) mod N` so per-namespace ordering holds. Tombstone
//! unwrapping is the watch library's job; handlers always receive typed
//! objects.
//!
//! Delete events are admitted even when the namespace filter rejects the
//! namespace (cleanup must not depend on current labels); the legacy
//! behavior of dropping them is available behind
//! `AkoConfig::strict_namespace_deletes`.

pub mod filters;

use std::sync::Arc;

use k8s_openapi::api::core::v1::{Endpoints, Namespace, Node, Pod, Secret, Service};
use k8s_openapi::api::networking::v1::{Ingress, IngressClass};
use kube::Resource;
use tracing::{debug, warn};

use crate::config::{self, AkoConfig};
use crate::crd::{AviInfraSetting, HTTPRule, HostRule};
use crate::graph::l7::route_has_valid_backends;
use crate::k8s::watch::WatchedEvent;
use crate::k8s::{encode_key, Gateway, GatewayClass, K8sStore, ObjectKind, Route};
use crate::queue::WorkerQueue;
use crate::status::{ObjectStatusError, StatusItem};
use crate::AVI_SECRET;

use self::filters::NamespaceFilter;

/// Namespace replay annotations, logged with each replayed key.
pub const NS_FILTER_ADD: &str = "NsFilterAdd";
/// See [`NS_FILTER_ADD`].
pub const NS_FILTER_DELETE: &str = "NsFilterDelete";

/// The ingestion layer: one instance shared by every watcher.
pub struct IngestionLayer {
    cfg: Arc<AkoConfig>,
    store: Arc<K8sStore>,
    ns_filter: Arc<NamespaceFilter>,
    ingestion_queue: Arc<WorkerQueue>,
    status_queue: Arc<WorkerQueue>,
}

impl IngestionLayer {
    /// Wire the layer up.
    pub fn new(
        cfg: Arc<AkoConfig>,
        store: Arc<K8sStore>,
        ns_filter: Arc<NamespaceFilter>,
        ingestion_queue: Arc<WorkerQueue>,
        status_queue: Arc<WorkerQueue>,
    ) -> Arc<Self> {
        Arc::new(Self {
            cfg,
            store,
            ns_filter,
            ingestion_queue,
            status_queue,
        })
    }

    fn enqueue(&self, locality: &str, key: String, msg: &str) {
        debug!(key = %key, msg, "Ingestion enqueue");
        self.ingestion_queue.enqueue(locality, key);
    }

    /// Whether a Delete from a filtered-out namespace is admitted.
    fn delete_admitted(&self, namespace: &str) -> bool {
        if !self.cfg.strict_namespace_deletes {
            return true;
        }
        self.ns_filter.namespace_accepted(namespace)
    }

    fn publish_status(&self, item: StatusItem) {
        match item.encode() {
            Ok(payload) => self.status_queue.enqueue_key(payload),
            Err(e) => warn!(error = %e, "Failed to encode status item, dropped"),
        }
    }

    fn meta_ns_name<K: Resource>(obj: &K) -> (String, String) {
        (
            obj.meta().namespace.clone().unwrap_or_default(),
            obj.meta().name.clone().unwrap_or_default(),
        )
    }

    // ----- core kinds -----

    /// Ingress watch callback.
    pub fn ingress_event(&self, ev: WatchedEvent<Ingress>) {
        match ev {
            WatchedEvent::Applied(ingress) => {
                let (ns, name) = Self::meta_ns_name(&ingress);
                let old = self.store.ingresses.insert(&ns, &name, ingress);
                if config::disable_sync() {
                    return;
                }
                if let Some(old) = old {
                    let new = self.store.ingresses.get(&ns, &name).unwrap();
                    if !filters::is_ingress_updated(&old, &new) {
                        return;
                    }
                }
                if !self.ns_filter.namespace_accepted(&ns) {
                    debug!(namespace = %ns, "Ingress event: namespace didn't qualify filter");
                    return;
                }
                self.enqueue(&ns, encode_key(ObjectKind::Ingress, &ns, &name), "ADD/UPDATE");
            }
            WatchedEvent::Deleted(ingress) => {
                let (ns, name) = Self::meta_ns_name(&ingress);
                self.store.ingresses.remove(&ns, &name);
                if config::disable_sync() || !self.delete_admitted(&ns) {
                    return;
                }
                self.enqueue(&ns, encode_key(ObjectKind::Ingress, &ns, &name), "DELETE");
            }
        }
    }

    /// Route watch callback.
    pub fn route_event(&self, ev: WatchedEvent<Route>) {
        match ev {
            WatchedEvent::Applied(route) => {
                let (ns, name) = Self::meta_ns_name(&route);
                let valid_backends = route_has_valid_backends(&route);
                let old = self.store.routes.insert(&ns, &name, route);
                if config::disable_sync() {
                    return;
                }
                if let Some(old) = old {
                    let new = self.store.routes.get(&ns, &name).unwrap();
                    if !filters::is_route_updated(&old, &new) {
                        return;
                    }
                }
                if !self.ns_filter.namespace_accepted(&ns) {
                    debug!(namespace = %ns, "Route event: namespace didn't qualify filter");
                    return;
                }
                let key = encode_key(ObjectKind::Route, &ns, &name);
                if !valid_backends {
                    // Report and still enqueue so stale VS state is cleaned.
                    self.publish_status(StatusItem::ObjectError(ObjectStatusError {
                        key: key.clone(),
                        message: "multiple backends with the same service name".to_string(),
                    }));
                }
                self.enqueue(&ns, key, "ADD/UPDATE");
            }
            WatchedEvent::Deleted(route) => {
                let (ns, name) = Self::meta_ns_name(&route);
                self.store.routes.remove(&ns, &name);
                if config::disable_sync() || !self.delete_admitted(&ns) {
                    return;
                }
                self.enqueue(&ns, encode_key(ObjectKind::Route, &ns, &name), "DELETE");
            }
        }
    }

    fn service_kind(&self, svc: &Service) -> ObjectKind {
        let is_lb = svc.spec.as_ref().and_then(|s| s.type_.as_deref()) == Some("LoadBalancer");
        if is_lb && !config::layer7_only() {
            ObjectKind::L4LBService
        } else {
            ObjectKind::Service
        }
    }

    /// Service watch callback; LoadBalancer Services get their own kind.
    pub fn service_event(&self, ev: WatchedEvent<Service>) {
        match ev {
            WatchedEvent::Applied(svc) => {
                let (ns, name) = Self::meta_ns_name(&svc);
                let kind = self.service_kind(&svc);
                let old = self.store.services.insert(&ns, &name, svc);
                if config::disable_sync() {
                    return;
                }
                if let Some(old) = old {
                    let new = self.store.services.get(&ns, &name).unwrap();
                    if !filters::is_service_updated(&old, &new) {
                        return;
                    }
                }
                match kind {
                    ObjectKind::L4LBService => {
                        if !self.ns_filter.namespace_accepted(&ns) {
                            return;
                        }
                        if self.cfg.advanced_l4 || self.cfg.services_api {
                            self.check_gateway_port_conflict(&ns, &name);
                        }
                    }
                    _ => {
                        // Plain Services only matter as Ingress/Route
                        // backends, which advanced L4 has none of.
                        if self.cfg.advanced_l4 || !self.ns_filter.namespace_accepted(&ns) {
                            return;
                        }
                    }
                }
                self.enqueue(&ns, encode_key(kind, &ns, &name), "ADD/UPDATE");
            }
            WatchedEvent::Deleted(svc) => {
                let (ns, name) = Self::meta_ns_name(&svc);
                let kind = self.service_kind(&svc);
                self.store.services.remove(&ns, &name);
                if config::disable_sync() || !self.delete_admitted(&ns) {
                    return;
                }
                if kind == ObjectKind::Service && self.cfg.advanced_l4 {
                    return;
                }
                self.enqueue(&ns, encode_key(kind, &ns, &name), "DELETE");
            }
        }
    }

    /// A LoadBalancer Service whose port collides with a gateway listener
    /// that does not select it gets a status event before ingestion.
    fn check_gateway_port_conflict(&self, namespace: &str, svc_name: &str) {
        let Some(svc) = self.store.services.get(namespace, svc_name) else { return };
        let svc_labels = svc.metadata.labels.clone().unwrap_or_default();
        let svc_ports: Vec<i32> = svc
            .spec
            .iter()
            .flat_map(|s| s.ports.iter().flatten())
            .map(|p| p.port)
            .collect();
        for (gw_name, gw) in self.store.gateways.list_namespace(namespace) {
            for listener in &gw.spec.listeners {
                if !svc_ports.contains(&listener.port) {
                    continue;
                }
                let selected = listener
                    .routes
                    .as_ref()
                    .and_then(|r| r.selector.as_ref())
                    .map(|s| s.match_labels.iter().all(|(k, v)| svc_labels.get(k) == Some(v)))
                    .unwrap_or(false);
                if !selected {
                    self.publish_status(StatusItem::ObjectError(ObjectStatusError {
                        key: encode_key(ObjectKind::L4LBService, namespace, svc_name),
                        message: format!(
                            "port {} conflicts with gateway {gw_name} listener",
                            listener.port
                        ),
                    }));
                }
            }
        }
    }

    /// Endpoints watch callback.
    pub fn endpoints_event(&self, ev: WatchedEvent<Endpoints>) {
        match ev {
            WatchedEvent::Applied(eps) => {
                let (ns, name) = Self::meta_ns_name(&eps);
                let old = self.store.endpoints.insert(&ns, &name, eps);
                if config::disable_sync() {
                    return;
                }
                if let Some(old) = old {
                    let new = self.store.endpoints.get(&ns, &name).unwrap();
                    if !filters::is_endpoints_updated(&old, &new) {
                        return;
                    }
                }
                self.enqueue(&ns, encode_key(ObjectKind::Endpoints, &ns, &name), "ADD/UPDATE");
            }
            WatchedEvent::Deleted(eps) => {
                let (ns, name) = Self::meta_ns_name(&eps);
                self.store.endpoints.remove(&ns, &name);
                if config::disable_sync() {
                    return;
                }
                self.enqueue(&ns, encode_key(ObjectKind::Endpoints, &ns, &name), "DELETE");
            }
        }
    }

    /// Secret watch callback; the controller's own credential Secret never
    /// enters the pipeline.
    pub fn secret_event(&self, ev: WatchedEvent<Secret>) {
        match ev {
            WatchedEvent::Applied(secret) => {
                let (ns, name) = Self::meta_ns_name(&secret);
                let own = ns == self.cfg.ako_namespace && name == AVI_SECRET;
                let old = self.store.secrets.insert(&ns, &name, secret);
                if config::disable_sync() || own {
                    return;
                }
                if let Some(old) = old {
                    let new = self.store.secrets.get(&ns, &name).unwrap();
                    if !filters::is_secret_updated(&old, &new) {
                        return;
                    }
                }
                self.enqueue(&ns, encode_key(ObjectKind::Secret, &ns, &name), "ADD/UPDATE");
            }
            WatchedEvent::Deleted(secret) => {
                let (ns, name) = Self::meta_ns_name(&secret);
                self.store.secrets.remove(&ns, &name);
                if config::disable_sync()
                    || (ns == self.cfg.ako_namespace && name == AVI_SECRET)
                {
                    return;
                }
                self.enqueue(&ns, encode_key(ObjectKind::Secret, &ns, &name), "DELETE");
            }
        }
    }

    /// Pod watch callback (NodePortLocal mode only).
    pub fn pod_event(&self, ev: WatchedEvent<Pod>) {
        match ev {
            WatchedEvent::Applied(pod) => {
                let (ns, name) = Self::meta_ns_name(&pod);
                let old = self.store.pods.insert(&ns, &name, pod);
                if config::disable_sync() {
                    return;
                }
                if let Some(old) = old {
                    let new = self.store.pods.get(&ns, &name).unwrap();
                    if old.metadata.resource_version == new.metadata.resource_version {
                        return;
                    }
                }
                self.enqueue(&ns, encode_key(ObjectKind::Pod, &ns, &name), "ADD/UPDATE");
            }
            WatchedEvent::Deleted(pod) => {
                let (ns, name) = Self::meta_ns_name(&pod);
                self.store.pods.remove(&ns, &name);
                if config::disable_sync() {
                    return;
                }
                self.enqueue(&ns, encode_key(ObjectKind::Pod, &ns, &name), "DELETE");
            }
        }
    }

    /// Node watch callback; keys carry the tenant in the namespace slot
    /// and shard by tenant so node churn serialises onto one worker.
    pub fn node_event(&self, ev: WatchedEvent<Node>) {
        let tenant = self.cfg.tenant.clone();
        match ev {
            WatchedEvent::Applied(node) => {
                let name = node.meta().name.clone().unwrap_or_default();
                let old = self.store.nodes.insert("", &name, node);
                if config::disable_sync() {
                    return;
                }
                if let Some(old) = old {
                    let new = self.store.nodes.get("", &name).unwrap();
                    if !filters::is_node_updated(&old, &new) {
                        debug!(node = %name, "Node object did not change");
                        return;
                    }
                }
                self.enqueue(&tenant, encode_key(ObjectKind::Node, &tenant, &name), "ADD/UPDATE");
            }
            WatchedEvent::Deleted(node) => {
                let name = node.meta().name.clone().unwrap_or_default();
                self.store.nodes.remove("", &name);
                if config::disable_sync() {
                    return;
                }
                self.enqueue(&tenant, encode_key(ObjectKind::Node, &tenant, &name), "DELETE");
            }
        }
    }

    /// Namespace watch callback: maintains the filter and replays a
    /// namespace's objects on validity transitions.
    pub fn namespace_event(&self, ev: WatchedEvent<Namespace>) {
        if !self.ns_filter.enabled() {
            return;
        }
        match ev {
            WatchedEvent::Applied(ns_obj) => {
                let name = ns_obj.meta().name.clone().unwrap_or_default();
                let old = self.store.namespaces.insert("", &name, ns_obj);
                if config::disable_sync() {
                    return;
                }
                let new = self.store.namespaces.get("", &name).unwrap();
                let new_ok = self.ns_filter.labels_match(new.metadata.labels.as_ref());
                match old {
                    None => {
                        if new_ok {
                            self.ns_filter.add_namespace(&name);
                            debug!(namespace = %name, "Namespace passed filter");
                        } else {
                            self.ns_filter.delete_namespace(&name);
                        }
                    }
                    Some(old) => {
                        if !filters::is_namespace_updated(&old, &new) {
                            return;
                        }
                        let old_ok = self.ns_filter.labels_match(old.metadata.labels.as_ref());
                        if !old_ok && new_ok {
                            self.ns_filter.add_namespace(&name);
                            self.replay_namespace(&name, NS_FILTER_ADD);
                        } else if old_ok && !new_ok {
                            self.ns_filter.delete_namespace(&name);
                            self.replay_namespace(&name, NS_FILTER_DELETE);
                        }
                    }
                }
            }
            WatchedEvent::Deleted(ns_obj) => {
                let name = ns_obj.meta().name.clone().unwrap_or_default();
                self.store.namespaces.remove("", &name);
                self.ns_filter.delete_namespace(&name);
            }
        }
    }

    /// Re-enqueue every Ingress/Route/Service/Gateway of a namespace after
    /// a filter transition. The namespace's new validity makes the graph
    /// layer build or tear the models down.
    fn replay_namespace(&self, namespace: &str, msg: &str) {
        for (name, _) in self.store.ingresses.list_namespace(namespace) {
            self.enqueue(namespace, encode_key(ObjectKind::Ingress, namespace, &name), msg);
        }
        for (name, _) in self.store.routes.list_namespace(namespace) {
            self.enqueue(namespace, encode_key(ObjectKind::Route, namespace, &name), msg);
        }
        for (name, svc) in self.store.services.list_namespace(namespace) {
            let kind = self.service_kind(&svc);
            if kind == ObjectKind::L4LBService || !self.cfg.advanced_l4 {
                self.enqueue(namespace, encode_key(kind, namespace, &name), msg);
            }
        }
        if self.cfg.services_api || self.cfg.advanced_l4 {
            for (name, _) in self.store.gateways.list_namespace(namespace) {
                self.enqueue(
                    &self.cfg.tenant,
                    encode_key(ObjectKind::Gateway, &self.cfg.tenant, &name),
                    msg,
                );
            }
        }
    }

    // ----- classes, gateways and CRDs -----

    /// IngressClass watch callback.
    pub fn ingress_class_event(&self, ev: WatchedEvent<IngressClass>) {
        match ev {
            WatchedEvent::Applied(class) => {
                let name = class.meta().name.clone().unwrap_or_default();
                let old = self.store.ingress_classes.insert("", &name, class);
                if config::disable_sync() {
                    return;
                }
                if let Some(old) = old {
                    let new = self.store.ingress_classes.get("", &name).unwrap();
                    if old.metadata.resource_version == new.metadata.resource_version {
                        return;
                    }
                }
                self.enqueue(&name, encode_key(ObjectKind::IngressClass, "", &name), "ADD/UPDATE");
            }
            WatchedEvent::Deleted(class) => {
                let name = class.meta().name.clone().unwrap_or_default();
                self.store.ingress_classes.remove("", &name);
                if config::disable_sync() {
                    return;
                }
                self.enqueue(&name, encode_key(ObjectKind::IngressClass, "", &name), "DELETE");
            }
        }
    }

    /// Gateway watch callback; keyed by tenant like Nodes.
    pub fn gateway_event(&self, ev: WatchedEvent<Gateway>) {
        let tenant = self.cfg.tenant.clone();
        match ev {
            WatchedEvent::Applied(gw) => {
                let (ns, name) = Self::meta_ns_name(&gw);
                let old = self.store.gateways.insert(&ns, &name, gw);
                if config::disable_sync() {
                    return;
                }
                if let Some(old) = old {
                    let new = self.store.gateways.get(&ns, &name).unwrap();
                    if old.metadata.resource_version == new.metadata.resource_version {
                        return;
                    }
                }
                if !self.ns_filter.namespace_accepted(&ns) {
                    return;
                }
                self.enqueue(&tenant, encode_key(ObjectKind::Gateway, &tenant, &name), "ADD/UPDATE");
            }
            WatchedEvent::Deleted(gw) => {
                let (ns, name) = Self::meta_ns_name(&gw);
                self.store.gateways.remove(&ns, &name);
                if config::disable_sync() || !self.delete_admitted(&ns) {
                    return;
                }
                self.enqueue(&tenant, encode_key(ObjectKind::Gateway, &tenant, &name), "DELETE");
            }
        }
    }

    /// GatewayClass watch callback.
    pub fn gateway_class_event(&self, ev: WatchedEvent<GatewayClass>) {
        let tenant = self.cfg.tenant.clone();
        match ev {
            WatchedEvent::Applied(class) => {
                let name = class.meta().name.clone().unwrap_or_default();
                self.store.gateway_classes.insert("", &name, class);
                if config::disable_sync() {
                    return;
                }
                self.enqueue(&tenant, encode_key(ObjectKind::GatewayClass, &tenant, &name), "ADD/UPDATE");
            }
            WatchedEvent::Deleted(class) => {
                let name = class.meta().name.clone().unwrap_or_default();
                self.store.gateway_classes.remove("", &name);
                if config::disable_sync() {
                    return;
                }
                self.enqueue(&tenant, encode_key(ObjectKind::GatewayClass, &tenant, &name), "DELETE");
            }
        }
    }

    /// HostRule watch callback.
    pub fn host_rule_event(&self, ev: WatchedEvent<HostRule>) {
        match ev {
            WatchedEvent::Applied(rule) => {
                let (ns, name) = Self::meta_ns_name(&rule);
                self.store.host_rules.insert(&ns, &name, rule);
                if config::disable_sync() {
                    return;
                }
                self.enqueue(&ns, encode_key(ObjectKind::HostRule, &ns, &name), "ADD/UPDATE");
            }
            WatchedEvent::Deleted(rule) => {
                let (ns, name) = Self::meta_ns_name(&rule);
                self.store.host_rules.remove(&ns, &name);
                if config::disable_sync() {
                    return;
                }
                self.enqueue(&ns, encode_key(ObjectKind::HostRule, &ns, &name), "DELETE");
            }
        }
    }

    /// HTTPRule watch callback.
    pub fn http_rule_event(&self, ev: WatchedEvent<HTTPRule>) {
        match ev {
            WatchedEvent::Applied(rule) => {
                let (ns, name) = Self::meta_ns_name(&rule);
                self.store.http_rules.insert(&ns, &name, rule);
                if config::disable_sync() {
                    return;
                }
                self.enqueue(&ns, encode_key(ObjectKind::HTTPRule, &ns, &name), "ADD/UPDATE");
            }
            WatchedEvent::Deleted(rule) => {
                let (ns, name) = Self::meta_ns_name(&rule);
                self.store.http_rules.remove(&ns, &name);
                if config::disable_sync() {
                    return;
                }
                self.enqueue(&ns, encode_key(ObjectKind::HTTPRule, &ns, &name), "DELETE");
            }
        }
    }

    /// AviInfraSetting watch callback (cluster-scoped).
    pub fn infra_setting_event(&self, ev: WatchedEvent<AviInfraSetting>) {
        match ev {
            WatchedEvent::Applied(setting) => {
                let name = setting.meta().name.clone().unwrap_or_default();
                self.store.infra_settings.insert("", &name, setting);
                if config::disable_sync() {
                    return;
                }
                self.enqueue(&name, encode_key(ObjectKind::AviInfraSetting, "", &name), "ADD/UPDATE");
            }
            WatchedEvent::Deleted(setting) => {
                let name = setting.meta().name.clone().unwrap_or_default();
                self.store.infra_settings.remove("", &name);
                if config::disable_sync() {
                    return;
                }
                self.enqueue(&name, encode_key(ObjectKind::AviInfraSetting, "", &name), "DELETE");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VipNetwork;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    // The DisableSync flag is process-wide; serialise the tests that
    // read or flip it.
    use crate::config::TEST_FLAG_LOCK as FLAG_LOCK;

    fn test_config() -> Arc<AkoConfig> {
        Arc::new(AkoConfig {
            cluster_name: "c1".to_string(),
            vip_network_list: vec![VipNetwork {
                network_name: "net".to_string(),
                cidr: None,
            }],
            ..Default::default()
        })
    }

    fn layer_with_filter(
        filter: NamespaceFilter,
    ) -> (Arc<IngestionLayer>, Arc<WorkerQueue>, Arc<K8sStore>) {
        let queue = WorkerQueue::new("ingestion-test", 1);
        let store = K8sStore::new();
        let layer = IngestionLayer::new(
            test_config(),
            Arc::clone(&store),
            Arc::new(filter),
            Arc::clone(&queue),
            WorkerQueue::new("status-test", 1),
        );
        (layer, queue, store)
    }

    fn drain(queue: &Arc<WorkerQueue>) -> Vec<String> {
        // Test-only synchronous drain through a recording handler.
        use crate::queue::QueueHandler;
        use std::sync::Mutex;
        struct Rec(Mutex<Vec<String>>);
        #[async_trait::async_trait]
        impl QueueHandler for Rec {
            async fn sync(&self, key: String) -> crate::Result<()> {
                self.0.lock().unwrap().push(key);
                Ok(())
            }
        }
        let rec = Arc::new(Rec(Mutex::new(Vec::new())));
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        rt.block_on(async {
            let stop = tokio_util::sync::CancellationToken::new();
            let handles = queue.run(rec.clone(), stop.clone()).await;
            stop.cancel();
            for h in handles {
                let _ = h.await;
            }
        });
        let keys = rec.0.lock().unwrap().clone();
        keys
    }

    fn ingress(ns: &str, name: &str, rv: &str) -> Ingress {
        Ingress {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(ns.to_string()),
                resource_version: Some(rv.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn disable_sync_drops_events_but_keeps_the_store_current() {
        let _guard = FLAG_LOCK.lock().unwrap();
        config::set_disable_sync(true);
        let (layer, queue, store) = layer_with_filter(NamespaceFilter::admit_all());
        layer.ingress_event(WatchedEvent::Applied(ingress("red", "web", "1")));
        assert!(store.ingresses.get("red", "web").is_some());
        assert!(drain(&queue).is_empty());
        config::set_disable_sync(false);
    }

    #[test]
    fn ingress_add_then_resync_enqueues_once() {
        let _guard = FLAG_LOCK.lock().unwrap();
        config::set_disable_sync(false);
        let (layer, queue, _) = layer_with_filter(NamespaceFilter::admit_all());
        layer.ingress_event(WatchedEvent::Applied(ingress("red", "web", "1")));
        // Same resource version again (informer resync).
        layer.ingress_event(WatchedEvent::Applied(ingress("red", "web", "1")));
        assert_eq!(drain(&queue), vec!["Ingress/red/web"]);
    }

    #[test]
    fn deletes_from_filtered_namespaces_are_admitted_by_default() {
        let _guard = FLAG_LOCK.lock().unwrap();
        config::set_disable_sync(false);
        let filter = NamespaceFilter::new(Some(("env".to_string(), "prod".to_string())));
        let (layer, queue, _) = layer_with_filter(filter);
        // Namespace never marked valid; delete still flows.
        layer.ingress_event(WatchedEvent::Deleted(ingress("ns1", "web", "2")));
        assert_eq!(drain(&queue), vec!["Ingress/ns1/web"]);
    }

    #[test]
    fn own_credential_secret_is_filtered() {
        let _guard = FLAG_LOCK.lock().unwrap();
        config::set_disable_sync(false);
        let (layer, queue, _) = layer_with_filter(NamespaceFilter::admit_all());
        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(AVI_SECRET.to_string()),
                namespace: Some("avi-system".to_string()),
                resource_version: Some("1".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        layer.secret_event(WatchedEvent::Applied(secret));
        assert!(drain(&queue).is_empty());
    }

    #[test]
    fn namespace_label_flip_replays_the_namespace() {
        let _guard = FLAG_LOCK.lock().unwrap();
        config::set_disable_sync(false);
        let filter = NamespaceFilter::new(Some(("env".to_string(), "prod".to_string())));
        let (layer, queue, store) = layer_with_filter(filter);

        store.ingresses.insert("ns1", "web", ingress("ns1", "web", "1"));

        let ns_prod: Namespace = serde_json::from_value(serde_json::json!({
            "metadata": { "name": "ns1", "resourceVersion": "1", "labels": { "env": "prod" } }
        }))
        .unwrap();
        layer.namespace_event(WatchedEvent::Applied(ns_prod));
        assert!(layer.ns_filter.namespace_accepted("ns1"));

        let ns_dev: Namespace = serde_json::from_value(serde_json::json!({
            "metadata": { "name": "ns1", "resourceVersion": "2", "labels": { "env": "dev" } }
        }))
        .unwrap();
        layer.namespace_event(WatchedEvent::Applied(ns_dev));
        assert!(!layer.ns_filter.namespace_accepted("ns1"));
        // The flip replayed the namespace's ingress.
        assert_eq!(drain(&queue), vec!["Ingress/ns1/web"]);
    }

    #[test]
    fn node_keys_carry_the_tenant() {
        let _guard = FLAG_LOCK.lock().unwrap();
        config::set_disable_sync(false);
        let (layer, queue, _) = layer_with_filter(NamespaceFilter::admit_all());
        let node: Node = serde_json::from_value(serde_json::json!({
            "metadata": { "name": "worker-1", "resourceVersion": "1" }
        }))
        .unwrap();
        layer.node_event(WatchedEvent::Applied(node));
        assert_eq!(drain(&queue), vec!["Node/admin/worker-1"]);
    }

    #[test]
    fn lb_service_key_is_l4() {
        let _guard = FLAG_LOCK.lock().unwrap();
        config::set_disable_sync(false);
        let (layer, queue, _) = layer_with_filter(NamespaceFilter::admit_all());
        let svc: Service = serde_json::from_value(serde_json::json!({
            "metadata": { "name": "app", "namespace": "red", "resourceVersion": "1" },
            "spec": { "type": "LoadBalancer", "ports": [ { "port": 80 } ] }
        }))
        .unwrap();
        layer.service_event(WatchedEvent::Applied(svc));
        assert_eq!(drain(&queue), vec!["L4LBService/red/app"]);
    }
}
