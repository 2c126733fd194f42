//! Graph layer: ingestion keys in, changed model names out
//!
//! Decodes each `<kind>/<namespace>/<name>` key at the boundary, computes
//! the set of affected models, rebuilds their graphs from the cluster
//! snapshot, and publishes a model to the REST queue only when its
//! checksum moved (or a full sync forces publication). An object-to-models
//! memory keeps deletes routed to the shards the object used to live on.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::config::{self, AkoConfig};
use crate::ingestion::filters::NamespaceFilter;
use crate::k8s::{parse_key, K8sStore, ObjectKind};
use crate::names::Namer;
use crate::queue::{QueueHandler, WorkerQueue};
use crate::status::{ObjectStatusError, StatusItem};

use super::l4::{build_gateway_graph, build_l4_graph, infra_setting_for};
use super::l7::{build_l7_model, ingress_is_passthrough, parent_vs_name_for_host};
use super::lister::GraphLister;
use super::vrf::build_vrf_graph;
use super::{GraphRoot, ObjectGraph};

/// What to rebuild for one model.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum BuildTarget {
    Vrf,
    L4 { namespace: String, svc: String },
    Gateway { namespace: String, gw: String },
    L7Parent { vs_name: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct ModelIntent {
    model: String,
    target: BuildTarget,
}

/// The graph layer worker state.
pub struct GraphLayer {
    cfg: Arc<AkoConfig>,
    namer: Namer,
    store: Arc<K8sStore>,
    lister: Arc<GraphLister>,
    ns_filter: Arc<NamespaceFilter>,
    graph_queue: Arc<WorkerQueue>,
    status_queue: Arc<WorkerQueue>,
    /// Object key -> models it last contributed to, so deletions rebuild
    /// the right shards.
    obj_models: DashMap<String, Vec<String>>,
}

impl GraphLayer {
    /// Wire the layer up.
    pub fn new(
        cfg: Arc<AkoConfig>,
        store: Arc<K8sStore>,
        lister: Arc<GraphLister>,
        ns_filter: Arc<NamespaceFilter>,
        graph_queue: Arc<WorkerQueue>,
        status_queue: Arc<WorkerQueue>,
    ) -> Arc<Self> {
        let namer = Namer::new(&cfg);
        Arc::new(Self {
            cfg,
            namer,
            store,
            lister,
            ns_filter,
            graph_queue,
            status_queue,
            obj_models: DashMap::new(),
        })
    }

    /// Process one ingestion key. `fullsync` bypasses checksum comparison
    /// and forces publication.
    pub fn dequeue_ingestion(&self, key: &str, fullsync: bool) {
        let Some((kind, namespace, name)) = parse_key(key) else {
            warn!(key, "Unexpected key shape on ingestion queue, dropping");
            return;
        };
        debug!(key, fullsync, "Graph layer dequeue");

        let intents = match kind {
            ObjectKind::Node => self.vrf_intents(),
            ObjectKind::L4LBService => self.l4_intents(namespace, name),
            ObjectKind::Gateway => self.gateway_intents_by_name(key, name),
            ObjectKind::GatewayClass => self.gateway_class_intents(name),
            ObjectKind::Ingress => self.ingress_intents(key, namespace, name),
            ObjectKind::Route => self.route_intents(key, namespace, name),
            ObjectKind::Service | ObjectKind::Endpoints => {
                self.backend_service_intents(namespace, name)
            }
            ObjectKind::Pod => self.pod_intents(namespace, name),
            ObjectKind::Secret => self.secret_intents(namespace, name),
            ObjectKind::IngressClass => self.ingress_class_intents(name),
            ObjectKind::HostRule => self.fqdn_crd_intents(key, |s| {
                s.host_rules
                    .get(namespace, name)
                    .map(|r| r.spec.virtualhost.fqdn.clone())
            }),
            ObjectKind::HTTPRule => self.fqdn_crd_intents(key, |s| {
                s.http_rules.get(namespace, name).map(|r| r.spec.fqdn.clone())
            }),
            ObjectKind::AviInfraSetting => self.infra_setting_intents(key, name),
        };

        for intent in intents {
            self.rebuild(intent, fullsync);
        }
    }

    fn vrf_intents(&self) -> Vec<ModelIntent> {
        if self.cfg.static_route_sync_disabled() {
            return Vec::new();
        }
        vec![ModelIntent {
            model: self.cfg.vrf_model_name(),
            target: BuildTarget::Vrf,
        }]
    }

    fn l4_intents(&self, namespace: &str, svc: &str) -> Vec<ModelIntent> {
        if config::layer7_only() {
            return Vec::new();
        }
        vec![ModelIntent {
            model: crate::model_name(&self.cfg.tenant, &self.namer.l4_vs_name(namespace, svc)),
            target: BuildTarget::L4 {
                namespace: namespace.to_string(),
                svc: svc.to_string(),
            },
        }]
    }

    /// Gateway keys carry the tenant in the namespace slot; resolve the
    /// gateway(s) of that name across namespaces, falling back to the
    /// recorded models for deletions.
    fn gateway_intents_by_name(&self, key: &str, name: &str) -> Vec<ModelIntent> {
        let mut intents = Vec::new();
        for (store_key, _) in self.store.gateways.list_all() {
            let Some((gw_ns, gw_name)) = store_key.split_once('/') else { continue };
            if gw_name != name {
                continue;
            }
            intents.push(ModelIntent {
                model: crate::model_name(&self.cfg.tenant, &self.namer.l4_vs_name(gw_ns, gw_name)),
                target: BuildTarget::Gateway {
                    namespace: gw_ns.to_string(),
                    gw: gw_name.to_string(),
                },
            });
        }
        self.union_with_recorded(key, intents)
    }

    fn gateway_class_intents(&self, class_name: &str) -> Vec<ModelIntent> {
        let mut intents = Vec::new();
        for (store_key, gw) in self.store.gateways.list_all() {
            if gw.spec.gateway_class_name != class_name {
                continue;
            }
            let Some((gw_ns, gw_name)) = store_key.split_once('/') else { continue };
            intents.push(ModelIntent {
                model: crate::model_name(&self.cfg.tenant, &self.namer.l4_vs_name(gw_ns, gw_name)),
                target: BuildTarget::Gateway {
                    namespace: gw_ns.to_string(),
                    gw: gw_name.to_string(),
                },
            });
        }
        intents
    }

    fn l7_intent_for_host(
        &self,
        host: &str,
        passthrough: bool,
        setting: &Option<Arc<crate::crd::AviInfraSetting>>,
    ) -> ModelIntent {
        let vs_name = parent_vs_name_for_host(&self.cfg, &self.namer, host, passthrough, setting);
        ModelIntent {
            model: crate::model_name(&self.cfg.tenant, &vs_name),
            target: BuildTarget::L7Parent { vs_name },
        }
    }

    fn ingress_intents(&self, key: &str, namespace: &str, name: &str) -> Vec<ModelIntent> {
        let mut intents = Vec::new();
        if let Some(ingress) = self.store.ingresses.get(namespace, name) {
            let setting = infra_setting_for(ingress.metadata.annotations.as_ref(), &self.store);
            let passthrough = ingress_is_passthrough(&ingress);
            for rule in ingress.spec.iter().flat_map(|s| s.rules.iter().flatten()) {
                if let Some(host) = rule.host.as_deref().filter(|h| !h.is_empty()) {
                    intents.push(self.l7_intent_for_host(host, passthrough, &setting));
                }
            }
        }
        self.union_with_recorded(key, intents)
    }

    fn route_intents(&self, key: &str, namespace: &str, name: &str) -> Vec<ModelIntent> {
        let mut intents = Vec::new();
        if let Some(route) = self.store.routes.get(namespace, name) {
            if !route.spec.host.is_empty() {
                let setting = infra_setting_for(route.metadata.annotations.as_ref(), &self.store);
                let passthrough = route
                    .spec
                    .tls
                    .as_ref()
                    .map(|t| t.termination == "passthrough")
                    .unwrap_or(false);
                intents.push(self.l7_intent_for_host(&route.spec.host, passthrough, &setting));
            }
        }
        self.union_with_recorded(key, intents)
    }

    /// Plain Services and Endpoints affect every Ingress/Route backed by
    /// them, plus gateway models selecting them.
    fn backend_service_intents(&self, namespace: &str, svc: &str) -> Vec<ModelIntent> {
        let mut intents = Vec::new();

        for (ing_name, ingress) in self.store.ingresses.list_namespace(namespace) {
            let references = ingress
                .spec
                .iter()
                .flat_map(|s| s.rules.iter().flatten())
                .flat_map(|r| r.http.iter().flat_map(|h| h.paths.iter()))
                .any(|p| {
                    p.backend.service.as_ref().map(|s| s.name.as_str()) == Some(svc)
                });
            if references {
                intents.extend(self.ingress_intents(
                    &crate::k8s::encode_key(ObjectKind::Ingress, namespace, &ing_name),
                    namespace,
                    &ing_name,
                ));
            }
        }

        for (route_name, route) in self.store.routes.list_namespace(namespace) {
            let references = route.spec.to.name == svc
                || route.spec.alternate_backends.iter().any(|b| b.name == svc);
            if references {
                intents.extend(self.route_intents(
                    &crate::k8s::encode_key(ObjectKind::Route, namespace, &route_name),
                    namespace,
                    &route_name,
                ));
            }
        }

        if self.cfg.advanced_l4 || self.cfg.services_api {
            for (store_key, _) in self.store.gateways.list_namespace(namespace) {
                intents.push(ModelIntent {
                    model: crate::model_name(
                        &self.cfg.tenant,
                        &self.namer.l4_vs_name(namespace, &store_key),
                    ),
                    target: BuildTarget::Gateway {
                        namespace: namespace.to_string(),
                        gw: store_key,
                    },
                });
            }
        }

        intents
    }

    fn pod_intents(&self, namespace: &str, pod_name: &str) -> Vec<ModelIntent> {
        let Some(pod) = self.store.pods.get(namespace, pod_name) else {
            // Pod deleted: rebuild everything the namespace serves; the
            // builders drop the vanished members.
            let mut intents = Vec::new();
            for (svc_name, svc) in self.store.services.list_namespace(namespace) {
                if svc.spec.as_ref().and_then(|s| s.type_.as_deref()) == Some("LoadBalancer") {
                    intents.extend(self.l4_intents(namespace, &svc_name));
                }
                intents.extend(self.backend_service_intents(namespace, &svc_name));
            }
            return intents;
        };
        let labels = pod.metadata.labels.clone().unwrap_or_default();
        let mut intents = Vec::new();
        for (svc_name, svc) in self.store.services.list_namespace(namespace) {
            let Some(selector) = svc.spec.as_ref().and_then(|s| s.selector.as_ref()) else {
                continue;
            };
            if selector.is_empty() || !selector.iter().all(|(k, v)| labels.get(k) == Some(v)) {
                continue;
            }
            if svc.spec.as_ref().and_then(|s| s.type_.as_deref()) == Some("LoadBalancer") {
                intents.extend(self.l4_intents(namespace, &svc_name));
            }
            intents.extend(self.backend_service_intents(namespace, &svc_name));
        }
        intents
    }

    fn secret_intents(&self, namespace: &str, secret_name: &str) -> Vec<ModelIntent> {
        let mut intents = Vec::new();
        for (ing_name, ingress) in self.store.ingresses.list_namespace(namespace) {
            let references = ingress
                .spec
                .iter()
                .flat_map(|s| s.tls.iter().flatten())
                .any(|t| t.secret_name.as_deref() == Some(secret_name));
            if references {
                intents.extend(self.ingress_intents(
                    &crate::k8s::encode_key(ObjectKind::Ingress, namespace, &ing_name),
                    namespace,
                    &ing_name,
                ));
            }
        }
        intents
    }

    fn ingress_class_intents(&self, class_name: &str) -> Vec<ModelIntent> {
        let mut intents = Vec::new();
        for (store_key, ingress) in self.store.ingresses.list_all() {
            let Some((ns, name)) = store_key.split_once('/') else { continue };
            let uses_class = ingress
                .spec
                .as_ref()
                .and_then(|s| s.ingress_class_name.as_deref())
                .map_or(true, |c| c == class_name);
            if uses_class {
                intents.extend(self.ingress_intents(
                    &crate::k8s::encode_key(ObjectKind::Ingress, ns, name),
                    ns,
                    name,
                ));
            }
        }
        intents
    }

    fn fqdn_crd_intents<F>(&self, key: &str, fqdn_of: F) -> Vec<ModelIntent>
    where
        F: Fn(&K8sStore) -> Option<String>,
    {
        let mut intents = Vec::new();
        if let Some(fqdn) = fqdn_of(&self.store) {
            intents.extend(self.models_for_host(&fqdn));
        }
        self.union_with_recorded(key, intents)
    }

    /// Parent models of every Ingress/Route serving a host.
    fn models_for_host(&self, host: &str) -> Vec<ModelIntent> {
        let mut intents = Vec::new();
        for (_, ingress) in self.store.ingresses.list_all() {
            let serves = ingress
                .spec
                .iter()
                .flat_map(|s| s.rules.iter().flatten())
                .any(|r| r.host.as_deref() == Some(host));
            if serves {
                let setting = infra_setting_for(ingress.metadata.annotations.as_ref(), &self.store);
                intents.push(self.l7_intent_for_host(
                    host,
                    ingress_is_passthrough(&ingress),
                    &setting,
                ));
            }
        }
        for (_, route) in self.store.routes.list_all() {
            if route.spec.host == host {
                let setting = infra_setting_for(route.metadata.annotations.as_ref(), &self.store);
                let passthrough = route
                    .spec
                    .tls
                    .as_ref()
                    .map(|t| t.termination == "passthrough")
                    .unwrap_or(false);
                intents.push(self.l7_intent_for_host(host, passthrough, &setting));
            }
        }
        intents
    }

    fn infra_setting_intents(&self, key: &str, setting_name: &str) -> Vec<ModelIntent> {
        let mut intents = Vec::new();
        let annotated = |annotations: Option<&std::collections::BTreeMap<String, String>>| {
            annotations
                .and_then(|a| a.get(crate::INFRA_SETTING_NAME_ANNOTATION))
                .map(String::as_str)
                == Some(setting_name)
        };

        for (store_key, ingress) in self.store.ingresses.list_all() {
            if annotated(ingress.metadata.annotations.as_ref()) {
                let Some((ns, name)) = store_key.split_once('/') else { continue };
                intents.extend(self.ingress_intents(
                    &crate::k8s::encode_key(ObjectKind::Ingress, ns, name),
                    ns,
                    name,
                ));
            }
        }
        for (store_key, route) in self.store.routes.list_all() {
            if annotated(route.metadata.annotations.as_ref()) {
                let Some((ns, name)) = store_key.split_once('/') else { continue };
                intents.extend(self.route_intents(
                    &crate::k8s::encode_key(ObjectKind::Route, ns, name),
                    ns,
                    name,
                ));
            }
        }
        for (store_key, svc) in self.store.services.list_all() {
            if annotated(svc.metadata.annotations.as_ref())
                && svc.spec.as_ref().and_then(|s| s.type_.as_deref()) == Some("LoadBalancer")
            {
                let Some((ns, name)) = store_key.split_once('/') else { continue };
                intents.extend(self.l4_intents(ns, name));
            }
        }
        self.union_with_recorded(key, intents)
    }

    /// Union freshly computed intents with the models the object
    /// contributed to last time, and update the record.
    fn union_with_recorded(&self, key: &str, intents: Vec<ModelIntent>) -> Vec<ModelIntent> {
        let mut seen = std::collections::HashSet::new();
        let mut intents: Vec<ModelIntent> = intents
            .into_iter()
            .filter(|i| seen.insert(i.model.clone()))
            .collect();
        let new_models: Vec<String> = intents.iter().map(|i| i.model.clone()).collect();
        if let Some(old) = self.obj_models.get(key).map(|e| e.value().clone()) {
            for model in old {
                if !new_models.contains(&model) {
                    // The object moved away from this model (host change,
                    // shard change, deletion): rebuild it too. The model
                    // name alone identifies the L7 parent to rebuild.
                    let vs_name = model.split_once('/').map(|(_, v)| v).unwrap_or(&model);
                    intents.push(ModelIntent {
                        model: model.clone(),
                        target: BuildTarget::L7Parent {
                            vs_name: vs_name.to_string(),
                        },
                    });
                }
            }
        }
        if new_models.is_empty() {
            self.obj_models.remove(key);
        } else {
            self.obj_models.insert(key.to_string(), new_models);
        }
        intents
    }

    fn rebuild(&self, intent: ModelIntent, fullsync: bool) {
        let mut warnings: Vec<ObjectStatusError> = Vec::new();
        let root: Option<GraphRoot> = match &intent.target {
            BuildTarget::Vrf => Some(GraphRoot::Vrf(build_vrf_graph(&self.cfg, &self.store))),
            BuildTarget::L4 { namespace, svc } => {
                build_l4_graph(&self.cfg, &self.namer, &self.store, namespace, svc)
                    .map(GraphRoot::Vs)
            }
            BuildTarget::Gateway { namespace, gw } => {
                build_gateway_graph(&self.cfg, &self.namer, &self.store, namespace, gw)
                    .map(GraphRoot::Vs)
            }
            BuildTarget::L7Parent { vs_name } => build_l7_model(
                &self.cfg,
                &self.namer,
                &self.store,
                &self.ns_filter,
                vs_name,
                &mut warnings,
            )
            .map(GraphRoot::Vs),
        };

        for w in warnings {
            self.publish_status(StatusItem::ObjectError(w));
        }

        match root {
            Some(root) => {
                let graph = Arc::new(ObjectGraph::new(intent.model.clone(), Some(root)));
                let old_checksum = self
                    .lister
                    .get(&intent.model)
                    .flatten()
                    .map(|g| g.checksum());
                if fullsync || old_checksum != Some(graph.checksum()) {
                    self.lister.save(&intent.model, Some(graph));
                    self.publish(&intent.model, fullsync);
                } else {
                    debug!(model = %intent.model, "Graph checksum unchanged, not publishing");
                }
            }
            None => {
                // Nothing desired: publish a deletion only if the model is
                // known, otherwise there is nothing to tear down.
                if self.lister.get(&intent.model).is_some() {
                    self.lister.save(&intent.model, None);
                    self.publish(&intent.model, fullsync);
                }
            }
        }
    }

    /// Hand a model to the REST layer's queue shard.
    pub fn publish(&self, model_name: &str, fullsync: bool) {
        info!(model = %model_name, fullsync, "Publishing model to REST layer");
        self.graph_queue.enqueue_key(model_name);
    }

    fn publish_status(&self, item: StatusItem) {
        match item.encode() {
            Ok(payload) => self.status_queue.enqueue_key(payload),
            Err(e) => warn!(error = %e, "Failed to encode status item, dropped"),
        }
    }
}

#[async_trait]
impl QueueHandler for GraphLayer {
    async fn sync(&self, key: String) -> crate::Result<()> {
        self.dequeue_ingestion(&key, false);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VipNetwork;
    use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn test_config() -> Arc<AkoConfig> {
        Arc::new(AkoConfig {
            cluster_name: "c1".to_string(),
            shard_vs_size: 1,
            vip_network_list: vec![VipNetwork {
                network_name: "net".to_string(),
                cidr: None,
            }],
            ..Default::default()
        })
    }

    fn layer(store: Arc<K8sStore>) -> (Arc<GraphLayer>, Arc<GraphLister>) {
        let cfg = test_config();
        let lister = GraphLister::new();
        let layer = GraphLayer::new(
            cfg,
            store,
            Arc::clone(&lister),
            Arc::new(NamespaceFilter::admit_all()),
            WorkerQueue::new("graph-test", 1),
            WorkerQueue::new("status-test", 1),
        );
        (layer, lister)
    }

    fn lb_service(ns: &str, name: &str) -> Service {
        Service {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(ns.to_string()),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                type_: Some("LoadBalancer".to_string()),
                ports: Some(vec![ServicePort {
                    port: 80,
                    protocol: Some("TCP".to_string()),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn l4_service_key_creates_its_model() {
        let store = K8sStore::new();
        store.services.insert("red", "app", lb_service("red", "app"));
        let (layer, lister) = layer(Arc::clone(&store));

        layer.dequeue_ingestion("L4LBService/red/app", false);
        let graph = lister.get("admin/c1--red-app").unwrap().unwrap();
        assert!(!graph.is_empty());
        assert_eq!(graph.vs_root().unwrap().name, "c1--red-app");
    }

    #[test]
    fn unchanged_rebuild_does_not_republish() {
        let store = K8sStore::new();
        store.services.insert("red", "app", lb_service("red", "app"));
        let (layer, lister) = layer(Arc::clone(&store));

        layer.dequeue_ingestion("L4LBService/red/app", false);
        let first = lister.get("admin/c1--red-app").unwrap().unwrap();
        layer.dequeue_ingestion("L4LBService/red/app", false);
        let second = lister.get("admin/c1--red-app").unwrap().unwrap();
        assert_eq!(first.checksum(), second.checksum());
    }

    #[test]
    fn deleting_the_service_marks_the_model_deleted() {
        let store = K8sStore::new();
        store.services.insert("red", "app", lb_service("red", "app"));
        let (layer, lister) = layer(Arc::clone(&store));

        layer.dequeue_ingestion("L4LBService/red/app", false);
        assert!(lister.get("admin/c1--red-app").unwrap().is_some());

        store.services.remove("red", "app");
        layer.dequeue_ingestion("L4LBService/red/app", false);
        assert!(matches!(lister.get("admin/c1--red-app"), Some(None)));
    }

    #[test]
    fn unknown_model_delete_is_a_noop() {
        let store = K8sStore::new();
        let (layer, lister) = layer(store);
        layer.dequeue_ingestion("L4LBService/red/ghost", false);
        assert!(lister.get("admin/c1--red-ghost").is_none());
    }

    #[test]
    fn malformed_keys_are_dropped_not_panicked() {
        let store = K8sStore::new();
        let (layer, _) = layer(store);
        layer.dequeue_ingestion("garbage", false);
        layer.dequeue_ingestion("Unknown/ns/name", false);
    }

    #[test]
    fn node_keys_route_to_the_vrf_model() {
        let store = K8sStore::new();
        let (layer, lister) = layer(store);
        layer.dequeue_ingestion("Node/admin/worker-1", false);
        let graph = lister.get("admin/global").unwrap().unwrap();
        assert!(graph.is_vrf);
    }

    #[test]
    fn ingress_host_moves_rebuild_the_old_shard() {
        let store = K8sStore::new();
        let (layer, lister) = layer(Arc::clone(&store));

        // An ingress on host a.x lands in shard 0 (SMALL).
        let ing: k8s_openapi::api::networking::v1::Ingress =
            serde_json::from_value(serde_json::json!({
                "metadata": { "name": "web", "namespace": "red" },
                "spec": {
                    "rules": [
                        { "host": "a.x", "http": { "paths": [ { "pathType": "Prefix", "path": "/", "backend": { "service": { "name": "app", "port": { "number": 80 } } } } ] } }
                    ]
                }
            }))
            .unwrap();
        store.ingresses.insert("red", "web", ing);
        layer.dequeue_ingestion("Ingress/red/web", false);
        assert!(lister.get("admin/c1--Shared-L7-0").unwrap().is_some());

        // Ingress deleted: the recorded model mapping routes the delete.
        store.ingresses.remove("red", "web");
        layer.dequeue_ingestion("Ingress/red/web", false);
        assert!(lister.get("admin/c1--Shared-L7-0").unwrap().is_none());
    }
}
