//! Cross-layer pipeline scenarios
//!
//! These tests drive the graph and REST layers together against an
//! in-memory Avi transport, checking the externally visible REST call
//! sequences the pipeline is specified to produce.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use ako::avi::client::{AviClientPool, AviTransport, RestError};
use ako::cache::AviObjCache;
use ako::config::{AkoConfig, VipNetwork};
use ako::graph::layer::GraphLayer;
use ako::graph::lister::GraphLister;
use ako::ingestion::filters::NamespaceFilter;
use ako::k8s::K8sStore;
use ako::queue::WorkerQueue;
use ako::rest::RestLayer;

/// Recording transport with programmable failure injection.
#[derive(Default)]
struct FakeTransport {
    /// (method, path, object name) per mutating call
    calls: Mutex<Vec<(String, String, String)>>,
    /// While > 0, every mutation fails with 503 and decrements
    failures_remaining: Mutex<u32>,
}

impl FakeTransport {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn calls(&self) -> Vec<(String, String, String)> {
        self.calls.lock().unwrap().clone()
    }

    fn mutations(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .map(|(method, path, _)| format!("{method} {path}"))
            .collect()
    }

    fn fail_next(&self, count: u32) {
        *self.failures_remaining.lock().unwrap() = count;
    }

    fn maybe_fail(&self) -> Result<(), RestError> {
        let mut remaining = self.failures_remaining.lock().unwrap();
        if *remaining > 0 {
            *remaining -= 1;
            return Err(RestError::http(503, "service unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl AviTransport for FakeTransport {
    async fn get(&self, _tenant: &str, _path: &str) -> Result<Value, RestError> {
        Ok(serde_json::json!({ "count": 0, "results": [] }))
    }

    async fn post(&self, _tenant: &str, path: &str, body: Value) -> Result<Value, RestError> {
        self.maybe_fail()?;
        let name = body["name"].as_str().unwrap_or("").to_string();
        self.calls
            .lock()
            .unwrap()
            .push(("POST".to_string(), path.to_string(), name.clone()));
        Ok(serde_json::json!({ "uuid": format!("u-{name}"), "name": name }))
    }

    async fn put(
        &self,
        _tenant: &str,
        path: &str,
        uuid: &str,
        body: Value,
    ) -> Result<Value, RestError> {
        self.maybe_fail()?;
        let name = body["name"].as_str().unwrap_or(uuid).to_string();
        self.calls
            .lock()
            .unwrap()
            .push(("PUT".to_string(), path.to_string(), name));
        Ok(serde_json::json!({ "uuid": uuid }))
    }

    async fn delete(&self, _tenant: &str, path: &str, uuid: &str) -> Result<(), RestError> {
        self.maybe_fail()?;
        self.calls
            .lock()
            .unwrap()
            .push(("DELETE".to_string(), path.to_string(), uuid.to_string()));
        Ok(())
    }
}

struct Pipeline {
    store: Arc<K8sStore>,
    lister: Arc<GraphLister>,
    cache: Arc<AviObjCache>,
    graph_layer: Arc<GraphLayer>,
    rest_layer: Arc<RestLayer>,
    transport: Arc<FakeTransport>,
}

fn small_shard_config() -> Arc<AkoConfig> {
    Arc::new(AkoConfig {
        cluster_name: "c1".to_string(),
        shard_vs_size: 1,
        passthrough_shard_size: 1,
        vip_network_list: vec![VipNetwork {
            network_name: "vip-net".to_string(),
            cidr: None,
        }],
        ..Default::default()
    })
}

fn pipeline(cfg: Arc<AkoConfig>) -> Pipeline {
    let store = K8sStore::new();
    let lister = GraphLister::new();
    let cache = AviObjCache::new();
    let transport = FakeTransport::new();
    let pool = AviClientPool::from_transports(vec![transport.clone() as Arc<dyn AviTransport>]);

    let graph_layer = GraphLayer::new(
        Arc::clone(&cfg),
        Arc::clone(&store),
        Arc::clone(&lister),
        Arc::new(NamespaceFilter::admit_all()),
        WorkerQueue::new("graph", 1),
        WorkerQueue::new("status", 1),
    );
    let rest_layer = RestLayer::new(
        cfg,
        Arc::clone(&lister),
        Arc::clone(&cache),
        pool,
        WorkerQueue::new("fast-retry", 1),
        WorkerQueue::new("slow-retry", 1),
        WorkerQueue::new("status", 1),
    );

    Pipeline {
        store,
        lister,
        cache,
        graph_layer,
        rest_layer,
        transport,
    }
}

fn ingress_json(ns: &str, name: &str, host: &str, svc: &str) -> serde_json::Value {
    serde_json::json!({
        "metadata": { "name": name, "namespace": ns, "resourceVersion": "1" },
        "spec": {
            "rules": [ {
                "host": host,
                "http": { "paths": [ {
                    "pathType": "Prefix",
                    "path": "/",
                    "backend": { "service": { "name": svc, "port": { "number": 80 } } }
                } ] }
            } ]
        }
    })
}

fn seed_backend(store: &K8sStore, ns: &str, svc: &str, ips: &[&str]) {
    let service: k8s_openapi::api::core::v1::Service = serde_json::from_value(serde_json::json!({
        "metadata": { "name": svc, "namespace": ns },
        "spec": { "type": "ClusterIP", "ports": [ { "port": 80 } ] }
    }))
    .unwrap();
    store.services.insert(ns, svc, service);
    let eps: k8s_openapi::api::core::v1::Endpoints = serde_json::from_value(serde_json::json!({
        "metadata": { "name": svc, "namespace": ns },
        "subsets": [ {
            "addresses": ips.iter().map(|ip| serde_json::json!({ "ip": ip })).collect::<Vec<_>>(),
            "ports": [ { "port": 8080 } ]
        } ]
    }))
    .unwrap();
    store.endpoints.insert(ns, svc, eps);
}

#[tokio::test]
async fn shared_l7_small_shard_produces_the_specified_rest_sequence() {
    let p = pipeline(small_shard_config());

    seed_backend(&p.store, "a-ns", "foo", &["10.244.1.10"]);
    seed_backend(&p.store, "b-ns", "bar", &["10.244.2.10"]);
    p.store.ingresses.insert(
        "a-ns",
        "foo",
        serde_json::from_value(ingress_json("a-ns", "foo", "foo.x", "foo")).unwrap(),
    );
    p.store.ingresses.insert(
        "b-ns",
        "bar",
        serde_json::from_value(ingress_json("b-ns", "bar", "bar.x", "bar")).unwrap(),
    );

    // Both hosts map onto the single SMALL shard.
    p.graph_layer.dequeue_ingestion("Ingress/a-ns/foo", false);
    p.graph_layer.dequeue_ingestion("Ingress/b-ns/bar", false);
    assert!(p.lister.get("admin/c1--Shared-L7-0").is_some());

    p.rest_layer.dequeue_nodes("admin/c1--Shared-L7-0").await;

    let calls = p.transport.calls();
    let mutations: Vec<&str> = calls.iter().map(|(m, p, _)| {
        assert_eq!(m, "POST");
        p.as_str()
    }).collect();
    assert_eq!(
        mutations,
        vec!["vsvip", "pool", "pool", "poolgroup", "httppolicyset", "virtualservice"]
    );
    // Both ingresses contributed a pool.
    let pool_names: Vec<&str> = calls
        .iter()
        .filter(|(_, path, _)| path == "pool")
        .map(|(_, _, name)| name.as_str())
        .collect();
    assert!(pool_names.iter().any(|n| n.contains("a-ns") && n.contains("foo")));
    assert!(pool_names.iter().any(|n| n.contains("b-ns") && n.contains("bar")));
    // The policy carries one rule per Host+Path (checked indirectly: one
    // policy object, two pools behind one shared pool group).
    assert_eq!(
        calls.iter().filter(|(_, p, _)| p == "httppolicyset").count(),
        1
    );
}

#[tokio::test]
async fn applying_twice_is_idempotent() {
    let p = pipeline(small_shard_config());
    seed_backend(&p.store, "red", "app", &["10.244.1.5"]);
    p.store.ingresses.insert(
        "red",
        "app",
        serde_json::from_value(ingress_json("red", "app", "app.x", "app")).unwrap(),
    );

    p.graph_layer.dequeue_ingestion("Ingress/red/app", false);
    p.rest_layer.dequeue_nodes("admin/c1--Shared-L7-0").await;
    let first = p.transport.calls().len();

    // Same snapshot again: the graph checksum is unchanged and the REST
    // diff finds nothing to do.
    p.graph_layer.dequeue_ingestion("Ingress/red/app", false);
    p.rest_layer.dequeue_nodes("admin/c1--Shared-L7-0").await;
    assert_eq!(p.transport.calls().len(), first, "no further REST calls");
}

#[tokio::test]
async fn create_then_delete_returns_the_cache_to_empty() {
    let p = pipeline(small_shard_config());
    seed_backend(&p.store, "red", "app", &["10.244.1.5"]);
    p.store.ingresses.insert(
        "red",
        "app",
        serde_json::from_value(ingress_json("red", "app", "app.x", "app")).unwrap(),
    );

    p.graph_layer.dequeue_ingestion("Ingress/red/app", false);
    p.rest_layer.dequeue_nodes("admin/c1--Shared-L7-0").await;
    assert!(p.cache.len() > 0);

    p.store.ingresses.remove("red", "app");
    p.graph_layer.dequeue_ingestion("Ingress/red/app", false);
    p.rest_layer.dequeue_nodes("admin/c1--Shared-L7-0").await;

    assert_eq!(p.cache.len(), 0, "no dangling pools/PGs/certs");
    assert!(p.lister.get("admin/c1--Shared-L7-0").is_none());
}

#[tokio::test]
async fn transient_503_leaves_state_retryable_until_recovery() {
    let p = pipeline(small_shard_config());
    seed_backend(&p.store, "red", "app", &["10.244.1.5"]);
    p.store.ingresses.insert(
        "red",
        "app",
        serde_json::from_value(ingress_json("red", "app", "app.x", "app")).unwrap(),
    );
    p.graph_layer.dequeue_ingestion("Ingress/red/app", false);

    // First apply dies on the controller outage.
    p.transport.fail_next(1);
    p.rest_layer.dequeue_nodes("admin/c1--Shared-L7-0").await;
    assert_eq!(p.cache.len(), 0);

    // Recovery: the re-admitted model converges and the cache checksum
    // matches the graph's objects.
    p.rest_layer.dequeue_nodes("admin/c1--Shared-L7-0").await;
    assert!(p.cache.len() > 0);
    let graph = p.lister.get("admin/c1--Shared-L7-0").unwrap().unwrap();
    let vs = graph.vs_root().unwrap();
    let parent_key = ako::cache::CacheKey::new(
        ako::avi::ObjClass::VirtualService,
        "admin",
        &vs.name,
    );
    assert_eq!(p.cache.get(&parent_key).unwrap().checksum, vs.checksum());
}

#[tokio::test]
async fn simultaneous_ingress_and_secret_delete_issue_one_vs_deletion() {
    let p = pipeline(small_shard_config());
    seed_backend(&p.store, "red", "app", &["10.244.1.5"]);
    let secret: k8s_openapi::api::core::v1::Secret = serde_json::from_value(serde_json::json!({
        "metadata": { "name": "app-tls", "namespace": "red" },
        "data": {
            "tls.crt": "Q0VSVA==",
            "tls.key": "S0VZ"
        }
    }))
    .unwrap();
    p.store.secrets.insert("red", "app-tls", secret);
    let mut ing = ingress_json("red", "app", "secure.x", "app");
    ing["spec"]["tls"] = serde_json::json!([{ "hosts": ["secure.x"], "secretName": "app-tls" }]);
    p.store
        .ingresses
        .insert("red", "app", serde_json::from_value(ing).unwrap());

    p.graph_layer.dequeue_ingestion("Ingress/red/app", false);
    p.rest_layer.dequeue_nodes("admin/c1--Shared-L7-0").await;
    let before = p.transport.calls();
    let vs_creates = before
        .iter()
        .filter(|(m, path, _)| m == "POST" && path == "virtualservice")
        .count();
    assert_eq!(vs_creates, 2, "parent and SNI child created");

    // Ingress and its TLS Secret vanish together.
    p.store.ingresses.remove("red", "app");
    p.store.secrets.remove("red", "app-tls");
    p.graph_layer.dequeue_ingestion("Ingress/red/app", false);
    p.graph_layer.dequeue_ingestion("Secret/red/app-tls", false);
    p.rest_layer.dequeue_nodes("admin/c1--Shared-L7-0").await;
    // A second pass (coalesced queue would have deduped anyway) must not
    // find anything else to delete.
    p.rest_layer.dequeue_nodes("admin/c1--Shared-L7-0").await;

    let deletes: Vec<_> = p
        .transport
        .calls()
        .into_iter()
        .filter(|(m, path, _)| m == "DELETE" && path == "virtualservice")
        .collect();
    assert_eq!(deletes.len(), 2, "parent and child deleted exactly once each");
    assert_eq!(p.cache.len(), 0);
}

#[tokio::test]
async fn passthrough_host_lands_on_its_own_shard_with_a_datascript() {
    let p = pipeline(small_shard_config());
    seed_backend(&p.store, "red", "app", &["10.244.1.5"]);
    let mut ing = ingress_json("red", "app", "p.x", "app");
    ing["metadata"]["annotations"] =
        serde_json::json!({ "passthrough.ako.vmware.com/enabled": "true" });
    p.store
        .ingresses
        .insert("red", "app", serde_json::from_value(ing).unwrap());

    p.graph_layer.dequeue_ingestion("Ingress/red/app", false);
    assert!(p.lister.get("admin/c1--Shared-Passthrough-0").is_some());
    p.rest_layer.dequeue_nodes("admin/c1--Shared-Passthrough-0").await;

    let mutations = p.transport.mutations();
    assert!(mutations.contains(&"POST vsdatascriptset".to_string()));
    assert!(mutations.contains(&"POST virtualservice".to_string()));
}

#[tokio::test]
async fn renaming_a_service_changes_exactly_one_vs_name() {
    // L4: renaming the Service produces one new VS (new name) and one
    // deletion of the old, not a cascade.
    let cfg = small_shard_config();
    let p = pipeline(Arc::clone(&cfg));
    let lb: k8s_openapi::api::core::v1::Service = serde_json::from_value(serde_json::json!({
        "metadata": { "name": "svc-a", "namespace": "red" },
        "spec": { "type": "LoadBalancer", "ports": [ { "port": 80 } ] }
    }))
    .unwrap();
    p.store.services.insert("red", "svc-a", lb.clone());

    p.graph_layer.dequeue_ingestion("L4LBService/red/svc-a", false);
    p.rest_layer.dequeue_nodes("admin/c1--red-svc-a").await;

    // Rename: old object deleted, new one created.
    p.store.services.remove("red", "svc-a");
    let mut renamed = lb;
    renamed.metadata.name = Some("svc-b".to_string());
    p.store.services.insert("red", "svc-b", renamed);

    p.graph_layer.dequeue_ingestion("L4LBService/red/svc-b", false);
    p.rest_layer.dequeue_nodes("admin/c1--red-svc-b").await;
    p.graph_layer.dequeue_ingestion("L4LBService/red/svc-a", false);
    p.rest_layer.dequeue_nodes("admin/c1--red-svc-a").await;

    let vs_creates: Vec<String> = p
        .transport
        .calls()
        .into_iter()
        .filter(|(m, path, _)| m == "POST" && path == "virtualservice")
        .map(|(_, _, name)| name)
        .collect();
    assert_eq!(vs_creates, vec!["c1--red-svc-a", "c1--red-svc-b"]);
    let vs_deletes = p
        .transport
        .calls()
        .into_iter()
        .filter(|(m, path, _)| m == "DELETE" && path == "virtualservice")
        .count();
    assert_eq!(vs_deletes, 1, "only the old VS is deleted");
}
