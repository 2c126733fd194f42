//! REST layer: desired-vs-cache diffing and application
//!
//! One worker drains each REST queue bucket; before touching a model the
//! worker takes that model's mutex, so applies are serialised per model
//! while distinct models run in parallel. The diff is per object class by
//! stable name: create when the cache has no entry, update when checksums
//! differ, delete what the cache holds but the graph no longer names.
//! Dependencies apply forward (VSVIP first, children last), deletions in
//! reverse.

pub mod ops;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, error, info, warn};

use crate::avi::client::{AviClientPool, AviTransport, RestError, RetryClass};
use crate::avi::ObjClass;
use crate::cache::{AviCacheEntry, AviObjCache, CacheKey};
use crate::config::AkoConfig;
use crate::graph::lister::GraphLister;
use crate::graph::{AviVrfNode, AviVsNode, GraphRoot, ObjectGraph};
use crate::queue::{QueueHandler, WorkerQueue};
use crate::status::{ObjectStatusError, StatusItem};
use crate::{DUMMY_VS_FOR_STALE_DATA, GLOBAL_VRF};

/// One object the desired graph names.
struct DesiredObj {
    key: CacheKey,
    checksum: u32,
    body: Value,
    /// Apply ordering: non-VS classes by [`ObjClass::APPLY_ORDER`], parent
    /// VS after them, children last.
    order: u32,
}

/// The REST layer worker state.
pub struct RestLayer {
    cfg: Arc<AkoConfig>,
    lister: Arc<GraphLister>,
    cache: Arc<AviObjCache>,
    pool: Arc<AviClientPool>,
    fast_retry_queue: Arc<WorkerQueue>,
    slow_retry_queue: Arc<WorkerQueue>,
    status_queue: Arc<WorkerQueue>,
    model_locks: DashMap<String, Arc<Mutex<()>>>,
    /// Origins last applied per model, so teardown can clear status.
    last_origins: DashMap<String, Vec<String>>,
    /// Signalled when the VRF model finishes a REST pass (full-sync gate).
    pub static_route_done: Arc<Notify>,
    /// Signalled when a delete cycle has torn everything down.
    pub delete_done: Arc<Notify>,
    /// Signalled on 401/403 so the lifecycle refreshes the auth token.
    pub auth_refresh_needed: Arc<Notify>,
    delete_in_progress: AtomicBool,
}

impl RestLayer {
    /// Wire the layer up.
    pub fn new(
        cfg: Arc<AkoConfig>,
        lister: Arc<GraphLister>,
        cache: Arc<AviObjCache>,
        pool: Arc<AviClientPool>,
        fast_retry_queue: Arc<WorkerQueue>,
        slow_retry_queue: Arc<WorkerQueue>,
        status_queue: Arc<WorkerQueue>,
    ) -> Arc<Self> {
        Arc::new(Self {
            cfg,
            lister,
            cache,
            pool,
            fast_retry_queue,
            slow_retry_queue,
            status_queue,
            model_locks: DashMap::new(),
            last_origins: DashMap::new(),
            static_route_done: Arc::new(Notify::new()),
            delete_done: Arc::new(Notify::new()),
            auth_refresh_needed: Arc::new(Notify::new()),
            delete_in_progress: AtomicBool::new(false),
        })
    }

    /// Mark a delete cycle running; the layer signals `delete_done` once
    /// every model is torn down.
    pub fn set_delete_in_progress(&self, state: bool) {
        self.delete_in_progress.store(state, Ordering::SeqCst);
    }

    fn lock_for(&self, model_name: &str) -> Arc<Mutex<()>> {
        self.model_locks
            .entry(model_name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Process one model from the REST queue.
    pub async fn dequeue_nodes(&self, model_name: &str) {
        let lock = self.lock_for(model_name);
        let _guard = lock.lock().await;

        let Some((tenant, vs_name)) = model_name.split_once('/') else {
            warn!(model = %model_name, "Unexpected model name shape, dropping");
            return;
        };
        let transport = self.pool.client_for(model_name);
        let desired = self.lister.get(model_name);

        let result = match &desired {
            None | Some(None) => self.teardown(&*transport, tenant, vs_name, model_name).await,
            Some(Some(graph)) if graph.is_empty() => {
                self.teardown(&*transport, tenant, vs_name, model_name).await
            }
            Some(Some(graph)) => match &graph.root {
                Some(GraphRoot::Vrf(vrf)) => {
                    self.apply_vrf(&*transport, tenant, vrf, graph).await
                }
                Some(GraphRoot::Vs(vs)) => {
                    self.apply_vs_tree(&*transport, tenant, vs, model_name).await
                }
                None => self.teardown(&*transport, tenant, vs_name, model_name).await,
            },
        };

        match result {
            Ok(()) => {
                if vs_name == self.cfg.vrf_name || vs_name == GLOBAL_VRF {
                    self.static_route_done.notify_waiters();
                }
                if matches!(desired, Some(None)) {
                    // Model fully gone: drop the lister entry too.
                    self.lister.delete(model_name);
                }
                if self.delete_in_progress.load(Ordering::SeqCst)
                    && self.lister.all_deleted()
                    && self.cache.parent_vs_keys().is_empty()
                {
                    self.delete_done.notify_waiters();
                }
            }
            Err(e) => self.route_failure(model_name, e),
        }
    }

    fn route_failure(&self, model_name: &str, err: RestError) {
        match err.classify() {
            RetryClass::NonRetryable => {
                error!(model = %model_name, error = %err, "Non-retryable REST error");
                let origins = self
                    .last_origins
                    .get(model_name)
                    .map(|e| e.value().clone())
                    .unwrap_or_default();
                for origin in origins {
                    self.publish_status(StatusItem::ObjectError(ObjectStatusError {
                        key: origin,
                        message: err.to_string(),
                    }));
                }
            }
            RetryClass::Auth => {
                warn!(model = %model_name, error = %err, "Auth failure, requesting token refresh");
                self.auth_refresh_needed.notify_one();
                self.fast_retry_queue.enqueue_key(model_name);
            }
            RetryClass::Fast => {
                warn!(model = %model_name, error = %err, "Transient REST error, fast retry");
                self.fast_retry_queue.enqueue_key(model_name);
            }
            RetryClass::Slow => {
                warn!(model = %model_name, error = %err, "Object busy on controller, slow retry");
                self.slow_retry_queue.enqueue_key(model_name);
            }
        }
    }

    fn publish_status(&self, item: StatusItem) {
        match item.encode() {
            Ok(payload) => self.status_queue.enqueue_key(payload),
            Err(e) => warn!(error = %e, "Failed to encode status item, dropped"),
        }
    }

    /// Flatten a VS tree into the ordered desired-object list.
    fn desired_objects(&self, vs: &AviVsNode) -> Vec<DesiredObj> {
        let tenant = &self.cfg.tenant;
        let mut out = Vec::new();
        let order_of = |class: ObjClass| -> u32 {
            ObjClass::APPLY_ORDER
                .iter()
                .position(|c| *c == class)
                .unwrap_or(0) as u32
        };

        let push_non_vs = |node_vs: &AviVsNode, out: &mut Vec<DesiredObj>| {
            if let Some(vip) = &node_vs.vsvip {
                out.push(DesiredObj {
                    key: CacheKey::new(ObjClass::VsVip, tenant, &vip.name),
                    checksum: vip.checksum(),
                    body: ops::vsvip_body(&self.cfg, vip),
                    order: order_of(ObjClass::VsVip),
                });
            }
            for cert in &node_vs.ssl_certs {
                out.push(DesiredObj {
                    key: CacheKey::new(ObjClass::SslKeyCert, tenant, &cert.name),
                    checksum: cert.checksum(),
                    body: ops::ssl_body(&self.cfg, cert),
                    order: order_of(ObjClass::SslKeyCert),
                });
            }
            for pool in &node_vs.pools {
                out.push(DesiredObj {
                    key: CacheKey::new(ObjClass::Pool, tenant, &pool.name),
                    checksum: pool.checksum(),
                    body: ops::pool_body(&self.cfg, pool),
                    order: order_of(ObjClass::Pool),
                });
            }
            for pg in &node_vs.pool_groups {
                out.push(DesiredObj {
                    key: CacheKey::new(ObjClass::PoolGroup, tenant, &pg.name),
                    checksum: pg.checksum(),
                    body: ops::pool_group_body(&self.cfg, pg),
                    order: order_of(ObjClass::PoolGroup),
                });
            }
            for ds in &node_vs.datascripts {
                out.push(DesiredObj {
                    key: CacheKey::new(ObjClass::DataScript, tenant, &ds.name),
                    checksum: ds.checksum(),
                    body: ops::datascript_body(&self.cfg, ds),
                    order: order_of(ObjClass::DataScript),
                });
            }
            for hp in &node_vs.http_policies {
                out.push(DesiredObj {
                    key: CacheKey::new(ObjClass::HttpPolicySet, tenant, &hp.name),
                    checksum: hp.checksum(),
                    body: ops::http_policy_body(&self.cfg, hp),
                    order: order_of(ObjClass::HttpPolicySet),
                });
            }
        };

        push_non_vs(vs, &mut out);
        for child in &vs.children {
            push_non_vs(child, &mut out);
        }

        // Parent VS after every dependency, children after the parent.
        out.push(DesiredObj {
            key: CacheKey::new(ObjClass::VirtualService, tenant, &vs.name),
            checksum: vs.checksum(),
            body: ops::vs_body(&self.cfg, vs, None),
            order: 100,
        });
        for child in &vs.children {
            out.push(DesiredObj {
                key: CacheKey::new(ObjClass::VirtualService, tenant, &child.name),
                checksum: child.checksum(),
                body: ops::vs_body(&self.cfg, child, Some(&vs.name)),
                order: 101,
            });
        }
        out.sort_by_key(|o| o.order);
        out
    }

    async fn apply_vs_tree(
        &self,
        transport: &dyn AviTransport,
        tenant: &str,
        vs: &AviVsNode,
        model_name: &str,
    ) -> Result<(), RestError> {
        let desired = self.desired_objects(vs);

        // Create / update pass.
        for obj in &desired {
            let path = obj.key.class.path();
            match self.cache.get(&obj.key) {
                None => {
                    debug!(name = %obj.key.name, path, "POST");
                    let resp = transport.post(tenant, path, obj.body.clone()).await?;
                    let uuid = resp
                        .get("uuid")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string();
                    self.cache.upsert(
                        obj.key.clone(),
                        AviCacheEntry {
                            uuid,
                            checksum: obj.checksum,
                            ..Default::default()
                        },
                    );
                }
                Some(entry) if entry.checksum != obj.checksum => {
                    debug!(name = %obj.key.name, path, "PUT");
                    transport
                        .put(tenant, path, &entry.uuid, obj.body.clone())
                        .await?;
                    self.cache.upsert(
                        obj.key.clone(),
                        AviCacheEntry {
                            checksum: obj.checksum,
                            ..entry
                        },
                    );
                }
                Some(_) => {
                    debug!(name = %obj.key.name, path, "No change");
                }
            }
        }

        // Stale pass: everything the cache attributes to this model that
        // the graph no longer names, children first.
        let desired_keys: Vec<&CacheKey> = desired.iter().map(|o| &o.key).collect();
        let mut stale: Vec<CacheKey> = self
            .cache
            .model_objects(tenant, &vs.name)
            .into_iter()
            .filter(|k| !desired_keys.contains(&&*k))
            .collect();
        stale.sort_by_key(|k| match k.class {
            ObjClass::VirtualService => 0,
            other => {
                10 - ObjClass::APPLY_ORDER
                    .iter()
                    .position(|c| *c == other)
                    .unwrap_or(0) as u32
            }
        });
        for key in stale {
            self.delete_object(transport, tenant, &key).await?;
        }

        // Fix the parent's reference list so later teardown knows the
        // model's object set.
        if let Some(mut parent_entry) =
            self.cache.get(&CacheKey::new(ObjClass::VirtualService, tenant, &vs.name))
        {
            parent_entry.refs = desired
                .iter()
                .map(|o| o.key.clone())
                .filter(|k| !(k.class == ObjClass::VirtualService && k.name == vs.name))
                .collect();
            parent_entry.is_parent = true;
            self.cache
                .upsert(CacheKey::new(ObjClass::VirtualService, tenant, &vs.name), parent_entry);
        }

        self.last_origins
            .insert(model_name.to_string(), vs.origins.clone());
        self.push_vs_status(transport, tenant, vs).await;
        Ok(())
    }

    /// Read the published VIP and enqueue the status write. Best-effort:
    /// a missing VIP never fails the apply.
    async fn push_vs_status(&self, transport: &dyn AviTransport, tenant: &str, vs: &AviVsNode) {
        let Some(vip_node) = &vs.vsvip else { return };
        let vip = match transport
            .get(
                tenant,
                &format!("vsvip?name={}&include_name=true", vip_node.name),
            )
            .await
        {
            Ok(body) => body["results"]
                .as_array()
                .and_then(|r| r.first())
                .and_then(|v| v["vip"].as_array())
                .and_then(|vips| vips.first())
                .and_then(|vip| vip["ip_address"]["addr"].as_str())
                .unwrap_or_default()
                .to_string(),
            Err(e) => {
                debug!(error = %e, "VIP not readable yet, status deferred");
                String::new()
            }
        };
        self.publish_status(StatusItem::VsStatus {
            origins: vs.origins.clone(),
            vip,
            hosts: vip_node.fqdns.clone(),
        });
    }

    /// DELETE with 404 tolerated; the cache entry goes either way.
    async fn delete_object(
        &self,
        transport: &dyn AviTransport,
        tenant: &str,
        key: &CacheKey,
    ) -> Result<(), RestError> {
        let Some(entry) = self.cache.get(key) else {
            return Ok(());
        };
        debug!(name = %key.name, path = key.class.path(), "DELETE");
        match transport.delete(tenant, key.class.path(), &entry.uuid).await {
            Ok(()) => {}
            Err(e) if e.status() == Some(404) => {
                debug!(name = %key.name, "Already gone");
            }
            Err(e) => return Err(e),
        }
        self.cache.delete(key);
        Ok(())
    }

    /// Tear down everything the cache attributes to a model.
    async fn teardown(
        &self,
        transport: &dyn AviTransport,
        tenant: &str,
        vs_name: &str,
        model_name: &str,
    ) -> Result<(), RestError> {
        let objects = self.cache.model_objects(tenant, vs_name);
        if objects.is_empty() {
            debug!(model = %model_name, "Nothing cached for model, teardown done");
        }

        // Children VS first, then the parent, then dependencies in
        // reverse apply order.
        let mut children = Vec::new();
        let mut parent = None;
        let mut rest = Vec::new();
        for key in objects {
            match key.class {
                ObjClass::VirtualService if key.name == vs_name => parent = Some(key),
                ObjClass::VirtualService => children.push(key),
                _ => rest.push(key),
            }
        }
        rest.sort_by_key(|k| {
            std::cmp::Reverse(
                ObjClass::APPLY_ORDER
                    .iter()
                    .position(|c| *c == k.class)
                    .unwrap_or(0),
            )
        });

        for key in children {
            self.delete_object(transport, tenant, &key).await?;
        }
        if let Some(key) = parent {
            self.delete_object(transport, tenant, &key).await?;
        }
        for key in rest {
            self.delete_object(transport, tenant, &key).await?;
        }

        if let Some((_, origins)) = self.last_origins.remove(model_name) {
            self.publish_status(StatusItem::VsStatusClear { origins });
        }
        info!(model = %model_name, "Model torn down");
        Ok(())
    }

    /// PUT the VRF context with this cluster's routes, preserving routes
    /// other clusters programmed into the shared VRF.
    async fn apply_vrf(
        &self,
        transport: &dyn AviTransport,
        tenant: &str,
        vrf: &AviVrfNode,
        graph: &Arc<ObjectGraph>,
    ) -> Result<(), RestError> {
        let key = CacheKey::new(ObjClass::VrfContext, tenant, &vrf.name);
        if let Some(entry) = self.cache.get(&key) {
            if entry.checksum == graph.checksum() {
                debug!(vrf = %vrf.name, "VRF checksum unchanged");
                return Ok(());
            }
        }

        let current = transport
            .get(tenant, &format!("vrfcontext?name={}", vrf.name))
            .await?;
        let Some(obj) = current["results"].as_array().and_then(|r| r.first()) else {
            return Err(RestError::http(
                404,
                format!("vrfcontext {} not found", vrf.name),
            ));
        };
        let uuid = obj
            .get("uuid")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let prefix = format!("{}-", self.cfg.cluster_name);
        let foreign: Vec<Value> = obj["static_routes"]
            .as_array()
            .map(|routes| {
                routes
                    .iter()
                    .filter(|r| {
                        !r["route_id"]
                            .as_str()
                            .map(|id| id.starts_with(&prefix))
                            .unwrap_or(false)
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        let body = ops::vrf_body(&self.cfg, vrf, foreign);
        transport.put(tenant, "vrfcontext", &uuid, body).await?;
        self.cache.upsert(
            key,
            AviCacheEntry {
                uuid,
                checksum: graph.checksum(),
                ..Default::default()
            },
        );
        info!(vrf = %vrf.name, routes = vrf.static_routes.len(), "VRF static routes applied");
        Ok(())
    }

    /// Boot-time stale-data sweep: materialise the dummy VS and delete it
    /// so leftovers from a crashed run with the same name are cleared.
    pub async fn cleanup_stale_vs(&self) {
        let tenant = self.cfg.tenant.clone();
        let transport = self.pool.any();
        let body = serde_json::json!({
            "name": DUMMY_VS_FOR_STALE_DATA,
            "cloud_ref": crate::avi::models::obj_ref("cloud", &self.cfg.cloud_name),
            "tenant_ref": crate::avi::models::obj_ref("tenant", &tenant),
            "enabled": false,
        });
        if let Err(e) = transport.post(&tenant, "virtualservice", body).await {
            debug!(error = %e, "Dummy VS create failed (may already exist)");
        }
        match transport
            .get(
                &tenant,
                &format!("virtualservice?name={DUMMY_VS_FOR_STALE_DATA}"),
            )
            .await
        {
            Ok(resp) => {
                if let Some(uuid) = resp["results"]
                    .as_array()
                    .and_then(|r| r.first())
                    .and_then(|v| v["uuid"].as_str())
                {
                    if let Err(e) = transport.delete(&tenant, "virtualservice", uuid).await {
                        warn!(error = %e, "Dummy VS delete failed");
                    } else {
                        info!("Stale-data dummy VS cleared");
                    }
                }
            }
            Err(e) => warn!(error = %e, "Dummy VS lookup failed"),
        }
        self.cache.delete(&CacheKey::new(
            ObjClass::VirtualService,
            tenant,
            DUMMY_VS_FOR_STALE_DATA,
        ));
    }
}

#[async_trait]
impl QueueHandler for RestLayer {
    async fn sync(&self, key: String) -> crate::Result<()> {
        self.dequeue_nodes(&key).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::avi::client::MockAviTransport;
    use crate::config::VipNetwork;
    use crate::graph::{PoolMember, PoolNode, VsPort, VsType, VsVipNode};

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

    fn simple_vs(member_ip: &str) -> AviVsNode {
        let mut vs = AviVsNode {
            name: "c1--red-app".to_string(),
            vs_type: VsType::L4,
            enabled: true,
            vsvip: Some(VsVipNode {
                name: "c1--red-app".to_string(),
                ..Default::default()
            }),
            services: vec![VsPort { port: 80, enable_ssl: false }],
            pools: vec![PoolNode {
                name: "c1--red-app--80".to_string(),
                port: 80,
                members: vec![PoolMember {
                    ip: member_ip.to_string(),
                    port: 8080,
                }],
                ..Default::default()
            }],
            origins: vec!["L4LBService/red/app".to_string()],
            ..Default::default()
        };
        vs.sort_for_checksum();
        vs
    }

    fn rest_layer(transport: MockAviTransport) -> (Arc<RestLayer>, Arc<GraphLister>, Arc<AviObjCache>) {
        let lister = GraphLister::new();
        let cache = AviObjCache::new();
        let pool = AviClientPool::from_transports(vec![Arc::new(transport)]);
        let layer = RestLayer::new(
            test_config(),
            Arc::clone(&lister),
            Arc::clone(&cache),
            pool,
            WorkerQueue::new("fast-test", 1),
            WorkerQueue::new("slow-test", 1),
            WorkerQueue::new("status-test", 1),
        );
        (layer, lister, cache)
    }

    fn graph_for(vs: AviVsNode) -> Arc<ObjectGraph> {
        Arc::new(ObjectGraph::new("admin/c1--red-app", Some(GraphRoot::Vs(vs))))
    }

    #[tokio::test]
    async fn fresh_model_posts_in_dependency_order() {
        let mut mock = MockAviTransport::new();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let order_c = Arc::clone(&order);
        mock.expect_post().returning(move |_, path, body| {
            order_c.lock().unwrap().push(path.to_string());
            let name = body["name"].as_str().unwrap_or("");
            Ok(serde_json::json!({ "uuid": format!("u-{name}"), "name": name }))
        });
        mock.expect_get()
            .returning(|_, _| Ok(serde_json::json!({ "results": [] })));

        let (layer, lister, cache) = rest_layer(mock);
        lister.save("admin/c1--red-app", Some(graph_for(simple_vs("10.0.0.1"))));
        layer.dequeue_nodes("admin/c1--red-app").await;

        let seq = order.lock().unwrap().clone();
        assert_eq!(seq, vec!["vsvip", "pool", "virtualservice"]);
        assert_eq!(cache.len(), 3);
    }

    #[tokio::test]
    async fn reapplying_the_same_state_issues_no_calls() {
        let mut mock = MockAviTransport::new();
        let posts = Arc::new(std::sync::Mutex::new(0u32));
        let posts_c = Arc::clone(&posts);
        mock.expect_post().returning(move |_, _, body| {
            *posts_c.lock().unwrap() += 1;
            let name = body["name"].as_str().unwrap_or("");
            Ok(serde_json::json!({ "uuid": format!("u-{name}") }))
        });
        mock.expect_put().times(0);
        mock.expect_delete().times(0);
        mock.expect_get()
            .returning(|_, _| Ok(serde_json::json!({ "results": [] })));

        let (layer, lister, _) = rest_layer(mock);
        lister.save("admin/c1--red-app", Some(graph_for(simple_vs("10.0.0.1"))));
        layer.dequeue_nodes("admin/c1--red-app").await;
        assert_eq!(*posts.lock().unwrap(), 3);
        // Second pass with the same graph: no further mutations.
        layer.dequeue_nodes("admin/c1--red-app").await;
        assert_eq!(*posts.lock().unwrap(), 3);
    }

    #[tokio::test]
    async fn changed_member_issues_put_not_post() {
        let mut mock = MockAviTransport::new();
        mock.expect_post().returning(|_, _, body| {
            let name = body["name"].as_str().unwrap_or("");
            Ok(serde_json::json!({ "uuid": format!("u-{name}") }))
        });
        let put_count = Arc::new(std::sync::Mutex::new(Vec::new()));
        let put_c = Arc::clone(&put_count);
        mock.expect_put().returning(move |_, path, _, _| {
            put_c.lock().unwrap().push(path.to_string());
            Ok(serde_json::json!({}))
        });
        mock.expect_get()
            .returning(|_, _| Ok(serde_json::json!({ "results": [] })));

        let (layer, lister, _) = rest_layer(mock);
        lister.save("admin/c1--red-app", Some(graph_for(simple_vs("10.0.0.1"))));
        layer.dequeue_nodes("admin/c1--red-app").await;

        lister.save("admin/c1--red-app", Some(graph_for(simple_vs("10.0.0.2"))));
        layer.dequeue_nodes("admin/c1--red-app").await;
        // Only the pool content changed.
        assert_eq!(put_count.lock().unwrap().clone(), vec!["pool"]);
    }

    #[tokio::test]
    async fn nil_graph_tears_the_model_down_in_reverse_order() {
        let mut mock = MockAviTransport::new();
        mock.expect_post().returning(|_, _, body| {
            let name = body["name"].as_str().unwrap_or("");
            Ok(serde_json::json!({ "uuid": format!("u-{name}") }))
        });
        let deletes = Arc::new(std::sync::Mutex::new(Vec::new()));
        let deletes_c = Arc::clone(&deletes);
        mock.expect_delete().returning(move |_, path, _| {
            deletes_c.lock().unwrap().push(path.to_string());
            Ok(())
        });
        mock.expect_get()
            .returning(|_, _| Ok(serde_json::json!({ "results": [] })));

        let (layer, lister, cache) = rest_layer(mock);
        lister.save("admin/c1--red-app", Some(graph_for(simple_vs("10.0.0.1"))));
        layer.dequeue_nodes("admin/c1--red-app").await;
        assert_eq!(cache.len(), 3);

        lister.save("admin/c1--red-app", None);
        layer.dequeue_nodes("admin/c1--red-app").await;

        let seq = deletes.lock().unwrap().clone();
        assert_eq!(seq, vec!["virtualservice", "pool", "vsvip"]);
        assert_eq!(cache.len(), 0);
        // The lister entry is removed after teardown.
        assert!(lister.get("admin/c1--red-app").is_none());
    }

    #[tokio::test]
    async fn transient_errors_go_to_the_fast_retry_queue() {
        let mut mock = MockAviTransport::new();
        mock.expect_post()
            .returning(|_, _, _| Err(RestError::http(503, "unavailable")));
        mock.expect_get()
            .returning(|_, _| Ok(serde_json::json!({ "results": [] })));

        let (layer, lister, cache) = rest_layer(mock);
        lister.save("admin/c1--red-app", Some(graph_for(simple_vs("10.0.0.1"))));
        layer.dequeue_nodes("admin/c1--red-app").await;
        // Nothing committed to the cache on failure.
        assert_eq!(cache.len(), 0);
    }

    #[tokio::test]
    async fn crash_restart_populated_cache_turns_create_into_update() {
        let mut mock = MockAviTransport::new();
        let posts = Arc::new(std::sync::Mutex::new(0u32));
        let puts = Arc::new(std::sync::Mutex::new(0u32));
        let posts_c = Arc::clone(&posts);
        let puts_c = Arc::clone(&puts);
        mock.expect_post().returning(move |_, _, _| {
            *posts_c.lock().unwrap() += 1;
            Ok(serde_json::json!({ "uuid": "u-x" }))
        });
        mock.expect_put().returning(move |_, _, _, _| {
            *puts_c.lock().unwrap() += 1;
            Ok(serde_json::json!({}))
        });
        mock.expect_get()
            .returning(|_, _| Ok(serde_json::json!({ "results": [] })));

        let (layer, lister, cache) = rest_layer(mock);
        // Simulate bootstrap population: entries exist with controller-side
        // checksums that do not match the graph's.
        for (class, name) in [
            (ObjClass::VsVip, "c1--red-app"),
            (ObjClass::Pool, "c1--red-app--80"),
            (ObjClass::VirtualService, "c1--red-app"),
        ] {
            cache.upsert(
                CacheKey::new(class, "admin", name),
                AviCacheEntry {
                    uuid: format!("u-{name}"),
                    checksum: 1,
                    is_parent: class == ObjClass::VirtualService,
                    ..Default::default()
                },
            );
        }

        lister.save("admin/c1--red-app", Some(graph_for(simple_vs("10.0.0.1"))));
        layer.dequeue_nodes("admin/c1--red-app").await;

        assert_eq!(*posts.lock().unwrap(), 0, "no duplicate creates after restart");
        assert_eq!(*puts.lock().unwrap(), 3);
    }

    #[tokio::test]
    async fn vrf_apply_preserves_foreign_routes() {
        let mut mock = MockAviTransport::new();
        mock.expect_get().returning(|_, path| {
            assert!(path.starts_with("vrfcontext"));
            Ok(serde_json::json!({
                "results": [ {
                    "uuid": "vrf-u",
                    "name": "global",
                    "static_routes": [
                        { "route_id": "other-0" },
                        { "route_id": "c1-0" }
                    ]
                } ]
            }))
        });
        let bodies = Arc::new(std::sync::Mutex::new(Vec::new()));
        let bodies_c = Arc::clone(&bodies);
        mock.expect_put().returning(move |_, _, _, body| {
            bodies_c.lock().unwrap().push(body);
            Ok(serde_json::json!({}))
        });

        let (layer, lister, _) = rest_layer(mock);
        let vrf = AviVrfNode {
            name: "global".to_string(),
            static_routes: vec![crate::graph::StaticRouteNode {
                route_id: "c1-0".to_string(),
                prefix: "10.244.1.0".to_string(),
                mask: 24,
                next_hop: "192.168.1.10".to_string(),
            }],
        };
        lister.save(
            "admin/global",
            Some(Arc::new(ObjectGraph::new("admin/global", Some(GraphRoot::Vrf(vrf))))),
        );
        layer.dequeue_nodes("admin/global").await;

        let body = bodies.lock().unwrap()[0].clone();
        let ids: Vec<&str> = body["static_routes"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|r| r["route_id"].as_str())
            .collect();
        // The foreign route survives; our stale c1-0 is replaced by the
        // freshly built one.
        assert_eq!(ids, vec!["other-0", "c1-0"]);
    }
}
