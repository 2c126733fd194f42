//! Lifecycle orchestrator: boot, full sync, delete sync, shutdown
//!
//! Boot follows a strict order: credentials and REST sessions first, the
//! ConfigMap gate, cache population (fatal on failure), watcher start with
//! a bounded initial list, queue workers (REST side first, ingestion
//! last), one full sync with the VRF published ahead of everything, then
//! the periodic timers. The ConfigMap observer drives the delete-sync and
//! quick-sync cycles for the rest of the process lifetime.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::core::v1::{ConfigMap, Endpoints, Namespace, Node, Pod, Secret, Service};
use k8s_openapi::api::networking::v1::{Ingress, IngressClass};
use kube::api::{Api, ListParams};
use kube::runtime::watcher;
use kube::Client;
use kube::Resource as _;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::api_server::ApiServerHandle;
use crate::avi::client::{refresh_auth_token, AviClientPool, AviCredentials};
use crate::cache::AviObjCache;
use crate::config::{self, AkoConfig, ServiceType};
use crate::crd::{AviInfraSetting, HTTPRule, HostRule};
use crate::graph::layer::GraphLayer;
use crate::graph::lister::GraphLister;
use crate::graph::{AviVrfNode, GraphRoot, ObjectGraph};
use crate::ingestion::filters::NamespaceFilter;
use crate::ingestion::IngestionLayer;
use crate::k8s::watch::run_watchers;
use crate::k8s::{encode_key, Gateway, GatewayClass, K8sStore, ObjectKind, Route};
use crate::queue::WorkerQueue;
use crate::rest::RestLayer;
use crate::retry::{retry_with_backoff, FastRetryLayer, RetryConfig, SlowRetryLayer};
use crate::status::{conditions, StatusItem, StatusLayer};
use crate::telemetry::LogLevelHandle;
use crate::{
    queue_names, Error, Result, AVI_CONFIG_MAP, AVI_OBJ_DELETION_TIME, AVI_SECRET,
    SLOW_SYNC_TIME, STATIC_ROUTE_SYNC_TIMEOUT,
};

/// ConfigMap keys AKO recognises.
mod cm_keys {
    pub const DELETE_CONFIG: &str = "deleteConfig";
    pub const LOG_LEVEL: &str = "logLevel";
    pub const LAYER7_ONLY: &str = "layer7Only";
    pub const NO_PG_FOR_SNI: &str = "noPGForSNI";
    pub const GRBAC: &str = "enableGRBAC";
}

/// The five pipeline queues.
pub struct Queues {
    /// Ingestion keys, sharded by namespace
    pub ingestion: Arc<WorkerQueue>,
    /// Model names for the REST layer, sharded by model
    pub graph: Arc<WorkerQueue>,
    /// Fast retry (1 worker)
    pub fast_retry: Arc<WorkerQueue>,
    /// Slow retry (1 worker, ticked)
    pub slow_retry: Arc<WorkerQueue>,
    /// Status writes
    pub status: Arc<WorkerQueue>,
}

impl Queues {
    /// Size the queues from the configuration: one ingestion worker,
    /// shard-size REST/status workers, single retry workers.
    pub fn new(cfg: &AkoConfig) -> Arc<Self> {
        let graph_workers = cfg.graph_workers();
        Arc::new(Self {
            ingestion: WorkerQueue::new(queue_names::INGESTION, 1),
            graph: WorkerQueue::new(queue_names::GRAPH, graph_workers),
            fast_retry: WorkerQueue::new(queue_names::FAST_RETRY, 1),
            slow_retry: WorkerQueue::with_slow_sync(queue_names::SLOW_RETRY, 1, SLOW_SYNC_TIME),
            status: WorkerQueue::new(queue_names::STATUS, graph_workers),
        })
    }
}

/// Everything the orchestrator wires together.
pub struct Orchestrator {
    /// Bootstrap configuration
    pub cfg: Arc<AkoConfig>,
    /// Cluster snapshot
    pub store: Arc<K8sStore>,
    /// Desired graphs
    pub lister: Arc<GraphLister>,
    /// Remote-state mirror
    pub cache: Arc<AviObjCache>,
    /// REST session pool
    pub pool: Arc<AviClientPool>,
    /// Pipeline queues
    pub queues: Arc<Queues>,
    /// Namespace filter
    pub ns_filter: Arc<NamespaceFilter>,
    /// Graph layer
    pub graph_layer: Arc<GraphLayer>,
    /// REST layer
    pub rest_layer: Arc<RestLayer>,
    /// Status layer
    pub status_layer: Arc<StatusLayer>,
    /// Ingestion layer
    pub ingestion_layer: Arc<IngestionLayer>,
}

impl Orchestrator {
    /// Wire every layer up (no workers started yet).
    pub fn new(
        cfg: Arc<AkoConfig>,
        pool: Arc<AviClientPool>,
        status_layer: Arc<StatusLayer>,
    ) -> Self {
        let store = K8sStore::new();
        let lister = GraphLister::new();
        let cache = AviObjCache::new();
        let queues = Queues::new(&cfg);
        let ns_filter = Arc::new(NamespaceFilter::new(cfg.namespace_sync_label.clone()));

        let graph_layer = GraphLayer::new(
            Arc::clone(&cfg),
            Arc::clone(&store),
            Arc::clone(&lister),
            Arc::clone(&ns_filter),
            Arc::clone(&queues.graph),
            Arc::clone(&queues.status),
        );
        let rest_layer = RestLayer::new(
            Arc::clone(&cfg),
            Arc::clone(&lister),
            Arc::clone(&cache),
            Arc::clone(&pool),
            Arc::clone(&queues.fast_retry),
            Arc::clone(&queues.slow_retry),
            Arc::clone(&queues.status),
        );
        let ingestion_layer = IngestionLayer::new(
            Arc::clone(&cfg),
            Arc::clone(&store),
            Arc::clone(&ns_filter),
            Arc::clone(&queues.ingestion),
            Arc::clone(&queues.status),
        );

        Self {
            cfg,
            store,
            lister,
            cache,
            pool,
            queues,
            ns_filter,
            graph_layer,
            rest_layer,
            status_layer,
            ingestion_layer,
        }
    }

    /// Start the workers in boot order: REST side first (graph queue,
    /// retries, status), ingestion last. Returns all worker handles.
    pub async fn start_workers(&self, stop: CancellationToken) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();
        handles.extend(
            self.queues
                .graph
                .run(self.rest_layer.clone(), stop.clone())
                .await,
        );
        let fast = FastRetryLayer::new(
            Arc::clone(&self.lister),
            Arc::clone(&self.queues.graph),
            Arc::clone(&self.queues.slow_retry),
        );
        handles.extend(self.queues.fast_retry.run(fast, stop.clone()).await);
        let slow = SlowRetryLayer::new(Arc::clone(&self.queues.graph));
        handles.extend(self.queues.slow_retry.run(slow, stop.clone()).await);
        handles.extend(
            self.queues
                .status
                .run(self.status_layer.clone(), stop.clone())
                .await,
        );
        handles
    }

    /// Start the ingestion queue workers (last, after the first full sync).
    pub async fn start_ingestion_workers(
        &self,
        stop: CancellationToken,
    ) -> Vec<JoinHandle<()>> {
        self.queues
            .ingestion
            .run(self.graph_layer.clone(), stop)
            .await
    }

    /// One full Kubernetes sync: the VRF model first (gated on the REST
    /// layer's static-route signal), then every watched object, then
    /// orphaned cache models.
    pub async fn full_sync_k8s(&self) {
        if config::disable_sync() {
            info!("Sync disabled, skipping full sync");
            return;
        }
        let cfg = &self.cfg;

        if !cfg.static_route_sync_disabled() {
            // Register for the completion signal before publishing so a
            // fast REST worker cannot win the race.
            let mut wait = std::pin::pin!(self.rest_layer.static_route_done.notified());
            wait.as_mut().enable();
            for (name, _) in self.store.nodes.list_all() {
                self.graph_layer
                    .dequeue_ingestion(&encode_key(ObjectKind::Node, &cfg.tenant, &name), true);
            }
            let vrf_model = cfg.vrf_model_name();
            info!(model = %vrf_model, "Processing model for vrf context in full sync");
            if tokio::time::timeout(STATIC_ROUTE_SYNC_TIMEOUT, wait).await.is_err() {
                warn!("Timed out while waiting for rest layer to respond, moving on with bootup");
            } else {
                info!("Processing done for VRF");
            }
        }

        for (store_key, svc) in self.store.services.list_all() {
            let Some((ns, name)) = store_key.split_once('/') else { continue };
            let is_lb = svc.spec.as_ref().and_then(|s| s.type_.as_deref()) == Some("LoadBalancer");
            if is_lb && !config::layer7_only() {
                if !self.ns_filter.namespace_accepted(ns) {
                    continue;
                }
                self.graph_layer
                    .dequeue_ingestion(&encode_key(ObjectKind::L4LBService, ns, name), true);
            } else if !cfg.advanced_l4 && self.ns_filter.namespace_accepted(ns) {
                self.graph_layer
                    .dequeue_ingestion(&encode_key(ObjectKind::Service, ns, name), true);
            }
        }

        if cfg.service_type == ServiceType::NodePortLocal {
            for (store_key, _) in self.store.pods.list_all() {
                let Some((ns, name)) = store_key.split_once('/') else { continue };
                self.graph_layer
                    .dequeue_ingestion(&encode_key(ObjectKind::Pod, ns, name), true);
            }
        }

        if !cfg.advanced_l4 {
            for (store_key, _) in self.store.host_rules.list_all() {
                let Some((ns, name)) = store_key.split_once('/') else { continue };
                self.graph_layer
                    .dequeue_ingestion(&encode_key(ObjectKind::HostRule, ns, name), true);
            }
            for (store_key, _) in self.store.http_rules.list_all() {
                let Some((ns, name)) = store_key.split_once('/') else { continue };
                self.graph_layer
                    .dequeue_ingestion(&encode_key(ObjectKind::HTTPRule, ns, name), true);
            }
            for (name, _) in self.store.infra_settings.list_all() {
                self.graph_layer
                    .dequeue_ingestion(&encode_key(ObjectKind::AviInfraSetting, "", &name), true);
            }
            for (store_key, _) in self.store.ingresses.list_all() {
                let Some((ns, name)) = store_key.split_once('/') else { continue };
                if self.ns_filter.namespace_accepted(ns) {
                    self.graph_layer
                        .dequeue_ingestion(&encode_key(ObjectKind::Ingress, ns, name), true);
                }
            }
            for (store_key, _) in self.store.routes.list_all() {
                let Some((ns, name)) = store_key.split_once('/') else { continue };
                if self.ns_filter.namespace_accepted(ns) {
                    self.graph_layer
                        .dequeue_ingestion(&encode_key(ObjectKind::Route, ns, name), true);
                }
            }
        }
        if cfg.advanced_l4 || cfg.services_api {
            for (store_key, _) in self.store.gateways.list_all() {
                let Some((ns, name)) = store_key.split_once('/') else { continue };
                if cfg.advanced_l4 || self.ns_filter.namespace_accepted(ns) {
                    self.graph_layer
                        .dequeue_ingestion(&encode_key(ObjectKind::Gateway, &cfg.tenant, name), true);
                }
            }
            for (name, _) in self.store.gateway_classes.list_all() {
                self.graph_layer
                    .dequeue_ingestion(&encode_key(ObjectKind::GatewayClass, &cfg.tenant, &name), true);
            }
        }

        // Orphan cleanup: models the controller still holds but the graph
        // lister no longer tracks get a teardown pass.
        for key in self.cache.parent_vs_keys() {
            let model = crate::model_name(&key.tenant, &key.name);
            if self.lister.get(&model).is_none() {
                info!(model = %model, "Cache model with no graph, scheduling cleanup");
                self.queues.graph.enqueue_key(model);
            }
        }

        // A full sync hands every model a fresh retry budget.
        for (_, graph) in self.lister.get_all() {
            if let Some(graph) = graph {
                graph.reset_retry_counter();
            }
        }
    }

    /// Periodic full sync: refresh the remote mirror and reset budgets.
    pub async fn full_sync(&self) {
        let transport = self.pool.any();
        if let Err(e) = self.cache.refresh(&*transport, &self.cfg).await {
            warn!(error = %e, "Cache refresh failed during full sync");
        }
        for (model, graph) in self.lister.get_all() {
            if let Some(graph) = graph {
                tracing::debug!(model = %model, "Resetting retry counter during full sync");
                graph.reset_retry_counter();
            }
        }
    }

    /// Delete-sync: overwrite every model with an empty graph (VRF models
    /// keep a route-less VRF root), push them through the REST layer, and
    /// wait for the teardown signal with a bounded deadline.
    pub async fn delete_models(&self, deadline: Duration) {
        info!("Deletion of all avi objects triggered");
        self.publish_status(StatusItem::StatefulSetCondition {
            reason: conditions::OBJECT_DELETION_START.to_string(),
            status: "True".to_string(),
        });

        let all = self.lister.get_all();
        if all.is_empty() {
            info!("No Avi object to delete, status would be updated in statefulset");
            self.publish_status(StatusItem::StatefulSetCondition {
                reason: conditions::OBJECT_DELETION_DONE.to_string(),
                status: "False".to_string(),
            });
            return;
        }

        self.rest_layer.set_delete_in_progress(true);
        let mut wait = std::pin::pin!(self.rest_layer.delete_done.notified());
        wait.as_mut().enable();
        for (model, graph) in all {
            let is_vrf = graph.as_ref().map(|g| g.is_vrf).unwrap_or(false);
            if is_vrf {
                let empty_vrf = ObjectGraph::new(
                    model.clone(),
                    Some(GraphRoot::Vrf(AviVrfNode {
                        name: self.cfg.vrf_name.clone(),
                        static_routes: Vec::new(),
                    })),
                );
                self.lister.save(&model, Some(Arc::new(empty_vrf)));
            } else {
                self.lister.save(&model, None);
            }
            info!(model = %model, "Deleting objects for model");
            self.queues.graph.enqueue_key(model);
        }

        if tokio::time::timeout(deadline, wait).await.is_err() {
            self.publish_status(StatusItem::StatefulSetCondition {
                reason: conditions::OBJECT_DELETION_TIMEOUT.to_string(),
                status: "Unknown".to_string(),
            });
            warn!("Timed out while waiting for rest layer to respond for delete config");
        } else {
            self.publish_status(StatusItem::StatefulSetCondition {
                reason: conditions::OBJECT_DELETION_DONE.to_string(),
                status: "False".to_string(),
            });
            info!("Processing done for deleteConfig, user notified through statefulset update");
        }
        self.rest_layer.set_delete_in_progress(false);

        if self.cfg.service_type == ServiceType::NodePortLocal {
            for (store_key, _) in self.store.services.list_all() {
                let Some((ns, name)) = store_key.split_once('/') else { continue };
                self.status_layer.delete_npl_annotation(ns, name).await;
            }
        }
    }

    fn publish_status(&self, item: StatusItem) {
        match item.encode() {
            Ok(payload) => self.queues.status.enqueue_key(payload),
            Err(e) => warn!(error = %e, "Failed to encode status item, dropped"),
        }
    }
}

async fn read_credentials(client: &Client, cfg: &AkoConfig) -> Result<AviCredentials> {
    let api: Api<Secret> = Api::namespaced(client.clone(), &cfg.ako_namespace);
    let secret = api.get(AVI_SECRET).await.map_err(|e| {
        Error::config(format!("could not read {AVI_SECRET}: {e}"))
    })?;
    let data = secret.data.unwrap_or_default();
    let field = |name: &str| {
        data.get(name)
            .map(|v| String::from_utf8_lossy(&v.0).to_string())
            .filter(|s| !s.is_empty())
    };
    let creds = AviCredentials {
        username: field("username").ok_or_else(|| Error::config("avi-secret missing username"))?,
        password: field("password"),
        authtoken: field("authtoken"),
        ca_data: field("certificateAuthorityData"),
    };
    if creds.password.is_none() && creds.authtoken.is_none() {
        return Err(Error::config("avi-secret needs a password or authtoken"));
    }
    Ok(creds)
}

fn delete_config_set(cm: &ConfigMap) -> bool {
    cm.data
        .as_ref()
        .and_then(|d| d.get(cm_keys::DELETE_CONFIG))
        .map(String::as_str)
        == Some("true")
}

/// Apply the boot-time ConfigMap settings (log level and feature flags).
fn apply_config_map_settings(cm: &ConfigMap, log_handle: &LogLevelHandle) {
    let data = cm.data.clone().unwrap_or_default();
    if let Some(level) = data.get(cm_keys::LOG_LEVEL) {
        log_handle.set_level(level);
    }
    config::set_layer7_only(data.get(cm_keys::LAYER7_ONLY).map(String::as_str).unwrap_or(""));
    config::set_no_pg_for_sni(data.get(cm_keys::NO_PG_FOR_SNI).map(String::as_str).unwrap_or(""));
    config::set_grbac(data.get(cm_keys::GRBAC).map(String::as_str).unwrap_or(""));
}

async fn list_into_store(client: &Client, cfg: &AkoConfig, store: &K8sStore, openshift: bool) {
    let lp = ListParams::default();
    macro_rules! load {
        ($ty:ty, $api:expr, $slot:expr, $cluster_scoped:expr) => {{
            let api: Api<$ty> = $api;
            match tokio::time::timeout(Duration::from_secs(120), api.list(&lp)).await {
                Ok(Ok(list)) => {
                    for obj in list.items {
                        let ns = obj.meta().namespace.clone().unwrap_or_default();
                        let name = obj.meta().name.clone().unwrap_or_default();
                        if $cluster_scoped {
                            $slot.insert("", &name, obj);
                        } else {
                            $slot.insert(&ns, &name, obj);
                        }
                    }
                }
                Ok(Err(e)) => warn!(error = %e, "Initial list failed, watcher will fill in"),
                Err(_) => warn!("Timed out waiting for caches to sync"),
            }
        }};
    }

    load!(Service, Api::all(client.clone()), store.services, false);
    load!(Endpoints, Api::all(client.clone()), store.endpoints, false);
    load!(Secret, Api::all(client.clone()), store.secrets, false);
    if cfg.service_type == ServiceType::NodePortLocal {
        load!(Pod, Api::all(client.clone()), store.pods, false);
    }
    if !cfg.advanced_l4 {
        load!(Namespace, Api::all(client.clone()), store.namespaces, true);
        if !cfg.static_route_sync_disabled() {
            load!(Node, Api::all(client.clone()), store.nodes, true);
        }
        if openshift {
            load!(Route, Api::all(client.clone()), store.routes, false);
        } else {
            load!(Ingress, Api::all(client.clone()), store.ingresses, false);
            load!(IngressClass, Api::all(client.clone()), store.ingress_classes, true);
        }
        load!(HostRule, Api::all(client.clone()), store.host_rules, false);
        load!(HTTPRule, Api::all(client.clone()), store.http_rules, false);
        load!(AviInfraSetting, Api::all(client.clone()), store.infra_settings, true);
    }
    if cfg.advanced_l4 || cfg.services_api {
        load!(Gateway, Api::all(client.clone()), store.gateways, false);
        load!(GatewayClass, Api::all(client.clone()), store.gateway_classes, true);
    }
    info!("Caches synced");
}

/// Seed the namespace filter from the listed namespaces.
fn seed_namespace_filter(store: &K8sStore, filter: &NamespaceFilter) {
    if !filter.enabled() {
        return;
    }
    for (name, ns) in store.namespaces.list_all() {
        if filter.labels_match(ns.metadata.labels.as_ref()) {
            filter.add_namespace(&name);
        }
    }
}

/// Probe for the OpenShift Route API the way the original operator does:
/// serve Routes when the API answers, Ingresses otherwise.
async fn probe_openshift(client: &Client) -> bool {
    let api: Api<Route> = Api::all(client.clone());
    api.list(&ListParams::default().limit(1)).await.is_ok()
}

/// Run the controller until shutdown.
///
/// The boot sequence plus the ConfigMap observer loop.
pub async fn run(
    cfg: Arc<AkoConfig>,
    client: Client,
    log_handle: LogLevelHandle,
    api_server: ApiServerHandle,
) -> Result<()> {
    // 1. Credentials and REST sessions.
    let credentials = read_credentials(&client, &cfg).await?;
    let pool = AviClientPool::connect(&cfg.controller_ip, &credentials, cfg.graph_workers())
        .map_err(|e| Error::config(format!("cannot reach the Avi controller: {e}")))?;

    // 2. ConfigMap gate.
    let cm_api: Api<ConfigMap> = Api::namespaced(client.clone(), &cfg.ako_namespace);
    match cm_api.get(AVI_CONFIG_MAP).await {
        Ok(cm) => {
            apply_config_map_settings(&cm, &log_handle);
            if delete_config_set(&cm) {
                warn!("deleteConfig set in configmap, sync would be disabled");
                config::set_disable_sync(true);
            } else {
                config::set_disable_sync(false);
            }
        }
        Err(e) => {
            warn!(error = %e, "error while reading configmap, sync would be disabled");
            config::set_disable_sync(true);
        }
    }

    let status_layer = StatusLayer::new(Arc::clone(&cfg), client.clone());
    let orch = Arc::new(Orchestrator::new(
        Arc::clone(&cfg),
        Arc::clone(&pool),
        status_layer,
    ));

    // 3. Cache population is load-bearing: without the mirror every diff
    // would re-create existing objects.
    {
        let transport = pool.any();
        if let Err(e) = orch.cache.populate(&*transport, &cfg).await {
            error!(error = %e, "failed to populate avi cache, disabling sync");
            config::set_disable_sync(true);
            api_server.shutdown();
            return Err(Error::config(format!("cache population failed: {e}")));
        }
        orch.rest_layer.cleanup_stale_vs().await;
    }

    // 4. Watchers plus a bounded initial list.
    let stop = CancellationToken::new();
    let openshift = probe_openshift(&client).await;
    list_into_store(&client, &cfg, &orch.store, openshift).await;
    seed_namespace_filter(&orch.store, &orch.ns_filter);
    let mut watcher_handles = run_watchers(
        client.clone(),
        Arc::clone(&orch.ingestion_layer),
        &cfg,
        openshift,
        stop.clone(),
    );

    // 5. Queue workers, ingestion last after the first full sync.
    let mut worker_handles = orch.start_workers(stop.clone()).await;

    // 6. First boot sync.
    orch.full_sync_k8s().await;
    worker_handles.extend(orch.start_ingestion_workers(stop.clone()).await);

    // 7. Timers.
    let (quick_sync_tx, mut quick_sync_rx) = tokio::sync::mpsc::unbounded_channel::<()>();
    let full_sync_enabled = cfg.full_sync_interval > 0;
    if !full_sync_enabled {
        warn!("Full sync interval set to 0, will not run full sync");
    }
    let full_sync_period = Duration::from_secs(cfg.full_sync_interval.max(1));
    let mut full_sync_timer = tokio::time::interval_at(
        tokio::time::Instant::now() + full_sync_period,
        full_sync_period,
    );
    full_sync_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let auth_refresh_enabled = credentials.uses_token();
    let auth_refresh_period = Duration::from_secs(12 * 3600);
    let mut auth_refresh_timer = tokio::time::interval_at(
        tokio::time::Instant::now() + auth_refresh_period,
        auth_refresh_period,
    );
    auth_refresh_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    // ConfigMap observer.
    let cm_stream = watcher::watcher(cm_api.clone(), watcher::Config::default());
    let mut cm_stream = std::pin::pin!(cm_stream);
    let mut last_delete_config = delete_config_set(
        &cm_api.get(AVI_CONFIG_MAP).await.unwrap_or_default(),
    );

    info!("AKO boot complete, entering the orchestrator loop");
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
            Some(()) = quick_sync_rx.recv() => {
                info!("Quick sync triggered");
                orch.full_sync_k8s().await;
            }
            _ = orch.rest_layer.auth_refresh_needed.notified() => {
                refresh_token_into_secret(&client, &cfg, &pool).await;
            }
            _ = full_sync_timer.tick() => {
                if full_sync_enabled {
                    info!("Periodic full sync");
                    orch.full_sync().await;
                    orch.full_sync_k8s().await;
                }
            }
            _ = auth_refresh_timer.tick() => {
                if auth_refresh_enabled {
                    refresh_token_into_secret(&client, &cfg, &pool).await;
                }
            }
            event = cm_stream.next() => {
                match event {
                    Some(Ok(watcher::Event::Apply(cm))) | Some(Ok(watcher::Event::InitApply(cm))) => {
                        if cm.meta().name.as_deref() != Some(AVI_CONFIG_MAP) {
                            continue;
                        }
                        apply_config_map_settings(&cm, &log_handle);
                        let del = delete_config_set(&cm);
                        if del != last_delete_config {
                            last_delete_config = del;
                            config::set_disable_sync(del);
                            if del {
                                orch.delete_models(AVI_OBJ_DELETION_TIME).await;
                            } else {
                                orch.publish_status(StatusItem::StatefulSetCondition {
                                    reason: conditions::OBJECT_DELETION_DONE.to_string(),
                                    status: "False".to_string(),
                                });
                                let _ = quick_sync_tx.send(());
                            }
                        }
                    }
                    Some(Ok(watcher::Event::Delete(cm))) => {
                        if cm.meta().name.as_deref() == Some(AVI_CONFIG_MAP) {
                            warn!("avi k8s configmap deleted, shutting down api server");
                            api_server.shutdown();
                            break;
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "ConfigMap watcher error, will retry");
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                    None => {
                        warn!("ConfigMap watcher stream ended");
                        break;
                    }
                }
            }
        }
    }

    // Shutdown: cancel the universal stop signal; each queue drains what
    // it already holds, ingestion through status.
    info!("Draining queues for shutdown");
    stop.cancel();
    for handle in worker_handles.drain(..) {
        let _ = handle.await;
    }
    for handle in watcher_handles.drain(..) {
        handle.abort();
    }
    info!("AKO shut down");
    Ok(())
}

/// Refresh the controller auth token and write it back into the Secret.
async fn refresh_token_into_secret(client: &Client, cfg: &AkoConfig, pool: &Arc<AviClientPool>) {
    let api: Api<Secret> = Api::namespaced(client.clone(), &cfg.ako_namespace);
    let Ok(secret) = api.get(AVI_SECRET).await else {
        warn!("Failed to get avi-secret for token refresh");
        return;
    };
    let current = secret
        .data
        .as_ref()
        .and_then(|d| d.get("authtoken"))
        .map(|v| String::from_utf8_lossy(&v.0).to_string())
        .unwrap_or_default();
    if current.is_empty() {
        return;
    }

    let transport = pool.any();
    let refreshed = retry_with_backoff(
        &RetryConfig::with_max_attempts(5),
        "refresh_auth_token",
        || refresh_auth_token(&*transport, &current),
    )
    .await;
    let new_token = match refreshed {
        Ok(Some(token)) => token,
        Ok(None) => {
            info!("Skipping auth token refresh");
            return;
        }
        Err(e) => {
            error!(error = %e, "Failed to refresh auth token");
            return;
        }
    };

    let patch = serde_json::json!({
        "data": {
            "authtoken": k8s_openapi::ByteString(new_token.into_bytes())
        }
    });
    let result = retry_with_backoff(
        &RetryConfig::with_max_attempts(5),
        "update_avi_secret",
        || async {
            api.patch(
                AVI_SECRET,
                &kube::api::PatchParams::default(),
                &kube::api::Patch::Merge(&patch),
            )
            .await
        },
    )
    .await;
    match result {
        Ok(_) => info!("Successfully updated authtoken"),
        Err(e) => error!(error = %e, "Failed to update avi-secret"),
    }
}
