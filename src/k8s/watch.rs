//! Watch wiring: kube watcher streams feeding the ingestion layer
//!
//! Informer mechanics (list+watch, resumption, backoff) come from
//! `kube::runtime::watcher`; this module only maps stream events onto the
//! ingestion handlers, which own the snapshot store and the add/update
//! distinction.

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::core::v1::{Endpoints, Namespace, Node, Pod, Secret, Service};
use k8s_openapi::api::networking::v1::{Ingress, IngressClass};
use kube::api::Api;
use kube::runtime::watcher;
use kube::runtime::watcher::Event;
use kube::Client;
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{AkoConfig, ServiceType};
use crate::crd::{AviInfraSetting, HTTPRule, HostRule};
use crate::ingestion::IngestionLayer;
use crate::k8s::{Gateway, GatewayClass, Route};

/// Applied/deleted notification passed to the ingestion layer.
pub enum WatchedEvent<K> {
    /// Object created or updated (the handler diffs against its store)
    Applied(K),
    /// Object deleted; carries the final state
    Deleted(K),
}

fn spawn_watch<K, F>(
    api: Api<K>,
    kind: &'static str,
    stop: CancellationToken,
    handle: F,
) -> JoinHandle<()>
where
    K: kube::Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    F: Fn(WatchedEvent<K>) + Send + Sync + 'static,
{
    tokio::spawn(async move {
        let stream = watcher::watcher(api, watcher::Config::default());
        let mut stream = std::pin::pin!(stream);
        loop {
            tokio::select! {
                _ = stop.cancelled() => {
                    debug!(kind, "Watcher stopped");
                    return;
                }
                event = stream.next() => {
                    match event {
                        Some(Ok(Event::Apply(obj))) | Some(Ok(Event::InitApply(obj))) => {
                            handle(WatchedEvent::Applied(obj));
                        }
                        Some(Ok(Event::Delete(obj))) => {
                            handle(WatchedEvent::Deleted(obj));
                        }
                        Some(Ok(Event::Init)) | Some(Ok(Event::InitDone)) => {
                            debug!(kind, "Watcher (re)initialized");
                        }
                        Some(Err(e)) => {
                            warn!(kind, error = %e, "Watcher error, will retry");
                            tokio::time::sleep(Duration::from_secs(5)).await;
                        }
                        None => {
                            warn!(kind, "Watcher stream ended");
                            return;
                        }
                    }
                }
            }
        }
    })
}

/// Start every watcher the deployment mode calls for.
///
/// `openshift` selects Routes over Ingresses (probed by the lifecycle at
/// boot the way the original operator does). Returns the watcher task
/// handles; they exit when `stop` is cancelled.
pub fn run_watchers(
    client: Client,
    ingestion: Arc<IngestionLayer>,
    cfg: &AkoConfig,
    openshift: bool,
    stop: CancellationToken,
) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::new();

    let ing = Arc::clone(&ingestion);
    handles.push(spawn_watch(
        Api::<Service>::all(client.clone()),
        "Service",
        stop.clone(),
        move |ev| ing.service_event(ev),
    ));

    let ing = Arc::clone(&ingestion);
    handles.push(spawn_watch(
        Api::<Endpoints>::all(client.clone()),
        "Endpoints",
        stop.clone(),
        move |ev| ing.endpoints_event(ev),
    ));

    let ing = Arc::clone(&ingestion);
    handles.push(spawn_watch(
        Api::<Secret>::all(client.clone()),
        "Secret",
        stop.clone(),
        move |ev| ing.secret_event(ev),
    ));

    if cfg.service_type == ServiceType::NodePortLocal {
        let ing = Arc::clone(&ingestion);
        handles.push(spawn_watch(
            Api::<Pod>::all(client.clone()),
            "Pod",
            stop.clone(),
            move |ev| ing.pod_event(ev),
        ));
    }

    if cfg.advanced_l4 || cfg.services_api {
        let ing = Arc::clone(&ingestion);
        handles.push(spawn_watch(
            Api::<Gateway>::all(client.clone()),
            "Gateway",
            stop.clone(),
            move |ev| ing.gateway_event(ev),
        ));
        let ing = Arc::clone(&ingestion);
        handles.push(spawn_watch(
            Api::<GatewayClass>::all(client.clone()),
            "GatewayClass",
            stop.clone(),
            move |ev| ing.gateway_class_event(ev),
        ));
    }

    if cfg.advanced_l4 {
        // Advanced L4 provides gateway-driven L4 only; no L7 informers.
        info!("Advanced L4 mode: L7 and CRD watchers disabled");
        return handles;
    }

    if !cfg.static_route_sync_disabled() {
        let ing = Arc::clone(&ingestion);
        handles.push(spawn_watch(
            Api::<Node>::all(client.clone()),
            "Node",
            stop.clone(),
            move |ev| ing.node_event(ev),
        ));
    } else {
        info!("Static route sync disabled, skipping node watcher");
    }

    if openshift {
        let ing = Arc::clone(&ingestion);
        handles.push(spawn_watch(
            Api::<Route>::all(client.clone()),
            "Route",
            stop.clone(),
            move |ev| ing.route_event(ev),
        ));
    } else {
        let ing = Arc::clone(&ingestion);
        handles.push(spawn_watch(
            Api::<Ingress>::all(client.clone()),
            "Ingress",
            stop.clone(),
            move |ev| ing.ingress_event(ev),
        ));
        let ing = Arc::clone(&ingestion);
        handles.push(spawn_watch(
            Api::<IngressClass>::all(client.clone()),
            "IngressClass",
            stop.clone(),
            move |ev| ing.ingress_class_event(ev),
        ));
    }

    let ing = Arc::clone(&ingestion);
    handles.push(spawn_watch(
        Api::<Namespace>::all(client.clone()),
        "Namespace",
        stop.clone(),
        move |ev| ing.namespace_event(ev),
    ));

    let ing = Arc::clone(&ingestion);
    handles.push(spawn_watch(
        Api::<HostRule>::all(client.clone()),
        "HostRule",
        stop.clone(),
        move |ev| ing.host_rule_event(ev),
    ));

    let ing = Arc::clone(&ingestion);
    handles.push(spawn_watch(
        Api::<HTTPRule>::all(client.clone()),
        "HTTPRule",
        stop.clone(),
        move |ev| ing.http_rule_event(ev),
    ));

    let ing = Arc::clone(&ingestion);
    handles.push(spawn_watch(
        Api::<AviInfraSetting>::all(client),
        "AviInfraSetting",
        stop.clone(),
        move |ev| ing.infra_setting_event(ev),
    ));

    handles
}
