//! Status layer: coalesced writes back to Kubernetes
//!
//! Items ride the status queue as JSON-encoded [`StatusItem`]s; the queue's
//! pending-key dedup coalesces bursts so one object gets at most one PATCH
//! per drain. Status writes never block reconciliation: every failure here
//! is logged and dropped.

use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::AkoConfig;
use crate::k8s::{parse_key, Gateway, ObjectKind, Route};
use crate::queue::QueueHandler;

/// StatefulSet condition values carrying delete-sync progress.
pub mod conditions {
    /// Teardown started
    pub const OBJECT_DELETION_START: &str = "ObjectDeletionStart";
    /// Teardown finished
    pub const OBJECT_DELETION_DONE: &str = "ObjectDeletionDone";
    /// Teardown hit the deadline
    pub const OBJECT_DELETION_TIMEOUT: &str = "ObjectDeletionTimeout";
}

/// A validation finding to surface on a Kubernetes object.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct ObjectStatusError {
    /// `<kind>/<namespace>/<name>` of the offending object
    pub key: String,
    /// Human-readable reason
    pub message: String,
}

/// One unit of status work.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub enum StatusItem {
    /// Post a warning event on an object and skip it
    ObjectError(ObjectStatusError),
    /// Propagate a published VIP to the objects a VS was built from
    VsStatus {
        /// Origin object keys (`Ingress/ns/name`, `L4LBService/ns/name`, ...)
        origins: Vec<String>,
        /// Published VIP, empty when the controller has not allocated yet
        vip: String,
        /// Hostnames served
        hosts: Vec<String>,
    },
    /// Clear status on the objects a deleted VS was built from
    VsStatusClear {
        /// Origin object keys
        origins: Vec<String>,
    },
    /// Overall-health condition on the controller StatefulSet
    StatefulSetCondition {
        /// One of [`conditions`]
        reason: String,
        /// True/False/Unknown
        status: String,
    },
}

impl StatusItem {
    /// Serialize for the queue.
    pub fn encode(&self) -> crate::Result<String> {
        serde_json::to_string(self).map_err(|e| crate::Error::serialization(e.to_string()))
    }

    /// Deserialize from the queue payload.
    pub fn decode(payload: &str) -> crate::Result<Self> {
        serde_json::from_str(payload).map_err(|e| crate::Error::serialization(e.to_string()))
    }
}

/// The status layer worker.
///
/// Built without a client in tests: items are then logged and counted but
/// no API call is made.
pub struct StatusLayer {
    cfg: Arc<AkoConfig>,
    client: Option<Client>,
    reporter: Option<Reporter>,
}

impl StatusLayer {
    /// Wire the layer up against a live cluster.
    pub fn new(cfg: Arc<AkoConfig>, client: Client) -> Arc<Self> {
        let reporter = Reporter {
            controller: "ako".to_string(),
            instance: None,
        };
        Arc::new(Self {
            cfg,
            reporter: Some(reporter),
            client: Some(client),
        })
    }

    /// Offline layer for tests.
    pub fn disconnected(cfg: Arc<AkoConfig>) -> Arc<Self> {
        Arc::new(Self {
            cfg,
            client: None,
            reporter: None,
        })
    }

    /// Dispatch one decoded item.
    pub async fn dequeue_status(&self, item: StatusItem) {
        match item {
            StatusItem::ObjectError(err) => self.post_object_event(err).await,
            StatusItem::VsStatus { origins, vip, hosts } => {
                for origin in origins {
                    self.update_origin_status(&origin, Some(&vip), &hosts).await;
                }
            }
            StatusItem::VsStatusClear { origins } => {
                for origin in origins {
                    self.update_origin_status(&origin, None, &[]).await;
                }
            }
            StatusItem::StatefulSetCondition { reason, status } => {
                self.update_statefulset_condition(&reason, &status).await;
            }
        }
    }

    async fn post_object_event(&self, err: ObjectStatusError) {
        warn!(key = %err.key, message = %err.message, "Object validation error");
        let Some(client) = &self.client else { return };
        let Some(reporter) = &self.reporter else { return };
        let Some((kind, namespace, name)) = parse_key(&err.key) else { return };
        let mut obj_ref = k8s_openapi::api::core::v1::ObjectReference {
            kind: Some(kind.to_string()),
            namespace: Some(namespace.to_string()),
            name: Some(name.to_string()),
            ..Default::default()
        };
        if kind == ObjectKind::L4LBService {
            obj_ref.kind = Some("Service".to_string());
        }
        let event = Event {
            type_: EventType::Warning,
            reason: "ValidationFailed".to_string(),
            note: Some(err.message),
            action: "Sync".to_string(),
            secondary: None,
        };
        let recorder = Recorder::new(client.clone(), reporter.clone(), obj_ref);
        if let Err(e) = recorder.publish(event).await {
            warn!(error = %e, "Failed to publish Kubernetes event");
        }
    }

    async fn update_origin_status(&self, origin: &str, vip: Option<&str>, hosts: &[String]) {
        let Some((kind, namespace, name)) = parse_key(origin) else {
            warn!(origin, "Unparseable status origin, dropped");
            return;
        };
        debug!(origin, ?vip, "Status update");
        let Some(client) = &self.client else { return };

        let result = match kind {
            ObjectKind::Ingress => {
                let api: Api<Ingress> = Api::namespaced(client.clone(), namespace);
                let body = match vip {
                    Some(vip) if !vip.is_empty() => serde_json::json!({
                        "status": { "loadBalancer": { "ingress": [ { "ip": vip } ] } }
                    }),
                    _ => serde_json::json!({
                        "status": { "loadBalancer": { "ingress": [] } }
                    }),
                };
                api.patch_status(name, &PatchParams::default(), &Patch::Merge(&body))
                    .await
                    .map(|_| ())
            }
            ObjectKind::Route => {
                let api: Api<Route> = Api::namespaced(client.clone(), namespace);
                let ingress_status: Vec<serde_json::Value> = match vip {
                    Some(vip) if !vip.is_empty() => hosts
                        .iter()
                        .map(|host| {
                            serde_json::json!({
                                "host": host,
                                "routerName": "ako",
                                "conditions": [
                                    { "type": "Admitted", "status": "True" }
                                ]
                            })
                        })
                        .collect(),
                    _ => Vec::new(),
                };
                let body = serde_json::json!({ "status": { "ingress": ingress_status } });
                api.patch_status(name, &PatchParams::default(), &Patch::Merge(&body))
                    .await
                    .map(|_| ())
            }
            ObjectKind::L4LBService => {
                let api: Api<Service> = Api::namespaced(client.clone(), namespace);
                let body = match vip {
                    Some(vip) if !vip.is_empty() => serde_json::json!({
                        "status": { "loadBalancer": { "ingress": [ { "ip": vip } ] } }
                    }),
                    _ => serde_json::json!({
                        "status": { "loadBalancer": { "ingress": [] } }
                    }),
                };
                api.patch_status(name, &PatchParams::default(), &Patch::Merge(&body))
                    .await
                    .map(|_| ())
            }
            ObjectKind::Gateway => {
                let api: Api<Gateway> = Api::namespaced(client.clone(), namespace);
                let (addresses, ready) = match vip {
                    Some(vip) if !vip.is_empty() => (
                        vec![serde_json::json!({ "type": "IPAddress", "value": vip })],
                        "True",
                    ),
                    _ => (Vec::new(), "False"),
                };
                let body = serde_json::json!({
                    "status": {
                        "addresses": addresses,
                        "conditions": [ { "type": "Ready", "status": ready } ]
                    }
                });
                api.patch_status(name, &PatchParams::default(), &Patch::Merge(&body))
                    .await
                    .map(|_| ())
            }
            other => {
                debug!(kind = %other, "No status writer for kind");
                Ok(())
            }
        };

        if let Err(e) = result {
            warn!(origin, error = %e, "Status update failed, dropped");
        }
    }

    async fn update_statefulset_condition(&self, reason: &str, status: &str) {
        info!(reason, status, "StatefulSet condition update");
        let Some(client) = &self.client else { return };
        let api: Api<StatefulSet> = Api::namespaced(client.clone(), &self.cfg.ako_namespace);
        let body = serde_json::json!({
            "status": {
                "conditions": [
                    { "type": "AkoState", "reason": reason, "status": status }
                ]
            }
        });
        if let Err(e) = api
            .patch_status("ako", &PatchParams::default(), &Patch::Merge(&body))
            .await
        {
            warn!(error = %e, "StatefulSet condition update failed, dropped");
        }
    }

    /// Remove the NodePortLocal annotation from a Service after the
    /// delete cycle (NPL mode cleanup).
    pub async fn delete_npl_annotation(&self, namespace: &str, name: &str) {
        let Some(client) = &self.client else { return };
        let api: Api<Service> = Api::namespaced(client.clone(), namespace);
        let body = serde_json::json!({
            "metadata": { "annotations": { crate::NPL_ANNOTATION: null } }
        });
        if let Err(e) = api
            .patch(name, &PatchParams::default(), &Patch::Merge(&body))
            .await
        {
            warn!(namespace, name, error = %e, "NPL annotation removal failed");
        }
    }
}

#[async_trait]
impl QueueHandler for StatusLayer {
    async fn sync(&self, payload: String) -> crate::Result<()> {
        match StatusItem::decode(&payload) {
            Ok(item) => {
                self.dequeue_status(item).await;
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Undecodable status payload, dropped");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VipNetwork;

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

    #[test]
    fn status_items_round_trip_through_the_queue_payload() {
        let item = StatusItem::VsStatus {
            origins: vec!["Ingress/red/web".to_string()],
            vip: "10.10.10.5".to_string(),
            hosts: vec!["web.x".to_string()],
        };
        let encoded = item.encode().unwrap();
        assert_eq!(StatusItem::decode(&encoded).unwrap(), item);
    }

    #[test]
    fn corrupt_payloads_decode_to_errors_not_panics() {
        assert!(StatusItem::decode("not json").is_err());
        assert!(StatusItem::decode("{\"Unknown\":{}}").is_err());
    }

    #[tokio::test]
    async fn disconnected_layer_swallows_everything() {
        let layer = StatusLayer::disconnected(test_config());
        layer
            .dequeue_status(StatusItem::ObjectError(ObjectStatusError {
                key: "Route/red/web".to_string(),
                message: "duplicate backends".to_string(),
            }))
            .await;
        layer
            .dequeue_status(StatusItem::StatefulSetCondition {
                reason: conditions::OBJECT_DELETION_START.to_string(),
                status: "True".to_string(),
            })
            .await;
        // Undecodable payloads come back Ok so the queue never retries them.
        assert!(layer.sync("garbage".to_string()).await.is_ok());
    }
}
