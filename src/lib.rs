//! AKO - Avi Kubernetes Operator
//!
//! AKO watches Kubernetes networking state (Ingresses, OpenShift Routes,
//! LoadBalancer Services, Endpoints, Secrets, Nodes, Gateways and the AKO
//! CRDs) and reconciles it onto an Avi controller as Virtual Services,
//! Pools, Pool Groups, VSVIPs, policies, certificates and VRF static routes.
//!
//! # Architecture
//!
//! The core is a staged pipeline of bucketed work queues:
//!
//! - [`ingestion`] - informer callbacks become `<kind>/<namespace>/<name>`
//!   keys, sharded by namespace so per-namespace ordering holds
//! - [`graph`] - keys are joined against the cluster snapshot and turned
//!   into a desired object graph per model (`tenant/vsName`)
//! - [`rest`] - changed models are diffed against the [`cache`] mirror of
//!   the Avi controller and applied with the minimal set of REST calls
//! - [`retry`] - failed models re-enter the REST layer on a fast (bounded)
//!   or slow (ticked) path
//! - [`status`] - coalesced status writes back to Kubernetes
//!
//! [`lifecycle`] owns the boot sequence, the ConfigMap observer and the
//! full-sync / delete-sync cycles.

#![deny(missing_docs)]

pub mod api_server;
pub mod avi;
pub mod cache;
pub mod config;
pub mod crd;
pub mod error;
pub mod graph;
pub mod ingestion;
pub mod k8s;
pub mod lifecycle;
pub mod names;
pub mod queue;
pub mod rest;
pub mod retry;
pub mod status;
pub mod telemetry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Name of the AKO ConfigMap that gates sync and carries runtime settings
pub const AVI_CONFIG_MAP: &str = "avi-k8s-config";

/// Name of the Secret holding Avi controller credentials
pub const AVI_SECRET: &str = "avi-secret";

/// Maximum length the Avi controller accepts for an object name.
///
/// Longer names are logged and still emitted; the controller enforces the
/// final limit.
pub const AVI_OBJ_NAME_MAX_LENGTH: usize = 255;

/// Synthetic VS name materialised and deleted on boot to clear objects a
/// crashed previous run may have left behind
pub const DUMMY_VS_FOR_STALE_DATA: &str = "DummyVSForStaleData";

/// Default tenant when `TENANT_NAME` is unset
pub const ADMIN_TENANT: &str = "admin";

/// Default VRF context name
pub const GLOBAL_VRF: &str = "global";

/// IngressClass controller string owned by AKO
pub const AVI_INGRESS_CONTROLLER: &str = "ako.vmware.com/avi-lb";

/// Annotation marking an IngressClass as the cluster default
pub const DEFAULT_INGRESS_CLASS_ANNOTATION: &str =
    "ingressclass.kubernetes.io/is-default-class";

/// Annotation selecting an AviInfraSetting for a Service, Route or Ingress
pub const INFRA_SETTING_NAME_ANNOTATION: &str = "aviinfrasetting.ako.vmware.com/name";

/// Annotation marking an Ingress host for passthrough TLS
pub const PASSTHROUGH_ANNOTATION: &str = "passthrough.ako.vmware.com/enabled";

/// Annotation carrying NodePortLocal port mappings on Pods
pub const NPL_ANNOTATION: &str = "nodeportlocal.antrea.io";

/// How many times a model is retried on the fast path before being demoted
/// to the slow-retry queue
pub const FAST_RETRY_LIMIT: u32 = 5;

/// Tick period of the slow-retry queue drain
pub const SLOW_SYNC_TIME: std::time::Duration = std::time::Duration::from_secs(1);

/// Upper bound on the delete-sync cycle before status turns to timeout
pub const AVI_OBJ_DELETION_TIME: std::time::Duration =
    std::time::Duration::from_secs(30 * 60);

/// How long full sync waits for the VRF static-route publication signal
pub const STATIC_ROUTE_SYNC_TIMEOUT: std::time::Duration =
    std::time::Duration::from_secs(20);

/// Queue names, used in logs and worker labels.
pub mod queue_names {
    /// Object ingestion layer (kind/namespace/name keys)
    pub const INGESTION: &str = "ingestion";
    /// Graph layer output, drained by the REST layer (model names)
    pub const GRAPH: &str = "graph";
    /// Immediate bounded retry of failed models
    pub const FAST_RETRY: &str = "fast-retry";
    /// Ticked retry of failed models
    pub const SLOW_RETRY: &str = "slow-retry";
    /// Status writes back to Kubernetes
    pub const STATUS: &str = "status";
}

/// Compute the model name for a virtual service.
///
/// Every desired Avi object belongs to exactly one model; this is the unit
/// of reconciliation throughout the pipeline.
pub fn model_name(tenant: &str, vs_name: &str) -> String {
    format!("{tenant}/{vs_name}")
}
