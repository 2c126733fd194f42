//! HTTPRule CRD for pool-level overrides

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// HTTPRule tunes the Pools generated for one FQDN's paths.
///
/// The graph layer matches `spec.fqdn` plus the longest matching
/// `paths[].target` prefix while building pool nodes.
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "ako.vmware.com",
    version = "v1alpha1",
    kind = "HTTPRule",
    namespaced,
    status = "HTTPRuleStatus",
    printcolumn = r#"{"name":"Host","type":"string","jsonPath":".spec.fqdn"}"#,
    printcolumn = r#"{"name":"Status","type":"string","jsonPath":".status.status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct HTTPRuleSpec {
    /// FQDN whose pools are tuned
    pub fqdn: String,

    /// Per-path overrides
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub paths: Vec<HTTPRulePath>,
}

/// Overrides for one path prefix
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HTTPRulePath {
    /// Path prefix this entry applies to
    pub target: String,

    /// Health monitors attached to the pool
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub health_monitors: Vec<String>,

    /// Load-balancing algorithm settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_balancer_policy: Option<LoadBalancerPolicy>,

    /// Backend TLS settings for re-encrypt pools
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<HTTPRuleTls>,
}

/// Pool load-balancing algorithm
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancerPolicy {
    /// Avi LB algorithm name (e.g. LB_ALGORITHM_CONSISTENT_HASH)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub algorithm: Option<String>,
    /// Hash key when the algorithm is consistent-hash
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    /// Host header for host-header based hashing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_header: Option<String>,
}

/// Backend TLS of a pool
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HTTPRuleTls {
    /// Only `reencrypt` is supported
    #[serde(rename = "type")]
    pub type_: String,
    /// SSL profile for the backend connection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssl_profile: Option<String>,
    /// PEM CA to verify the backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_ca: Option<String>,
}

/// Validation status of an HTTPRule
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HTTPRuleStatus {
    /// Accepted or Rejected
    #[serde(default)]
    pub status: String,
    /// Rejection reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
