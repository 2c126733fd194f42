//! HostRule CRD for virtual-host level overrides

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// HostRule attaches Avi VS properties to one FQDN.
///
/// The graph layer looks HostRules up by `spec.virtualhost.fqdn` while
/// building the SNI/EVH child (or dedicated VS) of that host.
///
/// Example:
/// ```yaml
/// apiVersion: ako.vmware.com/v1alpha1
/// kind: HostRule
/// metadata:
///   name: secure-app
///   namespace: red
/// spec:
///   virtualhost:
///     fqdn: secure.example.com
///     enableVirtualHost: true
///     tls:
///       sslKeyCertificate:
///         name: avi-cert
///         type: ref
///       termination: edge
///     wafPolicy: app-waf
/// ```
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "ako.vmware.com",
    version = "v1alpha1",
    kind = "HostRule",
    namespaced,
    status = "HostRuleStatus",
    printcolumn = r#"{"name":"Host","type":"string","jsonPath":".spec.virtualhost.fqdn"}"#,
    printcolumn = r#"{"name":"Status","type":"string","jsonPath":".status.status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct HostRuleSpec {
    /// Overrides for the virtual host
    pub virtualhost: HostRuleVirtualHost,
}

/// Per-host override block
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HostRuleVirtualHost {
    /// FQDN the rule applies to
    pub fqdn: String,

    /// When false, the VS for this host is taken down while keeping its
    /// configuration
    #[serde(default = "super::default_true")]
    pub enable_virtual_host: bool,

    /// TLS overrides (controller-side certificate instead of the Secret)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<HostRuleTls>,

    /// WAF policy attached to the child VS
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub waf_policy: Option<String>,

    /// Application profile override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_profile: Option<String>,

    /// Analytics profile override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analytics_profile: Option<String>,

    /// Error page profile override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_page_profile: Option<String>,

    /// Pre-existing DataScripts to attach, in evaluation order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub datascripts: Vec<String>,

    /// Pre-existing HTTP policy sets to attach
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub http_policy_sets: Vec<String>,
}

/// TLS override of a HostRule
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HostRuleTls {
    /// Reference to an SSLKeyAndCertificate object on the controller
    pub ssl_key_certificate: SslKeyCertificateRef,
    /// edge or reencrypt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub termination: Option<String>,
}

/// Reference to a controller-side certificate
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SslKeyCertificateRef {
    /// Object name on the controller
    pub name: String,
    /// Reference type; only `ref` is supported
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,
}

/// Validation status of a HostRule
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HostRuleStatus {
    /// Accepted or Rejected
    #[serde(default)]
    pub status: String,
    /// Rejection reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
