//! services-api Gateway and GatewayClass types
//!
//! AKO supports the `networking.x-k8s.io` Gateway flavours (both the
//! advanced-L4 and services-api deployments) for L4 load balancing: each
//! Gateway maps to one L4 VS whose listeners select Services by label.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A Gateway requests a load-balancer endpoint for a set of listeners.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "networking.x-k8s.io",
    version = "v1alpha1",
    kind = "Gateway",
    namespaced,
    status = "GatewayStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct GatewaySpec {
    /// Name of the GatewayClass this gateway belongs to
    pub gateway_class_name: String,

    /// Listeners exposed by this gateway
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub listeners: Vec<Listener>,

    /// Requested addresses for the gateway
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub addresses: Vec<GatewayAddress>,
}

/// One port/protocol a gateway listens on
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Listener {
    /// Listener port
    pub port: i32,
    /// TCP or UDP
    #[serde(default)]
    pub protocol: String,
    /// Route selection for this listener
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routes: Option<ListenerRoutes>,
}

/// Route selection of a listener; AKO matches Services by these labels
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ListenerRoutes {
    /// Label selector for backend Services
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<LabelSelector>,
}

/// Minimal matchLabels selector
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelector {
    /// Exact-match labels
    #[serde(default, skip_serializing_if = "std::collections::BTreeMap::is_empty")]
    pub match_labels: std::collections::BTreeMap<String, String>,
}

/// A requested or assigned gateway address
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GatewayAddress {
    /// Address type, `IPAddress` for AKO
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,
    /// The address value
    pub value: String,
}

/// Gateway status written by the controller
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GatewayStatus {
    /// Assigned VIP addresses
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub addresses: Vec<GatewayAddress>,
    /// Readiness conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<GatewayCondition>,
}

/// One status condition of a gateway
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GatewayCondition {
    /// Condition type (`Ready`, `Scheduled`, ...)
    #[serde(rename = "type")]
    pub type_: String,
    /// True/False/Unknown
    pub status: String,
    /// Machine-readable reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Human-readable message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// A GatewayClass names the controller responsible for its Gateways.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "networking.x-k8s.io",
    version = "v1alpha1",
    kind = "GatewayClass",
    status = "GatewayClassStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct GatewayClassSpec {
    /// Controller string; AKO owns classes naming its controller
    pub controller: String,
    /// Optional parameters reference (AviInfraSetting)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters_ref: Option<ParametersRef>,
}

/// Reference from a GatewayClass to its parameters object
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ParametersRef {
    /// API group of the referent
    pub group: String,
    /// Kind of the referent
    pub kind: String,
    /// Name of the referent
    pub name: String,
}

/// GatewayClass status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GatewayClassStatus {
    /// Acceptance conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<GatewayCondition>,
}

/// Controller string AKO claims on GatewayClasses
pub const AVI_GATEWAY_CONTROLLER: &str = "ako.vmware.com/avi-lb";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_with_listeners_parses() {
        let json = serde_json::json!({
            "apiVersion": "networking.x-k8s.io/v1alpha1",
            "kind": "Gateway",
            "metadata": { "name": "gw", "namespace": "red" },
            "spec": {
                "gatewayClassName": "avi-lb",
                "listeners": [
                    {
                        "port": 80,
                        "protocol": "TCP",
                        "routes": { "selector": { "matchLabels": { "ako.vmware.com/gateway-name": "gw" } } }
                    }
                ]
            }
        });
        let gw: Gateway = serde_json::from_value(json).unwrap();
        assert_eq!(gw.spec.listeners.len(), 1);
        assert_eq!(gw.spec.listeners[0].port, 80);
        assert!(gw.spec.listeners[0]
            .routes
            .as_ref()
            .unwrap()
            .selector
            .as_ref()
            .unwrap()
            .match_labels
            .contains_key("ako.vmware.com/gateway-name"));
    }
}
