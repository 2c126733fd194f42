//! AviInfraSetting CRD for infra-scoped object placement

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::config::{NodeNetwork, VipNetwork};

/// AviInfraSetting scopes generated objects to a service-engine group and
/// set of networks.
///
/// Cluster-scoped; attached to Services/Ingresses/Routes via the
/// `aviinfrasetting.ako.vmware.com/name` annotation or to IngressClasses
/// via `spec.parameters`. The setting's name becomes a token in every
/// object name it scopes, giving infra-disjoint shard VSes.
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "ako.vmware.com",
    version = "v1alpha1",
    kind = "AviInfraSetting",
    status = "AviInfraSettingStatus",
    printcolumn = r#"{"name":"Status","type":"string","jsonPath":".status.status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AviInfraSettingSpec {
    /// Service engine group placement
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub se_group: Option<InfraSeGroup>,

    /// Network placement overrides
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<InfraNetworkSettings>,

    /// L7 sharding overrides
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub l7_settings: Option<InfraL7Settings>,
}

/// SE group selection
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InfraSeGroup {
    /// SE group name on the controller
    pub name: String,
}

/// Network overrides of an AviInfraSetting
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InfraNetworkSettings {
    /// VIP networks replacing the global `VIP_NETWORK_LIST`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vip_networks: Vec<VipNetwork>,

    /// Node networks for static-route scoping
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub node_networks: Vec<NodeNetwork>,

    /// Enable Route Health Injection on scoped VSVIPs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_rhi: Option<bool>,

    /// BGP peer labels for scoped VSVIPs
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bgp_peer_labels: Vec<String>,
}

/// L7 sharding override
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InfraL7Settings {
    /// LARGE | MEDIUM | SMALL | DEDICATED
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shard_size: Option<String>,
}

/// Validation status of an AviInfraSetting
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AviInfraSettingStatus {
    /// Accepted or Rejected
    #[serde(default)]
    pub status: String,
    /// Rejection reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AviInfraSetting {
    /// Shard size this setting pins, when valid.
    pub fn shard_size(&self) -> Option<u32> {
        let name = self.spec.l7_settings.as_ref()?.shard_size.as_deref()?;
        match name {
            "LARGE" => Some(8),
            "MEDIUM" => Some(4),
            "SMALL" => Some(1),
            "DEDICATED" => Some(0),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infra_setting_yaml_parses() {
        let json = serde_json::json!({
            "apiVersion": "ako.vmware.com/v1alpha1",
            "kind": "AviInfraSetting",
            "metadata": { "name": "infra-1" },
            "spec": {
                "seGroup": { "name": "se-group-a" },
                "network": {
                    "vipNetworks": [{ "networkName": "vip-a", "cidr": "10.1.0.0/24" }],
                    "enableRhi": true,
                    "bgpPeerLabels": ["peer-a"]
                },
                "l7Settings": { "shardSize": "MEDIUM" }
            }
        });
        let setting: AviInfraSetting = serde_json::from_value(json).unwrap();
        assert_eq!(setting.spec.se_group.as_ref().unwrap().name, "se-group-a");
        assert_eq!(setting.shard_size(), Some(4));
        assert_eq!(
            setting.spec.network.as_ref().unwrap().vip_networks[0].network_name,
            "vip-a"
        );
    }

    #[test]
    fn bogus_shard_size_is_rejected() {
        let json = serde_json::json!({
            "apiVersion": "ako.vmware.com/v1alpha1",
            "kind": "AviInfraSetting",
            "metadata": { "name": "infra-1" },
            "spec": { "l7Settings": { "shardSize": "HUGE" } }
        });
        let setting: AviInfraSetting = serde_json::from_value(json).unwrap();
        assert_eq!(setting.shard_size(), None);
    }
}
