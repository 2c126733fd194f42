//! Bootstrap configuration and process-wide flags
//!
//! All environment-driven settings are read once at boot into [`AkoConfig`],
//! which is shared read-only (`Arc`) across the pipeline layers. The small
//! set of flags that the ConfigMap can flip at runtime live here as
//! process-wide atomics so callers read them lock-free.

use std::sync::atomic::{AtomicBool, Ordering};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{Error, Result, ADMIN_TENANT, GLOBAL_VRF};

/// How Kubernetes Services expose backends to the Avi service engines
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ServiceType {
    /// Pool members are Endpoints' pod IPs (in-cluster routing via VRF)
    #[default]
    ClusterIp,
    /// Pool members are node IPs with the allocated node port
    NodePort,
    /// Pool members are pod IPs with per-pod NPL-annotated ports
    NodePortLocal,
}

impl ServiceType {
    fn parse(s: &str) -> Result<Self> {
        match s {
            "" | "ClusterIP" => Ok(Self::ClusterIp),
            "NodePort" => Ok(Self::NodePort),
            "NodePortLocal" => Ok(Self::NodePortLocal),
            other => Err(Error::config(format!("unknown SERVICE_TYPE: {other}"))),
        }
    }
}

/// L4 auto-FQDN generation mode (`AUTO_L4_FQDN`)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum L4FqdnFormat {
    /// `<svc>.<ns>.<domain>`
    Default,
    /// `<svc>-<ns>.<domain>`
    Flat,
    /// No FQDN on L4 VSVIPs
    #[default]
    Disabled,
}

/// One entry of `VIP_NETWORK_LIST`
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VipNetwork {
    /// Network to place the VIP on
    pub network_name: String,
    /// Optional CIDR within the network
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cidr: Option<String>,
}

/// One entry of `NODE_NETWORK_LIST`
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NodeNetwork {
    /// Network the nodes sit on
    pub network_name: String,
    /// CIDRs of that network
    #[serde(default)]
    pub cidrs: Vec<String>,
}

/// Maximum number of `NODE_NETWORK_LIST` entries accepted
pub const NODE_NETWORK_MAX_ENTRIES: usize = 16;

/// Resolve a `SHARD_VS_SIZE` / `PASSTHROUGH_SHARD_SIZE` value.
///
/// 0 means dedicated (one VS per hostname, no shared shards).
pub fn shard_size_from_name(name: &str, default: u32) -> u32 {
    match name {
        "LARGE" => 8,
        "MEDIUM" => 4,
        "SMALL" => 1,
        "DEDICATED" => 0,
        _ => default,
    }
}

/// Immutable bootstrap configuration, read from the environment once.
#[derive(Clone, Debug)]
pub struct AkoConfig {
    /// Cluster name, the prefix of every Avi object name
    pub cluster_name: String,
    /// Cluster ID (advanced L4 only)
    pub cluster_id: String,
    /// Avi controller address
    pub controller_ip: String,
    /// Avi cloud to place objects in
    pub cloud_name: String,
    /// Service engine group
    pub se_group_name: String,
    /// Avi tenant owning this cluster's objects
    pub tenant: String,
    /// VRF context for static routes
    pub vrf_name: String,
    /// Backend projection mode
    pub service_type: ServiceType,
    /// Shared L7 shard count (0 = dedicated per-hostname VSes)
    pub shard_vs_size: u32,
    /// Passthrough shard count
    pub passthrough_shard_size: u32,
    /// Periodic full-sync interval in seconds, 0 disables
    pub full_sync_interval: u64,
    /// VIP placement networks
    pub vip_network_list: Vec<VipNetwork>,
    /// Node networks for static-route programming
    pub node_network_list: Vec<NodeNetwork>,
    /// BGP peer labels applied to VSVIPs when RHI is on
    pub bgp_peer_labels: Vec<String>,
    /// NSX-T tier-1 logical router path
    pub nsxt_t1_lr: Option<String>,
    /// L4 auto-FQDN mode
    pub auto_l4_fqdn: L4FqdnFormat,
    /// Enhanced Virtual Hosting for L7
    pub enable_evh: bool,
    /// Advanced L4 (WCP gateway) mode
    pub advanced_l4: bool,
    /// services-api Gateway support
    pub services_api: bool,
    /// Route Health Injection on VSVIPs
    pub enable_rhi: bool,
    /// Namespace filter label `(key, value)`; `None` admits every namespace
    pub namespace_sync_label: Option<(String, String)>,
    /// Disable VRF static-route programming
    pub disable_static_route_sync: bool,
    /// AKO API server port
    pub api_port: u16,
    /// Namespace AKO runs in (ConfigMap/Secret/StatefulSet live here)
    pub ako_namespace: String,
    /// Domain for generated FQDNs
    pub default_domain: Option<String>,
    /// Compatibility switch: when true, Delete events from namespaces that
    /// fail the filter are dropped like the legacy behavior instead of
    /// always being admitted for cleanup
    pub strict_namespace_deletes: bool,
}

impl Default for AkoConfig {
    fn default() -> Self {
        Self {
            cluster_name: String::new(),
            cluster_id: String::new(),
            controller_ip: String::new(),
            cloud_name: "Default-Cloud".to_string(),
            se_group_name: "Default-Group".to_string(),
            tenant: ADMIN_TENANT.to_string(),
            vrf_name: GLOBAL_VRF.to_string(),
            service_type: ServiceType::ClusterIp,
            shard_vs_size: 1,
            passthrough_shard_size: 1,
            full_sync_interval: 300,
            vip_network_list: Vec::new(),
            node_network_list: Vec::new(),
            bgp_peer_labels: Vec::new(),
            nsxt_t1_lr: None,
            auto_l4_fqdn: L4FqdnFormat::Disabled,
            enable_evh: false,
            advanced_l4: false,
            services_api: false,
            enable_rhi: false,
            namespace_sync_label: None,
            disable_static_route_sync: false,
            api_port: 8080,
            ako_namespace: "avi-system".to_string(),
            default_domain: None,
            strict_namespace_deletes: false,
        }
    }
}

fn env_or_default(key: &str) -> String {
    std::env::var(key).unwrap_or_default()
}

fn env_bool(key: &str) -> bool {
    matches!(std::env::var(key).as_deref(), Ok("true") | Ok("1"))
}

fn env_json_list<T: serde::de::DeserializeOwned>(key: &str) -> Result<Vec<T>> {
    match std::env::var(key) {
        Ok(raw) if !raw.is_empty() && raw != "null" => serde_json::from_str(&raw)
            .map_err(|e| Error::config(format!("unable to parse {key}: {e}"))),
        _ => Ok(Vec::new()),
    }
}

impl AkoConfig {
    /// Read the full bootstrap configuration from the environment.
    ///
    /// Invalid values are configuration errors and fatal at boot.
    pub fn from_env() -> Result<Self> {
        let advanced_l4 = env_bool("ADVANCED_L4");
        let service_type = ServiceType::parse(&env_or_default("SERVICE_TYPE"))?;

        let full_sync_interval = match std::env::var("FULL_SYNC_INTERVAL") {
            Ok(raw) if !raw.is_empty() => raw.parse::<u64>().map_err(|_| {
                Error::config("cannot convert FULL_SYNC_INTERVAL to an integer")
            })?,
            // Hardcoded cadence for advanced L4; disabled otherwise.
            _ if advanced_l4 => 300,
            _ => 0,
        };

        let auto_l4_fqdn = if advanced_l4 {
            L4FqdnFormat::Disabled
        } else {
            match env_or_default("AUTO_L4_FQDN").as_str() {
                "default" => L4FqdnFormat::Default,
                "flat" => L4FqdnFormat::Flat,
                _ => L4FqdnFormat::Disabled,
            }
        };

        let node_network_list: Vec<NodeNetwork> = env_json_list("NODE_NETWORK_LIST")?;
        if node_network_list.len() > NODE_NETWORK_MAX_ENTRIES {
            return Err(Error::config(format!(
                "a maximum of {NODE_NETWORK_MAX_ENTRIES} entries are allowed for nodeNetworkList"
            )));
        }

        let namespace_sync_label = {
            let key = env_or_default("NAMESPACE_SYNC_LABEL_KEY");
            let value = env_or_default("NAMESPACE_SYNC_LABEL_VALUE");
            if !key.trim().is_empty() && !value.trim().is_empty() {
                Some((key, value))
            } else {
                None
            }
        };

        let shard_vs_size = if advanced_l4 {
            8
        } else {
            shard_size_from_name(&env_or_default("SHARD_VS_SIZE"), 1)
        };

        let cfg = Self {
            cluster_name: if advanced_l4 {
                // domain-c8:uuid -> domain-c8
                env_or_default("CLUSTER_ID")
                    .split(':')
                    .next()
                    .unwrap_or_default()
                    .to_string()
            } else {
                env_or_default("CLUSTER_NAME")
            },
            cluster_id: env_or_default("CLUSTER_ID"),
            controller_ip: env_or_default("CTRL_IPADDRESS"),
            cloud_name: match std::env::var("CLOUD_NAME") {
                Ok(v) if !v.is_empty() => v,
                _ => "Default-Cloud".to_string(),
            },
            se_group_name: match std::env::var("SEG_NAME") {
                Ok(v) if !v.is_empty() => v,
                _ => "Default-Group".to_string(),
            },
            tenant: match std::env::var("TENANT_NAME") {
                Ok(v) if !v.is_empty() => v,
                _ => ADMIN_TENANT.to_string(),
            },
            vrf_name: GLOBAL_VRF.to_string(),
            service_type,
            shard_vs_size,
            passthrough_shard_size: shard_size_from_name(
                &env_or_default("PASSTHROUGH_SHARD_SIZE"),
                1,
            ),
            full_sync_interval,
            vip_network_list: env_json_list("VIP_NETWORK_LIST")?,
            node_network_list,
            bgp_peer_labels: env_json_list("BGP_PEER_LABELS")?,
            nsxt_t1_lr: std::env::var("NSXT_T1_LR").ok().filter(|s| !s.is_empty()),
            auto_l4_fqdn,
            enable_evh: env_bool("ENABLE_EVH"),
            advanced_l4,
            services_api: env_bool("SERVICES_API"),
            enable_rhi: env_bool("ENABLE_RHI"),
            namespace_sync_label,
            disable_static_route_sync: env_bool("DISABLE_STATIC_ROUTE_SYNC"),
            api_port: match std::env::var("AKO_API_PORT") {
                Ok(raw) if !raw.is_empty() => raw
                    .parse()
                    .map_err(|_| Error::config("AKO_API_PORT is not a port number"))?,
                _ => 8080,
            },
            ako_namespace: match std::env::var("POD_NAMESPACE") {
                Ok(v) if !v.is_empty() => v,
                _ => "avi-system".to_string(),
            },
            default_domain: std::env::var("DEFAULT_DOMAIN").ok().filter(|s| !s.is_empty()),
            strict_namespace_deletes: env_bool("STRICT_NAMESPACE_DELETES"),
        };
        cfg.validate()?;
        Ok(cfg)
    }

    /// Validate settings that must be correct before any sync starts.
    pub fn validate(&self) -> Result<()> {
        if self.cluster_name.is_empty() {
            return Err(Error::config(
                "required param clusterName not specified, syncing will be disabled",
            ));
        }
        if !self
            .cluster_name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(Error::config(
                "clusterName must consist of alphanumeric characters or '-'/'_'",
            ));
        }
        if !self.advanced_l4 && self.vip_network_list.is_empty() {
            return Err(Error::config("vipNetworkList not set"));
        }
        Ok(())
    }

    /// `<clusterName>--`, the prefix of every Avi object name
    pub fn name_prefix(&self) -> String {
        format!("{}--", self.cluster_name)
    }

    /// Graph/REST worker count: the shard size, or 8 when running dedicated
    /// (per-VS) shards.
    pub fn graph_workers(&self) -> u32 {
        if self.shard_vs_size == 0 {
            8
        } else {
            self.shard_vs_size
        }
    }

    /// Whether VRF static-route programming is off for this deployment.
    ///
    /// NodePort and NodePortLocal reach backends without per-pod routes, so
    /// they imply the disable.
    pub fn static_route_sync_disabled(&self) -> bool {
        self.advanced_l4
            || self.disable_static_route_sync
            || self.service_type != ServiceType::ClusterIp
    }

    /// Model name of the VRF context graph
    pub fn vrf_model_name(&self) -> String {
        crate::model_name(&self.tenant, &self.vrf_name)
    }
}

/// Serialises unit tests that read or flip the process-wide flags.
#[cfg(test)]
pub(crate) static TEST_FLAG_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

// Runtime flags, flipped by the ConfigMap observer and read lock-free by the
// ingestion handlers and graph builders.
static DISABLE_SYNC: AtomicBool = AtomicBool::new(true);
static LAYER7_ONLY: AtomicBool = AtomicBool::new(false);
static NO_PG_FOR_SNI: AtomicBool = AtomicBool::new(false);
static GRBAC: AtomicBool = AtomicBool::new(false);

/// Gate every ingestion handler. While set, watch events are dropped.
pub fn set_disable_sync(state: bool) {
    DISABLE_SYNC.store(state, Ordering::SeqCst);
    info!(state, "Setting disable sync");
}

/// Whether ingestion is currently gated off
pub fn disable_sync() -> bool {
    DISABLE_SYNC.load(Ordering::SeqCst)
}

/// Restrict AKO to L7 objects only (ConfigMap `layer7Only`, boot-time)
pub fn set_layer7_only(val: &str) {
    if let Ok(b) = val.parse::<bool>() {
        LAYER7_ONLY.store(b, Ordering::SeqCst);
    }
    info!(value = layer7_only(), "Setting the layer7Only flag");
}

/// Whether L4 LoadBalancer Services are ignored
pub fn layer7_only() -> bool {
    LAYER7_ONLY.load(Ordering::SeqCst)
}

/// Skip PoolGroup creation for SNI children (ConfigMap `noPGForSNI`)
pub fn set_no_pg_for_sni(val: &str) {
    if let Ok(b) = val.parse::<bool>() {
        NO_PG_FOR_SNI.store(b, Ordering::SeqCst);
    }
    info!(value = no_pg_for_sni(), "Setting the noPGForSNI flag");
}

/// Whether SNI children point pools directly from HTTP policies
pub fn no_pg_for_sni() -> bool {
    NO_PG_FOR_SNI.load(Ordering::SeqCst)
}

/// Granular RBAC object-marker support (ConfigMap `primaryInstance`-era flag)
pub fn set_grbac(val: &str) {
    if let Ok(b) = val.parse::<bool>() {
        GRBAC.store(b, Ordering::SeqCst);
    }
    info!(value = grbac(), "Setting the GRBAC flag");
}

/// Whether object markers are attached for granular RBAC
pub fn grbac() -> bool {
    GRBAC.load(Ordering::SeqCst)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> AkoConfig {
        AkoConfig {
            cluster_name: "c1".to_string(),
            vip_network_list: vec![VipNetwork {
                network_name: "vip-net".to_string(),
                cidr: Some("10.10.10.0/24".to_string()),
            }],
            ..Default::default()
        }
    }

    #[test]
    fn shard_sizes_resolve() {
        assert_eq!(shard_size_from_name("LARGE", 1), 8);
        assert_eq!(shard_size_from_name("MEDIUM", 1), 4);
        assert_eq!(shard_size_from_name("SMALL", 1), 1);
        assert_eq!(shard_size_from_name("DEDICATED", 1), 0);
        assert_eq!(shard_size_from_name("bogus", 1), 1);
    }

    #[test]
    fn dedicated_sharding_still_gets_graph_workers() {
        let cfg = AkoConfig {
            shard_vs_size: 0,
            ..valid_config()
        };
        assert_eq!(cfg.graph_workers(), 8);
    }

    #[test]
    fn cluster_name_is_validated() {
        let mut cfg = valid_config();
        cfg.cluster_name = "my cluster!".to_string();
        assert!(cfg.validate().is_err());

        cfg.cluster_name = String::new();
        assert!(cfg.validate().is_err());

        cfg.cluster_name = "prod_site-1".to_string();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn missing_vip_network_is_fatal_outside_advanced_l4() {
        let mut cfg = valid_config();
        cfg.vip_network_list.clear();
        assert!(cfg.validate().is_err());

        cfg.advanced_l4 = true;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn nodeport_disables_static_routes() {
        let cfg = AkoConfig {
            service_type: ServiceType::NodePort,
            ..valid_config()
        };
        assert!(cfg.static_route_sync_disabled());
    }

    #[test]
    fn vip_network_list_parses_from_json() {
        let parsed: Vec<VipNetwork> = serde_json::from_str(
            r#"[{"networkName":"net1","cidr":"100.64.0.0/16"},{"networkName":"net2"}]"#,
        )
        .unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].network_name, "net1");
        assert!(parsed[1].cidr.is_none());
    }

    #[test]
    fn vrf_model_name_uses_tenant() {
        let cfg = valid_config();
        assert_eq!(cfg.vrf_model_name(), "admin/global");
    }
}
