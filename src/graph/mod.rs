//! Desired object graphs
//!
//! A graph is the desired set of Avi objects for one model: a rooted tree
//! whose root is a virtual service (L4, shared L7, passthrough or
//! dedicated, with SNI/EVH children) or a VRF context. Nodes carry stable
//! names and 32-bit content checksums; all node lists are sorted by name
//! before checksumming so the same cluster snapshot always produces the
//! same graph bit-for-bit.

pub mod l4;
pub mod l7;
pub mod layer;
pub mod lister;
pub mod vrf;

use std::sync::atomic::{AtomicU32, Ordering};

use serde::Serialize;

use crate::config::VipNetwork;
use crate::names::fnv_hash32;

fn json_checksum<T: Serialize>(value: &T) -> u32 {
    // serde_json object keys come out in struct-field order, which is
    // stable for a given build; lists are sorted by the callers.
    fnv_hash32(&serde_json::to_string(value).unwrap_or_default())
}

/// One backend member of a pool
#[derive(Clone, Debug, Serialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct PoolMember {
    /// Member address
    pub ip: String,
    /// Member port
    pub port: i32,
}

/// Desired Pool
#[derive(Clone, Debug, Default, Serialize)]
pub struct PoolNode {
    /// Object name
    pub name: String,
    /// Port the members listen on
    pub port: i32,
    /// TCP/UDP (L4 pools)
    pub protocol: Option<String>,
    /// Backends
    pub members: Vec<PoolMember>,
    /// Priority label (`host/path`) used by pool-group routing
    pub priority_label: Option<String>,
    /// LB algorithm override (HTTPRule)
    pub lb_algorithm: Option<String>,
    /// Consistent-hash key override
    pub lb_algorithm_hash: Option<String>,
    /// Host header for host-based hashing
    pub lb_algorithm_consistent_hash_hdr: Option<String>,
    /// Health monitors (HTTPRule)
    pub health_monitors: Vec<String>,
    /// Backend TLS profile (HTTPRule reencrypt)
    pub ssl_profile: Option<String>,
    /// PKI profile name derived for reencrypt destination CA
    pub pki_profile: Option<PkiProfileNode>,
}

impl PoolNode {
    /// Content checksum.
    pub fn checksum(&self) -> u32 {
        json_checksum(self)
    }
}

/// Destination-CA PKI profile attached to a reencrypt pool
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct PkiProfileNode {
    /// Object name
    pub name: String,
    /// PEM CA bundle
    pub ca_pem: String,
}

/// One member of a pool group
#[derive(Clone, Debug, Serialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct PoolGroupMemberNode {
    /// Member pool name
    pub pool_name: String,
    /// Priority label for path routing
    pub priority_label: Option<String>,
    /// Weight for alternate backends
    pub ratio: Option<i32>,
}

/// Desired PoolGroup
#[derive(Clone, Debug, Default, Serialize)]
pub struct PoolGroupNode {
    /// Object name
    pub name: String,
    /// Members, sorted by pool name
    pub members: Vec<PoolGroupMemberNode>,
}

impl PoolGroupNode {
    /// Content checksum.
    pub fn checksum(&self) -> u32 {
        json_checksum(self)
    }
}

/// One host/path switching rule
#[derive(Clone, Debug, Serialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct HppMapNode {
    /// Host to match
    pub host: String,
    /// Path prefix to match; empty means any
    pub path: String,
    /// Target pool group
    pub pool_group: Option<String>,
    /// Target pool (noPGForSNI mode)
    pub pool: Option<String>,
}

/// One redirect rule (HTTP to HTTPS for secure hosts)
#[derive(Clone, Debug, Serialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct RedirectNode {
    /// Hosts to redirect
    pub hosts: Vec<String>,
    /// Target port
    pub port: i32,
}

/// Desired HTTPPolicySet
#[derive(Clone, Debug, Default, Serialize)]
pub struct HttpPolicySetNode {
    /// Object name
    pub name: String,
    /// Switching rules, sorted
    pub hppmap: Vec<HppMapNode>,
    /// Redirect rules, sorted
    pub redirects: Vec<RedirectNode>,
}

impl HttpPolicySetNode {
    /// Content checksum.
    pub fn checksum(&self) -> u32 {
        json_checksum(self)
    }
}

/// Desired SSLKeyAndCertificate
#[derive(Clone, Debug, Default, Serialize)]
pub struct SslKeyCertNode {
    /// Object name
    pub name: String,
    /// PEM certificate
    pub cert: String,
    /// PEM private key
    pub key: String,
    /// CA-type object (Route destination CA)
    pub is_ca: bool,
}

impl SslKeyCertNode {
    /// Content checksum; hashes name + certificate material the way the
    /// controller-side checksum is defined.
    pub fn checksum(&self) -> u32 {
        fnv_hash32(&format!("{}{}{}", self.name, self.cert, self.key))
    }
}

/// Desired VSDataScriptSet
#[derive(Clone, Debug, Default, Serialize)]
pub struct DataScriptNode {
    /// Object name
    pub name: String,
    /// Event the script hooks
    pub evt: String,
    /// Script body
    pub script: String,
    /// Pool groups the script routes to, sorted
    pub pool_group_refs: Vec<String>,
}

impl DataScriptNode {
    /// Content checksum.
    pub fn checksum(&self) -> u32 {
        json_checksum(self)
    }
}

/// Desired VSVIP
#[derive(Clone, Debug, Default, Serialize)]
pub struct VsVipNode {
    /// Object name
    pub name: String,
    /// FQDNs served, sorted
    pub fqdns: Vec<String>,
    /// Placement networks
    pub vip_networks: Vec<VipNetwork>,
    /// BGP peer labels when RHI is on
    pub bgp_peer_labels: Vec<String>,
    /// NSX-T tier-1 router path
    pub tier1_lr: Option<String>,
}

impl VsVipNode {
    /// Content checksum.
    pub fn checksum(&self) -> u32 {
        json_checksum(self)
    }
}

/// One service port of a VS
#[derive(Clone, Debug, Serialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct VsPort {
    /// Port number
    pub port: i32,
    /// Terminate TLS
    pub enable_ssl: bool,
}

/// Role of a VS node within its graph
#[derive(Clone, Copy, Debug, Default, Serialize, PartialEq, Eq)]
pub enum VsType {
    /// L4 LoadBalancer Service VS
    #[default]
    L4,
    /// Advanced-L4 / services-api gateway VS
    L4Gateway,
    /// Shared L7 parent
    SharedL7Parent,
    /// Dedicated per-hostname L7 VS
    DedicatedL7,
    /// Passthrough shard parent
    Passthrough,
    /// SNI child under a shared parent
    SniChild,
    /// EVH parent
    EvhParent,
    /// EVH child
    EvhChild,
}

/// Desired VirtualService with its owned children
#[derive(Clone, Debug, Default, Serialize)]
pub struct AviVsNode {
    /// Object name
    pub name: String,
    /// Role of this VS
    pub vs_type: VsType,
    /// Serving state (HostRule `enableVirtualHost`)
    pub enabled: bool,
    /// VSVIP (parents only)
    pub vsvip: Option<VsVipNode>,
    /// Service ports (parents only)
    pub services: Vec<VsPort>,
    /// Pools, sorted by name
    pub pools: Vec<PoolNode>,
    /// Pool groups, sorted by name
    pub pool_groups: Vec<PoolGroupNode>,
    /// HTTP policy sets, sorted by name
    pub http_policies: Vec<HttpPolicySetNode>,
    /// DataScripts, sorted by name
    pub datascripts: Vec<DataScriptNode>,
    /// Certificates, sorted by name
    pub ssl_certs: Vec<SslKeyCertNode>,
    /// SNI/EVH children, sorted by name; the parent owns them (no
    /// back-pointers)
    pub children: Vec<AviVsNode>,
    /// Default pool group
    pub default_pool_group: Option<String>,
    /// Default pool
    pub default_pool: Option<String>,
    /// Application profile
    pub application_profile: Option<String>,
    /// Network profile
    pub network_profile: Option<String>,
    /// WAF policy (HostRule)
    pub waf_policy: Option<String>,
    /// Analytics profile (HostRule)
    pub analytics_profile: Option<String>,
    /// Error page profile (HostRule)
    pub error_page_profile: Option<String>,
    /// Pre-existing policy sets attached via HostRule
    pub attached_policy_sets: Vec<String>,
    /// Pre-existing DataScripts attached via HostRule
    pub attached_datascripts: Vec<String>,
    /// Controller-side certificate attached via HostRule
    pub ssl_cert_refs: Vec<String>,
    /// SE group placement
    pub se_group: Option<String>,
    /// VRF context
    pub vrf_context: Option<String>,
    /// SNI/EVH hostnames of a child
    pub vh_domain_names: Vec<String>,
    /// Kubernetes object keys this VS was built from; drives status
    /// write-back and is deliberately excluded from checksums
    #[serde(skip)]
    pub origins: Vec<String>,
}

impl AviVsNode {
    /// Checksum of the VS itself (attachments by name, not content).
    pub fn checksum(&self) -> u32 {
        let summary = serde_json::json!({
            "name": self.name,
            "vs_type": format!("{:?}", self.vs_type),
            "enabled": self.enabled,
            "services": self.services,
            "vsvip": self.vsvip.as_ref().map(|v| &v.name),
            "pools": self.pools.iter().map(|p| &p.name).collect::<Vec<_>>(),
            "pool_groups": self.pool_groups.iter().map(|p| &p.name).collect::<Vec<_>>(),
            "http_policies": self.http_policies.iter().map(|p| &p.name).collect::<Vec<_>>(),
            "datascripts": self.datascripts.iter().map(|d| &d.name).collect::<Vec<_>>(),
            "ssl_certs": self.ssl_certs.iter().map(|c| &c.name).collect::<Vec<_>>(),
            "children": self.children.iter().map(|c| &c.name).collect::<Vec<_>>(),
            "default_pool_group": self.default_pool_group,
            "default_pool": self.default_pool,
            "application_profile": self.application_profile,
            "network_profile": self.network_profile,
            "waf_policy": self.waf_policy,
            "analytics_profile": self.analytics_profile,
            "error_page_profile": self.error_page_profile,
            "attached_policy_sets": self.attached_policy_sets,
            "attached_datascripts": self.attached_datascripts,
            "ssl_cert_refs": self.ssl_cert_refs,
            "se_group": self.se_group,
            "vrf_context": self.vrf_context,
            "vh_domain_names": self.vh_domain_names,
        });
        fnv_hash32(&summary.to_string())
    }

    /// Sort every list (recursively) so checksums are order-independent.
    pub fn sort_for_checksum(&mut self) {
        self.services.sort();
        self.pools.sort_by(|a, b| a.name.cmp(&b.name));
        self.pool_groups.sort_by(|a, b| a.name.cmp(&b.name));
        for pg in &mut self.pool_groups {
            pg.members.sort();
        }
        self.http_policies.sort_by(|a, b| a.name.cmp(&b.name));
        for hp in &mut self.http_policies {
            hp.hppmap.sort();
            hp.redirects.sort();
        }
        self.datascripts.sort_by(|a, b| a.name.cmp(&b.name));
        for ds in &mut self.datascripts {
            ds.pool_group_refs.sort();
        }
        self.ssl_certs.sort_by(|a, b| a.name.cmp(&b.name));
        self.attached_policy_sets.sort();
        self.attached_datascripts.sort();
        self.ssl_cert_refs.sort();
        self.vh_domain_names.sort();
        self.origins.sort();
        self.origins.dedup();
        if let Some(vip) = &mut self.vsvip {
            vip.fqdns.sort();
            vip.bgp_peer_labels.sort();
        }
        self.children.sort_by(|a, b| a.name.cmp(&b.name));
        for child in &mut self.children {
            child.sort_for_checksum();
        }
    }

    /// Combined checksum of the VS and everything it owns.
    pub fn subtree_checksum(&self) -> u32 {
        let mut acc = self.checksum();
        for p in &self.pools {
            acc = acc.wrapping_add(p.checksum());
        }
        for pg in &self.pool_groups {
            acc = acc.wrapping_add(pg.checksum());
        }
        for hp in &self.http_policies {
            acc = acc.wrapping_add(hp.checksum());
        }
        for ds in &self.datascripts {
            acc = acc.wrapping_add(ds.checksum());
        }
        for c in &self.ssl_certs {
            acc = acc.wrapping_add(c.checksum());
        }
        if let Some(vip) = &self.vsvip {
            acc = acc.wrapping_add(vip.checksum());
        }
        for child in &self.children {
            acc = acc.wrapping_add(child.subtree_checksum());
        }
        acc
    }
}

/// One static route of the VRF graph
#[derive(Clone, Debug, Serialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct StaticRouteNode {
    /// `<cluster>-<index>`, stable across rebuilds by node-name order
    pub route_id: String,
    /// Pod CIDR prefix
    pub prefix: String,
    /// Prefix length
    pub mask: i32,
    /// Node address
    pub next_hop: String,
}

/// Desired VRF context
#[derive(Clone, Debug, Default, Serialize)]
pub struct AviVrfNode {
    /// VRF name
    pub name: String,
    /// Routes, sorted by route id
    pub static_routes: Vec<StaticRouteNode>,
}

impl AviVrfNode {
    /// Content checksum over this cluster's routes.
    pub fn checksum(&self) -> u32 {
        json_checksum(self)
    }
}

/// Root of a graph
#[derive(Clone, Debug, Serialize)]
pub enum GraphRoot {
    /// A virtual-service tree
    Vs(AviVsNode),
    /// The VRF static-route set
    Vrf(AviVrfNode),
}

/// Desired state of one model.
#[derive(Debug, Default)]
pub struct ObjectGraph {
    /// `tenant/vsName`
    pub model_name: String,
    /// Root node; `None` is the empty graph driving full deletion
    pub root: Option<GraphRoot>,
    /// Whether this model carries the VRF
    pub is_vrf: bool,
    /// Bounded fast-retry budget, reset on full sync
    retry_counter: AtomicU32,
    checksum: u32,
}

impl ObjectGraph {
    /// Build a graph, sorting the tree and fixing its checksum.
    pub fn new(model_name: impl Into<String>, root: Option<GraphRoot>) -> Self {
        let mut root = root;
        let is_vrf = matches!(root, Some(GraphRoot::Vrf(_)));
        let checksum = match &mut root {
            Some(GraphRoot::Vs(vs)) => {
                vs.sort_for_checksum();
                vs.subtree_checksum()
            }
            Some(GraphRoot::Vrf(vrf)) => {
                vrf.static_routes.sort();
                vrf.checksum()
            }
            None => 0,
        };
        Self {
            model_name: model_name.into(),
            root,
            is_vrf,
            retry_counter: AtomicU32::new(0),
            checksum,
        }
    }

    /// The empty graph (delete-sync).
    pub fn empty(model_name: impl Into<String>) -> Self {
        Self::new(model_name, None)
    }

    /// Graph checksum.
    pub fn checksum(&self) -> u32 {
        self.checksum
    }

    /// Whether the graph describes no objects.
    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Whether this graph represents teardown state: no root, or a VRF
    /// root with no routes left (the delete-sync shape for VRF models).
    pub fn is_deletion_state(&self) -> bool {
        match &self.root {
            None => true,
            Some(GraphRoot::Vrf(vrf)) => vrf.static_routes.is_empty(),
            Some(GraphRoot::Vs(_)) => false,
        }
    }

    /// Root VS node, when the graph is a VS tree.
    pub fn vs_root(&self) -> Option<&AviVsNode> {
        match &self.root {
            Some(GraphRoot::Vs(vs)) => Some(vs),
            _ => None,
        }
    }

    /// Root VRF node, when the graph is the VRF.
    pub fn vrf_root(&self) -> Option<&AviVrfNode> {
        match &self.root {
            Some(GraphRoot::Vrf(v)) => Some(v),
            _ => None,
        }
    }

    /// Bump the retry counter, returning the new value.
    pub fn incr_retry_counter(&self) -> u32 {
        self.retry_counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Reset the retry counter (full sync).
    pub fn reset_retry_counter(&self) {
        self.retry_counter.store(0, Ordering::SeqCst);
    }

    /// Current retry count.
    pub fn retry_counter(&self) -> u32 {
        self.retry_counter.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(name: &str, ip: &str) -> PoolNode {
        PoolNode {
            name: name.to_string(),
            port: 8080,
            members: vec![PoolMember {
                ip: ip.to_string(),
                port: 8080,
            }],
            ..Default::default()
        }
    }

    #[test]
    fn checksum_is_insensitive_to_list_order() {
        let mut a = AviVsNode {
            name: "c1--Shared-L7-0".to_string(),
            vs_type: VsType::SharedL7Parent,
            enabled: true,
            pools: vec![pool("c1--p-a", "10.0.0.1"), pool("c1--p-b", "10.0.0.2")],
            ..Default::default()
        };
        let mut b = AviVsNode {
            pools: vec![pool("c1--p-b", "10.0.0.2"), pool("c1--p-a", "10.0.0.1")],
            ..a.clone()
        };
        a.sort_for_checksum();
        b.sort_for_checksum();
        assert_eq!(a.subtree_checksum(), b.subtree_checksum());
    }

    #[test]
    fn checksum_changes_with_member_content() {
        let g1 = ObjectGraph::new(
            "admin/c1--red-svc",
            Some(GraphRoot::Vs(AviVsNode {
                name: "c1--red-svc".to_string(),
                pools: vec![pool("c1--red-svc--8080", "10.0.0.1")],
                ..Default::default()
            })),
        );
        let g2 = ObjectGraph::new(
            "admin/c1--red-svc",
            Some(GraphRoot::Vs(AviVsNode {
                name: "c1--red-svc".to_string(),
                pools: vec![pool("c1--red-svc--8080", "10.0.0.2")],
                ..Default::default()
            })),
        );
        assert_ne!(g1.checksum(), g2.checksum());
    }

    #[test]
    fn empty_graph_has_zero_checksum() {
        let g = ObjectGraph::empty("admin/c1--red-svc");
        assert!(g.is_empty());
        assert_eq!(g.checksum(), 0);
    }

    #[test]
    fn retry_counter_is_bounded_by_callers() {
        let g = ObjectGraph::empty("admin/m");
        assert_eq!(g.incr_retry_counter(), 1);
        assert_eq!(g.incr_retry_counter(), 2);
        g.reset_retry_counter();
        assert_eq!(g.retry_counter(), 0);
    }

    #[test]
    fn vrf_checksum_covers_routes() {
        let v1 = AviVrfNode {
            name: "global".to_string(),
            static_routes: vec![StaticRouteNode {
                route_id: "c1-0".to_string(),
                prefix: "10.244.0.0".to_string(),
                mask: 24,
                next_hop: "192.168.1.10".to_string(),
            }],
        };
        let mut v2 = v1.clone();
        v2.static_routes[0].next_hop = "192.168.1.11".to_string();
        assert_ne!(v1.checksum(), v2.checksum());
    }
}
