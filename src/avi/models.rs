//! Wire DTOs for the Avi REST API
//!
//! Only the fields AKO writes are modelled; unknown response fields are
//! ignored on deserialization. Reference fields take the
//! `/api/<collection>/?name=<name>` form so the controller resolves them
//! by name.

use serde::{Deserialize, Serialize};

/// Build a by-name reference to another Avi object.
pub fn obj_ref(collection: &str, name: &str) -> String {
    format!("/api/{collection}/?name={name}")
}

/// An IP address with its Avi type tag
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct IpAddr {
    /// Dotted-quad or v6 text form
    pub addr: String,
    /// `V4` or `V6`
    #[serde(rename = "type")]
    pub type_: String,
}

impl IpAddr {
    /// A V4 address
    pub fn v4(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            type_: "V4".to_string(),
        }
    }
}

/// One VIP of a VSVIP object
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct Vip {
    /// Index within the VSVIP
    pub vip_id: String,
    /// Let the controller allocate the address
    pub auto_allocate_ip: bool,
    /// Placement network reference
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipam_network_subnet: Option<IpamNetworkSubnet>,
    /// Static address request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<IpAddr>,
}

/// Placement network of a VIP
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct IpamNetworkSubnet {
    /// Network reference
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_ref: Option<String>,
    /// CIDR within the network
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subnet: Option<Subnet>,
}

/// CIDR as prefix + mask
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct Subnet {
    /// Network prefix
    pub ip_addr: IpAddr,
    /// Prefix length
    pub mask: i32,
}

/// DNS name attached to a VSVIP
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct DnsInfo {
    /// The FQDN
    pub fqdn: String,
}

/// VSVIP: allocated VIP + placement for a VS
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct VsVip {
    /// Object name
    pub name: String,
    /// Tenant reference
    pub tenant_ref: String,
    /// Cloud reference
    pub cloud_ref: String,
    /// VIPs (one for AKO objects)
    pub vip: Vec<Vip>,
    /// FQDNs served by the VS
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dns_info: Vec<DnsInfo>,
    /// VRF context reference
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vrf_context_ref: Option<String>,
    /// NSX-T tier-1 logical router path
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier1_lr: Option<String>,
    /// BGP peer labels for RHI
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bgp_peer_labels: Vec<String>,
}

/// One backend server of a Pool
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct PoolServer {
    /// Server address
    pub ip: IpAddr,
    /// Server port when it differs from the pool default
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,
}

/// Pool: a backend group
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct Pool {
    /// Object name
    pub name: String,
    /// Tenant reference
    pub tenant_ref: String,
    /// Cloud reference
    pub cloud_ref: String,
    /// Backend servers
    #[serde(default)]
    pub servers: Vec<PoolServer>,
    /// Port used when a server carries none
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_server_port: Option<i32>,
    /// LB algorithm
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lb_algorithm: Option<String>,
    /// Consistent-hash key
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lb_algorithm_hash: Option<String>,
    /// Host header for host-based hashing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lb_algorithm_consistent_hash_hdr: Option<String>,
    /// Health monitor references
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub health_monitor_refs: Vec<String>,
    /// Backend TLS profile
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssl_profile_ref: Option<String>,
    /// Backend CA for re-encrypt
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pki_profile_ref: Option<String>,
    /// VRF the members are reachable in
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vrf_ref: Option<String>,
    /// Placement network for pool members
    #[serde(skip_serializing_if = "Option::is_none")]
    pub placement_networks: Option<Vec<IpamNetworkSubnet>>,
}

/// Weighted member of a PoolGroup
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct PoolGroupMember {
    /// Member pool reference
    pub pool_ref: String,
    /// Priority label used for path routing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority_label: Option<String>,
    /// Traffic ratio across same-priority members
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ratio: Option<i32>,
}

/// PoolGroup: weighted selection across pools
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct PoolGroup {
    /// Object name
    pub name: String,
    /// Tenant reference
    pub tenant_ref: String,
    /// Cloud reference
    pub cloud_ref: String,
    /// Member pools
    #[serde(default)]
    pub members: Vec<PoolGroupMember>,
}

/// Host/path match of one HTTP request rule
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct HttpMatch {
    /// Host header criteria
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_hdr: Option<MatchTarget>,
    /// Path criteria
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<MatchTarget>,
    /// VS port criteria
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vs_port: Option<PortMatch>,
}

/// String match criteria
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct MatchTarget {
    /// HDR_EQUALS / BEGINS_WITH ...
    pub match_criteria: String,
    /// Values to match
    #[serde(default)]
    pub match_str: Vec<String>,
}

/// Port match criteria
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct PortMatch {
    /// IS_IN
    pub match_criteria: String,
    /// Ports
    #[serde(default)]
    pub ports: Vec<i32>,
}

/// Content-switching action of one HTTP rule
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct SwitchingAction {
    /// HTTP_SWITCHING_SELECT_POOLGROUP / _POOL
    pub action: String,
    /// Target pool group
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool_group_ref: Option<String>,
    /// Target pool
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool_ref: Option<String>,
}

/// Redirect action of one HTTP rule
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct RedirectAction {
    /// HTTPS
    pub protocol: String,
    /// Redirect port
    pub port: i32,
    /// HTTP status for the redirect
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<String>,
}

/// One rule of an HTTP request policy
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct HttpRequestRule {
    /// Rule name
    pub name: String,
    /// Evaluation index
    pub index: i32,
    /// Rule enabled
    pub enable: bool,
    /// Match criteria
    #[serde(rename = "match", skip_serializing_if = "Option::is_none")]
    pub match_: Option<HttpMatch>,
    /// Pool/PG switch
    #[serde(skip_serializing_if = "Option::is_none")]
    pub switching_action: Option<SwitchingAction>,
    /// Redirect
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_action: Option<RedirectAction>,
}

/// HTTP request policy body
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct HttpRequestPolicy {
    /// Ordered rules
    #[serde(default)]
    pub rules: Vec<HttpRequestRule>,
}

/// HTTPPolicySet object
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct HttpPolicySet {
    /// Object name
    pub name: String,
    /// Tenant reference
    pub tenant_ref: String,
    /// Request rules
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_request_policy: Option<HttpRequestPolicy>,
}

/// VSDataScriptSet object
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct DataScriptSet {
    /// Object name
    pub name: String,
    /// Tenant reference
    pub tenant_ref: String,
    /// Script bodies keyed by event
    #[serde(default)]
    pub datascript: Vec<DataScript>,
    /// Pool groups the script references
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pool_group_refs: Vec<String>,
}

/// One event's script
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct DataScript {
    /// VS_DATASCRIPT_EVT_HTTP_REQ etc.
    pub evt: String,
    /// Lua body
    pub script: String,
}

/// SSLKeyAndCertificate object
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct SslKeyAndCertificate {
    /// Object name
    pub name: String,
    /// Tenant reference
    pub tenant_ref: String,
    /// PEM private key
    pub key: String,
    /// Certificate body
    pub certificate: SslCertificate,
    /// SSL_CERTIFICATE_TYPE_VIRTUALSERVICE / _CA
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,
}

/// Certificate body of an SSL object
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct SslCertificate {
    /// PEM certificate
    pub certificate: String,
}

/// One service port of a VS
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct VsService {
    /// Port
    pub port: i32,
    /// Terminate TLS on this port
    pub enable_ssl: bool,
    /// End of a port range
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port_range_end: Option<i32>,
}

/// HTTP policy attachment of a VS
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct HttpPolicyCollection {
    /// Policy set reference
    pub http_policy_set_ref: String,
    /// Evaluation index
    pub index: i32,
}

/// DataScript attachment of a VS
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct VsDataScriptRef {
    /// DataScript set reference
    pub vs_datascript_set_ref: String,
    /// Evaluation index
    pub index: i32,
}

/// VirtualService object
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct VirtualService {
    /// Object name
    pub name: String,
    /// Tenant reference
    pub tenant_ref: String,
    /// Cloud reference
    pub cloud_ref: String,
    /// Serving state
    pub enabled: bool,
    /// VSVIP reference (parents only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vsvip_ref: Option<String>,
    /// Service ports (parents only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub services: Vec<VsService>,
    /// Application profile
    #[serde(skip_serializing_if = "Option::is_none")]
    pub application_profile_ref: Option<String>,
    /// Network (TCP/UDP) profile
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_profile_ref: Option<String>,
    /// Default pool group
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool_group_ref: Option<String>,
    /// Default pool (L4 single-port)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool_ref: Option<String>,
    /// Attached HTTP policies
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub http_policies: Vec<HttpPolicyCollection>,
    /// Attached DataScripts
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vs_datascripts: Vec<VsDataScriptRef>,
    /// TLS certificates
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ssl_key_and_certificate_refs: Vec<String>,
    /// VS_TYPE_VH_PARENT / VS_TYPE_VH_CHILD
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,
    /// Parent reference for SNI/EVH children
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vh_parent_vs_ref: Option<String>,
    /// SNI domain names of a child
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vh_domain_name: Vec<String>,
    /// Service engine group
    #[serde(skip_serializing_if = "Option::is_none")]
    pub se_group_ref: Option<String>,
    /// VRF context
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vrf_context_ref: Option<String>,
    /// WAF policy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub waf_policy_ref: Option<String>,
    /// Analytics profile
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analytics_profile_ref: Option<String>,
    /// Error page profile
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_page_profile_ref: Option<String>,
}

/// One static route of a VRF context
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct StaticRoute {
    /// Route id, `<cluster>-<index>` so one cluster's routes are
    /// distinguishable in a shared VRF
    pub route_id: String,
    /// Destination prefix (pod CIDR)
    pub prefix: Subnet,
    /// Next hop (node address)
    pub next_hop: IpAddr,
}

/// VrfContext object
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct VrfContext {
    /// Object name
    pub name: String,
    /// Tenant reference
    pub tenant_ref: String,
    /// Cloud reference
    pub cloud_ref: String,
    /// Static routes for pod reachability
    #[serde(default)]
    pub static_routes: Vec<StaticRoute>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refs_resolve_by_name() {
        assert_eq!(obj_ref("cloud", "Default-Cloud"), "/api/cloud/?name=Default-Cloud");
    }

    #[test]
    fn optional_fields_are_omitted_from_wire_bodies() {
        let pool = Pool {
            name: "c1--red-svc--80".to_string(),
            tenant_ref: obj_ref("tenant", "admin"),
            cloud_ref: obj_ref("cloud", "Default-Cloud"),
            servers: vec![PoolServer {
                ip: IpAddr::v4("10.244.1.5"),
                port: Some(8080),
            }],
            ..Default::default()
        };
        let body = serde_json::to_value(&pool).unwrap();
        assert!(body.get("lb_algorithm").is_none());
        assert_eq!(body["servers"][0]["ip"]["addr"], "10.244.1.5");
    }
}
