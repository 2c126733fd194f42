//! Graph node to REST body conversion
//!
//! The REST layer serializes nodes into the wire DTOs here, adding the
//! tenant/cloud/placement references the graph deliberately leaves out.
//! References take the by-name form so bodies never depend on uuids.

use serde_json::Value;

use crate::avi::models::{
    obj_ref, DataScript, DataScriptSet, DnsInfo, HttpMatch, HttpPolicyCollection,
    HttpPolicySet, HttpRequestPolicy, HttpRequestRule, IpAddr, IpamNetworkSubnet, MatchTarget,
    Pool, PoolGroup, PoolGroupMember, PoolServer, RedirectAction, SslCertificate,
    SslKeyAndCertificate, StaticRoute, Subnet, SwitchingAction, VirtualService, Vip,
    VsDataScriptRef, VsService, VsVip, VrfContext,
};
use crate::config::AkoConfig;
use crate::graph::{
    AviVrfNode, AviVsNode, DataScriptNode, HttpPolicySetNode, PoolGroupNode, PoolNode,
    SslKeyCertNode, VsType, VsVipNode,
};

fn tenant_ref(cfg: &AkoConfig) -> String {
    obj_ref("tenant", &cfg.tenant)
}

fn cloud_ref(cfg: &AkoConfig) -> String {
    obj_ref("cloud", &cfg.cloud_name)
}

/// VSVIP body.
pub fn vsvip_body(cfg: &AkoConfig, node: &VsVipNode) -> Value {
    let vip = Vip {
        vip_id: "0".to_string(),
        auto_allocate_ip: true,
        ipam_network_subnet: node.vip_networks.first().map(|n| IpamNetworkSubnet {
            network_ref: Some(obj_ref("network", &n.network_name)),
            subnet: n.cidr.as_ref().and_then(|cidr| {
                let (prefix, mask) = cidr.split_once('/')?;
                Some(Subnet {
                    ip_addr: IpAddr::v4(prefix),
                    mask: mask.parse().ok()?,
                })
            }),
        }),
        ip_address: None,
    };
    let body = VsVip {
        name: node.name.clone(),
        tenant_ref: tenant_ref(cfg),
        cloud_ref: cloud_ref(cfg),
        vip: vec![vip],
        dns_info: node.fqdns.iter().map(|f| DnsInfo { fqdn: f.clone() }).collect(),
        vrf_context_ref: (!cfg.static_route_sync_disabled())
            .then(|| obj_ref("vrfcontext", &cfg.vrf_name)),
        tier1_lr: node.tier1_lr.clone(),
        bgp_peer_labels: node.bgp_peer_labels.clone(),
    };
    serde_json::to_value(body).unwrap_or_default()
}

/// Pool body.
pub fn pool_body(cfg: &AkoConfig, node: &PoolNode) -> Value {
    let body = Pool {
        name: node.name.clone(),
        tenant_ref: tenant_ref(cfg),
        cloud_ref: cloud_ref(cfg),
        servers: node
            .members
            .iter()
            .map(|m| PoolServer {
                ip: IpAddr::v4(m.ip.clone()),
                port: Some(m.port),
            })
            .collect(),
        default_server_port: Some(node.port),
        lb_algorithm: node.lb_algorithm.clone(),
        lb_algorithm_hash: node.lb_algorithm_hash.clone(),
        lb_algorithm_consistent_hash_hdr: node.lb_algorithm_consistent_hash_hdr.clone(),
        health_monitor_refs: node
            .health_monitors
            .iter()
            .map(|h| obj_ref("healthmonitor", h))
            .collect(),
        ssl_profile_ref: node.ssl_profile.as_ref().map(|p| obj_ref("sslprofile", p)),
        pki_profile_ref: node
            .pki_profile
            .as_ref()
            .map(|p| obj_ref("pkiprofile", &p.name)),
        vrf_ref: (!cfg.static_route_sync_disabled())
            .then(|| obj_ref("vrfcontext", &cfg.vrf_name)),
        placement_networks: None,
    };
    serde_json::to_value(body).unwrap_or_default()
}

/// PoolGroup body.
pub fn pool_group_body(cfg: &AkoConfig, node: &PoolGroupNode) -> Value {
    let body = PoolGroup {
        name: node.name.clone(),
        tenant_ref: tenant_ref(cfg),
        cloud_ref: cloud_ref(cfg),
        members: node
            .members
            .iter()
            .map(|m| PoolGroupMember {
                pool_ref: obj_ref("pool", &m.pool_name),
                priority_label: m.priority_label.clone(),
                ratio: m.ratio,
            })
            .collect(),
    };
    serde_json::to_value(body).unwrap_or_default()
}

/// HTTPPolicySet body.
pub fn http_policy_body(cfg: &AkoConfig, node: &HttpPolicySetNode) -> Value {
    let mut rules = Vec::new();
    let mut index = 1;
    for redirect in &node.redirects {
        rules.push(HttpRequestRule {
            name: format!("{}-redirect-{index}", node.name),
            index,
            enable: true,
            match_: Some(HttpMatch {
                host_hdr: Some(MatchTarget {
                    match_criteria: "HDR_EQUALS".to_string(),
                    match_str: redirect.hosts.clone(),
                }),
                path: None,
                vs_port: None,
            }),
            switching_action: None,
            redirect_action: Some(RedirectAction {
                protocol: "HTTPS".to_string(),
                port: redirect.port,
                status_code: Some("HTTP_REDIRECT_STATUS_CODE_302".to_string()),
            }),
        });
        index += 1;
    }
    for rule in &node.hppmap {
        rules.push(HttpRequestRule {
            name: format!("{}-rule-{index}", node.name),
            index,
            enable: true,
            match_: Some(HttpMatch {
                host_hdr: Some(MatchTarget {
                    match_criteria: "HDR_EQUALS".to_string(),
                    match_str: vec![rule.host.clone()],
                }),
                path: (!rule.path.is_empty()).then(|| MatchTarget {
                    match_criteria: "BEGINS_WITH".to_string(),
                    match_str: vec![rule.path.clone()],
                }),
                vs_port: None,
            }),
            switching_action: Some(SwitchingAction {
                action: if rule.pool.is_some() {
                    "HTTP_SWITCHING_SELECT_POOL".to_string()
                } else {
                    "HTTP_SWITCHING_SELECT_POOLGROUP".to_string()
                },
                pool_group_ref: rule.pool_group.as_ref().map(|pg| obj_ref("poolgroup", pg)),
                pool_ref: rule.pool.as_ref().map(|p| obj_ref("pool", p)),
            }),
            redirect_action: None,
        });
        index += 1;
    }
    let body = HttpPolicySet {
        name: node.name.clone(),
        tenant_ref: tenant_ref(cfg),
        http_request_policy: Some(HttpRequestPolicy { rules }),
    };
    serde_json::to_value(body).unwrap_or_default()
}

/// DataScript body.
pub fn datascript_body(cfg: &AkoConfig, node: &DataScriptNode) -> Value {
    let body = DataScriptSet {
        name: node.name.clone(),
        tenant_ref: tenant_ref(cfg),
        datascript: vec![DataScript {
            evt: node.evt.clone(),
            script: node.script.clone(),
        }],
        pool_group_refs: node
            .pool_group_refs
            .iter()
            .map(|pg| obj_ref("poolgroup", pg))
            .collect(),
    };
    serde_json::to_value(body).unwrap_or_default()
}

/// SSLKeyAndCertificate body.
pub fn ssl_body(cfg: &AkoConfig, node: &SslKeyCertNode) -> Value {
    let body = SslKeyAndCertificate {
        name: node.name.clone(),
        tenant_ref: tenant_ref(cfg),
        key: node.key.clone(),
        certificate: SslCertificate {
            certificate: node.cert.clone(),
        },
        type_: Some(
            if node.is_ca {
                "SSL_CERTIFICATE_TYPE_CA"
            } else {
                "SSL_CERTIFICATE_TYPE_VIRTUALSERVICE"
            }
            .to_string(),
        ),
    };
    serde_json::to_value(body).unwrap_or_default()
}

/// VirtualService body; `parent_name` marks an SNI/EVH child.
pub fn vs_body(cfg: &AkoConfig, vs: &AviVsNode, parent_name: Option<&str>) -> Value {
    let is_child = parent_name.is_some();
    let body = VirtualService {
        name: vs.name.clone(),
        tenant_ref: tenant_ref(cfg),
        cloud_ref: cloud_ref(cfg),
        enabled: vs.enabled,
        vsvip_ref: vs.vsvip.as_ref().map(|v| obj_ref("vsvip", &v.name)),
        services: vs
            .services
            .iter()
            .map(|s| VsService {
                port: s.port,
                enable_ssl: s.enable_ssl,
                port_range_end: None,
            })
            .collect(),
        application_profile_ref: vs
            .application_profile
            .as_ref()
            .map(|p| obj_ref("applicationprofile", p)),
        network_profile_ref: vs
            .network_profile
            .as_ref()
            .map(|p| obj_ref("networkprofile", p)),
        pool_group_ref: vs
            .default_pool_group
            .as_ref()
            .map(|pg| obj_ref("poolgroup", pg)),
        pool_ref: vs.default_pool.as_ref().map(|p| obj_ref("pool", p)),
        http_policies: vs
            .http_policies
            .iter()
            .map(|p| obj_ref("httppolicyset", &p.name))
            .chain(vs.attached_policy_sets.iter().map(|p| obj_ref("httppolicyset", p)))
            .enumerate()
            .map(|(i, r)| HttpPolicyCollection {
                http_policy_set_ref: r,
                index: (i + 11) as i32,
            })
            .collect(),
        vs_datascripts: vs
            .datascripts
            .iter()
            .map(|d| obj_ref("vsdatascriptset", &d.name))
            .chain(vs.attached_datascripts.iter().map(|d| obj_ref("vsdatascriptset", d)))
            .enumerate()
            .map(|(i, r)| VsDataScriptRef {
                vs_datascript_set_ref: r,
                index: i as i32,
            })
            .collect(),
        ssl_key_and_certificate_refs: vs
            .ssl_certs
            .iter()
            .map(|c| obj_ref("sslkeyandcertificate", &c.name))
            .chain(
                vs.ssl_cert_refs
                    .iter()
                    .map(|c| obj_ref("sslkeyandcertificate", c)),
            )
            .collect(),
        type_: match (is_child, &vs.vs_type) {
            (true, _) => Some("VS_TYPE_VH_CHILD".to_string()),
            (false, VsType::SharedL7Parent | VsType::EvhParent | VsType::DedicatedL7) => {
                Some("VS_TYPE_VH_PARENT".to_string())
            }
            _ => None,
        },
        vh_parent_vs_ref: parent_name.map(|p| obj_ref("virtualservice", p)),
        vh_domain_name: vs.vh_domain_names.clone(),
        se_group_ref: vs
            .se_group
            .as_ref()
            .map(|g| obj_ref("serviceenginegroup", g)),
        vrf_context_ref: vs
            .vrf_context
            .as_ref()
            .map(|v| obj_ref("vrfcontext", v)),
        waf_policy_ref: vs.waf_policy.as_ref().map(|w| obj_ref("wafpolicy", w)),
        analytics_profile_ref: vs
            .analytics_profile
            .as_ref()
            .map(|a| obj_ref("analyticsprofile", a)),
        error_page_profile_ref: vs
            .error_page_profile
            .as_ref()
            .map(|e| obj_ref("errorpageprofile", e)),
    };
    serde_json::to_value(body).unwrap_or_default()
}

/// VrfContext body: the cluster's routes replace previous cluster-prefixed
/// ones, foreign routes are carried through untouched.
pub fn vrf_body(cfg: &AkoConfig, node: &AviVrfNode, foreign_routes: Vec<Value>) -> Value {
    let mut routes: Vec<Value> = foreign_routes;
    for r in &node.static_routes {
        let route = StaticRoute {
            route_id: r.route_id.clone(),
            prefix: Subnet {
                ip_addr: IpAddr::v4(r.prefix.clone()),
                mask: r.mask,
            },
            next_hop: IpAddr::v4(r.next_hop.clone()),
        };
        routes.push(serde_json::to_value(route).unwrap_or_default());
    }
    let body = VrfContext {
        name: node.name.clone(),
        tenant_ref: tenant_ref(cfg),
        cloud_ref: cloud_ref(cfg),
        static_routes: Vec::new(),
    };
    let mut value = serde_json::to_value(body).unwrap_or_default();
    value["static_routes"] = Value::Array(routes);
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VipNetwork;
    use crate::graph::{HppMapNode, PoolMember, RedirectNode, StaticRouteNode};

    fn test_config() -> AkoConfig {
        AkoConfig {
            cluster_name: "c1".to_string(),
            vip_network_list: vec![VipNetwork {
                network_name: "net".to_string(),
                cidr: Some("10.10.10.0/24".to_string()),
            }],
            ..Default::default()
        }
    }

    #[test]
    fn pool_body_carries_refs_and_servers() {
        let cfg = test_config();
        let node = PoolNode {
            name: "c1--red-app--80".to_string(),
            port: 80,
            members: vec![PoolMember {
                ip: "10.244.1.5".to_string(),
                port: 8080,
            }],
            ..Default::default()
        };
        let body = pool_body(&cfg, &node);
        assert_eq!(body["name"], "c1--red-app--80");
        assert_eq!(body["cloud_ref"], "/api/cloud/?name=Default-Cloud");
        assert_eq!(body["servers"][0]["port"], 8080);
        assert_eq!(body["vrf_ref"], "/api/vrfcontext/?name=global");
    }

    #[test]
    fn vsvip_body_places_the_vip_on_the_network() {
        let cfg = test_config();
        let node = VsVipNode {
            name: "c1--Shared-L7-0".to_string(),
            fqdns: vec!["foo.x".to_string()],
            vip_networks: cfg.vip_network_list.clone(),
            ..Default::default()
        };
        let body = vsvip_body(&cfg, &node);
        assert_eq!(body["vip"][0]["auto_allocate_ip"], true);
        assert_eq!(
            body["vip"][0]["ipam_network_subnet"]["network_ref"],
            "/api/network/?name=net"
        );
        assert_eq!(body["dns_info"][0]["fqdn"], "foo.x");
    }

    #[test]
    fn http_policy_rules_put_redirects_first() {
        let cfg = test_config();
        let node = HttpPolicySetNode {
            name: "c1--Shared-L7-0".to_string(),
            hppmap: vec![HppMapNode {
                host: "foo.x".to_string(),
                path: "/".to_string(),
                pool_group: Some("c1--Shared-L7-0".to_string()),
                pool: None,
            }],
            redirects: vec![RedirectNode {
                hosts: vec!["secure.x".to_string()],
                port: 443,
            }],
        };
        let body = http_policy_body(&cfg, &node);
        let rules = body["http_request_policy"]["rules"].as_array().unwrap();
        assert_eq!(rules.len(), 2);
        assert!(rules[0].get("redirect_action").is_some());
        assert_eq!(
            rules[1]["switching_action"]["action"],
            "HTTP_SWITCHING_SELECT_POOLGROUP"
        );
    }

    #[test]
    fn child_vs_body_references_its_parent_by_name() {
        let cfg = test_config();
        let child = AviVsNode {
            name: "c1--secure.x".to_string(),
            vs_type: VsType::SniChild,
            enabled: true,
            vh_domain_names: vec!["secure.x".to_string()],
            ..Default::default()
        };
        let body = vs_body(&cfg, &child, Some("c1--Shared-L7-0"));
        assert_eq!(body["type"], "VS_TYPE_VH_CHILD");
        assert_eq!(
            body["vh_parent_vs_ref"],
            "/api/virtualservice/?name=c1--Shared-L7-0"
        );
    }

    #[test]
    fn vrf_body_merges_foreign_routes() {
        let cfg = test_config();
        let node = AviVrfNode {
            name: "global".to_string(),
            static_routes: vec![StaticRouteNode {
                route_id: "c1-0".to_string(),
                prefix: "10.244.1.0".to_string(),
                mask: 24,
                next_hop: "192.168.1.10".to_string(),
            }],
        };
        let foreign = vec![serde_json::json!({ "route_id": "other-0" })];
        let body = vrf_body(&cfg, &node, foreign);
        let routes = body["static_routes"].as_array().unwrap();
        assert_eq!(routes.len(), 2);
        assert_eq!(routes[0]["route_id"], "other-0");
        assert_eq!(routes[1]["route_id"], "c1-0");
    }
}
