//! VRF static-route graph
//!
//! In ClusterIP mode the service engines reach pod IPs through static
//! routes: one route per node, pod CIDR via the node's InternalIP. Route
//! ids are `<cluster>-<index>` with indices assigned in node-name order so
//! the set is deterministic for a given node inventory.

use k8s_openapi::api::core::v1::Node;
use tracing::warn;

use crate::config::AkoConfig;
use crate::k8s::K8sStore;

use super::{AviVrfNode, StaticRouteNode};

fn node_internal_ip(node: &Node) -> Option<String> {
    node.status
        .as_ref()?
        .addresses
        .as_ref()?
        .iter()
        .find(|a| a.type_ == "InternalIP")
        .map(|a| a.address.clone())
}

fn node_pod_cidr(node: &Node) -> Option<(String, i32)> {
    let cidr = node.spec.as_ref()?.pod_cidr.as_ref()?;
    let (prefix, mask) = cidr.split_once('/')?;
    Some((prefix.to_string(), mask.parse().ok()?))
}

/// Build the VRF graph from the current node inventory.
///
/// Nodes without an InternalIP or pod CIDR are skipped with a warning;
/// they contribute no route but never fail the build.
pub fn build_vrf_graph(cfg: &AkoConfig, store: &K8sStore) -> AviVrfNode {
    let mut nodes = store.nodes.list_all();
    nodes.sort_by(|(a, _), (b, _)| a.cmp(b));

    let mut static_routes = Vec::new();
    for (name, node) in nodes {
        let Some(ip) = node_internal_ip(&node) else {
            warn!(node = %name, "Node has no InternalIP, skipping static route");
            continue;
        };
        let Some((prefix, mask)) = node_pod_cidr(&node) else {
            warn!(node = %name, "Node has no pod CIDR, skipping static route");
            continue;
        };
        static_routes.push(StaticRouteNode {
            route_id: format!("{}-{}", cfg.cluster_name, static_routes.len()),
            prefix,
            mask,
            next_hop: ip,
        });
    }

    AviVrfNode {
        name: cfg.vrf_name.clone(),
        static_routes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VipNetwork;
    use k8s_openapi::api::core::v1::{NodeAddress, NodeSpec, NodeStatus};

    fn test_config() -> AkoConfig {
        AkoConfig {
            cluster_name: "c1".to_string(),
            vip_network_list: vec![VipNetwork {
                network_name: "net".to_string(),
                cidr: None,
            }],
            ..Default::default()
        }
    }

    fn node(ip: Option<&str>, cidr: Option<&str>) -> Node {
        Node {
            spec: Some(NodeSpec {
                pod_cidr: cidr.map(str::to_string),
                ..Default::default()
            }),
            status: Some(NodeStatus {
                addresses: ip.map(|ip| {
                    vec![NodeAddress {
                        type_: "InternalIP".to_string(),
                        address: ip.to_string(),
                    }]
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn routes_are_ordered_by_node_name() {
        let store = K8sStore::new();
        store.nodes.insert("", "worker-b", node(Some("192.168.1.11"), Some("10.244.2.0/24")));
        store.nodes.insert("", "worker-a", node(Some("192.168.1.10"), Some("10.244.1.0/24")));

        let vrf = build_vrf_graph(&test_config(), &store);
        assert_eq!(vrf.static_routes.len(), 2);
        assert_eq!(vrf.static_routes[0].route_id, "c1-0");
        assert_eq!(vrf.static_routes[0].next_hop, "192.168.1.10");
        assert_eq!(vrf.static_routes[1].route_id, "c1-1");
        assert_eq!(vrf.static_routes[1].prefix, "10.244.2.0");
        assert_eq!(vrf.static_routes[1].mask, 24);
    }

    #[test]
    fn incomplete_nodes_are_skipped() {
        let store = K8sStore::new();
        store.nodes.insert("", "no-ip", node(None, Some("10.244.3.0/24")));
        store.nodes.insert("", "no-cidr", node(Some("192.168.1.12"), None));
        store.nodes.insert("", "ok", node(Some("192.168.1.13"), Some("10.244.4.0/24")));

        let vrf = build_vrf_graph(&test_config(), &store);
        assert_eq!(vrf.static_routes.len(), 1);
        assert_eq!(vrf.static_routes[0].next_hop, "192.168.1.13");
    }

    #[test]
    fn rebuild_is_deterministic() {
        let store = K8sStore::new();
        store.nodes.insert("", "w1", node(Some("192.168.1.10"), Some("10.244.1.0/24")));
        let a = build_vrf_graph(&test_config(), &store);
        let b = build_vrf_graph(&test_config(), &store);
        assert_eq!(a.checksum(), b.checksum());
    }
}
