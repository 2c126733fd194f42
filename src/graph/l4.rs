//! L4 graph builders: LoadBalancer Services and gateway-driven L4 VSes

use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::api::core::v1::Service;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::{AkoConfig, L4FqdnFormat, ServiceType};
use crate::crd::AviInfraSetting;
use crate::k8s::K8sStore;
use crate::names::Namer;
use crate::INFRA_SETTING_NAME_ANNOTATION;

use super::{AviVsNode, PoolMember, PoolNode, VsPort, VsType, VsVipNode};

/// Resolve the AviInfraSetting referenced by an object's annotations.
pub fn infra_setting_for(
    annotations: Option<&BTreeMap<String, String>>,
    store: &K8sStore,
) -> Option<Arc<AviInfraSetting>> {
    let name = annotations?.get(INFRA_SETTING_NAME_ANNOTATION)?;
    store.infra_settings.get("", name)
}

/// Name token contributed by an infra setting ("" when none).
pub fn infra_setting_token(setting: &Option<Arc<AviInfraSetting>>) -> String {
    setting
        .as_ref()
        .and_then(|s| s.metadata.name.clone())
        .unwrap_or_default()
}

/// One NodePortLocal annotation entry on a Pod.
#[derive(Debug, Deserialize)]
struct NplEntry {
    #[serde(rename = "podPort")]
    pod_port: i32,
    #[serde(rename = "nodeIP")]
    node_ip: String,
    #[serde(rename = "nodePort")]
    node_port: i32,
}

/// Project one service port onto pool members per the deployment's
/// service type.
pub fn pool_members_for_port(
    cfg: &AkoConfig,
    store: &K8sStore,
    namespace: &str,
    svc: &Service,
    port: &k8s_openapi::api::core::v1::ServicePort,
) -> Vec<PoolMember> {
    match cfg.service_type {
        ServiceType::ClusterIp => endpoints_members(store, namespace, svc, port),
        ServiceType::NodePort => nodeport_members(store, port),
        ServiceType::NodePortLocal => npl_members(store, namespace, svc, port),
    }
}

fn endpoints_members(
    store: &K8sStore,
    namespace: &str,
    svc: &Service,
    port: &k8s_openapi::api::core::v1::ServicePort,
) -> Vec<PoolMember> {
    let name = svc.metadata.name.as_deref().unwrap_or_default();
    let Some(eps) = store.endpoints.get(namespace, name) else {
        // A Service with no Endpoints still yields an (empty) pool.
        return Vec::new();
    };
    let mut members = Vec::new();
    for subset in eps.subsets.iter().flatten() {
        let Some(ep_port) = subset.ports.as_ref().and_then(|ports| {
            ports
                .iter()
                .find(|p| match (&port.name, &p.name) {
                    (Some(want), Some(have)) => want == have,
                    // Unnamed single-port services match positionally.
                    _ => ports.len() == 1,
                })
                .map(|p| p.port)
        }) else {
            continue;
        };
        for addr in subset.addresses.iter().flatten() {
            members.push(PoolMember {
                ip: addr.ip.clone(),
                port: ep_port,
            });
        }
    }
    members
}

fn nodeport_members(
    store: &K8sStore,
    port: &k8s_openapi::api::core::v1::ServicePort,
) -> Vec<PoolMember> {
    let Some(node_port) = port.node_port else {
        return Vec::new();
    };
    let mut members = Vec::new();
    for (_, node) in store.nodes.list_all() {
        let ip = node
            .status
            .as_ref()
            .and_then(|s| s.addresses.as_ref())
            .and_then(|addrs| addrs.iter().find(|a| a.type_ == "InternalIP"))
            .map(|a| a.address.clone());
        if let Some(ip) = ip {
            members.push(PoolMember { ip, port: node_port });
        }
    }
    members
}

fn npl_members(
    store: &K8sStore,
    namespace: &str,
    svc: &Service,
    port: &k8s_openapi::api::core::v1::ServicePort,
) -> Vec<PoolMember> {
    let Some(selector) = svc.spec.as_ref().and_then(|s| s.selector.as_ref()) else {
        return Vec::new();
    };
    let target_port = match port.target_port.as_ref() {
        Some(k8s_openapi::apimachinery::pkg::util::intstr::IntOrString::Int(p)) => *p,
        _ => port.port,
    };
    let mut members = Vec::new();
    for (_, pod) in store.pods.list_namespace(namespace) {
        let labels = pod.metadata.labels.clone().unwrap_or_default();
        if !selector.iter().all(|(k, v)| labels.get(k) == Some(v)) {
            continue;
        }
        let Some(raw) = pod
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(crate::NPL_ANNOTATION))
        else {
            continue;
        };
        match serde_json::from_str::<Vec<NplEntry>>(raw) {
            Ok(entries) => {
                for e in entries.iter().filter(|e| e.pod_port == target_port) {
                    members.push(PoolMember {
                        ip: e.node_ip.clone(),
                        port: e.node_port,
                    });
                }
            }
            Err(e) => {
                warn!(
                    pod = ?pod.metadata.name,
                    error = %e,
                    "Unparseable NodePortLocal annotation, pod skipped"
                );
            }
        }
    }
    members
}

fn l4_fqdn(cfg: &AkoConfig, namespace: &str, svc_name: &str) -> Option<String> {
    let domain = cfg.default_domain.as_deref()?;
    match cfg.auto_l4_fqdn {
        L4FqdnFormat::Default => Some(format!("{svc_name}.{namespace}.{domain}")),
        L4FqdnFormat::Flat => Some(format!("{svc_name}-{namespace}.{domain}")),
        L4FqdnFormat::Disabled => None,
    }
}

fn vsvip_for(
    cfg: &AkoConfig,
    name: String,
    fqdns: Vec<String>,
    setting: &Option<Arc<AviInfraSetting>>,
) -> VsVipNode {
    let networks = setting
        .as_ref()
        .and_then(|s| s.spec.network.as_ref())
        .filter(|n| !n.vip_networks.is_empty())
        .map(|n| n.vip_networks.clone())
        .unwrap_or_else(|| cfg.vip_network_list.clone());
    let rhi = setting
        .as_ref()
        .and_then(|s| s.spec.network.as_ref())
        .and_then(|n| n.enable_rhi)
        .unwrap_or(cfg.enable_rhi);
    let bgp_peer_labels = if rhi {
        setting
            .as_ref()
            .and_then(|s| s.spec.network.as_ref())
            .filter(|n| !n.bgp_peer_labels.is_empty())
            .map(|n| n.bgp_peer_labels.clone())
            .unwrap_or_else(|| cfg.bgp_peer_labels.clone())
    } else {
        Vec::new()
    };
    VsVipNode {
        name,
        fqdns,
        vip_networks: networks,
        bgp_peer_labels,
        tier1_lr: cfg.nsxt_t1_lr.clone(),
    }
}

/// Build the graph of one L4 LoadBalancer Service.
///
/// Returns `None` when the Service is gone or no longer a LoadBalancer,
/// which the caller turns into a model deletion.
pub fn build_l4_graph(
    cfg: &AkoConfig,
    namer: &Namer,
    store: &K8sStore,
    namespace: &str,
    svc_name: &str,
) -> Option<AviVsNode> {
    let svc = store.services.get(namespace, svc_name)?;
    let spec = svc.spec.as_ref()?;
    if spec.type_.as_deref() != Some("LoadBalancer") {
        return None;
    }

    let setting = infra_setting_for(svc.metadata.annotations.as_ref(), store);
    let vs_name = namer.l4_vs_name(namespace, svc_name);

    let mut services = Vec::new();
    let mut pools = Vec::new();
    let mut is_udp = false;
    for port in spec.ports.iter().flatten() {
        let protocol = port.protocol.clone().unwrap_or_else(|| "TCP".to_string());
        is_udp |= protocol == "UDP";
        services.push(VsPort {
            port: port.port,
            enable_ssl: false,
        });
        let mut members = pool_members_for_port(cfg, store, namespace, &svc, port);
        members.sort();
        pools.push(PoolNode {
            name: namer.l4_pool_name(namespace, svc_name, port.port),
            port: port.port,
            protocol: Some(protocol),
            members,
            ..Default::default()
        });
    }
    if services.is_empty() {
        debug!(namespace, svc = svc_name, "LoadBalancer Service without ports");
        return None;
    }

    let default_pool = (pools.len() == 1).then(|| pools[0].name.clone());
    let fqdns = l4_fqdn(cfg, namespace, svc_name).into_iter().collect();
    let se_group = setting
        .as_ref()
        .and_then(|s| s.spec.se_group.as_ref())
        .map(|g| g.name.clone())
        .unwrap_or_else(|| cfg.se_group_name.clone());

    Some(AviVsNode {
        name: vs_name.clone(),
        vs_type: VsType::L4,
        enabled: true,
        vsvip: Some(vsvip_for(
            cfg,
            namer.l4_vsvip_name(namespace, svc_name),
            fqdns,
            &setting,
        )),
        services,
        pools,
        default_pool,
        application_profile: Some("System-L4-Application".to_string()),
        network_profile: Some(
            if is_udp {
                "System-UDP-Fast-Path"
            } else {
                "System-TCP-Proxy"
            }
            .to_string(),
        ),
        se_group: Some(se_group),
        vrf_context: (!cfg.static_route_sync_disabled()).then(|| cfg.vrf_name.clone()),
        origins: vec![crate::k8s::encode_key(
            crate::k8s::ObjectKind::L4LBService,
            namespace,
            svc_name,
        )],
        ..Default::default()
    })
}

/// Build the graph of one gateway (advanced L4 / services-api).
///
/// Every listener selects backend Services by label; each matching Service
/// port contributes a pool.
pub fn build_gateway_graph(
    cfg: &AkoConfig,
    namer: &Namer,
    store: &K8sStore,
    namespace: &str,
    gw_name: &str,
) -> Option<AviVsNode> {
    let gw = store.gateways.get(namespace, gw_name)?;

    // The gateway class must be ours.
    let class = store.gateway_classes.get("", &gw.spec.gateway_class_name)?;
    if class.spec.controller != crate::k8s::gateway::AVI_GATEWAY_CONTROLLER {
        debug!(
            gateway = gw_name,
            class = %gw.spec.gateway_class_name,
            "Gateway class not owned by this controller"
        );
        return None;
    }

    let setting = infra_setting_for(gw.metadata.annotations.as_ref(), store);
    let vs_name = namer.l4_vs_name(namespace, gw_name);

    let mut services = Vec::new();
    let mut pools = Vec::new();
    for listener in &gw.spec.listeners {
        services.push(VsPort {
            port: listener.port,
            enable_ssl: false,
        });
        let selector = listener
            .routes
            .as_ref()
            .and_then(|r| r.selector.as_ref())
            .map(|s| s.match_labels.clone())
            .unwrap_or_default();
        for (svc_name, svc) in store.services.list_namespace(namespace) {
            let labels = svc.metadata.labels.clone().unwrap_or_default();
            if selector.is_empty() || !selector.iter().all(|(k, v)| labels.get(k) == Some(v)) {
                continue;
            }
            let Some(port) = svc
                .spec
                .as_ref()
                .and_then(|s| s.ports.as_ref())
                .and_then(|ports| ports.iter().find(|p| p.port == listener.port))
            else {
                continue;
            };
            let mut members = pool_members_for_port(cfg, store, namespace, &svc, port);
            members.sort();
            pools.push(PoolNode {
                name: namer.adv_l4_pool_name(namespace, &svc_name, gw_name, listener.port),
                port: listener.port,
                protocol: Some(listener.protocol.clone()),
                members,
                ..Default::default()
            });
        }
    }
    if services.is_empty() {
        return None;
    }

    Some(AviVsNode {
        name: vs_name.clone(),
        vs_type: VsType::L4Gateway,
        enabled: true,
        vsvip: Some(vsvip_for(cfg, namer.vsvip_name(&vs_name), Vec::new(), &setting)),
        services,
        pools,
        application_profile: Some("System-L4-Application".to_string()),
        network_profile: Some("System-TCP-Proxy".to_string()),
        se_group: Some(
            setting
                .as_ref()
                .and_then(|s| s.spec.se_group.as_ref())
                .map(|g| g.name.clone())
                .unwrap_or_else(|| cfg.se_group_name.clone()),
        ),
        vrf_context: (!cfg.static_route_sync_disabled()).then(|| cfg.vrf_name.clone()),
        origins: vec![crate::k8s::encode_key(
            crate::k8s::ObjectKind::Gateway,
            namespace,
            gw_name,
        )],
        ..Default::default()
    })
}
