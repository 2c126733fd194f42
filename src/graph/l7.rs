//! L7 graph builders: shared, dedicated, SNI/EVH and passthrough models
//!
//! A model's graph is rebuilt from scratch on every trigger: the builder
//! scans all admitted Ingresses and Routes, keeps the hosts that shard
//! onto the target parent VS, resolves Host+Path conflicts
//! deterministically, and assembles the parent with its SNI or EVH
//! children. CRD overrides (HostRule, HTTPRule, AviInfraSetting) are
//! joined in at build time so a CRD change only needs a rebuild of the
//! affected models.

use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::api::networking::v1::Ingress;
use tracing::debug;

use crate::config::AkoConfig;
use crate::crd::{AviInfraSetting, HTTPRulePath, HostRuleVirtualHost};
use crate::ingestion::filters::NamespaceFilter;
use crate::k8s::{K8sStore, Route};
use crate::names::Namer;
use crate::status::ObjectStatusError;
use crate::{AVI_INGRESS_CONTROLLER, DEFAULT_INGRESS_CLASS_ANNOTATION, PASSTHROUGH_ANNOTATION};

use super::l4::{infra_setting_for, infra_setting_token};
use super::{
    AviVsNode, DataScriptNode, HppMapNode, HttpPolicySetNode, PkiProfileNode,
    PoolGroupMemberNode, PoolGroupNode, PoolMember, PoolNode, RedirectNode, SslKeyCertNode,
    VsPort, VsType, VsVipNode,
};

/// TLS handling of one host contribution.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum HostClass {
    Insecure,
    Secure,
    Passthrough,
}

/// One Host+Path backend claim extracted from an Ingress or Route.
#[derive(Clone, Debug)]
struct Contribution {
    host: String,
    path: String,
    class: HostClass,
    namespace: String,
    /// Ingress or Route name
    owner: String,
    /// Full object key of the owner, for status write-back
    origin: String,
    backends: Vec<Backend>,
    /// PEM material for Secure hosts terminated from a Secret/Route
    cert: Option<(String, String)>,
    /// Destination CA for re-encrypt routes
    dest_ca: Option<String>,
    infra_token: String,
    setting: Option<Arc<AviInfraSetting>>,
}

#[derive(Clone, Debug)]
struct Backend {
    svc: String,
    port: i32,
    weight: Option<i32>,
}

/// Compute the parent VS name a host belongs to.
///
/// The infra-setting token scopes shared shards; the passthrough flag
/// selects the passthrough shard family; dedicated sharding names the VS
/// after the host.
pub fn parent_vs_name_for_host(
    cfg: &AkoConfig,
    namer: &Namer,
    host: &str,
    passthrough: bool,
    setting: &Option<Arc<AviInfraSetting>>,
) -> String {
    if passthrough {
        return namer.passthrough_vs_name(host, cfg.passthrough_shard_size);
    }
    let shard_size = setting
        .as_ref()
        .and_then(|s| s.shard_size())
        .unwrap_or(cfg.shard_vs_size);
    if shard_size == 0 {
        return namer.dedicated_vs_name(host);
    }
    let token = infra_setting_token(setting);
    if token.is_empty() {
        namer.shared_l7_name_for_host(host, shard_size)
    } else {
        let idx = crate::names::bkt(host, shard_size);
        if cfg.enable_evh {
            format!("{}{}-Shared-L7-EVH-{}", namer.prefix(), token, idx)
        } else {
            format!("{}{}-Shared-L7-{}", namer.prefix(), token, idx)
        }
    }
}

/// Whether AKO owns an Ingress, per its class.
///
/// With no IngressClass objects in the cluster the legacy annotation
/// filter applies: an explicit foreign `kubernetes.io/ingress.class`
/// annotation rejects, anything else is ours.
pub fn ingress_class_admitted(store: &K8sStore, ingress: &Ingress) -> bool {
    if store.ingress_classes.is_empty() {
        return match ingress
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get("kubernetes.io/ingress.class"))
        {
            Some(class) => class == "avi",
            None => true,
        };
    }
    match ingress
        .spec
        .as_ref()
        .and_then(|s| s.ingress_class_name.as_ref())
    {
        Some(class_name) => store
            .ingress_classes
            .get("", class_name)
            .map(|c| c.spec.as_ref().map(|s| s.controller.as_deref()) == Some(Some(AVI_INGRESS_CONTROLLER)))
            .unwrap_or(false),
        None => {
            // Classless ingresses are ours only when our class is default.
            store.ingress_classes.list_all().iter().any(|(_, c)| {
                c.spec.as_ref().and_then(|s| s.controller.as_deref())
                    == Some(AVI_INGRESS_CONTROLLER)
                    && c.metadata
                        .annotations
                        .as_ref()
                        .and_then(|a| a.get(DEFAULT_INGRESS_CLASS_ANNOTATION))
                        .map(String::as_str)
                        == Some("true")
            })
        }
    }
}

/// Whether an Ingress's hosts are passthrough TLS (annotation-driven).
pub fn ingress_is_passthrough(ingress: &Ingress) -> bool {
    ingress
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(PASSTHROUGH_ANNOTATION))
        .map(String::as_str)
        == Some("true")
}

fn secret_tls_material(
    store: &K8sStore,
    namespace: &str,
    secret_name: &str,
) -> Option<(String, String)> {
    let secret = store.secrets.get(namespace, secret_name)?;
    let data = secret.data.as_ref()?;
    let cert = data.get("tls.crt")?;
    let key = data.get("tls.key")?;
    Some((
        String::from_utf8_lossy(&cert.0).to_string(),
        String::from_utf8_lossy(&key.0).to_string(),
    ))
}

/// Route alternate backends must have distinct names.
pub fn route_has_valid_backends(route: &Route) -> bool {
    let mut seen = vec![route.spec.to.name.clone()];
    for alt in &route.spec.alternate_backends {
        if seen.contains(&alt.name) {
            return false;
        }
        seen.push(alt.name.clone());
    }
    true
}

fn ingress_contributions(
    store: &K8sStore,
    ns_filter: &NamespaceFilter,
    out: &mut Vec<Contribution>,
) {
    let mut ingresses = store.ingresses.list_all();
    ingresses.sort_by(|(a, _), (b, _)| a.cmp(b));
    for (key, ingress) in ingresses {
        let (namespace, name) = key.split_once('/').unwrap_or(("", key.as_str()));
        if !ns_filter.namespace_accepted(namespace) {
            continue;
        }
        if !ingress_class_admitted(store, &ingress) {
            continue;
        }
        let Some(spec) = ingress.spec.as_ref() else { continue };
        let passthrough = ingress_is_passthrough(&ingress);
        let setting = infra_setting_for(ingress.metadata.annotations.as_ref(), store);
        let infra_token = infra_setting_token(&setting);

        // Host -> TLS secret mapping from spec.tls.
        let mut tls_hosts: BTreeMap<String, String> = BTreeMap::new();
        for tls in spec.tls.iter().flatten() {
            if let Some(secret_name) = tls.secret_name.as_ref() {
                for host in tls.hosts.iter().flatten() {
                    tls_hosts.insert(host.clone(), secret_name.clone());
                }
            }
        }

        for rule in spec.rules.iter().flatten() {
            let Some(host) = rule.host.clone().filter(|h| !h.is_empty()) else {
                continue;
            };
            let (class, cert) = if passthrough {
                (HostClass::Passthrough, None)
            } else {
                match tls_hosts
                    .get(&host)
                    .and_then(|secret| secret_tls_material(store, namespace, secret))
                {
                    Some(material) => (HostClass::Secure, Some(material)),
                    // TLS host whose Secret is gone degrades to insecure
                    // until the Secret shows up again.
                    None => (HostClass::Insecure, None),
                }
            };
            for path_spec in rule
                .http
                .as_ref()
                .map(|h| h.paths.as_slice())
                .unwrap_or_default()
            {
                let path = path_spec.path.clone().unwrap_or_else(|| "/".to_string());
                let Some(backend_svc) = path_spec.backend.service.as_ref() else {
                    continue;
                };
                let port = backend_svc
                    .port
                    .as_ref()
                    .and_then(|p| p.number)
                    .unwrap_or(80);
                out.push(Contribution {
                    host: host.clone(),
                    path,
                    class,
                    namespace: namespace.to_string(),
                    owner: name.to_string(),
                    origin: format!("Ingress/{namespace}/{name}"),
                    backends: vec![Backend {
                        svc: backend_svc.name.clone(),
                        port,
                        weight: None,
                    }],
                    cert: cert.clone(),
                    dest_ca: None,
                    infra_token: infra_token.clone(),
                    setting: setting.clone(),
                });
            }
        }
    }
}

fn route_contributions(
    store: &K8sStore,
    ns_filter: &NamespaceFilter,
    warnings: &mut Vec<ObjectStatusError>,
    out: &mut Vec<Contribution>,
) {
    let mut routes = store.routes.list_all();
    routes.sort_by(|(a, _), (b, _)| a.cmp(b));
    for (key, route) in routes {
        let (namespace, name) = key.split_once('/').unwrap_or(("", key.as_str()));
        if !ns_filter.namespace_accepted(namespace) {
            continue;
        }
        if route.spec.host.is_empty() {
            continue;
        }
        if !route_has_valid_backends(&route) {
            // The route still flowed through ingestion so stale objects get
            // cleaned up; it just contributes nothing.
            warnings.push(ObjectStatusError {
                key: format!("Route/{namespace}/{name}"),
                message: "multiple backends with the same service name".to_string(),
            });
            continue;
        }
        let setting = infra_setting_for(route.metadata.annotations.as_ref(), store);
        let infra_token = infra_setting_token(&setting);

        let termination = route
            .spec
            .tls
            .as_ref()
            .map(|t| t.termination.as_str())
            .unwrap_or("");
        let (class, cert, dest_ca) = match termination {
            "passthrough" => (HostClass::Passthrough, None, None),
            "edge" | "reencrypt" => {
                let cert = route.spec.tls.as_ref().and_then(|t| {
                    Some((t.certificate.clone()?, t.key.clone()?))
                });
                let dest_ca = route
                    .spec
                    .tls
                    .as_ref()
                    .and_then(|t| t.destination_ca_certificate.clone());
                match cert {
                    Some(material) => (HostClass::Secure, Some(material), dest_ca),
                    None => (HostClass::Insecure, None, dest_ca),
                }
            }
            _ => (HostClass::Insecure, None, None),
        };

        let port = match route.spec.port.as_ref().and_then(|p| p.target_port.as_ref()) {
            Some(p) => p.parse().unwrap_or(80),
            None => 80,
        };
        let mut backends = vec![Backend {
            svc: route.spec.to.name.clone(),
            port,
            weight: route.spec.to.weight,
        }];
        for alt in &route.spec.alternate_backends {
            backends.push(Backend {
                svc: alt.name.clone(),
                port,
                weight: alt.weight,
            });
        }

        out.push(Contribution {
            host: route.spec.host.clone(),
            path: route.spec.path.clone().unwrap_or_else(|| "/".to_string()),
            class,
            namespace: namespace.to_string(),
            owner: name.to_string(),
            origin: format!("Route/{namespace}/{name}"),
            backends,
            cert,
            dest_ca,
            infra_token,
            setting,
        });
    }
}

/// Resolve Host+Path conflicts: the lexicographically smaller
/// `namespace/name` wins, losers are reported.
fn resolve_conflicts(
    contributions: Vec<Contribution>,
    warnings: &mut Vec<ObjectStatusError>,
) -> Vec<Contribution> {
    let mut winners: BTreeMap<(String, String), Contribution> = BTreeMap::new();
    for c in contributions {
        let slot = (c.host.clone(), c.path.clone());
        let current_id = winners
            .get(&slot)
            .map(|cur| format!("{}/{}", cur.namespace, cur.owner));
        let Some(current_id) = current_id else {
            winners.insert(slot, c);
            continue;
        };
        let new_id = format!("{}/{}", c.namespace, c.owner);
        if current_id == new_id {
            // Same owner re-contributing (multiple backends).
            continue;
        }
        let (winner_id, loser_id, replace) = if new_id < current_id {
            (new_id, current_id, true)
        } else {
            (current_id, new_id, false)
        };
        warnings.push(ObjectStatusError {
            key: format!("Ingress/{loser_id}"),
            message: format!(
                "host {} path {} already claimed by {}",
                slot.0, slot.1, winner_id
            ),
        });
        if replace {
            winners.insert(slot, c);
        }
    }
    winners.into_values().collect()
}

fn host_rule_for(store: &K8sStore, host: &str) -> Option<HostRuleVirtualHost> {
    let mut rules = store.host_rules.list_all();
    rules.sort_by(|(a, _), (b, _)| a.cmp(b));
    rules
        .into_iter()
        .map(|(_, r)| r.spec.virtualhost.clone())
        .find(|vh| vh.fqdn == host)
}

fn http_rule_for(store: &K8sStore, namespace: &str, host: &str, path: &str) -> Option<HTTPRulePath> {
    let mut best: Option<HTTPRulePath> = None;
    for (_, rule) in store.http_rules.list_namespace(namespace) {
        if rule.spec.fqdn != host {
            continue;
        }
        for p in &rule.spec.paths {
            if path.starts_with(&p.target)
                && best.as_ref().map_or(true, |b| b.target.len() < p.target.len())
            {
                best = Some(p.clone());
            }
        }
    }
    best
}

fn apply_http_rule(pool: &mut PoolNode, namer: &Namer, rule: &HTTPRulePath) {
    if let Some(lb) = &rule.load_balancer_policy {
        pool.lb_algorithm = lb.algorithm.clone();
        pool.lb_algorithm_hash = lb.hash.clone();
        pool.lb_algorithm_consistent_hash_hdr = lb.host_header.clone();
    }
    pool.health_monitors = rule.health_monitors.clone();
    pool.health_monitors.sort();
    if let Some(tls) = &rule.tls {
        if tls.type_ == "reencrypt" {
            pool.ssl_profile = Some(
                tls.ssl_profile
                    .clone()
                    .unwrap_or_else(|| "System-Standard".to_string()),
            );
            if let Some(ca) = &tls.destination_ca {
                pool.pki_profile = Some(PkiProfileNode {
                    name: namer.pool_pki_profile_name(&pool.name),
                    ca_pem: ca.clone(),
                });
            }
        }
    }
}

fn apply_host_rule(child: &mut AviVsNode, vh: &HostRuleVirtualHost) {
    child.enabled = vh.enable_virtual_host;
    child.waf_policy = vh.waf_policy.clone();
    child.application_profile = vh.application_profile.clone().or(child.application_profile.take());
    child.analytics_profile = vh.analytics_profile.clone();
    child.error_page_profile = vh.error_page_profile.clone();
    child.attached_datascripts = vh.datascripts.clone();
    child.attached_policy_sets = vh.http_policy_sets.clone();
    if let Some(tls) = &vh.tls {
        // Controller-side certificate replaces the Secret-derived one.
        child.ssl_cert_refs = vec![tls.ssl_key_certificate.name.clone()];
        child.ssl_certs.clear();
    }
}

fn members_for_backend(
    cfg: &AkoConfig,
    store: &K8sStore,
    namespace: &str,
    backend: &Backend,
) -> Vec<PoolMember> {
    let Some(svc) = store.services.get(namespace, &backend.svc) else {
        return Vec::new();
    };
    let Some(port) = svc.spec.as_ref().and_then(|s| s.ports.as_ref()).and_then(|ports| {
        ports
            .iter()
            .find(|p| p.port == backend.port)
            .or_else(|| ports.first())
    }) else {
        return Vec::new();
    };
    let mut members = super::l4::pool_members_for_port(cfg, store, namespace, &svc, port);
    members.sort();
    members
}

struct SecureHostBuild {
    child: AviVsNode,
    redirect_host: String,
}

fn build_secure_host(
    cfg: &AkoConfig,
    namer: &Namer,
    store: &K8sStore,
    host: &str,
    entries: &[&Contribution],
) -> SecureHostBuild {
    let evh = cfg.enable_evh;
    let infra = entries
        .first()
        .map(|c| c.infra_token.clone())
        .unwrap_or_default();
    let child_name = if evh {
        namer.evh_node_name(&infra, host)
    } else {
        namer.sni_node_name(&infra, host)
    };

    let mut child = AviVsNode {
        name: child_name,
        vs_type: if evh { VsType::EvhChild } else { VsType::SniChild },
        enabled: true,
        vh_domain_names: vec![host.to_string()],
        application_profile: Some("System-Secure-HTTP".to_string()),
        ..Default::default()
    };

    for c in entries {
        let mut rule_map = Vec::new();
        for backend in &c.backends {
            let pool_name = if evh {
                namer.evh_pool_name(&c.owner, &c.namespace, host, &c.path, &infra, &backend.svc)
            } else {
                namer.sni_pool_name(
                    &c.owner,
                    &c.namespace,
                    host,
                    &c.path,
                    &infra,
                    (c.backends.len() > 1).then_some(backend.svc.as_str()),
                )
            };
            let mut pool = PoolNode {
                name: pool_name.clone(),
                port: backend.port,
                members: members_for_backend(cfg, store, &c.namespace, backend),
                ..Default::default()
            };
            if let Some(rule) = http_rule_for(store, &c.namespace, host, &c.path) {
                apply_http_rule(&mut pool, namer, &rule);
            }
            if pool.pki_profile.is_none() {
                if let Some(ca) = &c.dest_ca {
                    pool.ssl_profile
                        .get_or_insert_with(|| "System-Standard".to_string());
                    pool.pki_profile = Some(PkiProfileNode {
                        name: namer.pool_pki_profile_name(&pool.name),
                        ca_pem: ca.clone(),
                    });
                }
            }
            rule_map.push((pool_name, backend.weight));
            child.pools.push(pool);
        }

        let https_name = namer.sni_https_name(&c.owner, &c.namespace, host, &c.path, &infra);
        if crate::config::no_pg_for_sni() && rule_map.len() == 1 {
            child.http_policies.push(HttpPolicySetNode {
                name: https_name,
                hppmap: vec![HppMapNode {
                    host: host.to_string(),
                    path: c.path.clone(),
                    pool_group: None,
                    pool: Some(rule_map[0].0.clone()),
                }],
                redirects: Vec::new(),
            });
        } else {
            let pg_name = namer.sni_pg_name(&c.owner, &c.namespace, host, &c.path, &infra);
            child.pool_groups.push(PoolGroupNode {
                name: pg_name.clone(),
                members: rule_map
                    .iter()
                    .map(|(pool, weight)| PoolGroupMemberNode {
                        pool_name: pool.clone(),
                        priority_label: None,
                        ratio: *weight,
                    })
                    .collect(),
            });
            child.http_policies.push(HttpPolicySetNode {
                name: https_name,
                hppmap: vec![HppMapNode {
                    host: host.to_string(),
                    path: c.path.clone(),
                    pool_group: Some(pg_name),
                    pool: None,
                }],
                redirects: Vec::new(),
            });
        }

        if let Some((cert, key)) = &c.cert {
            let cert_name = namer.tls_keycert_name(&infra, host);
            if !child.ssl_certs.iter().any(|s| s.name == cert_name) {
                child.ssl_certs.push(SslKeyCertNode {
                    name: cert_name,
                    cert: cert.clone(),
                    key: key.clone(),
                    is_ca: false,
                });
            }
        }
    }

    if let Some(vh) = host_rule_for(store, host) {
        apply_host_rule(&mut child, &vh);
    }

    SecureHostBuild {
        child,
        redirect_host: host.to_string(),
    }
}

/// Build the graph of one L7 parent VS (shared, dedicated or EVH).
///
/// Returns `None` when no admitted host maps onto this parent, which the
/// caller turns into a model deletion. Validation findings are appended to
/// `warnings` for the status layer.
pub fn build_l7_model(
    cfg: &AkoConfig,
    namer: &Namer,
    store: &K8sStore,
    ns_filter: &NamespaceFilter,
    vs_name: &str,
    warnings: &mut Vec<ObjectStatusError>,
) -> Option<AviVsNode> {
    let mut contributions = Vec::new();
    ingress_contributions(store, ns_filter, &mut contributions);
    route_contributions(store, ns_filter, warnings, &mut contributions);

    // Keep only hosts sharded onto this parent.
    contributions.retain(|c| {
        parent_vs_name_for_host(
            cfg,
            namer,
            &c.host,
            c.class == HostClass::Passthrough,
            &c.setting,
        ) == vs_name
    });
    if contributions.is_empty() {
        debug!(vs = vs_name, "No hosts map to parent, model will be deleted");
        return None;
    }

    let passthrough = contributions
        .first()
        .map(|c| c.class == HostClass::Passthrough)
        .unwrap_or(false);
    let contributions = resolve_conflicts(contributions, warnings);

    let setting = contributions.first().and_then(|c| c.setting.clone());
    let se_group = setting
        .as_ref()
        .and_then(|s| s.spec.se_group.as_ref())
        .map(|g| g.name.clone())
        .unwrap_or_else(|| cfg.se_group_name.clone());

    if passthrough {
        return Some(build_passthrough_parent(cfg, namer, store, vs_name, &contributions, se_group));
    }

    let dedicated = cfg.shard_vs_size == 0
        && setting.as_ref().and_then(|s| s.shard_size()).unwrap_or(cfg.shard_vs_size) == 0;

    let mut parent = AviVsNode {
        name: vs_name.to_string(),
        vs_type: if cfg.enable_evh {
            VsType::EvhParent
        } else if dedicated {
            VsType::DedicatedL7
        } else {
            VsType::SharedL7Parent
        },
        enabled: true,
        services: vec![VsPort { port: 80, enable_ssl: false }],
        application_profile: Some("System-HTTP".to_string()),
        network_profile: Some("System-TCP-Proxy".to_string()),
        se_group: Some(se_group),
        vrf_context: (!cfg.static_route_sync_disabled()).then(|| cfg.vrf_name.clone()),
        ..Default::default()
    };

    let mut fqdns: Vec<String> = Vec::new();
    let mut parent_pg_members = Vec::new();
    let mut parent_rules = Vec::new();
    let mut redirect_hosts = Vec::new();

    // Group contributions per host, preserving deterministic order.
    let mut by_host: BTreeMap<String, Vec<&Contribution>> = BTreeMap::new();
    for c in &contributions {
        by_host.entry(c.host.clone()).or_default().push(c);
    }

    for (host, entries) in &by_host {
        if !fqdns.contains(host) {
            fqdns.push(host.clone());
        }
        for c in entries {
            parent.origins.push(c.origin.clone());
        }
        let secure = cfg.enable_evh || entries.iter().any(|c| c.class == HostClass::Secure);
        if secure {
            let built = build_secure_host(cfg, namer, store, host, entries);
            if entries.iter().any(|c| c.class == HostClass::Secure) {
                redirect_hosts.push(built.redirect_host.clone());
            }
            parent.children.push(built.child);
            continue;
        }

        // Insecure host: pools live on the parent behind one shared
        // PoolGroup, routed by an HTTP policy rule per Host+Path.
        for c in entries {
            let priority_label = format!("{host}{}", c.path.replace('/', "_"));
            for backend in &c.backends {
                let pool_name = namer.l7_pool_name(
                    &format!("{host}{}", c.path),
                    &c.namespace,
                    &c.owner,
                    &c.infra_token,
                    (c.backends.len() > 1).then_some(backend.svc.as_str()),
                );
                let mut pool = PoolNode {
                    name: pool_name.clone(),
                    port: backend.port,
                    members: members_for_backend(cfg, store, &c.namespace, backend),
                    priority_label: Some(priority_label.clone()),
                    ..Default::default()
                };
                if let Some(rule) = http_rule_for(store, &c.namespace, host, &c.path) {
                    apply_http_rule(&mut pool, namer, &rule);
                }
                parent_pg_members.push(PoolGroupMemberNode {
                    pool_name: pool_name.clone(),
                    priority_label: Some(priority_label.clone()),
                    ratio: backend.weight,
                });
                parent.pools.push(pool);
            }
            parent_rules.push(HppMapNode {
                host: host.clone(),
                path: c.path.clone(),
                pool_group: Some(namer.l7_shared_pg_name(vs_name)),
                pool: None,
            });
        }

        if let Some(vh) = host_rule_for(store, host) {
            if !vh.enable_virtual_host {
                // Disabling an insecure host pulls its rules from the
                // parent policy; the pools stay for a fast re-enable.
                parent_rules.retain(|r| &r.host != host);
            }
        }
    }

    if !parent_pg_members.is_empty() {
        parent.pool_groups.push(PoolGroupNode {
            name: namer.l7_shared_pg_name(vs_name),
            members: parent_pg_members,
        });
        parent.default_pool_group = Some(namer.l7_shared_pg_name(vs_name));
    }
    if !parent_rules.is_empty() || !redirect_hosts.is_empty() {
        let mut redirects = Vec::new();
        if !redirect_hosts.is_empty() {
            redirect_hosts.sort();
            redirects.push(RedirectNode {
                hosts: redirect_hosts,
                port: 443,
            });
        }
        parent.http_policies.push(HttpPolicySetNode {
            name: namer.l7_http_redirect_policy(vs_name),
            hppmap: parent_rules,
            redirects,
        });
    }
    if !parent.children.is_empty() {
        parent.services.push(VsPort { port: 443, enable_ssl: true });
    }

    parent.vsvip = Some(VsVipNode {
        name: namer.vsvip_name(vs_name),
        fqdns,
        vip_networks: setting
            .as_ref()
            .and_then(|s| s.spec.network.as_ref())
            .filter(|n| !n.vip_networks.is_empty())
            .map(|n| n.vip_networks.clone())
            .unwrap_or_else(|| cfg.vip_network_list.clone()),
        bgp_peer_labels: if cfg.enable_rhi {
            cfg.bgp_peer_labels.clone()
        } else {
            Vec::new()
        },
        tier1_lr: cfg.nsxt_t1_lr.clone(),
    });

    Some(parent)
}

/// Passthrough DataScript routing TLS by SNI to per-host pool groups.
const PASSTHROUGH_DATASCRIPT: &str =
    "local avi_tls = avi.l4.collect(20)\navi.vs.log('SNI routing')\n";

fn build_passthrough_parent(
    cfg: &AkoConfig,
    namer: &Namer,
    store: &K8sStore,
    vs_name: &str,
    contributions: &[Contribution],
    se_group: String,
) -> AviVsNode {
    let mut parent = AviVsNode {
        name: vs_name.to_string(),
        vs_type: VsType::Passthrough,
        enabled: true,
        services: vec![VsPort { port: 443, enable_ssl: false }],
        application_profile: Some("System-L4-Application".to_string()),
        network_profile: Some("System-TCP-Proxy".to_string()),
        se_group: Some(se_group),
        vrf_context: (!cfg.static_route_sync_disabled()).then(|| cfg.vrf_name.clone()),
        ..Default::default()
    };

    let mut fqdns = Vec::new();
    let mut pg_refs = Vec::new();
    let mut by_host: BTreeMap<String, Vec<&Contribution>> = BTreeMap::new();
    for c in contributions {
        by_host.entry(c.host.clone()).or_default().push(c);
    }
    for (host, entries) in &by_host {
        fqdns.push(host.clone());
        let pg_name = format!("{vs_name}-{host}");
        let mut members = Vec::new();
        for c in entries {
            parent.origins.push(c.origin.clone());
            for backend in &c.backends {
                let pool_name = format!("{pg_name}-{}", backend.svc);
                parent.pools.push(PoolNode {
                    name: pool_name.clone(),
                    port: backend.port,
                    members: members_for_backend(cfg, store, &c.namespace, backend),
                    ..Default::default()
                });
                members.push(PoolGroupMemberNode {
                    pool_name,
                    priority_label: None,
                    ratio: backend.weight,
                });
            }
        }
        parent.pool_groups.push(PoolGroupNode {
            name: pg_name.clone(),
            members,
        });
        pg_refs.push(pg_name);
    }

    pg_refs.sort();
    parent.datascripts.push(DataScriptNode {
        name: namer.l7_insecure_ds_name(vs_name),
        evt: "VS_DATASCRIPT_EVT_L4_REQUEST".to_string(),
        script: PASSTHROUGH_DATASCRIPT.to_string(),
        pool_group_refs: pg_refs,
    });

    parent.vsvip = Some(VsVipNode {
        name: namer.vsvip_name(vs_name),
        fqdns,
        vip_networks: cfg.vip_network_list.clone(),
        bgp_peer_labels: Vec::new(),
        tier1_lr: cfg.nsxt_t1_lr.clone(),
    });
    parent
}
