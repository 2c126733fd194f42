//! In-memory mirror of the Avi controller's objects
//!
//! The REST layer diffs desired graphs against this cache instead of
//! round-tripping GETs per reconcile. Entries are keyed `(class, tenant,
//! name)` and carry the uuid (for idempotent PUT/DELETE), the content
//! checksum last applied, and - for virtual services - the names of the
//! objects the VS references, so a model can be torn down after its graph
//! is gone.
//!
//! The cache is populated from the controller at boot and re-populated on
//! periodic full sync; successful REST calls keep it current in between.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::avi::client::{get_collection, AviTransport, RestError};
use crate::avi::ObjClass;
use crate::config::AkoConfig;
use crate::names::fnv_hash32;

/// Cache key of one remote object.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Object class
    pub class: ObjClass,
    /// Owning tenant
    pub tenant: String,
    /// Object name
    pub name: String,
}

impl CacheKey {
    /// Convenience constructor.
    pub fn new(class: ObjClass, tenant: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            class,
            tenant: tenant.into(),
            name: name.into(),
        }
    }
}

/// One mirrored object.
#[derive(Clone, Debug, Default)]
pub struct AviCacheEntry {
    /// Controller uuid, used for PUT/DELETE
    pub uuid: String,
    /// Content checksum last applied (or hashed from the controller body
    /// during populate)
    pub checksum: u32,
    /// For VS entries: referenced object names, children included
    pub refs: Vec<CacheKey>,
    /// Whether a VS entry is a VH parent
    pub is_parent: bool,
}

/// Concurrent mirror of remote state.
#[derive(Default)]
pub struct AviObjCache {
    entries: DashMap<CacheKey, AviCacheEntry>,
}

impl AviObjCache {
    /// Fresh empty cache.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fetch one entry.
    pub fn get(&self, key: &CacheKey) -> Option<AviCacheEntry> {
        self.entries.get(key).map(|e| e.value().clone())
    }

    /// Insert or replace an entry.
    pub fn upsert(&self, key: CacheKey, entry: AviCacheEntry) {
        self.entries.insert(key, entry);
    }

    /// Remove an entry.
    pub fn delete(&self, key: &CacheKey) {
        self.entries.remove(key);
    }

    /// Number of mirrored objects.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the mirror is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All parent VS cache keys; full sync reverse-maps models from these.
    pub fn parent_vs_keys(&self) -> Vec<CacheKey> {
        self.entries
            .iter()
            .filter(|e| e.key().class == ObjClass::VirtualService && e.value().is_parent)
            .map(|e| e.key().clone())
            .collect()
    }

    /// Everything reachable from a model's parent VS: the parent entry's
    /// refs, its child VSes and their refs, and the VS keys themselves.
    ///
    /// Used when a model's desired graph is gone and only the cache knows
    /// what to tear down.
    pub fn model_objects(&self, tenant: &str, vs_name: &str) -> Vec<CacheKey> {
        let parent_key = CacheKey::new(ObjClass::VirtualService, tenant, vs_name);
        let mut keys = Vec::new();
        let Some(parent) = self.get(&parent_key) else {
            return keys;
        };
        for r in &parent.refs {
            if r.class == ObjClass::VirtualService {
                // SNI/EVH child: include its own refs too.
                if let Some(child) = self.get(r) {
                    keys.extend(child.refs.iter().cloned());
                }
            }
            keys.push(r.clone());
        }
        keys.push(parent_key);
        keys
    }

    /// Drop every entry (full-sync refresh starts clean).
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Populate from the controller: page through every managed collection
    /// and mirror the objects carrying this cluster's name prefix.
    pub async fn populate(
        &self,
        transport: &dyn AviTransport,
        cfg: &AkoConfig,
    ) -> Result<(), RestError> {
        let prefix = cfg.name_prefix();
        let tenant = &cfg.tenant;
        let mut total = 0usize;
        for class in [
            ObjClass::VsVip,
            ObjClass::SslKeyCert,
            ObjClass::Pool,
            ObjClass::PoolGroup,
            ObjClass::DataScript,
            ObjClass::HttpPolicySet,
            ObjClass::VirtualService,
            ObjClass::VrfContext,
        ] {
            let path = format!("{}?include_name=true", class.path());
            let items = get_collection(transport, tenant, &path).await?;
            for item in items {
                let Some(name) = item.get("name").and_then(Value::as_str) else {
                    continue;
                };
                let ours = match class {
                    // The shared VRF is named after the VRF context, not the
                    // cluster; everything else must carry our prefix.
                    ObjClass::VrfContext => name == cfg.vrf_name,
                    _ => name.starts_with(&prefix),
                };
                if !ours {
                    continue;
                }
                let uuid = item
                    .get("uuid")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                if uuid.is_empty() {
                    warn!(name, class = ?class, "Skipping cache entry without uuid");
                    continue;
                }
                let entry = AviCacheEntry {
                    uuid,
                    checksum: fnv_hash32(&item.to_string()),
                    refs: if class == ObjClass::VirtualService {
                        vs_refs_from_body(&item, tenant)
                    } else {
                        Vec::new()
                    },
                    is_parent: class == ObjClass::VirtualService
                        && item.get("type").and_then(Value::as_str)
                            != Some("VS_TYPE_VH_CHILD"),
                };
                self.upsert(CacheKey::new(class, tenant.clone(), name), entry);
                total += 1;
            }
            debug!(class = ?class, "Cache collection populated");
        }
        info!(objects = total, "Avi object cache populated");
        Ok(())
    }

    /// Full refresh: clear and re-populate.
    pub async fn refresh(
        &self,
        transport: &dyn AviTransport,
        cfg: &AkoConfig,
    ) -> Result<(), RestError> {
        self.clear();
        self.populate(transport, cfg).await
    }
}

/// Extract the object name from a by-name or `#name`-annotated reference.
pub fn name_from_ref(r: &str) -> Option<&str> {
    if let Some((_, name)) = r.rsplit_once('#') {
        return Some(name);
    }
    if let Some((_, name)) = r.split_once("?name=") {
        return Some(name);
    }
    None
}

fn push_ref(refs: &mut Vec<CacheKey>, class: ObjClass, tenant: &str, raw: Option<&str>) {
    if let Some(name) = raw.and_then(name_from_ref) {
        refs.push(CacheKey::new(class, tenant, name));
    }
}

/// Reconstruct a VS entry's reference list from a controller response
/// fetched with `include_name=true`.
fn vs_refs_from_body(body: &Value, tenant: &str) -> Vec<CacheKey> {
    let mut refs = Vec::new();
    push_ref(
        &mut refs,
        ObjClass::VsVip,
        tenant,
        body.get("vsvip_ref").and_then(Value::as_str),
    );
    push_ref(
        &mut refs,
        ObjClass::PoolGroup,
        tenant,
        body.get("pool_group_ref").and_then(Value::as_str),
    );
    push_ref(
        &mut refs,
        ObjClass::Pool,
        tenant,
        body.get("pool_ref").and_then(Value::as_str),
    );
    if let Some(certs) = body.get("ssl_key_and_certificate_refs").and_then(Value::as_array) {
        for c in certs {
            push_ref(&mut refs, ObjClass::SslKeyCert, tenant, c.as_str());
        }
    }
    if let Some(policies) = body.get("http_policies").and_then(Value::as_array) {
        for p in policies {
            push_ref(
                &mut refs,
                ObjClass::HttpPolicySet,
                tenant,
                p.get("http_policy_set_ref").and_then(Value::as_str),
            );
        }
    }
    if let Some(scripts) = body.get("vs_datascripts").and_then(Value::as_array) {
        for s in scripts {
            push_ref(
                &mut refs,
                ObjClass::DataScript,
                tenant,
                s.get("vs_datascript_set_ref").and_then(Value::as_str),
            );
        }
    }
    refs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::avi::client::MockAviTransport;
    use crate::config::VipNetwork;

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

    #[test]
    fn name_from_ref_handles_both_forms() {
        assert_eq!(
            name_from_ref("https://ctrl/api/pool/pool-uuid#c1--red-pool"),
            Some("c1--red-pool")
        );
        assert_eq!(name_from_ref("/api/cloud/?name=Default-Cloud"), Some("Default-Cloud"));
        assert_eq!(name_from_ref("/api/pool/pool-uuid"), None);
    }

    #[test]
    fn model_objects_walks_parent_refs_and_children() {
        let cache = AviObjCache::new();
        let tenant = "admin";
        cache.upsert(
            CacheKey::new(ObjClass::Pool, tenant, "c1--pool-a"),
            AviCacheEntry {
                uuid: "u-pool".to_string(),
                ..Default::default()
            },
        );
        cache.upsert(
            CacheKey::new(ObjClass::VirtualService, tenant, "c1--child"),
            AviCacheEntry {
                uuid: "u-child".to_string(),
                refs: vec![CacheKey::new(ObjClass::Pool, tenant, "c1--pool-a")],
                is_parent: false,
                ..Default::default()
            },
        );
        cache.upsert(
            CacheKey::new(ObjClass::VirtualService, tenant, "c1--Shared-L7-0"),
            AviCacheEntry {
                uuid: "u-parent".to_string(),
                refs: vec![
                    CacheKey::new(ObjClass::VsVip, tenant, "c1--Shared-L7-0"),
                    CacheKey::new(ObjClass::VirtualService, tenant, "c1--child"),
                ],
                is_parent: true,
                ..Default::default()
            },
        );

        let keys = cache.model_objects(tenant, "c1--Shared-L7-0");
        assert!(keys.contains(&CacheKey::new(ObjClass::VsVip, tenant, "c1--Shared-L7-0")));
        assert!(keys.contains(&CacheKey::new(ObjClass::Pool, tenant, "c1--pool-a")));
        assert!(keys.contains(&CacheKey::new(ObjClass::VirtualService, tenant, "c1--child")));
        // Parent VS comes last so reverse-order deletion removes it first.
        assert_eq!(
            keys.last(),
            Some(&CacheKey::new(ObjClass::VirtualService, tenant, "c1--Shared-L7-0"))
        );
    }

    #[tokio::test]
    async fn populate_filters_on_cluster_prefix() {
        let mut mock = MockAviTransport::new();
        mock.expect_get().returning(|_, path| {
            if path.starts_with("virtualservice") {
                Ok(serde_json::json!({
                    "count": 2,
                    "results": [
                        { "name": "c1--Shared-L7-0", "uuid": "vs-1", "type": "VS_TYPE_VH_PARENT" },
                        { "name": "other-cluster--vs", "uuid": "vs-2" }
                    ]
                }))
            } else {
                Ok(serde_json::json!({ "count": 0, "results": [] }))
            }
        });

        let cache = AviObjCache::new();
        cache.populate(&mock, &test_config()).await.unwrap();
        assert_eq!(cache.len(), 1);
        let entry = cache
            .get(&CacheKey::new(ObjClass::VirtualService, "admin", "c1--Shared-L7-0"))
            .unwrap();
        assert_eq!(entry.uuid, "vs-1");
        assert!(entry.is_parent);
    }

    #[tokio::test]
    async fn populate_keeps_the_shared_vrf() {
        let mut mock = MockAviTransport::new();
        mock.expect_get().returning(|_, path| {
            if path.starts_with("vrfcontext") {
                Ok(serde_json::json!({
                    "count": 1,
                    "results": [ { "name": "global", "uuid": "vrf-1" } ]
                }))
            } else {
                Ok(serde_json::json!({ "count": 0, "results": [] }))
            }
        });
        let cache = AviObjCache::new();
        cache.populate(&mock, &test_config()).await.unwrap();
        assert!(cache
            .get(&CacheKey::new(ObjClass::VrfContext, "admin", "global"))
            .is_some());
    }
}
