//! Deterministic Avi object naming
//!
//! Every object AKO creates on the controller is named from the cluster
//! prefix plus the Kubernetes identifiers that produced it, so a restart
//! regenerates byte-identical names. When Enhanced Virtual Hosting is on,
//! names beyond the prefix are the hex SHA-1 of the raw name to stay inside
//! controller limits without truncation.

use sha1::{Digest, Sha1};
use tracing::{info, warn};

use crate::config::AkoConfig;
use crate::AVI_OBJ_NAME_MAX_LENGTH;

/// 32-bit FNV-1a. The bucketing primitive for queue sharding and shard VS
/// selection; must stay stable across versions because shard VS names
/// embed its output.
pub fn fnv_hash32(s: &str) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for byte in s.as_bytes() {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

/// Bucket index for a locality key: `FNV-1a(s) mod n`, 0 when n is 0.
pub fn bkt(s: &str, n: u32) -> u32 {
    if n == 0 {
        return 0;
    }
    fnv_hash32(s) % n
}

/// Log when a generated name exceeds the controller limit.
///
/// Returns true when the name is overlong. The name is still used; the
/// controller enforces the final limit.
pub fn check_name_length(name: &str, obj_type: &str) -> bool {
    if name.len() > AVI_OBJ_NAME_MAX_LENGTH {
        warn!(
            obj_type,
            name,
            limit = AVI_OBJ_NAME_MAX_LENGTH,
            "Object name exceeds maximum length limit for Avi object"
        );
        return true;
    }
    false
}

/// Name factory bound to one cluster's settings.
#[derive(Clone, Debug)]
pub struct Namer {
    prefix: String,
    evh: bool,
    advanced_l4: bool,
}

impl Namer {
    /// Build a namer from the bootstrap configuration.
    pub fn new(cfg: &AkoConfig) -> Self {
        Self {
            prefix: cfg.name_prefix(),
            evh: cfg.enable_evh,
            advanced_l4: cfg.advanced_l4,
        }
    }

    /// The `<clusterName>--` prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Apply the EVH encoding policy to a raw name.
    ///
    /// Outside EVH (or in advanced L4) names pass through unchanged; with
    /// EVH the name becomes `<prefix><sha1-hex>`.
    pub fn encode(&self, raw: &str, obj_type: &str) -> String {
        if !self.evh || self.advanced_l4 {
            check_name_length(raw, obj_type);
            return raw.to_string();
        }
        let digest = Sha1::digest(raw.as_bytes());
        let encoded = format!("{}{}", self.prefix, hex_encode(&digest));
        check_name_length(&encoded, obj_type);
        encoded
    }

    // ----- L4 names -----

    /// VS name of an L4 LoadBalancer Service
    pub fn l4_vs_name(&self, namespace: &str, svc: &str) -> String {
        self.encode(&format!("{}{}-{}", self.prefix, namespace, svc), "L4VS")
    }

    /// VSVIP of an L4 VS
    pub fn l4_vsvip_name(&self, namespace: &str, svc: &str) -> String {
        self.encode(&format!("{}{}-{}", self.prefix, namespace, svc), "L4VSVip")
    }

    /// Pool of one L4 service port
    pub fn l4_pool_name(&self, namespace: &str, svc: &str, port: i32) -> String {
        self.encode(
            &format!("{}{}-{}--{}", self.prefix, namespace, svc, port),
            "L4Pool",
        )
    }

    /// Pool of one advanced-L4 gateway listener
    pub fn adv_l4_pool_name(&self, namespace: &str, svc: &str, gw: &str, port: i32) -> String {
        self.encode(
            &format!("{}{}-{}-{}--{}", self.prefix, namespace, svc, gw, port),
            "L4AdvPool",
        )
    }

    // ----- shared L7 names -----

    /// Shared L7 parent VS of a shard index
    pub fn shared_l7_name(&self, idx: u32) -> String {
        if self.evh {
            format!("{}Shared-L7-EVH-{}", self.prefix, idx)
        } else {
            format!("{}Shared-L7-{}", self.prefix, idx)
        }
    }

    /// Shared L7 parent VS for a hostname, selected by shard hash
    pub fn shared_l7_name_for_host(&self, host: &str, shard_size: u32) -> String {
        self.shared_l7_name(bkt(host, shard_size))
    }

    /// Dedicated (per-hostname) parent VS
    pub fn dedicated_vs_name(&self, host: &str) -> String {
        self.encode(&format!("{}{}", self.prefix, host), "DedicatedVS")
    }

    /// Passthrough shard parent VS for a hostname
    pub fn passthrough_vs_name(&self, host: &str, shard_size: u32) -> String {
        let vs_num = bkt(host, shard_size);
        let name = format!("{}Shared-Passthrough-{}", self.prefix, vs_num);
        info!(host, name = %name, "Passthrough shard VS selected");
        name
    }

    /// VSVIP of a shared/dedicated L7 VS (same name as the VS)
    pub fn vsvip_name(&self, vs_name: &str) -> String {
        check_name_length(vs_name, "VSVip");
        vs_name.to_string()
    }

    /// The shared parent's insecure-traffic DataScript
    pub fn l7_insecure_ds_name(&self, vs_name: &str) -> String {
        check_name_length(vs_name, "DataScript");
        vs_name.to_string()
    }

    /// The shared parent's PoolGroup
    pub fn l7_shared_pg_name(&self, vs_name: &str) -> String {
        check_name_length(vs_name, "PoolGroup");
        vs_name.to_string()
    }

    /// HTTP-to-HTTPS redirect policy of a parent VS
    pub fn l7_http_redirect_policy(&self, vs_name: &str) -> String {
        check_name_length(vs_name, "HTTPRedirectPolicy");
        vs_name.to_string()
    }

    /// Pool of one Host+Path rule under a shared parent
    pub fn l7_pool_name(
        &self,
        priority_label: &str,
        namespace: &str,
        ing_name: &str,
        infra_setting: &str,
        svc_name: Option<&str>,
    ) -> String {
        let priority_label = priority_label.replace('/', "_");
        let mut pool_name = if infra_setting.is_empty() {
            format!("{}{}-{}-{}", self.prefix, priority_label, namespace, ing_name)
        } else {
            format!(
                "{}{}-{}-{}-{}",
                self.prefix, infra_setting, priority_label, namespace, ing_name
            )
        };
        if let Some(svc) = svc_name {
            pool_name = format!("{pool_name}-{svc}");
        }
        self.encode(&pool_name, "Pool")
    }

    // ----- SNI child names -----

    /// SNI child VS of a TLS hostname
    pub fn sni_node_name(&self, infra_setting: &str, host: &str) -> String {
        let mut prefix = self.prefix.clone();
        if !infra_setting.is_empty() {
            prefix = format!("{prefix}{infra_setting}-");
        }
        self.encode(&format!("{prefix}{host}"), "SNIVS")
    }

    /// Pool of one Host+Path under an SNI child
    pub fn sni_pool_name(
        &self,
        ing_name: &str,
        namespace: &str,
        host: &str,
        path: &str,
        infra_setting: &str,
        svc_name: Option<&str>,
    ) -> String {
        let path = path.replace('/', "_");
        let mut pool_name = if infra_setting.is_empty() {
            format!("{}{}-{}{}-{}", self.prefix, namespace, host, path, ing_name)
        } else {
            format!(
                "{}{}-{}-{}{}-{}",
                self.prefix, infra_setting, namespace, host, path, ing_name
            )
        };
        if let Some(svc) = svc_name {
            pool_name = format!("{pool_name}-{svc}");
        }
        check_name_length(&pool_name, "Pool");
        pool_name
    }

    /// PoolGroup of one Host+Path under an SNI child
    pub fn sni_pg_name(
        &self,
        ing_name: &str,
        namespace: &str,
        host: &str,
        path: &str,
        infra_setting: &str,
    ) -> String {
        let path = path.replace('/', "_");
        let name = if infra_setting.is_empty() {
            format!("{}{}-{}{}-{}", self.prefix, namespace, host, path, ing_name)
        } else {
            format!(
                "{}{}-{}-{}{}-{}",
                self.prefix, infra_setting, namespace, host, path, ing_name
            )
        };
        check_name_length(&name, "PoolGroup");
        name
    }

    /// HTTP policy set of one Host+Path under an SNI child
    pub fn sni_https_name(
        &self,
        ing_name: &str,
        namespace: &str,
        host: &str,
        path: &str,
        infra_setting: &str,
    ) -> String {
        let path = path.replace('/', "_");
        if infra_setting.is_empty() {
            self.encode(
                &format!("{}{}-{}{}-{}", self.prefix, namespace, host, path, ing_name),
                "HTTPPS",
            )
        } else {
            self.encode(
                &format!(
                    "{}{}-{}-{}{}-{}",
                    self.prefix, infra_setting, namespace, host, path, ing_name
                ),
                "HTTPPS",
            )
        }
    }

    // ----- EVH child names -----

    /// EVH child VS of a hostname
    pub fn evh_node_name(&self, infra_setting: &str, host: &str) -> String {
        if infra_setting.is_empty() {
            self.encode(&format!("{}{}", self.prefix, host), "EVHVS")
        } else {
            self.encode(&format!("{}{}-{}", self.prefix, infra_setting, host), "EVHVS")
        }
    }

    /// Pool of one Host+Path+Service under an EVH child
    pub fn evh_pool_name(
        &self,
        ing_name: &str,
        namespace: &str,
        host: &str,
        path: &str,
        infra_setting: &str,
        svc_name: &str,
    ) -> String {
        let path = path.replace('/', "_");
        let mut prefix = self.prefix.clone();
        if !infra_setting.is_empty() {
            prefix = format!("{prefix}{infra_setting}-");
        }
        self.encode(
            &format!("{prefix}{namespace}-{host}{path}-{ing_name}-{svc_name}"),
            "Pool",
        )
    }

    // ----- certificates -----

    /// SSL key-and-certificate object of a TLS hostname
    pub fn tls_keycert_name(&self, infra_setting: &str, host: &str) -> String {
        let mut prefix = self.prefix.clone();
        if !infra_setting.is_empty() {
            prefix = format!("{prefix}{infra_setting}-");
        }
        self.encode(&format!("{prefix}{host}"), "TLSKeyCert")
    }

    /// CA certificate object paired with a TLS hostname
    pub fn ca_cert_name(&self, infra_setting: &str, host: &str) -> String {
        let mut prefix = self.prefix.clone();
        if !infra_setting.is_empty() {
            prefix = format!("{prefix}{infra_setting}-");
        }
        self.encode(&format!("{prefix}{host}-cacert"), "CACert")
    }

    /// PKI profile attached to a re-encrypt pool
    pub fn pool_pki_profile_name(&self, pool_name: &str) -> String {
        self.encode(&format!("{pool_name}-pkiprofile"), "PKIProfile")
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
