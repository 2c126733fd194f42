//! AKO Custom Resource Definitions
//!
//! Three CRDs tune the generated Avi objects:
//!
//! - [`HostRule`] - VS-level overrides keyed by FQDN
//! - [`HTTPRule`] - pool-level overrides keyed by FQDN + path
//! - [`AviInfraSetting`] - infra scoping (SE group, networks, shard size)
//!   attached via annotation or IngressClass parameters

mod aviinfrasetting;
mod hostrule;
mod httprule;

pub use aviinfrasetting::{
    AviInfraSetting, AviInfraSettingSpec, AviInfraSettingStatus, InfraL7Settings,
    InfraNetworkSettings, InfraSeGroup,
};
pub use hostrule::{HostRule, HostRuleSpec, HostRuleStatus, HostRuleTls, HostRuleVirtualHost};
pub use httprule::{HTTPRule, HTTPRulePath, HTTPRuleSpec, HTTPRuleStatus, LoadBalancerPolicy};

/// CRD acceptance status written back after validation
pub mod status_values {
    /// Spec validated and in effect
    pub const ACCEPTED: &str = "Accepted";
    /// Spec rejected, `error` carries the reason
    pub const REJECTED: &str = "Rejected";
}

fn default_true() -> bool {
    true
}
