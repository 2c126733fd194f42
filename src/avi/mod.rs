//! Avi controller REST interface
//!
//! [`client`] holds the transport trait, the reqwest session pool and the
//! error classification the retry layers key off. [`models`] holds the wire
//! DTOs the REST layer serializes graph nodes into.

pub mod client;
pub mod models;

/// Avi object classes AKO manages, with their REST collection paths.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[allow(missing_docs)]
pub enum ObjClass {
    VsVip,
    SslKeyCert,
    Pool,
    PoolGroup,
    DataScript,
    HttpPolicySet,
    VirtualService,
    VrfContext,
}

impl ObjClass {
    /// REST collection path under `/api/`.
    pub fn path(&self) -> &'static str {
        match self {
            Self::VsVip => "vsvip",
            Self::SslKeyCert => "sslkeyandcertificate",
            Self::Pool => "pool",
            Self::PoolGroup => "poolgroup",
            Self::DataScript => "vsdatascriptset",
            Self::HttpPolicySet => "httppolicyset",
            Self::VirtualService => "virtualservice",
            Self::VrfContext => "vrfcontext",
        }
    }

    /// Creation/update order: dependencies before dependents.
    /// Deletions run in reverse.
    pub const APPLY_ORDER: [ObjClass; 7] = [
        Self::VsVip,
        Self::SslKeyCert,
        Self::Pool,
        Self::PoolGroup,
        Self::DataScript,
        Self::HttpPolicySet,
        Self::VirtualService,
    ];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_order_puts_vs_last() {
        assert_eq!(ObjClass::APPLY_ORDER.first(), Some(&ObjClass::VsVip));
        assert_eq!(ObjClass::APPLY_ORDER.last(), Some(&ObjClass::VirtualService));
    }

    #[test]
    fn paths_are_collection_names() {
        assert_eq!(ObjClass::VirtualService.path(), "virtualservice");
        assert_eq!(ObjClass::SslKeyCert.path(), "sslkeyandcertificate");
    }
}
