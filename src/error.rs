//! Error types for the AKO operator
//!
//! Errors are structured with fields to aid debugging in production. Each
//! variant carries the context a log reader needs: object keys, model names
//! and underlying causes.

use thiserror::Error;

use crate::avi::client::RestError;

/// Main error type for AKO operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Boot-time or ConfigMap-driven configuration error
    #[error("configuration error: {message}")]
    Config {
        /// Description of what's invalid
        message: String,
    },

    /// Validation error on a watched object (duplicate backends, port
    /// conflicts, unsupported settings)
    #[error("validation error for {object}: {message}")]
    Validation {
        /// `<kind>/<namespace>/<name>` of the offending object
        object: String,
        /// Description of what's invalid
        message: String,
    },

    /// Avi controller REST error, carrying its retry classification
    #[error("avi rest error for {model}: {source}")]
    Rest {
        /// Model the failed call belongs to
        model: String,
        /// The underlying REST error
        source: RestError,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "graph", "rest", "boot")
        context: String,
    },
}

impl Error {
    /// Create a configuration error with the given message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a validation error for a specific object key
    pub fn validation(object: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            object: object.into(),
            message: msg.into(),
        }
    }

    /// Create a REST error for a model
    pub fn rest(model: impl Into<String>, source: RestError) -> Self {
        Self::Rest {
            model: model.into(),
            source,
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }

    /// Create an internal error with context
    pub fn internal(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Whether the error is worth retrying at all.
    ///
    /// Configuration, validation and serialization errors require a change
    /// of input; REST errors defer to their [`RestError::classify`]
    /// classification; Kubernetes 4xx responses are treated as permanent.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => {
                !matches!(
                    source,
                    kube::Error::Api(ae) if (400..500).contains(&ae.code)
                )
            }
            Error::Config { .. } => false,
            Error::Validation { .. } => false,
            Error::Rest { source, .. } => {
                source.classify() != crate::avi::client::RetryClass::NonRetryable
            }
            Error::Serialization { .. } => false,
            Error::Internal { .. } => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::avi::client::RestError;

    #[test]
    fn validation_errors_are_permanent() {
        let err = Error::validation("Route/default/web", "multiple backends with name app");
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("Route/default/web"));
    }

    #[test]
    fn config_errors_are_permanent() {
        let err = Error::config("vipNetworkList not set");
        assert!(!err.is_retryable());
    }

    #[test]
    fn rest_503_is_retryable() {
        let err = Error::rest("admin/c1--Shared-L7-0", RestError::http(503, "unavailable"));
        assert!(err.is_retryable());
    }

    #[test]
    fn rest_404_is_not_retryable() {
        let err = Error::rest("admin/c1--Shared-L7-0", RestError::http(404, "no such pool"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn internal_errors_are_retryable() {
        let err = Error::internal("rest", "cache entry missing uuid");
        assert!(err.is_retryable());
        assert!(err.to_string().contains("[rest]"));
    }
}
