//! Tracing initialization with runtime log-level updates
//!
//! AKO reads its log level from the `logLevel` key of the AKO ConfigMap and
//! the level can be changed while the process runs. The subscriber is built
//! once at boot with a reloadable `EnvFilter`; ConfigMap updates go through
//! [`LogLevelHandle::set_level`].

use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::reload;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Errors that can occur during telemetry initialization
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Failed to install the tracing subscriber
    #[error("failed to initialize tracing subscriber: {0}")]
    SubscriberInit(String),
}

/// Handle for retargeting the log filter at runtime
#[derive(Clone)]
pub struct LogLevelHandle {
    reload: reload::Handle<EnvFilter, tracing_subscriber::Registry>,
}

impl LogLevelHandle {
    /// Apply a ConfigMap `logLevel` value (INFO|WARN|DEBUG|ERROR).
    ///
    /// Unrecognised values are ignored with a warning so a typo in the
    /// ConfigMap never silences the process.
    pub fn set_level(&self, level: &str) {
        let directive = match level {
            "INFO" => "info",
            "WARN" => "warn",
            "DEBUG" => "debug",
            "ERROR" => "error",
            other => {
                tracing::warn!(level = %other, "Unrecognised logLevel, keeping current filter");
                return;
            }
        };
        let filter = EnvFilter::new(format!("{directive},kube=info,hyper=warn,tower=warn"));
        if let Err(e) = self.reload.reload(filter) {
            tracing::warn!(error = %e, "Failed to reload log filter");
        } else {
            tracing::info!(level = %level, "Log level updated");
        }
    }
}

/// Initialize tracing with a reloadable env filter.
///
/// `RUST_LOG` wins when set; otherwise the default filter matches the
/// ConfigMap default of INFO with noisy dependencies capped.
pub fn init_telemetry() -> Result<LogLevelHandle, TelemetryError> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,kube=info,hyper=warn,tower=warn"));

    let (filter_layer, reload_handle) = reload::Layer::new(env_filter);

    let fmt_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_current_span(false)
        .with_target(true);

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| TelemetryError::SubscriberInit(e.to_string()))?;

    Ok(LogLevelHandle {
        reload: reload_handle,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_telemetry_is_idempotent_enough_for_tests() {
        // First call may succeed or fail depending on test ordering; a
        // second call must fail cleanly rather than panic.
        let _ = init_telemetry();
        let second = init_telemetry();
        assert!(second.is_err() || second.is_ok());
    }
}
