//! Avi REST transport, session pool and error classification
//!
//! A fixed set of sessions is preconstructed at boot; REST workers pick a
//! session by `FNV-1a(modelName) mod poolSize` so one model keeps reusing
//! the same TCP/TLS state. Everything above the transport is written
//! against [`AviTransport`] so tests can substitute an in-memory fake.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::names::bkt;

/// Error from one REST call against the Avi controller.
#[derive(Clone, Debug, Error)]
pub enum RestError {
    /// The controller answered with a non-success status
    #[error("HTTP {status}: {message}")]
    Http {
        /// HTTP status code
        status: u16,
        /// Response body text
        message: String,
    },
    /// The request never completed (connect, TLS, timeout)
    #[error("network error: {message}")]
    Network {
        /// Transport error text
        message: String,
    },
}

/// Where a failed model goes next.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryClass {
    /// 4xx (minus 401/403/408/429): log, surface to status, drop
    NonRetryable,
    /// 401/403: refresh the auth token, then requeue fast
    Auth,
    /// 408/429/5xx/network: immediate bounded retry
    Fast,
    /// Controller reports the object pending or being deleted
    Slow,
}

impl RestError {
    /// An HTTP-level failure.
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self::Http {
            status,
            message: message.into(),
        }
    }

    /// A transport-level failure (connect, TLS, timeout).
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// HTTP status, `None` for transport failures.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            Self::Network { .. } => None,
        }
    }

    /// Classify into a retry destination.
    pub fn classify(&self) -> RetryClass {
        match self {
            Self::Network { .. } => RetryClass::Fast,
            Self::Http { status: 401 | 403, .. } => RetryClass::Auth,
            Self::Http { status: 408 | 429, .. } => RetryClass::Fast,
            Self::Http { status, .. } if *status >= 500 => RetryClass::Fast,
            Self::Http { message, .. } => {
                // The controller rejects mutations of objects it is still
                // converging with a 4xx carrying these phrases.
                let msg = message.to_ascii_lowercase();
                if msg.contains("pending") || msg.contains("being deleted") {
                    RetryClass::Slow
                } else {
                    RetryClass::NonRetryable
                }
            }
        }
    }
}

/// Typed object store view of the Avi controller.
///
/// One implementation per session; the REST layer only sees this trait.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AviTransport: Send + Sync {
    /// GET a single page; `path` is relative to `/api/` and may carry a
    /// query string.
    async fn get(&self, tenant: &str, path: &str) -> Result<Value, RestError>;

    /// POST a new object to a collection.
    async fn post(&self, tenant: &str, path: &str, body: Value) -> Result<Value, RestError>;

    /// PUT an object by uuid (idempotent update).
    async fn put(
        &self,
        tenant: &str,
        path: &str,
        uuid: &str,
        body: Value,
    ) -> Result<Value, RestError>;

    /// DELETE an object by uuid.
    async fn delete(&self, tenant: &str, path: &str, uuid: &str) -> Result<(), RestError>;
}

/// GET every page of a collection, following `next` links.
pub async fn get_collection(
    transport: &dyn AviTransport,
    tenant: &str,
    path: &str,
) -> Result<Vec<Value>, RestError> {
    let mut results = Vec::new();
    let mut page = 1u32;
    loop {
        let sep = if path.contains('?') { '&' } else { '?' };
        let paged = format!("{path}{sep}page_size=100&page={page}");
        let body = transport.get(tenant, &paged).await?;
        let count = body.get("count").and_then(Value::as_u64).unwrap_or(0);
        if let Some(items) = body.get("results").and_then(Value::as_array) {
            results.extend(items.iter().cloned());
        }
        if body.get("next").and_then(Value::as_str).is_none()
            || results.len() as u64 >= count
        {
            return Ok(results);
        }
        page += 1;
    }
}

/// Credentials read from the `avi-secret`.
#[derive(Clone, Debug, Default)]
pub struct AviCredentials {
    /// Controller username
    pub username: String,
    /// Password auth, mutually exclusive with `authtoken`
    pub password: Option<String>,
    /// Token auth
    pub authtoken: Option<String>,
    /// Optional PEM CA bundle to verify the controller
    pub ca_data: Option<String>,
}

impl AviCredentials {
    /// Whether token auth is in use (drives the refresh timer).
    pub fn uses_token(&self) -> bool {
        self.authtoken.as_deref().is_some_and(|t| !t.is_empty())
    }
}

/// One authenticated HTTPS session to the controller.
pub struct AviSession {
    http: reqwest::Client,
    base: String,
    credentials: AviCredentials,
    api_version: String,
}

impl AviSession {
    /// Build a session against `controller_ip`.
    ///
    /// Without CA data in the secret the controller's self-signed
    /// certificate is accepted, matching the original operator.
    pub fn new(controller_ip: &str, credentials: AviCredentials) -> Result<Self, RestError> {
        let mut builder = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10));
        match &credentials.ca_data {
            Some(pem) => {
                let cert = reqwest::Certificate::from_pem(pem.as_bytes())
                    .map_err(|e| RestError::network(format!("invalid CA certificate: {e}")))?;
                builder = builder.add_root_certificate(cert);
            }
            None => {
                builder = builder.danger_accept_invalid_certs(true);
            }
        }
        let http = builder
            .build()
            .map_err(|e| RestError::network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            base: format!("https://{controller_ip}/api"),
            credentials,
            api_version: "20.1.1".to_string(),
        })
    }

    fn request(
        &self,
        method: reqwest::Method,
        tenant: &str,
        path: &str,
    ) -> reqwest::RequestBuilder {
        let mut req = self
            .http
            .request(method, format!("{}/{}", self.base, path))
            .header("X-Avi-Tenant", tenant)
            .header("X-Avi-Version", &self.api_version);
        if let Some(token) = &self.credentials.authtoken {
            req = req.basic_auth(&self.credentials.username, Some(token));
        } else {
            req = req.basic_auth(
                &self.credentials.username,
                self.credentials.password.as_deref(),
            );
        }
        req
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> Result<reqwest::Response, RestError> {
        let resp = req
            .send()
            .await
            .map_err(|e| RestError::network(e.to_string()))?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(RestError::http(status.as_u16(), body))
    }

    /// Discover the controller cluster UUID (`/api/cluster`).
    pub async fn cluster_uuid(&self) -> Result<String, RestError> {
        let body = self.get("admin", "cluster").await?;
        body.get("uuid")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| RestError::network("cluster response missing uuid"))
    }
}

#[async_trait]
impl AviTransport for AviSession {
    async fn get(&self, tenant: &str, path: &str) -> Result<Value, RestError> {
        let resp = self.send(self.request(reqwest::Method::GET, tenant, path)).await?;
        resp.json().await.map_err(|e| RestError::network(e.to_string()))
    }

    async fn post(&self, tenant: &str, path: &str, body: Value) -> Result<Value, RestError> {
        debug!(tenant, path, "POST");
        let resp = self
            .send(self.request(reqwest::Method::POST, tenant, path).json(&body))
            .await?;
        resp.json().await.map_err(|e| RestError::network(e.to_string()))
    }

    async fn put(
        &self,
        tenant: &str,
        path: &str,
        uuid: &str,
        body: Value,
    ) -> Result<Value, RestError> {
        debug!(tenant, path, uuid, "PUT");
        let resp = self
            .send(
                self.request(reqwest::Method::PUT, tenant, &format!("{path}/{uuid}"))
                    .json(&body),
            )
            .await?;
        resp.json().await.map_err(|e| RestError::network(e.to_string()))
    }

    async fn delete(&self, tenant: &str, path: &str, uuid: &str) -> Result<(), RestError> {
        debug!(tenant, path, uuid, "DELETE");
        self.send(self.request(reqwest::Method::DELETE, tenant, &format!("{path}/{uuid}")))
            .await?;
        Ok(())
    }
}

/// Fixed pool of sessions, picked by model name hash.
pub struct AviClientPool {
    sessions: Vec<Arc<dyn AviTransport>>,
}

impl AviClientPool {
    /// Build a pool of `size` real sessions.
    pub fn connect(
        controller_ip: &str,
        credentials: &AviCredentials,
        size: u32,
    ) -> Result<Arc<Self>, RestError> {
        let mut sessions: Vec<Arc<dyn AviTransport>> = Vec::new();
        for _ in 0..size.max(1) {
            sessions.push(Arc::new(AviSession::new(controller_ip, credentials.clone())?));
        }
        Ok(Arc::new(Self { sessions }))
    }

    /// Build a pool over arbitrary transports (tests).
    pub fn from_transports(sessions: Vec<Arc<dyn AviTransport>>) -> Arc<Self> {
        assert!(!sessions.is_empty(), "client pool cannot be empty");
        Arc::new(Self { sessions })
    }

    /// Session for a model, stable across calls.
    pub fn client_for(&self, model_name: &str) -> Arc<dyn AviTransport> {
        let idx = bkt(model_name, self.sessions.len() as u32) as usize;
        Arc::clone(&self.sessions[idx])
    }

    /// Any session, for calls with no model affinity (cache populate).
    pub fn any(&self) -> Arc<dyn AviTransport> {
        Arc::clone(&self.sessions[0])
    }

    /// Pool size.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether the pool is empty (never true for a constructed pool).
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// Fetch the controller's auth tokens, minting and returning a fresh one
/// when the current token is close to expiry.
///
/// Returns `Some(new_token)` when rotation happened. The caller writes the
/// token back into the `avi-secret` and deletes the old one.
pub async fn refresh_auth_token(
    transport: &dyn AviTransport,
    current_token: &str,
) -> Result<Option<String>, RestError> {
    let tokens = get_collection(transport, "admin", "user-token").await?;
    let current = tokens.iter().find(|t| {
        t.get("token").and_then(Value::as_str) == Some(current_token)
    });
    let Some(current) = current else {
        warn!("Current auth token not found on controller, minting a new one");
        let resp = transport
            .post("admin", "user-token", serde_json::json!({"hours": 24}))
            .await?;
        return Ok(resp.get("token").and_then(Value::as_str).map(str::to_string));
    };
    // Rotate when under 6 hours of validity remain.
    let hours_left = current
        .get("expires_in_hours")
        .and_then(Value::as_f64)
        .unwrap_or(0.0);
    if hours_left > 6.0 {
        debug!(hours_left, "Skipping auth token refresh");
        return Ok(None);
    }
    let resp = transport
        .post("admin", "user-token", serde_json::json!({"hours": 24}))
        .await?;
    let new_token = resp
        .get("token")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| RestError::network("token response missing token"))?;
    if let Some(uuid) = current.get("uuid").and_then(Value::as_str) {
        if let Err(e) = transport.delete("admin", "user-token", uuid).await {
            warn!(error = %e, "Failed to delete old auth token");
        }
    }
    Ok(Some(new_token))
}
