//! AppRole session against a Vault-compatible secret backend
//!
//! The session token is kept alive by a background task that renews it at
//! roughly 80% of its lease and logs in again when renewal is refused. The
//! task stops when the owning [`AppRoleClient`] is closed or dropped.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[cfg(test)]
use mockall::automock;

use crate::retry::Backoff;
use crate::Error;

/// Renew no later than this long before the lease ends
const MIN_RENEW_BEFORE: Duration = Duration::from_secs(10);

/// Delay used when the lease is already too short to schedule ahead
const MIN_RENEW_WAIT: Duration = Duration::from_secs(1);

/// Retry schedule after both renewal and login failed
const FAILED_LOGIN_RETRY: Backoff = Backoff {
    max_attempts: 0,
    initial_delay: Duration::from_secs(5),
    max_delay: Duration::from_secs(60),
    multiplier: 2.0,
};

/// Timeout for secret backend requests
const BACKEND_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Role id and secret id for AppRole login
#[derive(Clone, PartialEq, Eq)]
pub struct AppRoleCredentials {
    /// Role id
    pub role_id: String,
    /// Secret id
    pub secret_id: String,
}

impl AppRoleCredentials {
    /// Create AppRole credentials
    pub fn new(role_id: impl Into<String>, secret_id: impl Into<String>) -> Self {
        Self {
            role_id: role_id.into(),
            secret_id: secret_id.into(),
        }
    }
}

impl std::fmt::Debug for AppRoleCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppRoleCredentials")
            .field("role_id", &self.role_id)
            .field("secret_id", &"<redacted>")
            .finish()
    }
}

/// Authenticated secret backend session
#[derive(Clone, PartialEq, Eq)]
pub struct AppRoleSession {
    /// Token sent with every backend request
    pub client_token: String,
    /// Remaining lease when the session was issued or renewed
    pub lease_ttl: Duration,
    /// Whether the backend allows renewing the token
    pub renewable: bool,
}

impl std::fmt::Debug for AppRoleSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppRoleSession")
            .field("lease_ttl", &self.lease_ttl)
            .field("renewable", &self.renewable)
            .finish_non_exhaustive()
    }
}

/// Operations the AppRole client needs from the secret backend
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SecretBackend: Send + Sync {
    /// AppRole login
    async fn login(&self, credentials: &AppRoleCredentials) -> Result<AppRoleSession, Error>;

    /// Renew the given token, asking for `increment` more lease
    async fn renew_self(&self, token: &str, increment: Duration)
        -> Result<AppRoleSession, Error>;

    /// Read a KV v2 secret as a flat string map
    async fn read_kv(
        &self,
        token: &str,
        mount: &str,
        path: &str,
    ) -> Result<HashMap<String, String>, Error>;
}

/// Cancellable sleep
#[async_trait]
pub trait Sleeper: Send + Sync {
    /// Wait for `duration` or until `cancel` fires; false when cancelled
    async fn sleep(&self, duration: Duration, cancel: &CancellationToken) -> bool;
}

/// [`Sleeper`] backed by the tokio timer
#[derive(Clone, Copy, Debug, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration, cancel: &CancellationToken) -> bool {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }
}

/// How long to wait before renewing a lease of `ttl`
pub fn renewal_delay(ttl: Duration) -> Duration {
    let renew_before = (ttl / 5).max(MIN_RENEW_BEFORE);
    match ttl.checked_sub(renew_before) {
        Some(wait) if !wait.is_zero() => wait,
        _ => MIN_RENEW_WAIT,
    }
}

/// Per-tenant secret reads
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Read the secret stored at `path`
    async fn read_secret(
        &self,
        path: &str,
        cancel: &CancellationToken,
    ) -> Result<HashMap<String, String>, Error>;
}

/// Logged-in AppRole client with background token renewal
pub struct AppRoleClient {
    backend: Arc<dyn SecretBackend>,
    kv_mount: String,
    session: Arc<Mutex<AppRoleSession>>,
    cancel: CancellationToken,
    renewal: Mutex<Option<JoinHandle<()>>>,
}

impl AppRoleClient {
    /// Log in and start the renewal task
    pub async fn connect(
        backend: Arc<dyn SecretBackend>,
        credentials: AppRoleCredentials,
        kv_mount: impl Into<String>,
        sleeper: Arc<dyn Sleeper>,
    ) -> Result<Self, Error> {
        let session = backend.login(&credentials).await?;
        info!(
            ttl_secs = session.lease_ttl.as_secs(),
            renewable = session.renewable,
            "logged in to secret backend"
        );

        let session = Arc::new(Mutex::new(session));
        let cancel = CancellationToken::new();
        let renewal = tokio::spawn(renewal_loop(
            backend.clone(),
            credentials,
            session.clone(),
            sleeper,
            cancel.clone(),
        ));

        Ok(Self {
            backend,
            kv_mount: kv_mount.into(),
            session,
            cancel,
            renewal: Mutex::new(Some(renewal)),
        })
    }

    /// Snapshot of the current session
    pub fn session(&self) -> AppRoleSession {
        self.session.lock().clone()
    }

    /// Stop the renewal task
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// Stop the renewal task and wait for it to exit
    pub async fn shutdown(&self) {
        self.close();
        let handle = self.renewal.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "secret backend renewal task ended abnormally");
            }
        }
    }
}

impl Drop for AppRoleClient {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[async_trait]
impl SecretStore for AppRoleClient {
    async fn read_secret(
        &self,
        path: &str,
        cancel: &CancellationToken,
    ) -> Result<HashMap<String, String>, Error> {
        let token = self.session.lock().client_token.clone();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            secret = self.backend.read_kv(&token, &self.kv_mount, path) => secret,
        }
    }
}

async fn renewal_loop(
    backend: Arc<dyn SecretBackend>,
    credentials: AppRoleCredentials,
    session: Arc<Mutex<AppRoleSession>>,
    sleeper: Arc<dyn Sleeper>,
    cancel: CancellationToken,
) {
    let mut failures = 0u32;
    loop {
        let current = session.lock().clone();
        let mut wait = renewal_delay(current.lease_ttl);
        if failures > 0 {
            wait = wait.min(FAILED_LOGIN_RETRY.delay_for(failures));
        }
        debug!(wait_secs = wait.as_secs(), failures, "next secret backend renewal scheduled");

        if !sleeper.sleep(wait, &cancel).await {
            debug!("secret backend renewal task stopped");
            return;
        }

        let renewed = if current.renewable {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                renewed = backend.renew_self(&current.client_token, current.lease_ttl) => renewed,
            }
        } else {
            Err(Error::secret_backend("token is not renewable"))
        };

        let next = match renewed {
            Ok(next) => {
                info!(ttl_secs = next.lease_ttl.as_secs(), "renewed secret backend token");
                Ok(next)
            }
            Err(e) => {
                warn!(error = %e, "secret backend token renewal failed, logging in again");
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return,
                    login = backend.login(&credentials) => login,
                }
            }
        };

        match next {
            Ok(mut next) => {
                if next.client_token.is_empty() {
                    next.client_token = current.client_token;
                }
                *session.lock() = next;
                failures = 0;
            }
            Err(e) => {
                failures = failures.saturating_add(1);
                error!(error = %e, failures, "secret backend login failed, keeping previous token");
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct AuthEnvelope {
    auth: Option<AuthBlock>,
}

#[derive(Debug, Deserialize)]
struct AuthBlock {
    client_token: String,
    #[serde(default)]
    lease_duration: u64,
    #[serde(default)]
    renewable: bool,
}

impl From<AuthBlock> for AppRoleSession {
    fn from(auth: AuthBlock) -> Self {
        Self {
            client_token: auth.client_token,
            lease_ttl: Duration::from_secs(auth.lease_duration),
            renewable: auth.renewable,
        }
    }
}

#[derive(Debug, Deserialize)]
struct KvEnvelope {
    data: Option<KvData>,
}

#[derive(Debug, Deserialize)]
struct KvData {
    data: Option<HashMap<String, serde_json::Value>>,
}

/// Vault HTTP API implementation of [`SecretBackend`]
#[derive(Clone, Debug)]
pub struct VaultHttpBackend {
    client: reqwest::Client,
    address: String,
    role_path: String,
    namespace: Option<String>,
}

impl VaultHttpBackend {
    /// Create a backend for the server at `address`
    pub fn new(
        address: &str,
        role_path: impl Into<String>,
        namespace: Option<String>,
    ) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .timeout(BACKEND_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::secret_backend(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            address: address.trim_end_matches('/').to_string(),
            role_path: role_path.into().trim_matches('/').to_string(),
            namespace: namespace.filter(|n| !n.is_empty()),
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}/v1/{}", self.address, path));
        match &self.namespace {
            Some(ns) => builder.header("X-Vault-Namespace", ns),
            None => builder,
        }
    }

    async fn send<T: serde::de::DeserializeOwned>(
        &self,
        builder: reqwest::RequestBuilder,
        what: &str,
    ) -> Result<T, Error> {
        let response = builder
            .send()
            .await
            .map_err(|e| Error::secret_backend(format!("{what} request failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::secret_backend(format!(
                "{what} returned {status}: {body}"
            )));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| Error::secret_backend(format!("invalid {what} response: {e}")))
    }

    fn session_from(envelope: AuthEnvelope, what: &str) -> Result<AppRoleSession, Error> {
        envelope
            .auth
            .map(AppRoleSession::from)
            .ok_or_else(|| Error::secret_backend(format!("{what} response has no auth data")))
    }
}

#[async_trait]
impl SecretBackend for VaultHttpBackend {
    async fn login(&self, credentials: &AppRoleCredentials) -> Result<AppRoleSession, Error> {
        let builder = self
            .request(reqwest::Method::POST, &format!("auth/{}/login", self.role_path))
            .json(&serde_json::json!({
                "role_id": credentials.role_id,
                "secret_id": credentials.secret_id,
            }));
        let envelope: AuthEnvelope = self.send(builder, "approle login").await?;
        Self::session_from(envelope, "approle login")
    }

    async fn renew_self(
        &self,
        token: &str,
        increment: Duration,
    ) -> Result<AppRoleSession, Error> {
        let builder = self
            .request(reqwest::Method::POST, "auth/token/renew-self")
            .header("X-Vault-Token", token)
            .json(&serde_json::json!({ "increment": format!("{}s", increment.as_secs()) }));
        let envelope: AuthEnvelope = self.send(builder, "token renewal").await?;
        Self::session_from(envelope, "token renewal")
    }

    async fn read_kv(
        &self,
        token: &str,
        mount: &str,
        path: &str,
    ) -> Result<HashMap<String, String>, Error> {
        let builder = self
            .request(
                reqwest::Method::GET,
                &format!("{}/data/{}", mount.trim_matches('/'), path.trim_matches('/')),
            )
            .header("X-Vault-Token", token);
        let envelope: KvEnvelope = self.send(builder, "secret read").await?;

        let data = envelope
            .data
            .and_then(|d| d.data)
            .ok_or_else(|| Error::secret_backend(format!("secret {mount}/{path} not found")))?;

        Ok(data
            .into_iter()
            .map(|(k, v)| match v {
                serde_json::Value::String(s) => (k, s),
                other => (k, other.to_string()),
            })
            .collect())
    }
}
