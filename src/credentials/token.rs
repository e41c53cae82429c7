//! OAuth2 client-credentials tokens cached per tenant
//!
//! Reconcile invocations read the cache on the hot path without blocking on
//! each other; logins are serialized so a burst of invocations for a cold
//! tenant produces one token request.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use crate::clock::Clock;
use crate::Error;

/// Cache key used when no tenant is set
pub const PUBLIC_TENANT: &str = "public";

/// Tokens are treated as expired this long before their nominal expiry
pub const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(10);

/// Timeout for identity provider requests
const TOKEN_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Map a tenant identifier to its cache key
pub fn tenant_key(tenant: &str) -> &str {
    if tenant.is_empty() {
        PUBLIC_TENANT
    } else {
        tenant
    }
}

/// OAuth2 client id and secret
#[derive(Clone, PartialEq, Eq)]
pub struct ClientCredentials {
    /// Client id
    pub client_id: String,
    /// Client secret
    pub client_secret: String,
}

impl ClientCredentials {
    /// Create credentials from id and secret
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }

    /// Read `client-id` and `client-secret` from a secret document
    pub fn from_secret(secret: &HashMap<String, String>) -> Result<Self, Error> {
        let field = |key: &str| {
            secret
                .get(key)
                .filter(|v| !v.is_empty())
                .cloned()
                .ok_or_else(|| Error::secret_backend(format!("secret is missing field {key}")))
        };
        Ok(Self::new(field("client-id")?, field("client-secret")?))
    }
}

impl std::fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

/// Token endpoint response
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct TokenResponse {
    /// Bearer token
    pub access_token: String,
    /// Token type, normally "Bearer"
    #[serde(default)]
    pub token_type: String,
    /// Lifetime in seconds
    #[serde(default)]
    pub expires_in: u64,
}

/// A token and when it was obtained
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CachedToken {
    /// Bearer token
    pub access_token: String,
    /// Token type
    pub token_type: String,
    /// When the token was received
    pub retrieved_at: DateTime<Utc>,
    /// Nominal lifetime in seconds
    pub expires_in: u64,
}

impl CachedToken {
    /// Wrap a token response received at `retrieved_at`
    pub fn new(response: TokenResponse, retrieved_at: DateTime<Utc>) -> Self {
        Self {
            access_token: response.access_token,
            token_type: response.token_type,
            retrieved_at,
            expires_in: response.expires_in,
        }
    }

    /// Instant after which the token must not be used
    pub fn usable_until(&self) -> DateTime<Utc> {
        let lifetime = chrono::Duration::seconds(self.expires_in.min(u64::from(u32::MAX)) as i64);
        let margin = chrono::Duration::seconds(TOKEN_EXPIRY_MARGIN.as_secs() as i64);
        self.retrieved_at + lifetime - margin
    }

    /// Whether the token can still be used at `now`
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.usable_until()
    }
}

/// Read-mostly map from tenant key to token
#[derive(Debug, Default)]
pub struct TokenCache {
    entries: RwLock<HashMap<String, CachedToken>>,
}

impl TokenCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Token for `key` if it is still valid at `now`
    pub fn get_valid(&self, key: &str, now: DateTime<Utc>) -> Option<CachedToken> {
        self.entries
            .read()
            .get(key)
            .filter(|t| t.is_valid_at(now))
            .cloned()
    }

    /// Replace the entry for `key`
    pub fn insert(&self, key: impl Into<String>, token: CachedToken) {
        self.entries.write().insert(key.into(), token);
    }

    /// Number of cached entries, valid or not
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// True when nothing is cached
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

/// OAuth2 identity provider
#[cfg_attr(test, automock)]
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Exchange client credentials for an access token
    async fn client_credentials(
        &self,
        credentials: &ClientCredentials,
    ) -> Result<TokenResponse, Error>;
}

/// Keycloak realm token endpoint
#[derive(Clone, Debug)]
pub struct KeycloakProvider {
    client: reqwest::Client,
    token_url: String,
}

impl KeycloakProvider {
    /// Create a provider for `realm` on the Keycloak server at `base_url`
    pub fn new(base_url: &str, realm: &str) -> Result<Self, Error> {
        Self::for_endpoint(Self::token_url(base_url, realm))
    }

    /// Create a provider posting to an explicit token endpoint
    pub fn for_endpoint(token_url: impl Into<String>) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .timeout(TOKEN_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::authentication(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            token_url: token_url.into(),
        })
    }

    /// Token endpoint for a realm
    pub fn token_url(base_url: &str, realm: &str) -> String {
        format!(
            "{}/realms/{}/protocol/openid-connect/token",
            base_url.trim_end_matches('/'),
            realm
        )
    }
}

#[async_trait]
impl IdentityProvider for KeycloakProvider {
    async fn client_credentials(
        &self,
        credentials: &ClientCredentials,
    ) -> Result<TokenResponse, Error> {
        let response = self
            .client
            .post(&self.token_url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", credentials.client_id.as_str()),
                ("client_secret", credentials.client_secret.as_str()),
            ])
            .send()
            .await
            .map_err(|e| Error::authentication(format!("token request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::authentication(format!(
                "token endpoint returned {status}: {body}"
            )));
        }

        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| Error::authentication(format!("invalid token response: {e}")))
    }
}

/// Tenant-scoped token manager
///
/// One instance is shared by every reconcile invocation in the process.
pub struct TokenManager {
    provider: Arc<dyn IdentityProvider>,
    clock: Arc<dyn Clock>,
    cache: TokenCache,
    default_credentials: Option<ClientCredentials>,
    tenant_credentials: RwLock<HashMap<String, ClientCredentials>>,
    login: tokio::sync::Mutex<()>,
}

impl TokenManager {
    /// Create a manager; `default_credentials` serve tenants without their own
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        clock: Arc<dyn Clock>,
        default_credentials: Option<ClientCredentials>,
    ) -> Self {
        Self {
            provider,
            clock,
            cache: TokenCache::new(),
            default_credentials,
            tenant_credentials: RwLock::new(HashMap::new()),
            login: tokio::sync::Mutex::new(()),
        }
    }

    /// Valid cached token for the tenant, without any network call
    pub fn get_active_token(&self, tenant: &str) -> Option<String> {
        self.cache
            .get_valid(tenant_key(tenant), self.clock.now())
            .map(|t| t.access_token)
    }

    /// Credentials to use for the tenant's next login
    pub fn set_client_credentials(&self, tenant: &str, credentials: ClientCredentials) {
        self.tenant_credentials
            .write()
            .insert(tenant_key(tenant).to_string(), credentials);
    }

    /// Return a token for the tenant, logging in when needed
    ///
    /// With `check_cache` false a login is always performed.
    pub async fn get_access_token(
        &self,
        check_cache: bool,
        tenant: &str,
        cancel: &CancellationToken,
    ) -> Result<String, Error> {
        let key = tenant_key(tenant);

        let _login = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            guard = self.login.lock() => guard,
        };

        if check_cache {
            if let Some(token) = self.cache.get_valid(key, self.clock.now()) {
                debug!(tenant = %key, "using cached access token");
                return Ok(token.access_token);
            }
        }

        let credentials = self.credentials_for(key).ok_or_else(|| {
            Error::authentication(format!("no client credentials configured for tenant {key}"))
        })?;

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            response = self.provider.client_credentials(&credentials) => response?,
        };
        if response.access_token.is_empty() {
            return Err(Error::authentication(
                "identity provider returned an empty access token",
            ));
        }

        let token = CachedToken::new(response, self.clock.now());
        info!(tenant = %key, expires_in = token.expires_in, "obtained access token");
        let access_token = token.access_token.clone();
        self.cache.insert(key, token);
        Ok(access_token)
    }

    fn credentials_for(&self, key: &str) -> Option<ClientCredentials> {
        self.tenant_credentials
            .read()
            .get(key)
            .cloned()
            .or_else(|| self.default_credentials.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn token(access: &str, expires_in: u64) -> TokenResponse {
        TokenResponse {
            access_token: access.to_string(),
            token_type: "Bearer".to_string(),
            expires_in,
        }
    }

    fn manager(provider: MockIdentityProvider, clock: Arc<ManualClock>) -> TokenManager {
        TokenManager::new(
            Arc::new(provider),
            clock,
            Some(ClientCredentials::new("operator", "s3cret")),
        )
    }

    mod cached_token {
        use super::*;

        /// Story: A token is not used in the last seconds of its life
        #[test]
        fn story_expiry_includes_safety_margin() {
            let t0 = Utc::now();
            let cached = CachedToken::new(token("abc", 300), t0);

            assert!(cached.is_valid_at(t0 + chrono::Duration::seconds(250)));
            assert!(!cached.is_valid_at(t0 + chrono::Duration::seconds(291)));
            assert!(!cached.is_valid_at(t0 + chrono::Duration::seconds(301)));
        }

        #[test]
        fn test_token_shorter_than_margin_is_never_valid() {
            let t0 = Utc::now();
            let cached = CachedToken::new(token("abc", 5), t0);
            assert!(!cached.is_valid_at(t0));
        }
    }

    #[test]
    fn test_empty_tenant_uses_public_key() {
        assert_eq!(tenant_key(""), PUBLIC_TENANT);
        assert_eq!(tenant_key("acme"), "acme");
    }

    #[test]
    fn test_credentials_from_secret() {
        let secret: HashMap<String, String> = [
            ("client-id".to_string(), "acme-client".to_string()),
            ("client-secret".to_string(), "hunter2".to_string()),
        ]
        .into_iter()
        .collect();

        let creds = ClientCredentials::from_secret(&secret).unwrap();
        assert_eq!(creds, ClientCredentials::new("acme-client", "hunter2"));
        assert!(!format!("{creds:?}").contains("hunter2"));

        let missing: HashMap<String, String> =
            [("client-id".to_string(), "x".to_string())].into_iter().collect();
        let err = ClientCredentials::from_secret(&missing).unwrap_err();
        assert!(err.to_string().contains("client-secret"));
    }

    #[test]
    fn test_keycloak_token_url() {
        assert_eq!(
            KeycloakProvider::token_url("https://login.example.test/", "cmp-new-apikey"),
            "https://login.example.test/realms/cmp-new-apikey/protocol/openid-connect/token"
        );
    }

    #[tokio::test]
    async fn test_active_token_is_none_until_login() {
        let clock = Arc::new(ManualClock::at(Utc::now()));
        let mut provider = MockIdentityProvider::new();
        provider
            .expect_client_credentials()
            .times(1)
            .returning(|_| Ok(token("tok-1", 300)));
        let manager = manager(provider, clock);

        assert_eq!(manager.get_active_token("acme"), None);
        manager
            .get_access_token(true, "acme", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(manager.get_active_token("acme").as_deref(), Some("tok-1"));
        assert_eq!(manager.get_active_token("other"), None);
    }

    /// Story: Repeated reconciles reuse the tenant's token until it nears expiry
    #[tokio::test]
    async fn story_cached_token_avoids_second_login() {
        let clock = Arc::new(ManualClock::at(Utc::now()));
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut provider = MockIdentityProvider::new();
        provider.expect_client_credentials().returning(move |_| {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(token(&format!("tok-{n}"), 300))
        });
        let manager = manager(provider, clock.clone());
        let cancel = CancellationToken::new();

        assert_eq!(manager.get_access_token(true, "", &cancel).await.unwrap(), "tok-1");
        clock.advance(chrono::Duration::seconds(250));
        assert_eq!(manager.get_access_token(true, "", &cancel).await.unwrap(), "tok-1");
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        clock.advance(chrono::Duration::seconds(41));
        assert_eq!(manager.get_access_token(true, "", &cancel).await.unwrap(), "tok-2");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_skipping_cache_forces_login() {
        let clock = Arc::new(ManualClock::at(Utc::now()));
        let mut provider = MockIdentityProvider::new();
        provider
            .expect_client_credentials()
            .times(2)
            .returning(|_| Ok(token("tok", 300)));
        let manager = manager(provider, clock);
        let cancel = CancellationToken::new();

        manager.get_access_token(true, "acme", &cancel).await.unwrap();
        manager.get_access_token(false, "acme", &cancel).await.unwrap();
    }

    #[tokio::test]
    async fn test_tenant_credentials_take_precedence() {
        let clock = Arc::new(ManualClock::at(Utc::now()));
        let mut provider = MockIdentityProvider::new();
        provider
            .expect_client_credentials()
            .withf(|c| c.client_id == "acme-client")
            .times(1)
            .returning(|_| Ok(token("acme-tok", 300)));
        provider
            .expect_client_credentials()
            .withf(|c| c.client_id == "operator")
            .times(1)
            .returning(|_| Ok(token("default-tok", 300)));
        let manager = manager(provider, clock);
        let cancel = CancellationToken::new();

        manager.set_client_credentials("acme", ClientCredentials::new("acme-client", "x"));
        assert_eq!(
            manager.get_access_token(false, "acme", &cancel).await.unwrap(),
            "acme-tok"
        );
        assert_eq!(
            manager.get_access_token(false, "globex", &cancel).await.unwrap(),
            "default-tok"
        );
    }

    #[tokio::test]
    async fn test_no_credentials_is_an_authentication_error() {
        let clock = Arc::new(ManualClock::at(Utc::now()));
        let manager = TokenManager::new(Arc::new(MockIdentityProvider::new()), clock, None);

        let err = manager
            .get_access_token(true, "acme", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Authentication(_)));
    }

    #[tokio::test]
    async fn test_provider_failure_leaves_cache_untouched() {
        let clock = Arc::new(ManualClock::at(Utc::now()));
        let mut provider = MockIdentityProvider::new();
        provider
            .expect_client_credentials()
            .returning(|_| Err(Error::authentication("invalid_client")));
        let manager = manager(provider, clock);

        let err = manager
            .get_access_token(true, "acme", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("invalid_client"));
        assert_eq!(manager.get_active_token("acme"), None);
    }

    #[tokio::test]
    async fn test_cancelled_login_is_reported() {
        let clock = Arc::new(ManualClock::at(Utc::now()));
        let manager = manager(MockIdentityProvider::new(), clock);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = manager.get_access_token(true, "acme", &cancel).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }
}
