//! Credential lifecycle for the remote cloud API
//!
//! Tokens come from an OAuth2 client-credentials endpoint. In multi-tenant
//! mode each tenant's client credentials are read from a secret backend
//! reached through an AppRole session that renews itself in the background.

mod token;
mod vault;

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

pub use token::{
    tenant_key, CachedToken, ClientCredentials, IdentityProvider, KeycloakProvider, TokenCache,
    TokenManager, TokenResponse, PUBLIC_TENANT, TOKEN_EXPIRY_MARGIN,
};
pub use vault::{
    renewal_delay, AppRoleClient, AppRoleCredentials, AppRoleSession, SecretBackend, SecretStore,
    Sleeper, TokioSleeper, VaultHttpBackend,
};

#[cfg(test)]
pub use token::MockIdentityProvider;
#[cfg(test)]
pub use vault::{MockSecretBackend, MockSecretStore};

use crate::Error;

/// Bearer tokens as seen by the reconciliation engine
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Produce a valid access token for the tenant
    async fn authenticate(&self, tenant: &str, cancel: &CancellationToken)
        -> Result<String, Error>;
}

/// Token source combining the token cache with optional per-tenant secrets
pub struct CredentialManager {
    tokens: Arc<TokenManager>,
    secrets: Option<Arc<dyn SecretStore>>,
}

impl CredentialManager {
    /// Single-tenant manager using the static client credentials
    pub fn new(tokens: Arc<TokenManager>) -> Self {
        Self {
            tokens,
            secrets: None,
        }
    }

    /// Multi-tenant manager reading client credentials from `secrets`
    pub fn with_secrets(tokens: Arc<TokenManager>, secrets: Arc<dyn SecretStore>) -> Self {
        Self {
            tokens,
            secrets: Some(secrets),
        }
    }

    /// Whether tenants resolve their own credentials from the secret backend
    pub fn is_multi_tenant(&self) -> bool {
        self.secrets.is_some()
    }
}

#[async_trait]
impl TokenSource for CredentialManager {
    async fn authenticate(
        &self,
        tenant: &str,
        cancel: &CancellationToken,
    ) -> Result<String, Error> {
        if let Some(token) = self.tokens.get_active_token(tenant) {
            return Ok(token);
        }

        match &self.secrets {
            Some(secrets) => {
                let key = tenant_key(tenant);
                debug!(tenant = %key, "reading tenant client credentials");
                let secret = secrets.read_secret(key, cancel).await?;
                let credentials = ClientCredentials::from_secret(&secret)?;
                self.tokens.set_client_credentials(tenant, credentials);
                self.tokens.get_access_token(false, tenant, cancel).await
            }
            None => self.tokens.get_access_token(true, tenant, cancel).await,
        }
    }
}
