//! Operator configuration from flags and environment variables

use std::time::Duration;

use clap::Args;

use crate::controller::PhasePolicy;
use crate::credentials::{AppRoleCredentials, ClientCredentials, KeycloakProvider};
use crate::Error;

/// Settings for the remote API, the identity provider and the secret backend
#[derive(Args, Clone, Debug, Default)]
pub struct OperatorConfig {
    /// Base URL of the cloud provider API gateway
    #[arg(long, env = "API_GATEWAY")]
    pub api_gateway: Option<String>,

    /// Base URL of the Keycloak server issuing access tokens
    #[arg(long, env = "KEYCLOAK_URL")]
    pub keycloak_url: Option<String>,

    /// Keycloak realm of the API clients
    #[arg(long, env = "REALM_API")]
    pub realm_api: Option<String>,

    /// Read per-tenant client credentials from the secret backend
    #[arg(long, env = "VAULT_ENABLED")]
    pub vault_enabled: bool,

    /// Address of the secret backend
    #[arg(long, env = "VAULT_ADDRESS")]
    pub vault_address: Option<String>,

    /// Secret backend namespace
    #[arg(long, env = "ROLE_NAMESPACE")]
    pub role_namespace: Option<String>,

    /// Mount path of the AppRole auth method
    #[arg(long, env = "ROLE_PATH", default_value = "approle")]
    pub role_path: Option<String>,

    /// Mount path of the KV v2 engine holding tenant credentials
    #[arg(long, env = "KV_MOUNT", default_value = "kv")]
    pub kv_mount: Option<String>,

    /// AppRole role id
    #[arg(long, env = "ROLE_ID")]
    pub role_id: Option<String>,

    /// AppRole secret id
    #[arg(long, env = "ROLE_SECRET", hide_env_values = true)]
    pub role_secret: Option<String>,

    /// Static client id used when the secret backend is disabled
    #[arg(long, env = "CLIENT_ID")]
    pub client_id: Option<String>,

    /// Static client secret used when the secret backend is disabled
    #[arg(long, env = "CLIENT_SECRET", hide_env_values = true)]
    pub client_secret: Option<String>,

    /// Seconds between retries of the same phase
    #[arg(long, default_value = "20")]
    pub requeue_interval_secs: u64,

    /// Seconds a transitioning phase may last before the object fails
    #[arg(long, default_value = "300")]
    pub phase_timeout_secs: u64,
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn required<'a>(value: &'a Option<String>, key: &str) -> Result<&'a str, Error> {
    present(value)
        .ok_or_else(|| Error::config(format!("missing required configuration value: {key}")))
}

impl OperatorConfig {
    /// Check that every value needed by the selected mode is set
    pub fn validate(&self) -> Result<(), Error> {
        required(&self.api_gateway, "api-gateway")?;
        required(&self.keycloak_url, "keycloak-url")?;
        required(&self.realm_api, "realm-api")?;

        if self.vault_enabled {
            required(&self.vault_address, "vault-address")?;
            required(&self.role_path, "role-path")?;
            required(&self.kv_mount, "kv-mount")?;
            required(&self.role_id, "role-id")?;
            required(&self.role_secret, "role-secret")?;
        } else {
            required(&self.client_id, "client-id")?;
            required(&self.client_secret, "client-secret")?;
        }

        if self.requeue_interval_secs == 0 {
            return Err(Error::config("requeue-interval-secs must be positive"));
        }
        Ok(())
    }

    /// Gateway base URL
    pub fn api_gateway(&self) -> Result<&str, Error> {
        required(&self.api_gateway, "api-gateway")
    }

    /// Secret backend address
    pub fn vault_address(&self) -> Result<&str, Error> {
        required(&self.vault_address, "vault-address")
    }

    /// AppRole auth mount
    pub fn role_path(&self) -> Result<&str, Error> {
        required(&self.role_path, "role-path")
    }

    /// KV v2 mount holding tenant credentials
    pub fn kv_mount(&self) -> Result<&str, Error> {
        required(&self.kv_mount, "kv-mount")
    }

    /// OAuth2 token endpoint derived from the Keycloak URL and realm
    pub fn token_endpoint(&self) -> Result<String, Error> {
        Ok(KeycloakProvider::token_url(
            required(&self.keycloak_url, "keycloak-url")?,
            required(&self.realm_api, "realm-api")?,
        ))
    }

    /// State machine timing
    pub fn phase_policy(&self) -> PhasePolicy {
        PhasePolicy {
            requeue_interval: Duration::from_secs(self.requeue_interval_secs),
            max_phase_timeout: Duration::from_secs(self.phase_timeout_secs),
        }
    }

    /// Static client credentials, when configured
    pub fn static_credentials(&self) -> Option<ClientCredentials> {
        Some(ClientCredentials::new(
            present(&self.client_id)?,
            present(&self.client_secret)?,
        ))
    }

    /// AppRole credentials for the secret backend
    pub fn approle_credentials(&self) -> Result<AppRoleCredentials, Error> {
        Ok(AppRoleCredentials::new(
            required(&self.role_id, "role-id")?,
            required(&self.role_secret, "role-secret")?,
        ))
    }

    /// Secret backend namespace, if set
    pub fn vault_namespace(&self) -> Option<String> {
        present(&self.role_namespace).map(str::to_string)
    }
}
