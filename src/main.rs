//! Resource Operator - drives declarative cloud resources through a remote provider API

use std::sync::Arc;

use clap::Parser;
use kube::{Client, CustomResourceExt};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use resource_operator::clock::SystemClock;
use resource_operator::config::OperatorConfig;
use resource_operator::controller::{
    self, BlockStorageLifecycle, Context, KubeStore, ObjectStore, ProjectLifecycle,
};
use resource_operator::crd::{BlockStorage, Project};
use resource_operator::credentials::{
    AppRoleClient, CredentialManager, KeycloakProvider, SecretBackend, TokenManager, TokenSource,
    TokioSleeper, VaultHttpBackend,
};
use resource_operator::gateway::{GatewayClient, ReqwestTransport};
use resource_operator::retry::{retry_with_backoff, Backoff};

/// Attempts for the initial secret backend login
const LOGIN_ATTEMPTS: u32 = 5;

/// Resource Operator - reconciles Project and BlockStorage objects against the cloud API
#[derive(Parser, Debug)]
#[command(name = "resource-operator", version, about, long_about = None)]
struct Cli {
    /// Generate CRD manifests and exit
    #[arg(long)]
    crd: bool,

    #[command(flatten)]
    config: OperatorConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if cli.crd {
        let project = serde_yaml::to_string(&Project::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize Project CRD: {}", e))?;
        let volume = serde_yaml::to_string(&BlockStorage::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize BlockStorage CRD: {}", e))?;
        println!("{project}---\n{volume}");
        return Ok(());
    }

    run_controllers(cli.config).await
}

/// Run the Project and BlockStorage controllers until a shutdown signal
async fn run_controllers(config: OperatorConfig) -> anyhow::Result<()> {
    config.validate()?;

    let client = Client::try_default().await?;
    let shutdown = CancellationToken::new();

    let provider = Arc::new(KeycloakProvider::for_endpoint(config.token_endpoint()?)?);
    let static_credentials = if config.vault_enabled {
        None
    } else {
        config.static_credentials()
    };
    let tokens = Arc::new(TokenManager::new(
        provider,
        Arc::new(SystemClock),
        static_credentials,
    ));

    let (credentials, approle) = if config.vault_enabled {
        let backend: Arc<dyn SecretBackend> = Arc::new(VaultHttpBackend::new(
            config.vault_address()?,
            config.role_path()?,
            config.vault_namespace(),
        )?);
        let approle_credentials = config.approle_credentials()?;
        let kv_mount = config.kv_mount()?.to_string();

        let approle = retry_with_backoff(
            &Backoff::with_max_attempts(LOGIN_ATTEMPTS),
            "secret backend login",
            &shutdown,
            || {
                AppRoleClient::connect(
                    backend.clone(),
                    approle_credentials.clone(),
                    kv_mount.clone(),
                    Arc::new(TokioSleeper),
                )
            },
        )
        .await?;
        let approle = Arc::new(approle);
        info!("secret backend integration enabled");

        (
            CredentialManager::with_secrets(tokens, approle.clone()),
            Some(approle),
        )
    } else {
        info!("secret backend integration disabled; using static client credentials");
        (CredentialManager::new(tokens), None)
    };

    let tokens: Arc<dyn TokenSource> = Arc::new(credentials);
    let gateway = GatewayClient::new(config.api_gateway()?, Arc::new(ReqwestTransport::new()?));
    let policy = config.phase_policy();

    let projects: Arc<dyn ObjectStore<Project>> = Arc::new(KubeStore::<Project>::new(client.clone()));
    let project_ctx = Arc::new(
        Context::new(
            projects.clone(),
            tokens.clone(),
            gateway.clone(),
            Arc::new(ProjectLifecycle),
        )
        .with_policy(policy)
        .multi_tenant(config.vault_enabled)
        .with_shutdown(shutdown.clone()),
    );

    let volume_ctx = Arc::new(
        Context::new(
            Arc::new(KubeStore::<BlockStorage>::new(client.clone())),
            tokens,
            gateway,
            Arc::new(BlockStorageLifecycle::new(projects)),
        )
        .with_policy(policy)
        .multi_tenant(config.vault_enabled)
        .with_shutdown(shutdown.clone()),
    );

    info!(
        requeue_secs = policy.requeue_interval.as_secs(),
        timeout_secs = policy.max_phase_timeout.as_secs(),
        "starting controllers"
    );

    futures::join!(
        controller::run(client.clone(), project_ctx),
        controller::run(client, volume_ctx),
    );

    shutdown.cancel();
    if let Some(approle) = approle {
        approle.shutdown().await;
    }

    info!("operator stopped");
    Ok(())
}
