//! Reconciliation engine for managed cloud resources
//!
//! Every managed kind shares the same entry point: [`reconcile`] fetches the
//! object, authenticates its tenant, applies the timeout and deletion
//! preconditions and then dispatches to the kind's [`ResourceLifecycle`]
//! callback for the current phase.

mod block_storage;
mod lifecycle;
mod project;
mod scope;
mod store;

use std::sync::Arc;

use futures::StreamExt;
use kube::runtime::controller::Action;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, Resource, ResourceExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

pub use block_storage::{resolve_project_id, BlockStorageLifecycle};
pub use lifecycle::ResourceLifecycle;
pub use project::ProjectLifecycle;
pub use scope::{debounce_delay, PhasePolicy, ReconcileScope, RemoteCreation};
pub use store::{KubeStore, ObjectStore};

use crate::clock::{Clock, SystemClock};
use crate::credentials::TokenSource;
use crate::crd::{ManagedResource, ResourcePhase};
use crate::gateway::GatewayClient;
use crate::Error;

/// Shared state for the controller of one resource kind
pub struct Context<K: ManagedResource> {
    /// Persistence for objects of this kind
    pub store: Arc<dyn ObjectStore<K>>,
    /// Bearer tokens per tenant
    pub tokens: Arc<dyn TokenSource>,
    /// Unauthenticated gateway template; cloned per invocation
    pub gateway: GatewayClient,
    /// Time source
    pub clock: Arc<dyn Clock>,
    /// Requeue interval and phase timeout
    pub policy: PhasePolicy,
    /// Whether every object must name its tenant
    pub multi_tenant: bool,
    /// Cancelled on process shutdown; each invocation gets a child token
    pub shutdown: CancellationToken,
    /// Kind-specific phase callbacks
    pub lifecycle: Arc<dyn ResourceLifecycle<K>>,
}

impl<K: ManagedResource> Context<K> {
    /// Create a context with the system clock and default policy
    pub fn new(
        store: Arc<dyn ObjectStore<K>>,
        tokens: Arc<dyn TokenSource>,
        gateway: GatewayClient,
        lifecycle: Arc<dyn ResourceLifecycle<K>>,
    ) -> Self {
        Self {
            store,
            tokens,
            gateway,
            clock: Arc::new(SystemClock),
            policy: PhasePolicy::default(),
            multi_tenant: false,
            shutdown: CancellationToken::new(),
            lifecycle,
        }
    }

    /// Use the given timing policy
    pub fn with_policy(mut self, policy: PhasePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Require a tenant on every object
    pub fn multi_tenant(mut self, enabled: bool) -> Self {
        self.multi_tenant = enabled;
        self
    }

    /// Derive invocation cancellation from `shutdown`
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Create a context for unit tests with an explicit clock
    #[cfg(test)]
    pub fn for_testing(
        store: Arc<dyn ObjectStore<K>>,
        tokens: Arc<dyn TokenSource>,
        gateway: GatewayClient,
        lifecycle: Arc<dyn ResourceLifecycle<K>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            clock,
            ..Self::new(store, tokens, gateway, lifecycle)
        }
    }
}

/// Reconcile one managed object
///
/// Precondition failures are returned as errors without touching the status;
/// [`error_policy`] then waits for the object to change.
#[instrument(
    skip(obj, ctx),
    fields(
        kind = %K::kind(&()),
        name = %obj.name_any(),
        namespace = %obj.namespace().unwrap_or_default(),
    )
)]
pub async fn reconcile<K: ManagedResource>(obj: Arc<K>, ctx: Arc<Context<K>>) -> Result<Action, Error> {
    let namespace = obj.namespace().unwrap_or_default();
    let name = obj.name_any();

    let Some(current) = ctx.store.get(&namespace, &name).await? else {
        debug!("object no longer exists");
        return Ok(Action::await_change());
    };

    let tenant = current.tenant().unwrap_or_default().to_string();
    if tenant.is_empty() && ctx.multi_tenant {
        return Err(Error::precondition(
            "tenant is not specified in the resource spec",
        ));
    }

    let cancel = ctx.shutdown.child_token();
    let token = ctx.tokens.authenticate(&tenant, &cancel).await?;
    let gateway = ctx.gateway.authorized(token, cancel);

    let mut scope = ReconcileScope::new(
        current,
        ctx.store.clone(),
        gateway,
        ctx.clock.clone(),
        ctx.policy,
    );

    if let Some(action) = scope.enforce_timeout().await? {
        return Ok(action);
    }
    if let Some(action) = scope.begin_deletion().await? {
        return Ok(action);
    }

    let phase = scope.phase();
    debug!(%phase, "dispatching phase callback");
    let lifecycle = &ctx.lifecycle;
    match phase {
        ResourcePhase::Uninitialized => lifecycle.init(&mut scope).await,
        ResourcePhase::Creating => lifecycle.creating(&mut scope).await,
        ResourcePhase::Provisioning => lifecycle.provisioning(&mut scope).await,
        ResourcePhase::Updating => lifecycle.updating(&mut scope).await,
        ResourcePhase::Created => lifecycle.created(&mut scope).await,
        ResourcePhase::Deleting => lifecycle.deleting(&mut scope).await,
        ResourcePhase::Deleted | ResourcePhase::Failed => Ok(Action::await_change()),
    }
}

/// Error policy for the controller
///
/// Errors that need a change to the object wait for that change; all others
/// are retried after the requeue interval.
pub fn error_policy<K: ManagedResource>(obj: Arc<K>, error: &Error, ctx: Arc<Context<K>>) -> Action {
    if error.is_retryable() {
        warn!(
            %error,
            name = %obj.name_any(),
            retry_secs = ctx.policy.requeue_interval.as_secs(),
            "reconciliation failed, will retry"
        );
        Action::requeue(ctx.policy.requeue_interval)
    } else {
        error!(%error, name = %obj.name_any(), "reconciliation failed, waiting for a change");
        Action::await_change()
    }
}

/// Run the controller for one kind until a shutdown signal arrives
pub async fn run<K: ManagedResource>(client: Client, ctx: Arc<Context<K>>) {
    let kind = K::kind(&()).to_string();
    info!(%kind, "starting controller");

    let objects: Api<K> = Api::all(client);
    Controller::new(objects, WatcherConfig::default())
        .shutdown_on_signal()
        .run(reconcile::<K>, error_policy::<K>, ctx)
        .for_each(|result| {
            let kind = kind.clone();
            async move {
                match result {
                    Ok((obj, action)) => {
                        debug!(%kind, name = %obj.name, ?action, "reconciliation completed");
                    }
                    Err(e) => {
                        warn!(%kind, error = %e, "reconciliation error");
                    }
                }
            }
        })
        .await;

    info!(%kind, "controller stopped");
}
