//! Per-invocation reconciliation state and the standard phase helpers
//!
//! A [`ReconcileScope`] owns the object being reconciled for the duration of
//! one invocation. Lifecycle callbacks drive it through the helpers below,
//! which decide the next phase, persist the status and pick the requeue
//! delay.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use kube::runtime::controller::Action;
use kube::{Resource, ResourceExt};
use tracing::{debug, info, warn};

use super::store::ObjectStore;
use crate::clock::Clock;
use crate::crd::{Condition, ManagedResource, ResourcePhase, ResourceStatus, SYNCHRONIZED_CONDITION};
use crate::gateway::GatewayClient;
use crate::{Error, DEFAULT_MAX_PHASE_TIMEOUT, DEFAULT_REQUEUE_INTERVAL};

/// Remote states meaning provisioning completed
const READY_STATES: &[&str] = &["Available", "Active", "NotUsed", "Used"];

/// Remote states meaning provisioning will not complete
const FAILED_STATES: &[&str] = &["Failed", "Error"];

/// Remote states returned by a create call for asynchronous provisioning
const PENDING_STATES: &[&str] = &["InCreation", "Provisioning"];

/// Timing policy of the state machine
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PhasePolicy {
    /// Delay between retries of the same phase
    pub requeue_interval: Duration,
    /// Longest a transitioning phase may last before the object fails
    pub max_phase_timeout: Duration,
}

impl Default for PhasePolicy {
    fn default() -> Self {
        Self {
            requeue_interval: DEFAULT_REQUEUE_INTERVAL,
            max_phase_timeout: DEFAULT_MAX_PHASE_TIMEOUT,
        }
    }
}

/// Result of a remote create call
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RemoteCreation {
    /// Identifier assigned by the remote API
    pub id: String,
    /// Provisioning state reported with the create response
    pub state: Option<String>,
}

impl RemoteCreation {
    /// Creation result for a resource that is usable immediately
    pub fn ready(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: None,
        }
    }
}

/// Time left until the next retry boundary of the current phase
///
/// Retries of the same phase line up on multiples of `interval` counted from
/// the phase start. `None` means the caller is on a boundary and should act.
pub fn debounce_delay(elapsed: Duration, interval: Duration) -> Option<Duration> {
    let interval_nanos = interval.as_nanos();
    if interval_nanos == 0 {
        return None;
    }
    let into_period = elapsed.as_nanos() % interval_nanos;
    if into_period == 0 {
        return None;
    }
    u64::try_from(interval_nanos - into_period)
        .ok()
        .map(Duration::from_nanos)
}

/// Object under reconciliation plus everything needed to move it along
pub struct ReconcileScope<K: ManagedResource> {
    object: K,
    store: Arc<dyn ObjectStore<K>>,
    gateway: GatewayClient,
    clock: Arc<dyn Clock>,
    policy: PhasePolicy,
}

impl<K: ManagedResource> ReconcileScope<K> {
    /// Create a scope for one invocation
    pub fn new(
        object: K,
        store: Arc<dyn ObjectStore<K>>,
        gateway: GatewayClient,
        clock: Arc<dyn Clock>,
        policy: PhasePolicy,
    ) -> Self {
        Self {
            object,
            store,
            gateway,
            clock,
            policy,
        }
    }

    /// The object as currently known to this invocation
    pub fn object(&self) -> &K {
        &self.object
    }

    /// Mutable access for callbacks that record extra status fields
    pub fn object_mut(&mut self) -> &mut K {
        &mut self.object
    }

    /// Engine-owned status, if present
    pub fn status(&self) -> Option<&ResourceStatus> {
        self.object.resource_status()
    }

    /// Current phase; uninitialized when the object has no status yet
    pub fn phase(&self) -> ResourcePhase {
        self.status().map(|s| s.phase).unwrap_or_default()
    }

    /// Remote identifier recorded at creation
    pub fn resource_id(&self) -> Option<&str> {
        self.status()
            .and_then(|s| s.resource_id.as_deref())
            .filter(|id| !id.is_empty())
    }

    /// Gateway client authorized for this invocation's tenant
    pub fn gateway(&self) -> &GatewayClient {
        &self.gateway
    }

    /// Timing policy in effect
    pub fn policy(&self) -> PhasePolicy {
        self.policy
    }

    /// Consume the scope, returning the final object
    pub fn into_object(self) -> K {
        self.object
    }

    fn has_finalizer(&self, finalizer: &str) -> bool {
        self.object.finalizers().iter().any(|f| f == finalizer)
    }

    /// Move to `phase`, persist the status and pick the requeue delay
    ///
    /// A retry of the current phase that arrives between two interval
    /// boundaries is deferred to the next boundary without writing status.
    pub async fn next(
        &mut self,
        phase: ResourcePhase,
        ok: bool,
        reason: &str,
        message: impl Into<String>,
        requeue: bool,
    ) -> Result<Action, Error> {
        let now = self.clock.now();
        let current = self.phase();
        let phase_start = self.status().and_then(|s| s.phase_start_time);
        let message = message.into();

        if requeue && phase == current {
            if let Some(start) = phase_start {
                let elapsed = (now - start).to_std().unwrap_or_default();
                if let Some(wait) = debounce_delay(elapsed, self.policy.requeue_interval) {
                    debug!(
                        %phase,
                        reason,
                        elapsed_secs = elapsed.as_secs(),
                        wait_ms = wait.as_millis() as u64,
                        "debouncing retry of current phase"
                    );
                    return Ok(Action::requeue(wait));
                }
            }
        }

        let generation = self.object.meta().generation;
        let status = self.object.resource_status_mut();
        if phase != current || status.phase_start_time.is_none() {
            status.phase_start_time = Some(now);
        }
        status.phase = phase;
        status.message = Some(message.clone());
        status.observed_generation = generation;
        status.set_condition(Condition::at(
            SYNCHRONIZED_CONDITION,
            ok.into(),
            reason,
            message.as_str(),
            now,
        ));

        self.object = match self.store.update_status(&self.object).await {
            Ok(updated) => updated,
            Err(e) => {
                warn!(error = %e, from = %current, to = %phase, "failed to update status");
                return Err(e);
            }
        };

        info!(from = %current, to = %phase, reason, "{}", message);
        Ok(if requeue {
            Action::requeue(self.policy.requeue_interval)
        } else {
            Action::await_change()
        })
    }

    /// Translate a failed remote or persistence call into a transition
    pub async fn next_on_api_error(&mut self, err: Error) -> Result<Action, Error> {
        let current = self.phase();
        match err.api_error() {
            Some(api) if api.is_invalid_status() => {
                let message = format!("Remote resource is not ready, will retry: {api}");
                self.next(current, false, "ResourceNotReady", message, true)
                    .await
            }
            Some(api) if api.is_client_error() => {
                let message = format!("Client error (HTTP {}): {api}", api.status);
                self.next(ResourcePhase::Failed, false, "ClientError", message, false)
                    .await
            }
            Some(api) if api.is_server_error() => {
                let message = format!("Server error (HTTP {}): {api} - will retry", api.status);
                self.next(current, false, "ServerError", message, true).await
            }
            _ => self.next_on_reconcile_error(err).await,
        }
    }

    /// Record a generic, retriable failure in the current phase
    pub async fn next_on_reconcile_error(&mut self, err: Error) -> Result<Action, Error> {
        let current = self.phase();
        let message = format!("Reconcile error encountered, will retry: {err}");
        self.next(current, false, "ReconcileError", message, true)
            .await
    }

    /// Fail the object when a transitioning phase has lasted too long
    ///
    /// Returns `None` when the phase is still within its budget.
    pub async fn enforce_timeout(&mut self) -> Result<Option<Action>, Error> {
        let phase = self.phase();
        let Some(start) = self.status().and_then(|s| s.phase_start_time) else {
            return Ok(None);
        };
        if !phase.is_transitioning() {
            return Ok(None);
        }

        let elapsed = (self.clock.now() - start).to_std().unwrap_or_default();
        let timeout = self.policy.max_phase_timeout;
        if elapsed <= timeout {
            return Ok(None);
        }

        warn!(%phase, elapsed_secs = elapsed.as_secs(), "phase timed out");
        let message = format!("Reconciliation took too much time (timeout: {timeout:?})");
        self.next(
            ResourcePhase::Failed,
            false,
            "ReconciliationTimeout",
            message,
            false,
        )
        .await
        .map(Some)
    }

    /// Move an object marked for deletion into the Deleting phase
    ///
    /// Returns `None` when the object is not being deleted or is already
    /// past this point.
    pub async fn begin_deletion(&mut self) -> Result<Option<Action>, Error> {
        let phase = self.phase();
        if self.object.meta().deletion_timestamp.is_none()
            || matches!(phase, ResourcePhase::Deleting | ResourcePhase::Failed)
        {
            return Ok(None);
        }

        self.next(
            ResourcePhase::Deleting,
            false,
            "ToBeDeleted",
            "deletion timestamp detected",
            true,
        )
        .await?;
        Ok(Some(Action::requeue(Duration::ZERO)))
    }

    /// Attach the finalizer and start creation
    pub async fn initialize_resource(&mut self, finalizer: &str) -> Result<Action, Error> {
        if !self.has_finalizer(finalizer) {
            self.object
                .meta_mut()
                .finalizers
                .get_or_insert_with(Vec::new)
                .push(finalizer.to_string());
            match self.store.update(&self.object).await {
                Ok(updated) => self.object = updated,
                Err(e) => return self.next_on_api_error(e).await,
            }
        }

        self.next(
            ResourcePhase::Creating,
            false,
            "Initialized",
            "Resource initialized successfully",
            true,
        )
        .await
    }

    /// Run the remote create call and record the assigned identifier
    pub async fn handle_creating<F>(&mut self, create: F) -> Result<Action, Error>
    where
        F: Future<Output = Result<RemoteCreation, Error>> + Send,
    {
        let created = match create.await {
            Ok(created) => created,
            Err(e) => return self.next_on_api_error(e).await,
        };

        self.object.resource_status_mut().resource_id = Some(created.id);

        if created
            .state
            .as_deref()
            .is_some_and(|s| PENDING_STATES.contains(&s))
        {
            return self
                .next(
                    ResourcePhase::Provisioning,
                    false,
                    "Provisioning",
                    "Resource is being provisioned",
                    true,
                )
                .await;
        }

        self.next(
            ResourcePhase::Created,
            true,
            "Created",
            "Resource created successfully",
            true,
        )
        .await
    }

    /// Poll the remote provisioning state
    pub async fn handle_provisioning<F>(&mut self, poll: F) -> Result<Action, Error>
    where
        F: Future<Output = Result<Option<String>, Error>> + Send,
    {
        let state = match poll.await {
            Ok(state) => state,
            Err(e) => return self.next_on_api_error(e).await,
        };

        match state.as_deref() {
            Some(s) if READY_STATES.contains(&s) => {
                self.next(
                    ResourcePhase::Created,
                    true,
                    "Created",
                    "Resource created successfully",
                    true,
                )
                .await
            }
            Some(s) if FAILED_STATES.contains(&s) => {
                let message = format!("Remote provisioning ended in state {s}");
                self.next(
                    ResourcePhase::Failed,
                    false,
                    "ProvisioningFailed",
                    message,
                    false,
                )
                .await
            }
            _ => {
                self.next(
                    ResourcePhase::Provisioning,
                    false,
                    "Provisioning",
                    "Resource is being provisioned",
                    true,
                )
                .await
            }
        }
    }

    /// Run the remote update call
    pub async fn handle_updating<F>(&mut self, update: F) -> Result<Action, Error>
    where
        F: Future<Output = Result<(), Error>> + Send,
    {
        if let Err(e) = update.await {
            return self.next_on_api_error(e).await;
        }

        self.next(
            ResourcePhase::Created,
            true,
            "Updated",
            "Resource updated successfully",
            true,
        )
        .await
    }

    /// Run the remote delete call and release the object
    ///
    /// The finalizer is only removed once the remote delete succeeded.
    pub async fn handle_deletion<F>(&mut self, finalizer: &str, delete: F) -> Result<Action, Error>
    where
        F: Future<Output = Result<(), Error>> + Send,
    {
        if let Err(e) = delete.await {
            return self.next_on_api_error(e).await;
        }

        if self.has_finalizer(finalizer) {
            if let Some(finalizers) = self.object.meta_mut().finalizers.as_mut() {
                finalizers.retain(|f| f != finalizer);
            }
            match self.store.update(&self.object).await {
                Ok(updated) => self.object = updated,
                Err(e) if e.is_not_found() => {
                    debug!(name = %self.object.name_any(), "object already gone");
                }
                Err(e) => return self.next_on_api_error(e).await,
            }
        }

        info!(name = %self.object.name_any(), "remote resource deleted, finalizer released");
        Ok(Action::await_change())
    }

    /// Start an update when the spec generation moved past the observed one
    pub async fn check_for_updates(&mut self) -> Result<Action, Error> {
        let generation = self.object.meta().generation;
        let observed = self.status().and_then(|s| s.observed_generation);
        if observed == generation {
            debug!(?generation, "resource is up to date");
            return Ok(Action::await_change());
        }

        info!(?generation, ?observed, "generation mismatch detected");
        self.next(
            ResourcePhase::Updating,
            false,
            "Updating",
            "Resource update initiated",
            true,
        )
        .await
    }
}
