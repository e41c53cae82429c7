//! Per-kind callbacks the reconciliation engine dispatches to

use async_trait::async_trait;
use kube::runtime::controller::Action;

use super::scope::ReconcileScope;
use crate::crd::ManagedResource;
use crate::Error;

/// Phase callbacks for one managed resource kind
///
/// The engine calls exactly one method per invocation, chosen by the
/// object's current phase. Implementations usually delegate to the
/// standard helpers on [`ReconcileScope`].
#[async_trait]
pub trait ResourceLifecycle<K: ManagedResource>: Send + Sync {
    /// Phase is empty: attach the finalizer and start creation
    async fn init(&self, scope: &mut ReconcileScope<K>) -> Result<Action, Error>;

    /// Issue the remote create call
    async fn creating(&self, scope: &mut ReconcileScope<K>) -> Result<Action, Error>;

    /// Poll an asynchronously provisioned resource
    async fn provisioning(&self, scope: &mut ReconcileScope<K>) -> Result<Action, Error>;

    /// Push spec changes to the remote resource
    async fn updating(&self, scope: &mut ReconcileScope<K>) -> Result<Action, Error>;

    /// Steady state: look for spec changes
    async fn created(&self, scope: &mut ReconcileScope<K>) -> Result<Action, Error>;

    /// Delete the remote resource and release the finalizer
    async fn deleting(&self, scope: &mut ReconcileScope<K>) -> Result<Action, Error>;
}
