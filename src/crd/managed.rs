//! Capability every resource kind exposes to the reconciliation engine

use k8s_openapi::NamespaceResourceScope;
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::types::ResourceStatus;

/// A namespaced custom resource driven through the phase lifecycle
///
/// Generation, deletion timestamp and finalizers come from the object
/// metadata; this trait only adds what lives in the spec and status.
pub trait ManagedResource:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + std::fmt::Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    /// Tenant owning the remote resource, if one is set
    fn tenant(&self) -> Option<&str>;

    /// Engine-owned part of the status, if the object has a status yet
    fn resource_status(&self) -> Option<&ResourceStatus>;

    /// Engine-owned part of the status, created on first access
    fn resource_status_mut(&mut self) -> &mut ResourceStatus;
}

/// Treat an empty tenant string the same as a missing one
pub(crate) fn non_empty(tenant: &str) -> Option<&str> {
    Some(tenant).filter(|t| !t.trim().is_empty())
}
