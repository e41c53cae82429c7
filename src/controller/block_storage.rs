//! BlockStorage lifecycle
//!
//! Volumes live inside a Project. The project's remote id is resolved from
//! the referenced Project object before the create call and recorded in the
//! volume status so later phases do not depend on the Project any more.

use std::sync::Arc;

use async_trait::async_trait;
use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::debug;

use super::lifecycle::ResourceLifecycle;
use super::scope::{ReconcileScope, RemoteCreation};
use super::store::ObjectStore;
use crate::crd::{
    BlockStorage, BlockStorageStatus, ManagedResource, Project, ResourceReference,
    BLOCK_STORAGE_FINALIZER,
};
use crate::gateway::{
    BlockStorageMetadata, BlockStorageProperties, BlockStorageRequest, LocationValue,
};
use crate::Error;

/// Remote id of the referenced Project
///
/// Fails with [`Error::DependencyNotReady`] while the Project is missing or
/// has not been created remotely yet.
pub async fn resolve_project_id(
    projects: &dyn ObjectStore<Project>,
    reference: &ResourceReference,
    default_namespace: &str,
) -> Result<String, Error> {
    let namespace = reference
        .namespace
        .as_deref()
        .filter(|ns| !ns.is_empty())
        .unwrap_or(default_namespace);

    let project = projects
        .get(namespace, &reference.name)
        .await?
        .ok_or_else(|| {
            Error::dependency_not_ready(format!(
                "project {namespace}/{} not found",
                reference.name
            ))
        })?;

    project
        .resource_status()
        .and_then(|s| s.resource_id.clone())
        .filter(|id| !id.is_empty())
        .ok_or_else(|| {
            Error::dependency_not_ready(format!(
                "project {namespace}/{} has no remote id yet",
                reference.name
            ))
        })
}

/// Phase callbacks for [`BlockStorage`]
pub struct BlockStorageLifecycle {
    projects: Arc<dyn ObjectStore<Project>>,
}

impl BlockStorageLifecycle {
    /// Create a lifecycle resolving project references through `projects`
    pub fn new(projects: Arc<dyn ObjectStore<Project>>) -> Self {
        Self { projects }
    }
}

fn volume_request(volume: &BlockStorage) -> BlockStorageRequest {
    let spec = &volume.spec;
    BlockStorageRequest {
        metadata: BlockStorageMetadata {
            name: volume.name_any(),
            tags: spec.tags.clone(),
            location: LocationValue {
                value: spec.location.value.clone(),
            },
        },
        properties: BlockStorageProperties {
            size_gb: spec.size_gb,
            billing_period: spec.billing_period.clone(),
            data_center: spec.data_center.clone(),
            type_: spec.type_.clone(),
            bootable: spec.bootable,
            image: spec.image.clone(),
        },
    }
}

/// Project and volume ids recorded in the status
fn remote_ids(scope: &ReconcileScope<BlockStorage>) -> Option<(String, String)> {
    let project = scope.object().project_id()?.to_string();
    let volume = scope.resource_id()?.to_string();
    Some((project, volume))
}

#[async_trait]
impl ResourceLifecycle<BlockStorage> for BlockStorageLifecycle {
    async fn init(&self, scope: &mut ReconcileScope<BlockStorage>) -> Result<Action, Error> {
        scope.initialize_resource(BLOCK_STORAGE_FINALIZER).await
    }

    async fn creating(&self, scope: &mut ReconcileScope<BlockStorage>) -> Result<Action, Error> {
        let namespace = scope.object().namespace().unwrap_or_default();
        let reference = scope.object().spec.project_reference.clone();
        let project_id =
            match resolve_project_id(self.projects.as_ref(), &reference, &namespace).await {
                Ok(id) => id,
                Err(e) => return scope.next_on_api_error(e).await,
            };
        debug!(%project_id, "resolved owning project");

        scope
            .object_mut()
            .status
            .get_or_insert_with(BlockStorageStatus::default)
            .project_id = Some(project_id.clone());

        let gateway = scope.gateway().clone();
        let request = volume_request(scope.object());
        scope
            .handle_creating(async move {
                let created = gateway.create_block_storage(&project_id, &request).await?;
                let state = created.state();
                Ok(RemoteCreation {
                    id: created.metadata.id,
                    state,
                })
            })
            .await
    }

    async fn provisioning(
        &self,
        scope: &mut ReconcileScope<BlockStorage>,
    ) -> Result<Action, Error> {
        let gateway = scope.gateway().clone();
        let ids = remote_ids(scope);
        scope
            .handle_provisioning(async move {
                let (project_id, volume_id) = ids.ok_or_else(|| {
                    Error::dependency_not_ready("volume has no remote id yet")
                })?;
                let volume = gateway.get_block_storage(&project_id, &volume_id).await?;
                Ok(volume.state())
            })
            .await
    }

    async fn updating(&self, scope: &mut ReconcileScope<BlockStorage>) -> Result<Action, Error> {
        let gateway = scope.gateway().clone();
        let request = volume_request(scope.object());
        let ids = remote_ids(scope);
        scope
            .handle_updating(async move {
                let (project_id, volume_id) = ids.ok_or_else(|| {
                    Error::dependency_not_ready("volume has no remote id yet")
                })?;
                gateway
                    .update_block_storage(&project_id, &volume_id, &request)
                    .await?;
                Ok(())
            })
            .await
    }

    async fn created(&self, scope: &mut ReconcileScope<BlockStorage>) -> Result<Action, Error> {
        scope.check_for_updates().await
    }

    async fn deleting(&self, scope: &mut ReconcileScope<BlockStorage>) -> Result<Action, Error> {
        let gateway = scope.gateway().clone();
        let ids = remote_ids(scope);
        scope
            .handle_deletion(BLOCK_STORAGE_FINALIZER, async move {
                match ids {
                    Some((project_id, volume_id)) => {
                        gateway.delete_block_storage(&project_id, &volume_id).await
                    }
                    None => Ok(()),
                }
            })
            .await
    }
}
