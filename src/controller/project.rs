//! Project lifecycle
//!
//! Projects are created synchronously by the provider, so a successful
//! create goes straight to Created.

use async_trait::async_trait;
use kube::runtime::controller::Action;
use kube::ResourceExt;

use super::lifecycle::ResourceLifecycle;
use super::scope::{ReconcileScope, RemoteCreation};
use crate::crd::{Project, PROJECT_FINALIZER};
use crate::gateway::{ProjectMetadata, ProjectProperties, ProjectRequest};
use crate::Error;

/// Phase callbacks for [`Project`]
#[derive(Clone, Copy, Debug, Default)]
pub struct ProjectLifecycle;

fn project_request(project: &Project) -> ProjectRequest {
    ProjectRequest {
        metadata: ProjectMetadata {
            name: project.name_any(),
            tags: project.spec.tags.clone(),
        },
        properties: ProjectProperties {
            description: project.spec.description.clone(),
            default: project.spec.default,
        },
    }
}

fn remote_id(scope: &ReconcileScope<Project>) -> Result<String, Error> {
    scope
        .resource_id()
        .map(str::to_string)
        .ok_or_else(|| Error::dependency_not_ready("project has no remote id yet"))
}

#[async_trait]
impl ResourceLifecycle<Project> for ProjectLifecycle {
    async fn init(&self, scope: &mut ReconcileScope<Project>) -> Result<Action, Error> {
        scope.initialize_resource(PROJECT_FINALIZER).await
    }

    async fn creating(&self, scope: &mut ReconcileScope<Project>) -> Result<Action, Error> {
        let gateway = scope.gateway().clone();
        let request = project_request(scope.object());
        scope
            .handle_creating(async move {
                let created = gateway.create_project(&request).await?;
                Ok(RemoteCreation::ready(created.metadata.id))
            })
            .await
    }

    async fn provisioning(&self, _scope: &mut ReconcileScope<Project>) -> Result<Action, Error> {
        Ok(Action::await_change())
    }

    async fn updating(&self, scope: &mut ReconcileScope<Project>) -> Result<Action, Error> {
        let gateway = scope.gateway().clone();
        let request = project_request(scope.object());
        let id = remote_id(scope);
        scope
            .handle_updating(async move {
                gateway.update_project(&id?, &request).await?;
                Ok(())
            })
            .await
    }

    async fn created(&self, scope: &mut ReconcileScope<Project>) -> Result<Action, Error> {
        scope.check_for_updates().await
    }

    async fn deleting(&self, scope: &mut ReconcileScope<Project>) -> Result<Action, Error> {
        let gateway = scope.gateway().clone();
        // never created remotely: nothing to delete
        let id = scope.resource_id().map(str::to_string);
        scope
            .handle_deletion(PROJECT_FINALIZER, async move {
                match id {
                    Some(id) => gateway.delete_project(&id).await,
                    None => Ok(()),
                }
            })
            .await
    }
}
