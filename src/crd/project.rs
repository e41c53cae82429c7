//! Project Custom Resource Definition
//!
//! A Project groups remote resources for one tenant. Most other resource
//! kinds reference a Project and are created inside it.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::managed::{non_empty, ManagedResource};
use super::types::ResourceStatus;

/// Finalizer guarding remote project cleanup
pub const PROJECT_FINALIZER: &str = "project.cloud.resource-operator.io/finalizer";

/// Specification for a Project
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "cloud.resource-operator.io",
    version = "v1alpha1",
    kind = "Project",
    plural = "projects",
    shortname = "proj",
    status = "ResourceStatus",
    namespaced,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"ID","type":"string","jsonPath":".status.resourceID"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSpec {
    /// Owning tenant
    #[serde(default)]
    pub tenant: String,

    /// Free-form description shown in the provider console
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Tags attached to the remote project
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    /// Whether this is the tenant's default project
    #[serde(default)]
    pub default: bool,
}

impl ManagedResource for Project {
    fn tenant(&self) -> Option<&str> {
        non_empty(&self.spec.tenant)
    }

    fn resource_status(&self) -> Option<&ResourceStatus> {
        self.status.as_ref()
    }

    fn resource_status_mut(&mut self) -> &mut ResourceStatus {
        self.status.get_or_insert_with(ResourceStatus::default)
    }
}
