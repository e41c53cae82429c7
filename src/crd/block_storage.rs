//! BlockStorage Custom Resource Definition
//!
//! A volume created inside a Project. Volumes are provisioned asynchronously
//! by the provider, so they exercise the Provisioning phase.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::managed::{non_empty, ManagedResource};
use super::types::{Location, ResourceReference, ResourceStatus};

/// Finalizer guarding remote volume cleanup
pub const BLOCK_STORAGE_FINALIZER: &str = "blockstorage.cloud.resource-operator.io/finalizer";

/// Specification for a BlockStorage volume
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "cloud.resource-operator.io",
    version = "v1alpha1",
    kind = "BlockStorage",
    plural = "blockstorages",
    shortname = "bs",
    status = "BlockStorageStatus",
    namespaced,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Size","type":"integer","jsonPath":".spec.sizeGb"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct BlockStorageSpec {
    /// Owning tenant
    #[serde(default)]
    pub tenant: String,

    /// Tags attached to the remote volume
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    /// Region for the volume
    pub location: Location,

    /// Size in GB (1-16384)
    pub size_gb: i32,

    /// Billing period (Hour, Month)
    pub billing_period: String,

    /// Data center within the region
    pub data_center: String,

    /// Performance tier (Standard, Performance)
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,

    /// Whether the volume can be used as a boot disk
    #[serde(default)]
    pub bootable: bool,

    /// Image to initialize a bootable volume from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Project that owns this volume
    pub project_reference: ResourceReference,
}

/// Status for a BlockStorage volume
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BlockStorageStatus {
    /// Engine-owned lifecycle status
    #[serde(flatten)]
    pub resource: ResourceStatus,

    /// Remote project the volume was created in
    #[serde(default, rename = "projectID", skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
}

impl BlockStorage {
    /// Remote project id recorded at creation time
    pub fn project_id(&self) -> Option<&str> {
        self.status.as_ref().and_then(|s| s.project_id.as_deref())
    }
}

impl ManagedResource for BlockStorage {
    fn tenant(&self) -> Option<&str> {
        non_empty(&self.spec.tenant)
    }

    fn resource_status(&self) -> Option<&ResourceStatus> {
        self.status.as_ref().map(|s| &s.resource)
    }

    fn resource_status_mut(&mut self) -> &mut ResourceStatus {
        &mut self
            .status
            .get_or_insert_with(BlockStorageStatus::default)
            .resource
    }
}
