//! Block storage endpoints

use serde::{Deserialize, Serialize};

use super::client::GatewayClient;
use super::projects::ResponseMetadata;
use crate::Error;

/// Location wrapper used by the API
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct LocationValue {
    /// Location code
    pub value: String,
}

/// Metadata block of a volume request
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct BlockStorageMetadata {
    /// Volume name
    pub name: String,
    /// Tags
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Region
    pub location: LocationValue,
}

/// Properties block of a volume request
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BlockStorageProperties {
    /// Size in GB
    pub size_gb: i32,
    /// Billing period
    pub billing_period: String,
    /// Data center
    pub data_center: String,
    /// Performance tier
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,
    /// Bootable flag
    #[serde(default)]
    pub bootable: bool,
    /// Boot image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

/// Create/update body for a volume
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct BlockStorageRequest {
    /// Metadata
    pub metadata: BlockStorageMetadata,
    /// Properties
    pub properties: BlockStorageProperties,
}

/// Provisioning state reported by the API
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct RemoteStatus {
    /// State name (InCreation, Used, NotUsed, Failed, ...)
    #[serde(default)]
    pub state: String,
}

/// Volume as returned by the API
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct BlockStorageResponse {
    /// Identity
    pub metadata: ResponseMetadata,
    /// Provisioning state, absent on some responses
    #[serde(default)]
    pub status: Option<RemoteStatus>,
}

impl BlockStorageResponse {
    /// Remote state, if reported
    pub fn state(&self) -> Option<String> {
        self.status
            .as_ref()
            .map(|s| s.state.clone())
            .filter(|s| !s.is_empty())
    }
}

fn collection(project_id: &str) -> String {
    format!("/projects/{project_id}/providers/Storage/blockStorages")
}

impl GatewayClient {
    /// Create a volume inside a project
    pub async fn create_block_storage(
        &self,
        project_id: &str,
        req: &BlockStorageRequest,
    ) -> Result<BlockStorageResponse, Error> {
        self.post(&collection(project_id), req).await
    }

    /// Fetch a volume
    pub async fn get_block_storage(
        &self,
        project_id: &str,
        volume_id: &str,
    ) -> Result<BlockStorageResponse, Error> {
        self.get(&format!("{}/{volume_id}", collection(project_id)))
            .await
    }

    /// Update a volume
    pub async fn update_block_storage(
        &self,
        project_id: &str,
        volume_id: &str,
        req: &BlockStorageRequest,
    ) -> Result<Option<BlockStorageResponse>, Error> {
        self.put(&format!("{}/{volume_id}", collection(project_id)), req)
            .await
    }

    /// Delete a volume
    pub async fn delete_block_storage(&self, project_id: &str, volume_id: &str) -> Result<(), Error> {
        self.delete(&format!("{}/{volume_id}", collection(project_id)))
            .await
    }
}
