//! Project endpoints

use serde::{Deserialize, Serialize};

use super::client::GatewayClient;
use crate::Error;

/// Metadata block of a project request
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct ProjectMetadata {
    /// Project name
    pub name: String,
    /// Tags attached to the project
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// Properties block of a project request
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct ProjectProperties {
    /// Description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Default project flag
    #[serde(default)]
    pub default: bool,
}

/// Create/update body for a project
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct ProjectRequest {
    /// Metadata
    pub metadata: ProjectMetadata,
    /// Properties
    pub properties: ProjectProperties,
}

/// Identity assigned by the API
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct ResponseMetadata {
    /// Remote id
    #[serde(default)]
    pub id: String,
    /// Remote name
    #[serde(default)]
    pub name: String,
}

/// Project as returned by the API
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct ProjectResponse {
    /// Identity
    pub metadata: ResponseMetadata,
    /// Properties
    #[serde(default)]
    pub properties: ProjectProperties,
}

impl GatewayClient {
    /// Create a project
    pub async fn create_project(&self, req: &ProjectRequest) -> Result<ProjectResponse, Error> {
        self.post("/projects", req).await
    }

    /// Fetch a project
    pub async fn get_project(&self, project_id: &str) -> Result<ProjectResponse, Error> {
        self.get(&format!("/projects/{project_id}")).await
    }

    /// Replace a project's mutable fields
    ///
    /// The API may answer without a body.
    pub async fn update_project(
        &self,
        project_id: &str,
        req: &ProjectRequest,
    ) -> Result<Option<ProjectResponse>, Error> {
        self.put(&format!("/projects/{project_id}"), req).await
    }

    /// Delete a project
    pub async fn delete_project(&self, project_id: &str) -> Result<(), Error> {
        self.delete(&format!("/projects/{project_id}")).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_shape() {
        let req = ProjectRequest {
            metadata: ProjectMetadata {
                name: "billing".to_string(),
                tags: vec!["prod".to_string()],
            },
            properties: ProjectProperties {
                description: None,
                default: false,
            },
        };

        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            serde_json::json!({
                "metadata": {"name": "billing", "tags": ["prod"]},
                "properties": {"default": false}
            })
        );
    }
}
