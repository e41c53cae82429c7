//! Remote gateway client for the cloud provider API
//!
//! [`GatewayClient`] performs single authenticated calls and classifies the
//! HTTP status; [`ApiError`] is the structured failure the reconciliation
//! engine's classifier consumes. Endpoint helpers for each resource kind live
//! in their own submodule.

mod block_storage;
mod client;
mod error;
mod projects;

pub use block_storage::{
    BlockStorageMetadata, BlockStorageProperties, BlockStorageRequest, BlockStorageResponse,
    LocationValue, RemoteStatus,
};
pub use client::{
    classify_response, GatewayClient, GatewayRequest, GatewayResponse, HttpTransport,
    ReqwestTransport,
};
#[cfg(test)]
pub use client::MockHttpTransport;
pub use error::{ApiError, FieldError};
pub use projects::{
    ProjectMetadata, ProjectProperties, ProjectRequest, ProjectResponse, ResponseMetadata,
};
