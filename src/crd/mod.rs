//! Custom Resource Definitions for the resource operator
//!
//! This module contains the managed resource kinds and the status types
//! the reconciliation engine writes into them.

mod block_storage;
mod managed;
mod project;
mod types;

pub use block_storage::{
    BlockStorage, BlockStorageSpec, BlockStorageStatus, BLOCK_STORAGE_FINALIZER,
};
pub use managed::ManagedResource;
pub use project::{Project, ProjectSpec, PROJECT_FINALIZER};
pub use types::{
    Condition, ConditionStatus, Location, ResourcePhase, ResourceReference, ResourceStatus,
    SYNCHRONIZED_CONDITION,
};
