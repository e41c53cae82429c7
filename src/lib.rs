//! Resource Operator - drives declarative cloud resources through a remote provider API
//!
//! Every managed kind shares one reconciliation engine: a phase state machine
//! with timeout, debounce and retry policy, a tenant-scoped credential
//! manager, and an authenticated gateway client whose error taxonomy decides
//! between retry and terminal failure.
//!
//! # Modules
//!
//! - [`crd`] - Custom Resource Definitions (Project, BlockStorage) and shared status types
//! - [`controller`] - Reconciliation engine and per-kind lifecycles
//! - [`credentials`] - OAuth2 token cache and AppRole secret backend client
//! - [`gateway`] - Remote API client and structured API errors
//! - [`config`] - Flag and environment configuration
//! - [`retry`] - Backoff for startup calls
//! - [`clock`] - Time source abstraction
//! - [`error`] - Error types for the operator

#![deny(missing_docs)]

pub mod clock;
pub mod config;
pub mod controller;
pub mod crd;
pub mod credentials;
pub mod error;
pub mod gateway;
pub mod retry;

use std::time::Duration;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Default Configuration Constants
// =============================================================================

/// Default delay between retries of the same phase
pub const DEFAULT_REQUEUE_INTERVAL: Duration = Duration::from_secs(20);

/// Default longest time an object may spend in a transitioning phase
pub const DEFAULT_MAX_PHASE_TIMEOUT: Duration = Duration::from_secs(300);

/// Field manager used for status patches
pub const FIELD_MANAGER: &str = "resource-operator";
