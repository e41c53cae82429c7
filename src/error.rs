//! Error types for the resource operator

use thiserror::Error;

use crate::gateway::ApiError;

/// Main error type for resource operator operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// The object no longer exists in the control plane
    #[error("object not found: {0}")]
    NotFound(String),

    /// A hard precondition of the reconcile invocation is not met
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// Structured error returned by the remote cloud API
    #[error(transparent)]
    Api(#[from] ApiError),

    /// The remote call could not be completed
    #[error("transport error: {0}")]
    Transport(String),

    /// The invocation was cancelled while a remote call was in flight
    #[error("operation cancelled")]
    Cancelled,

    /// The identity provider rejected or failed the token request
    #[error("authentication error: {0}")]
    Authentication(String),

    /// Secret backend login, renewal or read failure
    #[error("secret backend error: {0}")]
    SecretBackend(String),

    /// A resource this object depends on is not usable yet
    #[error("dependency not ready: {0}")]
    DependencyNotReady(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Invalid or missing operator configuration
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Create a not-found error for the given object
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a precondition error with the given message
    pub fn precondition(msg: impl Into<String>) -> Self {
        Self::Precondition(msg.into())
    }

    /// Create a transport error with the given message
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create an authentication error with the given message
    pub fn authentication(msg: impl Into<String>) -> Self {
        Self::Authentication(msg.into())
    }

    /// Create a secret backend error with the given message
    pub fn secret_backend(msg: impl Into<String>) -> Self {
        Self::SecretBackend(msg.into())
    }

    /// Create a dependency-not-ready error with the given message
    pub fn dependency_not_ready(msg: impl Into<String>) -> Self {
        Self::DependencyNotReady(msg.into())
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create a configuration error with the given message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Structured remote API error, if this is one
    pub fn api_error(&self) -> Option<&ApiError> {
        match self {
            Error::Api(e) => Some(e),
            _ => None,
        }
    }

    /// Returns true if the object was not found in the control plane
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound(_) => true,
            Error::Kube(kube::Error::Api(ae)) => ae.code == 404,
            _ => false,
        }
    }

    /// Check if the scheduler should retry the invocation that produced this error
    ///
    /// Precondition and configuration errors need a change to the object or to
    /// the operator deployment before another attempt can succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Precondition(_) | Error::Config(_) => false,
            Error::Serialization(_) => false,
            Error::NotFound(_) => false,
            Error::Api(e) => !e.is_client_error() || e.is_invalid_status(),
            Error::Kube(_)
            | Error::Transport(_)
            | Error::Cancelled
            | Error::Authentication(_)
            | Error::SecretBackend(_)
            | Error::DependencyNotReady(_) => true,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==========================================================================
    // Story Tests: How failures surface from a reconcile invocation
    // ==========================================================================

    /// Story: A resource without a tenant in multi-tenant mode can never succeed
    ///
    /// The object has to be edited before another attempt makes sense, so the
    /// scheduler should wait for a change rather than retry.
    #[test]
    fn story_missing_tenant_is_not_retried() {
        let err = Error::precondition("tenant is not specified in the resource spec");
        assert!(err.to_string().contains("precondition failed"));
        assert!(err.to_string().contains("tenant"));
        assert!(!err.is_retryable());
    }

    /// Story: Network trouble and cancellations are always worth another try
    #[test]
    fn story_transport_failures_are_retried() {
        assert!(Error::transport("connection reset by peer").is_retryable());
        assert!(Error::Cancelled.is_retryable());
        assert!(Error::authentication("identity provider returned 503").is_retryable());
        assert!(Error::secret_backend("sealed").is_retryable());
        assert!(Error::dependency_not_ready("project has no id yet").is_retryable());
    }

    /// Story: Structured remote errors carry their own retry semantics
    ///
    /// 400 and 404 mean "not ready yet" for this API; other 4xx are final.
    #[test]
    fn story_structured_errors_follow_status_code() {
        assert!(Error::from(ApiError::minimal(404)).is_retryable());
        assert!(Error::from(ApiError::minimal(400)).is_retryable());
        assert!(!Error::from(ApiError::minimal(422)).is_retryable());
        assert!(Error::from(ApiError::minimal(503)).is_retryable());
    }

    #[test]
    fn test_api_error_accessor() {
        let err = Error::from(ApiError::minimal(409));
        assert_eq!(err.api_error().map(|e| e.status), Some(409));
        assert!(Error::transport("boom").api_error().is_none());
    }

    #[test]
    fn test_not_found_detection() {
        assert!(Error::not_found("default/web").is_not_found());
        assert!(!Error::config("missing api-gateway").is_not_found());
    }

    #[test]
    fn test_serde_json_errors_become_serialization_errors() {
        let parse: Result<serde_json::Value, _> = serde_json::from_str("{not json");
        let err: Error = parse.unwrap_err().into();
        assert!(matches!(err, Error::Serialization(_)));
        assert!(!err.is_retryable());
    }
}
