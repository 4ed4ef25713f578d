//! Error types for declarative-kube

use std::time::Duration;

use thiserror::Error;

/// Result type for declarative-kube operations
pub type Result<T> = std::result::Result<T, DeclarativeError>;

/// Errors that can occur during a reconciliation pass
///
/// The first four variants are retry signals, not failures: they never move
/// an object into [`declarative_core::State::Error`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DeclarativeError {
    /// A renderer registered its conditions; the object must be requeued
    #[error("conditions are not yet registered")]
    ConditionsNotYetRegistered,

    /// Prerequisite types are installed but not acknowledged by the cluster yet
    #[error("prerequisites are not fulfilled")]
    PrerequisitesNotFulfilled,

    /// Applied resources have not reached a ready state yet
    #[error("resources are not ready")]
    ResourcesNotReady,

    /// Deleted resources are still visible in the cluster
    #[error("deletion is not yet finished")]
    DeletionNotFinished,

    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Api(#[from] kube::Error),

    /// Every apply in a batch was rejected as unauthorized
    #[error("the target cluster rejected the client as unauthorized")]
    ClientUnauthorized,

    /// One or more server-side applies failed
    #[error("ServerSideApply failed (after {elapsed:?}): {}", join_errors(.errors))]
    ServerSideApplyFailed {
        elapsed: Duration,
        errors: Vec<DeclarativeError>,
    },

    /// Several independent failures
    #[error("{}", join_errors(.0))]
    Multiple(Vec<DeclarativeError>),

    /// Error raised while operating on one resource
    #[error("{resource}: {source}")]
    ForResource {
        resource: String,
        #[source]
        source: Box<DeclarativeError>,
    },

    /// Rendering failed
    #[error("render error: {0}")]
    Render(#[from] declarative_engine::EngineError),

    /// Package or values error
    #[error(transparent)]
    Core(#[from] declarative_core::CoreError),

    /// Invalid manifest
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    /// The cluster does not serve a resource type
    #[error("resource type {0} is not served by the cluster")]
    UnknownResourceType(String),

    /// Render cache I/O failure other than a benign miss
    #[error("render cache error at {path}: {source}")]
    Cache {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Spec resolution failed
    #[error("spec error: {0}")]
    Spec(String),

    /// A pre-delete or post-run hook failed
    #[error("hook '{name}' failed: {message}")]
    Hook { name: String, message: String },

    /// A resource reached a terminal failed state
    #[error("resource {resource} failed: {message}")]
    ResourceFailed { resource: String, message: String },

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for DeclarativeError {
    fn from(e: serde_json::Error) -> Self {
        DeclarativeError::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for DeclarativeError {
    fn from(e: serde_yaml::Error) -> Self {
        DeclarativeError::Serialization(e.to_string())
    }
}

fn join_errors(errors: &[DeclarativeError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

impl DeclarativeError {
    /// Attach the identity of the resource an error happened on
    pub fn for_resource(resource: impl ToString, source: DeclarativeError) -> Self {
        DeclarativeError::ForResource {
            resource: resource.to_string(),
            source: Box::new(source),
        }
    }

    /// Strip [`DeclarativeError::ForResource`] wrappers
    pub fn root(&self) -> &DeclarativeError {
        match self {
            DeclarativeError::ForResource { source, .. } => source.root(),
            other => other,
        }
    }

    /// Check if this is a Kubernetes 404 Not Found error
    pub fn is_not_found(&self) -> bool {
        matches!(self.root(), DeclarativeError::Api(kube::Error::Api(resp)) if resp.code == 404)
    }

    /// Check if this is a conflict error (409)
    pub fn is_conflict(&self) -> bool {
        matches!(self.root(), DeclarativeError::Api(kube::Error::Api(resp)) if resp.code == 409)
    }

    /// Check if the cluster rejected the client (401)
    pub fn is_unauthorized(&self) -> bool {
        match self.root() {
            DeclarativeError::ClientUnauthorized => true,
            DeclarativeError::Api(kube::Error::Api(resp)) => resp.code == 401,
            _ => false,
        }
    }

    /// Retry signals that must not be reported as failures
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.root(),
            DeclarativeError::ConditionsNotYetRegistered
                | DeclarativeError::PrerequisitesNotFulfilled
                | DeclarativeError::ResourcesNotReady
                | DeclarativeError::DeletionNotFinished
        )
    }

    /// Whether this error is, or aggregates, a "not ready" signal
    pub fn contains_not_ready(&self) -> bool {
        match self.root() {
            DeclarativeError::ResourcesNotReady => true,
            DeclarativeError::Multiple(errors) => errors.iter().any(Self::contains_not_ready),
            _ => false,
        }
    }
}

#[cfg(test)]
pub(crate) fn api_error(code: u16, reason: &str) -> kube::Error {
    kube::Error::Api(kube::core::ErrorResponse {
        status: "Failure".to_string(),
        message: format!("{} ({})", reason, code),
        reason: reason.to_string(),
        code,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinels_are_retryable() {
        assert!(DeclarativeError::ConditionsNotYetRegistered.is_retryable());
        assert!(DeclarativeError::PrerequisitesNotFulfilled.is_retryable());
        assert!(DeclarativeError::ResourcesNotReady.is_retryable());
        assert!(DeclarativeError::DeletionNotFinished.is_retryable());
        assert!(!DeclarativeError::InvalidManifest("x".into()).is_retryable());
    }

    #[test]
    fn test_api_error_classification() {
        let not_found = DeclarativeError::Api(api_error(404, "NotFound"));
        assert!(not_found.is_not_found());
        assert!(!not_found.is_unauthorized());

        let wrapped = DeclarativeError::for_resource(
            "Deployment/default/web",
            DeclarativeError::Api(api_error(401, "Unauthorized")),
        );
        assert!(wrapped.is_unauthorized());
        assert!(wrapped.to_string().starts_with("Deployment/default/web: "));

        assert!(DeclarativeError::Api(api_error(409, "Conflict")).is_conflict());
    }

    #[test]
    fn test_multiple_joins_messages() {
        let err = DeclarativeError::Multiple(vec![
            DeclarativeError::InvalidManifest("first".into()),
            DeclarativeError::InvalidManifest("second".into()),
        ]);
        let message = err.to_string();
        assert!(message.contains("first"));
        assert!(message.contains("second"));
        assert!(!err.contains_not_ready());
    }

    #[test]
    fn test_ssa_failed_message() {
        let err = DeclarativeError::ServerSideApplyFailed {
            elapsed: Duration::from_millis(1500),
            errors: vec![DeclarativeError::InvalidManifest("bad".into())],
        };
        let message = err.to_string();
        assert!(message.starts_with("ServerSideApply failed (after 1.5s)"));
        assert!(message.contains("invalid manifest: bad"));
    }

    #[test]
    fn test_contains_not_ready_through_wrappers() {
        let err = DeclarativeError::Multiple(vec![DeclarativeError::for_resource(
            "Pod/x",
            DeclarativeError::ResourcesNotReady,
        )]);
        assert!(err.contains_not_ready());
    }
}
