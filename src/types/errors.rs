//! Application error types.
//!
//! All errors use `thiserror` for automatic Error trait derivation and provide
//! clear error messages with context.

use thiserror::Error;

/// Application result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error enum for the Gantry deployment engine.
#[derive(Error, Debug)]
pub enum Error {
    /// Validation errors (malformed descriptors, bad configuration).
    #[error("validation error: {0}")]
    Validation(String),

    /// Artifact or resource not found. Undeploy of an unknown identity
    /// always surfaces this, never a silent no-op.
    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid lifecycle state transition.
    #[error("state transition error: {0}")]
    StateTransition(String),

    /// Artifact construction or start failed. The original cause is always
    /// carried as the source; it is never flattened into a cause-less wrapper.
    #[error("deployment of artifact '{id}' failed: {cause}")]
    DeploymentFailed {
        id: String,
        #[source]
        cause: Box<Error>,
    },

    /// Deferred resource deletion failed. Retried up to a bound, then
    /// reported and abandoned; never escalated to a deployment failure.
    #[error("cleanup failed: {0}")]
    Cleanup(String),

    /// A registered listener failed. Isolated per listener; does not abort
    /// sibling listeners or the transition itself.
    #[error("listener error: {0}")]
    Listener(String),

    /// Operation not supported (dynamic deployment disabled).
    #[error("operation not supported: {0}")]
    Unsupported(String),

    /// Internal errors.
    #[error("internal error: {0}")]
    Internal(String),

    /// Serialization/deserialization errors.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

// Convenience constructors
impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn state_transition(msg: impl Into<String>) -> Self {
        Self::StateTransition(msg.into())
    }

    pub fn deployment(id: impl Into<String>, cause: Error) -> Self {
        Self::DeploymentFailed {
            id: id.into(),
            cause: Box::new(cause),
        }
    }

    pub fn cleanup(msg: impl Into<String>) -> Self {
        Self::Cleanup(msg.into())
    }

    pub fn listener(msg: impl Into<String>) -> Self {
        Self::Listener(msg.into())
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// The original cause of a deployment failure, or the error itself for
    /// every other variant.
    pub fn deployment_cause(&self) -> &Error {
        match self {
            Error::DeploymentFailed { cause, .. } => cause,
            other => other,
        }
    }
}
