//! Error types for the EKS provisioning orchestrator

use thiserror::Error;

use crate::cloud::ServiceError;

/// Main error type for provisioning operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Input rejected before any remote call was made
    #[error("validation error: {0}")]
    Validation(String),

    /// A remote API rejected a request outright
    #[error("{operation} failed for {resource}: {source}")]
    Api {
        /// Operation that was attempted (e.g. "create stack")
        operation: &'static str,
        /// Name or ID of the resource the operation targeted
        resource: String,
        /// Error returned by the service
        #[source]
        source: ServiceError,
    },

    /// A CloudFormation stack reached a terminal state other than CREATE_COMPLETE
    #[error("stack {stack} failed to create: {reason}")]
    StackFailed {
        /// Stack name
        stack: String,
        /// Best-effort reason taken from the stack's event history
        reason: String,
    },

    /// Waiting for a stack to settle was aborted
    #[error("error polling stack {stack}: {message}")]
    StackPolling {
        /// Stack name
        stack: String,
        /// What went wrong while polling
        message: String,
    },

    /// A stack template could not be rendered
    #[error("template error: {0}")]
    Template(String),

    /// The issuer certificate thumbprint could not be derived
    #[error("thumbprint error: {0}")]
    Thumbprint(String),

    /// A lookup returned nothing where something was required
    #[error("not found: {0}")]
    NotFound(String),
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Wrap a service error with the operation and resource it came from
    pub fn api(operation: &'static str, resource: impl Into<String>, source: ServiceError) -> Self {
        Self::Api {
            operation,
            resource: resource.into(),
            source,
        }
    }

    /// Create a stack failure error
    pub fn stack_failed(stack: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::StackFailed {
            stack: stack.into(),
            reason: reason.into(),
        }
    }

    /// Create a stack polling error
    pub fn stack_polling(stack: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StackPolling {
            stack: stack.into(),
            message: message.into(),
        }
    }

    /// Create a template rendering error
    pub fn template(msg: impl Into<String>) -> Self {
        Self::Template(msg.into())
    }

    /// Create a thumbprint error
    pub fn thumbprint(msg: impl Into<String>) -> Self {
        Self::Thumbprint(msg.into())
    }

    /// Create a not found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// The underlying service error, if this error came from a remote API
    pub fn service_error(&self) -> Option<&ServiceError> {
        match self {
            Self::Api { source, .. } => Some(source),
            _ => None,
        }
    }
}
