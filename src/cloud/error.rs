//! Error returned by every remote service call

use std::fmt;

/// Error code CloudFormation returns when a stack with the same name exists
pub const ALREADY_EXISTS_CODE: &str = "AlreadyExistsException";

/// Error code EKS returns when a named resource is missing
pub const RESOURCE_NOT_FOUND_CODE: &str = "ResourceNotFoundException";

/// Marker EC2 puts in the message when a described resource is missing
const DOES_NOT_EXIST_MARKER: &str = "does not exist";

/// An error reported by a remote API
///
/// Carries the service's error code when it sent one, and its message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceError {
    code: Option<String>,
    message: String,
}

impl ServiceError {
    /// Create an error without a service error code
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    /// Create an error carrying a service error code
    pub fn with_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            message: message.into(),
        }
    }

    /// The service error code, if any
    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    /// The service message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// True when a create collided with an existing resource of the same name
    pub fn is_already_exists(&self) -> bool {
        self.code() == Some(ALREADY_EXISTS_CODE)
    }

    /// True when the service reported the resource as missing with a typed code
    pub fn is_resource_not_found(&self) -> bool {
        self.code() == Some(RESOURCE_NOT_FOUND_CODE)
    }

    /// True when the message says the resource does not exist
    ///
    /// EC2 does not give launch template lookups a typed not-found code, and it
    /// reports a missing template and a malformed request through the same
    /// field, so the message text is all there is to go on. If AWS rewords the
    /// message this silently stops matching.
    pub fn does_not_exist(&self) -> bool {
        self.to_string().contains(DOES_NOT_EXIST_MARKER)
    }
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{}: {}", code, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for ServiceError {}
