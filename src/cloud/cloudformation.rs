//! CloudFormation stack API

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use super::{ServiceError, Tag};

/// Capability required by stacks that create IAM resources
pub const CAPABILITY_IAM: &str = "CAPABILITY_IAM";

/// Stack and resource status values
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StackStatus {
    /// CREATE_IN_PROGRESS
    CreateInProgress,
    /// CREATE_COMPLETE
    CreateComplete,
    /// CREATE_FAILED
    CreateFailed,
    /// ROLLBACK_IN_PROGRESS
    RollbackInProgress,
    /// ROLLBACK_COMPLETE
    RollbackComplete,
    /// ROLLBACK_FAILED
    RollbackFailed,
    /// Any status the orchestrator does not act on
    Other(String),
}

impl StackStatus {
    /// The wire representation of the status
    pub fn as_str(&self) -> &str {
        match self {
            Self::CreateInProgress => "CREATE_IN_PROGRESS",
            Self::CreateComplete => "CREATE_COMPLETE",
            Self::CreateFailed => "CREATE_FAILED",
            Self::RollbackInProgress => "ROLLBACK_IN_PROGRESS",
            Self::RollbackComplete => "ROLLBACK_COMPLETE",
            Self::RollbackFailed => "ROLLBACK_FAILED",
            Self::Other(s) => s,
        }
    }
}

impl From<&str> for StackStatus {
    fn from(s: &str) -> Self {
        match s {
            "CREATE_IN_PROGRESS" => Self::CreateInProgress,
            "CREATE_COMPLETE" => Self::CreateComplete,
            "CREATE_FAILED" => Self::CreateFailed,
            "ROLLBACK_IN_PROGRESS" => Self::RollbackInProgress,
            "ROLLBACK_COMPLETE" => Self::RollbackComplete,
            "ROLLBACK_FAILED" => Self::RollbackFailed,
            other => Self::Other(other.to_string()),
        }
    }
}

impl std::fmt::Display for StackStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A template parameter
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StackParameter {
    /// Parameter name
    pub key: String,
    /// Parameter value
    pub value: String,
}

/// Request to create a stack
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CreateStackInput {
    /// Stack name
    pub stack_name: String,
    /// Template body
    pub template_body: String,
    /// Capabilities acknowledged for this template
    pub capabilities: Vec<String>,
    /// Template parameters
    pub parameters: Vec<StackParameter>,
    /// Tags applied to the stack
    pub tags: Vec<Tag>,
}

/// A named stack output
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StackOutput {
    /// Logical output name
    pub output_key: String,
    /// Output value
    pub output_value: String,
}

/// Description of a stack
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Stack {
    /// Stack name
    pub stack_name: String,
    /// Current stack status
    pub stack_status: StackStatus,
    /// Outputs, populated once the stack completes
    pub outputs: Vec<StackOutput>,
}

impl Stack {
    /// Value of the named output, or an empty string if the stack has no such output
    pub fn output_value(&self, key: &str) -> &str {
        self.outputs
            .iter()
            .find(|o| o.output_key == key)
            .map(|o| o.output_value.as_str())
            .unwrap_or("")
    }
}

/// One entry of a stack's event history
///
/// Fields are optional because the service omits them for some events.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StackEvent {
    /// Logical ID of the resource the event is about
    pub logical_resource_id: Option<String>,
    /// Resource status at the time of the event
    pub resource_status: Option<StackStatus>,
    /// Human readable reason for the status
    pub resource_status_reason: Option<String>,
}

/// CloudFormation operations used by the orchestrator
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CloudFormationApi: Send + Sync {
    /// Submit a stack for creation, returning its stack ID
    async fn create_stack(&self, input: &CreateStackInput) -> Result<String, ServiceError>;

    /// Describe the stack with the given name
    async fn describe_stacks(&self, stack_name: &str) -> Result<Vec<Stack>, ServiceError>;

    /// List the stack's event history, newest event first as CloudFormation returns it
    async fn describe_stack_events(&self, stack_name: &str)
        -> Result<Vec<StackEvent>, ServiceError>;
}
