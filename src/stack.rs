//! CloudFormation stack deployment
//!
//! Submits a template and waits for the stack to settle. Creation is
//! idempotent: a stack that already exists under the same name is waited on
//! instead of failing, so two provisioning attempts racing on the same stack
//! converge on the same outputs.
//!
//! The wait has no timeout of its own. Callers that need one wrap the future
//! in `tokio::time::timeout`.

use tracing::{debug, info, warn};

use crate::cloud::{
    CloudFormationApi, CreateStackInput, Stack, StackEvent, StackParameter, StackStatus, Tag,
};
use crate::config::StackPolicy;
use crate::{Error, Result};

/// Reason reported when the event history does not explain a failure
pub const UNKNOWN_FAILURE_REASON: &str = "reason unknown";

/// A stack to deploy
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StackRequest {
    /// Stack name; also the idempotency key
    pub name: String,
    /// Cluster display name, recorded as a stack tag
    pub display_name: String,
    /// Template body
    pub template_body: String,
    /// Capabilities to acknowledge
    pub capabilities: Vec<String>,
    /// Template parameters
    pub parameters: Vec<StackParameter>,
}

/// Deploy a stack and wait until it reaches a terminal state
///
/// Returns the full stack description on CREATE_COMPLETE. Any other terminal
/// state is an [`Error::StackFailed`] carrying the reason found in the stack's
/// event history. A failed status poll aborts the wait immediately.
pub async fn deploy_stack(
    cloudformation: &dyn CloudFormationApi,
    policy: &StackPolicy,
    request: &StackRequest,
) -> Result<Stack> {
    let input = CreateStackInput {
        stack_name: request.name.clone(),
        template_body: request.template_body.clone(),
        capabilities: request.capabilities.clone(),
        parameters: request.parameters.clone(),
        tags: vec![Tag::new(&policy.display_name_tag_key, &request.display_name)],
    };

    match cloudformation.create_stack(&input).await {
        Ok(stack_id) => info!(stack = %request.name, stack_id = %stack_id, "submitted stack"),
        Err(e) if e.is_already_exists() => {
            debug!(stack = %request.name, "stack already exists, waiting on it")
        }
        Err(e) => return Err(Error::api("create stack", &request.name, e)),
    }

    let stack = wait_for_stack(cloudformation, policy, &request.name).await?;

    if stack.stack_status != StackStatus::CreateComplete {
        let reason = failure_reason(cloudformation, &request.name).await;
        warn!(
            stack = %request.name,
            status = %stack.stack_status,
            reason = %reason,
            "stack failed to create"
        );
        return Err(Error::stack_failed(&request.name, reason));
    }

    info!(stack = %request.name, "stack created");
    Ok(stack)
}

/// Poll until the stack leaves CREATE_IN_PROGRESS
async fn wait_for_stack(
    cloudformation: &dyn CloudFormationApi,
    policy: &StackPolicy,
    name: &str,
) -> Result<Stack> {
    loop {
        tokio::time::sleep(policy.poll_interval()).await;

        let stack = cloudformation
            .describe_stacks(name)
            .await
            .map_err(|e| Error::stack_polling(name, e.to_string()))?
            .into_iter()
            .next()
            .ok_or_else(|| Error::stack_polling(name, "stack did not have output"))?;

        if stack.stack_status != StackStatus::CreateInProgress {
            return Ok(stack);
        }
        debug!(stack = %name, "stack creation in progress");
    }
}

/// Best-effort explanation of why a stack failed
///
/// A failure to list events is not an error; the reason is simply unknown.
async fn failure_reason(cloudformation: &dyn CloudFormationApi, name: &str) -> String {
    match cloudformation.describe_stack_events(name).await {
        Ok(mut events) => {
            // Newest first on the wire; diagnosis reads oldest first
            events.reverse();
            diagnose_failure(&events)
        }
        Err(e) => {
            debug!(stack = %name, error = %e, "could not list stack events");
            UNKNOWN_FAILURE_REASON.to_string()
        }
    }
}

/// Pick the most informative reason from a stack's event history
///
/// `events` are in chronological order. The first CREATE_FAILED event wins.
/// Otherwise the last ROLLBACK_IN_PROGRESS event seen is used. Events missing
/// a status, resource ID or reason are skipped.
pub fn diagnose_failure(events: &[StackEvent]) -> String {
    let mut reason = None;

    for event in events {
        let (Some(status), Some(_), Some(event_reason)) = (
            &event.resource_status,
            &event.logical_resource_id,
            &event.resource_status_reason,
        ) else {
            continue;
        };

        match status {
            StackStatus::CreateFailed => return event_reason.clone(),
            StackStatus::RollbackInProgress => reason = Some(event_reason),
            _ => {}
        }
    }

    reason
        .cloned()
        .unwrap_or_else(|| UNKNOWN_FAILURE_REASON.to_string())
}
