//! Node instance role resolution
//!
//! A node group either names its own IAM role or shares one generated per
//! cluster through a CloudFormation stack. The generated role is recorded on
//! the cluster status by the caller, so the stack is deployed at most once per
//! cluster.

use tracing::{debug, info};

use crate::cloud::{CloudFormationApi, CAPABILITY_IAM};
use crate::config::ProvisionerConfig;
use crate::crd::NodeGroup;
use crate::stack::{deploy_stack, StackRequest};
use crate::{Error, Result};

/// EC2 endpoint used when a region belongs to no known partition
pub const DEFAULT_EC2_ENDPOINT: &str = "ec2.amazonaws.com";

/// Region prefixes and DNS suffixes of the AWS partitions, most specific first
const PARTITIONS: &[(&[&str], &str)] = &[
    (&["us-isob"], "sc2s.sgov.gov"),
    (&["us-iso"], "c2s.ic.gov"),
    (&["us-gov"], "amazonaws.com"),
    (&["cn"], "amazonaws.com.cn"),
    (
        &["us", "eu", "ap", "sa", "ca", "me", "af", "il", "mx"],
        "amazonaws.com",
    ),
];

/// DNS suffix of the partition a region belongs to
pub fn partition_dns_suffix(region: &str) -> Option<&'static str> {
    PARTITIONS.iter().find_map(|(prefixes, suffix)| {
        prefixes
            .iter()
            .any(|prefix| region_in(region, prefix))
            .then_some(*suffix)
    })
}

/// True when the region is `<prefix>-<area>-<number>`
fn region_in(region: &str, prefix: &str) -> bool {
    let Some(rest) = region
        .strip_prefix(prefix)
        .and_then(|r| r.strip_prefix('-'))
    else {
        return false;
    };
    let Some((area, number)) = rest.split_once('-') else {
        return false;
    };
    !area.is_empty()
        && area.chars().all(|c| c.is_ascii_alphanumeric())
        && !number.is_empty()
        && number.chars().all(|c| c.is_ascii_digit())
}

/// Regional EC2 service endpoint, used as the node role's trusted principal
pub fn ec2_service_endpoint(region: &str) -> String {
    match partition_dns_suffix(region) {
        Some(suffix) => format!("ec2.{}", suffix),
        None => DEFAULT_EC2_ENDPOINT.to_string(),
    }
}

/// The IAM role a node group runs as
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NodeRole {
    /// Role named on the node group
    Explicit(String),
    /// Role generated for the cluster, possibly by an earlier node group
    Generated(String),
}

impl NodeRole {
    /// Role ARN
    pub fn arn(&self) -> &str {
        match self {
            NodeRole::Explicit(arn) | NodeRole::Generated(arn) => arn,
        }
    }

    /// The generated role ARN, to be recorded on the cluster status
    pub fn generated(&self) -> Option<&str> {
        match self {
            NodeRole::Explicit(_) => None,
            NodeRole::Generated(arn) => Some(arn),
        }
    }
}

/// Resolve the role a node group runs as
///
/// Uses the node group's own role when set, then a role already generated for
/// the cluster, and only otherwise deploys the node instance role stack.
pub async fn resolve_node_role(
    cloudformation: &dyn CloudFormationApi,
    config: &ProvisionerConfig,
    cluster_name: &str,
    region: &str,
    group: &NodeGroup,
    generated_role: Option<&str>,
) -> Result<NodeRole> {
    if let Some(arn) = group.explicit_node_role() {
        return Ok(NodeRole::Explicit(arn.to_string()));
    }
    if let Some(arn) = generated_role.filter(|arn| !arn.is_empty()) {
        debug!(cluster = %cluster_name, role = %arn, "reusing generated node role");
        return Ok(NodeRole::Generated(arn.to_string()));
    }

    let template_body = config
        .templates
        .render_node_instance_role(&ec2_service_endpoint(region))?;
    let request = StackRequest {
        name: config.stacks.node_role_stack_name(cluster_name),
        display_name: cluster_name.to_string(),
        template_body,
        capabilities: vec![CAPABILITY_IAM.to_string()],
        parameters: Vec::new(),
    };

    let stack = deploy_stack(cloudformation, &config.stacks, &request).await?;
    let arn = stack.output_value(&config.stacks.node_role_output_key);
    if arn.is_empty() {
        return Err(Error::not_found(format!(
            "stack {} has no {} output",
            request.name, config.stacks.node_role_output_key
        )));
    }

    info!(cluster = %cluster_name, role = %arn, "generated node instance role");
    Ok(NodeRole::Generated(arn.to_string()))
}
