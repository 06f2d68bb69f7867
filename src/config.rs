//! Naming, tagging and polling policy
//!
//! Everything the orchestrator names or tags on the remote side comes from
//! [`ProvisionerConfig`], so naming policy can be varied and tested without
//! touching orchestration logic. `Default` yields the production values and a
//! YAML document may override any subset of them.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::templates::StackTemplates;
use crate::{Error, Result};

/// Top-level orchestrator configuration
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct ProvisionerConfig {
    /// Managed launch template policy
    pub launch_template: LaunchTemplatePolicy,
    /// Stack deployment policy
    pub stacks: StackPolicy,
    /// Node group request policy
    pub node_groups: NodeGroupPolicy,
    /// EBS CSI driver and OIDC policy
    pub ebs_csi: EbsCsiPolicy,
    /// IAM stack template bodies
    pub templates: StackTemplates,
}

impl ProvisionerConfig {
    /// Parse a configuration document; missing fields keep their defaults
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)
            .map_err(|e| Error::validation(format!("invalid provisioner config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the orchestrator cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.stacks.poll_interval_ms == 0 {
            return Err(Error::validation("stacks.pollIntervalMs must be greater than 0"));
        }
        Ok(())
    }
}

/// Policy for the launch template owned by the orchestrator
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct LaunchTemplatePolicy {
    /// Prefix of the managed template name; the cluster name is appended
    pub name_prefix: String,
    /// Sentinel tag key marking the template as orchestrator-owned
    pub tag_key: String,
    /// Sentinel tag value
    pub tag_value: String,
    /// Root device name used when no explicit image is given
    pub default_device_name: String,
    /// Base64 user data of the template's first version (templates cannot be empty)
    pub placeholder_user_data: String,
    /// Content type declaration that node group user data must carry
    pub required_user_data_content_type: String,
}

impl Default for LaunchTemplatePolicy {
    fn default() -> Self {
        Self {
            name_prefix: "lattice-managed-lt-".to_string(),
            tag_key: "lattice-managed-template".to_string(),
            tag_value: "do-not-modify-or-delete".to_string(),
            default_device_name: "/dev/xvda".to_string(),
            // base64("placeholder\n")
            placeholder_user_data: "cGxhY2Vob2xkZXIK".to_string(),
            required_user_data_content_type: "Content-Type: multipart/mixed".to_string(),
        }
    }
}

impl LaunchTemplatePolicy {
    /// Name of the managed template for a cluster
    pub fn template_name(&self, cluster_name: &str) -> String {
        format!("{}{}", self.name_prefix, cluster_name)
    }
}

/// Policy for CloudFormation stacks
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct StackPolicy {
    /// Interval between stack status polls, in milliseconds
    pub poll_interval_ms: u64,
    /// Tag key carrying the cluster display name on every stack
    pub display_name_tag_key: String,
    /// Suffix of the node instance role stack name
    pub node_role_stack_suffix: String,
    /// Output holding the generated node instance role ARN
    pub node_role_output_key: String,
    /// Suffix of the EBS CSI driver role stack name
    pub ebs_csi_role_stack_suffix: String,
    /// Output holding the EBS CSI driver role ARN
    pub ebs_csi_role_output_key: String,
}

impl Default for StackPolicy {
    fn default() -> Self {
        Self {
            poll_interval_ms: 5_000,
            display_name_tag_key: "displayName".to_string(),
            node_role_stack_suffix: "-node-instance-role".to_string(),
            node_role_output_key: "NodeInstanceRole".to_string(),
            ebs_csi_role_stack_suffix: "-ebs-csi-driver-role".to_string(),
            ebs_csi_role_output_key: "EBSCSIDriverRole".to_string(),
        }
    }
}

impl StackPolicy {
    /// Interval between stack status polls
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Name of the node instance role stack for a cluster
    pub fn node_role_stack_name(&self, cluster_name: &str) -> String {
        format!("{}{}", cluster_name, self.node_role_stack_suffix)
    }

    /// Name of the EBS CSI driver role stack for a cluster
    pub fn ebs_csi_role_stack_name(&self, cluster_name: &str) -> String {
        format!("{}{}", cluster_name, self.ebs_csi_role_stack_suffix)
    }
}

/// Policy for node group requests
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct NodeGroupPolicy {
    /// AMI type for standard node groups
    pub standard_ami_type: String,
    /// AMI type for GPU node groups
    pub gpu_ami_type: String,
}

impl Default for NodeGroupPolicy {
    fn default() -> Self {
        Self {
            standard_ami_type: "AL2_x86_64".to_string(),
            gpu_ami_type: "AL2_x86_64_GPU".to_string(),
        }
    }
}

impl NodeGroupPolicy {
    /// AMI type for a node group
    pub fn ami_type(&self, gpu: bool) -> &str {
        if gpu {
            &self.gpu_ami_type
        } else {
            &self.standard_ami_type
        }
    }
}

/// Policy for the OIDC provider and the EBS CSI driver addon
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct EbsCsiPolicy {
    /// Client ID audience registered on a new OIDC provider
    pub oidc_audience: String,
    /// Addon name
    pub addon_name: String,
}

impl Default for EbsCsiPolicy {
    fn default() -> Self {
        Self {
            oidc_audience: "sts.amazonaws.com".to_string(),
            addon_name: "aws-ebs-csi-driver".to_string(),
        }
    }
}
