//! Supporting types for the EksClusterConfig CRD

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Reference to a launch template version
///
/// Used both for a user-supplied template on a node group and for the
/// version the orchestrator creates on the managed template.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LaunchTemplateRef {
    /// Launch template ID
    pub id: String,

    /// Launch template name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Version number; the template's default version is used when unset or zero
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<i64>,
}

impl LaunchTemplateRef {
    /// The version as sent to EKS, omitting unset and zero versions
    pub fn version_string(&self) -> Option<String> {
        self.version.filter(|v| *v != 0).map(|v| v.to_string())
    }
}

/// Desired configuration of one node group
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NodeGroup {
    /// Node group name
    pub nodegroup_name: String,

    /// Minimum number of nodes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_size: Option<i64>,

    /// Desired number of nodes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desired_size: Option<i64>,

    /// Maximum number of nodes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_size: Option<i64>,

    /// Kubernetes labels applied to the nodes
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    /// Use spot capacity instead of on-demand
    #[serde(default)]
    pub request_spot_instances: bool,

    /// Instance types eligible for spot capacity
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub spot_instance_types: Vec<String>,

    /// Instance type for on-demand capacity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_type: Option<String>,

    /// User-supplied launch template; bypasses the managed template entirely
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub launch_template: Option<LaunchTemplateRef>,

    /// User-supplied node role ARN; bypasses node role generation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_role: Option<String>,

    /// AMI ID; the AMI family is chosen automatically when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_id: Option<String>,

    /// Use the GPU AMI family
    #[serde(default)]
    pub gpu: bool,

    /// MIME multipart user data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_data: Option<String>,

    /// Root volume size in GiB
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_size: Option<i64>,

    /// EC2 key pair name for SSH access
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ec2_ssh_key: Option<String>,

    /// Tags applied to launched instances
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub resource_tags: BTreeMap<String, String>,

    /// Subnets for this node group; the cluster's subnets are used when empty
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subnets: Vec<String>,
}

impl NodeGroup {
    /// Explicit image ID, ignoring empty strings
    pub fn explicit_image_id(&self) -> Option<&str> {
        self.image_id.as_deref().filter(|id| !id.is_empty())
    }

    /// Explicit node role ARN, ignoring empty strings
    pub fn explicit_node_role(&self) -> Option<&str> {
        self.node_role.as_deref().filter(|r| !r.is_empty())
    }

    /// Validate the node group specification
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.nodegroup_name.is_empty() {
            return Err(crate::Error::validation("node group name must not be empty"));
        }
        if let (Some(min), Some(max)) = (self.min_size, self.max_size) {
            if min > max {
                return Err(crate::Error::validation(format!(
                    "node group [{}] min size {} exceeds max size {}",
                    self.nodegroup_name, min, max
                )));
            }
        }
        if let (Some(desired), Some(min), Some(max)) =
            (self.desired_size, self.min_size, self.max_size)
        {
            if desired < min || desired > max {
                return Err(crate::Error::validation(format!(
                    "node group [{}] desired size {} is outside [{}, {}]",
                    self.nodegroup_name, desired, min, max
                )));
            }
        }
        if self.request_spot_instances && self.spot_instance_types.is_empty() {
            return Err(crate::Error::validation(format!(
                "node group [{}] requests spot instances but lists no spot instance types",
                self.nodegroup_name
            )));
        }
        Ok(())
    }
}
