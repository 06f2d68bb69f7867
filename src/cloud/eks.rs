//! EKS control plane, node group and addon API

use std::collections::BTreeMap;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use super::ServiceError;

/// Instance purchasing mode of a node group
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CapacityType {
    /// On-demand instances of a single instance type
    #[default]
    OnDemand,
    /// Spot instances drawn from a list of eligible instance types
    Spot,
}

impl CapacityType {
    /// Capacity type for a node group that does or does not request spot instances
    pub fn for_spot_request(request_spot_instances: bool) -> Self {
        if request_spot_instances {
            Self::Spot
        } else {
            Self::OnDemand
        }
    }

    /// The wire representation of the capacity type
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OnDemand => "ON_DEMAND",
            Self::Spot => "SPOT",
        }
    }
}

/// Network placement of the control plane
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VpcConfigRequest {
    /// Enable the private API server endpoint
    pub endpoint_private_access: Option<bool>,
    /// Enable the public API server endpoint
    pub endpoint_public_access: Option<bool>,
    /// Security groups attached to the control plane ENIs
    pub security_group_ids: Vec<String>,
    /// Subnets the control plane ENIs are placed in
    pub subnet_ids: Vec<String>,
    /// CIDRs allowed to reach the public endpoint
    pub public_access_cidrs: Vec<String>,
}

/// One control plane logging setting
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LogSetup {
    /// Whether the listed log types are enabled
    pub enabled: bool,
    /// Log types
    pub types: Vec<String>,
}

/// Control plane logging configuration
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Logging {
    /// Logging settings
    pub cluster_logging: Vec<LogSetup>,
}

/// Envelope encryption of Kubernetes resources
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EncryptionConfig {
    /// KMS key ARN
    pub key_arn: Option<String>,
    /// Resources to encrypt
    pub resources: Vec<String>,
}

/// Request to create a cluster
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CreateClusterInput {
    /// Cluster name
    pub name: String,
    /// Cluster service role ARN
    pub role_arn: String,
    /// Network placement
    pub resources_vpc_config: VpcConfigRequest,
    /// Cluster tags; omitted when there are none
    pub tags: Option<BTreeMap<String, String>>,
    /// Control plane logging
    pub logging: Logging,
    /// Kubernetes version; the service default is used when unset
    pub version: Option<String>,
    /// Secrets encryption
    pub encryption_config: Vec<EncryptionConfig>,
}

/// Description of a cluster
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Cluster {
    /// Cluster name
    pub name: String,
    /// Cluster ARN
    pub arn: Option<String>,
    /// Cluster status, e.g. CREATING or ACTIVE
    pub status: Option<String>,
    /// OIDC issuer URL of the cluster's identity endpoint
    pub oidc_issuer: Option<String>,
}

/// Scaling bounds of a node group
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScalingConfig {
    /// Minimum size
    pub min_size: Option<i64>,
    /// Maximum size
    pub max_size: Option<i64>,
    /// Desired size
    pub desired_size: Option<i64>,
}

/// Launch template a node group boots from
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LaunchTemplateSpecification {
    /// Template ID
    pub id: Option<String>,
    /// Template version; the default version is used when unset
    pub version: Option<String>,
}

/// Request to create a node group
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CreateNodegroupInput {
    /// Owning cluster name
    pub cluster_name: String,
    /// Node group name
    pub nodegroup_name: String,
    /// Kubernetes node labels
    pub labels: BTreeMap<String, String>,
    /// Scaling bounds
    pub scaling_config: ScalingConfig,
    /// Purchasing mode
    pub capacity_type: CapacityType,
    /// Launch template
    pub launch_template: Option<LaunchTemplateSpecification>,
    /// Eligible instance types (spot only)
    pub instance_types: Vec<String>,
    /// AMI family; unset when the launch template names an AMI
    pub ami_type: Option<String>,
    /// Subnets nodes are placed in
    pub subnets: Vec<String>,
    /// Node instance role ARN
    pub node_role: String,
}

/// Description of a node group
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Nodegroup {
    /// Node group name
    pub nodegroup_name: String,
    /// Node group ARN
    pub nodegroup_arn: Option<String>,
    /// Node group status
    pub status: Option<String>,
}

/// Request to install an addon
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CreateAddonInput {
    /// Addon name
    pub addon_name: String,
    /// Owning cluster name
    pub cluster_name: String,
    /// IAM role the addon's service account assumes
    pub service_account_role_arn: Option<String>,
}

/// Description of an addon
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Addon {
    /// Addon name
    pub addon_name: String,
    /// Addon ARN, once installed
    pub addon_arn: Option<String>,
    /// Addon status
    pub status: Option<String>,
}

/// EKS operations used by the orchestrator
#[cfg_attr(test, automock)]
#[async_trait]
pub trait EksApi: Send + Sync {
    /// Create a cluster control plane
    async fn create_cluster(&self, input: &CreateClusterInput) -> Result<Cluster, ServiceError>;

    /// Describe a cluster by name
    async fn describe_cluster(&self, name: &str) -> Result<Cluster, ServiceError>;

    /// Create a node group
    async fn create_nodegroup(&self, input: &CreateNodegroupInput)
        -> Result<Nodegroup, ServiceError>;

    /// Describe an addon; `None` when the service returned no addon
    async fn describe_addon(
        &self,
        cluster_name: &str,
        addon_name: &str,
    ) -> Result<Option<Addon>, ServiceError>;

    /// Install an addon
    async fn create_addon(&self, input: &CreateAddonInput) -> Result<Addon, ServiceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_type_follows_spot_request() {
        assert_eq!(CapacityType::for_spot_request(true), CapacityType::Spot);
        assert_eq!(CapacityType::for_spot_request(false), CapacityType::OnDemand);
        assert_eq!(CapacityType::Spot.as_str(), "SPOT");
        assert_eq!(CapacityType::OnDemand.as_str(), "ON_DEMAND");
    }
}
