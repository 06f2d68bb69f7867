//! EksClusterConfig Custom Resource Definition
//!
//! The spec is the immutable desired state of a provisioning run. The status
//! is the observed state this crate mutates and the reconciler persists.

use std::collections::{BTreeMap, HashSet};

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::NodeGroup;
use crate::addon::EbsCsiStage;
use crate::nodegroup::NodeGroupProvisioning;

/// Desired state of a managed EKS cluster
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "eks.lattice.dev",
    version = "v1alpha1",
    kind = "EksClusterConfig",
    plural = "eksclusterconfigs",
    shortname = "ecc",
    status = "EksClusterConfigStatus",
    namespaced,
    printcolumn = r#"{"name":"Cluster","type":"string","jsonPath":".spec.displayName"}"#,
    printcolumn = r#"{"name":"Region","type":"string","jsonPath":".spec.region"}"#,
    printcolumn = r#"{"name":"K8s","type":"string","jsonPath":".spec.kubernetesVersion"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct EksClusterConfigSpec {
    /// Cluster name as shown in EKS
    pub display_name: String,

    /// AWS region
    pub region: String,

    /// Kubernetes version; the EKS default is used when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubernetes_version: Option<String>,

    /// Enable the private API server endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_access: Option<bool>,

    /// Enable the public API server endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_access: Option<bool>,

    /// CIDRs allowed to reach the public endpoint; all addresses when empty
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub public_access_sources: Vec<String>,

    /// Cluster tags
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,

    /// Control plane log types to enable
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub logging_types: Vec<String>,

    /// Envelope-encrypt Kubernetes secrets
    #[serde(default)]
    pub secrets_encryption: bool,

    /// KMS key ARN used for secrets encryption
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kms_key: Option<String>,

    /// Worker node groups
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub node_groups: Vec<NodeGroup>,

    /// Install the EBS CSI driver addon
    #[serde(default)]
    pub ebs_csi_driver: bool,
}

impl EksClusterConfigSpec {
    /// Validate the cluster specification
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.display_name.is_empty() {
            return Err(crate::Error::validation("cluster display name must not be empty"));
        }
        if self.region.is_empty() {
            return Err(crate::Error::validation("cluster region must not be empty"));
        }
        if self.secrets_encryption && self.kms_key.as_deref().unwrap_or("").is_empty() {
            return Err(crate::Error::validation(
                "secrets encryption requires a KMS key ARN",
            ));
        }

        let mut names = HashSet::new();
        for group in &self.node_groups {
            group.validate()?;
            if !names.insert(group.nodegroup_name.as_str()) {
                return Err(crate::Error::validation(format!(
                    "duplicate node group name [{}]",
                    group.nodegroup_name
                )));
            }
        }
        Ok(())
    }
}

/// Observed state of a managed EKS cluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EksClusterConfigStatus {
    /// Cluster service role ARN used at creation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_arn: Option<String>,

    /// Security groups associated with the control plane
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub security_groups: Vec<String>,

    /// Subnets associated with the control plane
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subnets: Vec<String>,

    /// ID of the launch template owned by the orchestrator
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub managed_launch_template_id: Option<String>,

    /// Managed launch template version bound to each node group
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub managed_launch_template_versions: BTreeMap<String, String>,

    /// Node instance role generated for node groups without their own role
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_node_role: Option<String>,

    /// Progress of the EBS CSI driver setup
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ebs_csi_stage: Option<EbsCsiStage>,
}

impl EksClusterConfigStatus {
    /// Record the partial progress of a node group creation attempt
    ///
    /// Called regardless of outcome so that a retry reuses the generated node
    /// role instead of deploying its stack again.
    pub fn record_node_group(&mut self, nodegroup_name: &str, outcome: &NodeGroupProvisioning) {
        if let Some(role) = &outcome.generated_node_role {
            self.generated_node_role = Some(role.clone());
        }
        if outcome.result.is_ok() {
            if let Some(version) = &outcome.launch_template_version {
                self.managed_launch_template_versions
                    .insert(nodegroup_name.to_string(), version.clone());
            }
        }
    }
}
