//! Node group creation
//!
//! A node group without its own launch template gets a fresh version of the
//! cluster's managed template. If anything fails after that version exists,
//! the version is deleted again so that fix-and-retry cycles do not pile up
//! orphaned versions. User-supplied templates are never modified.

use tracing::{info, warn};

use crate::cloud::{
    CapacityType, CloudClients, CreateNodegroupInput, LaunchTemplateSpecification, Nodegroup,
    ScalingConfig,
};
use crate::config::ProvisionerConfig;
use crate::crd::{EksClusterConfigSpec, EksClusterConfigStatus, LaunchTemplateRef, NodeGroup};
use crate::launch_template::{create_launch_template_version, delete_launch_template_versions};
use crate::node_role::resolve_node_role;
use crate::Error;

/// Outcome of a node group creation attempt
///
/// The launch template version and generated role are reported whether or not
/// the node group was created, so the caller can persist partial progress.
#[derive(Debug)]
pub struct NodeGroupProvisioning {
    /// Managed launch template version created for this node group
    pub launch_template_version: Option<String>,
    /// Node instance role generated for the cluster
    pub generated_node_role: Option<String>,
    /// The created node group, or why it was not created
    pub result: Result<Nodegroup, NodeGroupFailure>,
}

impl NodeGroupProvisioning {
    /// Convert into the plain result, discarding the partial progress
    pub fn into_result(self) -> crate::Result<Nodegroup> {
        self.result.map_err(|failure| failure.error)
    }
}

/// A failed node group creation and what was done to clean up after it
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct NodeGroupFailure {
    /// The error that stopped the creation
    #[source]
    pub error: Error,
    /// Cleanup of the launch template version created by the attempt
    pub compensation: Compensation,
}

/// Rollback of a launch template version after a failed node group creation
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Compensation {
    /// No version was created, so there was nothing to delete
    NotNeeded,
    /// The version was deleted
    RolledBack {
        /// Managed launch template ID
        template_id: String,
        /// Deleted version
        version: String,
    },
    /// The version could not be deleted and is left orphaned
    RollbackFailed {
        /// Managed launch template ID
        template_id: String,
        /// Version that was left behind
        version: String,
        /// Why the deletion failed
        reason: String,
    },
}

/// Create a node group for a cluster
pub async fn create_node_group(
    clients: &CloudClients,
    config: &ProvisionerConfig,
    spec: &EksClusterConfigSpec,
    status: &EksClusterConfigStatus,
    group: &NodeGroup,
) -> NodeGroupProvisioning {
    let mut generated_node_role = status.generated_node_role.clone();

    if let Err(error) = group.validate() {
        return NodeGroupProvisioning {
            launch_template_version: None,
            generated_node_role,
            result: Err(NodeGroupFailure {
                error,
                compensation: Compensation::NotNeeded,
            }),
        };
    }

    let (launch_template, managed) = match &group.launch_template {
        Some(user_template) => (user_template.clone(), false),
        None => match managed_version(clients, config, spec, status, group).await {
            Ok(created) => (created, true),
            Err(error) => {
                return NodeGroupProvisioning {
                    launch_template_version: None,
                    generated_node_role,
                    result: Err(NodeGroupFailure {
                        error,
                        compensation: Compensation::NotNeeded,
                    }),
                }
            }
        },
    };

    let result = match submit(
        clients,
        config,
        spec,
        status,
        group,
        &launch_template,
        &mut generated_node_role,
    )
    .await
    {
        Ok(nodegroup) => Ok(nodegroup),
        Err(error) => {
            let compensation = if managed {
                roll_back_version(clients, &launch_template).await
            } else {
                Compensation::NotNeeded
            };
            Err(NodeGroupFailure {
                error,
                compensation,
            })
        }
    };

    NodeGroupProvisioning {
        launch_template_version: managed
            .then(|| launch_template.version_string())
            .flatten(),
        generated_node_role,
        result,
    }
}

/// Add a version for the node group to the cluster's managed launch template
async fn managed_version(
    clients: &CloudClients,
    config: &ProvisionerConfig,
    spec: &EksClusterConfigSpec,
    status: &EksClusterConfigStatus,
    group: &NodeGroup,
) -> crate::Result<LaunchTemplateRef> {
    let template_id = status
        .managed_launch_template_id
        .as_deref()
        .filter(|id| !id.is_empty())
        .ok_or_else(|| {
            Error::validation(format!(
                "cluster {} has no managed launch template for node group [{}]",
                spec.display_name, group.nodegroup_name
            ))
        })?;

    create_launch_template_version(
        clients.ec2.as_ref(),
        &config.launch_template,
        template_id,
        group,
    )
    .await
}

/// Resolve the node role and submit the node group
///
/// Records a newly generated role in `generated_node_role` as soon as it
/// exists, before the submission that may still fail.
async fn submit(
    clients: &CloudClients,
    config: &ProvisionerConfig,
    spec: &EksClusterConfigSpec,
    status: &EksClusterConfigStatus,
    group: &NodeGroup,
    launch_template: &LaunchTemplateRef,
    generated_node_role: &mut Option<String>,
) -> crate::Result<Nodegroup> {
    let role = resolve_node_role(
        clients.cloudformation.as_ref(),
        config,
        &spec.display_name,
        &spec.region,
        group,
        status.generated_node_role.as_deref(),
    )
    .await?;
    if let Some(generated) = role.generated() {
        *generated_node_role = Some(generated.to_string());
    }

    let input =
        build_create_nodegroup_input(config, spec, status, group, launch_template, role.arn());
    let nodegroup = clients
        .eks
        .create_nodegroup(&input)
        .await
        .map_err(|e| Error::api("create node group", &group.nodegroup_name, e))?;

    info!(
        cluster = %spec.display_name,
        nodegroup = %group.nodegroup_name,
        "submitted node group"
    );
    Ok(nodegroup)
}

/// Build the node group creation request
pub fn build_create_nodegroup_input(
    config: &ProvisionerConfig,
    spec: &EksClusterConfigSpec,
    status: &EksClusterConfigStatus,
    group: &NodeGroup,
    launch_template: &LaunchTemplateRef,
    node_role: &str,
) -> CreateNodegroupInput {
    let capacity_type = CapacityType::for_spot_request(group.request_spot_instances);

    let instance_types = match capacity_type {
        CapacityType::Spot => group.spot_instance_types.clone(),
        CapacityType::OnDemand => Vec::new(),
    };

    let ami_type = match group.explicit_image_id() {
        Some(_) => None,
        None => Some(config.node_groups.ami_type(group.gpu).to_string()),
    };

    let subnets = if group.subnets.is_empty() {
        status.subnets.clone()
    } else {
        group.subnets.clone()
    };

    CreateNodegroupInput {
        cluster_name: spec.display_name.clone(),
        nodegroup_name: group.nodegroup_name.clone(),
        labels: group.labels.clone(),
        scaling_config: ScalingConfig {
            min_size: group.min_size,
            max_size: group.max_size,
            desired_size: group.desired_size,
        },
        capacity_type,
        launch_template: Some(LaunchTemplateSpecification {
            id: Some(launch_template.id.clone()),
            version: launch_template.version_string(),
        }),
        instance_types,
        ami_type,
        subnets,
        node_role: node_role.to_string(),
    }
}

/// Delete a launch template version left behind by a failed creation
///
/// Failures are logged and reported, never returned as errors, so the
/// original failure stays the one the caller sees.
async fn roll_back_version(clients: &CloudClients, created: &LaunchTemplateRef) -> Compensation {
    let Some(version) = created.version_string() else {
        return Compensation::NotNeeded;
    };

    let failure = match delete_launch_template_versions(
        clients.ec2.as_ref(),
        &created.id,
        std::slice::from_ref(&version),
    )
    .await
    {
        Ok(deletion) if deletion.failed.is_empty() => None,
        Ok(deletion) => Some(
            deletion
                .failed
                .iter()
                .map(|f| format!("version {}: {}", f.version_number, f.reason))
                .collect::<Vec<_>>()
                .join("; "),
        ),
        Err(e) => Some(
            e.service_error()
                .map_or_else(|| e.to_string(), ToString::to_string),
        ),
    };

    match failure {
        None => {
            info!(
                template_id = %created.id,
                version = %version,
                "rolled back launch template version"
            );
            Compensation::RolledBack {
                template_id: created.id.clone(),
                version,
            }
        }
        Some(reason) => {
            warn!(
                template_id = %created.id,
                version = %version,
                reason = %reason,
                "failed to roll back launch template version"
            );
            Compensation::RollbackFailed {
                template_id: created.id.clone(),
                version,
                reason,
            }
        }
    }
}
