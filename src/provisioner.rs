//! Provisioner facade
//!
//! The entry points a reconciler calls for one `EksClusterConfig`. Each takes
//! the resource as it was read and returns the values to persist on its
//! status; none of them writes the status itself.

use tracing::instrument;

use crate::addon::{EbsCsiStage, StageError};
use crate::cloud::{CloudClients, Cluster, LaunchTemplateVersion};
use crate::config::ProvisionerConfig;
use crate::crd::{EksClusterConfig, NodeGroup};
use crate::nodegroup::NodeGroupProvisioning;
use crate::Result;

/// Drives the provisioning of managed EKS clusters
#[derive(Clone)]
pub struct Provisioner {
    clients: CloudClients,
    config: ProvisionerConfig,
}

impl Provisioner {
    /// Create a provisioner over a set of cloud clients
    pub fn new(clients: CloudClients, config: ProvisionerConfig) -> Self {
        Self { clients, config }
    }

    /// The naming, tagging and polling policy in use
    pub fn config(&self) -> &ProvisionerConfig {
        &self.config
    }

    /// Create the cluster control plane
    #[instrument(skip(self, cluster), fields(cluster = %cluster.spec.display_name))]
    pub async fn create_cluster(&self, cluster: &EksClusterConfig) -> Result<Cluster> {
        cluster.spec.validate()?;
        let status = cluster.status.clone().unwrap_or_default();
        crate::cluster::create_cluster(self.clients.eks.as_ref(), &cluster.spec, &status).await
    }

    /// Make sure the cluster's managed launch template exists
    ///
    /// Returns the template ID to record as `managedLaunchTemplateId`.
    #[instrument(skip(self, cluster), fields(cluster = %cluster.spec.display_name))]
    pub async fn ensure_managed_launch_template(
        &self,
        cluster: &EksClusterConfig,
    ) -> Result<String> {
        let current = cluster
            .status
            .as_ref()
            .and_then(|s| s.managed_launch_template_id.as_deref());
        crate::launch_template::ensure_managed_template(
            self.clients.ec2.as_ref(),
            &self.config.launch_template,
            &cluster.spec.display_name,
            current,
        )
        .await
    }

    /// Create one node group
    ///
    /// Pass the outcome to `EksClusterConfigStatus::record_node_group`
    /// whether or not it succeeded.
    #[instrument(
        skip(self, cluster, group),
        fields(cluster = %cluster.spec.display_name, nodegroup = %group.nodegroup_name)
    )]
    pub async fn create_node_group(
        &self,
        cluster: &EksClusterConfig,
        group: &NodeGroup,
    ) -> NodeGroupProvisioning {
        let status = cluster.status.clone().unwrap_or_default();
        crate::nodegroup::create_node_group(
            &self.clients,
            &self.config,
            &cluster.spec,
            &status,
            group,
        )
        .await
    }

    /// Run the EBS CSI driver setup from the stage recorded on the status
    ///
    /// Returns the final stage on success, or the stage to record and
    /// resume from on failure.
    #[instrument(skip(self, cluster), fields(cluster = %cluster.spec.display_name))]
    pub async fn enable_ebs_csi_driver(
        &self,
        cluster: &EksClusterConfig,
    ) -> std::result::Result<EbsCsiStage, StageError> {
        let from = cluster
            .status
            .as_ref()
            .and_then(|s| s.ebs_csi_stage.clone())
            .unwrap_or_default();
        from.run(&self.clients, &self.config, &cluster.spec).await
    }

    /// Describe a cluster by name
    pub async fn get_cluster_state(&self, cluster_name: &str) -> Result<Cluster> {
        crate::cluster::get_cluster_state(self.clients.eks.as_ref(), cluster_name).await
    }

    /// Describe specific versions of a launch template
    pub async fn get_launch_template_versions(
        &self,
        launch_template_id: &str,
        versions: &[String],
    ) -> Result<Vec<LaunchTemplateVersion>> {
        crate::launch_template::get_launch_template_versions(
            self.clients.ec2.as_ref(),
            launch_template_id,
            versions,
        )
        .await
    }
}
