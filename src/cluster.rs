//! Control plane creation and lookup

use tracing::info;

use crate::cloud::{
    Cluster, CreateClusterInput, EksApi, EncryptionConfig, LogSetup, Logging, VpcConfigRequest,
};
use crate::crd::{EksClusterConfigSpec, EksClusterConfigStatus};
use crate::{Error, Result};

/// Public endpoint allow-list used when none is configured
pub const ALL_ADDRESSES_CIDR: &str = "0.0.0.0/0";

/// Resources encrypted when secrets encryption is enabled
pub const SECRETS_RESOURCE: &str = "secrets";

/// CIDRs allowed to reach the public API endpoint
pub fn public_access_cidrs(sources: &[String]) -> Vec<String> {
    if sources.is_empty() {
        vec![ALL_ADDRESSES_CIDR.to_string()]
    } else {
        sources.to_vec()
    }
}

/// Control plane logging; a single disabled setting when no types are requested
pub fn logging(types: &[String]) -> Logging {
    Logging {
        cluster_logging: vec![LogSetup {
            enabled: !types.is_empty(),
            types: types.to_vec(),
        }],
    }
}

/// Build the cluster creation request
///
/// The service role must already be recorded on the status.
pub fn build_create_cluster_input(
    spec: &EksClusterConfigSpec,
    status: &EksClusterConfigStatus,
) -> Result<CreateClusterInput> {
    let role_arn = status
        .role_arn
        .as_deref()
        .filter(|arn| !arn.is_empty())
        .ok_or_else(|| {
            Error::validation(format!(
                "cluster {} has no service role ARN",
                spec.display_name
            ))
        })?;

    let encryption_config = if spec.secrets_encryption {
        vec![EncryptionConfig {
            key_arn: spec.kms_key.clone(),
            resources: vec![SECRETS_RESOURCE.to_string()],
        }]
    } else {
        Vec::new()
    };

    Ok(CreateClusterInput {
        name: spec.display_name.clone(),
        role_arn: role_arn.to_string(),
        resources_vpc_config: VpcConfigRequest {
            endpoint_private_access: spec.private_access,
            endpoint_public_access: spec.public_access,
            security_group_ids: status.security_groups.clone(),
            subnet_ids: status.subnets.clone(),
            public_access_cidrs: public_access_cidrs(&spec.public_access_sources),
        },
        tags: (!spec.tags.is_empty()).then(|| spec.tags.clone()),
        logging: logging(&spec.logging_types),
        version: spec.kubernetes_version.clone(),
        encryption_config,
    })
}

/// Create the cluster control plane
pub async fn create_cluster(
    eks: &dyn EksApi,
    spec: &EksClusterConfigSpec,
    status: &EksClusterConfigStatus,
) -> Result<Cluster> {
    let input = build_create_cluster_input(spec, status)?;
    let cluster = eks
        .create_cluster(&input)
        .await
        .map_err(|e| Error::api("create cluster", &spec.display_name, e))?;

    info!(cluster = %spec.display_name, "submitted cluster");
    Ok(cluster)
}

/// Describe a cluster by name
pub async fn get_cluster_state(eks: &dyn EksApi, cluster_name: &str) -> Result<Cluster> {
    eks.describe_cluster(cluster_name)
        .await
        .map_err(|e| Error::api("describe cluster", cluster_name, e))
}
