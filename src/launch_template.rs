//! Managed launch template
//!
//! Each cluster owns exactly one launch template, created lazily and tagged as
//! orchestrator-owned. Its first version only holds placeholder user data (a
//! template cannot be created empty) and is never bound to a node group; every
//! node group gets its own version carrying its boot configuration. The
//! template itself is never deleted here, only versions that a failed node
//! group creation left behind.

use base64::Engine;
use tracing::{debug, info};

use crate::cloud::{
    tags_from_map, BlockDeviceMapping, CreateLaunchTemplateInput, Ec2Api, LaunchTemplateData,
    LaunchTemplateVersion, Tag, TagSpecification, VersionDeletion, RESOURCE_TYPE_INSTANCE,
    RESOURCE_TYPE_LAUNCH_TEMPLATE,
};
use crate::config::LaunchTemplatePolicy;
use crate::crd::{LaunchTemplateRef, NodeGroup};
use crate::{Error, Result};

/// Make sure the cluster's managed launch template exists
///
/// Returns the ID to record on the cluster status: the current ID when the
/// template it names still exists, otherwise the ID of a newly created one.
pub async fn ensure_managed_template(
    ec2: &dyn Ec2Api,
    policy: &LaunchTemplatePolicy,
    cluster_name: &str,
    current_id: Option<&str>,
) -> Result<String> {
    if let Some(id) = current_id.filter(|id| !id.is_empty()) {
        match ec2.describe_launch_templates(&[id.to_string()]).await {
            Ok(templates) if !templates.is_empty() => {
                debug!(
                    cluster = %cluster_name,
                    template_id = %id,
                    "managed launch template exists"
                );
                return Ok(id.to_string());
            }
            Ok(_) => {
                info!(
                    cluster = %cluster_name,
                    template_id = %id,
                    "managed launch template is gone, recreating"
                );
            }
            Err(e) if e.does_not_exist() => {
                info!(
                    cluster = %cluster_name,
                    template_id = %id,
                    "managed launch template does not exist, recreating"
                );
            }
            Err(e) => return Err(Error::api("describe launch template", id, e)),
        }
    }

    let template = create_managed_template(ec2, policy, cluster_name).await?;
    Ok(template.id)
}

/// Create the managed launch template for a cluster
pub async fn create_managed_template(
    ec2: &dyn Ec2Api,
    policy: &LaunchTemplatePolicy,
    cluster_name: &str,
) -> Result<LaunchTemplateRef> {
    let name = policy.template_name(cluster_name);
    let input = CreateLaunchTemplateInput {
        launch_template_name: name.clone(),
        launch_template_data: LaunchTemplateData {
            user_data: Some(policy.placeholder_user_data.clone()),
            ..Default::default()
        },
        tag_specifications: vec![TagSpecification {
            resource_type: RESOURCE_TYPE_LAUNCH_TEMPLATE.to_string(),
            tags: vec![Tag::new(&policy.tag_key, &policy.tag_value)],
        }],
    };

    let template = ec2
        .create_launch_template(&input)
        .await
        .map_err(|e| Error::api("create launch template", &name, e))?;

    info!(
        cluster = %cluster_name,
        template_id = %template.launch_template_id,
        "created managed launch template"
    );

    Ok(LaunchTemplateRef {
        id: template.launch_template_id,
        name: Some(template.launch_template_name),
        version: Some(template.latest_version_number),
    })
}

/// Add a version carrying a node group's boot configuration to a launch template
pub async fn create_launch_template_version(
    ec2: &dyn Ec2Api,
    policy: &LaunchTemplatePolicy,
    launch_template_id: &str,
    group: &NodeGroup,
) -> Result<LaunchTemplateRef> {
    let data = build_launch_template_data(ec2, policy, group).await?;

    let version = ec2
        .create_launch_template_version(launch_template_id, &data)
        .await
        .map_err(|e| Error::api("create launch template version", launch_template_id, e))?;

    info!(
        nodegroup = %group.nodegroup_name,
        template_id = %version.launch_template_id,
        version = version.version_number,
        "created launch template version"
    );

    Ok(LaunchTemplateRef {
        id: version.launch_template_id,
        name: Some(version.launch_template_name),
        version: Some(version.version_number),
    })
}

/// Build the launch template data for a node group
///
/// User data is validated before any remote call is made.
pub async fn build_launch_template_data(
    ec2: &dyn Ec2Api,
    policy: &LaunchTemplatePolicy,
    group: &NodeGroup,
) -> Result<LaunchTemplateData> {
    let user_data = encode_user_data(policy, group)?;

    let device_name = match group.explicit_image_id() {
        Some(image_id) => image_root_device_name(ec2, image_id)
            .await?
            .unwrap_or_else(|| policy.default_device_name.clone()),
        None => policy.default_device_name.clone(),
    };

    let tag_specifications = if group.resource_tags.is_empty() {
        Vec::new()
    } else {
        vec![TagSpecification {
            resource_type: RESOURCE_TYPE_INSTANCE.to_string(),
            tags: tags_from_map(&group.resource_tags),
        }]
    };

    // Spot capacity lists its instance types on the node group instead
    let instance_type = if group.request_spot_instances {
        None
    } else {
        group.instance_type.clone()
    };

    Ok(LaunchTemplateData {
        image_id: group.explicit_image_id().map(str::to_string),
        key_name: group.ec2_ssh_key.clone(),
        user_data,
        instance_type,
        block_device_mappings: vec![BlockDeviceMapping {
            device_name,
            volume_size: group.disk_size,
        }],
        tag_specifications,
    })
}

/// Validate and base64 encode a node group's user data
fn encode_user_data(policy: &LaunchTemplatePolicy, group: &NodeGroup) -> Result<Option<String>> {
    match group.user_data.as_deref() {
        None | Some("") => Ok(None),
        Some(user_data) => {
            if !user_data.contains(&policy.required_user_data_content_type) {
                return Err(Error::validation(format!(
                    "userdata for nodegroup [{}] is not of mime type multipart/mixed",
                    group.nodegroup_name
                )));
            }
            Ok(Some(
                base64::engine::general_purpose::STANDARD.encode(user_data.as_bytes()),
            ))
        }
    }
}

/// Root device name of an AMI
async fn image_root_device_name(ec2: &dyn Ec2Api, image_id: &str) -> Result<Option<String>> {
    let images = ec2
        .describe_images(&[image_id.to_string()])
        .await
        .map_err(|e| Error::api("describe images", image_id, e))?;

    images
        .into_iter()
        .next()
        .map(|image| image.root_device_name)
        .ok_or_else(|| Error::not_found(format!("no images returned for id {}", image_id)))
}

/// Describe specific versions of a launch template
pub async fn get_launch_template_versions(
    ec2: &dyn Ec2Api,
    launch_template_id: &str,
    versions: &[String],
) -> Result<Vec<LaunchTemplateVersion>> {
    if launch_template_id.is_empty() {
        return Err(Error::validation("launch template ID is required"));
    }
    if versions.is_empty() {
        return Err(Error::validation("at least one launch template version is required"));
    }

    ec2.describe_launch_template_versions(launch_template_id, versions)
        .await
        .map_err(|e| Error::api("describe launch template versions", launch_template_id, e))
}

/// Delete specific versions of a launch template
pub async fn delete_launch_template_versions(
    ec2: &dyn Ec2Api,
    launch_template_id: &str,
    versions: &[String],
) -> Result<VersionDeletion> {
    ec2.delete_launch_template_versions(launch_template_id, versions)
        .await
        .map_err(|e| Error::api("delete launch template versions", launch_template_id, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::{Image, LaunchTemplate, MockEc2Api, ServiceError};
    use std::collections::BTreeMap;

    const MULTIPART: &str = concat!(
        "MIME-Version: 1.0\n",
        "Content-Type: multipart/mixed; boundary=\"==B==\"\n\n",
        "--==B==\n"
    );

    fn group() -> NodeGroup {
        NodeGroup {
            nodegroup_name: "workers".to_string(),
            instance_type: Some("m5.large".to_string()),
            disk_size: Some(40),
            ..Default::default()
        }
    }

    fn created_template() -> LaunchTemplate {
        LaunchTemplate {
            launch_template_id: "lt-new".to_string(),
            launch_template_name: "lattice-managed-lt-prod".to_string(),
            latest_version_number: 1,
        }
    }

    // ==========================================================================
    // Story: The managed template is created lazily and reused
    // ==========================================================================

    #[tokio::test]
    async fn existing_template_is_reused() {
        let mut ec2 = MockEc2Api::new();
        ec2.expect_describe_launch_templates()
            .withf(|ids| ids == ["lt-existing".to_string()])
            .returning(|_| {
                Ok(vec![LaunchTemplate {
                    launch_template_id: "lt-existing".to_string(),
                    ..Default::default()
                }])
            });
        ec2.expect_create_launch_template().never();

        let id = ensure_managed_template(
            &ec2,
            &LaunchTemplatePolicy::default(),
            "prod",
            Some("lt-existing"),
        )
        .await
        .unwrap();
        assert_eq!(id, "lt-existing");
    }

    #[tokio::test]
    async fn missing_id_creates_tagged_template_with_placeholder() {
        let mut ec2 = MockEc2Api::new();
        ec2.expect_describe_launch_templates().never();
        ec2.expect_create_launch_template()
            .withf(|input| {
                input.launch_template_name == "lattice-managed-lt-prod"
                    && input.launch_template_data.user_data.as_deref() == Some("cGxhY2Vob2xkZXIK")
                    && input.tag_specifications
                        == vec![TagSpecification {
                            resource_type: "launch-template".to_string(),
                            tags: vec![Tag::new(
                                "lattice-managed-template",
                                "do-not-modify-or-delete",
                            )],
                        }]
            })
            .times(1)
            .returning(|_| Ok(created_template()));

        let id = ensure_managed_template(&ec2, &LaunchTemplatePolicy::default(), "prod", None)
            .await
            .unwrap();
        assert_eq!(id, "lt-new");
    }

    #[tokio::test]
    async fn empty_describe_result_recreates_template() {
        let mut ec2 = MockEc2Api::new();
        ec2.expect_describe_launch_templates()
            .times(1)
            .returning(|_| Ok(vec![]));
        ec2.expect_create_launch_template()
            .times(1)
            .returning(|_| Ok(created_template()));

        let id = ensure_managed_template(
            &ec2,
            &LaunchTemplatePolicy::default(),
            "prod",
            Some("lt-vanished"),
        )
        .await
        .unwrap();
        assert_eq!(id, "lt-new");
    }

    #[tokio::test]
    async fn deleted_template_is_recreated() {
        let mut ec2 = MockEc2Api::new();
        ec2.expect_describe_launch_templates().returning(|_| {
            Err(ServiceError::with_code(
                "InvalidLaunchTemplateId.NotFound",
                "The specified launch template, with template ID lt-old, does not exist.",
            ))
        });
        ec2.expect_create_launch_template()
            .times(1)
            .returning(|_| Ok(created_template()));

        let id = ensure_managed_template(
            &ec2,
            &LaunchTemplatePolicy::default(),
            "prod",
            Some("lt-old"),
        )
        .await
        .unwrap();
        assert_eq!(id, "lt-new");
    }

    #[tokio::test]
    async fn other_describe_errors_are_fatal() {
        let mut ec2 = MockEc2Api::new();
        ec2.expect_describe_launch_templates()
            .returning(|_| Err(ServiceError::with_code("UnauthorizedOperation", "denied")));
        ec2.expect_create_launch_template().never();

        let err = ensure_managed_template(
            &ec2,
            &LaunchTemplatePolicy::default(),
            "prod",
            Some("lt-old"),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("describe launch template"));
    }

    // ==========================================================================
    // Story: Node group boot configuration
    // ==========================================================================

    #[tokio::test]
    async fn on_demand_data_uses_defaults_and_instance_type() {
        let ec2 = MockEc2Api::new();
        let data = build_launch_template_data(&ec2, &LaunchTemplatePolicy::default(), &group())
            .await
            .unwrap();

        assert_eq!(data.image_id, None);
        assert_eq!(data.user_data, None);
        assert_eq!(data.instance_type.as_deref(), Some("m5.large"));
        assert_eq!(
            data.block_device_mappings,
            vec![BlockDeviceMapping {
                device_name: "/dev/xvda".to_string(),
                volume_size: Some(40),
            }]
        );
        assert!(data.tag_specifications.is_empty());
    }

    #[tokio::test]
    async fn spot_data_omits_instance_type() {
        let ec2 = MockEc2Api::new();
        let spot = NodeGroup {
            request_spot_instances: true,
            spot_instance_types: vec!["m5.large".to_string()],
            ..group()
        };
        let data = build_launch_template_data(&ec2, &LaunchTemplatePolicy::default(), &spot)
            .await
            .unwrap();
        assert_eq!(data.instance_type, None);
    }

    #[tokio::test]
    async fn explicit_image_uses_its_root_device() {
        let mut ec2 = MockEc2Api::new();
        ec2.expect_describe_images()
            .withf(|ids| ids == ["ami-123".to_string()])
            .returning(|_| {
                Ok(vec![Image {
                    image_id: "ami-123".to_string(),
                    root_device_name: Some("/dev/sda1".to_string()),
                }])
            });

        let with_image = NodeGroup {
            image_id: Some("ami-123".to_string()),
            ..group()
        };
        let data = build_launch_template_data(&ec2, &LaunchTemplatePolicy::default(), &with_image)
            .await
            .unwrap();

        assert_eq!(data.image_id.as_deref(), Some("ami-123"));
        assert_eq!(data.block_device_mappings[0].device_name, "/dev/sda1");
    }

    #[tokio::test]
    async fn unknown_image_is_an_error() {
        let mut ec2 = MockEc2Api::new();
        ec2.expect_describe_images().returning(|_| Ok(vec![]));

        let with_image = NodeGroup {
            image_id: Some("ami-gone".to_string()),
            ..group()
        };
        let err = build_launch_template_data(&ec2, &LaunchTemplatePolicy::default(), &with_image)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no images returned for id ami-gone"));
    }

    #[tokio::test]
    async fn multipart_user_data_is_base64_encoded() {
        let ec2 = MockEc2Api::new();
        let with_user_data = NodeGroup {
            user_data: Some(MULTIPART.to_string()),
            ..group()
        };
        let data =
            build_launch_template_data(&ec2, &LaunchTemplatePolicy::default(), &with_user_data)
                .await
                .unwrap();

        let decoded = base64::engine::general_purpose::STANDARD
            .decode(data.user_data.unwrap())
            .unwrap();
        assert_eq!(decoded, MULTIPART.as_bytes());
    }

    #[tokio::test]
    async fn non_multipart_user_data_is_rejected_before_any_remote_call() {
        // No expectations: any call on the mock would panic
        let ec2 = MockEc2Api::new();
        let bad = NodeGroup {
            user_data: Some("#!/bin/bash\necho hi".to_string()),
            image_id: Some("ami-123".to_string()),
            ..group()
        };

        let err =
            create_launch_template_version(&ec2, &LaunchTemplatePolicy::default(), "lt-1", &bad)
                .await
                .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(err.to_string().contains("nodegroup [workers]"));
    }

    #[tokio::test]
    async fn resource_tags_become_instance_tag_specs() {
        let ec2 = MockEc2Api::new();
        let mut tags = BTreeMap::new();
        tags.insert("team".to_string(), "data".to_string());
        let tagged = NodeGroup {
            resource_tags: tags,
            ..group()
        };

        let data = build_launch_template_data(&ec2, &LaunchTemplatePolicy::default(), &tagged)
            .await
            .unwrap();
        assert_eq!(
            data.tag_specifications,
            vec![TagSpecification {
                resource_type: "instance".to_string(),
                tags: vec![Tag::new("team", "data")],
            }]
        );
    }

    #[tokio::test]
    async fn new_version_returns_assigned_version_number() {
        let mut ec2 = MockEc2Api::new();
        ec2.expect_create_launch_template_version()
            .withf(|id, data| id == "lt-1" && data.instance_type.as_deref() == Some("m5.large"))
            .returning(|_, _| {
                Ok(LaunchTemplateVersion {
                    launch_template_id: "lt-1".to_string(),
                    launch_template_name: "lattice-managed-lt-prod".to_string(),
                    version_number: 4,
                    launch_template_data: None,
                })
            });

        let lt = create_launch_template_version(
            &ec2,
            &LaunchTemplatePolicy::default(),
            "lt-1",
            &group(),
        )
        .await
        .unwrap();
        assert_eq!(lt.id, "lt-1");
        assert_eq!(lt.version, Some(4));
    }

    // ==========================================================================
    // Story: Version lookup validates its input
    // ==========================================================================

    #[tokio::test]
    async fn version_lookup_requires_template_id() {
        let ec2 = MockEc2Api::new();
        let err = get_launch_template_versions(&ec2, "", &["1".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn version_lookup_requires_versions() {
        let ec2 = MockEc2Api::new();
        let err = get_launch_template_versions(&ec2, "lt-1", &[]).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn version_lookup_propagates_service_errors() {
        let mut ec2 = MockEc2Api::new();
        ec2.expect_describe_launch_template_versions()
            .returning(|_, _| Err(ServiceError::new("error getting launch template versions")));

        let err = get_launch_template_versions(&ec2, "lt-1", &["1".to_string(), "2".to_string()])
            .await
            .unwrap_err();
        assert!(err.service_error().is_some());
    }

    #[tokio::test]
    async fn version_lookup_returns_described_versions() {
        let mut ec2 = MockEc2Api::new();
        ec2.expect_describe_launch_template_versions()
            .withf(|id, versions| id == "lt-1" && versions.len() == 2)
            .returning(|_, _| Ok(vec![LaunchTemplateVersion::default(); 2]));

        let versions =
            get_launch_template_versions(&ec2, "lt-1", &["1".to_string(), "2".to_string()])
                .await
                .unwrap();
        assert_eq!(versions.len(), 2);
    }
}
