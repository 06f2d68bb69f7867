//! EC2 launch template and image API

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use super::{ServiceError, Tag};

/// Tag specification resource type for launch templates themselves
pub const RESOURCE_TYPE_LAUNCH_TEMPLATE: &str = "launch-template";

/// Tag specification resource type for instances launched from a template
pub const RESOURCE_TYPE_INSTANCE: &str = "instance";

/// Tags to apply to a resource type
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TagSpecification {
    /// Resource type the tags apply to
    pub resource_type: String,
    /// Tags
    pub tags: Vec<Tag>,
}

/// Root volume mapping
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BlockDeviceMapping {
    /// Device name, e.g. /dev/xvda
    pub device_name: String,
    /// EBS volume size in GiB
    pub volume_size: Option<i64>,
}

/// Boot configuration carried by a launch template version
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LaunchTemplateData {
    /// AMI ID; the service default is used when unset
    pub image_id: Option<String>,
    /// SSH key pair name
    pub key_name: Option<String>,
    /// Base64 encoded user data
    pub user_data: Option<String>,
    /// Instance type; unset for spot node groups
    pub instance_type: Option<String>,
    /// Block device mappings
    pub block_device_mappings: Vec<BlockDeviceMapping>,
    /// Tags applied to launched resources
    pub tag_specifications: Vec<TagSpecification>,
}

/// Request to create a launch template
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CreateLaunchTemplateInput {
    /// Template name
    pub launch_template_name: String,
    /// Data for the first (default) version
    pub launch_template_data: LaunchTemplateData,
    /// Tags applied to the template itself
    pub tag_specifications: Vec<TagSpecification>,
}

/// A launch template
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LaunchTemplate {
    /// Template ID
    pub launch_template_id: String,
    /// Template name
    pub launch_template_name: String,
    /// Latest version number
    pub latest_version_number: i64,
}

/// A single launch template version
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LaunchTemplateVersion {
    /// Template ID
    pub launch_template_id: String,
    /// Template name
    pub launch_template_name: String,
    /// Version number assigned by the service
    pub version_number: i64,
    /// Boot configuration of this version, when described
    pub launch_template_data: Option<LaunchTemplateData>,
}

/// An AMI
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Image {
    /// AMI ID
    pub image_id: String,
    /// Root device name of the image
    pub root_device_name: Option<String>,
}

/// A version the service refused to delete
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VersionDeletionFailure {
    /// Version number
    pub version_number: i64,
    /// Reason reported by the service
    pub reason: String,
}

/// Result of deleting launch template versions
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VersionDeletion {
    /// Versions that were deleted
    pub deleted: Vec<i64>,
    /// Versions that could not be deleted
    pub failed: Vec<VersionDeletionFailure>,
}

/// EC2 operations used by the orchestrator
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Ec2Api: Send + Sync {
    /// Create a launch template
    async fn create_launch_template(
        &self,
        input: &CreateLaunchTemplateInput,
    ) -> Result<LaunchTemplate, ServiceError>;

    /// Add a version to an existing launch template
    async fn create_launch_template_version(
        &self,
        launch_template_id: &str,
        data: &LaunchTemplateData,
    ) -> Result<LaunchTemplateVersion, ServiceError>;

    /// Describe launch templates by ID
    async fn describe_launch_templates(
        &self,
        launch_template_ids: &[String],
    ) -> Result<Vec<LaunchTemplate>, ServiceError>;

    /// Describe specific versions of a launch template
    async fn describe_launch_template_versions(
        &self,
        launch_template_id: &str,
        versions: &[String],
    ) -> Result<Vec<LaunchTemplateVersion>, ServiceError>;

    /// Delete specific versions of a launch template
    async fn delete_launch_template_versions(
        &self,
        launch_template_id: &str,
        versions: &[String],
    ) -> Result<VersionDeletion, ServiceError>;

    /// Describe AMIs by ID
    async fn describe_images(&self, image_ids: &[String]) -> Result<Vec<Image>, ServiceError>;
}
