//! Service boundary for the remote AWS APIs
//!
//! The orchestrator never talks to AWS directly. Each service it depends on is
//! abstracted behind an async trait so that generated SDK bindings can be
//! plugged in by the embedding binary and mocks can be used in tests.
//!
//! Errors from every call are reported as [`ServiceError`], whose named
//! predicates are the only place where error codes and message text are
//! inspected.

mod cloudformation;
mod ec2;
mod eks;
mod error;
mod iam;

use std::collections::BTreeMap;
use std::sync::Arc;

pub use cloudformation::{
    CloudFormationApi, CreateStackInput, Stack, StackEvent, StackOutput, StackParameter,
    StackStatus, CAPABILITY_IAM,
};
pub use ec2::{
    BlockDeviceMapping, CreateLaunchTemplateInput, Ec2Api, Image, LaunchTemplate,
    LaunchTemplateData, LaunchTemplateVersion, TagSpecification, VersionDeletion,
    VersionDeletionFailure, RESOURCE_TYPE_INSTANCE, RESOURCE_TYPE_LAUNCH_TEMPLATE,
};
pub use eks::{
    Addon, CapacityType, Cluster, CreateAddonInput, CreateClusterInput, CreateNodegroupInput,
    EksApi, EncryptionConfig, LaunchTemplateSpecification, LogSetup, Logging, Nodegroup,
    ScalingConfig, VpcConfigRequest,
};
pub use error::{ServiceError, ALREADY_EXISTS_CODE, RESOURCE_NOT_FOUND_CODE};
pub use iam::{CreateOidcProviderInput, IamApi, OidcProviderEntry};

#[cfg(test)]
pub use cloudformation::MockCloudFormationApi;
#[cfg(test)]
pub use ec2::MockEc2Api;
#[cfg(test)]
pub use eks::MockEksApi;
#[cfg(test)]
pub use iam::MockIamApi;

use crate::oidc::CertificateChainSource;

/// A key/value resource tag
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Tag {
    /// Tag key
    pub key: String,
    /// Tag value
    pub value: String,
}

impl Tag {
    /// Create a new tag
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Convert a tag map into a list of tags, ordered by key
pub fn tags_from_map(tags: &BTreeMap<String, String>) -> Vec<Tag> {
    tags.iter().map(|(k, v)| Tag::new(k, v)).collect()
}

/// The set of clients a provisioning run needs
///
/// Cheap to clone; every client is shared behind an `Arc` so independent
/// clusters can be provisioned concurrently from the same set.
#[derive(Clone)]
pub struct CloudClients {
    /// Managed Kubernetes control plane API
    pub eks: Arc<dyn EksApi>,
    /// Declarative stack deployment API
    pub cloudformation: Arc<dyn CloudFormationApi>,
    /// Compute image and launch template API
    pub ec2: Arc<dyn Ec2Api>,
    /// Identity federation API
    pub iam: Arc<dyn IamApi>,
    /// Direct TLS client used to read the OIDC issuer's certificate chain
    pub certificates: Arc<dyn CertificateChainSource>,
}

impl CloudClients {
    /// Create a client set from its parts
    pub fn new(
        eks: Arc<dyn EksApi>,
        cloudformation: Arc<dyn CloudFormationApi>,
        ec2: Arc<dyn Ec2Api>,
        iam: Arc<dyn IamApi>,
        certificates: Arc<dyn CertificateChainSource>,
    ) -> Self {
        Self {
            eks,
            cloudformation,
            ec2,
            iam,
            certificates,
        }
    }
}
