//! Lattice EKS - provisioning orchestrator for managed EKS clusters
//!
//! Creates (or reuses) the AWS infrastructure behind a managed Kubernetes cluster:
//! the control plane, worker node groups, the launch template nodes boot from,
//! and the EBS CSI driver addon bound to an IAM role through the cluster's OIDC
//! identity provider.
//!
//! Every step is create-or-reuse so that the calling reconciler can re-invoke an
//! entry point after any failure without duplicating remote resources.
//!
//! # Modules
//!
//! - [`provisioner`] - Facade exposing the outward entry points
//! - [`cloud`] - Service boundary traits (EKS, CloudFormation, EC2, IAM) and their types
//! - [`stack`] - CloudFormation deployment with polling and failure diagnosis
//! - [`launch_template`] - Managed launch template and per-node-group versions
//! - [`node_role`] - Node instance role resolution
//! - [`nodegroup`] - Node group creation with launch template rollback
//! - [`cluster`] - Control plane creation and lookup
//! - [`addon`] - OIDC provider, driver role and EBS CSI addon stage machine
//! - [`oidc`] - Issuer certificate thumbprint retrieval
//! - [`templates`] - IAM stack template rendering
//! - [`crd`] - EksClusterConfig custom resource (desired and observed state)
//! - [`config`] - Naming, tagging and polling policy
//! - [`error`] - Error types

#![deny(missing_docs)]

pub mod addon;
pub mod cloud;
pub mod cluster;
pub mod config;
pub mod crd;
pub mod error;
pub mod launch_template;
pub mod node_role;
pub mod nodegroup;
pub mod oidc;
pub mod provisioner;
pub mod stack;
pub mod templates;

pub use config::ProvisionerConfig;
pub use error::Error;
pub use provisioner::Provisioner;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;
