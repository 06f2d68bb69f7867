//! Custom Resource Definitions
//!
//! `EksClusterConfig` carries the desired state of a cluster in its spec and the
//! observed state the orchestrator maintains in its status.

mod cluster;
mod types;

pub use cluster::{EksClusterConfig, EksClusterConfigSpec, EksClusterConfigStatus};
pub use types::{LaunchTemplateRef, NodeGroup};
