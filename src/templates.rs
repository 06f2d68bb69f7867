//! IAM stack templates
//!
//! Template bodies are opaque to the orchestrator apart from their named
//! parameters. The bundled defaults are loaded at compile time and can be
//! replaced through [`crate::ProvisionerConfig`].

use minijinja::{context, Environment, UndefinedBehavior};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Node instance role template loaded at compile time
const NODE_INSTANCE_ROLE_TEMPLATE: &str = include_str!("../templates/node-instance-role.yaml");

/// EBS CSI driver role template loaded at compile time
const EBS_CSI_DRIVER_ROLE_TEMPLATE: &str = include_str!("../templates/ebs-csi-driver-role.yaml");

/// Template bodies for the stacks the orchestrator deploys
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct StackTemplates {
    /// Node instance role; parameter `ec2_service_principal`
    pub node_instance_role: String,
    /// EBS CSI driver role; parameters `region` and `provider_id`
    pub ebs_csi_driver_role: String,
}

impl Default for StackTemplates {
    fn default() -> Self {
        Self {
            node_instance_role: NODE_INSTANCE_ROLE_TEMPLATE.to_string(),
            ebs_csi_driver_role: EBS_CSI_DRIVER_ROLE_TEMPLATE.to_string(),
        }
    }
}

impl StackTemplates {
    /// Render the node instance role template for an EC2 service principal
    pub fn render_node_instance_role(&self, ec2_service_principal: &str) -> Result<String> {
        render(
            "node-instance-role",
            &self.node_instance_role,
            context! { ec2_service_principal => ec2_service_principal },
        )
    }

    /// Render the EBS CSI driver role template for a region and OIDC provider
    pub fn render_ebs_csi_driver_role(&self, region: &str, provider_id: &str) -> Result<String> {
        render(
            "ebs-csi-driver-role",
            &self.ebs_csi_driver_role,
            context! { region => region, provider_id => provider_id },
        )
    }
}

fn render(name: &str, source: &str, ctx: minijinja::Value) -> Result<String> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env.render_str(source, ctx)
        .map_err(|e| Error::template(format!("rendering {} template: {}", name, e)))
}
