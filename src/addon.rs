//! EBS CSI driver enablement
//!
//! Installing the driver takes four stages, each safe to repeat:
//!
//! 1. Adopt the cluster's OIDC provider, or create it from the issuer's root
//!    certificate thumbprint
//! 2. Deploy the driver role stack trusting that provider
//! 3. Check whether the addon is already installed
//! 4. Install the addon bound to the driver role
//!
//! [`EbsCsiStage`] records where a run stopped. It is persisted on the
//! cluster status so a later run resumes at the failed stage instead of
//! starting over.

use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cloud::{
    Addon, CloudClients, CloudFormationApi, CreateAddonInput, CreateOidcProviderInput, EksApi,
    CAPABILITY_IAM,
};
use crate::config::ProvisionerConfig;
use crate::crd::EksClusterConfigSpec;
use crate::oidc::issuer_thumbprint;
use crate::stack::{deploy_stack, StackRequest};
use crate::{Error, Result};

/// Identifier of an OIDC provider: the last path segment of its ARN
///
/// For EKS this is the issuer ID that the driver role's trust policy names.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ProviderId(String);

impl ProviderId {
    /// Derive the provider ID from a provider ARN or issuer URL
    pub fn from_path(path: &str) -> Option<Self> {
        path.trim_end_matches('/')
            .rsplit('/')
            .next()
            .filter(|segment| !segment.is_empty())
            .map(|segment| Self(segment.to_string()))
    }

    /// The ID as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Progress of the EBS CSI driver setup
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(tag = "stage", rename_all = "camelCase")]
pub enum EbsCsiStage {
    /// Discover or create the cluster's OIDC provider
    #[default]
    ConfigureOidcProvider,
    /// Deploy the driver role trusting the provider
    #[serde(rename_all = "camelCase")]
    CreateDriverRole {
        /// OIDC provider ID
        provider_id: String,
    },
    /// Check whether the addon is already installed
    #[serde(rename_all = "camelCase")]
    CheckAddon {
        /// Driver role ARN
        role_arn: String,
    },
    /// Install the addon
    #[serde(rename_all = "camelCase")]
    InstallAddon {
        /// Driver role ARN
        role_arn: String,
    },
    /// The addon is installed
    #[serde(rename_all = "camelCase")]
    Complete {
        /// Addon ARN, when the service reported one
        #[serde(default, skip_serializing_if = "Option::is_none")]
        addon_arn: Option<String>,
    },
}

impl fmt::Display for EbsCsiStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EbsCsiStage::ConfigureOidcProvider => "configure OIDC provider",
            EbsCsiStage::CreateDriverRole { .. } => "create driver role",
            EbsCsiStage::CheckAddon { .. } => "check addon",
            EbsCsiStage::InstallAddon { .. } => "install addon",
            EbsCsiStage::Complete { .. } => "complete",
        };
        f.write_str(name)
    }
}

/// A stage that failed, and the error that stopped it
///
/// `stage` is the stage to persist and resume from.
#[derive(Debug, thiserror::Error)]
#[error("EBS CSI driver setup failed at stage {stage}: {source}")]
pub struct StageError {
    /// The stage that failed
    pub stage: EbsCsiStage,
    /// Why it failed
    #[source]
    pub source: Error,
}

impl EbsCsiStage {
    /// True once the addon is installed
    pub fn is_complete(&self) -> bool {
        matches!(self, EbsCsiStage::Complete { .. })
    }

    /// Run this stage and return the next one
    pub async fn advance(
        self,
        clients: &CloudClients,
        config: &ProvisionerConfig,
        spec: &EksClusterConfigSpec,
    ) -> std::result::Result<EbsCsiStage, StageError> {
        let cluster = spec.display_name.as_str();
        let next = match &self {
            EbsCsiStage::ConfigureOidcProvider => {
                configure_oidc_provider(clients, config, cluster)
                    .await
                    .map(|provider_id| EbsCsiStage::CreateDriverRole {
                        provider_id: provider_id.to_string(),
                    })
            }
            EbsCsiStage::CreateDriverRole { provider_id } => create_driver_role(
                clients.cloudformation.as_ref(),
                config,
                spec,
                provider_id,
            )
            .await
            .map(|role_arn| EbsCsiStage::CheckAddon { role_arn }),
            EbsCsiStage::CheckAddon { role_arn } => {
                match check_addon(clients.eks.as_ref(), config, cluster).await {
                    AddonPresence::Installed(addon_arn) => Ok(EbsCsiStage::Complete {
                        addon_arn: Some(addon_arn),
                    }),
                    AddonPresence::NotInstalled | AddonPresence::Unconfirmed(_) => {
                        Ok(EbsCsiStage::InstallAddon {
                            role_arn: role_arn.clone(),
                        })
                    }
                }
            }
            EbsCsiStage::InstallAddon { role_arn } => {
                install_addon(clients.eks.as_ref(), config, cluster, role_arn)
                    .await
                    .map(|addon| EbsCsiStage::Complete {
                        addon_arn: addon.addon_arn,
                    })
            }
            EbsCsiStage::Complete { .. } => Ok(self.clone()),
        };

        next.map_err(|source| StageError {
            stage: self,
            source,
        })
    }

    /// Run every remaining stage, starting from this one
    pub async fn run(
        self,
        clients: &CloudClients,
        config: &ProvisionerConfig,
        spec: &EksClusterConfigSpec,
    ) -> std::result::Result<EbsCsiStage, StageError> {
        let mut stage = self;
        while !stage.is_complete() {
            debug!(cluster = %spec.display_name, stage = %stage, "running EBS CSI driver stage");
            stage = stage.advance(clients, config, spec).await?;
        }
        Ok(stage)
    }
}

/// Adopt the cluster's OIDC provider, creating it when none matches
///
/// A provider matches when its ARN contains the last path segment of the
/// cluster's issuer URL.
pub async fn configure_oidc_provider(
    clients: &CloudClients,
    config: &ProvisionerConfig,
    cluster_name: &str,
) -> Result<ProviderId> {
    let cluster = clients
        .eks
        .describe_cluster(cluster_name)
        .await
        .map_err(|e| Error::api("describe cluster", cluster_name, e))?;
    let issuer = cluster
        .oidc_issuer
        .filter(|issuer| !issuer.is_empty())
        .ok_or_else(|| Error::not_found(format!("cluster {} has no OIDC issuer", cluster_name)))?;
    let issuer_id = ProviderId::from_path(&issuer)
        .ok_or_else(|| Error::validation(format!("OIDC issuer {} has no ID", issuer)))?;

    let providers = clients
        .iam
        .list_open_id_connect_providers()
        .await
        .map_err(|e| Error::api("list OIDC providers", cluster_name, e))?;

    if let Some(existing) = providers
        .iter()
        .find(|provider| provider.arn.contains(issuer_id.as_str()))
    {
        if let Some(provider_id) = ProviderId::from_path(&existing.arn) {
            debug!(
                cluster = %cluster_name,
                provider = %existing.arn,
                "adopting existing OIDC provider"
            );
            return Ok(provider_id);
        }
    }

    let thumbprint = issuer_thumbprint(clients.certificates.as_ref(), &issuer).await?;
    let input = CreateOidcProviderInput {
        url: issuer.clone(),
        client_ids: vec![config.ebs_csi.oidc_audience.clone()],
        thumbprints: vec![thumbprint],
        tags: Vec::new(),
    };
    let arn = clients
        .iam
        .create_open_id_connect_provider(&input)
        .await
        .map_err(|e| Error::api("create OIDC provider", &issuer, e))?;

    info!(cluster = %cluster_name, provider = %arn, "created OIDC provider");
    Ok(ProviderId::from_path(&arn).unwrap_or(issuer_id))
}

/// Deploy the driver role stack and return the role ARN
pub async fn create_driver_role(
    cloudformation: &dyn CloudFormationApi,
    config: &ProvisionerConfig,
    spec: &EksClusterConfigSpec,
    provider_id: &str,
) -> Result<String> {
    let template_body = config
        .templates
        .render_ebs_csi_driver_role(&spec.region, provider_id)?;
    let request = StackRequest {
        name: config.stacks.ebs_csi_role_stack_name(&spec.display_name),
        display_name: spec.display_name.clone(),
        template_body,
        capabilities: vec![CAPABILITY_IAM.to_string()],
        parameters: Vec::new(),
    };

    let stack = deploy_stack(cloudformation, &config.stacks, &request).await?;
    let role_arn = stack.output_value(&config.stacks.ebs_csi_role_output_key);
    if role_arn.is_empty() {
        return Err(Error::not_found(format!(
            "stack {} has no {} output",
            request.name, config.stacks.ebs_csi_role_output_key
        )));
    }

    info!(cluster = %spec.display_name, role = %role_arn, "created EBS CSI driver role");
    Ok(role_arn.to_string())
}

/// Whether the addon is installed
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AddonPresence {
    /// Installed, with its ARN
    Installed(String),
    /// Confirmed absent
    NotInstalled,
    /// The lookup failed; treated as absent
    Unconfirmed(String),
}

/// Check whether the EBS CSI driver addon is installed
///
/// Never fails: lookup errors are logged and reported as
/// [`AddonPresence::Unconfirmed`].
pub async fn check_addon(
    eks: &dyn EksApi,
    config: &ProvisionerConfig,
    cluster_name: &str,
) -> AddonPresence {
    let addon_name = &config.ebs_csi.addon_name;
    match eks.describe_addon(cluster_name, addon_name).await {
        Ok(Some(Addon {
            addon_arn: Some(arn),
            ..
        })) if !arn.is_empty() => {
            info!(cluster = %cluster_name, addon = %arn, "EBS CSI driver addon found");
            AddonPresence::Installed(arn)
        }
        Ok(_) => {
            info!(cluster = %cluster_name, "EBS CSI driver addon not found");
            AddonPresence::NotInstalled
        }
        Err(e) if e.is_resource_not_found() => {
            info!(cluster = %cluster_name, "EBS CSI driver addon not found: resource not found");
            AddonPresence::NotInstalled
        }
        Err(e) => {
            warn!(cluster = %cluster_name, error = %e, "could not check EBS CSI driver addon");
            AddonPresence::Unconfirmed(e.to_string())
        }
    }
}

/// Install the EBS CSI driver addon bound to the driver role
pub async fn install_addon(
    eks: &dyn EksApi,
    config: &ProvisionerConfig,
    cluster_name: &str,
    role_arn: &str,
) -> Result<Addon> {
    let input = CreateAddonInput {
        addon_name: config.ebs_csi.addon_name.clone(),
        cluster_name: cluster_name.to_string(),
        service_account_role_arn: Some(role_arn.to_string()),
    };

    let addon = eks
        .create_addon(&input)
        .await
        .map_err(|e| Error::api("install EBS CSI driver addon", cluster_name, e))?;

    info!(
        cluster = %cluster_name,
        addon = addon.addon_arn.as_deref().unwrap_or_default(),
        "installed EBS CSI driver addon"
    );
    Ok(addon)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::{
        Cluster, MockCloudFormationApi, MockEc2Api, MockEksApi, MockIamApi, OidcProviderEntry,
        ServiceError, Stack, StackOutput, StackStatus,
    };
    use crate::config::StackPolicy;
    use crate::oidc::MockCertificateChainSource;
    use std::sync::Arc;

    const ISSUER: &str =
        "https://oidc.eks.us-west-2.amazonaws.com/id/EXAMPLED539D4633E53DE1B71EXAMPLE";
    const PROVIDER_ARN: &str = concat!(
        "arn:aws:iam::123456789012:oidc-provider/",
        "oidc.eks.us-west-2.amazonaws.com/id/EXAMPLED539D4633E53DE1B71EXAMPLE"
    );
    const ROLE_ARN: &str = "arn:aws:iam::123456789012:role/prod-ebs-csi";
    const ADDON_ARN: &str = "arn:aws:eks:us-west-2:123456789012:addon/prod/aws-ebs-csi-driver/abc";

    struct Mocks {
        eks: MockEksApi,
        cloudformation: MockCloudFormationApi,
        iam: MockIamApi,
        certificates: MockCertificateChainSource,
    }

    impl Mocks {
        fn new() -> Self {
            Self {
                eks: MockEksApi::new(),
                cloudformation: MockCloudFormationApi::new(),
                iam: MockIamApi::new(),
                certificates: MockCertificateChainSource::new(),
            }
        }

        fn into_clients(self) -> CloudClients {
            CloudClients::new(
                Arc::new(self.eks),
                Arc::new(self.cloudformation),
                Arc::new(MockEc2Api::new()),
                Arc::new(self.iam),
                Arc::new(self.certificates),
            )
        }
    }

    fn config() -> ProvisionerConfig {
        ProvisionerConfig {
            stacks: StackPolicy {
                poll_interval_ms: 1,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn spec() -> EksClusterConfigSpec {
        EksClusterConfigSpec {
            display_name: "prod".to_string(),
            region: "us-west-2".to_string(),
            ebs_csi_driver: true,
            ..Default::default()
        }
    }

    fn expect_issuer(eks: &mut MockEksApi) {
        eks.expect_describe_cluster().returning(|name| {
            Ok(Cluster {
                name: name.to_string(),
                oidc_issuer: Some(ISSUER.to_string()),
                ..Default::default()
            })
        });
    }

    fn expect_role_stack(cf: &mut MockCloudFormationApi) {
        cf.expect_create_stack()
            .withf(|input| {
                input.stack_name == "prod-ebs-csi-driver-role"
                    && input
                        .template_body
                        .contains("id/EXAMPLED539D4633E53DE1B71EXAMPLE:aud")
            })
            .times(1)
            .returning(|_| Ok("stack-id".to_string()));
        cf.expect_describe_stacks().returning(|_| {
            Ok(vec![Stack {
                stack_name: "prod-ebs-csi-driver-role".to_string(),
                stack_status: StackStatus::CreateComplete,
                outputs: vec![StackOutput {
                    output_key: "EBSCSIDriverRole".to_string(),
                    output_value: ROLE_ARN.to_string(),
                }],
            }])
        });
    }

    // ==========================================================================
    // Story: OIDC provider discovery is idempotent
    // ==========================================================================

    #[tokio::test]
    async fn matching_provider_is_adopted_without_creation() {
        let mut mocks = Mocks::new();
        expect_issuer(&mut mocks.eks);
        mocks.iam.expect_list_open_id_connect_providers().returning(|| {
            Ok(vec![
                OidcProviderEntry {
                    arn: concat!(
                        "arn:aws:iam::123456789012:oidc-provider/",
                        "oidc.eks.us-west-2.amazonaws.com/id/OTHER"
                    )
                    .to_string(),
                },
                OidcProviderEntry {
                    arn: PROVIDER_ARN.to_string(),
                },
            ])
        });
        mocks.iam.expect_create_open_id_connect_provider().never();
        mocks.certificates.expect_peer_certificate_chain().never();

        let clients = mocks.into_clients();
        for _ in 0..2 {
            let provider_id = configure_oidc_provider(&clients, &config(), "prod").await.unwrap();
            assert_eq!(provider_id.as_str(), "EXAMPLED539D4633E53DE1B71EXAMPLE");
        }
    }

    #[tokio::test]
    async fn missing_provider_is_created_with_root_thumbprint() {
        let mut mocks = Mocks::new();
        expect_issuer(&mut mocks.eks);
        mocks
            .iam
            .expect_list_open_id_connect_providers()
            .returning(|| Ok(vec![]));
        mocks
            .certificates
            .expect_peer_certificate_chain()
            .withf(|endpoint| {
                endpoint.host == "oidc.eks.us-west-2.amazonaws.com" && endpoint.port == 443
            })
            .returning(|_| Ok(vec![b"leaf".to_vec(), b"abc".to_vec()]));
        mocks
            .iam
            .expect_create_open_id_connect_provider()
            .withf(|input| {
                input.url == ISSUER
                    && input.client_ids == vec!["sts.amazonaws.com".to_string()]
                    && input.thumbprints
                        == vec!["a9993e364706816aba3e25717850c26c9cd0d89d".to_string()]
            })
            .times(1)
            .returning(|_| Ok(PROVIDER_ARN.to_string()));

        let provider_id = configure_oidc_provider(&mocks.into_clients(), &config(), "prod")
            .await
            .unwrap();
        assert_eq!(provider_id.as_str(), "EXAMPLED539D4633E53DE1B71EXAMPLE");
    }

    #[tokio::test]
    async fn cluster_without_issuer_is_an_error() {
        let mut mocks = Mocks::new();
        mocks
            .eks
            .expect_describe_cluster()
            .returning(|name| Ok(Cluster { name: name.to_string(), ..Default::default() }));
        mocks.iam.expect_list_open_id_connect_providers().never();

        let err = configure_oidc_provider(&mocks.into_clients(), &config(), "prod")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn provider_id_is_last_path_segment() {
        assert_eq!(
            ProviderId::from_path(PROVIDER_ARN).unwrap().as_str(),
            "EXAMPLED539D4633E53DE1B71EXAMPLE"
        );
        assert_eq!(ProviderId::from_path("https://issuer/id/ABC/").unwrap().as_str(), "ABC");
        assert_eq!(ProviderId::from_path(""), None);
    }

    // ==========================================================================
    // Story: Addon check never fails the run
    // ==========================================================================

    #[tokio::test]
    async fn resource_not_found_means_not_installed() {
        let mut eks = MockEksApi::new();
        eks.expect_describe_addon()
            .returning(|_, _| {
                Err(ServiceError::with_code("ResourceNotFoundException", "no addon"))
            });
        assert_eq!(
            check_addon(&eks, &config(), "prod").await,
            AddonPresence::NotInstalled
        );
    }

    #[tokio::test]
    async fn empty_response_means_not_installed() {
        let mut eks = MockEksApi::new();
        eks.expect_describe_addon().returning(|_, _| Ok(None));
        assert_eq!(check_addon(&eks, &config(), "prod").await, AddonPresence::NotInstalled);
    }

    #[tokio::test]
    async fn populated_arn_means_installed() {
        let mut eks = MockEksApi::new();
        eks.expect_describe_addon()
            .withf(|cluster, addon| cluster == "prod" && addon == "aws-ebs-csi-driver")
            .returning(|_, _| {
                Ok(Some(Addon {
                    addon_name: "aws-ebs-csi-driver".to_string(),
                    addon_arn: Some(ADDON_ARN.to_string()),
                    status: Some("ACTIVE".to_string()),
                }))
            });
        assert_eq!(
            check_addon(&eks, &config(), "prod").await,
            AddonPresence::Installed(ADDON_ARN.to_string())
        );
    }

    #[tokio::test]
    async fn other_describe_errors_are_unconfirmed() {
        let mut eks = MockEksApi::new();
        eks.expect_describe_addon()
            .returning(|_, _| Err(ServiceError::with_code("AccessDeniedException", "denied")));
        assert!(matches!(
            check_addon(&eks, &config(), "prod").await,
            AddonPresence::Unconfirmed(_)
        ));
    }

    // ==========================================================================
    // Story: The stage machine resumes where it stopped
    // ==========================================================================

    #[tokio::test]
    async fn full_run_reaches_complete() {
        let mut mocks = Mocks::new();
        expect_issuer(&mut mocks.eks);
        mocks
            .iam
            .expect_list_open_id_connect_providers()
            .returning(|| Ok(vec![OidcProviderEntry { arn: PROVIDER_ARN.to_string() }]));
        expect_role_stack(&mut mocks.cloudformation);
        mocks.eks.expect_describe_addon().returning(|_, _| Ok(None));
        mocks
            .eks
            .expect_create_addon()
            .withf(|input| {
                input.addon_name == "aws-ebs-csi-driver"
                    && input.cluster_name == "prod"
                    && input.service_account_role_arn.as_deref() == Some(ROLE_ARN)
            })
            .times(1)
            .returning(|input| {
                Ok(Addon {
                    addon_name: input.addon_name.clone(),
                    addon_arn: Some(ADDON_ARN.to_string()),
                    status: Some("CREATING".to_string()),
                })
            });

        let stage = EbsCsiStage::default()
            .run(&mocks.into_clients(), &config(), &spec())
            .await
            .unwrap();
        assert_eq!(
            stage,
            EbsCsiStage::Complete {
                addon_arn: Some(ADDON_ARN.to_string())
            }
        );
    }

    #[tokio::test]
    async fn installed_addon_skips_installation() {
        let mut mocks = Mocks::new();
        mocks.eks.expect_describe_addon().returning(|_, _| {
            Ok(Some(Addon {
                addon_arn: Some(ADDON_ARN.to_string()),
                ..Default::default()
            }))
        });
        mocks.eks.expect_create_addon().never();

        let stage = EbsCsiStage::CheckAddon {
            role_arn: ROLE_ARN.to_string(),
        }
        .run(&mocks.into_clients(), &config(), &spec())
        .await
        .unwrap();
        assert_eq!(
            stage,
            EbsCsiStage::Complete {
                addon_arn: Some(ADDON_ARN.to_string())
            }
        );
    }

    #[tokio::test]
    async fn install_failure_reports_stage_to_resume_from() {
        let mut mocks = Mocks::new();
        mocks
            .eks
            .expect_describe_addon()
            .returning(|_, _| Err(ServiceError::new("throttled")));
        mocks
            .eks
            .expect_create_addon()
            .returning(|_| Err(ServiceError::with_code("InvalidParameterException", "bad role")));

        let err = EbsCsiStage::CheckAddon {
            role_arn: ROLE_ARN.to_string(),
        }
        .run(&mocks.into_clients(), &config(), &spec())
        .await
        .unwrap_err();

        assert_eq!(
            err.stage,
            EbsCsiStage::InstallAddon {
                role_arn: ROLE_ARN.to_string()
            }
        );
        assert!(err.to_string().contains("install addon"));
    }

    #[tokio::test]
    async fn resumed_run_skips_completed_stages() {
        let mut mocks = Mocks::new();
        mocks.eks.expect_describe_cluster().never();
        mocks.iam.expect_list_open_id_connect_providers().never();
        expect_role_stack(&mut mocks.cloudformation);
        mocks.eks.expect_describe_addon().returning(|_, _| Ok(None));
        mocks.eks.expect_create_addon().returning(|input| {
            Ok(Addon {
                addon_name: input.addon_name.clone(),
                addon_arn: None,
                status: None,
            })
        });

        let stage = EbsCsiStage::CreateDriverRole {
            provider_id: "EXAMPLED539D4633E53DE1B71EXAMPLE".to_string(),
        }
        .run(&mocks.into_clients(), &config(), &spec())
        .await
        .unwrap();
        assert_eq!(stage, EbsCsiStage::Complete { addon_arn: None });
    }

    #[test]
    fn stage_serializes_with_camel_case_tag() {
        let stage = EbsCsiStage::CreateDriverRole {
            provider_id: "ABC".to_string(),
        };
        let json = serde_json::to_value(&stage).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "stage": "createDriverRole", "providerId": "ABC" })
        );

        let parsed: EbsCsiStage = serde_json::from_value(serde_json::json!({
            "stage": "configureOidcProvider"
        }))
        .unwrap();
        assert_eq!(parsed, EbsCsiStage::ConfigureOidcProvider);
    }
}
