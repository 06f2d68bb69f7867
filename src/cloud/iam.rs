//! IAM identity federation API

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use super::{ServiceError, Tag};

/// An entry from the account's OIDC provider list
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OidcProviderEntry {
    /// Provider ARN
    pub arn: String,
}

/// Request to create an OIDC provider
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CreateOidcProviderInput {
    /// Issuer URL
    pub url: String,
    /// Audiences allowed to use the provider
    pub client_ids: Vec<String>,
    /// SHA-1 thumbprints of the issuer's root certificate
    pub thumbprints: Vec<String>,
    /// Provider tags
    pub tags: Vec<Tag>,
}

/// IAM operations used by the orchestrator
#[cfg_attr(test, automock)]
#[async_trait]
pub trait IamApi: Send + Sync {
    /// List the account's OIDC providers
    async fn list_open_id_connect_providers(&self)
        -> Result<Vec<OidcProviderEntry>, ServiceError>;

    /// Create an OIDC provider, returning its ARN
    async fn create_open_id_connect_provider(
        &self,
        input: &CreateOidcProviderInput,
    ) -> Result<String, ServiceError>;
}
