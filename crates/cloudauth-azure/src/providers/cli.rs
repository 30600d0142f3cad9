//! Azure CLI pass-through provider
//!
//! Relies on an existing `az login` session; only identity context from
//! configuration is returned.

use std::collections::HashMap;
use tracing::debug;

use super::{check_kind, identity_environment, KIND_CLI};
use crate::config::{CliSpec, ProviderConfig};
use crate::environment::{AuthMode, EnvironmentParams};
use crate::error::AuthResult;
use crate::types::Credentials;

pub struct CliProvider {
    name: String,
    tenant_id: String,
    subscription_id: String,
    location: String,
}

impl CliProvider {
    pub fn from_config(name: &str, config: &ProviderConfig) -> AuthResult<Self> {
        check_kind(KIND_CLI, config)?;
        Ok(Self::new(name, config.parse_spec()?))
    }

    pub fn new(name: &str, spec: CliSpec) -> Self {
        Self {
            name: name.to_string(),
            tenant_id: spec.tenant_id,
            subscription_id: spec.subscription_id,
            location: spec.location,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn authenticate(&self) -> AuthResult<Credentials> {
        debug!("Using existing Azure CLI session for provider {}", self.name);
        Ok(Credentials {
            tenant_id: self.tenant_id.clone(),
            subscription_id: self.subscription_id.clone(),
            location: self.location.clone(),
            ..Default::default()
        })
    }

    pub fn validate(&self) -> AuthResult<()> {
        Ok(())
    }

    pub async fn logout(&self) -> AuthResult<()> {
        debug!(
            "Azure CLI provider {} has no local credentials to clear; use `az logout`",
            self.name
        );
        Ok(())
    }

    pub fn environment(&self) -> HashMap<String, String> {
        identity_environment(&self.tenant_id, "", &self.subscription_id, &self.location)
    }

    pub fn environment_params(&self) -> EnvironmentParams {
        EnvironmentParams {
            subscription_id: self.subscription_id.clone(),
            tenant_id: self.tenant_id.clone(),
            location: self.location.clone(),
            mode: AuthMode::Cli,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_identity_from_config() {
        let provider = CliProvider::new(
            "az",
            CliSpec {
                tenant_id: "tenant".into(),
                subscription_id: "sub".into(),
                ..Default::default()
            },
        );

        let creds = provider.authenticate().await.unwrap();
        assert!(creds.access_token.is_empty());
        assert_eq!(creds.tenant_id, "tenant");
        assert_eq!(creds.subscription_id, "sub");
        assert!(!creds.is_service_principal);

        let env = provider.environment();
        assert_eq!(env.len(), 2);
        assert_eq!(env["AZURE_SUBSCRIPTION_ID"], "sub");
    }
}
