//! Azure credential providers
//!
//! [`Provider`] is a closed set dispatched by `match`; each variant owns its
//! configuration and HTTP client.

pub mod cli;
pub mod device_code;
pub mod oidc;
pub mod service_principal;
pub mod session;

use std::collections::HashMap;

use crate::config::ProviderConfig;
use crate::environment::EnvironmentParams;
use crate::error::{AuthError, AuthResult};
use crate::types::Credentials;

pub use cli::CliProvider;
pub use device_code::DeviceCodeProvider;
pub use oidc::OidcProvider;
pub use service_principal::ServicePrincipalProvider;
pub use session::{SessionAccount, SessionStore};

pub const KIND_DEVICE_CODE: &str = "azure/device-code";
pub const KIND_OIDC: &str = "azure/oidc";
pub const KIND_SERVICE_PRINCIPAL: &str = "azure/service-principal";
pub const KIND_CLI: &str = "azure/cli";

pub enum Provider {
    DeviceCode(DeviceCodeProvider),
    Oidc(OidcProvider),
    ServicePrincipal(ServicePrincipalProvider),
    Cli(CliProvider),
}

impl Provider {
    /// Build the provider named `name` from its configuration entry
    pub fn from_config(name: &str, config: &ProviderConfig) -> AuthResult<Self> {
        match config.kind.as_str() {
            KIND_DEVICE_CODE => Ok(Self::DeviceCode(DeviceCodeProvider::from_config(
                name, config,
            )?)),
            KIND_OIDC => Ok(Self::Oidc(OidcProvider::from_config(name, config)?)),
            KIND_SERVICE_PRINCIPAL => Ok(Self::ServicePrincipal(
                ServicePrincipalProvider::from_config(name, config)?,
            )),
            KIND_CLI => Ok(Self::Cli(CliProvider::from_config(name, config)?)),
            other => Err(AuthError::Config(format!(
                "Unsupported provider kind '{other}' for provider '{name}'"
            ))),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::DeviceCode(_) => KIND_DEVICE_CODE,
            Self::Oidc(_) => KIND_OIDC,
            Self::ServicePrincipal(_) => KIND_SERVICE_PRINCIPAL,
            Self::Cli(_) => KIND_CLI,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::DeviceCode(p) => p.name(),
            Self::Oidc(p) => p.name(),
            Self::ServicePrincipal(p) => p.name(),
            Self::Cli(p) => p.name(),
        }
    }

    pub async fn authenticate(&self) -> AuthResult<Credentials> {
        match self {
            Self::DeviceCode(p) => p.authenticate().await,
            Self::Oidc(p) => p.authenticate().await,
            Self::ServicePrincipal(p) => p.authenticate().await,
            Self::Cli(p) => p.authenticate().await,
        }
    }

    pub fn validate(&self) -> AuthResult<()> {
        match self {
            Self::DeviceCode(p) => p.validate(),
            Self::Oidc(p) => p.validate(),
            Self::ServicePrincipal(p) => p.validate(),
            Self::Cli(p) => p.validate(),
        }
    }

    pub async fn logout(&self) -> AuthResult<()> {
        match self {
            Self::DeviceCode(p) => p.logout().await,
            Self::Oidc(p) => p.logout().await,
            Self::ServicePrincipal(p) => p.logout().await,
            Self::Cli(p) => p.logout().await,
        }
    }

    /// Identity variables describing this provider
    pub fn environment(&self) -> HashMap<String, String> {
        match self {
            Self::DeviceCode(p) => p.environment(),
            Self::Oidc(p) => p.environment(),
            Self::ServicePrincipal(p) => p.environment(),
            Self::Cli(p) => p.environment(),
        }
    }

    /// Inputs for [`crate::environment::prepare_environment`]
    pub fn environment_params(&self) -> EnvironmentParams {
        match self {
            Self::DeviceCode(p) => p.environment_params(),
            Self::Oidc(p) => p.environment_params(),
            Self::ServicePrincipal(p) => p.environment_params(),
            Self::Cli(p) => p.environment_params(),
        }
    }
}

pub(crate) fn check_kind(expected: &'static str, config: &ProviderConfig) -> AuthResult<()> {
    if config.kind != expected {
        return Err(AuthError::InvalidKind {
            expected,
            actual: config.kind.clone(),
        });
    }
    Ok(())
}

pub(crate) fn identity_environment(
    tenant_id: &str,
    client_id: &str,
    subscription_id: &str,
    location: &str,
) -> HashMap<String, String> {
    [
        ("AZURE_TENANT_ID", tenant_id),
        ("AZURE_CLIENT_ID", client_id),
        ("AZURE_SUBSCRIPTION_ID", subscription_id),
        ("AZURE_LOCATION", location),
    ]
    .into_iter()
    .filter(|(_, value)| !value.is_empty())
    .map(|(key, value)| (key.to_string(), value.to_string()))
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_config_dispatch() {
        let cases = [
            (KIND_DEVICE_CODE, json!({"tenant_id": "t"})),
            (KIND_OIDC, json!({"tenant_id": "t", "client_id": "c"})),
            (
                KIND_SERVICE_PRINCIPAL,
                json!({"tenant_id": "t", "client_id": "c", "client_secret": "s"}),
            ),
            (KIND_CLI, json!({})),
        ];
        for (kind, spec) in cases {
            let provider = Provider::from_config("p", &ProviderConfig::new(kind, spec)).unwrap();
            assert_eq!(provider.kind(), kind);
            assert_eq!(provider.name(), "p");
            provider.validate().unwrap();
        }
    }

    #[test]
    fn test_unknown_kind() {
        let err = Provider::from_config("p", &ProviderConfig::new("aws/sso", json!({})))
            .err()
            .unwrap();
        assert!(matches!(err, AuthError::Config(_)));
    }

    #[test]
    fn test_constructor_rejects_wrong_kind() {
        let config = ProviderConfig::new(KIND_CLI, json!({"tenant_id": "t", "client_id": "c"}));
        assert!(matches!(
            OidcProvider::from_config("p", &config).err().unwrap(),
            AuthError::InvalidKind { expected: KIND_OIDC, .. }
        ));
    }

    #[test]
    fn test_missing_tenant_is_config_error() {
        let config = ProviderConfig::new(KIND_DEVICE_CODE, json!({"subscription_id": "s"}));
        assert!(matches!(
            Provider::from_config("p", &config).err().unwrap(),
            AuthError::Config(_)
        ));
    }

    #[test]
    fn test_identity_environment_skips_empty() {
        let env = identity_environment("t", "", "s", "");
        assert_eq!(env.len(), 2);
        assert_eq!(env["AZURE_TENANT_ID"], "t");
        assert_eq!(env["AZURE_SUBSCRIPTION_ID"], "s");
    }
}
