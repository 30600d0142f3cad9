//! Service principal provider (client secret or certificate)

use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use super::{check_kind, identity_environment, KIND_SERVICE_PRINCIPAL};
use crate::config::{ProviderConfig, ServicePrincipalSpec};
use crate::environment::{AuthMode, EnvironmentParams};
use crate::error::{AuthError, AuthResult};
use crate::http::{ClientAuth, TokenClient};
use crate::scopes::{acquire_scopes, ClientCredentialsAcquirer, OPTIONAL_SCOPES};
use crate::types::{Credentials, Scope};

pub const CLIENT_SECRET_ENV: &str = "AZURE_CLIENT_SECRET";
pub const CLIENT_CERTIFICATE_PATH_ENV: &str = "AZURE_CLIENT_CERTIFICATE_PATH";
pub const CLIENT_CERTIFICATE_PASSWORD_ENV: &str = "AZURE_CLIENT_CERTIFICATE_PASSWORD";

pub struct ServicePrincipalProvider {
    name: String,
    tenant_id: String,
    client_id: String,
    client_secret: String,
    certificate_path: String,
    certificate_password: String,
    subscription_id: String,
    location: String,
    client: TokenClient,
}

impl ServicePrincipalProvider {
    pub fn from_config(name: &str, config: &ProviderConfig) -> AuthResult<Self> {
        check_kind(KIND_SERVICE_PRINCIPAL, config)?;
        Self::new(name, config.parse_spec()?)
    }

    /// Secret and certificate settings missing from `spec` fall back to
    /// the `AZURE_CLIENT_*` environment variables
    pub fn new(name: &str, spec: ServicePrincipalSpec) -> AuthResult<Self> {
        if spec.tenant_id.is_empty() {
            return Err(AuthError::Config(
                "tenant_id is required for the Azure service principal provider".to_string(),
            ));
        }
        if spec.client_id.is_empty() {
            return Err(AuthError::Config(
                "client_id is required for the Azure service principal provider".to_string(),
            ));
        }

        Ok(Self {
            name: name.to_string(),
            tenant_id: spec.tenant_id,
            client_id: spec.client_id,
            client_secret: or_env(spec.client_secret, CLIENT_SECRET_ENV),
            certificate_path: or_env(spec.client_certificate_path, CLIENT_CERTIFICATE_PATH_ENV),
            certificate_password: or_env(
                spec.client_certificate_password,
                CLIENT_CERTIFICATE_PASSWORD_ENV,
            ),
            subscription_id: spec.subscription_id,
            location: spec.location,
            client: TokenClient::new(spec.authority_host.as_deref())?,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn base_credentials(&self) -> Credentials {
        Credentials {
            tenant_id: self.tenant_id.clone(),
            subscription_id: self.subscription_id.clone(),
            location: self.location.clone(),
            client_id: self.client_id.clone(),
            is_service_principal: true,
            ..Default::default()
        }
    }

    pub async fn authenticate(&self) -> AuthResult<Credentials> {
        debug!(
            "Authenticating Azure service principal {} (tenant {}, client {}, certificate: {})",
            self.name,
            self.tenant_id,
            self.client_id,
            !self.certificate_path.is_empty()
        );

        if self.client_secret.is_empty() {
            if self.certificate_path.is_empty() {
                return Err(AuthError::Config(
                    "client_secret or client_certificate_path is required for the Azure service principal provider"
                        .to_string(),
                ));
            }
            // downstream tools authenticate with the certificate themselves
            debug!(
                "Using certificate-only authentication from {}",
                self.certificate_path
            );
            return Ok(self.base_credentials());
        }

        let acquirer = Arc::new(ClientCredentialsAcquirer {
            client: self.client.clone(),
            tenant_id: self.tenant_id.clone(),
            client_id: self.client_id.clone(),
            auth: ClientAuth::Secret(self.client_secret.clone()),
        });
        acquire_scopes(
            acquirer,
            self.base_credentials(),
            Scope::Management,
            &OPTIONAL_SCOPES,
        )
        .await
    }

    pub fn validate(&self) -> AuthResult<()> {
        if self.tenant_id.is_empty() {
            return Err(AuthError::Config("tenant_id is required".to_string()));
        }
        if self.client_id.is_empty() {
            return Err(AuthError::Config("client_id is required".to_string()));
        }
        Ok(())
    }

    pub async fn logout(&self) -> AuthResult<()> {
        debug!(
            "Azure service principal provider {} has no local credentials to clear",
            self.name
        );
        Ok(())
    }

    pub fn environment(&self) -> HashMap<String, String> {
        identity_environment(
            &self.tenant_id,
            &self.client_id,
            &self.subscription_id,
            &self.location,
        )
    }

    pub fn environment_params(&self) -> EnvironmentParams {
        EnvironmentParams {
            subscription_id: self.subscription_id.clone(),
            tenant_id: self.tenant_id.clone(),
            location: self.location.clone(),
            mode: AuthMode::ServicePrincipal {
                client_id: self.client_id.clone(),
                client_secret: self.client_secret.clone(),
                certificate_path: self.certificate_path.clone(),
                certificate_password: self.certificate_password.clone(),
            },
        }
    }
}

fn or_env(value: String, key: &str) -> String {
    if value.is_empty() {
        std::env::var(key).unwrap_or_default()
    } else {
        value
    }
}
