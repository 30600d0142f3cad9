//! Workload identity federation (OIDC) provider
//!
//! Exchanges a federated JWT for Azure tokens with a client credentials
//! grant. The JWT comes from the configured token file,
//! `AZURE_FEDERATED_TOKEN_FILE`, or the GitHub Actions OIDC endpoint.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use super::{check_kind, identity_environment, KIND_OIDC};
use crate::config::{OidcSpec, ProviderConfig};
use crate::environment::{AuthMode, EnvironmentParams};
use crate::error::{AuthError, AuthResult};
use crate::http::{ClientAuth, TokenClient};
use crate::scopes::{acquire_scopes, ClientCredentialsAcquirer, OPTIONAL_SCOPES};
use crate::types::{Credentials, Scope};

pub const DEFAULT_AUDIENCE: &str = "api://AzureADTokenExchange";

pub const FEDERATED_TOKEN_FILE_ENV: &str = "AZURE_FEDERATED_TOKEN_FILE";
const GITHUB_ACTIONS_ENV: &str = "GITHUB_ACTIONS";
const GITHUB_REQUEST_URL_ENV: &str = "ACTIONS_ID_TOKEN_REQUEST_URL";
const GITHUB_REQUEST_TOKEN_ENV: &str = "ACTIONS_ID_TOKEN_REQUEST_TOKEN";

#[derive(Debug, Deserialize)]
struct GitHubTokenResponse {
    #[serde(default)]
    value: String,
}

/// Where the federated token was read from
#[derive(Debug, Clone, PartialEq, Eq)]
struct FederatedToken {
    token: String,
    file: Option<String>,
}

pub struct OidcProvider {
    name: String,
    tenant_id: String,
    client_id: String,
    subscription_id: String,
    location: String,
    audience: String,
    token_file_path: String,
    client: TokenClient,
}

impl OidcProvider {
    pub fn from_config(name: &str, config: &ProviderConfig) -> AuthResult<Self> {
        check_kind(KIND_OIDC, config)?;
        Self::new(name, config.parse_spec()?)
    }

    pub fn new(name: &str, spec: OidcSpec) -> AuthResult<Self> {
        if spec.tenant_id.is_empty() {
            return Err(AuthError::Config(
                "tenant_id is required for the Azure OIDC provider".to_string(),
            ));
        }
        if spec.client_id.is_empty() {
            return Err(AuthError::Config(
                "client_id is required for the Azure OIDC provider".to_string(),
            ));
        }

        Ok(Self {
            name: name.to_string(),
            tenant_id: spec.tenant_id,
            client_id: spec.client_id,
            subscription_id: spec.subscription_id,
            location: spec.location,
            audience: if spec.audience.is_empty() {
                DEFAULT_AUDIENCE.to_string()
            } else {
                spec.audience
            },
            token_file_path: spec.token_file_path,
            client: TokenClient::new(spec.authority_host.as_deref())?,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn authenticate(&self) -> AuthResult<Credentials> {
        debug!(
            "Authenticating Azure OIDC provider {} (tenant {}, client {})",
            self.name, self.tenant_id, self.client_id
        );
        let federated = self.federated_token().await?;

        let base = Credentials {
            tenant_id: self.tenant_id.clone(),
            subscription_id: self.subscription_id.clone(),
            location: self.location.clone(),
            client_id: self.client_id.clone(),
            is_service_principal: true,
            federated_token: Some(federated.token.clone()),
            token_file_path: federated.file,
            ..Default::default()
        };
        let acquirer = Arc::new(ClientCredentialsAcquirer {
            client: self.client.clone(),
            tenant_id: self.tenant_id.clone(),
            client_id: self.client_id.clone(),
            auth: ClientAuth::Assertion(federated.token),
        });

        let creds = acquire_scopes(acquirer, base, Scope::Management, &OPTIONAL_SCOPES).await?;
        debug!(
            "Authenticated Azure OIDC provider {} (graph token: {}, key vault token: {})",
            self.name,
            creds.graph_api_token.is_some(),
            creds.key_vault_token.is_some()
        );
        Ok(creds)
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
            "Azure OIDC provider {} has no local credentials to clear",
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
        let token_file = if self.token_file_path.is_empty() {
            std::env::var(FEDERATED_TOKEN_FILE_ENV).unwrap_or_default()
        } else {
            self.token_file_path.clone()
        };
        EnvironmentParams {
            subscription_id: self.subscription_id.clone(),
            tenant_id: self.tenant_id.clone(),
            location: self.location.clone(),
            mode: AuthMode::Oidc {
                client_id: self.client_id.clone(),
                token_file,
            },
        }
    }

    async fn federated_token(&self) -> AuthResult<FederatedToken> {
        if !self.token_file_path.is_empty() {
            return read_token_file(&self.token_file_path).await;
        }

        if let Some(path) = non_empty_env(FEDERATED_TOKEN_FILE_ENV) {
            debug!("Reading federated token from {}", FEDERATED_TOKEN_FILE_ENV);
            return read_token_file(&path).await;
        }

        if std::env::var(GITHUB_ACTIONS_ENV).as_deref() == Ok("true") {
            let token = self.fetch_github_token().await?;
            return Ok(FederatedToken { token, file: None });
        }

        Err(AuthError::FederatedTokenUnavailable(format!(
            "no federated token source found. Set token_file_path in config, {}, \
             or run in GitHub Actions with id-token: write permission",
            FEDERATED_TOKEN_FILE_ENV
        )))
    }

    async fn fetch_github_token(&self) -> AuthResult<String> {
        let request_url = non_empty_env(GITHUB_REQUEST_URL_ENV).ok_or_else(|| {
            AuthError::FederatedTokenUnavailable(format!(
                "{GITHUB_REQUEST_URL_ENV} not set; ensure the job has 'id-token: write' permission"
            ))
        })?;
        let request_token = non_empty_env(GITHUB_REQUEST_TOKEN_ENV).ok_or_else(|| {
            AuthError::FederatedTokenUnavailable(format!(
                "{GITHUB_REQUEST_TOKEN_ENV} not set; ensure the job has 'id-token: write' permission"
            ))
        })?;

        let mut url = url::Url::parse(&request_url).map_err(|e| {
            AuthError::FederatedTokenUnavailable(format!("invalid {GITHUB_REQUEST_URL_ENV}: {e}"))
        })?;
        url.query_pairs_mut().append_pair("audience", &self.audience);

        let response = self
            .client
            .http()
            .get(url)
            .header(reqwest::header::AUTHORIZATION, format!("bearer {request_token}"))
            .send()
            .await
            .map_err(|e| {
                AuthError::FederatedTokenUnavailable(format!("failed to fetch GitHub OIDC token: {e}"))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::FederatedTokenUnavailable(format!(
                "GitHub OIDC endpoint returned {status}: {body}"
            )));
        }

        let body: GitHubTokenResponse = response.json().await.map_err(|e| {
            AuthError::FederatedTokenUnavailable(format!("failed to decode GitHub OIDC response: {e}"))
        })?;
        if body.value.is_empty() {
            return Err(AuthError::FederatedTokenUnavailable(
                "empty token in GitHub OIDC response".to_string(),
            ));
        }

        debug!("Fetched GitHub Actions OIDC token (audience {})", self.audience);
        Ok(body.value)
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

async fn read_token_file(path: &str) -> AuthResult<FederatedToken> {
    let contents = tokio::fs::read_to_string(Path::new(path))
        .await
        .map_err(|e| {
            AuthError::FederatedTokenUnavailable(format!(
                "failed to read federated token file {path}: {e}"
            ))
        })?;
    let token = contents.trim();
    if token.is_empty() {
        return Err(AuthError::FederatedTokenUnavailable(format!(
            "federated token file {path} is empty"
        )));
    }
    Ok(FederatedToken {
        token: token.to_string(),
        file: Some(path.to_string()),
    })
}
