//! Shared credential types and well-known Azure constants

use chrono::{DateTime, SubsecRound, Utc};
use etcetera::{choose_base_strategy, BaseStrategy};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{AuthError, AuthResult, CacheError};

/// Azure CLI public client id, used for user logins so the Azure CLI can
/// read the tokens we mirror into its cache
pub const AZURE_CLI_CLIENT_ID: &str = "04b07795-8ddb-461a-bbee-02f9e1bf7b46";

/// Public cloud authority
pub const DEFAULT_AUTHORITY_HOST: &str = "https://login.microsoftonline.com";

/// Environment recorded in MSAL cache keys
pub const MSAL_ENVIRONMENT: &str = "login.microsoftonline.com";

pub const MANAGEMENT_SCOPE: &str = "https://management.azure.com/.default";
pub const GRAPH_SCOPE: &str = "https://graph.microsoft.com/.default";
pub const KEY_VAULT_SCOPE: &str = "https://vault.azure.net/.default";

/// Token type reported by the Azure token endpoint
pub const BEARER: &str = "Bearer";

/// Application name used for on-disk directories
pub const APP_DIR_NAME: &str = "cloudauth";

/// Resolved Azure credentials returned by every provider
///
/// `access_token` and `expiration` are set on every successful
/// authentication except service-principal certificate mode, where token
/// issuance is left to the downstream tool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Credentials {
    pub access_token: String,
    pub token_type: String,
    pub expiration: Option<DateTime<Utc>>,
    pub tenant_id: String,
    pub subscription_id: String,
    pub location: String,
    pub client_id: String,
    pub graph_api_token: Option<String>,
    pub graph_api_expiration: Option<DateTime<Utc>>,
    pub key_vault_token: Option<String>,
    pub key_vault_expiration: Option<DateTime<Utc>>,
    pub is_service_principal: bool,
    pub federated_token: Option<String>,
    pub token_file_path: Option<String>,
}

impl Credentials {
    /// Whether the primary token is present and not yet expired
    pub fn is_expired(&self) -> bool {
        match self.expiration {
            Some(expires_at) => expires_at <= Utc::now(),
            None => true,
        }
    }

    pub(crate) fn set_token(&mut self, scope: Scope, token: AcquiredToken) {
        match scope {
            Scope::Management => {
                self.access_token = token.access_token;
                self.token_type = token.token_type;
                self.expiration = Some(token.expires_at);
            }
            Scope::Graph => {
                self.graph_api_token = Some(token.access_token);
                self.graph_api_expiration = Some(token.expires_at);
            }
            Scope::KeyVault => {
                self.key_vault_token = Some(token.access_token);
                self.key_vault_expiration = Some(token.expires_at);
            }
        }
    }
}

/// Resource scopes requested from the token endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Management,
    Graph,
    KeyVault,
}

impl Scope {
    /// The `/.default` scope string sent to the token endpoint
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Management => MANAGEMENT_SCOPE,
            Scope::Graph => GRAPH_SCOPE,
            Scope::KeyVault => KEY_VAULT_SCOPE,
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Token obtained for a single scope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquiredToken {
    pub access_token: String,
    pub token_type: String,
    pub expires_at: DateTime<Utc>,
}

impl AcquiredToken {
    /// Build a token from an `expires_in` lifetime, truncated to whole seconds
    ///
    /// A lifetime that does not fit a timestamp is rejected.
    pub fn from_lifetime(
        access_token: String,
        token_type: Option<String>,
        expires_in: u64,
    ) -> AuthResult<Self> {
        let expires_at = i64::try_from(expires_in)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
            .ok_or_else(|| {
                AuthError::TokenExchange(format!("token lifetime of {expires_in}s is out of range"))
            })?;
        Ok(Self {
            access_token,
            token_type: token_type
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| BEARER.to_string()),
            expires_at: expires_at.trunc_subsecs(0),
        })
    }
}

/// Local device-code cache record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedToken {
    pub access_token: String,
    pub token_type: String,
    pub expires_at: DateTime<Utc>,
    pub tenant_id: String,
    #[serde(default)]
    pub subscription_id: String,
    #[serde(default)]
    pub location: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graph_api_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graph_api_expires_at: Option<DateTime<Utc>>,
}

impl CachedToken {
    /// Snapshot the cacheable parts of freshly acquired credentials
    ///
    /// KeyVault tokens are never cached; they are minted on every login.
    pub fn from_credentials(creds: &Credentials) -> Option<Self> {
        let expires_at = creds.expiration?;
        if creds.access_token.is_empty() {
            return None;
        }
        Some(Self {
            access_token: creds.access_token.clone(),
            token_type: creds.token_type.clone(),
            expires_at: expires_at.trunc_subsecs(0),
            tenant_id: creds.tenant_id.clone(),
            subscription_id: creds.subscription_id.clone(),
            location: creds.location.clone(),
            graph_api_token: creds.graph_api_token.clone(),
            graph_api_expires_at: creds.graph_api_expiration.map(|t| t.trunc_subsecs(0)),
        })
    }
}

/// Per-user cache root, e.g. `~/.cache/cloudauth` on Linux
pub fn cache_root() -> Result<PathBuf, CacheError> {
    let strategy = choose_base_strategy().map_err(|e| CacheError::Unavailable(e.to_string()))?;
    Ok(strategy.cache_dir().join(APP_DIR_NAME))
}

/// Azure CLI configuration directory (`~/.azure`)
pub fn azure_config_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".azure"))
}

/// Whether the process is running under a known CI system
pub fn is_ci() -> bool {
    const CI_VARS: &[&str] = &[
        "CI",
        "GITHUB_ACTIONS",
        "GITLAB_CI",
        "BUILDKITE",
        "TF_BUILD",
        "JENKINS_URL",
    ];
    CI_VARS.iter().any(|var| {
        std::env::var(var)
            .map(|v| !v.is_empty() && v != "false" && v != "0")
            .unwrap_or(false)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_token_fills_disjoint_fields() {
        let expires_at = Utc::now();
        let mut creds = Credentials::default();
        creds.set_token(
            Scope::Graph,
            AcquiredToken {
                access_token: "graph".into(),
                token_type: BEARER.into(),
                expires_at,
            },
        );

        assert!(creds.access_token.is_empty());
        assert_eq!(creds.graph_api_token.as_deref(), Some("graph"));
        assert_eq!(creds.graph_api_expiration, Some(expires_at));
        assert!(creds.key_vault_token.is_none());
    }

    #[test]
    fn test_from_lifetime() {
        let token = AcquiredToken::from_lifetime("t".into(), None, 3600).unwrap();
        assert_eq!(token.token_type, BEARER);
        assert!(token.expires_at > Utc::now() + chrono::Duration::minutes(59));
    }

    #[test]
    fn test_from_lifetime_out_of_range() {
        for expires_in in [10_000_000_000_000, i64::MAX as u64 + 1, u64::MAX] {
            let err = AcquiredToken::from_lifetime("t".into(), None, expires_in).unwrap_err();
            assert!(matches!(err, AuthError::TokenExchange(_)));
        }
    }

    #[test]
    fn test_cached_token_requires_primary_token() {
        let creds = Credentials {
            expiration: Some(Utc::now()),
            ..Default::default()
        };
        assert!(CachedToken::from_credentials(&creds).is_none());
    }

    #[test]
    fn test_credentials_json_is_camel_case() {
        let creds = Credentials {
            access_token: "tok".into(),
            tenant_id: "tenant".into(),
            is_service_principal: true,
            ..Default::default()
        };
        let json = serde_json::to_value(&creds).unwrap();
        assert_eq!(json["accessToken"], "tok");
        assert_eq!(json["tenantId"], "tenant");
        assert_eq!(json["isServicePrincipal"], true);
    }
}
