//! Azure CLI cache synchronization
//!
//! Mirrors freshly acquired tokens into `~/.azure/msal_token_cache.json` and
//! marks the active subscription in `~/.azure/azureProfile.json`, so tools
//! that read the Azure CLI session see the same login.
//!
//! Both files are shared with other processes. Every read-modify-write runs
//! under an exclusive lock on the sibling `.lock` file.

pub mod lock;
pub mod profile;
pub mod records;

use chrono::Utc;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::claims::{decode_claims, object_id, username, UNKNOWN_USERNAME};
use crate::error::SyncError;
use crate::fs_util::{read_optional, write_private_file};
use crate::types::{azure_config_dir, AcquiredToken, Credentials, Scope, AZURE_CLI_CLIENT_ID};

pub use lock::LockGuard;
pub use profile::{AzureProfile, ProfileUserType, Subscription, SubscriptionEntry};
pub use records::{CacheIdentity, MsalCache, MsalIdentifiers};

pub const MSAL_CACHE_FILE: &str = "msal_token_cache.json";
pub const PROFILE_FILE: &str = "azureProfile.json";

/// Tokens to mirror into the MSAL cache for one login
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenCacheUpdate {
    pub tenant_id: String,
    /// Application id of the service principal; ignored for user logins,
    /// which are recorded under the Azure CLI client id
    pub client_id: String,
    pub is_service_principal: bool,
    pub management: AcquiredToken,
    pub graph: Option<AcquiredToken>,
    pub key_vault: Option<AcquiredToken>,
}

impl TokenCacheUpdate {
    /// Build an update from credentials carrying a management token
    pub fn from_credentials(creds: &Credentials) -> Option<Self> {
        if creds.access_token.is_empty() {
            return None;
        }
        let expires_at = creds.expiration?;
        let secondary = |token: &Option<String>, expires: &Option<chrono::DateTime<Utc>>| {
            match (token, expires) {
                (Some(token), Some(expires_at)) if !token.is_empty() => Some(AcquiredToken {
                    access_token: token.clone(),
                    token_type: crate::types::BEARER.to_string(),
                    expires_at: *expires_at,
                }),
                _ => None,
            }
        };

        Some(Self {
            tenant_id: creds.tenant_id.clone(),
            client_id: creds.client_id.clone(),
            is_service_principal: creds.is_service_principal,
            management: AcquiredToken {
                access_token: creds.access_token.clone(),
                token_type: creds.token_type.clone(),
                expires_at,
            },
            graph: secondary(&creds.graph_api_token, &creds.graph_api_expiration),
            key_vault: secondary(&creds.key_vault_token, &creds.key_vault_expiration),
        })
    }
}

/// Writer for the Azure CLI token cache and active profile
#[derive(Debug, Clone)]
pub struct ExternalCacheSync {
    azure_dir: PathBuf,
}

impl ExternalCacheSync {
    /// Sync into an explicit Azure config directory
    pub fn new(azure_dir: impl Into<PathBuf>) -> Self {
        Self {
            azure_dir: azure_dir.into(),
        }
    }

    /// Sync into `~/.azure`
    pub fn from_home() -> Result<Self, SyncError> {
        azure_config_dir()
            .map(Self::new)
            .ok_or(SyncError::HomeDirUnavailable)
    }

    pub fn azure_dir(&self) -> &Path {
        &self.azure_dir
    }

    pub fn msal_cache_path(&self) -> PathBuf {
        self.azure_dir.join(MSAL_CACHE_FILE)
    }

    pub fn profile_path(&self) -> PathBuf {
        self.azure_dir.join(PROFILE_FILE)
    }

    /// Upsert account or app metadata plus token entries for `update`
    ///
    /// Returns the cache key of the management token. User logins require
    /// an `oid` claim in the management token.
    pub fn update_token_cache(&self, update: &TokenCacheUpdate) -> Result<String, SyncError> {
        self.update_token_cache_at(update, Utc::now().timestamp())
    }

    pub(crate) fn update_token_cache_at(
        &self,
        update: &TokenCacheUpdate,
        cached_at: i64,
    ) -> Result<String, SyncError> {
        let (identity, client_id) = if update.is_service_principal {
            (CacheIdentity::ServicePrincipal, update.client_id.as_str())
        } else {
            let claims = decode_claims(&update.management.access_token)?;
            let object_id = object_id(&claims)?;
            let username = username(&claims).unwrap_or_else(|e| {
                debug!("Using fallback username for MSAL account: {}", e);
                UNKNOWN_USERNAME.to_string()
            });
            (
                CacheIdentity::User {
                    object_id,
                    username,
                },
                AZURE_CLI_CLIENT_ID,
            )
        };
        let ids = MsalIdentifiers::new(&identity, client_id, &update.tenant_id);

        let mut tokens = vec![(Scope::Management.as_str(), &update.management)];
        if let Some(graph) = &update.graph {
            tokens.push((Scope::Graph.as_str(), graph));
        } else {
            debug!("No Graph API token to mirror into the MSAL cache");
        }
        if let Some(key_vault) = &update.key_vault {
            tokens.push((Scope::KeyVault.as_str(), key_vault));
        } else {
            debug!("No KeyVault token to mirror into the MSAL cache");
        }

        let path = self.msal_cache_path();
        let mut guard = LockGuard::acquire(&path)?;

        let result: Result<String, SyncError> = (|| {
            let mut cache = match read_optional(&path)? {
                Some(bytes) => MsalCache::parse(&bytes),
                None => MsalCache::default(),
            };
            let key = cache
                .apply(&identity, &ids, &tokens, cached_at)
                .unwrap_or_default();
            let bytes = cache
                .to_json()
                .map_err(|e| SyncError::Serialization("MSAL cache", e))?;
            write_private_file(&path, &bytes)?;
            Ok(key)
        })();

        guard.release();

        if let Ok(key) = &result {
            debug!("Updated Azure CLI MSAL cache {} ({})", path.display(), key);
        }
        result
    }

    /// Make `subscription_id` the only default subscription in the profile
    pub fn update_active_profile(
        &self,
        username: &str,
        tenant_id: &str,
        subscription_id: &str,
        is_service_principal: bool,
    ) -> Result<(), SyncError> {
        let user_type = if is_service_principal {
            ProfileUserType::ServicePrincipal
        } else {
            ProfileUserType::User
        };

        let path = self.profile_path();
        let mut guard = LockGuard::acquire(&path)?;

        let result: Result<(), SyncError> = (|| {
            let mut profile = read_optional(&path)?
                .and_then(|bytes| AzureProfile::parse(&bytes))
                .unwrap_or_else(|| AzureProfile {
                    installation_id: uuid::Uuid::new_v4().to_string(),
                    ..Default::default()
                });

            profile.set_default_subscription(subscription_id, tenant_id, username, user_type);

            let bytes = profile
                .to_json()
                .map_err(|e| SyncError::Serialization("Azure profile", e))?;
            write_private_file(&path, &bytes)?;
            Ok(())
        })();

        guard.release();

        if result.is_ok() {
            debug!(
                "Updated Azure profile {} (subscription {})",
                path.display(),
                subscription_id
            );
        }
        result
    }

    /// Mirror `creds` into both files, logging instead of failing
    ///
    /// Runs on the blocking pool since file locks are waited on synchronously.
    pub async fn sync_credentials(&self, creds: &Credentials) {
        let sync = self.clone();
        let creds = creds.clone();
        let outcome = tokio::task::spawn_blocking(move || sync.sync_blocking(&creds)).await;
        if let Err(e) = outcome {
            warn!("Azure CLI cache sync task failed: {}", e);
        }
    }

    fn sync_blocking(&self, creds: &Credentials) {
        match TokenCacheUpdate::from_credentials(creds) {
            Some(update) => {
                if let Err(e) = self.update_token_cache(&update) {
                    warn!(
                        "Could not update Azure CLI token cache; tools reading the Azure CLI session may not see this login"
                    );
                    debug!("MSAL cache update failed: {}", e);
                }
            }
            None => debug!("No access token to mirror into the Azure CLI cache"),
        }

        let username = if creds.is_service_principal {
            creds.client_id.clone()
        } else {
            crate::claims::display_username(&creds.access_token)
        };
        if let Err(e) = self.update_active_profile(
            &username,
            &creds.tenant_id,
            &creds.subscription_id,
            creds.is_service_principal,
        ) {
            warn!("Could not update Azure CLI active profile");
            debug!("Azure profile update failed: {}", e);
        }
    }
}
