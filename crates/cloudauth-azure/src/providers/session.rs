//! Device code session store
//!
//! Keeps the refresh tokens issued by device code logins so a later login
//! for the same tenant can be completed without user interaction. Stored at
//! `<cache-root>/azure-device-code/<provider>/session.json`.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::claims::{decode_claims, object_id, username, UNKNOWN_USERNAME};
use crate::error::CacheError;
use crate::token_cache::{CacheStorage, FileCacheStorage};

pub const SESSION_FILE_NAME: &str = "session.json";

/// One signed-in account
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionAccount {
    /// `<oid>.<tid>`
    pub home_account_id: String,
    pub realm: String,
    pub username: String,
    pub refresh_token: String,
}

impl SessionAccount {
    /// Describe the account behind `access_token` in `realm`
    pub fn from_token(access_token: &str, realm: &str, refresh_token: String) -> Self {
        let claims = decode_claims(access_token).ok();
        let oid = claims
            .as_ref()
            .and_then(|c| object_id(c).ok())
            .unwrap_or_default();
        let username = claims
            .as_ref()
            .and_then(|c| username(c).ok())
            .unwrap_or_else(|| UNKNOWN_USERNAME.to_string());

        Self {
            home_account_id: format!("{oid}.{realm}"),
            realm: realm.to_string(),
            username,
            refresh_token,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SessionFile {
    #[serde(default)]
    accounts: Vec<SessionAccount>,
}

/// Per-provider account store
#[derive(Clone)]
pub struct SessionStore {
    storage: Arc<dyn CacheStorage>,
}

impl SessionStore {
    pub fn new(storage: Arc<dyn CacheStorage>) -> Self {
        Self { storage }
    }

    pub fn from_default_location() -> Result<Self, CacheError> {
        Ok(Self::new(Arc::new(FileCacheStorage::device_code(
            SESSION_FILE_NAME,
        )?)))
    }

    async fn read(&self, provider: &str) -> SessionFile {
        match self.storage.get(provider).await {
            Ok(Some(bytes)) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                debug!("Ignoring corrupt session store for {}: {}", provider, e);
                SessionFile::default()
            }),
            Ok(None) => SessionFile::default(),
            Err(e) => {
                debug!("Failed to read session store for {}: {}", provider, e);
                SessionFile::default()
            }
        }
    }

    /// Account signed in to `tenant_id`, if any
    pub async fn account_for(&self, provider: &str, tenant_id: &str) -> Option<SessionAccount> {
        self.read(provider)
            .await
            .accounts
            .into_iter()
            .find(|a| a.realm == tenant_id && !a.refresh_token.is_empty())
    }

    /// Insert or replace `account`; failures are logged and swallowed
    pub async fn save_account(&self, provider: &str, account: SessionAccount) {
        let mut file = self.read(provider).await;
        file.accounts
            .retain(|a| !(a.home_account_id == account.home_account_id && a.realm == account.realm));
        file.accounts.push(account);

        let bytes = match serde_json::to_vec_pretty(&file) {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!("Failed to serialize session store for {}: {}", provider, e);
                return;
            }
        };
        if let Err(e) = self.storage.set(provider, bytes).await {
            debug!("Failed to write session store for {}: {}", provider, e);
        }
    }

    pub async fn clear(&self, provider: &str) -> Result<(), CacheError> {
        self.storage.delete(provider).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claims::tests::make_token;
    use crate::token_cache::MemoryCacheStorage;
    use serde_json::json;

    fn store() -> SessionStore {
        SessionStore::new(Arc::new(MemoryCacheStorage::new()))
    }

    #[test]
    fn test_account_from_token() {
        let token = make_token(json!({"oid": "o-1", "upn": "dev@contoso.com"}));
        let account = SessionAccount::from_token(&token, "tenant", "rt".into());
        assert_eq!(account.home_account_id, "o-1.tenant");
        assert_eq!(account.username, "dev@contoso.com");

        let opaque = SessionAccount::from_token("opaque", "tenant", "rt".into());
        assert_eq!(opaque.username, UNKNOWN_USERNAME);
    }

    #[tokio::test]
    async fn test_account_lookup_by_tenant() {
        let store = store();
        store
            .save_account(
                "dev",
                SessionAccount {
                    home_account_id: "o.a".into(),
                    realm: "tenant-a".into(),
                    username: "u".into(),
                    refresh_token: "rt-a".into(),
                },
            )
            .await;

        assert_eq!(
            store.account_for("dev", "tenant-a").await.unwrap().refresh_token,
            "rt-a"
        );
        assert!(store.account_for("dev", "tenant-b").await.is_none());
        assert!(store.account_for("other", "tenant-a").await.is_none());
    }

    #[tokio::test]
    async fn test_save_replaces_same_account() {
        let store = store();
        for rt in ["rt-1", "rt-2"] {
            store
                .save_account(
                    "dev",
                    SessionAccount {
                        home_account_id: "o.t".into(),
                        realm: "t".into(),
                        username: "u".into(),
                        refresh_token: rt.into(),
                    },
                )
                .await;
        }
        assert_eq!(store.read("dev").await.accounts.len(), 1);
        assert_eq!(store.account_for("dev", "t").await.unwrap().refresh_token, "rt-2");

        store.clear("dev").await.unwrap();
        assert!(store.account_for("dev", "t").await.is_none());
    }
}
