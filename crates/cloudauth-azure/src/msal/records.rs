//! Typed view of the Azure CLI MSAL token cache
//!
//! The file is a JSON object of sections, each mapping a composite key to a
//! flat record. Only `AccessToken`, `Account` and `AppMetadata` are modelled;
//! any other section (refresh tokens, id tokens) is carried through untouched.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::debug;

use crate::types::{AcquiredToken, BEARER, MSAL_ENVIRONMENT};

pub const ACCESS_TOKEN_SECTION: &str = "AccessToken";
pub const ACCOUNT_SECTION: &str = "Account";
pub const APP_METADATA_SECTION: &str = "AppMetadata";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessTokenEntry {
    pub credential_type: String,
    pub secret: String,
    pub home_account_id: String,
    pub environment: String,
    pub client_id: String,
    pub target: String,
    pub realm: String,
    pub token_type: String,
    pub cached_at: String,
    pub expires_on: String,
    pub extended_expires_on: String,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountEntry {
    pub home_account_id: String,
    pub environment: String,
    pub realm: String,
    pub local_account_id: String,
    pub username: String,
    pub authority_type: String,
    pub account_source: String,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppMetadataEntry {
    pub client_id: String,
    pub environment: String,
    pub family_id: String,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Who the cached tokens belong to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheIdentity {
    /// Interactive user, identified by the token's `oid`
    User { object_id: String, username: String },
    /// Application identity; its tokens carry no home account
    ServicePrincipal,
}

/// Identifiers shared by every record written for one login
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MsalIdentifiers {
    pub home_account_id: String,
    pub environment: String,
    pub client_id: String,
    pub realm: String,
}

impl MsalIdentifiers {
    pub fn new(identity: &CacheIdentity, client_id: &str, tenant_id: &str) -> Self {
        let home_account_id = match identity {
            CacheIdentity::User { object_id, .. } => format!("{}.{}", object_id, tenant_id),
            CacheIdentity::ServicePrincipal => String::new(),
        };
        Self {
            home_account_id,
            environment: MSAL_ENVIRONMENT.to_string(),
            client_id: client_id.to_string(),
            realm: tenant_id.to_string(),
        }
    }

    /// `{home_account_id}-{environment}-accesstoken-{client_id}-{realm}-{scope}`
    pub fn access_token_key(&self, scope: &str) -> String {
        format!(
            "{}-{}-accesstoken-{}-{}-{}",
            self.home_account_id, self.environment, self.client_id, self.realm, scope
        )
    }

    /// `{home_account_id}-{environment}-{realm}`
    pub fn account_key(&self) -> String {
        format!(
            "{}-{}-{}",
            self.home_account_id, self.environment, self.realm
        )
    }

    /// `appmetadata-{environment}-{client_id}`, lowercased
    pub fn app_metadata_key(&self) -> String {
        format!(
            "appmetadata-{}-{}",
            self.environment.to_lowercase(),
            self.client_id.to_lowercase()
        )
    }

    pub fn access_token_entry(
        &self,
        scope: &str,
        token: &AcquiredToken,
        cached_at: i64,
    ) -> AccessTokenEntry {
        let expires_on = token.expires_at.timestamp().to_string();
        AccessTokenEntry {
            credential_type: "AccessToken".to_string(),
            secret: token.access_token.clone(),
            home_account_id: self.home_account_id.clone(),
            environment: self.environment.clone(),
            client_id: self.client_id.clone(),
            target: scope.to_string(),
            realm: self.realm.clone(),
            token_type: BEARER.to_string(),
            cached_at: cached_at.to_string(),
            extended_expires_on: expires_on.clone(),
            expires_on,
            extra: BTreeMap::new(),
        }
    }
}

/// In-memory MSAL cache
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MsalCache {
    pub access_tokens: BTreeMap<String, AccessTokenEntry>,
    pub accounts: BTreeMap<String, AccountEntry>,
    pub app_metadata: BTreeMap<String, AppMetadataEntry>,
    other_sections: Map<String, Value>,
}

impl MsalCache {
    /// Parse cache bytes, falling back to an empty cache on corrupt input
    pub fn parse(bytes: &[u8]) -> Self {
        let mut root = match serde_json::from_slice::<Value>(bytes) {
            Ok(Value::Object(map)) => map,
            Ok(_) => {
                debug!("MSAL cache root is not an object, starting from empty cache");
                return Self::default();
            }
            Err(e) => {
                debug!("Failed to parse MSAL cache, starting from empty cache: {}", e);
                return Self::default();
            }
        };

        let access_tokens = take_section(&mut root, ACCESS_TOKEN_SECTION);
        let accounts = take_section(&mut root, ACCOUNT_SECTION);
        let app_metadata = take_section(&mut root, APP_METADATA_SECTION);

        Self {
            access_tokens,
            accounts,
            app_metadata,
            other_sections: root,
        }
    }

    /// Serialize with all three managed sections present
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        let mut root = self.other_sections.clone();
        root.insert(
            ACCESS_TOKEN_SECTION.to_string(),
            serde_json::to_value(&self.access_tokens)?,
        );
        root.insert(
            ACCOUNT_SECTION.to_string(),
            serde_json::to_value(&self.accounts)?,
        );
        root.insert(
            APP_METADATA_SECTION.to_string(),
            serde_json::to_value(&self.app_metadata)?,
        );
        serde_json::to_vec_pretty(&Value::Object(root))
    }

    /// Upsert the records for one login, returning the primary token key
    pub fn apply(
        &mut self,
        identity: &CacheIdentity,
        ids: &MsalIdentifiers,
        tokens: &[(&str, &AcquiredToken)],
        cached_at: i64,
    ) -> Option<String> {
        match identity {
            CacheIdentity::User {
                object_id,
                username,
            } => {
                self.accounts.insert(
                    ids.account_key(),
                    AccountEntry {
                        home_account_id: ids.home_account_id.clone(),
                        environment: ids.environment.clone(),
                        realm: ids.realm.clone(),
                        local_account_id: object_id.clone(),
                        username: username.clone(),
                        authority_type: "MSSTS".to_string(),
                        account_source: "device_code".to_string(),
                        extra: BTreeMap::new(),
                    },
                );
            }
            CacheIdentity::ServicePrincipal => {
                self.app_metadata.insert(
                    ids.app_metadata_key(),
                    AppMetadataEntry {
                        client_id: ids.client_id.clone(),
                        environment: ids.environment.clone(),
                        family_id: String::new(),
                        extra: BTreeMap::new(),
                    },
                );
            }
        }

        let mut primary_key = None;
        for (scope, token) in tokens {
            let key = ids.access_token_key(scope);
            self.access_tokens
                .insert(key.clone(), ids.access_token_entry(scope, token, cached_at));
            primary_key.get_or_insert(key);
        }
        primary_key
    }
}

/// Remove a section from the root and decode its entries
///
/// A section that is not an object is replaced with an empty one; entries
/// that are not objects are dropped individually.
fn take_section<T: DeserializeOwned>(root: &mut Map<String, Value>, name: &str) -> BTreeMap<String, T> {
    let entries = match root.remove(name) {
        Some(Value::Object(entries)) => entries,
        Some(_) => {
            debug!("MSAL cache section {} has the wrong type, recreating", name);
            return BTreeMap::new();
        }
        None => return BTreeMap::new(),
    };

    entries
        .into_iter()
        .filter_map(|(key, value)| match serde_json::from_value::<T>(value) {
            Ok(entry) => Some((key, entry)),
            Err(e) => {
                debug!("Dropping malformed {} entry {}: {}", name, key, e);
                None
            }
        })
        .collect()
}
