//! Multi-scope token acquisition
//!
//! The primary scope is acquired first and its failure fails the whole
//! call. Optional scopes are then acquired concurrently on spawned tasks,
//! each writing its own fields of a shared [`Credentials`] behind a mutex.
//! An optional failure only leaves its token unset.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::error::AuthResult;
use crate::http::{ClientAuth, TokenClient};
use crate::types::{AcquiredToken, Credentials, Scope};

/// Optional scopes requested alongside the management scope
pub const OPTIONAL_SCOPES: [Scope; 2] = [Scope::Graph, Scope::KeyVault];

/// Source of tokens for a single scope
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TokenAcquirer: Send + Sync {
    async fn acquire(&self, scope: Scope) -> AuthResult<AcquiredToken>;
}

/// Acquire `primary` then every `optional` scope into `base`
pub async fn acquire_scopes(
    acquirer: Arc<dyn TokenAcquirer>,
    base: Credentials,
    primary: Scope,
    optional: &[Scope],
) -> AuthResult<Credentials> {
    let token = acquirer.acquire(primary).await?;
    debug!("Acquired primary token for {}", primary);

    let mut creds = base;
    creds.set_token(primary, token);
    Ok(acquire_optional(acquirer, creds, optional).await)
}

/// Best-effort acquisition of `optional` scopes into `creds`
///
/// All scopes are attempted concurrently and awaited before returning.
pub async fn acquire_optional(
    acquirer: Arc<dyn TokenAcquirer>,
    creds: Credentials,
    optional: &[Scope],
) -> Credentials {
    let shared = Arc::new(Mutex::new(creds));

    let mut tasks = JoinSet::new();
    for &scope in optional {
        let acquirer = Arc::clone(&acquirer);
        let shared = Arc::clone(&shared);
        tasks.spawn(async move {
            match acquirer.acquire(scope).await {
                Ok(token) => {
                    debug!("Acquired optional token for {}", scope);
                    shared.lock().await.set_token(scope, token);
                }
                Err(e) => {
                    debug!("Optional token for {} unavailable: {}", scope, e);
                }
            }
        });
    }

    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            warn!("Optional token task failed: {}", e);
        }
    }

    let creds = shared.lock().await.clone();
    creds
}

/// Client credentials grant per scope (secret or federated assertion)
pub struct ClientCredentialsAcquirer {
    pub client: TokenClient,
    pub tenant_id: String,
    pub client_id: String,
    pub auth: ClientAuth,
}

#[async_trait]
impl TokenAcquirer for ClientCredentialsAcquirer {
    async fn acquire(&self, scope: Scope) -> AuthResult<AcquiredToken> {
        self.client
            .client_credentials(&self.tenant_id, &self.client_id, &self.auth, scope.as_str())
            .await
    }
}

/// Redeems one refresh token for each requested scope
pub struct RefreshTokenAcquirer {
    pub client: TokenClient,
    pub tenant_id: String,
    pub client_id: String,
    pub refresh_token: String,
}

#[async_trait]
impl TokenAcquirer for RefreshTokenAcquirer {
    async fn acquire(&self, scope: Scope) -> AuthResult<AcquiredToken> {
        let grant = self
            .client
            .refresh_token(
                &self.tenant_id,
                &self.client_id,
                &self.refresh_token,
                scope.as_str(),
            )
            .await?;
        Ok(grant.token)
    }
}
