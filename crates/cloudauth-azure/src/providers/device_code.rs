//! Interactive device code provider
//!
//! Login order: local token cache, then a silent refresh from the session
//! store, then the device authorization flow. Every successful path mirrors
//! the result into the Azure CLI files.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::session::{SessionAccount, SessionStore};
use super::{check_kind, identity_environment, KIND_DEVICE_CODE};
use crate::config::{DeviceCodeSpec, ProviderConfig};
use crate::environment::{AuthMode, EnvironmentParams};
use crate::error::{AuthError, AuthResult};
use crate::http::{PollOutcome, TokenClient, TokenGrant};
use crate::msal::ExternalCacheSync;
use crate::progress::{
    is_interactive, DevicePrompt, ProgressSink, TerminalProgress, TICK_INTERVAL,
};
use crate::scopes::{acquire_optional, RefreshTokenAcquirer, OPTIONAL_SCOPES};
use crate::token_cache::TokenCache;
use crate::types::{CachedToken, Credentials, Scope, AZURE_CLI_CLIENT_ID, MANAGEMENT_SCOPE};

/// Longest the user gets to complete the device code prompt
pub const DEVICE_CODE_TIMEOUT: Duration = Duration::from_secs(15 * 60);

const OFFLINE_ACCESS: &str = "offline_access";

/// Added to the polling interval on `slow_down`
const SLOW_DOWN_STEP_SECS: u64 = 5;

pub struct DeviceCodeProvider {
    name: String,
    tenant_id: String,
    client_id: String,
    subscription_id: String,
    location: String,
    client: TokenClient,
    token_cache: Option<TokenCache>,
    sessions: Option<SessionStore>,
    cache_sync: Option<ExternalCacheSync>,
    progress: Arc<dyn ProgressSink>,
    interactive: fn() -> bool,
    timeout: Duration,
}

impl DeviceCodeProvider {
    pub fn from_config(name: &str, config: &ProviderConfig) -> AuthResult<Self> {
        check_kind(KIND_DEVICE_CODE, config)?;
        Self::new(name, config.parse_spec()?)
    }

    /// Provider using the per-user caches and the home Azure CLI directory
    pub fn new(name: &str, spec: DeviceCodeSpec) -> AuthResult<Self> {
        if spec.tenant_id.is_empty() {
            return Err(AuthError::Config(
                "tenant_id is required for the Azure device code provider".to_string(),
            ));
        }
        let client_id = if spec.client_id.is_empty() {
            AZURE_CLI_CLIENT_ID.to_string()
        } else {
            spec.client_id
        };

        let token_cache = TokenCache::from_default_location()
            .map_err(|e| debug!("Device code token cache disabled: {}", e))
            .ok();
        let sessions = SessionStore::from_default_location()
            .map_err(|e| debug!("Device code session store disabled: {}", e))
            .ok();
        let cache_sync = ExternalCacheSync::from_home()
            .map_err(|e| debug!("Azure CLI cache sync disabled: {}", e))
            .ok();

        Ok(Self {
            name: name.to_string(),
            tenant_id: spec.tenant_id,
            client_id,
            subscription_id: spec.subscription_id,
            location: spec.location,
            client: TokenClient::new(spec.authority_host.as_deref())?,
            token_cache,
            sessions,
            cache_sync,
            progress: Arc::new(TerminalProgress::new()),
            interactive: is_interactive,
            timeout: DEVICE_CODE_TIMEOUT,
        })
    }

    pub fn with_token_cache(mut self, cache: TokenCache) -> Self {
        self.token_cache = Some(cache);
        self
    }

    pub fn with_session_store(mut self, sessions: SessionStore) -> Self {
        self.sessions = Some(sessions);
        self
    }

    pub fn with_cache_sync(mut self, sync: ExternalCacheSync) -> Self {
        self.cache_sync = Some(sync);
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    /// Replace the terminal check run before prompting the user
    pub fn with_interactive_check(mut self, check: fn() -> bool) -> Self {
        self.interactive = check;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub async fn authenticate(&self) -> AuthResult<Credentials> {
        self.authenticate_with_cancel(&CancellationToken::new()).await
    }

    /// Authenticate, aborting the device code wait once `cancel` fires
    ///
    /// Cancellation only ends this call; the provider stays usable.
    pub async fn authenticate_with_cancel(
        &self,
        cancel: &CancellationToken,
    ) -> AuthResult<Credentials> {
        if let Some(cached) = self.load_cached().await {
            debug!(
                "Using cached Azure device code token for {} (expires {})",
                self.name, cached.expires_at
            );
            let creds = self.credentials_from_cache(cached);
            self.sync(&creds).await;
            return Ok(creds);
        }

        if !(self.interactive)() {
            return Err(AuthError::NonInteractiveEnvironment);
        }

        let grant = match self.silent_refresh().await {
            Some(grant) => grant,
            None => {
                debug!(
                    "Starting Azure device code authentication for {} (tenant {})",
                    self.name, self.tenant_id
                );
                self.device_flow(cancel).await?
            }
        };

        let creds = self.complete_login(grant).await;
        info!("Authenticated Azure provider {}", self.name);
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

    /// Drop the cached token and the stored session
    pub async fn logout(&self) -> AuthResult<()> {
        debug!("Logging out Azure device code provider {}", self.name);
        if let Some(cache) = &self.token_cache {
            cache.delete(&self.name).await?;
        }
        if let Some(sessions) = &self.sessions {
            sessions.clear(&self.name).await?;
        }
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

    async fn load_cached(&self) -> Option<CachedToken> {
        self.token_cache.as_ref()?.load(&self.name, &self.tenant_id).await
    }

    fn base_credentials(&self) -> Credentials {
        Credentials {
            tenant_id: self.tenant_id.clone(),
            subscription_id: self.subscription_id.clone(),
            location: self.location.clone(),
            ..Default::default()
        }
    }

    fn credentials_from_cache(&self, cached: CachedToken) -> Credentials {
        Credentials {
            access_token: cached.access_token,
            token_type: cached.token_type,
            expiration: Some(cached.expires_at),
            graph_api_expiration: cached.graph_api_token.as_ref().and(cached.graph_api_expires_at),
            graph_api_token: cached.graph_api_token,
            ..self.base_credentials()
        }
    }

    async fn sync(&self, creds: &Credentials) {
        match &self.cache_sync {
            Some(sync) => sync.sync_credentials(creds).await,
            None => debug!("Skipping Azure CLI cache sync for {}", self.name),
        }
    }

    fn login_scopes() -> String {
        format!("{MANAGEMENT_SCOPE} {OFFLINE_ACCESS}")
    }

    /// Redeem the stored refresh token for this tenant, if there is one
    async fn silent_refresh(&self) -> Option<TokenGrant> {
        let account = self
            .sessions
            .as_ref()?
            .account_for(&self.name, &self.tenant_id)
            .await?;

        match self
            .client
            .refresh_token(
                &self.tenant_id,
                &self.client_id,
                &account.refresh_token,
                &Self::login_scopes(),
            )
            .await
        {
            Ok(mut grant) => {
                debug!("Silently refreshed session for {}", account.username);
                grant.refresh_token.get_or_insert(account.refresh_token);
                Some(grant)
            }
            Err(e) => {
                debug!("Silent refresh failed, falling back to device code: {}", e);
                None
            }
        }
    }

    /// Run the device authorization flow to completion
    ///
    /// Polling runs on its own task and reports through a oneshot channel
    /// while this task drives the progress sink.
    async fn device_flow(&self, cancel: &CancellationToken) -> AuthResult<TokenGrant> {
        let device = self
            .client
            .start_device_code(&self.tenant_id, &self.client_id, &Self::login_scopes())
            .await?;

        self.progress.prompt(&DevicePrompt {
            user_code: device.user_code.clone(),
            verification_uri: device.verification_uri.clone(),
            message: device.message.clone(),
        });

        let cancel = cancel.child_token();
        let _stop_polling = cancel.clone().drop_guard();
        let (tx, mut rx) = oneshot::channel();

        let client = self.client.clone();
        let tenant_id = self.tenant_id.clone();
        let client_id = self.client_id.clone();
        let timeout = self.timeout;
        tokio::spawn(async move {
            let poll = poll_until_complete(
                &client,
                &tenant_id,
                &client_id,
                &device.device_code,
                device.interval,
            );
            let outcome = tokio::select! {
                _ = cancel.cancelled() => Err(AuthError::Cancelled),
                result = tokio::time::timeout(timeout, poll) => result
                    .unwrap_or(Err(AuthError::DeviceCodeTimeout(timeout.as_secs()))),
            };
            // receiver is gone if the caller stopped waiting
            let _ = tx.send(outcome);
        });

        self.progress.start("Waiting for authentication...");
        let mut ticker = tokio::time::interval(TICK_INTERVAL);
        let outcome = loop {
            tokio::select! {
                received = &mut rx => {
                    break received.unwrap_or_else(|_| {
                        Err(AuthError::DeviceFlow("polling task ended without a result".to_string()))
                    });
                }
                _ = ticker.tick() => self.progress.tick(),
            }
        };
        self.progress.finish(outcome.is_ok());
        outcome
    }

    /// Fill in optional scopes, then persist and mirror the login
    async fn complete_login(&self, grant: TokenGrant) -> Credentials {
        let mut creds = self.base_credentials();
        creds.set_token(Scope::Management, grant.token);

        let creds = match grant.refresh_token {
            Some(refresh_token) => {
                if let Some(sessions) = &self.sessions {
                    let account = SessionAccount::from_token(
                        &creds.access_token,
                        &self.tenant_id,
                        refresh_token.clone(),
                    );
                    sessions.save_account(&self.name, account).await;
                }
                let acquirer = Arc::new(RefreshTokenAcquirer {
                    client: self.client.clone(),
                    tenant_id: self.tenant_id.clone(),
                    client_id: self.client_id.clone(),
                    refresh_token,
                });
                acquire_optional(acquirer, creds, &OPTIONAL_SCOPES).await
            }
            None => {
                debug!("No refresh token issued; skipping Graph and KeyVault tokens");
                creds
            }
        };

        if let (Some(cache), Some(token)) =
            (&self.token_cache, CachedToken::from_credentials(&creds))
        {
            cache.save(&self.name, &token).await;
        }
        self.sync(&creds).await;
        creds
    }
}

async fn poll_until_complete(
    client: &TokenClient,
    tenant_id: &str,
    client_id: &str,
    device_code: &str,
    interval_secs: u64,
) -> AuthResult<TokenGrant> {
    let mut interval = interval_secs;
    loop {
        tokio::time::sleep(Duration::from_secs(interval)).await;
        match client.poll_device_code(tenant_id, client_id, device_code).await? {
            PollOutcome::Pending => {}
            PollOutcome::SlowDown => {
                interval = slowed_down(interval);
                debug!("Device code polling slowed down to every {}s", interval);
            }
            PollOutcome::Complete(grant) => return Ok(grant),
        }
    }
}

fn slowed_down(interval_secs: u64) -> u64 {
    interval_secs.saturating_add(SLOW_DOWN_STEP_SECS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claims::tests::make_token;
    use crate::progress::NoopProgress;
    use crate::token_cache::MemoryCacheStorage;
    use chrono::{SubsecRound, Utc};
    use serde_json::json;
    use tempfile::TempDir;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct Harness {
        server: MockServer,
        azure_dir: TempDir,
        cache: TokenCache,
        sessions: SessionStore,
    }

    impl Harness {
        async fn new() -> Self {
            Self {
                server: MockServer::start().await,
                azure_dir: TempDir::new().unwrap(),
                cache: TokenCache::new(Arc::new(MemoryCacheStorage::new())),
                sessions: SessionStore::new(Arc::new(MemoryCacheStorage::new())),
            }
        }

        fn provider(&self, interactive: fn() -> bool) -> DeviceCodeProvider {
            let spec = DeviceCodeSpec {
                tenant_id: "tenant".into(),
                subscription_id: "sub".into(),
                authority_host: Some(self.server.uri()),
                ..Default::default()
            };
            DeviceCodeProvider::new("dev", spec)
                .unwrap()
                .with_token_cache(self.cache.clone())
                .with_session_store(self.sessions.clone())
                .with_cache_sync(ExternalCacheSync::new(self.azure_dir.path()))
                .with_progress(Arc::new(NoopProgress))
                .with_interactive_check(interactive)
        }
    }

    fn user_token() -> String {
        make_token(json!({"oid": "user-oid", "upn": "dev@contoso.com", "tid": "tenant"}))
    }

    async fn mount_device_code(server: &MockServer, interval: u64) {
        Mock::given(method("POST"))
            .and(path("/tenant/oauth2/v2.0/devicecode"))
            .and(body_string_contains("offline_access"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "device_code": "dc-1",
                "user_code": "ABCD-EFGH",
                "verification_uri": "https://microsoft.com/devicelogin",
                "expires_in": 900,
                "interval": interval,
                "message": "To sign in, use a web browser"
            })))
            .mount(server)
            .await;
    }

    #[test]
    fn test_requires_tenant() {
        let err = DeviceCodeProvider::new("dev", DeviceCodeSpec::default())
            .err()
            .unwrap();
        assert!(matches!(err, AuthError::Config(_)));
    }

    #[test]
    fn test_defaults_to_azure_cli_client() {
        let spec = DeviceCodeSpec {
            tenant_id: "t".into(),
            ..Default::default()
        };
        let provider = DeviceCodeProvider::new("dev", spec).unwrap();
        assert_eq!(provider.client_id(), AZURE_CLI_CLIENT_ID);
        provider.validate().unwrap();
        assert!(!provider.environment().contains_key("AZURE_CLIENT_ID"));
    }

    #[tokio::test]
    async fn test_cache_hit_skips_network_and_syncs() {
        let harness = Harness::new().await;
        let expires = (Utc::now() + chrono::Duration::hours(1)).trunc_subsecs(0);
        harness
            .cache
            .save(
                "dev",
                &CachedToken {
                    access_token: user_token(),
                    token_type: "Bearer".into(),
                    expires_at: expires,
                    tenant_id: "tenant".into(),
                    subscription_id: String::new(),
                    location: String::new(),
                    graph_api_token: None,
                    graph_api_expires_at: None,
                },
            )
            .await;

        let creds = harness.provider(|| false).authenticate().await.unwrap();

        assert_eq!(creds.access_token, user_token());
        assert_eq!(creds.expiration, Some(expires));
        assert_eq!(creds.subscription_id, "sub");
        assert!(harness.server.received_requests().await.unwrap().is_empty());
        assert!(harness.azure_dir.path().join("msal_token_cache.json").exists());
        assert!(harness.azure_dir.path().join("azureProfile.json").exists());
    }

    #[tokio::test]
    async fn test_cache_miss_without_terminal_fails() {
        let harness = Harness::new().await;
        let err = harness.provider(|| false).authenticate().await.unwrap_err();
        assert!(matches!(err, AuthError::NonInteractiveEnvironment));
    }

    #[tokio::test]
    async fn test_device_flow_success() {
        let harness = Harness::new().await;
        mount_device_code(&harness.server, 0).await;
        Mock::given(method("POST"))
            .and(path("/tenant/oauth2/v2.0/token"))
            .and(body_string_contains("device_code=dc-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": user_token(),
                "token_type": "Bearer",
                "expires_in": 3600,
                "refresh_token": "rt-1"
            })))
            .mount(&harness.server)
            .await;
        Mock::given(method("POST"))
            .and(path("/tenant/oauth2/v2.0/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("graph.microsoft.com"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "graph-token",
                "expires_in": 3600
            })))
            .mount(&harness.server)
            .await;
        Mock::given(method("POST"))
            .and(path("/tenant/oauth2/v2.0/token"))
            .and(body_string_contains("vault.azure.net"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": "invalid_grant"
            })))
            .mount(&harness.server)
            .await;

        let creds = harness.provider(|| true).authenticate().await.unwrap();

        assert_eq!(creds.access_token, user_token());
        assert_eq!(creds.graph_api_token.as_deref(), Some("graph-token"));
        assert!(creds.key_vault_token.is_none());

        let cached = harness.cache.load("dev", "tenant").await.unwrap();
        assert_eq!(cached.graph_api_token.as_deref(), Some("graph-token"));
        let account = harness.sessions.account_for("dev", "tenant").await.unwrap();
        assert_eq!(account.refresh_token, "rt-1");
        assert_eq!(account.home_account_id, "user-oid.tenant");
        assert!(harness.azure_dir.path().join("msal_token_cache.json").exists());
    }

    #[tokio::test]
    async fn test_silent_refresh_skips_device_code() {
        let harness = Harness::new().await;
        harness
            .sessions
            .save_account(
                "dev",
                SessionAccount {
                    home_account_id: "user-oid.tenant".into(),
                    realm: "tenant".into(),
                    username: "dev@contoso.com".into(),
                    refresh_token: "stored-rt".into(),
                },
            )
            .await;
        Mock::given(method("POST"))
            .and(path("/tenant/oauth2/v2.0/token"))
            .and(body_string_contains("refresh_token=stored-rt"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": user_token(),
                "expires_in": 3600
            })))
            .mount(&harness.server)
            .await;

        let creds = harness.provider(|| true).authenticate().await.unwrap();
        assert_eq!(creds.access_token, user_token());

        let requests = harness.server.received_requests().await.unwrap();
        assert!(requests.iter().all(|r| !r.url.path().ends_with("/devicecode")));
    }

    #[tokio::test]
    async fn test_device_flow_timeout() {
        let harness = Harness::new().await;
        mount_device_code(&harness.server, 1).await;
        Mock::given(method("POST"))
            .and(path("/tenant/oauth2/v2.0/token"))
            .respond_with(
                ResponseTemplate::new(400).set_body_json(json!({"error": "authorization_pending"})),
            )
            .mount(&harness.server)
            .await;

        let err = harness
            .provider(|| true)
            .with_timeout(Duration::from_millis(200))
            .authenticate()
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::DeviceCodeTimeout(_)));
        assert!(harness.cache.load("dev", "tenant").await.is_none());
    }

    #[tokio::test]
    async fn test_device_flow_cancelled() {
        let harness = Harness::new().await;
        mount_device_code(&harness.server, 1).await;

        let provider = harness.provider(|| true);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let err = provider.authenticate_with_cancel(&cancel).await.unwrap_err();
        assert!(matches!(err, AuthError::Cancelled));
    }

    #[tokio::test]
    async fn test_login_after_cancelled_login() {
        let harness = Harness::new().await;
        mount_device_code(&harness.server, 1).await;
        let provider = harness.provider(|| true);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = provider.authenticate_with_cancel(&cancel).await.unwrap_err();
        assert!(matches!(err, AuthError::Cancelled));

        Mock::given(method("POST"))
            .and(path("/tenant/oauth2/v2.0/token"))
            .and(body_string_contains("device_code=dc-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": user_token(),
                "expires_in": 3600
            })))
            .mount(&harness.server)
            .await;

        let creds = provider.authenticate().await.unwrap();
        assert_eq!(creds.access_token, user_token());
    }

    #[test]
    fn test_slow_down_saturates() {
        assert_eq!(slowed_down(5), 10);
        assert_eq!(slowed_down(u64::MAX - 1), u64::MAX);
    }

    #[tokio::test]
    async fn test_logout_clears_cache_and_session() {
        let harness = Harness::new().await;
        harness
            .sessions
            .save_account(
                "dev",
                SessionAccount {
                    realm: "tenant".into(),
                    refresh_token: "rt".into(),
                    ..Default::default()
                },
            )
            .await;

        let provider = harness.provider(|| true);
        provider.logout().await.unwrap();
        provider.logout().await.unwrap();
        assert!(harness.sessions.account_for("dev", "tenant").await.is_none());
    }
}
