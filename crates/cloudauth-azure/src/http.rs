//! Microsoft identity platform (v2.0) token endpoint client
//!
//! Covers the grants used by the providers: client credentials with a
//! secret or a federated assertion, device authorization with polling,
//! and refresh-token redemption for silent reacquisition.

use serde::{Deserialize, Deserializer};
use std::time::Duration;
use tracing::debug;

use crate::error::{AuthError, AuthResult};
use crate::types::{AcquiredToken, DEFAULT_AUTHORITY_HOST};

/// Ceiling for every call to the token endpoint
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

pub const JWT_BEARER_ASSERTION_TYPE: &str =
    "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";

const DEVICE_CODE_GRANT: &str = "urn:ietf:params:oauth:grant-type:device_code";

/// How a confidential client proves its identity
#[derive(Debug, Clone)]
pub enum ClientAuth {
    Secret(String),
    /// Federated JWT presented as `client_assertion`
    Assertion(String),
}

/// Token endpoint response
#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: String,
    token_type: Option<String>,
    #[serde(default, deserialize_with = "lenient_u64")]
    expires_in: u64,
    #[allow(dead_code)]
    scope: Option<String>,
    refresh_token: Option<String>,
}

/// OAuth error body
#[derive(Debug, Default, Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    error: String,
    #[serde(default)]
    error_description: String,
}

/// Device authorization response
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceCodeResponse {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    #[serde(deserialize_with = "lenient_u64")]
    pub expires_in: u64,
    #[serde(default = "default_interval", deserialize_with = "lenient_u64")]
    pub interval: u64,
    #[serde(default)]
    pub message: String,
}

fn default_interval() -> u64 {
    5
}

/// Token plus the refresh token that came with it, if any
#[derive(Debug, Clone)]
pub struct TokenGrant {
    pub token: AcquiredToken,
    pub refresh_token: Option<String>,
}

/// One device code polling step
#[derive(Debug)]
pub enum PollOutcome {
    Pending,
    SlowDown,
    Complete(TokenGrant),
}

/// HTTP client bound to one authority host
#[derive(Debug, Clone)]
pub struct TokenClient {
    client: reqwest::Client,
    authority_host: String,
}

impl TokenClient {
    /// Client with the default 30 second timeout
    pub fn new(authority_host: Option<&str>) -> AuthResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| AuthError::Network(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self::with_client(client, authority_host))
    }

    /// Use a caller-supplied HTTP client
    pub fn with_client(client: reqwest::Client, authority_host: Option<&str>) -> Self {
        let authority_host = authority_host
            .filter(|h| !h.is_empty())
            .unwrap_or(DEFAULT_AUTHORITY_HOST)
            .trim_end_matches('/')
            .to_string();
        Self {
            client,
            authority_host,
        }
    }

    pub fn authority_host(&self) -> &str {
        &self.authority_host
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.client
    }

    pub fn token_endpoint(&self, tenant_id: &str) -> String {
        format!("{}/{}/oauth2/v2.0/token", self.authority_host, tenant_id)
    }

    pub fn device_code_endpoint(&self, tenant_id: &str) -> String {
        format!("{}/{}/oauth2/v2.0/devicecode", self.authority_host, tenant_id)
    }

    /// Client credentials grant for a single scope
    pub async fn client_credentials(
        &self,
        tenant_id: &str,
        client_id: &str,
        auth: &ClientAuth,
        scope: &str,
    ) -> AuthResult<AcquiredToken> {
        let mut form = vec![
            ("grant_type", "client_credentials"),
            ("client_id", client_id),
            ("scope", scope),
        ];
        match auth {
            ClientAuth::Secret(secret) => form.push(("client_secret", secret.as_str())),
            ClientAuth::Assertion(assertion) => {
                form.push(("client_assertion_type", JWT_BEARER_ASSERTION_TYPE));
                form.push(("client_assertion", assertion.as_str()));
            }
        }

        debug!("Requesting client credentials token for scope {}", scope);
        let grant = self.request_token(tenant_id, &form).await?;
        Ok(grant.token)
    }

    /// Redeem a refresh token for a new access token
    pub async fn refresh_token(
        &self,
        tenant_id: &str,
        client_id: &str,
        refresh_token: &str,
        scope: &str,
    ) -> AuthResult<TokenGrant> {
        let form = [
            ("grant_type", "refresh_token"),
            ("client_id", client_id),
            ("refresh_token", refresh_token),
            ("scope", scope),
        ];
        debug!("Redeeming refresh token for scope {}", scope);
        self.request_token(tenant_id, &form).await
    }

    /// Start a device authorization for `scopes`
    pub async fn start_device_code(
        &self,
        tenant_id: &str,
        client_id: &str,
        scopes: &str,
    ) -> AuthResult<DeviceCodeResponse> {
        let response = self
            .client
            .post(self.device_code_endpoint(tenant_id))
            .form(&[("client_id", client_id), ("scope", scopes)])
            .send()
            .await
            .map_err(|e| AuthError::Network(format!("Failed to start device code flow: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::DeviceFlow(format!(
                "device authorization failed with status {}: {}",
                status,
                describe_error(&body)
            )));
        }

        response.json().await.map_err(|e| {
            AuthError::DeviceFlow(format!("Failed to parse device code response: {}", e))
        })
    }

    /// Poll once for the outcome of a device authorization
    pub async fn poll_device_code(
        &self,
        tenant_id: &str,
        client_id: &str,
        device_code: &str,
    ) -> AuthResult<PollOutcome> {
        let form = [
            ("grant_type", DEVICE_CODE_GRANT),
            ("client_id", client_id),
            ("device_code", device_code),
        ];
        let response = self
            .client
            .post(self.token_endpoint(tenant_id))
            .form(&form)
            .send()
            .await
            .map_err(|e| AuthError::Network(format!("Failed to poll device code: {}", e)))?;

        if response.status().is_success() {
            let grant = parse_grant(response).await?;
            return Ok(PollOutcome::Complete(grant));
        }

        let body = response.text().await.unwrap_or_default();
        let error: ErrorResponse = serde_json::from_str(&body).unwrap_or_default();
        match error.error.as_str() {
            "authorization_pending" => Ok(PollOutcome::Pending),
            "slow_down" => Ok(PollOutcome::SlowDown),
            "expired_token" | "code_expired" => Err(AuthError::DeviceFlow(
                "device code expired before authorization completed".to_string(),
            )),
            _ => Err(AuthError::DeviceFlow(describe_error(&body))),
        }
    }

    async fn request_token(&self, tenant_id: &str, form: &[(&str, &str)]) -> AuthResult<TokenGrant> {
        let response = self
            .client
            .post(self.token_endpoint(tenant_id))
            .form(form)
            .send()
            .await
            .map_err(|e| AuthError::Network(format!("Failed to request token: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::TokenExchange(format!(
                "token endpoint returned {}: {}",
                status,
                describe_error(&body)
            )));
        }

        parse_grant(response).await
    }
}

async fn parse_grant(response: reqwest::Response) -> AuthResult<TokenGrant> {
    let body: TokenResponse = response
        .json()
        .await
        .map_err(|e| AuthError::TokenExchange(format!("Failed to parse token response: {}", e)))?;

    if body.access_token.is_empty() {
        return Err(AuthError::EmptyToken);
    }

    Ok(TokenGrant {
        token: AcquiredToken::from_lifetime(body.access_token, body.token_type, body.expires_in)?,
        refresh_token: body.refresh_token.filter(|t| !t.is_empty()),
    })
}

fn describe_error(body: &str) -> String {
    match serde_json::from_str::<ErrorResponse>(body) {
        Ok(err) if !err.error.is_empty() => {
            if err.error_description.is_empty() {
                err.error
            } else {
                format!("{}: {}", err.error, err.error_description)
            }
        }
        _ if body.is_empty() => "empty response body".to_string(),
        _ => body.to_string(),
    }
}

/// Accept numbers or numeric strings; Azure has used both for lifetimes
fn lenient_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumOrString {
        Num(u64),
        Str(String),
    }

    match NumOrString::deserialize(deserializer)? {
        NumOrString::Num(n) => Ok(n),
        NumOrString::Str(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client(server: &MockServer) -> TokenClient {
        TokenClient::new(Some(&server.uri())).unwrap()
    }

    #[test]
    fn test_endpoints() {
        let client = TokenClient::new(None).unwrap();
        assert_eq!(
            client.token_endpoint("tenant"),
            "https://login.microsoftonline.com/tenant/oauth2/v2.0/token"
        );
        let client = TokenClient::new(Some("http://localhost:1234/")).unwrap();
        assert_eq!(
            client.device_code_endpoint("t"),
            "http://localhost:1234/t/oauth2/v2.0/devicecode"
        );
    }

    #[tokio::test]
    async fn test_client_credentials_with_assertion() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/tenant/oauth2/v2.0/token"))
            .and(body_string_contains("grant_type=client_credentials"))
            .and(body_string_contains("client_assertion=federated-jwt"))
            .and(body_string_contains(
                "client_assertion_type=urn%3Aietf%3Aparams%3Aoauth%3Aclient-assertion-type%3Ajwt-bearer",
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "mgmt-token",
                "token_type": "Bearer",
                "expires_in": 3599,
                "scope": "https://management.azure.com/.default"
            })))
            .mount(&server)
            .await;

        let token = client(&server)
            .await
            .client_credentials(
                "tenant",
                "client",
                &ClientAuth::Assertion("federated-jwt".into()),
                "https://management.azure.com/.default",
            )
            .await
            .unwrap();

        assert_eq!(token.access_token, "mgmt-token");
        assert_eq!(token.token_type, "Bearer");
        assert!(token.expires_at > chrono::Utc::now());
    }

    #[tokio::test]
    async fn test_non_success_status_is_exchange_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": "invalid_client",
                "error_description": "AADSTS7000215: Invalid client secret provided."
            })))
            .mount(&server)
            .await;

        let err = client(&server)
            .await
            .client_credentials("t", "c", &ClientAuth::Secret("bad".into()), "s")
            .await
            .unwrap_err();

        match err {
            AuthError::TokenExchange(msg) => assert!(msg.contains("invalid_client")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_token_in_success_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "",
                "token_type": "Bearer",
                "expires_in": "3600"
            })))
            .mount(&server)
            .await;

        let err = client(&server)
            .await
            .client_credentials("t", "c", &ClientAuth::Secret("s".into()), "s")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::EmptyToken));
    }

    #[tokio::test]
    async fn test_oversized_lifetime_is_exchange_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "tok",
                "expires_in": 10_000_000_000_000u64
            })))
            .mount(&server)
            .await;

        let err = client(&server)
            .await
            .client_credentials("t", "c", &ClientAuth::Secret("s".into()), "s")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::TokenExchange(_)));
    }

    #[tokio::test]
    async fn test_poll_outcomes() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("device_code=pending"))
            .respond_with(
                ResponseTemplate::new(400).set_body_json(json!({"error": "authorization_pending"})),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_string_contains("device_code=slow"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({"error": "slow_down"})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_string_contains("device_code=denied"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": "authorization_declined",
                "error_description": "user declined"
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_string_contains("device_code=done"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "user-token",
                "token_type": "Bearer",
                "expires_in": 3600,
                "refresh_token": "rt"
            })))
            .mount(&server)
            .await;

        let client = client(&server).await;
        assert!(matches!(
            client.poll_device_code("t", "c", "pending").await.unwrap(),
            PollOutcome::Pending
        ));
        assert!(matches!(
            client.poll_device_code("t", "c", "slow").await.unwrap(),
            PollOutcome::SlowDown
        ));
        assert!(matches!(
            client.poll_device_code("t", "c", "denied").await.unwrap_err(),
            AuthError::DeviceFlow(_)
        ));
        match client.poll_device_code("t", "c", "done").await.unwrap() {
            PollOutcome::Complete(grant) => {
                assert_eq!(grant.token.access_token, "user-token");
                assert_eq!(grant.refresh_token.as_deref(), Some("rt"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }
}
