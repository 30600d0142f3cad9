//! Error types for Azure credential acquisition and cache synchronization
//!
//! Provider failures surface as [`AuthError`]. The cache and sync layers have
//! their own error types because callers degrade them to log diagnostics
//! instead of failing authentication.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for authentication operations
pub type AuthResult<T> = Result<T, AuthError>;

/// Errors returned by credential providers
#[derive(Debug, Error)]
pub enum AuthError {
    /// Invalid or incomplete provider configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Provider constructed from a config of another kind
    #[error("Invalid provider kind: expected {expected}, got {actual}")]
    InvalidKind {
        expected: &'static str,
        actual: String,
    },

    /// Device code flow attempted without a terminal
    #[error(
        "Azure device code flow requires an interactive terminal (no TTY detected). \
         Use OIDC or service principal authentication in headless environments"
    )]
    NonInteractiveEnvironment,

    /// Device code flow rejected by the authority
    #[error("Device code flow failed: {0}")]
    DeviceFlow(String),

    /// User did not complete the device code flow in time
    #[error("Device code authentication timed out after {0} seconds")]
    DeviceCodeTimeout(u64),

    /// Caller cancelled an in-flight authentication
    #[error("Authentication cancelled")]
    Cancelled,

    /// Token endpoint rejected the exchange
    #[error("Token exchange failed: {0}")]
    TokenExchange(String),

    /// Token endpoint answered 200 without a token
    #[error("Token exchange failed: response did not contain an access token")]
    EmptyToken,

    /// No federated token source could be resolved for OIDC
    #[error("Federated token unavailable: {0}")]
    FederatedTokenUnavailable(String),

    /// Transport level failure talking to the authority
    #[error("Network error: {0}")]
    Network(String),

    /// Required claim could not be decoded
    #[error(transparent)]
    Claims(#[from] ClaimsError),

    /// Clearing a provider's local caches failed
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the unverified JWT claims decoder
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClaimsError {
    #[error("Malformed token: expected 3 segments, found {0}")]
    MalformedToken(usize),

    #[error("Failed to decode token claims: {0}")]
    DecodeError(String),

    #[error("Claim not found: {0}")]
    ClaimNotFound(String),
}

/// Cache storage errors
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Cache directory unavailable: {0}")]
    Unavailable(String),
}

/// Errors raised while mirroring credentials into the Azure CLI files
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Failed to acquire lock on {path}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize {0}: {1}")]
    Serialization(&'static str, serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Home directory unavailable")]
    HomeDirUnavailable,

    #[error(transparent)]
    Claims(#[from] ClaimsError),
}

/// Errors from the per-provider credentials file manager
#[derive(Debug, Error)]
pub enum CredentialsFileError {
    #[error("Home directory unavailable")]
    HomeDirUnavailable,

    #[error("Credentials not found at {0}")]
    NotFound(PathBuf),

    #[error("Invalid provider name {0:?}")]
    InvalidProvider(String),

    #[error("Failed to load credentials file {path}: {reason}")]
    Load { path: PathBuf, reason: String },

    #[error("Failed to write credentials file {path}: {reason}")]
    Write { path: PathBuf, reason: String },

    #[error("Failed to remove credentials directory {path}: {source}")]
    Cleanup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AuthError::Network(format!("request timed out: {}", err))
        } else {
            AuthError::Network(err.to_string())
        }
    }
}
