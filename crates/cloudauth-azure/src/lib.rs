//! Azure credential acquisition for infrastructure tooling
//!
//! This crate provides:
//! - Four credential providers: interactive device code, OIDC workload
//!   identity federation, service principal and Azure CLI pass-through
//! - A per-provider local token cache for device code logins
//! - Synchronization into the Azure CLI token cache and active profile, so
//!   tools that read the Azure CLI session see the same login
//! - Environment preparation for spawned tools such as Terraform
//!
//! # Usage
//!
//! ```rust,no_run
//! use cloudauth_azure::{Provider, ProvidersConfig};
//!
//! # async fn example() -> cloudauth_azure::AuthResult<()> {
//! let config = ProvidersConfig::load(None)?;
//! let provider = Provider::from_config("dev", config.provider("dev")?)?;
//! let creds = provider.authenticate().await?;
//! println!("token expires at {:?}", creds.expiration);
//! # Ok(())
//! # }
//! ```

pub mod claims;
pub mod config;
pub mod credentials;
pub mod environment;
pub mod error;
mod fs_util;
pub mod http;
pub mod msal;
pub mod progress;
pub mod providers;
pub mod scopes;
pub mod token_cache;
pub mod types;

// Re-export commonly used types
pub use config::{ProviderConfig, ProvidersConfig};
pub use credentials::CredentialsFileManager;
pub use environment::{prepare_environment, AuthMode, EnvironmentParams};
pub use error::{AuthError, AuthResult, CacheError, ClaimsError, CredentialsFileError, SyncError};
pub use msal::ExternalCacheSync;
pub use progress::{NoopProgress, ProgressSink, TerminalProgress};
pub use providers::Provider;
pub use token_cache::TokenCache;
pub use types::{CachedToken, Credentials, Scope};
