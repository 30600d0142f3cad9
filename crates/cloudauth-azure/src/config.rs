//! Provider configuration
//!
//! Layered with figment: built-in defaults, then a TOML file, then
//! `CLOUDAUTH_`-prefixed environment variables using `__` as the nesting
//! separator, e.g. `CLOUDAUTH_PROVIDERS__DEV__SPEC__TENANT_ID`.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{AuthError, AuthResult};

/// Config file read when no path is given
pub const DEFAULT_CONFIG_FILE: &str = "cloudauth.toml";

pub const ENV_PREFIX: &str = "CLOUDAUTH_";

/// All configured providers, keyed by provider name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderConfig>,
}

/// One provider entry: its kind plus a kind-specific spec table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub kind: String,
    #[serde(default)]
    pub spec: Value,
}

impl ProvidersConfig {
    /// Load from `path`, or from `cloudauth.toml` in the working directory
    pub fn load(path: Option<&Path>) -> AuthResult<Self> {
        let file = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
        let figment = Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(file))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));

        figment
            .extract()
            .map_err(|e| AuthError::Config(format!("Failed to load provider config: {e}")))
    }

    pub fn provider(&self, name: &str) -> AuthResult<&ProviderConfig> {
        self.providers
            .get(name)
            .ok_or_else(|| AuthError::Config(format!("Provider '{name}' is not configured")))
    }
}

impl ProviderConfig {
    pub fn new(kind: impl Into<String>, spec: Value) -> Self {
        Self {
            kind: kind.into(),
            spec,
        }
    }

    /// Deserialize the spec table into a typed spec
    ///
    /// Scalars are coerced to strings first; environment overrides such as
    /// a numeric subscription id arrive as numbers.
    pub fn parse_spec<T: DeserializeOwned>(&self) -> AuthResult<T> {
        let spec = match &self.spec {
            Value::Null => Value::Object(Map::new()),
            Value::Object(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), stringify_scalar(v)))
                    .collect(),
            ),
            other => {
                return Err(AuthError::Config(format!(
                    "Provider spec must be a table, got {other}"
                )))
            }
        };
        serde_json::from_value(spec)
            .map_err(|e| AuthError::Config(format!("Invalid provider spec: {e}")))
    }
}

fn stringify_scalar(value: &Value) -> Value {
    match value {
        Value::Number(n) => Value::String(n.to_string()),
        Value::Bool(b) => Value::String(b.to_string()),
        other => other.clone(),
    }
}

/// Spec for `azure/device-code`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceCodeSpec {
    pub tenant_id: String,
    /// Defaults to the Azure CLI public client when empty
    pub client_id: String,
    pub subscription_id: String,
    pub location: String,
    pub authority_host: Option<String>,
}

/// Spec for `azure/oidc`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OidcSpec {
    pub tenant_id: String,
    pub client_id: String,
    pub subscription_id: String,
    pub location: String,
    /// GitHub Actions token audience, `api://AzureADTokenExchange` when empty
    pub audience: String,
    pub token_file_path: String,
    pub authority_host: Option<String>,
}

/// Spec for `azure/service-principal`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServicePrincipalSpec {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
    pub client_certificate_path: String,
    pub client_certificate_password: String,
    pub subscription_id: String,
    pub location: String,
    pub authority_host: Option<String>,
}

/// Spec for `azure/cli`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliSpec {
    pub tenant_id: String,
    pub subscription_id: String,
    pub location: String,
    pub authority_host: Option<String>,
}
