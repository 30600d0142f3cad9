//! Environment for tools spawned with Azure credentials
//!
//! [`prepare_environment`] is pure: it takes the caller's environment map
//! and returns a replacement, never touching the process environment.

use std::collections::HashMap;
use tracing::debug;

/// Credential variables removed before the selected mode is applied
pub const CLEARED_VARS: &[&str] = &[
    "AZURE_CLIENT_ID",
    "AZURE_CLIENT_SECRET",
    "AZURE_CLIENT_CERTIFICATE_PATH",
    "AZURE_CLIENT_CERTIFICATE_PASSWORD",
    "AZURE_FEDERATED_TOKEN_FILE",
    "AZURE_USERNAME",
    "AZURE_PASSWORD",
    "ARM_CLIENT_ID",
    "ARM_CLIENT_SECRET",
    "ARM_CLIENT_CERTIFICATE_PATH",
    "ARM_CLIENT_CERTIFICATE_PASSWORD",
    "ARM_USE_CLI",
    "ARM_USE_OIDC",
    "ARM_USE_MSI",
    "ARM_OIDC_TOKEN",
    "ARM_OIDC_TOKEN_FILE_PATH",
    "AWS_ACCESS_KEY_ID",
    "AWS_SECRET_ACCESS_KEY",
    "AWS_SESSION_TOKEN",
    "AWS_PROFILE",
    "GOOGLE_APPLICATION_CREDENTIALS",
];

const TRUE: &str = "true";
const FALSE: &str = "false";

/// How the spawned tool should authenticate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthMode {
    /// Reuse the Azure CLI session
    Cli,
    Oidc {
        client_id: String,
        token_file: String,
    },
    ServicePrincipal {
        client_id: String,
        client_secret: String,
        certificate_path: String,
        certificate_password: String,
    },
}

/// Identity context and secrets handed to [`prepare_environment`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentParams {
    pub subscription_id: String,
    pub tenant_id: String,
    pub location: String,
    pub mode: AuthMode,
}

/// Build the environment for a spawned tool from `input`
pub fn prepare_environment(
    input: &HashMap<String, String>,
    params: EnvironmentParams,
) -> HashMap<String, String> {
    let mut env: HashMap<String, String> = input
        .iter()
        .filter(|(key, _)| !CLEARED_VARS.contains(&key.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    let mut set = |key: &str, value: &str| {
        if !value.is_empty() {
            env.insert(key.to_string(), value.to_string());
        }
    };

    set("AZURE_SUBSCRIPTION_ID", &params.subscription_id);
    set("ARM_SUBSCRIPTION_ID", &params.subscription_id);
    set("AZURE_TENANT_ID", &params.tenant_id);
    set("ARM_TENANT_ID", &params.tenant_id);
    set("AZURE_LOCATION", &params.location);
    set("ARM_LOCATION", &params.location);

    match &params.mode {
        AuthMode::Cli => {
            set("ARM_USE_CLI", TRUE);
        }
        AuthMode::Oidc {
            client_id,
            token_file,
        } => {
            set("ARM_USE_OIDC", TRUE);
            set("ARM_CLIENT_ID", client_id);
            set("AZURE_CLIENT_ID", client_id);
            set("AZURE_FEDERATED_TOKEN_FILE", token_file);
            set("ARM_OIDC_TOKEN_FILE_PATH", token_file);
        }
        AuthMode::ServicePrincipal {
            client_id,
            client_secret,
            certificate_path,
            certificate_password,
        } => {
            set("ARM_USE_CLI", FALSE);
            set("ARM_USE_OIDC", FALSE);
            set("ARM_CLIENT_ID", client_id);
            set("ARM_CLIENT_SECRET", client_secret);
            if !certificate_path.is_empty() {
                set("ARM_CLIENT_CERTIFICATE_PATH", certificate_path);
                set("AZURE_CLIENT_CERTIFICATE_PATH", certificate_path);
                set("ARM_CLIENT_CERTIFICATE_PASSWORD", certificate_password);
                set("AZURE_CLIENT_CERTIFICATE_PASSWORD", certificate_password);
            }
        }
    }

    debug!(
        "Prepared Azure environment (subscription {}, tenant {}, {} variables)",
        params.subscription_id,
        params.tenant_id,
        env.len()
    );
    env
}
