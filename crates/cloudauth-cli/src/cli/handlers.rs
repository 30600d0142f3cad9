//! Command handlers

use cloudauth_azure::providers::{KIND_CLI, KIND_DEVICE_CODE};
use cloudauth_azure::{
    prepare_environment, Credentials, CredentialsFileManager, ExternalCacheSync, Provider,
    ProvidersConfig,
};
use color_eyre::eyre::eyre;
use console::style;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use tracing::{debug, warn};

use crate::error::Result;

/// Settings shared by every command
#[derive(Debug, Clone, Default)]
pub struct Context {
    pub config_path: Option<PathBuf>,
    /// Empty means the default location
    pub credentials_dir: PathBuf,
}

impl Context {
    fn provider(&self, name: &str) -> Result<Provider> {
        let config = ProvidersConfig::load(self.config_path.as_deref())?;
        let provider = Provider::from_config(name, config.provider(name)?)?;
        provider.validate()?;
        Ok(provider)
    }

    fn credentials_files(&self) -> Result<CredentialsFileManager> {
        Ok(CredentialsFileManager::new(&self.credentials_dir)?)
    }
}

pub async fn handle_login(ctx: &Context, name: &str) -> Result<()> {
    let provider = ctx.provider(name)?;
    let creds = provider.authenticate().await?;

    // device code logins sync themselves; the CLI provider reuses az's own session
    if provider.kind() != KIND_DEVICE_CODE && provider.kind() != KIND_CLI {
        match ExternalCacheSync::from_home() {
            Ok(sync) => sync.sync_credentials(&creds).await,
            Err(e) => warn!("Skipping Azure CLI cache sync: {}", e),
        }
    }

    let files = ctx.credentials_files()?;
    files.write_credentials(name, name, &creds)?;
    debug!(
        "Credentials for {} written to {}",
        name,
        files.credentials_path(name)?.display()
    );

    println!("{}", login_summary(name, &creds));
    Ok(())
}

pub async fn handle_logout(ctx: &Context, name: &str) -> Result<()> {
    let provider = ctx.provider(name)?;
    provider.logout().await?;
    ctx.credentials_files()?.cleanup(name)?;

    println!("{} Logged out of {}", style("✓").green(), style(name).bold());
    Ok(())
}

pub fn handle_env(ctx: &Context, name: &str, all: bool, json: bool) -> Result<()> {
    let provider = ctx.provider(name)?;
    let input: HashMap<String, String> = std::env::vars().collect();
    let prepared = prepare_environment(&input, provider.environment_params());
    let output = if all {
        prepared.into_iter().collect()
    } else {
        changed_vars(&input, prepared)
    };

    if json {
        let text = serde_json::to_string_pretty(&output)
            .map_err(|e| eyre!("Failed to serialize environment: {}", e))?;
        println!("{text}");
    } else {
        for (key, value) in &output {
            println!("{key}={value}");
        }
    }
    Ok(())
}

fn login_summary(name: &str, creds: &Credentials) -> String {
    match creds.expiration {
        Some(expires_at) if !creds.access_token.is_empty() => format!(
            "{} Authenticated {} (token expires {})",
            style("✓").green(),
            style(name).bold(),
            expires_at.to_rfc3339()
        ),
        _ => format!(
            "{} Authenticated {} (no access token issued)",
            style("✓").green(),
            style(name).bold()
        ),
    }
}

/// Variables added or changed by preparation, sorted by name
fn changed_vars(
    input: &HashMap<String, String>,
    prepared: HashMap<String, String>,
) -> BTreeMap<String, String> {
    prepared
        .into_iter()
        .filter(|(key, value)| input.get(key) != Some(value))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    fn cli_config() -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[providers.az]
kind = "azure/cli"
spec = {{ tenant_id = "tenant", subscription_id = "sub" }}
"#
        )
        .unwrap();
        file
    }

    #[tokio::test]
    async fn test_login_and_logout_cli_provider() {
        let config = cli_config();
        let creds_dir = TempDir::new().unwrap();
        let ctx = Context {
            config_path: Some(config.path().to_path_buf()),
            credentials_dir: creds_dir.path().to_path_buf(),
        };

        handle_login(&ctx, "az").await.unwrap();
        let files = CredentialsFileManager::new(creds_dir.path()).unwrap();
        let creds = files.load_credentials("az").unwrap();
        assert_eq!(creds.tenant_id, "tenant");
        assert_eq!(creds.subscription_id, "sub");

        handle_logout(&ctx, "az").await.unwrap();
        assert!(!files.credentials_exist("az"));
    }

    #[tokio::test]
    async fn test_unknown_provider_fails() {
        let config = cli_config();
        let ctx = Context {
            config_path: Some(config.path().to_path_buf()),
            credentials_dir: TempDir::new().unwrap().path().to_path_buf(),
        };
        assert!(handle_login(&ctx, "missing").await.is_err());
    }

    #[test]
    fn test_changed_vars() {
        let input = HashMap::from([
            ("PATH".to_string(), "/bin".to_string()),
            ("ARM_USE_CLI".to_string(), "true".to_string()),
        ]);
        let prepared = HashMap::from([
            ("PATH".to_string(), "/bin".to_string()),
            ("ARM_USE_CLI".to_string(), "true".to_string()),
            ("ARM_TENANT_ID".to_string(), "t".to_string()),
        ]);
        let changed = changed_vars(&input, prepared);
        assert_eq!(changed.len(), 1);
        assert_eq!(changed["ARM_TENANT_ID"], "t");
    }

    #[test]
    fn test_login_summary_without_token() {
        let summary = login_summary("az", &Credentials::default());
        assert!(summary.contains("no access token issued"));
    }
}
