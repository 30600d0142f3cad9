use crate::cli::{commands::Commands, handlers};
use crate::error::Result;
use clap::Parser;
use clap_verbosity_flag::{OffLevel, Verbosity};
use std::path::PathBuf;

/// cloudauth - Azure credentials for infrastructure tooling
#[derive(Parser, Debug)]
#[command(
    name = "cloudauth",
    version,
    about = "Acquire Azure credentials and share them with the Azure CLI and Terraform",
    long_about = "Acquire Azure credentials and share them with the Azure CLI and Terraform.

EXAMPLES:
  cloudauth login dev               # Authenticate the provider named 'dev'
  cloudauth env dev                 # Print variables for a spawned tool
  cloudauth logout dev              # Clear cached credentials"
)]
pub struct Args {
    /// Provider configuration file
    #[arg(short, long, global = true, env = "CLOUDAUTH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory for per-provider credentials files (default ~/.azure/cloudauth)
    #[arg(long, global = true, env = "CLOUDAUTH_CREDENTIALS_DIR")]
    pub credentials_dir: Option<PathBuf>,

    #[command(flatten)]
    pub verbosity: Verbosity<OffLevel>,

    #[command(subcommand)]
    pub command: Commands,
}

impl Args {
    pub async fn run(self) -> Result<()> {
        let ctx = handlers::Context {
            config_path: self.config,
            credentials_dir: self.credentials_dir.unwrap_or_default(),
        };

        match self.command {
            Commands::Login { provider } => handlers::handle_login(&ctx, &provider).await,
            Commands::Logout { provider } => handlers::handle_logout(&ctx, &provider).await,
            Commands::Env {
                provider,
                all,
                json,
            } => handlers::handle_env(&ctx, &provider, all, json),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_login() {
        let args = Args::try_parse_from(["cloudauth", "-c", "auth.toml", "login", "dev"]).unwrap();
        assert_eq!(args.config, Some(PathBuf::from("auth.toml")));
        assert!(matches!(args.command, Commands::Login { provider } if provider == "dev"));
    }

    #[test]
    fn test_parse_env_flags() {
        let args = Args::try_parse_from(["cloudauth", "env", "ci", "--all", "--json"]).unwrap();
        match args.command {
            Commands::Env {
                provider,
                all,
                json,
            } => {
                assert_eq!(provider, "ci");
                assert!(all);
                assert!(json);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_provider_is_required() {
        assert!(Args::try_parse_from(["cloudauth", "logout"]).is_err());
    }
}
