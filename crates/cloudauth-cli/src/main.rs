//! Main entry point for the cloudauth CLI

use clap::Parser;
use clap_verbosity_flag::LevelFilter;
use cloudauth_cli::cli::Args;
use color_eyre::eyre::Result;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    color_eyre::config::HookBuilder::default()
        .display_location_section(false)
        .display_env_section(false)
        .install()?;

    match args.verbosity.log_level_filter() {
        LevelFilter::Off | LevelFilter::Error => {}
        _ => {
            std::env::set_var("RUST_LIB_BACKTRACE", "1");
        }
    }

    let binary_name = env!("CARGO_BIN_NAME").replace('-', "_");
    let default_filter = format!("{binary_name}=warn,cloudauth_cli=warn,cloudauth_azure=warn");
    cloudauth_cli::logging::init_logging(&args.verbosity, &default_filter)?;

    Ok(args.run().await?)
}
