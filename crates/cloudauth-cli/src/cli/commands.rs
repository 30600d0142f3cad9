use clap::Subcommand;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Authenticate a provider and write its credentials file
    Login {
        /// Provider name from the configuration file
        provider: String,
    },

    /// Remove cached tokens and credentials for a provider
    Logout {
        /// Provider name from the configuration file
        provider: String,
    },

    /// Print the environment a spawned tool should run with
    Env {
        /// Provider name from the configuration file
        provider: String,

        /// Print the full environment instead of only the changed variables
        #[arg(long)]
        all: bool,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}
