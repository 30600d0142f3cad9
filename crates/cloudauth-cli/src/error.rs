//! Error types for the cloudauth CLI

use color_eyre::eyre::Report;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    /// Provider configuration or authentication failure
    #[error(transparent)]
    Auth(#[from] cloudauth_azure::AuthError),

    /// Credentials file could not be written, read or removed
    #[error(transparent)]
    Credentials(#[from] cloudauth_azure::CredentialsFileError),

    #[error(transparent)]
    Internal(#[from] Report),
}

pub type Result<T> = std::result::Result<T, CliError>;
