//! Per-provider credentials files
//!
//! Layout is `<base>/<provider>/credentials.json`, base defaulting to
//! `~/.azure/cloudauth`. Files are owner-only and hold [`Credentials`]
//! verbatim as camelCase JSON.

use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::CredentialsFileError;
use crate::fs_util::{read_optional, write_private_file};
use crate::types::{azure_config_dir, Credentials, APP_DIR_NAME};

pub const CREDENTIALS_FILE_NAME: &str = "credentials.json";

/// Reads and writes credentials files under one base directory
#[derive(Debug, Clone)]
pub struct CredentialsFileManager {
    base_dir: PathBuf,
}

impl CredentialsFileManager {
    /// Manager rooted at `base`, or at `~/.azure/cloudauth` when `base` is empty
    pub fn new(base: impl AsRef<Path>) -> Result<Self, CredentialsFileError> {
        let base = base.as_ref();
        let base_dir = if base.as_os_str().is_empty() {
            azure_config_dir()
                .ok_or(CredentialsFileError::HomeDirUnavailable)?
                .join(APP_DIR_NAME)
        } else {
            base.to_path_buf()
        };
        Ok(Self { base_dir })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Directory holding `provider`'s file; the name must be a single path component
    pub fn provider_dir(&self, provider: &str) -> Result<PathBuf, CredentialsFileError> {
        if !is_valid_provider_name(provider) {
            return Err(CredentialsFileError::InvalidProvider(provider.to_string()));
        }
        Ok(self.base_dir.join(provider))
    }

    pub fn credentials_path(&self, provider: &str) -> Result<PathBuf, CredentialsFileError> {
        Ok(self.provider_dir(provider)?.join(CREDENTIALS_FILE_NAME))
    }

    /// Write `creds` for `provider`, replacing any previous file
    pub fn write_credentials(
        &self,
        provider: &str,
        identity: &str,
        creds: &Credentials,
    ) -> Result<(), CredentialsFileError> {
        let path = self.credentials_path(provider)?;
        let bytes = serde_json::to_vec_pretty(creds).map_err(|e| CredentialsFileError::Write {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        write_private_file(&path, &bytes).map_err(|e| CredentialsFileError::Write {
            path: path.clone(),
            reason: e.to_string(),
        })?;

        debug!(
            "Wrote credentials for provider {} (identity {}) to {}",
            provider,
            identity,
            path.display()
        );
        Ok(())
    }

    pub fn load_credentials(&self, provider: &str) -> Result<Credentials, CredentialsFileError> {
        let path = self.credentials_path(provider)?;
        let bytes = read_optional(&path)
            .map_err(|e| CredentialsFileError::Load {
                path: path.clone(),
                reason: e.to_string(),
            })?
            .ok_or_else(|| CredentialsFileError::NotFound(path.clone()))?;

        serde_json::from_slice(&bytes).map_err(|e| CredentialsFileError::Load {
            path,
            reason: e.to_string(),
        })
    }

    pub fn credentials_exist(&self, provider: &str) -> bool {
        self.credentials_path(provider)
            .map(|path| path.is_file())
            .unwrap_or(false)
    }

    /// Remove the provider directory; a missing directory is not an error
    pub fn cleanup(&self, provider: &str) -> Result<(), CredentialsFileError> {
        let dir = self.provider_dir(provider)?;
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => {
                debug!("Removed credentials directory {}", dir.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(CredentialsFileError::Cleanup { path: dir, source }),
        }
    }
}

fn is_valid_provider_name(name: &str) -> bool {
    !name.is_empty() && name != "." && !name.contains("..") && !name.contains(['/', '\\'])
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn creds() -> Credentials {
        Credentials {
            access_token: "token".into(),
            token_type: "Bearer".into(),
            expiration: Some(Utc.with_ymd_and_hms(2030, 1, 1, 12, 0, 0).unwrap()),
            tenant_id: "tenant".into(),
            subscription_id: "sub".into(),
            graph_api_token: Some("graph".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_write_then_load() {
        let dir = TempDir::new().unwrap();
        let manager = CredentialsFileManager::new(dir.path()).unwrap();

        assert!(!manager.credentials_exist("dev"));
        manager.write_credentials("dev", "me", &creds()).unwrap();
        assert!(manager.credentials_exist("dev"));
        assert_eq!(manager.load_credentials("dev").unwrap(), creds());
        assert_eq!(
            manager.credentials_path("dev").unwrap(),
            dir.path().join("dev").join("credentials.json")
        );
    }

    #[test]
    fn test_load_missing_and_invalid() {
        let dir = TempDir::new().unwrap();
        let manager = CredentialsFileManager::new(dir.path()).unwrap();

        assert!(matches!(
            manager.load_credentials("dev").unwrap_err(),
            CredentialsFileError::NotFound(_)
        ));

        std::fs::create_dir_all(manager.provider_dir("dev").unwrap()).unwrap();
        std::fs::write(manager.credentials_path("dev").unwrap(), b"{not json").unwrap();
        assert!(matches!(
            manager.load_credentials("dev").unwrap_err(),
            CredentialsFileError::Load { .. }
        ));
    }

    #[test]
    fn test_cleanup_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let manager = CredentialsFileManager::new(dir.path()).unwrap();
        manager.write_credentials("dev", "me", &creds()).unwrap();

        manager.cleanup("dev").unwrap();
        assert!(!manager.provider_dir("dev").unwrap().exists());
        manager.cleanup("dev").unwrap();
    }

    #[test]
    fn test_cleanup_rejects_names_outside_base() {
        let dir = TempDir::new().unwrap();
        let manager = CredentialsFileManager::new(dir.path()).unwrap();
        manager.write_credentials("dev", "me", &creds()).unwrap();

        for name in ["", ".", "..", "../dev", "dev/..", "a/b", "a\\b"] {
            assert!(
                matches!(
                    manager.cleanup(name).unwrap_err(),
                    CredentialsFileError::InvalidProvider(_)
                ),
                "{name:?} should be rejected"
            );
        }
        assert!(dir.path().is_dir());
        assert!(manager.credentials_exist("dev"));
    }

    #[test]
    fn test_invalid_name_is_never_read_or_written() {
        let dir = TempDir::new().unwrap();
        let manager = CredentialsFileManager::new(dir.path().join("creds")).unwrap();

        assert!(manager.write_credentials("..", "me", &creds()).is_err());
        assert!(!dir.path().join(CREDENTIALS_FILE_NAME).exists());
        assert!(matches!(
            manager.load_credentials("").unwrap_err(),
            CredentialsFileError::InvalidProvider(_)
        ));
        assert!(!manager.credentials_exist(".."));
    }

    #[test]
    fn test_empty_base_uses_home() {
        let manager = CredentialsFileManager::new("").unwrap();
        assert!(manager.base_dir().ends_with(".azure/cloudauth"));
    }

    #[cfg(unix)]
    #[test]
    fn test_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let manager = CredentialsFileManager::new(dir.path()).unwrap();
        manager.write_credentials("dev", "me", &creds()).unwrap();

        let mode = std::fs::metadata(manager.credentials_path("dev").unwrap())
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
