//! Local File Store
//!
//! Token record kept as `KEY=VALUE` lines in a single file. The static client
//! identity is not written to disk; it is supplied by configuration.

use async_trait::async_trait;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::error::{LifecycleError, StorageError};
use crate::token::CredentialStore;
use crate::types::{ClientIdentity, TokenRecord};

const ACCESS_TOKEN_KEY: &str = "ACCESS_TOKEN";
const REFRESH_TOKEN_KEY: &str = "REFRESH_TOKEN";
const REALM_ID_KEY: &str = "REALM_ID";
const TENANT_ID_KEY: &str = "TENANT_ID";

/// File-backed credential store with atomic replacement on save.
pub struct LocalFileStore {
    path: PathBuf,
    identity: ClientIdentity,
}

impl LocalFileStore {
    /// Create a store for the file at `path`.
    pub fn new(path: impl Into<PathBuf>, identity: ClientIdentity) -> Self {
        Self {
            path: path.into(),
            identity,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn parse(&self, contents: &str) -> Result<TokenRecord, LifecycleError> {
        let mut access_token = None;
        let mut refresh_token = None;
        let mut tenant_id = None;

        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = value.trim().to_string();

            match key.trim().to_ascii_uppercase().as_str() {
                ACCESS_TOKEN_KEY => access_token = Some(value),
                REFRESH_TOKEN_KEY => refresh_token = Some(value),
                REALM_ID_KEY | TENANT_ID_KEY => tenant_id = Some(value),
                _ => {}
            }
        }

        let record = TokenRecord::from_parts(
            tenant_id.unwrap_or_default(),
            self.identity.clone(),
            access_token,
            refresh_token,
        )?;
        Ok(record)
    }

    fn render(record: &TokenRecord) -> String {
        format!(
            "{}={}\n{}={}\n{}={}\n",
            ACCESS_TOKEN_KEY,
            record.access_token().unwrap_or_default(),
            REFRESH_TOKEN_KEY,
            record.refresh_token().unwrap_or_default(),
            REALM_ID_KEY,
            record.tenant_id()
        )
    }

    fn io_error(&self, error: io::Error, write: bool) -> LifecycleError {
        let location = self.path.display().to_string();
        let error = match error.kind() {
            io::ErrorKind::NotFound if !write => StorageError::NotFound { location },
            io::ErrorKind::PermissionDenied => StorageError::PermissionDenied { location },
            _ if write => StorageError::WriteFailed {
                message: format!("{}: {}", location, error),
            },
            _ => StorageError::ReadFailed {
                message: format!("{}: {}", location, error),
            },
        };
        error.into()
    }
}

/// Write `contents` to a temporary sibling of `path`, flush it to disk and
/// rename it over `path`.
fn replace_atomically(path: &Path, contents: &str) -> io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };

    let mut temp = tempfile::NamedTempFile::new_in(&dir)?;
    temp.write_all(contents.as_bytes())?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[async_trait]
impl CredentialStore for LocalFileStore {
    async fn load(&self) -> Result<TokenRecord, LifecycleError> {
        let contents = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| self.io_error(e, false))?;
        self.parse(&contents)
    }

    async fn save(&self, record: &TokenRecord) -> Result<(), LifecycleError> {
        let path = self.path.clone();
        let contents = Self::render(record);

        let result = tokio::task::spawn_blocking(move || replace_atomically(&path, &contents))
            .await
            .map_err(|e| StorageError::WriteFailed {
                message: e.to_string(),
            })?;

        result.map_err(|e| self.io_error(e, true))?;
        tracing::debug!(path = %self.path.display(), "token file rewritten");
        Ok(())
    }

    async fn exists(&self) -> bool {
        tokio::fs::metadata(&self.path)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CredentialsError;
    use crate::types::{Environment, DEFAULT_REDIRECT_URI};

    fn identity() -> ClientIdentity {
        ClientIdentity::new("client", "secret", DEFAULT_REDIRECT_URI, Environment::Sandbox)
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalFileStore::new(dir.path().join(".qbo_tokens"), identity());

        assert!(!store.exists().await);
        assert!(matches!(
            store.load().await,
            Err(LifecycleError::Storage(StorageError::NotFound { .. }))
        ));
    }

    #[tokio::test]
    async fn test_load_parses_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".qbo_tokens");
        std::fs::write(
            &path,
            "# written by auth_qbo\naccess_token=A1\n\nREFRESH_TOKEN=R1\nREALM_ID=9130\nUNRELATED=x\n",
        )
        .unwrap();

        let store = LocalFileStore::new(&path, identity());
        let record = store.load().await.unwrap();

        assert!(record.is_complete());
        assert_eq!(record.access_token(), Some("A1"));
        assert_eq!(record.refresh_token(), Some("R1"));
        assert_eq!(record.tenant_id(), "9130");
        assert_eq!(record.identity().client_id, "client");
    }

    #[tokio::test]
    async fn test_load_half_record_is_incomplete() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".qbo_tokens");
        std::fs::write(&path, "ACCESS_TOKEN=A1\nREALM_ID=9130\n").unwrap();

        let store = LocalFileStore::new(&path, identity());
        assert!(matches!(
            store.load().await,
            Err(LifecycleError::Credentials(CredentialsError::Incomplete { .. }))
        ));
    }

    #[tokio::test]
    async fn test_save_rewrites_wholesale() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".qbo_tokens");
        std::fs::write(&path, "ACCESS_TOKEN=A1\nREFRESH_TOKEN=R1\nREALM_ID=9130\nEXTRA=1\n").unwrap();

        let store = LocalFileStore::new(&path, identity());
        let record = TokenRecord::new("9130", identity(), "A2", "R2");
        store.save(&record).await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "ACCESS_TOKEN=A2\nREFRESH_TOKEN=R2\nREALM_ID=9130\n");

        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1, "temporary file left behind");
    }

    #[tokio::test]
    async fn test_save_into_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join(".qbo_tokens");

        let store = LocalFileStore::new(&path, identity());
        let record = TokenRecord::new("9130", identity(), "A2", "R2");

        assert!(matches!(
            store.save(&record).await,
            Err(LifecycleError::Storage(StorageError::WriteFailed { .. }))
        ));
    }
}
