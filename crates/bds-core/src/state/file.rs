// # File Credential Store
//
// File-based implementation of CredentialStore.
//
// ## Purpose
//
// Keeps the OAuth2 credential document on disk between runs. The refresh
// token inside it is single-use, so a replace must be durable before the
// engine makes any further network call.
//
// ## Durability
//
// - Atomic writes: temp file, fsync, then rename over the document
// - Automatic backup: previous document kept as `.backup`
// - Unknown keys in the document (database settings etc.) survive a replace
//
// ## File Format
//
// ```json
// {
//   "apiBaseUrl": "https://lms.example.com",
//   "authServiceUrl": "https://auth.brightspace.com",
//   "clientId": "...",
//   "clientSecret": "...",
//   "refreshToken": "...",
//   "tokenRotatedAt": "2026-01-09T12:00:00Z"
// }
// ```

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::Error;
use crate::traits::credential_store::{CredentialStore, Credentials};

/// File-based credential store
///
/// # Example
///
/// ```rust,no_run
/// use bds_core::state::FileCredentialStore;
/// use bds_core::traits::CredentialStore;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = FileCredentialStore::new("/etc/bds/credentials.json").await?;
///
///     let credentials = store.load().await?;
///     store.replace(&credentials.rotated("new-refresh-token")).await?;
///
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct FileCredentialStore {
    path: PathBuf,
    /// Serializes replace() calls so read-merge-write is not interleaved
    write_lock: Mutex<()>,
}

impl FileCredentialStore {
    /// Open a credential store at `path`
    ///
    /// The document itself is read lazily by `load()`; this only checks that
    /// the file or its backup exists.
    pub async fn new<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();

        if !path.exists() && !Self::backup_path(&path).exists() {
            return Err(Error::config(format!(
                "Credential file does not exist: {}",
                path.display()
            )));
        }

        Ok(Self {
            path,
            write_lock: Mutex::new(()),
        })
    }

    /// Path of the credential document
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the raw document with automatic recovery
    ///
    /// Recovery strategy:
    /// 1. Try to load main document
    /// 2. If missing or unparseable, try loading backup
    /// 3. If backup also fails, report the main document's error
    async fn load_document_with_recovery(&self) -> Result<Map<String, Value>, Error> {
        match Self::load_document(&self.path).await {
            Ok(document) => Ok(document),
            Err(e) => {
                let backup_path = Self::backup_path(&self.path);
                if !backup_path.exists() {
                    return Err(e);
                }

                tracing::warn!(
                    "Credential document unreadable: {}. Attempting recovery from backup.",
                    e
                );

                match Self::load_document(&backup_path).await {
                    Ok(document) => {
                        tracing::warn!(
                            "Recovered credentials from backup; its refresh token may be consumed"
                        );
                        Ok(document)
                    }
                    Err(backup_err) => {
                        tracing::error!("Backup also unreadable: {}", backup_err);
                        Err(e)
                    }
                }
            }
        }
    }

    /// Load the document as a JSON object
    async fn load_document(path: &Path) -> Result<Map<String, Value>, Error> {
        let content = fs::read_to_string(path).await.map_err(|e| {
            Error::credential_store(format!(
                "Failed to read credential file {}: {}",
                path.display(),
                e
            ))
        })?;

        match serde_json::from_str::<Value>(&content) {
            Ok(Value::Object(document)) => Ok(document),
            Ok(_) => Err(Error::credential_store(format!(
                "Credential file {} is not a JSON object",
                path.display()
            ))),
            Err(e) => Err(Error::credential_store(format!(
                "Failed to parse credential file {}: {}",
                path.display(),
                e
            ))),
        }
    }

    /// Write the document atomically and durably
    async fn write_document(&self, document: &Map<String, Value>) -> Result<(), Error> {
        let json = serde_json::to_string_pretty(document).map_err(|e| {
            Error::credential_store(format!("Failed to serialize credentials: {}", e))
        })?;

        let temp_path = self.temp_path();
        {
            let mut file = fs::File::create(&temp_path).await.map_err(|e| {
                Error::credential_store(format!(
                    "Failed to create temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;

            file.write_all(json.as_bytes()).await.map_err(|e| {
                Error::credential_store(format!(
                    "Failed to write to temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;

            file.sync_all().await.map_err(|e| {
                Error::credential_store(format!(
                    "Failed to sync temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
        }

        if self.path.exists() {
            let backup_path = Self::backup_path(&self.path);
            if let Err(e) = fs::copy(&self.path, &backup_path).await {
                tracing::warn!("Failed to create credential backup: {}", e);
            }
        }

        fs::rename(&temp_path, &self.path).await.map_err(|e| {
            Error::credential_store(format!(
                "Failed to rename {} to {}: {}",
                temp_path.display(),
                self.path.display(),
                e
            ))
        })?;

        // The rename itself lives in the directory entry
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            match fs::File::open(parent).await {
                Ok(dir) => {
                    if let Err(e) = dir.sync_all().await {
                        tracing::warn!("Failed to sync directory {}: {}", parent.display(), e);
                    }
                }
                Err(e) => tracing::warn!("Failed to open directory {}: {}", parent.display(), e),
            }
        }

        tracing::trace!("Credentials written to file: {}", self.path.display());
        Ok(())
    }

    /// Get path to temporary file for atomic writes
    fn temp_path(&self) -> PathBuf {
        let mut temp = self.path.clone();
        temp.set_extension("tmp");
        temp
    }

    /// Get path to backup file
    fn backup_path(path: &Path) -> PathBuf {
        let mut backup = path.to_path_buf();
        backup.set_extension("backup");
        backup
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn load(&self) -> Result<Credentials, Error> {
        let document = self.load_document_with_recovery().await?;

        let credentials: Credentials = serde_json::from_value(Value::Object(document))
            .map_err(|e| {
                Error::config(format!(
                    "Credential file {} is missing required fields: {}",
                    self.path.display(),
                    e
                ))
            })?;

        credentials.validate()?;
        tracing::debug!("Loaded credentials for client {}", credentials.client_id);
        Ok(credentials)
    }

    async fn replace(&self, credentials: &Credentials) -> Result<(), Error> {
        let _guard = self.write_lock.lock().await;

        // Keep keys this crate does not own
        let mut document = match self.load_document_with_recovery().await {
            Ok(document) => document,
            Err(e) => {
                tracing::warn!("Replacing unreadable credential document: {}", e);
                Map::new()
            }
        };

        match serde_json::to_value(credentials)? {
            Value::Object(fields) => {
                for (key, value) in fields {
                    document.insert(key, value);
                }
            }
            _ => return Err(Error::credential_store("Credentials did not serialize to an object")),
        }

        // Absent optional fields must not linger from a previous document
        if credentials.token_rotated_at.is_none() {
            document.remove("tokenRotatedAt");
        }

        self.write_document(&document).await
    }
}
