// # Memory Credential Store
//
// In-memory implementation of CredentialStore.
//
// ## Purpose
//
// Holds credentials for the lifetime of the process only. Useful for tests
// and for embedding the engine in a host that persists credentials itself
// (read them back with `snapshot()` after a run).
//
// ## Crash Behavior
//
// - A rotated refresh token is lost on exit unless the host saves it
// - The next run then fails token exchange and needs re-authorisation

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::Error;
use crate::traits::credential_store::{CredentialStore, Credentials};

/// In-memory credential store implementation
///
/// # Example
///
/// ```rust,no_run
/// use bds_core::state::MemoryCredentialStore;
/// use bds_core::traits::{CredentialStore, Credentials};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = MemoryCredentialStore::new(Credentials::new(
///         "client", "secret", "https://lms.example.com", "refresh",
///     ));
///
///     let credentials = store.load().await?;
///     store.replace(&credentials.rotated("next")).await?;
///     assert_eq!(store.snapshot().await.refresh_token, "next");
///
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct MemoryCredentialStore {
    inner: Arc<RwLock<Credentials>>,
}

impl MemoryCredentialStore {
    /// Create a store holding `credentials`
    pub fn new(credentials: Credentials) -> Self {
        Self {
            inner: Arc::new(RwLock::new(credentials)),
        }
    }

    /// Current credentials, without validation
    pub async fn snapshot(&self) -> Credentials {
        self.inner.read().await.clone()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn load(&self) -> Result<Credentials, Error> {
        let guard = self.inner.read().await;
        guard.validate()?;
        Ok(guard.clone())
    }

    async fn replace(&self, credentials: &Credentials) -> Result<(), Error> {
        let mut guard = self.inner.write().await;
        *guard = credentials.clone();
        Ok(())
    }
}
