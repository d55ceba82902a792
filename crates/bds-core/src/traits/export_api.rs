// # Export API Trait
//
// Defines the interface to the remote data-export service.
//
// ## Responsibilities
//
// - Trade a refresh token for an access token and a new refresh token
// - List the currently available export links (catalog mode)
// - Download one export payload
//
// Implementations make exactly one logical request per call and never retry;
// sequencing and failure policy belong to `SyncEngine`. Implementations also
// never touch the credential store: persisting the rotated token is the
// engine's job.

use async_trait::async_trait;
use std::collections::HashMap;

use crate::traits::credential_store::Credentials;

/// Short-lived bearer token, owned by one run and never persisted
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    /// Wrap a bearer string
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The raw bearer string, for the `Authorization` header only
    pub fn secret(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AccessToken(<REDACTED>)")
    }
}

/// Result of a successful refresh-token exchange
#[derive(Clone)]
pub struct TokenGrant {
    /// Access token for this run
    pub access_token: AccessToken,

    /// Replacement refresh token; the one that was exchanged is now invalid
    pub refresh_token: String,

    /// Access token lifetime in seconds, when the provider reports it
    pub expires_in: Option<u64>,
}

impl std::fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenGrant")
            .field("access_token", &self.access_token)
            .field("refresh_token", &"<REDACTED>")
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// One-time download URL from the catalog; valid for a single run only
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadLink(pub String);

/// Everything an authenticated call needs for the rest of a run
#[derive(Debug, Clone)]
pub struct ApiSession {
    /// Bearer token
    pub access_token: AccessToken,

    /// LMS API base URL
    pub api_base_url: String,
}

/// Where one dataset's payload is fetched from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadSource {
    /// Link resolved through the catalog
    Link(DownloadLink),

    /// Download-by-id endpoint
    Dataset(String),
}

/// Trait for export API implementations
#[async_trait]
pub trait ExportApi: Send + Sync {
    /// Exchange the stored refresh token
    ///
    /// # Returns
    ///
    /// - `Ok(TokenGrant)`: Both tokens; the caller MUST persist the new refresh
    ///   token before making further authenticated calls
    /// - `Err(Error::Authentication)`: Non-success status, with status and body
    async fn exchange_refresh_token(
        &self,
        credentials: &Credentials,
    ) -> Result<TokenGrant, crate::Error>;

    /// Page through the listing endpoint and map dataset id to download link
    ///
    /// Later pages overwrite earlier entries for the same id.
    async fn list_download_links(
        &self,
        session: &ApiSession,
    ) -> Result<HashMap<String, DownloadLink>, crate::Error>;

    /// Download the compressed payload for one dataset
    ///
    /// # Returns
    ///
    /// - `Ok(Vec<u8>)`: Raw archive bytes
    /// - `Err(Error::Download)`: Non-success status
    async fn download(
        &self,
        session: &ApiSession,
        source: &DownloadSource,
    ) -> Result<Vec<u8>, crate::Error>;

    /// Get the API name (for logging)
    fn api_name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_not_exposed_in_debug() {
        let grant = TokenGrant {
            access_token: AccessToken::new("access-abc"),
            refresh_token: "refresh-xyz".to_string(),
            expires_in: Some(3600),
        };
        let debug_str = format!("{:?}", grant);
        assert!(!debug_str.contains("access-abc"));
        assert!(!debug_str.contains("refresh-xyz"));
        assert!(debug_str.contains("3600"));
    }
}
