// # Credential Store Trait
//
// Defines the interface for persisting OAuth2 client credentials.
//
// ## Purpose
//
// The provider rotates refresh tokens on every exchange: the token that was
// just traded in is dead. The store holds the one live refresh token and must
// make a replacement durable before `replace()` returns, otherwise a crash
// between exchange and persist strands the integration until someone
// re-authorises it by hand.
//
// ## Implementations
//
// - File-based: JSON document, atomic write-then-rename
// - Memory: tests and embedding
//
// ## Usage
//
// ```rust,ignore
// let credentials = store.load().await?;
// let grant = api.exchange_refresh_token(&credentials, scope).await?;
// store.replace(&credentials.rotated(grant.refresh_token.clone())).await?;
// ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Default Brightspace auth service
pub const DEFAULT_AUTH_SERVICE_URL: &str = "https://auth.brightspace.com";

/// OAuth2 client credentials plus the current refresh token
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    /// OAuth2 client identifier
    pub client_id: String,

    /// OAuth2 client secret
    /// ⚠️ NEVER log this value
    pub client_secret: String,

    /// Base URL of the auth service (token endpoint lives under it)
    #[serde(default = "default_auth_service_url")]
    pub auth_service_url: String,

    /// Base URL of the LMS API
    pub api_base_url: String,

    /// Single-use refresh token
    /// ⚠️ NEVER log this value
    pub refresh_token: String,

    /// When the refresh token was last rotated by this connector
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_rotated_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl Credentials {
    /// Create a credential set with the default auth service
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        api_base_url: impl Into<String>,
        refresh_token: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            auth_service_url: default_auth_service_url(),
            api_base_url: api_base_url.into(),
            refresh_token: refresh_token.into(),
            token_rotated_at: None,
        }
    }

    /// Override the auth service URL
    pub fn with_auth_service_url(mut self, url: impl Into<String>) -> Self {
        self.auth_service_url = url.into();
        self
    }

    /// Copy of these credentials carrying a freshly issued refresh token
    pub fn rotated(&self, refresh_token: impl Into<String>) -> Self {
        Self {
            refresh_token: refresh_token.into(),
            token_rotated_at: Some(chrono::Utc::now()),
            ..self.clone()
        }
    }

    /// Validate that every field needed for an exchange is present
    pub fn validate(&self) -> Result<(), crate::Error> {
        let required = [
            ("clientId", &self.client_id),
            ("clientSecret", &self.client_secret),
            ("authServiceUrl", &self.auth_service_url),
            ("apiBaseUrl", &self.api_base_url),
            ("refreshToken", &self.refresh_token),
        ];

        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(crate::Error::config(format!(
                    "Credential field '{}' is missing or empty",
                    name
                )));
            }
        }
        Ok(())
    }
}

// Custom Debug implementation that hides the secrets
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<REDACTED>")
            .field("auth_service_url", &self.auth_service_url)
            .field("api_base_url", &self.api_base_url)
            .field("refresh_token", &"<REDACTED>")
            .field("token_rotated_at", &self.token_rotated_at)
            .finish()
    }
}

fn default_auth_service_url() -> String {
    DEFAULT_AUTH_SERVICE_URL.to_string()
}

/// Trait for credential store implementations
///
/// # Durability
///
/// `replace()` must not return `Ok` until the new document would survive a
/// process crash. The engine relies on this to order "persist rotated token"
/// strictly before any further network call.
///
/// # Thread Safety
///
/// All methods must be safe to call concurrently from multiple tasks.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Read the current credential document
    ///
    /// # Returns
    ///
    /// - `Ok(Credentials)`: The stored credentials
    /// - `Err(Error::CredentialStore)`: Storage error
    /// - `Err(Error::Config)`: Document missing required fields
    async fn load(&self) -> Result<Credentials, crate::Error>;

    /// Replace the whole credential document
    ///
    /// # Returns
    ///
    /// - `Ok(())`: New document durably stored
    /// - `Err(Error)`: Storage error; the previous document is still in place
    async fn replace(&self, credentials: &Credentials) -> Result<(), crate::Error>;
}
