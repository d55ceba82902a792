// # Brightspace Export API
//
// `ExportApi` implementation for the Brightspace Data Hub.
//
// ## Behaviour
//
// - One logical request per trait call (pagination excepted), no retries
// - Non-success statuses carry the HTTP status and response body
// - HTTP timeout of 30 seconds
// - Never touches the credential store: persisting the rotated refresh token
//   is owned by `SyncEngine`
//
// ## Security Requirements
//
// - Client secret, refresh token and access token NEVER appear in logs
// - The Debug implementation redacts all of them
//
// ## API Reference
//
// - Token: POST `{auth}/core/connect/token` (RFC 6749 §6, HTTP basic client auth)
// - List: GET `{lms}/d2l/api/lp/{version}/dataExport/bds` (paged via `NextPageUrl`)
// - Download by id: GET `{lms}/d2l/api/lp/{version}/dataExport/bds/{id}`

mod wire;

use async_trait::async_trait;
use bds_core::config::{DEFAULT_API_VERSION, DEFAULT_TOKEN_SCOPE};
use bds_core::traits::{
    AccessToken, ApiSession, Credentials, DownloadLink, DownloadSource, ExportApi, TokenGrant,
};
use bds_core::{Error, Result};
use std::collections::HashMap;
use std::time::Duration;

use crate::wire::{DataSetPage, TokenResponse};

/// Default HTTP timeout for API requests (30 seconds)
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Brightspace Data Hub client
///
/// Stateless between calls: the access token lives in the [`ApiSession`] the
/// engine passes back in, never in the client.
pub struct BrightspaceClient {
    /// HTTP client for API requests
    client: reqwest::Client,

    /// LP API version used in listing and download paths
    api_version: String,

    /// OAuth2 scope requested on token exchange
    token_scope: String,
}

impl std::fmt::Debug for BrightspaceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrightspaceClient")
            .field("api_version", &self.api_version)
            .field("token_scope", &self.token_scope)
            .finish()
    }
}

impl BrightspaceClient {
    /// Create a client with the default API version and scope
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::http(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_version: DEFAULT_API_VERSION.to_string(),
            token_scope: DEFAULT_TOKEN_SCOPE.to_string(),
        })
    }

    /// Override the LP API version (e.g. `1.18`)
    pub fn with_api_version(mut self, api_version: impl Into<String>) -> Self {
        self.api_version = api_version.into();
        self
    }

    /// Override the OAuth2 scope
    pub fn with_token_scope(mut self, token_scope: impl Into<String>) -> Self {
        self.token_scope = token_scope.into();
        self
    }

    /// API version in use
    pub fn api_version(&self) -> &str {
        &self.api_version
    }

    fn token_url(auth_service_url: &str) -> String {
        format!("{}/core/connect/token", auth_service_url.trim_end_matches('/'))
    }

    fn list_url(&self, api_base_url: &str) -> String {
        format!(
            "{}/d2l/api/lp/{}/dataExport/bds",
            api_base_url.trim_end_matches('/'),
            self.api_version
        )
    }

    fn dataset_url(&self, api_base_url: &str, dataset_id: &str) -> String {
        format!("{}/{}", self.list_url(api_base_url), dataset_id)
    }

    /// GET with bearer auth, returning the response if the status is 2xx
    ///
    /// `on_failure` builds the error from the status and body otherwise.
    async fn get_authorized(
        &self,
        url: &str,
        session: &ApiSession,
        on_failure: fn(u16, String) -> Error,
    ) -> Result<reqwest::Response> {
        let response = self
            .client
            .get(url)
            .bearer_auth(session.access_token.secret())
            .send()
            .await
            .map_err(|e| Error::http(format!("HTTP request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            tracing::error!("GET {} failed with status {}: {}", url, status, body);
            return Err(on_failure(status, body));
        }

        Ok(response)
    }
}

#[async_trait]
impl ExportApi for BrightspaceClient {
    /// Trade the refresh token in for an access token and a new refresh token
    ///
    /// ```http
    /// POST /core/connect/token
    /// Authorization: Basic <client_id:client_secret>
    /// Content-Type: application/x-www-form-urlencoded
    ///
    /// grant_type=refresh_token&refresh_token=...&scope=datahub:dataexports:*
    /// ```
    async fn exchange_refresh_token(&self, credentials: &Credentials) -> Result<TokenGrant> {
        let url = Self::token_url(&credentials.auth_service_url);
        tracing::debug!("Exchanging refresh token at {}", url);

        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", credentials.refresh_token.as_str()),
            ("scope", self.token_scope.as_str()),
        ];

        let response = self
            .client
            .post(&url)
            .basic_auth(&credentials.client_id, Some(&credentials.client_secret))
            .form(&form)
            .send()
            .await
            .map_err(|e| Error::http(format!("Token request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            tracing::error!("Token exchange failed with status {}: {}", status, body);
            return Err(Error::auth(status.as_u16(), body));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| Error::http(format!("Failed to parse token response: {}", e)))?;

        Ok(TokenGrant {
            access_token: AccessToken::new(token.access_token),
            refresh_token: token.refresh_token,
            expires_in: token.expires_in,
        })
    }

    /// Follow `NextPageUrl` until it is null, mapping `PluginId` to `DownloadLink`
    ///
    /// Later pages overwrite earlier entries for the same plugin.
    async fn list_download_links(
        &self,
        session: &ApiSession,
    ) -> Result<HashMap<String, DownloadLink>> {
        let mut links = HashMap::new();
        let mut next_page = Some(self.list_url(&session.api_base_url));
        let mut pages = 0usize;

        while let Some(url) = next_page.take() {
            let response = self
                .get_authorized(&url, session, |status, body| Error::auth(status, body))
                .await?;
            let page: DataSetPage = response
                .json()
                .await
                .map_err(|e| Error::http(format!("Failed to parse data set listing: {}", e)))?;

            pages += 1;
            tracing::trace!("Listing page {} holds {} data set(s)", pages, page.data_sets.len());

            for data_set in page.data_sets {
                match data_set.download_link {
                    Some(link) => {
                        links.insert(data_set.plugin_id, DownloadLink(link));
                    }
                    None => tracing::debug!(
                        "Data set {} has no download link yet",
                        data_set.plugin_id
                    ),
                }
            }

            next_page = page.next_page_url.filter(|next| !next.is_empty());
        }

        tracing::debug!("Resolved {} download link(s) over {} page(s)", links.len(), pages);
        Ok(links)
    }

    /// Fetch the raw archive bytes for one dataset
    async fn download(&self, session: &ApiSession, source: &DownloadSource) -> Result<Vec<u8>> {
        let url = match source {
            DownloadSource::Link(DownloadLink(link)) => link.clone(),
            DownloadSource::Dataset(id) => self.dataset_url(&session.api_base_url, id),
        };

        let response = self
            .get_authorized(&url, session, |status, body| Error::download(status, body))
            .await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::http(format!("Failed to read download body: {}", e)))?;

        Ok(bytes.to_vec())
    }

    fn api_name(&self) -> &'static str {
        "brightspace"
    }
}
