//! Response bodies of the Brightspace endpoints

use serde::Deserialize;

/// OAuth2 token endpoint response
#[derive(Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

/// One page of the data set listing
#[derive(Debug, Deserialize)]
pub(crate) struct DataSetPage {
    #[serde(rename = "BrightspaceDataSets", default)]
    pub data_sets: Vec<DataSetEntry>,

    #[serde(rename = "NextPageUrl", default)]
    pub next_page_url: Option<String>,
}

/// One listed data set; other fields in the listing are ignored
#[derive(Debug, Deserialize)]
pub(crate) struct DataSetEntry {
    #[serde(rename = "PluginId")]
    pub plugin_id: String,

    /// Null until the export has been generated
    #[serde(rename = "DownloadLink", default)]
    pub download_link: Option<String>,
}
