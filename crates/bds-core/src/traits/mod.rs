//! Core traits for the sync pipeline
//!
//! This module defines the abstract interfaces that all implementations must follow.
//!
//! - [`CredentialStore`]: Durable read/replace of OAuth2 credentials
//! - [`ExportApi`]: Token exchange, catalog listing and dataset download
//! - [`Warehouse`]: Staging-table batch merge into the destination

pub mod credential_store;
pub mod export_api;
pub mod warehouse;

pub use credential_store::{CredentialStore, Credentials, DEFAULT_AUTH_SERVICE_URL};
pub use export_api::{AccessToken, ApiSession, DownloadLink, DownloadSource, ExportApi, TokenGrant};
pub use warehouse::{LoadTarget, Warehouse};
