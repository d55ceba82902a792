//! Core sync engine
//!
//! The SyncEngine is responsible for:
//! - Exchanging the refresh token and persisting its replacement
//! - Resolving each dataset's download source
//! - Fetching and validating each export archive
//! - Loading each dataset through the batch loader
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐   load / replace   ┌──────────────┐
//! │ CredentialStore │◄───────────────────│              │
//! └─────────────────┘                    │              │
//! ┌─────────────────┐ exchange/list/get  │  SyncEngine  │──── EngineEvent ───►
//! │   ExportApi     │◄───────────────────│              │
//! └─────────────────┘                    │              │
//! ┌─────────────────┐  prepare / merge   │              │
//! │   Warehouse     │◄───────────────────│              │
//! └─────────────────┘                    └──────────────┘
//! ```
//!
//! ## Run Flow
//!
//! 1. Load credentials, exchange the refresh token
//! 2. Persist the rotated refresh token (before any other network call)
//! 3. In catalog mode, resolve dataset id → one-time download link
//! 4. For each descriptor, strictly in order: download, check archive, load
//!
//! Nothing runs concurrently: dataset N+1 is not fetched until dataset N has
//! finished loading.

use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::archive::CsvArchive;
use crate::config::{DatasetDescriptor, DiscoveryMode, FailurePolicy, SyncConfig, SyncMode};
use crate::error::{Error, Result};
use crate::loader::{BatchLoader, LoadReport};
use crate::traits::{
    ApiSession, CredentialStore, DownloadLink, DownloadSource, ExportApi, Warehouse,
};

/// Events emitted by the SyncEngine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Run started
    Started { mode: SyncMode, datasets: usize },

    /// Refresh token exchanged and its replacement persisted
    TokenRotated,

    /// Catalog listing finished
    CatalogResolved { links: usize },

    /// Dataset download started
    DatasetStarted { dataset_id: String, table: String },

    /// One batch committed
    BatchCommitted { table: String, batch: usize, rows: u64 },

    /// Dataset fully loaded
    DatasetCompleted { table: String, batches: usize, rows: u64 },

    /// Dataset failed
    DatasetFailed { table: String, error: String },

    /// Run finished (with or without dataset failures)
    Finished { succeeded: usize, failed: usize },
}

/// A dataset that failed under the `continue` policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetFailure {
    /// Dataset identifier
    pub dataset_id: String,

    /// Destination table
    pub table: String,

    /// Error message
    pub error: String,
}

/// Outcome of one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// Mode the run used
    pub mode: SyncMode,

    /// Datasets loaded to completion, in run order
    pub loaded: Vec<LoadReport>,

    /// Datasets that failed (only populated under the `continue` policy)
    pub failures: Vec<DatasetFailure>,
}

impl RunReport {
    /// Whether every selected dataset loaded
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Total rows merged across all loaded datasets
    pub fn total_rows(&self) -> u64 {
        self.loaded.iter().map(|r| r.rows).sum()
    }
}

/// Core sync engine
///
/// ## Lifecycle
///
/// 1. Create with [`SyncEngine::new()`]
/// 2. Call [`SyncEngine::run()`] once per scheduled sync
///
/// ## Failure handling
///
/// Nothing is retried. Token exchange and catalog failures abort the run
/// before any dataset is touched. Dataset failures abort the run under the
/// `abort` policy, or are recorded in the [`RunReport`] under `continue`.
pub struct SyncEngine {
    /// Remote export API
    api: Box<dyn ExportApi>,

    /// Durable credential document
    credential_store: Box<dyn CredentialStore>,

    /// Destination warehouse
    warehouse: Box<dyn Warehouse>,

    /// Sync configuration
    config: SyncConfig,

    /// Event sender for external monitoring
    event_tx: mpsc::Sender<EngineEvent>,
}

impl SyncEngine {
    /// Create a new sync engine
    ///
    /// # Returns
    ///
    /// A tuple of (engine, event_receiver) where event_receiver yields engine events
    pub fn new(
        api: Box<dyn ExportApi>,
        credential_store: Box<dyn CredentialStore>,
        warehouse: Box<dyn Warehouse>,
        config: SyncConfig,
    ) -> Result<(Self, mpsc::Receiver<EngineEvent>)> {
        config.validate()?;

        let (tx, rx) = mpsc::channel(config.event_channel_capacity);

        let engine = Self {
            api,
            credential_store,
            warehouse,
            config,
            event_tx: tx,
        };

        Ok((engine, rx))
    }

    /// Run one sync over the descriptor set selected by `mode`
    ///
    /// # Returns
    ///
    /// - `Ok(RunReport)`: Run finished; check [`RunReport::is_success()`]
    /// - `Err(Error)`: Run aborted
    pub async fn run(&self, mode: SyncMode) -> Result<RunReport> {
        let descriptors = self.config.datasets.select(mode);
        if descriptors.is_empty() {
            return Err(Error::config(format!("No datasets configured for {} mode", mode)));
        }

        info!(
            "Starting {} sync of {} dataset(s) via {}",
            mode,
            descriptors.len(),
            self.api.api_name()
        );
        self.emit_event(EngineEvent::Started {
            mode,
            datasets: descriptors.len(),
        });

        let session = self.authenticate().await?;

        let links = match self.config.discovery {
            DiscoveryMode::Catalog => {
                let links = self.api.list_download_links(&session).await?;
                info!("Catalog lists {} dataset link(s)", links.len());
                self.emit_event(EngineEvent::CatalogResolved { links: links.len() });
                Some(links)
            }
            DiscoveryMode::Direct => None,
        };

        let mut report = RunReport {
            mode,
            loaded: Vec::new(),
            failures: Vec::new(),
        };

        for descriptor in descriptors {
            match self.sync_dataset(&session, links.as_ref(), descriptor).await {
                Ok(loaded) => {
                    self.emit_event(EngineEvent::DatasetCompleted {
                        table: loaded.table.clone(),
                        batches: loaded.batches,
                        rows: loaded.rows,
                    });
                    report.loaded.push(loaded);
                }
                Err(e) => {
                    error!("Dataset {} → {} failed: {}", descriptor.id, descriptor.table, e);
                    self.emit_event(EngineEvent::DatasetFailed {
                        table: descriptor.table.clone(),
                        error: e.to_string(),
                    });

                    let abort = self.config.on_dataset_error == FailurePolicy::Abort;
                    if abort || e.is_fatal_for_run() {
                        self.emit_event(EngineEvent::Finished {
                            succeeded: report.loaded.len(),
                            failed: 1,
                        });
                        return Err(e);
                    }

                    warn!("Continuing with remaining datasets");
                    report.failures.push(DatasetFailure {
                        dataset_id: descriptor.id.clone(),
                        table: descriptor.table.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            "Sync finished: {} dataset(s) loaded, {} failed, {} rows merged",
            report.loaded.len(),
            report.failures.len(),
            report.total_rows()
        );
        self.emit_event(EngineEvent::Finished {
            succeeded: report.loaded.len(),
            failed: report.failures.len(),
        });

        Ok(report)
    }

    /// Exchange the refresh token and durably persist its replacement
    ///
    /// The old refresh token is dead once the exchange succeeds, so the new
    /// one is written before this returns and before any other call is made.
    async fn authenticate(&self) -> Result<ApiSession> {
        let credentials = self.credential_store.load().await?;

        let grant = self.api.exchange_refresh_token(&credentials).await?;
        debug!("Token exchange succeeded (expires_in: {:?})", grant.expires_in);

        let rotated = credentials.rotated(grant.refresh_token.clone());
        if let Err(e) = self.credential_store.replace(&rotated).await {
            error!(
                "Refresh token was rotated but could not be persisted; \
                the integration must be re-authorised: {}",
                e
            );
            return Err(e);
        }
        info!("Refresh token rotated and persisted");
        self.emit_event(EngineEvent::TokenRotated);

        Ok(ApiSession {
            access_token: grant.access_token,
            api_base_url: credentials.api_base_url,
        })
    }

    /// Download, check and load one dataset
    async fn sync_dataset(
        &self,
        session: &ApiSession,
        links: Option<&HashMap<String, DownloadLink>>,
        descriptor: &DatasetDescriptor,
    ) -> Result<LoadReport> {
        self.emit_event(EngineEvent::DatasetStarted {
            dataset_id: descriptor.id.clone(),
            table: descriptor.table.clone(),
        });

        let source = Self::resolve_source(links, descriptor)?;
        info!("Downloading dataset {} for {}", descriptor.id, descriptor.table);
        let payload = self.api.download(session, &source).await?;
        debug!("Downloaded {} bytes for {}", payload.len(), descriptor.table);

        let mut archive = CsvArchive::from_bytes(payload)?;
        debug!("Archive entry {} → {}", archive.entry_name(), descriptor.table);

        let target = self.warehouse.prepare_target(descriptor).await?;
        debug!(
            "Target {} has {} column(s), staging via {}",
            target.table, target.num_columns, target.staging_table
        );

        let loader = BatchLoader::new(self.warehouse.as_ref(), self.config.batch_size);
        let reader = archive.csv_reader()?;
        loader
            .load_into(&target, reader, |batch, rows| {
                self.emit_event(EngineEvent::BatchCommitted {
                    table: target.table.clone(),
                    batch,
                    rows,
                });
            })
            .await
    }

    /// Pick the download source for a descriptor
    fn resolve_source(
        links: Option<&HashMap<String, DownloadLink>>,
        descriptor: &DatasetDescriptor,
    ) -> Result<DownloadSource> {
        match links {
            Some(links) => links
                .get(&descriptor.id)
                .cloned()
                .map(DownloadSource::Link)
                .ok_or_else(|| {
                    Error::not_found(format!(
                        "Dataset {} ({}) is not in the export catalog",
                        descriptor.id, descriptor.table
                    ))
                }),
            None => Ok(DownloadSource::Dataset(descriptor.id.clone())),
        }
    }

    /// Emit an engine event
    fn emit_event(&self, event: EngineEvent) {
        // Send event, logging warning if channel is full (backpressure)
        if self.event_tx.try_send(event).is_err() {
            warn!("Event channel full, dropping event. Consider raising event_channel_capacity.");
        }
    }
}
