//! Test doubles and common utilities for sync contract tests
//!
//! The doubles share one call log so tests can assert on the order in which
//! the engine touches the credential store, the export API and the warehouse.

#![allow(dead_code)]

use bds_core::batch::CsvBatch;
use bds_core::config::{DatasetDescriptor, DatasetSets, DiscoveryMode, FailurePolicy, SyncConfig};
use bds_core::error::{Error, Result};
use bds_core::traits::{
    AccessToken, ApiSession, CredentialStore, Credentials, DownloadLink, DownloadSource, ExportApi,
    LoadTarget, TokenGrant, Warehouse,
};
use std::collections::{BTreeMap, HashMap};
use std::io::{Cursor, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Ordered record of every double's calls
#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    /// Position of the first entry starting with `prefix`
    pub fn position(&self, prefix: &str) -> Option<usize> {
        self.entries().iter().position(|e| e.starts_with(prefix))
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.entries().iter().filter(|e| e.starts_with(prefix)).count()
    }
}

/// Build a zip archive holding the given entries
pub fn zip_entries(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, body) in entries {
        writer
            .start_file(*name, zip::write::SimpleFileOptions::default())
            .unwrap();
        writer.write_all(body.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// Build a single-entry export archive
pub fn zip_csv(body: &str) -> Vec<u8> {
    zip_entries(&[("export.csv", body)])
}

/// CSV body with `rows` data rows of shape `id,name`
pub fn csv_rows(rows: usize) -> String {
    let mut body = String::from("Id,Name\n");
    for i in 0..rows {
        body.push_str(&format!("{},user{}\n", i, i));
    }
    body
}

pub fn test_credentials(refresh_token: &str) -> Credentials {
    Credentials::new("client-id", "client-secret", "https://lms.example.com", refresh_token)
}

/// A credential store that records loads and replacements
#[derive(Clone)]
pub struct RecordingCredentialStore {
    current: Arc<Mutex<Credentials>>,
    fail_replace: bool,
    log: CallLog,
}

impl RecordingCredentialStore {
    pub fn new(credentials: Credentials, log: CallLog) -> Self {
        Self {
            current: Arc::new(Mutex::new(credentials)),
            fail_replace: false,
            log,
        }
    }

    pub fn failing_replace(mut self) -> Self {
        self.fail_replace = true;
        self
    }

    pub fn refresh_token(&self) -> String {
        self.current.lock().unwrap().refresh_token.clone()
    }

    pub fn snapshot(&self) -> Credentials {
        self.current.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl CredentialStore for RecordingCredentialStore {
    async fn load(&self) -> Result<Credentials> {
        self.log.push("store.load");
        Ok(self.snapshot())
    }

    async fn replace(&self, credentials: &Credentials) -> Result<()> {
        self.log.push(format!("store.replace {}", credentials.refresh_token));
        if self.fail_replace {
            return Err(Error::credential_store("disk full"));
        }
        *self.current.lock().unwrap() = credentials.clone();
        Ok(())
    }
}

/// A scripted export API
///
/// The token endpoint accepts exactly one refresh token and answers with
/// `next_refresh_token`. Payloads are keyed by dataset id.
#[derive(Clone)]
pub struct MockExportApi {
    accepted_refresh_token: String,
    next_refresh_token: String,
    token_failure: Option<(u16, String)>,
    catalog: HashMap<String, DownloadLink>,
    catalog_failure: Option<(u16, String)>,
    payloads: HashMap<String, Vec<u8>>,
    download_failures: HashMap<String, (u16, String)>,
    download_count: Arc<AtomicUsize>,
    log: CallLog,
}

impl MockExportApi {
    pub fn new(accepted_refresh_token: &str, next_refresh_token: &str, log: CallLog) -> Self {
        Self {
            accepted_refresh_token: accepted_refresh_token.to_string(),
            next_refresh_token: next_refresh_token.to_string(),
            token_failure: None,
            catalog: HashMap::new(),
            catalog_failure: None,
            payloads: HashMap::new(),
            download_failures: HashMap::new(),
            download_count: Arc::new(AtomicUsize::new(0)),
            log,
        }
    }

    /// Serve `payload` for `dataset_id`, listed in the catalog
    pub fn with_dataset(mut self, dataset_id: &str, payload: Vec<u8>) -> Self {
        self.catalog.insert(
            dataset_id.to_string(),
            DownloadLink(format!("https://export.example.com/{}", dataset_id)),
        );
        self.payloads.insert(dataset_id.to_string(), payload);
        self
    }

    pub fn with_token_failure(mut self, status: u16, body: &str) -> Self {
        self.token_failure = Some((status, body.to_string()));
        self
    }

    pub fn with_catalog_failure(mut self, status: u16, body: &str) -> Self {
        self.catalog_failure = Some((status, body.to_string()));
        self
    }

    pub fn with_download_failure(mut self, dataset_id: &str, status: u16, body: &str) -> Self {
        self.catalog.insert(
            dataset_id.to_string(),
            DownloadLink(format!("https://export.example.com/{}", dataset_id)),
        );
        self.download_failures
            .insert(dataset_id.to_string(), (status, body.to_string()));
        self
    }

    pub fn download_count(&self) -> usize {
        self.download_count.load(Ordering::SeqCst)
    }

    fn dataset_id_of(source: &DownloadSource) -> String {
        match source {
            DownloadSource::Link(DownloadLink(url)) => {
                url.rsplit('/').next().unwrap_or_default().to_string()
            }
            DownloadSource::Dataset(id) => id.clone(),
        }
    }
}

#[async_trait::async_trait]
impl ExportApi for MockExportApi {
    async fn exchange_refresh_token(&self, credentials: &Credentials) -> Result<TokenGrant> {
        self.log
            .push(format!("api.exchange {}", credentials.refresh_token));

        if let Some((status, body)) = &self.token_failure {
            return Err(Error::auth(*status, body.clone()));
        }
        if credentials.refresh_token != self.accepted_refresh_token {
            return Err(Error::auth(400, r#"{"error":"invalid_grant"}"#));
        }

        Ok(TokenGrant {
            access_token: AccessToken::new("access-token"),
            refresh_token: self.next_refresh_token.clone(),
            expires_in: Some(3600),
        })
    }

    async fn list_download_links(
        &self,
        session: &ApiSession,
    ) -> Result<HashMap<String, DownloadLink>> {
        self.log.push("api.list");
        assert_eq!(session.access_token.secret(), "access-token");

        if let Some((status, body)) = &self.catalog_failure {
            return Err(Error::auth(*status, body.clone()));
        }
        Ok(self.catalog.clone())
    }

    async fn download(&self, _session: &ApiSession, source: &DownloadSource) -> Result<Vec<u8>> {
        let id = Self::dataset_id_of(source);
        self.log.push(format!("api.download {}", id));
        self.download_count.fetch_add(1, Ordering::SeqCst);

        if let Some((status, body)) = self.download_failures.get(&id) {
            return Err(Error::download(*status, body.clone()));
        }
        self.payloads
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::download(404, "no such export"))
    }

    fn api_name(&self) -> &'static str {
        "mock"
    }
}

/// In-memory warehouse
///
/// Tables are keyed by their first column and merged with upsert semantics,
/// one "transaction" per batch. A batch either lands whole or not at all.
#[derive(Clone)]
pub struct MockWarehouse {
    columns: HashMap<String, usize>,
    tables: Arc<Mutex<HashMap<String, BTreeMap<String, Vec<String>>>>>,
    batch_sizes: Arc<Mutex<Vec<(String, usize)>>>,
    fail_on_batch: Option<(String, usize)>,
    log: CallLog,
}

impl MockWarehouse {
    pub fn new(log: CallLog) -> Self {
        Self {
            columns: HashMap::new(),
            tables: Arc::new(Mutex::new(HashMap::new())),
            batch_sizes: Arc::new(Mutex::new(Vec::new())),
            fail_on_batch: None,
            log,
        }
    }

    pub fn with_table(mut self, table: &str, num_columns: usize) -> Self {
        self.columns.insert(table.to_string(), num_columns);
        self
    }

    /// Fail the `batch`-th merge (1-based) into `table`
    pub fn failing_batch(mut self, table: &str, batch: usize) -> Self {
        self.fail_on_batch = Some((table.to_string(), batch));
        self
    }

    /// Seed a row directly, bypassing batch loads
    pub fn seed(&self, table: &str, row: &[&str]) {
        let row: Vec<String> = row.iter().map(|s| s.to_string()).collect();
        self.tables
            .lock()
            .unwrap()
            .entry(table.to_string())
            .or_default()
            .insert(row[0].clone(), row);
    }

    /// Rows of `table`, ordered by key
    pub fn rows(&self, table: &str) -> Vec<Vec<String>> {
        self.tables
            .lock()
            .unwrap()
            .get(table)
            .map(|t| t.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Sizes of every committed batch for `table`, in order
    pub fn batch_sizes(&self, table: &str) -> Vec<usize> {
        self.batch_sizes
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| t == table)
            .map(|(_, n)| *n)
            .collect()
    }

    fn committed_batches(&self, table: &str) -> usize {
        self.batch_sizes(table).len()
    }
}

#[async_trait::async_trait]
impl Warehouse for MockWarehouse {
    async fn prepare_target(&self, descriptor: &DatasetDescriptor) -> Result<LoadTarget> {
        self.log.push(format!("warehouse.prepare {}", descriptor.table));

        let num_columns = *self.columns.get(&descriptor.table).ok_or_else(|| {
            Error::load(&descriptor.table, "relation does not exist")
        })?;

        Ok(LoadTarget {
            table: descriptor.table.clone(),
            staging_table: LoadTarget::staging_name(&descriptor.table),
            num_columns,
            key_columns: vec![0],
            merge_sql: descriptor
                .merge_sql
                .clone()
                .unwrap_or_else(|| "upsert by first column".to_string()),
        })
    }

    async fn merge_batch(&self, target: &LoadTarget, batch: &CsvBatch) -> Result<u64> {
        let number = self.committed_batches(&target.table) + 1;
        self.log.push(format!("warehouse.merge {} {}", target.table, number));

        if let Some((table, failing)) = &self.fail_on_batch {
            if table == &target.table && *failing == number {
                return Err(Error::load(
                    &target.table,
                    "duplicate key value violates unique constraint",
                ));
            }
        }

        for row in batch.rows() {
            if row.len() != target.num_columns {
                return Err(Error::load(
                    &target.table,
                    format!("expected {} columns, got {}", target.num_columns, row.len()),
                ));
            }
        }

        let mut tables = self.tables.lock().unwrap();
        let table = tables.entry(target.table.clone()).or_default();
        for row in batch.rows() {
            table.insert(row[0].clone(), row.clone());
        }
        self.batch_sizes
            .lock()
            .unwrap()
            .push((target.table.clone(), batch.len()));

        Ok(batch.len() as u64)
    }

    fn warehouse_name(&self) -> &'static str {
        "mock"
    }
}

/// Config with a single full-set descriptor per `(id, table)` pair
pub fn config_with(
    datasets: &[(&str, &str)],
    batch_size: usize,
    on_dataset_error: FailurePolicy,
) -> SyncConfig {
    SyncConfig {
        datasets: DatasetSets {
            full: datasets
                .iter()
                .map(|(id, table)| DatasetDescriptor::new(*id, *table))
                .collect(),
            differential: Vec::new(),
        },
        discovery: DiscoveryMode::Catalog,
        batch_size,
        on_dataset_error,
        event_channel_capacity: 1000,
    }
}
