//! Configuration types for the sync pipeline
//!
//! This module defines all configuration structures used throughout the crate.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Default number of CSV rows per load transaction
pub const DEFAULT_BATCH_SIZE: usize = 10_000;

/// Default Brightspace LP API version
pub const DEFAULT_API_VERSION: &str = "1.18";

/// Default OAuth2 scope requested on every token exchange
pub const DEFAULT_TOKEN_SCOPE: &str = "datahub:dataexports:*";

/// Main sync configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Full and differential dataset descriptor sets
    #[serde(default)]
    pub datasets: DatasetSets,

    /// How download sources are resolved
    #[serde(default)]
    pub discovery: DiscoveryMode,

    /// Maximum number of rows per load transaction
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// What to do when a single dataset fails
    #[serde(default)]
    pub on_dataset_error: FailurePolicy,

    /// Capacity of the engine event channel
    ///
    /// When full, new events are dropped (with a warning log).
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl SyncConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self {
            datasets: DatasetSets::default(),
            discovery: DiscoveryMode::default(),
            batch_size: DEFAULT_BATCH_SIZE,
            on_dataset_error: FailurePolicy::default(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.batch_size == 0 {
            return Err(crate::Error::config("Batch size must be > 0"));
        }
        if self.event_channel_capacity == 0 {
            return Err(crate::Error::config("Event channel capacity must be > 0"));
        }

        self.datasets.validate()
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Which descriptor set a run uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Full data sets
    Full,
    /// Differential data sets (rows changed since the previous export)
    Differential,
}

impl std::fmt::Display for SyncMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncMode::Full => f.write_str("full"),
            SyncMode::Differential => f.write_str("differential"),
        }
    }
}

/// How each dataset's download source is resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryMode {
    /// Page through the listing endpoint once per run and use the one-time links
    #[default]
    Catalog,
    /// Use the download-by-id endpoint directly
    Direct,
}

impl std::str::FromStr for DiscoveryMode {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "catalog" => Ok(DiscoveryMode::Catalog),
            "direct" => Ok(DiscoveryMode::Direct),
            other => Err(crate::Error::config(format!(
                "Unknown discovery mode '{}'. Supported: catalog, direct",
                other
            ))),
        }
    }
}

/// Dataset failure policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Stop at the first failed dataset
    #[default]
    Abort,
    /// Log the failure, load the remaining datasets, fail the run at the end
    Continue,
}

impl std::str::FromStr for FailurePolicy {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "abort" => Ok(FailurePolicy::Abort),
            "continue" => Ok(FailurePolicy::Continue),
            other => Err(crate::Error::config(format!(
                "Unknown failure policy '{}'. Supported: abort, continue",
                other
            ))),
        }
    }
}

/// One export data set and where it lands
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetDescriptor {
    /// Opaque plugin/export identifier
    pub id: String,

    /// Destination table name
    pub table: String,

    /// Table-specific merge statement, reading from the `tmp_<table>` staging relation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge_sql: Option<String>,
}

impl DatasetDescriptor {
    /// Create a descriptor without a custom merge statement
    pub fn new(id: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            table: table.into(),
            merge_sql: None,
        }
    }

    /// Set a custom merge statement
    pub fn with_merge_sql(mut self, merge_sql: impl Into<String>) -> Self {
        self.merge_sql = Some(merge_sql.into());
        self
    }
}

/// The two named descriptor sets
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetSets {
    /// Full exports
    pub full: Vec<DatasetDescriptor>,

    /// Differential exports
    pub differential: Vec<DatasetDescriptor>,
}

impl DatasetSets {
    /// Select the descriptor set for a mode
    pub fn select(&self, mode: SyncMode) -> &[DatasetDescriptor] {
        match mode {
            SyncMode::Full => &self.full,
            SyncMode::Differential => &self.differential,
        }
    }

    /// Load descriptor sets from a JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, crate::Error> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            crate::Error::config(format!(
                "Failed to read dataset file {}: {}",
                path.display(),
                e
            ))
        })?;

        let sets: DatasetSets = serde_json::from_str(&content).map_err(|e| {
            crate::Error::config(format!(
                "Failed to parse dataset file {}: {}",
                path.display(),
                e
            ))
        })?;

        sets.validate()?;
        Ok(sets)
    }

    /// Attach `upsert_<table>.sql` statements found in `dir`
    ///
    /// Descriptors with no matching file keep their current statement.
    pub fn with_merge_statements(mut self, dir: impl AsRef<Path>) -> Result<Self, crate::Error> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(crate::Error::config(format!(
                "Upsert directory does not exist: {}",
                dir.display()
            )));
        }

        for descriptor in self.full.iter_mut().chain(self.differential.iter_mut()) {
            let path = dir.join(format!("upsert_{}.sql", descriptor.table));
            if !path.is_file() {
                continue;
            }

            let sql = std::fs::read_to_string(&path).map_err(|e| {
                crate::Error::config(format!(
                    "Failed to read merge statement {}: {}",
                    path.display(),
                    e
                ))
            })?;
            tracing::debug!("Using merge statement {} for {}", path.display(), descriptor.table);
            descriptor.merge_sql = Some(sql);
        }

        Ok(self)
    }

    /// Validate both sets
    pub fn validate(&self) -> Result<(), crate::Error> {
        validate_set("full", &self.full)?;
        validate_set("differential", &self.differential)
    }
}

impl Default for DatasetSets {
    fn default() -> Self {
        Self {
            full: vec![
                DatasetDescriptor::new("07a9e561-e22f-4e82-8dd6-7bfb14c91776", "org_units"),
                DatasetDescriptor::new("793668a8-2c58-4e5e-b263-412d28d5703f", "grade_objects"),
                DatasetDescriptor::new("1d6d722e-b572-456f-97c1-d526570daa6b", "users"),
                DatasetDescriptor::new("9d8a96b4-8145-416d-bd18-11402bc58f8d", "grade_results"),
                DatasetDescriptor::new(
                    "533f84c8-b2ad-4688-94dc-c839952e9c4f",
                    "user_enrollments",
                ),
            ],
            differential: vec![DatasetDescriptor::new(
                "a78735f2-7210-4a57-aac1-e0f6bd714349",
                "user_enrollments",
            )],
        }
    }
}

fn validate_set(name: &str, set: &[DatasetDescriptor]) -> Result<(), crate::Error> {
    let mut tables = HashSet::new();
    for descriptor in set {
        if descriptor.id.trim().is_empty() {
            return Err(crate::Error::config(format!(
                "Dataset in '{}' set has an empty identifier",
                name
            )));
        }
        if descriptor.table.trim().is_empty() {
            return Err(crate::Error::config(format!(
                "Dataset {} in '{}' set has an empty table name",
                descriptor.id, name
            )));
        }
        if !tables.insert(descriptor.table.as_str()) {
            return Err(crate::Error::config(format!(
                "Table {} appears twice in '{}' set",
                descriptor.table, name
            )));
        }
    }
    Ok(())
}

/// Destination database connection parameters
#[derive(Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Host name
    pub host: String,

    /// Port
    #[serde(default = "default_db_port")]
    pub port: u16,

    /// Database name
    pub database: String,

    /// User name
    pub user: String,

    /// Password
    /// ⚠️ NEVER log this value
    pub password: String,
}

impl DatabaseConfig {
    /// Validate the connection parameters
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.host.is_empty() {
            return Err(crate::Error::config("Database host cannot be empty"));
        }
        if self.database.is_empty() {
            return Err(crate::Error::config("Database name cannot be empty"));
        }
        if self.user.is_empty() {
            return Err(crate::Error::config("Database user cannot be empty"));
        }
        Ok(())
    }
}

impl std::fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"<REDACTED>")
            .finish()
    }
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_event_channel_capacity() -> usize {
    1000
}

fn default_db_port() -> u16 {
    5432
}
