// # bds-core
//
// Core library for syncing Brightspace Data Sets (BDS) exports into a
// relational warehouse.
//
// ## Architecture Overview
//
// - **CredentialStore**: Trait for the durable credential document (rotating refresh token)
// - **ExportApi**: Trait for token exchange, export catalog and dataset downloads
// - **Warehouse**: Trait for batch-atomic staging and merging into destination tables
// - **CsvArchive / CsvBatches**: Single-entry archive check and lazy CSV batching
// - **BatchLoader**: Streams one dataset into the warehouse a batch at a time
// - **SyncEngine**: Orchestrates one run, dataset by dataset
//
// ## Design Principles
//
// 1. **Rotation first**: The new refresh token is persisted before any other call
// 2. **Bounded memory**: Rows are read lazily and held one batch at a time
// 3. **Batch atomicity**: Each batch commits or rolls back as a unit
// 4. **Library-First**: The binary only wires concrete implementations together

pub mod archive;
pub mod batch;
pub mod config;
pub mod engine;
pub mod error;
pub mod loader;
pub mod state;
pub mod traits;

// Re-export core types for convenience
pub use archive::CsvArchive;
pub use batch::{CsvBatch, CsvBatches};
pub use config::{
    DatabaseConfig, DatasetDescriptor, DatasetSets, DiscoveryMode, FailurePolicy, SyncConfig,
    SyncMode,
};
pub use engine::{DatasetFailure, EngineEvent, RunReport, SyncEngine};
pub use error::{Error, Result};
pub use loader::{BatchLoader, LoadReport};
pub use state::{FileCredentialStore, MemoryCredentialStore};
pub use traits::{CredentialStore, Credentials, ExportApi, Warehouse};
