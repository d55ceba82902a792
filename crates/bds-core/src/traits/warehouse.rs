// # Warehouse Trait
//
// Defines the interface to the destination relational store.
//
// ## Batch contract
//
// `merge_batch()` runs one transaction per call:
//
// 1. Create the staging relation, same column shape as the destination
// 2. Bulk-copy the batch rows into it
// 3. Run the merge statement
// 4. Drop the staging relation
// 5. Commit
//
// Within a batch the last row for a key wins.
//
// Either every row of the batch is merged and visible, or none is. Batches
// are independent transactions; a failed batch never rolls back earlier ones.

use async_trait::async_trait;

use crate::batch::CsvBatch;
use crate::config::DatasetDescriptor;

/// Everything a batch load needs about its destination table
///
/// Resolved once per dataset, before batching begins, and passed by
/// reference into every batch load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadTarget {
    /// Destination table
    pub table: String,

    /// Staging relation name (`tmp_<table>`)
    pub staging_table: String,

    /// Number of columns in the destination table
    pub num_columns: usize,

    /// Positions of the primary key columns; empty when the table has none
    pub key_columns: Vec<usize>,

    /// Statement merging the staging relation into the destination
    pub merge_sql: String,
}

impl LoadTarget {
    /// Staging relation name for a destination table
    pub fn staging_name(table: &str) -> String {
        format!("tmp_{}", table)
    }
}

/// Trait for warehouse implementations
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Probe the destination table and resolve its merge statement
    ///
    /// The column count comes from a zero-row query against the table. The
    /// descriptor's merge statement is used when present; otherwise the
    /// implementation derives a primary-key upsert.
    ///
    /// # Returns
    ///
    /// - `Ok(LoadTarget)`: Table shape and merge statement
    /// - `Err(Error::Load)`: Table missing or merge statement unresolvable
    async fn prepare_target(
        &self,
        descriptor: &DatasetDescriptor,
    ) -> Result<LoadTarget, crate::Error>;

    /// Merge one batch inside a single transaction
    ///
    /// # Returns
    ///
    /// - `Ok(u64)`: Rows copied into the staging relation
    /// - `Err(Error::Load)`: Any step failed; nothing from this batch is visible
    async fn merge_batch(&self, target: &LoadTarget, batch: &CsvBatch) -> Result<u64, crate::Error>;

    /// Get the warehouse name (for logging)
    fn warehouse_name(&self) -> &'static str;
}
