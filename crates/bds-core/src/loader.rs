//! Streaming batch loader
//!
//! Drives one dataset's CSV body into the warehouse a batch at a time. Each
//! batch is its own transaction on the warehouse side, so a failure in batch
//! K leaves batches 1..K-1 committed and stops before batch K+1.

use std::io::Read;
use tracing::{debug, info};

use crate::batch::CsvBatches;
use crate::error::{Error, Result};
use crate::traits::{LoadTarget, Warehouse};

/// Outcome of loading one dataset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadReport {
    /// Destination table
    pub table: String,

    /// Batches committed
    pub batches: usize,

    /// Rows merged across all batches
    pub rows: u64,
}

/// Batch loader bound to one warehouse
pub struct BatchLoader<'a> {
    warehouse: &'a dyn Warehouse,
    batch_size: usize,
}

impl<'a> BatchLoader<'a> {
    /// Create a loader with a fixed batch size
    pub fn new(warehouse: &'a dyn Warehouse, batch_size: usize) -> Self {
        Self {
            warehouse,
            batch_size,
        }
    }

    /// Load `reader` into an already-prepared target
    ///
    /// `on_commit` is called with the 1-based batch number and its row count
    /// after each batch commits.
    pub async fn load_into<R, F>(
        &self,
        target: &LoadTarget,
        reader: R,
        mut on_commit: F,
    ) -> Result<LoadReport>
    where
        R: Read,
        F: FnMut(usize, u64),
    {
        let mut report = LoadReport {
            table: target.table.clone(),
            batches: 0,
            rows: 0,
        };

        for batch in CsvBatches::new(reader, self.batch_size, target.num_columns) {
            let number = report.batches + 1;
            let batch = batch.map_err(|e| {
                Error::load(&target.table, format!("CSV parse error in batch {}: {}", number, e))
            })?;

            let rows = self
                .warehouse
                .merge_batch(target, &batch)
                .await
                .map_err(|e| match e {
                    Error::Load { .. } => e,
                    other => Error::load(&target.table, other),
                })?;

            report.batches = number;
            report.rows += rows;
            debug!("Committed batch {} into {} ({} rows)", number, target.table, rows);
            on_commit(number, rows);
        }

        info!(
            "Loaded {} rows into {} in {} batch(es)",
            report.rows, report.table, report.batches
        );
        Ok(report)
    }
}
